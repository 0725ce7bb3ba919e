//! Generation stopping criteria.
//!
//! [`KeywordsStoppingCriteria`] halts batched generation once every sequence
//! has produced one of the stop keywords (for example a conversation
//! separator like `"</s>"` or `"###"`). A sequence that has already matched
//! stays stopped even if later tokens move past the keyword, since the batch
//! keeps decoding until the slowest sample finishes.

use crate::tokenization::TextTokenizer;
use crate::utils::candle_to_processing;
use candle_core::{DType, Tensor};
use robin_core::core::{RobinError, RobinResult};
use tracing::debug;

/// Decides after each decoding step whether generation should stop.
pub trait StoppingCriteria {
    /// `output_ids` holds the full token history of every sample in the batch.
    fn should_stop(&mut self, output_ids: &[Vec<i64>]) -> RobinResult<bool>;

    /// Same as [`should_stop`](Self::should_stop) for a `(batch, seq_len)` integer tensor.
    fn should_stop_tensor(&mut self, output_ids: &Tensor) -> RobinResult<bool> {
        let rows = output_ids
            .to_dtype(DType::I64)
            .and_then(|t| t.to_vec2::<i64>())
            .map_err(|e| candle_to_processing("read output_ids for stopping check", e))?;
        self.should_stop(&rows)
    }
}

/// Stops when every sample in the batch has ended with one of the keywords.
#[derive(Debug, Clone)]
pub struct KeywordsStoppingCriteria {
    keywords: Vec<String>,
    keyword_ids: Vec<Vec<i64>>,
    max_keyword_len: usize,
    batch_size: usize,
    /// Sequence length at which each sample first matched, 0 while running.
    matches: Vec<usize>,
}

impl KeywordsStoppingCriteria {
    /// Tokenizes `keywords` with `tokenizer`. A leading BOS is dropped from
    /// multi-token keywords so the ids can match mid-sequence.
    pub fn new<S, T>(keywords: &[S], tokenizer: &T, batch_size: usize) -> RobinResult<Self>
    where
        S: AsRef<str>,
        T: TextTokenizer + ?Sized,
    {
        if batch_size == 0 {
            return Err(RobinError::invalid_input("batch_size must be > 0"));
        }

        let bos = tokenizer.bos_token_id();
        let mut keyword_ids = Vec::with_capacity(keywords.len());
        let mut max_keyword_len = 0;
        for keyword in keywords {
            let keyword = keyword.as_ref();
            let mut ids = tokenizer.encode(keyword)?;
            if ids.len() > 1 && bos.is_some() && ids.first().copied() == bos {
                ids.remove(0);
            }
            if ids.is_empty() {
                return Err(RobinError::invalid_input(format!(
                    "stop keyword {keyword:?} tokenizes to nothing"
                )));
            }
            max_keyword_len = max_keyword_len.max(ids.len());
            keyword_ids.push(ids);
        }

        debug!(
            keywords = keywords.len(),
            max_keyword_len, batch_size, "built keyword stopping criteria"
        );

        Ok(Self {
            keywords: keywords.iter().map(|k| k.as_ref().to_string()).collect(),
            keyword_ids,
            max_keyword_len,
            batch_size,
            matches: vec![0; batch_size],
        })
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn keyword_ids(&self) -> &[Vec<i64>] {
        &self.keyword_ids
    }

    pub fn max_keyword_len(&self) -> usize {
        self.max_keyword_len
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Sequence length at which each sample first matched, `None` while still running.
    pub fn matches(&self) -> Vec<Option<usize>> {
        self.matches
            .iter()
            .map(|&len| (len > 0).then_some(len))
            .collect()
    }

    /// Forgets all recorded matches so the criteria can be reused.
    pub fn reset(&mut self) {
        self.matches.iter_mut().for_each(|m| *m = 0);
    }

    fn ends_with_keyword(&self, ids: &[i64]) -> bool {
        self.keyword_ids.iter().any(|kw| ids.ends_with(kw))
    }
}

impl StoppingCriteria for KeywordsStoppingCriteria {
    fn should_stop(&mut self, output_ids: &[Vec<i64>]) -> RobinResult<bool> {
        if output_ids.len() != self.batch_size {
            return Err(RobinError::invalid_input(format!(
                "expected {} sequences, got {}",
                self.batch_size,
                output_ids.len()
            )));
        }

        for (i, ids) in output_ids.iter().enumerate() {
            if self.matches[i] == 0 && !ids.is_empty() && self.ends_with_keyword(ids) {
                self.matches[i] = ids.len();
            }
        }

        Ok(self.matches.iter().all(|&m| m > 0))
    }
}

/// Stops as soon as any contained criteria does.
#[derive(Default)]
pub struct StoppingCriteriaList {
    criteria: Vec<Box<dyn StoppingCriteria + Send>>,
}

impl StoppingCriteriaList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, criteria: impl StoppingCriteria + Send + 'static) {
        self.criteria.push(Box::new(criteria));
    }

    pub fn with(mut self, criteria: impl StoppingCriteria + Send + 'static) -> Self {
        self.push(criteria);
        self
    }

    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }
}

impl StoppingCriteria for StoppingCriteriaList {
    fn should_stop(&mut self, output_ids: &[Vec<i64>]) -> RobinResult<bool> {
        // Every criteria sees every step so stateful ones keep their bookkeeping current.
        let mut stop = false;
        for criteria in &mut self.criteria {
            stop |= criteria.should_stop(output_ids)?;
        }
        Ok(stop)
    }
}
