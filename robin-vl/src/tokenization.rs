//! Prompt tokenization with image placeholders.
//!
//! The language model sees each `<image>` marker in a prompt as a single
//! placeholder id (by default [`IMAGE_TOKEN_INDEX`]) that is later replaced by
//! the projected image features. Text between markers is tokenized chunk by
//! chunk so the marker never leaks into the vocabulary.

use crate::utils::candle_to_processing;
use candle_core::{Device, Tensor};
use robin_core::core::constants::DEFAULT_IMAGE_TOKEN;
use robin_core::core::{RobinError, RobinResult};
use std::path::Path;
use std::str::FromStr;
use tokenizers::Tokenizer;

pub use robin_core::core::constants::IMAGE_TOKEN_INDEX;

/// Minimal tokenizer surface needed to build multimodal prompts.
pub trait TextTokenizer {
    /// Encodes `text` including special tokens (BOS, when the tokenizer adds one).
    fn encode(&self, text: &str) -> RobinResult<Vec<i64>>;

    /// Id of the beginning-of-sequence token, if the vocabulary has one.
    fn bos_token_id(&self) -> Option<i64>;
}

impl<T: TextTokenizer + ?Sized> TextTokenizer for &T {
    fn encode(&self, text: &str) -> RobinResult<Vec<i64>> {
        (**self).encode(text)
    }

    fn bos_token_id(&self) -> Option<i64> {
        (**self).bos_token_id()
    }
}

/// [`TextTokenizer`] backed by a Hugging Face `tokenizer.json`.
pub struct HfTokenizer {
    inner: Tokenizer,
    bos_token_id: Option<i64>,
}

impl HfTokenizer {
    /// Default BOS token of Llama-family vocabularies.
    pub const DEFAULT_BOS_TOKEN: &'static str = "<s>";

    pub fn new(inner: Tokenizer) -> Self {
        Self::with_bos_token(inner, Self::DEFAULT_BOS_TOKEN)
    }

    /// Wraps a tokenizer whose BOS token is spelled `bos_token`.
    pub fn with_bos_token(inner: Tokenizer, bos_token: &str) -> Self {
        let bos_token_id = inner.token_to_id(bos_token).map(i64::from);
        Self {
            inner,
            bos_token_id,
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> RobinResult<Self> {
        let path = path.as_ref();
        let inner = Tokenizer::from_file(path).map_err(|e| {
            RobinError::config_error(format!(
                "failed to load tokenizer {}: {e}",
                path.display()
            ))
        })?;
        Ok(Self::new(inner))
    }

    pub fn inner(&self) -> &Tokenizer {
        &self.inner
    }
}

impl TextTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> RobinResult<Vec<i64>> {
        let enc = self
            .inner
            .encode(text, true)
            .map_err(|e| RobinError::tokenization("encode text", e))?;
        Ok(enc.get_ids().iter().map(|&id| i64::from(id)).collect())
    }

    fn bos_token_id(&self) -> Option<i64> {
        self.bos_token_id
    }
}

/// Tensor flavor requested from [`tokenizer_image_token_tensor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnTensors {
    /// A 1-D `i64` candle tensor.
    Candle,
}

impl FromStr for ReturnTensors {
    type Err = RobinError;

    /// Accepts `"pt"` as well so configs written for PyTorch pipelines keep working.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pt" | "candle" => Ok(Self::Candle),
            other => Err(RobinError::config_error(format!(
                "Unsupported tensor type: {other}"
            ))),
        }
    }
}

/// Tokenizes `prompt`, replacing every `<image>` marker with `image_token_index`.
///
/// Each text chunk is tokenized separately. When the first chunk starts with
/// the BOS id, BOS is emitted once and stripped from every later chunk, so the
/// result holds exactly one BOS followed by text ids and one placeholder per
/// marker.
pub fn tokenizer_image_token<T: TextTokenizer + ?Sized>(
    prompt: &str,
    tokenizer: &T,
    image_token_index: i64,
) -> RobinResult<Vec<i64>> {
    let chunks = prompt
        .split(DEFAULT_IMAGE_TOKEN)
        .map(|chunk| tokenizer.encode(chunk))
        .collect::<RobinResult<Vec<_>>>()?;

    let mut input_ids = Vec::new();
    let bos = tokenizer.bos_token_id();
    let offset = match chunks.first().and_then(|c| c.first()) {
        Some(&first) if Some(first) == bos => {
            input_ids.push(first);
            1
        }
        _ => 0,
    };

    // The separator carries `offset` extra copies so that skipping `offset`
    // leading ids still leaves exactly one placeholder.
    let separator = vec![image_token_index; offset + 1];
    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 {
            input_ids.extend(separator.iter().skip(offset));
        }
        input_ids.extend(chunk.iter().skip(offset));
    }

    Ok(input_ids)
}

/// Like [`tokenizer_image_token`] but returns a `(L,)` `i64` tensor.
pub fn tokenizer_image_token_tensor<T: TextTokenizer + ?Sized>(
    prompt: &str,
    tokenizer: &T,
    image_token_index: i64,
    return_tensors: ReturnTensors,
    device: &Device,
) -> RobinResult<Tensor> {
    let ids = tokenizer_image_token(prompt, tokenizer, image_token_index)?;
    match return_tensors {
        ReturnTensors::Candle => {
            Tensor::new(ids, device).map_err(|e| candle_to_processing("create input_ids tensor", e))
        }
    }
}
