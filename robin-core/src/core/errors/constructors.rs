//! Ergonomic constructors for [`RobinError`].
//!
//! These keep call sites short: `RobinError::config_error(format!(..))`
//! instead of spelling out the struct variant every time.

use super::types::{ProcessingStage, RobinError};

impl RobinError {
    /// Creates a configuration error.
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Creates an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    #[inline]
    fn processing_with_context(
        kind: ProcessingStage,
        context: impl Into<String>,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Processing {
            kind,
            context: context.into(),
            source: Box::new(error),
        }
    }

    /// Wraps a tensor operation failure.
    pub fn tensor_operation(
        context: impl Into<String>,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::processing_with_context(ProcessingStage::TensorOperation, context, error)
    }

    /// Wraps an image processing failure.
    pub fn image_processing(
        context: impl Into<String>,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::processing_with_context(ProcessingStage::ImageProcessing, context, error)
    }

    /// Wraps a tokenizer failure.
    ///
    /// `tokenizers` reports errors as `Box<dyn Error + Send + Sync>`, which does not itself
    /// implement `Error`, so this takes the message instead of the source.
    pub fn tokenization(context: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Processing {
            kind: ProcessingStage::Tokenization,
            context: context.into(),
            source: message.to_string().into(),
        }
    }

    /// Wraps a model loading or inference failure.
    pub fn inference(
        model_name: impl Into<String>,
        context: impl Into<String>,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Inference {
            model_name: model_name.into(),
            context: context.into(),
            source: Box::new(error),
        }
    }

    /// Creates a not-loaded error for a delayed-load model.
    pub fn model_not_loaded(model_name: impl Into<String>) -> Self {
        Self::ModelNotLoaded {
            model_name: model_name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_tokenization_error_keeps_message_as_source() {
        let err = RobinError::tokenization("encode prompt", "unknown token");
        assert_eq!(err.to_string(), "tokenization failed: encode prompt");
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("unknown token"));
    }

    #[test]
    fn test_inference_error_names_model() {
        let err = RobinError::inference(
            "vit_base_patch16_224",
            "load safetensors",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert!(err.to_string().contains("vit_base_patch16_224"));
    }
}
