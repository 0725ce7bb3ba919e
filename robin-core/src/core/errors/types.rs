use thiserror::Error;

/// The stage of the multimodal pipeline an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Tensor creation, reshaping, casting or stacking.
    TensorOperation,
    /// Decoding, padding, resizing or normalizing images.
    ImageProcessing,
    /// Text to token-id conversion.
    Tokenization,
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProcessingStage::TensorOperation => "tensor operation",
            ProcessingStage::ImageProcessing => "image processing",
            ProcessingStage::Tokenization => "tokenization",
        };
        f.write_str(name)
    }
}

/// Error type shared by all robin crates.
#[derive(Error, Debug)]
pub enum RobinError {
    /// Invalid or unsupported configuration, including unsupported option strings.
    #[error("configuration error: {message}")]
    ConfigError { message: String },

    /// Invalid arguments passed to an operation.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// A lower-level failure while transforming data.
    #[error("{kind} failed: {context}")]
    Processing {
        kind: ProcessingStage,
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// Model loading or forward pass failure.
    #[error("inference failed for model '{model_name}': {context}")]
    Inference {
        model_name: String,
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// A model-backed property was requested before the model was loaded.
    #[error("model '{model_name}' is not loaded")]
    ModelNotLoaded { model_name: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}
