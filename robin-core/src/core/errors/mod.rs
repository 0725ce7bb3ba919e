//! Error types for the multimodal utilities.
//!
//! Every fallible operation in the workspace returns [`RobinError`]. Failures
//! coming from candle, `image` or `tokenizers` are wrapped with the
//! [`ProcessingStage`] they happened in, so a caller can tell a tensor reshape
//! problem apart from a tokenizer problem without string matching.
//!
//! # Usage
//!
//! ```rust
//! use robin_core::core::errors::{RobinError, ProcessingStage};
//!
//! // Unsupported string option
//! let error = RobinError::config_error("Unexpected select feature: foo");
//!
//! // Wrap a lower-level failure with context
//! let error = RobinError::tensor_operation(
//!     "stack pixel values",
//!     std::io::Error::new(std::io::ErrorKind::InvalidData, "shape mismatch"),
//! );
//! assert!(matches!(
//!     error,
//!     RobinError::Processing { kind: ProcessingStage::TensorOperation, .. }
//! ));
//! ```

pub mod constructors;
pub mod types;

pub use types::{ProcessingStage, RobinError};

/// Convenient result alias for robin operations.
pub type RobinResult<T> = Result<T, RobinError>;
