//! # Robin Core
//!
//! Shared building blocks for the robin multimodal utilities.
//!
//! This crate provides:
//! - Error handling types
//! - Token and normalization constants shared with the language model
//! - Logging setup
//! - Image helpers (base64 decoding, square padding, CHW conversion)
//!
//! ## Modules
//!
//! * [`core`] - Error handling, constants and tracing setup
//! * [`utils`] - Image loading and pixel-level helpers

pub mod core;
pub mod utils;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::constants::*;
    pub use crate::core::{ProcessingStage, RobinError, RobinResult};
    pub use crate::utils::image::{expand_to_square, load_image, load_image_from_base64};
}
