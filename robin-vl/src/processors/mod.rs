//! Concrete [`ImageProcessor`](crate::processing::ImageProcessor) implementations.
//!
//! - [`ClipImageProcessor`] follows a Hugging Face `preprocessor_config.json`.
//! - [`TimmImageTransform`] follows the eval transform timm derives from a
//!   model's `pretrained_cfg`.

mod clip;
mod timm;

pub use clip::{ClipImageProcessor, ClipImageProcessorConfig, CropSize, ResizeSize};
pub use timm::{Interpolation, TimmDataConfig, TimmImageTransform};
