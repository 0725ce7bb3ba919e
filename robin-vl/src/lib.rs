//! # Robin VL
//!
//! Glue between images, prompts and a language model for LLaVA-style
//! multimodal inference, built on Candle.
//!
//! ## Module Structure
//!
//! - `processing` - Square padding and batched image preprocessing
//! - `processors` - CLIP and timm image processors
//! - `tokenization` - Prompt tokenization with `<image>` placeholders
//! - `stopping` - Keyword stopping criteria for generation
//! - `model_name` - Model name derivation from checkpoint paths
//! - `vision` - timm ViT vision tower
//! - `utils` - Device parsing and candle error helpers
//!
//! ## Features
//!
//! - `cuda` - Enable CUDA support for GPU acceleration
//!
//! ## Example
//!
//! ```no_run
//! use robin_vl::processing::{ImageAspectRatio, process_images};
//! use robin_vl::utils::parse_device;
//! use robin_vl::vision::{TimmVisionTower, VisionTowerArgs};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let device = parse_device("cpu")?;
//! let tower = TimmVisionTower::new(
//!     "vit_large_patch14_dinov2.lvd142m",
//!     &VisionTowerArgs::default(),
//!     device.clone(),
//!     false,
//! )?;
//! let image = robin_core::utils::image::load_image("photo.jpg")?;
//! let pixels = process_images(&[image], tower.image_processor()?, ImageAspectRatio::Pad, &device)?
//!     .into_batch()?;
//! let features = tower.forward(&pixels)?;
//! # let _ = features;
//! # Ok(())
//! # }
//! ```

pub mod model_name;
pub mod processing;
pub mod processors;
pub mod stopping;
pub mod tokenization;
pub mod utils;
pub mod vision;

// Re-exports for convenience
pub use model_name::get_model_name_from_path;
pub use processing::{ImageAspectRatio, ImageProcessor, ProcessedImages, process_images};
pub use processors::{ClipImageProcessor, TimmImageTransform};
pub use stopping::{KeywordsStoppingCriteria, StoppingCriteria, StoppingCriteriaList};
pub use tokenization::{
    HfTokenizer, ReturnTensors, TextTokenizer, tokenizer_image_token, tokenizer_image_token_tensor,
};
pub use vision::{SelectFeature, TimmVisionTower, VisionTowerArgs};
