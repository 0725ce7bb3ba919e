//! # Robin
//!
//! Multimodal inference utilities for LLaVA-style vision-language models.
//!
//! ## Components
//!
//! - **Image preprocessing**: square padding with the processor mean, CLIP and timm transforms
//! - **Prompt tokenization**: `<image>` markers become a placeholder token id
//! - **Stopping criteria**: stop batched generation on keywords
//! - **Vision tower**: timm ViT encoders loaded from the Hugging Face hub or disk
//!
//! ## Modules
//!
//! * [`core`] - Error handling, constants and tracing setup
//! * [`utils`] - Image helpers
//! * [`vl`] - Processors, tokenization, stopping criteria and the vision tower
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use robin::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let tokenizer = HfTokenizer::from_file("tokenizer.json")?;
//! let input_ids = tokenizer_image_token(
//!     "USER: <image>\nWhat is in this picture? ASSISTANT:",
//!     &tokenizer,
//!     IMAGE_TOKEN_INDEX,
//! )?;
//!
//! let mut stopping = KeywordsStoppingCriteria::new(&["</s>"], &tokenizer, 1)?;
//! let done = stopping.should_stop(&[input_ids])?;
//! # let _ = done;
//! # Ok(())
//! # }
//! ```

pub use robin_core::core;
pub use robin_core::utils;

/// Vision-language components.
pub mod vl {
    pub use robin_vl::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use robin_core::prelude::*;

    pub use robin_vl::{
        ClipImageProcessor, HfTokenizer, ImageAspectRatio, ImageProcessor,
        KeywordsStoppingCriteria, ProcessedImages, SelectFeature, StoppingCriteria,
        StoppingCriteriaList, TextTokenizer, TimmImageTransform, TimmVisionTower,
        VisionTowerArgs, get_model_name_from_path, process_images, tokenizer_image_token,
        tokenizer_image_token_tensor,
    };
    pub use robin_vl::utils::parse_device;
}
