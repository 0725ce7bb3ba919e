//! timm vision tower.
//!
//! [`TimmVisionTower`] resolves a timm checkpoint (hub name or local
//! directory), builds the matching [`VisionTransformer`] and exposes the
//! eval-time [`TimmImageTransform`](crate::processors::TimmImageTransform)
//! the checkpoint was trained with.

mod config;
mod tower;
mod vit;

pub use config::{
    SelectFeature, TimmModelArgs, TimmPretrainedConfig, TimmVitConfig, VisionTowerArgs,
    VitActivation,
};
pub use tower::TimmVisionTower;
pub use vit::VisionTransformer;
