//! Vision tower wrapping a pretrained timm ViT.

use super::config::{SelectFeature, TimmPretrainedConfig, TimmVitConfig, VisionTowerArgs};
use super::vit::VisionTransformer;
use crate::processors::TimmImageTransform;
use crate::utils::{candle_to_inference, candle_to_processing};
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use robin_core::core::{RobinError, RobinResult};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const CONFIG_FILE: &str = "config.json";
const WEIGHTS_FILE: &str = "model.safetensors";

struct LoadedTower {
    vit: VisionTransformer,
    pretrained: TimmPretrainedConfig,
    image_processor: TimmImageTransform,
}

/// Image encoder producing the token features the language model attends to.
///
/// Only the last layer's tokens are available, so `mm_vision_select_layer`
/// must be `-1`.
pub struct TimmVisionTower {
    vision_tower_name: String,
    select_layer: i64,
    select_feature: SelectFeature,
    device: Device,
    dtype: DType,
    loaded: Option<LoadedTower>,
}

impl TimmVisionTower {
    /// Creates the tower and, unless `delay_load` is set, loads the weights.
    ///
    /// `vision_tower` is a timm hub name (`vit_large_patch14_dinov2.lvd142m`,
    /// optionally prefixed with `timm/`) or a local directory holding
    /// `config.json` and `model.safetensors`.
    pub fn new(
        vision_tower: impl Into<String>,
        args: &VisionTowerArgs,
        device: Device,
        delay_load: bool,
    ) -> RobinResult<Self> {
        if args.mm_vision_select_layer != -1 {
            return Err(RobinError::config_error(format!(
                "timm vision towers only expose last-layer tokens; mm_vision_select_layer must be -1, got {}",
                args.mm_vision_select_layer
            )));
        }

        let dtype = device.bf16_default_to_f32();
        let mut tower = Self {
            vision_tower_name: vision_tower.into(),
            select_layer: args.mm_vision_select_layer,
            select_feature: args.select_feature()?,
            device,
            dtype,
            loaded: None,
        };
        if !delay_load {
            tower.load_model()?;
        }
        Ok(tower)
    }

    /// Overrides the weight dtype. Only valid before the weights are loaded.
    pub fn with_dtype(mut self, dtype: DType) -> RobinResult<Self> {
        if self.loaded.is_some() {
            return Err(RobinError::config_error(format!(
                "{} is already loaded as {:?}; set the dtype before load_model",
                self.vision_tower_name, self.dtype
            )));
        }
        self.dtype = dtype;
        Ok(self)
    }

    /// Resolves and loads the pretrained weights. A second call is a no-op.
    pub fn load_model(&mut self) -> RobinResult<()> {
        if self.loaded.is_some() {
            warn!(
                "{} is already loaded, skipping load_model",
                self.vision_tower_name
            );
            return Ok(());
        }

        let (config_path, weights_path) = self.resolve_files()?;
        let pretrained = TimmPretrainedConfig::from_path(&config_path)?;

        // SAFETY: the safetensors file is memory-mapped; it must not be modified while loaded.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], self.dtype, &self.device)
                .map_err(|e| {
                    candle_to_inference(&self.vision_tower_name, "load model.safetensors", e)
                })?
        };
        self.load_with(pretrained, vb)
    }

    /// Builds the model from an already-parsed config and a weight source.
    pub fn load_with(&mut self, pretrained: TimmPretrainedConfig, vb: VarBuilder) -> RobinResult<()> {
        let vit_cfg = pretrained.vit_config()?;
        let vit = VisionTransformer::new(&vit_cfg, vb)
            .map_err(|e| candle_to_inference(&self.vision_tower_name, "build vision transformer", e))?;
        let image_processor = TimmImageTransform::new(pretrained.pretrained_cfg.clone())?;

        info!(
            tower = %self.vision_tower_name,
            architecture = %pretrained.architecture,
            hidden_size = pretrained.num_features,
            image_size = vit_cfg.image_size,
            num_patches = vit_cfg.num_patches(),
            "vision tower loaded"
        );

        self.loaded = Some(LoadedTower {
            vit,
            pretrained,
            image_processor,
        });
        Ok(())
    }

    fn resolve_files(&self) -> RobinResult<(PathBuf, PathBuf)> {
        let local = Path::new(&self.vision_tower_name);
        if local.is_dir() {
            return Ok((local.join(CONFIG_FILE), local.join(WEIGHTS_FILE)));
        }

        let repo_id = if self.vision_tower_name.contains('/') {
            self.vision_tower_name.clone()
        } else {
            format!("timm/{}", self.vision_tower_name)
        };
        info!("fetching {repo_id} from the Hugging Face hub");

        let name = &self.vision_tower_name;
        let api = hf_hub::api::sync::Api::new()
            .map_err(|e| RobinError::inference(name, "initialize hub client", e))?;
        let repo = api.model(repo_id);
        let config = repo
            .get(CONFIG_FILE)
            .map_err(|e| RobinError::inference(name, "download config.json", e))?;
        let weights = repo
            .get(WEIGHTS_FILE)
            .map_err(|e| RobinError::inference(name, "download model.safetensors", e))?;
        Ok((config, weights))
    }

    fn loaded(&self) -> RobinResult<&LoadedTower> {
        self.loaded
            .as_ref()
            .ok_or_else(|| RobinError::model_not_loaded(&self.vision_tower_name))
    }

    /// Applies the configured [`SelectFeature`] to `(B, T, D)` backbone tokens.
    pub fn feature_select(&self, image_forward_outs: &Tensor) -> RobinResult<Tensor> {
        match self.select_feature {
            SelectFeature::Patch => image_forward_outs
                .i((.., 1..))
                .map_err(|e| candle_to_processing("drop class token", e)),
            SelectFeature::ClsPatch => Ok(image_forward_outs.clone()),
        }
    }

    /// Encodes a `(B, C, H, W)` batch into `(B, T, hidden_size)` features in the input dtype.
    pub fn forward(&self, images: &Tensor) -> RobinResult<Tensor> {
        let loaded = self.loaded()?;
        let input_dtype = images.dtype();
        let pixels = images
            .to_device(&self.device)
            .and_then(|t| t.to_dtype(self.dtype))
            .map_err(|e| candle_to_processing("move images to tower device", e))?;

        let features = loaded
            .vit
            .forward_features(&pixels)
            .map_err(|e| candle_to_inference(&self.vision_tower_name, "forward_features", e))?;
        self.feature_select(&features)?
            .to_dtype(input_dtype)
            .map_err(|e| candle_to_processing("cast image features", e))
    }

    /// Encodes images one by one. Each entry is `(C, H, W)` or `(1, C, H, W)`.
    pub fn forward_list(&self, images: &[Tensor]) -> RobinResult<Vec<Tensor>> {
        images
            .iter()
            .map(|image| {
                let image = match image.rank() {
                    3 => image
                        .unsqueeze(0)
                        .map_err(|e| candle_to_processing("add batch dim", e))?,
                    4 => image.clone(),
                    rank => {
                        return Err(RobinError::invalid_input(format!(
                            "expected a (C, H, W) or (1, C, H, W) image, got rank {rank}"
                        )));
                    }
                };
                self.forward(&image)
            })
            .collect()
    }

    /// A `(1, hidden_size)` zero feature, used where a sample carries no image.
    pub fn dummy_feature(&self) -> RobinResult<Tensor> {
        Tensor::zeros((1, self.hidden_size()?), self.dtype, &self.device)
            .map_err(|e| candle_to_processing("create dummy feature", e))
    }

    pub fn name(&self) -> &str {
        &self.vision_tower_name
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    pub fn select_layer(&self) -> i64 {
        self.select_layer
    }

    pub fn select_feature(&self) -> SelectFeature {
        self.select_feature
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn hidden_size(&self) -> RobinResult<usize> {
        Ok(self.loaded()?.pretrained.num_features)
    }

    pub fn config(&self) -> RobinResult<&TimmVitConfig> {
        Ok(self.loaded()?.vit.config())
    }

    pub fn pretrained_config(&self) -> RobinResult<&TimmPretrainedConfig> {
        Ok(&self.loaded()?.pretrained)
    }

    /// The eval transform matching this checkpoint; pass it to
    /// [`process_images`](crate::processing::process_images).
    pub fn image_processor(&self) -> RobinResult<&TimmImageTransform> {
        Ok(&self.loaded()?.image_processor)
    }

    pub fn num_patches(&self) -> RobinResult<usize> {
        Ok(self.config()?.num_patches())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::{ImageAspectRatio, process_images};
    use candle_nn::VarMap;
    use image::RgbImage;

    const TINY_CONFIG: &str = r#"{
        "architecture": "vit_small_patch14_dinov2",
        "num_features": 16,
        "pretrained_cfg": {
            "input_size": [3, 28, 28],
            "interpolation": "bicubic",
            "mean": [0.485, 0.456, 0.406],
            "std": [0.229, 0.224, 0.225],
            "crop_pct": 1.0
        },
        "model_args": {"embed_dim": 16, "depth": 1, "num_heads": 2}
    }"#;

    fn tiny_pretrained() -> TimmPretrainedConfig {
        serde_json::from_str(TINY_CONFIG).expect("tiny config parses")
    }

    fn tiny_tower(select_feature: Option<&str>) -> RobinResult<TimmVisionTower> {
        let args = VisionTowerArgs {
            mm_vision_select_feature: select_feature.map(str::to_string),
            ..VisionTowerArgs::default()
        };
        let mut tower = TimmVisionTower::new("tiny-vit", &args, Device::Cpu, true)?;
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        tower.load_with(tiny_pretrained(), vb)?;
        Ok(tower)
    }

    #[test]
    fn test_rejects_intermediate_layers() {
        let args = VisionTowerArgs {
            mm_vision_select_layer: -2,
            ..VisionTowerArgs::default()
        };
        let err = TimmVisionTower::new("tiny-vit", &args, Device::Cpu, true)
            .err()
            .map(|e| e.to_string());
        assert!(err.is_some_and(|m| m.contains("mm_vision_select_layer must be -1")));
    }

    #[test]
    fn test_rejects_unknown_select_feature() {
        let args = VisionTowerArgs {
            mm_vision_select_feature: Some("cls".to_string()),
            ..VisionTowerArgs::default()
        };
        assert!(matches!(
            TimmVisionTower::new("tiny-vit", &args, Device::Cpu, true),
            Err(RobinError::ConfigError { .. })
        ));
    }

    #[test]
    fn test_delayed_tower_reports_not_loaded() -> RobinResult<()> {
        let tower = TimmVisionTower::new("tiny-vit", &VisionTowerArgs::default(), Device::Cpu, true)?;
        assert!(!tower.is_loaded());
        assert!(matches!(
            tower.hidden_size(),
            Err(RobinError::ModelNotLoaded { .. })
        ));
        assert!(tower.dummy_feature().is_err());
        assert_eq!(tower.dtype(), DType::F32);
        Ok(())
    }

    #[test]
    fn test_dtype_can_only_change_before_load() -> Result<(), Box<dyn std::error::Error>> {
        let loaded = tiny_tower(None)?;
        assert!(matches!(
            loaded.with_dtype(DType::F16),
            Err(RobinError::ConfigError { .. })
        ));

        let delayed =
            TimmVisionTower::new("tiny-vit", &VisionTowerArgs::default(), Device::Cpu, true)?
                .with_dtype(DType::F16)?;
        assert_eq!(delayed.dtype(), DType::F16);
        Ok(())
    }

    #[test]
    fn test_patch_features_drop_class_token() -> Result<(), Box<dyn std::error::Error>> {
        let tower = tiny_tower(None)?;
        assert_eq!(tower.hidden_size()?, 16);
        assert_eq!(tower.num_patches()?, 4);

        let images = Tensor::zeros((2, 3, 28, 28), DType::F32, &Device::Cpu)?;
        let feats = tower.forward(&images)?;
        assert_eq!(feats.dims(), &[2, 4, 16]);
        assert_eq!(feats.dtype(), DType::F32);
        Ok(())
    }

    #[test]
    fn test_cls_patch_keeps_every_token() -> Result<(), Box<dyn std::error::Error>> {
        let tower = tiny_tower(Some("cls_patch"))?;
        let images = Tensor::zeros((1, 3, 28, 28), DType::F32, &Device::Cpu)?;
        assert_eq!(tower.forward(&images)?.dims(), &[1, 5, 16]);
        Ok(())
    }

    #[test]
    fn test_forward_list_and_output_dtype_follows_input() -> Result<(), Box<dyn std::error::Error>> {
        let tower = tiny_tower(None)?;
        let images = vec![
            Tensor::zeros((3, 28, 28), DType::F16, &Device::Cpu)?,
            Tensor::zeros((1, 3, 28, 28), DType::F16, &Device::Cpu)?,
        ];
        let feats = tower.forward_list(&images)?;
        assert_eq!(feats.len(), 2);
        for f in &feats {
            assert_eq!(f.dims(), &[1, 4, 16]);
            assert_eq!(f.dtype(), DType::F16);
        }

        let bad = vec![Tensor::zeros((28, 28), DType::F32, &Device::Cpu)?];
        assert!(tower.forward_list(&bad).is_err());
        Ok(())
    }

    #[test]
    fn test_dummy_feature_shape() -> Result<(), Box<dyn std::error::Error>> {
        let tower = tiny_tower(None)?;
        let dummy = tower.dummy_feature()?;
        assert_eq!(dummy.dims(), &[1, 16]);
        assert_eq!(dummy.sum_all()?.to_scalar::<f32>()?, 0.0);
        Ok(())
    }

    #[test]
    fn test_process_images_then_encode() -> Result<(), Box<dyn std::error::Error>> {
        let tower = tiny_tower(None)?;
        let images = [RgbImage::new(40, 20), RgbImage::new(13, 31)];
        let pixels = process_images(
            &images,
            tower.image_processor()?,
            ImageAspectRatio::Pad,
            tower.device(),
        )?
        .into_batch()?;
        assert_eq!(pixels.dims(), &[2, 3, 28, 28]);
        assert_eq!(tower.forward(&pixels)?.dims(), &[2, 4, 16]);
        Ok(())
    }

    #[test]
    fn test_load_model_from_local_directory() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join(CONFIG_FILE), TINY_CONFIG)?;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        VisionTransformer::new(&tiny_pretrained().vit_config()?, vb)?;
        varmap.save(dir.path().join(WEIGHTS_FILE))?;

        let name = dir.path().to_string_lossy().to_string();
        let mut tower = TimmVisionTower::new(name, &VisionTowerArgs::default(), Device::Cpu, false)?;
        assert!(tower.is_loaded());
        // Loading twice is harmless.
        tower.load_model()?;

        let images = Tensor::randn(0f32, 1f32, (1, 3, 28, 28), &Device::Cpu)?;
        assert_eq!(tower.forward(&images)?.dims(), &[1, 4, 16]);
        Ok(())
    }
}
