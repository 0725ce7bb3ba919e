use crate::processors::TimmDataConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use robin_core::core::RobinError;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

/// Which tokens of the last layer are handed to the projector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectFeature {
    /// Patch tokens only; the class token is dropped.
    #[default]
    Patch,
    /// Class token followed by the patch tokens.
    ClsPatch,
}

impl FromStr for SelectFeature {
    type Err = RobinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "patch" => Ok(Self::Patch),
            "cls_patch" => Ok(Self::ClsPatch),
            other => Err(RobinError::config_error(format!(
                "Unexpected select feature: {other}"
            ))),
        }
    }
}

fn default_select_layer() -> i64 {
    -1
}

/// Vision settings read from the multimodal model's `config.json`.
///
/// Unrelated keys in the file are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct VisionTowerArgs {
    #[serde(default = "default_select_layer")]
    pub mm_vision_select_layer: i64,
    #[serde(default)]
    pub mm_vision_select_feature: Option<String>,
}

impl Default for VisionTowerArgs {
    fn default() -> Self {
        Self {
            mm_vision_select_layer: default_select_layer(),
            mm_vision_select_feature: None,
        }
    }
}

impl VisionTowerArgs {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RobinError> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| {
            RobinError::config_error(format!("failed to parse model config.json: {e}"))
        })
    }

    /// Parsed select feature, defaulting to [`SelectFeature::Patch`].
    pub fn select_feature(&self) -> Result<SelectFeature, RobinError> {
        self.mm_vision_select_feature
            .as_deref()
            .map_or(Ok(SelectFeature::default()), str::parse)
    }
}

/// Optional overrides stored under `model_args` in a timm hub `config.json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimmModelArgs {
    pub img_size: Option<usize>,
    pub patch_size: Option<usize>,
    pub embed_dim: Option<usize>,
    pub depth: Option<usize>,
    pub num_heads: Option<usize>,
    pub mlp_ratio: Option<f64>,
    pub init_values: Option<f64>,
    pub reg_tokens: Option<usize>,
    pub no_embed_class: Option<bool>,
    pub pre_norm: Option<bool>,
    pub qkv_bias: Option<bool>,
}

/// A timm hub `config.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct TimmPretrainedConfig {
    pub architecture: String,
    pub num_features: usize,
    #[serde(default)]
    pub pretrained_cfg: TimmDataConfig,
    #[serde(default)]
    pub model_args: Option<TimmModelArgs>,
}

impl TimmPretrainedConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RobinError> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| {
            RobinError::config_error(format!("failed to parse timm config.json: {e}"))
        })
    }

    /// Resolves the full ViT hyperparameters for this checkpoint.
    pub fn vit_config(&self) -> Result<TimmVitConfig, RobinError> {
        let [_, height, width] = self.pretrained_cfg.input_size;
        if height != width {
            return Err(RobinError::config_error(format!(
                "{}: the vision tower needs a square input_size, got {height}x{width}",
                self.architecture
            )));
        }
        let mut cfg = TimmVitConfig::from_architecture(&self.architecture)?;
        cfg.image_size = height;
        if let Some(args) = &self.model_args {
            cfg.apply_model_args(args);
        }
        cfg.validate()?;
        if cfg.embed_dim != self.num_features {
            return Err(RobinError::config_error(format!(
                "{}: num_features {} does not match embed_dim {}",
                self.architecture, self.num_features, cfg.embed_dim
            )));
        }
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VitActivation {
    Gelu,
    QuickGelu,
}

impl VitActivation {
    pub(crate) fn to_candle(self) -> candle_nn::Activation {
        match self {
            Self::Gelu => candle_nn::Activation::Gelu,
            Self::QuickGelu => candle_nn::Activation::QuickGelu,
        }
    }
}

/// Hyperparameters of a timm `VisionTransformer`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimmVitConfig {
    pub image_size: usize,
    pub patch_size: usize,
    pub num_channels: usize,
    pub embed_dim: usize,
    pub depth: usize,
    pub num_heads: usize,
    pub mlp_ratio: f64,
    pub qkv_bias: bool,
    pub layer_norm_eps: f64,
    pub act: VitActivation,
    /// Layer-scale init value; `Some` means blocks carry `ls1`/`ls2` weights.
    pub init_values: Option<f64>,
    pub pre_norm: bool,
    pub num_reg_tokens: usize,
    /// Position embedding covers patches only; prefix tokens are added after it.
    pub no_embed_class: bool,
}

// vit_<size>_patch<N>[_<variant>...][_<img>][.tag]
static ARCH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^vit_(small|base|large|huge)_patch(\d+)((?:_[a-z0-9]+)*)$")
        .expect("ARCH_RE must compile")
});

impl TimmVitConfig {
    /// Derives the config from a timm architecture name such as
    /// `vit_large_patch14_dinov2.lvd142m` or `timm/vit_base_patch16_clip_224.openai`.
    pub fn from_architecture(name: &str) -> Result<Self, RobinError> {
        let base = name.rsplit('/').next().unwrap_or(name);
        let base = base.split('.').next().unwrap_or(base);

        let caps = ARCH_RE.captures(base).ok_or_else(|| {
            RobinError::config_error(format!("Unsupported timm architecture: {name}"))
        })?;
        let (embed_dim, depth, num_heads) = match &caps[1] {
            "small" => (384, 12, 6),
            "base" => (768, 12, 12),
            "large" => (1024, 24, 16),
            _ => (1280, 32, 16),
        };
        let patch_size: usize = caps[2].parse().map_err(|_| {
            RobinError::config_error(format!("invalid patch size in architecture {name}"))
        })?;

        let variants: Vec<&str> = caps[3].split('_').filter(|s| !s.is_empty()).collect();
        let has = |v: &str| variants.contains(&v);
        let num_reg_tokens = variants
            .iter()
            .find_map(|v| v.strip_prefix("reg").and_then(|n| n.parse().ok()))
            .unwrap_or(0);
        let trailing_size = variants.last().and_then(|v| v.parse::<usize>().ok());

        let dinov2 = has("dinov2");
        let clip = has("clip");
        let image_size = match trailing_size {
            Some(size) => size,
            None if dinov2 => 518,
            None => 224,
        };

        Ok(Self {
            image_size,
            patch_size,
            num_channels: 3,
            embed_dim,
            depth,
            num_heads,
            mlp_ratio: 4.0,
            qkv_bias: true,
            layer_norm_eps: if clip { 1e-5 } else { 1e-6 },
            act: if has("quickgelu") {
                VitActivation::QuickGelu
            } else {
                VitActivation::Gelu
            },
            init_values: dinov2.then_some(1e-5),
            pre_norm: clip,
            num_reg_tokens,
            no_embed_class: num_reg_tokens > 0,
        })
    }

    fn apply_model_args(&mut self, args: &TimmModelArgs) {
        if let Some(v) = args.img_size {
            self.image_size = v;
        }
        if let Some(v) = args.patch_size {
            self.patch_size = v;
        }
        if let Some(v) = args.embed_dim {
            self.embed_dim = v;
        }
        if let Some(v) = args.depth {
            self.depth = v;
        }
        if let Some(v) = args.num_heads {
            self.num_heads = v;
        }
        if let Some(v) = args.mlp_ratio {
            self.mlp_ratio = v;
        }
        if args.init_values.is_some() {
            self.init_values = args.init_values;
        }
        if let Some(v) = args.reg_tokens {
            self.num_reg_tokens = v;
        }
        if let Some(v) = args.no_embed_class {
            self.no_embed_class = v;
        }
        if let Some(v) = args.pre_norm {
            self.pre_norm = v;
        }
        if let Some(v) = args.qkv_bias {
            self.qkv_bias = v;
        }
    }

    pub fn validate(&self) -> Result<(), RobinError> {
        if self.patch_size == 0 || self.image_size % self.patch_size != 0 {
            return Err(RobinError::config_error(format!(
                "image_size {} must be a positive multiple of patch_size {}",
                self.image_size, self.patch_size
            )));
        }
        if self.num_heads == 0 || self.embed_dim % self.num_heads != 0 {
            return Err(RobinError::config_error(format!(
                "embed_dim {} must be divisible by num_heads {}",
                self.embed_dim, self.num_heads
            )));
        }
        Ok(())
    }

    pub fn grid_size(&self) -> usize {
        self.image_size / self.patch_size
    }

    pub fn num_patches(&self) -> usize {
        self.grid_size() * self.grid_size()
    }

    /// Class token plus register tokens.
    pub fn num_prefix_tokens(&self) -> usize {
        1 + self.num_reg_tokens
    }

    pub fn head_dim(&self) -> usize {
        self.embed_dim / self.num_heads
    }

    pub fn mlp_hidden_dim(&self) -> usize {
        (self.embed_dim as f64 * self.mlp_ratio) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_feature_parsing() {
        assert_eq!("patch".parse::<SelectFeature>().ok(), Some(SelectFeature::Patch));
        assert_eq!(
            "cls_patch".parse::<SelectFeature>().ok(),
            Some(SelectFeature::ClsPatch)
        );
        let err = "cls".parse::<SelectFeature>().unwrap_err();
        assert!(err.to_string().contains("Unexpected select feature: cls"));
    }

    #[test]
    fn test_vision_tower_args_defaults_and_unknown_keys() -> Result<(), Box<dyn std::error::Error>> {
        let args: VisionTowerArgs = serde_json::from_str(
            r#"{"mm_vision_tower": "timm/vit_large_patch14_dinov2.lvd142m", "hidden_size": 4096}"#,
        )?;
        assert_eq!(args.mm_vision_select_layer, -1);
        assert_eq!(args.select_feature()?, SelectFeature::Patch);

        let args: VisionTowerArgs = serde_json::from_str(
            r#"{"mm_vision_select_layer": -2, "mm_vision_select_feature": "cls_patch"}"#,
        )?;
        assert_eq!(args.mm_vision_select_layer, -2);
        assert_eq!(args.select_feature()?, SelectFeature::ClsPatch);
        Ok(())
    }

    #[test]
    fn test_dinov2_architecture() -> Result<(), RobinError> {
        let cfg = TimmVitConfig::from_architecture("timm/vit_large_patch14_dinov2.lvd142m")?;
        assert_eq!(cfg.embed_dim, 1024);
        assert_eq!(cfg.depth, 24);
        assert_eq!(cfg.patch_size, 14);
        assert_eq!(cfg.image_size, 518);
        assert_eq!(cfg.num_patches(), 37 * 37);
        assert_eq!(cfg.init_values, Some(1e-5));
        assert_eq!(cfg.num_prefix_tokens(), 1);
        assert!(!cfg.pre_norm);
        Ok(())
    }

    #[test]
    fn test_register_and_clip_variants() -> Result<(), RobinError> {
        let reg = TimmVitConfig::from_architecture("vit_base_patch14_reg4_dinov2")?;
        assert_eq!(reg.num_reg_tokens, 4);
        assert!(reg.no_embed_class);
        assert_eq!(reg.num_prefix_tokens(), 5);

        let clip = TimmVitConfig::from_architecture("vit_large_patch14_clip_quickgelu_336.openai")?;
        assert_eq!(clip.image_size, 336);
        assert!(clip.pre_norm);
        assert_eq!(clip.act, VitActivation::QuickGelu);
        assert_eq!(clip.num_patches(), 576);

        let plain = TimmVitConfig::from_architecture("vit_base_patch16_224.augreg_in21k")?;
        assert_eq!((plain.embed_dim, plain.image_size), (768, 224));
        assert_eq!(plain.act, VitActivation::Gelu);
        Ok(())
    }

    #[test]
    fn test_unknown_architecture_is_rejected() {
        assert!(TimmVitConfig::from_architecture("convnext_base").is_err());
        assert!(TimmVitConfig::from_architecture("vit_giant_patch14_dinov2").is_err());
    }

    #[test]
    fn test_pretrained_config_overrides() -> Result<(), Box<dyn std::error::Error>> {
        let cfg: TimmPretrainedConfig = serde_json::from_str(
            r#"{
                "architecture": "vit_small_patch14_dinov2",
                "num_features": 64,
                "pretrained_cfg": {"input_size": [3, 28, 28], "crop_pct": 1.0},
                "model_args": {"embed_dim": 64, "depth": 2, "num_heads": 4}
            }"#,
        )?;
        let vit = cfg.vit_config()?;
        assert_eq!(vit.image_size, 28);
        assert_eq!(vit.num_patches(), 4);
        assert_eq!(vit.head_dim(), 16);
        assert_eq!(vit.mlp_hidden_dim(), 256);

        let mismatched = TimmPretrainedConfig {
            num_features: 65,
            ..cfg.clone()
        };
        assert!(mismatched.vit_config().is_err());

        let mut non_square = cfg;
        non_square.pretrained_cfg.input_size = [3, 28, 56];
        let err = non_square.vit_config().unwrap_err();
        assert!(err.to_string().contains("square input_size"));
        Ok(())
    }
}
