use crate::processing::ImageProcessor;
use crate::utils::candle_to_processing;
use candle_core::{Device, Tensor};
use image::RgbImage;
use image::imageops::FilterType;
use robin_core::core::constants::{OPENAI_CLIP_MEAN, OPENAI_CLIP_STD};
use robin_core::core::{RobinError, RobinResult};
use robin_core::utils::image::{center_crop_rounded, image_to_chw, resize_shortest_edge};
use serde::Deserialize;
use std::str::FromStr;

/// Resampling filter names used by timm data configs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Nearest,
    Bilinear,
    Bicubic,
    Lanczos,
    Box,
    Hamming,
}

impl Interpolation {
    pub fn filter_type(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Bilinear | Self::Box => FilterType::Triangle,
            Self::Bicubic | Self::Hamming => FilterType::CatmullRom,
            Self::Lanczos => FilterType::Lanczos3,
        }
    }
}

impl FromStr for Interpolation {
    type Err = RobinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nearest" => Ok(Self::Nearest),
            "bilinear" => Ok(Self::Bilinear),
            "bicubic" => Ok(Self::Bicubic),
            "lanczos" => Ok(Self::Lanczos),
            "box" => Ok(Self::Box),
            "hamming" => Ok(Self::Hamming),
            other => Err(RobinError::config_error(format!(
                "Unsupported interpolation: {other}"
            ))),
        }
    }
}

fn default_input_size() -> [usize; 3] {
    [3, 224, 224]
}

fn default_interpolation() -> String {
    "bicubic".to_string()
}

fn default_crop_pct() -> f64 {
    0.875
}

fn default_crop_mode() -> String {
    "center".to_string()
}

fn default_mean() -> [f32; 3] {
    OPENAI_CLIP_MEAN
}

fn default_std() -> [f32; 3] {
    OPENAI_CLIP_STD
}

/// The subset of a timm `pretrained_cfg` that drives eval preprocessing.
#[derive(Debug, Clone, Deserialize)]
pub struct TimmDataConfig {
    #[serde(default = "default_input_size")]
    pub input_size: [usize; 3],
    #[serde(default = "default_interpolation")]
    pub interpolation: String,
    #[serde(default = "default_mean")]
    pub mean: [f32; 3],
    #[serde(default = "default_std")]
    pub std: [f32; 3],
    #[serde(default = "default_crop_pct")]
    pub crop_pct: f64,
    #[serde(default = "default_crop_mode")]
    pub crop_mode: String,
}

impl Default for TimmDataConfig {
    fn default() -> Self {
        Self {
            input_size: default_input_size(),
            interpolation: default_interpolation(),
            mean: default_mean(),
            std: default_std(),
            crop_pct: default_crop_pct(),
            crop_mode: default_crop_mode(),
        }
    }
}

impl TimmDataConfig {
    pub fn validate(&self) -> Result<(), RobinError> {
        let [c, h, w] = self.input_size;
        if c != 3 || h == 0 || w == 0 {
            return Err(RobinError::config_error(format!(
                "input_size must be [3, H, W] with H, W > 0, got {:?}",
                self.input_size
            )));
        }
        if !(self.crop_pct > 0.0 && self.crop_pct <= 1.0) {
            return Err(RobinError::config_error(format!(
                "crop_pct must be in (0, 1], got {}",
                self.crop_pct
            )));
        }
        if self.std.iter().any(|s| *s == 0.0) {
            return Err(RobinError::config_error("std must be non-zero"));
        }
        self.interpolation.parse::<Interpolation>()?;
        self.crop_mode.parse::<CropMode>()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CropMode {
    Center,
    Squash,
}

impl FromStr for CropMode {
    type Err = RobinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "center" => Ok(Self::Center),
            "squash" => Ok(Self::Squash),
            other => Err(RobinError::config_error(format!(
                "Unsupported crop_mode: {other}"
            ))),
        }
    }
}

/// timm's eval transform: scale by `1 / crop_pct`, center crop, to tensor, normalize.
#[derive(Debug, Clone)]
pub struct TimmImageTransform {
    cfg: TimmDataConfig,
    filter: FilterType,
    crop_mode: CropMode,
}

impl TimmImageTransform {
    pub fn new(cfg: TimmDataConfig) -> Result<Self, RobinError> {
        cfg.validate()?;
        let filter = cfg.interpolation.parse::<Interpolation>()?.filter_type();
        let crop_mode = cfg.crop_mode.parse()?;
        Ok(Self {
            cfg,
            filter,
            crop_mode,
        })
    }

    pub fn config(&self) -> &TimmDataConfig {
        &self.cfg
    }

    /// Output `(height, width)`.
    pub fn input_hw(&self) -> (usize, usize) {
        (self.cfg.input_size[1], self.cfg.input_size[2])
    }

    fn scale_size(&self, size: usize) -> u32 {
        (size as f64 / self.cfg.crop_pct).floor() as u32
    }
}

impl ImageProcessor for TimmImageTransform {
    fn image_mean(&self) -> Option<[f32; 3]> {
        Some(self.cfg.mean)
    }

    fn preprocess(&self, image: &RgbImage, device: &Device) -> RobinResult<Tensor> {
        let (h, w) = self.input_hw();
        let (scale_h, scale_w) = (self.scale_size(h), self.scale_size(w));

        let resized = match self.crop_mode {
            CropMode::Center if scale_h == scale_w => {
                resize_shortest_edge(image, scale_h, self.filter)
            }
            _ => image::imageops::resize(image, scale_w, scale_h, self.filter),
        };
        let cropped = center_crop_rounded(&resized, h as u32, w as u32);

        let data = image_to_chw(&cropped, &self.cfg.mean, &self.cfg.std, 1.0 / 255.0);
        Tensor::from_vec(data, (3usize, h, w), device)
            .map_err(|e| candle_to_processing("timm: failed to create pixel_values tensor", e))
    }
}
