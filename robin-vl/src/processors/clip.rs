use crate::processing::ImageProcessor;
use crate::utils::candle_to_processing;
use candle_core::{Device, Tensor};
use image::RgbImage;
use image::imageops::FilterType;
use robin_core::core::constants::{OPENAI_CLIP_MEAN, OPENAI_CLIP_STD};
use robin_core::core::{RobinError, RobinResult};
use robin_core::utils::image::{
    center_crop, image_to_chw, pil_resample_to_filter_type, resize_shortest_edge,
};
use serde::Deserialize;
use std::path::Path;

/// `size` entry of a preprocessor config: either a bare int or `{"shortest_edge": N}`.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum ResizeSize {
    ShortestEdge { shortest_edge: u32 },
    Square(u32),
}

impl ResizeSize {
    pub fn shortest_edge(&self) -> u32 {
        match *self {
            Self::ShortestEdge { shortest_edge } => shortest_edge,
            Self::Square(n) => n,
        }
    }
}

/// `crop_size` entry: either a bare int or `{"height": H, "width": W}`.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum CropSize {
    HeightWidth { height: u32, width: u32 },
    Square(u32),
}

impl CropSize {
    pub fn height_width(&self) -> (u32, u32) {
        match *self {
            Self::HeightWidth { height, width } => (height, width),
            Self::Square(n) => (n, n),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_rescale_factor() -> f32 {
    1.0 / 255.0
}

fn default_mean() -> Vec<f32> {
    OPENAI_CLIP_MEAN.to_vec()
}

fn default_std() -> Vec<f32> {
    OPENAI_CLIP_STD.to_vec()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClipImageProcessorConfig {
    #[serde(default = "default_true")]
    pub do_resize: bool,
    pub size: ResizeSize,
    #[serde(default = "default_true")]
    pub do_center_crop: bool,
    pub crop_size: Option<CropSize>,
    #[serde(default = "default_true")]
    pub do_rescale: bool,
    #[serde(default = "default_rescale_factor")]
    pub rescale_factor: f32,
    #[serde(default = "default_true")]
    pub do_normalize: bool,
    #[serde(default = "default_mean")]
    pub image_mean: Vec<f32>,
    #[serde(default = "default_std")]
    pub image_std: Vec<f32>,
    #[serde(default)]
    pub resample: Option<u32>,
}

impl ClipImageProcessorConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RobinError> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| {
            RobinError::config_error(format!("failed to parse preprocessor_config.json: {e}"))
        })
    }

    pub fn validate(&self) -> Result<(), RobinError> {
        if self.image_mean.len() != 3 || self.image_std.len() != 3 {
            return Err(RobinError::config_error(format!(
                "image_mean/std must have length 3, got mean={} std={}",
                self.image_mean.len(),
                self.image_std.len()
            )));
        }
        if self.image_std.iter().any(|s| *s == 0.0) {
            return Err(RobinError::config_error("image_std must be non-zero"));
        }
        if self.size.shortest_edge() == 0 {
            return Err(RobinError::config_error("size must be > 0"));
        }
        if let Some(crop) = self.crop_size {
            let (h, w) = crop.height_width();
            if h == 0 || w == 0 {
                return Err(RobinError::config_error("crop_size must be > 0"));
            }
        }
        Ok(())
    }
}

/// CLIP-style processor: shortest-edge resize, center crop, rescale, normalize.
#[derive(Debug, Clone)]
pub struct ClipImageProcessor {
    cfg: ClipImageProcessorConfig,
    mean: [f32; 3],
    std: [f32; 3],
    filter: FilterType,
}

impl ClipImageProcessor {
    pub fn new(cfg: ClipImageProcessorConfig) -> Result<Self, RobinError> {
        cfg.validate()?;
        let mean = [cfg.image_mean[0], cfg.image_mean[1], cfg.image_mean[2]];
        let std = [cfg.image_std[0], cfg.image_std[1], cfg.image_std[2]];
        let filter = cfg
            .resample
            .and_then(pil_resample_to_filter_type)
            .unwrap_or(FilterType::CatmullRom);
        Ok(Self {
            cfg,
            mean,
            std,
            filter,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RobinError> {
        Self::new(ClipImageProcessorConfig::from_path(path)?)
    }

    pub fn config(&self) -> &ClipImageProcessorConfig {
        &self.cfg
    }
}

impl ImageProcessor for ClipImageProcessor {
    fn image_mean(&self) -> Option<[f32; 3]> {
        Some(self.mean)
    }

    fn preprocess(&self, image: &RgbImage, device: &Device) -> RobinResult<Tensor> {
        let mut image = if self.cfg.do_resize {
            resize_shortest_edge(image, self.cfg.size.shortest_edge(), self.filter)
        } else {
            image.clone()
        };
        if self.cfg.do_center_crop
            && let Some(crop) = self.cfg.crop_size
        {
            let (h, w) = crop.height_width();
            image = center_crop(&image, h, w);
        }

        let rescale = if self.cfg.do_rescale {
            self.cfg.rescale_factor
        } else {
            1.0
        };
        let (mean, std) = if self.cfg.do_normalize {
            (self.mean, self.std)
        } else {
            ([0.0; 3], [1.0; 3])
        };

        let (w, h) = image.dimensions();
        let data = image_to_chw(&image, &mean, &std, rescale);
        Tensor::from_vec(data, (3usize, h as usize, w as usize), device)
            .map_err(|e| candle_to_processing("CLIP: failed to create pixel_values tensor", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::io::Write;

    const LLAVA_CLIP_336: &str = r#"{
        "crop_size": {"height": 336, "width": 336},
        "do_center_crop": true,
        "do_convert_rgb": true,
        "do_normalize": true,
        "do_rescale": true,
        "do_resize": true,
        "image_mean": [0.48145466, 0.4578275, 0.40821073],
        "image_processor_type": "CLIPImageProcessor",
        "image_std": [0.26862954, 0.26130258, 0.27577711],
        "resample": 3,
        "rescale_factor": 0.00392156862745098,
        "size": {"shortest_edge": 336}
    }"#;

    #[test]
    fn test_config_from_path() -> Result<(), Box<dyn std::error::Error>> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(LLAVA_CLIP_336.as_bytes())?;
        let processor = ClipImageProcessor::from_path(file.path())?;
        assert_eq!(processor.config().size.shortest_edge(), 336);
        assert_eq!(processor.image_mean(), Some(OPENAI_CLIP_MEAN));
        Ok(())
    }

    #[test]
    fn test_legacy_int_sizes() -> Result<(), Box<dyn std::error::Error>> {
        let cfg: ClipImageProcessorConfig =
            serde_json::from_str(r#"{"size": 224, "crop_size": 224}"#)?;
        assert_eq!(cfg.size.shortest_edge(), 224);
        assert_eq!(cfg.crop_size.map(|c| c.height_width()), Some((224, 224)));
        Ok(())
    }

    #[test]
    fn test_preprocess_output_shape_and_values() -> Result<(), Box<dyn std::error::Error>> {
        let cfg: ClipImageProcessorConfig = serde_json::from_str(
            r#"{"size": {"shortest_edge": 8}, "crop_size": {"height": 8, "width": 8},
                "image_mean": [0.5, 0.5, 0.5], "image_std": [0.5, 0.5, 0.5]}"#,
        )?;
        let processor = ClipImageProcessor::new(cfg)?;
        let img = RgbImage::from_pixel(16, 12, Rgb([255, 255, 255]));
        let t = processor.preprocess(&img, &Device::Cpu)?;
        assert_eq!(t.dims(), &[3, 8, 8]);
        let values = t.flatten_all()?.to_vec1::<f32>()?;
        assert!(values.iter().all(|v| (v - 1.0).abs() < 1e-4));
        Ok(())
    }

    #[test]
    fn test_validate_rejects_bad_mean() {
        let cfg: ClipImageProcessorConfig =
            serde_json::from_str(r#"{"size": 224, "image_mean": [0.5, 0.5]}"#)
                .expect("valid json");
        assert!(ClipImageProcessor::new(cfg).is_err());
    }
}
