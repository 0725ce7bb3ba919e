//! Batch image preprocessing ahead of the vision tower.
//!
//! [`process_images`] optionally pads every image to a square filled with the
//! processor's mean color, runs the processor, and stacks the results into a
//! single `(N, C, H, W)` batch whenever the shapes agree.

use crate::utils::candle_to_processing;
use candle_core::{Device, Tensor};
use image::RgbImage;
use itertools::Itertools;
use robin_core::core::constants::OPENAI_CLIP_MEAN;
use robin_core::core::{RobinError, RobinResult};
use robin_core::utils::image::{background_from_mean, expand_to_square};
use std::str::FromStr;
use tracing::debug;

/// Turns RGB images into normalized pixel tensors.
pub trait ImageProcessor {
    /// Per-channel mean used for normalization, if the processor has one.
    fn image_mean(&self) -> Option<[f32; 3]>;

    /// Preprocesses one image into a `(C, H, W)` `f32` tensor.
    fn preprocess(&self, image: &RgbImage, device: &Device) -> RobinResult<Tensor>;

    /// Preprocesses a batch into an `(N, C, H, W)` tensor.
    fn preprocess_batch(&self, images: &[RgbImage], device: &Device) -> RobinResult<Tensor> {
        if images.is_empty() {
            return Err(RobinError::invalid_input("cannot preprocess an empty image batch"));
        }
        let tensors = images
            .iter()
            .map(|img| self.preprocess(img, device))
            .collect::<RobinResult<Vec<_>>>()?;
        Tensor::stack(&tensors, 0).map_err(|e| candle_to_processing("stack pixel values", e))
    }
}

impl<P: ImageProcessor + ?Sized> ImageProcessor for &P {
    fn image_mean(&self) -> Option<[f32; 3]> {
        (**self).image_mean()
    }

    fn preprocess(&self, image: &RgbImage, device: &Device) -> RobinResult<Tensor> {
        (**self).preprocess(image, device)
    }

    fn preprocess_batch(&self, images: &[RgbImage], device: &Device) -> RobinResult<Tensor> {
        (**self).preprocess_batch(images, device)
    }
}

/// How images are fitted to the processor's input size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageAspectRatio {
    /// Pad to a square filled with the mean color first, preserving the aspect ratio.
    Pad,
    /// Hand images to the processor untouched.
    #[default]
    Native,
}

impl FromStr for ImageAspectRatio {
    type Err = RobinError;

    /// `"pad"` selects padding; every other value leaves resizing to the processor.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("pad") {
            Ok(Self::Pad)
        } else {
            Ok(Self::Native)
        }
    }
}

/// Output of [`process_images`].
#[derive(Debug, Clone)]
pub enum ProcessedImages {
    /// All images share a shape and were stacked to `(N, C, H, W)`.
    Batch(Tensor),
    /// Images ended up with different shapes; one `(C, H, W)` tensor each.
    List(Vec<Tensor>),
}

impl ProcessedImages {
    pub fn len(&self) -> usize {
        match self {
            Self::Batch(t) => t.dims().first().copied().unwrap_or(0),
            Self::List(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the stacked batch, failing if the images were ragged.
    pub fn into_batch(self) -> RobinResult<Tensor> {
        match self {
            Self::Batch(t) => Ok(t),
            Self::List(v) => Err(RobinError::invalid_input(format!(
                "processed images have different shapes: {:?}",
                v.iter().map(|t| t.dims().to_vec()).collect::<Vec<_>>()
            ))),
        }
    }

    /// Per-image `(C, H, W)` tensors.
    pub fn tensors(&self) -> RobinResult<Vec<Tensor>> {
        match self {
            Self::Batch(t) => (0..self.len())
                .map(|i| t.get(i).map_err(|e| candle_to_processing("index image batch", e)))
                .collect(),
            Self::List(v) => Ok(v.clone()),
        }
    }
}

/// Preprocesses a set of images for the vision tower.
///
/// With [`ImageAspectRatio::Pad`] each image is padded to a square whose fill
/// color is the processor mean scaled to 0..=255 (falling back to the CLIP
/// mean), preprocessed individually, and stacked if all shapes match. With
/// [`ImageAspectRatio::Native`] the processor handles the whole batch.
pub fn process_images<P: ImageProcessor + ?Sized>(
    images: &[RgbImage],
    processor: &P,
    aspect_ratio: ImageAspectRatio,
    device: &Device,
) -> RobinResult<ProcessedImages> {
    if images.is_empty() {
        return Err(RobinError::invalid_input("process_images called with no images"));
    }

    if aspect_ratio == ImageAspectRatio::Native {
        return Ok(ProcessedImages::Batch(
            processor.preprocess_batch(images, device)?,
        ));
    }

    let mean = processor.image_mean().unwrap_or_else(|| {
        debug!("image processor has no image_mean; padding with the CLIP mean");
        OPENAI_CLIP_MEAN
    });
    let background = background_from_mean(&mean);

    let tensors = images
        .iter()
        .map(|image| processor.preprocess(&expand_to_square(image, background), device))
        .collect::<RobinResult<Vec<_>>>()?;

    if tensors.iter().map(|t| t.dims()).all_equal() {
        let batch =
            Tensor::stack(&tensors, 0).map_err(|e| candle_to_processing("stack pixel values", e))?;
        Ok(ProcessedImages::Batch(batch))
    } else {
        debug!(
            count = tensors.len(),
            "padded images have different shapes; returning them unstacked"
        );
        Ok(ProcessedImages::List(tensors))
    }
}
