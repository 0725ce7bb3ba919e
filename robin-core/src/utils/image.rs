//! Image helpers used before pixels are handed to a vision encoder.

use crate::core::{RobinError, RobinResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use rayon::prelude::*;
use std::path::Path;

/// Decodes a base64 encoded image (PNG, JPEG, WebP, ...).
///
/// A `data:<mime>;base64,` prefix is accepted and stripped. Surrounding
/// whitespace is ignored.
pub fn load_image_from_base64(data: &str) -> RobinResult<DynamicImage> {
    let data = data.trim();
    let payload = match data.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, payload)| payload)
            .ok_or_else(|| RobinError::invalid_input("data URL is missing the ',' separator"))?,
        None => data,
    };

    let bytes = BASE64_STANDARD
        .decode(payload)
        .map_err(|e| RobinError::image_processing("decode base64 image payload", e))?;
    Ok(image::load_from_memory(&bytes)?)
}

/// Loads an image from disk and converts it to RGB.
pub fn load_image(path: impl AsRef<Path>) -> RobinResult<RgbImage> {
    let path = path.as_ref();
    let image = image::open(path).map_err(|e| {
        RobinError::image_processing(format!("failed to open image {}", path.display()), e)
    })?;
    Ok(image.to_rgb8())
}

/// Converts a normalized per-channel mean into an 8-bit fill color.
///
/// Each channel is `mean * 255` truncated toward zero.
pub fn background_from_mean(mean: &[f32; 3]) -> Rgb<u8> {
    Rgb(mean.map(|m| (m * 255.0).clamp(0.0, 255.0) as u8))
}

/// Pads an image to a square canvas, keeping it centered along the short axis.
///
/// A wide image is pasted at `(0, (w - h) / 2)` on a `w x w` canvas, a tall
/// image at `((h - w) / 2, 0)` on an `h x h` canvas. Square images are returned
/// unchanged.
pub fn expand_to_square(image: &RgbImage, background: Rgb<u8>) -> RgbImage {
    let (width, height) = image.dimensions();
    if width == height {
        return image.clone();
    }

    let side = width.max(height);
    let mut canvas = RgbImage::from_pixel(side, side, background);
    let (x, y) = if width > height {
        (0, (width - height) / 2)
    } else {
        ((height - width) / 2, 0)
    };
    image::imageops::replace(&mut canvas, image, i64::from(x), i64::from(y));
    canvas
}

/// Convert an RGB image to a CHW buffer with rescaling and normalization.
///
/// Output layout: `[R0..Rn, G0..Gn, B0..Bn]`, each value
/// `(pixel * rescale - mean[c]) / std[c]`.
pub fn image_to_chw(image: &RgbImage, mean: &[f32; 3], std: &[f32; 3], rescale: f32) -> Vec<f32> {
    let num_pixels = (image.width() as usize) * (image.height() as usize);
    let mut output = vec![0f32; num_pixels * 3];

    let (red, rest) = output.split_at_mut(num_pixels);
    let (green, blue) = rest.split_at_mut(num_pixels);

    red.par_iter_mut()
        .zip(green.par_iter_mut())
        .zip(blue.par_iter_mut())
        .zip(image.as_raw().par_chunks_exact(3))
        .for_each(|(((r, g), b), px)| {
            *r = (px[0] as f32 * rescale - mean[0]) / std[0];
            *g = (px[1] as f32 * rescale - mean[1]) / std[1];
            *b = (px[2] as f32 * rescale - mean[2]) / std[2];
        });

    output
}

/// Convert PIL/Transformers integer resampling constants to `image::FilterType`.
///
/// 0 => Nearest, 1 => Lanczos3, 2 => Triangle (bilinear), 3 => CatmullRom (bicubic).
/// Box (4) and Hamming (5) have no direct equivalent and map to the closest filter.
pub fn pil_resample_to_filter_type(resample: u32) -> Option<FilterType> {
    match resample {
        0 => Some(FilterType::Nearest),
        1 => Some(FilterType::Lanczos3),
        2 => Some(FilterType::Triangle),
        3 => Some(FilterType::CatmullRom),
        4 => Some(FilterType::Triangle),
        5 => Some(FilterType::CatmullRom),
        _ => None,
    }
}

/// Resizes so the shorter side equals `shortest_edge`, keeping the aspect ratio.
///
/// The longer side is `shortest_edge * long / short`, truncated.
pub fn resize_shortest_edge(image: &RgbImage, shortest_edge: u32, filter: FilterType) -> RgbImage {
    let (width, height) = image.dimensions();
    let (short, long) = if width <= height {
        (width, height)
    } else {
        (height, width)
    };
    if short == shortest_edge || short == 0 {
        return image.clone();
    }

    let new_long = ((u64::from(shortest_edge) * u64::from(long)) / u64::from(short)) as u32;
    let (new_w, new_h) = if width <= height {
        (shortest_edge, new_long)
    } else {
        (new_long, shortest_edge)
    };
    image::imageops::resize(image, new_w, new_h, filter)
}

/// Crops the central `height x width` region, flooring odd offsets.
///
/// When the image is smaller than the crop along an axis it is first padded
/// with black, centered, so the output always has the requested size.
pub fn center_crop(image: &RgbImage, height: u32, width: u32) -> RgbImage {
    crop_centered(image, height, width, |excess| excess / 2)
}

/// [`center_crop`] with torchvision's offset, `round(excess / 2)` with ties to even.
pub fn center_crop_rounded(image: &RgbImage, height: u32, width: u32) -> RgbImage {
    crop_centered(image, height, width, |excess| {
        (f64::from(excess) / 2.0).round_ties_even() as u32
    })
}

fn crop_centered(
    image: &RgbImage,
    height: u32,
    width: u32,
    offset: impl Fn(u32) -> u32,
) -> RgbImage {
    let (img_w, img_h) = image.dimensions();
    if img_w == width && img_h == height {
        return image.clone();
    }

    let padded;
    let source = if img_w < width || img_h < height {
        let pad_w = img_w.max(width);
        let pad_h = img_h.max(height);
        let mut canvas = RgbImage::new(pad_w, pad_h);
        image::imageops::replace(
            &mut canvas,
            image,
            i64::from((pad_w - img_w) / 2),
            i64::from((pad_h - img_h) / 2),
        );
        padded = canvas;
        &padded
    } else {
        image
    };

    let (src_w, src_h) = source.dimensions();
    let left = offset(src_w - width);
    let top = offset(src_h - height);
    image::imageops::crop_imm(source, left, top, width, height).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;
    use std::io::Cursor;

    fn filled(width: u32, height: u32, color: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb(color))
    }

    #[test]
    fn test_expand_to_square_wide_image_is_vertically_centered() {
        let img = filled(6, 2, [255, 255, 255]);
        let out = expand_to_square(&img, Rgb([1, 2, 3]));
        assert_eq!(out.dimensions(), (6, 6));
        // rows 0-1 background, 2-3 image, 4-5 background
        assert_eq!(out.get_pixel(0, 1), &Rgb([1, 2, 3]));
        assert_eq!(out.get_pixel(0, 2), &Rgb([255, 255, 255]));
        assert_eq!(out.get_pixel(5, 3), &Rgb([255, 255, 255]));
        assert_eq!(out.get_pixel(5, 4), &Rgb([1, 2, 3]));
    }

    #[test]
    fn test_expand_to_square_tall_image_odd_padding_floors() {
        let img = filled(2, 5, [9, 9, 9]);
        let out = expand_to_square(&img, Rgb([0, 0, 0]));
        assert_eq!(out.dimensions(), (5, 5));
        // (5 - 2) / 2 == 1
        assert_eq!(out.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(1, 0), &Rgb([9, 9, 9]));
        assert_eq!(out.get_pixel(2, 4), &Rgb([9, 9, 9]));
        assert_eq!(out.get_pixel(3, 4), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_expand_to_square_keeps_square_image() {
        let img = filled(4, 4, [7, 8, 9]);
        assert_eq!(expand_to_square(&img, Rgb([0, 0, 0])), img);
    }

    #[test]
    fn test_background_from_mean_truncates() {
        let bg = background_from_mean(&crate::core::constants::OPENAI_CLIP_MEAN);
        assert_eq!(bg, Rgb([122, 116, 104]));
    }

    #[test]
    fn test_image_to_chw_layout_and_normalization() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 255, 0]));
        let out = image_to_chw(&img, &[0.5, 0.5, 0.5], &[0.5, 0.5, 0.5], 1.0 / 255.0);
        assert_eq!(out.len(), 6);
        let expected = [1.0, -1.0, -1.0, 1.0, -1.0, -1.0];
        for (got, want) in out.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "got {got}, want {want}");
        }
    }

    #[test]
    fn test_resize_shortest_edge_truncates_long_side() {
        let img = filled(300, 200, [0, 0, 0]);
        let out = resize_shortest_edge(&img, 224, FilterType::Triangle);
        // 224 * 300 / 200 = 336
        assert_eq!(out.dimensions(), (336, 224));

        let img = filled(100, 333, [0, 0, 0]);
        let out = resize_shortest_edge(&img, 50, FilterType::Triangle);
        assert_eq!(out.dimensions(), (50, 166));
    }

    #[test]
    fn test_center_crop_and_pad() {
        let img = filled(10, 6, [5, 5, 5]);
        let out = center_crop(&img, 4, 4);
        assert_eq!(out.dimensions(), (4, 4));

        let out = center_crop(&img, 8, 8);
        assert_eq!(out.dimensions(), (8, 8));
        assert_eq!(out.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(4, 4), &Rgb([5, 5, 5]));
    }

    #[test]
    fn test_center_crop_odd_excess_floor_vs_round() {
        // Red channel holds the x coordinate.
        let img = RgbImage::from_fn(11, 8, |x, _| Rgb([x as u8, 0, 0]));
        assert_eq!(center_crop(&img, 8, 8).get_pixel(0, 0)[0], 1);
        assert_eq!(center_crop_rounded(&img, 8, 8).get_pixel(0, 0)[0], 2);

        // 2.5 rounds to even.
        let img = RgbImage::from_fn(13, 8, |x, _| Rgb([x as u8, 0, 0]));
        assert_eq!(center_crop_rounded(&img, 8, 8).get_pixel(0, 0)[0], 2);
    }

    #[test]
    fn test_load_image_from_base64_png_and_data_url() -> Result<(), Box<dyn std::error::Error>> {
        let img = filled(3, 2, [10, 20, 30]);
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img.clone()).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        let encoded = BASE64_STANDARD.encode(&bytes);

        let decoded = load_image_from_base64(&encoded)?.to_rgb8();
        assert_eq!(decoded, img);

        let decoded = load_image_from_base64(&format!("data:image/png;base64,{encoded}"))?.to_rgb8();
        assert_eq!(decoded, img);
        Ok(())
    }

    #[test]
    fn test_load_image_from_base64_rejects_garbage() {
        assert!(load_image_from_base64("not base64 !!!").is_err());
        assert!(load_image_from_base64("data:image/png;base64").is_err());
    }

    #[test]
    fn test_load_image_from_disk() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tiny.png");
        filled(2, 2, [1, 2, 3]).save(&path)?;
        let loaded = load_image(&path)?;
        assert_eq!(loaded.get_pixel(1, 1), &Rgb([1, 2, 3]));
        Ok(())
    }
}
