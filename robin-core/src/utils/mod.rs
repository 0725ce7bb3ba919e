//! Utility functions for images.

pub mod image;

pub use image::{
    background_from_mean, center_crop, center_crop_rounded, expand_to_square, image_to_chw,
    load_image, load_image_from_base64, pil_resample_to_filter_type, resize_shortest_edge,
};
