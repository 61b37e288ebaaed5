//! Image loading and conversion helpers.
//!
//! Page images reach the pipeline as `RgbImage`s; these helpers cover the
//! common ways of getting there from files or raw buffers.

use crate::core::errors::{LayoutError, LayoutResult};
use image::{DynamicImage, ImageBuffer, RgbImage};

/// Batches larger than this load in parallel.
const PARALLEL_LOAD_THRESHOLD: usize = 8;

/// Converts a `DynamicImage` of any format to 8-bit RGB.
pub fn dynamic_to_rgb(img: DynamicImage) -> RgbImage {
    img.to_rgb8()
}

/// Loads an image from a file path and converts it to RGB.
///
/// # Errors
///
/// Returns [`LayoutError::ImageLoad`] when the file cannot be opened or
/// decoded.
pub fn load_image(path: &std::path::Path) -> LayoutResult<RgbImage> {
    let img = image::open(path).map_err(LayoutError::ImageLoad)?;
    Ok(dynamic_to_rgb(img))
}

/// Creates an `RgbImage` from raw RGB pixel data, or `None` when the data
/// length does not match the dimensions.
pub fn create_rgb_image(width: u32, height: u32, data: Vec<u8>) -> Option<RgbImage> {
    if data.len() != (width * height * 3) as usize {
        return None;
    }
    ImageBuffer::from_raw(width, height, data)
}

/// Loads a batch of images, in parallel for larger batches.
///
/// # Errors
///
/// Returns the first [`LayoutError::ImageLoad`] encountered.
pub fn load_images_batch<P: AsRef<std::path::Path> + Send + Sync>(
    paths: &[P],
) -> LayoutResult<Vec<RgbImage>> {
    if paths.len() > PARALLEL_LOAD_THRESHOLD {
        use rayon::prelude::*;
        paths.par_iter().map(|p| load_image(p.as_ref())).collect()
    } else {
        paths.iter().map(|p| load_image(p.as_ref())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_rgb_image_rejects_mismatched_length() {
        assert!(create_rgb_image(2, 2, vec![0u8; 11]).is_none());
        assert!(create_rgb_image(2, 2, vec![0u8; 12]).is_some());
    }

    #[test]
    fn load_image_reports_missing_files() {
        let result = load_image(std::path::Path::new("/no/such/image.png"));
        assert!(matches!(result, Err(LayoutError::ImageLoad(_))));
    }
}
