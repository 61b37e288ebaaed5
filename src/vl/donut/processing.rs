//! Image preprocessing for the Donut encoder.

use candle_core::{DType, Device, Tensor};
use image::RgbImage;
use serde::Deserialize;
use std::path::Path;

use crate::core::errors::{LayoutError, LayoutResult};
use crate::vl::candle_err;

fn default_height() -> usize {
    1280
}

fn default_width() -> usize {
    960
}

fn default_mean() -> [f32; 3] {
    [0.5, 0.5, 0.5]
}

fn default_std() -> [f32; 3] {
    [0.5, 0.5, 0.5]
}

/// Image processor settings, read from a model directory's
/// `preprocessor_config.json` or defaulted.
#[derive(Debug, Clone, Deserialize)]
pub struct DonutImageProcessorConfig {
    /// Target height fed to the encoder.
    #[serde(default = "default_height")]
    pub height: usize,
    /// Target width fed to the encoder.
    #[serde(default = "default_width")]
    pub width: usize,
    /// Per-channel normalization mean.
    #[serde(default = "default_mean")]
    pub image_mean: [f32; 3],
    /// Per-channel normalization standard deviation.
    #[serde(default = "default_std")]
    pub image_std: [f32; 3],
}

impl Default for DonutImageProcessorConfig {
    fn default() -> Self {
        Self {
            height: default_height(),
            width: default_width(),
            image_mean: default_mean(),
            image_std: default_std(),
        }
    }
}

/// Resizes and normalizes page images into encoder input tensors.
#[derive(Debug, Clone, Default)]
pub struct DonutImageProcessor {
    config: DonutImageProcessorConfig,
}

impl DonutImageProcessor {
    /// Creates a processor with the given settings.
    pub fn new(config: DonutImageProcessorConfig) -> Self {
        Self { config }
    }

    /// Reads the processor settings from a JSON file.
    pub fn from_path(path: &Path) -> LayoutResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            LayoutError::model_load(format!("reading '{}'", path.display()), e)
        })?;
        let config = serde_json::from_str(&contents).map_err(|e| {
            LayoutError::model_load(format!("parsing '{}'", path.display()), e)
        })?;
        Ok(Self { config })
    }

    /// Processor settings.
    pub fn config(&self) -> &DonutImageProcessorConfig {
        &self.config
    }

    /// Converts a page image into a `[1, 3, H, W]` tensor: resize to the
    /// fixed input size, then `(pixel / 255 - mean) / std` per channel,
    /// channel-first.
    pub fn preprocess(
        &self,
        image: &RgbImage,
        device: &Device,
        dtype: DType,
    ) -> LayoutResult<Tensor> {
        let (height, width) = (self.config.height, self.config.width);
        let resized = image::imageops::resize(
            image,
            width as u32,
            height as u32,
            image::imageops::FilterType::CatmullRom,
        );

        let mut data = Vec::with_capacity(3 * height * width);
        for channel in 0..3 {
            let mean = self.config.image_mean[channel];
            let std = self.config.image_std[channel];
            for y in 0..height {
                for x in 0..width {
                    let value = resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0;
                    data.push((value - mean) / std);
                }
            }
        }

        Tensor::from_vec(data, (1, 3, height, width), device)
            .map_err(|e| candle_err("DonutImageProcessor", "create pixel tensor", e))?
            .to_dtype(dtype)
            .map_err(|e| candle_err("DonutImageProcessor", "cast pixel tensor", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preprocess_produces_batched_chw_tensor() {
        let processor = DonutImageProcessor::new(DonutImageProcessorConfig {
            height: 64,
            width: 32,
            ..Default::default()
        });
        let image = RgbImage::new(100, 200);
        let tensor = processor
            .preprocess(&image, &Device::Cpu, DType::F32)
            .unwrap();
        assert_eq!(tensor.dims(), &[1, 3, 64, 32]);
    }

    #[test]
    fn black_pixels_normalize_to_minus_one_with_default_stats() {
        let processor = DonutImageProcessor::new(DonutImageProcessorConfig {
            height: 8,
            width: 8,
            ..Default::default()
        });
        let image = RgbImage::new(8, 8);
        let tensor = processor
            .preprocess(&image, &Device::Cpu, DType::F32)
            .unwrap();
        let value = tensor
            .flatten_all()
            .unwrap()
            .get(0)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!((value + 1.0).abs() < 1e-6);
    }
}
