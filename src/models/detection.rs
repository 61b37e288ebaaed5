//! ONNX object detection model for document layout.
//!
//! Wraps a Faster R-CNN network exported to ONNX. The network was trained
//! and exported with a fixed input shape; `predict` resizes each page image
//! to that shape, runs the session, and rescales the resulting boxes back
//! into the original image's pixel space.

use crate::core::errors::{LayoutError, LayoutResult};
use crate::core::inference::{DetectionSession, RawDetections, SessionRunError};
use crate::core::traits::LayoutModel;
use crate::domain::{LabelMap, LayoutElement};
use image::{RgbImage, imageops};
use ndarray::Array3;
use std::path::Path;
use tracing::{debug, info};

/// Width the network was exported with. The network only ever sees this
/// size.
pub const REQUIRED_WIDTH: u32 = 800;

/// Height the network was exported with.
pub const REQUIRED_HEIGHT: u32 = 1035;

/// Confidence threshold used when `initialize` receives none. Registry
/// configuration, when present, always overrides this.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Turns raw detections into typed, filtered, ordered layout elements.
///
/// Separated from the session so the postprocessing contract can be
/// exercised without a loaded network.
#[derive(Debug, Clone)]
pub struct DetectionPostProcessor {
    label_map: LabelMap,
    confidence_threshold: f32,
}

impl DetectionPostProcessor {
    /// Creates a postprocessor with the given label map and threshold.
    pub fn new(label_map: LabelMap, confidence_threshold: f32) -> Self {
        Self {
            label_map,
            confidence_threshold,
        }
    }

    /// Configured minimum score for a detection to be retained.
    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Resolves labels, filters by confidence, rescales coordinates into
    /// the original image's pixel space, and orders by top edge.
    ///
    /// The resize to the fixed input shape distorts aspect ratio, so the
    /// two axes rescale independently: `orig_dim / required_dim` per axis.
    /// The sort is stable; detections sharing a `y1` keep their original
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::LabelResolution`] when a class id has no
    /// label-map entry. Resolution happens before threshold filtering, so a
    /// mismatched pairing surfaces even on low-confidence detections.
    pub fn apply(
        &self,
        raw: &RawDetections,
        original_width: f32,
        original_height: f32,
    ) -> LayoutResult<Vec<LayoutElement>> {
        let width_ratio = original_width / REQUIRED_WIDTH as f32;
        let height_ratio = original_height / REQUIRED_HEIGHT as f32;

        let mut elements = Vec::new();
        for ((bbox, &label), &score) in raw
            .boxes
            .outer_iter()
            .zip(raw.labels.iter())
            .zip(raw.scores.iter())
        {
            let element_type = self
                .label_map
                .get(&label)
                .cloned()
                .ok_or(LayoutError::LabelResolution { class_id: label })?;

            if score < self.confidence_threshold {
                continue;
            }

            elements.push(LayoutElement::new(
                bbox[0] * width_ratio,
                bbox[1] * height_ratio,
                bbox[2] * width_ratio,
                bbox[3] * height_ratio,
                Some(element_type),
                None,
            ));
        }

        elements.sort_by(|a, b| a.y1.total_cmp(&b.y1));
        Ok(elements)
    }
}

#[derive(Debug)]
struct DetectionState {
    session: DetectionSession,
    postprocessor: DetectionPostProcessor,
}

/// Faster R-CNN layout detection model (ONNX).
#[derive(Debug, Default)]
pub struct DetectronOnnxModel {
    state: Option<DetectionState>,
}

impl DetectronOnnxModel {
    /// Creates an uninitialized model shell. Call
    /// [`initialize`](Self::initialize) before `predict`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the inference session for the given weights.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::ModelLoad`] when the weights cannot be read
    /// or the runtime cannot be constructed.
    pub fn initialize(
        &mut self,
        weights_path: &Path,
        label_map: LabelMap,
        confidence_threshold: Option<f32>,
    ) -> LayoutResult<()> {
        info!(
            "loading layout detection model from '{}'",
            weights_path.display()
        );
        let session = DetectionSession::open(weights_path)?;
        let threshold = confidence_threshold.unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD);
        self.state = Some(DetectionState {
            session,
            postprocessor: DetectionPostProcessor::new(label_map, threshold),
        });
        Ok(())
    }

    /// Resizes the image to the network's fixed input shape with linear
    /// interpolation and converts it to a channel-first f32 array.
    ///
    /// This step is lossy and resolution-specific by design.
    pub fn preprocess(&self, image: &RgbImage) -> Array3<f32> {
        let resized = imageops::resize(
            image,
            REQUIRED_WIDTH,
            REQUIRED_HEIGHT,
            imageops::FilterType::Triangle,
        );

        let mut pixels = Array3::<f32>::zeros((
            3,
            REQUIRED_HEIGHT as usize,
            REQUIRED_WIDTH as usize,
        ));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for channel in 0..3 {
                pixels[[channel, y as usize, x as usize]] = pixel[channel] as f32;
            }
        }
        pixels
    }
}

impl LayoutModel for DetectronOnnxModel {
    fn name(&self) -> &str {
        "detectron2_onnx"
    }

    fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    fn predict(&self, image: &RgbImage) -> LayoutResult<Vec<LayoutElement>> {
        self.ensure_initialized()?;
        let state = self.state.as_ref().ok_or_else(|| {
            LayoutError::NotInitialized {
                model: self.name().to_string(),
            }
        })?;

        let pixels = self.preprocess(image);

        let raw = match state.session.run(&pixels) {
            Ok(raw) => raw,
            Err(SessionRunError::Engine(err)) => {
                // The runtime occasionally fails on degenerate inputs such
                // as blank pages; that page simply has no detections.
                debug!("ignoring detection runtime failure: {err}");
                return Ok(Vec::new());
            }
            Err(SessionRunError::Fatal(err)) => return Err(err),
        };

        state
            .postprocessor
            .apply(&raw, image.width() as f32, image.height() as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::default_label_map;
    use ndarray::{Array1, Array2, arr2};

    fn raw(boxes: Array2<f32>, labels: Vec<i64>, scores: Vec<f32>) -> RawDetections {
        RawDetections {
            boxes,
            labels: Array1::from_vec(labels),
            scores: Array1::from_vec(scores),
        }
    }

    #[test]
    fn predict_before_initialize_fails() {
        let model = DetectronOnnxModel::new();
        let image = RgbImage::new(10, 10);
        match model.predict(&image) {
            Err(LayoutError::NotInitialized { model }) => {
                assert_eq!(model, "detectron2_onnx");
            }
            other => panic!("expected NotInitialized, got {other:?}"),
        }
    }

    #[test]
    fn preprocess_produces_channel_first_fixed_shape() {
        let model = DetectronOnnxModel::new();
        let mut image = RgbImage::new(400, 500);
        image.put_pixel(0, 0, image::Rgb([255, 128, 0]));

        let pixels = model.preprocess(&image);
        assert_eq!(
            pixels.shape(),
            &[3, REQUIRED_HEIGHT as usize, REQUIRED_WIDTH as usize]
        );
    }

    #[test]
    fn postprocess_rescales_each_axis_independently() {
        let processor = DetectionPostProcessor::new(default_label_map(), 0.5);
        let boxes = arr2(&[[80.0, 103.5, 160.0, 207.0]]);
        let detections = raw(boxes, vec![0], vec![0.9]);

        // Original image is 1600x2070, so ratios are 2.0 on both axes.
        let elements = processor.apply(&detections, 1600.0, 2070.0).unwrap();
        assert_eq!(elements.len(), 1);
        let element = &elements[0];
        assert_eq!(
            (element.x1, element.y1, element.x2, element.y2),
            (160.0, 207.0, 320.0, 414.0)
        );
        assert_eq!(element.element_type.as_deref(), Some("Text"));
        assert_eq!(element.text, None);
    }

    #[test]
    fn postprocess_coordinate_round_trip_is_exact() {
        let processor = DetectionPostProcessor::new(default_label_map(), 0.0);
        let (x1, y1, x2, y2) = (12.5f32, 7.25f32, 613.0f32, 900.75f32);
        let (orig_w, orig_h) = (1234.0f32, 5678.0f32);
        let detections = raw(arr2(&[[x1, y1, x2, y2]]), vec![3], vec![1.0]);

        let elements = processor.apply(&detections, orig_w, orig_h).unwrap();
        let element = &elements[0];
        assert_eq!(element.x1, x1 * orig_w / REQUIRED_WIDTH as f32);
        assert_eq!(element.y1, y1 * orig_h / REQUIRED_HEIGHT as f32);
        assert_eq!(element.x2, x2 * orig_w / REQUIRED_WIDTH as f32);
        assert_eq!(element.y2, y2 * orig_h / REQUIRED_HEIGHT as f32);
    }

    #[test]
    fn postprocess_filters_strictly_below_threshold() {
        let processor = DetectionPostProcessor::new(default_label_map(), 0.8);
        let boxes = arr2(&[
            [0.0, 0.0, 10.0, 10.0],
            [0.0, 20.0, 10.0, 30.0],
            [0.0, 40.0, 10.0, 50.0],
        ]);
        let detections = raw(boxes, vec![0, 1, 2], vec![0.79, 0.8, 0.99]);

        let elements = processor.apply(&detections, 800.0, 1035.0).unwrap();
        // 0.79 dropped, 0.8 retained (filter is strict, not inclusive).
        assert_eq!(elements.len(), 2);
        assert!(
            elements
                .iter()
                .all(|e| e.element_type.as_deref() != Some("Text"))
        );
    }

    #[test]
    fn postprocess_sorts_by_top_edge_stably() {
        let processor = DetectionPostProcessor::new(default_label_map(), 0.0);
        let boxes = arr2(&[
            [5.0, 300.0, 10.0, 310.0],
            [0.0, 100.0, 10.0, 110.0],
            [20.0, 100.0, 30.0, 110.0],
        ]);
        let detections = raw(boxes, vec![0, 1, 2], vec![0.9, 0.9, 0.9]);

        let elements = processor.apply(&detections, 800.0, 1035.0).unwrap();
        let types: Vec<_> = elements
            .iter()
            .map(|e| e.element_type.clone().unwrap())
            .collect();
        // Both y1=100 detections keep their original relative order.
        assert_eq!(types, vec!["Title", "List", "Text"]);
    }

    #[test]
    fn unresolved_class_id_is_loud() {
        let processor = DetectionPostProcessor::new(default_label_map(), 0.5);
        // Class 9 is outside the five-class map; the low score must not
        // mask the mismatch.
        let detections = raw(arr2(&[[0.0, 0.0, 10.0, 10.0]]), vec![9], vec![0.1]);

        match processor.apply(&detections, 800.0, 1035.0) {
            Err(LayoutError::LabelResolution { class_id }) => assert_eq!(class_id, 9),
            other => panic!("expected LabelResolution, got {other:?}"),
        }
    }
}
