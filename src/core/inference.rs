//! ONNX Runtime session wrapper for the detection family.
//!
//! One loaded session serves concurrent `predict` calls; the session sits
//! behind a `Mutex`, so calls may serialize inside the runtime but never
//! corrupt shared state.
//!
//! Failures from the engine's forward pass itself are kept as a distinct
//! category ([`SessionRunError::Engine`]) so the model layer can convert the
//! known transient class (observed on degenerate/blank pages) into an empty
//! result instead of an error, while everything else propagates.

use crate::core::errors::{LayoutError, LayoutResult};
use ndarray::{Array1, Array2, Array3};
use ort::logging::LogLevel;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Parallel output arrays of a detection forward pass, in the fixed input's
/// coordinate space.
#[derive(Debug, Clone)]
pub struct RawDetections {
    /// Bounding boxes, one `[x1, y1, x2, y2]` row per detection.
    pub boxes: Array2<f32>,
    /// Integer class labels, parallel to `boxes`.
    pub labels: Array1<i64>,
    /// Confidence scores, parallel to `boxes`.
    pub scores: Array1<f32>,
}

/// Outcome categories of a single forward pass.
#[derive(Debug)]
pub enum SessionRunError {
    /// The runtime itself failed while executing the network. In practice
    /// this happens on degenerate inputs (blank pages); callers treat it as
    /// transient and degrade to an empty result.
    Engine(ort::Error),
    /// A genuine failure: malformed outputs, lock poisoning, conversion
    /// errors. Propagates out of `predict`.
    Fatal(LayoutError),
}

/// An ONNX Runtime session loaded for layout detection.
pub struct DetectionSession {
    session: Mutex<Session>,
    input_name: String,
    model_path: PathBuf,
}

impl std::fmt::Debug for DetectionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionSession")
            .field("input_name", &self.input_name)
            .field("model_path", &self.model_path)
            .finish()
    }
}

impl DetectionSession {
    /// Opens an inference session for the given weights.
    ///
    /// The network's input name is discovered from the model itself.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::ModelLoad`] when the session cannot be
    /// constructed or the model declares no inputs.
    pub fn open(model_path: &Path) -> LayoutResult<Self> {
        let session = Session::builder()
            .and_then(|builder| Ok(builder.with_log_level(LogLevel::Error)?))
            .and_then(|mut builder| builder.commit_from_file(model_path))
            .map_err(|e| {
                LayoutError::model_load(
                    format!("creating ONNX session for '{}'", model_path.display()),
                    e,
                )
            })?;

        let input_name = session
            .inputs()
            .first()
            .map(|input| input.name().to_string())
            .ok_or_else(|| {
                LayoutError::model_load_message(format!(
                    "model '{}' declares no inputs",
                    model_path.display()
                ))
            })?;

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            model_path: model_path.to_path_buf(),
        })
    }

    /// Path of the loaded weights.
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Runs the detection network on a channel-first image tensor
    /// (`[3, H, W]`, f32) and extracts the parallel output arrays.
    pub fn run(&self, pixels: &Array3<f32>) -> Result<RawDetections, SessionRunError> {
        let input_tensor = TensorRef::from_array_view(pixels.view()).map_err(|e| {
            SessionRunError::Fatal(LayoutError::inference("converting input tensor", e))
        })?;
        let inputs = ort::inputs![self.input_name.as_str() => input_tensor];

        let mut session = self.session.lock().map_err(|_| {
            SessionRunError::Fatal(LayoutError::inference_boxed(
                "acquiring session lock",
                "session mutex poisoned".into(),
            ))
        })?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();
        if output_names.len() < 3 {
            return Err(SessionRunError::Fatal(LayoutError::inference_boxed(
                "inspecting model outputs",
                format!(
                    "detection model must expose boxes, labels, and scores; found {:?}",
                    output_names
                )
                .into(),
            )));
        }

        let outputs = session.run(inputs).map_err(SessionRunError::Engine)?;

        let (box_shape, box_data) = outputs[output_names[0].as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| {
                SessionRunError::Fatal(LayoutError::inference("extracting boxes output", e))
            })?;
        if box_shape.len() != 2 || box_shape[1] != 4 {
            return Err(SessionRunError::Fatal(LayoutError::inference_boxed(
                "validating boxes output",
                format!("expected [N, 4] boxes, got shape {box_shape:?}").into(),
            )));
        }
        let count = box_shape[0] as usize;
        let boxes = Array2::from_shape_vec((count, 4), box_data.to_vec())
            .map_err(|e| SessionRunError::Fatal(LayoutError::Tensor(e)))?;

        let (_, label_data) = outputs[output_names[1].as_str()]
            .try_extract_tensor::<i64>()
            .map_err(|e| {
                SessionRunError::Fatal(LayoutError::inference("extracting labels output", e))
            })?;
        let (_, score_data) = outputs[output_names[2].as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| {
                SessionRunError::Fatal(LayoutError::inference("extracting scores output", e))
            })?;

        if label_data.len() != count || score_data.len() != count {
            return Err(SessionRunError::Fatal(LayoutError::inference_boxed(
                "validating output arity",
                format!(
                    "parallel outputs disagree: {} boxes, {} labels, {} scores",
                    count,
                    label_data.len(),
                    score_data.len()
                )
                .into(),
            )));
        }

        Ok(RawDetections {
            boxes,
            labels: Array1::from_vec(label_data.to_vec()),
            scores: Array1::from_vec(score_data.to_vec()),
        })
    }
}
