//! The two model families.
//!
//! * [`detection`] - ONNX object detection: boxes, labels, and scores.
//! * [`generation`] - token generation: a tag-delimited stream decoded into
//!   typed elements.

pub mod detection;
pub mod generation;

pub use detection::DetectronOnnxModel;
pub use generation::DonutExtractionModel;
