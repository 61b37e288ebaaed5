//! Core infrastructure shared by both model families.
//!
//! This module provides error types, the polymorphic model contract, the lazy
//! model registry, the ONNX session wrapper used by the detection family, and
//! weight acquisition.

pub mod errors;
pub mod inference;
pub mod registry;
pub mod traits;
pub mod weights;

pub use errors::{LayoutError, LayoutResult};
pub use registry::ModelRegistry;
pub use traits::LayoutModel;
