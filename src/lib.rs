//! # layout-inference
//!
//! A Rust library that extracts structured document content from page images.
//! Two model families produce the same output — an ordered sequence of typed
//! [`LayoutElement`](domain::LayoutElement)s:
//!
//! - **Object detection**: an ONNX detection network proposes bounding boxes
//!   and class labels for layout regions (Text, Title, List, Table, Figure).
//! - **Token generation**: a vision encoder-decoder emits a token stream in
//!   which `<s_TYPE>…</s_TYPE>` markers delimit typed regions and their text.
//!
//! Both families implement the [`LayoutModel`](core::traits::LayoutModel)
//! contract, so callers can hold a `dyn LayoutModel` and swap implementations
//! without changing call sites. Models are provisioned through a lazy
//! [`ModelRegistry`](core::registry::ModelRegistry): registry entries are
//! cheap to declare and weights are only downloaded and loaded on first use.
//!
//! ## Modules
//!
//! * [`core`] - Errors, the shared model contract, the lazy registry, and the
//!   ONNX session wrapper
//! * [`domain`] - Layout elements and label maps
//! * [`models`] - The two model families
//! * [`vl`] - Candle-based vision encoder-decoder backing the generation family
//! * [`processors`] - Tag-stream decoding and image preprocessing
//! * [`utils`] - Image loading and visualization helpers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use layout_inference::prelude::*;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = ModelRegistry::with_default_entries();
//! let model = registry.get("detectron2_onnx")?;
//!
//! let image = load_image(Path::new("page.png"))?;
//! for element in model.predict(&image)? {
//!     println!("{:?} at ({}, {})", element.element_type, element.x1, element.y1);
//! }
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod domain;
pub mod models;
pub mod processors;
pub mod utils;
pub mod vl;

/// Prelude module for convenient imports.
///
/// ```rust
/// use layout_inference::prelude::*;
/// ```
pub mod prelude {
    pub use crate::core::errors::{LayoutError, LayoutResult};
    pub use crate::core::registry::ModelRegistry;
    pub use crate::core::traits::LayoutModel;
    pub use crate::core::weights::WeightSource;
    pub use crate::domain::{LabelMap, LayoutElement, default_label_map};
    pub use crate::models::detection::DetectronOnnxModel;
    pub use crate::models::generation::DonutExtractionModel;
    pub use crate::utils::load_image;
}
