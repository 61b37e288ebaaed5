//! Domain types: layout elements and label maps.

pub mod element;

pub use element::{LabelMap, LayoutElement, default_label_map};
