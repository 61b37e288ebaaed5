//! The common output unit of both model families.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Mapping from a detection network's integer class output to a type name.
///
/// Every id the network can emit must resolve; an unresolved id is a defect
/// (a mismatched model/label-map pairing), not a runtime-recoverable
/// condition.
pub type LabelMap = HashMap<i64, String>;

/// The canonical five-class label map used by the default detection model.
pub fn default_label_map() -> LabelMap {
    HashMap::from([
        (0, "Text".to_string()),
        (1, "Title".to_string()),
        (2, "List".to_string()),
        (3, "Table".to_string()),
        (4, "Figure".to_string()),
    ])
}

/// A typed rectangular region of a page, optionally carrying extracted text.
///
/// Coordinates are expressed in the original image's pixel space, never the
/// model's internal input resolution, with `x1 <= x2` and `y1 <= y2`.
/// Elements produced by token generation carry no spatial information and
/// use a degenerate zero-area rectangle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutElement {
    /// Left edge.
    pub x1: f32,
    /// Top edge.
    pub y1: f32,
    /// Right edge.
    pub x2: f32,
    /// Bottom edge.
    pub y2: f32,
    /// Region type (e.g. "Title", "Text"), when known.
    pub element_type: Option<String>,
    /// Extracted text content, when the producing model extracts text.
    pub text: Option<String>,
}

impl LayoutElement {
    /// Creates an element from corner coordinates.
    pub fn new(
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        element_type: Option<String>,
        text: Option<String>,
    ) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            element_type,
            text,
        }
    }

    /// Creates an element with no spatial information (degenerate rectangle
    /// at the origin). Used by the token-generation family, which types and
    /// transcribes regions but does not localize them.
    pub fn locationless(element_type: impl Into<String>, text: Option<String>) -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0, Some(element_type.into()), text)
    }

    /// Width of the region.
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    /// Height of the region.
    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Whether the element carries real spatial extent.
    pub fn has_location(&self) -> bool {
        self.width() > 0.0 && self.height() > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_label_map_covers_all_five_classes() {
        let map = default_label_map();
        assert_eq!(map.len(), 5);
        for (id, name) in [(0, "Text"), (1, "Title"), (2, "List"), (3, "Table"), (4, "Figure")] {
            assert_eq!(map.get(&id).map(String::as_str), Some(name));
        }
    }

    #[test]
    fn locationless_elements_have_no_extent() {
        let element = LayoutElement::locationless("Title", Some("Hello".to_string()));
        assert!(!element.has_location());
        assert_eq!(element.element_type.as_deref(), Some("Title"));
        assert_eq!(element.width(), 0.0);
        assert_eq!(element.height(), 0.0);
    }

    #[test]
    fn width_and_height_from_corners() {
        let element = LayoutElement::new(10.0, 20.0, 110.0, 70.0, None, None);
        assert_eq!(element.width(), 100.0);
        assert_eq!(element.height(), 50.0);
        assert!(element.has_location());
    }
}
