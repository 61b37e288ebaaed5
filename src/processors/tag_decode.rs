//! Tag-delimited text decoding.
//!
//! The generation model emits a flat stream in which `<s_TYPE>` and
//! `</s_TYPE>` markers delimit typed regions. This module decodes that
//! stream into layout elements with an explicit state machine, which makes
//! truncated-tag handling a well-defined terminal state: a trailing open
//! tag with no matching close is a valid truncated-generation condition,
//! not an error.

use crate::domain::LayoutElement;

const OPEN_MARKER: &str = "<s_";
const CLOSE_MARKER: &str = "</s_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Between regions; everything but an open marker is discarded.
    Outside,
    /// Collecting the type name of an open marker.
    OpenTag,
    /// Accumulating region content.
    Content,
    /// Collecting the type name of a close marker.
    CloseTag,
}

/// Decodes a detokenized tag stream into typed layout elements.
///
/// Each opened region yields exactly one element whose `element_type` is
/// the marker's TYPE and whose `text` is the trimmed content between the
/// markers. Elements carry no spatial information. Tolerated deviations:
///
/// - a trailing open tag with no close emits an element from the remaining
///   content (truncated generation);
/// - an open marker encountered while a region is still open closes the
///   current region first;
/// - text outside any region is discarded.
pub fn decode_tagged_text(text: &str) -> Vec<LayoutElement> {
    let mut elements = Vec::new();
    let mut state = State::Outside;
    let mut tag = String::new();
    let mut content = String::new();
    let mut current_type: Option<String> = None;

    let mut emit = |element_type: Option<String>, content: &mut String| {
        if let Some(element_type) = element_type {
            let trimmed = content.trim();
            let text = (!trimmed.is_empty()).then(|| trimmed.to_string());
            elements.push(LayoutElement::locationless(element_type, text));
        }
        content.clear();
    };

    let mut rest = text;
    while let Some(ch) = rest.chars().next() {
        match state {
            State::Outside => {
                if rest.starts_with(OPEN_MARKER) {
                    state = State::OpenTag;
                    tag.clear();
                    rest = &rest[OPEN_MARKER.len()..];
                    continue;
                }
            }
            State::OpenTag => {
                if ch == '>' {
                    current_type = Some(tag.clone());
                    content.clear();
                    state = State::Content;
                } else {
                    tag.push(ch);
                }
            }
            State::Content => {
                if rest.starts_with(CLOSE_MARKER) {
                    state = State::CloseTag;
                    tag.clear();
                    rest = &rest[CLOSE_MARKER.len()..];
                    continue;
                }
                if rest.starts_with(OPEN_MARKER) {
                    // A new region opened without closing the current one;
                    // finish the current region best-effort.
                    emit(current_type.take(), &mut content);
                    state = State::OpenTag;
                    tag.clear();
                    rest = &rest[OPEN_MARKER.len()..];
                    continue;
                }
                content.push(ch);
            }
            State::CloseTag => {
                if ch == '>' {
                    emit(current_type.take(), &mut content);
                    state = State::Outside;
                } else {
                    tag.push(ch);
                }
            }
        }
        rest = &rest[ch.len_utf8()..];
    }

    // Terminal states: an open region at end of input still yields its
    // element (truncated generation).
    match state {
        State::Content | State::CloseTag => emit(current_type.take(), &mut content),
        State::Outside | State::OpenTag => {}
    }

    elements
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(elements: &[LayoutElement]) -> Vec<&str> {
        elements
            .iter()
            .map(|e| e.element_type.as_deref().unwrap())
            .collect()
    }

    #[test]
    fn balanced_tags_decode_to_typed_elements() {
        let elements = decode_tagged_text(
            "<s_Title>Hi buddy!</s_Title><s_Text>There is some text here.</s_Text>",
        );
        assert_eq!(elements.len(), 2);
        assert_eq!(types(&elements), vec!["Title", "Text"]);
        assert_eq!(elements[0].text.as_deref(), Some("Hi buddy!"));
        assert_eq!(
            elements[1].text.as_deref(),
            Some("There is some text here.")
        );
    }

    #[test]
    fn trailing_open_tag_is_tolerated() {
        let elements = decode_tagged_text(
            "<s_Title>Hi buddy!</s_Title><s_Text>There is some text here.",
        );
        assert_eq!(elements.len(), 2);
        assert_eq!(types(&elements), vec!["Title", "Text"]);
        assert_eq!(
            elements[1].text.as_deref(),
            Some("There is some text here.")
        );
    }

    #[test]
    fn decoded_elements_are_locationless() {
        let elements = decode_tagged_text("<s_Text>abc</s_Text>");
        assert!(!elements[0].has_location());
    }

    #[test]
    fn empty_input_decodes_to_nothing() {
        assert!(decode_tagged_text("").is_empty());
    }

    #[test]
    fn text_outside_regions_is_discarded() {
        let elements = decode_tagged_text("noise <s_Text>kept</s_Text> more noise");
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].text.as_deref(), Some("kept"));
    }

    #[test]
    fn reopened_region_closes_the_previous_one() {
        let elements = decode_tagged_text("<s_Title>First<s_Text>Second</s_Text>");
        assert_eq!(types(&elements), vec!["Title", "Text"]);
        assert_eq!(elements[0].text.as_deref(), Some("First"));
        assert_eq!(elements[1].text.as_deref(), Some("Second"));
    }

    #[test]
    fn content_is_trimmed_and_empty_content_becomes_none() {
        let elements = decode_tagged_text("<s_Title>  padded  </s_Title><s_Text></s_Text>");
        assert_eq!(elements[0].text.as_deref(), Some("padded"));
        assert_eq!(elements[1].text, None);
    }

    #[test]
    fn truncated_close_marker_still_emits() {
        let elements = decode_tagged_text("<s_Text>almost done</s_Tex");
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].text.as_deref(), Some("almost done"));
    }

    #[test]
    fn truncated_open_marker_emits_nothing() {
        assert!(decode_tagged_text("<s_Tit").is_empty());
    }

    #[test]
    fn angle_brackets_inside_content_are_preserved() {
        let elements = decode_tagged_text("<s_Text>a < b and c > d</s_Text>");
        assert_eq!(elements[0].text.as_deref(), Some("a < b and c > d"));
    }
}
