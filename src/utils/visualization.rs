//! Visualization of predicted layout elements.

use crate::domain::LayoutElement;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

const DEFAULT_BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Draws each element's rectangle onto a copy of the page image.
///
/// Locationless elements (from the generation family) have no extent and
/// are skipped. Intended for eyeballing model output; the returned image is
/// not part of the pipeline's contract.
pub fn draw_elements(
    image: &RgbImage,
    elements: &[LayoutElement],
    color: Option<Rgb<u8>>,
) -> RgbImage {
    let color = color.unwrap_or(DEFAULT_BOX_COLOR);
    let mut canvas = image.clone();

    for element in elements {
        if !element.has_location() {
            continue;
        }
        let width = element.width().round().max(1.0) as u32;
        let height = element.height().round().max(1.0) as u32;
        let rect = Rect::at(element.x1.round() as i32, element.y1.round() as i32)
            .of_size(width, height);
        draw_hollow_rect_mut(&mut canvas, rect, color);
    }

    canvas
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draws_located_elements_and_skips_locationless_ones() {
        let image = RgbImage::new(50, 50);
        let elements = vec![
            LayoutElement::new(5.0, 5.0, 20.0, 20.0, Some("Text".to_string()), None),
            LayoutElement::locationless("Title", Some("no box".to_string())),
        ];

        let annotated = draw_elements(&image, &elements, None);
        // A corner of the drawn rectangle took the default color.
        assert_eq!(annotated.get_pixel(5, 5), &Rgb([255, 0, 0]));
        // The source image is untouched.
        assert_eq!(image.get_pixel(5, 5), &Rgb([0, 0, 0]));
    }
}
