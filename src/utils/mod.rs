//! Utility functions for images and visualization.

pub mod image;
pub mod visualization;

pub use image::{create_rgb_image, dynamic_to_rgb, load_image, load_images_batch};
pub use visualization::draw_elements;
