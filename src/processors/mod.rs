//! Postprocessing and preprocessing processors.

pub mod tag_decode;

pub use tag_decode::decode_tagged_text;
