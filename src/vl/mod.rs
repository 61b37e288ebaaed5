//! Vision-language models implemented with Candle.
//!
//! This module hosts the native encoder-decoder implementation backing the
//! token-generation family.

pub mod donut;

pub use donut::{DonutConfig, DonutImageProcessor, DonutModel};

use crate::core::errors::LayoutError;

/// Maps a candle error into an inference error with module/operation
/// context.
pub(crate) fn candle_err(
    model: &str,
    operation: &str,
    error: candle_core::Error,
) -> LayoutError {
    LayoutError::inference(format!("{model}: {operation}"), error)
}
