//! Donut-style vision encoder-decoder.
//!
//! A patch-embedding vision encoder feeds an autoregressive text decoder
//! with cross-attention; greedy decoding produces the token stream that the
//! generation pipeline decodes into layout elements.

mod config;
mod decoder;
mod encoder;
mod model;
mod processing;

pub use config::DonutConfig;
pub use model::DonutModel;
pub use processing::{DonutImageProcessor, DonutImageProcessorConfig};
