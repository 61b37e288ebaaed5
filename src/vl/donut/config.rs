//! Donut model configuration.

use crate::core::errors::{LayoutError, LayoutResult};
use serde::Deserialize;
use std::path::Path;

fn default_d_model() -> usize {
    1024
}

fn default_patch_size() -> usize {
    32
}

fn default_encoder_layers() -> usize {
    8
}

fn default_encoder_attention_heads() -> usize {
    16
}

fn default_encoder_ffn_dim() -> usize {
    4096
}

fn default_vocab_size() -> usize {
    57525
}

fn default_decoder_layers() -> usize {
    4
}

fn default_decoder_attention_heads() -> usize {
    16
}

fn default_decoder_ffn_dim() -> usize {
    4096
}

fn default_max_position_embeddings() -> usize {
    1536
}

fn default_scale_embedding() -> bool {
    true
}

fn default_decoder_start_token_id() -> u32 {
    0
}

fn default_eos_token_id() -> u32 {
    2
}

fn default_max_length() -> usize {
    768
}

fn default_image_size() -> [usize; 2] {
    [1280, 960]
}

/// Configuration for the Donut encoder-decoder, read from a model
/// directory's `config.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct DonutConfig {
    /// Shared hidden size of encoder and decoder.
    #[serde(default = "default_d_model")]
    pub d_model: usize,
    /// Side length of a square image patch.
    #[serde(default = "default_patch_size")]
    pub patch_size: usize,
    /// Number of encoder layers.
    #[serde(default = "default_encoder_layers")]
    pub encoder_layers: usize,
    /// Attention heads per encoder layer.
    #[serde(default = "default_encoder_attention_heads")]
    pub encoder_attention_heads: usize,
    /// Encoder feed-forward width.
    #[serde(default = "default_encoder_ffn_dim")]
    pub encoder_ffn_dim: usize,
    /// Decoder vocabulary size.
    #[serde(default = "default_vocab_size")]
    pub vocab_size: usize,
    /// Number of decoder layers.
    #[serde(default = "default_decoder_layers")]
    pub decoder_layers: usize,
    /// Attention heads per decoder layer.
    #[serde(default = "default_decoder_attention_heads")]
    pub decoder_attention_heads: usize,
    /// Decoder feed-forward width.
    #[serde(default = "default_decoder_ffn_dim")]
    pub decoder_ffn_dim: usize,
    /// Maximum decoder sequence length the position table covers.
    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,
    /// Whether token embeddings are scaled by `sqrt(d_model)`.
    #[serde(default = "default_scale_embedding")]
    pub scale_embedding: bool,
    /// Sentinel that opens every generated sequence.
    #[serde(default = "default_decoder_start_token_id")]
    pub decoder_start_token_id: u32,
    /// Sentinel that terminates generation.
    #[serde(default = "default_eos_token_id")]
    pub eos_token_id: u32,
    /// Upper bound on generated tokens per image.
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    /// Fixed encoder input size as `[height, width]`.
    #[serde(default = "default_image_size")]
    pub image_size: [usize; 2],
}

impl Default for DonutConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty config must deserialize via defaults")
    }
}

impl DonutConfig {
    /// Reads the configuration from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> LayoutResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            LayoutError::model_load(format!("reading '{}'", path.display()), e)
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            LayoutError::model_load(format!("parsing '{}'", path.display()), e)
        })
    }

    /// Number of patches the encoder produces for the fixed input size.
    pub fn num_patches(&self) -> usize {
        let [height, width] = self.image_size;
        (height / self.patch_size) * (width / self.patch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_coherent() {
        let cfg = DonutConfig::default();
        assert_eq!(cfg.d_model % cfg.encoder_attention_heads, 0);
        assert_eq!(cfg.d_model % cfg.decoder_attention_heads, 0);
        assert_eq!(cfg.num_patches(), (1280 / 32) * (960 / 32));
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let cfg: DonutConfig =
            serde_json::from_str(r#"{"decoder_layers": 2, "max_length": 128}"#).unwrap();
        assert_eq!(cfg.decoder_layers, 2);
        assert_eq!(cfg.max_length, 128);
        assert_eq!(cfg.d_model, 1024);
    }
}
