//! Patch-embedding vision encoder.
//!
//! A convolutional patch embedding followed by a stack of pre-norm
//! transformer layers. The encoder's output feeds the decoder's
//! cross-attention.

use candle_core::{D, Result, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, LayerNorm, Linear, Module, VarBuilder};

use super::config::DonutConfig;
use crate::core::errors::LayoutError;
use crate::vl::candle_err;

/// Multi-head self-attention without caching (encoder side).
#[derive(Debug)]
struct EncoderAttention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
    num_heads: usize,
    head_dim: usize,
    scale: f64,
}

impl EncoderAttention {
    fn load(embed_dim: usize, num_heads: usize, vb: VarBuilder) -> Result<Self> {
        let head_dim = embed_dim / num_heads;
        Ok(Self {
            q_proj: candle_nn::linear(embed_dim, embed_dim, vb.pp("q_proj"))?,
            k_proj: candle_nn::linear(embed_dim, embed_dim, vb.pp("k_proj"))?,
            v_proj: candle_nn::linear(embed_dim, embed_dim, vb.pp("v_proj"))?,
            out_proj: candle_nn::linear(embed_dim, embed_dim, vb.pp("out_proj"))?,
            num_heads,
            head_dim,
            scale: (head_dim as f64).powf(-0.5),
        })
    }

    fn forward(&self, hidden_states: &Tensor) -> Result<Tensor> {
        let (batch_size, seq_len, _) = hidden_states.dims3()?;

        let shape = (batch_size, seq_len, self.num_heads, self.head_dim);
        let q = self
            .q_proj
            .forward(hidden_states)?
            .reshape(shape)?
            .transpose(1, 2)?
            .contiguous()?;
        let k = self
            .k_proj
            .forward(hidden_states)?
            .reshape(shape)?
            .transpose(1, 2)?
            .contiguous()?;
        let v = self
            .v_proj
            .forward(hidden_states)?
            .reshape(shape)?
            .transpose(1, 2)?
            .contiguous()?;

        let attn_weights = q.matmul(&k.transpose(2, 3)?.contiguous()?)?;
        let attn_weights = (&attn_weights * self.scale)?;
        let attn_weights = candle_nn::ops::softmax(&attn_weights, D::Minus1)?;

        let attn_output = attn_weights.matmul(&v)?;
        let attn_output = attn_output.transpose(1, 2)?.contiguous()?.reshape((
            batch_size,
            seq_len,
            self.num_heads * self.head_dim,
        ))?;

        self.out_proj.forward(&attn_output)
    }
}

/// Pre-norm transformer encoder layer.
#[derive(Debug)]
struct EncoderLayer {
    self_attn: EncoderAttention,
    self_attn_layer_norm: LayerNorm,
    fc1: Linear,
    fc2: Linear,
    final_layer_norm: LayerNorm,
}

impl EncoderLayer {
    fn load(cfg: &DonutConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            self_attn: EncoderAttention::load(
                cfg.d_model,
                cfg.encoder_attention_heads,
                vb.pp("self_attn"),
            )?,
            self_attn_layer_norm: candle_nn::layer_norm(
                cfg.d_model,
                1e-5,
                vb.pp("self_attn_layer_norm"),
            )?,
            fc1: candle_nn::linear(cfg.d_model, cfg.encoder_ffn_dim, vb.pp("fc1"))?,
            fc2: candle_nn::linear(cfg.encoder_ffn_dim, cfg.d_model, vb.pp("fc2"))?,
            final_layer_norm: candle_nn::layer_norm(
                cfg.d_model,
                1e-5,
                vb.pp("final_layer_norm"),
            )?,
        })
    }

    fn forward(&self, hidden_states: &Tensor) -> Result<Tensor> {
        let residual = hidden_states.clone();
        let hidden_states = self.self_attn_layer_norm.forward(hidden_states)?;
        let hidden_states = self.self_attn.forward(&hidden_states)?;
        let hidden_states = (&residual + &hidden_states)?;

        let residual = hidden_states.clone();
        let hidden_states = self.final_layer_norm.forward(&hidden_states)?;
        let hidden_states = self.fc1.forward(&hidden_states)?;
        let hidden_states = hidden_states.gelu()?;
        let hidden_states = self.fc2.forward(&hidden_states)?;
        &residual + &hidden_states
    }
}

/// The vision encoder.
#[derive(Debug)]
pub struct DonutEncoder {
    patch_embed: Conv2d,
    pos_embed: Tensor,
    layers: Vec<EncoderLayer>,
    layer_norm: LayerNorm,
    num_patches: usize,
}

impl DonutEncoder {
    /// Loads the encoder from weights.
    pub fn load(cfg: &DonutConfig, vb: VarBuilder) -> std::result::Result<Self, LayoutError> {
        let conv_cfg = Conv2dConfig {
            stride: cfg.patch_size,
            ..Default::default()
        };
        let patch_embed =
            candle_nn::conv2d(3, cfg.d_model, cfg.patch_size, conv_cfg, vb.pp("patch_embed"))
                .map_err(|e| candle_err("DonutEncoder", "load patch_embed", e))?;

        let num_patches = cfg.num_patches();
        let pos_embed = vb
            .get((1, num_patches, cfg.d_model), "pos_embed")
            .map_err(|e| candle_err("DonutEncoder", "load pos_embed", e))?;

        let mut layers = Vec::with_capacity(cfg.encoder_layers);
        for i in 0..cfg.encoder_layers {
            let layer = EncoderLayer::load(cfg, vb.pp(format!("layers.{}", i)))
                .map_err(|e| candle_err("DonutEncoder", &format!("load layer.{}", i), e))?;
            layers.push(layer);
        }

        let layer_norm = candle_nn::layer_norm(cfg.d_model, 1e-5, vb.pp("layer_norm"))
            .map_err(|e| candle_err("DonutEncoder", "load layer_norm", e))?;

        Ok(Self {
            patch_embed,
            pos_embed,
            layers,
            layer_norm,
            num_patches,
        })
    }

    /// Encodes pixel values (`[B, 3, H, W]`) into hidden states
    /// (`[B, num_patches, d_model]`).
    pub fn forward(&self, pixel_values: &Tensor) -> std::result::Result<Tensor, LayoutError> {
        let hidden_states = self
            .patch_embed
            .forward(pixel_values)
            .map_err(|e| candle_err("DonutEncoder", "patch_embed forward", e))?;
        // [B, d_model, h, w] -> [B, h*w, d_model]
        let hidden_states = hidden_states
            .flatten_from(2)
            .map_err(|e| candle_err("DonutEncoder", "flatten patches", e))?;
        let hidden_states = hidden_states
            .transpose(1, 2)
            .map_err(|e| candle_err("DonutEncoder", "transpose patches", e))?;

        let seq_len = hidden_states
            .dims3()
            .map_err(|e| candle_err("DonutEncoder", "get patch dims", e))?
            .1;
        if seq_len != self.num_patches {
            return Err(LayoutError::config(format!(
                "encoder input produced {} patches but the position table covers {}; \
                 check the image processor's output size",
                seq_len, self.num_patches
            )));
        }

        let mut hidden_states = hidden_states
            .broadcast_add(&self.pos_embed)
            .map_err(|e| candle_err("DonutEncoder", "add position embeddings", e))?;

        for (i, layer) in self.layers.iter().enumerate() {
            hidden_states = layer
                .forward(&hidden_states)
                .map_err(|e| candle_err("DonutEncoder", &format!("layer.{} forward", i), e))?;
        }

        self.layer_norm
            .forward(&hidden_states)
            .map_err(|e| candle_err("DonutEncoder", "layer_norm forward", e))
    }
}
