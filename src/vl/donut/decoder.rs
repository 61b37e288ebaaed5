//! Autoregressive text decoder with cross-attention.
//!
//! mBART-style: scaled token embeddings, learned positional embeddings with
//! a fixed offset, self-attention with a KV cache for incremental decoding,
//! and cross-attention over the encoder's hidden states.

use candle_core::{D, DType, Device, Result, Tensor};
use candle_nn::{Embedding, LayerNorm, Linear, Module, VarBuilder};

use super::config::DonutConfig;
use crate::core::errors::LayoutError;
use crate::vl::candle_err;

/// mBART positional tables reserve two leading slots.
const POSITION_OFFSET: usize = 2;

/// KV cache for one decoder layer.
#[derive(Debug, Default, Clone)]
pub struct KvCache {
    pub self_key: Option<Tensor>,
    pub self_value: Option<Tensor>,
    pub cross_key: Option<Tensor>,
    pub cross_value: Option<Tensor>,
}

/// Multi-head attention shared between self- and cross-attention.
#[derive(Debug)]
struct DecoderAttention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
    num_heads: usize,
    head_dim: usize,
    scale: f64,
}

impl DecoderAttention {
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

    /// Returns `(output, new_key, new_value)`. When `key_value_states` is
    /// given the attention is cross-attention; otherwise self-attention
    /// over `hidden_states` with `past_key`/`past_value` prepended.
    fn forward(
        &self,
        hidden_states: &Tensor,
        key_value_states: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        past_key: Option<&Tensor>,
        past_value: Option<&Tensor>,
    ) -> Result<(Tensor, Tensor, Tensor)> {
        let (batch_size, seq_len, _) = hidden_states.dims3()?;

        let query_states = self
            .q_proj
            .forward(hidden_states)?
            .reshape((batch_size, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        let kv_source = key_value_states.unwrap_or(hidden_states);
        let (_, kv_len, _) = kv_source.dims3()?;
        let k = self
            .k_proj
            .forward(kv_source)?
            .reshape((batch_size, kv_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let v = self
            .v_proj
            .forward(kv_source)?
            .reshape((batch_size, kv_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        let (key_states, value_states) = match (past_key, past_value) {
            (Some(pk), Some(pv)) => (Tensor::cat(&[pk, &k], 2)?, Tensor::cat(&[pv, &v], 2)?),
            _ => (k, v),
        };

        let attn_weights = query_states.matmul(&key_states.transpose(2, 3)?.contiguous()?)?;
        let attn_weights = (&attn_weights * self.scale)?;
        let attn_weights = if let Some(mask) = attention_mask {
            attn_weights.broadcast_add(mask)?
        } else {
            attn_weights
        };
        let attn_weights = candle_nn::ops::softmax(&attn_weights, D::Minus1)?;

        let attn_output = attn_weights.matmul(&value_states)?;
        let attn_output = attn_output.transpose(1, 2)?.contiguous()?.reshape((
            batch_size,
            seq_len,
            self.num_heads * self.head_dim,
        ))?;

        Ok((self.out_proj.forward(&attn_output)?, key_states, value_states))
    }
}

/// One decoder layer: self-attention, cross-attention, feed-forward.
#[derive(Debug)]
struct DecoderLayer {
    self_attn: DecoderAttention,
    self_attn_layer_norm: LayerNorm,
    cross_attn: DecoderAttention,
    cross_attn_layer_norm: LayerNorm,
    fc1: Linear,
    fc2: Linear,
    final_layer_norm: LayerNorm,
}

impl DecoderLayer {
    fn load(cfg: &DonutConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            self_attn: DecoderAttention::load(
                cfg.d_model,
                cfg.decoder_attention_heads,
                vb.pp("self_attn"),
            )?,
            self_attn_layer_norm: candle_nn::layer_norm(
                cfg.d_model,
                1e-5,
                vb.pp("self_attn_layer_norm"),
            )?,
            cross_attn: DecoderAttention::load(
                cfg.d_model,
                cfg.decoder_attention_heads,
                vb.pp("encoder_attn"),
            )?,
            cross_attn_layer_norm: candle_nn::layer_norm(
                cfg.d_model,
                1e-5,
                vb.pp("encoder_attn_layer_norm"),
            )?,
            fc1: candle_nn::linear(cfg.d_model, cfg.decoder_ffn_dim, vb.pp("fc1"))?,
            fc2: candle_nn::linear(cfg.decoder_ffn_dim, cfg.d_model, vb.pp("fc2"))?,
            final_layer_norm: candle_nn::layer_norm(
                cfg.d_model,
                1e-5,
                vb.pp("final_layer_norm"),
            )?,
        })
    }

    fn forward(
        &self,
        hidden_states: &Tensor,
        encoder_hidden_states: &Tensor,
        self_attn_mask: Option<&Tensor>,
        kv_cache: Option<&mut KvCache>,
    ) -> Result<Tensor> {
        let mut kv_cache = kv_cache;

        let residual = hidden_states.clone();
        let hidden_states = self.self_attn_layer_norm.forward(hidden_states)?;
        let (past_self_key, past_self_value) = match kv_cache.as_ref() {
            Some(cache) => (cache.self_key.as_ref(), cache.self_value.as_ref()),
            None => (None, None),
        };
        let (hidden_states, new_self_key, new_self_value) = self.self_attn.forward(
            &hidden_states,
            None,
            self_attn_mask,
            past_self_key,
            past_self_value,
        )?;
        if let Some(cache) = kv_cache.as_mut() {
            cache.self_key = Some(new_self_key);
            cache.self_value = Some(new_self_value);
        }
        let hidden_states = (&residual + &hidden_states)?;

        let residual = hidden_states.clone();
        let hidden_states = self.cross_attn_layer_norm.forward(&hidden_states)?;
        let (past_cross_key, past_cross_value) = match kv_cache.as_ref() {
            Some(cache) => (cache.cross_key.as_ref(), cache.cross_value.as_ref()),
            None => (None, None),
        };
        let (hidden_states, new_cross_key, new_cross_value) = self.cross_attn.forward(
            &hidden_states,
            Some(encoder_hidden_states),
            None,
            past_cross_key,
            past_cross_value,
        )?;
        // Cross-attention KV depends only on the encoder output, so only
        // the first step populates the cache.
        if let Some(cache) = kv_cache.as_mut() {
            if cache.cross_key.is_none() {
                cache.cross_key = Some(new_cross_key);
                cache.cross_value = Some(new_cross_value);
            }
        }
        let hidden_states = (&residual + &hidden_states)?;

        let residual = hidden_states.clone();
        let hidden_states = self.final_layer_norm.forward(&hidden_states)?;
        let hidden_states = self.fc1.forward(&hidden_states)?;
        let hidden_states = hidden_states.gelu()?;
        let hidden_states = self.fc2.forward(&hidden_states)?;
        &residual + &hidden_states
    }
}

/// The autoregressive decoder.
#[derive(Debug)]
pub struct DonutDecoder {
    embed_tokens: Embedding,
    embed_scale: f64,
    embed_positions: Embedding,
    layernorm_embedding: LayerNorm,
    layers: Vec<DecoderLayer>,
    layer_norm: LayerNorm,
}

impl DonutDecoder {
    /// Loads the decoder from weights.
    pub fn load(cfg: &DonutConfig, vb: VarBuilder) -> std::result::Result<Self, LayoutError> {
        let embed_tokens = candle_nn::embedding(cfg.vocab_size, cfg.d_model, vb.pp("embed_tokens"))
            .map_err(|e| candle_err("DonutDecoder", "load embed_tokens", e))?;
        let embed_scale = if cfg.scale_embedding {
            (cfg.d_model as f64).sqrt()
        } else {
            1.0
        };

        let embed_positions = candle_nn::embedding(
            cfg.max_position_embeddings + POSITION_OFFSET,
            cfg.d_model,
            vb.pp("embed_positions"),
        )
        .map_err(|e| candle_err("DonutDecoder", "load embed_positions", e))?;

        let layernorm_embedding =
            candle_nn::layer_norm(cfg.d_model, 1e-5, vb.pp("layernorm_embedding"))
                .map_err(|e| candle_err("DonutDecoder", "load layernorm_embedding", e))?;

        let mut layers = Vec::with_capacity(cfg.decoder_layers);
        for i in 0..cfg.decoder_layers {
            let layer = DecoderLayer::load(cfg, vb.pp(format!("layers.{}", i)))
                .map_err(|e| candle_err("DonutDecoder", &format!("load layer.{}", i), e))?;
            layers.push(layer);
        }

        let layer_norm = candle_nn::layer_norm(cfg.d_model, 1e-5, vb.pp("layer_norm"))
            .map_err(|e| candle_err("DonutDecoder", "load layer_norm", e))?;

        Ok(Self {
            embed_tokens,
            embed_scale,
            embed_positions,
            layernorm_embedding,
            layers,
            layer_norm,
        })
    }

    /// Runs the decoder over `input_ids` (`[B, seq]`), attending over
    /// `encoder_hidden_states`. `position_offset` is the number of tokens
    /// already consumed when decoding incrementally with `kv_cache`.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        encoder_hidden_states: &Tensor,
        position_offset: usize,
        self_attn_mask: Option<&Tensor>,
        mut kv_cache: Option<&mut Vec<KvCache>>,
    ) -> std::result::Result<Tensor, LayoutError> {
        let (batch_size, seq_len) = input_ids
            .dims2()
            .map_err(|e| candle_err("DonutDecoder", "get input dims", e))?;
        let device = input_ids.device();

        let inputs_embeds = self
            .embed_tokens
            .forward(input_ids)
            .map_err(|e| candle_err("DonutDecoder", "embed_tokens forward", e))?;
        let inputs_embeds = if self.embed_scale != 1.0 {
            (&inputs_embeds * self.embed_scale)
                .map_err(|e| candle_err("DonutDecoder", "scale embeddings", e))?
        } else {
            inputs_embeds
        };

        let position_ids: Vec<u32> = (position_offset..position_offset + seq_len)
            .map(|p| (p + POSITION_OFFSET) as u32)
            .collect();
        let position_ids = Tensor::new(&position_ids[..], device)
            .map_err(|e| candle_err("DonutDecoder", "create position_ids", e))?
            .unsqueeze(0)
            .map_err(|e| candle_err("DonutDecoder", "unsqueeze position_ids", e))?
            .broadcast_as((batch_size, seq_len))
            .map_err(|e| candle_err("DonutDecoder", "broadcast position_ids", e))?;
        let positions = self
            .embed_positions
            .forward(&position_ids)
            .map_err(|e| candle_err("DonutDecoder", "embed_positions forward", e))?;

        let hidden_states = (&inputs_embeds + &positions)
            .map_err(|e| candle_err("DonutDecoder", "add embeddings", e))?;
        let mut hidden_states = self
            .layernorm_embedding
            .forward(&hidden_states)
            .map_err(|e| candle_err("DonutDecoder", "layernorm_embedding forward", e))?;

        for (i, layer) in self.layers.iter().enumerate() {
            let layer_cache = kv_cache.as_mut().map(|cache| &mut cache[i]);
            hidden_states = layer
                .forward(
                    &hidden_states,
                    encoder_hidden_states,
                    self_attn_mask,
                    layer_cache,
                )
                .map_err(|e| candle_err("DonutDecoder", &format!("layer.{} forward", i), e))?;
        }

        self.layer_norm
            .forward(&hidden_states)
            .map_err(|e| candle_err("DonutDecoder", "layer_norm forward", e))
    }
}

/// Builds a `[1, 1, seq, seq]` causal mask for prefill steps.
pub fn create_causal_mask(
    seq_len: usize,
    device: &Device,
    dtype: DType,
) -> std::result::Result<Tensor, LayoutError> {
    let mut data = Vec::with_capacity(seq_len * seq_len);
    for i in 0..seq_len {
        for j in 0..seq_len {
            data.push(if j <= i { 0f32 } else { f32::NEG_INFINITY });
        }
    }
    Tensor::from_vec(data, (1, 1, seq_len, seq_len), device)
        .map_err(|e| candle_err("create_causal_mask", "build tensor", e))?
        .to_dtype(dtype)
        .map_err(|e| candle_err("create_causal_mask", "cast dtype", e))
}
