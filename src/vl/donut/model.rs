//! Donut model loading and greedy generation.

use candle_core::{D, DType, Device, IndexOp, Tensor};
use candle_nn::{Linear, Module};
use std::path::Path;
use tracing::info;

use super::config::DonutConfig;
use super::decoder::{DonutDecoder, KvCache, create_causal_mask};
use super::encoder::DonutEncoder;
use crate::core::errors::{LayoutError, LayoutResult};
use crate::models::generation::SequenceGenerator;
use crate::vl::candle_err;

/// Donut vision encoder-decoder.
pub struct DonutModel {
    device: Device,
    dtype: DType,
    cfg: DonutConfig,
    encoder: DonutEncoder,
    decoder: DonutDecoder,
    lm_head: Linear,
}

impl std::fmt::Debug for DonutModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DonutModel")
            .field("device", &self.device)
            .field("dtype", &self.dtype)
            .finish()
    }
}

impl DonutModel {
    /// Loads the model from a directory containing `config.json` and
    /// `model.safetensors`.
    pub fn from_dir(model_dir: impl AsRef<Path>, device: Device) -> LayoutResult<Self> {
        let model_dir = model_dir.as_ref();
        info!("loading donut model from '{}'", model_dir.display());

        let cfg = DonutConfig::from_path(model_dir.join("config.json"))?;
        let dtype = device.bf16_default_to_f32();

        let vb = unsafe {
            candle_nn::VarBuilder::from_mmaped_safetensors(
                &[model_dir.join("model.safetensors")],
                dtype,
                &device,
            )
            .map_err(|e| {
                LayoutError::model_load(
                    format!("loading '{}'", model_dir.join("model.safetensors").display()),
                    e,
                )
            })?
        };

        let encoder = DonutEncoder::load(&cfg, vb.pp("encoder"))?;
        let decoder = DonutDecoder::load(&cfg, vb.pp("decoder"))?;
        let lm_head = candle_nn::linear_no_bias(cfg.d_model, cfg.vocab_size, vb.pp("lm_head"))
            .map_err(|e| LayoutError::model_load("loading lm_head", e))?;

        Ok(Self {
            device,
            dtype,
            cfg,
            encoder,
            decoder,
            lm_head,
        })
    }

    /// Model configuration.
    pub fn config(&self) -> &DonutConfig {
        &self.cfg
    }

    /// The device the model runs on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Runs greedy decoding over an encoded image and returns the full
    /// framed token sequence: the start sentinel, the generated tokens, and
    /// the end sentinel when generation terminated before `max_length`.
    pub fn generate_ids(&self, pixel_values: &Tensor) -> LayoutResult<Vec<u32>> {
        let encoder_hidden_states = self.encoder.forward(pixel_values)?;

        let mut kv_cache: Vec<KvCache> = (0..self.cfg.decoder_layers)
            .map(|_| KvCache::default())
            .collect();

        let mut tokens: Vec<u32> = vec![self.cfg.decoder_start_token_id];
        let mut position_offset = 0usize;

        for _ in 0..self.cfg.max_length {
            let current_len = tokens.len();
            let input_ids = if position_offset == 0 {
                Tensor::new(&tokens[..], &self.device)
                    .map_err(|e| candle_err("DonutModel", "create input_ids", e))?
                    .unsqueeze(0)
                    .map_err(|e| candle_err("DonutModel", "unsqueeze input_ids", e))?
            } else {
                let last = tokens[current_len - 1];
                Tensor::new(&[last], &self.device)
                    .map_err(|e| candle_err("DonutModel", "create input_id", e))?
                    .unsqueeze(0)
                    .map_err(|e| candle_err("DonutModel", "unsqueeze input_id", e))?
            };

            let self_attn_mask = if position_offset == 0 && current_len > 1 {
                Some(create_causal_mask(current_len, &self.device, self.dtype)?)
            } else {
                None
            };

            let hidden_states = self.decoder.forward(
                &input_ids,
                &encoder_hidden_states,
                position_offset,
                self_attn_mask.as_ref(),
                Some(&mut kv_cache),
            )?;

            let (_, seq_len, _) = hidden_states
                .dims3()
                .map_err(|e| candle_err("DonutModel", "get hidden dims", e))?;
            let last_hidden = hidden_states
                .i((.., seq_len - 1, ..))
                .map_err(|e| candle_err("DonutModel", "select last hidden", e))?;
            let logits = self
                .lm_head
                .forward(&last_hidden)
                .map_err(|e| candle_err("DonutModel", "lm_head forward", e))?;

            let next_token = logits
                .argmax(D::Minus1)
                .map_err(|e| candle_err("DonutModel", "argmax", e))?
                .flatten_all()
                .map_err(|e| candle_err("DonutModel", "flatten argmax", e))?
                .get(0)
                .map_err(|e| candle_err("DonutModel", "get next token", e))?
                .to_scalar::<u32>()
                .map_err(|e| candle_err("DonutModel", "to_scalar", e))?;

            tokens.push(next_token);
            if next_token == self.cfg.eos_token_id {
                break;
            }

            if position_offset == 0 {
                position_offset = current_len;
            } else {
                position_offset += 1;
            }
        }

        Ok(tokens)
    }
}

impl SequenceGenerator for DonutModel {
    fn generate(&self, pixel_values: &Tensor) -> LayoutResult<Vec<u32>> {
        self.generate_ids(pixel_values)
    }

    fn start_token_id(&self) -> u32 {
        self.cfg.decoder_start_token_id
    }

    fn end_token_id(&self) -> u32 {
        self.cfg.eos_token_id
    }
}
