//! Token-generation model for document layout.
//!
//! Wraps a vision encoder-decoder: the image is preprocessed into pixel
//! values, the sequence model greedily generates a token stream, and the
//! detokenized stream's `<s_TYPE>…</s_TYPE>` markers are decoded into typed
//! elements. Generation types and transcribes regions but does not localize
//! them; only the detection family produces coordinates.

use candle_core::{DType, Device, Tensor};
use std::path::Path;
use tokenizers::Tokenizer;
use tracing::info;

use crate::core::errors::{LayoutError, LayoutResult};
use crate::core::traits::LayoutModel;
use crate::domain::LayoutElement;
use crate::processors::decode_tagged_text;
use crate::vl::donut::{DonutImageProcessor, DonutModel};

/// The generation backend behind the pipeline.
///
/// The pipeline only needs framed token sequences; how they are produced
/// (greedy, beam, a different architecture entirely) is the backend's
/// business. Callers can wire in their own implementation through
/// [`DonutExtractionModel::from_parts`].
pub trait SequenceGenerator: Send + Sync {
    /// Generates the raw framed token sequence for preprocessed pixel
    /// values, including the start and end sentinels.
    fn generate(&self, pixel_values: &Tensor) -> LayoutResult<Vec<u32>>;

    /// Sentinel id that opens every generated sequence.
    fn start_token_id(&self) -> u32;

    /// Sentinel id that terminates generation.
    fn end_token_id(&self) -> u32;
}

/// Drops the leading start sentinel and the trailing end sentinel framing a
/// generated sequence. A missing end sentinel (truncated generation) is
/// tolerated.
pub fn strip_sentinels(mut tokens: Vec<u32>, start_id: u32, end_id: u32) -> Vec<u32> {
    if tokens.first() == Some(&start_id) {
        tokens.remove(0);
    }
    if tokens.last() == Some(&end_id) {
        tokens.pop();
    }
    tokens
}

struct GenerationState {
    tokenizer: Tokenizer,
    processor: DonutImageProcessor,
    generator: Box<dyn SequenceGenerator>,
    device: Device,
    dtype: DType,
}

/// Donut-style element extraction model.
#[derive(Default)]
pub struct DonutExtractionModel {
    state: Option<GenerationState>,
}

impl std::fmt::Debug for DonutExtractionModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DonutExtractionModel")
            .field("initialized", &self.state.is_some())
            .finish()
    }
}

impl DonutExtractionModel {
    /// Creates an uninitialized model shell. Call
    /// [`initialize`](Self::initialize) before `predict`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs the tokenizer, the image preprocessor, and the sequence
    /// model.
    ///
    /// * `tokenizer_path` - path to a `tokenizer.json`
    /// * `model_dir` - model directory holding `config.json` and
    ///   `model.safetensors`
    /// * `image_processor_config` - optional path to a processor config;
    ///   defaults apply when absent
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::ModelLoad`] on any construction failure.
    pub fn initialize(
        &mut self,
        tokenizer_path: &Path,
        model_dir: &Path,
        image_processor_config: Option<&Path>,
    ) -> LayoutResult<()> {
        info!(
            "loading element extraction model from '{}'",
            model_dir.display()
        );
        let tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|e| LayoutError::ModelLoad {
            context: format!("loading tokenizer '{}'", tokenizer_path.display()),
            source: Some(e),
        })?;
        let processor = match image_processor_config {
            Some(path) => DonutImageProcessor::from_path(path)?,
            None => DonutImageProcessor::default(),
        };

        let device = Device::Cpu;
        let dtype = device.bf16_default_to_f32();
        let model = DonutModel::from_dir(model_dir, device.clone())?;

        self.state = Some(GenerationState {
            tokenizer,
            processor,
            generator: Box::new(model),
            device,
            dtype,
        });
        Ok(())
    }

    /// Assembles an initialized model from already-constructed parts,
    /// allowing a caller to wire in its own generation backend.
    pub fn from_parts(
        tokenizer: Tokenizer,
        processor: DonutImageProcessor,
        generator: Box<dyn SequenceGenerator>,
    ) -> Self {
        let device = Device::Cpu;
        let dtype = device.bf16_default_to_f32();
        Self {
            state: Some(GenerationState {
                tokenizer,
                processor,
                generator,
                device,
                dtype,
            }),
        }
    }

    fn state(&self) -> LayoutResult<&GenerationState> {
        self.state.as_ref().ok_or_else(|| LayoutError::NotInitialized {
            model: self.name().to_string(),
        })
    }

    /// Preprocesses the image and runs generation, returning the token
    /// sequence with the framing sentinels stripped.
    pub fn predict_tokens(&self, image: &image::RgbImage) -> LayoutResult<Vec<u32>> {
        let state = self.state()?;
        let pixel_values = state
            .processor
            .preprocess(image, &state.device, state.dtype)?;
        let tokens = state.generator.generate(&pixel_values)?;
        Ok(strip_sentinels(
            tokens,
            state.generator.start_token_id(),
            state.generator.end_token_id(),
        ))
    }

    /// Detokenizes a generated sequence and decodes its tag structure into
    /// typed elements. Tag imbalance degrades gracefully; it is never an
    /// error.
    pub fn postprocess(&self, tokens: &[u32]) -> LayoutResult<Vec<LayoutElement>> {
        let state = self.state()?;
        // Keep "special" tokens: the structural markers are part of the
        // vocabulary and must survive detokenization.
        let decoded = state
            .tokenizer
            .decode(tokens, false)
            .map_err(|e| LayoutError::inference_boxed("detokenizing generated sequence", e))?;
        Ok(decode_tagged_text(&decoded))
    }
}

impl LayoutModel for DonutExtractionModel {
    fn name(&self) -> &str {
        "donut_extraction"
    }

    fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    fn predict(&self, image: &image::RgbImage) -> LayoutResult<Vec<LayoutElement>> {
        self.ensure_initialized()?;
        let tokens = self.predict_tokens(image)?;
        self.postprocess(&tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vl::donut::DonutImageProcessorConfig;
    use image::RgbImage;
    use std::collections::HashMap;
    use tokenizers::models::wordlevel::WordLevel;

    const START: u32 = 0;
    const END: u32 = 2;

    #[derive(Debug)]
    struct ScriptedGenerator {
        tokens: Vec<u32>,
    }

    impl SequenceGenerator for ScriptedGenerator {
        fn generate(&self, _pixel_values: &Tensor) -> LayoutResult<Vec<u32>> {
            Ok(self.tokens.clone())
        }

        fn start_token_id(&self) -> u32 {
            START
        }

        fn end_token_id(&self) -> u32 {
            END
        }
    }

    fn test_tokenizer() -> Tokenizer {
        let vocab: HashMap<String, u32> = [
            ("<s>", START),
            ("[UNK]", 1),
            ("</s>", END),
            ("<s_Title>", 10),
            ("Hello", 11),
            ("</s_Title>", 12),
            ("<s_Text>", 13),
            ("world", 14),
        ]
        .into_iter()
        .map(|(token, id)| (token.to_string(), id))
        .collect();
        let model = WordLevel::builder()
            .vocab(vocab.into_iter().collect())
            .unk_token("[UNK]".to_string())
            .build()
            .unwrap();
        Tokenizer::new(model)
    }

    fn scripted_model(tokens: Vec<u32>) -> DonutExtractionModel {
        let processor = DonutImageProcessor::new(DonutImageProcessorConfig {
            height: 16,
            width: 16,
            ..Default::default()
        });
        DonutExtractionModel::from_parts(
            test_tokenizer(),
            processor,
            Box::new(ScriptedGenerator { tokens }),
        )
    }

    #[test]
    fn predict_before_initialize_fails() {
        let model = DonutExtractionModel::new();
        let image = RgbImage::new(4, 4);
        match model.predict(&image) {
            Err(LayoutError::NotInitialized { model }) => {
                assert_eq!(model, "donut_extraction");
            }
            other => panic!("expected NotInitialized, got {other:?}"),
        }
    }

    #[test]
    fn strip_sentinels_removes_framing_tokens() {
        assert_eq!(
            strip_sentinels(vec![START, 5, 4, 3, 2, 1, END], START, END),
            vec![5, 4, 3, 2, 1]
        );
    }

    #[test]
    fn strip_sentinels_tolerates_truncated_generation() {
        // No end sentinel: only the start sentinel goes.
        assert_eq!(strip_sentinels(vec![START, 7, 8], START, END), vec![7, 8]);
        assert_eq!(strip_sentinels(Vec::new(), START, END), Vec::<u32>::new());
    }

    #[test]
    fn predict_tokens_strips_sentinels_from_backend_output() {
        let model = scripted_model(vec![START, 10, 11, 12, END]);
        let image = RgbImage::new(16, 16);
        assert_eq!(model.predict_tokens(&image).unwrap(), vec![10, 11, 12]);
    }

    #[test]
    fn predict_decodes_generated_markers_into_typed_elements() {
        let model = scripted_model(vec![START, 10, 11, 12, 13, 14, END]);
        let image = RgbImage::new(16, 16);

        let elements = model.predict(&image).unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].element_type.as_deref(), Some("Title"));
        assert_eq!(elements[0].text.as_deref(), Some("Hello"));
        assert_eq!(elements[1].element_type.as_deref(), Some("Text"));
        assert_eq!(elements[1].text.as_deref(), Some("world"));
        assert!(elements.iter().all(|e| !e.has_location()));
    }

    #[test]
    fn truncated_generation_still_yields_the_open_region() {
        // Generation stopped before emitting </s_Text> and the end
        // sentinel.
        let model = scripted_model(vec![START, 10, 11, 12, 13, 14]);
        let image = RgbImage::new(16, 16);

        let elements = model.predict(&image).unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[1].element_type.as_deref(), Some("Text"));
        assert_eq!(elements[1].text.as_deref(), Some("world"));
    }
}
