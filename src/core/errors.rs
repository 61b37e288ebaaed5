//! Error types for the layout inference pipeline.
//!
//! The error taxonomy separates load-time failures (fatal to a model
//! instance) from per-image failures, and keeps transient engine failures an
//! internal category that is converted into empty results at the component
//! boundary rather than surfaced to callers.

use thiserror::Error;

/// Errors surfaced by the layout inference pipeline.
#[derive(Error, Debug)]
pub enum LayoutError {
    /// Weights could not be resolved, or a runtime, tokenizer, or image
    /// processor could not be constructed. Fatal to the model instance:
    /// `predict` must not be called afterward.
    #[error("model load failed: {context}")]
    ModelLoad {
        /// What was being loaded when the failure occurred.
        context: String,
        /// The underlying error, if one exists.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// `predict` was invoked before `initialize`. Programmer error, surfaced
    /// immediately and never retried.
    #[error("model '{model}' used before initialize")]
    NotInitialized {
        /// Name of the offending model.
        model: String,
    },

    /// A detected class id has no entry in the label map. Indicates a
    /// mismatched model/label-map pairing; surfaced loudly rather than
    /// silently skipped, since skipping would corrupt downstream typing.
    #[error("class id {class_id} has no entry in the label map")]
    LabelResolution {
        /// The unresolved class id.
        class_id: i64,
    },

    /// An unexpected inference failure. Transient engine failures on
    /// degenerate inputs are handled inside `predict` and never reach this
    /// variant.
    #[error("inference failed: {context}")]
    Inference {
        /// Additional context about where inference failed.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Error occurred while loading an image.
    #[error("image load")]
    ImageLoad(#[source] image::ImageError),

    /// Error from tensor shape operations.
    #[error("tensor operation")]
    Tensor(#[from] ndarray::ShapeError),

    /// IO error.
    #[error("io")]
    Io(#[from] std::io::Error),

    /// Configuration problem (missing registry key, malformed config file).
    #[error("configuration: {message}")]
    Config {
        /// A message describing the configuration error.
        message: String,
    },
}

impl LayoutError {
    /// Creates a load-time error with an underlying cause.
    pub fn model_load(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ModelLoad {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a load-time error without an underlying cause.
    pub fn model_load_message(context: impl Into<String>) -> Self {
        Self::ModelLoad {
            context: context.into(),
            source: None,
        }
    }

    /// Creates an inference error with context.
    pub fn inference(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Inference {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Creates an inference error from an already-boxed cause.
    pub fn inference_boxed(
        context: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Inference {
            context: context.into(),
            source,
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<image::ImageError> for LayoutError {
    fn from(error: image::ImageError) -> Self {
        Self::ImageLoad(error)
    }
}

/// Convenient result alias for layout inference operations.
pub type LayoutResult<T> = Result<T, LayoutError>;
