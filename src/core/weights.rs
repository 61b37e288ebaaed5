//! Weight acquisition.
//!
//! Registry entries describe where a model's weights live without touching
//! the network or the filesystem; resolution to a local path happens at
//! materialization time. Failure to resolve is a load-time error, never a
//! predict-time error.

use crate::core::errors::{LayoutError, LayoutResult};
use hf_hub::api::sync::ApiBuilder;
use std::path::PathBuf;
use tracing::info;

/// Where a model's weights come from.
#[derive(Debug, Clone)]
pub enum WeightSource {
    /// A file already present on the local filesystem.
    Path(PathBuf),
    /// A file in a Hugging Face Hub repository, downloaded into the local
    /// cache on first resolution.
    HuggingFace {
        /// Repository id, e.g. `unstructuredio/detectron2_faster_rcnn_R_50_FPN_3x`.
        repo: String,
        /// File name within the repository, e.g. `model.onnx`.
        filename: String,
    },
}

impl WeightSource {
    /// Creates a local-path source.
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    /// Creates a Hugging Face Hub source.
    pub fn hugging_face(repo: impl Into<String>, filename: impl Into<String>) -> Self {
        Self::HuggingFace {
            repo: repo.into(),
            filename: filename.into(),
        }
    }

    /// Resolves the source to a local file path, downloading into the hub
    /// cache if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::ModelLoad`] when the file does not exist or
    /// the download fails.
    pub fn resolve(&self) -> LayoutResult<PathBuf> {
        match self {
            Self::Path(path) => {
                if path.is_file() {
                    Ok(path.clone())
                } else {
                    Err(LayoutError::model_load_message(format!(
                        "weights not found at '{}'",
                        path.display()
                    )))
                }
            }
            Self::HuggingFace { repo, filename } => {
                info!("resolving weights {}/{} via hub cache", repo, filename);
                let api = ApiBuilder::new()
                    .with_progress(true)
                    .build()
                    .map_err(|e| LayoutError::model_load("building hub client", e))?;
                api.model(repo.clone()).get(filename).map_err(|e| {
                    LayoutError::model_load(format!("fetching {repo}/{filename}"), e)
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_local_path_is_a_load_error() {
        let source = WeightSource::local("/definitely/not/here/model.onnx");
        match source.resolve() {
            Err(LayoutError::ModelLoad { .. }) => {}
            other => panic!("expected ModelLoad error, got {other:?}"),
        }
    }

    #[test]
    fn existing_local_path_resolves() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let source = WeightSource::local(file.path());
        assert_eq!(source.resolve().unwrap(), file.path());
    }
}
