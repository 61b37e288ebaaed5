//! Lazy model registry.
//!
//! Entries are declared eagerly and cheaply; the expensive work (weight
//! download, session construction, safetensors loads) is deferred until the
//! first `get` for that entry and then memoized for the process lifetime.
//! Concurrent first access materializes at most once: late callers block on
//! the in-flight initialization and share its result.
//!
//! The registry is an explicit value owned by the caller, not ambient global
//! state.

use crate::core::errors::{LayoutError, LayoutResult};
use crate::core::traits::LayoutModel;
use crate::core::weights::WeightSource;
use crate::domain::default_label_map;
use crate::models::detection::DetectronOnnxModel;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;

type ModelFactory = Box<dyn Fn() -> LayoutResult<Arc<dyn LayoutModel>> + Send + Sync>;

/// A deferred model: a factory plus a materialize-once cell.
///
/// The factory runs at most once successfully; a failed materialization
/// leaves the cell empty so a later access may retry.
pub struct LazyModel {
    factory: ModelFactory,
    cell: OnceCell<Arc<dyn LayoutModel>>,
}

impl LazyModel {
    /// Wraps a factory in a memoizing cell.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> LayoutResult<Arc<dyn LayoutModel>> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            cell: OnceCell::new(),
        }
    }

    /// Returns the materialized model, invoking the factory on first access.
    pub fn get(&self) -> LayoutResult<Arc<dyn LayoutModel>> {
        self.cell.get_or_try_init(|| (self.factory)()).cloned()
    }

    /// Whether the entry has been materialized.
    pub fn is_materialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl std::fmt::Debug for LazyModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyModel")
            .field("materialized", &self.is_materialized())
            .finish()
    }
}

/// Named configuration entries describing how to materialize models.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: HashMap<String, LazyModel>,
}

impl ModelRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry preloaded with the stock entries.
    ///
    /// `detectron2_onnx`: the five-class Faster R-CNN layout model, weights
    /// fetched from the hub on first use, confidence threshold 0.8.
    pub fn with_default_entries() -> Self {
        let mut registry = Self::new();
        registry.register("detectron2_onnx", || {
            let weights = WeightSource::hugging_face(
                "unstructuredio/detectron2_faster_rcnn_R_50_FPN_3x",
                "model.onnx",
            )
            .resolve()?;
            let mut model = DetectronOnnxModel::new();
            model.initialize(&weights, default_label_map(), Some(0.8))?;
            Ok(Arc::new(model) as Arc<dyn LayoutModel>)
        });
        registry
    }

    /// Registers a deferred factory under `key`, replacing any previous
    /// entry.
    pub fn register<F>(&mut self, key: impl Into<String>, factory: F)
    where
        F: Fn() -> LayoutResult<Arc<dyn LayoutModel>> + Send + Sync + 'static,
    {
        self.models.insert(key.into(), LazyModel::new(factory));
    }

    /// Returns the model for `key`, materializing it on first access.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::Config`] for an unknown key, or whatever
    /// load-time error the factory produced.
    pub fn get(&self, key: &str) -> LayoutResult<Arc<dyn LayoutModel>> {
        let entry = self.models.get(key).ok_or_else(|| {
            LayoutError::config(format!("no model registered under '{key}'"))
        })?;
        entry.get()
    }

    /// Registered keys, in arbitrary order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// Whether `key` has an entry (materialized or not).
    pub fn contains(&self, key: &str) -> bool {
        self.models.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LayoutElement;
    use image::RgbImage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct StubModel;

    impl LayoutModel for StubModel {
        fn name(&self) -> &str {
            "stub"
        }

        fn is_initialized(&self) -> bool {
            true
        }

        fn predict(&self, _image: &RgbImage) -> LayoutResult<Vec<LayoutElement>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn unknown_key_is_a_config_error() {
        let registry = ModelRegistry::new();
        match registry.get("nope") {
            Err(LayoutError::Config { .. }) => {}
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn factory_runs_lazily_and_only_once() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        let mut registry = ModelRegistry::new();
        registry.register("stub", || {
            CALLS.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubModel) as Arc<dyn LayoutModel>)
        });
        assert_eq!(CALLS.load(Ordering::SeqCst), 0);

        registry.get("stub").unwrap();
        registry.get("stub").unwrap();
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_first_access_materializes_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ModelRegistry::new();
        {
            let calls = Arc::clone(&calls);
            registry.register("stub", move || {
                calls.fetch_add(1, Ordering::SeqCst);
                // Widen the race window so threads really do collide.
                std::thread::sleep(std::time::Duration::from_millis(20));
                Ok(Arc::new(StubModel) as Arc<dyn LayoutModel>)
            });
        }
        let registry = Arc::new(registry);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.get("stub").is_ok())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_materialization_leaves_the_cell_empty() {
        let mut registry = ModelRegistry::new();
        registry.register("broken", || {
            Err(LayoutError::model_load_message("weights unavailable"))
        });

        assert!(registry.get("broken").is_err());
        let entry = registry.models.get("broken").unwrap();
        assert!(!entry.is_materialized());
    }

    #[test]
    fn default_entries_are_declared_without_loading() {
        let registry = ModelRegistry::with_default_entries();
        assert!(registry.contains("detectron2_onnx"));
        // Declaring the entry must not have materialized anything.
        assert!(!registry.models["detectron2_onnx"].is_materialized());
    }
}
