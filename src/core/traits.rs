//! The shared model contract.
//!
//! Both model families (object detection and token generation) are
//! polymorphic over `{initialize, predict}`. Initialization is
//! family-specific and lives on the concrete types; this trait captures the
//! capability callers depend on: a readiness check and `predict`. The
//! provided [`ensure_initialized`](LayoutModel::ensure_initialized) check is
//! the shared precondition every family runs before its pipeline, so
//! use-before-initialize surfaces uniformly as
//! [`LayoutError::NotInitialized`].

use crate::core::errors::{LayoutError, LayoutResult};
use crate::domain::LayoutElement;
use image::RgbImage;

/// A model that turns a page image into an ordered sequence of typed layout
/// elements.
///
/// Callers can hold `Arc<dyn LayoutModel>` and swap the detection and
/// generation families without branching.
pub trait LayoutModel: Send + Sync + std::fmt::Debug {
    /// A short human-readable name, used in logs and errors.
    fn name(&self) -> &str;

    /// Whether `initialize` has completed successfully.
    fn is_initialized(&self) -> bool;

    /// Runs the family-specific preprocess/infer/postprocess pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::NotInitialized`] when called before
    /// `initialize`. Per-image transient engine failures do not error; they
    /// degrade to an empty element list.
    fn predict(&self, image: &RgbImage) -> LayoutResult<Vec<LayoutElement>>;

    /// Shared precondition check run by every family's `predict`.
    fn ensure_initialized(&self) -> LayoutResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(LayoutError::NotInitialized {
                model: self.name().to_string(),
            })
        }
    }
}
