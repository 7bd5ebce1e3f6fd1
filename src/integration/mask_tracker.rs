//! Temporal mask propagation boundary.

use crate::tracking::{Frame, Mask};

/// Trait for temporal tracking backends.
///
/// The tracker owns its per-object memory. It is seeded with reference
/// frames through `add_reference` and asked for the next frame's mask through
/// `propagate`, which also receives the session's current mask as the
/// reference the prediction should continue from.
pub trait MaskTracker {
    /// Error type for model failures, including device out-of-memory.
    type Error: std::fmt::Display;

    /// Seed (or refresh) the reference state from a frame and its final mask.
    fn add_reference(&mut self, frame: &Frame, mask: &Mask) -> Result<(), Self::Error>;

    /// Predict the mask of `frame` from the held state and the previous mask.
    fn propagate(&mut self, frame: &Frame, reference: &Mask) -> Result<Mask, Self::Error>;

    /// Drop all per-object memory.
    fn restart(&mut self);

    /// Free transient buffers left over from the last call.
    fn release_cache(&mut self) {}
}
