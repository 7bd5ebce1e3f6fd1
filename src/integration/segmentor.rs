//! Segmentation model boundary.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::tracking::{Frame, Mask};

/// Whether a clicked point marks the object or the background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointLabel {
    Negative,
    Positive,
}

impl PointLabel {
    /// Numeric label as segmentation models expect it (0 = negative, 1 = positive).
    pub fn as_model_label(&self) -> u8 {
        match self {
            Self::Negative => 0,
            Self::Positive => 1,
        }
    }
}

/// Prompt handed to a `Segmentor`.
#[derive(Debug, Clone, PartialEq)]
pub enum Prompt {
    /// Clicked points in pixel coordinates, optionally with low-resolution
    /// logits of a previous prediction as a mask prior.
    Point {
        coords: Vec<(f32, f32)>,
        labels: Vec<PointLabel>,
        mask_prior: Option<Array2<f32>>,
    },
    /// Box given by two opposite corners.
    Box {
        corner0: (f32, f32),
        corner1: (f32, f32),
    },
    /// Text-grounded detection followed by per-box segmentation.
    Text {
        caption: String,
        box_threshold: f32,
        text_threshold: f32,
    },
    /// Automatic segmentation of every object on a point grid.
    Everything { points_per_side: u32 },
}

impl Prompt {
    pub fn everything(points_per_side: u32) -> Self {
        Self::Everything { points_per_side }
    }

    /// Whether the model answers with alternatives for a single object
    /// (as opposed to one mask with many provisional labels).
    pub fn is_single_object(&self) -> bool {
        match self {
            Self::Point { .. } | Self::Box { .. } => true,
            Self::Text { .. } | Self::Everything { .. } => false,
        }
    }
}

/// One model output.
#[derive(Debug, Clone, PartialEq)]
pub struct Segmentation {
    /// For single-object prompts any non-zero pixel belongs to the object;
    /// otherwise labels are provisional per-object ids.
    pub mask: Mask,
    /// Model-reported confidence
    pub score: f32,
    /// Raw logits, usable as `mask_prior` of a follow-up point prompt
    pub logits: Option<Array2<f32>>,
}

impl Segmentation {
    /// Binary view: every labeled pixel.
    pub fn foreground(&self) -> Array2<bool> {
        self.mask.labels().mapv(|l| l != 0)
    }
}

/// Pick the highest-scoring output.
pub fn best_segmentation(outputs: Vec<Segmentation>) -> Option<Segmentation> {
    outputs
        .into_iter()
        .max_by(|a, b| a.score.total_cmp(&b.score))
}

/// Trait for segmentation model backends.
///
/// `set_image` computes the image embedding once; `segment` may then be
/// called any number of times against that image without resubmitting
/// pixels. `reset_image` drops the embedding and any cached device memory.
///
/// # Example
///
/// ```ignore
/// use segtrack_rs::{Frame, Prompt, Segmentation, Segmentor};
///
/// struct MySam { /* model handles */ }
///
/// impl Segmentor for MySam {
///     type Error = std::io::Error;
///
///     fn set_image(&mut self, image: &Frame) -> Result<(), Self::Error> { Ok(()) }
///     fn reset_image(&mut self) {}
///     fn segment(&mut self, prompt: &Prompt) -> Result<Vec<Segmentation>, Self::Error> {
///         Ok(vec![])
///     }
/// }
/// ```
pub trait Segmentor {
    /// Error type for model failures.
    type Error: std::fmt::Display;

    /// Embed `image` for subsequent prompts.
    fn set_image(&mut self, image: &Frame) -> Result<(), Self::Error>;

    /// Release the current embedding.
    fn reset_image(&mut self);

    /// Run the model on the embedded image.
    ///
    /// Point and box prompts return alternative masks for one object; text and
    /// everything prompts return a single segmentation whose labels are
    /// provisional object ids.
    fn segment(&mut self, prompt: &Prompt) -> Result<Vec<Segmentation>, Self::Error>;
}

/// Segmentor decorator that skips re-embedding a frame that is already embedded.
#[derive(Debug)]
pub struct EmbeddingCache<S> {
    inner: S,
    embedded: Option<usize>,
}

impl<S: Segmentor> EmbeddingCache<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            embedded: None,
        }
    }

    /// Index of the frame whose embedding is currently held.
    pub fn embedded_frame(&self) -> Option<usize> {
        self.embedded
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Segmentor> Segmentor for EmbeddingCache<S> {
    type Error = S::Error;

    fn set_image(&mut self, image: &Frame) -> Result<(), Self::Error> {
        if self.embedded == Some(image.index()) {
            return Ok(());
        }
        self.embedded = None;
        self.inner.set_image(image)?;
        self.embedded = Some(image.index());
        Ok(())
    }

    fn reset_image(&mut self) {
        self.inner.reset_image();
        self.embedded = None;
    }

    fn segment(&mut self, prompt: &Prompt) -> Result<Vec<Segmentation>, Self::Error> {
        self.inner.segment(prompt)
    }
}
