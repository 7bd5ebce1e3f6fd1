//! Burn inference backend for promptable segmentation.
//!
//! This module provides a `BurnSegmentor` that implements `Segmentor`
//! for segmentation models built with the Burn framework. The image encoder
//! runs once per embedded frame; every prompt only runs the mask decoder.
//!
//! # Example
//!
//! ```ignore
//! use segtrack_rs::integration::{BurnMaskModel, BurnSegmentor, RawMask};
//! use burn::backend::NdArray;
//!
//! struct MySamModel { /* ... */ }
//!
//! impl BurnMaskModel<NdArray> for MySamModel {
//!     fn encode(&self, image: Tensor<NdArray, 4>) -> Tensor<NdArray, 4> { /* ... */ }
//!     fn decode(&self, embedding: &Tensor<NdArray, 4>, prompt: &Prompt) -> Result<Vec<RawMask>, String> { /* ... */ }
//! }
//!
//! let segmentor = BurnSegmentor::new(MySamModel::load("sam_vit_b.bin"), Default::default());
//! ```

use burn::prelude::*;
use burn::tensor::Tensor;
use ndarray::Array2;

use super::segmentor::{Prompt, Segmentation, Segmentor};
use crate::tracking::{Frame, Mask, ObjectId};

/// Error type for Burn segmentation failures.
#[derive(Debug, Clone)]
pub enum BurnSegmentorError {
    /// `segment` was called without an embedded frame.
    NoImage,
    /// Decoder output does not match the embedded frame.
    InvalidMaskDimensions {
        expected: (usize, usize),
        got: (usize, usize),
    },
    /// Model inference failed.
    InferenceError(String),
}

impl std::fmt::Display for BurnSegmentorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoImage => write!(f, "No image embedded"),
            Self::InvalidMaskDimensions { expected, got } => {
                write!(
                    f,
                    "Invalid mask dimensions: expected {:?}, got {:?}",
                    expected, got
                )
            }
            Self::InferenceError(msg) => write!(f, "Inference error: {}", msg),
        }
    }
}

impl std::error::Error for BurnSegmentorError {}

/// Raw decoder output at frame resolution.
#[derive(Debug, Clone)]
pub struct RawMask {
    /// Row-major logits, `height * width` values
    pub logits: Vec<f32>,
    pub height: usize,
    pub width: usize,
    /// Predicted mask quality
    pub score: f32,
}

/// Trait for Burn-based segmentation models.
///
/// Implement this trait for your specific model architecture.
pub trait BurnMaskModel<B: Backend>: Send + Sync {
    /// Image encoder. Input is `[1, 3, height, width]` in `[0, 1]`.
    fn encode(&self, image: Tensor<B, 4>) -> Tensor<B, 4>;

    /// Mask decoder for one prompt.
    ///
    /// Point and box prompts return alternatives for one object; text and
    /// everything prompts return one mask per detected object.
    fn decode(&self, embedding: &Tensor<B, 4>, prompt: &Prompt) -> Result<Vec<RawMask>, String>;

    /// Logit above which a pixel is foreground.
    fn mask_threshold(&self) -> f32 {
        0.0
    }
}

/// Burn-based segmentor implementing `Segmentor`.
pub struct BurnSegmentor<B: Backend, M: BurnMaskModel<B>> {
    model: M,
    device: B::Device,
    embedding: Option<(Tensor<B, 4>, (usize, usize))>,
}

impl<B: Backend, M: BurnMaskModel<B>> BurnSegmentor<B, M> {
    /// Create a new Burn segmentor with the given model and device.
    pub fn new(model: M, device: B::Device) -> Self {
        Self {
            model,
            device,
            embedding: None,
        }
    }

    pub fn is_embedded(&self) -> bool {
        self.embedding.is_some()
    }

    /// Convert an HWC frame into a normalized `[1, 3, H, W]` tensor.
    pub fn preprocess(&self, image: &Frame) -> Tensor<B, 4> {
        let (height, width) = image.dim();
        let data: Vec<f32> = image
            .pixels()
            .view()
            .permuted_axes([2, 0, 1])
            .iter()
            .map(|&x| x as f32 / 255.0)
            .collect();

        Tensor::<B, 1>::from_floats(data.as_slice(), &self.device).reshape([1, 3, height, width])
    }

    fn to_logits(&self, raw: RawMask, dim: (usize, usize)) -> Result<Array2<f32>, BurnSegmentorError> {
        if (raw.height, raw.width) != dim || raw.logits.len() != dim.0 * dim.1 {
            return Err(BurnSegmentorError::InvalidMaskDimensions {
                expected: dim,
                got: (raw.height, raw.width),
            });
        }
        Array2::from_shape_vec(dim, raw.logits)
            .map_err(|e| BurnSegmentorError::InferenceError(e.to_string()))
    }

    /// Convert decoder outputs into segmentations.
    fn postprocess(
        &self,
        raw_masks: Vec<RawMask>,
        dim: (usize, usize),
        single_object: bool,
    ) -> Result<Vec<Segmentation>, BurnSegmentorError> {
        let threshold = self.model.mask_threshold();

        if single_object {
            return raw_masks
                .into_iter()
                .map(|raw| {
                    let score = raw.score;
                    let logits = self.to_logits(raw, dim)?;
                    let labels = logits.mapv(|v| ObjectId::from(v > threshold));
                    Ok(Segmentation {
                        mask: Mask::from_labels(labels),
                        score,
                        logits: Some(logits),
                    })
                })
                .collect();
        }

        // Paint higher-scoring objects first; later ones only fill background.
        let mut ranked = raw_masks;
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        let mut labels = Array2::<ObjectId>::zeros(dim);
        let mut score = 0.0f32;
        for (i, raw) in ranked.into_iter().enumerate() {
            let Ok(label) = ObjectId::try_from(i + 1) else {
                break;
            };
            score = score.max(raw.score);
            let logits = self.to_logits(raw, dim)?;
            ndarray::Zip::from(&mut labels).and(&logits).for_each(|l, &v| {
                if *l == 0 && v > threshold {
                    *l = label;
                }
            });
        }
        Ok(vec![Segmentation {
            mask: Mask::from_labels(labels),
            score,
            logits: None,
        }])
    }
}

impl<B: Backend, M: BurnMaskModel<B>> Segmentor for BurnSegmentor<B, M> {
    type Error = BurnSegmentorError;

    fn set_image(&mut self, image: &Frame) -> Result<(), Self::Error> {
        let tensor = self.preprocess(image);
        let embedding = self.model.encode(tensor);
        self.embedding = Some((embedding, image.dim()));
        Ok(())
    }

    fn reset_image(&mut self) {
        self.embedding = None;
    }

    fn segment(&mut self, prompt: &Prompt) -> Result<Vec<Segmentation>, Self::Error> {
        let (embedding, dim) = self.embedding.as_ref().ok_or(BurnSegmentorError::NoImage)?;
        let dim = *dim;
        let raw_masks = self
            .model
            .decode(embedding, prompt)
            .map_err(BurnSegmentorError::InferenceError)?;
        self.postprocess(raw_masks, dim, prompt.is_single_object())
    }
}
