//! Integration module for connecting segmentation and tracking backends with a session.
//!
//! This module provides the collaborator traits (`Segmentor`, `MaskTracker`,
//! `Renderer`), frame sources, output sinks and the per-frame pipeline.

mod builder;
mod frame_source;
mod mask_tracker;
mod pipeline;
mod render;
mod scope;
mod segmentor;
mod sink;

pub use builder::BoxPromptBuilder;
pub use frame_source::{FrameSource, ImageSequence};
pub use mask_tracker::MaskTracker;
pub use pipeline::{FramePipeline, FrameWarning, RunReport, RunState, StopSignal};
pub use render::Renderer;
pub use scope::{EmbeddedImage, TrackerScope};
pub use segmentor::{EmbeddingCache, PointLabel, Prompt, Segmentation, Segmentor, best_segmentation};
pub use sink::{MaskArchive, MemorySink, OutputSink, TruncationMarker};

#[cfg(feature = "burn-backend")]
mod burn_backend;

#[cfg(feature = "burn-backend")]
pub use burn_backend::{BurnMaskModel, BurnSegmentor, BurnSegmentorError, RawMask};
