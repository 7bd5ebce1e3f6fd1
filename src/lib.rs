//! Segment-and-track sessions: build labeled object masks on a first frame
//! from clicks, boxes, strokes, text or automatic segmentation, then carry
//! them through a video with a mask tracker and periodic re-segmentation.

pub mod error;
pub mod integration;
pub mod tracking;

pub use error::{Result, SegTrackError};
pub use integration::{
    FrameSource, MaskArchive, MaskTracker, MemorySink, OutputSink, PointLabel, Prompt, Renderer,
    RunReport, RunState, Segmentation, Segmentor, StopSignal,
};
pub use tracking::{
    FirstFramePrompt, Frame, Mask, ObjectId, ObjectRecord, ObjectRegistry, SegTracker,
    SessionConfig,
};
