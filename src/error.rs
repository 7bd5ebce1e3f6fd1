//! Error types for segment-and-track sessions.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SegTrackError>;

/// Errors that can occur while building masks or running a tracking pass.
#[derive(Error, Debug)]
pub enum SegTrackError {
    #[error("input error{}: {message}", frame_suffix(.frame))]
    Input {
        frame: Option<usize>,
        message: String,
    },

    #[error("prompt error: {0}")]
    Prompt(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("object capacity exhausted: max_obj_num is {max_obj_num}")]
    Capacity { max_obj_num: u16 },

    #[error("resource error at frame {frame}: {message}")]
    Resource { frame: usize, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn frame_suffix(frame: &Option<usize>) -> String {
    match frame {
        Some(index) => format!(" at frame {index}"),
        None => String::new(),
    }
}

impl SegTrackError {
    pub fn input<S: Into<String>>(frame: Option<usize>, msg: S) -> Self {
        Self::Input {
            frame,
            message: msg.into(),
        }
    }

    pub fn prompt<S: Into<String>>(msg: S) -> Self {
        Self::Prompt(msg.into())
    }

    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    pub fn resource<S: Into<String>>(frame: usize, msg: S) -> Self {
        Self::Resource {
            frame,
            message: msg.into(),
        }
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the error can be recovered from locally without ending a run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Prompt(_) | Self::Capacity { .. })
    }
}
