mod click_state;
mod config;
mod frame;
mod mask;
mod matching;
mod merge;
mod object_state;
mod rect;
mod registry;
mod seg_tracker;

pub use click_state::{ClickPhase, ClickPoint, ClickState, Refinement};
pub use config::{MergeConfig, SessionConfig, TrackerModel};
pub use frame::Frame;
pub use mask::{BACKGROUND, Mask, ObjectId, Region, binary_bounding_box};
pub use matching::{AssignmentResult, iou_distance, linear_assignment};
pub use merge::{DiscardReason, MergeEngine, MergeOutcome, RegionOutcome};
pub use object_state::{ObjectOrigin, ObjectState};
pub use rect::Rect;
pub use registry::{ObjectRecord, ObjectRegistry};
pub use seg_tracker::{FirstFramePrompt, SegTracker};
