use serde::{Deserialize, Serialize};

/// Lifecycle state of a registered object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ObjectState {
    /// Object may own pixels in the current mask
    #[default]
    Active,
    /// Object has vanished; its id stays reserved for the rest of the session
    Retired,
}

/// How an object first entered the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectOrigin {
    /// Interactive point clicks
    Click,
    /// Box prompt, including a drawn stroke reduced to its bounding box
    Box,
    /// Text-grounded detection
    Text,
    /// Automatic "everything" segmentation, at the first frame or on re-segmentation
    Everything,
}
