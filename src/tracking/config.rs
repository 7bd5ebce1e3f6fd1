//! Session configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SegTrackError};

/// Temporal tracking model used to propagate masks between frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerModel {
    Deaotb,
    Deaotl,
    #[default]
    R50Deaotl,
}

impl TrackerModel {
    /// Name used in configuration files and model registries.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Deaotb => "deaotb",
            Self::Deaotl => "deaotl",
            Self::R50Deaotl => "r50_deaotl",
        }
    }

    /// Conventional checkpoint location for the model.
    pub fn default_checkpoint(&self) -> &'static str {
        match self {
            Self::Deaotb => "./ckpt/DeAOTB_PRE_YTB_DAV.pth",
            Self::Deaotl => "./ckpt/DeAOTL_PRE_YTB_DAV.pth",
            Self::R50Deaotl => "./ckpt/R50_DeAOTL_PRE_YTB_DAV.pth",
        }
    }
}

/// Parameters of the merge between tracked and freshly segmented masks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// A fresh region whose IoU with a tracked object is strictly greater than
    /// this is the same object.
    pub match_iou: f32,
    /// Fresh regions smaller than this many pixels are ignored.
    pub min_area: usize,
    /// Fraction of an unmatched region that must lie on tracked background for
    /// it to become a new object.
    pub min_new_obj_ratio: f32,
    /// Let a matched region replace its object's tracked boundary.
    pub correct_boundaries: bool,
    /// Retire an object after this many consecutive re-segmentation checks
    /// that fail to re-detect it. `None` keeps objects active indefinitely.
    pub retire_after_misses: Option<u32>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            match_iou: 0.5,
            min_area: 200,
            min_new_obj_ratio: 0.8,
            correct_boundaries: true,
            retire_after_misses: None,
        }
    }
}

/// Immutable per-run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub tracker_model: TrackerModel,
    /// Frame interval between re-segmentation passes.
    pub sam_gap: u32,
    /// Maximum number of live objects.
    pub max_obj_num: u16,
    /// Grid density of the automatic "everything" segmentation.
    pub points_per_side: u32,
    /// Default box threshold for text prompts.
    pub box_threshold: f32,
    /// Default text threshold for text prompts.
    pub text_threshold: f32,
    pub merge: MergeConfig,
    /// Consecutive tracker failures tolerated before a run aborts.
    pub max_consecutive_model_failures: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tracker_model: TrackerModel::default(),
            sam_gap: 100,
            max_obj_num: 255,
            points_per_side: 16,
            box_threshold: 0.25,
            text_threshold: 0.25,
            merge: MergeConfig::default(),
            max_consecutive_model_failures: 3,
        }
    }
}

impl SessionConfig {
    pub const MIN_OBJ_NUM: u16 = 50;
    pub const MAX_OBJ_NUM: u16 = 300;

    /// Parse and validate a JSON configuration. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sam_gap < 1 {
            return Err(SegTrackError::config("sam_gap must be at least 1"));
        }
        if !(Self::MIN_OBJ_NUM..=Self::MAX_OBJ_NUM).contains(&self.max_obj_num) {
            return Err(SegTrackError::config(format!(
                "max_obj_num must be in [{}, {}], got {}",
                Self::MIN_OBJ_NUM,
                Self::MAX_OBJ_NUM,
                self.max_obj_num
            )));
        }
        if self.points_per_side < 1 {
            return Err(SegTrackError::config("points_per_side must be at least 1"));
        }
        for (name, value) in [
            ("merge.match_iou", self.merge.match_iou),
            ("merge.min_new_obj_ratio", self.merge.min_new_obj_ratio),
            ("box_threshold", self.box_threshold),
            ("text_threshold", self.text_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SegTrackError::config(format!(
                    "{name} must be in [0, 1], got {value}"
                )));
            }
        }
        if self.merge.retire_after_misses == Some(0) {
            return Err(SegTrackError::config(
                "merge.retire_after_misses must be at least 1 when set",
            ));
        }
        Ok(())
    }

    /// Whether frame `index` gets a fresh segmentation pass.
    #[inline]
    pub fn is_resegmentation_frame(&self, index: usize) -> bool {
        index % self.sam_gap.max(1) as usize == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tracker_model.name(), "r50_deaotl");
        assert_eq!(config.sam_gap, 100);
        assert_eq!(config.max_obj_num, 255);
    }

    #[test]
    fn test_max_obj_num_bounds() {
        for (value, ok) in [(49, false), (50, true), (300, true), (301, false)] {
            let config = SessionConfig {
                max_obj_num: value,
                ..Default::default()
            };
            assert_eq!(config.validate().is_ok(), ok, "max_obj_num = {value}");
        }
    }

    #[test]
    fn test_zero_gap_rejected() {
        let config = SessionConfig {
            sam_gap: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SegTrackError::Config(_))));
    }

    #[test]
    fn test_json_partial_config() {
        let config = SessionConfig::from_json_str(
            r#"{"tracker_model": "deaotb", "sam_gap": 5, "merge": {"match_iou": 0.7}}"#,
        )
        .unwrap();
        assert_eq!(config.tracker_model, TrackerModel::Deaotb);
        assert_eq!(config.sam_gap, 5);
        assert_eq!(config.merge.match_iou, 0.7);
        assert_eq!(config.merge.min_area, 200);
        assert_eq!(config.points_per_side, 16);
    }

    #[test]
    fn test_json_out_of_range_rejected() {
        assert!(SessionConfig::from_json_str(r#"{"max_obj_num": 20}"#).is_err());
        assert!(SessionConfig::from_json_str(r#"{"tracker_model": "sam2"}"#).is_err());
    }

    #[test]
    fn test_resegmentation_schedule() {
        let config = SessionConfig {
            sam_gap: 50,
            ..Default::default()
        };
        let hits: Vec<usize> = (0..120).filter(|&i| config.is_resegmentation_frame(i)).collect();
        assert_eq!(hits, vec![0, 50, 100]);
    }
}
