//! Reconciles a tracker-propagated mask with a fresh segmentation.
//!
//! The propagated mask is the base: it already carries the ids of known
//! objects, and fresh regions only claim background. With boundary
//! correction a matched object may give up pixels that another corrected
//! object then claims; objects that were not matched keep theirs.
//! Each connected region of the fresh segmentation is scored against every
//! active object by pixel IoU. Regions are paired one-to-one with objects by
//! minimum-cost assignment; a paired region above `match_iou` may redraw its
//! object's boundary, an unpaired region whose best IoU still clears the
//! threshold is absorbed into that object, and everything else is a
//! candidate new object that must lie mostly on tracked background.

use std::collections::{BTreeSet, HashMap};

use ndarray::Array2;
use rayon::prelude::*;

use crate::error::SegTrackError;
use crate::tracking::config::MergeConfig;
use crate::tracking::mask::{BACKGROUND, Mask, ObjectId, Region};
use crate::tracking::matching::{self, AssignmentResult};
use crate::tracking::object_state::ObjectOrigin;
use crate::tracking::registry::ObjectRegistry;

/// What the merge decided for one fresh region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionOutcome {
    /// Paired with a tracked object; may correct its boundary
    Matched(ObjectId),
    /// Same object as an already paired one; id unchanged
    Absorbed(ObjectId),
    /// Registered as a newly appeared object
    Created(ObjectId),
    /// Dropped without affecting the mask
    Discarded(DiscardReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// No id was available
    Capacity,
    /// Too much of the region lies on already tracked objects
    Overlapping,
    /// Every pixel of the region was taken by an earlier decision
    Claimed,
}

/// Result of one merge.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub mask: Mask,
    /// One entry per fresh connected region, in region order
    pub regions: Vec<RegionOutcome>,
    pub created: Vec<ObjectId>,
    pub retired: Vec<ObjectId>,
}

impl MergeOutcome {
    pub fn matched_count(&self) -> usize {
        self.regions
            .iter()
            .filter(|o| matches!(o, RegionOutcome::Matched(_)))
            .count()
    }

    pub fn discarded_count(&self) -> usize {
        self.regions
            .iter()
            .filter(|o| matches!(o, RegionOutcome::Discarded(_)))
            .count()
    }
}

/// Overlap statistics of one fresh region against the base mask.
#[derive(Debug, Clone)]
struct RegionScore {
    /// IoU against each active object, in active-id order
    ious: Vec<f32>,
    /// Pixels lying on base background
    uncovered: usize,
}

fn score_region(
    region: &Region,
    base: &Array2<ObjectId>,
    active: &[ObjectId],
    areas: &HashMap<ObjectId, usize>,
) -> RegionScore {
    let mut overlaps: HashMap<ObjectId, usize> = HashMap::new();
    let mut uncovered = 0;
    for &(r, c) in &region.pixels {
        match base[[r, c]] {
            BACKGROUND => uncovered += 1,
            id => *overlaps.entry(id).or_insert(0) += 1,
        }
    }

    let ious = active
        .iter()
        .map(|id| {
            let inter = overlaps.get(id).copied().unwrap_or(0);
            if inter == 0 {
                return 0.0;
            }
            let union = region.area() + areas.get(id).copied().unwrap_or(0) - inter;
            inter as f32 / union as f32
        })
        .collect();

    RegionScore { ious, uncovered }
}

/// Merge step of the frame pipeline.
#[derive(Debug, Clone, Copy)]
pub struct MergeEngine<'a> {
    config: &'a MergeConfig,
}

impl<'a> MergeEngine<'a> {
    pub fn new(config: &'a MergeConfig) -> Self {
        Self { config }
    }

    /// Produce the final mask of a re-segmentation frame.
    ///
    /// `tracked` is the propagated mask, `fresh` a segmentation with
    /// provisional labels. New objects are registered in `registry` under
    /// `frame_idx`; regions that find no free id are discarded.
    ///
    /// Both masks must have the same dimensions. A `fresh` mask of another
    /// shape is ignored: the outcome is `tracked` restricted to active
    /// objects, with no regions and no miss counted.
    pub fn merge(
        &self,
        tracked: &Mask,
        fresh: &Mask,
        registry: &mut ObjectRegistry,
        frame_idx: usize,
    ) -> MergeOutcome {
        let active_set = registry.active_ids();
        let active: Vec<ObjectId> = active_set.iter().copied().collect();
        let base = tracked.retain_labels(&active_set);
        if fresh.dim() != tracked.dim() {
            log::warn!(
                "frame {}: fresh mask is {:?} but the tracked mask is {:?}; skipping merge",
                frame_idx,
                fresh.dim(),
                tracked.dim()
            );
            return MergeOutcome {
                mask: base,
                regions: Vec::new(),
                created: Vec::new(),
                retired: Vec::new(),
            };
        }
        let areas = base.areas();
        let regions = fresh.connected_regions(self.config.min_area);

        let scores: Vec<RegionScore> = regions
            .par_iter()
            .map(|region| score_region(region, base.labels(), &active, &areas))
            .collect();

        let mut ious = Array2::<f32>::zeros((regions.len(), active.len()));
        for (i, score) in scores.iter().enumerate() {
            for (j, &iou) in score.ious.iter().enumerate() {
                ious[[i, j]] = iou;
            }
        }

        let AssignmentResult { matches, .. } =
            matching::linear_assignment(&matching::iou_distance(&ious), 1.0 - self.config.match_iou);

        let mut outcomes: Vec<Option<RegionOutcome>> = vec![None; regions.len()];
        for (row, col) in matches {
            if ious[[row, col]] > self.config.match_iou {
                outcomes[row] = Some(RegionOutcome::Matched(active[col]));
            }
        }

        let mut candidates = Vec::new();
        for (row, score) in scores.iter().enumerate() {
            if outcomes[row].is_some() {
                continue;
            }
            let best = score
                .ious
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .filter(|(_, iou)| **iou > self.config.match_iou);
            if let Some((col, _)) = best {
                outcomes[row] = Some(RegionOutcome::Absorbed(active[col]));
                continue;
            }
            let novelty = score.uncovered as f32 / regions[row].area() as f32;
            if novelty >= self.config.min_new_obj_ratio {
                candidates.push(row);
            } else {
                outcomes[row] = Some(RegionOutcome::Discarded(DiscardReason::Overlapping));
            }
        }

        let mut labels = base.into_labels();

        if self.config.correct_boundaries {
            let corrected: BTreeSet<ObjectId> = outcomes
                .iter()
                .filter_map(|o| match o {
                    Some(RegionOutcome::Matched(id)) => Some(*id),
                    _ => None,
                })
                .collect();
            if !corrected.is_empty() {
                labels.mapv_inplace(|l| if corrected.contains(&l) { BACKGROUND } else { l });
                for (row, outcome) in outcomes.iter().enumerate() {
                    let id = match outcome {
                        Some(RegionOutcome::Matched(id)) | Some(RegionOutcome::Absorbed(id))
                            if corrected.contains(id) =>
                        {
                            *id
                        }
                        _ => continue,
                    };
                    for &(r, c) in &regions[row].pixels {
                        if labels[[r, c]] == BACKGROUND {
                            labels[[r, c]] = id;
                        }
                    }
                }
            }
        }

        let mut created = Vec::new();
        for row in candidates {
            let free: Vec<(usize, usize)> = regions[row]
                .pixels
                .iter()
                .copied()
                .filter(|&(r, c)| labels[[r, c]] == BACKGROUND)
                .collect();
            if free.is_empty() {
                outcomes[row] = Some(RegionOutcome::Discarded(DiscardReason::Claimed));
                continue;
            }
            match registry.register(ObjectOrigin::Everything, frame_idx) {
                Ok(record) => {
                    for (r, c) in free {
                        labels[[r, c]] = record.id;
                    }
                    created.push(record.id);
                    outcomes[row] = Some(RegionOutcome::Created(record.id));
                }
                Err(SegTrackError::Capacity { max_obj_num }) => {
                    log::warn!(
                        "frame {}: discarding new region of {} pixels, all {} object ids in use",
                        frame_idx,
                        regions[row].area(),
                        max_obj_num
                    );
                    outcomes[row] = Some(RegionOutcome::Discarded(DiscardReason::Capacity));
                }
                Err(err) => {
                    log::warn!("frame {}: discarding new region: {}", frame_idx, err);
                    outcomes[row] = Some(RegionOutcome::Discarded(DiscardReason::Capacity));
                }
            }
        }

        let redetected: BTreeSet<ObjectId> = outcomes
            .iter()
            .filter_map(|o| match o {
                Some(RegionOutcome::Matched(id)) | Some(RegionOutcome::Absorbed(id)) => Some(*id),
                _ => None,
            })
            .collect();
        let mut retired = Vec::new();
        for &id in &active {
            if redetected.contains(&id) {
                registry.mark_detected(id);
                continue;
            }
            let misses = registry.mark_missed(id);
            if let Some(limit) = self.config.retire_after_misses {
                if misses >= limit && registry.retire(id) {
                    log::warn!(
                        "frame {}: retiring object {} after {} missed re-detections",
                        frame_idx,
                        id,
                        misses
                    );
                    retired.push(id);
                }
            }
        }
        if !retired.is_empty() {
            labels.mapv_inplace(|l| if retired.contains(&l) { BACKGROUND } else { l });
        }

        let mask = Mask::from_labels(labels);
        debug_assert!(
            mask.labels_within(&registry.active_ids()),
            "merged mask carries labels outside the active set"
        );

        let regions: Vec<RegionOutcome> = outcomes
            .into_iter()
            .map(|o| o.unwrap_or(RegionOutcome::Discarded(DiscardReason::Overlapping)))
            .collect();

        log::debug!(
            "frame {}: merged {} fresh regions ({} created, {} retired)",
            frame_idx,
            regions.len(),
            created.len(),
            retired.len()
        );

        MergeOutcome {
            mask,
            regions,
            created,
            retired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn config(match_iou: f32) -> MergeConfig {
        MergeConfig {
            match_iou,
            min_area: 1,
            min_new_obj_ratio: 0.8,
            correct_boundaries: true,
            retire_after_misses: None,
        }
    }

    fn registry_with(n: usize) -> ObjectRegistry {
        let mut registry = ObjectRegistry::new(50);
        for _ in 0..n {
            registry.register(ObjectOrigin::Click, 0).unwrap();
        }
        registry
    }

    #[test]
    fn test_matched_region_keeps_id_and_corrects_boundary() {
        // IoU of the fresh region with object 1 is 2/4.
        let cfg = config(0.4);
        let mut registry = registry_with(1);
        let tracked = Mask::from_labels(array![[1, 1, 1, 0], [0, 0, 0, 0]]);
        // Provisional label 9 covers two tracked pixels plus one new pixel.
        let fresh = Mask::from_labels(array![[0, 9, 9, 9], [0, 0, 0, 0]]);

        let outcome = MergeEngine::new(&cfg).merge(&tracked, &fresh, &mut registry, 10);

        assert_eq!(outcome.regions, vec![RegionOutcome::Matched(1)]);
        assert_eq!(outcome.mask.labels(), &array![[0, 1, 1, 1], [0, 0, 0, 0]]);
        assert!(outcome.created.is_empty());
    }

    #[test]
    fn test_unmatched_region_on_background_creates_object() {
        let cfg = config(0.5);
        let mut registry = registry_with(1);
        let tracked = Mask::from_labels(array![[1, 1, 0, 0]]);
        let fresh = Mask::from_labels(array![[0, 0, 3, 3]]);

        let outcome = MergeEngine::new(&cfg).merge(&tracked, &fresh, &mut registry, 5);

        assert_eq!(outcome.created, vec![2]);
        assert_eq!(outcome.mask.labels(), &array![[1, 1, 2, 2]]);
        assert_eq!(registry.get(2).unwrap().created_at_frame, 5);
        assert_eq!(registry.get(2).unwrap().origin, ObjectOrigin::Everything);
    }

    #[test]
    fn test_iou_equal_to_threshold_is_not_a_match() {
        // Region {0,1} vs object {1,2}: IoU = 1/3.
        let tracked = Mask::from_labels(array![[0, 1, 1, 0, 0, 0]]);
        let fresh = Mask::from_labels(array![[4, 4, 0, 0, 0, 0]]);

        let exact = config(1.0 / 3.0);
        let mut registry = registry_with(1);
        let outcome = MergeEngine::new(&exact).merge(&tracked, &fresh, &mut registry, 1);
        assert!(!matches!(outcome.regions[0], RegionOutcome::Matched(_)));

        let lower = config(0.3);
        let mut registry = registry_with(1);
        let outcome = MergeEngine::new(&lower).merge(&tracked, &fresh, &mut registry, 1);
        assert_eq!(outcome.regions[0], RegionOutcome::Matched(1));
    }

    #[test]
    fn test_overlapping_unmatched_region_is_discarded() {
        let cfg = config(0.9);
        let mut registry = registry_with(1);
        let tracked = Mask::from_labels(array![[1, 1, 1, 0]]);
        // Region covers two tracked pixels and one background pixel: IoU 0.5,
        // novelty 1/3.
        let fresh = Mask::from_labels(array![[0, 2, 2, 2]]);

        let outcome = MergeEngine::new(&cfg).merge(&tracked, &fresh, &mut registry, 1);

        assert_eq!(
            outcome.regions,
            vec![RegionOutcome::Discarded(DiscardReason::Overlapping)]
        );
        assert_eq!(outcome.mask, tracked);
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_second_region_on_same_object_is_absorbed() {
        let cfg = config(0.3);
        let mut registry = registry_with(1);
        let tracked = Mask::from_labels(array![[1, 1, 0, 1, 1]]);
        // Two disconnected pieces of object 1, each with IoU 0.5.
        let fresh = Mask::from_labels(array![[7, 7, 0, 7, 7]]);

        let outcome = MergeEngine::new(&cfg).merge(&tracked, &fresh, &mut registry, 1);

        assert_eq!(outcome.matched_count(), 1);
        assert!(outcome.regions.contains(&RegionOutcome::Absorbed(1)));
        assert!(outcome.created.is_empty());
        // Both pieces stay with object 1 after correction.
        assert_eq!(outcome.mask, tracked);
    }

    #[test]
    fn test_tracked_pixels_of_other_objects_are_kept() {
        let cfg = config(0.5);
        let mut registry = registry_with(2);
        let tracked = Mask::from_labels(array![[1, 1, 2, 2]]);
        // Fresh region claims object 1 plus one pixel of object 2.
        let fresh = Mask::from_labels(array![[5, 5, 5, 0]]);

        let outcome = MergeEngine::new(&cfg).merge(&tracked, &fresh, &mut registry, 1);

        assert_eq!(outcome.regions, vec![RegionOutcome::Matched(1)]);
        assert_eq!(outcome.mask.labels(), &array![[1, 1, 2, 2]]);
    }

    #[test]
    fn test_capacity_discards_new_region() {
        let cfg = config(0.5);
        let mut registry = registry_with(50);
        let tracked = Mask::from_labels(array![[1, 0, 0]]);
        let fresh = Mask::from_labels(array![[0, 0, 8]]);

        let outcome = MergeEngine::new(&cfg).merge(&tracked, &fresh, &mut registry, 3);

        assert_eq!(
            outcome.regions,
            vec![RegionOutcome::Discarded(DiscardReason::Capacity)]
        );
        assert_eq!(outcome.mask, tracked);
        assert_eq!(registry.active_count(), 50);
    }

    #[test]
    fn test_inactive_labels_are_cleared() {
        let cfg = config(0.5);
        let mut registry = registry_with(2);
        registry.retire(2);
        let tracked = Mask::from_labels(array![[1, 2, 2]]);
        let fresh = Mask::new(1, 3);

        let outcome = MergeEngine::new(&cfg).merge(&tracked, &fresh, &mut registry, 1);
        assert_eq!(outcome.mask.labels(), &array![[1, 0, 0]]);
    }

    #[test]
    fn test_fresh_mask_of_other_shape_is_ignored() {
        let mut cfg = config(0.5);
        cfg.retire_after_misses = Some(1);
        let mut registry = registry_with(2);
        registry.retire(2);
        let tracked = Mask::from_labels(array![[1, 1, 2]]);
        let fresh = Mask::from_labels(array![[5, 5], [5, 5]]);

        let outcome = MergeEngine::new(&cfg).merge(&tracked, &fresh, &mut registry, 4);
        assert_eq!(outcome.mask.labels(), &array![[1, 1, 0]]);
        assert!(outcome.regions.is_empty());
        assert!(outcome.created.is_empty());
        assert!(outcome.retired.is_empty());
        assert_eq!(registry.active_ids(), BTreeSet::from([1]));
    }

    #[test]
    fn test_retire_after_consecutive_misses() {
        let mut cfg = config(0.5);
        cfg.retire_after_misses = Some(2);
        let mut registry = registry_with(2);
        let tracked = Mask::from_labels(array![[1, 1, 0, 2, 2]]);
        // Only object 1 is re-detected.
        let fresh = Mask::from_labels(array![[3, 3, 0, 0, 0]]);
        let engine = MergeEngine::new(&cfg);

        let first = engine.merge(&tracked, &fresh, &mut registry, 10);
        assert!(first.retired.is_empty());
        assert_eq!(registry.get(2).unwrap().missed_checks, 1);

        let second = engine.merge(&first.mask, &fresh, &mut registry, 20);
        assert_eq!(second.retired, vec![2]);
        assert_eq!(second.mask.labels(), &array![[1, 1, 0, 0, 0]]);
        assert_eq!(registry.active_ids(), BTreeSet::from([1]));
    }

    #[test]
    fn test_merge_is_deterministic_for_equal_inputs() {
        let cfg = config(0.5);
        let registry = registry_with(2);
        let tracked = Mask::from_labels(array![[1, 1, 0, 0, 2], [1, 1, 0, 0, 2]]);
        let fresh = Mask::from_labels(array![[4, 4, 0, 6, 5], [4, 0, 0, 6, 5]]);

        let mut first_registry = registry.clone();
        let mut second_registry = registry.clone();
        let engine = MergeEngine::new(&cfg);
        let first = engine.merge(&tracked, &fresh, &mut first_registry, 7);
        let second = engine.merge(&tracked, &fresh, &mut second_registry, 7);

        assert_eq!(first.mask, second.mask);
        assert_eq!(first.regions, second.regions);
        assert_eq!(first_registry.records(), second_registry.records());
    }

    #[test]
    fn test_merging_again_with_same_segmentation_changes_nothing() {
        let cfg = config(0.5);
        let mut registry = registry_with(1);
        let tracked = Mask::from_labels(array![[1, 1, 0, 0, 0]]);
        let fresh = Mask::from_labels(array![[2, 2, 0, 3, 3]]);
        let engine = MergeEngine::new(&cfg);

        let first = engine.merge(&tracked, &fresh, &mut registry, 4);
        assert_eq!(first.created, vec![2]);

        let second = engine.merge(&first.mask, &fresh, &mut registry, 4);
        assert!(second.created.is_empty());
        assert_eq!(second.mask, first.mask);
    }
}
