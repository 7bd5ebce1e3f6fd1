//! Accumulated click prompts for interactive first-frame refinement.

use ndarray::Array2;

use crate::error::{Result, SegTrackError};
use crate::integration::{PointLabel, Prompt, Renderer, Segmentation, Segmentor, best_segmentation};
use crate::tracking::frame::Frame;
use crate::tracking::mask::Mask;
use crate::tracking::object_state::ObjectOrigin;
use crate::tracking::registry::{ObjectRecord, ObjectRegistry};

/// One clicked point in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClickPoint {
    pub x: f32,
    pub y: f32,
    pub label: PointLabel,
}

/// Where the click sequence stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickPhase {
    Empty,
    /// Points added since the last refinement
    Accumulating(usize),
    /// The current points have been refined into a mask
    Refined(usize),
}

/// Output of a click refinement.
#[derive(Debug, Clone)]
pub struct Refinement {
    /// Pixels of the refined object
    pub binary: Array2<bool>,
    /// Model confidence of the kept output
    pub score: f32,
    pub logits: Option<Array2<f32>>,
    /// The refined object drawn over the image
    pub overlay: Frame,
}

/// Ordered click sequence with undo.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClickState {
    points: Vec<ClickPoint>,
    refined: bool,
}

impl ClickState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> ClickPhase {
        match (self.points.len(), self.refined) {
            (0, _) => ClickPhase::Empty,
            (n, false) => ClickPhase::Accumulating(n),
            (n, true) => ClickPhase::Refined(n),
        }
    }

    pub fn points(&self) -> &[ClickPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Append a point. Non-finite or negative coordinates are rejected and
    /// leave the state unchanged.
    pub fn add_point(&mut self, x: f32, y: f32, label: PointLabel) -> Result<()> {
        if !x.is_finite() || !y.is_finite() || x < 0.0 || y < 0.0 {
            return Err(SegTrackError::prompt(format!(
                "malformed click coordinates ({x}, {y})"
            )));
        }
        self.points.push(ClickPoint { x, y, label });
        self.refined = false;
        Ok(())
    }

    /// Remove the most recent point. No-op on an empty state.
    pub fn undo(&mut self) -> Option<ClickPoint> {
        let removed = self.points.pop();
        if removed.is_some() {
            self.refined = false;
        }
        removed
    }

    pub fn reset(&mut self) {
        self.points.clear();
        self.refined = false;
    }

    /// Point prompt over every accumulated click.
    pub fn to_prompt(&self, mask_prior: Option<Array2<f32>>) -> Result<Prompt> {
        if self.points.is_empty() {
            return Err(SegTrackError::prompt("no clicks to build a prompt from"));
        }
        Ok(Prompt::Point {
            coords: self.points.iter().map(|p| (p.x, p.y)).collect(),
            labels: self.points.iter().map(|p| p.label).collect(),
            mask_prior,
        })
    }

    /// Segment the accumulated clicks on `image`.
    ///
    /// The first pass uses the points alone; the best output's logits are then
    /// fed back as a mask prior and the highest-scoring output of the second
    /// pass is kept. Outputs without logits skip the second pass.
    pub fn refine<S, R>(&mut self, image: &Frame, segmentor: &mut S, renderer: &R) -> Result<Refinement>
    where
        S: Segmentor,
        R: Renderer,
    {
        let prompt = self.to_prompt(None)?;
        let (height, width) = image.dim();
        if let Some(p) = self
            .points
            .iter()
            .find(|p| p.x >= width as f32 || p.y >= height as f32)
        {
            return Err(SegTrackError::prompt(format!(
                "click ({}, {}) lies outside the {}x{} image",
                p.x, p.y, width, height
            )));
        }

        segmentor
            .set_image(image)
            .map_err(|e| SegTrackError::model(e.to_string()))?;
        let first = run_pass(segmentor, &prompt)?;

        let kept = match first.logits.clone() {
            Some(logits) => run_pass(segmentor, &self.to_prompt(Some(logits))?)?,
            None => first,
        };

        let binary = kept.foreground();
        if binary.dim() != (height, width) {
            return Err(SegTrackError::model(format!(
                "segmentor returned a {:?} mask for a {:?} image",
                binary.dim(),
                (height, width)
            )));
        }
        let overlay = renderer.overlay(image, &Mask::from_binary(&binary, 1));
        self.refined = true;

        Ok(Refinement {
            binary,
            score: kept.score,
            logits: kept.logits,
            overlay,
        })
    }

    /// Commit a refined mask as a new object painted over `committed`, then
    /// clear the clicks.
    ///
    /// Returns the new record and the new committed mask. On capacity
    /// exhaustion nothing changes.
    pub fn confirm_as_object(
        &mut self,
        binary: &Array2<bool>,
        registry: &mut ObjectRegistry,
        committed: &Mask,
        frame_idx: usize,
    ) -> Result<(ObjectRecord, Mask)> {
        confirm_object(binary, ObjectOrigin::Click, registry, committed, frame_idx).inspect(|_| {
            self.reset();
        })
    }
}

fn run_pass<S: Segmentor>(segmentor: &mut S, prompt: &Prompt) -> Result<Segmentation> {
    let outputs = segmentor
        .segment(prompt)
        .map_err(|e| SegTrackError::model(e.to_string()))?;
    best_segmentation(outputs).ok_or_else(|| SegTrackError::model("segmentor returned no masks"))
}

/// Register an object and paint it over `committed`.
pub(crate) fn confirm_object(
    binary: &Array2<bool>,
    origin: ObjectOrigin,
    registry: &mut ObjectRegistry,
    committed: &Mask,
    frame_idx: usize,
) -> Result<(ObjectRecord, Mask)> {
    if binary.dim() != committed.dim() {
        return Err(SegTrackError::prompt(format!(
            "object mask is {:?}, first-frame mask is {:?}",
            binary.dim(),
            committed.dim()
        )));
    }
    let record = registry.register(origin, frame_idx)?;
    let painted = committed.painted(binary, record.id);
    Ok((record, painted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    struct ScriptedSegmentor {
        calls: Vec<Prompt>,
    }

    impl Segmentor for ScriptedSegmentor {
        type Error = String;

        fn set_image(&mut self, _image: &Frame) -> std::result::Result<(), String> {
            Ok(())
        }

        fn reset_image(&mut self) {}

        fn segment(&mut self, prompt: &Prompt) -> std::result::Result<Vec<Segmentation>, String> {
            self.calls.push(prompt.clone());
            let with_prior = matches!(prompt, Prompt::Point { mask_prior: Some(_), .. });
            // Second pass answers with a tighter, higher-scoring mask.
            let (good, bad) = if with_prior {
                (array![[1u16, 0], [0, 0]], array![[1u16, 1], [1, 1]])
            } else {
                (array![[1u16, 1], [0, 0]], array![[0u16, 0], [0, 1]])
            };
            Ok(vec![
                Segmentation {
                    mask: Mask::from_labels(bad),
                    score: 0.3,
                    logits: Some(Array2::zeros((2, 2))),
                },
                Segmentation {
                    mask: Mask::from_labels(good),
                    score: if with_prior { 0.95 } else { 0.8 },
                    logits: Some(Array2::from_elem((2, 2), 4.0)),
                },
            ])
        }
    }

    fn passthrough(image: &Frame, _mask: &Mask) -> Frame {
        image.clone()
    }

    #[test]
    fn test_phases() {
        let mut state = ClickState::new();
        assert_eq!(state.phase(), ClickPhase::Empty);
        state.add_point(1.0, 1.0, PointLabel::Positive).unwrap();
        state.add_point(0.0, 1.0, PointLabel::Negative).unwrap();
        assert_eq!(state.phase(), ClickPhase::Accumulating(2));
        state.undo();
        assert_eq!(state.phase(), ClickPhase::Accumulating(1));
        state.undo();
        assert_eq!(state.phase(), ClickPhase::Empty);
    }

    #[test]
    fn test_undo_inverts_add() {
        for k in 1..6 {
            let mut after_k = ClickState::new();
            let mut after_k_minus_1 = ClickState::new();
            for i in 0..k {
                let label = if i % 2 == 0 {
                    PointLabel::Positive
                } else {
                    PointLabel::Negative
                };
                after_k.add_point(i as f32, 2.0 * i as f32, label).unwrap();
                if i + 1 < k {
                    after_k_minus_1
                        .add_point(i as f32, 2.0 * i as f32, label)
                        .unwrap();
                }
            }
            after_k.undo();
            assert_eq!(after_k, after_k_minus_1, "k = {k}");
        }
    }

    #[test]
    fn test_undo_on_empty_is_noop() {
        let mut state = ClickState::new();
        assert!(state.undo().is_none());
        assert_eq!(state, ClickState::new());
    }

    #[test]
    fn test_malformed_points_rejected() {
        let mut state = ClickState::new();
        assert!(state.add_point(f32::NAN, 1.0, PointLabel::Positive).is_err());
        assert!(state.add_point(-1.0, 1.0, PointLabel::Positive).is_err());
        assert!(state.is_empty());
    }

    #[test]
    fn test_refine_on_empty_is_prompt_error() {
        let mut state = ClickState::new();
        let mut segmentor = ScriptedSegmentor { calls: vec![] };
        let image = Frame::filled(0, 2, 2, [0, 0, 0]);
        let result = state.refine(&image, &mut segmentor, &passthrough);
        assert!(matches!(result, Err(SegTrackError::Prompt(_))));
        assert!(segmentor.calls.is_empty());
    }

    #[test]
    fn test_refine_runs_two_passes_and_keeps_best() {
        let mut state = ClickState::new();
        state.add_point(0.0, 0.0, PointLabel::Positive).unwrap();
        let mut segmentor = ScriptedSegmentor { calls: vec![] };
        let image = Frame::filled(0, 2, 2, [0, 0, 0]);

        let refinement = state.refine(&image, &mut segmentor, &passthrough).unwrap();

        assert_eq!(segmentor.calls.len(), 2);
        match &segmentor.calls[1] {
            Prompt::Point { mask_prior, .. } => {
                assert_eq!(mask_prior.as_ref().unwrap()[[0, 0]], 4.0);
            }
            other => panic!("unexpected prompt {other:?}"),
        }
        assert_eq!(refinement.score, 0.95);
        assert_eq!(refinement.binary, array![[true, false], [false, false]]);
        assert_eq!(state.phase(), ClickPhase::Refined(1));
    }

    #[test]
    fn test_refine_rejects_out_of_bounds_click() {
        let mut state = ClickState::new();
        state.add_point(5.0, 0.0, PointLabel::Positive).unwrap();
        let mut segmentor = ScriptedSegmentor { calls: vec![] };
        let image = Frame::filled(0, 2, 2, [0, 0, 0]);
        assert!(state.refine(&image, &mut segmentor, &passthrough).is_err());
        assert_eq!(state.phase(), ClickPhase::Accumulating(1));
    }

    #[test]
    fn test_confirm_registers_and_resets() {
        let mut state = ClickState::new();
        state.add_point(0.0, 0.0, PointLabel::Positive).unwrap();
        let mut registry = ObjectRegistry::new(50);
        let committed = Mask::new(2, 2);
        let binary = array![[true, false], [false, false]];

        let (record, mask) = state
            .confirm_as_object(&binary, &mut registry, &committed, 0)
            .unwrap();

        assert_eq!(record.id, 1);
        assert_eq!(record.origin, ObjectOrigin::Click);
        assert_eq!(mask.labels(), &array![[1, 0], [0, 0]]);
        assert!(committed.is_empty());
        assert_eq!(state.phase(), ClickPhase::Empty);
    }
}
