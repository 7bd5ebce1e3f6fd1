//! Session orchestrator: first-frame construction and tracking runs.

use ndarray::Array2;

use crate::error::{Result, SegTrackError};
use crate::integration::{
    BoxPromptBuilder, EmbeddingCache, FramePipeline, FrameSource, MaskTracker, OutputSink,
    PointLabel, Prompt, Renderer, RunReport, Segmentor, StopSignal, best_segmentation,
};
use crate::tracking::click_state::{ClickState, confirm_object};
use crate::tracking::config::SessionConfig;
use crate::tracking::frame::Frame;
use crate::tracking::mask::{BACKGROUND, Mask};
use crate::tracking::object_state::ObjectOrigin;
use crate::tracking::registry::{ObjectRecord, ObjectRegistry};

/// How the first-frame objects are prompted.
#[derive(Debug, Clone, PartialEq)]
pub enum FirstFramePrompt {
    /// Commit the refinement of the accumulated clicks.
    Clicks,
    /// Box given by two opposite corners.
    Box {
        corner0: (f32, f32),
        corner1: (f32, f32),
    },
    /// Drawn stroke; its bounding box becomes a box prompt.
    Stroke(Array2<bool>),
    /// Text grounding; thresholds default to the session's.
    Text {
        caption: String,
        box_threshold: Option<f32>,
        text_threshold: Option<f32>,
    },
    /// Every object the segmentor finds.
    Everything,
}

/// The image being annotated with its committed and displayed masks.
#[derive(Debug, Clone)]
struct FirstFrame {
    image: Frame,
    /// Objects registered so far
    committed: Mask,
    /// `committed` plus the pending click object, if any
    display: Mask,
    /// Refined but not yet committed click object
    pending: Option<Array2<bool>>,
}

impl FirstFrame {
    fn new(image: &Frame) -> Self {
        let (height, width) = image.dim();
        Self {
            image: image.clone(),
            committed: Mask::new(height, width),
            display: Mask::new(height, width),
            pending: None,
        }
    }
}

/// Interactive segment-and-track session.
///
/// Owns the session configuration, the object registry, the click state and
/// both model collaborators. Objects are built on a first frame, then
/// `run` tracks them through a frame source.
pub struct SegTracker<S: Segmentor, T: MaskTracker, R: Renderer> {
    config: SessionConfig,
    registry: ObjectRegistry,
    clicks: ClickState,
    segmentor: EmbeddingCache<S>,
    tracker: T,
    renderer: R,
    first_frame: Option<FirstFrame>,
    current_mask: Option<Mask>,
}

impl<S: Segmentor, T: MaskTracker, R: Renderer> SegTracker<S, T, R> {
    pub fn new(config: SessionConfig, segmentor: S, tracker: T, renderer: R) -> Result<Self> {
        config.validate()?;
        log::info!(
            "session created: tracker {}, sam_gap {}, max_obj_num {}",
            config.tracker_model.name(),
            config.sam_gap,
            config.max_obj_num
        );
        Ok(Self {
            registry: ObjectRegistry::new(config.max_obj_num),
            config,
            clicks: ClickState::new(),
            segmentor: EmbeddingCache::new(segmentor),
            tracker,
            renderer,
            first_frame: None,
            current_mask: None,
        })
    }

    /// Drop every object, click and mask and start over with `config`.
    pub fn restart(&mut self, config: SessionConfig) -> Result<()> {
        config.validate()?;
        self.registry = ObjectRegistry::new(config.max_obj_num);
        self.config = config;
        self.clicks.reset();
        self.first_frame = None;
        self.current_mask = None;
        self.tracker.restart();
        self.segmentor.reset_image();
        log::info!("session restarted");
        Ok(())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    pub fn clicks(&self) -> &ClickState {
        &self.clicks
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn segmentor(&self) -> &S {
        self.segmentor.inner()
    }

    /// Displayed first-frame mask: committed objects plus the pending one.
    pub fn first_frame_mask(&self) -> Option<&Mask> {
        self.first_frame.as_ref().map(|ff| &ff.display)
    }

    /// First-frame mask holding only registered objects.
    pub fn committed_mask(&self) -> Option<&Mask> {
        self.first_frame.as_ref().map(|ff| &ff.committed)
    }

    /// Final mask of the last frame emitted by `run`.
    pub fn current_mask(&self) -> Option<&Mask> {
        self.current_mask.as_ref()
    }

    pub fn has_pending_object(&self) -> bool {
        self.first_frame.as_ref().is_some_and(|ff| ff.pending.is_some())
    }

    /// The displayed first-frame mask drawn over the first frame.
    pub fn first_frame_overlay(&self) -> Option<Frame> {
        self.first_frame
            .as_ref()
            .map(|ff| self.renderer.overlay(&ff.image, &ff.display))
    }

    /// Add a click on `image` and refine the pending object.
    ///
    /// Returns the overlay of the displayed mask. On any error the click is
    /// dropped again and the session is unchanged.
    pub fn add_click(&mut self, image: &Frame, x: f32, y: f32, label: PointLabel) -> Result<Frame> {
        self.ensure_first_frame(image)?;
        self.clicks.add_point(x, y, label)?;
        match self.refine_pending(image) {
            Ok(overlay) => Ok(overlay),
            Err(err) => {
                self.clicks.undo();
                Err(err)
            }
        }
    }

    /// Remove the last click and refine again. No-op without clicks.
    pub fn undo_click(&mut self, image: &Frame) -> Result<Frame> {
        self.ensure_first_frame(image)?;
        let Some(removed) = self.clicks.undo() else {
            return self.overlay_display();
        };
        if self.clicks.is_empty() {
            if let Some(ff) = self.first_frame.as_mut() {
                ff.pending = None;
            }
            self.reseed_first_frame();
            return self.overlay_display();
        }
        match self.refine_pending(image) {
            Ok(overlay) => Ok(overlay),
            Err(err) => {
                self.clicks.add_point(removed.x, removed.y, removed.label)?;
                Err(err)
            }
        }
    }

    /// Build first-frame objects from `prompt` and seed the tracker with them.
    ///
    /// Clicks, boxes and strokes produce one object. Text and everything
    /// prompts produce one object per region of at least `min_area` pixels,
    /// filling only background pixels, until the id budget runs out.
    /// Objects stay registered even when the tracker rejects the new seed.
    pub fn construct_first_frame(
        &mut self,
        image: &Frame,
        prompt: FirstFramePrompt,
    ) -> Result<Vec<ObjectRecord>> {
        self.ensure_first_frame(image)?;

        let records = match prompt {
            FirstFramePrompt::Clicks => {
                let refinement = self.clicks.refine(image, &mut self.segmentor, &self.renderer)?;
                let record = self.commit_single(&refinement.binary, ObjectOrigin::Click)?;
                vec![record]
            }
            FirstFramePrompt::Box { corner0, corner1 } => {
                let prompt = BoxPromptBuilder::new()
                    .tlbr(corner0.0, corner0.1, corner1.0, corner1.1)
                    .build();
                let binary = self.segment_single(image, &prompt)?;
                vec![self.commit_single(&binary, ObjectOrigin::Box)?]
            }
            FirstFramePrompt::Stroke(stroke) => {
                let prompt = BoxPromptBuilder::stroke(&stroke)?.build();
                let binary = self.segment_single(image, &prompt)?;
                vec![self.commit_single(&binary, ObjectOrigin::Box)?]
            }
            FirstFramePrompt::Text {
                caption,
                box_threshold,
                text_threshold,
            } => {
                let prompt = Prompt::Text {
                    caption,
                    box_threshold: box_threshold.unwrap_or(self.config.box_threshold),
                    text_threshold: text_threshold.unwrap_or(self.config.text_threshold),
                };
                let mask = self.segment_multi(image, &prompt)?;
                self.commit_regions(&mask, ObjectOrigin::Text)
            }
            FirstFramePrompt::Everything => {
                let prompt = Prompt::everything(self.config.points_per_side);
                let mask = self.segment_multi(image, &prompt)?;
                self.commit_regions(&mask, ObjectOrigin::Everything)
            }
        };

        self.clicks.reset();
        if let Some(ff) = self.first_frame.as_mut() {
            ff.pending = None;
        }
        self.reseed_first_frame();
        log::info!(
            "first frame constructed: {} new objects, {} in total",
            records.len(),
            self.registry.active_count()
        );
        Ok(records)
    }

    /// Commit the pending click object under the next id and clear the clicks.
    ///
    /// Returns `None` when nothing is pending. On capacity exhaustion the
    /// pending object is kept.
    pub fn add_new_object(&mut self) -> Result<Option<ObjectRecord>> {
        let Some(ff) = self.first_frame.as_mut() else {
            return Ok(None);
        };
        let Some(binary) = ff.pending.take() else {
            return Ok(None);
        };
        match self
            .clicks
            .confirm_as_object(&binary, &mut self.registry, &ff.committed, 0)
        {
            Ok((record, committed)) => {
                ff.display = committed.clone();
                ff.committed = committed;
                log::info!("object {} committed", record.id);
                Ok(Some(record))
            }
            Err(err) => {
                ff.pending = Some(binary);
                Err(err)
            }
        }
    }

    /// Track the first-frame objects through `source`, emitting into `sink`.
    pub fn run<F, O>(&mut self, source: F, sink: &mut O) -> Result<RunReport>
    where
        F: FrameSource,
        O: OutputSink,
    {
        self.run_with_stop(source, sink, StopSignal::new())
    }

    /// `run` with a cancellation flag checked before each frame.
    ///
    /// Fails with a prompt error when no first frame was constructed. Fatal
    /// errors during the run are reported through `RunReport::state`.
    pub fn run_with_stop<F, O>(&mut self, source: F, sink: &mut O, stop: StopSignal) -> Result<RunReport>
    where
        F: FrameSource,
        O: OutputSink,
    {
        self.add_new_object()?;
        let active = self.registry.active_ids();
        let first_mask = self
            .first_frame
            .as_ref()
            .map(|ff| ff.committed.retain_labels(&active))
            .ok_or_else(|| SegTrackError::prompt("no first-frame mask; construct the first frame before tracking"))?;

        self.segmentor.reset_image();
        log::info!(
            "tracking {} objects with {}",
            self.registry.active_count(),
            self.config.tracker_model.name()
        );
        let report = FramePipeline::new(
            &self.config,
            &mut self.registry,
            &mut self.segmentor,
            &mut self.tracker,
            &first_mask,
        )
        .with_stop_signal(stop)
        .run(source, sink);

        self.current_mask = report.final_mask.clone();
        self.prune_retired();
        Ok(report)
    }

    /// Clear objects retired during a run from the first-frame masks.
    fn prune_retired(&mut self) {
        let active = self.registry.active_ids();
        let Some(ff) = self.first_frame.as_mut() else {
            return;
        };
        if ff.committed.labels_within(&active) {
            return;
        }
        ff.committed = ff.committed.retain_labels(&active);
        if ff.pending.is_none() {
            ff.display = ff.committed.clone();
        }
        log::debug!("retired objects cleared from the first frame");
    }

    /// Start a first frame on `image` unless it is already the current one.
    fn ensure_first_frame(&mut self, image: &Frame) -> Result<()> {
        let replaceable = match &self.first_frame {
            Some(ff) if ff.image == *image => return Ok(()),
            Some(_) => self.registry.records().is_empty(),
            None => true,
        };
        if !replaceable {
            return Err(SegTrackError::prompt(
                "objects were committed on a different first frame; restart the session first",
            ));
        }
        self.replace_first_frame(image);
        Ok(())
    }

    fn replace_first_frame(&mut self, image: &Frame) {
        self.clicks.reset();
        self.segmentor.reset_image();
        self.first_frame = Some(FirstFrame::new(image));
    }

    fn refine_pending(&mut self, image: &Frame) -> Result<Frame> {
        let refinement = self.clicks.refine(image, &mut self.segmentor, &self.renderer)?;
        let next_id = self
            .registry
            .peek_next_id()
            .ok_or(SegTrackError::Capacity {
                max_obj_num: self.registry.max_obj_num(),
            })?;
        let ff = self
            .first_frame
            .as_mut()
            .ok_or_else(|| SegTrackError::prompt("no first frame"))?;
        ff.display = ff.committed.painted(&refinement.binary, next_id);
        ff.pending = Some(refinement.binary);
        self.reseed_first_frame();
        self.overlay_display()
    }

    /// Re-seed the tracker from the displayed first-frame mask.
    ///
    /// A tracker failure only warns: `run` seeds the tracker again from the
    /// committed mask at frame 0, so the first-frame state stays valid.
    fn reseed_first_frame(&mut self) {
        let Some(ff) = self.first_frame.as_mut() else {
            return;
        };
        if ff.pending.is_none() {
            ff.display = ff.committed.clone();
        }
        self.tracker.restart();
        if let Err(err) = self.tracker.add_reference(&ff.image, &ff.display) {
            log::warn!("failed to seed tracker with the first frame: {}", err);
        }
    }

    fn overlay_display(&self) -> Result<Frame> {
        self.first_frame_overlay()
            .ok_or_else(|| SegTrackError::prompt("no first frame"))
    }

    fn segment_single(&mut self, image: &Frame, prompt: &Prompt) -> Result<Array2<bool>> {
        self.segmentor
            .set_image(image)
            .map_err(|e| SegTrackError::model(e.to_string()))?;
        let outputs = self
            .segmentor
            .segment(prompt)
            .map_err(|e| SegTrackError::model(e.to_string()))?;
        let best = best_segmentation(outputs)
            .ok_or_else(|| SegTrackError::model("segmentor returned no masks"))?;
        let binary = best.foreground();
        if !binary.iter().any(|&b| b) {
            return Err(SegTrackError::prompt("prompt did not select any pixel"));
        }
        Ok(binary)
    }

    fn segment_multi(&mut self, image: &Frame, prompt: &Prompt) -> Result<Mask> {
        self.segmentor
            .set_image(image)
            .map_err(|e| SegTrackError::model(e.to_string()))?;
        let outputs = self
            .segmentor
            .segment(prompt)
            .map_err(|e| SegTrackError::model(e.to_string()))?;
        let mask = best_segmentation(outputs)
            .map(|s| s.mask)
            .unwrap_or_else(|| Mask::new(image.height(), image.width()));
        if mask.dim() != image.dim() {
            return Err(SegTrackError::model(format!(
                "segmentor returned a {:?} mask for a {:?} image",
                mask.dim(),
                image.dim()
            )));
        }
        Ok(mask)
    }

    fn commit_single(&mut self, binary: &Array2<bool>, origin: ObjectOrigin) -> Result<ObjectRecord> {
        let ff = self
            .first_frame
            .as_mut()
            .ok_or_else(|| SegTrackError::prompt("no first frame"))?;
        let (record, committed) = confirm_object(binary, origin, &mut self.registry, &ff.committed, 0)?;
        ff.committed = committed;
        Ok(record)
    }

    fn commit_regions(&mut self, mask: &Mask, origin: ObjectOrigin) -> Vec<ObjectRecord> {
        let Some(ff) = self.first_frame.as_mut() else {
            return Vec::new();
        };
        let mut records = Vec::new();
        for region in mask.label_regions(self.config.merge.min_area) {
            let mut binary = Array2::from_elem(mask.dim(), false);
            let mut free = 0usize;
            for &(row, col) in &region.pixels {
                if ff.committed.get(row, col) == BACKGROUND {
                    binary[[row, col]] = true;
                    free += 1;
                }
            }
            if free == 0 {
                continue;
            }
            match confirm_object(&binary, origin, &mut self.registry, &ff.committed, 0) {
                Ok((record, committed)) => {
                    ff.committed = committed;
                    records.push(record);
                }
                Err(err) => {
                    log::warn!("stopped adding first-frame objects: {}", err);
                    break;
                }
            }
        }
        records
    }
}
