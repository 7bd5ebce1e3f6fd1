//! FramePipeline driving propagation and periodic re-segmentation over a video.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, SegTrackError};
use crate::integration::frame_source::FrameSource;
use crate::integration::mask_tracker::MaskTracker;
use crate::integration::scope::{EmbeddedImage, TrackerScope};
use crate::integration::segmentor::{Prompt, Segmentor, best_segmentation};
use crate::integration::sink::OutputSink;
use crate::tracking::{Frame, Mask, MergeEngine, ObjectId, ObjectRegistry, SessionConfig};

/// How a run ended.
#[derive(Debug)]
pub enum RunState {
    /// Every frame of the source was emitted.
    Done,
    /// Frames `0..frame` were emitted; `error` stopped the run at `frame`.
    Aborted { frame: usize, error: SegTrackError },
}

impl RunState {
    pub fn is_done(&self) -> bool {
        matches!(self, RunState::Done)
    }
}

/// A frame that was emitted in degraded form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameWarning {
    pub frame: usize,
    pub message: String,
}

/// Summary of one run.
#[derive(Debug)]
pub struct RunReport {
    pub frames_emitted: usize,
    pub warnings: Vec<FrameWarning>,
    /// Frames that got a fresh segmentation pass, frame 0 included
    pub resegmented_frames: Vec<usize>,
    /// Frames whose final mask came out of a merge
    pub merged_frames: Vec<usize>,
    pub created_objects: Vec<ObjectId>,
    pub retired_objects: Vec<ObjectId>,
    pub state: RunState,
    /// Mask of the last emitted frame
    pub final_mask: Option<Mask>,
}

impl RunReport {
    fn new() -> Self {
        Self {
            frames_emitted: 0,
            warnings: Vec::new(),
            resegmented_frames: Vec::new(),
            merged_frames: Vec::new(),
            created_objects: Vec::new(),
            retired_objects: Vec::new(),
            state: RunState::Done,
            final_mask: None,
        }
    }

    fn warn(&mut self, frame: usize, message: String) {
        log::warn!("frame {}: {}", frame, message);
        self.warnings.push(FrameWarning { frame, message });
    }
}

/// Cooperative cancellation flag, checked before every frame.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-frame driver for one tracking run.
///
/// Borrows the session state it mutates. Frame 0 emits the first-frame mask
/// unchanged; every later frame is propagated by the tracker and, on the
/// re-segmentation schedule, merged with a fresh everything segmentation.
pub struct FramePipeline<'a, S: Segmentor, T: MaskTracker> {
    config: &'a SessionConfig,
    registry: &'a mut ObjectRegistry,
    segmentor: &'a mut S,
    tracker: &'a mut T,
    first_frame_mask: &'a Mask,
    stop: StopSignal,
    consecutive_failures: u32,
}

impl<'a, S: Segmentor, T: MaskTracker> FramePipeline<'a, S, T> {
    pub fn new(
        config: &'a SessionConfig,
        registry: &'a mut ObjectRegistry,
        segmentor: &'a mut S,
        tracker: &'a mut T,
        first_frame_mask: &'a Mask,
    ) -> Self {
        Self {
            config,
            registry,
            segmentor,
            tracker,
            first_frame_mask,
            stop: StopSignal::new(),
            consecutive_failures: 0,
        }
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Drive `source` to completion or to the first fatal error.
    ///
    /// Frames are handed to `sink` in order; `sink.finish` is always called.
    /// A failed finish turns a finished run into a `Resource` abort; on an
    /// already aborted run it is recorded as a warning.
    pub fn run<F, O>(mut self, mut source: F, sink: &mut O) -> RunReport
    where
        F: FrameSource,
        O: OutputSink,
    {
        let mut report = RunReport::new();
        let mut current: Option<Mask> = None;
        let state = self.drive(&mut source, sink, &mut current, &mut report);

        match &state {
            RunState::Done => log::info!(
                "tracking finished: {} frames, {} warnings, {} objects created",
                report.frames_emitted,
                report.warnings.len(),
                report.created_objects.len()
            ),
            RunState::Aborted { frame, error } => {
                log::error!("tracking aborted at frame {}: {}", frame, error)
            }
        }
        let state = match (sink.finish(&state), state) {
            (Ok(()), state) => state,
            (Err(err), RunState::Done) => {
                let frame = report.frames_emitted;
                log::error!("failed to finalize output: {}", err);
                RunState::Aborted {
                    frame,
                    error: SegTrackError::resource(frame, format!("failed to finalize output: {err}")),
                }
            }
            (Err(err), state @ RunState::Aborted { .. }) => {
                let frame = report.frames_emitted;
                report.warn(frame, format!("failed to record truncation: {err}"));
                state
            }
        };

        report.state = state;
        report.final_mask = current;
        report
    }

    fn drive<F, O>(
        &mut self,
        source: &mut F,
        sink: &mut O,
        current: &mut Option<Mask>,
        report: &mut RunReport,
    ) -> RunState
    where
        F: FrameSource,
        O: OutputSink,
    {
        let mut expected = 0usize;
        loop {
            if self.stop.is_stopped() {
                return RunState::Aborted {
                    frame: expected,
                    error: SegTrackError::Cancelled,
                };
            }
            let frame = match source.next() {
                None => return RunState::Done,
                Some(Ok(frame)) => frame,
                Some(Err(error)) => {
                    return RunState::Aborted {
                        frame: expected,
                        error,
                    };
                }
            };
            if let Err(error) = self.check_frame(&frame, expected) {
                return RunState::Aborted {
                    frame: expected,
                    error,
                };
            }

            let mask = if expected == 0 {
                self.seed(&frame, report);
                self.first_frame_mask.clone()
            } else {
                let previous = current.as_ref().unwrap_or(self.first_frame_mask);
                match self.process_frame(&frame, previous, report) {
                    Ok(mask) => mask,
                    Err(error) => {
                        return RunState::Aborted {
                            frame: expected,
                            error,
                        };
                    }
                }
            };
            debug_assert!(mask.labels_within(&self.registry.active_ids()));

            if let Err(err) = sink.emit(&frame, &mask) {
                return RunState::Aborted {
                    frame: expected,
                    error: SegTrackError::resource(expected, format!("failed to emit mask: {err}")),
                };
            }
            report.frames_emitted += 1;
            *current = Some(mask);
            expected += 1;
        }
    }

    fn check_frame(&self, frame: &Frame, expected: usize) -> Result<()> {
        if frame.index() != expected {
            return Err(SegTrackError::input(
                Some(expected),
                format!("source yielded frame {} out of order", frame.index()),
            ));
        }
        if frame.dim() != self.first_frame_mask.dim() {
            return Err(SegTrackError::input(
                Some(expected),
                format!(
                    "frame is {:?} but the session masks are {:?}",
                    frame.dim(),
                    self.first_frame_mask.dim()
                ),
            ));
        }
        Ok(())
    }

    /// Seed the tracker with the source's frame 0.
    fn seed(&mut self, frame: &Frame, report: &mut RunReport) {
        report.resegmented_frames.push(0);
        let mut tracker = TrackerScope::new(&mut *self.tracker);
        tracker.restart();
        if let Err(err) = tracker.add_reference(frame, self.first_frame_mask) {
            report.warn(0, format!("tracker rejected the first frame: {err}"));
        }
    }

    fn process_frame(&mut self, frame: &Frame, previous: &Mask, report: &mut RunReport) -> Result<Mask> {
        let index = frame.index();
        let active = self.registry.active_ids();

        let propagated = {
            let mut tracker = TrackerScope::new(&mut *self.tracker);
            tracker.propagate(frame, previous).map_err(|e| e.to_string())
        };
        let tracked = match propagated {
            Ok(mask) if mask.dim() == previous.dim() => {
                self.consecutive_failures = 0;
                mask.retain_labels(&active)
            }
            Ok(mask) => {
                self.tracker_failed(
                    index,
                    format!("tracker returned a {:?} mask, expected {:?}", mask.dim(), previous.dim()),
                    report,
                )?;
                previous.retain_labels(&active)
            }
            Err(message) => {
                self.tracker_failed(index, message, report)?;
                previous.retain_labels(&active)
            }
        };

        if !self.config.is_resegmentation_frame(index) {
            return Ok(tracked);
        }
        report.resegmented_frames.push(index);

        let segmented = EmbeddedImage::acquire(&mut *self.segmentor, frame)
            .and_then(|mut embedded| embedded.segment(&Prompt::everything(self.config.points_per_side)))
            .map_err(|e| e.to_string());
        let fresh = match segmented {
            Ok(outputs) => best_segmentation(outputs)
                .map(|s| s.mask)
                .unwrap_or_else(|| Mask::new(tracked.dim().0, tracked.dim().1)),
            Err(message) => {
                report.warn(index, format!("segmentor failed, keeping propagated mask: {message}"));
                return Ok(tracked);
            }
        };
        if fresh.dim() != tracked.dim() {
            report.warn(
                index,
                format!(
                    "segmentor returned a {:?} mask, expected {:?}; keeping propagated mask",
                    fresh.dim(),
                    tracked.dim()
                ),
            );
            return Ok(tracked);
        }

        let outcome = MergeEngine::new(&self.config.merge).merge(&tracked, &fresh, &mut *self.registry, index);
        report.merged_frames.push(index);
        report.created_objects.extend_from_slice(&outcome.created);
        report.retired_objects.extend_from_slice(&outcome.retired);

        let mut tracker = TrackerScope::new(&mut *self.tracker);
        if let Err(err) = tracker.add_reference(frame, &outcome.mask) {
            report.warn(index, format!("tracker rejected the merged reference: {err}"));
        }
        Ok(outcome.mask)
    }

    /// Record a tracker failure; fatal once the tolerance is exceeded.
    fn tracker_failed(&mut self, index: usize, message: String, report: &mut RunReport) -> Result<()> {
        self.consecutive_failures += 1;
        if self.consecutive_failures > self.config.max_consecutive_model_failures {
            return Err(SegTrackError::model(format!(
                "{} consecutive tracker failures, last at frame {}: {}",
                self.consecutive_failures, index, message
            )));
        }
        report.warn(index, format!("tracker failed, reusing previous mask: {message}"));
        Ok(())
    }
}
