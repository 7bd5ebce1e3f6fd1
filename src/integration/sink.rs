//! Output sinks for emitted frame masks.

use std::fs;
use std::path::{Path, PathBuf};

use image::{ImageBuffer, ImageFormat, Luma};
use ndarray::Array2;

use crate::error::{Result, SegTrackError};
use crate::integration::pipeline::RunState;
use crate::tracking::{Frame, Mask};

/// Receives the final mask of every frame, in increasing frame order.
pub trait OutputSink {
    /// Store one frame's mask. Must not leave a partially written frame behind.
    fn emit(&mut self, frame: &Frame, mask: &Mask) -> Result<()>;

    /// Called once when the run ends; an aborted run must leave a truncation marker.
    fn finish(&mut self, state: &RunState) -> Result<()>;
}

/// Where and why an aborted run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncationMarker {
    /// First frame index that was not emitted
    pub frame: usize,
    pub reason: String,
}

impl TruncationMarker {
    fn from_state(state: &RunState) -> Option<Self> {
        match state {
            RunState::Done => None,
            RunState::Aborted { frame, error } => Some(Self {
                frame: *frame,
                reason: error.to_string(),
            }),
        }
    }
}

/// Keeps every emitted mask in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub masks: Vec<(usize, Mask)>,
    pub truncation: Option<TruncationMarker>,
    pub finished: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mask(&self, index: usize) -> Option<&Mask> {
        self.masks.iter().find(|(i, _)| *i == index).map(|(_, m)| m)
    }
}

impl OutputSink for MemorySink {
    fn emit(&mut self, frame: &Frame, mask: &Mask) -> Result<()> {
        self.masks.push((frame.index(), mask.clone()));
        Ok(())
    }

    fn finish(&mut self, state: &RunState) -> Result<()> {
        self.truncation = TruncationMarker::from_state(state);
        self.finished = true;
        Ok(())
    }
}

/// Directory with one lossless 16-bit PNG per frame (`00000.png`, `00001.png`, ...).
///
/// Frames are written under a temporary name and renamed into place. An
/// aborted run leaves a `TRUNCATED` file naming the first missing frame.
#[derive(Debug)]
pub struct MaskArchive {
    dir: PathBuf,
    written: usize,
}

impl MaskArchive {
    pub const TRUNCATION_MARKER: &'static str = "TRUNCATED";

    /// Create the directory if needed and clear what an earlier run left in
    /// it: frame masks, partial writes and the truncation marker. Other files
    /// are kept.
    pub fn create(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let mut removed = 0usize;
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let stale = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(Self::is_run_output);
            if stale && path.is_file() {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        if removed > 0 {
            log::info!("cleared {} files of an earlier run from {}", removed, dir.display());
        }
        Ok(Self { dir, written: 0 })
    }

    /// `NNNNN.png`, `NNNNN.png.part` or the truncation marker.
    fn is_run_output(name: &str) -> bool {
        if name == Self::TRUNCATION_MARKER {
            return true;
        }
        let stem = name
            .strip_suffix(".png.part")
            .or_else(|| name.strip_suffix(".png"));
        stem.is_some_and(|stem| stem.len() >= 5 && stem.bytes().all(|b| b.is_ascii_digit()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn mask_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{index:05}.png"))
    }

    /// Read back an archived mask.
    pub fn read_mask(path: impl AsRef<Path>) -> Result<Mask> {
        let luma = image::open(path.as_ref())?.into_luma16();
        let (width, height) = luma.dimensions();
        let labels = Array2::from_shape_vec((height as usize, width as usize), luma.into_raw())
            .map_err(|e| SegTrackError::input(None, e.to_string()))?;
        Ok(Mask::from_labels(labels))
    }

    /// Truncation marker left by an aborted run, if any.
    pub fn truncation(dir: impl AsRef<Path>) -> Result<Option<TruncationMarker>> {
        let path = dir.as_ref().join(Self::TRUNCATION_MARKER);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path)?;
        let mut frame = None;
        let mut reason = String::new();
        for line in text.lines() {
            if let Some(value) = line.strip_prefix("frame=") {
                frame = value.trim().parse().ok();
            } else if let Some(value) = line.strip_prefix("reason=") {
                reason = value.to_string();
            }
        }
        let frame = frame
            .ok_or_else(|| SegTrackError::input(None, "truncation marker without frame index"))?;
        Ok(Some(TruncationMarker { frame, reason }))
    }
}

impl OutputSink for MaskArchive {
    fn emit(&mut self, frame: &Frame, mask: &Mask) -> Result<()> {
        let (height, width) = mask.dim();
        let raw: Vec<u16> = mask.labels().iter().copied().collect();
        let buffer: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_raw(width as u32, height as u32, raw).ok_or_else(|| {
                SegTrackError::resource(frame.index(), "mask buffer does not match its dimensions")
            })?;

        let path = self.mask_path(frame.index());
        let partial = path.with_extension("png.part");
        buffer.save_with_format(&partial, ImageFormat::Png)?;
        fs::rename(&partial, &path)?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self, state: &RunState) -> Result<()> {
        if let Some(marker) = TruncationMarker::from_state(state) {
            let reason = marker.reason.replace('\n', " ");
            fs::write(
                self.dir.join(Self::TRUNCATION_MARKER),
                format!("frame={}\nframes_written={}\nreason={}\n", marker.frame, self.written, reason),
            )?;
            log::warn!(
                "mask archive {} truncated at frame {}",
                self.dir.display(),
                marker.frame
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_archive_round_trip_keeps_large_labels() {
        let dir = tempfile::tempdir().unwrap();
        let mut archive = MaskArchive::create(dir.path()).unwrap();
        let frame = Frame::filled(7, 2, 3, [0, 0, 0]);
        let mask = Mask::from_labels(array![[0, 1, 300], [255, 256, 0]]);

        archive.emit(&frame, &mask).unwrap();
        archive.finish(&RunState::Done).unwrap();

        let path = archive.mask_path(7);
        assert!(path.ends_with("00007.png"));
        assert_eq!(MaskArchive::read_mask(&path).unwrap(), mask);
        assert!(MaskArchive::truncation(dir.path()).unwrap().is_none());
        assert!(!path.with_extension("png.part").exists());
    }

    #[test]
    fn test_aborted_run_leaves_marker() {
        let dir = tempfile::tempdir().unwrap();
        let mut archive = MaskArchive::create(dir.path()).unwrap();
        archive
            .emit(&Frame::filled(0, 1, 1, [0, 0, 0]), &Mask::new(1, 1))
            .unwrap();
        archive
            .finish(&RunState::Aborted {
                frame: 1,
                error: SegTrackError::input(Some(1), "decode failure"),
            })
            .unwrap();

        let marker = MaskArchive::truncation(dir.path()).unwrap().unwrap();
        assert_eq!(marker.frame, 1);
        assert!(marker.reason.contains("decode failure"));

        // Reopening the archive for a new run clears the stale marker.
        MaskArchive::create(dir.path()).unwrap();
        assert!(MaskArchive::truncation(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_reopened_archive_drops_frames_of_longer_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut archive = MaskArchive::create(dir.path()).unwrap();
        for index in 0..5 {
            archive
                .emit(&Frame::filled(index, 1, 1, [0, 0, 0]), &Mask::new(1, 1))
                .unwrap();
        }
        archive.finish(&RunState::Done).unwrap();
        std::fs::write(dir.path().join("00009.png.part"), b"half").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"keep").unwrap();

        let mut archive = MaskArchive::create(dir.path()).unwrap();
        for index in 0..2 {
            archive
                .emit(&Frame::filled(index, 1, 1, [0, 0, 0]), &Mask::new(1, 1))
                .unwrap();
        }
        archive.finish(&RunState::Done).unwrap();

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["00000.png", "00001.png", "notes.txt"]);
    }

    #[test]
    fn test_memory_sink_records_truncation() {
        let mut sink = MemorySink::new();
        sink.emit(&Frame::filled(0, 1, 1, [0, 0, 0]), &Mask::new(1, 1))
            .unwrap();
        sink.finish(&RunState::Aborted {
            frame: 1,
            error: SegTrackError::Cancelled,
        })
        .unwrap();
        assert!(sink.finished);
        assert_eq!(sink.truncation.as_ref().unwrap().frame, 1);
        assert!(sink.mask(0).is_some());
    }
}
