//! Lazy, finite, non-restartable frame sequences.

use std::path::{Path, PathBuf};

use crate::error::{Result, SegTrackError};
use crate::tracking::Frame;

/// Anything yielding frames in index order.
///
/// Decoded videos, image directories and in-memory vectors
/// (`frames.into_iter().map(Ok)`) all qualify.
pub trait FrameSource: Iterator<Item = Result<Frame>> {}

impl<I: Iterator<Item = Result<Frame>>> FrameSource for I {}

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Frames decoded one at a time from a directory of images, in file-name order.
#[derive(Debug)]
pub struct ImageSequence {
    paths: std::vec::IntoIter<PathBuf>,
    next_index: usize,
}

impl ImageSequence {
    /// List the images of `dir`. Fails with an input error when the directory
    /// cannot be read or holds no images.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|e| {
            SegTrackError::input(None, format!("cannot read {}: {}", dir.display(), e))
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| SegTrackError::input(None, format!("cannot list {}: {}", dir.display(), e)))?
                .path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_image && path.is_file() {
                paths.push(path);
            }
        }

        if paths.is_empty() {
            return Err(SegTrackError::input(
                None,
                format!("no images found in {}", dir.display()),
            ));
        }
        paths.sort();
        log::info!("found {} frames in {}", paths.len(), dir.display());
        Ok(Self::from_paths(paths))
    }

    /// Use the given paths as frames 0, 1, ... in order.
    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        Self {
            paths: paths.into_iter(),
            next_index: 0,
        }
    }

    /// Frames not yet decoded.
    pub fn remaining(&self) -> usize {
        self.paths.len()
    }
}

impl Iterator for ImageSequence {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.paths.next()?;
        let index = self.next_index;
        self.next_index += 1;

        let frame = image::open(&path)
            .map_err(|e| {
                SegTrackError::input(Some(index), format!("cannot decode {}: {}", path.display(), e))
            })
            .and_then(|decoded| Frame::from_rgb_image(index, decoded.to_rgb8()));
        Some(frame)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.paths.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_frames_follow_sorted_file_names() {
        let dir = tempfile::tempdir().unwrap();
        for (name, value) in [("b.png", 20u8), ("a.png", 10u8), ("c.png", 30u8)] {
            RgbImage::from_pixel(3, 2, Rgb([value, 0, 0]))
                .save(dir.path().join(name))
                .unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "not a frame").unwrap();

        let sequence = ImageSequence::open(dir.path()).unwrap();
        assert_eq!(sequence.remaining(), 3);

        let frames: Vec<Frame> = sequence.map(|f| f.unwrap()).collect();
        let firsts: Vec<(usize, u8)> = frames
            .iter()
            .map(|f| (f.index(), f.pixels()[[0, 0, 0]]))
            .collect();
        assert_eq!(firsts, vec![(0, 10), (1, 20), (2, 30)]);
        assert_eq!(frames[0].dim(), (2, 3));
    }

    #[test]
    fn test_empty_directory_is_input_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageSequence::open(dir.path()),
            Err(SegTrackError::Input { .. })
        ));
    }

    #[test]
    fn test_undecodable_frame_reports_index() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::new(2, 2).save(dir.path().join("0.png")).unwrap();
        std::fs::write(dir.path().join("1.png"), b"garbage").unwrap();

        let mut sequence = ImageSequence::open(dir.path()).unwrap();
        assert!(sequence.next().unwrap().is_ok());
        match sequence.next().unwrap() {
            Err(SegTrackError::Input { frame, .. }) => assert_eq!(frame, Some(1)),
            other => panic!("expected input error, got {other:?}"),
        }
    }
}
