//! Decoded video frame.

use image::RgbImage;
use ndarray::Array3;

use crate::error::{Result, SegTrackError};

/// Immutable RGB pixel buffer (height x width x 3) plus its sequence index.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    index: usize,
    pixels: Array3<u8>,
}

impl Frame {
    /// Wrap an `(height, width, 3)` pixel array.
    pub fn new(index: usize, pixels: Array3<u8>) -> Result<Self> {
        let (_, _, channels) = pixels.dim();
        if channels != 3 {
            return Err(SegTrackError::input(
                Some(index),
                format!("expected 3 channels, got {channels}"),
            ));
        }
        Ok(Self { index, pixels })
    }

    /// Solid-color frame, mostly useful for tests and placeholders.
    pub fn filled(index: usize, height: usize, width: usize, rgb: [u8; 3]) -> Self {
        let pixels = Array3::from_shape_fn((height, width, 3), |(_, _, c)| rgb[c]);
        Self { index, pixels }
    }

    /// Convert a decoded `image` buffer into a frame.
    pub fn from_rgb_image(index: usize, image: RgbImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        let pixels = Array3::from_shape_vec((height as usize, width as usize, 3), image.into_raw())
            .map_err(|e| SegTrackError::input(Some(index), e.to_string()))?;
        Ok(Self { index, pixels })
    }

    /// Copy the pixels back into an `image` buffer.
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        let (height, width) = self.dim();
        let raw: Vec<u8> = self.pixels.iter().copied().collect();
        RgbImage::from_raw(width as u32, height as u32, raw)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn pixels(&self) -> &Array3<u8> {
        &self.pixels
    }

    /// `(height, width)`.
    pub fn dim(&self) -> (usize, usize) {
        let (height, width, _) = self.pixels.dim();
        (height, width)
    }

    pub fn height(&self) -> usize {
        self.dim().0
    }

    pub fn width(&self) -> usize {
        self.dim().1
    }

    /// Same pixels under a different sequence index.
    pub fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_rgb_buffers() {
        let gray = Array3::<u8>::zeros((4, 4, 1));
        assert!(Frame::new(0, gray).is_err());
    }

    #[test]
    fn test_rgb_image_conversion_preserves_layout() {
        let mut image = RgbImage::new(3, 2);
        image.put_pixel(2, 1, image::Rgb([9, 8, 7]));

        let frame = Frame::from_rgb_image(4, image.clone()).unwrap();
        assert_eq!(frame.dim(), (2, 3));
        assert_eq!(frame.index(), 4);
        assert_eq!(frame.pixels()[[1, 2, 0]], 9);
        assert_eq!(frame.pixels()[[1, 2, 2]], 7);
        assert_eq!(frame.to_rgb_image().unwrap(), image);
    }
}
