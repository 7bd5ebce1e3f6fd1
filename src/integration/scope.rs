//! Scoped acquisition of collaborator resources.
//!
//! Both guards release on drop, so early returns and aborts inside the frame
//! loop cannot leave an embedding or a tracker cache behind.

use std::ops::{Deref, DerefMut};

use crate::integration::mask_tracker::MaskTracker;
use crate::integration::segmentor::{Prompt, Segmentation, Segmentor};
use crate::tracking::Frame;

/// A segmentor with one frame embedded; the embedding is reset on drop.
pub struct EmbeddedImage<'a, S: Segmentor> {
    segmentor: &'a mut S,
}

impl<'a, S: Segmentor> EmbeddedImage<'a, S> {
    pub fn acquire(segmentor: &'a mut S, image: &Frame) -> Result<Self, S::Error> {
        if let Err(err) = segmentor.set_image(image) {
            segmentor.reset_image();
            return Err(err);
        }
        Ok(Self { segmentor })
    }

    pub fn segment(&mut self, prompt: &Prompt) -> Result<Vec<Segmentation>, S::Error> {
        self.segmentor.segment(prompt)
    }
}

impl<S: Segmentor> Drop for EmbeddedImage<'_, S> {
    fn drop(&mut self) {
        self.segmentor.reset_image();
    }
}

/// Tracker access whose transient buffers are released on drop.
pub struct TrackerScope<'a, T: MaskTracker> {
    tracker: &'a mut T,
}

impl<'a, T: MaskTracker> TrackerScope<'a, T> {
    pub fn new(tracker: &'a mut T) -> Self {
        Self { tracker }
    }
}

impl<T: MaskTracker> Deref for TrackerScope<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.tracker
    }
}

impl<T: MaskTracker> DerefMut for TrackerScope<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.tracker
    }
}

impl<T: MaskTracker> Drop for TrackerScope<'_, T> {
    fn drop(&mut self) {
        self.tracker.release_cache();
    }
}
