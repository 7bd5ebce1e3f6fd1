use crate::tracking::{Frame, Mask};

/// Draws a mask over its frame for display.
pub trait Renderer {
    fn overlay(&self, image: &Frame, mask: &Mask) -> Frame;
}

impl<F> Renderer for F
where
    F: Fn(&Frame, &Mask) -> Frame,
{
    fn overlay(&self, image: &Frame, mask: &Mask) -> Frame {
        self(image, mask)
    }
}
