//! Builder for box prompts from various input formats.

use ndarray::Array2;

use crate::error::{Result, SegTrackError};
use crate::integration::segmentor::Prompt;
use crate::tracking::{Rect, binary_bounding_box};

/// Builder for `Prompt::Box` from boxes in several formats or a drawn stroke.
#[derive(Debug, Clone, Default)]
pub struct BoxPromptBuilder {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

impl BoxPromptBuilder {
    /// Create a new box prompt builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the bounding box of a drawn stroke.
    ///
    /// Fails with a prompt error when the stroke is empty.
    pub fn stroke(stroke: &Array2<bool>) -> Result<Self> {
        let rect = binary_bounding_box(stroke)
            .ok_or_else(|| SegTrackError::prompt("stroke does not cover any pixel"))?;
        Ok(Self::new().rect(rect))
    }

    /// Set box in TLBR format (x1, y1, x2, y2).
    pub fn tlbr(mut self, x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        self.x1 = x1;
        self.y1 = y1;
        self.x2 = x2;
        self.y2 = y2;
        self
    }

    /// Set box in XYWH format (center_x, center_y, width, height).
    pub fn xywh(mut self, cx: f32, cy: f32, w: f32, h: f32) -> Self {
        self.x1 = cx - w / 2.0;
        self.y1 = cy - h / 2.0;
        self.x2 = cx + w / 2.0;
        self.y2 = cy + h / 2.0;
        self
    }

    /// Set box in TLWH format (left, top, width, height).
    pub fn tlwh(mut self, l: f32, t: f32, w: f32, h: f32) -> Self {
        self.x1 = l;
        self.y1 = t;
        self.x2 = l + w;
        self.y2 = t + h;
        self
    }

    pub fn rect(self, rect: Rect) -> Self {
        let [x1, y1, x2, y2] = rect.to_tlbr();
        self.tlbr(x1, y1, x2, y2)
    }

    /// Build the final `Prompt::Box` with corners in top-left / bottom-right order.
    pub fn build(self) -> Prompt {
        let rect = Rect::from_corners((self.x1, self.y1), (self.x2, self.y2));
        let (corner0, corner1) = rect.corners();
        Prompt::Box { corner0, corner1 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_box_prompt_builder() {
        let prompt = BoxPromptBuilder::new().xywh(30.0, 50.0, 40.0, 60.0).build();
        assert_eq!(
            prompt,
            Prompt::Box {
                corner0: (10.0, 20.0),
                corner1: (50.0, 80.0)
            }
        );
    }

    #[test]
    fn test_swapped_corners_are_normalized() {
        let prompt = BoxPromptBuilder::new().tlbr(50.0, 80.0, 10.0, 20.0).build();
        assert_eq!(
            prompt,
            Prompt::Box {
                corner0: (10.0, 20.0),
                corner1: (50.0, 80.0)
            }
        );
    }

    #[test]
    fn test_stroke_becomes_bounding_box() {
        let stroke = array![
            [false, false, false],
            [false, true, false],
            [false, true, true],
        ];
        let prompt = BoxPromptBuilder::stroke(&stroke).unwrap().build();
        assert_eq!(
            prompt,
            Prompt::Box {
                corner0: (1.0, 1.0),
                corner1: (3.0, 3.0)
            }
        );

        assert!(BoxPromptBuilder::stroke(&Array2::from_elem((2, 2), false)).is_err());
    }
}
