/// Axis-aligned box in pixel coordinates, used for box prompts and region bounds.
///
/// Stored as top-left corner plus size. Pixel spans are half-open, so a box
/// around a single pixel at `(col, row)` is `[col, col + 1) x [row, row + 1)`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    /// Box from top-left `(x1, y1)` and bottom-right `(x2, y2)`.
    #[inline]
    pub fn from_tlbr(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        }
    }

    /// Box from two opposite corners given in any order.
    pub fn from_corners(corner0: (f32, f32), corner1: (f32, f32)) -> Self {
        Self::from_tlbr(
            corner0.0.min(corner1.0),
            corner0.1.min(corner1.1),
            corner0.0.max(corner1.0),
            corner0.1.max(corner1.1),
        )
    }

    /// Tight box around the inclusive pixel span `[col_min, col_max] x [row_min, row_max]`.
    pub fn from_pixel_span(col_min: usize, row_min: usize, col_max: usize, row_max: usize) -> Self {
        Self::from_tlbr(
            col_min as f32,
            row_min as f32,
            (col_max + 1) as f32,
            (row_max + 1) as f32,
        )
    }

    #[inline]
    pub fn to_tlbr(&self) -> [f32; 4] {
        [self.x, self.y, self.x + self.width, self.y + self.height]
    }

    /// Top-left and bottom-right corners.
    #[inline]
    pub fn corners(&self) -> ((f32, f32), (f32, f32)) {
        ((self.x, self.y), (self.x + self.width, self.y + self.height))
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}
