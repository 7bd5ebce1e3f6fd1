//! Integer-labeled object masks and their connected regions.

use std::collections::{BTreeSet, HashMap, VecDeque};

use ndarray::Array2;

use crate::tracking::rect::Rect;

/// Object identifier as stored in a mask. `0` is background.
pub type ObjectId = u16;

/// Label of pixels owned by no object.
pub const BACKGROUND: ObjectId = 0;

/// Per-pixel object labels (height x width).
///
/// Masks handed out by the session are never mutated in place; every
/// transformation below returns a new mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    labels: Array2<ObjectId>,
}

impl Mask {
    /// All-background mask.
    pub fn new(height: usize, width: usize) -> Self {
        Self {
            labels: Array2::zeros((height, width)),
        }
    }

    pub fn from_labels(labels: Array2<ObjectId>) -> Self {
        Self { labels }
    }

    /// Mask with `id` wherever `binary` is set.
    pub fn from_binary(binary: &Array2<bool>, id: ObjectId) -> Self {
        Self {
            labels: binary.mapv(|on| if on { id } else { BACKGROUND }),
        }
    }

    pub fn labels(&self) -> &Array2<ObjectId> {
        &self.labels
    }

    pub fn into_labels(self) -> Array2<ObjectId> {
        self.labels
    }

    /// `(height, width)`.
    pub fn dim(&self) -> (usize, usize) {
        self.labels.dim()
    }

    pub fn get(&self, row: usize, col: usize) -> ObjectId {
        self.labels[[row, col]]
    }

    /// Distinct non-background labels.
    pub fn label_set(&self) -> BTreeSet<ObjectId> {
        self.labels
            .iter()
            .copied()
            .filter(|&l| l != BACKGROUND)
            .collect()
    }

    pub fn max_label(&self) -> ObjectId {
        self.labels.iter().copied().max().unwrap_or(BACKGROUND)
    }

    pub fn is_empty(&self) -> bool {
        self.labels.iter().all(|&l| l == BACKGROUND)
    }

    pub fn area(&self, id: ObjectId) -> usize {
        self.labels.iter().filter(|&&l| l == id).count()
    }

    /// Pixel count per non-background label.
    pub fn areas(&self) -> HashMap<ObjectId, usize> {
        let mut areas = HashMap::new();
        for &l in self.labels.iter().filter(|&&l| l != BACKGROUND) {
            *areas.entry(l).or_insert(0) += 1;
        }
        areas
    }

    /// Binary view of one object.
    pub fn binary(&self, id: ObjectId) -> Array2<bool> {
        self.labels.mapv(|l| l == id)
    }

    /// True when every non-background label is in `allowed`.
    pub fn labels_within(&self, allowed: &BTreeSet<ObjectId>) -> bool {
        self.labels
            .iter()
            .all(|l| *l == BACKGROUND || allowed.contains(l))
    }

    /// New mask with `id` painted over every set pixel of `binary`.
    pub fn painted(&self, binary: &Array2<bool>, id: ObjectId) -> Mask {
        let mut labels = self.labels.clone();
        ndarray::Zip::from(&mut labels)
            .and(binary)
            .for_each(|l, &on| {
                if on {
                    *l = id;
                }
            });
        Mask { labels }
    }

    /// New mask where labels outside `keep` become background.
    pub fn retain_labels(&self, keep: &BTreeSet<ObjectId>) -> Mask {
        Mask {
            labels: self
                .labels
                .mapv(|l| if keep.contains(&l) { l } else { BACKGROUND }),
        }
    }

    /// Tight box around all pixels labeled `id`.
    pub fn bounding_box(&self, id: ObjectId) -> Option<Rect> {
        bounding_box_where(&self.labels, |l| l == id)
    }

    /// Pixel-level IoU between `id` in this mask and `other_id` in `other`.
    pub fn iou(&self, id: ObjectId, other: &Mask, other_id: ObjectId) -> f32 {
        let mut inter = 0usize;
        let mut union = 0usize;
        ndarray::Zip::from(&self.labels)
            .and(&other.labels)
            .for_each(|&a, &b| {
                let in_a = a == id;
                let in_b = b == other_id;
                if in_a && in_b {
                    inter += 1;
                }
                if in_a || in_b {
                    union += 1;
                }
            });
        if union == 0 {
            0.0
        } else {
            inter as f32 / union as f32
        }
    }

    /// One region per distinct label, regardless of connectivity, in label order.
    ///
    /// Regions smaller than `min_area` pixels are dropped.
    pub fn label_regions(&self, min_area: usize) -> Vec<Region> {
        let mut by_label: std::collections::BTreeMap<ObjectId, Vec<(usize, usize)>> =
            Default::default();
        for ((row, col), &l) in self.labels.indexed_iter() {
            if l != BACKGROUND {
                by_label.entry(l).or_default().push((row, col));
            }
        }
        by_label
            .into_iter()
            .filter(|(_, pixels)| pixels.len() >= min_area.max(1))
            .map(|(label, pixels)| Region::new(label, pixels))
            .collect()
    }

    /// 4-connected components of equally-labeled pixels, in row-major order of
    /// their first pixel.
    ///
    /// Components smaller than `min_area` pixels are dropped.
    pub fn connected_regions(&self, min_area: usize) -> Vec<Region> {
        let (height, width) = self.dim();
        let mut visited = Array2::from_elem((height, width), false);
        let mut regions = Vec::new();
        let mut queue = VecDeque::new();

        for row in 0..height {
            for col in 0..width {
                let label = self.labels[[row, col]];
                if label == BACKGROUND || visited[[row, col]] {
                    continue;
                }

                let mut pixels = Vec::new();
                visited[[row, col]] = true;
                queue.push_back((row, col));
                while let Some((r, c)) = queue.pop_front() {
                    pixels.push((r, c));
                    let neighbors = [
                        (r.wrapping_sub(1), c),
                        (r + 1, c),
                        (r, c.wrapping_sub(1)),
                        (r, c + 1),
                    ];
                    for (nr, nc) in neighbors {
                        if nr < height
                            && nc < width
                            && !visited[[nr, nc]]
                            && self.labels[[nr, nc]] == label
                        {
                            visited[[nr, nc]] = true;
                            queue.push_back((nr, nc));
                        }
                    }
                }

                if pixels.len() >= min_area.max(1) {
                    regions.push(Region::new(label, pixels));
                }
            }
        }
        regions
    }
}

/// Tight box around the set pixels of a binary image, e.g. a drawn stroke.
pub fn binary_bounding_box(binary: &Array2<bool>) -> Option<Rect> {
    bounding_box_where(binary, |on| on)
}

fn bounding_box_where<T: Copy>(grid: &Array2<T>, pred: impl Fn(T) -> bool) -> Option<Rect> {
    let mut span: Option<(usize, usize, usize, usize)> = None;
    for ((row, col), &v) in grid.indexed_iter() {
        if !pred(v) {
            continue;
        }
        span = Some(match span {
            None => (col, row, col, row),
            Some((c0, r0, c1, r1)) => (c0.min(col), r0.min(row), c1.max(col), r1.max(row)),
        });
    }
    span.map(|(c0, r0, c1, r1)| Rect::from_pixel_span(c0, r0, c1, r1))
}

/// A set of pixels sharing one label in a mask.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    /// Label the pixels carry in the source mask
    pub label: ObjectId,
    /// `(row, col)` coordinates
    pub pixels: Vec<(usize, usize)>,
    /// Tight bounding box
    pub bbox: Rect,
}

impl Region {
    fn new(label: ObjectId, pixels: Vec<(usize, usize)>) -> Self {
        let (mut c0, mut r0, mut c1, mut r1) = (usize::MAX, usize::MAX, 0, 0);
        for &(r, c) in &pixels {
            c0 = c0.min(c);
            r0 = r0.min(r);
            c1 = c1.max(c);
            r1 = r1.max(r);
        }
        Self {
            label,
            bbox: Rect::from_pixel_span(c0, r0, c1, r1),
            pixels,
        }
    }

    pub fn area(&self) -> usize {
        self.pixels.len()
    }

    /// Binary image of the region at the given mask size.
    pub fn to_binary(&self, dim: (usize, usize)) -> Array2<bool> {
        let mut binary = Array2::from_elem(dim, false);
        for &(r, c) in &self.pixels {
            binary[[r, c]] = true;
        }
        binary
    }
}
