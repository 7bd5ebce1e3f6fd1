//! One-to-one assignment between fresh regions and tracked objects.

use ndarray::Array2;

/// Convert an IoU similarity matrix into a cost matrix.
pub fn iou_distance(ious: &Array2<f32>) -> Array2<f32> {
    ious.mapv(|iou| 1.0 - iou)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentResult {
    /// `(row, col)` pairs whose cost is within the threshold
    pub matches: Vec<(usize, usize)>,
    pub unmatched_rows: Vec<usize>,
    pub unmatched_cols: Vec<usize>,
}

/// Minimum-cost assignment of rows to columns; pairs costing more than
/// `thresh` are reported as unmatched.
pub fn linear_assignment(cost_matrix: &Array2<f32>, thresh: f32) -> AssignmentResult {
    let (num_rows, num_cols) = cost_matrix.dim();

    if num_rows == 0 {
        return AssignmentResult {
            matches: vec![],
            unmatched_rows: vec![],
            unmatched_cols: (0..num_cols).collect(),
        };
    }

    if num_cols == 0 {
        return AssignmentResult {
            matches: vec![],
            unmatched_rows: (0..num_rows).collect(),
            unmatched_cols: vec![],
        };
    }

    let size = num_rows.max(num_cols);
    let mut padded = Array2::<f64>::from_elem((size, size), 1e6);

    for i in 0..num_rows {
        for j in 0..num_cols {
            padded[[i, j]] = cost_matrix[[i, j]] as f64;
        }
    }

    let mut matches = vec![];
    let mut unmatched_rows = vec![];
    let mut unmatched_cols_mask: Vec<bool> = vec![true; num_cols];

    match lapjv::lapjv(&padded) {
        Ok((row_to_col, _)) => {
            for (row_idx, &col_idx) in row_to_col.iter().enumerate() {
                if row_idx >= num_rows {
                    continue;
                }
                if col_idx >= num_cols {
                    unmatched_rows.push(row_idx);
                } else if cost_matrix[[row_idx, col_idx]] <= thresh {
                    matches.push((row_idx, col_idx));
                    unmatched_cols_mask[col_idx] = false;
                } else {
                    unmatched_rows.push(row_idx);
                }
            }
        }
        Err(err) => {
            log::warn!("linear assignment failed, leaving all rows unmatched: {:?}", err);
            unmatched_rows = (0..num_rows).collect();
        }
    }

    let unmatched_cols: Vec<usize> = unmatched_cols_mask
        .iter()
        .enumerate()
        .filter_map(|(i, &u)| if u { Some(i) } else { None })
        .collect();

    AssignmentResult {
        matches,
        unmatched_rows,
        unmatched_cols,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_assignment_prefers_global_minimum() {
        // Row 0 is closest to column 0, but row 1 only fits column 0 well;
        // the optimal total cost gives column 0 to row 1.
        let ious = array![[0.9, 0.8], [0.95, 0.0]];
        let result = linear_assignment(&iou_distance(&ious), 0.5);
        let mut matches = result.matches.clone();
        matches.sort();
        assert_eq!(matches, vec![(0, 1), (1, 0)]);
        assert!(result.unmatched_rows.is_empty());
        assert!(result.unmatched_cols.is_empty());
    }

    #[test]
    fn test_threshold_rejects_weak_pairs() {
        let ious = array![[0.3], [0.9]];
        let result = linear_assignment(&iou_distance(&ious), 0.5);
        assert_eq!(result.matches, vec![(1, 0)]);
        assert_eq!(result.unmatched_rows, vec![0]);
    }

    #[test]
    fn test_empty_sides() {
        let no_rows = Array2::<f32>::zeros((0, 3));
        assert_eq!(linear_assignment(&no_rows, 0.5).unmatched_cols, vec![0, 1, 2]);

        let no_cols = Array2::<f32>::zeros((2, 0));
        assert_eq!(linear_assignment(&no_cols, 0.5).unmatched_rows, vec![0, 1]);
    }
}
