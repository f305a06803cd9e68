//! Row-block domain decomposition.
//!
//! A grid of `height` rows is split across `workers` workers into contiguous,
//! disjoint row ranges. When the split is uneven the first `height % workers`
//! workers each receive one extra row, so no two ranges differ in length by
//! more than one.

use std::ops::Range;

use crate::error::CoreError;

/// The row range owned by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub rank: usize,
    pub workers: usize,
    /// Total number of rows in the global grid.
    pub height: usize,
    /// First global row owned by this worker.
    pub start_row: usize,
    /// Number of rows owned by this worker.
    pub local_rows: usize,
}

impl Partition {
    /// Compute the partition of worker `rank`.
    pub fn new(height: usize, workers: usize, rank: usize) -> Result<Self, CoreError> {
        validate(height, workers)?;
        if rank >= workers {
            return Err(CoreError::RankOutOfRange { rank, workers });
        }

        let base = height / workers;
        let rem = height % workers;
        let (start_row, local_rows) = if rank < rem {
            (rank * (base + 1), base + 1)
        } else {
            (rank * base + rem, base)
        };

        Ok(Self {
            rank,
            workers,
            height,
            start_row,
            local_rows,
        })
    }

    /// One past the last global row owned by this worker.
    pub fn end_row(&self) -> usize {
        self.start_row + self.local_rows
    }

    pub fn rows(&self) -> Range<usize> {
        self.start_row..self.end_row()
    }

    /// Whether global row `row` belongs to this worker.
    pub fn owns(&self, row: usize) -> bool {
        self.rows().contains(&row)
    }

    /// The worker that owns global row `row`, if the row exists.
    pub fn owner_of(&self, row: usize) -> Option<usize> {
        if row >= self.height {
            return None;
        }
        let base = self.height / self.workers;
        let rem = self.height % self.workers;
        let long_rows = rem * (base + 1);
        Some(if row < long_rows {
            row / (base + 1)
        } else {
            rem + (row - long_rows) / base
        })
    }
}

/// Partition a grid of `height` rows across `workers` workers, in rank order.
pub fn decompose(height: usize, workers: usize) -> Result<Vec<Partition>, CoreError> {
    (0..workers)
        .map(|rank| Partition::new(height, workers, rank))
        .collect()
}

/// Require that `workers` divides `height` exactly.
///
/// The heat-diffusion solver states this as a precondition and fails fast
/// instead of falling back to an uneven split.
pub fn require_even_split(height: usize, workers: usize) -> Result<(), CoreError> {
    validate(height, workers)?;
    if height % workers != 0 {
        return Err(CoreError::IndivisibleHeight { height, workers });
    }
    Ok(())
}

fn validate(height: usize, workers: usize) -> Result<(), CoreError> {
    if workers == 0 {
        return Err(CoreError::NoWorkers);
    }
    if height == 0 {
        return Err(CoreError::EmptyGrid { width: 0, height });
    }
    if workers > height {
        return Err(CoreError::TooManyWorkers { height, workers });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remainder_goes_to_lowest_ranks() {
        let parts = decompose(10, 4).unwrap();
        let shape: Vec<(usize, usize)> =
            parts.iter().map(|p| (p.start_row, p.local_rows)).collect();
        assert_eq!(shape, vec![(0, 3), (3, 3), (6, 2), (8, 2)]);
    }

    #[test]
    fn test_single_worker_owns_everything() {
        let p = Partition::new(7, 1, 0).unwrap();
        assert_eq!(p.rows(), 0..7);
        assert!(p.owns(0) && p.owns(6) && !p.owns(7));
    }

    #[test]
    fn test_owner_of_matches_decomposition() {
        for (height, workers) in [(10, 4), (5, 4), (9, 3), (7, 7)] {
            let parts = decompose(height, workers).unwrap();
            for row in 0..height {
                let owner = parts[0].owner_of(row).unwrap();
                assert!(parts[owner].owns(row), "row {row} of {height}/{workers}");
                assert_eq!(parts.iter().filter(|p| p.owns(row)).count(), 1);
            }
            assert_eq!(parts[0].owner_of(height), None);
        }
    }

    #[test]
    fn test_invalid_inputs() {
        assert_eq!(Partition::new(5, 0, 0), Err(CoreError::NoWorkers));
        assert_eq!(
            Partition::new(3, 4, 0),
            Err(CoreError::TooManyWorkers { height: 3, workers: 4 })
        );
        assert_eq!(
            Partition::new(8, 2, 2),
            Err(CoreError::RankOutOfRange { rank: 2, workers: 2 })
        );
    }

    #[test]
    fn test_even_split_precondition() {
        assert!(require_even_split(1000, 4).is_ok());
        assert_eq!(
            require_even_split(1000, 3),
            Err(CoreError::IndivisibleHeight { height: 1000, workers: 3 })
        );
    }
}
