//! Domain partitioning
//!
//! Splits `[lower, upper]` into one equal-width sub-interval per task. The
//! number of tasks is the discovered capacity times the oversubscription
//! factor, so every task carries the same workload whatever the pool looks
//! like.
//!
//! # Panel rounding
//!
//! The requested panel budget is rounded down to a multiple of the task count:
//!
//! ```text
//! adjusted_panels = (total_panels / parts) * parts
//! panels_per_part = adjusted_panels / parts
//! ```
//!
//! Up to `parts - 1` panels of resolution are silently dropped, and a budget
//! smaller than `parts` leaves every partition with zero panels (the integral
//! is then `0.0`). The rounding is observable in the result and is kept as is.

use serde::{Deserialize, Serialize};

/// Upper limit on tasks per run
pub const MAX_PARTS: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PartitionError {
    #[error("total capacity must be at least 1")]
    NoCapacity,

    #[error("oversubscription factor must be at least 1")]
    NoOversubscription,

    #[error("{capacity} slots x {oversubscription} oversubscription exceeds the limit of {max} tasks")]
    TooManyParts {
        capacity: usize,
        oversubscription: usize,
        max: usize,
    },
}

/// One independent compute task
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    /// Position in the plan (also the summation order)
    pub index: usize,
    pub lower: f64,
    pub upper: f64,
    pub panels: u64,
}

/// Result of partitioning a request
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionPlan {
    /// Number of tasks (`capacity * oversubscription`)
    pub parts: usize,

    /// Panel budget as requested
    pub requested_panels: u64,

    /// Budget after rounding down to a multiple of `parts`
    pub adjusted_panels: u64,

    pub panels_per_part: u64,

    pub partitions: Vec<Partition>,
}

impl PartitionPlan {
    /// Panels actually computed across all partitions
    pub fn total_panels(&self) -> u64 {
        self.partitions.iter().map(|p| p.panels).sum()
    }

    /// Panels lost to rounding
    pub fn dropped_panels(&self) -> u64 {
        self.requested_panels - self.total_panels()
    }
}

/// Split `[lower, upper]` into `total_capacity * oversubscription` partitions
///
/// Partition boundaries are computed once and shared by neighbours, so the
/// ranges tile the domain exactly; the last partition ends at `upper`.
///
/// A reversed domain (`upper < lower`) is not an error: every partition gets
/// zero panels and contributes `0.0`.
pub fn partition(
    lower: f64,
    upper: f64,
    total_panels: u64,
    total_capacity: usize,
    oversubscription: usize,
) -> Result<PartitionPlan, PartitionError> {
    if total_capacity == 0 {
        return Err(PartitionError::NoCapacity);
    }
    if oversubscription == 0 {
        return Err(PartitionError::NoOversubscription);
    }

    let parts = total_capacity
        .checked_mul(oversubscription)
        .filter(|&p| p <= MAX_PARTS)
        .ok_or(PartitionError::TooManyParts {
            capacity: total_capacity,
            oversubscription,
            max: MAX_PARTS,
        })?;

    let parts_u64 = parts as u64;
    let adjusted_panels = if upper < lower {
        0
    } else {
        (total_panels / parts_u64) * parts_u64
    };
    let panels_per_part = adjusted_panels / parts_u64;

    let h = (upper - lower) / parts as f64;
    let boundary = |i: usize| if i == parts { upper } else { lower + i as f64 * h };

    let partitions = (0..parts)
        .map(|i| Partition {
            index: i,
            lower: boundary(i),
            upper: boundary(i + 1),
            panels: panels_per_part,
        })
        .collect();

    Ok(PartitionPlan {
        parts,
        requested_panels: total_panels,
        adjusted_panels,
        panels_per_part,
        partitions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_single_part() {
        let plan = partition(0.0, 2.0, 4, 1, 1).unwrap();
        assert_eq!(plan.parts, 1);
        assert_eq!(plan.partitions, vec![Partition { index: 0, lower: 0.0, upper: 2.0, panels: 4 }]);
    }

    #[test]
    fn test_panels_rounded_down() {
        // 3 panels over 2 tasks: one panel is dropped
        let plan = partition(0.0, 1.0, 3, 2, 1).unwrap();
        assert_eq!(plan.parts, 2);
        assert_eq!(plan.adjusted_panels, 2);
        assert_eq!(plan.panels_per_part, 1);
        assert!(plan.partitions.iter().all(|p| p.panels == 1));
        assert_eq!(plan.dropped_panels(), 1);
    }

    #[test]
    fn test_budget_below_parts_gives_zero_panels() {
        let plan = partition(0.0, 1.0, 3, 4, 1).unwrap();
        assert_eq!(plan.adjusted_panels, 0);
        assert!(plan.partitions.iter().all(|p| p.panels == 0));
        assert_eq!(plan.partitions.len(), 4);
    }

    #[test]
    fn test_oversubscription_multiplies_parts() {
        let plan = partition(0.0, 8.0, 100, 2, 3).unwrap();
        assert_eq!(plan.parts, 6);
        assert_eq!(plan.adjusted_panels, 96);
        assert_eq!(plan.panels_per_part, 16);
    }

    #[test]
    fn test_reversed_domain_has_no_panels() {
        let plan = partition(1.0, 0.0, 100, 2, 1).unwrap();
        assert_eq!(plan.total_panels(), 0);
        assert_eq!(plan.partitions[0].lower, 1.0);
        assert_eq!(plan.partitions[1].upper, 0.0);
    }

    #[test]
    fn test_invalid_capacity() {
        assert_eq!(partition(0.0, 1.0, 10, 0, 1), Err(PartitionError::NoCapacity));
        assert_eq!(partition(0.0, 1.0, 10, 1, 0), Err(PartitionError::NoOversubscription));
        assert!(matches!(
            partition(0.0, 1.0, 10, usize::MAX, 2),
            Err(PartitionError::TooManyParts { .. })
        ));
        assert!(matches!(
            partition(0.0, 1.0, 10, MAX_PARTS, 2),
            Err(PartitionError::TooManyParts { .. })
        ));
    }

    #[test]
    fn test_random_plans_tile_domain() {
        let mut rng = rand::thread_rng();

        for _ in 0..500 {
            let lower: f64 = rng.gen_range(-1e3..1e3);
            let upper = lower + rng.gen_range(0.0..1e3);
            let capacity = rng.gen_range(1..=64);
            let oversubscription = rng.gen_range(1..=4);
            let parts = (capacity * oversubscription) as u64;
            let total_panels = rng.gen_range(parts..=100_000);

            let plan = partition(lower, upper, total_panels, capacity, oversubscription).unwrap();

            // Panel sum follows the rounding rule
            assert_eq!(plan.total_panels(), (total_panels / parts) * parts);
            assert!(plan.total_panels() <= total_panels);

            // Contiguous, non-overlapping, and covering [lower, upper]
            assert_eq!(plan.partitions.first().unwrap().lower, lower);
            assert_eq!(plan.partitions.last().unwrap().upper, upper);
            for pair in plan.partitions.windows(2) {
                assert_eq!(pair[0].upper, pair[1].lower);
                assert!(pair[0].lower <= pair[0].upper);
            }
            for (i, p) in plan.partitions.iter().enumerate() {
                assert_eq!(p.index, i);
            }
        }
    }
}
