//! Grid planning
//!
//! Expands the configured exponent ranges, reorders them so that coarse
//! coverage comes first, and groups the Cartesian product into batches that
//! each add one C or one gamma value to the already-covered sub-grid.

use crate::core::{GridError, GridPoint, RangeSpec, Result};

/// Upper bound on the number of values a single range may expand to
pub const MAX_RANGE_VALUES: usize = 1 << 16;

/// Inclusive arithmetic sequence from `begin` towards `end`.
///
/// Stops before the first value that would overshoot `end` in the direction
/// of `step`. Non-finite bounds, a zero step, a step too small to move the
/// running value and sequences longer than [`MAX_RANGE_VALUES`] are rejected.
pub fn range_f(begin: f64, end: f64, step: f64) -> Result<Vec<f64>> {
    if step == 0.0 || !step.is_finite() {
        return Err(GridError::Configuration(format!(
            "range step must be a non-zero finite number, got {step}"
        )));
    }
    if !begin.is_finite() || !end.is_finite() {
        return Err(GridError::Configuration(format!(
            "range bounds must be finite, got {begin},{end}"
        )));
    }

    let mut seq = Vec::new();
    let mut value = begin;
    loop {
        if step > 0.0 && value > end {
            break;
        }
        if step < 0.0 && value < end {
            break;
        }
        if seq.len() == MAX_RANGE_VALUES {
            return Err(GridError::Configuration(format!(
                "range {begin},{end},{step} has more than {MAX_RANGE_VALUES} values"
            )));
        }
        seq.push(value);

        let next = value + step;
        if next == value {
            return Err(GridError::Configuration(format!(
                "range step {step} is too small to advance past {value}"
            )));
        }
        value = next;
    }
    Ok(seq)
}

/// Reorder a sequence so that well-spread samples come first.
///
/// The middle element leads, followed by the recursively permuted left and
/// right halves interleaved one element at a time.
pub fn permute_sequence<T: Copy>(seq: &[T]) -> Vec<T> {
    let n = seq.len();
    if n <= 1 {
        return seq.to_vec();
    }

    let mid = n / 2;
    let left = permute_sequence(&seq[..mid]);
    let right = permute_sequence(&seq[mid + 1..]);

    let mut ret = Vec::with_capacity(n);
    ret.push(seq[mid]);

    let mut left = left.into_iter();
    let mut right = right.into_iter();
    loop {
        let l = left.next();
        let r = right.next();
        if l.is_none() && r.is_none() {
            break;
        }
        ret.extend(l);
        ret.extend(r);
    }
    ret
}

/// Ordered evaluation plan for a search
#[derive(Debug, Clone, PartialEq)]
pub struct GridPlan {
    /// Permuted log2(C) values
    pub c_seq: Vec<f64>,
    /// Permuted log2(gamma) values
    pub g_seq: Vec<f64>,
    /// Batches in scheduling order
    pub batches: Vec<Vec<GridPoint>>,
}

impl GridPlan {
    /// Plan a search over two exponent ranges
    pub fn new(c_range: &RangeSpec, g_range: &RangeSpec) -> Result<Self> {
        let c_seq = permute_sequence(&c_range.values()?);
        let g_seq = permute_sequence(&g_range.values()?);
        Ok(Self::from_sequences(c_seq, g_seq))
    }

    /// Plan a search over already permuted sequences
    pub fn from_sequences(c_seq: Vec<f64>, g_seq: Vec<f64>) -> Self {
        let batches = calculate_jobs(&c_seq, &g_seq);
        Self {
            c_seq,
            g_seq,
            batches,
        }
    }

    /// Number of grid points over all batches
    pub fn len(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    /// Check if the plan has no points
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All points in scheduling order
    pub fn points(&self) -> impl Iterator<Item = GridPoint> + '_ {
        self.batches.iter().flatten().copied()
    }
}

fn progress(done: usize, total: usize) -> f64 {
    if total == 0 {
        f64::INFINITY
    } else {
        done as f64 / total as f64
    }
}

/// Group the Cartesian product `c_seq x g_seq` into refinement batches.
///
/// At every step the axis with the lower activated fraction gets its next
/// value, paired with every value already activated on the other axis.
/// Each pair lands in exactly one batch. Batches can be empty (the very
/// first one always is).
pub fn calculate_jobs(c_seq: &[f64], g_seq: &[f64]) -> Vec<Vec<GridPoint>> {
    let nr_c = c_seq.len();
    let nr_g = g_seq.len();
    let mut i = 0;
    let mut j = 0;
    let mut jobs = Vec::with_capacity(nr_c + nr_g);

    while i < nr_c || j < nr_g {
        if progress(i, nr_c) < progress(j, nr_g) {
            // increase C resolution
            let line = g_seq[..j]
                .iter()
                .map(|&g| GridPoint::new(c_seq[i], g))
                .collect();
            i += 1;
            jobs.push(line);
        } else {
            // increase gamma resolution
            let line = c_seq[..i]
                .iter()
                .map(|&c| GridPoint::new(c, g_seq[j]))
                .collect();
            j += 1;
            jobs.push(line);
        }
    }
    jobs
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::collections::HashSet;

    #[test]
    fn test_range_f_positive_step() {
        let seq = range_f(-5.0, 15.0, 2.0).unwrap();
        assert_eq!(seq.len(), 11);
        assert_eq!(seq[0], -5.0);
        assert_eq!(*seq.last().unwrap(), 15.0);
        assert!(seq.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_range_f_stops_before_overshoot() {
        let seq = range_f(0.0, 1.0, 0.4).unwrap();
        assert_eq!(seq.len(), 3);
        assert_relative_eq!(seq[1], 0.4);
        assert_relative_eq!(seq[2], 0.8, epsilon = 1e-12);
    }

    #[test]
    fn test_range_f_negative_step() {
        let seq = range_f(3.0, -15.0, -2.0).unwrap();
        assert_eq!(seq.len(), 10);
        assert_eq!(seq[0], 3.0);
        assert_eq!(*seq.last().unwrap(), -15.0);
        assert!(seq.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_range_f_wrong_direction_is_empty() {
        assert!(range_f(1.0, -1.0, 1.0).unwrap().is_empty());
        assert!(range_f(-1.0, 1.0, -1.0).unwrap().is_empty());
        assert_eq!(range_f(2.0, 2.0, 1.0).unwrap(), vec![2.0]);
    }

    #[test]
    fn test_range_f_zero_step_rejected() {
        assert!(matches!(
            range_f(0.0, 1.0, 0.0),
            Err(GridError::Configuration(_))
        ));
        assert!(range_f(0.0, 1.0, f64::NAN).is_err());
    }

    #[test]
    fn test_range_f_non_finite_bounds_rejected() {
        for (begin, end) in [
            (f64::NAN, 1.0),
            (0.0, f64::NAN),
            (0.0, f64::INFINITY),
            (f64::NEG_INFINITY, 0.0),
        ] {
            assert!(matches!(
                range_f(begin, end, 1.0),
                Err(GridError::Configuration(_))
            ));
        }
    }

    #[test]
    fn test_range_f_absorbed_step_rejected() {
        // 1e17 + 1 rounds back to 1e17
        assert!(matches!(
            range_f(1e17, 2e17, 1.0),
            Err(GridError::Configuration(_))
        ));
    }

    #[test]
    fn test_range_f_too_many_values_rejected() {
        assert!(matches!(
            range_f(0.0, 1.0, 1e-9),
            Err(GridError::Configuration(_))
        ));
        let seq = range_f(0.0, (MAX_RANGE_VALUES - 1) as f64, 1.0).unwrap();
        assert_eq!(seq.len(), MAX_RANGE_VALUES);
    }

    #[test]
    fn test_permute_sequence_middle_first() {
        assert_eq!(permute_sequence(&[1, 2, 3, 4, 5]), vec![3, 2, 5, 1, 4]);
        assert_eq!(permute_sequence(&[1, 2, 3, 4])[0], 3);
        assert_eq!(permute_sequence::<i32>(&[]), Vec::<i32>::new());
        assert_eq!(permute_sequence(&[7]), vec![7]);
    }

    #[test]
    fn test_permute_sequence_is_permutation() {
        for n in 0..40 {
            let seq: Vec<i32> = (0..n).map(|x| x % 7).collect();
            let mut permuted = permute_sequence(&seq);
            let mut sorted = seq.clone();
            permuted.sort();
            sorted.sort();
            assert_eq!(permuted, sorted, "length {n}");
        }
    }

    #[test]
    fn test_calculate_jobs_two_by_two() {
        let batches = calculate_jobs(&[1.0, 2.0], &[10.0, 20.0]);
        let points: Vec<GridPoint> = batches.iter().flatten().copied().collect();
        assert_eq!(points.len(), 4);

        let unique: HashSet<GridPoint> = points.into_iter().collect();
        assert_eq!(unique.len(), 4);
        for c in [1.0, 2.0] {
            for g in [10.0, 20.0] {
                assert!(unique.contains(&GridPoint::new(c, g)));
            }
        }
    }

    #[test]
    fn test_calculate_jobs_alternates_axes() {
        let batches = calculate_jobs(&[1.0, 2.0], &[10.0, 20.0]);
        assert_eq!(
            batches,
            vec![
                vec![],
                vec![GridPoint::new(1.0, 10.0)],
                vec![GridPoint::new(1.0, 20.0)],
                vec![GridPoint::new(2.0, 10.0), GridPoint::new(2.0, 20.0)],
            ]
        );
    }

    #[test]
    fn test_calculate_jobs_covers_uneven_grid() {
        let c: Vec<f64> = (0..7).map(f64::from).collect();
        let g: Vec<f64> = (0..3).map(|x| -f64::from(x)).collect();
        let batches = calculate_jobs(&c, &g);
        assert_eq!(batches.len(), 10);

        let points: Vec<GridPoint> = batches.into_iter().flatten().collect();
        let unique: HashSet<GridPoint> = points.iter().copied().collect();
        assert_eq!(points.len(), 21);
        assert_eq!(unique.len(), 21);
    }

    #[test]
    fn test_calculate_jobs_empty_axis() {
        let batches = calculate_jobs(&[], &[1.0, 2.0]);
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(Vec::is_empty));
        assert!(calculate_jobs(&[], &[]).is_empty());
    }

    #[test]
    fn test_grid_plan_three_by_three() {
        let plan = GridPlan::new(
            &RangeSpec::new(-1.0, 1.0, 1.0),
            &RangeSpec::new(1.0, -1.0, -1.0),
        )
        .unwrap();
        assert_eq!(plan.c_seq, vec![0.0, -1.0, 1.0]);
        assert_eq!(plan.g_seq, vec![0.0, 1.0, -1.0]);
        assert_eq!(plan.len(), 9);

        let unique: HashSet<GridPoint> = plan.points().collect();
        assert_eq!(unique.len(), 9);
    }

    #[test]
    fn test_grid_plan_rejects_zero_step() {
        let result = GridPlan::new(
            &RangeSpec::new(-1.0, 1.0, 0.0),
            &RangeSpec::new(1.0, -1.0, -1.0),
        );
        assert!(result.is_err());
    }
}
