//! Automatic threshold selection by grid sweep.
//!
//! For a fixed set of distributions and a metric, every threshold on an evenly
//! spaced grid over [0, 1] is evaluated and the one flagging the fewest
//! unknowns wins. Ties go to the smallest threshold.
//!
//! The sweep assumes unknown-count is monotonic in the threshold
//! (non-decreasing for `probability` and `margin_confidence`, non-increasing
//! for the others). That holds for these score definitions, but nothing here
//! relies on it: every grid point is evaluated.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::SeasonProbabilities;
use crate::uncertainty::Metric;

/// Unknown count at one grid threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepPoint {
    pub threshold: f64,
    pub unknown_count: usize,
}

/// Outcome of a sweep, in grid order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdSweepResult {
    pub metric: Metric,
    pub points: Vec<SweepPoint>,

    /// Smallest threshold achieving the minimal unknown count
    pub best_threshold: f64,
    pub best_unknown_count: usize,
}

/// Grid sweep over candidate thresholds.
#[derive(Debug, Clone)]
pub struct ThresholdOptimizer {
    steps: usize,
}

impl ThresholdOptimizer {
    /// Create an optimizer with a fixed grid step (e.g. 0.01 gives 101 points).
    pub fn new(step: f64) -> Result<Self, ConfigError> {
        Ok(Self {
            steps: grid_steps(step)?,
        })
    }

    /// Thresholds evaluated by this optimizer, ascending, 0 and 1 inclusive.
    ///
    /// Points are computed as `i / steps` rather than by repeated addition so
    /// that e.g. the 42nd point of a 0.01 grid is exactly `0.42`.
    pub fn grid(&self) -> impl Iterator<Item = f64> + '_ {
        (0..=self.steps).map(move |i| i as f64 / self.steps as f64)
    }

    /// Evaluate every grid point and select the best threshold.
    pub fn sweep(&self, items: &[SeasonProbabilities], metric: Metric) -> ThresholdSweepResult {
        let scores: Vec<f64> = items.iter().map(|p| metric.score(p)).collect();

        let points: Vec<SweepPoint> = self
            .grid()
            .map(|threshold| SweepPoint {
                threshold,
                unknown_count: scores
                    .iter()
                    .filter(|s| metric.is_unknown(**s, threshold))
                    .count(),
            })
            .collect();

        // Strict `<` keeps the first (smallest) threshold among ties.
        let mut best = points[0];
        for point in &points[1..] {
            if point.unknown_count < best.unknown_count {
                best = *point;
            }
        }

        tracing::debug!(
            "Threshold sweep ({}): best {:.2} with {} unknown of {}",
            metric,
            best.threshold,
            best.unknown_count,
            items.len()
        );

        ThresholdSweepResult {
            metric,
            points,
            best_threshold: best.threshold,
            best_unknown_count: best.unknown_count,
        }
    }
}

/// Number of grid intervals for a step; the step must divide 1 evenly.
pub(crate) fn grid_steps(step: f64) -> Result<usize, ConfigError> {
    if !(step > 0.0 && step <= 1.0) {
        return Err(ConfigError::ValidationError(
            "classify.sweep_step must be in (0.0, 1.0]".into(),
        ));
    }
    let steps = (1.0 / step).round();
    if ((steps * step) - 1.0).abs() > 1e-9 {
        return Err(ConfigError::ValidationError(format!(
            "classify.sweep_step {step} does not divide 1.0 into whole steps"
        )));
    }
    Ok(steps as usize)
}

/// Unknown count at each of a fixed list of thresholds.
pub fn simulate(
    items: &[SeasonProbabilities],
    metric: Metric,
    thresholds: &[f64],
) -> Vec<SweepPoint> {
    thresholds
        .iter()
        .map(|&threshold| SweepPoint {
            threshold,
            unknown_count: items
                .iter()
                .filter(|p| metric.evaluate(p, threshold))
                .count(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `[1 - 3e, e, e, e]` has entropy increasing in `e` on [0, 0.25].
    fn with_entropy(target: f64) -> SeasonProbabilities {
        let (mut lo, mut hi) = (0.0_f64, 0.25_f64);
        for _ in 0..200 {
            let mid = (lo + hi) / 2.0;
            let p = SeasonProbabilities::from_array([1.0 - 3.0 * mid, mid, mid, mid]);
            if Metric::Entropy.score(&p) < target {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        SeasonProbabilities::from_array([1.0 - 3.0 * lo, lo, lo, lo])
    }

    #[test]
    fn test_grid_endpoints_and_exact_points() {
        let optimizer = ThresholdOptimizer::new(0.01).unwrap();
        let grid: Vec<f64> = optimizer.grid().collect();
        assert_eq!(grid.len(), 101);
        assert_eq!(grid[0], 0.0);
        assert_eq!(grid[100], 1.0);
        assert_eq!(grid[42], 0.42);
    }

    #[test]
    fn test_rejects_bad_steps() {
        assert!(ThresholdOptimizer::new(0.0).is_err());
        assert!(ThresholdOptimizer::new(1.5).is_err());
        assert!(ThresholdOptimizer::new(0.3).is_err());
        assert!(ThresholdOptimizer::new(0.05).is_ok());
    }

    #[test]
    fn test_entropy_auto_threshold_lands_on_known_point() {
        // Highest entropy sits between 0.41 and 0.42, so 0.42 is the first
        // grid point that flags nothing.
        let items = vec![
            with_entropy(0.415),
            with_entropy(0.30),
            with_entropy(0.12),
            SeasonProbabilities::from_array([1.0, 0.0, 0.0, 0.0]),
        ];
        let optimizer = ThresholdOptimizer::new(0.01).unwrap();
        let sweep = optimizer.sweep(&items, Metric::Entropy);
        assert_eq!(sweep.best_threshold, 0.42);
        assert_eq!(sweep.best_unknown_count, 0);
    }

    #[test]
    fn test_ties_choose_smallest_threshold() {
        // Every probability score is 0.9; thresholds 0.0..=0.9 all flag zero.
        let items = vec![SeasonProbabilities::from_array([0.9, 0.05, 0.03, 0.02]); 3];
        let optimizer = ThresholdOptimizer::new(0.1).unwrap();
        let sweep = optimizer.sweep(&items, Metric::Probability);
        assert_eq!(sweep.best_threshold, 0.0);
        assert_eq!(sweep.best_unknown_count, 0);

        let min = sweep.points.iter().map(|p| p.unknown_count).min().unwrap();
        let first = sweep
            .points
            .iter()
            .find(|p| p.unknown_count == min)
            .unwrap();
        assert_eq!(first.threshold, sweep.best_threshold);
    }

    #[test]
    fn test_unknown_count_monotonic_per_direction() {
        let items: Vec<SeasonProbabilities> = [
            [0.7, 0.1, 0.1, 0.1],
            [0.4, 0.3, 0.2, 0.1],
            [0.26, 0.25, 0.25, 0.24],
            [0.5, 0.45, 0.03, 0.02],
            [0.97, 0.01, 0.01, 0.01],
        ]
        .into_iter()
        .map(SeasonProbabilities::from_array)
        .collect();
        let optimizer = ThresholdOptimizer::new(0.05).unwrap();

        for metric in Metric::ALL {
            let counts: Vec<usize> = optimizer
                .sweep(&items, metric)
                .points
                .iter()
                .map(|p| p.unknown_count)
                .collect();
            let monotonic = match metric.direction() {
                crate::uncertainty::Direction::Below => counts.windows(2).all(|w| w[0] <= w[1]),
                crate::uncertainty::Direction::Above => counts.windows(2).all(|w| w[0] >= w[1]),
            };
            assert!(monotonic, "{metric} counts not monotonic: {counts:?}");
        }
    }

    #[test]
    fn test_simulate_fixed_thresholds() {
        let items = vec![
            SeasonProbabilities::from_array([0.3, 0.3, 0.2, 0.2]),
            SeasonProbabilities::from_array([0.8, 0.1, 0.05, 0.05]),
        ];
        let points = simulate(&items, Metric::Probability, &[0.2, 0.5, 0.9]);
        let counts: Vec<usize> = points.iter().map(|p| p.unknown_count).collect();
        assert_eq!(counts, vec![0, 1, 2]);
    }
}
