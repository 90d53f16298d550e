//! Summary statistics over a season scan.

use serde::{Deserialize, Serialize};

use crate::threshold::{simulate, SweepPoint};
use crate::types::{ClassificationResult, Season};
use crate::uncertainty::Metric;

/// Thresholds shown in the simulation table.
pub const SIMULATION_THRESHOLDS: [f64; 8] = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8];

fn mean_of(members: &[&ClassificationResult], f: impl Fn(&ClassificationResult) -> f64) -> f64 {
    if members.is_empty() {
        return 0.0;
    }
    members.iter().map(|r| f(r)).sum::<f64>() / members.len() as f64
}

/// Per-label breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonStats {
    pub season: Season,
    pub count: usize,
    pub mean_top_probability: f64,
    pub mean_score: f64,
    pub unknown_count: usize,
}

/// Spread of the active metric's scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
}

impl ScoreSummary {
    /// `None` for an empty input.
    pub fn from_scores(scores: &[f64]) -> Option<Self> {
        if scores.is_empty() {
            return None;
        }
        let mut sorted = scores.to_vec();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        let median = if n % 2 == 0 {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        } else {
            sorted[n / 2]
        };
        Some(Self {
            min: sorted[0],
            max: sorted[n - 1],
            mean: sorted.iter().sum::<f64>() / n as f64,
            median,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub metric: Metric,
    pub threshold: f64,
    pub total: usize,
    pub unknown: usize,
    /// One entry per season in canonical order, including empty ones
    pub seasons: Vec<SeasonStats>,
    pub scores: Option<ScoreSummary>,
    /// Unknown count at each of [`SIMULATION_THRESHOLDS`]
    pub simulation: Vec<SweepPoint>,
}

impl ScanReport {
    pub fn build(results: &[ClassificationResult], metric: Metric, threshold: f64) -> Self {
        let seasons = Season::ALL
            .iter()
            .map(|&season| {
                let members: Vec<&ClassificationResult> =
                    results.iter().filter(|r| r.label == season).collect();
                SeasonStats {
                    season,
                    count: members.len(),
                    mean_top_probability: mean_of(&members, |r| r.probabilities.top().1),
                    mean_score: mean_of(&members, |r| r.score),
                    unknown_count: members.iter().filter(|r| r.is_unknown).count(),
                }
            })
            .collect();

        let scores: Vec<f64> = results.iter().map(|r| r.score).collect();
        let distributions: Vec<_> = results.iter().map(|r| r.probabilities).collect();

        Self {
            metric,
            threshold,
            total: results.len(),
            unknown: results.iter().filter(|r| r.is_unknown).count(),
            seasons,
            scores: ScoreSummary::from_scores(&scores),
            simulation: simulate(&distributions, metric, &SIMULATION_THRESHOLDS),
        }
    }
}
