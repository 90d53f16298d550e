//! Uncertainty metrics over a season probability distribution.
//!
//! Each metric maps a distribution to a scalar score and carries its own
//! comparison direction against a threshold `t`:
//!
//! | Metric              | Score                         | Unknown iff  |
//! |---------------------|-------------------------------|--------------|
//! | `probability`       | `p1`                          | `score < t`  |
//! | `entropy`           | `-sum(p * ln p) / ln 4`       | `score > t`  |
//! | `margin_confidence` | `p1 - p2`                     | `score < t`  |
//! | `least_confidence`  | `1 - p1`                      | `score > t`  |
//! | `ratio_confidence`  | `p2 / p1`                     | `score > t`  |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::types::SeasonProbabilities;

/// Interchangeable uncertainty metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Probability,
    Entropy,
    MarginConfidence,
    LeastConfidence,
    RatioConfidence,
}

/// Which side of the threshold counts as unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Unknown when the score falls below the threshold
    Below,
    /// Unknown when the score rises above the threshold
    Above,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::Probability,
        Metric::Entropy,
        Metric::MarginConfidence,
        Metric::LeastConfidence,
        Metric::RatioConfidence,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Probability => "probability",
            Metric::Entropy => "entropy",
            Metric::MarginConfidence => "margin_confidence",
            Metric::LeastConfidence => "least_confidence",
            Metric::RatioConfidence => "ratio_confidence",
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            Metric::Probability | Metric::MarginConfidence => Direction::Below,
            Metric::Entropy | Metric::LeastConfidence | Metric::RatioConfidence => {
                Direction::Above
            }
        }
    }

    /// Scalar score of a distribution under this metric, in [0, 1].
    pub fn score(self, probs: &SeasonProbabilities) -> f64 {
        let [p1, p2, _, _] = probs.sorted_desc();
        match self {
            Metric::Probability => p1,
            Metric::Entropy => normalized_entropy(&probs.as_array()),
            Metric::MarginConfidence => p1 - p2,
            Metric::LeastConfidence => 1.0 - p1,
            Metric::RatioConfidence => {
                if p1 > 0.0 {
                    p2 / p1
                } else {
                    1.0
                }
            }
        }
    }

    /// Apply this metric's comparison direction to a score.
    pub fn is_unknown(self, score: f64, threshold: f64) -> bool {
        match self.direction() {
            Direction::Below => score < threshold,
            Direction::Above => score > threshold,
        }
    }

    /// Score and compare in one step.
    pub fn evaluate(self, probs: &SeasonProbabilities, threshold: f64) -> bool {
        self.is_unknown(self.score(probs), threshold)
    }
}

/// Shannon entropy divided by `ln(n)` so a uniform distribution scores 1.
///
/// Zero-probability terms contribute nothing (`0 * ln 0 = 0`).
fn normalized_entropy(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let entropy: f64 = values
        .iter()
        .filter(|p| **p > 0.0)
        .map(|p| -p * p.ln())
        .sum();
    (entropy / (n as f64).ln()).clamp(0.0, 1.0)
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "probability" => Ok(Metric::Probability),
            "entropy" => Ok(Metric::Entropy),
            "margin_confidence" | "margin" => Ok(Metric::MarginConfidence),
            "least_confidence" => Ok(Metric::LeastConfidence),
            "ratio_confidence" | "ratio" => Ok(Metric::RatioConfidence),
            _ => Err(ConfigError::UnknownMetric(s.to_string())),
        }
    }
}
