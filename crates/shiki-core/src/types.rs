//! Core data types shared across the analysis engine.
//!
//! Seasons are a closed enumeration; the rendered prompt text is only ever
//! produced from a `Season`, never parsed back into one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::pipeline::hash::Fingerprint;
use crate::uncertainty::Metric;

/// Name of the destination folder for results routed as unknown.
pub const UNKNOWN_FOLDER: &str = "unknown";

/// One of the four season labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Spring,
    Summer,
    Autumn,
    Winter,
}

impl Season {
    /// All seasons in canonical order. Probability vectors use this order.
    pub const ALL: [Season; 4] = [Season::Spring, Season::Summer, Season::Autumn, Season::Winter];

    /// Position of this season in [`Season::ALL`].
    pub fn index(self) -> usize {
        match self {
            Season::Spring => 0,
            Season::Summer => 1,
            Season::Autumn => 2,
            Season::Winter => 3,
        }
    }

    /// Lowercase name, also used as the destination folder name.
    pub fn as_str(self) -> &'static str {
        match self {
            Season::Spring => "spring",
            Season::Summer => "summer",
            Season::Autumn => "autumn",
            Season::Winter => "winter",
        }
    }

    /// Render the text prompt for this season from a `{season}` template.
    pub fn prompt(self, template: &str) -> String {
        template.replace("{season}", self.as_str())
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Season {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "spring" => Ok(Season::Spring),
            "summer" => Ok(Season::Summer),
            "autumn" | "fall" => Ok(Season::Autumn),
            "winter" => Ok(Season::Winter),
            other => Err(format!("unknown season: {other:?}")),
        }
    }
}

/// Probability distribution over the four seasons.
///
/// Always built through a softmax (or read back from the cache), so values are
/// non-negative and sum to 1 within floating tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeasonProbabilities {
    pub spring: f64,
    pub summer: f64,
    pub autumn: f64,
    pub winter: f64,
}

impl SeasonProbabilities {
    /// Build a distribution from raw values in [`Season::ALL`] order.
    pub fn from_array(values: [f64; 4]) -> Self {
        Self {
            spring: values[0],
            summer: values[1],
            autumn: values[2],
            winter: values[3],
        }
    }

    /// Normalized exponential over four logits.
    ///
    /// The maximum logit is subtracted first so large scales cannot overflow.
    pub fn softmax(logits: [f64; 4]) -> Self {
        let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let exps = logits.map(|l| (l - max).exp());
        let sum: f64 = exps.iter().sum();
        Self::from_array(exps.map(|e| e / sum))
    }

    /// Values in [`Season::ALL`] order.
    pub fn as_array(&self) -> [f64; 4] {
        [self.spring, self.summer, self.autumn, self.winter]
    }

    /// Probability of one season.
    pub fn get(&self, season: Season) -> f64 {
        self.as_array()[season.index()]
    }

    /// Arg-max season and its probability. Ties resolve to the earlier season.
    pub fn top(&self) -> (Season, f64) {
        let values = self.as_array();
        let mut best = 0;
        for i in 1..values.len() {
            if values[i] > values[best] {
                best = i;
            }
        }
        (Season::ALL[best], values[best])
    }

    /// Values sorted descending (`p1 >= p2 >= p3 >= p4`).
    pub fn sorted_desc(&self) -> [f64; 4] {
        let mut values = self.as_array();
        values.sort_by(|a, b| b.total_cmp(a));
        values
    }

    /// Check the distribution invariant: non-negative, summing to 1 within `tolerance`.
    pub fn is_well_formed(&self, tolerance: f64) -> bool {
        let values = self.as_array();
        values.iter().all(|p| p.is_finite() && *p >= 0.0)
            && (values.iter().sum::<f64>() - 1.0).abs() <= tolerance
    }
}

/// An image observed during a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Path of the file, unique within one scan
    pub path: PathBuf,

    /// File size in bytes
    pub size: u64,

    /// Modification time in nanoseconds since the Unix epoch
    pub modified_ns: i64,

    /// Perceptual hash, when computed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<Fingerprint>,

    /// Image embedding, kept only while the record is in memory
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl ImageRecord {
    /// Observe a file on disk, capturing size and modification time.
    pub fn observe(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            size: meta.len(),
            modified_ns: modified_nanos(meta.modified().ok()),
            hash: None,
            embedding: None,
        })
    }

    /// File name portion of the path.
    pub fn file_name(&self) -> String {
        file_name_of(&self.path)
    }
}

/// Convert a modification time into signed nanoseconds since the epoch.
pub(crate) fn modified_nanos(modified: Option<SystemTime>) -> i64 {
    match modified {
        Some(time) => match time.duration_since(UNIX_EPOCH) {
            Ok(d) => i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
            Err(e) => -i64::try_from(e.duration().as_nanos()).unwrap_or(i64::MAX),
        },
        None => 0,
    }
}

pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string()
}

/// A pair of images whose fingerprints fall within the duplicate bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicatePair {
    pub left: PathBuf,
    pub right: PathBuf,

    /// Hamming distance between the two fingerprints
    pub distance: u32,

    /// `1 - distance / hash_bits`, so 1.0 means identical fingerprints
    pub similarity: f64,
}

/// Season classification of one image under a metric and threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Absolute path to the image
    pub path: PathBuf,

    /// Just the filename portion
    pub file_name: String,

    /// Full probability distribution
    pub probabilities: SeasonProbabilities,

    /// Arg-max label, or the manual override
    pub label: Season,

    /// Uncertainty score under the active metric
    pub score: f64,

    /// Whether the metric crossed its threshold
    pub is_unknown: bool,

    /// Set once the label was overridden by hand
    #[serde(default)]
    pub manually_labeled: bool,
}

impl ClassificationResult {
    /// Derive label, score and unknown flag from a distribution.
    pub fn evaluate(
        path: PathBuf,
        probabilities: SeasonProbabilities,
        metric: Metric,
        threshold: f64,
    ) -> Self {
        let (label, _) = probabilities.top();
        let score = metric.score(&probabilities);
        Self {
            file_name: file_name_of(&path),
            path,
            probabilities,
            label,
            score,
            is_unknown: metric.is_unknown(score, threshold),
            manually_labeled: false,
        }
    }

    /// Overwrite the label by hand. This is the only path that clears `is_unknown`.
    pub fn reclassify(&mut self, label: Season) {
        self.label = label;
        self.is_unknown = false;
        self.manually_labeled = true;
    }

    /// Folder the result lands in when reorganized.
    pub fn folder_name(&self) -> &'static str {
        if self.is_unknown {
            UNKNOWN_FOLDER
        } else {
            self.label.as_str()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_is_well_formed() {
        let probs = SeasonProbabilities::softmax([25.0, 27.5, 22.0, 30.1]);
        assert!(probs.is_well_formed(1e-6));
        assert_eq!(probs.top().0, Season::Winter);
    }

    #[test]
    fn test_softmax_large_logits_do_not_overflow() {
        let probs = SeasonProbabilities::softmax([1000.0, 999.0, -1000.0, 0.0]);
        assert!(probs.is_well_formed(1e-9));
        assert!(probs.spring > probs.summer);
    }

    #[test]
    fn test_top_ties_resolve_to_first_season() {
        let probs = SeasonProbabilities::from_array([0.25; 4]);
        assert_eq!(probs.top(), (Season::Spring, 0.25));
    }

    #[test]
    fn test_sorted_desc() {
        let probs = SeasonProbabilities::from_array([0.1, 0.6, 0.2, 0.1]);
        assert_eq!(probs.sorted_desc(), [0.6, 0.2, 0.1, 0.1]);
    }

    #[test]
    fn test_season_parse_and_prompt() {
        assert_eq!("Autumn".parse::<Season>().unwrap(), Season::Autumn);
        assert_eq!("fall".parse::<Season>().unwrap(), Season::Autumn);
        assert!("monsoon".parse::<Season>().is_err());
        assert_eq!(
            Season::Winter.prompt("a photo of {season}"),
            "a photo of winter"
        );
    }

    #[test]
    fn test_reclassify_clears_unknown() {
        let probs = SeasonProbabilities::from_array([0.3, 0.3, 0.2, 0.2]);
        let mut result = ClassificationResult::evaluate(
            PathBuf::from("/photos/a.jpg"),
            probs,
            Metric::Probability,
            0.5,
        );
        assert!(result.is_unknown);
        assert_eq!(result.folder_name(), UNKNOWN_FOLDER);

        result.reclassify(Season::Summer);
        assert!(!result.is_unknown);
        assert!(result.manually_labeled);
        assert_eq!(result.label, Season::Summer);
        assert_eq!(result.folder_name(), "summer");
        // The distribution itself is untouched.
        assert_eq!(result.probabilities, probs);
    }

    #[test]
    fn test_classification_result_serde() {
        let result = ClassificationResult::evaluate(
            PathBuf::from("/photos/beach.jpg"),
            SeasonProbabilities::from_array([0.05, 0.85, 0.05, 0.05]),
            Metric::Probability,
            0.5,
        );
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"label\":\"summer\""));
        assert!(json.contains("\"file_name\":\"beach.jpg\""));
        let parsed: ClassificationResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.label, Season::Summer);
        assert!(!parsed.is_unknown);
    }

    #[test]
    fn test_modified_nanos_epoch() {
        assert_eq!(modified_nanos(Some(UNIX_EPOCH)), 0);
        assert_eq!(modified_nanos(None), 0);
        let later = UNIX_EPOCH + std::time::Duration::from_secs(2);
        assert_eq!(modified_nanos(Some(later)), 2_000_000_000);
    }
}
