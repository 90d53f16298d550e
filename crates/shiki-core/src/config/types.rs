//! Sub-configuration structs with their defaults.

use crate::annotate::CanvasSize;
use crate::reorganize::ReorganizeMode;
use crate::uncertainty::Metric;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory where models are stored
    pub model_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("~/.shiki/models"),
        }
    }
}

/// Processing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Number of parallel workers
    pub parallel_workers: usize,

    /// Supported input formats
    pub supported_formats: Vec<String>,
}

impl ProcessingConfig {
    /// Worker count derived from available CPU parallelism.
    pub fn default_workers() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            parallel_workers: Self::default_workers(),
            supported_formats: vec![
                "jpg".to_string(),
                "jpeg".to_string(),
                "png".to_string(),
                "bmp".to_string(),
                "webp".to_string(),
            ],
        }
    }
}

/// Resource limits to protect against problematic inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum file size in megabytes
    pub max_file_size_mb: u64,

    /// Maximum image dimension (width or height)
    pub max_image_dimension: u32,

    /// Decode timeout in milliseconds
    pub decode_timeout_ms: u64,

    /// Embedding timeout in milliseconds
    pub embed_timeout_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: 100,
            max_image_dimension: 12000,
            decode_timeout_ms: 5000,
            embed_timeout_ms: 30000,
        }
    }
}

/// Embedding model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Model directory name under `general.model_dir`
    pub model: String,

    /// Square input size expected by the vision encoder
    pub image_size: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "clip-vit-base-patch32".to_string(),
            image_size: 224,
        }
    }
}

/// Season classification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifyConfig {
    /// Uncertainty metric used to flag unknown results
    pub metric: Metric,

    /// Threshold in [0, 1] applied with the metric's direction
    pub threshold: f64,

    /// Pick the threshold automatically by sweeping a grid
    pub auto_threshold: bool,

    /// Grid step for the automatic sweep; must divide 1.0 evenly
    pub sweep_step: f64,

    /// Multiplier applied to cosine similarities before the softmax.
    /// CLIP's learned temperature is 100.
    pub logit_scale: f64,

    /// Prompt text per season; `{season}` is replaced by the season name
    pub prompt_template: String,

    /// Token budget of the text encoder, including start and end tokens
    pub max_prompt_tokens: usize,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            metric: Metric::Entropy,
            threshold: 0.5,
            auto_threshold: false,
            sweep_step: 0.01,
            logit_scale: 100.0,
            prompt_template: "a photo of {season}".to_string(),
            max_prompt_tokens: 77,
        }
    }
}

/// Duplicate detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicatesConfig {
    /// Hash grid edge; the fingerprint has `hash_size * hash_size` bits
    pub hash_size: u32,

    /// Largest Hamming distance still counted as a duplicate (0 = exact match)
    pub max_distance: u32,
}

impl Default for DuplicatesConfig {
    fn default() -> Self {
        Self {
            hash_size: 8,
            max_distance: 4,
        }
    }
}

impl DuplicatesConfig {
    pub fn hash_bits(&self) -> u32 {
        self.hash_size * self.hash_size
    }
}

/// Per-folder analysis cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether scans read and write the cache
    pub enabled: bool,

    /// Cache table file name inside the scanned folder
    pub file_name: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file_name: ".shiki-analysis.csv".to_string(),
        }
    }
}

/// File reorganization settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ReorganizeConfig {
    /// Default relocation mode
    pub mode: ReorganizeMode,

    /// Destination root; the scanned folder when unset
    pub output_dir: Option<PathBuf>,

    /// Route unknown results into an `unknown/` folder instead of skipping them
    pub include_unknown: bool,

    /// Copy mode writes captioned re-encodings instead of the original bytes
    pub annotate: bool,

    /// Canvas, e.g. "1920x1080", that annotated images are centred on first
    pub annotate_size: Option<CanvasSize>,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,

    /// Log format: "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
