//! Shiki Core - duplicate detection and season classification for image folders.
//!
//! Shiki scans one folder of images along two axes: near-identical images
//! grouped by perceptual hash for review and deletion, and a zero-shot season
//! label per image from a CLIP embedding, with unknowns flagged by a
//! configurable uncertainty metric. Classified images can then be moved or
//! copied into season folders.
//!
//! # Architecture
//!
//! ```text
//! Folder → Discover → Cache lookup → Validate → Decode → Hash (+ Embed → Softmax) → Cache
//!                                                           ↓
//!                                         Duplicate groups | Uncertainty → Threshold
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use shiki_core::{Config, SeasonScanOptions, Shiki};
//!
//! #[tokio::main]
//! async fn main() -> shiki_core::Result<()> {
//!     let config = Config::load()?;
//!     let options = SeasonScanOptions::from_config(&config.classify);
//!     let shiki = Shiki::new(config)?;
//!
//!     let scan = shiki.scan_seasons("./photos".as_ref(), options).await?;
//!     println!("{} unknown of {}", scan.unknown_count(), scan.total_processed);
//!     Ok(())
//! }
//! ```

// Module declarations
pub mod annotate;
pub mod cache;
pub mod classify;
pub mod config;
pub mod duplicates;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod math;
pub mod pipeline;
pub mod reorganize;
pub mod report;
pub mod threshold;
pub mod types;
pub mod uncertainty;

// Re-exports for convenient access
pub use annotate::{Annotator, CanvasSize};
pub use cache::{AnalysisCache, AnalysisKey};
pub use classify::{ClipSeasonClassifier, SeasonModel};
pub use config::Config;
pub use duplicates::{DuplicateGroup, ReviewSession, ReviewState};
pub use embedding::EmbeddingEngine;
pub use engine::{
    reclassify, DuplicateScan, ScanOptions, SeasonScan, SeasonScanOptions, Shiki, ThresholdMode,
};
pub use error::{
    CacheError, ConfigError, PipelineError, PipelineResult, ReorganizeError, Result, ReviewError,
    ShikiError,
};
pub use pipeline::{CancelToken, ProgressCallback, ScanProgress};
pub use reorganize::{ReorganizeMode, ReorganizeSummary};
pub use report::ScanReport;
pub use threshold::{ThresholdOptimizer, ThresholdSweepResult};
pub use types::{ClassificationResult, DuplicatePair, ImageRecord, Season, SeasonProbabilities};
pub use uncertainty::Metric;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
