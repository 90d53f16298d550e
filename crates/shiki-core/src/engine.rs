//! The `Shiki` engine: folder scans, reclassification and reorganization.
//!
//! A scan discovers the images directly inside one folder, reuses fresh
//! analysis cache entries, computes the rest on the worker pool and writes
//! the cache back. Nothing is written when a scan is cancelled or aborted.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::annotate::Annotator;
use crate::cache::{AnalysisCache, AnalysisKey, CacheEntry};
use crate::classify::{ClipSeasonClassifier, SeasonModel};
use crate::config::{validate_threshold, ClassifyConfig, Config};
use crate::duplicates::{flatten_pairs, DuplicateGroup, DuplicateGrouper};
use crate::error::{ConfigError, Result, ShikiError};
use crate::pipeline::{
    Analysis, CancelToken, FileDiscovery, ImageProcessor, ProgressCallback, WorkerPool,
};
use crate::reorganize::{self, ReorganizeMode, ReorganizeSummary, Reorganizer};
use crate::report::ScanReport;
use crate::threshold::{ThresholdOptimizer, ThresholdSweepResult};
use crate::types::{ClassificationResult, DuplicatePair, ImageRecord, Season, SeasonProbabilities};
use crate::uncertainty::Metric;

/// Options shared by both scan kinds.
#[derive(Clone, Default)]
pub struct ScanOptions {
    /// Worker count for this scan; `processing.parallel_workers` when unset
    pub workers: Option<usize>,
    /// Ignore cached entries (results are still written back)
    pub force: bool,
    pub cancel: Option<CancelToken>,
    pub progress: Option<ProgressCallback>,
}

/// How the unknown threshold is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMode {
    Fixed(f64),
    /// Grid sweep minimizing the unknown count
    Auto,
}

#[derive(Clone)]
pub struct SeasonScanOptions {
    pub threshold: ThresholdMode,
    pub metric: Metric,
    pub scan: ScanOptions,
}

impl SeasonScanOptions {
    /// Threshold mode and metric from the `[classify]` section.
    pub fn from_config(config: &ClassifyConfig) -> Self {
        let threshold = if config.auto_threshold {
            ThresholdMode::Auto
        } else {
            ThresholdMode::Fixed(config.threshold)
        };
        Self {
            threshold,
            metric: config.metric,
            scan: ScanOptions::default(),
        }
    }
}

/// Result of a duplicate scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateScan {
    /// First member of each group paired with every other member, in group order
    pub pairs: Vec<DuplicatePair>,
    pub groups: Vec<DuplicateGroup>,
    pub total_processed: usize,
    pub skipped: usize,
    /// Images reused from the analysis cache
    pub cached: usize,
    pub elapsed_seconds: f64,
}

/// Result of a season scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonScan {
    /// One result per processed image, in discovery order
    pub results: Vec<ClassificationResult>,
    pub total_processed: usize,
    pub skipped: usize,
    pub cached: usize,
    pub elapsed_seconds: f64,
    /// Threshold the results were evaluated under
    pub threshold: f64,
    pub metric: Metric,
    /// Full sweep, when the threshold was chosen automatically
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep: Option<ThresholdSweepResult>,
}

impl SeasonScan {
    pub fn unknown_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_unknown).count()
    }

    pub fn report(&self) -> ScanReport {
        ScanReport::build(&self.results, self.metric, self.threshold)
    }
}

/// Records of one folder analysis, in discovery order.
struct FolderAnalysis {
    items: Vec<(ImageRecord, Option<SeasonProbabilities>)>,
    skipped: usize,
    cached: usize,
}

/// Override the label of result `index` by hand.
///
/// Only that result changes; the cache and the filesystem are untouched.
pub fn reclassify(
    results: &mut [ClassificationResult],
    index: usize,
    label: Season,
) -> Result<&ClassificationResult> {
    let len = results.len();
    let result = results
        .get_mut(index)
        .ok_or(ShikiError::IndexOutOfRange { index, len })?;
    result.reclassify(label);
    Ok(result)
}

/// The analysis engine.
pub struct Shiki {
    config: Config,
    processor: ImageProcessor,
    discovery: FileDiscovery,
    model: OnceCell<Arc<dyn SeasonModel>>,
}

impl Shiki {
    /// Create an engine. The configuration is validated here, before any scan.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        tracing::debug!("Initializing Shiki v{}", crate::VERSION);
        Ok(Self {
            processor: ImageProcessor::new(&config),
            discovery: FileDiscovery::new(config.processing.clone()),
            model: OnceCell::new(),
            config,
        })
    }

    /// Use `model` for season scans instead of loading the CLIP backend.
    pub fn with_model(mut self, model: Arc<dyn SeasonModel>) -> Self {
        self.model = OnceCell::new_with(Some(model));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Fingerprint every image in `folder` and group near-identical ones.
    pub async fn scan_duplicates(&self, folder: &Path, options: ScanOptions) -> Result<DuplicateScan> {
        let start = Instant::now();
        let analysis = self.analyze(folder, &options, false).await?;

        let records: Vec<ImageRecord> = analysis.items.into_iter().map(|(r, _)| r).collect();
        let groups = DuplicateGrouper::new(&self.config.duplicates).group(&records);
        let pairs = flatten_pairs(&groups);

        tracing::info!(
            "Duplicate scan of {:?}: {} images, {} groups, {} skipped",
            folder,
            records.len(),
            groups.len(),
            analysis.skipped
        );

        Ok(DuplicateScan {
            pairs,
            groups,
            total_processed: records.len(),
            skipped: analysis.skipped,
            cached: analysis.cached,
            elapsed_seconds: start.elapsed().as_secs_f64(),
        })
    }

    /// Delete one image. `false` when the file was already gone.
    pub fn delete_image(&self, path: &Path) -> Result<bool> {
        Ok(reorganize::delete_image(path)?)
    }

    /// Classify every image in `folder` into a season.
    pub async fn scan_seasons(&self, folder: &Path, options: SeasonScanOptions) -> Result<SeasonScan> {
        enum Plan {
            Fixed(f64),
            Sweep(ThresholdOptimizer),
        }
        let plan = match options.threshold {
            ThresholdMode::Fixed(threshold) => {
                validate_threshold(threshold)?;
                Plan::Fixed(threshold)
            }
            ThresholdMode::Auto => Plan::Sweep(ThresholdOptimizer::new(self.config.classify.sweep_step)?),
        };

        let start = Instant::now();
        let analysis = self.analyze(folder, &options.scan, true).await?;

        let classified: Vec<(PathBuf, SeasonProbabilities)> = analysis
            .items
            .into_iter()
            .filter_map(|(record, probabilities)| Some((record.path, probabilities?)))
            .collect();

        let metric = options.metric;
        let (threshold, sweep) = match plan {
            Plan::Fixed(threshold) => (threshold, None),
            Plan::Sweep(optimizer) => {
                let distributions: Vec<SeasonProbabilities> =
                    classified.iter().map(|(_, p)| *p).collect();
                let sweep = optimizer.sweep(&distributions, metric);
                (sweep.best_threshold, Some(sweep))
            }
        };

        let results: Vec<ClassificationResult> = classified
            .into_iter()
            .map(|(path, probabilities)| {
                ClassificationResult::evaluate(path, probabilities, metric, threshold)
            })
            .collect();

        let scan = SeasonScan {
            total_processed: results.len(),
            results,
            skipped: analysis.skipped,
            cached: analysis.cached,
            elapsed_seconds: start.elapsed().as_secs_f64(),
            threshold,
            metric,
            sweep,
        };
        tracing::info!(
            "Season scan of {:?}: {} images, {} unknown ({} at {:.2}), {} skipped",
            folder,
            scan.total_processed,
            scan.unknown_count(),
            metric,
            threshold,
            scan.skipped
        );
        Ok(scan)
    }

    /// Relocate results into season folders under `output_folder`, falling
    /// back to `reorganize.output_dir` and then to `folder`.
    ///
    /// With `reorganize.annotate` set the mode must be copy.
    pub async fn execute_reorganization(
        &self,
        results: &[ClassificationResult],
        mode: ReorganizeMode,
        folder: &Path,
        output_folder: Option<&Path>,
    ) -> Result<ReorganizeSummary> {
        if !folder.is_dir() {
            return Err(ShikiError::FolderNotFound(folder.to_path_buf()));
        }
        let output = output_folder
            .map(Path::to_path_buf)
            .or_else(|| self.config.reorganize.output_dir.clone());

        let settings = &self.config.reorganize;
        let mut reorganizer = Reorganizer::new(mode, settings.include_unknown);
        if settings.annotate {
            let annotator = Annotator::new(self.config.classify.metric, settings.annotate_size);
            reorganizer = reorganizer.with_annotator(annotator)?;
        }
        let results = results.to_vec();
        let folder = folder.to_path_buf();
        let summary = tokio::task::spawn_blocking(move || {
            reorganizer.execute(&results, &folder, output.as_deref())
        })
        .await
        .map_err(|e| ShikiError::Io(std::io::Error::other(format!("Reorganize task failed: {e}"))))?;
        Ok(summary)
    }

    /// Load the season model on first use.
    async fn model(&self) -> Result<Arc<dyn SeasonModel>> {
        let model = self
            .model
            .get_or_try_init(|| async {
                let config = self.config.clone();
                tracing::info!("Loading season model {}", config.embedding.model);
                let loaded = tokio::task::spawn_blocking(move || ClipSeasonClassifier::load(&config))
                    .await
                    .map_err(|e| ShikiError::ModelUnavailable(format!("Model loader failed: {e}")))?
                    .map_err(|e| ShikiError::ModelUnavailable(e.to_string()))?;
                Ok::<Arc<dyn SeasonModel>, ShikiError>(Arc::new(loaded))
            })
            .await?;
        Ok(model.clone())
    }

    async fn analyze(
        &self,
        folder: &Path,
        options: &ScanOptions,
        classify: bool,
    ) -> Result<FolderAnalysis> {
        if !folder.is_dir() {
            return Err(ShikiError::FolderNotFound(folder.to_path_buf()));
        }
        let workers = options
            .workers
            .unwrap_or(self.config.processing.parallel_workers);
        if workers == 0 {
            return Err(ConfigError::ValidationError("workers must be at least 1".into()).into());
        }

        let mut cache = AnalysisCache::open(
            folder,
            &self.config.cache,
            AnalysisKey::from_config(&self.config),
        )?;

        let mut records = Vec::new();
        for file in self.discovery.discover(folder) {
            match ImageRecord::observe(&file.path) {
                Ok(record) => records.push(record),
                Err(e) => tracing::debug!("Dropping {:?} from scan: {}", file.path, e),
            }
        }

        let mut slots: Vec<Option<(ImageRecord, Option<SeasonProbabilities>)>> =
            vec![None; records.len()];
        let mut pending = Vec::new();
        let mut cached = 0usize;

        for (index, mut record) in records.iter().cloned().enumerate() {
            let hit = if options.force {
                None
            } else {
                cache
                    .get(&record.path, record.modified_ns, record.size)
                    .filter(|entry| entry.hash.is_some() && (!classify || entry.probabilities.is_some()))
            };
            match hit {
                Some(entry) => {
                    record.hash = entry.hash.clone();
                    slots[index] = Some((record, entry.probabilities));
                    cached += 1;
                }
                None => pending.push((index, record)),
            }
        }
        tracing::debug!(
            "{} of {} images served from cache, {} to compute",
            cached,
            records.len(),
            pending.len()
        );

        let model = if classify && !pending.is_empty() {
            Some(self.model().await?)
        } else {
            None
        };

        let pool = WorkerPool::new(workers)
            .with_progress(options.progress.clone())
            .with_cancel(options.cancel.clone().unwrap_or_default())
            .with_already_done(cached);
        let processor = self.processor.clone();
        let report = pool
            .run(pending, move |(index, record)| {
                let processor = processor.clone();
                let model = model.clone();
                async move {
                    let analysis: Analysis = processor.process(record, model).await?;
                    Ok((index, analysis))
                }
            })
            .await?;

        for (index, analysis) in report.completed {
            let record = analysis.record;
            // Keep earlier probabilities for an unchanged file scanned for hashes only.
            let probabilities = analysis.probabilities.or_else(|| {
                cache
                    .get(&record.path, record.modified_ns, record.size)
                    .and_then(|entry| entry.probabilities)
            });
            cache.insert(CacheEntry {
                path: record.path.clone(),
                modified_ns: record.modified_ns,
                size: record.size,
                hash: record.hash.clone(),
                probabilities,
            });
            slots[index] = Some((record, probabilities));
        }

        let live: HashSet<PathBuf> = records.iter().map(|r| r.path.clone()).collect();
        cache.retain_paths(&live);
        if let Err(e) = cache.close() {
            tracing::warn!("Failed to write analysis cache: {e}");
        }

        Ok(FolderAnalysis {
            items: slots.into_iter().flatten().collect(),
            skipped: report.skipped,
            cached,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results() -> Vec<ClassificationResult> {
        ["a.jpg", "b.jpg", "c.jpg", "d.jpg"]
            .iter()
            .map(|name| {
                ClassificationResult::evaluate(
                    PathBuf::from(format!("/photos/{name}")),
                    SeasonProbabilities::from_array([0.3, 0.3, 0.2, 0.2]),
                    Metric::Probability,
                    0.5,
                )
            })
            .collect()
    }

    #[test]
    fn test_reclassify_touches_only_one_result() {
        let mut results = results();
        assert!(results.iter().all(|r| r.is_unknown));

        let updated = reclassify(&mut results, 3, Season::Summer).unwrap();
        assert_eq!(updated.label, Season::Summer);
        assert!(!updated.is_unknown);

        assert!(!results[3].is_unknown);
        assert!(results[..3].iter().all(|r| r.is_unknown && !r.manually_labeled));
    }

    #[test]
    fn test_reclassify_out_of_range() {
        let mut results = results();
        assert!(matches!(
            reclassify(&mut results, 9, Season::Winter),
            Err(ShikiError::IndexOutOfRange { index: 9, len: 4 })
        ));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = Config::default();
        config.classify.threshold = 1.5;
        assert!(matches!(Shiki::new(config), Err(ShikiError::Config(_))));
    }

    #[test]
    fn test_options_from_config() {
        let mut config = ClassifyConfig::default();
        assert_eq!(
            SeasonScanOptions::from_config(&config).threshold,
            ThresholdMode::Fixed(0.5)
        );
        config.auto_threshold = true;
        assert_eq!(
            SeasonScanOptions::from_config(&config).threshold,
            ThresholdMode::Auto
        );
    }

    #[tokio::test]
    async fn test_missing_folder() {
        let shiki = Shiki::new(Config::default()).unwrap();
        let err = shiki
            .scan_duplicates(Path::new("/definitely/not/here"), ScanOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ShikiError::FolderNotFound(_)));
    }
}
