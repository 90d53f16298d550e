//! Per-image processing: read, validate, decode, fingerprint, classify.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::classify::SeasonModel;
use crate::config::{Config, LimitsConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::types::{ImageRecord, SeasonProbabilities};

use super::decode::ImageDecoder;
use super::hash::Hasher;
use super::validate::Validator;

/// Result of processing one image.
#[derive(Debug, Clone)]
pub struct Analysis {
    /// The observed record, with its fingerprint filled in
    pub record: ImageRecord,
    /// Season distribution, when a model was supplied
    pub probabilities: Option<SeasonProbabilities>,
}

/// Runs every per-image stage. Cheap to clone; share one per scan.
#[derive(Clone)]
pub struct ImageProcessor {
    decoder: ImageDecoder,
    validator: Validator,
    hasher: Arc<Hasher>,
    limits: LimitsConfig,
}

impl ImageProcessor {
    /// Create a new image processor with the given configuration.
    pub fn new(config: &Config) -> Self {
        Self {
            decoder: ImageDecoder::new(config.limits.clone()),
            validator: Validator::new(config.limits.clone()),
            hasher: Arc::new(Hasher::new(&config.duplicates)),
            limits: config.limits.clone(),
        }
    }

    /// Process one observed image.
    ///
    /// The fingerprint is always computed; season probabilities only when a
    /// model is given. Both run on a blocking thread under the embedding
    /// timeout.
    pub async fn process(
        &self,
        mut record: ImageRecord,
        model: Option<Arc<dyn SeasonModel>>,
    ) -> PipelineResult<Analysis> {
        let start = Instant::now();
        let path = record.path.clone();
        tracing::debug!("Processing: {:?}", path);

        let bytes = read_file(&path).await?;
        self.validator.validate_bytes(&bytes, &path)?;

        let decode_start = Instant::now();
        let decoded = self.decoder.decode_from_bytes(bytes, &path).await?;
        tracing::trace!("  Decode: {:?}", decode_start.elapsed());

        let stage = if model.is_some() { "embed" } else { "hash" };
        let has_model = model.is_some();
        let hasher = self.hasher.clone();
        let image = decoded.image;
        let blocking_path = path.clone();

        let analyze_start = Instant::now();
        let result = tokio::time::timeout(
            Duration::from_millis(self.limits.embed_timeout_ms),
            tokio::task::spawn_blocking(move || {
                let hash = hasher.fingerprint(&image);
                let probabilities = model
                    .map(|m| m.probabilities(&image, &blocking_path))
                    .transpose()?;
                Ok::<_, PipelineError>((hash, probabilities))
            }),
        )
        .await;

        let (hash, probabilities) = match result {
            Ok(Ok(Ok(output))) => output,
            Ok(Ok(Err(e))) => return Err(e),
            // A panic inside the backend means the backend is broken.
            Ok(Err(e)) if has_model => {
                return Err(PipelineError::Model {
                    message: format!("Classifier task failed on {:?}: {}", path, e),
                })
            }
            Ok(Err(e)) => {
                return Err(PipelineError::Decode {
                    path,
                    message: format!("Task join error: {}", e),
                })
            }
            Err(_) => {
                return Err(PipelineError::Timeout {
                    path,
                    stage: stage.to_string(),
                    timeout_ms: self.limits.embed_timeout_ms,
                })
            }
        };
        tracing::trace!("  {}: {:?}", stage, analyze_start.elapsed());

        record.hash = Some(hash);
        tracing::debug!(
            "Processed {:?} in {:?} ({}x{})",
            record.file_name(),
            start.elapsed(),
            decoded.width,
            decoded.height
        );

        Ok(Analysis {
            record,
            probabilities,
        })
    }
}

async fn read_file(path: &Path) -> PipelineResult<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => PipelineError::FileNotFound(path.to_path_buf()),
        _ => PipelineError::Decode {
            path: path.to_path_buf(),
            message: format!("Cannot read file: {e}"),
        },
    })
}
