//! Zero-shot season classification.
//!
//! A [`SeasonModel`] turns one decoded image into a distribution over the four
//! seasons. The engine only sees the trait; [`ClipSeasonClassifier`] is the
//! production implementation backed by the CLIP encoders.

pub mod prompts;

use std::path::Path;

use image::DynamicImage;

use crate::config::Config;
use crate::embedding::{ClipTextEncoder, EmbeddingEngine};
use crate::error::PipelineResult;
use crate::types::SeasonProbabilities;

pub use prompts::PromptBank;

/// Backend producing season probabilities for an image.
///
/// Implementations run on blocking worker threads and may be called from
/// several workers at once. Per-image problems return a non-fatal
/// `PipelineError`; a broken backend returns `PipelineError::Model`, which
/// aborts the scan.
pub trait SeasonModel: Send + Sync {
    fn probabilities(
        &self,
        image: &DynamicImage,
        path: &Path,
    ) -> PipelineResult<SeasonProbabilities>;
}

/// CLIP image encoder scored against the season prompt bank.
pub struct ClipSeasonClassifier {
    engine: EmbeddingEngine,
    prompts: PromptBank,
    logit_scale: f64,
}

impl ClipSeasonClassifier {
    /// Load both encoders and embed the season prompts.
    ///
    /// The text encoder is only needed for the four prompts and is dropped
    /// once they are embedded.
    pub fn load(config: &Config) -> PipelineResult<Self> {
        let model_dir = config.model_dir();
        let engine = EmbeddingEngine::load(&config.embedding, &model_dir)?;

        let text_encoder =
            ClipTextEncoder::new(&config.embedding_model_dir(), config.classify.max_prompt_tokens)?;
        let prompts = PromptBank::encode(&text_encoder, &config.classify.prompt_template)?;
        tracing::info!(
            "Season prompts embedded ({} dimensions)",
            prompts.embedding_dim()
        );

        Ok(Self::new(engine, prompts, config.classify.logit_scale))
    }

    pub fn new(engine: EmbeddingEngine, prompts: PromptBank, logit_scale: f64) -> Self {
        Self {
            engine,
            prompts,
            logit_scale,
        }
    }
}

impl SeasonModel for ClipSeasonClassifier {
    fn probabilities(
        &self,
        image: &DynamicImage,
        path: &Path,
    ) -> PipelineResult<SeasonProbabilities> {
        let embedding = self.engine.embed(image, path)?;
        self.prompts.probabilities(&embedding, self.logit_scale)
    }
}
