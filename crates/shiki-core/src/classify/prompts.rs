//! Pre-computed season prompt embeddings.
//!
//! The bank holds one L2-normalized text embedding per season, in
//! [`Season::ALL`] order, stored as a flat 4×dim row-major matrix so an image
//! embedding is scored with four dot products.

use crate::embedding::ClipTextEncoder;
use crate::error::{PipelineError, PipelineResult};
use crate::math;
use crate::types::{Season, SeasonProbabilities};

/// Season prompt embeddings for zero-shot scoring.
#[derive(Debug, Clone)]
pub struct PromptBank {
    /// Flat matrix: 4 × dim stored row-major.
    matrix: Vec<f32>,
    embedding_dim: usize,
}

impl PromptBank {
    /// Encode one prompt per season with the text encoder.
    pub fn encode(encoder: &ClipTextEncoder, template: &str) -> PipelineResult<Self> {
        let prompts: Vec<String> = Season::ALL.iter().map(|s| s.prompt(template)).collect();
        tracing::debug!("Encoding season prompts: {:?}", prompts);

        let embeddings = encoder.encode_batch(&prompts)?;
        let embeddings: [Vec<f32>; 4] =
            embeddings
                .try_into()
                .map_err(|got: Vec<Vec<f32>>| PipelineError::Model {
                    message: format!("Text encoder returned {} embeddings for 4 prompts", got.len()),
                })?;
        Self::from_embeddings(embeddings)
    }

    /// Build a bank from raw per-season embeddings in [`Season::ALL`] order.
    ///
    /// Rows are L2-normalized. All rows must share one non-zero dimension.
    pub fn from_embeddings(embeddings: [Vec<f32>; 4]) -> PipelineResult<Self> {
        let embedding_dim = embeddings[0].len();
        if embedding_dim == 0 || embeddings.iter().any(|e| e.len() != embedding_dim) {
            return Err(PipelineError::Model {
                message: format!(
                    "Season prompt embeddings have inconsistent dimensions: {:?}",
                    embeddings.iter().map(Vec::len).collect::<Vec<_>>()
                ),
            });
        }

        let mut matrix = Vec::with_capacity(4 * embedding_dim);
        for embedding in &embeddings {
            matrix.extend(math::l2_normalize(embedding));
        }
        Ok(Self {
            matrix,
            embedding_dim,
        })
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    /// Embedding row for one season.
    pub fn row(&self, season: Season) -> &[f32] {
        let offset = season.index() * self.embedding_dim;
        &self.matrix[offset..offset + self.embedding_dim]
    }

    /// Cosine similarity of an image embedding to each season prompt, times `logit_scale`.
    pub fn logits(&self, image_embedding: &[f32], logit_scale: f64) -> PipelineResult<[f64; 4]> {
        if image_embedding.len() != self.embedding_dim {
            return Err(PipelineError::Model {
                message: format!(
                    "Image embedding has {} dimensions, prompt bank has {}",
                    image_embedding.len(),
                    self.embedding_dim
                ),
            });
        }
        Ok(Season::ALL
            .map(|season| logit_scale * math::cosine_similarity(image_embedding, self.row(season))))
    }

    /// Softmax over the scaled similarities.
    pub fn probabilities(
        &self,
        image_embedding: &[f32],
        logit_scale: f64,
    ) -> PipelineResult<SeasonProbabilities> {
        Ok(SeasonProbabilities::softmax(
            self.logits(image_embedding, logit_scale)?,
        ))
    }
}
