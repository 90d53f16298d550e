//! CLIP embedding generation.
//!
//! Images and season prompts are embedded into the same vector space by a
//! CLIP vision/text encoder pair running locally via ONNX Runtime.
//!
//! Model layout under `{model_dir}/{model_name}/`:
//!
//! ```text
//! visual.onnx        vision encoder
//! text_model.onnx    text encoder
//! tokenizer.json     text tokenizer
//! ```

pub(crate) mod clip;
pub(crate) mod preprocess;
pub(crate) mod text;

use std::path::{Path, PathBuf};

use image::DynamicImage;

use crate::config::EmbeddingConfig;
use crate::error::PipelineError;

pub use self::preprocess::{preprocess, Normalization};
pub use self::text::ClipTextEncoder;

use self::clip::ClipVisionSession;

/// The visual encoder ONNX model filename.
const VISUAL_MODEL_FILENAME: &str = "visual.onnx";

/// Engine for generating image embeddings.
pub struct EmbeddingEngine {
    session: ClipVisionSession,
    image_size: u32,
    normalization: Normalization,
}

impl EmbeddingEngine {
    /// Load the visual encoder from the model directory.
    ///
    /// Expects the ONNX model at `{model_dir}/{model_name}/visual.onnx`.
    pub fn load(config: &EmbeddingConfig, model_dir: &Path) -> Result<Self, PipelineError> {
        let model_path = Self::model_path(config, model_dir);

        if !model_path.exists() {
            return Err(PipelineError::Model {
                message: format!("Vision model not found at {:?}", model_path),
            });
        }

        tracing::info!("Loading CLIP vision model from {:?}", model_path);
        let session = ClipVisionSession::load(&model_path)?;
        tracing::info!("CLIP vision model loaded successfully");

        Ok(Self {
            session,
            image_size: config.image_size,
            normalization: Normalization::CLIP,
        })
    }

    /// Get the image input size for this model.
    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    /// Generate an L2-normalized embedding vector for an image.
    pub fn embed(&self, image: &DynamicImage, path: &Path) -> Result<Vec<f32>, PipelineError> {
        let tensor = preprocess(image, self.image_size, self.normalization);
        self.session.embed(&tensor, path)
    }

    /// Check whether every model file exists on disk.
    pub fn model_exists(config: &EmbeddingConfig, model_dir: &Path) -> bool {
        Self::model_path(config, model_dir).exists()
            && ClipTextEncoder::model_exists(&model_dir.join(&config.model))
    }

    /// Get the expected vision model file path.
    pub fn model_path(config: &EmbeddingConfig, model_dir: &Path) -> PathBuf {
        model_dir.join(&config.model).join(VISUAL_MODEL_FILENAME)
    }
}
