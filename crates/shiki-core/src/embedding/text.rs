//! CLIP text encoder for the season prompt embeddings.
//!
//! Loads the text ONNX model and its tokenizer, and encodes prompt strings to
//! vectors aligned with the vision encoder's space.

use std::path::Path;
use std::sync::Mutex;

use ort::session::Session;
use ort::value::Value;

use crate::error::PipelineError;

/// Text encoder ONNX model filename.
pub const TEXT_MODEL_FILENAME: &str = "text_model.onnx";

/// Tokenizer filename.
pub const TOKENIZER_FILENAME: &str = "tokenizer.json";

/// CLIP's end-of-text token, also used as padding.
const END_OF_TEXT: &str = "<|endoftext|>";

/// Projected outputs, in order of preference.
const TEXT_OUTPUTS: [&str; 2] = ["text_embeds", "pooler_output"];

/// CLIP text encoder wrapper.
///
/// Uses the same `Mutex<Session>` pattern as the vision encoder.
pub struct ClipTextEncoder {
    session: Mutex<Session>,
    tokenizer: tokenizers::Tokenizer,
    max_length: usize,
    pad_id: i64,
    /// Some exports take `attention_mask`, others only `input_ids`
    wants_attention_mask: bool,
}

impl ClipTextEncoder {
    /// Load the text encoder from the model directory.
    ///
    /// Expects `text_model.onnx` and `tokenizer.json` in `model_dir`.
    pub fn new(model_dir: &Path, max_length: usize) -> Result<Self, PipelineError> {
        let text_model_path = model_dir.join(TEXT_MODEL_FILENAME);
        let tokenizer_path = model_dir.join(TOKENIZER_FILENAME);

        if !text_model_path.exists() {
            return Err(PipelineError::Model {
                message: format!("Text encoder not found at {:?}", text_model_path),
            });
        }

        if !tokenizer_path.exists() {
            return Err(PipelineError::Model {
                message: format!("Tokenizer not found at {:?}", tokenizer_path),
            });
        }

        let session = Session::builder()
            .map_err(|e| PipelineError::Model {
                message: format!("Failed to create ONNX session builder: {e}"),
            })?
            .commit_from_file(&text_model_path)
            .map_err(|e| PipelineError::Model {
                message: format!("Failed to load text encoder model: {e}"),
            })?;

        let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            PipelineError::Model {
                message: format!("Failed to load tokenizer: {e}"),
            }
        })?;

        let pad_id = tokenizer.token_to_id(END_OF_TEXT).unwrap_or(0) as i64;
        let wants_attention_mask = session
            .inputs()
            .iter()
            .any(|i| i.name() == "attention_mask");

        tracing::debug!(
            "Loaded CLIP text encoder (inputs: {:?}, outputs: {:?})",
            session
                .inputs()
                .iter()
                .map(|i| i.name())
                .collect::<Vec<_>>(),
            session
                .outputs()
                .iter()
                .map(|o| o.name())
                .collect::<Vec<_>>()
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            max_length,
            pad_id,
            wants_attention_mask,
        })
    }

    /// Encode a batch of text strings to normalized embeddings.
    ///
    /// Returns one vector per input text, in input order.
    pub fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        let batch_size = texts.len();
        if batch_size == 0 {
            return Ok(vec![]);
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| PipelineError::Model {
                message: format!("Tokenization failed: {e}"),
            })?;

        let token_ids: Vec<&[u32]> = encodings.iter().map(|e| e.get_ids()).collect();
        let (input_ids, attention_mask) = pack_tokens(&token_ids, self.max_length, self.pad_id);
        let shape = vec![batch_size as i64, self.max_length as i64];

        let mut session = self.session.lock().map_err(|e| PipelineError::Model {
            message: format!("Text encoder lock poisoned: {e}"),
        })?;

        let input_ids_value =
            Value::from_array((shape.clone(), input_ids)).map_err(|e| PipelineError::Model {
                message: format!("Failed to create input tensor: {e}"),
            })?;

        let outputs = if self.wants_attention_mask {
            let mask_value =
                Value::from_array((shape, attention_mask)).map_err(|e| PipelineError::Model {
                    message: format!("Failed to create attention mask tensor: {e}"),
                })?;
            session.run(ort::inputs![
                "input_ids" => input_ids_value,
                "attention_mask" => mask_value
            ])
        } else {
            session.run(ort::inputs!["input_ids" => input_ids_value])
        }
        .map_err(|e| PipelineError::Model {
            message: format!("Text encoder inference failed: {e}"),
        })?;

        let (name, value) = TEXT_OUTPUTS
            .iter()
            .find_map(|wanted| outputs.iter().find(|(name, _)| name == wanted))
            .ok_or_else(|| PipelineError::Model {
                message: format!("Text encoder produced none of {TEXT_OUTPUTS:?}"),
            })?;

        let (shape, data) = value
            .try_extract_tensor::<f32>()
            .map_err(|e| PipelineError::Model {
                message: format!("Failed to extract {name}: {e}"),
            })?;

        let embedding_dim = match shape.len() {
            2 => shape[1] as usize,
            _ => {
                return Err(PipelineError::Model {
                    message: format!("Unexpected {name} shape: {:?}", shape),
                });
            }
        };

        let embeddings: Vec<Vec<f32>> = data
            .chunks(embedding_dim)
            .take(batch_size)
            .map(crate::math::l2_normalize)
            .collect();

        Ok(embeddings)
    }

    /// Check whether the text encoder model files exist.
    pub fn model_exists(model_dir: &Path) -> bool {
        model_dir.join(TEXT_MODEL_FILENAME).exists() && model_dir.join(TOKENIZER_FILENAME).exists()
    }
}

/// Lay token ids out as a `[batch, max_length]` row-major grid.
///
/// Sequences are truncated to `max_length` and padded with `pad_id`; the mask
/// is 1 over real tokens.
fn pack_tokens(sequences: &[&[u32]], max_length: usize, pad_id: i64) -> (Vec<i64>, Vec<i64>) {
    let mut input_ids = vec![pad_id; sequences.len() * max_length];
    let mut attention_mask = vec![0i64; sequences.len() * max_length];

    for (i, ids) in sequences.iter().enumerate() {
        for (j, &id) in ids.iter().take(max_length).enumerate() {
            input_ids[i * max_length + j] = id as i64;
            attention_mask[i * max_length + j] = 1;
        }
    }

    (input_ids, attention_mask)
}
