//! Image decoding off the async runtime, bounded by size and time limits.

use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader};
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;
use tokio::time::timeout;

use crate::config::LimitsConfig;
use crate::error::PipelineError;

/// Decodes image bytes on the blocking pool.
#[derive(Clone)]
pub struct ImageDecoder {
    limits: LimitsConfig,
}

/// A decoded image and its pixel dimensions.
pub struct DecodedImage {
    pub image: DynamicImage,
    pub width: u32,
    pub height: u32,
}

impl ImageDecoder {
    pub fn new(limits: LimitsConfig) -> Self {
        Self { limits }
    }

    /// Decode `bytes` read from `path`.
    ///
    /// The format is sniffed from content first, then from the extension.
    /// Images larger than `max_image_dimension` on either side are rejected
    /// after decoding.
    pub async fn decode_from_bytes(
        &self,
        bytes: Vec<u8>,
        path: &Path,
    ) -> Result<DecodedImage, PipelineError> {
        let owned = path.to_path_buf();
        let task = tokio::task::spawn_blocking(move || decode_bytes(&bytes, &owned));
        let limit = Duration::from_millis(self.limits.decode_timeout_ms);

        let decoded = match timeout(limit, task).await {
            Err(_) => {
                return Err(PipelineError::Timeout {
                    path: path.to_path_buf(),
                    stage: "decode".to_string(),
                    timeout_ms: self.limits.decode_timeout_ms,
                })
            }
            Ok(joined) => joined.map_err(|e| PipelineError::Decode {
                path: path.to_path_buf(),
                message: format!("decode task failed: {e}"),
            })??,
        };

        let max_dim = self.limits.max_image_dimension;
        if decoded.width > max_dim || decoded.height > max_dim {
            return Err(PipelineError::ImageTooLarge {
                path: path.to_path_buf(),
                width: decoded.width,
                height: decoded.height,
                max_dim,
            });
        }
        Ok(decoded)
    }
}

fn decode_bytes(bytes: &[u8], path: &Path) -> Result<DecodedImage, PipelineError> {
    let decode_error = |message: String| PipelineError::Decode {
        path: path.to_path_buf(),
        message,
    };

    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| decode_error(e.to_string()))?;
    if reader.format().is_none() {
        let format =
            ImageFormat::from_path(path).map_err(|_| PipelineError::UnsupportedFormat {
                path: path.to_path_buf(),
                format: path
                    .extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "unknown".to_string()),
            })?;
        reader.set_format(format);
    }

    let image = reader.decode().map_err(|e| decode_error(e.to_string()))?;
    let (width, height) = image.dimensions();
    Ok(DecodedImage {
        image,
        width,
        height,
    })
}
