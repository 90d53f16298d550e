//! Cheap checks on raw file bytes before a full decode.

use std::path::Path;

use crate::config::LimitsConfig;
use crate::error::PipelineError;

/// Validates file contents before decoding.
#[derive(Clone)]
pub struct Validator {
    limits: LimitsConfig,
}

impl Validator {
    pub fn new(limits: LimitsConfig) -> Self {
        Self { limits }
    }

    /// Check size limits and magic bytes of an already-read file.
    pub fn validate_bytes(&self, bytes: &[u8], path: &Path) -> Result<(), PipelineError> {
        let max_bytes = self.limits.max_file_size_mb * 1024 * 1024;
        if bytes.len() as u64 > max_bytes {
            return Err(PipelineError::FileTooLarge {
                path: path.to_path_buf(),
                size_mb: bytes.len() as u64 / (1024 * 1024),
                max_mb: self.limits.max_file_size_mb,
            });
        }

        if bytes.len() < 4 {
            return Err(PipelineError::Decode {
                path: path.to_path_buf(),
                message: "File too small to be a valid image".to_string(),
            });
        }

        if !Self::is_valid_image_header(bytes) {
            return Err(PipelineError::Decode {
                path: path.to_path_buf(),
                message: "Unrecognized image format (invalid magic bytes)".to_string(),
            });
        }

        Ok(())
    }

    /// Check if the leading bytes match a format the decoder handles.
    fn is_valid_image_header(header: &[u8]) -> bool {
        match header {
            // JPEG
            [0xFF, 0xD8, 0xFF, ..] => true,
            // PNG
            [0x89, b'P', b'N', b'G', ..] => true,
            // GIF
            [b'G', b'I', b'F', b'8', ..] => true,
            // BMP
            [b'B', b'M', ..] => true,
            // TIFF, little- and big-endian with version 42
            [b'I', b'I', 0x2A, 0x00, ..] | [b'M', b'M', 0x00, 0x2A, ..] => true,
            // WebP: RIFF....WEBP
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> Validator {
        Validator::new(LimitsConfig::default())
    }

    #[test]
    fn test_magic_bytes_known_formats() {
        assert!(Validator::is_valid_image_header(&[0xFF, 0xD8, 0xFF, 0xE0]));
        assert!(Validator::is_valid_image_header(&[
            0x89, b'P', b'N', b'G', 0x0D, 0x0A
        ]));
        assert!(Validator::is_valid_image_header(&[
            b'R', b'I', b'F', b'F', 0, 0, 0, 0, b'W', b'E', b'B', b'P'
        ]));
        assert!(Validator::is_valid_image_header(&[b'I', b'I', 0x2A, 0x00]));
    }

    #[test]
    fn test_magic_bytes_rejected() {
        assert!(!Validator::is_valid_image_header(&[0, 0, 0, 0]));
        assert!(!Validator::is_valid_image_header(&[b'I', b'I', 0x00, 0x00]));
        // RIFF without the WEBP tag (e.g. a WAV file)
        assert!(!Validator::is_valid_image_header(&[
            b'R', b'I', b'F', b'F', 0, 0, 0, 0, b'W', b'A', b'V', b'E'
        ]));
    }

    #[test]
    fn test_too_small_file() {
        let err = validator()
            .validate_bytes(&[0xFF, 0xD8], Path::new("tiny.jpg"))
            .unwrap_err();
        assert!(err.to_string().contains("too small"));
    }

    #[test]
    fn test_size_limit() {
        let limits = LimitsConfig {
            max_file_size_mb: 1,
            ..LimitsConfig::default()
        };
        let mut bytes = vec![0u8; 2 * 1024 * 1024];
        bytes[..3].copy_from_slice(&[0xFF, 0xD8, 0xFF]);
        let err = Validator::new(limits)
            .validate_bytes(&bytes, Path::new("huge.jpg"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::FileTooLarge { max_mb: 1, .. }));
    }
}
