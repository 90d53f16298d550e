//! Error types for the Shiki analysis engine.
//!
//! Errors are organized by stage. Per-item failures (`PipelineError` other than
//! `Model`, `ReorganizeError`) are recovered by the caller and aggregated into
//! counts; only whole-batch preconditions surface as a `ShikiError`.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for Shiki operations.
#[derive(Error, Debug)]
pub enum ShikiError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Pipeline processing errors that abort a whole scan
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Analysis cache errors
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// General I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The folder to scan does not exist or is not a directory
    #[error("Folder not found: {0}")]
    FolderNotFound(PathBuf),

    /// The embedding model could not be loaded
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// The scan was cancelled before it completed
    #[error("Scan cancelled")]
    ScanCancelled,

    /// A result index does not refer to an item of the current result set
    #[error("Result index {index} out of range ({len} results)")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// Uncertainty metric name is not recognized
    #[error("Unknown uncertainty metric: {0:?} (expected probability, entropy, margin_confidence, least_confidence or ratio_confidence)")]
    UnknownMetric(String),

    /// Reorganize mode name is not recognized
    #[error("Unknown reorganize mode: {0:?} (expected move or copy)")]
    UnknownMode(String),

    /// Annotated output writes new files, so it cannot move the originals
    #[error("Annotated output requires copy mode")]
    AnnotateRequiresCopy,
}

/// Pipeline processing errors, organized by stage.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Image decoding failed
    #[error("Decode error for {path}: {message}")]
    Decode { path: PathBuf, message: String },

    /// Embedding generation failed for one image
    #[error("Embedding failed for {path}: {message}")]
    Embedding { path: PathBuf, message: String },

    /// The embedding backend itself failed (load, lock, or runtime crash)
    #[error("Model error: {message}")]
    Model { message: String },

    /// Operation timed out
    #[error("Timeout in {stage} stage for {path} after {timeout_ms}ms")]
    Timeout {
        path: PathBuf,
        stage: String,
        timeout_ms: u64,
    },

    /// File exceeds size limit
    #[error("File too large: {path} ({size_mb}MB > {max_mb}MB)")]
    FileTooLarge {
        path: PathBuf,
        size_mb: u64,
        max_mb: u64,
    },

    /// Image dimensions exceed limit
    #[error("Image too large: {path} ({width}x{height} > {max_dim})")]
    ImageTooLarge {
        path: PathBuf,
        width: u32,
        height: u32,
        max_dim: u32,
    },

    /// Unsupported image format
    #[error("Unsupported format for {path}: {format}")]
    UnsupportedFormat { path: PathBuf, format: String },

    /// File not found
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
}

impl PipelineError {
    /// Whether this error must abort the whole batch rather than skip one item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Model { .. })
    }
}

/// Analysis cache errors.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Another scan already holds the cache for this folder
    #[error("Analysis cache is locked by another scan: {0}")]
    Locked(PathBuf),

    /// I/O failure reading or writing the cache file
    #[error("Cache I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// CSV encoding failure while writing the cache table
    #[error("Cache table error: {0}")]
    Csv(#[from] csv::Error),
}

/// Per-file reorganize failure. Collected into the batch summary.
#[derive(Error, Debug)]
pub enum ReorganizeError {
    /// The source file no longer exists
    #[error("File not found: {0}")]
    SourceMissing(PathBuf),

    /// The source path has no file name component
    #[error("File name not found for {0}")]
    MissingFileName(PathBuf),

    /// Filesystem failure while relocating a file
    #[error("Failed to relocate {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The image could not be decoded or re-encoded for an annotated copy
    #[error("Failed to annotate {path}: {message}")]
    Annotate { path: PathBuf, message: String },
}

/// Duplicate review state machine misuse.
#[derive(Error, Debug, PartialEq)]
pub enum ReviewError {
    /// The action is not allowed in the current state
    #[error("Cannot {action} while {state}")]
    InvalidTransition { state: String, action: &'static str },

    /// The path is not a member of the group under review
    #[error("{0} is not in the group under review")]
    NotAMember(PathBuf),
}

/// Convenience type alias for Shiki results.
pub type Result<T> = std::result::Result<T, ShikiError>;

/// Convenience type alias for pipeline-specific results.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
