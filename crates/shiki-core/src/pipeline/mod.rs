//! Image processing pipeline components.
//!
//! - **discovery**: Find image files in a folder
//! - **validate**: Pre-decode checks on raw bytes
//! - **decode**: Load and decode images with limits and timeout
//! - **hash**: Perceptual fingerprints
//! - **processor**: Runs the per-image stages
//! - **pool**: Bounded worker pool with progress and cancellation

pub mod decode;
pub mod discovery;
pub mod hash;
pub mod pool;
pub mod processor;
pub mod validate;

// Re-exports for convenient access
pub use decode::{DecodedImage, ImageDecoder};
pub use discovery::{DiscoveredFile, FileDiscovery};
pub use hash::{Fingerprint, Hasher};
pub use pool::{CancelToken, PoolReport, ProgressCallback, ScanProgress, WorkerPool};
pub use processor::{Analysis, ImageProcessor};
pub use validate::Validator;
