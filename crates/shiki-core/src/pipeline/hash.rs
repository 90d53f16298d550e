//! Perceptual fingerprinting for duplicate detection.

use image::DynamicImage;
use image_hasher::{HashAlg, HasherConfig, ImageHash};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::DuplicatesConfig;

/// A perceptual hash, stored as the hasher's base64 encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an encoded hash read back from storage. Returns `None` if it does not decode.
    pub fn from_encoded(encoded: &str) -> Option<Self> {
        ImageHash::<Vec<u8>>::from_base64(encoded).ok()?;
        Some(Self(encoded.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hamming distance to another fingerprint.
    ///
    /// Returns `None` if either hash is invalid or the sizes differ.
    pub fn distance(&self, other: &Fingerprint) -> Option<u32> {
        hamming(&self.decode()?, &other.decode()?)
    }

    /// Decoded hash bits, for comparing one fingerprint against many.
    pub fn decode(&self) -> Option<ImageHash<Vec<u8>>> {
        ImageHash::from_base64(&self.0).ok()
    }

    /// Number of bits in the hash.
    pub fn bit_len(&self) -> u32 {
        ImageHash::<Vec<u8>>::from_base64(&self.0)
            .map(|h| h.as_bytes().len() as u32 * 8)
            .unwrap_or(0)
    }
}

/// Hamming distance between decoded hashes; `None` when the sizes differ.
pub fn hamming(a: &ImageHash<Vec<u8>>, b: &ImageHash<Vec<u8>>) -> Option<u32> {
    (a.as_bytes().len() == b.as_bytes().len()).then(|| a.dist(b))
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Computes perceptual hashes.
///
/// DCT-preprocessed mean hash (the classic pHash). The configured hasher is
/// built once and shared across workers.
pub struct Hasher {
    phash_hasher: image_hasher::Hasher,
}

impl Hasher {
    pub fn new(config: &DuplicatesConfig) -> Self {
        let phash_hasher = HasherConfig::new()
            .hash_alg(HashAlg::Mean)
            .preproc_dct()
            .hash_size(config.hash_size, config.hash_size)
            .to_hasher();
        Self { phash_hasher }
    }

    /// Generate a fingerprint for a decoded image.
    ///
    /// Same pixels always yield the same fingerprint; re-encoding noise moves
    /// only a few bits.
    pub fn fingerprint(&self, image: &DynamicImage) -> Fingerprint {
        Fingerprint(self.phash_hasher.hash_image(image).to_base64())
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new(&DuplicatesConfig::default())
    }
}
