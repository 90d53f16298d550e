//! Configuration management for Shiki.
//!
//! Configuration is loaded from the platform config directory with sensible
//! defaults. Every section implements `Default`, so a partial file only
//! overrides the keys it names.

mod types;
mod validate;

pub use types::*;
pub use validate::validate_threshold;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure for Shiki.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Processing settings
    pub processing: ProcessingConfig,

    /// Resource limits
    pub limits: LimitsConfig,

    /// Embedding model settings
    pub embedding: EmbeddingConfig,

    /// Season classification settings
    pub classify: ClassifyConfig,

    /// Duplicate detection settings
    pub duplicates: DuplicatesConfig,

    /// Analysis cache settings
    pub cache: CacheConfig,

    /// Reorganization settings
    pub reorganize: ReorganizeConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Returns default configuration if the file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path.
    ///
    /// Uses platform-appropriate directories:
    /// - macOS: ~/Library/Application Support/com.shiki.shiki/config.toml
    /// - Linux: ~/.config/shiki/config.toml
    /// - Windows: C:\Users\<User>\AppData\Roaming\shiki\shiki\config\config.toml
    ///
    /// Falls back to ~/.shiki/config.toml if directory detection fails.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "shiki", "shiki")
            .map(|dirs| dirs.config_dir().to_path_buf().join("config.toml"))
            .unwrap_or_else(|| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".shiki").join("config.toml")
            })
    }

    /// Get the resolved model directory path (with ~ expansion).
    pub fn model_dir(&self) -> PathBuf {
        let path_str = self.general.model_dir.to_string_lossy();
        let expanded = shellexpand::tilde(&path_str);
        PathBuf::from(expanded.into_owned())
    }

    /// Directory holding the configured embedding model's files.
    pub fn embedding_model_dir(&self) -> PathBuf {
        self.model_dir().join(&self.embedding.model)
    }

    /// Serialize the config to a pretty TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reorganize::ReorganizeMode;
    use crate::uncertainty::Metric;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.processing.parallel_workers >= 1);
        assert_eq!(config.limits.max_file_size_mb, 100);
        assert_eq!(config.classify.metric, Metric::Entropy);
        assert_eq!(config.duplicates.hash_bits(), 64);
        assert_eq!(config.reorganize.mode, ReorganizeMode::Move);
        assert!(config.reorganize.output_dir.is_none());
    }

    #[test]
    fn test_config_to_toml() {
        let config = Config::default();
        let toml = config.to_toml().unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[classify]"));
        assert!(toml.contains("metric = \"entropy\""));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[classify]\nmetric = \"margin_confidence\"\nthreshold = 0.2\n\n[reorganize]\nmode = \"copy\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.classify.metric, Metric::MarginConfidence);
        assert_eq!(config.classify.threshold, 0.2);
        assert_eq!(config.classify.sweep_step, 0.01);
        assert_eq!(config.reorganize.mode, ReorganizeMode::Copy);
        assert_eq!(config.cache.file_name, ".shiki-analysis.csv");
    }

    #[test]
    fn test_annotate_size_reads_as_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[reorganize]\nannotate = true\nannotate_size = \"1280x720\"\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert!(config.reorganize.annotate);
        assert_eq!(
            config.reorganize.annotate_size,
            Some(crate::annotate::CanvasSize { width: 1280, height: 720 })
        );
        assert!(config.to_toml().unwrap().contains("annotate_size = \"1280x720\""));

        std::fs::write(&path, "[reorganize]\nannotate_size = \"wide\"\n").unwrap();
        assert!(matches!(
            Config::load_from(&path).unwrap_err(),
            ConfigError::ParseError(_)
        ));
    }

    #[test]
    fn test_load_from_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[classify]\nthreshold = 1.5\n").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));

        std::fs::write(&path, "[classify]\nmetric = \"vibes\"\n").unwrap();
        assert!(matches!(
            Config::load_from(&path).unwrap_err(),
            ConfigError::ParseError(_)
        ));
    }

    #[test]
    fn test_embedding_model_dir() {
        let mut config = Config::default();
        config.general.model_dir = std::path::PathBuf::from("/opt/shiki/models");
        assert_eq!(config.model_dir(), std::path::PathBuf::from("/opt/shiki/models"));
        assert!(config
            .embedding_model_dir()
            .ends_with("clip-vit-base-patch32"));
    }
}
