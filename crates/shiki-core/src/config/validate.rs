//! Range and consistency checks run after every config load.

use crate::error::ConfigError;
use crate::threshold::grid_steps;

use super::Config;

impl Config {
    /// Check every section; the first violation wins.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("processing.parallel_workers", self.processing.parallel_workers as u64),
            ("limits.max_file_size_mb", self.limits.max_file_size_mb),
            ("limits.max_image_dimension", u64::from(self.limits.max_image_dimension)),
            ("limits.decode_timeout_ms", self.limits.decode_timeout_ms),
            ("limits.embed_timeout_ms", self.limits.embed_timeout_ms),
            ("embedding.image_size", u64::from(self.embedding.image_size)),
        ];
        if let Some((key, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(invalid(format!("{key} must be > 0")));
        }

        let classify = &self.classify;
        validate_threshold(classify.threshold)?;
        grid_steps(classify.sweep_step)?;
        if !(classify.logit_scale.is_finite() && classify.logit_scale > 0.0) {
            return Err(invalid("classify.logit_scale must be a positive number"));
        }
        if !classify.prompt_template.contains("{season}") {
            return Err(invalid("classify.prompt_template must contain {season}"));
        }
        if classify.max_prompt_tokens < 2 {
            return Err(invalid("classify.max_prompt_tokens must be >= 2"));
        }

        let duplicates = &self.duplicates;
        if duplicates.hash_size < 2 {
            return Err(invalid("duplicates.hash_size must be >= 2"));
        }
        if duplicates.max_distance > duplicates.hash_bits() {
            return Err(invalid(format!(
                "duplicates.max_distance must be <= {} (hash bits)",
                duplicates.hash_bits()
            )));
        }

        if self.cache.file_name.trim().is_empty() {
            return Err(invalid("cache.file_name must not be empty"));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(invalid(format!(
                "logging.format must be \"pretty\" or \"json\", got {:?}",
                self.logging.format
            )));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

/// Reject thresholds outside [0, 1] (NaN included).
pub fn validate_threshold(threshold: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(invalid(format!(
            "threshold must be between 0.0 and 1.0, got {threshold}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(edit: impl FnOnce(&mut Config)) -> String {
        let mut config = Config::default();
        edit(&mut config);
        config.validate().unwrap_err().to_string()
    }

    #[test]
    fn test_defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_zero_values_name_their_key() {
        assert!(rejected(|c| c.processing.parallel_workers = 0).contains("parallel_workers"));
        assert!(rejected(|c| c.limits.decode_timeout_ms = 0).contains("decode_timeout_ms"));
        assert!(rejected(|c| c.embedding.image_size = 0).contains("image_size"));
    }

    #[test]
    fn test_unknown_log_format() {
        assert!(rejected(|c| c.logging.format = "xml".into()).contains("logging.format"));
    }

    #[test]
    fn test_validate_rejects_threshold_out_of_range() {
        let mut config = Config::default();
        config.classify.threshold = 1.5;
        assert!(config.validate().is_err());

        config.classify.threshold = -0.1;
        assert!(config.validate().is_err());

        config.classify.threshold = f64::NAN;
        assert!(config.validate().is_err());

        config.classify.threshold = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_template_without_placeholder() {
        assert!(rejected(|c| c.classify.prompt_template = "a photo".into())
            .contains("prompt_template"));
    }

    #[test]
    fn test_validate_rejects_distance_beyond_hash_bits() {
        let mut config = Config::default();
        config.duplicates.max_distance = 65;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_distance"));

        config.duplicates.max_distance = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_sweep_step() {
        let mut config = Config::default();
        config.classify.sweep_step = 0.3;
        assert!(config.validate().is_err());
    }
}
