//! Configuration management for sociofilter.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.
//!
//! This is process configuration. The user-facing switches that the pipeline
//! persists and updates at runtime live in [`crate::settings`] and are
//! seeded from here.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lexicon::{Lexicon, DEFAULT_MASK};
use crate::verdict::Thresholds;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "sociofilter";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "sociofilter.db";

/// Environment variable prefix.
const ENV_PREFIX: &str = "SOCIOFILTER_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `SOCIOFILTER_`, sections split on `__`)
/// 2. TOML config file at `~/.config/sociofilter/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Master switches.
    pub filter: FilterConfig,
    /// Remote classifier configuration.
    pub classifier: ClassifierConfig,
    /// Category thresholds.
    pub thresholds: Thresholds,
    /// Local denylist configuration.
    pub lexicon: LexiconConfig,
    /// Scan pass configuration.
    pub scan: ScanConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
}

/// Master switches for filtering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Enable filtering at all.
    pub enabled: bool,
    /// Filter text nodes.
    pub filter_text: bool,
    /// Filter images.
    pub filter_images: bool,
}

/// Remote classifier configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Base URL of the classification service. Unset means local-only.
    pub api_url: Option<String>,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Largest text payload sent to the service, in bytes.
    pub max_text_bytes: usize,
}

/// Local denylist configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LexiconConfig {
    /// Terms appended after the built-in denylist.
    pub extra_terms: Vec<String>,
    /// Character used to mask matched terms.
    pub mask: char,
}

/// Scan pass configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Text must be longer than this (in characters) to be sent to the classifier.
    pub min_remote_text_len: usize,
    /// Text nodes processed between yields.
    pub text_batch_size: usize,
    /// Images processed between yields.
    pub image_batch_size: usize,
    /// Images narrower or shorter than this are ignored.
    pub min_image_dimension: u32,
    /// Images must exceed this in both dimensions to be classified, remotely or locally.
    pub min_remote_image_dimension: u32,
}

/// Storage-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/sociofilter/sociofilter.db`
    pub database_path: Option<PathBuf>,
    /// Delay before retrying a failed statistics write, in milliseconds.
    pub stats_retry_delay_ms: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            filter_text: true,
            filter_images: true,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            timeout_ms: 10_000,
            max_text_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Default for LexiconConfig {
    fn default() -> Self {
        Self {
            extra_terms: Vec::new(),
            mask: DEFAULT_MASK,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            min_remote_text_len: 10,
            text_batch_size: 50,
            image_batch_size: 10,
            min_image_dimension: 50,
            min_remote_image_dimension: 100,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Resolved to the data dir at runtime
            stats_retry_delay_ms: 500,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        self.thresholds.validate()?;

        if let Some(url) = &self.classifier.api_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::validation(format!(
                    "api_url must be an http(s) URL, got {url}"
                )));
            }
        }

        if self.classifier.timeout_ms == 0 {
            return Err(Error::validation("timeout_ms must be greater than 0"));
        }

        if self.scan.text_batch_size == 0 || self.scan.image_batch_size == 0 {
            return Err(Error::validation("batch sizes must be greater than 0"));
        }

        if self.scan.min_image_dimension > self.scan.min_remote_image_dimension {
            return Err(Error::validation(format!(
                "min_image_dimension ({}) cannot be greater than min_remote_image_dimension ({})",
                self.scan.min_image_dimension, self.scan.min_remote_image_dimension
            )));
        }

        // A word-character mask could itself spell a denylisted term.
        if self.lexicon.mask.is_alphanumeric() || self.lexicon.mask == '_' {
            return Err(Error::validation(format!(
                "mask character '{}' must not be a word character",
                self.lexicon.mask
            )));
        }

        Lexicon::new(&self.lexicon.extra_terms)?;

        Ok(())
    }

    /// The base denylist plus configured extra terms.
    #[must_use]
    pub fn lexicon(&self) -> Lexicon {
        Lexicon::builtin()
            .with_terms(&self.lexicon.extra_terms)
            .with_mask(self.lexicon.mask)
    }

    /// The extended fallback denylist plus configured extra terms.
    #[must_use]
    pub fn fallback_lexicon(&self) -> Lexicon {
        Lexicon::extended()
            .with_terms(&self.lexicon.extra_terms)
            .with_mask(self.lexicon.mask)
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the classifier timeout as a Duration.
    #[must_use]
    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_millis(self.classifier.timeout_ms)
    }

    /// Get the statistics retry delay as a Duration.
    #[must_use]
    pub fn stats_retry_delay(&self) -> Duration {
        Duration::from_millis(self.storage.stats_retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.filter.enabled);
        assert!(config.filter.filter_text);
        assert!(config.filter.filter_images);
        assert!(config.classifier.api_url.is_none());
        assert_eq!(config.lexicon.mask, '*');
    }

    #[test]
    fn test_default_scan_config() {
        let scan = ScanConfig::default();

        assert_eq!(scan.min_remote_text_len, 10);
        assert_eq!(scan.text_batch_size, 50);
        assert_eq!(scan.image_batch_size, 10);
        assert_eq!(scan.min_image_dimension, 50);
        assert_eq!(scan.min_remote_image_dimension, 100);
    }

    #[test]
    fn test_default_classifier_config() {
        let classifier = ClassifierConfig::default();
        assert_eq!(classifier.max_text_bytes, 10 * 1024 * 1024);
        assert_eq!(classifier.timeout_ms, 10_000);
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_bad_threshold() {
        let mut config = Config::default();
        config.thresholds.adult = -0.1;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("adult"));
    }

    #[test]
    fn test_validate_bad_api_url() {
        let mut config = Config::default();
        config.classifier.api_url = Some("ftp://example.com".to_string());

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("api_url"));
    }

    #[test]
    fn test_validate_zero_batch_size() {
        let mut config = Config::default();
        config.scan.text_batch_size = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_image_dimensions() {
        let mut config = Config::default();
        config.scan.min_image_dimension = 500;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("min_image_dimension"));
    }

    #[test]
    fn test_validate_word_mask_rejected() {
        let mut config = Config::default();
        config.lexicon.mask = 'x';

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_blank_extra_term() {
        let mut config = Config::default();
        config.lexicon.extra_terms = vec!["fine".to_string(), " ".to_string()];

        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidTerm { .. }));
    }

    #[test]
    fn test_lexicon_includes_extra_terms() {
        let mut config = Config::default();
        config.lexicon.extra_terms = vec!["heck".to_string()];
        config.lexicon.mask = '#';

        let lexicon = config.lexicon();
        assert_eq!(lexicon.mask("heck, explicit"), "####, ########");
    }

    #[test]
    fn test_fallback_lexicon_is_wider() {
        let config = Config::default();
        assert!(config.fallback_lexicon().len() > config.lexicon().len());
    }

    #[test]
    fn test_database_path_default() {
        let path = Config::default().database_path();
        assert!(path.to_string_lossy().contains("sociofilter.db"));
    }

    #[test]
    fn test_database_path_custom() {
        let mut config = Config::default();
        config.storage.database_path = Some(PathBuf::from("/custom/path/db.sqlite"));

        assert_eq!(
            config.database_path(),
            PathBuf::from("/custom/path/db.sqlite")
        );
    }

    #[test]
    fn test_durations() {
        let config = Config::default();
        assert_eq!(config.classifier_timeout(), Duration::from_secs(10));
        assert_eq!(config.stats_retry_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("sociofilter"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let config = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml"))).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[classifier]
api_url = "https://filter.example.com"

[thresholds]
racy = 0.9

[scan]
text_batch_size = 5
"#,
        )
        .unwrap();

        let config = Config::load_from(Some(path)).unwrap();
        assert_eq!(
            config.classifier.api_url.as_deref(),
            Some("https://filter.example.com")
        );
        assert!((config.thresholds.racy - 0.9).abs() < f64::EPSILON);
        assert!((config.thresholds.adult - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.scan.text_batch_size, 5);
        assert_eq!(config.scan.image_batch_size, 10);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[thresholds]\nadult = 2.0\n").unwrap();

        assert!(Config::load_from(Some(path)).is_err());
    }

    #[test]
    fn test_config_serialize() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(json.contains("min_remote_text_len"));
        assert!(json.contains("safe_floor"));
    }
}
