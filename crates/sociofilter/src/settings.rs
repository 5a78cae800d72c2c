//! User-facing filter settings persisted under the `config` key.
//!
//! Settings are seeded from [`Config`] the first time they are read and are
//! afterwards only changed through [`SettingsStore::update`], which merges a
//! [`SettingsPatch`] field by field and writes the whole record back.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::storage::{self, KeyValueStore, CONFIG_KEY};
use crate::verdict::Thresholds;

/// The persisted settings record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Master switch.
    pub enabled: bool,
    /// Filter text nodes.
    pub filter_text: bool,
    /// Filter images.
    pub filter_images: bool,
    /// Classifier endpoint, if any.
    #[serde(default)]
    pub api_url: Option<String>,
    /// Whether the classifier endpoint has been set up.
    #[serde(default)]
    pub is_configured: bool,
    /// Category thresholds.
    #[serde(default)]
    pub thresholds: Thresholds,
}

impl Settings {
    /// Settings derived from process configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            enabled: config.filter.enabled,
            filter_text: config.filter.filter_text,
            filter_images: config.filter.filter_images,
            api_url: config.classifier.api_url.clone(),
            is_configured: config.classifier.api_url.is_some(),
            thresholds: config.thresholds.clone(),
        }
    }

    /// Whether text should be filtered at all.
    #[must_use]
    pub fn text_active(&self) -> bool {
        self.enabled && self.filter_text
    }

    /// Whether images should be filtered at all.
    #[must_use]
    pub fn images_active(&self) -> bool {
        self.enabled && self.filter_images
    }

    /// Apply every field present in `patch`.
    pub fn merge(&mut self, patch: SettingsPatch) {
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(filter_text) = patch.filter_text {
            self.filter_text = filter_text;
        }
        if let Some(filter_images) = patch.filter_images {
            self.filter_images = filter_images;
        }
        if let Some(api_url) = patch.api_url {
            let api_url = api_url.filter(|u| !u.trim().is_empty());
            self.is_configured = api_url.is_some();
            self.api_url = api_url;
        }
        if let Some(is_configured) = patch.is_configured {
            self.is_configured = is_configured;
        }
        if let Some(thresholds) = patch.thresholds {
            self.thresholds = thresholds;
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// A partial settings update. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsPatch {
    /// New master switch.
    pub enabled: Option<bool>,
    /// New text switch.
    pub filter_text: Option<bool>,
    /// New image switch.
    pub filter_images: Option<bool>,
    /// New endpoint; `Some(None)` clears it.
    pub api_url: Option<Option<String>>,
    /// Override of the configured flag.
    pub is_configured: Option<bool>,
    /// Replacement thresholds.
    pub thresholds: Option<Thresholds>,
}

impl SettingsPatch {
    /// Whether the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Owner of the `config` record.
#[derive(Debug)]
pub struct SettingsStore {
    store: Arc<dyn KeyValueStore>,
    seed: Settings,
    write_lock: Mutex<()>,
}

impl SettingsStore {
    /// Create a settings owner; `seed` is used until something is persisted.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, seed: Settings) -> Self {
        Self {
            store,
            seed,
            write_lock: Mutex::new(()),
        }
    }

    /// Current settings.
    ///
    /// Unreadable records fall back to the seed, logged.
    #[must_use]
    pub fn load(&self) -> Settings {
        match storage::load(self.store.as_ref(), CONFIG_KEY) {
            Ok(Some(settings)) => settings,
            Ok(None) => self.seed.clone(),
            Err(e) => {
                warn!(error = %e, "Failed to read settings, using defaults");
                self.seed.clone()
            }
        }
    }

    /// Merge `patch` into the current settings and persist the result.
    ///
    /// # Errors
    ///
    /// Returns a validation error for out-of-range thresholds, or a storage
    /// error if the write is rejected.
    pub async fn update(&self, patch: SettingsPatch) -> Result<Settings> {
        let _guard = self.write_lock.lock().await;

        let mut settings = self.load();
        settings.merge(patch);
        settings.thresholds.validate()?;
        if let Some(url) = &settings.api_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::validation(format!(
                    "api_url must be an http(s) URL, got {url}"
                )));
            }
        }

        storage::save(self.store.as_ref(), CONFIG_KEY, &settings)?;
        debug!(enabled = settings.enabled, "Settings updated");
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn settings_store() -> SettingsStore {
        SettingsStore::new(Arc::new(MemoryStore::new()), Settings::default())
    }

    #[test]
    fn test_seed_from_config() {
        let mut config = Config::default();
        config.classifier.api_url = Some("https://mod.test".to_string());
        config.filter.filter_images = false;

        let settings = Settings::from_config(&config);
        assert!(settings.is_configured);
        assert!(!settings.images_active());
        assert!(settings.text_active());
    }

    #[test]
    fn test_load_returns_seed_when_empty() {
        let store = settings_store();
        assert_eq!(store.load(), Settings::default());
    }

    #[tokio::test]
    async fn test_update_merges_by_field() {
        let store = settings_store();
        store
            .update(SettingsPatch {
                filter_text: Some(false),
                ..SettingsPatch::default()
            })
            .await
            .unwrap();
        let settings = store
            .update(SettingsPatch {
                enabled: Some(false),
                ..SettingsPatch::default()
            })
            .await
            .unwrap();

        assert!(!settings.enabled);
        assert!(!settings.filter_text);
        assert!(settings.filter_images);
        assert_eq!(store.load(), settings);
    }

    #[tokio::test]
    async fn test_update_api_url_sets_configured() {
        let store = settings_store();
        let settings = store
            .update(SettingsPatch {
                api_url: Some(Some("https://mod.test".to_string())),
                ..SettingsPatch::default()
            })
            .await
            .unwrap();
        assert!(settings.is_configured);

        let settings = store
            .update(SettingsPatch {
                api_url: Some(None),
                ..SettingsPatch::default()
            })
            .await
            .unwrap();
        assert!(!settings.is_configured);
        assert!(settings.api_url.is_none());
    }

    #[tokio::test]
    async fn test_invalid_update_not_applied() {
        let store = settings_store();
        let bad = Thresholds {
            adult: 2.0,
            ..Thresholds::default()
        };
        let result = store
            .update(SettingsPatch {
                enabled: Some(false),
                thresholds: Some(bad),
                ..SettingsPatch::default()
            })
            .await;

        assert!(result.is_err());
        assert!(store.load().enabled);
    }

    #[test]
    fn test_corrupt_record_falls_back_to_seed() {
        let backing = Arc::new(MemoryStore::new());
        backing.set(CONFIG_KEY, "{broken").unwrap();
        let store = SettingsStore::new(backing, Settings::default());
        assert_eq!(store.load(), Settings::default());
    }

    #[test]
    fn test_patch_is_empty() {
        assert!(SettingsPatch::default().is_empty());
        assert!(!SettingsPatch {
            enabled: Some(true),
            ..SettingsPatch::default()
        }
        .is_empty());
    }
}
