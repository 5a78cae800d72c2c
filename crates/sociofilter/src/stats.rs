//! Redaction counters.
//!
//! Counters only grow; the only way down is an explicit [`StatsTracker::reset`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::content::ContentType;
use crate::error::Result;
use crate::storage::{self, KeyValueStore, STATS_KEY};

/// How many redactions have been applied, per content type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Statistics {
    /// Redacted text nodes.
    pub text_filtered: u64,
    /// Obstructed images.
    pub images_filtered: u64,
    /// When a counter last changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Statistics {
    /// Sum of both counters.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.text_filtered + self.images_filtered
    }

    fn bump(&mut self, content_type: ContentType) {
        match content_type {
            ContentType::Text => self.text_filtered += 1,
            ContentType::Image => self.images_filtered += 1,
        }
        self.last_updated = Some(Utc::now());
    }
}

/// Owner of the `filterStats` record.
#[derive(Debug)]
pub struct StatsTracker {
    store: Arc<dyn KeyValueStore>,
    retry_delay: Duration,
    write_lock: Mutex<()>,
}

impl StatsTracker {
    /// Create a tracker over `store`, retrying failed increments after `retry_delay`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, retry_delay: Duration) -> Self {
        Self {
            store,
            retry_delay,
            write_lock: Mutex::new(()),
        }
    }

    /// Current counters, zero if nothing was ever recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn get(&self) -> Result<Statistics> {
        Ok(storage::load(self.store.as_ref(), STATS_KEY)?.unwrap_or_default())
    }

    /// Count one redaction of `content_type`.
    ///
    /// A storage failure is retried once after the retry delay.
    ///
    /// # Errors
    ///
    /// Returns the second failure if the retry fails too, or any
    /// non-storage error (such as a corrupt record) straight away.
    pub async fn increment(&self, content_type: ContentType) -> Result<Statistics> {
        let _guard = self.write_lock.lock().await;

        match self.try_increment(content_type) {
            Ok(stats) => Ok(stats),
            Err(e) if !e.is_storage() => Err(e),
            Err(e) => {
                warn!(error = %e, "Statistics update failed, retrying");
                tokio::time::sleep(self.retry_delay).await;
                self.try_increment(content_type)
            }
        }
    }

    /// Set both counters back to zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the write.
    pub async fn reset(&self) -> Result<Statistics> {
        let _guard = self.write_lock.lock().await;
        let stats = Statistics {
            last_updated: Some(Utc::now()),
            ..Statistics::default()
        };
        storage::save(self.store.as_ref(), STATS_KEY, &stats)?;
        debug!("Statistics reset");
        Ok(stats)
    }

    fn try_increment(&self, content_type: ContentType) -> Result<Statistics> {
        let mut stats = self.get()?;
        stats.bump(content_type);
        storage::save(self.store.as_ref(), STATS_KEY, &stats)?;
        debug!(%content_type, total = stats.total(), "Statistics incremented");
        Ok(stats)
    }
}
