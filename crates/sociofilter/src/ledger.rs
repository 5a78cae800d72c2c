//! The recovery ledger: every redaction, per domain, in the order it happened.
//!
//! Each domain has one [`DomainHistory`] record with a bucket per content
//! type. Buckets are append-only; the only field that ever changes after an
//! append is [`RedactionRecord::recovered`], and it only goes from `false`
//! to `true`. An entry's index is its position in the bucket, so it stays
//! valid for as long as the domain's history is not cleared.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::content::ContentType;
use crate::error::{Error, Result};
use crate::storage::{self, history_key, KeyValueStore, HISTORY_PREFIX};

/// One redaction applied to a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactionRecord {
    /// Domain the page belongs to.
    pub domain: String,
    /// What kind of content was redacted.
    pub content_type: ContentType,
    /// Content before redaction.
    pub original_content: String,
    /// Content shown instead.
    pub replacement_content: String,
    /// When the redaction happened.
    pub timestamp: DateTime<Utc>,
    /// Whether the user has recovered the original.
    pub recovered: bool,
}

/// All redactions recorded for one domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainHistory {
    /// Text redactions, oldest first.
    pub text: Vec<RedactionRecord>,
    /// Image redactions, oldest first.
    pub images: Vec<RedactionRecord>,
}

impl DomainHistory {
    /// The bucket for a content type.
    #[must_use]
    pub fn bucket(&self, content_type: ContentType) -> &[RedactionRecord] {
        match content_type {
            ContentType::Text => &self.text,
            ContentType::Image => &self.images,
        }
    }

    fn bucket_mut(&mut self, content_type: ContentType) -> &mut Vec<RedactionRecord> {
        match content_type {
            ContentType::Text => &mut self.text,
            ContentType::Image => &mut self.images,
        }
    }

    /// Total number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.text.len() + self.images.len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries not yet recovered.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.text
            .iter()
            .chain(&self.images)
            .filter(|r| !r.recovered)
            .count()
    }
}

/// Owner of the `history/<domain>` records.
///
/// All read-modify-write cycles go through one async mutex, so appends made
/// through the same ledger never overwrite each other.
#[derive(Debug)]
pub struct Ledger {
    store: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
}

impl Ledger {
    /// Create a ledger over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Append a redaction and return its index within the bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the history record cannot be read or written.
    pub async fn record(
        &self,
        domain: &str,
        content_type: ContentType,
        original: &str,
        replacement: &str,
    ) -> Result<usize> {
        let _guard = self.write_lock.lock().await;

        let mut history = self.history(domain)?;
        let bucket = history.bucket_mut(content_type);
        bucket.push(RedactionRecord {
            domain: domain.to_string(),
            content_type,
            original_content: original.to_string(),
            replacement_content: replacement.to_string(),
            timestamp: Utc::now(),
            recovered: false,
        });
        let index = bucket.len() - 1;

        self.save(domain, &history)?;
        debug!(domain, %content_type, index, "Recorded redaction");
        Ok(index)
    }

    /// Flag an entry as recovered.
    ///
    /// Returns `true` if the flag changed, `false` if it was already set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EntryNotFound`] for an unknown index, or a storage error.
    pub async fn mark_recovered(
        &self,
        domain: &str,
        content_type: ContentType,
        index: usize,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        self.flag(domain, content_type, index).map(|(changed, _)| changed)
    }

    /// Flag an entry as recovered and return its original content.
    ///
    /// Restoring an already-recovered entry returns the original again
    /// without touching the record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EntryNotFound`] for an unknown index, or a storage error.
    pub async fn restore(
        &self,
        domain: &str,
        content_type: ContentType,
        index: usize,
    ) -> Result<String> {
        let _guard = self.write_lock.lock().await;
        self.flag(domain, content_type, index)
            .map(|(_, original)| original)
    }

    /// Flag every entry of a domain as recovered.
    ///
    /// Returns how many entries changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the history record cannot be read or written.
    pub async fn recover_all(&self, domain: &str) -> Result<usize> {
        let _guard = self.write_lock.lock().await;

        let mut history = self.history(domain)?;
        let mut changed = 0;
        for record in history.text.iter_mut().chain(history.images.iter_mut()) {
            if !record.recovered {
                record.recovered = true;
                changed += 1;
            }
        }
        if changed > 0 {
            self.save(domain, &history)?;
        }
        info!(domain, changed, "Recovered all entries");
        Ok(changed)
    }

    /// The full history of a domain, empty if nothing was recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read or decoded.
    pub fn history(&self, domain: &str) -> Result<DomainHistory> {
        Ok(storage::load(self.store.as_ref(), &history_key(domain))?.unwrap_or_default())
    }

    /// Domains that have a history record, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    pub fn domains(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .keys_with_prefix(HISTORY_PREFIX)?
            .into_iter()
            .filter_map(|key| key.strip_prefix(HISTORY_PREFIX).map(str::to_string))
            .collect())
    }

    /// Drop a domain's history. Returns whether there was any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the removal.
    pub async fn clear_domain(&self, domain: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let removed = self.store.remove(&history_key(domain))?;
        info!(domain, removed, "Cleared history");
        Ok(removed)
    }

    fn flag(&self, domain: &str, content_type: ContentType, index: usize) -> Result<(bool, String)> {
        let mut history = self.history(domain)?;
        let record = history
            .bucket_mut(content_type)
            .get_mut(index)
            .ok_or_else(|| Error::entry_not_found(domain, content_type, index))?;

        if record.recovered {
            return Ok((false, record.original_content.clone()));
        }
        record.recovered = true;
        let original = record.original_content.clone();

        self.save(domain, &history)?;
        debug!(domain, %content_type, index, "Marked entry recovered");
        Ok((true, original))
    }

    fn save(&self, domain: &str, history: &DomainHistory) -> Result<()> {
        storage::save(self.store.as_ref(), &history_key(domain), history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, SqliteStore};

    fn ledger() -> Ledger {
        Ledger::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_record_appends_with_stable_indices() {
        let ledger = ledger();
        let a = ledger
            .record("example.com", ContentType::Text, "one", "***")
            .await
            .unwrap();
        let b = ledger
            .record("example.com", ContentType::Text, "two", "***")
            .await
            .unwrap();
        let img = ledger
            .record("example.com", ContentType::Image, "https://a.test/x.png", "[filtered image]")
            .await
            .unwrap();

        assert_eq!((a, b, img), (0, 1, 0));
        let history = ledger.history("example.com").unwrap();
        assert_eq!(history.text[0].original_content, "one");
        assert_eq!(history.text[1].original_content, "two");
        assert_eq!(history.len(), 3);
        assert!(history.text.iter().all(|r| !r.recovered));
    }

    #[tokio::test]
    async fn test_recovering_one_leaves_other_untouched() {
        let ledger = ledger();
        ledger
            .record("example.com", ContentType::Text, "first", "*****")
            .await
            .unwrap();
        ledger
            .record("example.com", ContentType::Text, "second", "******")
            .await
            .unwrap();

        assert!(ledger
            .mark_recovered("example.com", ContentType::Text, 0)
            .await
            .unwrap());

        let history = ledger.history("example.com").unwrap();
        assert!(history.text[0].recovered);
        assert!(!history.text[1].recovered);
    }

    #[tokio::test]
    async fn test_recovered_flag_never_reverts() {
        let ledger = ledger();
        ledger
            .record("a.test", ContentType::Image, "src", "[filtered image]")
            .await
            .unwrap();

        assert!(ledger.mark_recovered("a.test", ContentType::Image, 0).await.unwrap());
        assert!(!ledger.mark_recovered("a.test", ContentType::Image, 0).await.unwrap());
        ledger
            .record("a.test", ContentType::Image, "src2", "[filtered image]")
            .await
            .unwrap();

        let history = ledger.history("a.test").unwrap();
        assert!(history.images[0].recovered);
    }

    #[tokio::test]
    async fn test_restore_returns_exact_original() {
        let ledger = ledger();
        let original = "  Ünïcödé\tspacing  and explicit words\n";
        ledger
            .record("a.test", ContentType::Text, original, "masked")
            .await
            .unwrap();

        let first = ledger.restore("a.test", ContentType::Text, 0).await.unwrap();
        let second = ledger.restore("a.test", ContentType::Text, 0).await.unwrap();
        assert_eq!(first, original);
        assert_eq!(second, original);
        assert!(ledger.history("a.test").unwrap().text[0].recovered);
    }

    #[tokio::test]
    async fn test_unknown_index() {
        let ledger = ledger();
        let err = ledger
            .restore("nowhere.test", ContentType::Text, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EntryNotFound { index: 3, .. }));
    }

    #[tokio::test]
    async fn test_recover_all() {
        let ledger = ledger();
        for i in 0..3 {
            ledger
                .record("a.test", ContentType::Text, &format!("t{i}"), "**")
                .await
                .unwrap();
        }
        ledger
            .record("a.test", ContentType::Image, "src", "[filtered image]")
            .await
            .unwrap();
        ledger.mark_recovered("a.test", ContentType::Text, 1).await.unwrap();

        assert_eq!(ledger.recover_all("a.test").await.unwrap(), 3);
        assert_eq!(ledger.history("a.test").unwrap().pending(), 0);
        assert_eq!(ledger.recover_all("a.test").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_domains_and_clear() {
        let ledger = ledger();
        ledger.record("b.test", ContentType::Text, "x", "*").await.unwrap();
        ledger.record("a.test", ContentType::Text, "x", "*").await.unwrap();

        assert_eq!(ledger.domains().unwrap(), vec!["a.test", "b.test"]);
        assert!(ledger.clear_domain("a.test").await.unwrap());
        assert!(!ledger.clear_domain("a.test").await.unwrap());
        assert_eq!(ledger.domains().unwrap(), vec!["b.test"]);
        assert!(ledger.history("a.test").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_not_lost() {
        let ledger = Arc::new(ledger());
        let mut handles = Vec::new();
        for i in 0..20 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger
                    .record("race.test", ContentType::Text, &format!("n{i}"), "**")
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(ledger.history("race.test").unwrap().text.len(), 20);
    }

    #[tokio::test]
    async fn test_ledger_over_sqlite() {
        let ledger = Ledger::new(Arc::new(SqliteStore::open_in_memory().unwrap()));
        ledger.record("a.test", ContentType::Text, "orig", "****").await.unwrap();

        assert_eq!(
            ledger.restore("a.test", ContentType::Text, 0).await.unwrap(),
            "orig"
        );
    }

    #[test]
    fn test_history_json_shape() {
        let json = serde_json::to_value(DomainHistory::default()).unwrap();
        assert!(json.get("text").is_some());
        assert!(json.get("images").is_some());
    }
}
