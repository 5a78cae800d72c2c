//! The filtering pipeline.
//!
//! Every content unit walks the same small state machine:
//!
//! ```text
//! Unchecked ──denylist hit──────────────────────────▶ LocallyFiltered ─▶ Resolved
//!     │
//!     └─substantial, no hit─▶ NeedsRemoteCheck ─verdict / fallback─▶ Resolved
//! ```
//!
//! A denylist hit is trusted fully and the remote check is skipped. When no
//! classifier is configured the remote step falls back to local rules (the
//! extended denylist for text, an aspect-ratio heuristic for images). When
//! the classifier is configured but fails, the unit resolves unchanged.
//!
//! A unit is recorded in the ledger and counted in the statistics if and only
//! if it was actually changed on the page.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::classifier::{Classifier, RemoteClassifier};
use crate::config::{Config, ScanConfig};
use crate::content::{ContentType, ContentUnit, DiscoveredUnit, ImageUnit, NodeId};
use crate::error::{Error, Result};
use crate::ledger::{DomainHistory, Ledger};
use crate::lexicon::{mask_terms, Lexicon};
use crate::page::{ImageOverlay, Presenter, Redaction};
use crate::settings::{Settings, SettingsPatch, SettingsStore};
use crate::stats::{Statistics, StatsTracker};
use crate::storage::KeyValueStore;
use crate::verdict::{DetectionMethod, FilterVerdict};

/// Confidence reported for a denylist hit.
const LEXICON_CONFIDENCE: f64 = 1.0;

/// Category reported for a denylist hit.
const DENYLIST_CATEGORY: &str = "denylist";

/// Confidence reported by the local image heuristic.
const HEURISTIC_CONFIDENCE: f64 = 0.8;

/// Category reported by the local image heuristic.
const HEURISTIC_CATEGORY: &str = "suspicious-banner";

/// Aspect ratio above which an image looks like a banner.
const WIDE_RATIO: f64 = 3.0;

/// Aspect ratio below which an image looks like a skyscraper ad.
const TALL_RATIO: f64 = 0.3;

/// Side length an odd-shaped image must exceed to be obstructed locally.
const HEURISTIC_MIN_SIDE: u32 = 300;

/// Where a unit is in its walk through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Not looked at yet.
    Unchecked,
    /// The denylist matched.
    LocallyFiltered,
    /// Waiting on the classifier or the local fallback.
    NeedsRemoteCheck,
    /// Final.
    Resolved,
}

/// The outcome for one unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    /// Stages visited, `Unchecked` first and `Resolved` last.
    pub trail: Vec<Stage>,
    /// What to show instead, if the unit is to be changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redaction: Option<Redaction>,
    /// How the decision was reached, if the unit is to be changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<DetectionMethod>,
    /// The verdict behind the decision, if one was reached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<FilterVerdict>,
    /// Why the remote step was answered by local rules, if it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_only: Option<String>,
}

impl Resolution {
    fn unchanged(mut trail: Vec<Stage>) -> Self {
        trail.push(Stage::Resolved);
        Self {
            trail,
            redaction: None,
            method: None,
            verdict: None,
            local_only: None,
        }
    }

    fn changed(mut trail: Vec<Stage>, redaction: Redaction, method: DetectionMethod) -> Self {
        trail.push(Stage::Resolved);
        Self {
            trail,
            redaction: Some(redaction),
            method: Some(method),
            verdict: None,
            local_only: None,
        }
    }

    fn with_verdict(mut self, verdict: FilterVerdict) -> Self {
        self.verdict = Some(verdict);
        self
    }

    fn local_only(mut self) -> Self {
        self.local_only = Some(Error::ConfigurationMissing.to_string());
        self
    }

    /// Whether the unit is to be changed.
    #[must_use]
    pub fn is_changed(&self) -> bool {
        self.redaction.is_some()
    }

    /// Whether the classifier was asked and failed.
    #[must_use]
    pub fn remote_failed(&self) -> bool {
        self.verdict.as_ref().is_some_and(FilterVerdict::is_failed)
    }

    /// Whether local rules stood in for an unconfigured classifier.
    #[must_use]
    pub fn is_local_only(&self) -> bool {
        self.local_only.is_some()
    }
}

/// One redaction applied during a scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedRedaction {
    /// Node that was changed.
    pub node: NodeId,
    /// Kind of content.
    pub content_type: ContentType,
    /// Ledger index, if the ledger write succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    /// How the decision was reached.
    pub method: DetectionMethod,
    /// Content before redaction.
    pub original: String,
    /// What is shown now.
    pub redaction: Redaction,
}

/// Summary of one scan pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    /// Text units evaluated.
    pub text_checked: usize,
    /// Images evaluated.
    pub images_checked: usize,
    /// Units skipped as ineligible or already processed.
    pub skipped: usize,
    /// Classifier calls that failed.
    pub remote_failures: usize,
    /// Units judged by local rules because no classifier is configured.
    pub local_only: usize,
    /// Redactions applied, in order.
    pub redactions: Vec<AppliedRedaction>,
    /// Whether the page went away before the pass finished.
    pub aborted: bool,
}

type NodeKey = (String, ContentType, usize);

/// The content-filtering pipeline.
///
/// One pipeline serves any number of pages; it owns the settings, ledger and
/// statistics records and the session's verdict cache.
#[derive(Debug)]
pub struct Pipeline {
    settings: SettingsStore,
    ledger: Ledger,
    stats: StatsTracker,
    classifier: RwLock<Option<Arc<dyn Classifier>>>,
    lexicon: Lexicon,
    fallback: Lexicon,
    scan: ScanConfig,
    timeout: Duration,
    max_text_bytes: usize,
    verdicts: Mutex<HashMap<blake3::Hash, FilterVerdict>>,
    processed: Mutex<HashSet<(String, NodeId)>>,
    nodes: Mutex<HashMap<NodeKey, NodeId>>,
}

impl Pipeline {
    /// Build a pipeline from configuration over `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the classifier client cannot be built.
    pub fn new(config: &Config, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let settings = SettingsStore::new(Arc::clone(&store), Settings::from_config(config));
        let persisted = settings.load();

        let timeout = config.classifier_timeout();
        let max_text_bytes = config.classifier.max_text_bytes;
        let classifier = match &persisted.api_url {
            Some(url) => Some(Arc::new(RemoteClassifier::new(url, timeout, max_text_bytes)?)
                as Arc<dyn Classifier>),
            None => None,
        };

        Ok(Self {
            settings,
            ledger: Ledger::new(Arc::clone(&store)),
            stats: StatsTracker::new(store, config.stats_retry_delay()),
            classifier: RwLock::new(classifier),
            lexicon: config.lexicon(),
            fallback: config.fallback_lexicon(),
            scan: config.scan.clone(),
            timeout,
            max_text_bytes,
            verdicts: Mutex::new(HashMap::new()),
            processed: Mutex::new(HashSet::new()),
            nodes: Mutex::new(HashMap::new()),
        })
    }

    /// Replace the classifier.
    #[must_use]
    pub fn with_classifier(self, classifier: Arc<dyn Classifier>) -> Self {
        if let Ok(mut slot) = self.classifier.write() {
            *slot = Some(classifier);
        }
        self
    }

    /// The ledger.
    #[must_use]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Current settings.
    #[must_use]
    pub fn settings(&self) -> Settings {
        self.settings.load()
    }

    // === Evaluation ===

    /// Decide what to do with one unit, without touching any page.
    pub async fn evaluate_unit(&self, unit: &ContentUnit) -> Resolution {
        let settings = self.settings.load();
        match unit {
            ContentUnit::Text(text) => self.evaluate_text_with(text, &settings).await,
            ContentUnit::Image(image) => self.evaluate_image_with(image, &settings).await,
        }
    }

    /// Decide what to do with one piece of text.
    pub async fn evaluate_text(&self, text: &str) -> Resolution {
        let settings = self.settings.load();
        self.evaluate_text_with(text, &settings).await
    }

    async fn evaluate_text_with(&self, text: &str, settings: &Settings) -> Resolution {
        let mut trail = vec![Stage::Unchecked];
        if text.trim().is_empty() {
            return Resolution::unchanged(trail);
        }

        let masked = self.lexicon.mask(text);
        if masked != text {
            debug!("Denylist hit, skipping remote check");
            trail.push(Stage::LocallyFiltered);
            return Resolution::changed(
                trail,
                Redaction::Text {
                    replacement: masked,
                },
                DetectionMethod::Lexicon,
            )
            .with_verdict(FilterVerdict::local(DENYLIST_CATEGORY, LEXICON_CONFIDENCE));
        }

        if text.chars().count() <= self.scan.min_remote_text_len {
            return Resolution::unchanged(trail);
        }
        trail.push(Stage::NeedsRemoteCheck);

        let Some(classifier) = self.active_classifier(settings) else {
            let masked = self.fallback.mask(text);
            if masked == text {
                return Resolution::unchanged(trail).local_only();
            }
            debug!("Fallback denylist hit");
            return Resolution::changed(
                trail,
                Redaction::Text {
                    replacement: masked,
                },
                DetectionMethod::LocalFallback,
            )
            .local_only();
        };

        let unit = ContentUnit::Text(text.to_string());
        let verdict = self.classify_cached(&classifier, &unit, settings).await;
        if !verdict.should_filter {
            return Resolution::unchanged(trail).with_verdict(verdict);
        }

        let replacement = self.mask_detected(text, &verdict.detected_terms);
        Resolution::changed(
            trail,
            Redaction::Text { replacement },
            DetectionMethod::Remote,
        )
        .with_verdict(verdict)
    }

    async fn evaluate_image_with(&self, image: &ImageUnit, settings: &Settings) -> Resolution {
        let mut trail = vec![Stage::Unchecked];
        if !self.image_eligible(image) {
            return Resolution::unchanged(trail);
        }
        let min = self.scan.min_remote_image_dimension;
        if image.width <= min || image.height <= min {
            return Resolution::unchanged(trail);
        }
        trail.push(Stage::NeedsRemoteCheck);

        let Some(classifier) = self.active_classifier(settings) else {
            if !looks_like_ad(image) {
                return Resolution::unchanged(trail).local_only();
            }
            let verdict = FilterVerdict::local(HEURISTIC_CATEGORY, HEURISTIC_CONFIDENCE);
            let overlay = ImageOverlay {
                confidence_percent: verdict.confidence_percent(),
                method: DetectionMethod::LocalFallback,
            };
            return Resolution::changed(
                trail,
                Redaction::Image(overlay),
                DetectionMethod::LocalFallback,
            )
            .with_verdict(verdict)
            .local_only();
        };

        let unit = ContentUnit::Image(image.clone());
        let verdict = self.classify_cached(&classifier, &unit, settings).await;
        if !verdict.should_filter {
            return Resolution::unchanged(trail).with_verdict(verdict);
        }

        let overlay = ImageOverlay {
            confidence_percent: verdict.confidence_percent(),
            method: DetectionMethod::Remote,
        };
        Resolution::changed(trail, Redaction::Image(overlay), DetectionMethod::Remote)
            .with_verdict(verdict)
    }

    fn image_eligible(&self, image: &ImageUnit) -> bool {
        let min = self.scan.min_image_dimension;
        !image.has_unusable_source() && image.width >= min && image.height >= min
    }

    /// The classifier, if one is set up and the settings say to use it.
    fn active_classifier(&self, settings: &Settings) -> Option<Arc<dyn Classifier>> {
        let classifier = if settings.is_configured {
            self.classifier.read().ok().and_then(|slot| slot.clone())
        } else {
            None
        };
        if classifier.is_none() {
            debug!(reason = %Error::ConfigurationMissing, "Using local rules");
        }
        classifier
    }

    async fn classify_cached(
        &self,
        classifier: &Arc<dyn Classifier>,
        unit: &ContentUnit,
        settings: &Settings,
    ) -> FilterVerdict {
        let key = cache_key(unit);
        if let Some(hit) = self.verdicts.lock().ok().and_then(|c| c.get(&key).cloned()) {
            debug!("Verdict cache hit");
            return hit;
        }

        let verdict = classifier.classify(unit, &settings.thresholds).await;
        if !verdict.is_failed() {
            if let Ok(mut cache) = self.verdicts.lock() {
                cache.insert(key, verdict.clone());
            }
        }
        verdict
    }

    /// Mask the terms a verdict named, or the whole text if none of them
    /// can be found in it.
    fn mask_detected(&self, text: &str, detected: &[String]) -> String {
        let mask = self.lexicon.mask_char();
        let masked = mask_terms(text, detected, mask);
        if masked != text {
            return masked;
        }
        text.chars()
            .map(|c| if c.is_whitespace() { c } else { mask })
            .collect()
    }

    // === Scanning ===

    /// Filter every eligible unit of a page.
    ///
    /// Text is processed before images, each in discovery order, in chunks
    /// with a yield between chunks. If the page goes away mid-pass the rest
    /// is abandoned and nothing further is applied.
    pub async fn scan_and_filter(&self, page: &dyn Presenter, units: &[DiscoveredUnit]) -> ScanReport {
        let settings = self.settings.load();
        let mut report = ScanReport::default();

        if !settings.enabled {
            debug!(domain = page.domain(), "Filtering disabled");
            report.skipped = units.len();
            return report;
        }

        let (texts, images): (Vec<&DiscoveredUnit>, Vec<&DiscoveredUnit>) = units
            .iter()
            .partition(|u| u.unit.content_type() == ContentType::Text);

        let text_batch = if settings.text_active() {
            texts
        } else {
            report.skipped += texts.len();
            Vec::new()
        };
        let image_batch = if settings.images_active() {
            images
        } else {
            report.skipped += images.len();
            Vec::new()
        };

        let plan = [
            (text_batch, self.scan.text_batch_size),
            (image_batch, self.scan.image_batch_size),
        ];
        'pass: for (batch, chunk_size) in plan {
            for chunk in batch.chunks(chunk_size.max(1)) {
                for unit in chunk {
                    if !page.is_live() {
                        report.aborted = true;
                        break 'pass;
                    }
                    self.process(page, unit, &settings, &mut report).await;
                }
                tokio::task::yield_now().await;
            }
        }

        info!(
            domain = page.domain(),
            text = report.text_checked,
            images = report.images_checked,
            redactions = report.redactions.len(),
            local_only = report.local_only,
            aborted = report.aborted,
            "Scan finished"
        );
        report
    }

    async fn process(
        &self,
        page: &dyn Presenter,
        unit: &DiscoveredUnit,
        settings: &Settings,
        report: &mut ScanReport,
    ) {
        let domain = page.domain();
        if unit.in_skipped_parent() || unit.unit.is_blank() || self.is_processed(domain, unit.node) {
            report.skipped += 1;
            return;
        }

        let resolution = match &unit.unit {
            ContentUnit::Text(text) => {
                report.text_checked += 1;
                self.evaluate_text_with(text, settings).await
            }
            ContentUnit::Image(image) => {
                report.images_checked += 1;
                self.mark_processed(domain, unit.node);
                self.evaluate_image_with(image, settings).await
            }
        };

        if resolution.remote_failed() {
            report.remote_failures += 1;
        }
        if resolution.is_local_only() {
            report.local_only += 1;
        }
        let (Some(redaction), Some(method)) = (resolution.redaction, resolution.method) else {
            return;
        };

        // The page may have gone while the classifier was thinking.
        if !page.is_live() {
            debug!(node = %unit.node, "Page gone, dropping result");
            report.aborted = true;
            return;
        }

        let applied = self.apply(page, unit, redaction, method).await;
        report.redactions.push(applied);
    }

    async fn apply(
        &self,
        page: &dyn Presenter,
        unit: &DiscoveredUnit,
        redaction: Redaction,
        method: DetectionMethod,
    ) -> AppliedRedaction {
        let domain = page.domain();
        let content_type = unit.unit.content_type();
        let original = unit.unit.original().to_string();

        page.redact(unit.node, &redaction);
        self.mark_processed(domain, unit.node);

        let index = match self
            .ledger
            .record(domain, content_type, &original, redaction.replacement_content())
            .await
        {
            Ok(index) => {
                if let Ok(mut nodes) = self.nodes.lock() {
                    nodes.insert((domain.to_string(), content_type, index), unit.node);
                }
                Some(index)
            }
            Err(e) => {
                warn!(error = %e, domain, "Failed to record redaction");
                None
            }
        };

        if let Err(e) = self.stats.increment(content_type).await {
            warn!(error = %e, "Failed to update statistics");
        }

        debug!(node = %unit.node, %content_type, %method, "Applied redaction");
        AppliedRedaction {
            node: unit.node,
            content_type,
            index,
            method,
            original,
            redaction,
        }
    }

    fn is_processed(&self, domain: &str, node: NodeId) -> bool {
        self.processed
            .lock()
            .is_ok_and(|p| p.contains(&(domain.to_string(), node)))
    }

    fn mark_processed(&self, domain: &str, node: NodeId) {
        if let Ok(mut processed) = self.processed.lock() {
            processed.insert((domain.to_string(), node));
        }
    }

    fn forget_page(&self, domain: &str) {
        if let Ok(mut processed) = self.processed.lock() {
            processed.retain(|(d, _)| d != domain);
        }
        if let Ok(mut nodes) = self.nodes.lock() {
            nodes.retain(|(d, _, _), _| d != domain);
        }
    }

    // === Recovery ===

    /// Restore one redaction and put the original back on the page.
    ///
    /// Returns the original content. If the entry's node is not on this page
    /// (for example after a reload) only the ledger is updated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EntryNotFound`] for an unknown entry, or a storage error.
    pub async fn recover(
        &self,
        page: &dyn Presenter,
        content_type: ContentType,
        index: usize,
    ) -> Result<String> {
        let domain = page.domain();
        let original = self.ledger.restore(domain, content_type, index).await?;

        let node = self
            .nodes
            .lock()
            .map_err(|_| Error::internal("node map lock poisoned"))?
            .get(&(domain.to_string(), content_type, index))
            .copied();
        match node {
            Some(node) if page.is_live() => page.restore(node, &original),
            Some(_) => debug!(domain, "Page gone, ledger updated only"),
            None => debug!(domain, %content_type, index, "No node for entry on this page"),
        }

        info!(domain, %content_type, index, "Recovered content");
        Ok(original)
    }

    /// Mark every entry of the page's domain recovered and reload the page.
    ///
    /// Returns how many entries changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be updated.
    pub async fn recover_all(&self, page: &dyn Presenter) -> Result<usize> {
        let domain = page.domain();
        let changed = self.ledger.recover_all(domain).await?;
        self.forget_page(domain);
        if page.is_live() {
            page.reload();
        }
        Ok(changed)
    }

    /// The redaction history of a domain.
    ///
    /// # Errors
    ///
    /// Returns an error if the history cannot be read.
    pub fn history(&self, domain: &str) -> Result<DomainHistory> {
        self.ledger.history(domain)
    }

    // === Settings and statistics ===

    /// Merge a settings patch and, if the endpoint changed, swap the classifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the patch is invalid, the write fails or the new
    /// classifier cannot be built.
    pub async fn update_settings(&self, patch: SettingsPatch) -> Result<Settings> {
        let endpoint_changed = patch.api_url.is_some();
        let settings = self.settings.update(patch).await?;

        if endpoint_changed {
            let classifier = match &settings.api_url {
                Some(url) => Some(Arc::new(RemoteClassifier::new(
                    url,
                    self.timeout,
                    self.max_text_bytes,
                )?) as Arc<dyn Classifier>),
                None => None,
            };
            let mut slot = self
                .classifier
                .write()
                .map_err(|_| Error::internal("classifier lock poisoned"))?;
            *slot = classifier;
            if let Ok(mut cache) = self.verdicts.lock() {
                cache.clear();
            }
            info!(configured = settings.is_configured, "Classifier endpoint changed");
        }
        Ok(settings)
    }

    /// Current statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the statistics cannot be read.
    pub fn stats(&self) -> Result<Statistics> {
        self.stats.get()
    }

    /// Zero the statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn reset_stats(&self) -> Result<Statistics> {
        self.stats.reset().await
    }
}

/// Whether an image has the shape of a banner or skyscraper ad.
fn looks_like_ad(image: &ImageUnit) -> bool {
    let Some(ratio) = image.aspect_ratio() else {
        return false;
    };
    let odd_shape = ratio > WIDE_RATIO || ratio < TALL_RATIO;
    odd_shape && image.width.max(image.height) > HEURISTIC_MIN_SIDE
}

fn cache_key(unit: &ContentUnit) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    match unit {
        ContentUnit::Text(text) => {
            hasher.update(b"text\0");
            hasher.update(text.as_bytes());
        }
        ContentUnit::Image(image) => {
            hasher.update(b"image\0");
            match &image.data {
                Some(data) => hasher.update(data),
                None => hasher.update(image.source.as_bytes()),
            };
        }
    }
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::MemoryPage;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Classifier returning fixed scores and counting calls.
    #[derive(Debug, Default)]
    struct FixedClassifier {
        scores: Vec<(&'static str, f64)>,
        terms: Vec<String>,
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn classify(
            &self,
            unit: &ContentUnit,
            thresholds: &crate::verdict::Thresholds,
        ) -> FilterVerdict {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return FilterVerdict::failed(&Error::Service {
                    status: 503,
                    body: "down".to_string(),
                });
            }
            let scores: BTreeMap<String, f64> = self
                .scores
                .iter()
                .map(|(k, v)| ((*k).to_string(), *v))
                .collect();
            thresholds.evaluate(unit.content_type(), scores, self.terms.clone())
        }
    }

    fn local_pipeline() -> Pipeline {
        crate::logging::init_test_logging();
        Pipeline::new(&Config::default(), Arc::new(MemoryStore::new())).unwrap()
    }

    fn remote_pipeline(classifier: Arc<FixedClassifier>) -> Pipeline {
        let mut config = Config::default();
        config.classifier.api_url = Some("http://classifier.invalid".to_string());
        Pipeline::new(&config, Arc::new(MemoryStore::new()))
            .unwrap()
            .with_classifier(classifier)
    }

    #[tokio::test]
    async fn test_denylist_hit_skips_remote() {
        let classifier = Arc::new(FixedClassifier {
            scores: vec![("adult", 0.99)],
            ..FixedClassifier::default()
        });
        let pipeline = remote_pipeline(Arc::clone(&classifier));

        let resolution = pipeline.evaluate_text("this is an explicit test").await;
        assert_eq!(
            resolution.trail,
            vec![Stage::Unchecked, Stage::LocallyFiltered, Stage::Resolved]
        );
        assert_eq!(
            resolution.redaction,
            Some(Redaction::Text {
                replacement: "this is an ******** test".to_string()
            })
        );
        assert_eq!(resolution.method, Some(DetectionMethod::Lexicon));
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_short_text_never_escalated() {
        let classifier = Arc::new(FixedClassifier {
            scores: vec![("adult", 0.99)],
            ..FixedClassifier::default()
        });
        let pipeline = remote_pipeline(Arc::clone(&classifier));

        let resolution = pipeline.evaluate_text("short").await;
        assert!(!resolution.is_changed());
        assert_eq!(resolution.trail, vec![Stage::Unchecked, Stage::Resolved]);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_remote_masks_detected_terms() {
        let classifier = Arc::new(FixedClassifier {
            scores: vec![("hate_speech", 0.9)],
            terms: vec!["nasty".to_string()],
            ..FixedClassifier::default()
        });
        let pipeline = remote_pipeline(classifier);

        let resolution = pipeline.evaluate_text("what a nasty thing to say").await;
        assert_eq!(
            resolution.trail,
            vec![Stage::Unchecked, Stage::NeedsRemoteCheck, Stage::Resolved]
        );
        assert_eq!(
            resolution.redaction,
            Some(Redaction::Text {
                replacement: "what a ***** thing to say".to_string()
            })
        );
        assert_eq!(resolution.method, Some(DetectionMethod::Remote));
    }

    #[tokio::test]
    async fn test_remote_without_terms_masks_everything() {
        let classifier = Arc::new(FixedClassifier {
            scores: vec![("adult", 0.95)],
            ..FixedClassifier::default()
        });
        let pipeline = remote_pipeline(classifier);

        let resolution = pipeline.evaluate_text("some risky sentence").await;
        assert_eq!(
            resolution.redaction,
            Some(Redaction::Text {
                replacement: "**** ***** ********".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_remote_failure_leaves_text_unchanged() {
        let classifier = Arc::new(FixedClassifier {
            fail: true,
            ..FixedClassifier::default()
        });
        let pipeline = remote_pipeline(classifier);

        // "murder" is on the extended list but the fallback only applies when
        // no classifier is configured.
        let resolution = pipeline.evaluate_text("a story about a murder").await;
        assert!(!resolution.is_changed());
        assert!(resolution.remote_failed());
    }

    #[tokio::test]
    async fn test_unconfigured_uses_extended_lexicon() {
        let pipeline = local_pipeline();

        let resolution = pipeline.evaluate_text("a story about a murder").await;
        assert_eq!(
            resolution.redaction,
            Some(Redaction::Text {
                replacement: "a story about a ******".to_string()
            })
        );
        assert_eq!(resolution.method, Some(DetectionMethod::LocalFallback));
    }

    #[tokio::test]
    async fn test_verdicts_are_cached() {
        let classifier = Arc::new(FixedClassifier {
            scores: vec![("adult", 0.1)],
            ..FixedClassifier::default()
        });
        let pipeline = remote_pipeline(Arc::clone(&classifier));

        pipeline.evaluate_text("perfectly harmless words").await;
        pipeline.evaluate_text("perfectly harmless words").await;
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_verdicts_not_cached() {
        let classifier = Arc::new(FixedClassifier {
            fail: true,
            ..FixedClassifier::default()
        });
        let pipeline = remote_pipeline(Arc::clone(&classifier));

        pipeline.evaluate_text("perfectly harmless words").await;
        pipeline.evaluate_text("perfectly harmless words").await;
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_image_heuristic_without_classifier() {
        let pipeline = local_pipeline();

        let banner = ContentUnit::Image(ImageUnit::new("https://ads.test/b.png", 1200, 250));
        let resolution = pipeline.evaluate_unit(&banner).await;
        assert_eq!(
            resolution.redaction,
            Some(Redaction::Image(ImageOverlay {
                confidence_percent: 80,
                method: DetectionMethod::LocalFallback,
            }))
        );
        assert!(resolution.is_local_only());

        let photo = ContentUnit::Image(ImageUnit::new("https://a.test/p.png", 800, 600));
        let resolution = pipeline.evaluate_unit(&photo).await;
        assert!(!resolution.is_changed());
        assert!(resolution.is_local_only());
    }

    #[tokio::test]
    async fn test_thin_banner_never_checked() {
        let pipeline = local_pipeline();

        // Too short to be worth checking, however odd the shape.
        let leaderboard = ContentUnit::Image(ImageUnit::new("https://ads.test/b.png", 970, 90));
        let resolution = pipeline.evaluate_unit(&leaderboard).await;
        assert!(!resolution.is_changed());
        assert!(!resolution.is_local_only());
        assert_eq!(resolution.trail, vec![Stage::Unchecked, Stage::Resolved]);

        let at_limit = ContentUnit::Image(ImageUnit::new("https://ads.test/s.png", 100, 600));
        assert_eq!(
            pipeline.evaluate_unit(&at_limit).await.trail,
            vec![Stage::Unchecked, Stage::Resolved]
        );
    }

    #[tokio::test]
    async fn test_text_must_exceed_remote_length() {
        let pipeline = local_pipeline();

        let at_limit = pipeline.evaluate_text("gore gore!").await;
        assert_eq!(at_limit.trail, vec![Stage::Unchecked, Stage::Resolved]);
        assert!(!at_limit.is_changed());
        assert!(!at_limit.is_local_only());

        let over_limit = pipeline.evaluate_text("gore gore!!").await;
        assert_eq!(
            over_limit.trail,
            vec![Stage::Unchecked, Stage::NeedsRemoteCheck, Stage::Resolved]
        );
        assert_eq!(
            over_limit.redaction,
            Some(Redaction::Text {
                replacement: "**** ****!!".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_remote_length_gate_with_classifier() {
        let classifier = Arc::new(FixedClassifier {
            scores: vec![("adult", 0.1)],
            ..FixedClassifier::default()
        });
        let pipeline = remote_pipeline(Arc::clone(&classifier));

        pipeline.evaluate_text("ten chars!").await;
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);

        let resolution = pipeline.evaluate_text("eleven char").await;
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
        assert!(!resolution.is_local_only());
    }

    #[tokio::test]
    async fn test_unconfigured_marks_local_only() {
        let pipeline = local_pipeline();

        let resolution = pipeline.evaluate_text("nothing to see in this line").await;
        assert!(!resolution.is_changed());
        assert_eq!(
            resolution.local_only.as_deref(),
            Some("remote classifier is not configured")
        );
        assert!(!resolution.remote_failed());

        let page = MemoryPage::from_lines("a.test", "a story about a murder\nexplicit");
        let report = pipeline.scan_and_filter(&page, &page.units()).await;
        assert_eq!(report.local_only, 1);
        assert_eq!(report.remote_failures, 0);
    }

    #[tokio::test]
    async fn test_image_size_gates() {
        let classifier = Arc::new(FixedClassifier {
            scores: vec![("adult", 0.9)],
            ..FixedClassifier::default()
        });
        let pipeline = remote_pipeline(Arc::clone(&classifier));

        let tiny = ContentUnit::Image(ImageUnit::new("https://a.test/t.png", 40, 40));
        let resolution = pipeline.evaluate_unit(&tiny).await;
        assert_eq!(resolution.trail, vec![Stage::Unchecked, Stage::Resolved]);

        let medium = ContentUnit::Image(ImageUnit::new("https://a.test/m.png", 100, 300));
        assert!(!pipeline.evaluate_unit(&medium).await.is_changed());
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);

        let large = ContentUnit::Image(ImageUnit::new("https://a.test/l.png", 400, 300));
        let resolution = pipeline.evaluate_unit(&large).await;
        assert_eq!(
            resolution.redaction,
            Some(Redaction::Image(ImageOverlay {
                confidence_percent: 90,
                method: DetectionMethod::Remote,
            }))
        );
    }

    #[tokio::test]
    async fn test_scan_records_and_counts_changes_only() {
        let pipeline = local_pipeline();
        let page = MemoryPage::from_lines(
            "example.com",
            "clean line\nthis is an explicit test\nanother clean line\nvulgar",
        );

        let report = pipeline.scan_and_filter(&page, &page.units()).await;
        assert_eq!(report.text_checked, 4);
        assert_eq!(report.redactions.len(), 2);
        assert_eq!(
            page.render(),
            "clean line\nthis is an ******** test\nanother clean line\n******"
        );

        let history = pipeline.history("example.com").unwrap();
        assert_eq!(history.text.len(), 2);
        assert_eq!(history.text[0].original_content, "this is an explicit test");
        assert_eq!(pipeline.stats().unwrap().text_filtered, 2);
    }

    #[tokio::test]
    async fn test_scan_skips_script_and_processed_nodes() {
        let pipeline = local_pipeline();
        let page = MemoryPage::new("example.com");
        page.add_text_under("var explicit = 1;", "SCRIPT");
        page.add_text("explicit");

        let first = pipeline.scan_and_filter(&page, &page.units()).await;
        assert_eq!(first.redactions.len(), 1);
        assert_eq!(first.skipped, 1);

        let second = pipeline.scan_and_filter(&page, &page.units()).await;
        assert!(second.redactions.is_empty());
        assert_eq!(pipeline.stats().unwrap().text_filtered, 1);
    }

    #[tokio::test]
    async fn test_scan_respects_switches() {
        let pipeline = local_pipeline();
        pipeline
            .update_settings(SettingsPatch {
                filter_text: Some(false),
                ..SettingsPatch::default()
            })
            .await
            .unwrap();
        let page = MemoryPage::from_lines("a.test", "explicit");

        let report = pipeline.scan_and_filter(&page, &page.units()).await;
        assert!(report.redactions.is_empty());
        assert_eq!(report.skipped, 1);

        pipeline
            .update_settings(SettingsPatch {
                filter_text: Some(true),
                enabled: Some(false),
                ..SettingsPatch::default()
            })
            .await
            .unwrap();
        let report = pipeline.scan_and_filter(&page, &page.units()).await;
        assert!(report.redactions.is_empty());
        assert_eq!(page.render(), "explicit");
    }

    #[tokio::test]
    async fn test_dead_page_is_not_touched() {
        let pipeline = local_pipeline();
        let page = MemoryPage::from_lines("a.test", "explicit\nobscene");
        page.handle().close();

        let report = pipeline.scan_and_filter(&page, &page.units()).await;
        assert!(report.aborted);
        assert!(report.redactions.is_empty());
        assert_eq!(page.render(), "explicit\nobscene");
        assert!(pipeline.history("a.test").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recover_puts_original_back() {
        let pipeline = local_pipeline();
        let page = MemoryPage::from_lines("a.test", "explicit one\nobscene two");
        pipeline.scan_and_filter(&page, &page.units()).await;

        let original = pipeline.recover(&page, ContentType::Text, 0).await.unwrap();
        assert_eq!(original, "explicit one");
        assert_eq!(page.render(), "explicit one\n******* two");

        let history = pipeline.history("a.test").unwrap();
        assert!(history.text[0].recovered);
        assert!(!history.text[1].recovered);
    }

    #[tokio::test]
    async fn test_recover_all_reloads() {
        let pipeline = local_pipeline();
        let page = MemoryPage::from_lines("a.test", "explicit one\nobscene two");
        pipeline.scan_and_filter(&page, &page.units()).await;

        assert_eq!(pipeline.recover_all(&page).await.unwrap(), 2);
        assert_eq!(page.reload_count(), 1);
        assert_eq!(page.render(), "explicit one\nobscene two");
        assert_eq!(pipeline.history("a.test").unwrap().pending(), 0);
    }

    #[test]
    fn test_cache_key_separates_types() {
        let text = ContentUnit::Text("https://a.test/x.png".to_string());
        let image = ContentUnit::Image(ImageUnit::new("https://a.test/x.png", 1, 1));
        assert_ne!(cache_key(&text), cache_key(&image));
    }

    #[test]
    fn test_looks_like_ad() {
        assert!(looks_like_ad(&ImageUnit::new("a", 728, 90)));
        assert!(looks_like_ad(&ImageUnit::new("a", 160, 600)));
        assert!(!looks_like_ad(&ImageUnit::new("a", 600, 400)));
        assert!(!looks_like_ad(&ImageUnit::new("a", 0, 0)));
    }
}
