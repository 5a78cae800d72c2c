//! Filter verdicts and the thresholds that produce them.
//!
//! A [`FilterVerdict`] is created once per content unit and never mutated
//! afterwards. Verdicts from the remote classifier are derived from raw
//! per-category scores by [`Thresholds::evaluate`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::content::ContentType;
use crate::error::{Error, Result};

/// Score key reporting how safe an image is, rather than how unsafe.
pub const SAFE_SCORE: &str = "safe";

/// Category recorded when an image's safe score falls below its floor.
pub const UNSAFE_CATEGORY: &str = "unsafe";

/// The decision for one content unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterVerdict {
    /// Whether the unit should be redacted.
    pub should_filter: bool,
    /// Highest triggering score, 0 when nothing triggered.
    pub confidence: f64,
    /// Every category that crossed its threshold, in score-key order.
    pub categories: Vec<String>,
    /// Raw scores as reported by the classifier.
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
    /// Terms the classifier identified as offending, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detected_terms: Vec<String>,
    /// Why classification failed, when it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FilterVerdict {
    /// A verdict that filters nothing.
    #[must_use]
    pub fn clean() -> Self {
        Self {
            should_filter: false,
            confidence: 0.0,
            categories: Vec::new(),
            scores: BTreeMap::new(),
            detected_terms: Vec::new(),
            error: None,
        }
    }

    /// A non-filtering verdict carrying the reason classification failed.
    #[must_use]
    pub fn failed(error: &Error) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::clean()
        }
    }

    /// A filtering verdict reached without the remote classifier.
    #[must_use]
    pub fn local(category: &str, confidence: f64) -> Self {
        Self {
            should_filter: true,
            confidence,
            categories: vec![category.to_string()],
            ..Self::clean()
        }
    }

    /// Whether this verdict stands in for a failed classification.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Confidence as a whole percentage, for display.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn confidence_percent(&self) -> u8 {
        (self.confidence.clamp(0.0, 1.0) * 100.0).round() as u8
    }
}

impl Default for FilterVerdict {
    fn default() -> Self {
        Self::clean()
    }
}

/// How a filtering decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionMethod {
    /// The built-in denylist matched.
    Lexicon,
    /// The remote classifier flagged the content.
    Remote,
    /// Local rules used because no classifier is configured.
    LocalFallback,
}

impl std::fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexicon => write!(f, "lexicon"),
            Self::Remote => write!(f, "remote"),
            Self::LocalFallback => write!(f, "local-fallback"),
        }
    }
}

/// Per-category score thresholds.
///
/// A category triggers when its score is strictly greater than its threshold.
/// The safe score works the other way round: an image triggers when its safe
/// score is strictly below `safe_floor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Adult content.
    pub adult: f64,
    /// Violent content.
    pub violence: f64,
    /// Suggestive content.
    pub racy: f64,
    /// Medical imagery.
    pub medical: f64,
    /// Minimum safe score an image must reach.
    pub safe_floor: f64,
    /// Catch-all threshold for other text categories (hate speech, harassment).
    pub text_confidence: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            adult: 0.7,
            violence: 0.7,
            racy: 0.8,
            medical: 0.7,
            safe_floor: 0.5,
            text_confidence: 0.7,
        }
    }
}

impl Thresholds {
    /// Threshold for a category, or `None` if the category is not judged
    /// for this content type.
    #[must_use]
    pub fn threshold_for(&self, category: &str, content_type: ContentType) -> Option<f64> {
        match category.to_ascii_lowercase().as_str() {
            "adult" => Some(self.adult),
            "violence" => Some(self.violence),
            "racy" => Some(self.racy),
            "medical" => Some(self.medical),
            SAFE_SCORE => None,
            _ => match content_type {
                ContentType::Text => Some(self.text_confidence),
                ContentType::Image => None,
            },
        }
    }

    /// Map raw scores to a verdict.
    #[must_use]
    pub fn evaluate(
        &self,
        content_type: ContentType,
        scores: BTreeMap<String, f64>,
        detected_terms: Vec<String>,
    ) -> FilterVerdict {
        let mut categories = Vec::new();
        let mut confidence: f64 = 0.0;

        for (category, &score) in &scores {
            if !score.is_finite() {
                continue;
            }
            let Some(threshold) = self.threshold_for(category, content_type) else {
                continue;
            };
            if score > threshold {
                categories.push(category.clone());
                confidence = confidence.max(score);
            }
        }

        if content_type == ContentType::Image {
            if let Some(&safe) = scores.get(SAFE_SCORE) {
                if safe.is_finite() && safe < self.safe_floor {
                    categories.push(UNSAFE_CATEGORY.to_string());
                    confidence = confidence.max(1.0 - safe);
                }
            }
        }

        FilterVerdict {
            should_filter: !categories.is_empty(),
            confidence,
            categories,
            scores,
            detected_terms,
            error: None,
        }
    }

    /// Check every threshold lies within 0..=1.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the first out-of-range threshold.
    pub fn validate(&self) -> Result<()> {
        let named = [
            ("adult", self.adult),
            ("violence", self.violence),
            ("racy", self.racy),
            ("medical", self.medical),
            ("safe_floor", self.safe_floor),
            ("text_confidence", self.text_confidence),
        ];
        for (name, value) in named {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::validation(format!(
                    "threshold {name} must be between 0 and 1, got {value}"
                )));
            }
        }
        Ok(())
    }
}
