//! Remote content classification.
//!
//! The [`Classifier`] seam never fails: a broken transport, a non-success
//! status or an oversize payload all come back as a non-filtering
//! [`FilterVerdict`] carrying the error message, so callers can carry on with
//! local filtering only.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::content::{ContentUnit, ImageUnit};
use crate::error::{Error, Result};
use crate::verdict::{FilterVerdict, Thresholds};

/// Path of the text scoring endpoint.
const TEXT_PATH: &str = "/filter/text";

/// Path of the image scoring endpoint.
const IMAGE_PATH: &str = "/filter/image";

/// Path of the health probe.
const HEALTH_PATH: &str = "/health";

/// Something that can score content.
#[async_trait]
pub trait Classifier: Send + Sync + std::fmt::Debug {
    /// Score `unit` and judge the scores against `thresholds`.
    ///
    /// Failures are reported inside the verdict, never as an error.
    async fn classify(&self, unit: &ContentUnit, thresholds: &Thresholds) -> FilterVerdict;
}

/// Request body for text scoring.
#[derive(Debug, Serialize)]
struct TextRequest<'a> {
    text: &'a str,
}

/// Request body for image scoring.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<&'a str>,
}

/// Scores returned by the service.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScoreResponse {
    #[serde(default)]
    scores: BTreeMap<String, f64>,
    #[serde(default)]
    detected_terms: Vec<String>,
}

/// HTTP client for the classification service.
#[derive(Debug, Clone)]
pub struct RemoteClassifier {
    client: reqwest::Client,
    base_url: String,
    max_text_bytes: usize,
}

impl RemoteClassifier {
    /// Create a client for the service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration, max_text_bytes: usize) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_text_bytes,
        })
    }

    /// The service base URL, without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Score a unit, surfacing failures as errors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PayloadTooLarge`] for oversize text,
    /// [`Error::MalformedInput`] for blank content, [`Error::Transport`] or
    /// [`Error::Service`] if the request fails.
    pub async fn try_classify(
        &self,
        unit: &ContentUnit,
        thresholds: &Thresholds,
    ) -> Result<FilterVerdict> {
        if unit.is_blank() {
            return Err(Error::malformed("nothing to classify"));
        }

        let response = match unit {
            ContentUnit::Text(text) => self.score_text(text).await?,
            ContentUnit::Image(image) => self.score_image(image).await?,
        };

        let verdict =
            thresholds.evaluate(unit.content_type(), response.scores, response.detected_terms);
        debug!(
            content_type = %unit.content_type(),
            should_filter = verdict.should_filter,
            confidence = verdict.confidence,
            "Classified content"
        );
        Ok(verdict)
    }

    /// Check the service answers its health probe.
    ///
    /// # Errors
    ///
    /// Returns an error if the service is unreachable or unhealthy.
    pub async fn health(&self) -> Result<()> {
        let url = format!("{}{HEALTH_PATH}", self.base_url);
        let resp = self.client.get(&url).send().await?;
        check_status(resp).await.map(drop)
    }

    async fn score_text(&self, text: &str) -> Result<ScoreResponse> {
        if text.len() > self.max_text_bytes {
            return Err(Error::PayloadTooLarge {
                size: text.len(),
                limit: self.max_text_bytes,
            });
        }
        self.post(TEXT_PATH, &TextRequest { text }).await
    }

    async fn score_image(&self, image: &ImageUnit) -> Result<ScoreResponse> {
        let body = match &image.data {
            Some(data) => ImageRequest {
                image: Some(STANDARD.encode(data)),
                image_url: None,
            },
            None => ImageRequest {
                image: None,
                image_url: Some(&image.source),
            },
        };
        self.post(IMAGE_PATH, &body).await
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<ScoreResponse> {
        let url = format!("{}{path}", self.base_url);
        let resp = self.client.post(&url).json(body).send().await?;
        let resp = check_status(resp).await?;
        Ok(resp.json().await?)
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(Error::Service {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl Classifier for RemoteClassifier {
    async fn classify(&self, unit: &ContentUnit, thresholds: &Thresholds) -> FilterVerdict {
        match self.try_classify(unit, thresholds).await {
            Ok(verdict) => verdict,
            Err(e) => {
                if e.is_transport() {
                    warn!(error = %e, content_type = %unit.content_type(), "Classification failed");
                } else {
                    debug!(error = %e, "Skipped classification");
                }
                FilterVerdict::failed(&e)
            }
        }
    }
}
