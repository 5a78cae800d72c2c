//! Content units discovered on a page.
//!
//! A [`ContentUnit`] is the ephemeral input of one scan pass: the string value
//! of a text node or the source locator of an image. Units are never
//! persisted; only the redactions made to them reach the ledger.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Parent elements whose text is never filtered.
const SKIPPED_PARENTS: &[&str] = &["SCRIPT", "STYLE", "NOSCRIPT"];

/// The kind of content a redaction applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// A text node value.
    Text,
    /// An image element.
    Image,
}

impl ContentType {
    /// All content types, in ledger order.
    pub const ALL: [ContentType; 2] = [ContentType::Text, ContentType::Image];
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Image => write!(f, "image"),
        }
    }
}

impl FromStr for ContentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "image" | "images" => Ok(Self::Image),
            other => Err(Error::malformed(format!("unknown content type: {other}"))),
        }
    }
}

/// Identifier of a node on the presentation surface.
///
/// Assigned by whoever discovers the content (DOM traversal order in a
/// browser, line number in the CLI). The pipeline only hands it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An image as seen by the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUnit {
    /// Source locator (URL) of the image.
    pub source: String,
    /// Rendered width in pixels.
    pub width: u32,
    /// Rendered height in pixels.
    pub height: u32,
    /// Raw image bytes, when the boundary layer fetched them.
    #[serde(skip)]
    pub data: Option<Vec<u8>>,
}

impl ImageUnit {
    /// Create an image unit without loaded bytes.
    #[must_use]
    pub fn new(source: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            source: source.into(),
            width,
            height,
            data: None,
        }
    }

    /// Attach the raw image bytes.
    #[must_use]
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = Some(data);
        self
    }

    /// Width divided by height, or `None` for a zero-height image.
    #[must_use]
    pub fn aspect_ratio(&self) -> Option<f64> {
        if self.height == 0 {
            None
        } else {
            Some(f64::from(self.width) / f64::from(self.height))
        }
    }

    /// Whether the source is missing or an inline `data:` URL.
    #[must_use]
    pub fn has_unusable_source(&self) -> bool {
        let source = self.source.trim();
        source.is_empty() || source.starts_with("data:")
    }
}

/// A single piece of content to be checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentUnit {
    /// The value of a text node.
    Text(String),
    /// An image element.
    Image(ImageUnit),
}

impl ContentUnit {
    /// The content type of this unit.
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        match self {
            Self::Text(_) => ContentType::Text,
            Self::Image(_) => ContentType::Image,
        }
    }

    /// The string recorded as original content when this unit is redacted.
    #[must_use]
    pub fn original(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Image(image) => &image.source,
        }
    }

    /// Empty or whitespace-only text, or an image without a usable source.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::Image(image) => image.has_unusable_source(),
        }
    }
}

/// A content unit together with where it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredUnit {
    /// Node on the presentation surface.
    pub node: NodeId,
    /// The content itself.
    pub unit: ContentUnit,
    /// Tag name of the parent element, if known.
    pub parent_tag: Option<String>,
}

impl DiscoveredUnit {
    /// A text node with no parent information.
    #[must_use]
    pub fn text(node: usize, text: impl Into<String>) -> Self {
        Self {
            node: NodeId(node),
            unit: ContentUnit::Text(text.into()),
            parent_tag: None,
        }
    }

    /// An image element.
    #[must_use]
    pub fn image(node: usize, image: ImageUnit) -> Self {
        Self {
            node: NodeId(node),
            unit: ContentUnit::Image(image),
            parent_tag: None,
        }
    }

    /// Set the parent element's tag name.
    #[must_use]
    pub fn under(mut self, tag: impl Into<String>) -> Self {
        self.parent_tag = Some(tag.into());
        self
    }

    /// Whether the parent element is one whose text is never shown.
    #[must_use]
    pub fn in_skipped_parent(&self) -> bool {
        self.parent_tag
            .as_deref()
            .is_some_and(|tag| SKIPPED_PARENTS.iter().any(|s| s.eq_ignore_ascii_case(tag)))
    }
}
