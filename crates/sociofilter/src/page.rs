//! The presentation surface the pipeline redacts.
//!
//! The pipeline never touches a rendering technology directly; it calls a
//! [`Presenter`] to swap text, obstruct images and put originals back. A
//! presenter also reports whether its page is still alive, so results that
//! arrive after navigation are dropped instead of applied.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, warn};

use crate::content::{ContentUnit, DiscoveredUnit, ImageUnit, NodeId};
use crate::verdict::DetectionMethod;

/// Replacement recorded in the ledger for an obstructed image.
pub const IMAGE_REPLACEMENT: &str = "[filtered image]";

/// Disclaimer shown over an obstructed image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageOverlay {
    /// Confidence as a whole percentage.
    pub confidence_percent: u8,
    /// How the image was flagged.
    pub method: DetectionMethod,
}

impl std::fmt::Display for ImageOverlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Sensitive image filtered ({}% confidence, {})",
            self.confidence_percent, self.method
        )
    }
}

/// What to show instead of a node's original content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Redaction {
    /// Replace a text node's value.
    Text {
        /// The masked text.
        replacement: String,
    },
    /// Obstruct an image, keeping its source.
    Image(ImageOverlay),
}

impl Redaction {
    /// The replacement string recorded in the ledger.
    #[must_use]
    pub fn replacement_content(&self) -> &str {
        match self {
            Self::Text { replacement } => replacement,
            Self::Image(_) => IMAGE_REPLACEMENT,
        }
    }
}

/// A page the pipeline can redact.
pub trait Presenter: Send + Sync + std::fmt::Debug {
    /// Domain the page belongs to.
    fn domain(&self) -> &str;

    /// Whether the page is still showing; results for dead pages are dropped.
    fn is_live(&self) -> bool;

    /// Show `redaction` in place of the node's content.
    fn redact(&self, node: NodeId, redaction: &Redaction);

    /// Put the node's original content back.
    fn restore(&self, node: NodeId, original: &str);

    /// Re-render the whole page from its originals.
    fn reload(&self);
}

/// Liveness flag shared between a page and whoever navigates away from it.
#[derive(Debug, Clone)]
pub struct PageHandle {
    alive: Arc<AtomicBool>,
}

impl PageHandle {
    /// A handle for a live page.
    #[must_use]
    pub fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Mark the page gone.
    pub fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Whether the page is still live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

impl Default for PageHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// How a node currently renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeView {
    /// A text node.
    Text {
        /// Displayed text.
        text: String,
    },
    /// An image, possibly obstructed.
    Image {
        /// Source locator, always kept.
        source: String,
        /// Obstruction, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        overlay: Option<ImageOverlay>,
    },
}

impl std::fmt::Display for NodeView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text { text } => write!(f, "{text}"),
            Self::Image {
                source,
                overlay: None,
            } => write!(f, "[image {source}]"),
            Self::Image {
                overlay: Some(overlay),
                ..
            } => write!(f, "[{overlay}]"),
        }
    }
}

#[derive(Debug)]
struct Node {
    original: DiscoveredUnit,
    view: NodeView,
}

impl Node {
    fn pristine(unit: &DiscoveredUnit) -> NodeView {
        match &unit.unit {
            ContentUnit::Text(text) => NodeView::Text { text: text.clone() },
            ContentUnit::Image(image) => NodeView::Image {
                source: image.source.clone(),
                overlay: None,
            },
        }
    }
}

/// An in-memory page: the presenter behind the CLI and the tests.
#[derive(Debug)]
pub struct MemoryPage {
    domain: String,
    handle: PageHandle,
    nodes: Mutex<BTreeMap<NodeId, Node>>,
    next_id: AtomicUsize,
    reloads: AtomicUsize,
}

impl MemoryPage {
    /// Create an empty page for `domain`.
    #[must_use]
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            handle: PageHandle::new(),
            nodes: Mutex::new(BTreeMap::new()),
            next_id: AtomicUsize::new(0),
            reloads: AtomicUsize::new(0),
        }
    }

    /// A page with one text node per non-empty line of `body`.
    #[must_use]
    pub fn from_lines(domain: impl Into<String>, body: &str) -> Self {
        let page = Self::new(domain);
        for line in body.lines().filter(|l| !l.trim().is_empty()) {
            page.add_text(line);
        }
        page
    }

    /// The liveness handle of this page.
    #[must_use]
    pub fn handle(&self) -> PageHandle {
        self.handle.clone()
    }

    /// Append a text node.
    pub fn add_text(&self, text: impl Into<String>) -> DiscoveredUnit {
        let node = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.insert(DiscoveredUnit::text(node, text))
    }

    /// Append a text node under a parent element.
    pub fn add_text_under(&self, text: impl Into<String>, parent: &str) -> DiscoveredUnit {
        let node = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.insert(DiscoveredUnit::text(node, text).under(parent))
    }

    /// Append an image node.
    pub fn add_image(&self, image: ImageUnit) -> DiscoveredUnit {
        let node = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.insert(DiscoveredUnit::image(node, image))
    }

    /// Every node as originally discovered, in document order.
    #[must_use]
    pub fn units(&self) -> Vec<DiscoveredUnit> {
        self.lock()
            .map(|nodes| nodes.values().map(|n| n.original.clone()).collect())
            .unwrap_or_default()
    }

    /// How every node renders now, in document order.
    #[must_use]
    pub fn views(&self) -> Vec<NodeView> {
        self.lock()
            .map(|nodes| nodes.values().map(|n| n.view.clone()).collect())
            .unwrap_or_default()
    }

    /// How one node renders now.
    #[must_use]
    pub fn view(&self, node: NodeId) -> Option<NodeView> {
        self.lock()?.get(&node).map(|n| n.view.clone())
    }

    /// The rendered page, one node per line.
    #[must_use]
    pub fn render(&self) -> String {
        self.views()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// How many times the page was reloaded.
    #[must_use]
    pub fn reload_count(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }

    fn insert(&self, unit: DiscoveredUnit) -> DiscoveredUnit {
        if let Some(mut nodes) = self.lock() {
            nodes.insert(
                unit.node,
                Node {
                    view: Node::pristine(&unit),
                    original: unit.clone(),
                },
            );
        }
        unit
    }

    fn lock(&self) -> Option<MutexGuard<'_, BTreeMap<NodeId, Node>>> {
        match self.nodes.lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                warn!(domain = %self.domain, "Page lock poisoned");
                None
            }
        }
    }
}

impl Presenter for MemoryPage {
    fn domain(&self) -> &str {
        &self.domain
    }

    fn is_live(&self) -> bool {
        self.handle.is_live()
    }

    fn redact(&self, node: NodeId, redaction: &Redaction) {
        let Some(mut nodes) = self.lock() else { return };
        let Some(entry) = nodes.get_mut(&node) else {
            debug!(%node, "Redaction for unknown node ignored");
            return;
        };
        match (&mut entry.view, redaction) {
            (NodeView::Text { text }, Redaction::Text { replacement }) => {
                text.clone_from(replacement);
            }
            (NodeView::Image { overlay, .. }, Redaction::Image(new_overlay)) => {
                *overlay = Some(*new_overlay);
            }
            _ => debug!(%node, "Redaction kind does not match node kind"),
        }
    }

    fn restore(&self, node: NodeId, original: &str) {
        let Some(mut nodes) = self.lock() else { return };
        let Some(entry) = nodes.get_mut(&node) else {
            debug!(%node, "Restore for unknown node ignored");
            return;
        };
        match &mut entry.view {
            NodeView::Text { text } => *text = original.to_string(),
            NodeView::Image { source, overlay } => {
                *source = original.to_string();
                *overlay = None;
            }
        }
    }

    fn reload(&self) {
        if let Some(mut nodes) = self.lock() {
            for entry in nodes.values_mut() {
                entry.view = Node::pristine(&entry.original);
            }
        }
        self.reloads.fetch_add(1, Ordering::SeqCst);
        debug!(domain = %self.domain, "Page reloaded");
    }
}
