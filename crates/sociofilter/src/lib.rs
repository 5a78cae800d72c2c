//! `sociofilter` - A content-filtering pipeline for web pages
//!
//! This library decides which text and images on a page should be redacted,
//! applies the redactions through a presentation seam, and keeps a
//! per-domain ledger so every redaction can be undone later.
//!
//! The pieces, leaves first:
//!
//! - [`lexicon`]: whole-word denylist masking, the fast path
//! - [`classifier`]: the remote scoring service behind a trait
//! - [`pipeline`]: sequencing, fallback policy and redaction
//! - [`ledger`]: the recoverable audit trail
//! - [`storage`]: the key-value store everything persists through

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod classifier;
pub mod cli;
pub mod config;
pub mod content;
pub mod error;
pub mod ledger;
pub mod lexicon;
pub mod logging;
pub mod page;
pub mod pipeline;
pub mod settings;
pub mod stats;
pub mod storage;
pub mod verdict;

pub use classifier::{Classifier, RemoteClassifier};
pub use config::Config;
pub use content::{ContentType, ContentUnit, DiscoveredUnit, ImageUnit, NodeId};
pub use error::{Error, Result};
pub use ledger::{DomainHistory, Ledger, RedactionRecord};
pub use lexicon::Lexicon;
pub use logging::init_logging;
pub use page::{MemoryPage, PageHandle, Presenter, Redaction};
pub use pipeline::{Pipeline, Resolution, ScanReport, Stage};
pub use settings::{Settings, SettingsPatch};
pub use stats::Statistics;
pub use storage::{KeyValueStore, MemoryStore, SqliteStore};
pub use verdict::{DetectionMethod, FilterVerdict, Thresholds};
