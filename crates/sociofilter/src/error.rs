//! Error types for sociofilter.
//!
//! This module defines all error types used throughout the sociofilter crate.
//! Most of them never reach the page: the pipeline downgrades transport and
//! storage failures to "no filtering applied" and only logs them.

use std::path::PathBuf;
use thiserror::Error;

use crate::content::ContentType;

/// The main error type for sociofilter operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Classification Errors ===
    /// No classifier endpoint is configured; only local filtering is available.
    #[error("remote classifier is not configured")]
    ConfigurationMissing,

    /// The request to the classifier could not be completed.
    #[error("classifier transport failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The classifier answered with a non-success status.
    #[error("classifier returned {status}: {body}")]
    Service {
        /// HTTP status code.
        status: u16,
        /// Response body, as far as it could be read.
        body: String,
    },

    /// The payload exceeds the size accepted by the classifier.
    #[error("payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge {
        /// Size of the rejected payload.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Content was empty or otherwise unusable.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    /// The store's connection lock was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    StoreLock,

    // === Ledger Errors ===
    /// No ledger entry exists at the requested position.
    #[error("no {content_type} entry {index} recorded for {domain}")]
    EntryNotFound {
        /// Domain of the bucket.
        domain: String,
        /// Content type of the bucket.
        content_type: ContentType,
        /// Requested index.
        index: usize,
    },

    // === Lexicon Errors ===
    /// A denylist term could not be compiled.
    #[error("invalid denylist term '{term}': {message}")]
    InvalidTerm {
        /// The offending term.
        term: String,
        /// Why it was rejected.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for sociofilter operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a new malformed input error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInput(message.into())
    }

    /// Create a configuration validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Create an entry-not-found error for a ledger bucket.
    #[must_use]
    pub fn entry_not_found(domain: &str, content_type: ContentType, index: usize) -> Self {
        Self::EntryNotFound {
            domain: domain.to_string(),
            content_type,
            index,
        }
    }

    /// Check if this error came from talking to the classifier.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Service { .. } | Self::PayloadTooLarge { .. }
        )
    }

    /// Check if this error came from the persistence layer.
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::DatabaseOpen { .. }
                | Self::DatabaseQuery(_)
                | Self::DatabaseMigration { .. }
                | Self::StoreLock
        )
    }
}
