//! Typed errors for the session store
//!
//! Everything else in the crate reports through `anyhow`; storage errors are
//! typed so a corrupt record can be told apart from an unreadable directory.

use std::path::PathBuf;

use thiserror::Error;

/// Failure reading or writing persisted session state.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure
    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        /// What the store was doing
        operation: &'static str,
        /// File or directory involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A stored file is not valid JSON for its record type
    #[error("failed to parse JSON at {path}: {source}")]
    Json {
        /// The offending file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// A record could not be encoded
    #[error("failed to serialize {what}: {source}")]
    Serialize {
        /// Record type
        what: &'static str,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}
