//! Errors raised while loading or compiling probe tables.
//!
//! Extraction itself never fails: a field nothing resolves to reads as 0 or "".

use std::path::PathBuf;

use thiserror::Error;

use crate::domain::SnapshotKind;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Failed to read selector file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid selector file {path:?}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid probe '{probe}' for field '{field}': {reason}")]
    InvalidProbe { field: String, probe: String, reason: String },

    #[error("Field '{field}' on page '{kind}' has no usable probe")]
    NoUsableProbe { kind: SnapshotKind, field: String },

    #[error("No page spec for '{0}'")]
    UnknownPage(SnapshotKind),
}
