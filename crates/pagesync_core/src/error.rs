//! Error types for page saves.

use std::path::PathBuf;

use thiserror::Error;

use crate::validate::ValidationErrors;

/// Reasons a page add or edit is refused before its records are committed.
#[derive(Debug, Error)]
pub enum SaveError {
    /// The parent chain does not reach the tree root.
    #[error("cannot resolve a template path under content {parent_id}")]
    Unresolvable { parent_id: i64 },

    /// The pre-flight probe could not open the target file.
    #[error("template file {path} is not writable: {source}")]
    NotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// One or more fields failed validation.
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("page {id} not found")]
    NotFound { id: i64 },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub(crate) fn not_writable(path: impl Into<PathBuf>, source: std::io::Error) -> SaveError {
    SaveError::NotWritable {
        path: path.into(),
        source,
    }
}
