//! Error kinds surfaced by store operations.

use std::io;

use thiserror::Error;

use crate::hash::{HandleError, UnknownAlgorithm};

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Everything a store operation can fail with.
///
/// Every failing operation rolls back its partial state before returning,
/// so a caller never has to clean up after an error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No stored object exists for the identification.
    #[error("no stored object for {0}")]
    NotFound(String),

    /// The byte source failed while being consumed.
    #[error("failed to read source: {0}")]
    Read(#[source] io::Error),

    /// Writing to the store root failed, or the object could not be published.
    #[error("storage failure: {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Unknown hash algorithm, unusable root, or a refused flush.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The caller interrupted the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The store has been closed.
    #[error("store is closed")]
    Closed,
}

impl StoreError {
    pub(crate) fn storage(context: impl Into<String>, source: io::Error) -> Self {
        Self::Storage {
            context: context.into(),
            source,
        }
    }

    /// Whether this is a [`StoreError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<HandleError> for StoreError {
    fn from(err: HandleError) -> Self {
        Self::NotFound(err.to_string())
    }
}

impl From<UnknownAlgorithm> for StoreError {
    fn from(err: UnknownAlgorithm) -> Self {
        Self::Configuration(err.to_string())
    }
}
