//! Core error types

use pool_storage::{CodecError, StorageError};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("No value to persist for slot {0}")]
    MissingValue(String),

    #[error("Failed to encode value: {0}")]
    EncodeFailed(#[source] CodecError),

    #[error("Failed to decode value: {0}")]
    DecodeFailed(#[source] CodecError),

    #[error("IO error: {0}")]
    IoFailed(#[from] StorageError),

    #[error("Failed to enumerate {path:?}: {source}")]
    EnumerationFailed {
        path: PathBuf,
        #[source]
        source: StorageError,
    },

    #[error("Background task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl CacheError {
    /// Whether the error means the slot has never been persisted
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::IoFailed(e) if e.is_not_found())
    }
}
