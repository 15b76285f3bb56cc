//! State store error types

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("State store I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State store file {path:?} is corrupted: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    #[error("Value for key {key:?} cannot be encoded: {reason}")]
    Encoding { key: String, reason: String },

    #[error("State store task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
