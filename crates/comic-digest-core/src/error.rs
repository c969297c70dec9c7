//! Error types shared by every store backend and the completion decoder.

use thiserror::Error;

/// Failure reported by a [`Store`](crate::store::Store) backend.
///
/// `Throttled` is the only variant callers are expected to retry; the
/// replication writer treats everything else as fatal.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend rejected the call because provisioned capacity or a
    /// request-rate limit was exceeded.
    #[error("capacity exceeded: {0}")]
    Throttled(String),

    /// A stored item could not be interpreted (missing key, bad cursor).
    #[error("malformed item: {0}")]
    Corrupt(String),

    /// Any other transport or backend failure.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_throttled(&self) -> bool {
        matches!(self, StoreError::Throttled(_))
    }
}

/// A completion could not be turned into an [`Enrichment`](crate::Enrichment).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("completion was empty after sanitizing")]
    Empty,

    #[error("completion is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("completion is JSON but not an object")]
    NotObject,
}
