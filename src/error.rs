//! Pipeline error taxonomy.
//!
//! Each variant names the stage that failed. The ingest runner decides
//! per variant whether an item is dropped or the run stops; the
//! replication runner treats every variant as fatal.

use comic_digest_core::{DecodeError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Transport failure or non-2xx status on an outbound HTTP call.
    #[error("fetch {url} failed: {reason}")]
    Fetch { url: String, reason: String },

    /// The listing page held fewer usable items than requested.
    #[error("listing {url} has {available} usable items, {requested} requested")]
    InsufficientData {
        url: String,
        requested: usize,
        available: usize,
    },

    /// The completion call failed or its body could not be decoded.
    #[error("summarizing '{title}' failed: {reason}")]
    Summarization { title: String, reason: String },

    /// The completion came back but was not a usable JSON object.
    #[error("summary for '{title}' is malformed: {source}")]
    Decode {
        title: String,
        #[source]
        source: DecodeError,
    },

    /// The cover image could not be downloaded or re-hosted.
    #[error("materializing image {url} failed: {reason}")]
    Asset { url: String, reason: String },

    /// A store write failed for a reason other than "already exists".
    #[error("persisting record {id} failed: {source}")]
    Persistence {
        id: String,
        #[source]
        source: StoreError,
    },

    /// Reading a page from the source store failed.
    #[error("scanning table {table} failed: {source}")]
    Scan {
        table: String,
        #[source]
        source: StoreError,
    },

    /// A batch could not be written. Everything before it is durable.
    #[error(
        "replication into {table} stopped at batch {batch} after {batches_written} batches \
         ({records_written} records) were written: {source}"
    )]
    Replication {
        table: String,
        batch: usize,
        batches_written: usize,
        records_written: usize,
        #[source]
        source: StoreError,
    },

    #[error("cancelled")]
    Cancelled,
}

impl PipelineError {
    /// True for failures the summarization stage reports.
    pub fn is_summarization(&self) -> bool {
        matches!(
            self,
            PipelineError::Summarization { .. } | PipelineError::Decode { .. }
        )
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
