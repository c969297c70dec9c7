//! Create-if-absent-else-update persistence of enriched records.
//!
//! The conditional create is the only concurrency guard: two writers
//! racing on the same id both end in the same stored state because the
//! loser falls through to an update of the enrichment fields alone.

use std::sync::Arc;

use comic_digest_core::store::{PutOutcome, Store};
use comic_digest_core::ComicRecord;

use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

pub struct UpsertWriter {
    store: Arc<dyn Store>,
    table: String,
}

impl UpsertWriter {
    pub fn new(store: Arc<dyn Store>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Persist `record`. `id` and `title` of an existing item are never
    /// touched.
    pub async fn upsert(&self, record: &ComicRecord) -> PipelineResult<UpsertOutcome> {
        let persist_err = |source| PipelineError::Persistence {
            id: record.id.clone(),
            source,
        };

        match self
            .store
            .put_if_absent(&self.table, &record.to_raw())
            .await
            .map_err(persist_err)?
        {
            PutOutcome::Created => {
                tracing::debug!(id = %record.id, title = %record.title, "record created");
                Ok(UpsertOutcome::Created)
            }
            PutOutcome::AlreadyExists => {
                self.store
                    .update_fields(&self.table, &record.id, &record.enrichment_fields())
                    .await
                    .map_err(persist_err)?;
                tracing::debug!(id = %record.id, title = %record.title, "record updated");
                Ok(UpsertOutcome::Updated)
            }
        }
    }
}
