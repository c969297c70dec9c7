//! Store-to-store replication.
//!
//! A [`CursorScanner`] walks the source table page by page; pages are
//! regrouped into batches of exactly `batch_size` (the last one may be
//! shorter) and handed to a [`BatchWriter`], which retries capacity
//! rejections on a [`BackoffPolicy`] schedule and spaces successful
//! batches by a fixed delay.
//!
//! Batches are not transactional as a group. When a batch fails for good,
//! every earlier batch is already durable and the error carries how many
//! batches and records made it, so an operator can resume from there.

use std::sync::Arc;
use std::time::Duration;

use comic_digest_core::backoff::BackoffPolicy;
use comic_digest_core::store::{ScanCursor, Store};
use comic_digest_core::{RawRecord, StoreError};
use tokio_util::sync::CancellationToken;

use crate::config::ReplicationConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::pacing::{ensure_live, pause, Pacer};

/// Pages through one table, threading the backend's cursor.
pub struct CursorScanner {
    store: Arc<dyn Store>,
    table: String,
    page_size: Option<usize>,
    cursor: Option<ScanCursor>,
    done: bool,
}

impl CursorScanner {
    pub fn new(store: Arc<dyn Store>, table: impl Into<String>, page_size: Option<usize>) -> Self {
        Self {
            store,
            table: table.into(),
            page_size,
            cursor: None,
            done: false,
        }
    }

    /// Continue a scan from a previously returned cursor.
    pub fn resume_from(mut self, cursor: ScanCursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    /// Cursor the next call will send, if any.
    pub fn cursor(&self) -> Option<&ScanCursor> {
        self.cursor.as_ref()
    }

    /// Fetch the next page. `Ok(None)` once the table is exhausted.
    ///
    /// A backend that hands back the cursor it was given is reported as a
    /// scan error instead of being followed forever.
    pub async fn next_page(&mut self) -> PipelineResult<Option<Vec<RawRecord>>> {
        if self.done {
            return Ok(None);
        }

        let page = self
            .store
            .scan_page(&self.table, self.page_size, self.cursor.as_ref())
            .await
            .map_err(|source| PipelineError::Scan {
                table: self.table.clone(),
                source,
            })?;

        match page.next {
            Some(next) if Some(&next) == self.cursor.as_ref() => {
                return Err(PipelineError::Scan {
                    table: self.table.clone(),
                    source: StoreError::Corrupt(format!(
                        "scan cursor did not advance past {}",
                        next.as_str()
                    )),
                });
            }
            Some(next) => self.cursor = Some(next),
            None => {
                self.cursor = None;
                self.done = true;
            }
        }

        tracing::debug!(
            table = %self.table,
            items = page.items.len(),
            more = !self.done,
            "scanned page"
        );
        Ok(Some(page.items))
    }
}

/// Writes bounded batches with retry and inter-batch spacing.
pub struct BatchWriter {
    store: Arc<dyn Store>,
    table: String,
    batch_size: usize,
    max_attempts: u32,
    backoff: BackoffPolicy,
    inter_batch_delay: Duration,
    pacer: Arc<dyn Pacer>,
    batches_written: usize,
    records_written: usize,
}

impl BatchWriter {
    pub fn new(
        store: Arc<dyn Store>,
        table: impl Into<String>,
        config: &ReplicationConfig,
        pacer: Arc<dyn Pacer>,
    ) -> Self {
        Self {
            store,
            table: table.into(),
            batch_size: config.batch_size.max(1),
            max_attempts: config.max_attempts.max(1),
            backoff: config.backoff_policy(),
            inter_batch_delay: config.inter_batch_delay(),
            pacer,
            batches_written: 0,
            records_written: 0,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn batches_written(&self) -> usize {
        self.batches_written
    }

    pub fn records_written(&self) -> usize {
        self.records_written
    }

    /// Write `records` as consecutive batches of at most `batch_size`.
    pub async fn write_all(
        &mut self,
        records: &[RawRecord],
        cancel: &CancellationToken,
    ) -> PipelineResult<()> {
        for group in records.chunks(self.batch_size) {
            self.write_batch(group, cancel).await?;
        }
        Ok(())
    }

    /// Write one batch of at most `batch_size` records.
    ///
    /// Capacity rejections are retried until `max_attempts` calls have
    /// been made in total. Any other error stops immediately.
    pub async fn write_batch(
        &mut self,
        batch: &[RawRecord],
        cancel: &CancellationToken,
    ) -> PipelineResult<()> {
        debug_assert!(batch.len() <= self.batch_size);
        if batch.is_empty() {
            return Ok(());
        }
        if self.batches_written > 0 {
            pause(self.pacer.as_ref(), self.inter_batch_delay, cancel).await?;
        }
        let batch_no = self.batches_written + 1;

        let mut attempt = 1;
        loop {
            ensure_live(cancel)?;
            match self.store.batch_put(&self.table, batch).await {
                Ok(()) => break,
                Err(err) if err.is_throttled() && attempt < self.max_attempts => {
                    let delay = self.backoff.delay_for(attempt);
                    tracing::warn!(
                        table = %self.table,
                        batch = batch_no,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "batch throttled, backing off"
                    );
                    pause(self.pacer.as_ref(), delay, cancel).await?;
                    attempt += 1;
                }
                Err(source) => {
                    tracing::error!(
                        table = %self.table,
                        batch = batch_no,
                        attempt,
                        error = %source,
                        "batch write failed"
                    );
                    return Err(PipelineError::Replication {
                        table: self.table.clone(),
                        batch: batch_no,
                        batches_written: self.batches_written,
                        records_written: self.records_written,
                        source,
                    });
                }
            }
        }

        self.batches_written += 1;
        self.records_written += batch.len();
        tracing::info!(
            table = %self.table,
            batch = batch_no,
            items = batch.len(),
            total = self.records_written,
            "batch written"
        );
        Ok(())
    }
}

/// Totals for a finished replication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationReport {
    pub scanned: usize,
    pub batches: usize,
    pub written: usize,
}

/// Drain the scanner into the writer.
pub async fn run_replication(
    scanner: &mut CursorScanner,
    writer: &mut BatchWriter,
    cancel: &CancellationToken,
) -> PipelineResult<ReplicationReport> {
    let batch_size = writer.batch_size();
    let mut pending: Vec<RawRecord> = Vec::with_capacity(batch_size * 2);
    let mut scanned = 0;

    while let Some(items) = scanner.next_page().await? {
        ensure_live(cancel)?;
        scanned += items.len();
        pending.extend(items);

        while pending.len() >= batch_size {
            let rest = pending.split_off(batch_size);
            writer.write_batch(&pending, cancel).await?;
            pending = rest;
        }
    }
    writer.write_batch(&pending, cancel).await?;

    Ok(ReplicationReport {
        scanned,
        batches: writer.batches_written(),
        written: writer.records_written(),
    })
}
