//! Scrape → enrich → upsert.
//!
//! For each listing page the runner scrapes N entries, then for every
//! entry runs the [`Summarizer`] and the image host side by side, builds
//! a [`ComicRecord`] and upserts it. Items within a page may be processed
//! up to `concurrency` at a time; pages run one after another.
//!
//! # Failure policy
//!
//! | Failure | Effect |
//! |---------|--------|
//! | summarization / decode | item skipped, run continues |
//! | image fetch or upload | per [`AssetFailurePolicy`] (skip by default) |
//! | listing fetch, too few items | run aborted |
//! | store write | run aborted |
//! | cancellation | run stopped, in-flight items abandoned |
//!
//! Summarization and image upload start together, so an item skipped for
//! a bad summary may still leave its uploaded image behind.

use async_trait::async_trait;
use comic_digest_core::models::record_id_for_title;
use comic_digest_core::{CatalogEntry, ComicRecord};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::assets::AssetMaterializer;
use crate::catalog::CatalogScraper;
use crate::config::AssetFailurePolicy;
use crate::error::{PipelineError, PipelineResult};
use crate::pacing::ensure_live;
use crate::summarize::Summarizer;
use crate::upsert::{UpsertOutcome, UpsertWriter};

/// Where catalog entries come from.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn entries(&self, page: u32, wanted: usize) -> PipelineResult<Vec<CatalogEntry>>;
}

#[async_trait]
impl CatalogSource for CatalogScraper {
    async fn entries(&self, page: u32, wanted: usize) -> PipelineResult<Vec<CatalogEntry>> {
        self.scrape(page, wanted).await
    }
}

/// Turns a thumbnail URL into a durable image location.
#[async_trait]
pub trait ImageHost: Send + Sync {
    async fn host(&self, url: &str) -> PipelineResult<String>;
}

#[async_trait]
impl ImageHost for AssetMaterializer {
    async fn host(&self, url: &str) -> PipelineResult<String> {
        self.materialize(url).await
    }
}

/// Leaves the thumbnail where it is. Used for dry runs.
pub struct KeepSourceUrl;

#[async_trait]
impl ImageHost for KeepSourceUrl {
    async fn host(&self, url: &str) -> PipelineResult<String> {
        Ok(url.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipStage {
    Summarization,
    Asset,
}

/// An item dropped without stopping the run.
#[derive(Debug, Clone)]
pub struct Skip {
    pub title: String,
    pub stage: SkipStage,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct IngestReport {
    pub pages: u32,
    /// Entries taken from listing pages.
    pub scraped: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: Vec<Skip>,
    /// Records built but not written (dry run).
    pub previews: Vec<ComicRecord>,
}

enum ItemOutcome {
    Stored(UpsertOutcome),
    Preview(ComicRecord),
    Skipped(Skip),
}

pub struct IngestPipeline {
    source: Box<dyn CatalogSource>,
    summarizer: Summarizer,
    images: Box<dyn ImageHost>,
    /// `None` for a dry run.
    writer: Option<UpsertWriter>,
    asset_failure: AssetFailurePolicy,
    concurrency: usize,
}

impl IngestPipeline {
    pub fn new(
        source: Box<dyn CatalogSource>,
        summarizer: Summarizer,
        images: Box<dyn ImageHost>,
        writer: Option<UpsertWriter>,
    ) -> Self {
        Self {
            source,
            summarizer,
            images,
            writer,
            asset_failure: AssetFailurePolicy::default(),
            concurrency: 1,
        }
    }

    pub fn asset_failure(mut self, policy: AssetFailurePolicy) -> Self {
        self.asset_failure = policy;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    /// Ingest pages `1..=pages`, `per_page` entries each.
    ///
    /// Progress accumulates in `report` so a caller still has the counts
    /// when a fatal error ends the run early.
    pub async fn run(
        &self,
        pages: u32,
        per_page: usize,
        cancel: &CancellationToken,
        report: &mut IngestReport,
    ) -> PipelineResult<()> {
        for page in 1..=pages {
            ensure_live(cancel)?;
            let entries = self.source.entries(page, per_page).await?;
            report.pages += 1;
            report.scraped += entries.len();

            let mut results = stream::iter(entries)
                .map(|entry| self.process(entry, cancel))
                .buffered(self.concurrency);

            while let Some(result) = results.next().await {
                match result? {
                    ItemOutcome::Stored(UpsertOutcome::Created) => report.created += 1,
                    ItemOutcome::Stored(UpsertOutcome::Updated) => report.updated += 1,
                    ItemOutcome::Preview(record) => report.previews.push(record),
                    ItemOutcome::Skipped(skip) => report.skipped.push(skip),
                }
            }

            tracing::info!(
                page,
                created = report.created,
                updated = report.updated,
                skipped = report.skipped.len(),
                "page ingested"
            );
        }
        Ok(())
    }

    async fn process(
        &self,
        entry: CatalogEntry,
        cancel: &CancellationToken,
    ) -> PipelineResult<ItemOutcome> {
        ensure_live(cancel)?;
        let title = entry.title;

        let (summary, image) = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            pair = async {
                tokio::join!(
                    self.summarizer.summarize(&title, cancel),
                    self.images.host(&entry.thumbnail_url)
                )
            } => pair,
        };

        let enrichment = match summary {
            Ok(e) => e,
            Err(e) if e.is_summarization() => {
                tracing::warn!(title = %title, error = %e, "summarization failed, skipping item");
                if let Ok(ref location) = image {
                    tracing::warn!(title = %title, location = %location, "image left without a record");
                }
                return Ok(ItemOutcome::Skipped(Skip {
                    title,
                    stage: SkipStage::Summarization,
                    reason: e.to_string(),
                }));
            }
            Err(e) => return Err(e),
        };

        let location = match image {
            Ok(location) => location,
            Err(e) if self.asset_failure == AssetFailurePolicy::Skip => {
                tracing::warn!(title = %title, error = %e, "image materialization failed, skipping item");
                return Ok(ItemOutcome::Skipped(Skip {
                    title,
                    stage: SkipStage::Asset,
                    reason: e.to_string(),
                }));
            }
            Err(e) => {
                tracing::error!(title = %title, error = %e, "image materialization failed, aborting");
                return Err(e);
            }
        };

        let record = ComicRecord::new(record_id_for_title(&title), title, enrichment, location);

        match self.writer {
            Some(ref writer) => {
                let outcome = writer.upsert(&record).await.inspect_err(|e| {
                    tracing::error!(id = %record.id, title = %record.title, error = %e, "upsert failed");
                })?;
                Ok(ItemOutcome::Stored(outcome))
            }
            None => Ok(ItemOutcome::Preview(record)),
        }
    }
}

/// Final operator-facing line for a finished or aborted run.
pub fn summary_line(report: &IngestReport, fatal: Option<&PipelineError>) -> String {
    match fatal {
        None => format!("completed with {} items skipped", report.skipped.len()),
        Some(e) => format!("aborted after fatal error: {}", e),
    }
}
