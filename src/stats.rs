//! Store statistics overview.
//!
//! A quick summary of what is stored: record counts for the primary and
//! replica tables and how many records are missing enrichment fields.
//! Used by `cdg stats` to confirm an ingest or replication landed.

use anyhow::Result;
use comic_digest_core::store::Store;
use comic_digest_core::ComicRecord;

use crate::replicate::CursorScanner;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct TableStats {
    pub total: u64,
    pub missing_synopsis: usize,
    pub missing_image: usize,
}

/// Count records and walk the table for incomplete ones.
pub async fn collect_stats(
    store: std::sync::Arc<dyn Store>,
    table: &str,
    page_size: Option<usize>,
) -> Result<TableStats> {
    let mut stats = TableStats {
        total: store.count(table).await?,
        ..TableStats::default()
    };

    let mut scanner = CursorScanner::new(store, table, page_size);
    while let Some(items) = scanner.next_page().await? {
        for item in &items {
            let rec = ComicRecord::from_raw(item)?;
            if rec.synopsis.is_empty() {
                stats.missing_synopsis += 1;
            }
            if rec.image_location.is_empty() {
                stats.missing_image += 1;
            }
        }
    }
    Ok(stats)
}

pub fn print_stats(label: &str, backend: &str, table: &str, stats: &TableStats) {
    println!("  {} ({} / {})", label, backend, table);
    println!("    Records:           {}", stats.total);
    println!("    Missing synopsis:  {}", stats.missing_synopsis);
    println!("    Missing image:     {}", stats.missing_image);
    println!();
}
