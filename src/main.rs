//! # Comic Digest CLI (`cdg`)
//!
//! ## Usage
//!
//! ```bash
//! cdg --config ./config/cdg.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cdg init` | Create the SQLite schema or the DynamoDB table(s) |
//! | `cdg ingest` | Scrape listing pages, summarize, re-host images, upsert |
//! | `cdg replicate` | Copy every record from `[store]` to `[replica]` |
//! | `cdg export <file>` | Write the primary table to CSV |
//! | `cdg import <file>` | Batch-write a CSV file into the primary table |
//! | `cdg get <id>` | Print one record |
//! | `cdg search <title>` | Records whose title contains a substring |
//! | `cdg stats` | Record counts and missing-field overview |
//!
//! Long-running commands stop cleanly on Ctrl-C. A run that hits a fatal
//! error exits non-zero after printing `aborted after fatal error: ...`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use comic_digest::assets::{self, AssetMaterializer};
use comic_digest::catalog::CatalogScraper;
use comic_digest::config::{self, Config};
use comic_digest::ingest::{self, ImageHost, IngestPipeline, IngestReport, KeepSourceUrl};
use comic_digest::logging::{self, LogFormat};
use comic_digest::pacing::TokioPacer;
use comic_digest::replicate::{run_replication, BatchWriter, CursorScanner};
use comic_digest::summarize::Summarizer;
use comic_digest::upsert::UpsertWriter;
use comic_digest::{get, interchange, search, stats, stores};

/// Comic Digest: catalog ingestion, enrichment and replication.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/cdg.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "cdg",
    about = "Comic Digest: scrape a comic catalog, summarize it with an LLM, and replicate it between stores",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cdg.toml")]
    config: PathBuf,

    /// Log output format (logs go to stderr).
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prepare the primary store (and replica, if configured).
    ///
    /// Idempotent: running it again is safe.
    Init,

    /// Scrape, summarize and store catalog items.
    Ingest {
        /// Number of listing pages to walk (overrides `catalog.pages`).
        #[arg(long)]
        pages: Option<u32>,

        /// Items to take per page (overrides `catalog.items_per_page`).
        #[arg(long)]
        limit: Option<usize>,

        /// Summarize but do not upload images or write records.
        #[arg(long)]
        dry_run: bool,
    },

    /// Copy every record from the primary store to the replica.
    Replicate,

    /// Export the primary table to a CSV file.
    Export {
        /// Destination file.
        file: PathBuf,
    },

    /// Import a CSV file into the primary table.
    Import {
        /// Source file with the standard header row.
        file: PathBuf,
    },

    /// Print one record by ID.
    Get {
        id: String,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Find records whose title contains a substring.
    Search {
        title: String,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show record counts for the configured stores.
    Stats,
}

#[tokio::main]
async fn main() {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    logging::init(cli.log_format);

    let cfg = match config::load_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => fatal(e),
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current step");
            on_signal.cancel();
        }
    });

    if let Err(e) = run(cli.command, &cfg, &cancel).await {
        fatal(e);
    }
}

/// Log the error, print the final line on stdout and exit non-zero.
fn fatal(e: anyhow::Error) -> ! {
    tracing::error!(error = %format!("{:#}", e), "command failed");
    println!("aborted after fatal error: {:#}", e);
    std::process::exit(1);
}

async fn run(command: Commands, cfg: &Config, cancel: &CancellationToken) -> Result<()> {
    match command {
        Commands::Init => {
            println!("{}", stores::init_store(&cfg.store).await?);
            if let Some(ref replica) = cfg.replica {
                println!("{}", stores::init_store(replica).await?);
            }
        }
        Commands::Ingest {
            pages,
            limit,
            dry_run,
        } => run_ingest(cfg, pages, limit, dry_run, cancel).await?,
        Commands::Replicate => run_replicate(cfg, cancel).await?,
        Commands::Export { file } => {
            let store = stores::open_store(&cfg.store).await?;
            let rows = interchange::export_table(
                store,
                &cfg.store.table,
                cfg.replication.scan_page_size,
                &file,
            )
            .await?;
            println!("exported {} records to {}", rows, file.display());
        }
        Commands::Import { file } => {
            let store = stores::open_store(&cfg.store).await?;
            let mut writer = BatchWriter::new(
                store,
                cfg.store.table.clone(),
                &cfg.replication,
                Arc::new(TokioPacer),
            );
            let rows = interchange::import_file(&mut writer, &file, cancel).await?;
            println!(
                "imported {} records in {} batches",
                rows,
                writer.batches_written()
            );
        }
        Commands::Get { id, json } => {
            let store = stores::open_store(&cfg.store).await?;
            get::run_get(store.as_ref(), &cfg.store.table, &id, json).await?;
        }
        Commands::Search { title, limit } => {
            let store = stores::open_store(&cfg.store).await?;
            search::run_search(store.as_ref(), &cfg.store.table, &title, limit).await?;
        }
        Commands::Stats => {
            println!("Comic Digest: Store Stats");
            println!("=========================");
            println!();
            let mut targets = vec![("primary", &cfg.store)];
            if let Some(ref replica) = cfg.replica {
                targets.push(("replica", replica));
            }
            for (label, store_cfg) in targets {
                let store = stores::open_store(store_cfg).await?;
                let s = stats::collect_stats(
                    store.clone(),
                    &store_cfg.table,
                    cfg.replication.scan_page_size,
                )
                .await?;
                stats::print_stats(label, store.backend(), &store_cfg.table, &s);
            }
        }
    }
    Ok(())
}

async fn run_ingest(
    cfg: &Config,
    pages: Option<u32>,
    limit: Option<usize>,
    dry_run: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let catalog = cfg
        .catalog
        .as_ref()
        .context("[catalog] section is required for ingest")?;
    let pages = pages.unwrap_or(catalog.pages);
    let per_page = limit.unwrap_or(catalog.items_per_page);

    let scraper = CatalogScraper::new(catalog)?;
    let summarizer = Summarizer::from_config(&cfg.summarizer)?;

    let (images, writer): (Box<dyn ImageHost>, Option<UpsertWriter>) = if dry_run {
        (Box::new(KeepSourceUrl), None)
    } else {
        let sink = assets::sink_from_config(&cfg.assets)?;
        let materializer =
            AssetMaterializer::new(sink, Duration::from_secs(cfg.assets.timeout_secs))?;
        let store = stores::open_store(&cfg.store).await?;
        (
            Box::new(materializer),
            Some(UpsertWriter::new(store, cfg.store.table.clone())),
        )
    };

    let pipeline = IngestPipeline::new(Box::new(scraper), summarizer, images, writer)
        .asset_failure(cfg.ingest.asset_failure)
        .concurrency(cfg.ingest.concurrency);

    tracing::info!(pages, per_page, dry_run, "ingest starting");
    let mut report = IngestReport::default();
    let result = pipeline.run(pages, per_page, cancel, &mut report).await;

    for record in &report.previews {
        println!("{}", serde_json::to_string(record)?);
    }
    for skip in &report.skipped {
        println!("skipped [{:?}] {}: {}", skip.stage, skip.title, skip.reason);
    }
    println!(
        "pages: {}  scraped: {}  created: {}  updated: {}  skipped: {}",
        report.pages,
        report.scraped,
        report.created,
        report.updated,
        report.skipped.len()
    );

    match result {
        Ok(()) => {
            println!("{}", ingest::summary_line(&report, None));
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn run_replicate(cfg: &Config, cancel: &CancellationToken) -> Result<()> {
    let replica = cfg
        .replica
        .as_ref()
        .context("[replica] section is required for replicate")?;

    let source = stores::open_store(&cfg.store).await?;
    let dest = stores::open_store(replica).await?;
    tracing::info!(
        from = %format!("{}:{}", source.backend(), cfg.store.table),
        to = %format!("{}:{}", dest.backend(), replica.table),
        "replication starting"
    );

    let mut scanner = CursorScanner::new(
        source,
        cfg.store.table.clone(),
        cfg.replication.scan_page_size,
    );
    let mut writer = BatchWriter::new(
        dest,
        replica.table.clone(),
        &cfg.replication,
        Arc::new(TokioPacer),
    );

    let report = run_replication(&mut scanner, &mut writer, cancel).await?;
    println!(
        "replicated {} of {} records in {} batches",
        report.written, report.scanned, report.batches
    );
    println!("completed with 0 items skipped");
    Ok(())
}
