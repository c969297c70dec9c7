//! # Comic Digest
//!
//! Scrape a comic catalog, enrich every title with a model-written
//! summary and a re-hosted cover image, store the result in a key-value
//! table, and replicate that table to a second store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────┐   ┌──────────┐
//! │ Listing  │──▶│ Summarizer ∥ Assets  │──▶│  Upsert  │──▶ primary store
//! │ scraper  │   │  (per catalog item)  │   │  writer  │
//! └──────────┘   └──────────────────────┘   └──────────┘
//!
//! primary store ──▶ Cursor scanner ──▶ Batch writer ──▶ replica store
//!                                   ╲
//!                                    ──▶ CSV export / import
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cdg init                      # create schema / tables
//! cdg ingest --pages 3          # scrape, summarize, store
//! cdg replicate                 # copy primary → replica
//! cdg export comics.csv         # offline transfer
//! cdg search "Blue"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`catalog`] | Listing page scraper |
//! | [`summarize`] | Chat-completion summarizer |
//! | [`assets`] | Cover image download and re-hosting |
//! | [`upsert`] | Create-if-absent-else-update writer |
//! | [`ingest`] | Scrape → enrich → upsert runner |
//! | [`replicate`] | Cursor scanner and batched replication writer |
//! | [`interchange`] | CSV export and import |
//! | [`sqlite_store`] | SQLite store backend |
//! | [`dynamo_store`] | DynamoDB store backend |
//! | [`aws_sign`] | SigV4 request signing |
//! | [`pacing`] | Sleeps, backoff waits and cancellation |

pub mod assets;
pub mod aws_sign;
pub mod catalog;
pub mod config;
pub mod db;
pub mod dynamo_store;
pub mod error;
pub mod get;
pub mod ingest;
pub mod interchange;
pub mod logging;
pub mod migrate;
pub mod pacing;
pub mod replicate;
pub mod search;
pub mod sqlite_store;
pub mod stats;
pub mod stores;
pub mod summarize;
pub mod upsert;

#[cfg(test)]
pub(crate) mod testing;
