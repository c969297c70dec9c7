//! # Comic Digest Core
//!
//! Shared, runtime-free logic for Comic Digest: the record model, the
//! key-value [`store::Store`] abstraction with an in-memory backend, the
//! retry [`backoff`] schedule, and decoding of language-model completions.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. Every
//! networked concern lives in the `comic-digest` crate.

pub mod backoff;
pub mod completion;
pub mod error;
pub mod models;
pub mod store;

pub use error::{DecodeError, StoreError};
pub use models::{AttributeValue, CatalogEntry, ComicRecord, Enrichment, RawRecord};
