//! Storage abstraction for Comic Digest.
//!
//! The [`Store`] trait is the key-value surface every component is built
//! on: conditional create, partial update, cursor pagination and bounded
//! batch writes. Implementations are passed explicitly as
//! `Arc<dyn Store>` handles; nothing reaches for a global client.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::RawRecord;

/// Opaque continuation token returned by [`Store::scan_page`].
///
/// The encoding is backend-specific; callers only hand it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCursor(String);

impl ScanCursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page of a table scan.
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub items: Vec<RawRecord>,
    /// `Some` when more items may follow; `None` at end of table.
    pub next: Option<ScanCursor>,
}

/// Result of a conditional create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    AlreadyExists,
}

/// Abstract key-value backend.
///
/// Items are keyed by their `ID` attribute. Every method names the table
/// it operates on so one handle can serve several tables.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get`](Store::get) | Fetch one item by key |
/// | [`put_if_absent`](Store::put_if_absent) | Create only if the key is unused |
/// | [`update_fields`](Store::update_fields) | Overwrite the given attributes of one item |
/// | [`scan_page`](Store::scan_page) | Read one page of the whole table |
/// | [`batch_put`](Store::batch_put) | Unconditionally write a bounded group |
/// | [`count`](Store::count) | Number of items in the table |
/// | [`find_by_title`](Store::find_by_title) | Items whose title contains a substring |
#[async_trait]
pub trait Store: Send + Sync {
    /// Short backend label used in logs (`"memory"`, `"sqlite"`, `"dynamodb"`).
    fn backend(&self) -> &str;

    async fn get(&self, table: &str, id: &str) -> Result<Option<RawRecord>, StoreError>;

    /// Write `item` only if no item with the same key exists.
    async fn put_if_absent(&self, table: &str, item: &RawRecord) -> Result<PutOutcome, StoreError>;

    /// Set each attribute in `fields` on the item keyed `id`, leaving
    /// other attributes untouched.
    async fn update_fields(
        &self,
        table: &str,
        id: &str,
        fields: &RawRecord,
    ) -> Result<(), StoreError>;

    /// Read up to `limit` items after `cursor` (`None` = start of table).
    async fn scan_page(
        &self,
        table: &str,
        limit: Option<usize>,
        cursor: Option<&ScanCursor>,
    ) -> Result<ScanPage, StoreError>;

    /// Write all `items`, replacing existing keys. Backends may reject
    /// oversize groups; a capacity rejection is reported as
    /// [`StoreError::Throttled`].
    async fn batch_put(&self, table: &str, items: &[RawRecord]) -> Result<(), StoreError>;

    async fn count(&self, table: &str) -> Result<u64, StoreError>;

    async fn find_by_title(&self, table: &str, needle: &str) -> Result<Vec<RawRecord>, StoreError>;
}
