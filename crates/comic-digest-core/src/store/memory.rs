//! In-memory [`Store`] implementation for tests and dry runs.
//!
//! Each table is a `BTreeMap` keyed by `ID`, so scans walk keys in order
//! and the cursor is simply the last key returned.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{attr, record_key, AttributeValue, RawRecord};

use super::{PutOutcome, ScanCursor, ScanPage, Store};

type Table = BTreeMap<String, RawRecord>;

/// In-memory store backed by ordered maps behind a `RwLock`.
pub struct InMemoryStore {
    tables: RwLock<HashMap<String, Table>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Snapshot of a table in key order.
    pub fn items(&self, table: &str) -> Vec<RawRecord> {
        let tables = self.tables.read().unwrap();
        tables
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn get(&self, table: &str, id: &str) -> Result<Option<RawRecord>, StoreError> {
        let tables = self.tables.read().unwrap();
        Ok(tables.get(table).and_then(|t| t.get(id)).cloned())
    }

    async fn put_if_absent(&self, table: &str, item: &RawRecord) -> Result<PutOutcome, StoreError> {
        let key = record_key(item)?;
        let mut tables = self.tables.write().unwrap();
        let t = tables.entry(table.to_string()).or_default();
        if t.contains_key(&key) {
            return Ok(PutOutcome::AlreadyExists);
        }
        t.insert(key, item.clone());
        Ok(PutOutcome::Created)
    }

    async fn update_fields(
        &self,
        table: &str,
        id: &str,
        fields: &RawRecord,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().unwrap();
        let t = tables.entry(table.to_string()).or_default();
        let item = t.entry(id.to_string()).or_insert_with(|| {
            let mut fresh = RawRecord::new();
            fresh.insert(attr::ID.to_string(), AttributeValue::s(id));
            fresh
        });
        for (name, value) in fields {
            if name != attr::ID {
                item.insert(name.clone(), value.clone());
            }
        }
        Ok(())
    }

    async fn scan_page(
        &self,
        table: &str,
        limit: Option<usize>,
        cursor: Option<&ScanCursor>,
    ) -> Result<ScanPage, StoreError> {
        let tables = self.tables.read().unwrap();
        let Some(t) = tables.get(table) else {
            return Ok(ScanPage::default());
        };

        let lower = match cursor {
            Some(c) => Bound::Excluded(c.as_str().to_string()),
            None => Bound::Unbounded,
        };
        let mut remaining = t.range((lower, Bound::Unbounded));
        let limit = limit.unwrap_or(usize::MAX).max(1);

        let mut items = Vec::new();
        let mut last_key = None;
        for (key, item) in remaining.by_ref().take(limit) {
            items.push(item.clone());
            last_key = Some(key.clone());
        }

        let next = match (remaining.next(), last_key) {
            (Some(_), Some(key)) => Some(ScanCursor::new(key)),
            _ => None,
        };
        Ok(ScanPage { items, next })
    }

    async fn batch_put(&self, table: &str, items: &[RawRecord]) -> Result<(), StoreError> {
        let keyed = items
            .iter()
            .map(|item| record_key(item).map(|k| (k, item.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        let mut tables = self.tables.write().unwrap();
        tables.entry(table.to_string()).or_default().extend(keyed);
        Ok(())
    }

    async fn count(&self, table: &str) -> Result<u64, StoreError> {
        let tables = self.tables.read().unwrap();
        Ok(tables.get(table).map(|t| t.len() as u64).unwrap_or(0))
    }

    async fn find_by_title(&self, table: &str, needle: &str) -> Result<Vec<RawRecord>, StoreError> {
        let tables = self.tables.read().unwrap();
        Ok(tables
            .get(table)
            .map(|t| {
                t.values()
                    .filter(|item| {
                        item.get(attr::TITLE)
                            .map(|v| v.as_text().contains(needle))
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
