//! SQLite-backed [`Store`] implementation.
//!
//! Items are stored as DynamoDB-shaped JSON in the `records` table (see
//! [`crate::migrate`]). Scans use keyset pagination on `id`; the cursor
//! is the last returned key, base64-encoded so callers cannot mistake it
//! for an identifier.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use comic_digest_core::models::{attr, record_key, AttributeValue};
use comic_digest_core::store::{PutOutcome, ScanCursor, ScanPage, Store};
use comic_digest_core::{RawRecord, StoreError};
use sqlx::{Row, SqlitePool};

use crate::{db, migrate};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `path` and apply the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn backend_err(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.into())
}

fn encode_item(item: &RawRecord) -> Result<String, StoreError> {
    serde_json::to_string(item).map_err(|e| StoreError::Backend(e.into()))
}

fn decode_item(json: &str) -> Result<RawRecord, StoreError> {
    serde_json::from_str(json).map_err(|e| StoreError::Corrupt(format!("stored item: {}", e)))
}

fn title_of(item: &RawRecord) -> String {
    item.get(attr::TITLE)
        .map(AttributeValue::as_text)
        .unwrap_or_default()
}

fn encode_cursor(last_id: &str) -> ScanCursor {
    ScanCursor::new(URL_SAFE_NO_PAD.encode(last_id.as_bytes()))
}

fn decode_cursor(cursor: &ScanCursor) -> Result<String, StoreError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor.as_str())
        .map_err(|e| StoreError::Corrupt(format!("scan cursor: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| StoreError::Corrupt(format!("scan cursor: {}", e)))
}

#[async_trait]
impl Store for SqliteStore {
    fn backend(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, table: &str, id: &str) -> Result<Option<RawRecord>, StoreError> {
        let row = sqlx::query("SELECT item_json FROM records WHERE tbl = ? AND id = ?")
            .bind(table)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;

        match row {
            Some(row) => {
                let json: String = row.get("item_json");
                Ok(Some(decode_item(&json)?))
            }
            None => Ok(None),
        }
    }

    async fn put_if_absent(&self, table: &str, item: &RawRecord) -> Result<PutOutcome, StoreError> {
        let id = record_key(item)?;
        let result = sqlx::query(
            r#"
            INSERT INTO records (tbl, id, title, item_json)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(tbl, id) DO NOTHING
            "#,
        )
        .bind(table)
        .bind(&id)
        .bind(title_of(item))
        .bind(encode_item(item)?)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        if result.rows_affected() == 1 {
            Ok(PutOutcome::Created)
        } else {
            Ok(PutOutcome::AlreadyExists)
        }
    }

    async fn update_fields(
        &self,
        table: &str,
        id: &str,
        fields: &RawRecord,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend_err)?;

        let existing: Option<String> =
            sqlx::query_scalar("SELECT item_json FROM records WHERE tbl = ? AND id = ?")
                .bind(table)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(backend_err)?;

        let mut item = match existing {
            Some(json) => decode_item(&json)?,
            None => {
                let mut fresh = RawRecord::new();
                fresh.insert(attr::ID.to_string(), AttributeValue::s(id));
                fresh
            }
        };
        for (name, value) in fields {
            if name != attr::ID {
                item.insert(name.clone(), value.clone());
            }
        }

        sqlx::query(
            r#"
            INSERT INTO records (tbl, id, title, item_json)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(tbl, id) DO UPDATE SET
                title = excluded.title,
                item_json = excluded.item_json
            "#,
        )
        .bind(table)
        .bind(id)
        .bind(title_of(&item))
        .bind(encode_item(&item)?)
        .execute(&mut *tx)
        .await
        .map_err(backend_err)?;

        tx.commit().await.map_err(backend_err)?;
        Ok(())
    }

    async fn scan_page(
        &self,
        table: &str,
        limit: Option<usize>,
        cursor: Option<&ScanCursor>,
    ) -> Result<ScanPage, StoreError> {
        let after = match cursor {
            Some(c) => Some(decode_cursor(c)?),
            None => None,
        };
        // Fetch one extra row to learn whether another page follows.
        let fetch = match limit {
            Some(n) => n.max(1) as i64 + 1,
            None => -1,
        };

        let rows = sqlx::query(
            r#"
            SELECT id, item_json FROM records
            WHERE tbl = ? AND (? IS NULL OR id > ?)
            ORDER BY id
            LIMIT ?
            "#,
        )
        .bind(table)
        .bind(&after)
        .bind(&after)
        .bind(fetch)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;

        let page_len = match limit {
            Some(n) => n.max(1),
            None => rows.len(),
        };
        let more = rows.len() > page_len;

        let mut items = Vec::with_capacity(page_len.min(rows.len()));
        let mut last_id = None;
        for row in rows.iter().take(page_len) {
            let json: String = row.get("item_json");
            items.push(decode_item(&json)?);
            last_id = Some(row.get::<String, _>("id"));
        }

        let next = match (more, last_id) {
            (true, Some(id)) => Some(encode_cursor(&id)),
            _ => None,
        };
        Ok(ScanPage { items, next })
    }

    async fn batch_put(&self, table: &str, items: &[RawRecord]) -> Result<(), StoreError> {
        let keyed = items
            .iter()
            .map(|item| record_key(item).map(|k| (k, item)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut tx = self.pool.begin().await.map_err(backend_err)?;
        for (id, item) in keyed {
            sqlx::query(
                r#"
                INSERT INTO records (tbl, id, title, item_json)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(tbl, id) DO UPDATE SET
                    title = excluded.title,
                    item_json = excluded.item_json
                "#,
            )
            .bind(table)
            .bind(&id)
            .bind(title_of(item))
            .bind(encode_item(item)?)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;
        }
        tx.commit().await.map_err(backend_err)?;
        Ok(())
    }

    async fn count(&self, table: &str) -> Result<u64, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE tbl = ?")
            .bind(table)
            .fetch_one(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(n as u64)
    }

    async fn find_by_title(&self, table: &str, needle: &str) -> Result<Vec<RawRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT item_json FROM records WHERE tbl = ? AND instr(title, ?) > 0 ORDER BY id",
        )
        .bind(table)
        .bind(needle)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;

        rows.iter()
            .map(|row| decode_item(&row.get::<String, _>("item_json")))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    const T: &str = "ComicSummaries";

    fn item(id: &str, title: &str) -> RawRecord {
        let mut r = RawRecord::new();
        r.insert(attr::ID.into(), AttributeValue::s(id));
        r.insert(attr::TITLE.into(), AttributeValue::s(title));
        r
    }

    async fn open_temp() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&tmp.path().join("data/comics.sqlite"))
            .await
            .unwrap();
        (tmp, store)
    }

    #[tokio::test]
    async fn test_conditional_create() {
        let (_tmp, store) = open_temp().await;
        assert_eq!(
            store.put_if_absent(T, &item("1", "A")).await.unwrap(),
            PutOutcome::Created
        );
        assert_eq!(
            store.put_if_absent(T, &item("1", "B")).await.unwrap(),
            PutOutcome::AlreadyExists
        );
        let got = store.get(T, "1").await.unwrap().unwrap();
        assert_eq!(got.get(attr::TITLE), Some(&AttributeValue::s("A")));
        assert!(store.get(T, "2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_fields_merges() {
        let (_tmp, store) = open_temp().await;
        store.put_if_absent(T, &item("1", "A")).await.unwrap();

        let mut fields = RawRecord::new();
        fields.insert(attr::SYNOPSIS.into(), AttributeValue::s("new"));
        fields.insert(attr::ID.into(), AttributeValue::s("hijack"));
        store.update_fields(T, "1", &fields).await.unwrap();

        let got = store.get(T, "1").await.unwrap().unwrap();
        assert_eq!(got.get(attr::SYNOPSIS), Some(&AttributeValue::s("new")));
        assert_eq!(got.get(attr::TITLE), Some(&AttributeValue::s("A")));
        assert_eq!(got.get(attr::ID), Some(&AttributeValue::s("1")));
    }

    #[tokio::test]
    async fn test_set_and_binary_attributes_are_stored_verbatim() {
        let (_tmp, store) = open_temp().await;
        let mut rich = item("1", "A");
        rich.insert("Tags".into(), AttributeValue::SS(vec!["a".into(), "b".into()]));
        rich.insert("Volumes".into(), AttributeValue::NS(vec!["3".into()]));
        rich.insert("Cover".into(), AttributeValue::B("iVBORw0K".into()));
        store.batch_put(T, &[rich.clone()]).await.unwrap();

        let got = store.get(T, "1").await.unwrap().unwrap();
        assert_eq!(got, rich);
    }

    #[tokio::test]
    async fn test_scan_visits_every_item_once() {
        let (_tmp, store) = open_temp().await;
        let all: Vec<_> = (0..37).map(|i| item(&format!("id-{:03}", i), "T")).collect();
        store.batch_put(T, &all).await.unwrap();
        store.batch_put("Other", &[item("x", "X")]).await.unwrap();

        for page_size in [1, 5, 37, 100] {
            let mut seen = HashSet::new();
            let mut cursor = None;
            let mut pages = 0;
            loop {
                let page = store
                    .scan_page(T, Some(page_size), cursor.as_ref())
                    .await
                    .unwrap();
                pages += 1;
                assert!(page.items.len() <= page_size);
                for it in &page.items {
                    assert!(seen.insert(record_key(it).unwrap()));
                }
                match page.next {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
                assert!(pages < 100);
            }
            assert_eq!(seen.len(), 37, "page_size={}", page_size);
        }

        let whole = store.scan_page(T, None, None).await.unwrap();
        assert_eq!(whole.items.len(), 37);
        assert!(whole.next.is_none());
    }

    #[tokio::test]
    async fn test_batch_put_overwrites_and_counts() {
        let (_tmp, store) = open_temp().await;
        store
            .batch_put(T, &[item("1", "A"), item("2", "B")])
            .await
            .unwrap();
        store.batch_put(T, &[item("2", "B2")]).await.unwrap();
        assert_eq!(store.count(T).await.unwrap(), 2);
        assert_eq!(store.count("Empty").await.unwrap(), 0);
        let got = store.get(T, "2").await.unwrap().unwrap();
        assert_eq!(got.get(attr::TITLE), Some(&AttributeValue::s("B2")));
    }

    #[tokio::test]
    async fn test_batch_put_rejects_keyless_item_atomically() {
        let (_tmp, store) = open_temp().await;
        let mut bad = RawRecord::new();
        bad.insert(attr::TITLE.into(), AttributeValue::s("no id"));
        let err = store.batch_put(T, &[item("1", "A"), bad]).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
        assert_eq!(store.count(T).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_find_by_title_substring() {
        let (_tmp, store) = open_temp().await;
        store
            .batch_put(
                T,
                &[item("1", "Blue Lock"), item("2", "Blue Period"), item("3", "Kingdom")],
            )
            .await
            .unwrap();
        let hits = store.find_by_title(T, "Blue").await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(store.find_by_title(T, "blue").await.unwrap().is_empty());
    }

    #[test]
    fn test_bad_cursor_is_corrupt() {
        assert!(matches!(
            decode_cursor(&ScanCursor::new("!!not base64!!")),
            Err(StoreError::Corrupt(_))
        ));
        assert_eq!(decode_cursor(&encode_cursor("id-7")).unwrap(), "id-7");
    }
}
