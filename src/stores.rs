//! Store construction from configuration.
//!
//! Every command builds its handles here, once, and passes them down.

use std::sync::Arc;

use anyhow::{Context, Result};
use comic_digest_core::store::Store;

use crate::config::{StoreBackend, StoreConfig};
use crate::dynamo_store::DynamoStore;
use crate::sqlite_store::SqliteStore;

/// Open the store described by `config`.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn Store>> {
    match config.backend {
        StoreBackend::Sqlite => {
            let path = config
                .path
                .as_ref()
                .context("path is required for the sqlite backend")?;
            Ok(Arc::new(SqliteStore::open(path).await?))
        }
        StoreBackend::Dynamodb => Ok(Arc::new(DynamoStore::new(config)?)),
    }
}

/// Prepare the backing storage: schema for SQLite, table for DynamoDB.
pub async fn init_store(config: &StoreConfig) -> Result<String> {
    match config.backend {
        StoreBackend::Sqlite => {
            let path = config
                .path
                .as_ref()
                .context("path is required for the sqlite backend")?;
            let store = SqliteStore::open(path).await?;
            store.close().await;
            Ok(format!("sqlite database ready at {}", path.display()))
        }
        StoreBackend::Dynamodb => {
            let store = DynamoStore::new(config)?;
            let created = store.ensure_table(&config.table).await?;
            Ok(if created {
                format!("dynamodb table {} created", config.table)
            } else {
                format!("dynamodb table {} already exists", config.table)
            })
        }
    }
}
