use anyhow::Result;
use sqlx::SqlitePool;

/// Create the record schema. Safe to run repeatedly.
///
/// Every logical table shares one physical `records` table, keyed by
/// `(tbl, id)`. `title` duplicates the `Title` attribute so substring
/// search does not have to parse JSON.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            tbl TEXT NOT NULL,
            id TEXT NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            item_json TEXT NOT NULL,
            PRIMARY KEY (tbl, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_title ON records(tbl, title)")
        .execute(pool)
        .await?;

    Ok(())
}
