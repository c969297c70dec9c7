//! Record retrieval by ID.

use anyhow::{bail, Result};
use comic_digest_core::store::Store;
use comic_digest_core::ComicRecord;

pub async fn get_record(store: &dyn Store, table: &str, id: &str) -> Result<ComicRecord> {
    match store.get(table, id).await? {
        Some(item) => Ok(ComicRecord::from_raw(&item)?),
        None => bail!("record not found: {}", id),
    }
}

/// CLI entry point: print one record.
pub async fn run_get(store: &dyn Store, table: &str, id: &str, json: bool) -> Result<()> {
    let rec = get_record(store, table, id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rec)?);
        return Ok(());
    }

    println!("--- Record ---");
    println!("id:          {}", rec.id);
    println!("title:       {}", rec.title);
    println!("genre:       {}", rec.genre);
    println!("characters:  {}", rec.characters);
    println!("image:       {}", rec.image_location);
    println!();
    println!("--- Synopsis ---");
    println!("{}", rec.synopsis);
    println!();
    println!("--- Attraction ---");
    println!("{}", rec.attraction);
    println!();
    println!("--- Spoilers ---");
    println!("{}", rec.narrative_highlights);

    Ok(())
}
