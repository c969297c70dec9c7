//! Title substring search.

use anyhow::Result;
use comic_digest_core::store::Store;
use comic_digest_core::ComicRecord;

/// Records whose title contains `needle` (case-sensitive), in a stable
/// order, at most `limit` of them.
pub async fn search_titles(
    store: &dyn Store,
    table: &str,
    needle: &str,
    limit: Option<usize>,
) -> Result<Vec<ComicRecord>> {
    let mut hits = store
        .find_by_title(table, needle)
        .await?
        .iter()
        .map(ComicRecord::from_raw)
        .collect::<Result<Vec<_>, _>>()?;

    hits.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.id.cmp(&b.id)));
    if let Some(n) = limit {
        hits.truncate(n);
    }
    Ok(hits)
}

pub async fn run_search(
    store: &dyn Store,
    table: &str,
    needle: &str,
    limit: Option<usize>,
) -> Result<()> {
    let hits = search_titles(store, table, needle, limit).await?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, rec) in hits.iter().enumerate() {
        println!("{}. {}", i + 1, rec.title);
        if !rec.genre.is_empty() {
            println!("    genre: {}", rec.genre);
        }
        println!("    id: {}", rec.id);
        println!();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use comic_digest_core::store::memory::InMemoryStore;
    use comic_digest_core::Enrichment;

    #[tokio::test]
    async fn test_search_sorted_and_limited() {
        let store = InMemoryStore::new();
        for (id, title) in [("1", "Blue Period"), ("2", "Blue Lock"), ("3", "Kingdom")] {
            let rec = ComicRecord::new(id, title, Enrichment::default(), "");
            store.put_if_absent("t", &rec.to_raw()).await.unwrap();
        }

        let hits = search_titles(&store, "t", "Blue", None).await.unwrap();
        let titles: Vec<_> = hits.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Blue Lock", "Blue Period"]);

        let hits = search_titles(&store, "t", "Blue", Some(1)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(search_titles(&store, "t", "One Piece", None).await.unwrap().is_empty());
    }
}
