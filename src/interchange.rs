//! CSV interchange format.
//!
//! One header row, `ID,Title,Synopsis,Attraction,Spoilers,Genre,Characters,ImagePath`,
//! then one row per record in that column order. Fields containing
//! commas, quotes or newlines are quoted per RFC 4180 by the `csv` crate.
//!
//! Identifiers are written and read back verbatim.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use comic_digest_core::store::Store;
use comic_digest_core::ComicRecord;
use tokio_util::sync::CancellationToken;

use crate::replicate::{BatchWriter, CursorScanner};

pub const HEADER: [&str; 8] = [
    "ID",
    "Title",
    "Synopsis",
    "Attraction",
    "Spoilers",
    "Genre",
    "Characters",
    "ImagePath",
];

/// Write `records` with the header row.
pub fn write_records<W: Write>(out: W, records: &[ComicRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    // An empty export still gets its header.
    if records.is_empty() {
        writer.write_record(HEADER)?;
    }
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read records, rejecting files whose header is not exactly [`HEADER`].
pub fn read_records<R: Read>(input: R) -> Result<Vec<ComicRecord>> {
    let mut reader = csv::Reader::from_reader(input);

    let header = reader.headers().context("Failed to read CSV header")?;
    let got: Vec<&str> = header.iter().map(|h| h.trim_start_matches('\u{feff}')).collect();
    if got != HEADER {
        bail!(
            "unexpected CSV header: {} (expected {})",
            got.join(","),
            HEADER.join(",")
        );
    }

    let mut records = Vec::new();
    for (i, row) in reader.deserialize::<ComicRecord>().enumerate() {
        // Data rows start on line 2.
        let line = i + 2;
        let record = row.with_context(|| format!("Invalid CSV row at line {}", line))?;
        if record.id.trim().is_empty() {
            bail!("CSV row at line {} has an empty ID", line);
        }
        if record.title.trim().is_empty() {
            bail!("CSV row at line {} has an empty Title", line);
        }
        records.push(record);
    }
    Ok(records)
}

/// Dump every record of `table` to a CSV file. Returns the row count.
pub async fn export_table(
    store: Arc<dyn Store>,
    table: &str,
    page_size: Option<usize>,
    path: &Path,
) -> Result<usize> {
    let mut scanner = CursorScanner::new(store, table, page_size);
    let mut records = Vec::new();
    while let Some(items) = scanner.next_page().await? {
        for item in &items {
            records.push(ComicRecord::from_raw(item)?);
        }
    }

    let file = File::create(path)
        .with_context(|| format!("Failed to create export file: {}", path.display()))?;
    write_records(file, &records)?;
    tracing::info!(table, rows = records.len(), path = %path.display(), "export written");
    Ok(records.len())
}

/// Load a CSV file and batch-write it through `writer`. Returns the row count.
pub async fn import_file(
    writer: &mut BatchWriter,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<usize> {
    let file =
        File::open(path).with_context(|| format!("Failed to open CSV file: {}", path.display()))?;
    let records = read_records(file)?;
    let raw: Vec<_> = records.iter().map(ComicRecord::to_raw).collect();
    writer.write_all(&raw, cancel).await?;
    tracing::info!(rows = raw.len(), path = %path.display(), "import written");
    Ok(raw.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use comic_digest_core::Enrichment;

    fn tricky() -> Vec<ComicRecord> {
        vec![
            ComicRecord::new(
                "a1",
                "Blue Lock",
                Enrichment {
                    synopsis: "Strikers, \"egoists\",\nand a prison-like academy.".into(),
                    attraction: "Tension".into(),
                    narrative_highlights: "Isagi's \"direct shot\"".into(),
                    genre: "Sports".into(),
                    characters: "Isagi, Bachira, Rin".into(),
                },
                "https://cdn.example/a1.jpg",
            ),
            ComicRecord::new("42", "キングダム", Enrichment::default(), ""),
        ]
    }

    #[test]
    fn test_roundtrip_preserves_fields_and_count() {
        let records = tricky();
        let mut buf = Vec::new();
        write_records(&mut buf, &records).unwrap();
        let back = read_records(buf.as_slice()).unwrap();
        assert_eq!(back, records);
    }

    #[test]
    fn test_header_row_is_fixed() {
        let mut buf = Vec::new();
        write_records(&mut buf, &tricky()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("ID,Title,Synopsis,Attraction,Spoilers,Genre,Characters,ImagePath\n"));
    }

    #[test]
    fn test_empty_export_has_header_only() {
        let mut buf = Vec::new();
        write_records(&mut buf, &[]).unwrap();
        assert_eq!(
            String::from_utf8(buf.clone()).unwrap(),
            "ID,Title,Synopsis,Attraction,Spoilers,Genre,Characters,ImagePath\n"
        );
        assert!(read_records(buf.as_slice()).unwrap().is_empty());
    }

    #[test]
    fn test_wrong_header_rejected() {
        let csv = "Id,Name\n1,x\n";
        let err = read_records(csv.as_bytes()).unwrap_err().to_string();
        assert!(err.contains("unexpected CSV header"), "{}", err);
    }

    #[test]
    fn test_empty_title_rejected() {
        let csv = "ID,Title,Synopsis,Attraction,Spoilers,Genre,Characters,ImagePath\n1,,s,a,p,g,c,i\n";
        let err = read_records(csv.as_bytes()).unwrap_err().to_string();
        assert!(err.contains("line 2"), "{}", err);
    }
}
