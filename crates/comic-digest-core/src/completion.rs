//! Turning a raw language-model completion into an [`Enrichment`].
//!
//! Two explicit steps:
//!
//! 1. [`sanitize_completion`] removes formatting artifacts. Some models
//!    wrap their JSON in code fences even when asked not to, so every
//!    backtick is dropped and any leading language tag or trailing prose
//!    outside the outermost `{ ... }` is cut away.
//! 2. [`decode_enrichment`] parses the result as a JSON object and reads
//!    the five target fields. Absent fields become empty strings; extra
//!    keys are ignored.

use serde_json::{Map, Value};

use crate::error::DecodeError;
use crate::models::Enrichment;

/// Accepted keys per target field, matched case-insensitively.
///
/// The plot-points slot has been emitted under several names over time.
const SYNOPSIS_KEYS: &[&str] = &["Synopsis"];
const ATTRACTION_KEYS: &[&str] = &["Attraction"];
const HIGHLIGHT_KEYS: &[&str] = &["Spoilers", "Conclusion", "NarrativeHighlights"];
const GENRE_KEYS: &[&str] = &["Genre"];
const CHARACTER_KEYS: &[&str] = &["Characters"];

/// Strip code-fence artifacts from a completion.
pub fn sanitize_completion(raw: &str) -> String {
    let stripped: String = raw.chars().filter(|c| *c != '`').collect();
    let trimmed = stripped.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => trimmed[start..=end].to_string(),
        _ => trimmed.to_string(),
    }
}

/// Sanitize, validate, and decode a completion into an [`Enrichment`].
pub fn decode_enrichment(raw: &str) -> Result<Enrichment, DecodeError> {
    let cleaned = sanitize_completion(raw);
    if cleaned.is_empty() {
        return Err(DecodeError::Empty);
    }

    let value: Value =
        serde_json::from_str(&cleaned).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
    let obj = value.as_object().ok_or(DecodeError::NotObject)?;

    Ok(Enrichment {
        synopsis: read_field(obj, SYNOPSIS_KEYS),
        attraction: read_field(obj, ATTRACTION_KEYS),
        narrative_highlights: read_field(obj, HIGHLIGHT_KEYS),
        genre: read_field(obj, GENRE_KEYS),
        characters: read_field(obj, CHARACTER_KEYS),
    })
}

fn read_field(obj: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|wanted| {
            obj.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(wanted))
                .map(|(_, v)| value_text(v))
        })
        .unwrap_or_default()
}

/// Models occasionally return a list where a string was requested
/// (typically `Characters`); lists are comma-joined.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        Value::Array(items) => items
            .iter()
            .map(value_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}
