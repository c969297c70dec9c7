//! Core data models used throughout Comic Digest.
//!
//! A [`CatalogEntry`] is what the scraper sees on a listing page. After
//! enrichment it becomes a [`ComicRecord`], which is persisted as a
//! [`RawRecord`]: a flat attribute map in DynamoDB's typed-value shape,
//! so every backend (and the replication path) moves the same bytes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StoreError;

/// Attribute names used for persisted records.
///
/// The noteworthy-plot-points slot is stored under `Spoilers`, the name
/// existing tables and CSV exports already use.
pub mod attr {
    pub const ID: &str = "ID";
    pub const TITLE: &str = "Title";
    pub const SYNOPSIS: &str = "Synopsis";
    pub const ATTRACTION: &str = "Attraction";
    pub const SPOILERS: &str = "Spoilers";
    pub const GENRE: &str = "Genre";
    pub const CHARACTERS: &str = "Characters";
    pub const IMAGE_PATH: &str = "ImagePath";
}

/// A scraped (title, thumbnail URL) pair. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub title: String,
    pub thumbnail_url: String,
}

/// The model-generated part of a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enrichment {
    pub synopsis: String,
    pub attraction: String,
    pub narrative_highlights: String,
    pub genre: String,
    /// Comma-joined proper names.
    pub characters: String,
}

/// The persisted entity.
///
/// Serde field names match the CSV interchange header
/// (`ID,Title,Synopsis,Attraction,Spoilers,Genre,Characters,ImagePath`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComicRecord {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Synopsis")]
    pub synopsis: String,
    #[serde(rename = "Attraction")]
    pub attraction: String,
    #[serde(rename = "Spoilers")]
    pub narrative_highlights: String,
    #[serde(rename = "Genre")]
    pub genre: String,
    #[serde(rename = "Characters")]
    pub characters: String,
    #[serde(rename = "ImagePath")]
    pub image_location: String,
}

/// A single typed attribute, serialized exactly like DynamoDB's JSON
/// wire format (`{"S": "..."}`, `{"N": "1"}`, ...).
///
/// Binary values stay in their base64 text form; numbers stay decimal
/// strings. Neither is decoded, so replication copies them byte for byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    S(String),
    N(String),
    B(String),
    SS(Vec<String>),
    NS(Vec<String>),
    BS(Vec<String>),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null(bool),
    L(Vec<AttributeValue>),
    M(BTreeMap<String, AttributeValue>),
}

impl AttributeValue {
    pub fn s(value: impl Into<String>) -> Self {
        AttributeValue::S(value.into())
    }

    /// Render the attribute as plain text. Scalars print their value,
    /// string and number sets are comma-joined, anything else prints its
    /// JSON form.
    pub fn as_text(&self) -> String {
        match self {
            AttributeValue::S(s) | AttributeValue::N(s) | AttributeValue::B(s) => s.clone(),
            AttributeValue::SS(v) | AttributeValue::NS(v) => v.join(", "),
            AttributeValue::Bool(b) => b.to_string(),
            AttributeValue::Null(_) => String::new(),
            other => serde_json::to_string(other).unwrap_or_default(),
        }
    }
}

/// One item as stored: attribute name → typed value.
pub type RawRecord = BTreeMap<String, AttributeValue>;

/// Extract the primary key of a raw item.
///
/// The key may be stored as a string or (in older tables) a number; both
/// are returned as their textual form.
pub fn record_key(item: &RawRecord) -> Result<String, StoreError> {
    match item.get(attr::ID) {
        Some(AttributeValue::S(s)) | Some(AttributeValue::N(s)) if !s.is_empty() => Ok(s.clone()),
        Some(_) => Err(StoreError::Corrupt("ID attribute is empty or not scalar".into())),
        None => Err(StoreError::Corrupt("item has no ID attribute".into())),
    }
}

/// Derive the stable record identifier for a catalog title.
///
/// The first 16 hex characters of SHA-256 over the trimmed title, so the
/// same title maps to the same record on every page and every run.
pub fn record_id_for_title(title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.trim().as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

impl ComicRecord {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        enrichment: Enrichment,
        image_location: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            synopsis: enrichment.synopsis,
            attraction: enrichment.attraction,
            narrative_highlights: enrichment.narrative_highlights,
            genre: enrichment.genre,
            characters: enrichment.characters,
            image_location: image_location.into(),
        }
    }

    /// The full attribute map for a create.
    pub fn to_raw(&self) -> RawRecord {
        let mut item = self.enrichment_fields();
        item.insert(attr::ID.to_string(), AttributeValue::s(&self.id));
        item.insert(attr::TITLE.to_string(), AttributeValue::s(&self.title));
        item
    }

    /// Only the attributes a later ingestion run may overwrite.
    /// `ID` and `Title` are deliberately absent.
    pub fn enrichment_fields(&self) -> RawRecord {
        let mut item = RawRecord::new();
        item.insert(attr::SYNOPSIS.to_string(), AttributeValue::s(&self.synopsis));
        item.insert(attr::ATTRACTION.to_string(), AttributeValue::s(&self.attraction));
        item.insert(
            attr::SPOILERS.to_string(),
            AttributeValue::s(&self.narrative_highlights),
        );
        item.insert(attr::GENRE.to_string(), AttributeValue::s(&self.genre));
        item.insert(attr::CHARACTERS.to_string(), AttributeValue::s(&self.characters));
        item.insert(
            attr::IMAGE_PATH.to_string(),
            AttributeValue::s(&self.image_location),
        );
        item
    }

    /// Rebuild a record from a stored item. Missing enrichment attributes
    /// read as empty strings; a missing key or title is an error.
    pub fn from_raw(item: &RawRecord) -> Result<Self, StoreError> {
        let id = record_key(item)?;
        let text = |name: &str| item.get(name).map(AttributeValue::as_text).unwrap_or_default();

        let title = text(attr::TITLE);
        if title.is_empty() {
            return Err(StoreError::Corrupt(format!("item {} has no Title", id)));
        }

        Ok(Self {
            id,
            title,
            synopsis: text(attr::SYNOPSIS),
            attraction: text(attr::ATTRACTION),
            narrative_highlights: text(attr::SPOILERS),
            genre: text(attr::GENRE),
            characters: text(attr::CHARACTERS),
            image_location: text(attr::IMAGE_PATH),
        })
    }
}
