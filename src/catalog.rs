//! Catalog listing scraper.
//!
//! Fetches a listing page and extracts `(title, thumbnail URL)` pairs
//! from its repeated item blocks. Which blocks, titles and images count
//! is decided by CSS selectors from the `[catalog]` config section.
//!
//! Extraction is a pure function over HTML ([`extract_entries`]) so it
//! can be tested against fixtures without a network.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use comic_digest_core::CatalogEntry;
use scraper::{Html, Selector};
use url::Url;

use crate::config::CatalogConfig;
use crate::error::{PipelineError, PipelineResult};

/// Compiled selectors for one listing layout.
#[derive(Debug, Clone)]
pub struct ListingSelectors {
    item: Selector,
    title: Selector,
    image: Selector,
    image_attr: String,
}

impl ListingSelectors {
    pub fn compile(config: &CatalogConfig) -> Result<Self> {
        Ok(Self {
            item: parse_selector("catalog.item_selector", &config.item_selector)?,
            title: parse_selector("catalog.title_selector", &config.title_selector)?,
            image: parse_selector("catalog.image_selector", &config.image_selector)?,
            image_attr: config.image_attr.clone(),
        })
    }
}

fn parse_selector(field: &str, raw: &str) -> Result<Selector> {
    Selector::parse(raw).map_err(|e| anyhow!("Invalid CSS selector in {}: {} ({})", field, raw, e))
}

/// Pull every usable entry out of a listing page, in document order.
///
/// Blocks without the image attribute or with a blank title are skipped.
/// Relative image URLs are resolved against `page_url`.
pub fn extract_entries(html: &str, page_url: &Url, selectors: &ListingSelectors) -> Vec<CatalogEntry> {
    let document = Html::parse_document(html);
    let mut entries = Vec::new();

    for block in document.select(&selectors.item) {
        let title = block
            .select(&selectors.title)
            .next()
            .map(|el| el.text().collect::<String>())
            .unwrap_or_default();
        let title = title.trim();

        let src = block
            .select(&selectors.image)
            .next()
            .and_then(|el| el.value().attr(&selectors.image_attr))
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let Some(src) = src else {
            tracing::debug!(title, "listing block has no image, skipping");
            continue;
        };
        if title.is_empty() {
            tracing::debug!(src, "listing block has no title, skipping");
            continue;
        }

        let thumbnail_url = match page_url.join(src) {
            Ok(u) => u.to_string(),
            Err(_) => src.to_string(),
        };

        entries.push(CatalogEntry {
            title: title.to_string(),
            thumbnail_url,
        });
    }

    entries
}

/// Keep exactly the first `wanted` entries, or fail if there are fewer.
pub fn take_entries(
    mut entries: Vec<CatalogEntry>,
    wanted: usize,
    url: &str,
) -> PipelineResult<Vec<CatalogEntry>> {
    if entries.len() < wanted {
        return Err(PipelineError::InsufficientData {
            url: url.to_string(),
            requested: wanted,
            available: entries.len(),
        });
    }
    entries.truncate(wanted);
    Ok(entries)
}

/// Render the listing URL for a 1-based page number.
pub fn page_url(template: &str, page: u32) -> String {
    template.replace("{page}", &page.to_string())
}

/// HTTP front end over [`extract_entries`].
pub struct CatalogScraper {
    client: reqwest::Client,
    selectors: ListingSelectors,
    url_template: String,
}

impl CatalogScraper {
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            selectors: ListingSelectors::compile(config)?,
            url_template: config.url.clone(),
        })
    }

    /// Scrape listing page `page` and return its first `wanted` entries.
    pub async fn scrape(&self, page: u32, wanted: usize) -> PipelineResult<Vec<CatalogEntry>> {
        let url = page_url(&self.url_template, page);
        let fetch_err = |reason: String| PipelineError::Fetch {
            url: url.clone(),
            reason,
        };

        let parsed = Url::parse(&url).map_err(|e| fetch_err(e.to_string()))?;
        let response = self
            .client
            .get(parsed.clone())
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_err(format!("HTTP {}", status)));
        }
        let body = response.text().await.map_err(|e| fetch_err(e.to_string()))?;

        let entries = extract_entries(&body, &parsed, &self.selectors);
        tracing::info!(page, found = entries.len(), wanted, "listing page scraped");
        take_entries(entries, wanted, &url)
    }
}
