//! TOML configuration parsing and validation.
//!
//! ```toml
//! [store]
//! backend = "dynamodb"
//! table = "ComicSummaries"
//! region = "ap-northeast-1"
//! endpoint_url = "http://localhost:8000"   # DynamoDB Local
//!
//! [replica]
//! backend = "dynamodb"
//! region = "ap-northeast-1"
//!
//! [catalog]
//! url = "https://comic.example.jp/search/magazine/43?sort=popular&page={page}"
//! pages = 10
//! items_per_page = 50
//!
//! [summarizer]
//! model = "gpt-4o-mini"
//! max_tokens = 4000
//! instruction_file = "prompt.txt"
//!
//! [assets]
//! backend = "s3"
//! bucket = "comic-summaries"
//! region = "ap-northeast-1"
//! public_base_url = "https://d1234.cloudfront.net"
//!
//! [replication]
//! batch_size = 10
//! max_attempts = 5
//! ```
//!
//! Secrets never live in this file. `OPENAI_API_KEY` and the `AWS_*`
//! credentials are read from the environment (a `.env` file is loaded
//! first by the CLI).

use anyhow::{bail, Context, Result};
use comic_digest_core::backoff::{BackoffPolicy, BackoffStrategy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest group a single `BatchWriteItem` call accepts.
pub const MAX_BATCH_SIZE: usize = 25;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub replica: Option<StoreConfig>,
    #[serde(default)]
    pub catalog: Option<CatalogConfig>,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Dynamodb,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    #[serde(default = "default_table")]
    pub table: String,
    /// SQLite database file.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub region: Option<String>,
    /// Override for DynamoDB Local or other compatible endpoints.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_table() -> String {
    "ComicSummaries".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    /// Listing URL. `{page}` is replaced by the 1-based page number.
    pub url: String,
    #[serde(default = "default_pages")]
    pub pages: u32,
    pub items_per_page: usize,
    #[serde(default = "default_item_selector")]
    pub item_selector: String,
    #[serde(default = "default_title_selector")]
    pub title_selector: String,
    #[serde(default = "default_image_selector")]
    pub image_selector: String,
    #[serde(default = "default_image_attr")]
    pub image_attr: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_pages() -> u32 {
    1
}
fn default_item_selector() -> String {
    ".book-list--item".to_string()
}
fn default_title_selector() -> String {
    ".book-list--title".to_string()
}
fn default_image_selector() -> String {
    ".book-list--img".to_string()
}
fn default_image_attr() -> String {
    "src".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummarizerConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Inline system instruction. Takes precedence over `instruction_file`.
    #[serde(default)]
    pub instruction: Option<String>,
    #[serde(default)]
    pub instruction_file: Option<PathBuf>,
    /// Ask the endpoint for a JSON-object response format.
    #[serde(default = "default_true")]
    pub json_response: bool,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            instruction: None,
            instruction_file: None,
            json_response: true,
            base_url: default_base_url(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_tokens() -> u32 {
    4000
}
fn default_true() -> bool {
    true
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    3
}

/// Default system instruction: asks for the five target fields as JSON.
pub const DEFAULT_INSTRUCTION: &str = "You will be given the title of a manga. \
Determine its Synopsis, Attraction (what makes it appealing), Spoilers (noteworthy plot points), \
Genre and Characters, and answer with a single JSON object using exactly those keys. \
Characters must be a single string of the main character names separated by commas. \
Write every value in Japanese except proper nouns.";

impl SummarizerConfig {
    /// Resolve the system instruction: inline text, then file, then default.
    pub fn resolve_instruction(&self) -> Result<String> {
        if let Some(ref text) = self.instruction {
            return Ok(text.clone());
        }
        if let Some(ref path) = self.instruction_file {
            return std::fs::read_to_string(path).with_context(|| {
                format!("Failed to read instruction file: {}", path.display())
            });
        }
        Ok(DEFAULT_INSTRUCTION.to_string())
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AssetBackend {
    Local,
    S3,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssetsConfig {
    pub backend: AssetBackend,
    /// Target directory for the local backend.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Stored locations are `<public_base_url>/<key>`.
    #[serde(default)]
    pub public_base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            backend: AssetBackend::Local,
            dir: Some(PathBuf::from("./data/images")),
            bucket: None,
            region: None,
            endpoint_url: None,
            public_base_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// What to do when an item's cover image cannot be materialized.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AssetFailurePolicy {
    /// Drop the item, log it, continue with the next one.
    #[default]
    Skip,
    /// Stop the whole run.
    Abort,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default)]
    pub asset_failure: AssetFailurePolicy,
    /// Items enriched at the same time within one page.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            asset_failure: AssetFailurePolicy::Skip,
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReplicationConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default)]
    pub backoff: BackoffStrategy,
    #[serde(default)]
    pub max_backoff_ms: Option<u64>,
    #[serde(default = "default_inter_batch_delay_ms")]
    pub inter_batch_delay_ms: u64,
    #[serde(default)]
    pub scan_page_size: Option<usize>,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            backoff: BackoffStrategy::Linear,
            max_backoff_ms: None,
            inter_batch_delay_ms: default_inter_batch_delay_ms(),
            scan_page_size: None,
        }
    }
}

fn default_batch_size() -> usize {
    MAX_BATCH_SIZE
}
fn default_max_attempts() -> u32 {
    5
}
fn default_base_backoff_ms() -> u64 {
    1000
}
fn default_inter_batch_delay_ms() -> u64 {
    3000
}

impl ReplicationConfig {
    pub fn backoff_policy(&self) -> BackoffPolicy {
        let base = Duration::from_millis(self.base_backoff_ms);
        let policy = match self.backoff {
            BackoffStrategy::Linear => BackoffPolicy::linear(base),
            BackoffStrategy::Exponential => BackoffPolicy::exponential(base),
        };
        match self.max_backoff_ms {
            Some(ms) => policy.with_max(Duration::from_millis(ms)),
            None => policy,
        }
    }

    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    validate_store("store", &config.store)?;
    if let Some(ref replica) = config.replica {
        validate_store("replica", replica)?;
    }

    if let Some(ref catalog) = config.catalog {
        if catalog.items_per_page == 0 {
            bail!("catalog.items_per_page must be > 0");
        }
        if catalog.pages == 0 {
            bail!("catalog.pages must be >= 1");
        }
    }

    if config.summarizer.max_tokens == 0 {
        bail!("summarizer.max_tokens must be > 0");
    }

    match config.assets.backend {
        AssetBackend::Local if config.assets.dir.is_none() => {
            bail!("assets.dir is required when assets.backend = \"local\"")
        }
        AssetBackend::S3 => {
            if config.assets.bucket.is_none() {
                bail!("assets.bucket is required when assets.backend = \"s3\"");
            }
            if config.assets.region.is_none() {
                bail!("assets.region is required when assets.backend = \"s3\"");
            }
        }
        _ => {}
    }

    if config.ingest.concurrency == 0 {
        bail!("ingest.concurrency must be >= 1");
    }

    let r = &config.replication;
    if r.batch_size == 0 || r.batch_size > MAX_BATCH_SIZE {
        bail!("replication.batch_size must be in 1..={}", MAX_BATCH_SIZE);
    }
    if r.max_attempts == 0 {
        bail!("replication.max_attempts must be >= 1");
    }
    if r.scan_page_size == Some(0) {
        bail!("replication.scan_page_size must be > 0 when set");
    }

    Ok(config)
}

fn validate_store(section: &str, store: &StoreConfig) -> Result<()> {
    if store.table.trim().is_empty() {
        bail!("{}.table must not be empty", section);
    }
    match store.backend {
        StoreBackend::Sqlite if store.path.is_none() => {
            bail!("{}.path is required for the sqlite backend", section)
        }
        StoreBackend::Dynamodb if store.region.is_none() => {
            bail!("{}.region is required for the dynamodb backend", section)
        }
        _ => Ok(()),
    }
}
