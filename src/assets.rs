//! Cover image materialization.
//!
//! [`AssetMaterializer`] downloads a thumbnail, stages it in a temporary
//! file and hands it to an [`AssetSink`], which moves it to its durable
//! home and returns the location to store on the record.
//!
//! Sinks:
//! - [`LocalDirSink`]: copies into a directory, location is the file path.
//! - [`S3Sink`]: signed `PutObject`, location is `<public_base_url>/<key>`.
//!
//! Keys are `<uuid>.<ext>`, so two titles never collide and a re-run
//! writes a fresh object rather than overwriting a live one.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::aws_sign::{self, AwsCredentials, RequestParts, ServiceEndpoint};
use crate::config::{AssetBackend, AssetsConfig};
use crate::error::{PipelineError, PipelineResult};

/// Final destination for materialized images.
#[async_trait]
pub trait AssetSink: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &str;

    /// Persist the staged file under `key` and return its addressable location.
    async fn store(&self, staged: &Path, key: &str, content_type: &str) -> Result<String>;
}

/// Copies images into a local directory.
pub struct LocalDirSink {
    dir: PathBuf,
}

impl LocalDirSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl AssetSink for LocalDirSink {
    fn name(&self) -> &str {
        "local"
    }

    async fn store(&self, staged: &Path, key: &str, _content_type: &str) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create asset dir: {}", self.dir.display()))?;
        let target = self.dir.join(key);
        tokio::fs::copy(staged, &target)
            .await
            .with_context(|| format!("Failed to copy image to {}", target.display()))?;
        Ok(target.display().to_string())
    }
}

/// Uploads images to an S3 bucket.
pub struct S3Sink {
    client: reqwest::Client,
    creds: AwsCredentials,
    bucket: String,
    region: String,
    endpoint: ServiceEndpoint,
    /// Custom endpoints (MinIO, LocalStack) are addressed path-style.
    path_style: bool,
    public_base_url: String,
}

impl S3Sink {
    /// Build a sink using `AWS_*` credentials from the environment.
    pub fn new(config: &AssetsConfig) -> Result<Self> {
        Self::with_credentials(config, AwsCredentials::from_env()?)
    }

    pub fn with_credentials(config: &AssetsConfig, creds: AwsCredentials) -> Result<Self> {
        let bucket = config
            .bucket
            .clone()
            .context("assets.bucket is required for the s3 backend")?;
        let region = config
            .region
            .clone()
            .context("assets.region is required for the s3 backend")?;
        let endpoint = ServiceEndpoint::resolve(
            config.endpoint_url.as_deref(),
            format!("{}.s3.{}.amazonaws.com", bucket, region),
        )?;
        let path_style = config.endpoint_url.is_some();

        let public_base_url = match config.public_base_url {
            Some(ref base) => base.trim_end_matches('/').to_string(),
            None if path_style => format!("{}/{}", endpoint.base_url, bucket),
            None => endpoint.base_url.clone(),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            creds,
            bucket,
            region,
            endpoint,
            path_style,
            public_base_url,
        })
    }

    fn object_path(&self, key: &str) -> String {
        let encoded_key = key
            .split('/')
            .map(aws_sign::uri_encode)
            .collect::<Vec<_>>()
            .join("/");
        if self.path_style {
            format!("/{}/{}", aws_sign::uri_encode(&self.bucket), encoded_key)
        } else {
            format!("/{}", encoded_key)
        }
    }

    /// Address recorded for an uploaded object: `<public_base_url>/<key>`.
    pub fn public_location(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }
}

#[async_trait]
impl AssetSink for S3Sink {
    fn name(&self) -> &str {
        "s3"
    }

    async fn store(&self, staged: &Path, key: &str, content_type: &str) -> Result<String> {
        let body = tokio::fs::read(staged)
            .await
            .with_context(|| format!("Failed to read staged image {}", staged.display()))?;

        let path = self.object_path(key);
        let extra = vec![("content-type".to_string(), content_type.to_string())];
        let headers = aws_sign::sign(
            &self.creds,
            &self.region,
            "s3",
            &self.endpoint.host,
            &RequestParts {
                method: "PUT",
                canonical_uri: &path,
                query: &[],
                headers: &extra,
                payload: &body,
            },
            Utc::now(),
        );

        let mut req = self
            .client
            .put(format!("{}{}", self.endpoint.base_url, path));
        for (k, v) in &headers {
            req = req.header(k.as_str(), v.as_str());
        }
        let resp = req.body(body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("S3 PutObject failed ({}): {}", status, text);
        }

        Ok(self.public_location(key))
    }
}

/// Build the sink selected by `[assets]`.
pub fn sink_from_config(config: &AssetsConfig) -> Result<Box<dyn AssetSink>> {
    match config.backend {
        AssetBackend::Local => {
            let dir = config
                .dir
                .clone()
                .context("assets.dir is required for the local backend")?;
            Ok(Box::new(LocalDirSink::new(dir)))
        }
        AssetBackend::S3 => Ok(Box::new(S3Sink::new(config)?)),
    }
}

/// Download → stage → store, with the staging file always removed.
pub struct AssetMaterializer {
    client: reqwest::Client,
    sink: Box<dyn AssetSink>,
    /// Where downloads are staged; the system temp dir when unset.
    staging_dir: Option<PathBuf>,
}

impl AssetMaterializer {
    pub fn new(sink: Box<dyn AssetSink>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            sink,
            staging_dir: None,
        })
    }

    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }

    /// Re-host the image at `url` and return its durable location.
    pub async fn materialize(&self, url: &str) -> PipelineResult<String> {
        let fetch_err = |reason: String| PipelineError::Fetch {
            url: url.to_string(),
            reason,
        };
        let asset_err = |reason: String| PipelineError::Asset {
            url: url.to_string(),
            reason,
        };

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(fetch_err(format!("HTTP {}", resp.status())));
        }
        let header_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(';').next().unwrap_or(s).trim().to_string());
        let bytes = resp.bytes().await.map_err(|e| fetch_err(e.to_string()))?;

        let ext = image_extension(url, header_type.as_deref());
        let content_type = header_type.unwrap_or_else(|| content_type_for(ext).to_string());
        let key = format!("{}.{}", uuid::Uuid::new_v4(), ext);

        let staged = match self.staging_dir {
            Some(ref dir) => tempfile::NamedTempFile::new_in(dir),
            None => tempfile::NamedTempFile::new(),
        }
        .map_err(|e| asset_err(e.to_string()))?;
        let result = match tokio::fs::write(staged.path(), &bytes).await {
            Ok(()) => self
                .sink
                .store(staged.path(), &key, &content_type)
                .await
                .map_err(|e| asset_err(format!("{:#}", e))),
            Err(e) => Err(asset_err(e.to_string())),
        };

        if let Err(e) = staged.close() {
            tracing::warn!(url, error = %e, "failed to remove staged image");
        }

        if let Ok(ref location) = result {
            tracing::debug!(url, location = %location, sink = self.sink.name(), "image materialized");
        }
        result
    }
}

/// File extension for a downloaded image, from the URL path first and
/// the response content type second.
pub fn image_extension(url: &str, content_type: Option<&str>) -> &'static str {
    let from_path = url::Url::parse(url).ok().and_then(|u| {
        let last = u.path_segments()?.next_back()?.to_ascii_lowercase();
        let (_, ext) = last.rsplit_once('.')?;
        match ext {
            "jpg" | "jpeg" => Some("jpg"),
            "png" => Some("png"),
            "gif" => Some("gif"),
            "webp" => Some("webp"),
            _ => None,
        }
    });
    if let Some(ext) = from_path {
        return ext;
    }
    match content_type {
        Some("image/png") => "png",
        Some("image/gif") => "gif",
        Some("image/webp") => "webp",
        _ => "jpg",
    }
}

fn content_type_for(ext: &str) -> &'static str {
    match ext {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubServer;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_sink_copies_into_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("images");
        let sink = LocalDirSink::new(&dir);

        let staged = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(staged.path(), b"\x89PNG fake").unwrap();

        let location = sink.store(staged.path(), "k1.png", "image/png").await.unwrap();
        assert_eq!(location, dir.join("k1.png").display().to_string());
        assert_eq!(std::fs::read(dir.join("k1.png")).unwrap(), b"\x89PNG fake");
    }

    #[test]
    fn test_extension_from_path_then_content_type() {
        assert_eq!(image_extension("https://cdn.x/a/B.JPEG?w=100", None), "jpg");
        assert_eq!(image_extension("https://cdn.x/a/cover.png", Some("image/webp")), "png");
        assert_eq!(image_extension("https://cdn.x/img?id=3", Some("image/webp")), "webp");
        assert_eq!(image_extension("https://cdn.x/img", None), "jpg");
    }

    #[tokio::test]
    async fn test_unreachable_image_is_fetch_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let m = AssetMaterializer::new(
            Box::new(LocalDirSink::new(tmp.path())),
            Duration::from_secs(2),
        )
        .unwrap();
        let err = m.materialize("http://127.0.0.1:9/cover.jpg").await.unwrap_err();
        assert!(matches!(err, PipelineError::Fetch { .. }), "{:?}", err);
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    /// Rejects every upload.
    struct FailingSink;

    #[async_trait]
    impl AssetSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        async fn store(&self, staged: &Path, _key: &str, _content_type: &str) -> Result<String> {
            assert!(staged.exists());
            bail!("bucket is read-only")
        }
    }

    fn staging_dir(tmp: &TempDir) -> PathBuf {
        let dir = tmp.path().join("staging");
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_materialize_rehosts_and_removes_staged_file() {
        let server = StubServer::start(200, "image/png", b"\x89PNG fake".to_vec()).await;
        let tmp = TempDir::new().unwrap();
        let staging = staging_dir(&tmp);
        let images = tmp.path().join("images");
        let m = AssetMaterializer::new(Box::new(LocalDirSink::new(&images)), Duration::from_secs(5))
            .unwrap()
            .with_staging_dir(&staging);

        let location = m.materialize(&server.url("/covers/blue-lock")).await.unwrap();

        assert!(location.ends_with(".png"), "{}", location);
        assert_eq!(std::fs::read(&location).unwrap(), b"\x89PNG fake");
        assert_eq!(std::fs::read_dir(&images).unwrap().count(), 1);
        assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_sink_failure_is_asset_error_and_staging_is_cleaned() {
        let server = StubServer::start(200, "image/jpeg", b"jpeg bytes".to_vec()).await;
        let tmp = TempDir::new().unwrap();
        let staging = staging_dir(&tmp);
        let m = AssetMaterializer::new(Box::new(FailingSink), Duration::from_secs(5))
            .unwrap()
            .with_staging_dir(&staging);

        let err = m.materialize(&server.url("/cover.jpg")).await.unwrap_err();

        match err {
            PipelineError::Asset { ref reason, .. } => assert!(reason.contains("read-only")),
            other => panic!("expected Asset, got {:?}", other),
        }
        assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_image_is_fetch_error() {
        let server = StubServer::start(404, "text/plain", "gone").await;
        let tmp = TempDir::new().unwrap();
        let staging = staging_dir(&tmp);
        let m = AssetMaterializer::new(Box::new(FailingSink), Duration::from_secs(5))
            .unwrap()
            .with_staging_dir(&staging);

        let err = m.materialize(&server.url("/cover.jpg")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Fetch { ref reason, .. } if reason.contains("404")));
        assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 0);
    }

    fn creds() -> AwsCredentials {
        AwsCredentials {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "secret".into(),
            session_token: None,
        }
    }

    fn s3_config(endpoint_url: Option<&str>, public_base_url: Option<&str>) -> AssetsConfig {
        AssetsConfig {
            backend: AssetBackend::S3,
            dir: None,
            bucket: Some("covers".into()),
            region: Some("ap-northeast-1".into()),
            endpoint_url: endpoint_url.map(str::to_string),
            public_base_url: public_base_url.map(str::to_string),
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_virtual_host_paths_and_location() {
        let sink = S3Sink::with_credentials(&s3_config(None, None), creds()).unwrap();
        assert_eq!(sink.object_path("a b.jpg"), "/a%20b.jpg");
        assert_eq!(sink.object_path("2024/k.jpg"), "/2024/k.jpg");
        assert_eq!(
            sink.public_location("k.jpg"),
            "https://covers.s3.ap-northeast-1.amazonaws.com/k.jpg"
        );
    }

    #[test]
    fn test_custom_endpoint_is_path_style() {
        let sink =
            S3Sink::with_credentials(&s3_config(Some("http://localhost:9000"), None), creds())
                .unwrap();
        assert_eq!(sink.object_path("k.jpg"), "/covers/k.jpg");
        assert_eq!(sink.public_location("k.jpg"), "http://localhost:9000/covers/k.jpg");
    }

    #[test]
    fn test_public_base_url_wins() {
        let sink = S3Sink::with_credentials(
            &s3_config(Some("http://localhost:9000"), Some("https://cdn.example/")),
            creds(),
        )
        .unwrap();
        assert_eq!(sink.public_location("k.jpg"), "https://cdn.example/k.jpg");
    }

    #[tokio::test]
    async fn test_s3_upload_returns_public_location() {
        let server = StubServer::start(200, "application/xml", "").await;
        let sink = S3Sink::with_credentials(
            &s3_config(Some(server.base_url()), Some("https://cdn.example")),
            creds(),
        )
        .unwrap();
        let staged = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(staged.path(), b"jpeg bytes").unwrap();

        let location = sink.store(staged.path(), "k1.jpg", "image/jpeg").await.unwrap();

        assert_eq!(location, "https://cdn.example/k1.jpg");
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn test_s3_rejection_is_error() {
        let server = StubServer::start(403, "application/xml", "<Error>AccessDenied</Error>").await;
        let sink =
            S3Sink::with_credentials(&s3_config(Some(server.base_url()), None), creds()).unwrap();
        let staged = tempfile::NamedTempFile::new().unwrap();

        let err = sink.store(staged.path(), "k1.jpg", "image/jpeg").await.unwrap_err();
        assert!(err.to_string().contains("AccessDenied"), "{}", err);
    }
}
