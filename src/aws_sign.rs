//! AWS Signature Version 4 request signing.
//!
//! Shared by the S3 asset sink and the DynamoDB store. Uses only
//! pure-Rust dependencies (`hmac`, `sha2`); no AWS SDK and no C
//! library dependencies like `aws-lc-sys`.
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID` (required)
//! - `AWS_SECRET_ACCESS_KEY` (required)
//! - `AWS_SESSION_TOKEN` (optional, temporary credentials / IAM roles)
//!
//! See [Signature Version 4](https://docs.aws.amazon.com/IAM/latest/UserGuide/reference_sigv.html).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials loaded from environment variables.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

impl AwsCredentials {
    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// Where requests for one service are sent.
#[derive(Debug, Clone)]
pub struct ServiceEndpoint {
    /// Scheme + authority, no trailing slash (e.g. `https://dynamodb.us-east-1.amazonaws.com`).
    pub base_url: String,
    /// Value of the `Host` header (authority, including a non-default port).
    pub host: String,
}

impl ServiceEndpoint {
    /// Use `endpoint_url` when set (DynamoDB Local, MinIO, LocalStack),
    /// otherwise `https://<default_host>`.
    pub fn resolve(endpoint_url: Option<&str>, default_host: String) -> Result<Self> {
        match endpoint_url {
            Some(raw) => {
                let parsed = url::Url::parse(raw)
                    .with_context(|| format!("Invalid endpoint_url: {}", raw))?;
                let host = parsed
                    .host_str()
                    .with_context(|| format!("endpoint_url has no host: {}", raw))?;
                let host = match parsed.port() {
                    Some(port) => format!("{}:{}", host, port),
                    None => host.to_string(),
                };
                Ok(Self {
                    base_url: format!("{}://{}", parsed.scheme(), host),
                    host,
                })
            }
            None => Ok(Self {
                base_url: format!("https://{}", default_host),
                host: default_host,
            }),
        }
    }
}

/// The parts of a request that enter the signature.
pub struct RequestParts<'a> {
    pub method: &'a str,
    /// Already URI-encoded path, starting with `/`.
    pub canonical_uri: &'a str,
    /// Unencoded query parameters.
    pub query: &'a [(String, String)],
    /// Extra headers to sign (names lowercase), e.g. `content-type`.
    pub headers: &'a [(String, String)],
    pub payload: &'a [u8],
}

/// Sign a request and return the headers to attach to it.
///
/// The returned list includes `authorization`, `x-amz-date`,
/// `x-amz-content-sha256`, the session token if any, and the caller's
/// extra headers. `host` is signed but not returned; the HTTP client
/// sets it from the URL.
pub fn sign(
    creds: &AwsCredentials,
    region: &str,
    service: &str,
    host: &str,
    parts: &RequestParts<'_>,
    now: DateTime<Utc>,
) -> Vec<(String, String)> {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let payload_hash = hex_sha256(parts.payload);

    let mut headers = vec![
        ("host".to_string(), host.to_string()),
        ("x-amz-content-sha256".to_string(), payload_hash.clone()),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    if let Some(ref token) = creds.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    headers.extend(
        parts
            .headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.trim().to_string())),
    );
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let signed_headers: String = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        parts.method,
        parts.canonical_uri,
        canonical_query(parts.query),
        canonical_headers,
        signed_headers,
        payload_hash
    );

    let credential_scope = format!("{}/{}/{}/aws4_request", date_stamp, region, service);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, &date_stamp, region, service);
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        creds.access_key_id, credential_scope, signed_headers, signature
    );

    let mut out: Vec<(String, String)> = headers.into_iter().filter(|(k, _)| k != "host").collect();
    out.push(("authorization".to_string(), authorization));
    out
}

/// Canonical query string: each key and value URI-encoded, sorted by key.
pub fn canonical_query(params: &[(String, String)]) -> String {
    let mut sorted: Vec<_> = params
        .iter()
        .map(|(k, v)| (uri_encode(k), uri_encode(v)))
        .collect();
    sorted.sort();
    sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Compute the hex-encoded SHA-256 hash of data.
pub fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Derive the SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode a string per RFC 3986.
///
/// Encodes all characters except `A-Z a-z 0-9 - _ . ~`.
pub fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn creds() -> AwsCredentials {
        AwsCredentials {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".into(),
            session_token: None,
        }
    }

    #[test]
    fn test_signing_key_matches_published_example() {
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_uri_encode_reserved() {
        assert_eq!(uri_encode("a b/c~"), "a%20b%2Fc~");
        assert_eq!(uri_encode("表紙"), "%E8%A1%A8%E7%B4%99");
    }

    #[test]
    fn test_canonical_query_sorted() {
        let q = vec![
            ("prefix".to_string(), "a b".to_string()),
            ("list-type".to_string(), "2".to_string()),
        ];
        assert_eq!(canonical_query(&q), "list-type=2&prefix=a%20b");
    }

    #[test]
    fn test_sign_emits_authorization_with_sorted_headers() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let extra = vec![
            ("X-Amz-Target".to_string(), "DynamoDB_20120810.Scan".to_string()),
            ("content-type".to_string(), "application/x-amz-json-1.0".to_string()),
        ];
        let headers = sign(
            &creds(),
            "us-east-1",
            "dynamodb",
            "localhost:8000",
            &RequestParts {
                method: "POST",
                canonical_uri: "/",
                query: &[],
                headers: &extra,
                payload: b"{}",
            },
            now,
        );

        let auth = headers
            .iter()
            .find(|(k, _)| k == "authorization")
            .map(|(_, v)| v.clone())
            .unwrap();
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240501/us-east-1/dynamodb/aws4_request"
        ));
        assert!(auth.contains(
            "SignedHeaders=content-type;host;x-amz-content-sha256;x-amz-date;x-amz-target"
        ));
        assert!(headers.iter().all(|(k, _)| k != "host"));
        assert!(headers
            .iter()
            .any(|(k, v)| k == "x-amz-date" && v == "20240501T120000Z"));
    }

    #[test]
    fn test_endpoint_override_keeps_port() {
        let ep = ServiceEndpoint::resolve(Some("http://localhost:8000/"), "unused".into()).unwrap();
        assert_eq!(ep.base_url, "http://localhost:8000");
        assert_eq!(ep.host, "localhost:8000");

        let ep = ServiceEndpoint::resolve(None, "dynamodb.us-east-1.amazonaws.com".into()).unwrap();
        assert_eq!(ep.base_url, "https://dynamodb.us-east-1.amazonaws.com");
    }
}
