//! DynamoDB-backed [`Store`] implementation.
//!
//! Talks to the DynamoDB JSON API (`X-Amz-Target: DynamoDB_20120810.*`)
//! over plain HTTPS with SigV4 signing from [`crate::aws_sign`]. No AWS
//! SDK is involved. Works against DynamoDB Local through
//! `store.endpoint_url`.
//!
//! | Store method | DynamoDB operation |
//! |--------------|--------------------|
//! | `get` | `GetItem` (consistent read) |
//! | `put_if_absent` | `PutItem` + `attribute_not_exists(ID)` |
//! | `update_fields` | `UpdateItem` with a `SET` expression |
//! | `scan_page` | `Scan` with `Limit` / `ExclusiveStartKey` |
//! | `batch_put` | `BatchWriteItem` (≤ 25 puts) |
//! | `count` | `Scan` with `Select = COUNT` |
//! | `find_by_title` | `Scan` with `contains(Title, :needle)` |
//!
//! Capacity errors and unprocessed batch items surface as
//! [`StoreError::Throttled`] so the replication writer can back off.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use comic_digest_core::models::{attr, record_key, AttributeValue};
use comic_digest_core::store::{PutOutcome, ScanCursor, ScanPage, Store};
use comic_digest_core::{RawRecord, StoreError};
use serde_json::{json, Map, Value};

use crate::aws_sign::{self, AwsCredentials, RequestParts, ServiceEndpoint};
use crate::config::{StoreConfig, MAX_BATCH_SIZE};

const TARGET_PREFIX: &str = "DynamoDB_20120810";

/// Error types DynamoDB uses for capacity and rate rejections.
const THROTTLE_KINDS: &[&str] = &[
    "ProvisionedThroughputExceededException",
    "ThrottlingException",
    "RequestLimitExceeded",
];

/// A failed API call.
#[derive(Debug)]
enum CallError {
    /// DynamoDB answered with a typed error.
    Service { kind: String, message: String },
    /// Transport failure or an unreadable response.
    Transport(anyhow::Error),
}

impl CallError {
    fn is_kind(&self, wanted: &str) -> bool {
        matches!(self, CallError::Service { kind, .. } if kind == wanted)
    }
}

impl From<CallError> for StoreError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Service { kind, message } if THROTTLE_KINDS.contains(&kind.as_str()) => {
                StoreError::Throttled(format!("{}: {}", kind, message))
            }
            CallError::Service { kind, message } => {
                StoreError::Backend(anyhow!("DynamoDB {}: {}", kind, message))
            }
            CallError::Transport(e) => StoreError::Backend(e),
        }
    }
}

/// Reduce `com.amazonaws.dynamodb.v20120810#ResourceNotFoundException`
/// to `ResourceNotFoundException`.
fn error_kind(type_field: &str) -> &str {
    type_field.rsplit('#').next().unwrap_or(type_field)
}

fn service_error(body: &str) -> CallError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let kind = parsed
        .get("__type")
        .and_then(Value::as_str)
        .map(error_kind)
        .unwrap_or("UnknownError")
        .to_string();
    let message = parsed
        .get("message")
        .or_else(|| parsed.get("Message"))
        .and_then(Value::as_str)
        .unwrap_or(body)
        .to_string();
    CallError::Service { kind, message }
}

pub struct DynamoStore {
    client: reqwest::Client,
    creds: AwsCredentials,
    region: String,
    endpoint: ServiceEndpoint,
}

impl DynamoStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let region = config
            .region
            .clone()
            .context("region is required for the dynamodb backend")?;
        let endpoint = ServiceEndpoint::resolve(
            config.endpoint_url.as_deref(),
            format!("dynamodb.{}.amazonaws.com", region),
        )?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            creds: AwsCredentials::from_env()?,
            region,
            endpoint,
        })
    }

    async fn call(&self, operation: &str, body: &Value) -> Result<Value, CallError> {
        let payload = serde_json::to_vec(body).map_err(|e| CallError::Transport(e.into()))?;
        let target = format!("{}.{}", TARGET_PREFIX, operation);
        let extra = vec![
            (
                "content-type".to_string(),
                "application/x-amz-json-1.0".to_string(),
            ),
            ("x-amz-target".to_string(), target),
        ];
        let headers = aws_sign::sign(
            &self.creds,
            &self.region,
            "dynamodb",
            &self.endpoint.host,
            &RequestParts {
                method: "POST",
                canonical_uri: "/",
                query: &[],
                headers: &extra,
                payload: &payload,
            },
            Utc::now(),
        );

        let mut req = self.client.post(format!("{}/", self.endpoint.base_url));
        for (k, v) in &headers {
            req = req.header(k.as_str(), v.as_str());
        }
        let resp = req
            .body(payload)
            .send()
            .await
            .map_err(|e| CallError::Transport(e.into()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| CallError::Transport(e.into()))?;

        if !status.is_success() {
            tracing::debug!(operation, %status, "DynamoDB call failed");
            return Err(service_error(&text));
        }
        serde_json::from_str(&text).map_err(|e| {
            CallError::Transport(anyhow!("{} returned invalid JSON: {}", operation, e))
        })
    }

    /// Create `table` with a string `ID` hash key and on-demand billing.
    /// Returns `false` if it already exists.
    pub async fn ensure_table(&self, table: &str) -> Result<bool> {
        let body = json!({
            "TableName": table,
            "AttributeDefinitions": [{ "AttributeName": attr::ID, "AttributeType": "S" }],
            "KeySchema": [{ "AttributeName": attr::ID, "KeyType": "HASH" }],
            "BillingMode": "PAY_PER_REQUEST",
        });
        match self.call("CreateTable", &body).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_kind("ResourceInUseException") => Ok(false),
            Err(e) => Err(StoreError::from(e).into()),
        }
    }

    /// Run a scan to completion, feeding each response to `on_page`.
    async fn scan_all(
        &self,
        mut body: Value,
        mut on_page: impl FnMut(&mut Value) -> Result<(), StoreError> + Send,
    ) -> Result<(), StoreError> {
        loop {
            let mut resp = self.call("Scan", &body).await?;
            on_page(&mut resp)?;
            match resp.get_mut("LastEvaluatedKey").map(Value::take) {
                Some(key) if !key.is_null() => body["ExclusiveStartKey"] = key,
                _ => return Ok(()),
            }
        }
    }
}

fn key_of(id: &str) -> Value {
    json!({ (attr::ID): { "S": id } })
}

fn take_items(resp: &mut Value) -> Result<Vec<RawRecord>, StoreError> {
    match resp.get_mut("Items").map(Value::take) {
        Some(items) => serde_json::from_value(items)
            .map_err(|e| StoreError::Corrupt(format!("scan items: {}", e))),
        None => Ok(Vec::new()),
    }
}

fn encode_cursor(last_key: &Value) -> ScanCursor {
    ScanCursor::new(URL_SAFE_NO_PAD.encode(last_key.to_string().as_bytes()))
}

fn decode_cursor(cursor: &ScanCursor) -> Result<Value, StoreError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor.as_str())
        .map_err(|e| StoreError::Corrupt(format!("scan cursor: {}", e)))?;
    serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt(format!("scan cursor: {}", e)))
}

/// Build `SET #f0 = :v0, ...` plus its name and value maps.
///
/// `ID` is skipped. Returns `None` if nothing is left to set.
fn update_expression(fields: &RawRecord) -> Option<(String, Map<String, Value>, Map<String, Value>)> {
    let mut clauses = Vec::new();
    let mut names = Map::new();
    let mut values = Map::new();

    for (i, (name, value)) in fields.iter().filter(|(n, _)| *n != attr::ID).enumerate() {
        let n = format!("#f{}", i);
        let v = format!(":v{}", i);
        clauses.push(format!("{} = {}", n, v));
        names.insert(n, Value::String(name.clone()));
        values.insert(v, serde_json::to_value(value).unwrap_or(Value::Null));
    }

    if clauses.is_empty() {
        None
    } else {
        Some((format!("SET {}", clauses.join(", ")), names, values))
    }
}

#[async_trait]
impl Store for DynamoStore {
    fn backend(&self) -> &str {
        "dynamodb"
    }

    async fn get(&self, table: &str, id: &str) -> Result<Option<RawRecord>, StoreError> {
        let body = json!({ "TableName": table, "Key": key_of(id), "ConsistentRead": true });
        let mut resp = self.call("GetItem", &body).await?;
        match resp.get_mut("Item").map(Value::take) {
            Some(item) if !item.is_null() => serde_json::from_value(item)
                .map(Some)
                .map_err(|e| StoreError::Corrupt(format!("item {}: {}", id, e))),
            _ => Ok(None),
        }
    }

    async fn put_if_absent(&self, table: &str, item: &RawRecord) -> Result<PutOutcome, StoreError> {
        record_key(item)?;
        let body = json!({
            "TableName": table,
            "Item": item,
            "ConditionExpression": "attribute_not_exists(#id)",
            "ExpressionAttributeNames": { "#id": attr::ID },
        });
        match self.call("PutItem", &body).await {
            Ok(_) => Ok(PutOutcome::Created),
            Err(e) if e.is_kind("ConditionalCheckFailedException") => Ok(PutOutcome::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_fields(
        &self,
        table: &str,
        id: &str,
        fields: &RawRecord,
    ) -> Result<(), StoreError> {
        let Some((expression, names, values)) = update_expression(fields) else {
            return Ok(());
        };
        let body = json!({
            "TableName": table,
            "Key": key_of(id),
            "UpdateExpression": expression,
            "ExpressionAttributeNames": names,
            "ExpressionAttributeValues": values,
        });
        self.call("UpdateItem", &body).await?;
        Ok(())
    }

    async fn scan_page(
        &self,
        table: &str,
        limit: Option<usize>,
        cursor: Option<&ScanCursor>,
    ) -> Result<ScanPage, StoreError> {
        let mut body = json!({ "TableName": table });
        if let Some(n) = limit {
            body["Limit"] = json!(n.max(1));
        }
        if let Some(c) = cursor {
            body["ExclusiveStartKey"] = decode_cursor(c)?;
        }

        let mut resp = self.call("Scan", &body).await?;
        let items = take_items(&mut resp)?;
        let next = match resp.get("LastEvaluatedKey") {
            Some(key) if !key.is_null() => Some(encode_cursor(key)),
            _ => None,
        };
        Ok(ScanPage { items, next })
    }

    async fn batch_put(&self, table: &str, items: &[RawRecord]) -> Result<(), StoreError> {
        if items.is_empty() {
            return Ok(());
        }
        if items.len() > MAX_BATCH_SIZE {
            return Err(StoreError::Backend(anyhow!(
                "BatchWriteItem accepts at most {} items, got {}",
                MAX_BATCH_SIZE,
                items.len()
            )));
        }
        for item in items {
            record_key(item)?;
        }

        let requests: Vec<Value> = items
            .iter()
            .map(|item| json!({ "PutRequest": { "Item": item } }))
            .collect();
        let body = json!({ "RequestItems": { (table): requests } });

        let resp = self.call("BatchWriteItem", &body).await?;
        let unprocessed = resp
            .pointer(&format!("/UnprocessedItems/{}", table))
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        if unprocessed > 0 {
            return Err(StoreError::Throttled(format!(
                "{} of {} items unprocessed",
                unprocessed,
                items.len()
            )));
        }
        Ok(())
    }

    async fn count(&self, table: &str) -> Result<u64, StoreError> {
        let mut total = 0u64;
        let body = json!({ "TableName": table, "Select": "COUNT" });
        self.scan_all(body, |resp| {
            total += resp.get("Count").and_then(Value::as_u64).unwrap_or(0);
            Ok(())
        })
        .await?;
        Ok(total)
    }

    async fn find_by_title(&self, table: &str, needle: &str) -> Result<Vec<RawRecord>, StoreError> {
        let mut found = Vec::new();
        let body = json!({
            "TableName": table,
            "FilterExpression": "contains(#t, :needle)",
            "ExpressionAttributeNames": { "#t": attr::TITLE },
            "ExpressionAttributeValues": { ":needle": AttributeValue::s(needle) },
        });
        self.scan_all(body, |resp| {
            found.extend(take_items(resp)?);
            Ok(())
        })
        .await?;
        Ok(found)
    }
}
