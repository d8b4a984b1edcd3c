// Array API client - fetches counters, alerts and audit entries
//
// Speaks the storage array's management REST API over HTTPS+JSON. A session
// is established from the array's API token at construction; all fetches are
// plain GETs against the session cookie.
//
// This module owns the API boundary validation: list endpoints are decoded
// element by element into typed records, and elements missing required
// fields are logged and dropped instead of propagating partial mappings.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::collector::enrich::StatsRecord;

/// REST API version the client requests
const API_VERSION: &str = "1.12";

/// Request timeout for a single API call
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur talking to the array API
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("array API authentication failed (status {0})")]
    AuthFailed(u16),

    #[error("array API returned status {status} for '{path}': {body}")]
    UnexpectedStatus {
        path: String,
        status: u16,
        body: String,
    },

    #[error("malformed payload from '{path}': {reason}")]
    MalformedPayload { path: String, reason: String },
}

/// One alert message from the array's event log.
///
/// Fields beyond the required set vary by array firmware and ride along in
/// `extra` untouched. `actual`/`expected` are empty for alerts that carry no
/// threshold comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    /// The array's own id for this event; reused as document identity so
    /// re-ingesting the same alert overwrites rather than duplicates
    pub id: i64,
    pub category: String,
    pub current_severity: String,
    pub component_name: String,
    pub component_type: String,
    pub details: String,
    pub event: String,
    #[serde(default)]
    pub actual: String,
    #[serde(default)]
    pub expected: String,
    #[serde(flatten)]
    pub extra: StatsRecord,
}

/// One audit log entry (configuration change, login, etc.).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// The array's own id for this entry; reused as document identity
    pub id: i64,
    pub component_name: String,
    pub component_type: String,
    pub details: String,
    pub event: String,
    pub user: String,
    #[serde(flatten)]
    pub extra: StatsRecord,
}

/// One entry from the volume listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeListing {
    pub name: String,
    #[serde(flatten)]
    pub extra: StatsRecord,
}

impl AlertRecord {
    /// Flattens the typed record back into a field map for enrichment.
    pub fn into_record(self) -> StatsRecord {
        into_record(&self)
    }
}

impl AuditRecord {
    /// Flattens the typed record back into a field map for enrichment.
    pub fn into_record(self) -> StatsRecord {
        into_record(&self)
    }
}

fn into_record<T: Serialize>(record: &T) -> StatsRecord {
    match serde_json::to_value(record) {
        Ok(Value::Object(map)) => map,
        _ => StatsRecord::new(),
    }
}

/// The slice of the array management API the collector consumes.
///
/// Implemented by [`RestArrayClient`] in production and by a mock in tests.
/// Monitor endpoints return a one-element sequence of counter mappings;
/// space endpoints return a single mapping for the same entity.
#[async_trait]
pub trait ArrayApi: Send + Sync {
    /// Array-level performance counters (one-element sequence).
    async fn array_monitor(&self) -> Result<Vec<StatsRecord>, ClientError>;

    /// Array-level space statistics.
    async fn array_space(&self) -> Result<StatsRecord, ClientError>;

    /// Recent alert messages.
    async fn recent_messages(&self) -> Result<Vec<AlertRecord>, ClientError>;

    /// Audit log entries.
    async fn audit_log(&self) -> Result<Vec<AuditRecord>, ClientError>;

    /// All volumes on the array.
    async fn list_volumes(&self) -> Result<Vec<VolumeListing>, ClientError>;

    /// Per-volume performance counters (one-element sequence).
    async fn volume_monitor(&self, volume: &str) -> Result<Vec<StatsRecord>, ClientError>;

    /// Per-volume space statistics.
    async fn volume_space(&self, volume: &str) -> Result<StatsRecord, ClientError>;
}

/// HTTPS client for the array's management REST API
pub struct RestArrayClient {
    http: reqwest::Client,
    base_url: String,
}

impl RestArrayClient {
    /// Connects to an array and establishes an API session.
    ///
    /// # Arguments
    /// * `endpoint` - Base URL of the array, e.g. "https://array-1.example.com"
    /// * `api_token` - API token of a user on the array
    pub async fn connect(endpoint: &str, api_token: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .cookie_store(true)
            .build()?;

        let base_url = format!("{}/api/{}", endpoint.trim_end_matches('/'), API_VERSION);

        debug!("Establishing API session with {}", base_url);

        let response = http
            .post(format!("{}/auth/session", base_url))
            .json(&serde_json::json!({ "api_token": api_token }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::AuthFailed(response.status().as_u16()));
        }

        Ok(RestArrayClient { http, base_url })
    }

    /// Performs a GET against the session and returns the JSON payload.
    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, ClientError> {
        let response = self
            .http
            .get(format!("{}/{}", self.base_url, path))
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::UnexpectedStatus {
                path: path.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

/// Expects a JSON object payload.
fn expect_object(value: Value, path: &str) -> Result<StatsRecord, ClientError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ClientError::MalformedPayload {
            path: path.to_string(),
            reason: format!("expected an object, got {}", kind_of(&other)),
        }),
    }
}

/// Expects a JSON array of objects.
fn expect_object_list(value: Value, path: &str) -> Result<Vec<StatsRecord>, ClientError> {
    let Value::Array(items) = value else {
        return Err(ClientError::MalformedPayload {
            path: path.to_string(),
            reason: format!("expected an array, got {}", kind_of(&value)),
        });
    };

    items
        .into_iter()
        .map(|item| expect_object(item, path))
        .collect()
}

/// Decodes a JSON array element by element into typed records.
///
/// Elements that fail to decode (missing required fields, wrong types) are
/// logged and dropped; the rest of the listing is still returned.
fn decode_list<T: DeserializeOwned>(value: Value, path: &str) -> Result<Vec<T>, ClientError> {
    let Value::Array(items) = value else {
        return Err(ClientError::MalformedPayload {
            path: path.to_string(),
            reason: format!("expected an array, got {}", kind_of(&value)),
        });
    };

    let mut records = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value(item) {
            Ok(record) => records.push(record),
            Err(e) => warn!("Dropping malformed record from '{}': {}", path, e),
        }
    }

    Ok(records)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl ArrayApi for RestArrayClient {
    async fn array_monitor(&self) -> Result<Vec<StatsRecord>, ClientError> {
        let payload = self.get_json("array", &[("action", "monitor")]).await?;
        expect_object_list(payload, "array?action=monitor")
    }

    async fn array_space(&self) -> Result<StatsRecord, ClientError> {
        let payload = self.get_json("array", &[("space", "true")]).await?;
        expect_object(payload, "array?space=true")
    }

    async fn recent_messages(&self) -> Result<Vec<AlertRecord>, ClientError> {
        let payload = self.get_json("message", &[("recent", "true")]).await?;
        decode_list(payload, "message?recent=true")
    }

    async fn audit_log(&self) -> Result<Vec<AuditRecord>, ClientError> {
        let payload = self.get_json("message", &[("audit", "true")]).await?;
        decode_list(payload, "message?audit=true")
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeListing>, ClientError> {
        let payload = self.get_json("volume", &[]).await?;
        decode_list(payload, "volume")
    }

    async fn volume_monitor(&self, volume: &str) -> Result<Vec<StatsRecord>, ClientError> {
        let path = format!("volume/{}", volume);
        let payload = self.get_json(&path, &[("action", "monitor")]).await?;
        expect_object_list(payload, &path)
    }

    async fn volume_space(&self, volume: &str) -> Result<StatsRecord, ClientError> {
        let path = format!("volume/{}", volume);
        let payload = self.get_json(&path, &[("space", "true")]).await?;
        expect_object(payload, &path)
    }
}
