//! Management-plane HTTP client
//!
//! - `GET {base}/fleets/{selector}/endpoints` → `{"endpoints": [{"id": "web-1"}, ...]}`
//! - `GET {base}/endpoints/{id}/health` → `{"heartbeat": 1718000000, "status": "healthy"}`
//!
//! Bodies are decoded into typed structs; a body that does not decode is an
//! error, never a silent default.

use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{EndpointDirectory, EndpointHealthSnapshot, HealthSource, HealthStatus, ManagementError};

/// Error bodies are truncated to this many characters.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Deserialize)]
struct EndpointListBody {
    endpoints: Vec<EndpointEntry>,
}

#[derive(Debug, Deserialize)]
struct EndpointEntry {
    #[serde(default, alias = "name")]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HealthBody {
    heartbeat: Heartbeat,
    status: HealthStatus,
}

/// Epoch seconds, or an RFC 3339 timestamp.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Heartbeat {
    Epoch(i64),
    Timestamp(String),
}

/// HTTP client for discovery and health reads.
#[derive(Debug, Clone)]
pub struct ManagementClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl ManagementClient {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, ManagementError> {
        let base_url = Url::parse(base_url.trim())
            .map_err(|e| ManagementError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
            return Err(ManagementError::InvalidUrl(base_url.to_string()));
        }

        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ManagementError::Http(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    /// Append percent-encoded path segments to the base URL.
    fn url_for(&self, segments: &[&str]) -> Result<Url, ManagementError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ManagementError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        context: &str,
    ) -> Result<T, ManagementError> {
        debug!("[management] GET {}", url);

        let mut request = self.http.get(url.clone());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ManagementError::Http(format!("GET {}: {}", url, e)))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ManagementError::Http(format!("reading {}: {}", url, e)))?;

        if !status.is_success() {
            let mut text = String::from_utf8_lossy(&body).into_owned();
            if text.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                text.truncate(cut);
            }
            return Err(ManagementError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        decode(&body, context)
    }
}

#[async_trait]
impl HealthSource for ManagementClient {
    async fn get_health(&self, endpoint_id: &str) -> Result<EndpointHealthSnapshot, ManagementError> {
        let url = self.url_for(&["endpoints", endpoint_id, "health"])?;
        let body: HealthBody = self
            .get_json(url, &format!("health for {}", endpoint_id))
            .await?;
        snapshot_from_body(endpoint_id, body)
    }
}

#[async_trait]
impl EndpointDirectory for ManagementClient {
    async fn list_endpoints(&self, selector: &str) -> Result<Vec<String>, ManagementError> {
        let url = self.url_for(&["fleets", selector, "endpoints"])?;
        let body: EndpointListBody = self
            .get_json(url, &format!("endpoint list for {}", selector))
            .await?;
        Ok(endpoint_ids(selector, body))
    }
}

fn decode<T: DeserializeOwned>(body: &[u8], context: &str) -> Result<T, ManagementError> {
    serde_json::from_slice(body).map_err(|source| ManagementError::Decode {
        context: context.to_string(),
        source,
    })
}

fn endpoint_ids(selector: &str, body: EndpointListBody) -> Vec<String> {
    let total = body.endpoints.len();
    let ids: Vec<String> = body
        .endpoints
        .into_iter()
        .filter_map(|entry| entry.id.map(|id| id.trim().to_string()))
        .filter(|id| !id.is_empty())
        .collect();

    if ids.len() < total {
        warn!(
            "[management] fleet {}: skipped {} endpoint entr(ies) without an id",
            selector,
            total - ids.len()
        );
    }
    ids
}

fn snapshot_from_body(
    endpoint_id: &str,
    body: HealthBody,
) -> Result<EndpointHealthSnapshot, ManagementError> {
    let heartbeat_timestamp = match body.heartbeat {
        Heartbeat::Epoch(secs) => secs,
        Heartbeat::Timestamp(raw) => DateTime::parse_from_rfc3339(raw.trim())
            .map(|ts| ts.timestamp())
            .map_err(|e| ManagementError::InvalidField {
                context: format!("health for {}", endpoint_id),
                message: format!("heartbeat '{}': {}", raw, e),
            })?,
    };

    Ok(EndpointHealthSnapshot::new(
        endpoint_id,
        heartbeat_timestamp,
        body.status,
    ))
}
