//! Remote document store HTTP client.
//!
//! Provides authenticated JSON communication with the document store used
//! for health checks and the per-document reads/writes of the sync engine.

use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Default timeout for API requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout used specifically for the lightweight health probe.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

const API_KEY_HEADER: &str = "X-POS-API-Key";

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the store base URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

/// Percent-encode a path segment (document ids, collection names).
pub fn percent_encode(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len());
    for b in input.bytes() {
        let is_unreserved =
            b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.' || b == b'~';
        if is_unreserved {
            encoded.push(b as char);
        } else {
            encoded.push_str(&format!("%{b:02X}"));
        }
    }
    encoded
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach document store at {url}");
    }
    if err.is_timeout() {
        return format!("Connection to {url} timed out");
    }
    if err.is_builder() {
        return format!("Invalid document store URL: {url}");
    }
    format!("Network error communicating with {url}: {err}")
}

/// Convert an HTTP status code into a user-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "API key is invalid or expired".to_string(),
        403 => "Terminal not authorized".to_string(),
        404 => "Document store endpoint not found".to_string(),
        s if s >= 500 => format!("Document store server error (HTTP {s})"),
        s => format!("Unexpected response from document store (HTTP {s})"),
    }
}

/// A 404 counts as success when the caller tolerates a missing document
/// (idempotent deletes).
fn is_missing(status: StatusCode, missing_ok: bool) -> bool {
    missing_ok && status == StatusCode::NOT_FOUND
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ApiClient {
    base: String,
    api_key: Option<String>,
    client: Client,
}

impl ApiClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {e}"))?;
        Ok(Self {
            base: normalize_base_url(base_url),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// Perform an authenticated request.
    ///
    /// `path` includes the leading slash. Returns `Ok(None)` for empty bodies,
    /// and also for 404 when `missing_ok` is set.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        missing_ok: bool,
    ) -> Result<Option<Value>, String> {
        let full_url = format!("{}{path}", self.base);
        let mut req = self
            .client
            .request(method.clone(), &full_url)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            req = req.header(API_KEY_HEADER, key);
        }
        if let Some(b) = body {
            req = req.json(b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.base, &e))?;
        let status = resp.status();
        debug!(%method, path, status = status.as_u16(), "document store response");

        if is_missing(status, missing_ok) {
            return Ok(None);
        }

        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body_text)
                .ok()
                .and_then(|json| {
                    json.get("error")
                        .or_else(|| json.get("message"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| status_error(status));
            return Err(format!("{message} (HTTP {})", status.as_u16()));
        }

        let body_text = resp.text().await.unwrap_or_default();
        if body_text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&body_text)
            .map(Some)
            .map_err(|e| format!("Invalid JSON from document store: {e}"))
    }

    /// Lightweight reachability check: `HEAD {base}/health`.
    pub async fn health(&self) -> bool {
        let url = format!("{}/health", self.base);
        let start = Instant::now();
        let mut req = self.client.head(&url).timeout(HEALTH_TIMEOUT);
        if let Some(key) = &self.api_key {
            req = req.header(API_KEY_HEADER, key);
        }
        match req.send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(
                    latency_ms = start.elapsed().as_millis() as u64,
                    "health probe passed"
                );
                true
            }
            Ok(resp) => {
                info!(status = resp.status().as_u16(), "health probe rejected");
                false
            }
            Err(e) => {
                debug!(error = %friendly_error(&self.base, &e), "health probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("store.example.com/"), "https://store.example.com");
        assert_eq!(normalize_base_url("localhost:8080//"), "http://localhost:8080");
        assert_eq!(
            normalize_base_url(" http://10.0.0.2/v1/ "),
            "http://10.0.0.2/v1"
        );
    }

    #[test]
    fn test_percent_encode_keeps_unreserved() {
        assert_eq!(percent_encode("P_abc-1.2~"), "P_abc-1.2~");
        assert_eq!(percent_encode("a b/c"), "a%20b%2Fc");
    }

    #[test]
    fn test_status_error_messages() {
        assert_eq!(status_error(StatusCode::UNAUTHORIZED), "API key is invalid or expired");
        assert_eq!(
            status_error(StatusCode::SERVICE_UNAVAILABLE),
            "Document store server error (HTTP 503)"
        );
    }

    #[test]
    fn test_not_found_is_success_only_when_tolerated() {
        assert!(is_missing(StatusCode::NOT_FOUND, true));
        assert!(!is_missing(StatusCode::NOT_FOUND, false));
        assert!(!is_missing(StatusCode::INTERNAL_SERVER_ERROR, true));
        assert!(!is_missing(StatusCode::OK, true));
    }

    #[test]
    fn test_blank_api_key_is_dropped() {
        let client = ApiClient::new("localhost:9000", Some("  ".into())).unwrap();
        assert!(client.api_key.is_none());
        assert_eq!(client.base_url(), "http://localhost:9000");
    }
}
