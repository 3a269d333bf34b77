//! Elasticsearch-compatible HTTP store
//!
//! Bulk writes go to `POST {url}/{index}/_bulk` as NDJSON, one `index`
//! action line plus one source line per document, keyed by document id so
//! repeated writes overwrite. Queries go to `POST {url}/{index}/_search`.
//!
//! # Example
//!
//! ```ignore
//! let store = ElasticsearchStore::new("http://localhost:9200", Duration::from_secs(180))?
//!     .header("Authorization", "ApiKey abc123");
//! ```

use crate::document::NormalizedDocument;
use crate::error::StoreError;
use crate::store::{DocumentStore, ItemOutcome, SearchResponse};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Default connection timeout in seconds
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Bulk response envelope
#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItem>>,
}

/// One entry of `items`, keyed by action name
#[derive(Debug, Deserialize)]
struct BulkItem {
    #[serde(rename = "_id", default)]
    id: Option<String>,
    status: u16,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl BulkItem {
    fn outcome(&self) -> ItemOutcome {
        ItemOutcome::from_status(self.status, self.reason())
    }

    fn reason(&self) -> String {
        match &self.error {
            Some(serde_json::Value::Object(err)) => {
                let kind = err.get("type").and_then(|v| v.as_str()).unwrap_or("error");
                match err.get("reason").and_then(|v| v.as_str()) {
                    Some(reason) => format!("{kind}: {reason}"),
                    None => kind.to_string(),
                }
            }
            Some(other) => other.to_string(),
            None => format!("status {}", self.status),
        }
    }
}

/// HTTP client for an Elasticsearch-compatible search engine
pub struct ElasticsearchStore {
    client: Client,
    base_url: String,
    headers: HashMap<String, String>,
}

impl ElasticsearchStore {
    /// Create a store for the given base URL.
    ///
    /// `request_timeout` bounds every request end to end.
    ///
    /// # Errors
    /// Returns `StoreError::Init` if the HTTP client cannot be created
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS).min(request_timeout))
            .build()
            .map_err(|e| StoreError::Init(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            headers: HashMap::new(),
        })
    }

    /// Add a custom header to all requests
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Base URL without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, index: &str, endpoint: &str) -> String {
        format!("{}/{}/{}", self.base_url, index, endpoint)
    }

    fn with_headers(&self, mut request: RequestBuilder) -> RequestBuilder {
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        request
    }

    /// Send a request, mapping transport failures and non-2xx statuses
    async fn send(&self, request: RequestBuilder, url: &str) -> Result<Response, StoreError> {
        let response = self.with_headers(request).send().await.map_err(|e| {
            if e.is_timeout() {
                warn!(url = %url, error = %e, "Store request timed out");
                StoreError::Timeout(format!("{url}: {e}"))
            } else {
                error!(url = %url, error = %e, "Store connection failed");
                StoreError::Connection(format!("Failed to connect to {url}: {e}"))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!(url = %url, status = %status, body = %body, "Store returned error status");
        Err(StoreError::Http {
            status: status.as_u16(),
            body,
        })
    }

    async fn read_body(response: Response) -> Result<String, StoreError> {
        response.text().await.map_err(|e| {
            if e.is_timeout() {
                StoreError::Timeout(format!("reading response: {e}"))
            } else {
                StoreError::Connection(format!("reading response: {e}"))
            }
        })
    }
}

/// Encode documents as a bulk NDJSON body with a trailing newline
pub fn encode_bulk(docs: &[&NormalizedDocument]) -> Result<String, StoreError> {
    let mut payload = String::with_capacity(docs.len() * 512);
    for doc in docs {
        let action = serde_json::json!({ "index": { "_id": doc.document_id } });
        payload.push_str(&action.to_string());
        payload.push('\n');
        let body = doc
            .to_json()
            .map_err(|e| StoreError::Encode(format!("{}: {e}", doc.document_id)))?;
        payload.push_str(&body);
        payload.push('\n');
    }
    Ok(payload)
}

/// Map a bulk response body to per-document outcomes in request order
pub fn parse_bulk_response(body: &str, expected: usize) -> Result<Vec<ItemOutcome>, StoreError> {
    let response: BulkResponse =
        serde_json::from_str(body).map_err(|e| StoreError::Decode(format!("bulk response: {e}")))?;

    if response.items.len() != expected {
        return Err(StoreError::Decode(format!(
            "bulk response has {} items for {expected} documents",
            response.items.len()
        )));
    }

    let outcomes: Vec<ItemOutcome> = response
        .items
        .iter()
        .map(|entry| match entry.values().next() {
            Some(item) => {
                let outcome = item.outcome();
                if !outcome.is_success() {
                    debug!(
                        id = item.id.as_deref().unwrap_or("-"),
                        status = item.status,
                        "Bulk item failed"
                    );
                }
                outcome
            }
            None => ItemOutcome::Retryable("empty bulk item".to_string()),
        })
        .collect();

    if !response.errors && outcomes.iter().any(|o| !o.is_success()) {
        debug!("Bulk response reported no errors but carried failed items");
    }
    Ok(outcomes)
}

/// Extract `took` and the hit total from a search response body.
///
/// `hits.total` may be an object with `value` or a bare integer depending on
/// the server version.
pub fn parse_search_response(body: &str) -> Result<SearchResponse, StoreError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| StoreError::Decode(format!("search response: {e}")))?;
    let total = &value["hits"]["total"];
    Ok(SearchResponse {
        took_ms: value["took"].as_u64(),
        total_hits: total["value"].as_u64().or_else(|| total.as_u64()),
    })
}

#[async_trait]
impl DocumentStore for ElasticsearchStore {
    fn name(&self) -> &'static str {
        "elasticsearch"
    }

    async fn bulk_index(
        &self,
        index: &str,
        docs: &[&NormalizedDocument],
    ) -> Result<Vec<ItemOutcome>, StoreError> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.url(index, "_bulk");
        let payload = encode_bulk(docs)?;
        let request = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(payload);

        let response = self.send(request, &url).await?;
        let body = Self::read_body(response).await?;
        let outcomes = parse_bulk_response(&body, docs.len())?;

        debug!(
            url = %url,
            count = docs.len(),
            failed = outcomes.iter().filter(|o| !o.is_success()).count(),
            "Bulk request delivered"
        );
        Ok(outcomes)
    }

    async fn search(
        &self,
        index: &str,
        body: &serde_json::Value,
    ) -> Result<SearchResponse, StoreError> {
        let url = self.url(index, "_search");
        let response = self.send(self.client.post(&url).json(body), &url).await?;
        let body = Self::read_body(response).await?;
        parse_search_response(&body)
    }

    async fn clear_cache(&self, index: &str) -> Result<(), StoreError> {
        let url = self.url(index, "_cache/clear");
        self.send(self.client.post(&url), &url).await?;
        debug!(url = %url, "Index cache cleared");
        Ok(())
    }

    async fn health(&self) -> bool {
        match self.with_headers(self.client.get(&self.base_url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url = %self.base_url, error = %e, "Health check failed");
                false
            }
        }
    }
}
