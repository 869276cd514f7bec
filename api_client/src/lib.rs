//! HTTP clients for the backing object storage and record store.

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, LAST_MODIFIED};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiClientError {
    #[error("Request Error: {0}")]
    RequestError(String),
    #[error("Storage API Error: {0}")]
    StorageApiError(String),
    #[error("Record Store Error: {0}")]
    RecordStoreError(String),
    #[error("Other Error: {0}")]
    Other(String),
}

/// One object returned by a storage listing. `created_at` is a hint from the
/// listing, not an authoritative capture time.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ObjectInfo {
    pub name: String,
    pub id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListObjectsRequest<'a> {
    prefix: &'a str,
    limit: usize,
    offset: usize,
    sort_by: SortBy<'a>,
}

#[derive(Debug, Serialize)]
struct SortBy<'a> {
    column: &'a str,
    order: &'a str,
}

/// Client for the object storage service (list, download, head probe).
#[derive(Debug, Clone)]
pub struct StorageClient {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl StorageClient {
    pub fn new(base_url: String, anon_key: String) -> Self {
        StorageClient {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key,
        }
    }

    fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(v) = HeaderValue::from_str(&self.anon_key) {
            headers.insert("apikey", v);
        }
        if let Ok(v) = HeaderValue::from_str(&format!("Bearer {}", self.anon_key)) {
            headers.insert(AUTHORIZATION, v);
        }
        headers
    }

    /// List one page of objects under `prefix` in `bucket`. A page shorter
    /// than `limit` signals the end of the listing.
    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self)))]
    pub async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ObjectInfo>, ApiClientError> {
        let url = format!("{}/storage/v1/object/list/{}", self.base_url, bucket);
        let body = ListObjectsRequest {
            prefix,
            limit,
            offset,
            sort_by: SortBy { column: "name", order: "asc" },
        };

        let response = self
            .client
            .post(&url)
            .headers(self.auth_headers())
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiClientError::RequestError(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ApiClientError::StorageApiError(error_text));
        }

        response
            .json::<Vec<ObjectInfo>>()
            .await
            .map_err(|e| ApiClientError::RequestError(e.to_string()))
    }

    /// Compute the public retrieval locator for an object. Pure string
    /// construction; a bad path surfaces as a 404 at fetch time, not here.
    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.base_url, bucket, path)
    }

    /// Fetch the full payload of an object.
    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self)))]
    pub async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>, ApiClientError> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, path);
        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers())
            .send()
            .await
            .map_err(|e| ApiClientError::RequestError(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ApiClientError::StorageApiError(error_text));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiClientError::RequestError(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    /// Metadata-only probe against a resource locator. Returns the
    /// `Last-Modified` header value if the server sent one.
    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self)))]
    pub async fn head_probe(&self, url: &str) -> Result<Option<String>, ApiClientError> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| ApiClientError::RequestError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ApiClientError::StorageApiError(format!(
                "head probe returned {}",
                response.status()
            )));
        }

        Ok(response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string()))
    }
}

/// One consumption record, keyed uniquely by entry id.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConsumptionRow {
    pub id: String,
    pub consumed: bool,
    pub timestamp: DateTime<Utc>,
}

/// Client for the record store holding per-entry consumption flags.
#[derive(Debug, Clone)]
pub struct RecordStoreClient {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    table: String,
}

impl RecordStoreClient {
    pub fn new(base_url: String, anon_key: String) -> Self {
        RecordStoreClient {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key,
            table: "downloads".to_string(),
        }
    }

    fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(v) = HeaderValue::from_str(&self.anon_key) {
            headers.insert("apikey", v);
        }
        if let Ok(v) = HeaderValue::from_str(&format!("Bearer {}", self.anon_key)) {
            headers.insert(AUTHORIZATION, v);
        }
        headers
    }

    /// Fetch all consumption records.
    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self)))]
    pub async fn select_consumption(&self) -> Result<Vec<ConsumptionRow>, ApiClientError> {
        let url = format!(
            "{}/rest/v1/{}?select=id,consumed,timestamp",
            self.base_url, self.table
        );
        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers())
            .send()
            .await
            .map_err(|e| ApiClientError::RequestError(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ApiClientError::RecordStoreError(error_text));
        }

        response
            .json::<Vec<ConsumptionRow>>()
            .await
            .map_err(|e| ApiClientError::RequestError(e.to_string()))
    }

    /// Upsert one consumption record. Keyed by id, so repeated upserts for
    /// the same id are safe.
    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self)))]
    pub async fn upsert_consumption(&self, row: &ConsumptionRow) -> Result<(), ApiClientError> {
        let url = format!("{}/rest/v1/{}", self.base_url, self.table);
        let response = self
            .client
            .post(&url)
            .headers(self.auth_headers())
            .header(CONTENT_TYPE, "application/json")
            .header("Prefer", "resolution=merge-duplicates")
            .json(&vec![row])
            .send()
            .await
            .map_err(|e| ApiClientError::RequestError(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ApiClientError::RecordStoreError(error_text));
        }

        Ok(())
    }
}
