//! 📡 The HTTP document store: the low-code platform's REST face.
//!
//! Two endpoints, both per collection:
//! - `GET  {url}/{collection}` → `{ "data": [ ...documents ] }`, the full scan
//! - `POST {url}/{collection}/bulk-upsert` with `{ "operations": [ {filter, set,
//!   set_on_insert}, ... ] }` → `{ "matched": n, "upserted": m }`
//!
//! One bulk request per run. No retries, no per-operation rollback: whatever the store
//! persisted stays persisted, and a non-2xx comes back as [`SinkError::Rejected`]. 🦆

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::backends::{DocumentStore, SinkError, UpsertSummary};
use crate::common::{Operation, SourceRecord};

#[derive(Debug, Deserialize, Clone)]
pub struct HttpStoreConfig {
    /// 📡 API root, e.g. `https://api.example.io/v2/collections`
    pub url: String,
    /// 🔒 sent as `X-API-KEY` when present
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    60
}

#[derive(Deserialize)]
struct ScanResponse {
    #[serde(default)]
    data: Vec<SourceRecord>,
}

#[derive(Serialize)]
struct BulkUpsertRequest<'a> {
    operations: &'a [Operation],
}

#[derive(Deserialize)]
struct BulkUpsertResponse {
    #[serde(default)]
    matched: usize,
    #[serde(default)]
    upserted: usize,
}

#[derive(Debug)]
pub(crate) struct HttpStore {
    client: reqwest::Client,
    config: HttpStoreConfig,
}

impl HttpStore {
    pub(crate) fn new(config: HttpStoreConfig) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("💀 The store's HTTP client refused to be born.")?;
        Ok(Self { client, config })
    }

    fn collection_url(&self, collection: &str, suffix: &str) -> String {
        format!("{}/{}{}", self.config.url.trim_end_matches('/'), collection, suffix)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.api_key {
            Some(ref api_key) => request.header("X-API-KEY", api_key),
            None => request,
        }
    }

    // -- 📬 send, demand a 2xx, hand back the raw body
    async fn exchange(
        &self,
        url: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Vec<u8>, SinkError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|source| SinkError::Transport {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        let body = response.bytes().await.map_err(|source| SinkError::Transport {
            url: url.to_string(),
            source,
        })?;
        if !status.is_success() {
            return Err(SinkError::Rejected {
                url: url.to_string(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(body.to_vec())
    }
}

#[async_trait]
impl DocumentStore for HttpStore {
    async fn scan(&self, collection: &str) -> Result<Vec<SourceRecord>, SinkError> {
        let url = self.collection_url(collection, "");
        trace!("🔭 scanning {}", url);
        let body = self.exchange(&url, self.client.get(&url)).await?;
        let scan: ScanResponse =
            serde_json::from_slice(&body).map_err(|source| SinkError::Unmarshal {
                url: url.clone(),
                source,
            })?;
        debug!("🔭 scanned {} document(s) from '{}'", scan.data.len(), collection);
        Ok(scan.data)
    }

    async fn bulk_upsert(
        &self,
        collection: &str,
        operations: Vec<Operation>,
    ) -> Result<UpsertSummary, SinkError> {
        if operations.is_empty() {
            debug!("🫙 nothing to upsert into '{}', the store is spared a request", collection);
            return Ok(UpsertSummary::default());
        }

        let url = self.collection_url(collection, "/bulk-upsert");
        let request = self.client.post(&url).json(&BulkUpsertRequest {
            operations: &operations,
        });
        let body = self.exchange(&url, request).await?;
        let response: BulkUpsertResponse =
            serde_json::from_slice(&body).map_err(|source| SinkError::Unmarshal {
                url: url.clone(),
                source,
            })?;
        Ok(UpsertSummary {
            matched: response.matched,
            upserted: response.upserted,
        })
    }
}
