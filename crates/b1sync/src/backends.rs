//! 🔌 Backends: where the real I/O happens.
//!
//! 🚰 Source backends pour rows out of SAP, store backends scan and upsert documents.
//! And in between, we panic! (kidding, we use thiserror)
//!
//! 🎭 This module is the casting agency:
//! - [`Source`]: a paginated reader. SAP's Service Layer in production, a `VecDeque`
//!   of pages in tests.
//! - [`DocumentStore`]: the destination. Full-collection scan for reference maps,
//!   one batched insert-or-update per run.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::common::{Operation, SourceRecord};

pub(crate) mod http_store;
pub(crate) mod in_mem;
pub(crate) mod sap;

pub(crate) use http_store::HttpStore;
pub(crate) use in_mem::InMemoryStore;
#[cfg(test)]
pub(crate) use in_mem::InMemorySource;
pub(crate) use sap::{SapSession, SapSource};

// ===== Source Trait and fetch loop =====

/// 💀 Everything that can go wrong while reading from the source system.
///
/// All of these are fatal to the run. A truncated product list that *looks* complete
/// is worse than no product list, so nobody here swallows a page.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("login to SAP failed: {0}")]
    Login(String),
    #[error("transport failure requesting {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[error("malformed page from {url}: {source}")]
    Unmarshal {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot resolve '{link}' against the Service Layer root: {reason}")]
    BadLink { link: String, reason: String },
    /// ✂️ The first page(s) arrived, a later one did not. What we had is discarded.
    #[error("pagination aborted after {pages} page(s) and {records} record(s): {source}")]
    Aborted {
        pages: usize,
        records: usize,
        #[source]
        source: Box<FetchError>,
    },
}

/// 🚰 A source that produces pages of records.
///
/// # Contract
/// - `next_page` returns `Ok(Some(page))` while there is data, `Ok(None)` once the
///   cursor runs dry. An empty page with a next cursor is still `Some(vec![])`.
/// - Any `Err` ends the fetch. No retries live at this layer.
#[async_trait]
pub(crate) trait Source: std::fmt::Debug + Send {
    async fn next_page(&mut self) -> Result<Option<Vec<SourceRecord>>, FetchError>;
}

/// 🔄 Drain a source until the cursor is exhausted.
///
/// A failure on the very first page propagates as-is. A failure on any later page is
/// wrapped in [`FetchError::Aborted`] so the caller can tell "SAP is down" from
/// "SAP fell over on page 37".
pub(crate) async fn fetch_all<S>(source: &mut S) -> Result<Vec<SourceRecord>, FetchError>
where
    S: Source + ?Sized,
{
    let mut records = Vec::new();
    let mut pages = 0usize;
    loop {
        match source.next_page().await {
            Ok(Some(page)) => {
                pages += 1;
                debug!("📄 page {} brought {} record(s)", pages, page.len());
                records.extend(page);
            }
            Ok(None) => break,
            Err(err) if pages == 0 => return Err(err),
            Err(err) => {
                return Err(FetchError::Aborted {
                    pages,
                    records: records.len(),
                    source: Box::new(err),
                });
            }
        }
    }
    Ok(records)
}

// ===== DocumentStore Trait and Backend Enum =====

/// 💀 The store said no. Or said nothing. Or said something we could not parse.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("transport failure talking to the store at {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("store rejected {url} with {status}: {body}")]
    Rejected {
        url: String,
        status: u16,
        body: String,
    },
    #[error("malformed store response from {url}: {source}")]
    Unmarshal {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// 📊 What a bulk upsert did: how many documents matched an existing filter, how many
/// were freshly inserted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub matched: usize,
    pub upserted: usize,
}

/// 🕳️ The destination document store.
///
/// # Contract
/// - `scan` returns every document in the collection. Order is not promised.
/// - `bulk_upsert` applies every operation as an independent insert-or-update keyed
///   by its filter, in ONE request. An empty list is a no-op that never touches the
///   store. Partial application is possible; the error reports the aggregate.
#[async_trait]
pub(crate) trait DocumentStore: std::fmt::Debug + Send + Sync {
    async fn scan(&self, collection: &str) -> Result<Vec<SourceRecord>, SinkError>;

    async fn bulk_upsert(
        &self,
        collection: &str,
        operations: Vec<Operation>,
    ) -> Result<UpsertSummary, SinkError>;
}

/// 🎭 The many faces of a store. Dispatches to the concrete backend so jobs never care
/// whether documents land in RAM or on the other side of an HTTP call.
#[derive(Debug)]
pub(crate) enum StoreBackend {
    InMemory(InMemoryStore),
    Http(HttpStore),
}

#[async_trait]
impl DocumentStore for StoreBackend {
    async fn scan(&self, collection: &str) -> Result<Vec<SourceRecord>, SinkError> {
        match self {
            StoreBackend::InMemory(store) => store.scan(collection).await,
            StoreBackend::Http(store) => store.scan(collection).await,
        }
    }

    async fn bulk_upsert(
        &self,
        collection: &str,
        operations: Vec<Operation>,
    ) -> Result<UpsertSummary, SinkError> {
        match self {
            StoreBackend::InMemory(store) => store.bulk_upsert(collection, operations).await,
            StoreBackend::Http(store) => store.bulk_upsert(collection, operations).await,
        }
    }
}
