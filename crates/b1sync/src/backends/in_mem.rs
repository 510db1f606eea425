//! # Previously, on b1sync...
//!
//! 🎬 The data was trapped in SAP. The store was across the network. Someone needed a
//! backend so simple it lives entirely in RAM, gone the moment you blink.
//!
//! That someone was this module.
//!
//! - [`InMemoryStore`] implements [`DocumentStore`] with real upsert semantics behind an
//!   `Arc<Mutex<...>>`, so tests can seed collections, run a job, and peek at what
//!   arrived. It also backs `store = "InMemory"` for dry runs against a live SAP.
//! - [`InMemorySource`] replays a scripted list of pages (or failures). Tests only.
//!
//! ✅ No network calls. No disk I/O. Just vibes and heap memory. 🦆

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::backends::{DocumentStore, SinkError, UpsertSummary};
use crate::common::{Operation, SourceRecord};

#[cfg(test)]
pub(crate) use scripted::InMemorySource;

/// 📦 A document store that never forgets. Until the process exits.
///
/// Clone-able because tests need to peek inside after handing a clone to the job.
/// Every clone shares the same collections and the same write counter.
#[derive(Debug, Default, Clone)]
pub(crate) struct InMemoryStore {
    collections: Arc<Mutex<HashMap<String, Vec<SourceRecord>>>>,
    /// 🧮 number of `bulk_upsert` calls that actually reached the collections
    writes: Arc<AtomicUsize>,
}

impl InMemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// 🌱 Plant documents in a collection before the run, like a gardener with fixtures.
    #[cfg(test)]
    pub(crate) async fn seed(&self, collection: &str, documents: Vec<SourceRecord>) {
        self.collections
            .lock()
            .await
            .entry(collection.to_string())
            .or_default()
            .extend(documents);
    }

    #[cfg(test)]
    pub(crate) async fn documents(&self, collection: &str) -> Vec<SourceRecord> {
        self.collections
            .lock()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

// -- 🔍 a document matches when every filter field is present and equal
fn matches_filter(document: &SourceRecord, operation: &Operation) -> bool {
    operation
        .filter
        .iter()
        .all(|(field, expected)| document.get(field) == Some(expected))
}

fn apply(documents: &mut Vec<SourceRecord>, operation: Operation) -> bool {
    if let Some(existing) = documents.iter_mut().find(|doc| matches_filter(doc, &operation)) {
        let mut fields = std::mem::take(existing).into_fields();
        fields.extend(operation.set);
        *existing = SourceRecord::new(fields);
        return true;
    }

    // -- 🆕 insert: filter first, then insert-time defaults, then the $set payload on top
    let Operation {
        filter,
        set,
        set_on_insert,
    } = operation;
    let mut fields = filter;
    fields.extend(set_on_insert);
    fields.extend(set);
    documents.push(SourceRecord::new(fields));
    false
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn scan(&self, collection: &str) -> Result<Vec<SourceRecord>, SinkError> {
        Ok(self
            .collections
            .lock()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default())
    }

    async fn bulk_upsert(
        &self,
        collection: &str,
        operations: Vec<Operation>,
    ) -> Result<UpsertSummary, SinkError> {
        if operations.is_empty() {
            return Ok(UpsertSummary::default());
        }

        let mut collections = self.collections.lock().await;
        let documents = collections.entry(collection.to_string()).or_default();
        let mut summary = UpsertSummary::default();
        for operation in operations {
            if apply(documents, operation) {
                summary.matched += 1;
            } else {
                summary.upserted += 1;
            }
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(summary)
    }
}
