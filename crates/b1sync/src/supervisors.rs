//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 "In a world where product catalogues grow without mercy..."
//! 🎬 "One supervisor dared to split them eight ways."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The Supervisor module: part middle manager, part helicopter parent.
//!
//! One reconciliation, start to finish:
//! 1. cut the records into contiguous shards ([`shard_bounds`])
//! 2. spawn one [`ShardWorker`] per shard, all sharing one locked [`PoolOutput`]
//! 3. join every worker (a panic is an error, not a shrug)
//! 4. flush every operation to the store in ONE bulk write
//! 5. hand the tally to the report
//!
//! ⚠️ Workers are private. The world talks to the Supervisor, the Supervisor talks to
//! the workers. Like Fight Club, but for async tasks.

mod workers;

use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinError;
use tracing::{debug, info};

use crate::app_config::RuntimeConfig;
use crate::backends::DocumentStore;
use crate::common::SourceRecord;
use crate::progress::RunProgress;
use crate::report::RunResult;
use crate::transforms::Transform;
use workers::{PoolOutput, ShardWorker, Worker};

/// 💀 The pool itself broke, as opposed to a row inside it.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker {worker} panicked: {reason}")]
    WorkerPanicked { worker: usize, reason: String },
    #[error("worker {worker} failed: {reason}")]
    WorkerFailed { worker: usize, reason: String },
}

/// ✂️ Contiguous shards for `n` records over `workers` workers.
///
/// `size = ceil(n / workers)`, shard `i` is `[min(i*size, n), min((i+1)*size, n))`.
/// Always returns exactly `max(workers, 1)` ranges; trailing ones may be empty
/// (17 over 8 → sizes `3,3,3,3,3,2,0,0`). Together they cover `0..n` once, in order.
pub(crate) fn shard_bounds(n: usize, workers: usize) -> Vec<Range<usize>> {
    let workers = workers.max(1);
    let size = n.div_ceil(workers);
    (0..workers)
        .map(|i| (i * size).min(n)..((i + 1) * size).min(n))
        .collect()
}

/// 🧵 Fan `records` out over `worker_count` workers and wait for all of them.
pub(crate) async fn run_pool(
    records: Vec<SourceRecord>,
    transform: Arc<dyn Transform>,
    worker_count: usize,
    progress: &RunProgress,
) -> Result<PoolOutput, PoolError> {
    let records = Arc::new(records);
    let output = Arc::new(Mutex::new(PoolOutput::default()));

    let handles: Vec<_> = shard_bounds(records.len(), worker_count)
        .into_iter()
        .enumerate()
        .map(|(index, shard)| {
            ShardWorker::new(
                index,
                Arc::clone(&records),
                shard,
                Arc::clone(&transform),
                Arc::clone(&output),
                progress.clone(),
            )
            .start()
        })
        .collect();

    for (worker, joined) in join_all(handles).await.into_iter().enumerate() {
        settle(worker, joined)?;
    }

    let mut output = output.lock().await;
    Ok(std::mem::take(&mut *output))
}

// -- ⚖️ one joined worker → fine, failed, or panicked
fn settle(worker: usize, joined: Result<anyhow::Result<()>, JoinError>) -> Result<(), PoolError> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(PoolError::WorkerFailed {
            worker,
            reason: format!("{err:#}"),
        }),
        Err(join_error) => Err(PoolError::WorkerPanicked {
            worker,
            reason: join_error.to_string(),
        }),
    }
}

/// 📦 Runs reconciliations. Knows how many workers to hire and whether anyone is
/// watching the progress bar.
#[derive(Debug, Clone)]
pub(crate) struct Supervisor {
    worker_count: usize,
    show_progress: bool,
}

impl Supervisor {
    pub(crate) fn new(runtime: &RuntimeConfig) -> Self {
        Self {
            worker_count: runtime.worker_count,
            show_progress: runtime.progress,
        }
    }

    /// 🔄 Pool → flush → report, for one job and one collection.
    ///
    /// Errors here are fatal (pool breakage, store refusal). Failed rows are not: they
    /// come back inside the [`RunResult`].
    pub(crate) async fn reconcile<S>(
        &self,
        job: &str,
        collection: &str,
        records: Vec<SourceRecord>,
        transform: Arc<dyn Transform>,
        store: &S,
    ) -> anyhow::Result<RunResult>
    where
        S: DocumentStore + ?Sized,
    {
        let started = Instant::now();
        let total = records.len();
        let progress = if self.show_progress {
            RunProgress::new(job, total)
        } else {
            RunProgress::hidden(total)
        };

        info!("🧵 {}: {} record(s) over {} worker(s)", job, total, self.worker_count.max(1));
        let output = run_pool(records, transform, self.worker_count, &progress)
            .await
            .with_context(|| format!("💀 {job}: the worker pool fell apart"))?;
        progress.finish();

        let PoolOutput {
            operations,
            errors,
            skipped,
        } = output;
        let succeeded = operations.len();
        debug!(
            "🧺 {}: {} operation(s), {} skipped, {} failed after {:?}",
            job,
            succeeded,
            skipped,
            errors.len(),
            started.elapsed()
        );

        let summary = store
            .bulk_upsert(collection, operations)
            .await
            .with_context(|| {
                format!("💀 {job}: bulk upsert of {succeeded} operation(s) into '{collection}' failed")
            })?;
        info!(
            "📦 {}: '{}' matched {}, inserted {}",
            job, collection, summary.matched, summary.upserted
        );

        let result =
            RunResult::summarize(job, total, succeeded, skipped, errors, started.elapsed());
        result.log();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::backends::{InMemoryStore, SinkError, UpsertSummary};
    use crate::common::{ErrorRecord, Operation, record};
    use crate::enrichment::stub::CountingEnricher;
    use crate::reference::ReferenceMap;
    use crate::transforms::{Outcome, ProductTransform, object};
    use async_trait::async_trait;
    use serde_json::json;

    fn quiet_supervisor(worker_count: usize) -> Supervisor {
        Supervisor::new(&RuntimeConfig {
            worker_count,
            progress: false,
        })
    }

    /// 🧪 Upserts `{n}` after yielding, so workers genuinely interleave on the lock.
    #[derive(Debug)]
    struct Echo;

    #[async_trait]
    impl Transform for Echo {
        async fn transform(&self, record: &SourceRecord) -> Outcome {
            tokio::task::yield_now().await;
            Outcome::Upsert(Operation::new(
                object(json!({ "n": record.int_field("n") })),
                Default::default(),
                Default::default(),
            ))
        }
    }

    #[derive(Debug)]
    struct Verdicts;

    #[async_trait]
    impl Transform for Verdicts {
        async fn transform(&self, record: &SourceRecord) -> Outcome {
            match record.int_field("n") % 4 {
                0 | 1 => Outcome::Upsert(Operation::default()),
                2 => Outcome::Skip,
                _ => Outcome::Failed(ErrorRecord::new(record.clone(), "unlucky")),
            }
        }
    }

    #[derive(Debug)]
    struct Grenade;

    #[async_trait]
    impl Transform for Grenade {
        async fn transform(&self, record: &SourceRecord) -> Outcome {
            if record.int_field("n") == 13 {
                panic!("💥 thirteen");
            }
            Outcome::Skip
        }
    }

    /// 🧪 A store that scans fine and refuses every write, like a DBA on a Friday.
    #[derive(Debug)]
    struct RefusingStore;

    #[async_trait]
    impl DocumentStore for RefusingStore {
        async fn scan(&self, _collection: &str) -> Result<Vec<SourceRecord>, SinkError> {
            Ok(vec![])
        }

        async fn bulk_upsert(
            &self,
            collection: &str,
            _operations: Vec<Operation>,
        ) -> Result<UpsertSummary, SinkError> {
            Err(SinkError::Rejected {
                url: format!("https://store.test/{collection}/bulk-upsert"),
                status: 500,
                body: "write concern failed".to_string(),
            })
        }
    }

    fn numbered(n: usize) -> Vec<SourceRecord> {
        (0..n).map(|i| record(json!({ "n": i }))).collect()
    }

    fn products(n: usize) -> Vec<SourceRecord> {
        (0..n)
            .map(|i| record(json!({ "ItemCode": format!("P-{i}"), "ItemName": format!("product {i}") })))
            .collect()
    }

    fn product_transform(enricher: Arc<CountingEnricher>, enriched: ReferenceMap) -> Arc<dyn Transform> {
        Arc::new(ProductTransform::new(
            enricher,
            Arc::new(enriched),
            Arc::new(ReferenceMap::default()),
            Arc::new(ReferenceMap::default()),
        ))
    }

    #[test]
    fn the_one_where_seventeen_records_meet_eight_workers() {
        let the_sizes: Vec<usize> = shard_bounds(17, 8).iter().map(|r| r.len()).collect();
        assert_eq!(the_sizes, vec![3, 3, 3, 3, 3, 2, 0, 0]);
    }

    #[test]
    fn the_one_where_zero_records_still_get_eight_empty_shards() {
        let the_shards = shard_bounds(0, 8);
        assert_eq!(the_shards.len(), 8);
        assert!(the_shards.iter().all(|shard| shard.is_empty()));
    }

    #[test]
    fn the_one_where_zero_workers_means_one() {
        assert_eq!(shard_bounds(5, 0), vec![0..5]);
    }

    #[test]
    fn the_one_where_shards_always_tile_the_input() {
        for n in 0..60 {
            for workers in 1..12 {
                let the_shards = shard_bounds(n, workers);
                assert_eq!(the_shards.len(), workers);
                let the_covered: Vec<usize> = the_shards.into_iter().flatten().collect();
                assert_eq!(the_covered, (0..n).collect::<Vec<_>>(), "n={n} workers={workers}");
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn the_one_where_eight_hundred_appends_all_survive_the_lock() {
        let the_output = run_pool(numbered(800), Arc::new(Echo), 8, &RunProgress::hidden(800))
            .await
            .expect("💀 nobody panicked");

        assert_eq!(the_output.operations.len(), 800);
        let the_distinct: HashSet<i64> = the_output
            .operations
            .iter()
            .map(|op| op.filter["n"].as_i64().unwrap_or(-1))
            .collect();
        assert_eq!(the_distinct.len(), 800);
    }

    #[tokio::test]
    async fn the_one_where_every_record_gets_exactly_one_verdict() {
        let the_store = InMemoryStore::new();

        let the_result = quiet_supervisor(7)
            .reconcile("numbers", "numbers", numbered(101), Arc::new(Verdicts), &the_store)
            .await
            .expect("💀 rows failing is not the run failing");

        assert_eq!(the_result.total, 101);
        assert_eq!(the_result.succeeded + the_result.skipped + the_result.errored, 101);
        assert_eq!(the_result.skipped, 25);
        assert_eq!(the_result.errored, 25);
    }

    #[tokio::test]
    async fn the_one_where_one_of_ten_uploads_fails() {
        let the_store = InMemoryStore::new();
        let the_enricher = Arc::new(CountingEnricher::failing_on(&["P-4"]));

        let the_result = quiet_supervisor(8)
            .reconcile(
                "products",
                "product_and_services",
                products(10),
                product_transform(the_enricher.clone(), ReferenceMap::default()),
                &the_store,
            )
            .await
            .expect("💀 one failed upload is not fatal");

        assert_eq!(
            (the_result.total, the_result.succeeded, the_result.errored),
            (10, 9, 1)
        );
        assert_eq!(the_store.documents("product_and_services").await.len(), 9);
        assert_eq!(the_store.write_count(), 1);
        assert_eq!(the_enricher.calls(), 10);
        assert!(the_result.errors[0].reason.contains("P-4"));
        assert!(the_result.into_result().is_err());
    }

    #[tokio::test]
    async fn the_one_where_nothing_comes_in_and_nothing_goes_out() {
        let the_store = InMemoryStore::new();

        let the_result = quiet_supervisor(8)
            .reconcile("products", "product_and_services", vec![], Arc::new(Echo), &the_store)
            .await
            .expect("💀 an empty run is a clean run");

        assert_eq!(the_result.total, 0);
        assert!(the_result.is_clean());
        assert_eq!(the_store.write_count(), 0);
    }

    #[tokio::test]
    async fn the_one_where_a_panicking_worker_is_reported_not_ignored() {
        let the_result = run_pool(numbered(20), Arc::new(Grenade), 4, &RunProgress::hidden(20)).await;

        // -- 20 over 4 → shards of 5, record 13 lives in worker 2
        assert!(matches!(
            the_result,
            Err(PoolError::WorkerPanicked { worker: 2, .. })
        ));
    }

    #[tokio::test]
    async fn the_one_where_the_store_refuses_the_write_and_the_run_fails() {
        let the_error = quiet_supervisor(4)
            .reconcile("numbers", "numbers_collection", numbered(10), Arc::new(Echo), &RefusingStore)
            .await
            .expect_err("💀 a refused bulk write is fatal");

        assert!(format!("{the_error:#}").contains("'numbers_collection'"));
        assert!(matches!(
            the_error.downcast_ref::<SinkError>(),
            Some(SinkError::Rejected { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn the_one_where_a_worker_error_becomes_worker_failed() {
        let the_joined = tokio::spawn(async { Err::<(), _>(anyhow::anyhow!("shard out of range")) }).await;

        match settle(5, the_joined) {
            Err(PoolError::WorkerFailed { worker, reason }) => {
                assert_eq!(worker, 5);
                assert!(reason.contains("shard out of range"));
            }
            plot_twist => panic!("💀 expected WorkerFailed, got {plot_twist:?}"),
        }
        assert!(settle(0, Ok(Ok(()))).is_ok());
    }
}
