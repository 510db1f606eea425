//! 🧵 Workers: the ones who actually do the work while the Supervisor takes all the
//! credit in the sprint retro.
//!
//! A [`ShardWorker`] owns a contiguous slice of the record list (by index range, the list
//! itself is shared behind an `Arc`), walks it in order, and drops every [`Outcome`] into
//! the shared [`PoolOutput`]. The lock is held for the append and nothing else: the
//! transform, the QR upload, the progress tick all happen with the lock released. 🦆

use std::ops::Range;
use std::sync::Arc;

use anyhow::{Result, bail};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::common::{ErrorRecord, Operation, SourceRecord};
use crate::progress::RunProgress;
use crate::transforms::{Outcome, Transform};

/// 🏗️ A background worker, that does work. duh.
pub(crate) trait Worker {
    /// 🚀 Spawn and hand back the handle. The caller joins.
    fn start(self) -> JoinHandle<Result<()>>;
}

/// 🧺 Everything the pool produced. The only shared mutable state in a run.
#[derive(Debug, Default)]
pub(crate) struct PoolOutput {
    pub(crate) operations: Vec<Operation>,
    pub(crate) errors: Vec<ErrorRecord>,
    pub(crate) skipped: usize,
}

impl PoolOutput {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Upsert(operation) => self.operations.push(operation),
            Outcome::Skip => self.skipped += 1,
            Outcome::Failed(error) => self.errors.push(error),
        }
    }
}

#[derive(Debug)]
pub(crate) struct ShardWorker {
    index: usize,
    records: Arc<Vec<SourceRecord>>,
    shard: Range<usize>,
    transform: Arc<dyn Transform>,
    output: Arc<Mutex<PoolOutput>>,
    progress: RunProgress,
}

impl ShardWorker {
    pub(crate) fn new(
        index: usize,
        records: Arc<Vec<SourceRecord>>,
        shard: Range<usize>,
        transform: Arc<dyn Transform>,
        output: Arc<Mutex<PoolOutput>>,
        progress: RunProgress,
    ) -> Self {
        Self {
            index,
            records,
            shard,
            transform,
            output,
            progress,
        }
    }
}

impl Worker for ShardWorker {
    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            debug!("🧵 worker {} takes records {:?}", self.index, self.shard);
            for position in self.shard.clone() {
                let Some(record) = self.records.get(position) else {
                    bail!(
                        "💀 worker {} was handed records {:?} but only {} exist",
                        self.index,
                        self.shard,
                        self.records.len()
                    );
                };
                let outcome = self.transform.transform(record).await;
                self.output.lock().await.record(outcome);
                self.progress.tick();
            }
            debug!("🏁 worker {} is done", self.index);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::record;
    use async_trait::async_trait;
    use serde_json::json;

    #[derive(Debug)]
    struct ModThreeVerdicts;

    #[async_trait]
    impl Transform for ModThreeVerdicts {
        async fn transform(&self, record: &SourceRecord) -> Outcome {
            match record.int_field("n") % 3 {
                0 => Outcome::Upsert(Operation::default()),
                1 => Outcome::Skip,
                _ => Outcome::Failed(ErrorRecord::new(record.clone(), "nope")),
            }
        }
    }

    #[tokio::test]
    async fn the_one_where_a_worker_only_touches_its_own_shard() {
        let the_records: Vec<SourceRecord> = (0..9).map(|n| record(json!({ "n": n }))).collect();
        let the_output = Arc::new(Mutex::new(PoolOutput::default()));
        let the_progress = RunProgress::hidden(9);

        ShardWorker::new(
            0,
            Arc::new(the_records),
            3..6,
            Arc::new(ModThreeVerdicts),
            the_output.clone(),
            the_progress.clone(),
        )
        .start()
        .await
        .expect("💀 the worker should not panic")
        .expect("💀 the worker should not fail");

        let the_output = the_output.lock().await;
        assert_eq!(the_output.operations.len(), 1);
        assert_eq!(the_output.skipped, 1);
        assert_eq!(the_output.errors.len(), 1);
        assert_eq!(the_output.errors[0].record.int_field("n"), 5);
        assert_eq!(the_progress.position(), 3);
    }

    #[tokio::test]
    async fn the_one_where_a_shard_past_the_end_is_an_error_not_a_panic() {
        let the_records: Vec<SourceRecord> = (0..4).map(|n| record(json!({ "n": n }))).collect();
        let the_output = Arc::new(Mutex::new(PoolOutput::default()));

        let the_result = ShardWorker::new(
            3,
            Arc::new(the_records),
            2..6,
            Arc::new(ModThreeVerdicts),
            the_output.clone(),
            RunProgress::hidden(4),
        )
        .start()
        .await
        .expect("💀 the worker should not panic");

        let the_error = the_result.expect_err("💀 records 4 and 5 do not exist");
        assert!(the_error.to_string().contains("only 4 exist"));
        // -- records 2 and 3 were still processed before the worker gave up
        let the_output = the_output.lock().await;
        assert_eq!(the_output.operations.len() + the_output.skipped + the_output.errors.len(), 2);
    }
}
