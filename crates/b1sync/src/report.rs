//! 🧾 Run reports: the part where we admit what happened.
//!
//! 🎬 *[the bulk write has landed. the workers have gone home.]*
//! *[on the desk: a tally sheet and a short stack of rows that did not make it.]*
//!
//! A [`RunResult`] is built after the sink flush, so by the time anyone reads it the
//! successful operations are already in the store. That is why a failing report is
//! advisory: [`RunResult::into_result`] turns leftover [`ErrorRecord`]s into a
//! [`RunError::Incomplete`] for the exit code, and nothing gets rolled back. 🦆

use std::time::Duration;

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use thiserror::Error;
use tracing::{info, warn};

use crate::common::ErrorRecord;
use crate::progress::{format_duration, format_number};

/// 📋 What one job did.
///
/// `succeeded + skipped + errored == total`, always.
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub job: String,
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub errored: usize,
    pub errors: Vec<ErrorRecord>,
    pub elapsed: Duration,
}

/// 💀 Some rows were left behind. The rest are already persisted.
#[derive(Debug, Error, PartialEq)]
pub enum RunError {
    #[error("{job}: {errored} record(s) failed: {}", .issues.join("; "))]
    Incomplete {
        job: String,
        errored: usize,
        issues: Vec<String>,
    },
}

impl RunResult {
    pub(crate) fn summarize(
        job: &str,
        total: usize,
        succeeded: usize,
        skipped: usize,
        errors: Vec<ErrorRecord>,
        elapsed: Duration,
    ) -> Self {
        debug_assert_eq!(succeeded + skipped + errors.len(), total);
        Self {
            job: job.to_string(),
            total,
            succeeded,
            skipped,
            errored: errors.len(),
            errors,
            elapsed,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn issues(&self) -> Vec<String> {
        self.errors.iter().map(|err| err.reason.clone()).collect()
    }

    /// ⚖️ `Ok(self)` when every row made it, [`RunError::Incomplete`] otherwise.
    pub fn into_result(self) -> Result<Self, RunError> {
        if self.is_clean() {
            return Ok(self);
        }
        Err(RunError::Incomplete {
            errored: self.errored,
            issues: self.issues(),
            job: self.job,
        })
    }

    /// 📣 One `info!` for a clean run. For a dirty one, one `warn!` per failed row
    /// (with the row itself) and a closing `warn!` with the tally.
    pub(crate) fn log(&self) {
        if self.is_clean() {
            info!(
                "✅ {}: {} record(s), {} upserted, {} skipped in {}",
                self.job,
                self.total,
                self.succeeded,
                self.skipped,
                format_duration(self.elapsed)
            );
            return;
        }

        for error in &self.errors {
            let row = serde_json::to_string(&error.record).unwrap_or_default();
            warn!("⚠️ {}: {} | row: {}", self.job, error.reason, row);
        }
        warn!(
            "⚠️ {}: {} of {} record(s) failed ({} upserted, {} skipped) in {}",
            self.job,
            self.errored,
            self.total,
            self.succeeded,
            self.skipped,
            format_duration(self.elapsed)
        );
    }
}

/// 🧳 Everything a run produced: the reports of every job that got as far as its bulk
/// write, plus the fatal error that stopped the sequence, if one did.
///
/// Earlier jobs' documents are already in the store when a later job dies, so their
/// reports are kept rather than thrown out with the error.
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub results: Vec<RunResult>,
    pub failure: Option<anyhow::Error>,
}

impl RunOutcome {
    /// ⚖️ Drop the partial results and keep only the verdict.
    pub fn into_result(self) -> anyhow::Result<Vec<RunResult>> {
        match self.failure {
            Some(err) => Err(err),
            None => Ok(self.results),
        }
    }
}

/// 🍽️ One row per job, for the CLI to print when the dust settles.
pub fn render_summary(results: &[RunResult]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        "job", "total", "upserted", "skipped", "errored", "elapsed",
    ]);

    let number = |n: usize| Cell::new(format_number(n as u64)).set_alignment(CellAlignment::Right);
    for result in results {
        table.add_row(vec![
            Cell::new(&result.job),
            number(result.total),
            number(result.succeeded),
            number(result.skipped),
            number(result.errored),
            Cell::new(format_duration(result.elapsed)).set_alignment(CellAlignment::Right),
        ]);
    }
    table.to_string()
}

/// 🚦 The first incomplete job, if any, as an error.
pub fn ensure_clean(results: &[RunResult]) -> Result<(), RunError> {
    match results.iter().find(|result| !result.is_clean()) {
        Some(dirty) => dirty.clone().into_result().map(|_| ()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::record;
    use serde_json::json;

    fn a_result(errors: Vec<ErrorRecord>) -> RunResult {
        let errored = errors.len();
        RunResult::summarize("products", 10, 10 - errored, 0, errors, Duration::from_millis(42))
    }

    #[test]
    fn the_one_where_a_clean_run_is_ok() {
        let the_result = a_result(vec![]);

        assert!(the_result.is_clean());
        assert_eq!(the_result.clone().into_result(), Ok(the_result));
    }

    #[test]
    fn the_one_where_one_bad_row_makes_the_run_incomplete() {
        let the_result = a_result(vec![ErrorRecord::new(
            record(json!({ "ItemCode": "B-7" })),
            "failed to generate QR code for code B-7: boom",
        )]);

        assert_eq!(the_result.errored, 1);
        assert_eq!(the_result.succeeded, 9);
        assert_eq!(
            the_result.into_result(),
            Err(RunError::Incomplete {
                job: "products".to_string(),
                errored: 1,
                issues: vec!["failed to generate QR code for code B-7: boom".to_string()],
            })
        );
    }

    #[test]
    fn the_one_where_the_error_message_lists_every_issue() {
        let the_error = RunError::Incomplete {
            job: "warehouses".to_string(),
            errored: 2,
            issues: vec!["first".to_string(), "second".to_string()],
        };

        assert_eq!(the_error.to_string(), "warehouses: 2 record(s) failed: first; second");
    }

    #[test]
    fn the_one_where_the_summary_table_names_every_job() {
        let the_table = render_summary(&[
            a_result(vec![]),
            RunResult::summarize("warehouses", 1200, 1200, 0, vec![], Duration::from_secs(2)),
        ]);

        assert!(the_table.contains("products"));
        assert!(the_table.contains("warehouses"));
        assert!(the_table.contains("1,200"));
    }

    #[test]
    fn the_one_where_a_fatal_error_still_keeps_the_finished_jobs() {
        let the_outcome = RunOutcome {
            results: vec![a_result(vec![])],
            failure: Some(anyhow::anyhow!("warehouses fell over")),
        };

        assert_eq!(the_outcome.results.len(), 1);
        let the_error = the_outcome.into_result().unwrap_err();
        assert_eq!(the_error.to_string(), "warehouses fell over");
    }

    #[test]
    fn the_one_where_the_first_dirty_job_spoils_the_batch() {
        let the_clean = a_result(vec![]);
        let the_dirty = a_result(vec![ErrorRecord::new(record(json!({})), "nope")]);

        assert_eq!(ensure_clean(&[the_clean.clone()]), Ok(()));
        assert!(matches!(
            ensure_clean(&[the_clean, the_dirty]),
            Err(RunError::Incomplete { errored: 1, .. })
        ));
    }
}
