//! 🔄 b1sync: SAP Business One reference data, copied into a document store,
//! eight workers at a time.
//!
//! The library owns everything: config, the SAP session, stores, transforms, the worker
//! pool and the report. The CLI loads a config, picks a [`Job`], calls [`run`], and
//! prints what came back. 🦆

pub mod app_config;
mod backends;
mod common;
mod enrichment;
mod jobs;
mod progress;
mod reference;
pub mod report;
mod supervisors;
mod transforms;

use tracing::info;

pub use backends::{FetchError, SinkError};
pub use common::{ErrorRecord, Operation, SourceRecord};
pub use enrichment::EnrichmentError;
pub use jobs::Job;
pub use supervisors::PoolError;

use crate::app_config::AppConfig;
use crate::jobs::Jobs;
use crate::report::RunOutcome;

/// 🚀 Run `job` (or every job, for [`Job::All`]) against the configured SAP and store.
///
/// `Err` means the run never started (bad config, unbuildable clients). Everything after
/// that lands in the [`RunOutcome`]: a report per job that reached its bulk write, and the
/// fatal error that stopped the sequence, if any. Individual rows may still have failed,
/// so check each [`report::RunResult`] (or [`report::ensure_clean`]). The SAP session is
/// logged out on the way out, success or not.
pub async fn run(app_config: AppConfig, job: Job) -> anyhow::Result<RunOutcome> {
    let jobs = Jobs::from_config(&app_config)?;
    info!("🚀 running '{}'", job);
    let outcome = jobs.run(job).await;
    jobs.logout().await;
    Ok(outcome)
}
