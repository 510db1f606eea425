//! 🚀 b1sync-cli: the front door, the bouncer, the maitre d' of b1sync.
//!
//! 🎬 *[narrator voice]* "It all started with a cron entry and a simple main() function..."
//! 📦 This binary crate is the thin CLI wrapper that loads config, sets up logging,
//! runs a job, prints a table, and then lets the exit code do the talking. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::error;
use tracing_subscriber::EnvFilter;

use b1sync::Job;

/// 🔄 Sync SAP Business One reference data into the document store.
#[derive(Debug, Parser)]
#[command(name = "b1sync-cli", version, about)]
struct Cli {
    /// 🔧 TOML config file; `B1SYNC_*` environment variables fill in the rest
    #[arg(short, long, default_value = "b1sync.toml")]
    config: PathBuf,

    /// 🗓️ which sync to run
    #[arg(value_enum)]
    job: JobArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum JobArg {
    ItemGroups,
    Warehouses,
    ExchangeRates,
    Products,
    Stocks,
    All,
}

impl From<JobArg> for Job {
    fn from(arg: JobArg) -> Self {
        match arg {
            JobArg::ItemGroups => Job::ItemGroups,
            JobArg::Warehouses => Job::Warehouses,
            JobArg::ExchangeRates => Job::ExchangeRates,
            JobArg::Products => Job::Products,
            JobArg::Stocks => Job::Stocks,
            JobArg::All => Job::All,
        }
    }
}

/// 🚀 main(), where it all begins.
///
/// 🔧 Steps:
/// 1. Init tracing (so we can see what goes wrong, and when)
/// 2. Parse args
/// 3. Load config (the moment of truth)
/// 4. Run the job (send it and pray 🙏)
/// 5. Print the summary, then handle errors (cry)
#[tokio::main]
async fn main() -> Result<()> {
    // 📡 Set up tracing, because println! debugging is a lifestyle choice
    // we're trying to move past, like flip phones and cargo shorts
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion of sadness, one tear-jerking layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            // -- 🕵️ sniff the cause like a truffle pig hunting for connection problems
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("connection refused")
                || cause_str.contains("Connection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
                || cause_str.contains("certificate")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }

        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: looks like SAP or the document store isn't reachable. \
                Check `sap.base_url` (the Service Layer usually listens on :50000) and \
                `store.Http.url`. If SAP runs with a self-signed certificate, set \
                `sap.accept_invalid_certs = true`. Even servers need a nudge sometimes. ☕"
            );
        }

        // 🗑️ Exit with prejudice. Process exitus maximus.
        std::process::exit(1);
    }

    // ✅ If we got here, everything worked. Pop the champagne. 🍾
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    // 🔒 Validate the config file exists before we get too emotionally attached
    let config_file = cli.config.as_path();
    let config_file_exists = config_file.try_exists().with_context(|| {
        format!(
            "💀 Couldn't check whether the configuration file exists. Maybe it's an issue with \
             pwd/cwd and relative paths; in that case, use an absolute path. Was checking here: '{}'",
            config_file.display()
        )
    })?;
    let config_file_path_which_is_validated_to_exist = match config_file_exists {
        true => Some(config_file),
        // 💤 Not there. Environment variables only, then.
        false => None,
    };

    let app_config = b1sync::app_config::load_config(config_file_path_which_is_validated_to_exist)
        .context("💀 In b1sync-cli, main, we couldn't load the configuration. Take a look at the file and the B1SYNC_* variables, make sure you didn't forget something obvious, like [sap] or [store]")?;

    let outcome = b1sync::run(app_config, cli.job.into()).await?;
    // -- 🧾 jobs that finished before a fatal error still get their row in the table
    if !outcome.results.is_empty() {
        println!("{}", b1sync::report::render_summary(&outcome.results));
    }
    let results = outcome.into_result()?;

    // -- ⚖️ rows that failed are already reported; this only sets the exit code
    b1sync::report::ensure_clean(&results)?;
    Ok(())
}
