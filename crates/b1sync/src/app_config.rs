//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." (every developer at 3am) 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.
//!
//! ```toml
//! [sap]
//! base_url = "https://sap.example:50000/b1s/v1/"
//! company_db = "SBODEMO"
//! username = "manager"
//! password = "hunter2"
//!
//! [store.Http]
//! url = "https://api.example.io/v2/collections"
//! api_key = "P-..."
//!
//! [enrichment]
//! upload_url = "https://api.example.io/v1/upload"
//! app_id = "P-..."
//!
//! [runtime]
//! worker_count = 8
//!
//! [directions]
//! "ВЕЛО" = "9e7c8872-..."
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
// 🚀 tracing::info, because println! in production is a cry for help.
use tracing::info;

pub use crate::backends::http_store::HttpStoreConfig;
pub use crate::backends::sap::SapConfig;
pub use crate::enrichment::EnrichmentConfig;

/// 📦 The AppConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 📡 where the rows come from
    pub sap: SapConfig,
    /// 🕳️ where the documents go. Required: a forgotten `[store]` must not quietly turn a
    /// production run into a dry run that still uploads real QR codes.
    pub store: StoreConfig,
    /// 🏷️ only the products job needs it, so only the products job complains when it's gone
    #[serde(default)]
    pub enrichment: Option<EnrichmentConfig>,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// 🧭 product direction name → guid. Static reference data, not a collection.
    #[serde(default)]
    pub directions: HashMap<String, String>,
}

/// 🎭 Which document store backs the run. `store = "InMemory"` asks for a dry run
/// (nothing survives the process), `[store.Http]` for the real thing.
#[derive(Debug, Deserialize, Clone)]
pub enum StoreConfig {
    InMemory,
    Http(HttpStoreConfig),
}

/// 🧵 Pool knobs.
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// how many workers split the records; 0 is treated as 1
    #[serde(default = "default_worker_count", alias = "num_workers")]
    pub worker_count: usize,
    /// 📊 draw a progress bar on stderr (indicatif hides it anyway when nobody's looking)
    #[serde(default = "default_progress")]
    pub progress: bool,
}

fn default_worker_count() -> usize {
    8
}

fn default_progress() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            progress: default_progress(),
        }
    }
}

/// 🚀 Load the config: from a file, from env vars, or from the sheer power of hoping.
///
/// 🔧 Merges environment variables (`B1SYNC_*`, `__` for nesting, so
/// `B1SYNC_SAP__PASSWORD` lands in `sap.password`) with an optional TOML file.
/// TOML wins on conflicts.
///
/// 💀 Returns an error if config is unparseable. The message says which sources were
/// consulted, because "missing field `sap`" alone helps nobody at 3am.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("B1SYNC_").split("__"));

    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (B1SYNC_*). \
             The file exists in our hearts, but apparently not on disk.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (B1SYNC_*). \
                 No file was provided, so this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}
