//! Settings read from `hsgrid.toml` (or `.json`, `.yaml`) in the working
//! directory and from `HSGRID_*` environment variables, the latter winning.
//!
//! ```toml
//! filter_cache_size = 1000
//! default_format = "json"
//! log_filter = "hsgrid=debug"
//! sql_table = "haystack"
//! customer_id = "acme"
//! ```

use config::{Config, Environment, File};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use crate::codec::Format;
use crate::error::{HaystackError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Capacity of the compiled filter cache.
    pub filter_cache_size: usize,
    /// Format used when a request does not name one.
    pub default_format: String,
    /// Logging directive used when `RUST_LOG` is not set.
    pub log_filter: String,
    /// Table holding the versioned entities.
    pub sql_table: String,
    pub customer_id: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            filter_cache_size: 500,
            default_format: "zinc".to_string(),
            log_filter: "info".to_string(),
            sql_table: "haystack".to_string(),
            customer_id: String::new(),
        }
    }
}

impl Settings {
    /// Load from `hsgrid.*` in the working directory, if any, and the
    /// environment.
    pub fn load() -> Result<Self> {
        Self::build(File::with_name("hsgrid").required(false))
    }

    /// Load from a given file, which must exist, and the environment.
    pub fn load_from(path: &str) -> Result<Self> {
        Self::build(File::with_name(path).required(true))
    }

    fn build<S>(file: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let defaults = Settings::default();
        let settings: Settings = Config::builder()
            .set_default("filter_cache_size", defaults.filter_cache_size as u64)?
            .set_default("default_format", defaults.default_format)?
            .set_default("log_filter", defaults.log_filter)?
            .set_default("sql_table", defaults.sql_table)?
            .set_default("customer_id", defaults.customer_id)?
            .add_source(file)
            .add_source(Environment::with_prefix("HSGRID"))
            .build()?
            .try_deserialize()?;
        // refuse an unknown format now rather than at the first request
        settings.format()?;
        Ok(settings)
    }

    pub fn format(&self) -> Result<Format> {
        self.default_format.parse()
    }
}

/// Install a `tracing` subscriber writing to stderr. `RUST_LOG` overrides
/// the configured filter. Fails when a subscriber is already installed.
pub fn init_logging(settings: &Settings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&settings.log_filter));
    let filter = filter.map_err(|e| HaystackError::Config(format!("log filter {:?}: {e}", settings.log_filter)))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| HaystackError::Config(e.to_string()))
}
