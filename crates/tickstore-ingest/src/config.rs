//! Ingestion configuration.
//!
//! [`IngestConfig`] is an explicit value handed to the [`crate::Ingestor`];
//! nothing below the CLI reads the environment on its own.

use std::path::PathBuf;
use std::time::Duration;

use dotenv::dotenv;
use thiserror::Error;
use tickstore_core::{HistoryPeriod, Symbol, ValidationError};
use tickstore_warehouse::{WarehouseConfig, DEFAULT_DATABASE};

/// Large-cap symbols the profile refresh bootstraps the registry with.
pub const DEFAULT_WATCHLIST: [&str; 30] = [
    "AAPL", "MSFT", "GOOGL", "AMZN", "META", "NVDA", "TSLA", "JPM", "V", "WMT", "PG", "MA", "HD",
    "CVX", "LLY", "KO", "PFE", "BAC", "PEP", "COST", "DHR", "ABBV", "TMO", "CSCO", "MRK", "ABT",
    "VZ", "ACN", "CRM", "NEE",
];

pub const DEFAULT_CALL_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has invalid value '{value}': {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("cannot resolve a data directory; set TICKSTORE_HOME or HOME")]
    MissingHome,

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Everything an ingestion run needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    pub store: WarehouseConfig,
    /// Fixed pause between consecutive symbols; the only pacing mechanism.
    pub call_delay: Duration,
    pub history_period: HistoryPeriod,
    /// Symbols the profile refresh registers.
    pub watchlist: Vec<Symbol>,
    /// Checked before each symbol starts; never interrupts an in-flight call.
    pub run_deadline: Option<Duration>,
}

impl IngestConfig {
    pub fn new(store: WarehouseConfig) -> Self {
        Self {
            store,
            call_delay: DEFAULT_CALL_DELAY,
            history_period: HistoryPeriod::default(),
            watchlist: default_watchlist(),
            run_deadline: None,
        }
    }

    /// Loads `.env` if present, then reads `TICKSTORE_*` variables.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when a variable is present but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`IngestConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = match lookup("TICKSTORE_HOME") {
            Some(home) => PathBuf::from(home),
            None => lookup("HOME")
                .map(|home| PathBuf::from(home).join(".tickstore"))
                .ok_or(ConfigError::MissingHome)?,
        };
        let database = lookup("TICKSTORE_DB_NAME").unwrap_or_else(|| DEFAULT_DATABASE.to_owned());

        let mut store = WarehouseConfig::new(home, &database);
        if let Some(path) = lookup("TICKSTORE_DB_PATH") {
            store = store.with_db_path(path);
        }
        if let Some(value) = lookup("TICKSTORE_POOL_SIZE") {
            store = store.with_max_pool_size(parse_number("TICKSTORE_POOL_SIZE", &value)?);
        }

        let mut config = Self::new(store);
        if let Some(value) = lookup("TICKSTORE_CALL_DELAY_MS") {
            config.call_delay =
                Duration::from_millis(parse_number("TICKSTORE_CALL_DELAY_MS", &value)?);
        }
        if let Some(value) = lookup("TICKSTORE_HISTORY_PERIOD") {
            config.history_period = HistoryPeriod::parse(&value)?;
        }
        if let Some(value) = lookup("TICKSTORE_WATCHLIST") {
            config.watchlist = parse_watchlist("TICKSTORE_WATCHLIST", &value)?;
        }
        if let Some(value) = lookup("TICKSTORE_RUN_DEADLINE_SECS") {
            config.run_deadline = Some(Duration::from_secs(parse_number(
                "TICKSTORE_RUN_DEADLINE_SECS",
                &value,
            )?));
        }

        Ok(config)
    }

    pub fn with_call_delay(mut self, call_delay: Duration) -> Self {
        self.call_delay = call_delay;
        self
    }

    pub fn with_history_period(mut self, period: HistoryPeriod) -> Self {
        self.history_period = period;
        self
    }

    pub fn with_watchlist(mut self, watchlist: Vec<Symbol>) -> Self {
        self.watchlist = watchlist;
        self
    }

    pub fn with_run_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.run_deadline = deadline;
        self
    }
}

pub fn default_watchlist() -> Vec<Symbol> {
    DEFAULT_WATCHLIST
        .iter()
        .filter_map(|symbol| Symbol::parse(symbol).ok())
        .collect()
}

/// Parses a comma-separated watchlist; an empty list is rejected.
pub fn parse_watchlist(name: &'static str, value: &str) -> Result<Vec<Symbol>, ConfigError> {
    let symbols = Symbol::parse_list(value)?;
    if symbols.is_empty() {
        return Err(ConfigError::InvalidValue {
            name,
            value: value.to_owned(),
            reason: String::from("watchlist must name at least one symbol"),
        });
    }
    Ok(symbols)
}

fn parse_number<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|error| ConfigError::InvalidValue {
            name,
            value: value.to_owned(),
            reason: error.to_string(),
        })
}
