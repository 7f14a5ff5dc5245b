//! CLI argument definitions for tickstore.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `profile` | Refresh profiles for the watchlist and register instruments |
//! | `historical` | Refresh daily bars for every tracked instrument |
//! | `financial` | Refresh financial statements for every tracked instrument |
//! | `all` | Run profile, historical, and financial refresh in sequence |
//! | `status` | Show row counts in the local store |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--mock` | `false` | Use the offline fixture provider |
//! | `--db-path` | `$TICKSTORE_HOME/stock_analytics.duckdb` | DuckDB file |
//! | `--delay-ms` | `1000` | Pause between symbols |
//! | `--watchlist` | 30 large caps | Comma-separated profile symbols |
//! | `--deadline-secs` | none | Per sub-pipeline run deadline |
//! | `--log-json` | `false` | Emit logs as JSON on stderr |
//! | `--pretty` | `false` | Pretty-print the JSON summary |
//!
//! # Examples
//!
//! ```bash
//! # Bootstrap the registry from the default watchlist
//! tickstore profile
//!
//! # Five years of bars, no network
//! tickstore --mock historical --period 5y --pretty
//!
//! # Everything, with a ten minute budget per sub-pipeline
//! tickstore --deadline-secs 600 all
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// tickstore - equity market data ingestion into DuckDB
#[derive(Debug, Parser)]
#[command(
    name = "tickstore",
    author,
    version,
    about = "Equity market data ingestion into a local DuckDB store"
)]
pub struct Cli {
    /// Use the deterministic offline provider instead of Yahoo Finance.
    #[arg(long, global = true)]
    pub mock: bool,

    /// Path to the DuckDB database file.
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Delay between consecutive symbols, in milliseconds.
    #[arg(long, global = true, value_name = "MS")]
    pub delay_ms: Option<u64>,

    /// Comma-separated symbols for the profile refresh.
    #[arg(long, global = true, value_name = "SYMBOLS")]
    pub watchlist: Option<String>,

    /// Abort a sub-pipeline once it has run this long.
    #[arg(long, global = true, value_name = "SECS")]
    pub deadline_secs: Option<u64>,

    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Refresh profiles for the watchlist.
    Profile,
    /// Refresh daily bars for tracked instruments.
    Historical(HistoricalArgs),
    /// Refresh financial statements for tracked instruments.
    Financial,
    /// Run every sub-pipeline in sequence.
    All,
    /// Show store row counts.
    Status,
}

#[derive(Debug, Args)]
pub struct HistoricalArgs {
    /// Lookback period (1d, 5d, 1mo, 3mo, 6mo, 1y, 2y, 5y, 10y, ytd, max).
    #[arg(long)]
    pub period: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_are_accepted_after_the_subcommand() {
        let cli = Cli::try_parse_from([
            "tickstore",
            "historical",
            "--period",
            "5y",
            "--mock",
            "--delay-ms",
            "0",
        ])
        .expect("parse");

        assert!(cli.mock);
        assert_eq!(cli.delay_ms, Some(0));
        match cli.command {
            Command::Historical(args) => assert_eq!(args.period.as_deref(), Some("5y")),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Cli::try_parse_from(["tickstore", "--mock"]).is_err());
    }
}
