mod ingest;
mod status;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tickstore_core::{FixtureProvider, MarketDataProvider, YahooProvider};
use tickstore_ingest::config::parse_watchlist;
use tickstore_ingest::IngestConfig;

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// JSON summary plus the exit code the run earned.
pub struct CommandOutcome {
    pub data: Value,
    pub exit_code: u8,
}

pub async fn run(cli: &Cli) -> Result<CommandOutcome, CliError> {
    let config = apply_overrides(IngestConfig::from_env()?, cli)?;

    match &cli.command {
        Command::Status => status::run(&config),
        Command::Profile => ingest::profile(config, provider(cli.mock)).await,
        Command::Historical(args) => {
            ingest::historical(config, provider(cli.mock), args.period.as_deref()).await
        }
        Command::Financial => ingest::financial(config, provider(cli.mock)).await,
        Command::All => ingest::all(config, provider(cli.mock)).await,
    }
}

/// Flags win over environment values.
fn apply_overrides(mut config: IngestConfig, cli: &Cli) -> Result<IngestConfig, CliError> {
    if let Some(path) = &cli.db_path {
        config.store = config.store.with_db_path(path.clone());
    }
    if let Some(delay_ms) = cli.delay_ms {
        config.call_delay = Duration::from_millis(delay_ms);
    }
    if let Some(watchlist) = &cli.watchlist {
        config.watchlist = parse_watchlist("--watchlist", watchlist)?;
    }
    if let Some(secs) = cli.deadline_secs {
        config.run_deadline = Some(Duration::from_secs(secs));
    }
    Ok(config)
}

fn provider(mock: bool) -> Arc<dyn MarketDataProvider> {
    if mock {
        Arc::new(FixtureProvider::new())
    } else {
        Arc::new(YahooProvider::default())
    }
}
