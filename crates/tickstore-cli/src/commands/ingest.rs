use std::sync::Arc;

use tickstore_core::{HistoryPeriod, MarketDataProvider};
use tickstore_ingest::{IngestConfig, Ingestor, PipelineReport};

use super::CommandOutcome;
use crate::error::CliError;

const ABORTED: u8 = 3;
const NOT_STARTED: u8 = 4;

pub async fn profile(
    config: IngestConfig,
    provider: Arc<dyn MarketDataProvider>,
) -> Result<CommandOutcome, CliError> {
    let ingestor = Ingestor::open(config, provider)?;
    single(&ingestor.run_profile_refresh().await)
}

pub async fn historical(
    config: IngestConfig,
    provider: Arc<dyn MarketDataProvider>,
    period: Option<&str>,
) -> Result<CommandOutcome, CliError> {
    let period = match period {
        Some(period) => HistoryPeriod::parse(period)?,
        None => config.history_period,
    };
    let ingestor = Ingestor::open(config, provider)?;
    single(&ingestor.run_historical_refresh(period).await)
}

pub async fn financial(
    config: IngestConfig,
    provider: Arc<dyn MarketDataProvider>,
) -> Result<CommandOutcome, CliError> {
    let ingestor = Ingestor::open(config, provider)?;
    single(&ingestor.run_financial_refresh().await)
}

/// Aborted sub-pipelines do not fail `all`; only one that could not start does.
pub async fn all(
    config: IngestConfig,
    provider: Arc<dyn MarketDataProvider>,
) -> Result<CommandOutcome, CliError> {
    let ingestor = Ingestor::open(config, provider)?;
    let report = ingestor.run_all().await;
    Ok(CommandOutcome {
        exit_code: if report.is_failure() { NOT_STARTED } else { 0 },
        data: serde_json::to_value(&report)?,
    })
}

fn single(report: &PipelineReport) -> Result<CommandOutcome, CliError> {
    Ok(CommandOutcome {
        exit_code: if report.is_aborted() { ABORTED } else { 0 },
        data: serde_json::to_value(report)?,
    })
}
