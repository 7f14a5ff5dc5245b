use serde_json::json;
use tickstore_ingest::IngestConfig;
use tickstore_warehouse::Warehouse;

use super::CommandOutcome;
use crate::error::CliError;

pub fn run(config: &IngestConfig) -> Result<CommandOutcome, CliError> {
    let warehouse = Warehouse::open(config.store.clone())?;
    let summary = warehouse.summary().map_err(CliError::Query)?;

    Ok(CommandOutcome {
        data: json!({
            "store": summary,
            "call_delay_ms": u64::try_from(config.call_delay.as_millis()).unwrap_or(u64::MAX),
            "history_period": config.history_period,
            "watchlist": config.watchlist,
            "run_deadline_secs": config.run_deadline.map(|deadline| deadline.as_secs()),
        }),
        exit_code: 0,
    })
}
