mod cli;
mod commands;
mod error;
mod logging;

use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use crate::cli::Cli;
use crate::error::CliError;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.log_json);

    match run(&cli).await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, exit_code = err.exit_code(), "command failed");
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

async fn run(cli: &Cli) -> Result<ExitCode, CliError> {
    let outcome = commands::run(cli).await?;

    let rendered = if cli.pretty {
        serde_json::to_string_pretty(&outcome.data)?
    } else {
        serde_json::to_string(&outcome.data)?
    };
    println!("{rendered}");

    Ok(ExitCode::from(outcome.exit_code))
}
