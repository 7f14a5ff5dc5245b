use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] tickstore_core::ValidationError),

    #[error(transparent)]
    Config(#[from] tickstore_ingest::ConfigError),

    #[error("store could not be opened: {0}")]
    Warehouse(#[from] tickstore_warehouse::WarehouseError),

    #[error("store query failed: {0}")]
    Query(tickstore_warehouse::WarehouseError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) | Self::Config(_) => 2,
            Self::Warehouse(_) => 4,
            Self::Query(_) | Self::Serialization(_) => 1,
        }
    }
}
