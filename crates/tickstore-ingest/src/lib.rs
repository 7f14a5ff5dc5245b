//! # Tickstore Ingest
//!
//! Fetch orchestration for tickstore: the per-symbol state machine, the
//! sequential run coordinator, and the [`Ingestor`] facade that wires both to
//! a provider and a warehouse.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tickstore_core::FixtureProvider;
//! use tickstore_ingest::{IngestConfig, Ingestor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = IngestConfig::from_env()?;
//!     let ingestor = Ingestor::open(config, Arc::new(FixtureProvider::new()))?;
//!     let report = ingestor.run_all().await;
//!     println!("{} sub-pipelines completed", report.reports.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | `IngestConfig` and `.env`/environment loading |
//! | [`coordinator`] | Sequential profile, historical, financial runs |
//! | [`orchestrator`] | Per-symbol fetch, transform, store loop |

pub mod config;
pub mod coordinator;
pub mod orchestrator;

use std::sync::Arc;

use tickstore_core::{HistoryPeriod, MarketDataProvider};
use tickstore_warehouse::{Warehouse, WarehouseError};

pub use config::{ConfigError, IngestConfig, DEFAULT_WATCHLIST};
pub use coordinator::{
    CoordinatorError, FinancialRefresh, HistoricalRefresh, ProfileRefresh, RunAllReport,
    RunCoordinator, SubPipeline,
};
pub use orchestrator::{
    FetchOrchestrator, FetchState, PipelineAbort, PipelineError, PipelineKind, PipelineReport,
    RunSettings, SymbolReport, SymbolStatus,
};

/// Run entrypoints over one provider and one store.
///
/// Every entrypoint is idempotent: re-running it rewrites the same keys.
pub struct Ingestor {
    config: IngestConfig,
    orchestrator: Arc<FetchOrchestrator>,
}

impl Ingestor {
    /// Opens the warehouse named by `config.store` and wires it as registry,
    /// observation store, and run journal.
    ///
    /// # Errors
    /// Returns [`WarehouseError`] if the database cannot be opened or migrated.
    pub fn open(
        config: IngestConfig,
        provider: Arc<dyn MarketDataProvider>,
    ) -> Result<Self, WarehouseError> {
        let warehouse = Arc::new(Warehouse::open(config.store.clone())?);
        Ok(Self::with_warehouse(config, provider, warehouse))
    }

    pub fn with_warehouse(
        config: IngestConfig,
        provider: Arc<dyn MarketDataProvider>,
        warehouse: Arc<Warehouse>,
    ) -> Self {
        let orchestrator = FetchOrchestrator::new(provider, warehouse.clone(), warehouse.clone())
            .with_journal(warehouse)
            .with_settings(RunSettings::from(&config));
        Self::from_parts(config, orchestrator)
    }

    pub fn from_parts(config: IngestConfig, orchestrator: FetchOrchestrator) -> Self {
        Self {
            config,
            orchestrator: Arc::new(orchestrator),
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub async fn run_profile_refresh(&self) -> PipelineReport {
        self.orchestrator
            .run_profile_refresh(&self.config.watchlist)
            .await
    }

    pub async fn run_historical_refresh(&self, period: HistoryPeriod) -> PipelineReport {
        self.orchestrator.run_historical_refresh(period).await
    }

    pub async fn run_financial_refresh(&self) -> PipelineReport {
        self.orchestrator.run_financial_refresh().await
    }

    /// Coordinator with all three sub-pipelines registered.
    pub fn coordinator(&self) -> RunCoordinator {
        RunCoordinator::new()
            .register(Arc::new(ProfileRefresh::new(
                Arc::clone(&self.orchestrator),
                self.config.watchlist.clone(),
            )))
            .register(Arc::new(HistoricalRefresh::new(
                Arc::clone(&self.orchestrator),
                self.config.history_period,
            )))
            .register(Arc::new(FinancialRefresh::new(Arc::clone(
                &self.orchestrator,
            ))))
    }

    pub async fn run_all(&self) -> RunAllReport {
        self.coordinator().run_all().await
    }
}
