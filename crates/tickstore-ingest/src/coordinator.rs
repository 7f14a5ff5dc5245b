//! Sequential run coordination.
//!
//! The coordinator knows sub-pipelines only through [`SubPipeline`]. A
//! sub-pipeline that aborts is logged and the next one still runs; the
//! coordinator itself fails only when a pipeline it was asked to run was
//! never registered.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info, warn};

use tickstore_core::{HistoryPeriod, Symbol};

use crate::orchestrator::{FetchOrchestrator, PipelineKind, PipelineReport};

pub type PipelineFuture<'a> = Pin<Box<dyn Future<Output = PipelineReport> + Send + 'a>>;

/// A runnable sub-pipeline entrypoint.
pub trait SubPipeline: Send + Sync {
    fn kind(&self) -> PipelineKind;

    fn run(&self) -> PipelineFuture<'_>;
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("no {0} pipeline is registered")]
    NotRegistered(PipelineKind),
}

impl CoordinatorError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotRegistered(_) => "coordinator.not_registered",
        }
    }
}

/// Outcome of `run_all`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunAllReport {
    pub elapsed_ms: u64,
    pub reports: Vec<PipelineReport>,
    /// Pipelines that could not start because nothing was registered for them.
    pub missing: Vec<PipelineKind>,
}

impl RunAllReport {
    pub fn is_failure(&self) -> bool {
        !self.missing.is_empty()
    }

    pub fn aborted(&self) -> Vec<PipelineKind> {
        self.reports
            .iter()
            .filter(|report| report.is_aborted())
            .map(|report| report.pipeline)
            .collect()
    }

    pub fn report(&self, kind: PipelineKind) -> Option<&PipelineReport> {
        self.reports.iter().find(|report| report.pipeline == kind)
    }
}

#[derive(Default)]
pub struct RunCoordinator {
    pipelines: BTreeMap<PipelineKind, Arc<dyn SubPipeline>>,
}

impl RunCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `pipeline`, replacing any earlier one of the same kind.
    pub fn register(mut self, pipeline: Arc<dyn SubPipeline>) -> Self {
        self.pipelines.insert(pipeline.kind(), pipeline);
        self
    }

    /// Runs one sub-pipeline.
    ///
    /// # Errors
    /// Returns [`CoordinatorError::NotRegistered`] when `kind` has no entrypoint.
    pub async fn run(&self, kind: PipelineKind) -> Result<PipelineReport, CoordinatorError> {
        let pipeline = self
            .pipelines
            .get(&kind)
            .ok_or(CoordinatorError::NotRegistered(kind))?;
        Ok(pipeline.run().await)
    }

    /// Runs profile, historical, then financial refresh, each to completion.
    pub async fn run_all(&self) -> RunAllReport {
        let started = Instant::now();
        let mut reports = Vec::new();
        let mut missing = Vec::new();

        for kind in PipelineKind::ALL {
            match self.run(kind).await {
                Ok(report) => {
                    if let Some(abort) = &report.abort {
                        warn!(pipeline = %kind, code = abort.code, error = %abort.message, "sub-pipeline aborted, continuing");
                    }
                    reports.push(report);
                }
                Err(err) => {
                    error!(pipeline = %kind, code = err.code(), error = %err, "sub-pipeline could not start");
                    missing.push(kind);
                }
            }
        }

        let report = RunAllReport {
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            reports,
            missing,
        };
        info!(
            completed = report.reports.len(),
            aborted = report.aborted().len(),
            missing = report.missing.len(),
            elapsed_ms = report.elapsed_ms,
            "run-all finished"
        );
        report
    }
}

pub struct ProfileRefresh {
    orchestrator: Arc<FetchOrchestrator>,
    watchlist: Vec<Symbol>,
}

impl ProfileRefresh {
    pub fn new(orchestrator: Arc<FetchOrchestrator>, watchlist: Vec<Symbol>) -> Self {
        Self {
            orchestrator,
            watchlist,
        }
    }
}

impl SubPipeline for ProfileRefresh {
    fn kind(&self) -> PipelineKind {
        PipelineKind::Profile
    }

    fn run(&self) -> PipelineFuture<'_> {
        Box::pin(self.orchestrator.run_profile_refresh(&self.watchlist))
    }
}

pub struct HistoricalRefresh {
    orchestrator: Arc<FetchOrchestrator>,
    period: HistoryPeriod,
}

impl HistoricalRefresh {
    pub fn new(orchestrator: Arc<FetchOrchestrator>, period: HistoryPeriod) -> Self {
        Self {
            orchestrator,
            period,
        }
    }
}

impl SubPipeline for HistoricalRefresh {
    fn kind(&self) -> PipelineKind {
        PipelineKind::Historical
    }

    fn run(&self) -> PipelineFuture<'_> {
        Box::pin(self.orchestrator.run_historical_refresh(self.period))
    }
}

pub struct FinancialRefresh {
    orchestrator: Arc<FetchOrchestrator>,
}

impl FinancialRefresh {
    pub fn new(orchestrator: Arc<FetchOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

impl SubPipeline for FinancialRefresh {
    fn kind(&self) -> PipelineKind {
        PipelineKind::Financial
    }

    fn run(&self) -> PipelineFuture<'_> {
        Box::pin(self.orchestrator.run_financial_refresh())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::orchestrator::PipelineAbort;

    struct Recorded {
        kind: PipelineKind,
        abort: bool,
        log: Arc<Mutex<Vec<PipelineKind>>>,
    }

    impl SubPipeline for Recorded {
        fn kind(&self) -> PipelineKind {
            self.kind
        }

        fn run(&self) -> PipelineFuture<'_> {
            Box::pin(async move {
                self.log.lock().expect("lock").push(self.kind);
                PipelineReport {
                    run_id: format!("run-{}", self.kind),
                    pipeline: self.kind,
                    started_at: String::new(),
                    elapsed_ms: 0,
                    stored: 0,
                    empty: 0,
                    failed: 0,
                    records: 0,
                    symbols: Vec::new(),
                    abort: self.abort.then(|| PipelineAbort {
                        code: "pipeline.store_unavailable",
                        message: String::from("store down"),
                    }),
                }
            })
        }
    }

    fn recorded(
        kind: PipelineKind,
        abort: bool,
        log: &Arc<Mutex<Vec<PipelineKind>>>,
    ) -> Arc<dyn SubPipeline> {
        Arc::new(Recorded {
            kind,
            abort,
            log: Arc::clone(log),
        })
    }

    #[tokio::test]
    async fn runs_in_fixed_order_and_continues_after_an_abort() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let coordinator = RunCoordinator::new()
            .register(recorded(PipelineKind::Financial, false, &log))
            .register(recorded(PipelineKind::Historical, true, &log))
            .register(recorded(PipelineKind::Profile, false, &log));

        let report = coordinator.run_all().await;

        assert_eq!(*log.lock().expect("lock"), PipelineKind::ALL.to_vec());
        assert_eq!(report.aborted(), vec![PipelineKind::Historical]);
        assert!(!report.is_failure());
    }

    #[tokio::test]
    async fn missing_entrypoint_is_the_only_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let coordinator = RunCoordinator::new()
            .register(recorded(PipelineKind::Profile, false, &log))
            .register(recorded(PipelineKind::Financial, false, &log));

        let report = coordinator.run_all().await;

        assert!(report.is_failure());
        assert_eq!(report.missing, vec![PipelineKind::Historical]);
        assert_eq!(report.reports.len(), 2);
        assert!(report.report(PipelineKind::Financial).is_some());
        assert!(matches!(
            coordinator.run(PipelineKind::Historical).await,
            Err(CoordinatorError::NotRegistered(PipelineKind::Historical))
        ));
    }
}
