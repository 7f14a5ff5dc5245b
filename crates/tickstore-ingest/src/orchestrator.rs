//! Per-symbol fetch orchestration.
//!
//! Each sub-pipeline walks its symbols one at a time:
//!
//! ```text
//! Pending -> Fetching -> Transforming -> Storing -> Done
//!               |                           |
//!               +--> Done (empty)           +--> Failed
//!               +--> Failed
//! ```
//!
//! A failed symbol is logged and skipped; nothing is retried. Only an
//! unreachable registry or store, or an expired run deadline, ends a run early.

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::{Date, OffsetDateTime};
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use tickstore_core::transform::{
    bar_to_record, financials_to_record, instrument_from_profile, profile_to_record,
};
use tickstore_core::{
    HistoryPeriod, InstrumentId, JournalEntry, MarketDataProvider, Observation, ObservationStore,
    ProfileSnapshot, ProviderError, RunJournal, SourceKind, StoreError, Symbol, SymbolRegistry,
};

use crate::config::IngestConfig;

/// The three independent sub-pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    Profile,
    Historical,
    Financial,
}

impl PipelineKind {
    /// Run-all order.
    pub const ALL: [PipelineKind; 3] = [
        PipelineKind::Profile,
        PipelineKind::Historical,
        PipelineKind::Financial,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Historical => "historical",
            Self::Financial => "financial",
        }
    }
}

impl Display for PipelineKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one symbol within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchState {
    Pending,
    Fetching,
    Transforming,
    Storing,
    Done,
    Failed,
}

impl FetchState {
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Fetching)
                | (Self::Fetching, Self::Transforming)
                | (Self::Fetching, Self::Done)
                | (Self::Fetching, Self::Failed)
                | (Self::Transforming, Self::Storing)
                | (Self::Storing, Self::Done)
                | (Self::Storing, Self::Failed)
        )
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolStatus {
    /// Records were written.
    Stored,
    /// The provider had nothing for this symbol; storage was skipped.
    Empty,
    Failed,
}

impl SymbolStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stored => "stored",
            Self::Empty => "empty",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolReport {
    pub symbol: Symbol,
    pub status: SymbolStatus,
    pub records: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub transitions: Vec<FetchState>,
}

impl SymbolReport {
    pub fn final_state(&self) -> FetchState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(FetchState::Pending)
    }
}

/// Why a sub-pipeline stopped before its last symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineAbort {
    pub code: &'static str,
    pub message: String,
}

/// Structured outcome of one sub-pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub run_id: String,
    pub pipeline: PipelineKind,
    pub started_at: String,
    pub elapsed_ms: u64,
    pub stored: usize,
    pub empty: usize,
    pub failed: usize,
    pub records: usize,
    pub symbols: Vec<SymbolReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort: Option<PipelineAbort>,
}

impl PipelineReport {
    fn new(run_id: String, pipeline: PipelineKind, started_at: OffsetDateTime) -> Self {
        Self {
            run_id,
            pipeline,
            started_at: started_at.format(&Rfc3339).unwrap_or_default(),
            elapsed_ms: 0,
            stored: 0,
            empty: 0,
            failed: 0,
            records: 0,
            symbols: Vec::new(),
            abort: None,
        }
    }

    fn finish(&mut self, elapsed: Duration) {
        self.elapsed_ms = millis(elapsed);
        self.stored = self.count(SymbolStatus::Stored);
        self.empty = self.count(SymbolStatus::Empty);
        self.failed = self.count(SymbolStatus::Failed);
        self.records = self.symbols.iter().map(|symbol| symbol.records).sum();
    }

    fn count(&self, status: SymbolStatus) -> usize {
        self.symbols
            .iter()
            .filter(|symbol| symbol.status == status)
            .count()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_some()
    }

    pub fn symbol(&self, symbol: &str) -> Option<&SymbolReport> {
        self.symbols
            .iter()
            .find(|report| report.symbol.as_str() == symbol)
    }
}

/// Run-level failures that end a sub-pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("symbol registry unavailable: {0}")]
    Registry(StoreError),

    #[error("store unavailable while processing {symbol}: {source}")]
    StoreUnavailable { symbol: Symbol, source: StoreError },

    #[error("run deadline of {deadline_ms} ms exceeded after {processed} symbols")]
    DeadlineExceeded { deadline_ms: u64, processed: usize },
}

impl PipelineError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Registry(_) => "pipeline.registry_unavailable",
            Self::StoreUnavailable { .. } => "pipeline.store_unavailable",
            Self::DeadlineExceeded { .. } => "pipeline.deadline_exceeded",
        }
    }
}

/// Pacing and dating knobs for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSettings {
    pub call_delay: Duration,
    pub run_deadline: Option<Duration>,
    /// Date stamped on profile and financial observations; UTC today when unset.
    pub fetch_date: Option<Date>,
}

impl From<&IngestConfig> for RunSettings {
    fn from(config: &IngestConfig) -> Self {
        Self {
            call_delay: config.call_delay,
            run_deadline: config.run_deadline,
            fetch_date: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Job {
    Profile,
    Historical(HistoryPeriod),
    Financial,
}

impl Job {
    const fn kind(self) -> PipelineKind {
        match self {
            Self::Profile => PipelineKind::Profile,
            Self::Historical(_) => PipelineKind::Historical,
            Self::Financial => PipelineKind::Financial,
        }
    }
}

struct Target {
    symbol: Symbol,
    instrument_id: Option<InstrumentId>,
}

enum StepError {
    Provider(ProviderError),
    Store(StoreError),
}

struct SymbolTask {
    symbol: Symbol,
    transitions: Vec<FetchState>,
}

impl SymbolTask {
    fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            transitions: vec![FetchState::Pending],
        }
    }

    fn state(&self) -> FetchState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(FetchState::Pending)
    }

    fn advance(&mut self, next: FetchState) {
        debug_assert!(
            self.state().can_transition_to(next),
            "illegal transition {:?} -> {next:?}",
            self.state()
        );
        self.transitions.push(next);
    }

    fn finish(self, status: SymbolStatus, records: usize, error: Option<String>) -> SymbolReport {
        SymbolReport {
            symbol: self.symbol,
            status,
            records,
            error,
            transitions: self.transitions,
        }
    }
}

/// Drives provider calls, transforms, and store writes for each sub-pipeline.
pub struct FetchOrchestrator {
    provider: Arc<dyn MarketDataProvider>,
    registry: Arc<dyn SymbolRegistry>,
    store: Arc<dyn ObservationStore>,
    journal: Option<Arc<dyn RunJournal>>,
    settings: RunSettings,
}

impl FetchOrchestrator {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        registry: Arc<dyn SymbolRegistry>,
        store: Arc<dyn ObservationStore>,
    ) -> Self {
        Self {
            provider,
            registry,
            store,
            journal: None,
            settings: RunSettings::default(),
        }
    }

    pub fn with_journal(mut self, journal: Arc<dyn RunJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Fetches profiles for `watchlist`, registering each instrument found.
    pub async fn run_profile_refresh(&self, watchlist: &[Symbol]) -> PipelineReport {
        self.run(Job::Profile, Some(watchlist)).await
    }

    /// Fetches daily bars for every tracked instrument.
    pub async fn run_historical_refresh(&self, period: HistoryPeriod) -> PipelineReport {
        self.run(Job::Historical(period), None).await
    }

    pub async fn run_financial_refresh(&self) -> PipelineReport {
        self.run(Job::Financial, None).await
    }

    async fn run(&self, job: Job, watchlist: Option<&[Symbol]>) -> PipelineReport {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("pipeline", pipeline = job.kind().as_str(), run_id = %run_id);
        self.run_in_span(job, watchlist, run_id).instrument(span).await
    }

    async fn run_in_span(
        &self,
        job: Job,
        watchlist: Option<&[Symbol]>,
        run_id: String,
    ) -> PipelineReport {
        let started = Instant::now();
        let started_at = OffsetDateTime::now_utc();
        let fetch_date = self.settings.fetch_date.unwrap_or_else(|| started_at.date());
        let mut report = PipelineReport::new(run_id, job.kind(), started_at);
        info!(provider = %self.provider.id(), "sub-pipeline started");

        if let Err(err) = self
            .drive(job, watchlist, fetch_date, started, &mut report.symbols)
            .await
        {
            error!(error = %err, code = err.code(), "sub-pipeline aborted");
            report.abort = Some(PipelineAbort {
                code: err.code(),
                message: err.to_string(),
            });
        }

        report.finish(started.elapsed());
        self.write_journal(&report);
        info!(
            stored = report.stored,
            empty = report.empty,
            failed = report.failed,
            records = report.records,
            aborted = report.is_aborted(),
            elapsed_ms = report.elapsed_ms,
            "sub-pipeline finished"
        );
        report
    }

    async fn drive(
        &self,
        job: Job,
        watchlist: Option<&[Symbol]>,
        fetch_date: Date,
        started: Instant,
        reports: &mut Vec<SymbolReport>,
    ) -> Result<(), PipelineError> {
        let targets: Vec<Target> = match watchlist {
            Some(symbols) => symbols
                .iter()
                .map(|symbol| Target {
                    symbol: symbol.clone(),
                    instrument_id: None,
                })
                .collect(),
            None => self
                .registry
                .list_tracked()
                .map_err(PipelineError::Registry)?
                .into_iter()
                .map(|tracked| Target {
                    symbol: tracked.symbol,
                    instrument_id: Some(tracked.id),
                })
                .collect(),
        };

        for (index, target) in targets.into_iter().enumerate() {
            if index > 0 {
                sleep(self.settings.call_delay).await;
            }
            if let Some(deadline) = self.settings.run_deadline {
                if started.elapsed() >= deadline {
                    return Err(PipelineError::DeadlineExceeded {
                        deadline_ms: millis(deadline),
                        processed: index,
                    });
                }
            }

            let mut task = SymbolTask::new(target.symbol.clone());
            match self.process(job, &target, fetch_date, &mut task).await {
                Ok(Some(records)) => {
                    task.advance(FetchState::Done);
                    info!(symbol = %target.symbol, records, "symbol stored");
                    reports.push(task.finish(SymbolStatus::Stored, records, None));
                }
                Ok(None) => {
                    task.advance(FetchState::Done);
                    info!(symbol = %target.symbol, "no data, storage skipped");
                    reports.push(task.finish(SymbolStatus::Empty, 0, None));
                }
                Err(StepError::Provider(err)) => {
                    task.advance(FetchState::Failed);
                    warn!(symbol = %target.symbol, error = %err, code = err.code(), "fetch failed");
                    reports.push(task.finish(SymbolStatus::Failed, 0, Some(err.to_string())));
                }
                Err(StepError::Store(err)) => {
                    task.advance(FetchState::Failed);
                    error!(symbol = %target.symbol, error = %err, code = err.code(), "store write failed");
                    reports.push(task.finish(SymbolStatus::Failed, 0, Some(err.to_string())));
                    if err.aborts_run() {
                        return Err(PipelineError::StoreUnavailable {
                            symbol: target.symbol,
                            source: err,
                        });
                    }
                }
            }
        }

        Ok(())
    }

    /// Returns the number of records written, or `None` when there was nothing to store.
    async fn process(
        &self,
        job: Job,
        target: &Target,
        fetch_date: Date,
        task: &mut SymbolTask,
    ) -> Result<Option<usize>, StepError> {
        let symbol = &target.symbol;
        task.advance(FetchState::Fetching);

        match job {
            Job::Profile => {
                let profile = match found(symbol, self.provider.profile(symbol).await)? {
                    Some(Some(profile)) if !profile.is_empty() => profile,
                    _ => return Ok(None),
                };

                task.advance(FetchState::Transforming);
                let instrument = instrument_from_profile(&profile);
                let snapshot = ProfileSnapshot {
                    date: fetch_date,
                    processed: profile_to_record(&profile.info),
                    raw: Value::Object(profile.info),
                };

                task.advance(FetchState::Storing);
                self.registry
                    .upsert_instrument_with_profile(&instrument, &snapshot)
                    .map_err(StepError::Store)?;
                Ok(Some(1))
            }
            Job::Historical(period) => {
                let instrument_id = registered(target)?;
                let bars = match found(symbol, self.provider.historical_bars(symbol, period).await)? {
                    Some(bars) if !bars.is_empty() => bars,
                    _ => return Ok(None),
                };

                task.advance(FetchState::Transforming);
                let observations: Vec<Observation> = bars
                    .iter()
                    .map(|bar| Observation {
                        instrument_id,
                        date: bar.date,
                        source_kind: SourceKind::HistoricalBar,
                        raw: bar.raw_payload(),
                        processed: bar_to_record(bar),
                    })
                    .collect();

                task.advance(FetchState::Storing);
                let stored = self
                    .store
                    .upsert_batch(&observations)
                    .map_err(StepError::Store)?;
                Ok(Some(stored))
            }
            Job::Financial => {
                let instrument_id = registered(target)?;
                let statements = match found(symbol, self.provider.financials(symbol).await)? {
                    Some(Some(statements)) if !statements.is_empty() => statements,
                    _ => return Ok(None),
                };

                task.advance(FetchState::Transforming);
                let observation = Observation {
                    instrument_id,
                    date: fetch_date,
                    source_kind: SourceKind::FinancialStatement,
                    raw: statements.raw_payload(),
                    processed: financials_to_record(&statements),
                };

                task.advance(FetchState::Storing);
                self.store.upsert(&observation).map_err(StepError::Store)?;
                Ok(Some(1))
            }
        }
    }

    fn write_journal(&self, report: &PipelineReport) {
        let Some(journal) = &self.journal else {
            return;
        };

        let entries: Vec<JournalEntry> = report
            .symbols
            .iter()
            .map(|symbol| JournalEntry {
                run_id: report.run_id.clone(),
                pipeline: report.pipeline.as_str().to_owned(),
                symbol: symbol.symbol.clone(),
                status: symbol.status.as_str().to_owned(),
                records: symbol.records,
                error: symbol.error.clone(),
            })
            .collect();

        if let Err(err) = journal.record(&entries) {
            warn!(error = %err, "run journal write failed");
        }
    }
}

/// `NotFound` is an empty result, not a failure.
fn found<T>(symbol: &Symbol, result: Result<T, ProviderError>) -> Result<Option<T>, StepError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => {
            debug!(symbol = %symbol, error = %err, "provider does not know symbol");
            Ok(None)
        }
        Err(err) => Err(StepError::Provider(err)),
    }
}

fn registered(target: &Target) -> Result<InstrumentId, StepError> {
    target.instrument_id.ok_or_else(|| {
        StepError::Store(StoreError::constraint_violation(format!(
            "{} is not a tracked instrument",
            target.symbol
        )))
    })
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use serde_json::json;
    use tickstore_core::{
        Bar, Capability, FixtureProvider, InstrumentProfile, StoreErrorKind, TrackedInstrument,
    };
    use time::macros::date;

    use super::*;

    #[derive(Default)]
    struct MemoryStore {
        instruments: Mutex<Vec<TrackedInstrument>>,
        rows: Mutex<Vec<Observation>>,
        writes: AtomicUsize,
        failing: Mutex<Option<(Symbol, StoreError)>>,
        registry_down: bool,
    }

    impl MemoryStore {
        fn tracking(symbols: &[&str]) -> Arc<Self> {
            let store = Self::default();
            for symbol in symbols {
                store
                    .upsert_instrument(&InstrumentProfile::bare(sym(symbol)))
                    .expect("register");
            }
            Arc::new(store)
        }

        fn failing_for(self: Arc<Self>, symbol: &str, error: StoreError) -> Arc<Self> {
            *self.failing.lock().expect("lock") = Some((sym(symbol), error));
            self
        }

        fn rows_for(&self, symbol: &str, kind: SourceKind) -> Vec<Observation> {
            let id = self
                .instruments
                .lock()
                .expect("lock")
                .iter()
                .find(|tracked| tracked.symbol.as_str() == symbol)
                .map(|tracked| tracked.id);
            self.rows
                .lock()
                .expect("lock")
                .iter()
                .filter(|row| Some(row.instrument_id) == id && row.source_kind == kind)
                .cloned()
                .collect()
        }

        fn check(&self, instrument_id: InstrumentId) -> Result<(), StoreError> {
            let instruments = self.instruments.lock().expect("lock");
            let failing = self.failing.lock().expect("lock");
            match &*failing {
                Some((symbol, error))
                    if instruments
                        .iter()
                        .any(|t| t.id == instrument_id && &t.symbol == symbol) =>
                {
                    Err(error.clone())
                }
                _ => Ok(()),
            }
        }

        fn check_symbol(&self, symbol: &Symbol) -> Result<(), StoreError> {
            match &*self.failing.lock().expect("lock") {
                Some((failing, error)) if failing == symbol => Err(error.clone()),
                _ => Ok(()),
            }
        }

        fn merge(&self, observations: &[Observation]) {
            let mut rows = self.rows.lock().expect("lock");
            for observation in observations {
                rows.retain(|row| {
                    (row.instrument_id, row.date, row.source_kind)
                        != (observation.instrument_id, observation.date, observation.source_kind)
                });
                rows.push(observation.clone());
            }
        }
    }

    impl SymbolRegistry for MemoryStore {
        fn list_tracked(&self) -> Result<Vec<TrackedInstrument>, StoreError> {
            if self.registry_down {
                return Err(StoreError::unavailable("connection refused"));
            }
            Ok(self.instruments.lock().expect("lock").clone())
        }

        fn upsert_instrument(&self, profile: &InstrumentProfile) -> Result<InstrumentId, StoreError> {
            let mut instruments = self.instruments.lock().expect("lock");
            if let Some(existing) = instruments.iter().find(|t| t.symbol == profile.symbol) {
                return Ok(existing.id);
            }
            let id = InstrumentId::new(instruments.len() as i64 + 1);
            instruments.push(TrackedInstrument {
                id,
                symbol: profile.symbol.clone(),
            });
            Ok(id)
        }

        fn upsert_instrument_with_profile(
            &self,
            profile: &InstrumentProfile,
            snapshot: &ProfileSnapshot,
        ) -> Result<InstrumentId, StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.check_symbol(&profile.symbol)?;
            let id = self.upsert_instrument(profile)?;
            self.merge(&[snapshot.observation(id)]);
            Ok(id)
        }
    }

    impl ObservationStore for MemoryStore {
        fn upsert(&self, observation: &Observation) -> Result<(), StoreError> {
            self.upsert_batch(std::slice::from_ref(observation)).map(|_| ())
        }

        fn upsert_batch(&self, observations: &[Observation]) -> Result<usize, StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            for observation in observations {
                self.check(observation.instrument_id)?;
            }
            self.merge(observations);
            Ok(observations.len())
        }
    }

    #[derive(Default)]
    struct MemoryJournal {
        entries: Mutex<Vec<JournalEntry>>,
        broken: bool,
    }

    impl RunJournal for MemoryJournal {
        fn record(&self, entries: &[JournalEntry]) -> Result<(), StoreError> {
            if self.broken {
                return Err(StoreError::internal("journal table missing"));
            }
            self.entries.lock().expect("lock").extend_from_slice(entries);
            Ok(())
        }
    }

    fn sym(symbol: &str) -> Symbol {
        Symbol::parse(symbol).expect("valid symbol")
    }

    fn orchestrator(provider: Arc<FixtureProvider>, store: Arc<MemoryStore>) -> FetchOrchestrator {
        FetchOrchestrator::new(provider, store.clone(), store).with_settings(RunSettings {
            fetch_date: Some(date!(2024 - 07 - 01)),
            ..RunSettings::default()
        })
    }

    #[tokio::test]
    async fn failing_symbol_does_not_stop_its_neighbours() {
        let store = MemoryStore::tracking(&["AAA", "BBB", "CCC"]);
        let provider = Arc::new(FixtureProvider::new().fail(
            &sym("BBB"),
            ProviderError::unavailable("upstream timeout"),
        ));

        let report = orchestrator(provider, store.clone())
            .run_historical_refresh(HistoryPeriod::OneMonth)
            .await;

        assert!(!report.is_aborted());
        assert_eq!((report.stored, report.failed), (2, 1));
        assert_eq!(store.rows_for("AAA", SourceKind::HistoricalBar).len(), 21);
        assert_eq!(store.rows_for("CCC", SourceKind::HistoricalBar).len(), 21);
        assert!(store.rows_for("BBB", SourceKind::HistoricalBar).is_empty());

        let failed = report.symbol("BBB").expect("BBB reported");
        assert_eq!(
            failed.transitions,
            vec![FetchState::Pending, FetchState::Fetching, FetchState::Failed]
        );
        assert!(failed
            .error
            .as_deref()
            .is_some_and(|e| e.contains("upstream timeout")));
    }

    #[tokio::test]
    async fn two_bars_for_one_symbol_and_a_failure_for_the_other() {
        let store = MemoryStore::tracking(&["AAA", "BBB"]);
        let bars = vec![
            Bar::ohlcv(date!(2024 - 03 - 01), 10.0, 11.0, 9.5, 10.5, 1_000),
            Bar::ohlcv(date!(2024 - 03 - 04), 10.5, 12.0, 10.0, 11.5, 2_000),
        ];
        let provider = Arc::new(
            FixtureProvider::new()
                .with_bars(&sym("AAA"), bars)
                .fail(&sym("BBB"), ProviderError::unavailable("boom")),
        );

        let report = orchestrator(provider, store.clone())
            .run_historical_refresh(HistoryPeriod::OneYear)
            .await;

        let rows = store.rows_for("AAA", SourceKind::HistoricalBar);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].processed["close"], json!(10.5));
        assert!(store.rows_for("BBB", SourceKind::HistoricalBar).is_empty());
        assert_eq!(report.failed, 1);
        assert_eq!(report.records, 2);
    }

    #[tokio::test]
    async fn empty_profile_makes_no_storage_calls() {
        let store = Arc::new(MemoryStore::default());
        let provider = Arc::new(FixtureProvider::new().empty(&sym("AAA")));

        let report = orchestrator(provider, store.clone())
            .run_profile_refresh(&[sym("AAA")])
            .await;

        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
        assert!(store.instruments.lock().expect("lock").is_empty());
        let outcome = report.symbol("AAA").expect("reported");
        assert_eq!(outcome.status, SymbolStatus::Empty);
        assert_eq!(outcome.final_state(), FetchState::Done);
        assert_eq!(
            outcome.transitions,
            vec![FetchState::Pending, FetchState::Fetching, FetchState::Done]
        );
    }

    #[tokio::test]
    async fn not_found_is_treated_as_empty() {
        let store = MemoryStore::tracking(&["ZZZZ"]);
        let provider = Arc::new(FixtureProvider::new().fail_on(
            Capability::Financials,
            &sym("ZZZZ"),
            ProviderError::not_found("no such symbol"),
        ));

        let report = orchestrator(provider, store.clone())
            .run_financial_refresh()
            .await;

        assert_eq!((report.empty, report.failed), (1, 0));
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn profile_refresh_registers_instruments_and_dates_snapshots_to_fetch_day() {
        let store = Arc::new(MemoryStore::default());
        let provider = Arc::new(FixtureProvider::new());

        let report = orchestrator(provider, store.clone())
            .run_profile_refresh(&[sym("MSFT"), sym("AAPL")])
            .await;

        assert_eq!(report.stored, 2);
        let tracked = store.list_tracked().expect("list");
        assert_eq!(
            tracked.iter().map(|t| t.symbol.as_str()).collect::<Vec<_>>(),
            vec!["MSFT", "AAPL"]
        );
        let rows = store.rows_for("AAPL", SourceKind::Profile);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date, date!(2024 - 07 - 01));
        let outcome = report.symbol("AAPL").expect("reported");
        assert_eq!(
            outcome.transitions,
            vec![
                FetchState::Pending,
                FetchState::Fetching,
                FetchState::Transforming,
                FetchState::Storing,
                FetchState::Done
            ]
        );
    }

    #[tokio::test]
    async fn rejected_profile_write_registers_nothing() {
        let store = Arc::new(MemoryStore::default()).failing_for(
            "AAA",
            StoreError::constraint_violation("check constraint failed"),
        );
        let provider = Arc::new(FixtureProvider::new());

        let report = orchestrator(provider, store.clone())
            .run_profile_refresh(&[sym("AAA"), sym("BBB")])
            .await;

        assert!(!report.is_aborted());
        assert_eq!(report.symbol("AAA").map(|s| s.status), Some(SymbolStatus::Failed));
        let tracked = store.list_tracked().expect("list");
        assert_eq!(
            tracked.iter().map(|t| t.symbol.as_str()).collect::<Vec<_>>(),
            vec!["BBB"]
        );
        assert!(store.rows_for("AAA", SourceKind::Profile).is_empty());
    }

    #[tokio::test]
    async fn unavailable_store_aborts_the_rest_of_the_run() {
        let store = MemoryStore::tracking(&["AAA", "BBB", "CCC"])
            .failing_for("BBB", StoreError::unavailable("disk detached"));
        let provider = Arc::new(FixtureProvider::new());

        let report = orchestrator(provider.clone(), store.clone())
            .run_financial_refresh()
            .await;

        let abort = report.abort.as_ref().expect("aborted");
        assert_eq!(abort.code, "pipeline.store_unavailable");
        assert_eq!(provider.call_count(Capability::Financials), 2);
        assert_eq!(store.rows_for("AAA", SourceKind::FinancialStatement).len(), 1);
        let failed = report.symbol("BBB").expect("reported");
        assert_eq!(failed.final_state(), FetchState::Failed);
        assert!(report.symbol("CCC").is_none());
    }

    #[tokio::test]
    async fn constraint_violation_fails_only_the_item() {
        let store = MemoryStore::tracking(&["AAA", "BBB", "CCC"]).failing_for(
            "BBB",
            StoreError::constraint_violation("check constraint failed"),
        );
        let provider = Arc::new(FixtureProvider::new());

        let report = orchestrator(provider, store.clone())
            .run_financial_refresh()
            .await;

        assert!(!report.is_aborted());
        assert_eq!((report.stored, report.failed), (2, 1));
        assert_eq!(store.rows_for("CCC", SourceKind::FinancialStatement).len(), 1);
        assert_eq!(
            report.symbol("BBB").expect("reported").transitions,
            vec![
                FetchState::Pending,
                FetchState::Fetching,
                FetchState::Transforming,
                FetchState::Storing,
                FetchState::Failed
            ]
        );
        assert_eq!(
            StoreError::constraint_violation("x").kind(),
            StoreErrorKind::ConstraintViolation
        );
    }

    #[tokio::test]
    async fn unreachable_registry_aborts_before_any_fetch() {
        let store = Arc::new(MemoryStore {
            registry_down: true,
            ..MemoryStore::default()
        });
        let provider = Arc::new(FixtureProvider::new());

        let report = orchestrator(provider.clone(), store)
            .run_historical_refresh(HistoryPeriod::OneYear)
            .await;

        assert_eq!(
            report.abort.map(|abort| abort.code),
            Some("pipeline.registry_unavailable")
        );
        assert!(provider.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn delay_runs_between_symbols_whatever_the_outcome() {
        let store = MemoryStore::tracking(&["AAA", "BBB", "CCC"]);
        let provider = Arc::new(
            FixtureProvider::new().fail(&sym("AAA"), ProviderError::unavailable("down")),
        );
        let orchestrator = orchestrator(provider, store).with_settings(RunSettings {
            call_delay: Duration::from_secs(1),
            ..RunSettings::default()
        });

        let started = Instant::now();
        let report = orchestrator
            .run_historical_refresh(HistoryPeriod::FiveDays)
            .await;
        let elapsed = started.elapsed();

        assert_eq!(report.symbols.len(), 3);
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_is_checked_before_each_symbol() {
        let store = MemoryStore::tracking(&["AAA", "BBB", "CCC"]);
        let provider = Arc::new(FixtureProvider::new());
        let orchestrator = orchestrator(provider.clone(), store).with_settings(RunSettings {
            call_delay: Duration::from_secs(10),
            run_deadline: Some(Duration::from_secs(15)),
            fetch_date: None,
        });

        let report = orchestrator.run_financial_refresh().await;

        assert_eq!(
            report.abort.as_ref().map(|abort| abort.code),
            Some("pipeline.deadline_exceeded")
        );
        assert_eq!(report.stored, 2);
        assert_eq!(provider.call_count(Capability::Financials), 2);
    }

    #[tokio::test]
    async fn zero_deadline_stops_before_the_first_call() {
        let store = MemoryStore::tracking(&["AAA"]);
        let provider = Arc::new(FixtureProvider::new());
        let orchestrator = orchestrator(provider.clone(), store).with_settings(RunSettings {
            run_deadline: Some(Duration::ZERO),
            ..RunSettings::default()
        });

        let report = orchestrator.run_financial_refresh().await;

        assert!(report.is_aborted());
        assert!(report.symbols.is_empty());
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn journal_gets_one_entry_per_symbol_and_its_failures_are_ignored() {
        let store = MemoryStore::tracking(&["AAA", "BBB"]);
        let provider = Arc::new(
            FixtureProvider::new().fail(&sym("BBB"), ProviderError::rate_limited("slow down")),
        );
        let journal = Arc::new(MemoryJournal::default());

        let report = orchestrator(provider.clone(), store.clone())
            .with_journal(journal.clone())
            .run_historical_refresh(HistoryPeriod::FiveDays)
            .await;

        let entries = journal.entries.lock().expect("lock").clone();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|entry| entry.run_id == report.run_id));
        assert_eq!(entries[0].status, "stored");
        assert_eq!(entries[1].status, "failed");
        assert_eq!(entries[1].pipeline, "historical");

        let broken = Arc::new(MemoryJournal {
            broken: true,
            ..MemoryJournal::default()
        });
        let report = orchestrator(provider, store)
            .with_journal(broken)
            .run_historical_refresh(HistoryPeriod::FiveDays)
            .await;
        assert!(!report.is_aborted());
    }

    #[test]
    fn only_documented_transitions_are_legal() {
        assert!(FetchState::Pending.can_transition_to(FetchState::Fetching));
        assert!(FetchState::Fetching.can_transition_to(FetchState::Done));
        assert!(FetchState::Storing.can_transition_to(FetchState::Failed));
        assert!(!FetchState::Pending.can_transition_to(FetchState::Done));
        assert!(!FetchState::Done.can_transition_to(FetchState::Fetching));
        assert!(!FetchState::Transforming.can_transition_to(FetchState::Failed));
        assert!(FetchState::Failed.is_terminal());
    }
}
