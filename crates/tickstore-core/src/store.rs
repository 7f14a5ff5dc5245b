//! Persistence contracts.
//!
//! Store calls are synchronous: each one acquires a connection, does one unit
//! of work, and releases it before returning, so no connection is ever held
//! across a provider call.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{
    InstrumentId, InstrumentProfile, Observation, ProfileSnapshot, Symbol, TrackedInstrument,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Backing store unreachable; aborts the current sub-pipeline.
    Unavailable,
    /// Write rejected by a schema rule; fatal for the item only.
    ConstraintViolation,
    /// Anything else; treated as fatal for the item.
    Internal,
}

/// Structured store failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    kind: StoreErrorKind,
    message: String,
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Unavailable,
            message: message.into(),
        }
    }

    pub fn constraint_violation(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::ConstraintViolation,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Internal,
            message: message.into(),
        }
    }

    pub const fn kind(&self) -> StoreErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether this failure should end the whole sub-pipeline run.
    pub const fn aborts_run(&self) -> bool {
        matches!(self.kind, StoreErrorKind::Unavailable)
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            StoreErrorKind::Unavailable => "store.unavailable",
            StoreErrorKind::ConstraintViolation => "store.constraint_violation",
            StoreErrorKind::Internal => "store.internal",
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for StoreError {}

/// Durable set of tracked instruments.
pub trait SymbolRegistry: Send + Sync {
    /// All tracked instruments in registry order (ascending id).
    fn list_tracked(&self) -> Result<Vec<TrackedInstrument>, StoreError>;

    /// Inserts the instrument, or updates its descriptive fields and keeps its id.
    fn upsert_instrument(&self, profile: &InstrumentProfile) -> Result<InstrumentId, StoreError>;

    /// Upserts the instrument and its profile snapshot in one transaction.
    ///
    /// A failed snapshot write leaves the registry untouched.
    fn upsert_instrument_with_profile(
        &self,
        profile: &InstrumentProfile,
        snapshot: &ProfileSnapshot,
    ) -> Result<InstrumentId, StoreError>;
}

/// Keyed observation store with merge-on-conflict writes.
pub trait ObservationStore: Send + Sync {
    /// Atomic insert-or-merge on `(instrument_id, date, source_kind)`.
    ///
    /// On conflict both payloads are replaced and the update timestamp refreshed.
    fn upsert(&self, observation: &Observation) -> Result<(), StoreError>;

    /// Upserts every observation in one transaction: all rows land or none do.
    fn upsert_batch(&self, observations: &[Observation]) -> Result<usize, StoreError>;
}

/// One per-symbol outcome row written to the run journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub run_id: String,
    pub pipeline: String,
    pub symbol: Symbol,
    pub status: String,
    pub records: usize,
    pub error: Option<String>,
}

/// Append-only audit trail of sub-pipeline runs.
pub trait RunJournal: Send + Sync {
    fn record(&self, entries: &[JournalEntry]) -> Result<(), StoreError>;
}
