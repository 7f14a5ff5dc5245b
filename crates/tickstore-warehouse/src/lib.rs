//! # Tickstore Warehouse
//!
//! DuckDB-backed implementation of the tickstore store contracts.
//!
//! ## Overview
//!
//! - [`SymbolRegistry`]: `instruments` table, unique by symbol
//! - [`ObservationStore`]: `observations` table, unique by
//!   `(instrument_id, date, source_kind)` with merge-on-conflict upserts
//! - [`RunJournal`]: `ingest_log` audit rows, one per symbol outcome
//!
//! Every write runs in its own transaction and is rolled back in full on
//! failure, so a reader never sees a raw payload without its processed twin.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tickstore_core::{InstrumentProfile, Symbol, SymbolRegistry};
//! use tickstore_warehouse::{Warehouse, WarehouseConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open(WarehouseConfig::new("/tmp/tickstore", "stock_analytics"))?;
//!     let id = warehouse.upsert_instrument(&InstrumentProfile::bare(Symbol::parse("AAPL")?))?;
//!     println!("AAPL is instrument {id}");
//!     Ok(())
//! }
//! ```
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `instruments` | Registry of tracked instruments |
//! | `observations` | Raw and processed payloads per instrument, date, and source kind |
//! | `ingest_log` | Per-symbol outcomes of every sub-pipeline run |
//! | `schema_migrations` | Applied migration versions |

pub mod duckdb;
pub mod migrations;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::{Connection, OptionalExt, ToSql};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use time::Date;
use tracing::debug;

use tickstore_core::domain::{format_date, parse_date};
use tickstore_core::{
    InstrumentId, InstrumentProfile, JournalEntry, Observation, ObservationStore, ProfileSnapshot,
    RunJournal, SourceKind, StoreError, Symbol, SymbolRegistry, TrackedInstrument,
};

pub use crate::duckdb::{DuckDbConnectionManager, PooledConnection};

/// Default database name, resolved to `<home>/<name>.duckdb`.
pub const DEFAULT_DATABASE: &str = "stock_analytics";

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// Database file could not be opened or a connection could not be acquired.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("instrument {0} is not registered")]
    UnknownInstrument(InstrumentId),

    #[error("invalid stored data: {0}")]
    InvalidData(String),
}

impl From<WarehouseError> for StoreError {
    fn from(error: WarehouseError) -> Self {
        let message = error.to_string();
        match &error {
            WarehouseError::Unavailable(_) | WarehouseError::Io(_) => {
                StoreError::unavailable(message)
            }
            WarehouseError::UnknownInstrument(_) => StoreError::constraint_violation(message),
            WarehouseError::DuckDb(_) if message.contains("Constraint Error") => {
                StoreError::constraint_violation(message)
            }
            WarehouseError::DuckDb(_)
                if message.contains("IO Error") || message.contains("Connection Error") =>
            {
                StoreError::unavailable(message)
            }
            _ => StoreError::internal(message),
        }
    }
}

/// Configuration for the warehouse database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarehouseConfig {
    /// Root directory for tickstore data.
    pub home: PathBuf,
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Maximum number of idle connections kept in the pool.
    pub max_pool_size: usize,
}

impl WarehouseConfig {
    pub fn new(home: impl Into<PathBuf>, database: &str) -> Self {
        let home = home.into();
        let db_path = home.join(format!("{database}.duckdb"));
        Self {
            home,
            db_path,
            max_pool_size: 4,
        }
    }

    pub fn with_db_path(mut self, db_path: impl Into<PathBuf>) -> Self {
        self.db_path = db_path.into();
        self
    }

    pub fn with_max_pool_size(mut self, max_pool_size: usize) -> Self {
        self.max_pool_size = max_pool_size;
        self
    }
}

/// Registry row with its descriptive attributes and timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstrumentRecord {
    pub id: InstrumentId,
    pub symbol: Symbol,
    pub name: Option<String>,
    pub exchange: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub country: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Observation as persisted, with its timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObservation {
    pub instrument_id: InstrumentId,
    pub date: Date,
    pub source_kind: SourceKind,
    pub raw: Value,
    pub processed: Value,
    pub created_at: String,
    pub updated_at: String,
}

/// Row counts reported by `tickstore status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarehouseSummary {
    pub db_path: PathBuf,
    pub instruments: usize,
    pub observations: BTreeMap<String, usize>,
    pub runs: usize,
}

/// The DuckDB store shared by all sub-pipelines.
#[derive(Clone)]
pub struct Warehouse {
    config: WarehouseConfig,
    manager: DuckDbConnectionManager,
}

impl Warehouse {
    /// Open the database file (creating it if needed) and apply migrations.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let manager = DuckDbConnectionManager::open(config.db_path.clone(), config.max_pool_size)
            .map_err(|e| {
                WarehouseError::Unavailable(format!(
                    "cannot open {}: {e}",
                    config.db_path.display()
                ))
            })?;
        let warehouse = Self { config, manager };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.connection()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    pub fn config(&self) -> &WarehouseConfig {
        &self.config
    }

    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    fn connection(&self) -> Result<PooledConnection, WarehouseError> {
        self.manager
            .acquire()
            .map_err(|e| WarehouseError::Unavailable(format!("cannot acquire connection: {e}")))
    }

    /// Insert the instrument or update its descriptive fields, keeping its id.
    pub fn write_instrument(&self, profile: &InstrumentProfile) -> Result<InstrumentId, WarehouseError> {
        let connection = self.connection()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = upsert_instrument_row(&connection, profile);
        finalize_transaction(&connection, result)
    }

    /// Register the instrument and store its profile snapshot under one commit.
    pub fn write_profile(
        &self,
        profile: &InstrumentProfile,
        snapshot: &ProfileSnapshot,
    ) -> Result<InstrumentId, WarehouseError> {
        let connection = self.connection()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<InstrumentId, WarehouseError> {
            let id = upsert_instrument_row(&connection, profile)?;
            upsert_observation_row(&connection, &snapshot.observation(id))?;
            Ok(id)
        })();

        finalize_transaction(&connection, result)
    }

    /// Upsert observations in one transaction; all land or none do.
    pub fn write_observations(&self, observations: &[Observation]) -> Result<usize, WarehouseError> {
        if observations.is_empty() {
            return Ok(0);
        }

        let connection = self.connection()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<usize, WarehouseError> {
            let mut known = BTreeSet::new();
            for observation in observations {
                ensure_instrument(&connection, observation.instrument_id, &mut known)?;
                upsert_observation_row(&connection, observation)?;
            }
            Ok(observations.len())
        })();

        finalize_transaction(&connection, result)
    }

    pub fn write_journal(&self, entries: &[JournalEntry]) -> Result<(), WarehouseError> {
        if entries.is_empty() {
            return Ok(());
        }

        let connection = self.connection()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<(), WarehouseError> {
            for entry in entries {
                let records = i64::try_from(entry.records).unwrap_or(i64::MAX);
                let params: [&dyn ToSql; 6] = [
                    &entry.run_id,
                    &entry.pipeline,
                    &entry.symbol.as_str(),
                    &entry.status,
                    &records,
                    &entry.error,
                ];
                connection.execute(
                    "INSERT INTO ingest_log \
                     (run_id, pipeline, symbol, status, records, error, timestamp) \
                     VALUES (?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)",
                    params.as_slice(),
                )?;
            }
            Ok(())
        })();

        finalize_transaction(&connection, result)
    }

    pub fn instruments(&self) -> Result<Vec<InstrumentRecord>, WarehouseError> {
        let connection = self.connection()?;
        query_instruments(&connection, "", &[])
    }

    pub fn instrument_by_symbol(&self, symbol: &Symbol) -> Result<Option<InstrumentRecord>, WarehouseError> {
        let connection = self.connection()?;
        let params: [&dyn ToSql; 1] = [&symbol.as_str()];
        let mut records = query_instruments(&connection, "WHERE symbol = ?", params.as_slice())?;
        Ok(records.pop())
    }

    /// Observations of one kind for an instrument, oldest first.
    pub fn observations_for(
        &self,
        instrument_id: InstrumentId,
        kind: SourceKind,
    ) -> Result<Vec<StoredObservation>, WarehouseError> {
        let connection = self.connection()?;
        let id = instrument_id.get();
        let params: [&dyn ToSql; 2] = [&id, &kind.as_str()];
        let mut statement = connection.prepare(
            "SELECT CAST(date AS VARCHAR), raw_payload, processed_payload, \
                    CAST(created_at AS VARCHAR), CAST(updated_at AS VARCHAR) \
             FROM observations \
             WHERE instrument_id = ? AND source_kind = ? \
             ORDER BY date",
        )?;
        let rows = statement
            .query_map(params.as_slice(), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(date, raw, processed, created_at, updated_at)| {
                Ok(StoredObservation {
                    instrument_id,
                    date: parse_date(&date).map_err(|e| WarehouseError::InvalidData(e.to_string()))?,
                    source_kind: kind,
                    raw: serde_json::from_str(&raw)?,
                    processed: serde_json::from_str(&processed)?,
                    created_at,
                    updated_at,
                })
            })
            .collect()
    }

    pub fn count_observations(&self, kind: Option<SourceKind>) -> Result<usize, WarehouseError> {
        let connection = self.connection()?;
        let count: i64 = match kind {
            Some(kind) => {
                let params: [&dyn ToSql; 1] = [&kind.as_str()];
                connection.query_row(
                    "SELECT COUNT(*) FROM observations WHERE source_kind = ?",
                    params.as_slice(),
                    |row| row.get(0),
                )?
            }
            None => connection.query_row("SELECT COUNT(*) FROM observations", [], |row| row.get(0))?,
        };
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub fn journal_entries(&self, run_id: &str) -> Result<Vec<JournalEntry>, WarehouseError> {
        let connection = self.connection()?;
        let params: [&dyn ToSql; 1] = [&run_id];
        let mut statement = connection.prepare(
            "SELECT run_id, pipeline, symbol, status, records, error \
             FROM ingest_log WHERE run_id = ? ORDER BY timestamp, symbol",
        )?;
        let rows = statement
            .query_map(params.as_slice(), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(run_id, pipeline, symbol, status, records, error)| {
                Ok(JournalEntry {
                    run_id,
                    pipeline,
                    symbol: Symbol::parse(&symbol)
                        .map_err(|e| WarehouseError::InvalidData(e.to_string()))?,
                    status,
                    records: usize::try_from(records).unwrap_or_default(),
                    error,
                })
            })
            .collect()
    }

    pub fn summary(&self) -> Result<WarehouseSummary, WarehouseError> {
        let connection = self.connection()?;
        let instruments: i64 =
            connection.query_row("SELECT COUNT(*) FROM instruments", [], |row| row.get(0))?;
        let runs: i64 = connection.query_row(
            "SELECT COUNT(DISTINCT run_id) FROM ingest_log",
            [],
            |row| row.get(0),
        )?;

        let mut observations = BTreeMap::new();
        for kind in SourceKind::ALL {
            observations.insert(kind.as_str().to_owned(), 0);
        }
        let mut statement = connection
            .prepare("SELECT source_kind, COUNT(*) FROM observations GROUP BY source_kind")?;
        let counts = statement
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        for (kind, count) in counts {
            observations.insert(kind, usize::try_from(count).unwrap_or_default());
        }

        Ok(WarehouseSummary {
            db_path: self.db_path().to_path_buf(),
            instruments: usize::try_from(instruments).unwrap_or_default(),
            observations,
            runs: usize::try_from(runs).unwrap_or_default(),
        })
    }
}

impl SymbolRegistry for Warehouse {
    fn list_tracked(&self) -> Result<Vec<TrackedInstrument>, StoreError> {
        let records = self.instruments()?;
        Ok(records
            .into_iter()
            .map(|record| TrackedInstrument {
                id: record.id,
                symbol: record.symbol,
            })
            .collect())
    }

    fn upsert_instrument(&self, profile: &InstrumentProfile) -> Result<InstrumentId, StoreError> {
        let id = self.write_instrument(profile)?;
        debug!(symbol = %profile.symbol, instrument_id = %id, "instrument upserted");
        Ok(id)
    }

    fn upsert_instrument_with_profile(
        &self,
        profile: &InstrumentProfile,
        snapshot: &ProfileSnapshot,
    ) -> Result<InstrumentId, StoreError> {
        let id = self.write_profile(profile, snapshot)?;
        debug!(symbol = %profile.symbol, instrument_id = %id, "instrument and profile upserted");
        Ok(id)
    }
}

impl ObservationStore for Warehouse {
    fn upsert(&self, observation: &Observation) -> Result<(), StoreError> {
        self.write_observations(std::slice::from_ref(observation))?;
        Ok(())
    }

    fn upsert_batch(&self, observations: &[Observation]) -> Result<usize, StoreError> {
        Ok(self.write_observations(observations)?)
    }
}

impl RunJournal for Warehouse {
    fn record(&self, entries: &[JournalEntry]) -> Result<(), StoreError> {
        Ok(self.write_journal(entries)?)
    }
}

/// Finalize a transaction, committing on success or rolling back on failure.
fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => match connection.execute_batch("COMMIT") {
            Ok(()) => Ok(value),
            Err(error) => {
                // A conflicting commit must not leave the pooled connection mid-transaction.
                let _ = connection.execute_batch("ROLLBACK");
                Err(error.into())
            }
        },
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

fn upsert_instrument_row(
    connection: &Connection,
    profile: &InstrumentProfile,
) -> Result<InstrumentId, WarehouseError> {
    let params: [&dyn ToSql; 1] = [&profile.symbol.as_str()];
    let existing: Option<i64> = connection
        .query_row(
            "SELECT id FROM instruments WHERE symbol = ?",
            params.as_slice(),
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            let params: [&dyn ToSql; 6] = [
                &profile.name,
                &profile.exchange,
                &profile.sector,
                &profile.industry,
                &profile.country,
                &id,
            ];
            connection.execute(
                "UPDATE instruments \
                 SET name = ?, exchange = ?, sector = ?, industry = ?, country = ?, \
                     updated_at = CURRENT_TIMESTAMP \
                 WHERE id = ?",
                params.as_slice(),
            )?;
            Ok(InstrumentId::new(id))
        }
        None => {
            let id: i64 = connection.query_row(
                "SELECT nextval('instruments_id_seq')",
                [],
                |row| row.get(0),
            )?;
            let params: [&dyn ToSql; 7] = [
                &id,
                &profile.symbol.as_str(),
                &profile.name,
                &profile.exchange,
                &profile.sector,
                &profile.industry,
                &profile.country,
            ];
            connection.execute(
                "INSERT INTO instruments \
                 (id, symbol, name, exchange, sector, industry, country, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)",
                params.as_slice(),
            )?;
            Ok(InstrumentId::new(id))
        }
    }
}

fn upsert_observation_row(
    connection: &Connection,
    observation: &Observation,
) -> Result<(), WarehouseError> {
    let instrument_id = observation.instrument_id.get();
    let date = format_date(observation.date);
    let raw = serde_json::to_string(&observation.raw)?;
    let processed = serde_json::to_string(&observation.processed)?;
    let params: [&dyn ToSql; 5] = [
        &instrument_id,
        &date,
        &observation.source_kind.as_str(),
        &raw,
        &processed,
    ];
    connection.execute(
        "INSERT INTO observations \
         (instrument_id, date, source_kind, raw_payload, processed_payload, created_at, updated_at) \
         VALUES (?, CAST(? AS DATE), ?, ?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP) \
         ON CONFLICT (instrument_id, date, source_kind) DO UPDATE SET \
             raw_payload = EXCLUDED.raw_payload, \
             processed_payload = EXCLUDED.processed_payload, \
             updated_at = CURRENT_TIMESTAMP",
        params.as_slice(),
    )?;
    Ok(())
}

fn ensure_instrument(
    connection: &Connection,
    instrument_id: InstrumentId,
    known: &mut BTreeSet<InstrumentId>,
) -> Result<(), WarehouseError> {
    if known.contains(&instrument_id) {
        return Ok(());
    }

    let id = instrument_id.get();
    let params: [&dyn ToSql; 1] = [&id];
    let count: i64 = connection.query_row(
        "SELECT COUNT(*) FROM instruments WHERE id = ?",
        params.as_slice(),
        |row| row.get(0),
    )?;
    if count == 0 {
        return Err(WarehouseError::UnknownInstrument(instrument_id));
    }
    known.insert(instrument_id);
    Ok(())
}

fn query_instruments(
    connection: &Connection,
    filter: &str,
    params: &[&dyn ToSql],
) -> Result<Vec<InstrumentRecord>, WarehouseError> {
    let sql = format!(
        "SELECT id, symbol, name, exchange, sector, industry, country, \
                CAST(created_at AS VARCHAR), CAST(updated_at AS VARCHAR) \
         FROM instruments {filter} ORDER BY id"
    );
    let mut statement = connection.prepare(&sql)?;
    let rows = statement
        .query_map(params, |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(
            |(id, symbol, name, exchange, sector, industry, country, created_at, updated_at)| {
                Ok(InstrumentRecord {
                    id: InstrumentId::new(id),
                    symbol: Symbol::parse(&symbol)
                        .map_err(|e| WarehouseError::InvalidData(e.to_string()))?,
                    name,
                    exchange,
                    sector,
                    industry,
                    country,
                    created_at,
                    updated_at,
                })
            },
        )
        .collect()
}
