//! # Domain Models
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Symbol`] | Validated, upper-cased ticker |
//! | [`InstrumentProfile`] | Descriptive registry attributes |
//! | [`TrackedInstrument`] | Registry `(id, symbol)` row |
//! | [`SourceKind`] | `profile`, `historical-bar`, `financial-statement` |
//! | [`HistoryPeriod`] | Relative lookback window (`1y`, `6mo`, ...) |
//! | [`ProfileData`] | Provider-native profile info map |
//! | [`Bar`] | Provider-native daily bar |
//! | [`FinancialStatements`] | Statements keyed by fiscal period |
//! | [`Observation`] | Store-ready `(instrument, date, kind)` record |
//! | [`ProfileSnapshot`] | Profile payloads awaiting an instrument id |

mod models;
mod symbol;

pub use models::{
    format_date, parse_date, Bar, FinancialStatements, HistoryPeriod, InstrumentId,
    InstrumentProfile, Observation, ProfileData, ProfileSnapshot, SourceKind, TrackedInstrument,
};
pub use symbol::Symbol;
