//! # Tickstore Core
//!
//! Domain contracts shared by every tickstore crate.
//!
//! ## Overview
//!
//! - **Domain models** for instruments, profiles, bars, and financial statements
//! - **Provider contract** ([`MarketDataProvider`]) with three independently fallible capabilities
//! - **Store contracts** ([`SymbolRegistry`], [`ObservationStore`], [`RunJournal`])
//! - **Transforms** that turn raw provider payloads into processed documents
//! - **Adapters** for Yahoo Finance and a deterministic offline fixture
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Provider adapters (Yahoo, fixture) |
//! | [`domain`] | Symbols, source kinds, history periods, observations |
//! | [`error`] | Validation errors |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`provider`] | Provider trait and error taxonomy |
//! | [`store`] | Persistence traits and error taxonomy |
//! | [`transform`] | Pure raw-to-processed transforms |
//!
//! ## Error Handling
//!
//! Provider and store failures are structured values with a kind accessor:
//!
//! ```rust
//! use tickstore_core::{ProviderError, ProviderErrorKind};
//!
//! fn is_skippable(error: &ProviderError) -> bool {
//!     matches!(error.kind(), ProviderErrorKind::NotFound)
//! }
//! ```

pub mod adapters;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod provider;
pub mod store;
pub mod transform;

pub use adapters::{FixtureProvider, YahooProvider};

pub use domain::{
    Bar, FinancialStatements, HistoryPeriod, InstrumentId, InstrumentProfile, Observation,
    ProfileData, ProfileSnapshot, SourceKind, Symbol, TrackedInstrument,
};

pub use error::ValidationError;

pub use http_client::{HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient};

pub use provider::{Capability, MarketDataProvider, ProviderError, ProviderErrorKind, ProviderId};

pub use store::{
    JournalEntry, ObservationStore, RunJournal, StoreError, StoreErrorKind, SymbolRegistry,
};
