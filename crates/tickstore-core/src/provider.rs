//! Provider contract and error taxonomy.
//!
//! A provider exposes three capabilities that fail independently. Each one
//! distinguishes three results:
//!
//! | Result | Meaning |
//! |--------|---------|
//! | `Ok(Some(_))` / non-empty `Vec` | Data to transform and store |
//! | `Ok(None)` / empty `Vec` | Valid symbol, nothing to store |
//! | `Err(ProviderError)` | The call failed |
//!
//! `NotFound` is reported as an error kind so adapters can say why a result
//! is missing, but orchestration treats it like an empty result.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::{Bar, FinancialStatements, HistoryPeriod, ProfileData, Symbol};

/// Known provider identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    Yahoo,
    Fixture,
}

impl ProviderId {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Yahoo => "yahoo",
            Self::Fixture => "fixture",
        }
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider capability, used for call logs and scripted failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Profile,
    HistoricalBars,
    Financials,
}

impl Capability {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::HistoricalBars => "historical_bars",
            Self::Financials => "financials",
        }
    }
}

impl Display for Capability {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    NotFound,
    Unavailable,
    RateLimited,
    InvalidResponse,
    Internal,
}

/// Structured provider failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    kind: ProviderErrorKind,
    message: String,
    retryable: bool,
}

impl ProviderError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::NotFound,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Unavailable,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::RateLimited,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::InvalidResponse,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Internal,
            message: message.into(),
            retryable: false,
        }
    }

    pub const fn kind(&self) -> ProviderErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn is_not_found(&self) -> bool {
        matches!(self.kind, ProviderErrorKind::NotFound)
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            ProviderErrorKind::NotFound => "provider.not_found",
            ProviderErrorKind::Unavailable => "provider.unavailable",
            ProviderErrorKind::RateLimited => "provider.rate_limited",
            ProviderErrorKind::InvalidResponse => "provider.invalid_response",
            ProviderErrorKind::Internal => "provider.internal",
        }
    }
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for ProviderError {}

/// Market-data provider contract.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the ingestor shares one provider
/// across all sub-pipelines.
pub trait MarketDataProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Fetches the descriptive profile and valuation snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] with kind `NotFound` for unknown symbols, or
    /// `Unavailable`/`RateLimited` when the upstream call fails.
    fn profile<'a>(
        &'a self,
        symbol: &'a Symbol,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ProfileData>, ProviderError>> + Send + 'a>>;

    /// Fetches daily bars covering `period`, oldest first.
    fn historical_bars<'a>(
        &'a self,
        symbol: &'a Symbol,
        period: HistoryPeriod,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Bar>, ProviderError>> + Send + 'a>>;

    fn financials<'a>(
        &'a self,
        symbol: &'a Symbol,
    ) -> Pin<Box<dyn Future<Output = Result<Option<FinancialStatements>, ProviderError>> + Send + 'a>>;
}
