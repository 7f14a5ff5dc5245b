use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::macros::format_description;
use time::Date;

use crate::{Symbol, ValidationError};

/// Stable registry identity of an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentId(i64);

impl InstrumentId {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl Display for InstrumentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Descriptive attributes written to the registry on every profile fetch.
///
/// Missing attributes stay `None` and are stored as NULL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentProfile {
    pub symbol: Symbol,
    pub name: Option<String>,
    pub exchange: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub country: Option<String>,
}

impl InstrumentProfile {
    pub fn bare(symbol: Symbol) -> Self {
        Self {
            symbol,
            name: None,
            exchange: None,
            sector: None,
            industry: None,
            country: None,
        }
    }
}

/// Registry row used to drive historical and financial refreshes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedInstrument {
    pub id: InstrumentId,
    pub symbol: Symbol,
}

/// Tag distinguishing the three observation streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    #[serde(rename = "profile")]
    Profile,
    #[serde(rename = "historical-bar")]
    HistoricalBar,
    #[serde(rename = "financial-statement")]
    FinancialStatement,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [
        SourceKind::Profile,
        SourceKind::HistoricalBar,
        SourceKind::FinancialStatement,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::HistoricalBar => "historical-bar",
            Self::FinancialStatement => "financial-statement",
        }
    }
}

impl Display for SourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value.trim())
            .ok_or_else(|| ValidationError::InvalidSourceKind {
                value: value.to_owned(),
            })
    }
}

/// Relative lookback window for historical bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HistoryPeriod {
    OneDay,
    FiveDays,
    OneMonth,
    ThreeMonths,
    SixMonths,
    #[default]
    OneYear,
    TwoYears,
    FiveYears,
    TenYears,
    YearToDate,
    Max,
}

impl HistoryPeriod {
    const VARIANTS: [HistoryPeriod; 11] = [
        HistoryPeriod::OneDay,
        HistoryPeriod::FiveDays,
        HistoryPeriod::OneMonth,
        HistoryPeriod::ThreeMonths,
        HistoryPeriod::SixMonths,
        HistoryPeriod::OneYear,
        HistoryPeriod::TwoYears,
        HistoryPeriod::FiveYears,
        HistoryPeriod::TenYears,
        HistoryPeriod::YearToDate,
        HistoryPeriod::Max,
    ];

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let normalized = input.trim().to_ascii_lowercase();
        Self::VARIANTS
            .into_iter()
            .find(|period| period.as_str() == normalized)
            .ok_or_else(|| ValidationError::InvalidPeriod {
                value: input.to_owned(),
            })
    }

    /// Provider range token (`1y`, `6mo`, ...).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneDay => "1d",
            Self::FiveDays => "5d",
            Self::OneMonth => "1mo",
            Self::ThreeMonths => "3mo",
            Self::SixMonths => "6mo",
            Self::OneYear => "1y",
            Self::TwoYears => "2y",
            Self::FiveYears => "5y",
            Self::TenYears => "10y",
            Self::YearToDate => "ytd",
            Self::Max => "max",
        }
    }
}

impl Display for HistoryPeriod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryPeriod {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for HistoryPeriod {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<HistoryPeriod> for String {
    fn from(value: HistoryPeriod) -> Self {
        value.as_str().to_owned()
    }
}

/// Provider-native profile document (flat key/value "info" map).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileData {
    pub symbol: Symbol,
    pub info: Map<String, Value>,
}

impl ProfileData {
    pub fn new(symbol: Symbol, info: Map<String, Value>) -> Self {
        Self { symbol, info }
    }

    pub fn is_empty(&self) -> bool {
        self.info.is_empty()
    }
}

/// One daily bar as the provider reported it.
///
/// `fields` keeps the provider-native keys ([`Bar::OPEN`], [`Bar::STOCK_SPLITS`], ...)
/// and untyped values; coercion happens in [`crate::transform::bar_to_record`].
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub date: Date,
    pub fields: Map<String, Value>,
}

impl Bar {
    pub const OPEN: &'static str = "Open";
    pub const HIGH: &'static str = "High";
    pub const LOW: &'static str = "Low";
    pub const CLOSE: &'static str = "Close";
    pub const VOLUME: &'static str = "Volume";
    pub const DIVIDENDS: &'static str = "Dividends";
    pub const STOCK_SPLITS: &'static str = "Stock Splits";

    pub fn new(date: Date, fields: Map<String, Value>) -> Self {
        Self { date, fields }
    }

    /// Builds a bar from plain OHLCV numbers; dividends and splits are left absent.
    pub fn ohlcv(date: Date, open: f64, high: f64, low: f64, close: f64, volume: u64) -> Self {
        let mut fields = Map::new();
        fields.insert(Self::OPEN.to_owned(), Value::from(open));
        fields.insert(Self::HIGH.to_owned(), Value::from(high));
        fields.insert(Self::LOW.to_owned(), Value::from(low));
        fields.insert(Self::CLOSE.to_owned(), Value::from(close));
        fields.insert(Self::VOLUME.to_owned(), Value::from(volume));
        Self { date, fields }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_owned(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Raw payload persisted for this bar: the native fields plus its date.
    pub fn raw_payload(&self) -> Value {
        let mut raw = self.fields.clone();
        raw.insert(String::from("Date"), Value::String(format_date(self.date)));
        Value::Object(raw)
    }
}

/// Statement snapshots keyed by fiscal period.
///
/// Serialized field names are the provider-native ones persisted as the raw payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FinancialStatements {
    #[serde(rename = "income_stmt", default)]
    pub income_statement: Map<String, Value>,
    #[serde(default)]
    pub balance_sheet: Map<String, Value>,
    #[serde(rename = "cashflow", default)]
    pub cash_flow: Map<String, Value>,
    #[serde(default)]
    pub earnings: Map<String, Value>,
}

impl FinancialStatements {
    pub fn is_empty(&self) -> bool {
        self.income_statement.is_empty()
            && self.balance_sheet.is_empty()
            && self.cash_flow.is_empty()
            && self.earnings.is_empty()
    }

    pub fn raw_payload(&self) -> Value {
        let mut raw = Map::new();
        raw.insert(
            String::from("income_stmt"),
            Value::Object(self.income_statement.clone()),
        );
        raw.insert(
            String::from("balance_sheet"),
            Value::Object(self.balance_sheet.clone()),
        );
        raw.insert(String::from("cashflow"), Value::Object(self.cash_flow.clone()));
        raw.insert(String::from("earnings"), Value::Object(self.earnings.clone()));
        Value::Object(raw)
    }
}

/// One (instrument, date, source kind) record ready for the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub instrument_id: InstrumentId,
    pub date: Date,
    pub source_kind: SourceKind,
    pub raw: Value,
    pub processed: Value,
}

/// Profile payloads for an instrument whose id is only known once it is registered.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileSnapshot {
    pub date: Date,
    pub raw: Value,
    pub processed: Value,
}

impl ProfileSnapshot {
    pub fn observation(&self, instrument_id: InstrumentId) -> Observation {
        Observation {
            instrument_id,
            date: self.date,
            source_kind: SourceKind::Profile,
            raw: self.raw.clone(),
            processed: self.processed.clone(),
        }
    }
}

pub fn format_date(date: Date) -> String {
    date.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| date.to_string())
}

pub fn parse_date(input: &str) -> Result<Date, ValidationError> {
    Date::parse(input.trim(), format_description!("[year]-[month]-[day]")).map_err(|_| {
        ValidationError::InvalidDate {
            value: input.to_owned(),
        }
    })
}
