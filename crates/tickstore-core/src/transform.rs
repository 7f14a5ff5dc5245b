//! Raw-to-processed transforms.
//!
//! Every function here is pure and total. Absent source fields become JSON
//! `null`; the only defaults are zero dividends and zero split ratio on bars.
//! An empty source document yields an empty processed document, and callers
//! decide whether to skip storage.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{Bar, FinancialStatements, InstrumentProfile, ProfileData};

/// Valuation ratios extracted from a profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinancialRatios {
    pub forward_pe: Option<f64>,
    pub trailing_pe: Option<f64>,
    pub price_to_book: Option<f64>,
    pub price_to_sales: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub profit_margins: Option<f64>,
    pub operating_margins: Option<f64>,
    pub return_on_equity: Option<f64>,
    pub return_on_assets: Option<f64>,
    pub debt_to_equity: Option<f64>,
    pub current_ratio: Option<f64>,
    pub beta: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketData {
    pub market_cap: Option<f64>,
    pub enterprise_value: Option<f64>,
    pub trailing_pe: Option<f64>,
    pub forward_pe: Option<f64>,
    pub peg_ratio: Option<f64>,
    pub price_to_sales: Option<f64>,
    pub price_to_book: Option<f64>,
    pub enterprise_to_revenue: Option<f64>,
    pub enterprise_to_ebitda: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DividendData {
    pub dividend_rate: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub payout_ratio: Option<f64>,
    pub five_year_avg_dividend_yield: Option<f64>,
}

/// Processed document stored for `profile` observations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedProfile {
    pub financial_ratios: FinancialRatios,
    pub market_data: MarketData,
    pub dividend_data: DividendData,
}

/// Processed document stored for `historical-bar` observations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedBar {
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<i64>,
    pub dividends: f64,
    pub stock_splits: f64,
}

impl ProcessedProfile {
    pub fn from_info(info: &Map<String, Value>) -> Self {
        let num = |key: &str| info.get(key).and_then(coerce_f64);
        Self {
            financial_ratios: FinancialRatios {
                forward_pe: num("forwardPE"),
                trailing_pe: num("trailingPE"),
                price_to_book: num("priceToBook"),
                price_to_sales: num("priceToSalesTrailing12Months"),
                dividend_yield: num("dividendYield"),
                profit_margins: num("profitMargins"),
                operating_margins: num("operatingMargins"),
                return_on_equity: num("returnOnEquity"),
                return_on_assets: num("returnOnAssets"),
                debt_to_equity: num("debtToEquity"),
                current_ratio: num("currentRatio"),
                beta: num("beta"),
            },
            market_data: MarketData {
                market_cap: num("marketCap"),
                enterprise_value: num("enterpriseValue"),
                trailing_pe: num("trailingPE"),
                forward_pe: num("forwardPE"),
                peg_ratio: num("pegRatio"),
                price_to_sales: num("priceToSalesTrailing12Months"),
                price_to_book: num("priceToBook"),
                enterprise_to_revenue: num("enterpriseToRevenue"),
                enterprise_to_ebitda: num("enterpriseToEbitda"),
            },
            dividend_data: DividendData {
                dividend_rate: num("dividendRate"),
                dividend_yield: num("dividendYield"),
                payout_ratio: num("payoutRatio"),
                five_year_avg_dividend_yield: num("fiveYearAvgDividendYield"),
            },
        }
    }
}

impl ProcessedBar {
    pub fn from_bar(bar: &Bar) -> Self {
        let num = |key: &str| bar.field(key).and_then(coerce_f64);
        Self {
            open: num(Bar::OPEN),
            high: num(Bar::HIGH),
            low: num(Bar::LOW),
            close: num(Bar::CLOSE),
            volume: bar.field(Bar::VOLUME).and_then(coerce_i64),
            dividends: num(Bar::DIVIDENDS).unwrap_or(0.0),
            stock_splits: num(Bar::STOCK_SPLITS).unwrap_or(0.0),
        }
    }
}

/// Maps a provider info map into the grouped profile document.
pub fn profile_to_record(info: &Map<String, Value>) -> Value {
    if info.is_empty() {
        return Value::Object(Map::new());
    }
    to_document(&ProcessedProfile::from_info(info))
}

pub fn bar_to_record(bar: &Bar) -> Value {
    if bar.fields.is_empty() {
        return Value::Object(Map::new());
    }
    to_document(&ProcessedBar::from_bar(bar))
}

/// Groups statements by type without deriving anything from them.
pub fn financials_to_record(statements: &FinancialStatements) -> Value {
    if statements.is_empty() {
        return Value::Object(Map::new());
    }

    let mut document = Map::new();
    document.insert(
        String::from("income_statement"),
        Value::Object(statements.income_statement.clone()),
    );
    document.insert(
        String::from("balance_sheet"),
        Value::Object(statements.balance_sheet.clone()),
    );
    document.insert(
        String::from("cash_flow"),
        Value::Object(statements.cash_flow.clone()),
    );
    document.insert(
        String::from("earnings"),
        Value::Object(statements.earnings.clone()),
    );
    Value::Object(document)
}

/// Registry attributes carried by a profile. Blank strings count as missing.
pub fn instrument_from_profile(profile: &ProfileData) -> InstrumentProfile {
    let text = |key: &str| {
        profile
            .info
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
    };

    InstrumentProfile {
        symbol: profile.symbol.clone(),
        name: text("longName").or_else(|| text("shortName")),
        exchange: text("exchange"),
        sector: text("sector"),
        industry: text("industry"),
        country: text("country"),
    }
}

/// Whether a processed document carries nothing worth storing.
pub fn is_empty_document(document: &Value) -> bool {
    match document {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn to_document<T: Serialize>(value: &T) -> Value {
    // Plain structs of Option<f64>/f64/i64 always serialize; non-finite floats become null.
    serde_json::to_value(value).unwrap_or_else(|_| Value::Object(Map::new()))
}

/// Accepts numbers, numeric strings, and `{"raw": n}` wrappers.
fn coerce_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        Value::Object(map) => map.get("raw").and_then(coerce_f64),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|v| v.is_finite()).map(|v| v.trunc() as i64)),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<i64>().ok().or_else(|| {
                text.parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .map(|v| v.trunc() as i64)
            })
        }
        Value::Object(map) => map.get("raw").and_then(coerce_i64),
        _ => None,
    }
}
