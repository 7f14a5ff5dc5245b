use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};

use serde_json::{json, Map, Value};
use time::macros::date;
use time::{Date, Duration, Weekday};

use crate::provider::{Capability, MarketDataProvider, ProviderError, ProviderId};
use crate::{Bar, FinancialStatements, HistoryPeriod, ProfileData, Symbol};

const SECTORS: [(&str, &str); 5] = [
    ("Technology", "Consumer Electronics"),
    ("Financial Services", "Banks - Diversified"),
    ("Healthcare", "Drug Manufacturers - General"),
    ("Energy", "Oil & Gas Integrated"),
    ("Consumer Defensive", "Discount Stores"),
];

/// Scripted response for one symbol.
#[derive(Debug, Clone)]
enum Script {
    Fail(ProviderError),
    Empty,
    Bars(Vec<Bar>),
}

/// One recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCall {
    pub capability: Capability,
    pub symbol: Symbol,
}

/// Deterministic offline provider.
///
/// Unscripted symbols get synthetic data derived from the symbol text, so
/// repeated runs produce identical payloads. Scripts override that per
/// symbol, either for every capability or for one.
#[derive(Debug)]
pub struct FixtureProvider {
    anchor: Date,
    scripts: Vec<(Option<Capability>, Symbol, Script)>,
    calls: Mutex<Vec<ProviderCall>>,
}

impl Default for FixtureProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FixtureProvider {
    pub fn new() -> Self {
        Self {
            anchor: date!(2024 - 06 - 28),
            scripts: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Last trading date of generated bar windows.
    pub fn with_anchor(mut self, anchor: Date) -> Self {
        self.anchor = anchor;
        self
    }

    /// Every capability fails for `symbol`.
    pub fn fail(mut self, symbol: &Symbol, error: ProviderError) -> Self {
        self.scripts.push((None, symbol.clone(), Script::Fail(error)));
        self
    }

    pub fn fail_on(mut self, capability: Capability, symbol: &Symbol, error: ProviderError) -> Self {
        self.scripts
            .push((Some(capability), symbol.clone(), Script::Fail(error)));
        self
    }

    /// Every capability returns an empty result for `symbol`.
    pub fn empty(mut self, symbol: &Symbol) -> Self {
        self.scripts.push((None, symbol.clone(), Script::Empty));
        self
    }

    pub fn empty_on(mut self, capability: Capability, symbol: &Symbol) -> Self {
        self.scripts
            .push((Some(capability), symbol.clone(), Script::Empty));
        self
    }

    /// Fixed bar set for historical fetches of `symbol`.
    pub fn with_bars(mut self, symbol: &Symbol, bars: Vec<Bar>) -> Self {
        self.scripts.push((
            Some(Capability::HistoricalBars),
            symbol.clone(),
            Script::Bars(bars),
        ));
        self
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self, capability: Capability) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|call| call.capability == capability)
            .count()
    }

    fn begin(&self, capability: Capability, symbol: &Symbol) -> Option<Script> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ProviderCall {
                capability,
                symbol: symbol.clone(),
            });

        self.scripts
            .iter()
            .find(|(scope, scripted, _)| {
                scripted == symbol && scope.map_or(true, |scope| scope == capability)
            })
            .map(|(_, _, script)| script.clone())
    }

    fn synthetic_profile(&self, symbol: &Symbol) -> ProfileData {
        let seed = seed(symbol);
        let (sector, industry) = SECTORS[(seed % SECTORS.len() as u64) as usize];
        let scale = 1.0 + (seed % 97) as f64 / 100.0;
        let exchange = if seed % 2 == 0 { "NMS" } else { "NYQ" };

        let info = json!({
            "symbol": symbol.as_str(),
            "longName": format!("{} Holdings Inc.", symbol.as_str()),
            "shortName": symbol.as_str(),
            "exchange": exchange,
            "sector": sector,
            "industry": industry,
            "country": "United States",
            "forwardPE": round2(18.0 * scale),
            "trailingPE": round2(21.0 * scale),
            "priceToBook": round2(4.5 * scale),
            "priceToSalesTrailing12Months": round2(3.2 * scale),
            "profitMargins": round4(0.12 * scale),
            "operatingMargins": round4(0.17 * scale),
            "returnOnEquity": round4(0.21 * scale),
            "returnOnAssets": round4(0.08 * scale),
            "debtToEquity": round2(65.0 * scale),
            "currentRatio": round2(1.1 * scale),
            "beta": round2(0.9 * scale),
            "marketCap": (seed % 900 + 100) * 1_000_000_000,
            "enterpriseValue": (seed % 900 + 120) * 1_000_000_000,
            "pegRatio": round2(1.8 * scale),
            "enterpriseToRevenue": round2(5.1 * scale),
            "enterpriseToEbitda": round2(14.0 * scale),
            "dividendRate": round2(0.96 * scale),
            "dividendYield": round4(0.011 * scale),
            "payoutRatio": round4(0.25 * scale),
            "fiveYearAvgDividendYield": round2(1.2 * scale)
        });

        ProfileData::new(symbol.clone(), as_map(info))
    }

    fn synthetic_bars(&self, symbol: &Symbol, period: HistoryPeriod) -> Vec<Bar> {
        let seed = seed(symbol);
        let count = trading_days(period, self.anchor);
        let mut dates = Vec::with_capacity(count);
        let mut day = self.anchor;
        while dates.len() < count {
            if !matches!(day.weekday(), Weekday::Saturday | Weekday::Sunday) {
                dates.push(day);
            }
            day -= Duration::days(1);
        }
        dates.reverse();

        let base = 40.0 + (seed % 400) as f64;
        dates
            .into_iter()
            .enumerate()
            .map(|(index, date)| {
                let drift = ((index as u64 + seed) % 11) as f64 - 5.0;
                let open = round2(base + drift);
                let close = round2(open + drift / 4.0);
                let high = round2(open.max(close) + 1.25);
                let low = round2(open.min(close) - 1.25);
                let volume = 1_000_000 + (seed % 50) * 10_000 + index as u64 * 1_000;
                let bar = Bar::ohlcv(date, open, high, low, close, volume);
                // Dividends land in the first days of Feb, May, Aug and Nov.
                if matches!(date.month() as u8, 2 | 5 | 8 | 11) && date.day() <= 3 {
                    bar.with_field(Bar::DIVIDENDS, round2(0.24 * (1.0 + (seed % 5) as f64)))
                } else {
                    bar
                }
            })
            .collect()
    }

    fn synthetic_financials(&self, symbol: &Symbol) -> FinancialStatements {
        let seed = seed(symbol);
        let revenue = (seed % 300 + 50) as i64 * 1_000_000_000;
        let mut statements = FinancialStatements::default();

        for (offset, year) in [(0_i64, 2023), (1, 2022), (2, 2021)] {
            let period = format!("{year}-12-31");
            let scaled = revenue - offset * revenue / 10;
            statements.income_statement.insert(
                period.clone(),
                json!({
                    "totalRevenue": scaled,
                    "grossProfit": scaled * 4 / 10,
                    "netIncome": scaled / 5
                }),
            );
            statements.balance_sheet.insert(
                period.clone(),
                json!({
                    "totalAssets": scaled * 3,
                    "totalLiab": scaled * 2,
                    "cash": scaled / 4
                }),
            );
            statements.cash_flow.insert(
                period.clone(),
                json!({
                    "totalCashFromOperatingActivities": scaled / 4,
                    "capitalExpenditures": -(scaled / 20)
                }),
            );
            statements.earnings.insert(
                year.to_string(),
                json!({ "revenue": scaled, "earnings": scaled / 5 }),
            );
        }

        statements
    }
}

impl MarketDataProvider for FixtureProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Fixture
    }

    fn profile<'a>(
        &'a self,
        symbol: &'a Symbol,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ProfileData>, ProviderError>> + Send + 'a>> {
        Box::pin(async move {
            match self.begin(Capability::Profile, symbol) {
                Some(Script::Fail(error)) => Err(error),
                Some(Script::Empty) => Ok(None),
                _ => Ok(Some(self.synthetic_profile(symbol))),
            }
        })
    }

    fn historical_bars<'a>(
        &'a self,
        symbol: &'a Symbol,
        period: HistoryPeriod,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Bar>, ProviderError>> + Send + 'a>> {
        Box::pin(async move {
            match self.begin(Capability::HistoricalBars, symbol) {
                Some(Script::Fail(error)) => Err(error),
                Some(Script::Empty) => Ok(Vec::new()),
                Some(Script::Bars(bars)) => Ok(bars),
                None => Ok(self.synthetic_bars(symbol, period)),
            }
        })
    }

    fn financials<'a>(
        &'a self,
        symbol: &'a Symbol,
    ) -> Pin<Box<dyn Future<Output = Result<Option<FinancialStatements>, ProviderError>> + Send + 'a>>
    {
        Box::pin(async move {
            match self.begin(Capability::Financials, symbol) {
                Some(Script::Fail(error)) => Err(error),
                Some(Script::Empty) => Ok(None),
                _ => Ok(Some(self.synthetic_financials(symbol))),
            }
        })
    }
}

fn seed(symbol: &Symbol) -> u64 {
    symbol
        .as_str()
        .bytes()
        .fold(17_u64, |acc, byte| acc.wrapping_mul(31).wrapping_add(u64::from(byte)))
}

fn trading_days(period: HistoryPeriod, anchor: Date) -> usize {
    match period {
        HistoryPeriod::OneDay => 1,
        HistoryPeriod::FiveDays => 5,
        HistoryPeriod::OneMonth => 21,
        HistoryPeriod::ThreeMonths => 63,
        HistoryPeriod::SixMonths => 126,
        HistoryPeriod::OneYear => 252,
        HistoryPeriod::TwoYears => 504,
        HistoryPeriod::FiveYears => 1_260,
        HistoryPeriod::TenYears | HistoryPeriod::Max => 2_520,
        HistoryPeriod::YearToDate => (usize::from(anchor.ordinal()) * 5 / 7).max(1),
    }
}

fn as_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(raw: &str) -> Symbol {
        Symbol::parse(raw).expect("valid symbol")
    }

    #[tokio::test]
    async fn synthetic_data_is_deterministic() {
        let provider = FixtureProvider::new();
        let first = provider.profile(&symbol("AAPL")).await.expect("profile");
        let second = provider.profile(&symbol("AAPL")).await.expect("profile");
        assert_eq!(first, second);

        let bars = provider
            .historical_bars(&symbol("AAPL"), HistoryPeriod::OneMonth)
            .await
            .expect("bars");
        assert_eq!(bars.len(), 21);
        assert!(bars.windows(2).all(|pair| pair[0].date < pair[1].date));
        assert_eq!(bars.last().map(|bar| bar.date), Some(date!(2024 - 06 - 28)));
    }

    #[tokio::test]
    async fn scripts_override_single_capabilities() {
        let msft = symbol("MSFT");
        let provider = FixtureProvider::new()
            .fail_on(
                Capability::HistoricalBars,
                &msft,
                ProviderError::unavailable("chart endpoint down"),
            )
            .empty_on(Capability::Financials, &msft);

        assert!(provider.profile(&msft).await.expect("profile").is_some());
        assert!(provider
            .historical_bars(&msft, HistoryPeriod::OneYear)
            .await
            .is_err());
        assert!(provider.financials(&msft).await.expect("financials").is_none());
        assert_eq!(provider.calls().len(), 3);
        assert_eq!(provider.call_count(Capability::Profile), 1);
    }
}
