use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::debug;

use crate::domain::format_date;
use crate::http_client::{HttpClient, HttpRequest, HttpResponse, ReqwestHttpClient};
use crate::provider::{MarketDataProvider, ProviderError, ProviderId};
use crate::{Bar, FinancialStatements, HistoryPeriod, ProfileData, Symbol};

const QUERY_BASE: &str = "https://query1.finance.yahoo.com";
const REFERER: &str = "https://finance.yahoo.com/";
const PROFILE_MODULES: [&str; 5] = [
    "assetProfile",
    "price",
    "summaryDetail",
    "defaultKeyStatistics",
    "financialData",
];
const FINANCIAL_MODULES: [&str; 4] = [
    "incomeStatementHistory",
    "balanceSheetHistory",
    "cashflowStatementHistory",
    "earnings",
];

/// Cached Yahoo crumb.
///
/// Yahoo's unofficial API wants a session cookie from `fc.yahoo.com` (kept in
/// the transport's cookie jar) and a crumb passed as a query parameter.
#[derive(Debug)]
pub struct YahooAuth {
    crumb: Mutex<Option<(String, Instant)>>,
    ttl: Duration,
}

impl Default for YahooAuth {
    fn default() -> Self {
        Self {
            crumb: Mutex::new(None),
            ttl: Duration::from_secs(3600),
        }
    }
}

impl YahooAuth {
    fn cached(&self) -> Option<String> {
        let guard = self.crumb.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .filter(|(_, fetched_at)| fetched_at.elapsed() < self.ttl)
            .map(|(crumb, _)| crumb.clone())
    }

    pub fn invalidate(&self) {
        *self.crumb.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub async fn crumb(&self, http: &dyn HttpClient) -> Result<String, ProviderError> {
        if let Some(crumb) = self.cached() {
            return Ok(crumb);
        }

        let cookie_request = HttpRequest::get("https://fc.yahoo.com").with_header("referer", REFERER);
        http.execute(cookie_request).await.map_err(|e| {
            ProviderError::unavailable(format!("failed to fetch Yahoo cookie: {}", e.message()))
        })?;

        for endpoint in [
            "https://query1.finance.yahoo.com/v1/test/getcrumb",
            "https://query2.finance.yahoo.com/v1/test/getcrumb",
        ] {
            let request = HttpRequest::get(endpoint).with_header("referer", REFERER);
            let Ok(response) = http.execute(request).await else {
                continue;
            };
            if response.status == 429 {
                return Err(ProviderError::rate_limited(
                    "Yahoo rate limited while fetching crumb",
                ));
            }
            let body = response.body.trim();
            if !response.is_success() || body.is_empty() || body.contains("<html") {
                continue;
            }
            if body.len() < 100 && !body.contains(' ') {
                let crumb = body.to_owned();
                *self.crumb.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some((crumb.clone(), Instant::now()));
                return Ok(crumb);
            }
        }

        Err(ProviderError::unavailable(
            "failed to fetch Yahoo crumb from all endpoints",
        ))
    }
}

/// Yahoo Finance provider.
#[derive(Clone)]
pub struct YahooProvider {
    http: Arc<dyn HttpClient>,
    auth: Arc<YahooAuth>,
}

impl Default for YahooProvider {
    fn default() -> Self {
        Self::new(Arc::new(ReqwestHttpClient::new()))
    }
}

impl YahooProvider {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self {
            http,
            auth: Arc::new(YahooAuth::default()),
        }
    }

    /// Fetches `path` with the current crumb, refreshing it once on 401/429.
    async fn get_json(&self, symbol: &Symbol, path: &str) -> Result<Value, ProviderError> {
        let crumb = self.auth.crumb(self.http.as_ref()).await?;
        let mut response = self.send(path, &crumb).await?;

        if response.status == 401 || response.status == 429 {
            debug!(symbol = %symbol, status = response.status, "refreshing Yahoo crumb");
            self.auth.invalidate();
            let crumb = self.auth.crumb(self.http.as_ref()).await?;
            response = self.send(path, &crumb).await?;
        }

        match response.status {
            status if (200..300).contains(&status) => {}
            404 => {
                return Err(ProviderError::not_found(format!(
                    "Yahoo has no data for '{symbol}'"
                )))
            }
            429 => {
                return Err(ProviderError::rate_limited(format!(
                    "Yahoo rate limited request for '{symbol}'"
                )))
            }
            status => {
                return Err(ProviderError::unavailable(format!(
                    "Yahoo returned status {status} for '{symbol}'"
                )))
            }
        }

        serde_json::from_str(&response.body).map_err(|e| {
            ProviderError::invalid_response(format!("failed to parse Yahoo response: {e}"))
        })
    }

    async fn send(&self, path: &str, crumb: &str) -> Result<HttpResponse, ProviderError> {
        let separator = if path.contains('?') { '&' } else { '?' };
        let url = format!(
            "{QUERY_BASE}{path}{separator}crumb={}",
            urlencoding::encode(crumb)
        );
        let request = HttpRequest::get(url).with_header("referer", REFERER);
        self.http.execute(request).await.map_err(|e| {
            ProviderError::unavailable(format!("Yahoo transport error: {}", e.message()))
        })
    }

    async fn quote_summary(
        &self,
        symbol: &Symbol,
        modules: &[&str],
    ) -> Result<Option<Map<String, Value>>, ProviderError> {
        let path = format!(
            "/v10/finance/quoteSummary/{}?modules={}",
            urlencoding::encode(symbol.as_str()),
            modules.join(",")
        );
        let body = self.get_json(symbol, &path).await?;
        first_result(&body, "quoteSummary", symbol)
    }
}

impl MarketDataProvider for YahooProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Yahoo
    }

    fn profile<'a>(
        &'a self,
        symbol: &'a Symbol,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ProfileData>, ProviderError>> + Send + 'a>> {
        Box::pin(async move {
            let Some(modules) = self.quote_summary(symbol, &PROFILE_MODULES).await? else {
                return Ok(None);
            };
            let info = flatten_modules(&modules, &PROFILE_MODULES);
            Ok((!info.is_empty()).then(|| ProfileData::new(symbol.clone(), info)))
        })
    }

    fn historical_bars<'a>(
        &'a self,
        symbol: &'a Symbol,
        period: HistoryPeriod,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Bar>, ProviderError>> + Send + 'a>> {
        Box::pin(async move {
            let path = format!(
                "/v8/finance/chart/{}?range={}&interval=1d&events=div%2Csplits",
                urlencoding::encode(symbol.as_str()),
                period.as_str()
            );
            let body = self.get_json(symbol, &path).await?;
            parse_chart(&body, symbol)
        })
    }

    fn financials<'a>(
        &'a self,
        symbol: &'a Symbol,
    ) -> Pin<Box<dyn Future<Output = Result<Option<FinancialStatements>, ProviderError>> + Send + 'a>>
    {
        Box::pin(async move {
            let Some(modules) = self.quote_summary(symbol, &FINANCIAL_MODULES).await? else {
                return Ok(None);
            };
            let statements = parse_statements(modules);
            Ok((!statements.is_empty()).then_some(statements))
        })
    }
}

/// First element of `<root>.result`, or the mapped `<root>.error`.
fn first_result(
    body: &Value,
    root: &str,
    symbol: &Symbol,
) -> Result<Option<Map<String, Value>>, ProviderError> {
    let envelope = &body[root];
    if let Some(error) = envelope.get("error").filter(|error| !error.is_null()) {
        let code = error["code"].as_str().unwrap_or_default();
        let description = error["description"].as_str().unwrap_or(code);
        return Err(if code.eq_ignore_ascii_case("Not Found") {
            ProviderError::not_found(format!("'{symbol}': {description}"))
        } else {
            ProviderError::unavailable(format!("Yahoo API error for '{symbol}': {description}"))
        });
    }

    Ok(envelope["result"]
        .as_array()
        .and_then(|results| results.first())
        .and_then(Value::as_object)
        .cloned())
}

/// Merges quoteSummary modules into one flat info map; earlier modules win.
fn flatten_modules(modules: &Map<String, Value>, order: &[&str]) -> Map<String, Value> {
    let mut info = Map::new();
    for name in order {
        let Some(module) = modules.get(*name).and_then(Value::as_object) else {
            continue;
        };
        for (key, value) in module {
            if key == "maxAge" || info.contains_key(key) {
                continue;
            }
            match unwrap_raw(value) {
                Value::Null => {}
                Value::Object(map) if map.is_empty() => {}
                value => {
                    info.insert(key.clone(), value);
                }
            }
        }
    }
    info
}

/// Replaces `{"raw": x, "fmt": "..."}` wrappers with `x`, recursively.
fn unwrap_raw(value: &Value) -> Value {
    match value {
        Value::Object(map) => match map.get("raw") {
            Some(raw) => raw.clone(),
            None => Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), unwrap_raw(value)))
                    .collect(),
            ),
        },
        Value::Array(items) => Value::Array(items.iter().map(unwrap_raw).collect()),
        other => other.clone(),
    }
}

fn parse_statements(modules: Map<String, Value>) -> FinancialStatements {
    let modules = Value::Object(modules);
    FinancialStatements {
        income_statement: keyed_by_period(
            &modules["incomeStatementHistory"]["incomeStatementHistory"],
        ),
        balance_sheet: keyed_by_period(&modules["balanceSheetHistory"]["balanceSheetStatements"]),
        cash_flow: keyed_by_period(&modules["cashflowStatementHistory"]["cashflowStatements"]),
        earnings: earnings_by_period(&modules["earnings"]),
    }
}

/// Statement list to `{ "YYYY-MM-DD": {line items} }` keyed by period end.
fn keyed_by_period(statements: &Value) -> Map<String, Value> {
    let mut keyed = Map::new();
    for statement in statements.as_array().into_iter().flatten() {
        let Some(items) = statement.as_object() else {
            continue;
        };
        let period = items
            .get("endDate")
            .and_then(|end| end.get("fmt").and_then(Value::as_str).map(str::to_owned).or_else(|| {
                end.get("raw")
                    .and_then(Value::as_i64)
                    .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
                    .map(|ts| format_date(ts.date()))
            }));
        let Some(period) = period else {
            continue;
        };

        let lines: Map<String, Value> = items
            .iter()
            .filter(|(key, _)| key.as_str() != "endDate" && key.as_str() != "maxAge")
            .map(|(key, value)| (key.clone(), unwrap_raw(value)))
            .collect();
        keyed.insert(period, Value::Object(lines));
    }
    keyed
}

/// `financialsChart.{yearly,quarterly}` rows keyed by their `date` label.
fn earnings_by_period(earnings: &Value) -> Map<String, Value> {
    let mut keyed = Map::new();
    for series in ["yearly", "quarterly"] {
        for row in earnings["financialsChart"][series].as_array().into_iter().flatten() {
            let Some(items) = row.as_object() else {
                continue;
            };
            let label = match items.get("date") {
                Some(Value::String(text)) => text.clone(),
                Some(Value::Number(number)) => number.to_string(),
                _ => continue,
            };
            let values: Map<String, Value> = items
                .iter()
                .filter(|(key, _)| key.as_str() != "date")
                .map(|(key, value)| (key.clone(), unwrap_raw(value)))
                .collect();
            keyed.insert(label, Value::Object(values));
        }
    }
    keyed
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    #[serde(default)]
    indicators: ChartIndicators,
    #[serde(default)]
    events: ChartEvents,
}

#[derive(Debug, Default, Deserialize)]
struct ChartMeta {
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Debug, Default, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartEvents {
    #[serde(default)]
    dividends: BTreeMap<String, DividendEvent>,
    #[serde(default)]
    splits: BTreeMap<String, SplitEvent>,
}

#[derive(Debug, Deserialize)]
struct DividendEvent {
    amount: f64,
    date: i64,
}

#[derive(Debug, Deserialize)]
struct SplitEvent {
    numerator: f64,
    denominator: f64,
    date: i64,
}

fn parse_chart(body: &Value, symbol: &Symbol) -> Result<Vec<Bar>, ProviderError> {
    let Some(result) = first_result(body, "chart", symbol)? else {
        return Ok(Vec::new());
    };
    let chart: ChartResult = serde_json::from_value(Value::Object(result))
        .map_err(|e| ProviderError::invalid_response(format!("malformed Yahoo chart: {e}")))?;

    let offset = chart.meta.gmtoffset;
    let exchange_date = |ts: i64| {
        OffsetDateTime::from_unix_timestamp(ts.saturating_add(offset))
            .map(|value| value.date())
            .map_err(|e| ProviderError::invalid_response(format!("invalid timestamp {ts}: {e}")))
    };

    let mut dividends = BTreeMap::new();
    for event in chart.events.dividends.values() {
        dividends.insert(exchange_date(event.date)?, event.amount);
    }
    let mut splits = BTreeMap::new();
    for event in chart.events.splits.values() {
        if event.denominator != 0.0 {
            splits.insert(exchange_date(event.date)?, event.numerator / event.denominator);
        }
    }

    let quote = chart.indicators.quote.into_iter().next().unwrap_or_default();
    let at = |series: &[Option<f64>], index: usize| series.get(index).copied().flatten();

    let mut bars = Vec::with_capacity(chart.timestamp.len());
    for (index, ts) in chart.timestamp.iter().copied().enumerate() {
        let ohlc = [
            (Bar::OPEN, at(&quote.open, index)),
            (Bar::HIGH, at(&quote.high, index)),
            (Bar::LOW, at(&quote.low, index)),
            (Bar::CLOSE, at(&quote.close, index)),
        ];
        if ohlc.iter().all(|(_, value)| value.is_none()) {
            continue;
        }

        let date = exchange_date(ts)?;
        let mut fields = Map::new();
        for (key, value) in ohlc {
            fields.insert(key.to_owned(), value.map_or(Value::Null, Value::from));
        }
        fields.insert(
            Bar::VOLUME.to_owned(),
            at(&quote.volume, index).map_or(Value::Null, Value::from),
        );
        if let Some(amount) = dividends.get(&date) {
            fields.insert(Bar::DIVIDENDS.to_owned(), Value::from(*amount));
        }
        if let Some(ratio) = splits.get(&date) {
            fields.insert(Bar::STOCK_SPLITS.to_owned(), Value::from(*ratio));
        }
        bars.push(Bar::new(date, fields));
    }

    Ok(bars)
}
