//! Yahoo Finance adapter: price history, company profiles, fundamentals
//! snapshots, and news. Requests share one sliding-window budget and are
//! retried with backoff on transient failures. Payload mapping is kept in
//! free functions so it can be exercised without the network.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use screener_core::{
    dates, normalize_symbol, ApiStatus, FundamentalSnapshot, HistoryPeriod, MarketDataSource,
    NewsArticle, PriceBar, RateLimiter, ScreenerError, StockProfile,
};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;

const BASE_URL: &str = "https://query1.finance.yahoo.com";
const SOURCE_NAME: &str = "yahoo_finance";
const MAX_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct YahooClient {
    client: Client,
    rate_limiter: RateLimiter,
}

impl YahooClient {
    /// Default budget of 2000 requests/hour with a 30 second per-request
    /// timeout.
    pub fn new() -> Self {
        Self::with_limits(2000, Duration::from_secs(30))
    }

    pub fn with_limits(max_per_hour: usize, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (compatible; stock-screener)")
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            rate_limiter: RateLimiter::per_hour(max_per_hour),
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        query: &[(&str, String)],
        deadline: Option<Instant>,
    ) -> Result<T, ScreenerError> {
        let mut last_err = ScreenerError::Source("no attempt made".to_string());
        for attempt in 0..MAX_ATTEMPTS {
            self.rate_limiter.acquire(deadline).await?;

            let response = match self.client.get(url).query(query).send().await {
                Ok(r) => r,
                Err(e) if e.is_timeout() => {
                    last_err = ScreenerError::Timeout(e.to_string());
                    tracing::warn!("yahoo request timed out (attempt {}/{})", attempt + 1, MAX_ATTEMPTS);
                    tokio::time::sleep(backoff(attempt)).await;
                    continue;
                }
                Err(e) => {
                    last_err = ScreenerError::Source(e.to_string());
                    tokio::time::sleep(backoff(attempt)).await;
                    continue;
                }
            };

            let status = response.status();
            if status.as_u16() == 429 {
                last_err = ScreenerError::RateLimited("yahoo returned 429".to_string());
                tracing::warn!("yahoo 429, backing off (attempt {}/{})", attempt + 1, MAX_ATTEMPTS);
                tokio::time::sleep(backoff(attempt) * 4).await;
                continue;
            }
            if status.is_server_error() {
                last_err = ScreenerError::Source(format!("HTTP {status}"));
                tokio::time::sleep(backoff(attempt)).await;
                continue;
            }
            if !status.is_success() {
                return Err(ScreenerError::Source(format!("HTTP {status}")));
            }

            return response
                .json::<T>()
                .await
                .map_err(|e| ScreenerError::Parse(e.to_string()));
        }
        Err(last_err)
    }
}

impl Default for YahooClient {
    fn default() -> Self {
        Self::new()
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(500 * 2u64.pow(attempt))
}

fn period_range(period: HistoryPeriod) -> &'static str {
    match period {
        HistoryPeriod::OneMonth => "1mo",
        HistoryPeriod::ThreeMonths => "3mo",
        HistoryPeriod::SixMonths => "6mo",
        HistoryPeriod::OneYear => "1y",
        HistoryPeriod::TwoYears => "2y",
        HistoryPeriod::FiveYears => "5y",
    }
}

#[async_trait]
impl MarketDataSource for YahooClient {
    async fn fetch_profile(&self, symbol: &str) -> Result<StockProfile, ScreenerError> {
        let symbol = normalize_symbol(symbol);
        let url = format!("{BASE_URL}/v10/finance/quoteSummary/{symbol}");
        let response: QuoteSummaryResponse = self
            .get_json(
                &url,
                &[("modules", "summaryProfile,price,summaryDetail".to_string())],
                None,
            )
            .await?;
        profile_from_summary(&symbol, response)
    }

    async fn fetch_price_history(
        &self,
        symbol: &str,
        period: HistoryPeriod,
    ) -> Result<Vec<PriceBar>, ScreenerError> {
        let symbol = normalize_symbol(symbol);
        let url = format!("{BASE_URL}/v8/finance/chart/{symbol}");
        let response: ChartResponse = self
            .get_json(
                &url,
                &[
                    ("range", period_range(period).to_string()),
                    ("interval", "1d".to_string()),
                    ("events", "div,split".to_string()),
                ],
                None,
            )
            .await?;
        bars_from_chart(&symbol, response)
    }

    async fn fetch_fundamentals(
        &self,
        symbol: &str,
    ) -> Result<FundamentalSnapshot, ScreenerError> {
        let symbol = normalize_symbol(symbol);
        let url = format!("{BASE_URL}/v10/finance/quoteSummary/{symbol}");
        let response: QuoteSummaryResponse = self
            .get_json(
                &url,
                &[(
                    "modules",
                    "summaryDetail,financialData,defaultKeyStatistics,price".to_string(),
                )],
                None,
            )
            .await?;
        fundamentals_from_summary(&symbol, response)
    }

    async fn fetch_news(&self, symbol: &str) -> Result<Vec<NewsArticle>, ScreenerError> {
        let symbol = normalize_symbol(symbol);
        let url = format!("{BASE_URL}/v1/finance/search");
        let response: SearchResponse = self
            .get_json(
                &url,
                &[
                    ("q", symbol.clone()),
                    ("newsCount", "20".to_string()),
                    ("quotesCount", "0".to_string()),
                ],
                None,
            )
            .await?;
        articles_from_search(&symbol, response)
    }

    async fn self_test(&self) -> (ApiStatus, String) {
        match self.fetch_profile("AAPL").await {
            Ok(profile) => {
                if profile.field_completeness() >= 0.5 {
                    (ApiStatus::Healthy, "profile probe succeeded".to_string())
                } else {
                    (
                        ApiStatus::Limited,
                        "probe returned a mostly-empty profile".to_string(),
                    )
                }
            }
            Err(ScreenerError::RateLimited(msg)) => (ApiStatus::RateLimited, msg),
            Err(e) => (ApiStatus::Failed, e.to_string()),
        }
    }
}

// ==================== wire payloads ====================

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartOuter,
}

#[derive(Debug, Deserialize)]
struct ChartOuter {
    result: Option<Vec<ChartResult>>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    timestamp: Option<Vec<i64>>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    quote: Vec<ChartQuote>,
    adjclose: Option<Vec<ChartAdjClose>>,
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
    volume: Vec<Option<i64>>,
}

#[derive(Debug, Deserialize)]
struct ChartAdjClose {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

/// Yahoo wraps every numeric field as `{ "raw": ..., "fmt": ... }`.
#[derive(Debug, Default, Clone, Copy, Deserialize)]
struct RawNum {
    raw: Option<f64>,
}

impl RawNum {
    fn value(self) -> Option<f64> {
        self.raw
    }
}

fn as_i64(value: Option<RawNum>) -> Option<i64> {
    value.and_then(RawNum::value).map(|v| v as i64)
}

fn as_f64(value: Option<RawNum>) -> Option<f64> {
    value.and_then(RawNum::value)
}

#[derive(Debug, Deserialize)]
struct QuoteSummaryResponse {
    #[serde(rename = "quoteSummary")]
    quote_summary: QuoteSummaryOuter,
}

#[derive(Debug, Deserialize)]
struct QuoteSummaryOuter {
    result: Option<Vec<SummaryModules>>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct SummaryModules {
    #[serde(rename = "summaryProfile")]
    summary_profile: Option<SummaryProfile>,
    price: Option<PriceModule>,
    #[serde(rename = "summaryDetail")]
    summary_detail: Option<SummaryDetail>,
    #[serde(rename = "financialData")]
    financial_data: Option<FinancialData>,
    #[serde(rename = "defaultKeyStatistics")]
    key_statistics: Option<KeyStatistics>,
}

#[derive(Debug, Default, Deserialize)]
struct SummaryProfile {
    sector: Option<String>,
    industry: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PriceModule {
    #[serde(rename = "longName")]
    long_name: Option<String>,
    #[serde(rename = "shortName")]
    short_name: Option<String>,
    #[serde(rename = "exchangeName")]
    exchange_name: Option<String>,
    #[serde(rename = "marketCap")]
    market_cap: Option<RawNum>,
    #[serde(rename = "regularMarketPrice")]
    regular_market_price: Option<RawNum>,
}

#[derive(Debug, Default, Deserialize)]
struct SummaryDetail {
    #[serde(rename = "trailingPE")]
    trailing_pe: Option<RawNum>,
    #[serde(rename = "forwardPE")]
    forward_pe: Option<RawNum>,
    beta: Option<RawNum>,
    #[serde(rename = "dividendYield")]
    dividend_yield: Option<RawNum>,
    #[serde(rename = "fiftyTwoWeekHigh")]
    fifty_two_week_high: Option<RawNum>,
    #[serde(rename = "fiftyTwoWeekLow")]
    fifty_two_week_low: Option<RawNum>,
    #[serde(rename = "marketCap")]
    market_cap: Option<RawNum>,
}

#[derive(Debug, Default, Deserialize)]
struct FinancialData {
    #[serde(rename = "totalRevenue")]
    total_revenue: Option<RawNum>,
    #[serde(rename = "totalDebt")]
    total_debt: Option<RawNum>,
    #[serde(rename = "freeCashflow")]
    free_cashflow: Option<RawNum>,
    #[serde(rename = "operatingCashflow")]
    operating_cashflow: Option<RawNum>,
    #[serde(rename = "returnOnEquity")]
    return_on_equity: Option<RawNum>,
    #[serde(rename = "returnOnAssets")]
    return_on_assets: Option<RawNum>,
    #[serde(rename = "debtToEquity")]
    debt_to_equity: Option<RawNum>,
    #[serde(rename = "currentRatio")]
    current_ratio: Option<RawNum>,
    #[serde(rename = "quickRatio")]
    quick_ratio: Option<RawNum>,
    #[serde(rename = "revenueGrowth")]
    revenue_growth: Option<RawNum>,
    #[serde(rename = "earningsGrowth")]
    earnings_growth: Option<RawNum>,
    #[serde(rename = "revenuePerShare")]
    revenue_per_share: Option<RawNum>,
    #[serde(rename = "currentPrice")]
    current_price: Option<RawNum>,
}

#[derive(Debug, Default, Deserialize)]
struct KeyStatistics {
    #[serde(rename = "enterpriseValue")]
    enterprise_value: Option<RawNum>,
    #[serde(rename = "enterpriseToEbitda")]
    enterprise_to_ebitda: Option<RawNum>,
    #[serde(rename = "pegRatio")]
    peg_ratio: Option<RawNum>,
    #[serde(rename = "trailingEps")]
    trailing_eps: Option<RawNum>,
    #[serde(rename = "bookValue")]
    book_value: Option<RawNum>,
    #[serde(rename = "priceToBook")]
    price_to_book: Option<RawNum>,
    #[serde(rename = "sharesOutstanding")]
    shares_outstanding: Option<RawNum>,
    #[serde(rename = "netIncomeToCommon")]
    net_income_to_common: Option<RawNum>,
    #[serde(rename = "totalAssets")]
    total_assets: Option<RawNum>,
    #[serde(rename = "mostRecentQuarter")]
    most_recent_quarter: Option<RawNum>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    news: Vec<SearchNewsItem>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchNewsItem {
    title: Option<String>,
    publisher: Option<String>,
    link: Option<String>,
    summary: Option<String>,
    #[serde(rename = "providerPublishTime")]
    provider_publish_time: Option<i64>,
}

// ==================== payload mapping ====================

fn single_result<T>(result: Option<Vec<T>>, error: Option<serde_json::Value>, what: &str) -> Result<T, ScreenerError> {
    if let Some(err) = error {
        return Err(ScreenerError::Source(format!("{what} error: {err}")));
    }
    result
        .and_then(|mut v| if v.is_empty() { None } else { Some(v.remove(0)) })
        .ok_or_else(|| ScreenerError::Source(format!("empty {what} result")))
}

fn bars_from_chart(symbol: &str, response: ChartResponse) -> Result<Vec<PriceBar>, ScreenerError> {
    let result = single_result(response.chart.result, response.chart.error, "chart")?;
    let timestamps = result.timestamp.unwrap_or_default();
    let quote = result
        .indicators
        .quote
        .into_iter()
        .next()
        .unwrap_or_default();
    let adjclose = result
        .indicators
        .adjclose
        .and_then(|mut blocks| {
            if blocks.is_empty() {
                None
            } else {
                Some(blocks.remove(0).adjclose)
            }
        })
        .unwrap_or_default();

    let mut bars = Vec::with_capacity(timestamps.len());
    let mut dropped = 0usize;
    for (i, ts) in timestamps.iter().enumerate() {
        let (open, high, low, close) = match (
            quote.open.get(i).copied().flatten(),
            quote.high.get(i).copied().flatten(),
            quote.low.get(i).copied().flatten(),
            quote.close.get(i).copied().flatten(),
        ) {
            (Some(o), Some(h), Some(l), Some(c)) => (o, h, l, c),
            _ => {
                dropped += 1;
                continue;
            }
        };
        let volume = quote.volume.get(i).copied().flatten().unwrap_or(0);
        let trade_date = match dates::from_unix_seconds(*ts) {
            Some(dt) => dt.date_naive(),
            None => {
                dropped += 1;
                continue;
            }
        };
        let adjusted_close = adjclose.get(i).copied().flatten().unwrap_or(close);

        let bar = PriceBar {
            symbol: symbol.to_string(),
            trade_date,
            open,
            high,
            low,
            close,
            volume,
            adjusted_close,
            source: SOURCE_NAME.to_string(),
            quality_score: 1.0,
        };
        if let Err(reason) = bar.validate() {
            tracing::warn!("dropping invalid bar: {}", reason);
            dropped += 1;
            continue;
        }
        bars.push(bar);
    }

    // Degrade per-bar quality by the completeness of the series
    if dropped > 0 && !bars.is_empty() {
        let completeness = bars.len() as f64 / (bars.len() + dropped) as f64;
        for bar in &mut bars {
            bar.quality_score = completeness;
        }
        tracing::warn!(
            "{}: dropped {} incomplete/invalid rows from chart payload",
            symbol,
            dropped
        );
    }

    Ok(bars)
}

fn profile_from_summary(
    symbol: &str,
    response: QuoteSummaryResponse,
) -> Result<StockProfile, ScreenerError> {
    let modules = single_result(
        response.quote_summary.result,
        response.quote_summary.error,
        "quoteSummary",
    )?;
    let profile = modules.summary_profile.unwrap_or_default();
    let price = modules.price.unwrap_or_default();
    let detail = modules.summary_detail.unwrap_or_default();

    Ok(StockProfile {
        symbol: symbol.to_string(),
        company_name: price.long_name.or(price.short_name),
        sector: profile.sector,
        industry: profile.industry,
        market_cap: as_i64(price.market_cap).or(as_i64(detail.market_cap)),
        listing_exchange: price.exchange_name,
        trailing_pe: as_f64(detail.trailing_pe),
        current_price: as_f64(price.regular_market_price),
    })
}

fn fundamentals_from_summary(
    symbol: &str,
    response: QuoteSummaryResponse,
) -> Result<FundamentalSnapshot, ScreenerError> {
    let modules = single_result(
        response.quote_summary.result,
        response.quote_summary.error,
        "quoteSummary",
    )?;
    let detail = modules.summary_detail.unwrap_or_default();
    let financial = modules.financial_data.unwrap_or_default();
    let stats = modules.key_statistics.unwrap_or_default();
    let price = modules.price.unwrap_or_default();

    // The statement date the snapshot is FOR, when the source provides it;
    // created_at below always records the collection instant.
    let reporting_date = as_i64(stats.most_recent_quarter)
        .and_then(dates::from_unix_seconds)
        .map(|dt| dt.date_naive())
        .unwrap_or_else(|| Utc::now().date_naive());

    let mut snapshot = FundamentalSnapshot {
        symbol: symbol.to_string(),
        reporting_date,
        period_type: "quarterly".to_string(),
        source: SOURCE_NAME.to_string(),
        total_revenue: as_i64(financial.total_revenue),
        net_income: as_i64(stats.net_income_to_common),
        total_assets: as_i64(stats.total_assets),
        total_debt: as_i64(financial.total_debt),
        shareholders_equity: None,
        shares_outstanding: as_i64(stats.shares_outstanding),
        free_cash_flow: as_i64(financial.free_cashflow),
        operating_cash_flow: as_i64(financial.operating_cashflow),
        eps: as_f64(stats.trailing_eps),
        book_value_per_share: as_f64(stats.book_value),
        pe_ratio: as_f64(detail.trailing_pe),
        forward_pe: as_f64(detail.forward_pe),
        peg_ratio: as_f64(stats.peg_ratio),
        price_to_book: as_f64(stats.price_to_book),
        enterprise_value: as_i64(stats.enterprise_value),
        ev_to_ebitda: as_f64(stats.enterprise_to_ebitda),
        return_on_equity: as_f64(financial.return_on_equity),
        return_on_assets: as_f64(financial.return_on_assets),
        debt_to_equity: as_f64(financial.debt_to_equity),
        current_ratio: as_f64(financial.current_ratio),
        quick_ratio: as_f64(financial.quick_ratio),
        revenue_growth: as_f64(financial.revenue_growth),
        earnings_growth: as_f64(financial.earnings_growth),
        revenue_per_share: as_f64(financial.revenue_per_share),
        current_price: as_f64(financial.current_price).or(as_f64(price.regular_market_price)),
        market_cap: as_i64(price.market_cap).or(as_i64(detail.market_cap)),
        beta: as_f64(detail.beta),
        dividend_yield: as_f64(detail.dividend_yield),
        week_52_high: as_f64(detail.fifty_two_week_high),
        week_52_low: as_f64(detail.fifty_two_week_low),
        quality_score: 0.0,
        created_at: Utc::now(),
    };
    snapshot.quality_score = snapshot.field_completeness();
    Ok(snapshot)
}

fn articles_from_search(
    symbol: &str,
    response: SearchResponse,
) -> Result<Vec<NewsArticle>, ScreenerError> {
    let total = response.news.len();
    let mut articles = Vec::with_capacity(total);
    let mut undated = 0usize;

    for item in response.news {
        // The article's own publish timestamp is required; wall-clock time
        // is never substituted.
        let publish_date = match item.provider_publish_time.and_then(dates::from_unix_seconds) {
            Some(dt) => dt,
            None => {
                undated += 1;
                tracing::warn!(
                    "{}: dropping news item without a parseable publish time: {:?}",
                    symbol,
                    item.title.as_deref().unwrap_or("<untitled>")
                );
                continue;
            }
        };
        let title = match item.title {
            Some(t) if !t.is_empty() => t,
            _ => {
                undated += 1;
                continue;
            }
        };

        let present = [
            true, // title checked above
            item.publisher.is_some(),
            item.link.is_some(),
            item.summary.is_some(),
        ];
        let completeness = present.iter().filter(|&&p| p).count() as f64 / present.len() as f64;

        articles.push(NewsArticle {
            symbol: symbol.to_string(),
            title,
            summary: item.summary.unwrap_or_default(),
            content: None,
            publisher: item.publisher.unwrap_or_default(),
            publish_date,
            url: item.link,
            sentiment_score: 0.0,
            quality_score: completeness,
        });
    }

    if total > 0 && articles.is_empty() {
        return Err(ScreenerError::Validation(format!(
            "{symbol}: all {total} news items lacked a parseable publish timestamp"
        )));
    }
    Ok(articles)
}
