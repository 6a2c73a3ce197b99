//! Constituent sources, tried in order: the Wikipedia constituents table,
//! the SPY holdings endpoint, then a compiled fallback list.

use async_trait::async_trait;
use screener_core::{normalize_symbol, ConstituentSource, ScreenerError};
use scraper::{Html, Selector};
use serde::Deserialize;
use std::time::Duration;

const WIKIPEDIA_URL: &str = "https://en.wikipedia.org/wiki/List_of_S%26P_500_companies";
const SPY_HOLDINGS_URL: &str =
    "https://query1.finance.yahoo.com/v10/finance/quoteSummary/SPY?modules=topHoldings";

/// A constituents payload with fewer symbols than this is a partial
/// listing, not the index.
const MIN_INDEX_CONSTITUENTS: usize = 400;

/// Representative compiled list used when both remote sources fail.
/// Deliberately broad across sectors so a degraded refresh still tracks
/// a meaningful cross-section of the index.
pub const FALLBACK_SYMBOLS: &[&str] = &[
    // Technology
    "AAPL", "MSFT", "GOOGL", "NVDA", "META", "AVGO", "ORCL", "CRM", "AMD",
    "ADBE", "INTC", "CSCO", "QCOM", "TXN", "NOW", "IBM", "AMAT", "MU", "SNPS",
    // Healthcare
    "JNJ", "UNH", "PFE", "ABBV", "MRK", "LLY", "TMO", "ABT", "DHR", "BMY",
    "AMGN", "GILD", "MDT", "ISRG", "VRTX",
    // Financials
    "JPM", "BAC", "GS", "V", "MA", "BRK-B", "WFC", "MS", "AXP", "SCHW",
    "BLK", "C", "CB", "MMC", "ICE",
    // Energy
    "XOM", "CVX", "COP", "SLB", "EOG", "MPC", "PSX", "VLO", "OXY", "HAL",
    // Consumer Discretionary
    "AMZN", "TSLA", "HD", "NKE", "SBUX", "MCD", "LOW", "TJX", "BKNG", "CMG",
    "ORLY", "ROST", "DHI", "LEN", "GM",
    // Industrials
    "CAT", "BA", "HON", "UPS", "GE", "RTX", "DE", "LMT", "UNP", "ETN",
    "WM", "EMR", "ITW", "FDX", "NSC",
    // Utilities
    "NEE", "DUK", "SO", "AEP", "D", "SRE", "EXC", "XEL",
    // Materials
    "LIN", "APD", "ECL", "SHW", "NEM", "FCX", "DOW", "NUE",
    // Real Estate
    "AMT", "PLD", "CCI", "EQIX", "SPG", "PSA", "O", "DLR",
    // Communications
    "NFLX", "DIS", "CMCSA", "T", "VZ", "TMUS", "CHTR", "EA", "TTWO", "WBD",
    // Consumer Staples
    "PG", "KO", "PEP", "COST", "WMT", "PM", "MO", "CL", "KHC", "GIS",
];

/// Extract constituent symbols from the Wikipedia article HTML. The first
/// wikitable carries the current constituents with a Symbol/Ticker column.
pub fn parse_constituents_html(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let table_selector = match Selector::parse("table.wikitable") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };
    let row_selector = Selector::parse("tr").expect("static selector");
    let header_selector = Selector::parse("th").expect("static selector");
    let cell_selector = Selector::parse("td").expect("static selector");

    let Some(table) = document.select(&table_selector).next() else {
        return Vec::new();
    };

    // Locate the Symbol/Ticker column; default to the first column
    let mut symbol_column = 0usize;
    if let Some(header_row) = table.select(&row_selector).next() {
        for (idx, th) in header_row.select(&header_selector).enumerate() {
            let text = th.text().collect::<String>().to_lowercase();
            if text.contains("symbol") || text.contains("ticker") {
                symbol_column = idx;
                break;
            }
        }
    }

    let mut symbols = Vec::new();
    for row in table.select(&row_selector).skip(1) {
        let Some(cell) = row.select(&cell_selector).nth(symbol_column) else {
            continue;
        };
        let raw = cell.text().collect::<String>();
        let symbol = normalize_symbol(&raw);
        if !symbol.is_empty() && symbol.len() <= 10 && symbol.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            symbols.push(symbol);
        }
    }
    symbols
}

/// Primary source: the Wikipedia constituents table.
pub struct WikipediaSource {
    client: reqwest::Client,
}

impl WikipediaSource {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (compatible; stock-screener)")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl Default for WikipediaSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConstituentSource for WikipediaSource {
    async fn fetch_constituents(&self) -> Result<Vec<String>, ScreenerError> {
        let response = self
            .client
            .get(WIKIPEDIA_URL)
            .send()
            .await
            .map_err(|e| ScreenerError::Source(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ScreenerError::Source(format!(
                "wikipedia HTTP {}",
                response.status()
            )));
        }
        let html = response
            .text()
            .await
            .map_err(|e| ScreenerError::Source(e.to_string()))?;
        let symbols = parse_constituents_html(&html);
        if symbols.len() < MIN_INDEX_CONSTITUENTS {
            return Err(ScreenerError::Parse(format!(
                "constituents table yielded only {} symbols",
                symbols.len()
            )));
        }
        Ok(symbols)
    }

    fn label(&self) -> &'static str {
        "wikipedia"
    }
}

#[derive(Debug, Deserialize)]
struct HoldingsResponse {
    #[serde(rename = "quoteSummary")]
    quote_summary: HoldingsOuter,
}

#[derive(Debug, Deserialize)]
struct HoldingsOuter {
    result: Option<Vec<HoldingsModules>>,
}

#[derive(Debug, Default, Deserialize)]
struct HoldingsModules {
    #[serde(rename = "topHoldings")]
    top_holdings: Option<TopHoldings>,
}

#[derive(Debug, Default, Deserialize)]
struct TopHoldings {
    #[serde(default)]
    holdings: Vec<Holding>,
}

#[derive(Debug, Deserialize)]
struct Holding {
    symbol: Option<String>,
}

/// Secondary source: SPY ETF holdings.
pub struct SpyHoldingsSource {
    client: reqwest::Client,
}

impl SpyHoldingsSource {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl Default for SpyHoldingsSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConstituentSource for SpyHoldingsSource {
    async fn fetch_constituents(&self) -> Result<Vec<String>, ScreenerError> {
        let response = self
            .client
            .get(SPY_HOLDINGS_URL)
            .send()
            .await
            .map_err(|e| ScreenerError::Source(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ScreenerError::Source(format!(
                "holdings HTTP {}",
                response.status()
            )));
        }
        let payload: HoldingsResponse = response
            .json()
            .await
            .map_err(|e| ScreenerError::Parse(e.to_string()))?;
        let symbols: Vec<String> = payload
            .quote_summary
            .result
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.top_holdings)
            .flat_map(|h| h.holdings)
            .filter_map(|h| h.symbol)
            .map(|s| normalize_symbol(&s))
            .collect();
        if symbols.len() < MIN_INDEX_CONSTITUENTS {
            return Err(ScreenerError::Source(format!(
                "holdings endpoint returned only {} symbols",
                symbols.len()
            )));
        }
        Ok(symbols)
    }

    fn label(&self) -> &'static str {
        "spy_holdings"
    }
}

/// Last-resort compiled list.
pub struct CompiledListSource;

#[async_trait]
impl ConstituentSource for CompiledListSource {
    async fn fetch_constituents(&self) -> Result<Vec<String>, ScreenerError> {
        Ok(FALLBACK_SYMBOLS.iter().map(|s| s.to_string()).collect())
    }

    fn label(&self) -> &'static str {
        "compiled_fallback"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_table_yields_normalized_symbols() {
        let html = r#"
            <html><body>
            <table class="wikitable">
                <tr><th>Symbol</th><th>Security</th></tr>
                <tr><td>AAPL</td><td>Apple Inc.</td></tr>
                <tr><td>BRK.B</td><td>Berkshire Hathaway</td></tr>
                <tr><td> msft </td><td>Microsoft</td></tr>
            </table>
            </body></html>
        "#;
        let symbols = parse_constituents_html(html);
        assert_eq!(symbols, vec!["AAPL", "BRK-B", "MSFT"]);
    }

    #[test]
    fn ticker_column_not_first_is_found() {
        let html = r#"
            <table class="wikitable">
                <tr><th>Security</th><th>Ticker</th></tr>
                <tr><td>Apple Inc.</td><td>AAPL</td></tr>
            </table>
        "#;
        assert_eq!(parse_constituents_html(html), vec!["AAPL"]);
    }

    #[test]
    fn malformed_html_yields_empty_list() {
        assert!(parse_constituents_html("<p>no table here</p>").is_empty());
    }

    #[tokio::test]
    async fn compiled_list_is_always_available() {
        let symbols = CompiledListSource.fetch_constituents().await.unwrap();
        assert!(symbols.len() > 100);
        assert!(symbols.contains(&"BRK-B".to_string()));
    }
}
