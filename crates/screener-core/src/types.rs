use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Data components scored and gated independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Component {
    Fundamentals,
    PriceData,
    NewsData,
    SentimentData,
}

impl Component {
    pub const ALL: [Component; 4] = [
        Component::Fundamentals,
        Component::PriceData,
        Component::NewsData,
        Component::SentimentData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Fundamentals => "fundamentals",
            Component::PriceData => "price_data",
            Component::NewsData => "news_data",
            Component::SentimentData => "sentiment_data",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "fundamentals" => Some(Component::Fundamentals),
            "price_data" => Some(Component::PriceData),
            "news_data" => Some(Component::NewsData),
            "sentiment_data" => Some(Component::SentimentData),
            _ => None,
        }
    }
}

/// Coarse bucket of data age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FreshnessLevel {
    Fresh,
    Recent,
    Stale,
    VeryStale,
    Missing,
}

impl FreshnessLevel {
    /// Multiplicative attenuation applied to downstream scores.
    pub fn staleness_multiplier(&self) -> f64 {
        match self {
            FreshnessLevel::Fresh => 1.0,
            FreshnessLevel::Recent => 0.95,
            FreshnessLevel::Stale => 0.85,
            FreshnessLevel::VeryStale => 0.70,
            FreshnessLevel::Missing => 0.0,
        }
    }

    /// Freshness factor of the component quality score.
    pub fn quality_factor(&self) -> f64 {
        match self {
            FreshnessLevel::Fresh => 1.0,
            FreshnessLevel::Recent => 0.95,
            FreshnessLevel::Stale => 0.80,
            FreshnessLevel::VeryStale => 0.60,
            FreshnessLevel::Missing => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FreshnessLevel::Fresh => "fresh",
            FreshnessLevel::Recent => "recent",
            FreshnessLevel::Stale => "stale",
            FreshnessLevel::VeryStale => "very_stale",
            FreshnessLevel::Missing => "missing",
        }
    }
}

/// Tracked equity. Created by universe refresh or explicit add; never
/// deleted, only deactivated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stock {
    pub symbol: String,
    pub company_name: String,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub market_cap: Option<i64>,
    pub listing_exchange: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Daily OHLCV bar keyed by (symbol, trade_date, source).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceBar {
    pub symbol: String,
    pub trade_date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub adjusted_close: f64,
    pub source: String,
    pub quality_score: f64,
}

impl PriceBar {
    /// OHLC consistency check: low <= min(open, close) <= max(open, close) <= high,
    /// positive prices, non-negative volume.
    pub fn validate(&self) -> Result<(), String> {
        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return Err(format!(
                "non-positive price in bar {} {}",
                self.symbol, self.trade_date
            ));
        }
        if self.volume < 0 {
            return Err(format!(
                "negative volume in bar {} {}",
                self.symbol, self.trade_date
            ));
        }
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        if self.low > body_low || self.high < body_high {
            return Err(format!(
                "inconsistent OHLC in bar {} {}: o={} h={} l={} c={}",
                self.symbol, self.trade_date, self.open, self.high, self.low, self.close
            ));
        }
        Ok(())
    }
}

/// Full fundamentals snapshot keyed by (symbol, reporting_date, period_type, source).
/// Every ratio is nullable; `created_at` records the collection instant,
/// distinct from `reporting_date`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FundamentalSnapshot {
    pub symbol: String,
    pub reporting_date: NaiveDate,
    pub period_type: String,
    pub source: String,

    // Core financials (minor units)
    pub total_revenue: Option<i64>,
    pub net_income: Option<i64>,
    pub total_assets: Option<i64>,
    pub total_debt: Option<i64>,
    pub shareholders_equity: Option<i64>,
    pub shares_outstanding: Option<i64>,
    pub free_cash_flow: Option<i64>,
    pub operating_cash_flow: Option<i64>,

    // Valuation
    pub eps: Option<f64>,
    pub book_value_per_share: Option<f64>,
    pub pe_ratio: Option<f64>,
    pub forward_pe: Option<f64>,
    pub peg_ratio: Option<f64>,
    pub price_to_book: Option<f64>,
    pub enterprise_value: Option<i64>,
    pub ev_to_ebitda: Option<f64>,

    // Quality
    pub return_on_equity: Option<f64>,
    pub return_on_assets: Option<f64>,
    pub debt_to_equity: Option<f64>,
    pub current_ratio: Option<f64>,
    pub quick_ratio: Option<f64>,

    // Growth
    pub revenue_growth: Option<f64>,
    pub earnings_growth: Option<f64>,
    pub revenue_per_share: Option<f64>,

    // Market context
    pub current_price: Option<f64>,
    pub market_cap: Option<i64>,
    pub beta: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub week_52_high: Option<f64>,
    pub week_52_low: Option<f64>,

    pub quality_score: f64,
    pub created_at: DateTime<Utc>,
}

impl FundamentalSnapshot {
    /// Ratio of populated optional fields, used as the completeness factor
    /// of the snapshot quality score.
    pub fn field_completeness(&self) -> f64 {
        let present = [
            self.total_revenue.is_some(),
            self.net_income.is_some(),
            self.total_assets.is_some(),
            self.total_debt.is_some(),
            self.shareholders_equity.is_some(),
            self.shares_outstanding.is_some(),
            self.free_cash_flow.is_some(),
            self.operating_cash_flow.is_some(),
            self.eps.is_some(),
            self.book_value_per_share.is_some(),
            self.pe_ratio.is_some(),
            self.forward_pe.is_some(),
            self.peg_ratio.is_some(),
            self.price_to_book.is_some(),
            self.enterprise_value.is_some(),
            self.ev_to_ebitda.is_some(),
            self.return_on_equity.is_some(),
            self.return_on_assets.is_some(),
            self.debt_to_equity.is_some(),
            self.current_ratio.is_some(),
            self.quick_ratio.is_some(),
            self.revenue_growth.is_some(),
            self.earnings_growth.is_some(),
            self.revenue_per_share.is_some(),
            self.current_price.is_some(),
            self.market_cap.is_some(),
            self.beta.is_some(),
            self.dividend_yield.is_some(),
            self.week_52_high.is_some(),
            self.week_52_low.is_some(),
        ];
        let count = present.iter().filter(|&&p| p).count();
        count as f64 / present.len() as f64
    }
}

/// News article, unique by URL when one is present. `publish_date` is the
/// article's own timestamp, never the collection time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsArticle {
    pub symbol: String,
    pub title: String,
    pub summary: String,
    pub content: Option<String>,
    pub publisher: String,
    pub publish_date: DateTime<Utc>,
    pub url: Option<String>,
    pub sentiment_score: f64,
    pub quality_score: f64,
}

/// Social post, unique by external post id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialPost {
    pub symbol: String,
    pub post_id: String,
    pub title: String,
    pub content: String,
    pub subreddit: String,
    pub author: String,
    pub score: i64,
    pub upvote_ratio: f64,
    pub num_comments: i64,
    pub created_utc: DateTime<Utc>,
    pub url: Option<String>,
    pub sentiment_score: f64,
    pub quality_score: f64,
}

/// Per-day sentiment aggregate keyed by (symbol, date).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySentiment {
    pub symbol: String,
    pub date: NaiveDate,
    pub news_sentiment: f64,
    pub news_count: i64,
    pub social_sentiment: f64,
    pub social_count: i64,
    pub combined_sentiment: f64,
    pub quality_score: f64,
}

/// Persisted scoring result keyed by (symbol, calculation_date).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculatedMetrics {
    pub symbol: String,
    pub calculation_date: NaiveDate,
    pub fundamental_score: Option<f64>,
    pub quality_score: Option<f64>,
    pub growth_score: Option<f64>,
    pub sentiment_score: Option<f64>,
    pub composite_score: Option<f64>,
    pub sector_percentile: Option<f64>,
    pub confidence_interval_lower: Option<f64>,
    pub confidence_interval_upper: Option<f64>,
    pub methodology_version: String,
}

/// One scored ratio inside a component result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubScore {
    pub metric: String,
    pub raw: Option<f64>,
    pub score: f64,
    pub weight: f64,
}

/// Result of one component scorer: raw ratios, 0-100 subscores, weighted
/// composite, and the staleness metadata of the data it was computed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentMetrics {
    pub symbol: String,
    pub component: Component,
    pub calculation_date: NaiveDate,
    pub subscores: Vec<SubScore>,
    pub score: f64,
    pub data_quality: f64,
    pub sector: Option<String>,
    pub data_age_days: Option<f64>,
    pub freshness: FreshnessLevel,
    pub staleness_impact: f64,
    pub staleness_warnings: Vec<String>,
    pub version_id: Option<String>,
}

/// Quality gate lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateStatus {
    Pending,
    Approved,
    Rejected,
    Blocked,
    Expired,
}

impl GateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateStatus::Pending => "pending",
            GateStatus::Approved => "approved",
            GateStatus::Rejected => "rejected",
            GateStatus::Blocked => "blocked",
            GateStatus::Expired => "expired",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(GateStatus::Pending),
            "approved" => Some(GateStatus::Approved),
            "rejected" => Some(GateStatus::Rejected),
            "blocked" => Some(GateStatus::Blocked),
            "expired" => Some(GateStatus::Expired),
            _ => None,
        }
    }
}

/// Comparison operator of a quality rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleOperator {
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "==")]
    Eq,
}

impl RuleOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleOperator::Gte => ">=",
            RuleOperator::Lte => "<=",
            RuleOperator::Gt => ">",
            RuleOperator::Lt => "<",
            RuleOperator::Eq => "==",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            ">=" => Some(RuleOperator::Gte),
            "<=" => Some(RuleOperator::Lte),
            ">" => Some(RuleOperator::Gt),
            "<" => Some(RuleOperator::Lt),
            "==" => Some(RuleOperator::Eq),
            _ => None,
        }
    }

    /// The rule's predicate holds for `value` against `threshold`.
    /// A rule FAILS when this returns false.
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            RuleOperator::Gte => value >= threshold,
            RuleOperator::Lte => value <= threshold,
            RuleOperator::Gt => value > threshold,
            RuleOperator::Lt => value < threshold,
            RuleOperator::Eq => (value - threshold).abs() < f64::EPSILON,
        }
    }
}

/// Quality rule configuration. Rules are configuration, not per-symbol state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityRule {
    pub component: Component,
    pub metric: String,
    pub threshold: f64,
    pub operator: RuleOperator,
    pub blocks_analysis: bool,
    pub description: String,
}

/// Persisted gate row. Transitions append new rows; readers use the
/// latest row per (symbol, component).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityGateRecord {
    pub gate_id: String,
    pub symbol: String,
    pub component: Component,
    pub status: GateStatus,
    pub quality_score: f64,
    pub approval_timestamp: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub blocking_rules: Vec<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Snapshot identifier tying an approval to the data it approved.
/// At most one active row per (symbol, component).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataVersionRecord {
    pub version_id: String,
    pub symbol: String,
    pub component: Component,
    pub data_snapshot: serde_json::Value,
    pub approval_gate_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// External API health as reported by an adapter self-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiStatus {
    Healthy,
    Limited,
    RateLimited,
    InvalidCredentials,
    Failed,
    Untested,
}

impl ApiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiStatus::Healthy => "healthy",
            ApiStatus::Limited => "limited",
            ApiStatus::RateLimited => "rate_limited",
            ApiStatus::InvalidCredentials => "invalid_credentials",
            ApiStatus::Failed => "failed",
            ApiStatus::Untested => "untested",
        }
    }
}

/// Company profile returned by the price source's info endpoint.
/// Missing keys are tolerated; `field_completeness` feeds the quality score.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StockProfile {
    pub symbol: String,
    pub company_name: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub market_cap: Option<i64>,
    pub listing_exchange: Option<String>,
    pub trailing_pe: Option<f64>,
    pub current_price: Option<f64>,
}

impl StockProfile {
    pub fn field_completeness(&self) -> f64 {
        let present = [
            self.company_name.is_some(),
            self.sector.is_some(),
            self.industry.is_some(),
            self.market_cap.is_some(),
            self.listing_exchange.is_some(),
            self.trailing_pe.is_some(),
            self.current_price.is_some(),
        ];
        present.iter().filter(|&&p| p).count() as f64 / present.len() as f64
    }
}

/// Lookback period for price history requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryPeriod {
    OneMonth,
    ThreeMonths,
    SixMonths,
    OneYear,
    TwoYears,
    FiveYears,
}

impl HistoryPeriod {
    pub fn days(&self) -> i64 {
        match self {
            HistoryPeriod::OneMonth => 30,
            HistoryPeriod::ThreeMonths => 91,
            HistoryPeriod::SixMonths => 182,
            HistoryPeriod::OneYear => 365,
            HistoryPeriod::TwoYears => 730,
            HistoryPeriod::FiveYears => 1825,
        }
    }
}

/// Text sentiment produced by a `SentimentModel`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TextSentiment {
    /// Polarity in [-1, 1].
    pub score: f64,
    /// Model confidence in [0, 1].
    pub confidence: f64,
}

/// Normalize a raw ticker symbol: uppercase, trimmed, dots mapped to
/// dashes (BRK.B -> BRK-B).
pub fn normalize_symbol(raw: &str) -> String {
    raw.trim().to_uppercase().replace('.', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open: f64, high: f64, low: f64, close: f64, volume: i64) -> PriceBar {
        PriceBar {
            symbol: "AAPL".to_string(),
            trade_date: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
            open,
            high,
            low,
            close,
            volume,
            adjusted_close: close,
            source: "yahoo_finance".to_string(),
            quality_score: 1.0,
        }
    }

    #[test]
    fn valid_bar_passes() {
        assert!(bar(100.0, 105.0, 99.0, 103.0, 1_000_000).validate().is_ok());
    }

    #[test]
    fn high_below_close_fails() {
        assert!(bar(100.0, 101.0, 99.0, 103.0, 1_000_000).validate().is_err());
    }

    #[test]
    fn low_above_open_fails() {
        assert!(bar(100.0, 105.0, 101.0, 103.0, 1_000_000).validate().is_err());
    }

    #[test]
    fn negative_volume_fails() {
        assert!(bar(100.0, 105.0, 99.0, 103.0, -1).validate().is_err());
    }

    #[test]
    fn zero_price_fails() {
        assert!(bar(0.0, 105.0, 99.0, 103.0, 100).validate().is_err());
    }

    #[test]
    fn staleness_multiplier_is_monotone() {
        let levels = [
            FreshnessLevel::Fresh,
            FreshnessLevel::Recent,
            FreshnessLevel::Stale,
            FreshnessLevel::VeryStale,
            FreshnessLevel::Missing,
        ];
        for pair in levels.windows(2) {
            assert!(
                pair[0].staleness_multiplier() >= pair[1].staleness_multiplier(),
                "{:?} should not be fresher than {:?}",
                pair[1],
                pair[0]
            );
        }
    }

    #[test]
    fn rule_operator_predicates() {
        assert!(RuleOperator::Gte.holds(0.7, 0.7));
        assert!(!RuleOperator::Gte.holds(0.69, 0.7));
        assert!(RuleOperator::Lte.holds(48.0, 48.0));
        assert!(!RuleOperator::Lte.holds(48.1, 48.0));
        assert!(!RuleOperator::Gt.holds(3.0, 3.0));
        assert!(RuleOperator::Lt.holds(2.9, 3.0));
    }

    #[test]
    fn symbol_normalization() {
        assert_eq!(normalize_symbol(" brk.b "), "BRK-B");
        assert_eq!(normalize_symbol("AAPL"), "AAPL");
    }
}
