use crate::{
    ApiStatus, FundamentalSnapshot, HistoryPeriod, NewsArticle, PriceBar, ScreenerError,
    SocialPost, StockProfile, TextSentiment,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Price/fundamentals/news source (Yahoo Finance in production).
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn fetch_profile(&self, symbol: &str) -> Result<StockProfile, ScreenerError>;

    async fn fetch_price_history(
        &self,
        symbol: &str,
        period: HistoryPeriod,
    ) -> Result<Vec<PriceBar>, ScreenerError>;

    async fn fetch_fundamentals(&self, symbol: &str)
        -> Result<FundamentalSnapshot, ScreenerError>;

    async fn fetch_news(&self, symbol: &str) -> Result<Vec<NewsArticle>, ScreenerError>;

    /// Credential / connectivity probe, reported to the config manager.
    async fn self_test(&self) -> (ApiStatus, String);
}

/// Social post source (Reddit in production).
#[async_trait]
pub trait SocialSource: Send + Sync {
    async fn fetch_posts(
        &self,
        symbol: &str,
        days_back: i64,
        max_posts: usize,
    ) -> Result<Vec<SocialPost>, ScreenerError>;

    async fn self_test(&self) -> (ApiStatus, String);
}

/// Index constituent source used by the universe manager.
#[async_trait]
pub trait ConstituentSource: Send + Sync {
    /// Fetch the current constituent symbol list, already normalized.
    async fn fetch_constituents(&self) -> Result<Vec<String>, ScreenerError>;

    /// Human-readable source label recorded in the universe metadata.
    fn label(&self) -> &'static str;
}

/// Pluggable text sentiment classifier, chosen at startup by the config
/// manager (rule-based lexicon or remote LLM).
#[async_trait]
pub trait SentimentModel: Send + Sync {
    async fn score_text(&self, text: &str) -> Result<TextSentiment, ScreenerError>;

    fn name(&self) -> &'static str;
}

/// Progress callback invoked after each symbol completes with
/// (current, total, last_symbol). Called from worker tasks, so
/// implementations must be thread-safe.
pub type ProgressSink = Arc<dyn Fn(usize, usize, &str) + Send + Sync>;
