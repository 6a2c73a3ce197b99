use async_trait::async_trait;
use chrono::{Duration, Utc};
use screener_core::{
    ApiStatus, FundamentalSnapshot, HistoryPeriod, MarketDataSource, NewsArticle, PriceBar,
    ScreenerError, SocialPost, SocialSource, StockProfile,
};
use sentiment_scoring::RuleBasedModel;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use store::Database;

use crate::{CancelFlag, CollectionOrchestrator, CollectionType, UnitOutcome};

#[derive(Default)]
struct MockMarket {
    fail_profile_for: Option<String>,
    fail_news_for: Option<String>,
    rate_limit_prices: bool,
    empty_news: bool,
}

#[async_trait]
impl MarketDataSource for MockMarket {
    async fn fetch_profile(&self, symbol: &str) -> Result<StockProfile, ScreenerError> {
        if self.fail_profile_for.as_deref() == Some(symbol) {
            return Err(ScreenerError::Source("profile endpoint down".to_string()));
        }
        Ok(StockProfile {
            symbol: symbol.to_string(),
            company_name: Some(format!("{symbol} Inc.")),
            sector: Some("Technology".to_string()),
            industry: Some("Software".to_string()),
            market_cap: Some(1_000_000_000_000),
            listing_exchange: Some("NASDAQ".to_string()),
            trailing_pe: Some(25.0),
            current_price: Some(200.0),
        })
    }

    async fn fetch_price_history(
        &self,
        symbol: &str,
        _period: HistoryPeriod,
    ) -> Result<Vec<PriceBar>, ScreenerError> {
        if self.rate_limit_prices {
            return Err(ScreenerError::RateLimited("budget exhausted".to_string()));
        }
        let today = Utc::now().date_naive();
        Ok((0..3)
            .map(|i| PriceBar {
                symbol: symbol.to_string(),
                trade_date: today - Duration::days(i),
                open: 100.0,
                high: 105.0,
                low: 99.0,
                close: 103.0,
                volume: 1_000_000,
                adjusted_close: 103.0,
                source: "yahoo_finance".to_string(),
                quality_score: 1.0,
            })
            .collect())
    }

    async fn fetch_fundamentals(
        &self,
        symbol: &str,
    ) -> Result<FundamentalSnapshot, ScreenerError> {
        Ok(FundamentalSnapshot {
            symbol: symbol.to_string(),
            reporting_date: Utc::now().date_naive(),
            period_type: "quarterly".to_string(),
            source: "yahoo_finance".to_string(),
            pe_ratio: Some(25.0),
            free_cash_flow: Some(50_000_000_000),
            market_cap: Some(1_000_000_000_000),
            quality_score: 0.5,
            created_at: Utc::now(),
            ..Default::default()
        })
    }

    async fn fetch_news(&self, symbol: &str) -> Result<Vec<NewsArticle>, ScreenerError> {
        if self.fail_news_for.as_deref() == Some(symbol) {
            return Err(ScreenerError::Timeout("news endpoint timed out".to_string()));
        }
        if self.empty_news {
            return Ok(Vec::new());
        }
        Ok((0..2)
            .map(|i| NewsArticle {
                symbol: symbol.to_string(),
                title: format!("{symbol} shares surge after earnings beat"),
                summary: "Strong quarter".to_string(),
                content: None,
                publisher: "Wire".to_string(),
                publish_date: Utc::now() - Duration::hours(i),
                url: Some(format!("https://example.com/{symbol}/{i}")),
                sentiment_score: 0.0,
                quality_score: 0.8,
            })
            .collect())
    }

    async fn self_test(&self) -> (ApiStatus, String) {
        (ApiStatus::Healthy, "mock".to_string())
    }
}

#[derive(Default)]
struct MockSocial {
    empty: bool,
}

#[async_trait]
impl SocialSource for MockSocial {
    async fn fetch_posts(
        &self,
        symbol: &str,
        _days_back: i64,
        _max_posts: usize,
    ) -> Result<Vec<SocialPost>, ScreenerError> {
        if self.empty {
            return Ok(Vec::new());
        }
        Ok(vec![SocialPost {
            symbol: symbol.to_string(),
            post_id: format!("t3_{symbol}"),
            title: format!("{symbol} looking bullish"),
            content: "rally incoming".to_string(),
            subreddit: "stocks".to_string(),
            author: "user1".to_string(),
            score: 50,
            upvote_ratio: 0.9,
            num_comments: 12,
            created_utc: Utc::now() - Duration::hours(5),
            url: None,
            sentiment_score: 0.0,
            quality_score: 0.7,
        }])
    }

    async fn self_test(&self) -> (ApiStatus, String) {
        (ApiStatus::Healthy, "mock".to_string())
    }
}

async fn orchestrator_with(market: MockMarket, social: MockSocial) -> CollectionOrchestrator {
    let db = Database::in_memory().await.unwrap();
    db.migrate().await.unwrap();
    CollectionOrchestrator::new(
        db,
        Arc::new(market),
        Arc::new(social),
        Arc::new(RuleBasedModel::new()),
    )
    .with_workers(2)
}

fn symbols(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn full_collection_writes_every_table() {
    let orchestrator = orchestrator_with(MockMarket::default(), MockSocial::default()).await;
    let report = orchestrator
        .refresh_selected(&symbols(&["AAPL"]), &CollectionType::ALL, None, None)
        .await;

    assert_eq!(report.successful_symbols(), 1);
    assert!((report.success_ratio() - 1.0).abs() < 1e-9);

    let db = &orchestrator.db;
    // Profile write happened before the dependent rows
    assert!(db.get_stock("AAPL").await.unwrap().is_some());
    assert_eq!(db.price_bar_count("AAPL").await.unwrap(), 3);
    assert!(db.latest_fundamental("AAPL").await.unwrap().is_some());
    assert_eq!(db.news_count("AAPL").await.unwrap(), 2);
    assert!(db.latest_daily_sentiment("AAPL").await.unwrap().is_some());

    // The model scored the collected articles
    let news = db.recent_news("AAPL", 7).await.unwrap();
    assert!(news.iter().any(|a| a.sentiment_score > 0.0));
}

#[tokio::test]
async fn failing_unit_does_not_abort_siblings() {
    let market = MockMarket {
        fail_news_for: Some("AAPL".to_string()),
        ..Default::default()
    };
    let orchestrator = orchestrator_with(market, MockSocial::default()).await;
    let report = orchestrator
        .refresh_selected(
            &symbols(&["AAPL", "MSFT"]),
            &[CollectionType::Prices, CollectionType::News],
            None,
            None,
        )
        .await;

    let aapl = &report.outcomes["AAPL"];
    assert!(matches!(aapl["news"], UnitOutcome::SourceError(_)));
    assert!(matches!(aapl["prices"], UnitOutcome::Ok { rows_written: 3 }));

    // The sibling symbol is untouched by AAPL's failure
    let msft = &report.outcomes["MSFT"];
    assert!(msft.values().all(UnitOutcome::is_success));
    assert_eq!(report.successful_symbols(), 1);
    assert!((report.success_ratio() - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn rate_limit_maps_to_its_own_outcome() {
    let market = MockMarket {
        rate_limit_prices: true,
        ..Default::default()
    };
    let orchestrator = orchestrator_with(market, MockSocial::default()).await;
    let report = orchestrator
        .refresh_selected(&symbols(&["AAPL"]), &[CollectionType::Prices], None, None)
        .await;
    assert_eq!(report.outcomes["AAPL"]["prices"], UnitOutcome::RateLimited);
}

#[tokio::test]
async fn empty_news_is_no_data_not_an_error() {
    let market = MockMarket {
        empty_news: true,
        ..Default::default()
    };
    let orchestrator = orchestrator_with(market, MockSocial { empty: true }).await;
    let report = orchestrator
        .refresh_selected(
            &symbols(&["AAPL"]),
            &[CollectionType::News, CollectionType::Sentiment],
            None,
            None,
        )
        .await;

    assert_eq!(report.outcomes["AAPL"]["news"], UnitOutcome::NoData);
    assert_eq!(report.outcomes["AAPL"]["sentiment"], UnitOutcome::NoData);
    assert_eq!(report.successful_symbols(), 1, "no data is still a clean run");
}

#[tokio::test]
async fn unknown_symbol_with_dead_profile_fails_all_units() {
    let market = MockMarket {
        fail_profile_for: Some("ZZZZ".to_string()),
        ..Default::default()
    };
    let orchestrator = orchestrator_with(market, MockSocial::default()).await;
    let report = orchestrator
        .refresh_selected(
            &symbols(&["ZZZZ"]),
            &[CollectionType::Prices, CollectionType::Fundamentals],
            None,
            None,
        )
        .await;

    let outcomes = &report.outcomes["ZZZZ"];
    assert!(matches!(outcomes["prices"], UnitOutcome::SourceError(_)));
    assert!(matches!(
        outcomes["fundamentals"],
        UnitOutcome::SourceError(_)
    ));
    assert!(orchestrator.db.get_stock("ZZZZ").await.unwrap().is_none());
}

#[tokio::test]
async fn progress_sink_fires_once_per_symbol() {
    let orchestrator = orchestrator_with(MockMarket::default(), MockSocial::default()).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_sink = Arc::clone(&calls);
    let sink: screener_core::ProgressSink = Arc::new(move |current, total, _symbol| {
        assert!(current >= 1 && current <= total);
        calls_in_sink.fetch_add(1, Ordering::SeqCst);
    });

    orchestrator
        .refresh_selected(
            &symbols(&["AAPL", "MSFT", "GOOGL"]),
            &[CollectionType::Prices],
            Some(sink),
            None,
        )
        .await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn cancellation_short_circuits_pending_work() {
    let orchestrator = orchestrator_with(MockMarket::default(), MockSocial::default()).await;
    let cancel = CancelFlag::new();
    cancel.cancel();

    let report = orchestrator
        .refresh_selected(
            &symbols(&["AAPL", "MSFT"]),
            &CollectionType::ALL,
            None,
            Some(cancel),
        )
        .await;

    for units in report.outcomes.values() {
        for outcome in units.values() {
            assert_eq!(*outcome, UnitOutcome::Cancelled);
        }
    }
    assert_eq!(orchestrator.db.price_bar_count("AAPL").await.unwrap(), 0);
    assert_eq!(report.successful_symbols(), 0);
}

#[tokio::test]
async fn selective_refresh_touches_only_its_table() {
    let orchestrator = orchestrator_with(MockMarket::default(), MockSocial::default()).await;
    let report = orchestrator
        .refresh_prices_only(&symbols(&["AAPL"]))
        .await;
    assert!(report.outcomes["AAPL"]["prices"].is_success());

    let db = &orchestrator.db;
    assert_eq!(db.price_bar_count("AAPL").await.unwrap(), 3);
    assert!(db.latest_fundamental("AAPL").await.unwrap().is_none());
    assert_eq!(db.news_count("AAPL").await.unwrap(), 0);
}

#[test]
fn duration_estimate_uses_per_type_costs() {
    let estimate = CollectionOrchestrator::estimate_duration(5, &CollectionType::ALL);
    // (0.5 + 0.3 + 0.4 + 2.0) seconds x 5 symbols
    assert_eq!(estimate, std::time::Duration::from_secs(16));

    let prices_only =
        CollectionOrchestrator::estimate_duration(10, &[CollectionType::Prices]);
    assert_eq!(prices_only, std::time::Duration::from_secs(3));
}

#[test]
fn report_counts_outcomes_by_class() {
    let mut outcomes = std::collections::BTreeMap::new();
    let mut aapl = std::collections::BTreeMap::new();
    aapl.insert("prices", UnitOutcome::Ok { rows_written: 3 });
    aapl.insert("news", UnitOutcome::SourceError("down".to_string()));
    outcomes.insert("AAPL".to_string(), aapl);

    let report = crate::CollectionReport {
        universe_id: None,
        total_symbols: 1,
        started_at: Utc::now(),
        finished_at: Utc::now(),
        outcomes,
    };
    let counts = report.counts_by_class();
    assert_eq!(counts.get("ok"), Some(&1));
    assert_eq!(counts.get("source_error"), Some(&1));
    assert_eq!(report.successful_symbols(), 0);
}
