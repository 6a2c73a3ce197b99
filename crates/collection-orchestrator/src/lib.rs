//! Collection orchestration: drive (symbol x data type) units under
//! bounded parallelism, aggregate outcomes into a report, and emit
//! progress. One failing unit never aborts its siblings; within a symbol
//! the stock profile is written before anything that depends on it.

use chrono::{DateTime, Utc};
use screener_core::{
    MarketDataSource, ProgressSink, ScreenerError, SentimentModel, SocialSource, Stock,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use store::Database;
use tokio::sync::{Mutex, Semaphore};
use universe_manager::UniverseManager;

pub mod units;

#[cfg(test)]
mod tests;

/// Data categories the orchestrator can collect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CollectionType {
    Fundamentals,
    Prices,
    News,
    Sentiment,
}

impl CollectionType {
    pub const ALL: [CollectionType; 4] = [
        CollectionType::Fundamentals,
        CollectionType::Prices,
        CollectionType::News,
        CollectionType::Sentiment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionType::Fundamentals => "fundamentals",
            CollectionType::Prices => "prices",
            CollectionType::News => "news",
            CollectionType::Sentiment => "sentiment",
        }
    }

    /// Estimated wall-clock cost per symbol, used for duration estimates.
    fn cost(&self) -> Duration {
        match self {
            CollectionType::Fundamentals => Duration::from_millis(500),
            CollectionType::Prices => Duration::from_millis(300),
            CollectionType::News => Duration::from_millis(400),
            CollectionType::Sentiment => Duration::from_millis(2000),
        }
    }
}

/// Outcome of one (symbol, type) unit of work.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome {
    Ok { rows_written: u64 },
    NoData,
    RateLimited,
    SourceError(String),
    ValidationFailed(String),
    Cancelled,
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UnitOutcome::Ok { .. } | UnitOutcome::NoData)
    }

    pub fn class(&self) -> &'static str {
        match self {
            UnitOutcome::Ok { .. } => "ok",
            UnitOutcome::NoData => "no_data",
            UnitOutcome::RateLimited => "rate_limited",
            UnitOutcome::SourceError(_) => "source_error",
            UnitOutcome::ValidationFailed(_) => "validation_failed",
            UnitOutcome::Cancelled => "cancelled",
        }
    }
}

fn outcome_from_error(error: ScreenerError) -> UnitOutcome {
    match error {
        ScreenerError::RateLimited(_) => UnitOutcome::RateLimited,
        ScreenerError::Validation(detail) => UnitOutcome::ValidationFailed(detail),
        ScreenerError::Constraint(detail) => UnitOutcome::ValidationFailed(detail),
        other => UnitOutcome::SourceError(other.to_string()),
    }
}

/// Caller-supplied cancellation flag; in-flight units finish their current
/// request and surface `Cancelled` for everything not yet started.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Aggregated result of a collection run.
#[derive(Debug, Clone)]
pub struct CollectionReport {
    pub universe_id: Option<String>,
    pub total_symbols: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: BTreeMap<String, BTreeMap<&'static str, UnitOutcome>>,
}

impl CollectionReport {
    /// A symbol counts as successful when every unit either wrote rows or
    /// cleanly found nothing.
    pub fn successful_symbols(&self) -> usize {
        self.outcomes
            .values()
            .filter(|units| units.values().all(UnitOutcome::is_success))
            .count()
    }

    pub fn success_ratio(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        self.successful_symbols() as f64 / self.outcomes.len() as f64
    }

    pub fn counts_by_class(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for units in self.outcomes.values() {
            for outcome in units.values() {
                *counts.entry(outcome.class()).or_default() += 1;
            }
        }
        counts
    }
}

pub struct CollectionOrchestrator {
    db: Database,
    market: Arc<dyn MarketDataSource>,
    social: Arc<dyn SocialSource>,
    sentiment_model: Arc<dyn SentimentModel>,
    workers: usize,
    /// Profiles fetched this run, shared across workers (5-minute TTL).
    profile_cache: Arc<dashmap::DashMap<String, (screener_core::StockProfile, DateTime<Utc>)>>,
}

impl CollectionOrchestrator {
    pub fn new(
        db: Database,
        market: Arc<dyn MarketDataSource>,
        social: Arc<dyn SocialSource>,
        sentiment_model: Arc<dyn SentimentModel>,
    ) -> Self {
        Self {
            db,
            market,
            social,
            sentiment_model,
            workers: 4,
            profile_cache: Arc::new(dashmap::DashMap::new()),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Rough wall-clock estimate for collecting `symbol_count` symbols,
    /// assuming the per-type cost constants and no parallel speedup on
    /// the rate-limited sources.
    pub fn estimate_duration(symbol_count: usize, types: &[CollectionType]) -> Duration {
        types
            .iter()
            .map(|t| t.cost() * symbol_count as u32)
            .sum()
    }

    /// Collect every symbol of a universe. A missing or empty universe
    /// produces an empty report, not an error.
    pub async fn collect_universe(
        &self,
        universe: &UniverseManager,
        universe_id: &str,
        types: &[CollectionType],
        progress: Option<ProgressSink>,
        cancel: Option<CancelFlag>,
    ) -> CollectionReport {
        let symbols = universe.universe_symbols(universe_id);
        if symbols.is_empty() {
            tracing::warn!("universe '{}' not found or empty", universe_id);
        }
        let mut report = self.refresh_selected(&symbols, types, progress, cancel).await;
        report.universe_id = Some(universe_id.to_string());
        report
    }

    /// Collect specific symbols. Symbols run with bounded parallelism;
    /// each (symbol, type) unit fails independently.
    pub async fn refresh_selected(
        &self,
        symbols: &[String],
        types: &[CollectionType],
        progress: Option<ProgressSink>,
        cancel: Option<CancelFlag>,
    ) -> CollectionReport {
        let started_at = Utc::now();
        let total = symbols.len();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let completed = Arc::new(AtomicUsize::new(0));
        let results: Arc<Mutex<BTreeMap<String, BTreeMap<&'static str, UnitOutcome>>>> =
            Arc::new(Mutex::new(BTreeMap::new()));
        let cancel = cancel.unwrap_or_default();

        tracing::info!(
            "collection start: {} symbols x {:?} with {} workers",
            total,
            types.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
            self.workers
        );

        let mut handles = Vec::with_capacity(total);
        for symbol in symbols {
            let permit_source = Arc::clone(&semaphore);
            let results = Arc::clone(&results);
            let completed = Arc::clone(&completed);
            let progress = progress.clone();
            let cancel = cancel.clone();
            let ctx = units::UnitContext {
                db: self.db.clone(),
                market: Arc::clone(&self.market),
                social: Arc::clone(&self.social),
                sentiment_model: Arc::clone(&self.sentiment_model),
                profile_cache: Arc::clone(&self.profile_cache),
            };
            let symbol = symbol.clone();
            let types: Vec<CollectionType> = types.to_vec();

            handles.push(tokio::spawn(async move {
                let _permit = permit_source.acquire_owned().await;

                let outcomes = if cancel.is_cancelled() {
                    types
                        .iter()
                        .map(|t| (t.as_str(), UnitOutcome::Cancelled))
                        .collect()
                } else {
                    collect_symbol(&ctx, &symbol, &types, &cancel).await
                };

                results.lock().await.insert(symbol.clone(), outcomes);
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(sink) = &progress {
                    sink(done, total, &symbol);
                }
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("collection worker panicked: {}", e);
            }
        }

        let outcomes = Arc::try_unwrap(results)
            .map(|mutex| mutex.into_inner())
            .unwrap_or_default();
        let report = CollectionReport {
            universe_id: None,
            total_symbols: total,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };
        tracing::info!(
            "collection done: {}/{} symbols clean ({:.0}%)",
            report.successful_symbols(),
            report.total_symbols,
            report.success_ratio() * 100.0
        );
        report
    }

    /// Selective refresh helpers; missing source data is a non-fatal
    /// NoData outcome, never an error.
    pub async fn refresh_fundamentals_only(
        &self,
        symbols: &[String],
    ) -> CollectionReport {
        self.refresh_selected(symbols, &[CollectionType::Fundamentals], None, None)
            .await
    }

    pub async fn refresh_prices_only(&self, symbols: &[String]) -> CollectionReport {
        self.refresh_selected(symbols, &[CollectionType::Prices], None, None)
            .await
    }

    pub async fn refresh_news_only(&self, symbols: &[String]) -> CollectionReport {
        self.refresh_selected(symbols, &[CollectionType::News], None, None)
            .await
    }

    pub async fn refresh_sentiment_only(&self, symbols: &[String]) -> CollectionReport {
        self.refresh_selected(symbols, &[CollectionType::Sentiment], None, None)
            .await
    }
}

/// Run every requested unit for one symbol. The profile write happens
/// before any dependent insert; units after it fail independently.
async fn collect_symbol(
    ctx: &units::UnitContext,
    symbol: &str,
    types: &[CollectionType],
    cancel: &CancelFlag,
) -> BTreeMap<&'static str, UnitOutcome> {
    let mut outcomes = BTreeMap::new();

    // Stock profile first: price/fundamental/news/social rows reference it
    let profile_result = units::upsert_profile(ctx, symbol).await;
    if let Err(e) = &profile_result {
        let known = matches!(ctx.db.get_stock(symbol).await, Ok(Some(_)));
        if !known {
            tracing::warn!("{}: profile fetch failed and stock unknown: {}", symbol, e);
            let outcome = outcome_from_error(profile_result.unwrap_err());
            for t in types {
                outcomes.insert(t.as_str(), outcome.clone());
            }
            return outcomes;
        }
        tracing::warn!("{}: profile refresh failed, keeping stored row: {}", symbol, e);
    }

    // Fixed write order within the symbol; no cross-symbol ordering
    let ordered = [
        CollectionType::Prices,
        CollectionType::Fundamentals,
        CollectionType::News,
        CollectionType::Sentiment,
    ];
    for unit_type in ordered {
        if !types.contains(&unit_type) {
            continue;
        }
        if cancel.is_cancelled() {
            outcomes.insert(unit_type.as_str(), UnitOutcome::Cancelled);
            continue;
        }
        let outcome = match unit_type {
            CollectionType::Prices => units::collect_prices(ctx, symbol).await,
            CollectionType::Fundamentals => units::collect_fundamentals(ctx, symbol).await,
            CollectionType::News => units::collect_news(ctx, symbol).await,
            CollectionType::Sentiment => units::collect_sentiment(ctx, symbol).await,
        };
        let outcome = match outcome {
            Ok(o) => o,
            Err(e) => {
                tracing::warn!("{}/{} failed: {}", symbol, unit_type.as_str(), e);
                outcome_from_error(e)
            }
        };
        outcomes.insert(unit_type.as_str(), outcome);
    }
    outcomes
}

/// Refresh or create the stock row from the live profile.
pub(crate) fn stock_from_profile(
    profile: screener_core::StockProfile,
    existing: Option<Stock>,
) -> Stock {
    let now = Utc::now();
    match existing {
        Some(mut stock) => {
            if let Some(name) = profile.company_name {
                stock.company_name = name;
            }
            stock.sector = profile.sector.or(stock.sector);
            stock.industry = profile.industry.or(stock.industry);
            stock.market_cap = profile.market_cap.or(stock.market_cap);
            stock.listing_exchange = profile.listing_exchange.or(stock.listing_exchange);
            stock.updated_at = now;
            stock
        }
        None => Stock {
            symbol: profile.symbol.clone(),
            company_name: profile
                .company_name
                .unwrap_or_else(|| format!("{} Inc.", profile.symbol)),
            sector: profile.sector,
            industry: profile.industry,
            market_cap: profile.market_cap,
            listing_exchange: profile.listing_exchange,
            is_active: true,
            created_at: now,
            updated_at: now,
        },
    }
}
