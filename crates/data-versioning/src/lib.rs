//! Read-side freshness layer. Every read is tagged with its age, a
//! freshness bucket, and the staleness multiplier that downstream scorers
//! apply. No data at all is MISSING with a zero multiplier, which is not
//! an error.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use screener_core::{
    Component, DailySentiment, FreshnessLevel, FundamentalSnapshot, NewsArticle, PriceBar,
    ScreenerError,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use store::Database;

/// Age thresholds in days; a value exactly on a threshold falls into the
/// lower-age bucket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FreshnessThresholds {
    pub fresh: f64,
    pub recent: f64,
    pub stale: f64,
}

impl FreshnessThresholds {
    pub fn classify(&self, age_days: f64) -> FreshnessLevel {
        if age_days <= self.fresh {
            FreshnessLevel::Fresh
        } else if age_days <= self.recent {
            FreshnessLevel::Recent
        } else if age_days <= self.stale {
            FreshnessLevel::Stale
        } else {
            FreshnessLevel::VeryStale
        }
    }
}

/// Per-component thresholds, overridable from the methodology config's
/// staleness limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessConfig {
    pub fundamentals: FreshnessThresholds,
    pub price: FreshnessThresholds,
    pub news: FreshnessThresholds,
    pub sentiment: FreshnessThresholds,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            fundamentals: FreshnessThresholds {
                fresh: 1.0,
                recent: 30.0,
                stale: 120.0,
            },
            price: FreshnessThresholds {
                fresh: 1.0,
                recent: 3.0,
                stale: 7.0,
            },
            news: FreshnessThresholds {
                fresh: 1.0,
                recent: 7.0,
                stale: 30.0,
            },
            sentiment: FreshnessThresholds {
                fresh: 1.0,
                recent: 7.0,
                stale: 14.0,
            },
        }
    }
}

impl FreshnessConfig {
    pub fn for_component(&self, component: Component) -> FreshnessThresholds {
        match component {
            Component::Fundamentals => self.fundamentals,
            Component::PriceData => self.price,
            Component::NewsData => self.news,
            Component::SentimentData => self.sentiment,
        }
    }

    /// Derive thresholds from configured maximum ages: fresh at 10% of
    /// the limit, recent at a third, stale at the limit itself.
    pub fn from_staleness_limits(limits: &BTreeMap<Component, i64>) -> Self {
        let mut config = Self::default();
        for (component, max_days) in limits {
            let thresholds = FreshnessThresholds {
                fresh: (*max_days as f64 / 10.0).max(1.0),
                recent: (*max_days as f64 / 3.0).max(2.0),
                stale: *max_days as f64,
            };
            match component {
                Component::Fundamentals => config.fundamentals = thresholds,
                Component::PriceData => config.price = thresholds,
                Component::NewsData => config.news = thresholds,
                Component::SentimentData => config.sentiment = thresholds,
            }
        }
        config
    }
}

/// Version and freshness metadata attached to a read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub component: Component,
    pub symbol: String,
    pub data_date: Option<DateTime<Utc>>,
    pub collection_date: Option<DateTime<Utc>>,
    pub freshness: FreshnessLevel,
    pub age_days: Option<f64>,
    pub version_id: Option<String>,
    pub quality_score: f64,
    pub staleness_warnings: Vec<String>,
}

/// A payload with its version metadata and the multiplier downstream
/// scores are attenuated by.
#[derive(Debug, Clone)]
pub struct VersionedData<T> {
    pub payload: Option<T>,
    pub info: VersionInfo,
    pub staleness_impact: f64,
}

impl<T> VersionedData<T> {
    pub fn is_missing(&self) -> bool {
        self.payload.is_none()
    }
}

/// News reads aggregate the window rather than returning one row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsAggregate {
    pub article_count: usize,
    pub latest_publish_date: DateTime<Utc>,
    pub avg_sentiment: f64,
    pub articles: Vec<NewsArticle>,
}

/// Stateless freshness classifier over the store's read side.
#[derive(Clone)]
pub struct VersionManager {
    db: Database,
    config: FreshnessConfig,
}

fn midnight(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0).map(|ndt| Utc.from_utc_datetime(&ndt))
}

impl VersionManager {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            config: FreshnessConfig::default(),
        }
    }

    pub fn with_config(db: Database, config: FreshnessConfig) -> Self {
        Self { db, config }
    }

    pub fn config(&self) -> &FreshnessConfig {
        &self.config
    }

    fn missing<T>(&self, symbol: &str, component: Component) -> VersionedData<T> {
        VersionedData {
            payload: None,
            info: VersionInfo {
                component,
                symbol: symbol.to_string(),
                data_date: None,
                collection_date: None,
                freshness: FreshnessLevel::Missing,
                age_days: None,
                version_id: None,
                quality_score: 0.0,
                staleness_warnings: vec![format!(
                    "no {} data available for {symbol}",
                    component.as_str()
                )],
            },
            staleness_impact: 0.0,
        }
    }

    /// Classify a read given its data date and collection date. The age is
    /// measured from the most recent of the two.
    fn classify(
        &self,
        symbol: &str,
        component: Component,
        data_date: Option<DateTime<Utc>>,
        collection_date: Option<DateTime<Utc>>,
    ) -> VersionInfo {
        let reference = match (data_date, collection_date) {
            (Some(d), Some(c)) => Some(d.max(c)),
            (Some(d), None) => Some(d),
            (None, Some(c)) => Some(c),
            (None, None) => None,
        };

        let Some(reference) = reference else {
            return VersionInfo {
                component,
                symbol: symbol.to_string(),
                data_date,
                collection_date,
                freshness: FreshnessLevel::Missing,
                age_days: None,
                version_id: None,
                quality_score: 0.0,
                staleness_warnings: vec!["no valid dates found for data".to_string()],
            };
        };

        let age_days = (Utc::now() - reference).num_seconds() as f64 / 86_400.0;
        let thresholds = self.config.for_component(component);
        let freshness = thresholds.classify(age_days);

        let mut warnings = Vec::new();
        match freshness {
            FreshnessLevel::Stale => {
                warnings.push(format!(
                    "{} data is {age_days:.1} days old",
                    component.as_str()
                ));
            }
            FreshnessLevel::VeryStale => {
                warnings.push(format!(
                    "{} data is very stale ({age_days:.1} days old)",
                    component.as_str()
                ));
            }
            _ => {}
        }

        VersionInfo {
            component,
            symbol: symbol.to_string(),
            data_date,
            collection_date,
            freshness,
            age_days: Some(age_days),
            version_id: Some(format!(
                "{symbol}_{}_{}",
                component.as_str(),
                reference.format("%Y%m%d_%H%M%S")
            )),
            quality_score: freshness.quality_factor(),
            staleness_warnings: warnings,
        }
    }

    fn wrap<T>(
        &self,
        payload: T,
        info: VersionInfo,
        max_age_days: Option<i64>,
    ) -> VersionedData<T> {
        if let (Some(limit), Some(age)) = (max_age_days, info.age_days) {
            if age > limit as f64 {
                tracing::warn!(
                    "{}: {} data is {:.1} days old (limit {})",
                    info.symbol,
                    info.component.as_str(),
                    age,
                    limit
                );
                let mut missing = self.missing::<T>(&info.symbol, info.component);
                missing
                    .info
                    .staleness_warnings
                    .push(format!("data exceeds the {limit}-day age limit"));
                return missing;
            }
        }
        let staleness_impact = info.freshness.staleness_multiplier();
        VersionedData {
            payload: Some(payload),
            info,
            staleness_impact,
        }
    }

    /// Latest fundamentals snapshot with freshness metadata. Age runs from
    /// the newer of reporting date and collection instant.
    pub async fn versioned_fundamentals(
        &self,
        symbol: &str,
        max_age_days: Option<i64>,
    ) -> Result<VersionedData<FundamentalSnapshot>, ScreenerError> {
        let Some(snapshot) = self.db.latest_fundamental(symbol).await? else {
            return Ok(self.missing(symbol, Component::Fundamentals));
        };
        let info = self.classify(
            symbol,
            Component::Fundamentals,
            midnight(snapshot.reporting_date),
            Some(snapshot.created_at),
        );
        Ok(self.wrap(snapshot, info, max_age_days))
    }

    pub async fn versioned_price(
        &self,
        symbol: &str,
        max_age_days: Option<i64>,
    ) -> Result<VersionedData<PriceBar>, ScreenerError> {
        let Some(bar) = self.db.latest_price_bar(symbol).await? else {
            return Ok(self.missing(symbol, Component::PriceData));
        };
        let trade_instant = midnight(bar.trade_date);
        let info = self.classify(symbol, Component::PriceData, trade_instant, trade_instant);
        Ok(self.wrap(bar, info, max_age_days))
    }

    pub async fn versioned_news(
        &self,
        symbol: &str,
        days_back: i64,
        max_age_days: Option<i64>,
    ) -> Result<VersionedData<NewsAggregate>, ScreenerError> {
        let articles = self.db.recent_news(symbol, days_back).await?;
        let Some(latest) = articles.first() else {
            return Ok(self.missing(symbol, Component::NewsData));
        };
        let latest_date = latest.publish_date;
        let avg_sentiment =
            articles.iter().map(|a| a.sentiment_score).sum::<f64>() / articles.len() as f64;
        let aggregate = NewsAggregate {
            article_count: articles.len(),
            latest_publish_date: latest_date,
            avg_sentiment,
            articles,
        };
        let info = self.classify(
            symbol,
            Component::NewsData,
            Some(latest_date),
            Some(latest_date),
        );
        Ok(self.wrap(aggregate, info, max_age_days))
    }

    pub async fn versioned_sentiment(
        &self,
        symbol: &str,
        max_age_days: Option<i64>,
    ) -> Result<VersionedData<DailySentiment>, ScreenerError> {
        let Some(sentiment) = self.db.latest_daily_sentiment(symbol).await? else {
            return Ok(self.missing(symbol, Component::SentimentData));
        };
        let day = midnight(sentiment.date);
        let info = self.classify(symbol, Component::SentimentData, day, day);
        Ok(self.wrap(sentiment, info, max_age_days))
    }

    /// Freshness of every component for one symbol.
    pub async fn freshness_summary(
        &self,
        symbol: &str,
    ) -> Result<BTreeMap<&'static str, VersionInfo>, ScreenerError> {
        let mut summary = BTreeMap::new();
        summary.insert(
            Component::Fundamentals.as_str(),
            self.versioned_fundamentals(symbol, None).await?.info,
        );
        summary.insert(
            Component::PriceData.as_str(),
            self.versioned_price(symbol, None).await?.info,
        );
        summary.insert(
            Component::NewsData.as_str(),
            self.versioned_news(symbol, 30, None).await?.info,
        );
        summary.insert(
            Component::SentimentData.as_str(),
            self.versioned_sentiment(symbol, None).await?.info,
        );
        Ok(summary)
    }

    /// Fleet-wide staleness report used by the CLI.
    pub async fn staleness_report(
        &self,
        symbols: &[String],
    ) -> Result<StalenessReport, ScreenerError> {
        let mut distribution: BTreeMap<&'static str, usize> = BTreeMap::new();
        let mut warnings = Vec::new();

        for symbol in symbols {
            let summary = self.freshness_summary(symbol).await?;
            for info in summary.values() {
                *distribution.entry(info.freshness.as_str()).or_default() += 1;
                for warning in &info.staleness_warnings {
                    warnings.push(format!("{symbol}: {warning}"));
                }
            }
        }

        let total = (symbols.len() * Component::ALL.len()).max(1) as f64;
        let stale_count = distribution.get("stale").copied().unwrap_or(0)
            + distribution.get("very_stale").copied().unwrap_or(0);
        let missing_count = distribution.get("missing").copied().unwrap_or(0);

        let mut recommendations = Vec::new();
        if stale_count as f64 / total > 0.3 {
            recommendations
                .push("high proportion of stale data; refresh collection".to_string());
        }
        if missing_count as f64 / total > 0.2 {
            recommendations
                .push("significant missing data; review collection coverage".to_string());
        }

        Ok(StalenessReport {
            report_date: Utc::now(),
            symbols_analyzed: symbols.len(),
            distribution,
            warnings,
            recommendations,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StalenessReport {
    pub report_date: DateTime<Utc>,
    pub symbols_analyzed: usize,
    pub distribution: BTreeMap<&'static str, usize>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use screener_core::Stock;

    async fn db_with_stock(symbol: &str) -> Database {
        let db = Database::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        db.upsert_stock(&Stock {
            symbol: symbol.to_string(),
            company_name: format!("{symbol} Inc."),
            sector: Some("Technology".to_string()),
            industry: None,
            market_cap: None,
            listing_exchange: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .await
        .unwrap();
        db
    }

    fn snapshot(symbol: &str, reporting_date: NaiveDate, created_at: DateTime<Utc>) -> FundamentalSnapshot {
        FundamentalSnapshot {
            symbol: symbol.to_string(),
            reporting_date,
            period_type: "quarterly".to_string(),
            source: "yahoo_finance".to_string(),
            pe_ratio: Some(25.0),
            quality_score: 0.9,
            created_at,
            ..Default::default()
        }
    }

    #[test]
    fn boundary_ages_fall_into_the_lower_bucket() {
        let thresholds = FreshnessThresholds {
            fresh: 1.0,
            recent: 30.0,
            stale: 120.0,
        };
        assert_eq!(thresholds.classify(1.0), FreshnessLevel::Fresh);
        assert_eq!(thresholds.classify(1.0001), FreshnessLevel::Recent);
        assert_eq!(thresholds.classify(30.0), FreshnessLevel::Recent);
        assert_eq!(thresholds.classify(120.0), FreshnessLevel::Stale);
        assert_eq!(thresholds.classify(120.0001), FreshnessLevel::VeryStale);
    }

    #[test]
    fn staleness_limit_overrides_scale_thresholds() {
        let mut limits = BTreeMap::new();
        limits.insert(Component::PriceData, 10i64);
        let config = FreshnessConfig::from_staleness_limits(&limits);
        assert!((config.price.fresh - 1.0).abs() < 1e-9);
        assert!((config.price.recent - 10.0 / 3.0).abs() < 1e-9);
        assert!((config.price.stale - 10.0).abs() < 1e-9);
        // Untouched components keep their defaults
        assert!((config.news.stale - 30.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn missing_data_is_missing_not_an_error() {
        let db = db_with_stock("AAPL").await;
        let manager = VersionManager::new(db);
        let versioned = manager.versioned_fundamentals("AAPL", None).await.unwrap();
        assert!(versioned.is_missing());
        assert_eq!(versioned.info.freshness, FreshnessLevel::Missing);
        assert_eq!(versioned.staleness_impact, 0.0);
        assert!(versioned.info.version_id.is_none());
    }

    #[tokio::test]
    async fn fresh_fundamentals_classify_as_fresh() {
        let db = db_with_stock("AAPL").await;
        db.upsert_fundamental(&snapshot(
            "AAPL",
            Utc::now().date_naive(),
            Utc::now(),
        ))
        .await
        .unwrap();

        let manager = VersionManager::new(db);
        let versioned = manager.versioned_fundamentals("AAPL", None).await.unwrap();
        assert_eq!(versioned.info.freshness, FreshnessLevel::Fresh);
        assert_eq!(versioned.staleness_impact, 1.0);
        assert!(versioned.info.version_id.as_deref().unwrap().starts_with("AAPL_fundamentals_"));
        assert!(versioned.info.staleness_warnings.is_empty());
    }

    #[tokio::test]
    async fn forty_five_day_old_fundamentals_are_stale() {
        let db = db_with_stock("AAPL").await;
        let then = Utc::now() - Duration::days(45);
        db.upsert_fundamental(&snapshot("AAPL", then.date_naive(), then))
            .await
            .unwrap();

        let manager = VersionManager::new(db);
        let versioned = manager.versioned_fundamentals("AAPL", None).await.unwrap();
        assert_eq!(versioned.info.freshness, FreshnessLevel::Stale);
        assert!((versioned.staleness_impact - 0.85).abs() < 1e-9);
        assert!(!versioned.info.staleness_warnings.is_empty());
    }

    #[tokio::test]
    async fn age_runs_from_the_newer_of_data_and_collection_dates() {
        let db = db_with_stock("AAPL").await;
        // Old reporting date, but collected just now: recency comes from
        // the collection instant
        db.upsert_fundamental(&snapshot(
            "AAPL",
            (Utc::now() - Duration::days(200)).date_naive(),
            Utc::now(),
        ))
        .await
        .unwrap();

        let manager = VersionManager::new(db);
        let versioned = manager.versioned_fundamentals("AAPL", None).await.unwrap();
        assert_eq!(versioned.info.freshness, FreshnessLevel::Fresh);
    }

    #[tokio::test]
    async fn max_age_filter_turns_old_data_into_missing() {
        let db = db_with_stock("AAPL").await;
        let then = Utc::now() - Duration::days(45);
        db.upsert_fundamental(&snapshot("AAPL", then.date_naive(), then))
            .await
            .unwrap();

        let manager = VersionManager::new(db);
        let versioned = manager
            .versioned_fundamentals("AAPL", Some(30))
            .await
            .unwrap();
        assert!(versioned.is_missing());
        assert_eq!(versioned.staleness_impact, 0.0);
    }

    #[tokio::test]
    async fn news_reads_aggregate_the_window() {
        let db = db_with_stock("AAPL").await;
        let articles = vec![
            screener_core::NewsArticle {
                symbol: "AAPL".to_string(),
                title: "up".to_string(),
                summary: String::new(),
                content: None,
                publisher: "Wire".to_string(),
                publish_date: Utc::now() - Duration::hours(3),
                url: Some("https://x/1".to_string()),
                sentiment_score: 0.6,
                quality_score: 0.8,
            },
            screener_core::NewsArticle {
                symbol: "AAPL".to_string(),
                title: "down".to_string(),
                summary: String::new(),
                content: None,
                publisher: "Wire".to_string(),
                publish_date: Utc::now() - Duration::hours(30),
                url: Some("https://x/2".to_string()),
                sentiment_score: -0.2,
                quality_score: 0.8,
            },
        ];
        db.insert_news_batch(&articles).await.unwrap();

        let manager = VersionManager::new(db);
        let versioned = manager.versioned_news("AAPL", 30, None).await.unwrap();
        let aggregate = versioned.payload.unwrap();
        assert_eq!(aggregate.article_count, 2);
        assert!((aggregate.avg_sentiment - 0.2).abs() < 1e-9);
        assert_eq!(versioned.info.freshness, FreshnessLevel::Fresh);
    }

    #[tokio::test]
    async fn freshness_summary_covers_all_components() {
        let db = db_with_stock("AAPL").await;
        let manager = VersionManager::new(db);
        let summary = manager.freshness_summary("AAPL").await.unwrap();
        assert_eq!(summary.len(), 4);
        for info in summary.values() {
            assert_eq!(info.freshness, FreshnessLevel::Missing);
        }
    }
}
