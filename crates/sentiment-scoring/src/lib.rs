//! Sentiment pipeline: pluggable text models, per-day aggregation of
//! scored news and social posts, and the 0-100 sentiment component scorer
//! over a lookback window of daily aggregates.

use chrono::{Duration, NaiveDate, Utc};
use data_versioning::VersionManager;
use screener_core::{
    weighted_composite, Component, ComponentMetrics, DailySentiment, NewsArticle, ScreenerError,
    SocialPost, SubScore,
};
use store::Database;

pub mod models;
pub use models::{RemoteLlmModel, RuleBasedModel};

const WEIGHTS: [(&str, f64); 4] = [
    ("news_sentiment", 0.35),
    ("social_sentiment", 0.25),
    ("momentum", 0.25),
    ("volume", 0.15),
];

/// When both sources report, news dominates the combined polarity.
const NEWS_COMBINE_WEIGHT: f64 = 0.6;
const SOCIAL_COMBINE_WEIGHT: f64 = 0.4;

/// Mentions/day that count as full volume.
const FULL_VOLUME_MENTIONS: f64 = 20.0;

/// Aggregate one day of scored articles and posts into a DailySentiment
/// row. Engagement weights the social mean so a hundred-point thread
/// counts more than a zero-score drive-by.
pub fn aggregate_daily(
    symbol: &str,
    date: NaiveDate,
    news: &[NewsArticle],
    posts: &[SocialPost],
) -> DailySentiment {
    let news_count = news.len() as i64;
    let news_sentiment = if news.is_empty() {
        0.0
    } else {
        news.iter().map(|a| a.sentiment_score).sum::<f64>() / news.len() as f64
    };

    let social_count = posts.len() as i64;
    let social_sentiment = if posts.is_empty() {
        0.0
    } else {
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for post in posts {
            let engagement = ((post.score.max(0) + 1) as f64).ln() + 1.0;
            weighted += post.sentiment_score * engagement;
            total_weight += engagement;
        }
        weighted / total_weight
    };

    let combined_sentiment = match (news_count > 0, social_count > 0) {
        (true, true) => {
            news_sentiment * NEWS_COMBINE_WEIGHT + social_sentiment * SOCIAL_COMBINE_WEIGHT
        }
        (true, false) => news_sentiment,
        (false, true) => social_sentiment,
        (false, false) => 0.0,
    }
    .clamp(-1.0, 1.0);

    // Coverage-based quality: saturates at 10 articles / 30 posts
    let quality_score = ((news_count as f64 / 10.0).min(1.0) * 0.6
        + (social_count as f64 / 30.0).min(1.0) * 0.4)
        .clamp(0.0, 1.0);

    DailySentiment {
        symbol: symbol.to_string(),
        date,
        news_sentiment: news_sentiment.clamp(-1.0, 1.0),
        news_count,
        social_sentiment: social_sentiment.clamp(-1.0, 1.0),
        social_count,
        combined_sentiment,
        quality_score,
    }
}

/// Map a polarity in [-1, 1] onto the 0-100 scoring scale.
fn polarity_to_score(polarity: f64) -> f64 {
    ((polarity + 1.0) * 50.0).clamp(0.0, 100.0)
}

/// Sentiment component scorer over the daily aggregates.
pub struct SentimentScorer {
    db: Database,
    versions: VersionManager,
    lookback_days: i64,
}

impl SentimentScorer {
    pub fn new(db: Database, versions: VersionManager) -> Self {
        Self {
            db,
            versions,
            lookback_days: 14,
        }
    }

    pub fn with_lookback(mut self, days: i64) -> Self {
        self.lookback_days = days;
        self
    }

    /// Subscores over a window of daily rows, newest first.
    pub fn score_window(&self, window: &[DailySentiment], staleness_impact: f64) -> Vec<SubScore> {
        let news_days: Vec<&DailySentiment> =
            window.iter().filter(|d| d.news_count > 0).collect();
        let social_days: Vec<&DailySentiment> =
            window.iter().filter(|d| d.social_count > 0).collect();

        let (news_raw, news_score) = if news_days.is_empty() {
            (None, 0.0)
        } else {
            let mean = news_days.iter().map(|d| d.news_sentiment).sum::<f64>()
                / news_days.len() as f64;
            (Some(mean), polarity_to_score(mean))
        };

        let (social_raw, social_score) = if social_days.is_empty() {
            (None, 0.0)
        } else {
            let mean = social_days.iter().map(|d| d.social_sentiment).sum::<f64>()
                / social_days.len() as f64;
            (Some(mean), polarity_to_score(mean))
        };

        // Momentum: recent half vs prior half of the window
        let (momentum_raw, momentum_score) = if window.len() >= 4 {
            let mid = window.len() / 2;
            let recent = window[..mid]
                .iter()
                .map(|d| d.combined_sentiment)
                .sum::<f64>()
                / mid as f64;
            let prior = window[mid..]
                .iter()
                .map(|d| d.combined_sentiment)
                .sum::<f64>()
                / (window.len() - mid) as f64;
            let delta = recent - prior;
            (Some(delta), (50.0 + delta * 100.0).clamp(0.0, 100.0))
        } else {
            (None, 0.0)
        };

        // Volume: average mentions per observed day against the target
        let (volume_raw, volume_score) = if window.is_empty() {
            (None, 0.0)
        } else {
            let mentions: i64 = window.iter().map(|d| d.news_count + d.social_count).sum();
            let per_day = mentions as f64 / window.len() as f64;
            (
                Some(per_day),
                (per_day / FULL_VOLUME_MENTIONS * 100.0).clamp(0.0, 100.0),
            )
        };

        let scores = [news_score, social_score, momentum_score, volume_score];
        let raws = [news_raw, social_raw, momentum_raw, volume_raw];
        WEIGHTS
            .iter()
            .zip(scores.iter().zip(raws.iter()))
            .map(|((metric, weight), (score, raw))| SubScore {
                metric: metric.to_string(),
                raw: *raw,
                score: score * staleness_impact,
                weight: *weight,
            })
            .collect()
    }

    pub async fn compute(
        &self,
        symbol: &str,
        max_age_days: Option<i64>,
    ) -> Result<Option<ComponentMetrics>, ScreenerError> {
        let versioned = self.versions.versioned_sentiment(symbol, max_age_days).await?;
        if versioned.is_missing() {
            tracing::warn!("no sentiment data found for {}", symbol);
            return Ok(None);
        }

        let today = Utc::now().date_naive();
        let window = self
            .db
            .daily_sentiment_since(symbol, today - Duration::days(self.lookback_days))
            .await?;
        if window.is_empty() {
            return Ok(None);
        }

        let sector = self
            .db
            .get_stock(symbol)
            .await?
            .and_then(|stock| stock.sector);

        let subscores = self.score_window(&window, versioned.staleness_impact);
        let pairs: Vec<(f64, f64)> = subscores.iter().map(|s| (s.score, s.weight)).collect();
        let Some(score) = weighted_composite(&pairs) else {
            return Ok(None);
        };

        // Coverage quality of the window, attenuated by freshness
        let coverage = window.iter().map(|d| d.quality_score).sum::<f64>() / window.len() as f64;
        let data_quality = (coverage * versioned.info.quality_score).clamp(0.0, 1.0);

        Ok(Some(ComponentMetrics {
            symbol: symbol.to_string(),
            component: Component::SentimentData,
            calculation_date: today,
            subscores,
            score,
            data_quality,
            sector,
            data_age_days: versioned.info.age_days,
            freshness: versioned.info.freshness,
            staleness_impact: versioned.staleness_impact,
            staleness_warnings: versioned.info.staleness_warnings.clone(),
            version_id: versioned.info.version_id.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn article(sentiment: f64) -> NewsArticle {
        NewsArticle {
            symbol: "AAPL".to_string(),
            title: "headline".to_string(),
            summary: String::new(),
            content: None,
            publisher: "Wire".to_string(),
            publish_date: Utc::now(),
            url: None,
            sentiment_score: sentiment,
            quality_score: 0.8,
        }
    }

    fn post(sentiment: f64, score: i64) -> SocialPost {
        SocialPost {
            symbol: "AAPL".to_string(),
            post_id: format!("t3_{score}"),
            title: "post".to_string(),
            content: String::new(),
            subreddit: "stocks".to_string(),
            author: "user".to_string(),
            score,
            upvote_ratio: 0.9,
            num_comments: 10,
            created_utc: Utc::now(),
            url: None,
            sentiment_score: sentiment,
            quality_score: 0.7,
        }
    }

    fn day(date: NaiveDate, combined: f64, news: i64, social: i64) -> DailySentiment {
        DailySentiment {
            symbol: "AAPL".to_string(),
            date,
            news_sentiment: combined,
            news_count: news,
            social_sentiment: combined,
            social_count: social,
            combined_sentiment: combined,
            quality_score: 0.7,
        }
    }

    async fn scorer() -> SentimentScorer {
        let db = Database::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let versions = VersionManager::new(db.clone());
        SentimentScorer::new(db, versions)
    }

    #[test]
    fn daily_aggregate_combines_sources() {
        let date = NaiveDate::from_ymd_opt(2025, 7, 10).unwrap();
        let news = vec![article(0.6), article(0.2)];
        let posts = vec![post(0.0, 5), post(-0.2, 5)];
        let daily = aggregate_daily("AAPL", date, &news, &posts);

        assert_eq!(daily.news_count, 2);
        assert_eq!(daily.social_count, 2);
        assert!((daily.news_sentiment - 0.4).abs() < 1e-9);
        assert!((daily.social_sentiment - (-0.1)).abs() < 1e-9);
        // 0.4 * 0.6 + (-0.1) * 0.4 = 0.2
        assert!((daily.combined_sentiment - 0.2).abs() < 1e-9);
        assert!(daily.combined_sentiment >= -1.0 && daily.combined_sentiment <= 1.0);
    }

    #[test]
    fn engagement_weights_the_social_mean() {
        let date = NaiveDate::from_ymd_opt(2025, 7, 10).unwrap();
        let posts = vec![post(0.8, 500), post(-0.8, 0)];
        let daily = aggregate_daily("AAPL", date, &[], &posts);
        assert!(
            daily.social_sentiment > 0.0,
            "the high-engagement bullish post should dominate: {}",
            daily.social_sentiment
        );
    }

    #[test]
    fn single_source_days_use_that_source() {
        let date = NaiveDate::from_ymd_opt(2025, 7, 10).unwrap();
        let daily = aggregate_daily("AAPL", date, &[article(0.5)], &[]);
        assert!((daily.combined_sentiment - 0.5).abs() < 1e-9);

        let empty = aggregate_daily("AAPL", date, &[], &[]);
        assert_eq!(empty.combined_sentiment, 0.0);
        assert_eq!(empty.quality_score, 0.0);
    }

    #[tokio::test]
    async fn window_scoring_produces_all_four_subscores() {
        let s = scorer().await;
        let start = NaiveDate::from_ymd_opt(2025, 7, 20).unwrap();
        // Newest first, improving sentiment toward the present
        let window: Vec<DailySentiment> = (0..8)
            .map(|i| day(start - Duration::days(i), 0.5 - i as f64 * 0.1, 5, 10))
            .collect();

        let subscores = s.score_window(&window, 1.0);
        assert_eq!(subscores.len(), 4);
        let momentum = subscores.iter().find(|x| x.metric == "momentum").unwrap();
        assert!(
            momentum.score > 50.0,
            "improving sentiment means positive momentum: {}",
            momentum.score
        );
        let volume = subscores.iter().find(|x| x.metric == "volume").unwrap();
        assert!((volume.raw.unwrap() - 15.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn missing_social_redistributes_weight() {
        let s = scorer().await;
        let start = NaiveDate::from_ymd_opt(2025, 7, 20).unwrap();
        let window: Vec<DailySentiment> = (0..2)
            .map(|i| day(start - Duration::days(i), 0.4, 3, 0))
            .collect();

        let subscores = s.score_window(&window, 1.0);
        let social = subscores
            .iter()
            .find(|x| x.metric == "social_sentiment")
            .unwrap();
        assert_eq!(social.score, 0.0);
        assert!(social.raw.is_none());

        let pairs: Vec<(f64, f64)> = subscores.iter().map(|x| (x.score, x.weight)).collect();
        assert!(weighted_composite(&pairs).is_some());
    }

    #[tokio::test]
    async fn compute_reads_the_window_from_the_store() {
        let s = scorer().await;
        s.db.upsert_stock(&screener_core::Stock {
            symbol: "AAPL".to_string(),
            company_name: "Apple Inc.".to_string(),
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

        let today = Utc::now().date_naive();
        for i in 0..5 {
            s.db.upsert_daily_sentiment(&day(today - Duration::days(i), 0.3, 4, 8))
                .await
                .unwrap();
        }

        let metrics = s.compute("AAPL", None).await.unwrap().unwrap();
        assert_eq!(metrics.component, Component::SentimentData);
        assert!(metrics.score > 0.0);
        assert!((metrics.staleness_impact - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn no_sentiment_rows_yields_none() {
        let s = scorer().await;
        assert!(s.compute("AAPL", None).await.unwrap().is_none());
    }
}
