//! Individual units of collection work. Each takes the shared context and
//! one symbol, returns a UnitOutcome, and leaves sibling units unaffected
//! on failure.

use crate::UnitOutcome;
use chrono::{Duration, Utc};
use screener_core::{
    HistoryPeriod, MarketDataSource, NewsArticle, ScreenerError, SentimentModel, SocialPost,
    SocialSource,
};
use sentiment_scoring::aggregate_daily;
use std::collections::BTreeMap;
use std::sync::Arc;
use store::Database;

const SOCIAL_DAYS_BACK: i64 = 7;
const SOCIAL_MAX_POSTS: usize = 100;

const PROFILE_CACHE_TTL_SECS: i64 = 300;

/// Everything a unit needs, cloneable into worker tasks.
#[derive(Clone)]
pub struct UnitContext {
    pub db: Database,
    pub market: Arc<dyn MarketDataSource>,
    pub social: Arc<dyn SocialSource>,
    pub sentiment_model: Arc<dyn SentimentModel>,
    pub profile_cache:
        Arc<dashmap::DashMap<String, (screener_core::StockProfile, chrono::DateTime<Utc>)>>,
}

/// Fetch the live profile and upsert the stock row. Dependent writes rely
/// on this row existing. Repeat lookups within the cache TTL are served
/// from memory so selective refreshes do not re-spend the rate budget.
pub async fn upsert_profile(ctx: &UnitContext, symbol: &str) -> Result<(), ScreenerError> {
    let profile = match ctx.profile_cache.get(symbol) {
        Some(entry) if (Utc::now() - entry.1).num_seconds() < PROFILE_CACHE_TTL_SECS => {
            entry.0.clone()
        }
        _ => {
            let fetched = ctx.market.fetch_profile(symbol).await?;
            ctx.profile_cache
                .insert(symbol.to_string(), (fetched.clone(), Utc::now()));
            fetched
        }
    };
    let existing = ctx.db.get_stock(symbol).await?;
    let stock = crate::stock_from_profile(profile, existing);
    ctx.db.upsert_stock(&stock).await
}

pub async fn collect_prices(
    ctx: &UnitContext,
    symbol: &str,
) -> Result<UnitOutcome, ScreenerError> {
    let bars = ctx
        .market
        .fetch_price_history(symbol, HistoryPeriod::OneYear)
        .await?;
    if bars.is_empty() {
        return Ok(UnitOutcome::NoData);
    }
    let rows_written = ctx.db.insert_price_bars(&bars).await?;
    Ok(UnitOutcome::Ok { rows_written })
}

pub async fn collect_fundamentals(
    ctx: &UnitContext,
    symbol: &str,
) -> Result<UnitOutcome, ScreenerError> {
    let snapshot = ctx.market.fetch_fundamentals(symbol).await?;
    if snapshot.quality_score <= 0.0 {
        tracing::warn!("{}: fundamentals payload carried no usable fields", symbol);
        return Ok(UnitOutcome::NoData);
    }
    ctx.db.upsert_fundamental(&snapshot).await?;
    Ok(UnitOutcome::Ok { rows_written: 1 })
}

/// Fetch news, score each article through the configured sentiment model,
/// and insert the batch.
pub async fn collect_news(
    ctx: &UnitContext,
    symbol: &str,
) -> Result<UnitOutcome, ScreenerError> {
    let mut articles = ctx.market.fetch_news(symbol).await?;
    if articles.is_empty() {
        return Ok(UnitOutcome::NoData);
    }
    score_articles(ctx, &mut articles).await;
    let rows_written = ctx.db.insert_news_batch(&articles).await?;
    Ok(UnitOutcome::Ok { rows_written })
}

/// Fetch social posts, score them, insert the batch, and rebuild the
/// daily sentiment aggregates for the covered window.
pub async fn collect_sentiment(
    ctx: &UnitContext,
    symbol: &str,
) -> Result<UnitOutcome, ScreenerError> {
    let mut posts = ctx
        .social
        .fetch_posts(symbol, SOCIAL_DAYS_BACK, SOCIAL_MAX_POSTS)
        .await?;
    score_posts(ctx, &mut posts).await;
    let mut rows_written = 0u64;
    if !posts.is_empty() {
        rows_written += ctx.db.insert_social_batch(&posts).await?;
    }

    let days_updated = rebuild_daily_aggregates(ctx, symbol).await?;
    if rows_written == 0 && days_updated == 0 {
        return Ok(UnitOutcome::NoData);
    }
    Ok(UnitOutcome::Ok {
        rows_written: rows_written + days_updated,
    })
}

async fn score_articles(ctx: &UnitContext, articles: &mut [NewsArticle]) {
    for article in articles {
        let text = format!("{}. {}", article.title, article.summary);
        match ctx.sentiment_model.score_text(&text).await {
            Ok(sentiment) => article.sentiment_score = sentiment.score,
            Err(e) => {
                tracing::warn!("sentiment scoring failed for an article: {}", e);
            }
        }
    }
}

async fn score_posts(ctx: &UnitContext, posts: &mut [SocialPost]) {
    for post in posts {
        let text = format!("{}. {}", post.title, post.content);
        match ctx.sentiment_model.score_text(&text).await {
            Ok(sentiment) => post.sentiment_score = sentiment.score,
            Err(e) => {
                tracing::warn!("sentiment scoring failed for a post: {}", e);
            }
        }
    }
}

/// Regroup the recent news and posts by civil date and upsert one
/// DailySentiment row per covered day.
async fn rebuild_daily_aggregates(
    ctx: &UnitContext,
    symbol: &str,
) -> Result<u64, ScreenerError> {
    let news = ctx.db.recent_news(symbol, SOCIAL_DAYS_BACK).await?;
    let posts = ctx.db.recent_social_posts(symbol, SOCIAL_DAYS_BACK).await?;

    let mut news_by_day: BTreeMap<chrono::NaiveDate, Vec<NewsArticle>> = BTreeMap::new();
    for article in news {
        news_by_day
            .entry(article.publish_date.date_naive())
            .or_default()
            .push(article);
    }
    let mut posts_by_day: BTreeMap<chrono::NaiveDate, Vec<SocialPost>> = BTreeMap::new();
    for post in posts {
        posts_by_day
            .entry(post.created_utc.date_naive())
            .or_default()
            .push(post);
    }

    let today = Utc::now().date_naive();
    let mut days_updated = 0u64;
    for offset in 0..=SOCIAL_DAYS_BACK {
        let date = today - Duration::days(offset);
        let day_news = news_by_day.remove(&date).unwrap_or_default();
        let day_posts = posts_by_day.remove(&date).unwrap_or_default();
        if day_news.is_empty() && day_posts.is_empty() {
            continue;
        }
        let daily = aggregate_daily(symbol, date, &day_news, &day_posts);
        ctx.db.upsert_daily_sentiment(&daily).await?;
        days_updated += 1;
    }
    Ok(days_updated)
}
