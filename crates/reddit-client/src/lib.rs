//! Reddit adapter: authenticated read-only search for symbol mentions
//! across configured subreddits. Uses the client-credentials OAuth flow;
//! the token is cached until shortly before expiry. Listing payloads are
//! mapped in free functions so they can be tested without the network.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use screener_core::{
    dates, ApiStatus, RateLimiter, ScreenerError, SocialPost, SocialSource,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const OAUTH_BASE: &str = "https://oauth.reddit.com";
const DEFAULT_SUBREDDITS: &[&str] = &["investing", "stocks", "wallstreetbets"];

#[derive(Debug, Clone)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
}

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct RedditClient {
    client: Client,
    credentials: RedditCredentials,
    subreddits: Vec<String>,
    rate_limiter: RateLimiter,
    token: Arc<Mutex<Option<CachedToken>>>,
}

impl RedditClient {
    /// Default 60 requests/minute budget over the standard subreddits.
    pub fn new(credentials: RedditCredentials) -> Self {
        Self::with_subreddits(
            credentials,
            DEFAULT_SUBREDDITS.iter().map(|s| s.to_string()).collect(),
        )
    }

    pub fn with_subreddits(credentials: RedditCredentials, subreddits: Vec<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            credentials,
            subreddits,
            rate_limiter: RateLimiter::per_minute(60),
            token: Arc::new(Mutex::new(None)),
        }
    }

    async fn access_token(&self) -> Result<String, ScreenerError> {
        {
            let cached = self.token.lock().await;
            if let Some(token) = cached.as_ref() {
                if token.expires_at > Utc::now() + ChronoDuration::seconds(60) {
                    return Ok(token.access_token.clone());
                }
            }
        }

        self.rate_limiter.acquire(None).await?;
        let response = self
            .client
            .post(TOKEN_URL)
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .header("User-Agent", &self.credentials.user_agent)
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ScreenerError::Timeout(e.to_string())
                } else {
                    ScreenerError::Source(e.to_string())
                }
            })?;

        match response.status().as_u16() {
            200 => {}
            401 | 403 => {
                return Err(ScreenerError::Source(
                    "reddit rejected the credentials".to_string(),
                ))
            }
            429 => return Err(ScreenerError::RateLimited("reddit returned 429".to_string())),
            other => return Err(ScreenerError::Source(format!("reddit token HTTP {other}"))),
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ScreenerError::Parse(e.to_string()))?;
        let cached = CachedToken {
            access_token: token.access_token.clone(),
            expires_at: Utc::now() + ChronoDuration::seconds(token.expires_in.unwrap_or(3600)),
        };
        *self.token.lock().await = Some(cached);
        Ok(token.access_token)
    }

    async fn search_subreddit(
        &self,
        token: &str,
        subreddit: &str,
        symbol: &str,
        limit: usize,
    ) -> Result<ListingResponse, ScreenerError> {
        self.rate_limiter.acquire(None).await?;
        let url = format!("{OAUTH_BASE}/r/{subreddit}/search");
        let query = format!("{symbol} OR ${symbol}");
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .header("User-Agent", &self.credentials.user_agent)
            .query(&[
                ("q", query.as_str()),
                ("restrict_sr", "1"),
                ("sort", "new"),
                ("t", "week"),
                ("limit", &limit.to_string()),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ScreenerError::Timeout(e.to_string())
                } else {
                    ScreenerError::Source(e.to_string())
                }
            })?;

        if response.status().as_u16() == 429 {
            return Err(ScreenerError::RateLimited("reddit returned 429".to_string()));
        }
        if !response.status().is_success() {
            return Err(ScreenerError::Source(format!(
                "reddit search HTTP {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| ScreenerError::Parse(e.to_string()))
    }
}

#[async_trait]
impl SocialSource for RedditClient {
    async fn fetch_posts(
        &self,
        symbol: &str,
        days_back: i64,
        max_posts: usize,
    ) -> Result<Vec<SocialPost>, ScreenerError> {
        let token = self.access_token().await?;
        let per_subreddit = (max_posts / self.subreddits.len().max(1)).max(1);
        let cutoff = Utc::now() - ChronoDuration::days(days_back);

        let mut posts = Vec::new();
        for subreddit in &self.subreddits {
            match self
                .search_subreddit(&token, subreddit, symbol, per_subreddit)
                .await
            {
                Ok(listing) => {
                    posts.extend(posts_from_listing(symbol, subreddit, listing, cutoff));
                }
                Err(e) => {
                    // One failing subreddit does not abort the others
                    tracing::warn!("r/{} search failed for {}: {}", subreddit, symbol, e);
                }
            }
        }
        tracing::info!("collected {} reddit posts for {}", posts.len(), symbol);
        Ok(posts)
    }

    async fn self_test(&self) -> (ApiStatus, String) {
        if self.credentials.client_id.is_empty() || self.credentials.client_secret.is_empty() {
            return (
                ApiStatus::InvalidCredentials,
                "client_id/client_secret not configured".to_string(),
            );
        }
        match self.access_token().await {
            Ok(_) => (ApiStatus::Healthy, "token grant succeeded".to_string()),
            Err(ScreenerError::RateLimited(msg)) => (ApiStatus::RateLimited, msg),
            Err(ScreenerError::Source(msg)) if msg.contains("credentials") => {
                (ApiStatus::InvalidCredentials, msg)
            }
            Err(e) => (ApiStatus::Failed, e.to_string()),
        }
    }
}

// ==================== wire payloads ====================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ListingResponse {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<ListingChild>,
}

#[derive(Debug, Deserialize)]
struct ListingChild {
    data: RedditPostData,
}

#[derive(Debug, Default, Deserialize)]
struct RedditPostData {
    id: Option<String>,
    title: Option<String>,
    #[serde(default)]
    selftext: String,
    subreddit: Option<String>,
    author: Option<String>,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    upvote_ratio: f64,
    #[serde(default)]
    num_comments: i64,
    created_utc: Option<f64>,
    url: Option<String>,
}

// ==================== payload mapping ====================

fn mentions_symbol(symbol: &str, title: &str, text: &str) -> bool {
    let haystack = format!("{title} {text}").to_uppercase();
    let sym = symbol.to_uppercase();
    haystack.contains(&sym) || haystack.contains(&format!("${sym}"))
}

fn posts_from_listing(
    symbol: &str,
    subreddit: &str,
    listing: ListingResponse,
    cutoff: DateTime<Utc>,
) -> Vec<SocialPost> {
    let mut posts = Vec::new();
    for child in listing.data.children {
        let data = child.data;
        let (id, title) = match (data.id, data.title) {
            (Some(id), Some(title)) if !title.is_empty() => (id, title),
            _ => continue,
        };
        let created_utc = match data
            .created_utc
            .and_then(|secs| dates::from_unix_seconds(secs as i64))
        {
            Some(dt) => dt,
            None => continue,
        };
        if created_utc < cutoff {
            continue;
        }
        if !mentions_symbol(symbol, &title, &data.selftext) {
            continue;
        }

        let author = data.author.unwrap_or_else(|| "unknown".to_string());
        let present = [
            !data.selftext.is_empty(),
            author != "unknown" && author != "[deleted]",
            data.upvote_ratio > 0.0,
            data.url.is_some(),
        ];
        let completeness = present.iter().filter(|&&p| p).count() as f64 / present.len() as f64;

        posts.push(SocialPost {
            symbol: symbol.to_string(),
            post_id: id,
            title,
            content: data.selftext,
            subreddit: subreddit.to_string(),
            author,
            score: data.score,
            upvote_ratio: data.upvote_ratio.clamp(0.0, 1.0),
            num_comments: data.num_comments,
            created_utc,
            url: data.url,
            sentiment_score: 0.0,
            quality_score: completeness,
        });
    }
    posts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(json: &str) -> ListingResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn listing_maps_matching_posts() {
        let response = listing(
            r#"{
                "data": {
                    "children": [
                        {"data": {"id": "t3_a1", "title": "AAPL earnings discussion",
                                  "selftext": "thoughts on the quarter?", "subreddit": "stocks",
                                  "author": "user1", "score": 120, "upvote_ratio": 0.93,
                                  "num_comments": 45, "created_utc": 1753609500.0,
                                  "url": "https://reddit.com/x"}},
                        {"data": {"id": "t3_a2", "title": "Unrelated macro post",
                                  "selftext": "inflation talk", "subreddit": "stocks",
                                  "author": "user2", "score": 5, "upvote_ratio": 0.7,
                                  "num_comments": 2, "created_utc": 1753609500.0}}
                    ]
                }
            }"#,
        );
        let cutoff = dates::parse_datetime("2025-07-20T00:00:00Z").unwrap();
        let posts = posts_from_listing("AAPL", "stocks", response, cutoff);
        assert_eq!(posts.len(), 1, "non-mentioning post must be filtered");
        assert_eq!(posts[0].post_id, "t3_a1");
        assert_eq!(posts[0].score, 120);
        assert!((posts[0].upvote_ratio - 0.93).abs() < 1e-9);
        assert!(posts[0].quality_score > 0.5);
    }

    #[test]
    fn posts_before_cutoff_are_skipped() {
        let response = listing(
            r#"{
                "data": {
                    "children": [
                        {"data": {"id": "t3_old", "title": "$AAPL from last month",
                                  "selftext": "", "author": "user1", "score": 3,
                                  "upvote_ratio": 0.6, "num_comments": 1,
                                  "created_utc": 1750000000.0}}
                    ]
                }
            }"#,
        );
        let cutoff = dates::parse_datetime("2025-07-20T00:00:00Z").unwrap();
        assert!(posts_from_listing("AAPL", "stocks", response, cutoff).is_empty());
    }

    #[test]
    fn dollar_prefix_counts_as_a_mention() {
        assert!(mentions_symbol("AAPL", "$AAPL breakout", ""));
        assert!(mentions_symbol("AAPL", "why aapl is cheap", ""));
        assert!(!mentions_symbol("AAPL", "macro news", "nothing here"));
    }

    #[test]
    fn posts_without_id_or_timestamp_are_dropped() {
        let response = listing(
            r#"{
                "data": {
                    "children": [
                        {"data": {"title": "AAPL no id", "created_utc": 1753609500.0}},
                        {"data": {"id": "t3_b1", "title": "AAPL no time"}}
                    ]
                }
            }"#,
        );
        let cutoff = dates::parse_datetime("2025-07-20T00:00:00Z").unwrap();
        assert!(posts_from_listing("AAPL", "stocks", response, cutoff).is_empty());
    }
}
