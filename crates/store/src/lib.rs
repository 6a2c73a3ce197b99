//! SQLite persistence layer: schema migrations plus typed CRUD over the
//! single embedded store. All batch writes run inside one transaction;
//! a failure rolls the whole batch back and surfaces the offending
//! record index. Reads are non-locking snapshots.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use screener_core::dates;
use screener_core::{
    CalculatedMetrics, Component, DailySentiment, DataVersionRecord, FundamentalSnapshot,
    GateStatus, NewsArticle, PriceBar, QualityGateRecord, QualityRule, RuleOperator,
    ScreenerError, SocialPost, Stock,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

pub mod schema;


/// Handle to the embedded relational store. Cloning shares the pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

fn db_err(e: sqlx::Error) -> ScreenerError {
    let text = e.to_string();
    if text.contains("FOREIGN KEY") || text.contains("UNIQUE") {
        ScreenerError::Constraint(text)
    } else {
        ScreenerError::Storage(text)
    }
}

fn fmt_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn fmt_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

fn read_ts(row: &SqliteRow, col: &str) -> Result<DateTime<Utc>, ScreenerError> {
    let raw: String = row.try_get(col).map_err(db_err)?;
    dates::parse_datetime(&raw)
        .ok_or_else(|| ScreenerError::Parse(format!("bad timestamp in column {col}: {raw:?}")))
}

fn read_opt_ts(row: &SqliteRow, col: &str) -> Result<Option<DateTime<Utc>>, ScreenerError> {
    let raw: Option<String> = row.try_get(col).map_err(db_err)?;
    Ok(raw.as_deref().and_then(dates::parse_datetime))
}

fn read_date(row: &SqliteRow, col: &str) -> Result<NaiveDate, ScreenerError> {
    let raw: String = row.try_get(col).map_err(db_err)?;
    dates::parse_date(&raw)
        .ok_or_else(|| ScreenerError::Parse(format!("bad date in column {col}: {raw:?}")))
}

fn read_component(row: &SqliteRow, col: &str) -> Result<Component, ScreenerError> {
    let raw: String = row.try_get(col).map_err(db_err)?;
    Component::from_str(&raw)
        .ok_or_else(|| ScreenerError::Parse(format!("unknown component: {raw:?}")))
}

impl Database {
    /// Open (or create) the store at `path` in WAL mode so parallel
    /// collection workers can write concurrently. Options apply to every
    /// pooled connection.
    pub async fn connect(path: &str) -> Result<Self, ScreenerError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(db_err)?;
        Ok(Self { pool })
    }

    /// In-memory store, used by tests. A single pooled connection keeps
    /// every statement on the same database.
    pub async fn in_memory() -> Result<Self, ScreenerError> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(db_err)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Apply forward migrations in order. Idempotent.
    pub async fn migrate(&self) -> Result<(), ScreenerError> {
        sqlx::query(schema::SCHEMA_VERSION_TABLE)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        let current = self.schema_version().await?;
        for (idx, statements) in schema::MIGRATIONS.iter().enumerate() {
            let version = (idx + 1) as i64;
            if version <= current {
                continue;
            }
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            for statement in *statements {
                sqlx::query(statement)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
            }
            sqlx::query("DELETE FROM schema_version")
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
                .bind(version)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            tracing::info!("applied schema migration v{}", version);
        }
        Ok(())
    }

    pub async fn schema_version(&self) -> Result<i64, ScreenerError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|(v,)| v).unwrap_or(0))
    }

    // ==================== stocks ====================

    pub async fn upsert_stock(&self, stock: &Stock) -> Result<(), ScreenerError> {
        sqlx::query(
            "INSERT INTO stocks
             (symbol, company_name, sector, industry, market_cap, listing_exchange, is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(symbol) DO UPDATE SET
                 company_name = excluded.company_name,
                 sector = excluded.sector,
                 industry = excluded.industry,
                 market_cap = excluded.market_cap,
                 listing_exchange = excluded.listing_exchange,
                 is_active = excluded.is_active,
                 updated_at = excluded.updated_at",
        )
        .bind(&stock.symbol)
        .bind(&stock.company_name)
        .bind(&stock.sector)
        .bind(&stock.industry)
        .bind(stock.market_cap)
        .bind(&stock.listing_exchange)
        .bind(stock.is_active)
        .bind(fmt_ts(stock.created_at))
        .bind(fmt_ts(stock.updated_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn set_stock_active(&self, symbol: &str, active: bool) -> Result<(), ScreenerError> {
        sqlx::query("UPDATE stocks SET is_active = ?, updated_at = ? WHERE symbol = ?")
            .bind(active)
            .bind(fmt_ts(Utc::now()))
            .bind(symbol)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn get_stock(&self, symbol: &str) -> Result<Option<Stock>, ScreenerError> {
        let row = sqlx::query("SELECT * FROM stocks WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| self.row_to_stock(&r)).transpose()
    }

    pub async fn active_symbols(&self) -> Result<Vec<String>, ScreenerError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT symbol FROM stocks WHERE is_active = 1 ORDER BY symbol")
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(rows.into_iter().map(|(s,)| s).collect())
    }

    fn row_to_stock(&self, row: &SqliteRow) -> Result<Stock, ScreenerError> {
        Ok(Stock {
            symbol: row.try_get("symbol").map_err(db_err)?,
            company_name: row.try_get("company_name").map_err(db_err)?,
            sector: row.try_get("sector").map_err(db_err)?,
            industry: row.try_get("industry").map_err(db_err)?,
            market_cap: row.try_get("market_cap").map_err(db_err)?,
            listing_exchange: row.try_get("listing_exchange").map_err(db_err)?,
            is_active: row.try_get("is_active").map_err(db_err)?,
            created_at: read_ts(row, "created_at")?,
            updated_at: read_ts(row, "updated_at")?,
        })
    }

    // ==================== price bars ====================

    /// Validate and insert a batch of bars in one transaction. Any invalid
    /// record aborts the whole batch with its index in the error detail.
    pub async fn insert_price_bars(&self, bars: &[PriceBar]) -> Result<u64, ScreenerError> {
        for (index, bar) in bars.iter().enumerate() {
            bar.validate()
                .map_err(|reason| ScreenerError::Validation(format!("record {index}: {reason}")))?;
        }

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let now = fmt_ts(Utc::now());
        let mut written = 0u64;
        for (index, bar) in bars.iter().enumerate() {
            let result = sqlx::query(
                "INSERT INTO price_data
                 (symbol, date, open, high, low, close, volume, adjusted_close, source, quality_score, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(symbol, date, source) DO UPDATE SET
                     open = excluded.open,
                     high = excluded.high,
                     low = excluded.low,
                     close = excluded.close,
                     volume = excluded.volume,
                     adjusted_close = excluded.adjusted_close,
                     quality_score = excluded.quality_score",
            )
            .bind(&bar.symbol)
            .bind(fmt_date(bar.trade_date))
            .bind(bar.open)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.close)
            .bind(bar.volume)
            .bind(bar.adjusted_close)
            .bind(&bar.source)
            .bind(bar.quality_score)
            .bind(&now)
            .execute(&mut *tx)
            .await;

            match result {
                Ok(_) => written += 1,
                Err(e) => {
                    tx.rollback().await.ok();
                    return Err(ScreenerError::Constraint(format!("record {index}: {e}")));
                }
            }
        }
        tx.commit().await.map_err(db_err)?;
        Ok(written)
    }

    pub async fn latest_price_bar(&self, symbol: &str) -> Result<Option<PriceBar>, ScreenerError> {
        let row = sqlx::query(
            "SELECT * FROM price_data WHERE symbol = ? ORDER BY date DESC LIMIT 1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(|r| self.row_to_bar(&r)).transpose()
    }

    pub async fn price_bars_between(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PriceBar>, ScreenerError> {
        let rows = sqlx::query(
            "SELECT * FROM price_data WHERE symbol = ? AND date >= ? AND date <= ? ORDER BY date",
        )
        .bind(symbol)
        .bind(fmt_date(from))
        .bind(fmt_date(to))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(|r| self.row_to_bar(r)).collect()
    }

    pub async fn price_bar_count(&self, symbol: &str) -> Result<i64, ScreenerError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM price_data WHERE symbol = ?")
            .bind(symbol)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.0)
    }

    fn row_to_bar(&self, row: &SqliteRow) -> Result<PriceBar, ScreenerError> {
        Ok(PriceBar {
            symbol: row.try_get("symbol").map_err(db_err)?,
            trade_date: read_date(row, "date")?,
            open: row.try_get("open").map_err(db_err)?,
            high: row.try_get("high").map_err(db_err)?,
            low: row.try_get("low").map_err(db_err)?,
            close: row.try_get("close").map_err(db_err)?,
            volume: row.try_get("volume").map_err(db_err)?,
            adjusted_close: row.try_get("adjusted_close").map_err(db_err)?,
            source: row.try_get("source").map_err(db_err)?,
            quality_score: row.try_get("quality_score").map_err(db_err)?,
        })
    }

    // ==================== fundamentals ====================

    pub async fn upsert_fundamental(
        &self,
        snapshot: &FundamentalSnapshot,
    ) -> Result<(), ScreenerError> {
        sqlx::query(
            "INSERT INTO fundamental_data
             (symbol, reporting_date, period_type, total_revenue, net_income, total_assets,
              total_debt, shareholders_equity, shares_outstanding, free_cash_flow,
              operating_cash_flow, eps, book_value_per_share, pe_ratio, forward_pe, peg_ratio,
              price_to_book, enterprise_value, ev_to_ebitda, return_on_equity, return_on_assets,
              debt_to_equity, current_ratio, quick_ratio, revenue_growth, earnings_growth,
              revenue_per_share, current_price, market_cap, beta, dividend_yield, week_52_high,
              week_52_low, source, quality_score, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(symbol, reporting_date, period_type, source) DO UPDATE SET
                 total_revenue = excluded.total_revenue,
                 net_income = excluded.net_income,
                 total_assets = excluded.total_assets,
                 total_debt = excluded.total_debt,
                 shareholders_equity = excluded.shareholders_equity,
                 shares_outstanding = excluded.shares_outstanding,
                 free_cash_flow = excluded.free_cash_flow,
                 operating_cash_flow = excluded.operating_cash_flow,
                 eps = excluded.eps,
                 book_value_per_share = excluded.book_value_per_share,
                 pe_ratio = excluded.pe_ratio,
                 forward_pe = excluded.forward_pe,
                 peg_ratio = excluded.peg_ratio,
                 price_to_book = excluded.price_to_book,
                 enterprise_value = excluded.enterprise_value,
                 ev_to_ebitda = excluded.ev_to_ebitda,
                 return_on_equity = excluded.return_on_equity,
                 return_on_assets = excluded.return_on_assets,
                 debt_to_equity = excluded.debt_to_equity,
                 current_ratio = excluded.current_ratio,
                 quick_ratio = excluded.quick_ratio,
                 revenue_growth = excluded.revenue_growth,
                 earnings_growth = excluded.earnings_growth,
                 revenue_per_share = excluded.revenue_per_share,
                 current_price = excluded.current_price,
                 market_cap = excluded.market_cap,
                 beta = excluded.beta,
                 dividend_yield = excluded.dividend_yield,
                 week_52_high = excluded.week_52_high,
                 week_52_low = excluded.week_52_low,
                 quality_score = excluded.quality_score,
                 created_at = excluded.created_at",
        )
        .bind(&snapshot.symbol)
        .bind(fmt_date(snapshot.reporting_date))
        .bind(&snapshot.period_type)
        .bind(snapshot.total_revenue)
        .bind(snapshot.net_income)
        .bind(snapshot.total_assets)
        .bind(snapshot.total_debt)
        .bind(snapshot.shareholders_equity)
        .bind(snapshot.shares_outstanding)
        .bind(snapshot.free_cash_flow)
        .bind(snapshot.operating_cash_flow)
        .bind(snapshot.eps)
        .bind(snapshot.book_value_per_share)
        .bind(snapshot.pe_ratio)
        .bind(snapshot.forward_pe)
        .bind(snapshot.peg_ratio)
        .bind(snapshot.price_to_book)
        .bind(snapshot.enterprise_value)
        .bind(snapshot.ev_to_ebitda)
        .bind(snapshot.return_on_equity)
        .bind(snapshot.return_on_assets)
        .bind(snapshot.debt_to_equity)
        .bind(snapshot.current_ratio)
        .bind(snapshot.quick_ratio)
        .bind(snapshot.revenue_growth)
        .bind(snapshot.earnings_growth)
        .bind(snapshot.revenue_per_share)
        .bind(snapshot.current_price)
        .bind(snapshot.market_cap)
        .bind(snapshot.beta)
        .bind(snapshot.dividend_yield)
        .bind(snapshot.week_52_high)
        .bind(snapshot.week_52_low)
        .bind(&snapshot.source)
        .bind(snapshot.quality_score)
        .bind(fmt_ts(snapshot.created_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn latest_fundamental(
        &self,
        symbol: &str,
    ) -> Result<Option<FundamentalSnapshot>, ScreenerError> {
        let row = sqlx::query(
            "SELECT * FROM fundamental_data WHERE symbol = ? ORDER BY reporting_date DESC LIMIT 1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(|r| self.row_to_fundamental(&r)).transpose()
    }

    fn row_to_fundamental(&self, row: &SqliteRow) -> Result<FundamentalSnapshot, ScreenerError> {
        Ok(FundamentalSnapshot {
            symbol: row.try_get("symbol").map_err(db_err)?,
            reporting_date: read_date(row, "reporting_date")?,
            period_type: row.try_get("period_type").map_err(db_err)?,
            source: row.try_get("source").map_err(db_err)?,
            total_revenue: row.try_get("total_revenue").map_err(db_err)?,
            net_income: row.try_get("net_income").map_err(db_err)?,
            total_assets: row.try_get("total_assets").map_err(db_err)?,
            total_debt: row.try_get("total_debt").map_err(db_err)?,
            shareholders_equity: row.try_get("shareholders_equity").map_err(db_err)?,
            shares_outstanding: row.try_get("shares_outstanding").map_err(db_err)?,
            free_cash_flow: row.try_get("free_cash_flow").map_err(db_err)?,
            operating_cash_flow: row.try_get("operating_cash_flow").map_err(db_err)?,
            eps: row.try_get("eps").map_err(db_err)?,
            book_value_per_share: row.try_get("book_value_per_share").map_err(db_err)?,
            pe_ratio: row.try_get("pe_ratio").map_err(db_err)?,
            forward_pe: row.try_get("forward_pe").map_err(db_err)?,
            peg_ratio: row.try_get("peg_ratio").map_err(db_err)?,
            price_to_book: row.try_get("price_to_book").map_err(db_err)?,
            enterprise_value: row.try_get("enterprise_value").map_err(db_err)?,
            ev_to_ebitda: row.try_get("ev_to_ebitda").map_err(db_err)?,
            return_on_equity: row.try_get("return_on_equity").map_err(db_err)?,
            return_on_assets: row.try_get("return_on_assets").map_err(db_err)?,
            debt_to_equity: row.try_get("debt_to_equity").map_err(db_err)?,
            current_ratio: row.try_get("current_ratio").map_err(db_err)?,
            quick_ratio: row.try_get("quick_ratio").map_err(db_err)?,
            revenue_growth: row.try_get("revenue_growth").map_err(db_err)?,
            earnings_growth: row.try_get("earnings_growth").map_err(db_err)?,
            revenue_per_share: row.try_get("revenue_per_share").map_err(db_err)?,
            current_price: row.try_get("current_price").map_err(db_err)?,
            market_cap: row.try_get("market_cap").map_err(db_err)?,
            beta: row.try_get("beta").map_err(db_err)?,
            dividend_yield: row.try_get("dividend_yield").map_err(db_err)?,
            week_52_high: row.try_get("week_52_high").map_err(db_err)?,
            week_52_low: row.try_get("week_52_low").map_err(db_err)?,
            quality_score: row.try_get("quality_score").map_err(db_err)?,
            created_at: read_ts(row, "created_at")?,
        })
    }

    // ==================== news ====================

    pub async fn insert_news_batch(&self, articles: &[NewsArticle]) -> Result<u64, ScreenerError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let now = fmt_ts(Utc::now());
        let mut written = 0u64;
        for (index, article) in articles.iter().enumerate() {
            let result = sqlx::query(
                "INSERT INTO news_articles
                 (symbol, title, summary, content, publisher, publish_date, url, sentiment_score, quality_score, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(url) WHERE url IS NOT NULL DO UPDATE SET
                     title = excluded.title,
                     summary = excluded.summary,
                     content = excluded.content,
                     sentiment_score = excluded.sentiment_score,
                     quality_score = excluded.quality_score",
            )
            .bind(&article.symbol)
            .bind(&article.title)
            .bind(&article.summary)
            .bind(&article.content)
            .bind(&article.publisher)
            .bind(fmt_ts(article.publish_date))
            .bind(&article.url)
            .bind(article.sentiment_score)
            .bind(article.quality_score)
            .bind(&now)
            .execute(&mut *tx)
            .await;

            match result {
                Ok(_) => written += 1,
                Err(e) => {
                    tx.rollback().await.ok();
                    return Err(ScreenerError::Constraint(format!("record {index}: {e}")));
                }
            }
        }
        tx.commit().await.map_err(db_err)?;
        Ok(written)
    }

    pub async fn recent_news(
        &self,
        symbol: &str,
        days: i64,
    ) -> Result<Vec<NewsArticle>, ScreenerError> {
        let cutoff = fmt_ts(Utc::now() - Duration::days(days));
        let rows = sqlx::query(
            "SELECT * FROM news_articles WHERE symbol = ? AND publish_date >= ? ORDER BY publish_date DESC",
        )
        .bind(symbol)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(|r| self.row_to_news(r)).collect()
    }

    pub async fn news_count(&self, symbol: &str) -> Result<i64, ScreenerError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM news_articles WHERE symbol = ?")
            .bind(symbol)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.0)
    }

    fn row_to_news(&self, row: &SqliteRow) -> Result<NewsArticle, ScreenerError> {
        Ok(NewsArticle {
            symbol: row.try_get("symbol").map_err(db_err)?,
            title: row.try_get("title").map_err(db_err)?,
            summary: row
                .try_get::<Option<String>, _>("summary")
                .map_err(db_err)?
                .unwrap_or_default(),
            content: row.try_get("content").map_err(db_err)?,
            publisher: row
                .try_get::<Option<String>, _>("publisher")
                .map_err(db_err)?
                .unwrap_or_default(),
            publish_date: read_ts(row, "publish_date")?,
            url: row.try_get("url").map_err(db_err)?,
            sentiment_score: row.try_get("sentiment_score").map_err(db_err)?,
            quality_score: row.try_get("quality_score").map_err(db_err)?,
        })
    }

    // ==================== social posts ====================

    pub async fn insert_social_batch(&self, posts: &[SocialPost]) -> Result<u64, ScreenerError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let now = fmt_ts(Utc::now());
        let mut written = 0u64;
        for (index, post) in posts.iter().enumerate() {
            let result = sqlx::query(
                "INSERT INTO reddit_posts
                 (symbol, post_id, title, content, subreddit, author, score, upvote_ratio,
                  num_comments, created_utc, url, sentiment_score, quality_score, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(post_id) DO UPDATE SET
                     score = excluded.score,
                     upvote_ratio = excluded.upvote_ratio,
                     num_comments = excluded.num_comments,
                     sentiment_score = excluded.sentiment_score,
                     quality_score = excluded.quality_score",
            )
            .bind(&post.symbol)
            .bind(&post.post_id)
            .bind(&post.title)
            .bind(&post.content)
            .bind(&post.subreddit)
            .bind(&post.author)
            .bind(post.score)
            .bind(post.upvote_ratio)
            .bind(post.num_comments)
            .bind(fmt_ts(post.created_utc))
            .bind(&post.url)
            .bind(post.sentiment_score)
            .bind(post.quality_score)
            .bind(&now)
            .execute(&mut *tx)
            .await;

            match result {
                Ok(_) => written += 1,
                Err(e) => {
                    tx.rollback().await.ok();
                    return Err(ScreenerError::Constraint(format!("record {index}: {e}")));
                }
            }
        }
        tx.commit().await.map_err(db_err)?;
        Ok(written)
    }

    pub async fn recent_social_posts(
        &self,
        symbol: &str,
        days: i64,
    ) -> Result<Vec<SocialPost>, ScreenerError> {
        let cutoff = fmt_ts(Utc::now() - Duration::days(days));
        let rows = sqlx::query(
            "SELECT * FROM reddit_posts WHERE symbol = ? AND created_utc >= ? ORDER BY created_utc DESC",
        )
        .bind(symbol)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(|r| self.row_to_post(r)).collect()
    }

    fn row_to_post(&self, row: &SqliteRow) -> Result<SocialPost, ScreenerError> {
        Ok(SocialPost {
            symbol: row.try_get("symbol").map_err(db_err)?,
            post_id: row.try_get("post_id").map_err(db_err)?,
            title: row.try_get("title").map_err(db_err)?,
            content: row
                .try_get::<Option<String>, _>("content")
                .map_err(db_err)?
                .unwrap_or_default(),
            subreddit: row
                .try_get::<Option<String>, _>("subreddit")
                .map_err(db_err)?
                .unwrap_or_default(),
            author: row
                .try_get::<Option<String>, _>("author")
                .map_err(db_err)?
                .unwrap_or_default(),
            score: row.try_get("score").map_err(db_err)?,
            upvote_ratio: row.try_get("upvote_ratio").map_err(db_err)?,
            num_comments: row.try_get("num_comments").map_err(db_err)?,
            created_utc: read_ts(row, "created_utc")?,
            url: row.try_get("url").map_err(db_err)?,
            sentiment_score: row.try_get("sentiment_score").map_err(db_err)?,
            quality_score: row.try_get("quality_score").map_err(db_err)?,
        })
    }

    // ==================== daily sentiment ====================

    pub async fn upsert_daily_sentiment(
        &self,
        sentiment: &DailySentiment,
    ) -> Result<(), ScreenerError> {
        sqlx::query(
            "INSERT INTO daily_sentiment
             (symbol, date, news_sentiment, news_count, reddit_sentiment, reddit_count,
              combined_sentiment, quality_score, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(symbol, date) DO UPDATE SET
                 news_sentiment = excluded.news_sentiment,
                 news_count = excluded.news_count,
                 reddit_sentiment = excluded.reddit_sentiment,
                 reddit_count = excluded.reddit_count,
                 combined_sentiment = excluded.combined_sentiment,
                 quality_score = excluded.quality_score",
        )
        .bind(&sentiment.symbol)
        .bind(fmt_date(sentiment.date))
        .bind(sentiment.news_sentiment)
        .bind(sentiment.news_count)
        .bind(sentiment.social_sentiment)
        .bind(sentiment.social_count)
        .bind(sentiment.combined_sentiment)
        .bind(sentiment.quality_score)
        .bind(fmt_ts(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn latest_daily_sentiment(
        &self,
        symbol: &str,
    ) -> Result<Option<DailySentiment>, ScreenerError> {
        let row = sqlx::query(
            "SELECT * FROM daily_sentiment WHERE symbol = ? ORDER BY date DESC LIMIT 1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(|r| self.row_to_sentiment(&r)).transpose()
    }

    pub async fn daily_sentiment_since(
        &self,
        symbol: &str,
        from: NaiveDate,
    ) -> Result<Vec<DailySentiment>, ScreenerError> {
        let rows = sqlx::query(
            "SELECT * FROM daily_sentiment WHERE symbol = ? AND date >= ? ORDER BY date DESC",
        )
        .bind(symbol)
        .bind(fmt_date(from))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(|r| self.row_to_sentiment(r)).collect()
    }

    pub async fn sentiment_count(&self, symbol: &str) -> Result<i64, ScreenerError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM daily_sentiment WHERE symbol = ?")
            .bind(symbol)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.0)
    }

    fn row_to_sentiment(&self, row: &SqliteRow) -> Result<DailySentiment, ScreenerError> {
        Ok(DailySentiment {
            symbol: row.try_get("symbol").map_err(db_err)?,
            date: read_date(row, "date")?,
            news_sentiment: row.try_get("news_sentiment").map_err(db_err)?,
            news_count: row.try_get("news_count").map_err(db_err)?,
            social_sentiment: row.try_get("reddit_sentiment").map_err(db_err)?,
            social_count: row.try_get("reddit_count").map_err(db_err)?,
            combined_sentiment: row.try_get("combined_sentiment").map_err(db_err)?,
            quality_score: row.try_get("quality_score").map_err(db_err)?,
        })
    }

    // ==================== calculated metrics ====================

    pub async fn upsert_calculated_metrics(
        &self,
        metrics: &CalculatedMetrics,
    ) -> Result<(), ScreenerError> {
        sqlx::query(
            "INSERT INTO calculated_metrics
             (symbol, calculation_date, fundamental_score, quality_score, growth_score,
              sentiment_score, composite_score, sector_percentile, confidence_interval_lower,
              confidence_interval_upper, methodology_version, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(symbol, calculation_date) DO UPDATE SET
                 fundamental_score = excluded.fundamental_score,
                 quality_score = excluded.quality_score,
                 growth_score = excluded.growth_score,
                 sentiment_score = excluded.sentiment_score,
                 composite_score = excluded.composite_score,
                 sector_percentile = excluded.sector_percentile,
                 confidence_interval_lower = excluded.confidence_interval_lower,
                 confidence_interval_upper = excluded.confidence_interval_upper,
                 methodology_version = excluded.methodology_version",
        )
        .bind(&metrics.symbol)
        .bind(fmt_date(metrics.calculation_date))
        .bind(metrics.fundamental_score)
        .bind(metrics.quality_score)
        .bind(metrics.growth_score)
        .bind(metrics.sentiment_score)
        .bind(metrics.composite_score)
        .bind(metrics.sector_percentile)
        .bind(metrics.confidence_interval_lower)
        .bind(metrics.confidence_interval_upper)
        .bind(&metrics.methodology_version)
        .bind(fmt_ts(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn latest_calculated_metrics(
        &self,
        symbol: &str,
    ) -> Result<Option<CalculatedMetrics>, ScreenerError> {
        let row = sqlx::query(
            "SELECT * FROM calculated_metrics WHERE symbol = ? ORDER BY calculation_date DESC LIMIT 1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(|r| self.row_to_metrics(&r)).transpose()
    }

    /// Composite scores of every symbol scored on `date`, with sectors,
    /// for percentile ranking against the persisted cohort.
    pub async fn scored_cohort(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<(String, Option<String>, f64)>, ScreenerError> {
        let rows: Vec<(String, Option<String>, f64)> = sqlx::query_as(
            "SELECT cm.symbol, s.sector, cm.composite_score
             FROM calculated_metrics cm
             JOIN stocks s ON s.symbol = cm.symbol
             WHERE cm.calculation_date = ? AND cm.composite_score IS NOT NULL",
        )
        .bind(fmt_date(date))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows)
    }

    fn row_to_metrics(&self, row: &SqliteRow) -> Result<CalculatedMetrics, ScreenerError> {
        Ok(CalculatedMetrics {
            symbol: row.try_get("symbol").map_err(db_err)?,
            calculation_date: read_date(row, "calculation_date")?,
            fundamental_score: row.try_get("fundamental_score").map_err(db_err)?,
            quality_score: row.try_get("quality_score").map_err(db_err)?,
            growth_score: row.try_get("growth_score").map_err(db_err)?,
            sentiment_score: row.try_get("sentiment_score").map_err(db_err)?,
            composite_score: row.try_get("composite_score").map_err(db_err)?,
            sector_percentile: row.try_get("sector_percentile").map_err(db_err)?,
            confidence_interval_lower: row.try_get("confidence_interval_lower").map_err(db_err)?,
            confidence_interval_upper: row.try_get("confidence_interval_upper").map_err(db_err)?,
            methodology_version: row.try_get("methodology_version").map_err(db_err)?,
        })
    }

    // ==================== quality gates ====================

    pub async fn save_gate(&self, gate: &QualityGateRecord) -> Result<(), ScreenerError> {
        let blocking = serde_json::to_string(&gate.blocking_rules)
            .map_err(|e| ScreenerError::Parse(e.to_string()))?;
        let metadata = serde_json::to_string(&gate.metadata)
            .map_err(|e| ScreenerError::Parse(e.to_string()))?;
        sqlx::query(
            "INSERT INTO quality_gates
             (gate_id, symbol, component, status, quality_score, approval_timestamp,
              approved_by, expires_at, blocking_rules, metadata, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(gate_id) DO UPDATE SET
                 status = excluded.status,
                 quality_score = excluded.quality_score,
                 approval_timestamp = excluded.approval_timestamp,
                 approved_by = excluded.approved_by,
                 expires_at = excluded.expires_at,
                 blocking_rules = excluded.blocking_rules,
                 metadata = excluded.metadata,
                 updated_at = excluded.updated_at",
        )
        .bind(&gate.gate_id)
        .bind(&gate.symbol)
        .bind(gate.component.as_str())
        .bind(gate.status.as_str())
        .bind(gate.quality_score)
        .bind(gate.approval_timestamp.map(fmt_ts))
        .bind(&gate.approved_by)
        .bind(gate.expires_at.map(fmt_ts))
        .bind(blocking)
        .bind(metadata)
        .bind(fmt_ts(gate.created_at))
        .bind(fmt_ts(gate.updated_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn latest_gate(
        &self,
        symbol: &str,
        component: Component,
    ) -> Result<Option<QualityGateRecord>, ScreenerError> {
        let row = sqlx::query(
            "SELECT * FROM quality_gates WHERE symbol = ? AND component = ?
             ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(symbol)
        .bind(component.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(|r| self.row_to_gate(&r)).transpose()
    }

    /// Transition approved gates past their expiry to EXPIRED.
    /// Returns the number of gates swept.
    pub async fn expire_approved_gates(&self, now: DateTime<Utc>) -> Result<u64, ScreenerError> {
        let result = sqlx::query(
            "UPDATE quality_gates SET status = 'expired', updated_at = ?
             WHERE status = 'approved' AND expires_at IS NOT NULL AND expires_at < ?",
        )
        .bind(fmt_ts(now))
        .bind(fmt_ts(now))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    pub async fn gate_status_counts(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<(String, String, i64)>, ScreenerError> {
        let rows: Vec<(String, String, i64)> = match symbol {
            Some(sym) => {
                sqlx::query_as(
                    "SELECT component, status, COUNT(*) FROM quality_gates
                     WHERE symbol = ? GROUP BY component, status",
                )
                .bind(sym)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as(
                    "SELECT component, status, COUNT(*) FROM quality_gates
                     GROUP BY component, status",
                )
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(db_err)?;
        Ok(rows)
    }

    fn row_to_gate(&self, row: &SqliteRow) -> Result<QualityGateRecord, ScreenerError> {
        let status_raw: String = row.try_get("status").map_err(db_err)?;
        let blocking_raw: Option<String> = row.try_get("blocking_rules").map_err(db_err)?;
        let metadata_raw: Option<String> = row.try_get("metadata").map_err(db_err)?;
        Ok(QualityGateRecord {
            gate_id: row.try_get("gate_id").map_err(db_err)?,
            symbol: row.try_get("symbol").map_err(db_err)?,
            component: read_component(row, "component")?,
            status: GateStatus::from_str(&status_raw)
                .ok_or_else(|| ScreenerError::Parse(format!("unknown gate status: {status_raw:?}")))?,
            quality_score: row.try_get("quality_score").map_err(db_err)?,
            approval_timestamp: read_opt_ts(row, "approval_timestamp")?,
            approved_by: row.try_get("approved_by").map_err(db_err)?,
            expires_at: read_opt_ts(row, "expires_at")?,
            blocking_rules: blocking_raw
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or_default(),
            metadata: metadata_raw
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or(serde_json::Value::Null),
            created_at: read_ts(row, "created_at")?,
            updated_at: read_ts(row, "updated_at")?,
        })
    }

    // ==================== data versions ====================

    /// Atomically deactivate the previous active version for the pair and
    /// insert the new snapshot in one transaction.
    pub async fn activate_version(
        &self,
        version: &DataVersionRecord,
    ) -> Result<(), ScreenerError> {
        let snapshot = serde_json::to_string(&version.data_snapshot)
            .map_err(|e| ScreenerError::Parse(e.to_string()))?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query("UPDATE data_versions SET is_active = 0 WHERE symbol = ? AND component = ?")
            .bind(&version.symbol)
            .bind(version.component.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query(
            "INSERT INTO data_versions
             (version_id, symbol, component, data_snapshot, approval_gate_id,
              created_at, approved_at, expires_at, is_active)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&version.version_id)
        .bind(&version.symbol)
        .bind(version.component.as_str())
        .bind(snapshot)
        .bind(&version.approval_gate_id)
        .bind(fmt_ts(version.created_at))
        .bind(version.approved_at.map(fmt_ts))
        .bind(version.expires_at.map(fmt_ts))
        .bind(version.is_active)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    pub async fn active_version(
        &self,
        symbol: &str,
        component: Component,
    ) -> Result<Option<DataVersionRecord>, ScreenerError> {
        let row = sqlx::query(
            "SELECT * FROM data_versions
             WHERE symbol = ? AND component = ? AND is_active = 1
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(symbol)
        .bind(component.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(|r| self.row_to_version(&r)).transpose()
    }

    pub async fn active_version_count(
        &self,
        symbol: &str,
        component: Component,
    ) -> Result<i64, ScreenerError> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM data_versions WHERE symbol = ? AND component = ? AND is_active = 1",
        )
        .bind(symbol)
        .bind(component.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.0)
    }

    pub async fn deactivate_expired_versions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<u64, ScreenerError> {
        let result = sqlx::query(
            "UPDATE data_versions SET is_active = 0
             WHERE expires_at IS NOT NULL AND expires_at < ? AND is_active = 1",
        )
        .bind(fmt_ts(now))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    fn row_to_version(&self, row: &SqliteRow) -> Result<DataVersionRecord, ScreenerError> {
        let snapshot_raw: Option<String> = row.try_get("data_snapshot").map_err(db_err)?;
        Ok(DataVersionRecord {
            version_id: row.try_get("version_id").map_err(db_err)?,
            symbol: row.try_get("symbol").map_err(db_err)?,
            component: read_component(row, "component")?,
            data_snapshot: snapshot_raw
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or(serde_json::Value::Null),
            approval_gate_id: row.try_get("approval_gate_id").map_err(db_err)?,
            created_at: read_ts(row, "created_at")?,
            approved_at: read_opt_ts(row, "approved_at")?,
            expires_at: read_opt_ts(row, "expires_at")?,
            is_active: row.try_get("is_active").map_err(db_err)?,
        })
    }

    // ==================== quality rules ====================

    pub async fn upsert_quality_rule(&self, rule: &QualityRule) -> Result<(), ScreenerError> {
        let rule_id = format!("{}_{}", rule.component.as_str(), rule.metric);
        let now = fmt_ts(Utc::now());
        sqlx::query(
            "INSERT INTO quality_gate_rules
             (rule_id, component, metric, threshold, operator, block_analysis, description, is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
             ON CONFLICT(rule_id) DO UPDATE SET
                 threshold = excluded.threshold,
                 operator = excluded.operator,
                 block_analysis = excluded.block_analysis,
                 description = excluded.description,
                 is_active = 1,
                 updated_at = excluded.updated_at",
        )
        .bind(rule_id)
        .bind(rule.component.as_str())
        .bind(&rule.metric)
        .bind(rule.threshold)
        .bind(rule.operator.as_str())
        .bind(rule.blocks_analysis)
        .bind(&rule.description)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn load_quality_rules(&self) -> Result<Vec<QualityRule>, ScreenerError> {
        let rows = sqlx::query("SELECT * FROM quality_gate_rules WHERE is_active = 1")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter()
            .map(|row| {
                let op_raw: String = row.try_get("operator").map_err(db_err)?;
                Ok(QualityRule {
                    component: read_component(row, "component")?,
                    metric: row.try_get("metric").map_err(db_err)?,
                    threshold: row.try_get("threshold").map_err(db_err)?,
                    operator: RuleOperator::from_str(&op_raw).ok_or_else(|| {
                        ScreenerError::Parse(format!("unknown rule operator: {op_raw:?}"))
                    })?,
                    blocks_analysis: row.try_get("block_analysis").map_err(db_err)?,
                    description: row
                        .try_get::<Option<String>, _>("description")
                        .map_err(db_err)?
                        .unwrap_or_default(),
                })
            })
            .collect()
    }
}
