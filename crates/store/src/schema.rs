//! Versioned schema. Startup applies forward migrations in order; the
//! current version lives in the `schema_version` metadata table.
//! Downgrades are not supported.

/// Each entry is one schema version: a batch of statements applied in a
/// single transaction. Version numbers are 1-based indexes into this list.
pub const MIGRATIONS: &[&[&str]] = &[
    // v1: core entity tables + indexes
    &[
        "CREATE TABLE IF NOT EXISTS stocks (
            symbol TEXT PRIMARY KEY,
            company_name TEXT NOT NULL,
            sector TEXT,
            industry TEXT,
            market_cap INTEGER,
            listing_exchange TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS price_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol TEXT NOT NULL,
            date TEXT NOT NULL,
            open REAL NOT NULL,
            high REAL NOT NULL,
            low REAL NOT NULL,
            close REAL NOT NULL,
            volume INTEGER NOT NULL,
            adjusted_close REAL NOT NULL,
            source TEXT NOT NULL,
            quality_score REAL NOT NULL DEFAULT 1.0,
            created_at TEXT NOT NULL,
            FOREIGN KEY (symbol) REFERENCES stocks(symbol),
            UNIQUE(symbol, date, source)
        )",
        "CREATE TABLE IF NOT EXISTS fundamental_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol TEXT NOT NULL,
            reporting_date TEXT NOT NULL,
            period_type TEXT NOT NULL,
            total_revenue INTEGER,
            net_income INTEGER,
            total_assets INTEGER,
            total_debt INTEGER,
            shareholders_equity INTEGER,
            shares_outstanding INTEGER,
            free_cash_flow INTEGER,
            operating_cash_flow INTEGER,
            eps REAL,
            book_value_per_share REAL,
            pe_ratio REAL,
            forward_pe REAL,
            peg_ratio REAL,
            price_to_book REAL,
            enterprise_value INTEGER,
            ev_to_ebitda REAL,
            return_on_equity REAL,
            return_on_assets REAL,
            debt_to_equity REAL,
            current_ratio REAL,
            quick_ratio REAL,
            revenue_growth REAL,
            earnings_growth REAL,
            revenue_per_share REAL,
            current_price REAL,
            market_cap INTEGER,
            beta REAL,
            dividend_yield REAL,
            week_52_high REAL,
            week_52_low REAL,
            source TEXT NOT NULL,
            quality_score REAL NOT NULL DEFAULT 1.0,
            created_at TEXT NOT NULL,
            FOREIGN KEY (symbol) REFERENCES stocks(symbol),
            UNIQUE(symbol, reporting_date, period_type, source)
        )",
        "CREATE TABLE IF NOT EXISTS news_articles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol TEXT NOT NULL,
            title TEXT NOT NULL,
            summary TEXT,
            content TEXT,
            publisher TEXT,
            publish_date TEXT NOT NULL,
            url TEXT,
            sentiment_score REAL NOT NULL DEFAULT 0.0,
            quality_score REAL NOT NULL DEFAULT 0.0,
            created_at TEXT NOT NULL,
            FOREIGN KEY (symbol) REFERENCES stocks(symbol)
        )",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_news_articles_url
            ON news_articles(url) WHERE url IS NOT NULL",
        "CREATE TABLE IF NOT EXISTS reddit_posts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol TEXT NOT NULL,
            post_id TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            content TEXT,
            subreddit TEXT,
            author TEXT,
            score INTEGER NOT NULL DEFAULT 0,
            upvote_ratio REAL NOT NULL DEFAULT 0.0,
            num_comments INTEGER NOT NULL DEFAULT 0,
            created_utc TEXT NOT NULL,
            url TEXT,
            sentiment_score REAL NOT NULL DEFAULT 0.0,
            quality_score REAL NOT NULL DEFAULT 0.0,
            created_at TEXT NOT NULL,
            FOREIGN KEY (symbol) REFERENCES stocks(symbol)
        )",
        "CREATE TABLE IF NOT EXISTS daily_sentiment (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol TEXT NOT NULL,
            date TEXT NOT NULL,
            news_sentiment REAL NOT NULL DEFAULT 0.0,
            news_count INTEGER NOT NULL DEFAULT 0,
            reddit_sentiment REAL NOT NULL DEFAULT 0.0,
            reddit_count INTEGER NOT NULL DEFAULT 0,
            combined_sentiment REAL NOT NULL DEFAULT 0.0,
            quality_score REAL NOT NULL DEFAULT 0.0,
            created_at TEXT NOT NULL,
            FOREIGN KEY (symbol) REFERENCES stocks(symbol),
            UNIQUE(symbol, date)
        )",
        "CREATE TABLE IF NOT EXISTS calculated_metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol TEXT NOT NULL,
            calculation_date TEXT NOT NULL,
            fundamental_score REAL,
            quality_score REAL,
            growth_score REAL,
            sentiment_score REAL,
            composite_score REAL,
            sector_percentile REAL,
            confidence_interval_lower REAL,
            confidence_interval_upper REAL,
            methodology_version TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (symbol) REFERENCES stocks(symbol),
            UNIQUE(symbol, calculation_date)
        )",
        "CREATE INDEX IF NOT EXISTS idx_price_data_symbol_date
            ON price_data(symbol, date)",
        "CREATE INDEX IF NOT EXISTS idx_fundamental_data_symbol_date
            ON fundamental_data(symbol, reporting_date DESC)",
        "CREATE INDEX IF NOT EXISTS idx_news_articles_symbol_date
            ON news_articles(symbol, publish_date DESC)",
        "CREATE INDEX IF NOT EXISTS idx_reddit_posts_symbol_date
            ON reddit_posts(symbol, created_utc DESC)",
        "CREATE INDEX IF NOT EXISTS idx_daily_sentiment_symbol_date
            ON daily_sentiment(symbol, date DESC)",
        "CREATE INDEX IF NOT EXISTS idx_calculated_metrics_symbol_date
            ON calculated_metrics(symbol, calculation_date DESC)",
    ],
    // v2: quality gating tables
    &[
        "CREATE TABLE IF NOT EXISTS quality_gates (
            gate_id TEXT PRIMARY KEY,
            symbol TEXT NOT NULL,
            component TEXT NOT NULL,
            status TEXT NOT NULL,
            quality_score REAL NOT NULL DEFAULT 0.0,
            approval_timestamp TEXT,
            approved_by TEXT,
            expires_at TEXT,
            blocking_rules TEXT,
            metadata TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (symbol) REFERENCES stocks(symbol)
        )",
        "CREATE TABLE IF NOT EXISTS data_versions (
            version_id TEXT PRIMARY KEY,
            symbol TEXT NOT NULL,
            component TEXT NOT NULL,
            data_snapshot TEXT,
            approval_gate_id TEXT,
            created_at TEXT NOT NULL,
            approved_at TEXT,
            expires_at TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY (symbol) REFERENCES stocks(symbol),
            FOREIGN KEY (approval_gate_id) REFERENCES quality_gates(gate_id)
        )",
        "CREATE TABLE IF NOT EXISTS quality_gate_rules (
            rule_id TEXT PRIMARY KEY,
            component TEXT NOT NULL,
            metric TEXT NOT NULL,
            threshold REAL NOT NULL,
            operator TEXT NOT NULL,
            block_analysis INTEGER NOT NULL DEFAULT 1,
            description TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_quality_gates_symbol_component
            ON quality_gates(symbol, component, updated_at DESC)",
        "CREATE INDEX IF NOT EXISTS idx_data_versions_symbol_component
            ON data_versions(symbol, component, is_active)",
    ],
];

pub const SCHEMA_VERSION_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
)";
