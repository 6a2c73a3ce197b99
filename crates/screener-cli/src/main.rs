//! screener: drive the collection and scoring pipeline from the shell.
//!
//! Usage:
//!   screener --refresh-universe [--force]
//!   screener --collect [--universe sp500] [--types prices,fundamentals,news,sentiment]
//!   screener --score
//!   screener --sweep
//!   screener --status
//!
//! Options:
//!   --config PATH       Configuration file (default: config/screener.toml)
//!   --db PATH           Override the configured SQLite path
//!   --concurrency N     Override the configured worker count

use anyhow::{bail, Result};
use chrono::Utc;
use collection_orchestrator::{CollectionOrchestrator, CollectionType};
use composite_scoring::{CompositeAggregator, CompositeConfig, ComponentInputs};
use config_manager::ConfigManager;
use data_versioning::VersionManager;
use fundamental_scoring::FundamentalScorer;
use growth_scoring::GrowthScorer;
use quality_gating::QualityGatingEngine;
use quality_scoring::QualityScorer;
use reddit_client::{RedditClient, RedditCredentials};
use screener_core::ProgressSink;
use sentiment_scoring::SentimentScorer;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use store::Database;
use universe_manager::{UniverseManager, SP500_UNIVERSE_ID};
use yahoo_client::YahooClient;

fn flag(args: &[String], name: &str) -> bool {
    args.iter().any(|a| a == name)
}

fn option<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

fn parse_types(raw: Option<&str>) -> Result<Vec<CollectionType>> {
    let Some(raw) = raw else {
        return Ok(CollectionType::ALL.to_vec());
    };
    let mut types = Vec::new();
    for part in raw.split(',') {
        let t = match part.trim() {
            "fundamentals" => CollectionType::Fundamentals,
            "prices" => CollectionType::Prices,
            "news" => CollectionType::News,
            "sentiment" => CollectionType::Sentiment,
            other => bail!("unknown data type: {other}"),
        };
        types.push(t);
    }
    Ok(types)
}

fn usage() -> ! {
    eprintln!("Usage:");
    eprintln!("  screener --refresh-universe [--force]   Sync the S&P 500 constituent list");
    eprintln!("  screener --collect                      Collect data for a universe");
    eprintln!("  screener --score                        Score every active symbol");
    eprintln!("  screener --sweep                        Expire overdue approvals");
    eprintln!("  screener --status                       API health and data staleness");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config PATH       Config file (default: config/screener.toml)");
    eprintln!("  --db PATH           Override the SQLite database path");
    eprintln!("  --universe ID       Universe to collect (default: sp500)");
    eprintln!("  --types a,b,c       Subset of fundamentals,prices,news,sentiment");
    eprintln!("  --concurrency N     Worker count override");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "screener=info,store=info,collection_orchestrator=info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        usage();
    }

    let config_path = option(&args, "--config").unwrap_or("config/screener.toml");
    let mut config = ConfigManager::load(Path::new(config_path))?;

    let db_path = option(&args, "--db")
        .map(str::to_string)
        .unwrap_or_else(|| config.config().system.database_path.clone());
    if let Some(parent) = Path::new(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::connect(&db_path).await?;
    db.migrate().await?;

    let yahoo = Arc::new(YahooClient::with_limits(
        config.config().api_credentials.yahoo_finance.rate_limit_per_hour,
        Duration::from_secs(config.config().api_credentials.yahoo_finance.timeout_secs),
    ));
    let reddit_cfg = &config.config().api_credentials.reddit;
    let reddit = Arc::new(RedditClient::with_subreddits(
        RedditCredentials {
            client_id: reddit_cfg.client_id.clone(),
            client_secret: reddit_cfg.client_secret.clone(),
            user_agent: reddit_cfg.user_agent.clone(),
        },
        reddit_cfg.subreddits.clone(),
    ));
    let sentiment_model = config.sentiment_model();

    let registry_path =
        PathBuf::from(config.config().system.universe_registry_path.clone());
    let mut universe = UniverseManager::new(db.clone(), registry_path)
        .with_validator(yahoo.clone());

    let versions = VersionManager::with_config(db.clone(), config.freshness_config());

    if flag(&args, "--refresh-universe") {
        let diff = universe.refresh_universe(flag(&args, "--force")).await?;
        println!(
            "universe refresh: {} added, {} removed, {} unchanged",
            diff.added.len(),
            diff.removed.len(),
            diff.unchanged.len()
        );
        for warning in &diff.warnings {
            println!("  warning: {warning}");
        }
        return Ok(());
    }

    if flag(&args, "--collect") {
        let universe_id = option(&args, "--universe").unwrap_or(SP500_UNIVERSE_ID);
        let types = parse_types(option(&args, "--types"))?;
        let workers = option(&args, "--concurrency")
            .and_then(|v| v.parse().ok())
            .unwrap_or(config.config().system.collection_workers);

        let symbol_count = universe.universe_symbols(universe_id).len();
        if symbol_count == 0 {
            bail!("universe '{universe_id}' is empty; run --refresh-universe first");
        }
        let estimate = CollectionOrchestrator::estimate_duration(symbol_count, &types);
        tracing::info!(
            "collecting {} symbols, estimated {:.1} minutes",
            symbol_count,
            estimate.as_secs_f64() / 60.0
        );

        let orchestrator = CollectionOrchestrator::new(
            db.clone(),
            yahoo.clone(),
            reddit.clone(),
            sentiment_model.clone(),
        )
        .with_workers(workers);

        let progress: ProgressSink = Arc::new(|current, total, symbol| {
            tracing::info!("processed {symbol} ({current}/{total})");
        });
        let report = orchestrator
            .collect_universe(&universe, universe_id, &types, Some(progress), None)
            .await;

        println!(
            "collection finished: {}/{} symbols clean ({:.0}%)",
            report.successful_symbols(),
            report.total_symbols,
            report.success_ratio() * 100.0
        );
        for (class, count) in report.counts_by_class() {
            println!("  {class}: {count}");
        }
        return Ok(());
    }

    if flag(&args, "--score") {
        let symbols = db.active_symbols().await?;
        if symbols.is_empty() {
            bail!("no active symbols; collect data first");
        }

        let fundamental = FundamentalScorer::new(db.clone(), versions.clone());
        let quality = QualityScorer::new(db.clone(), versions.clone());
        let growth = GrowthScorer::new(db.clone(), versions.clone());
        let sentiment = SentimentScorer::new(db.clone(), versions.clone());
        let aggregator = CompositeAggregator::new(CompositeConfig {
            weights: config.config().methodology.component_weights,
            min_component_quality: config.config().methodology.min_component_quality,
        })?;
        let gating = QualityGatingEngine::from_store(db.clone(), versions.clone()).await?;

        let today = Utc::now().date_naive();
        let mut inputs_by_symbol = Vec::new();
        for symbol in &symbols {
            let admission = gating
                .is_analysis_allowed(symbol, &screener_core::Component::ALL)
                .await?;
            if !admission.allowed {
                tracing::info!(
                    "skipping {symbol}: blocked {:?}, ungated {:?}",
                    admission.blocking_components,
                    admission.warning_components
                );
                continue;
            }
            let inputs = ComponentInputs {
                fundamental: fundamental.compute(symbol, None).await?,
                quality: quality.compute(symbol, None).await?,
                growth: growth.compute(symbol, None).await?,
                sentiment: sentiment.compute(symbol, None).await?,
            };
            inputs_by_symbol.push((symbol.clone(), inputs));
        }

        // First pass establishes the batch cohort, the second ranks in it
        let cohort: Vec<(String, Option<String>, f64)> = inputs_by_symbol
            .iter()
            .filter_map(|(symbol, inputs)| {
                let result = aggregator.aggregate(symbol, today, inputs, &[]);
                result
                    .composite_score
                    .map(|score| (symbol.clone(), result.sector, score))
            })
            .collect();

        let mut ranked = Vec::new();
        for (symbol, inputs) in &inputs_by_symbol {
            let result = aggregator.aggregate(symbol, today, inputs, &cohort);
            db.upsert_calculated_metrics(&result.to_calculated_metrics())
                .await?;
            if let Some(score) = result.composite_score {
                ranked.push((symbol.clone(), score, result.category));
            }
        }
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        println!("scored {} of {} symbols", ranked.len(), symbols.len());
        for (symbol, score, category) in ranked.iter().take(25) {
            println!("  {symbol:<6} {score:6.1}  {category:?}");
        }
        return Ok(());
    }

    if flag(&args, "--sweep") {
        let gating = QualityGatingEngine::from_store(db.clone(), versions.clone()).await?;
        let (gates, data_versions) = gating.sweep_expired().await?;
        println!("expired {gates} gates, deactivated {data_versions} data versions");
        return Ok(());
    }

    if flag(&args, "--status") {
        use screener_core::{MarketDataSource, SocialSource};

        let (status, detail) = yahoo.self_test().await;
        config.record_test("yahoo_finance", status, detail);
        let (status, detail) = reddit.self_test().await;
        config.record_test("reddit", status, detail);

        println!("api health:");
        for (source, health) in config.health_summary() {
            println!(
                "  {source:<15} {:<20} {}",
                health.status.as_str(),
                health.detail
            );
        }

        let symbols = db.active_symbols().await?;
        if !symbols.is_empty() {
            let report = versions.staleness_report(&symbols).await?;
            println!("data freshness across {} symbols:", report.symbols_analyzed);
            for (level, count) in &report.distribution {
                println!("  {level:<12} {count}");
            }
            for recommendation in &report.recommendations {
                println!("  note: {recommendation}");
            }
        }
        return Ok(());
    }

    usage();
}
