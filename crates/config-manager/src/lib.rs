//! Configuration manager: one TOML document with api_credentials,
//! methodology, and system sections, loaded once at startup and treated
//! as immutable afterwards. Holds the credential vault with per-source
//! health, validates the methodology numbers, and picks the sentiment
//! model implementation.

use chrono::{DateTime, Utc};
use composite_scoring::CompositeWeights;
use data_versioning::FreshnessConfig;
use screener_core::{ApiStatus, Component, ScreenerError, SentimentModel};
use sentiment_scoring::{RemoteLlmModel, RuleBasedModel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YahooCredentials {
    pub rate_limit_per_hour: usize,
    pub timeout_secs: u64,
}

impl Default for YahooCredentials {
    fn default() -> Self {
        Self {
            rate_limit_per_hour: 2000,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
    pub subreddits: Vec<String>,
    pub rate_limit_per_minute: usize,
}

impl Default for RedditCredentials {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            user_agent: "stock-screener/0.1".to_string(),
            subreddits: vec![
                "investing".to_string(),
                "stocks".to_string(),
                "wallstreetbets".to_string(),
            ],
            rate_limit_per_minute: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SentimentLlmCredentials {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ApiCredentials {
    pub yahoo_finance: YahooCredentials,
    pub reddit: RedditCredentials,
    pub sentiment_llm: SentimentLlmCredentials,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StalenessLimits {
    pub fundamentals_days: i64,
    pub price_days: i64,
    pub news_days: i64,
    pub sentiment_days: i64,
}

impl Default for StalenessLimits {
    fn default() -> Self {
        Self {
            fundamentals_days: 120,
            price_days: 7,
            news_days: 30,
            sentiment_days: 14,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Methodology {
    pub component_weights: CompositeWeights,
    pub min_component_quality: f64,
    /// Named quality floors, each in [0, 1].
    pub quality_thresholds: BTreeMap<String, f64>,
    pub staleness_limits: StalenessLimits,
}

impl Default for Methodology {
    fn default() -> Self {
        let mut quality_thresholds = BTreeMap::new();
        quality_thresholds.insert("fundamentals".to_string(), 0.7);
        quality_thresholds.insert("sentiment".to_string(), 0.6);
        Self {
            component_weights: CompositeWeights::default(),
            min_component_quality: 0.3,
            quality_thresholds,
            staleness_limits: StalenessLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSettings {
    pub database_path: String,
    pub universe_registry_path: String,
    pub logging_level: String,
    pub collection_workers: usize,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            database_path: "data/stock_data.db".to_string(),
            universe_registry_path: "data/stock_universes.json".to_string(),
            logging_level: "info".to_string(),
            collection_workers: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ScreenerConfig {
    pub api_credentials: ApiCredentials,
    pub methodology: Methodology,
    pub system: SystemSettings,
}

/// Recorded outcome of an adapter self-test.
#[derive(Debug, Clone, Serialize)]
pub struct ApiHealth {
    pub status: ApiStatus,
    pub last_tested: Option<DateTime<Utc>>,
    pub detail: String,
}

impl Default for ApiHealth {
    fn default() -> Self {
        Self {
            status: ApiStatus::Untested,
            last_tested: None,
            detail: String::new(),
        }
    }
}

#[derive(Debug)]
pub struct ConfigManager {
    config: ScreenerConfig,
    health: BTreeMap<String, ApiHealth>,
}

impl ConfigManager {
    /// Load and validate the configuration document. A missing file means
    /// defaults; an invalid one is fatal at startup.
    pub fn load(path: &Path) -> Result<Self, ScreenerError> {
        let config = match std::fs::read_to_string(path) {
            Ok(text) => toml::from_str::<ScreenerConfig>(&text)
                .map_err(|e| ScreenerError::Config(format!("{}: {e}", path.display())))?,
            Err(_) => {
                tracing::info!(
                    "no configuration at {}, using defaults",
                    path.display()
                );
                ScreenerConfig::default()
            }
        };
        Self::from_config(config)
    }

    pub fn from_config(mut config: ScreenerConfig) -> Result<Self, ScreenerError> {
        apply_env_overrides(&mut config);
        validate(&config)?;
        let mut health = BTreeMap::new();
        for source in ["yahoo_finance", "reddit", "sentiment_llm"] {
            health.insert(source.to_string(), ApiHealth::default());
        }
        Ok(Self { config, health })
    }

    pub fn config(&self) -> &ScreenerConfig {
        &self.config
    }

    /// Per-component freshness thresholds derived from the configured
    /// staleness limits.
    pub fn freshness_config(&self) -> FreshnessConfig {
        let limits = &self.config.methodology.staleness_limits;
        let mut map = BTreeMap::new();
        map.insert(Component::Fundamentals, limits.fundamentals_days);
        map.insert(Component::PriceData, limits.price_days);
        map.insert(Component::NewsData, limits.news_days);
        map.insert(Component::SentimentData, limits.sentiment_days);
        FreshnessConfig::from_staleness_limits(&map)
    }

    /// Text sentiment model chosen at startup: the remote LLM when it is
    /// enabled and credentialed, the lexicon model otherwise.
    pub fn sentiment_model(&self) -> Arc<dyn SentimentModel> {
        let llm = &self.config.api_credentials.sentiment_llm;
        if llm.enabled && !llm.api_key.is_empty() && !llm.base_url.is_empty() {
            tracing::info!("using remote LLM sentiment model {:?}", llm.model);
            Arc::new(RemoteLlmModel::new(
                llm.base_url.clone(),
                llm.api_key.clone(),
                llm.model.clone(),
            ))
        } else {
            tracing::info!("using rule-based sentiment model");
            Arc::new(RuleBasedModel::new())
        }
    }

    /// Record an adapter self-test result in the vault.
    pub fn record_test(&mut self, source: &str, status: ApiStatus, detail: String) {
        self.health.insert(
            source.to_string(),
            ApiHealth {
                status,
                last_tested: Some(Utc::now()),
                detail,
            },
        );
    }

    pub fn health(&self, source: &str) -> ApiHealth {
        self.health.get(source).cloned().unwrap_or_default()
    }

    pub fn health_summary(&self) -> &BTreeMap<String, ApiHealth> {
        &self.health
    }

    /// Exportable view of the configuration with secrets elided.
    pub fn export_sanitized(&self) -> Result<String, ScreenerError> {
        let mut sanitized = self.config.clone();
        if !sanitized.api_credentials.reddit.client_secret.is_empty() {
            sanitized.api_credentials.reddit.client_secret = "***".to_string();
        }
        if !sanitized.api_credentials.sentiment_llm.api_key.is_empty() {
            sanitized.api_credentials.sentiment_llm.api_key = "***".to_string();
        }
        toml::to_string_pretty(&sanitized).map_err(|e| ScreenerError::Config(e.to_string()))
    }
}

/// Credentials left empty in the document can arrive from the process
/// environment instead.
fn apply_env_overrides(config: &mut ScreenerConfig) {
    let reddit = &mut config.api_credentials.reddit;
    if reddit.client_id.is_empty() {
        if let Ok(value) = std::env::var("REDDIT_CLIENT_ID") {
            reddit.client_id = value;
        }
    }
    if reddit.client_secret.is_empty() {
        if let Ok(value) = std::env::var("REDDIT_CLIENT_SECRET") {
            reddit.client_secret = value;
        }
    }
    let llm = &mut config.api_credentials.sentiment_llm;
    if llm.api_key.is_empty() {
        if let Ok(value) = std::env::var("ANTHROPIC_API_KEY") {
            llm.api_key = value;
        }
    }
}

fn validate(config: &ScreenerConfig) -> Result<(), ScreenerError> {
    config.methodology.component_weights.validate()?;

    if !(0.0..=1.0).contains(&config.methodology.min_component_quality) {
        return Err(ScreenerError::Config(format!(
            "min_component_quality must be in [0, 1] (current: {})",
            config.methodology.min_component_quality
        )));
    }

    for (name, value) in &config.methodology.quality_thresholds {
        if !(0.0..=1.0).contains(value) {
            return Err(ScreenerError::Config(format!(
                "quality threshold {name} must be in [0, 1] (current: {value})"
            )));
        }
    }

    let limits = &config.methodology.staleness_limits;
    for (name, days) in [
        ("fundamentals_days", limits.fundamentals_days),
        ("price_days", limits.price_days),
        ("news_days", limits.news_days),
        ("sentiment_days", limits.sentiment_days),
    ] {
        if !(1..=365).contains(&days) {
            return Err(ScreenerError::Config(format!(
                "staleness limit {name} must be 1-365 days (current: {days})"
            )));
        }
    }

    if config.system.collection_workers == 0 {
        return Err(ScreenerError::Config(
            "collection_workers must be at least 1".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_cleanly() {
        let manager = ConfigManager::from_config(ScreenerConfig::default()).unwrap();
        assert_eq!(manager.config().system.collection_workers, 4);
        assert_eq!(
            manager.health("yahoo_finance").status,
            ApiStatus::Untested
        );
    }

    #[test]
    fn full_document_parses() {
        let text = r#"
            [api_credentials.yahoo_finance]
            rate_limit_per_hour = 1000
            timeout_secs = 20

            [api_credentials.reddit]
            client_id = "abc"
            client_secret = "shh"
            user_agent = "screener/test"
            subreddits = ["stocks"]
            rate_limit_per_minute = 30

            [api_credentials.sentiment_llm]
            enabled = true
            base_url = "https://api.anthropic.com"
            api_key = "sk-test"
            model = "claude-3-5-haiku-20241022"

            [methodology]
            min_component_quality = 0.35

            [methodology.component_weights]
            fundamental = 0.40
            quality = 0.25
            growth = 0.20
            sentiment = 0.15

            [methodology.staleness_limits]
            fundamentals_days = 90
            price_days = 5
            news_days = 21
            sentiment_days = 10

            [system]
            database_path = "test.db"
            universe_registry_path = "universes.json"
            logging_level = "debug"
            collection_workers = 3
        "#;
        let config: ScreenerConfig = toml::from_str(text).unwrap();
        let manager = ConfigManager::from_config(config).unwrap();

        assert_eq!(
            manager.config().api_credentials.yahoo_finance.rate_limit_per_hour,
            1000
        );
        assert_eq!(manager.config().system.collection_workers, 3);
        assert_eq!(
            manager.config().methodology.staleness_limits.price_days,
            5
        );
    }

    #[test]
    fn bad_weights_are_fatal() {
        let mut config = ScreenerConfig::default();
        config.methodology.component_weights.fundamental = 0.9;
        let err = ConfigManager::from_config(config).unwrap_err();
        assert!(matches!(err, ScreenerError::Config(_)));
    }

    #[test]
    fn staleness_limits_outside_bounds_are_fatal() {
        let mut config = ScreenerConfig::default();
        config.methodology.staleness_limits.price_days = 0;
        assert!(ConfigManager::from_config(config).is_err());

        let mut config = ScreenerConfig::default();
        config.methodology.staleness_limits.news_days = 400;
        assert!(ConfigManager::from_config(config).is_err());
    }

    #[test]
    fn quality_thresholds_must_be_fractions() {
        let mut config = ScreenerConfig::default();
        config
            .methodology
            .quality_thresholds
            .insert("fundamentals".to_string(), 1.5);
        assert!(ConfigManager::from_config(config).is_err());
    }

    #[test]
    fn sanitized_export_hides_secrets() {
        let mut config = ScreenerConfig::default();
        config.api_credentials.reddit.client_secret = "super-secret".to_string();
        config.api_credentials.sentiment_llm.api_key = "sk-live".to_string();

        let manager = ConfigManager::from_config(config).unwrap();
        let exported = manager.export_sanitized().unwrap();
        assert!(!exported.contains("super-secret"));
        assert!(!exported.contains("sk-live"));
        assert!(exported.contains("***"));
    }

    #[test]
    fn sentiment_model_selection_follows_credentials() {
        let manager = ConfigManager::from_config(ScreenerConfig::default()).unwrap();
        assert_eq!(manager.sentiment_model().name(), "rule_based");

        let mut config = ScreenerConfig::default();
        config.api_credentials.sentiment_llm = SentimentLlmCredentials {
            enabled: true,
            base_url: "https://api.anthropic.com".to_string(),
            api_key: "sk-test".to_string(),
            model: "claude-3-5-haiku-20241022".to_string(),
        };
        let manager = ConfigManager::from_config(config).unwrap();
        assert_eq!(manager.sentiment_model().name(), "remote_llm");
    }

    #[test]
    fn freshness_config_tracks_staleness_limits() {
        let mut config = ScreenerConfig::default();
        config.methodology.staleness_limits.price_days = 10;
        let manager = ConfigManager::from_config(config).unwrap();
        let freshness = manager.freshness_config();
        assert!((freshness.price.stale - 10.0).abs() < 1e-9);
    }

    #[test]
    fn self_test_results_are_recorded() {
        let mut manager = ConfigManager::from_config(ScreenerConfig::default()).unwrap();
        manager.record_test(
            "yahoo_finance",
            ApiStatus::Healthy,
            "probe succeeded".to_string(),
        );
        let health = manager.health("yahoo_finance");
        assert_eq!(health.status, ApiStatus::Healthy);
        assert!(health.last_tested.is_some());
    }
}
