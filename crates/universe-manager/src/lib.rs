//! Universe management: S&P 500 tracking with membership diffing, plus
//! custom user-defined universes. Constituents come from a fallback chain
//! of sources; membership changes deactivate stocks, never delete them.
//! The universe registry is persisted as a JSON document beside the store.

use chrono::{DateTime, Duration, Utc};
use screener_core::{
    normalize_symbol, ConstituentSource, MarketDataSource, ScreenerError, Stock,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use store::Database;

pub mod sources;
pub use sources::{CompiledListSource, SpyHoldingsSource, WikipediaSource, FALLBACK_SYMBOLS};

pub const SP500_UNIVERSE_ID: &str = "sp500";
const REFRESH_INTERVAL_DAYS: i64 = 7;

/// Result of a universe refresh.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UniverseDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniverseType {
    Sp500,
    Custom,
    Sector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseMetadata {
    pub universe_id: String,
    pub name: String,
    pub description: String,
    pub universe_type: UniverseType,
    pub created_date: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub stock_count: usize,
    pub auto_sync: bool,
    pub source_label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseRecord {
    pub metadata: UniverseMetadata,
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Registry {
    universes: BTreeMap<String, UniverseRecord>,
}

pub struct UniverseManager {
    db: Database,
    sources: Vec<Box<dyn ConstituentSource>>,
    validator: Option<Arc<dyn MarketDataSource>>,
    registry_path: PathBuf,
    registry: Registry,
}

impl UniverseManager {
    /// Production chain: Wikipedia table, SPY holdings, compiled fallback.
    pub fn new(db: Database, registry_path: PathBuf) -> Self {
        Self::with_sources(
            db,
            registry_path,
            vec![
                Box::new(WikipediaSource::new()),
                Box::new(SpyHoldingsSource::new()),
                Box::new(CompiledListSource),
            ],
        )
    }

    pub fn with_sources(
        db: Database,
        registry_path: PathBuf,
        sources: Vec<Box<dyn ConstituentSource>>,
    ) -> Self {
        let registry = Self::load_registry(&registry_path);
        Self {
            db,
            sources,
            validator: None,
            registry_path,
            registry,
        }
    }

    /// Probe each new symbol against the price source before inserting it.
    pub fn with_validator(mut self, validator: Arc<dyn MarketDataSource>) -> Self {
        self.validator = Some(validator);
        self
    }

    fn load_registry(path: &PathBuf) -> Registry {
        match std::fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!("universe registry unreadable, starting fresh: {}", e);
                Registry::default()
            }),
            Err(_) => Registry::default(),
        }
    }

    fn save_registry(&self) -> Result<(), ScreenerError> {
        if let Some(parent) = self.registry_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ScreenerError::Storage(e.to_string()))?;
        }
        let text = serde_json::to_string_pretty(&self.registry)
            .map_err(|e| ScreenerError::Parse(e.to_string()))?;
        std::fs::write(&self.registry_path, text)
            .map_err(|e| ScreenerError::Storage(e.to_string()))
    }

    /// Fetch current constituents and reconcile the tracked stock set.
    /// Re-fetch is suppressed inside the weekly window unless `force`.
    /// If every source fails the diff is empty with a warning; the caller
    /// must never treat that as "all stocks removed".
    pub async fn refresh_universe(&mut self, force: bool) -> Result<UniverseDiff, ScreenerError> {
        let existing = self.db.active_symbols().await?;

        if !force {
            if let Some(record) = self.registry.universes.get(SP500_UNIVERSE_ID) {
                let age = Utc::now() - record.metadata.last_updated;
                if age < Duration::days(REFRESH_INTERVAL_DAYS) {
                    tracing::info!("universe refreshed {}h ago, skipping", age.num_hours());
                    return Ok(UniverseDiff {
                        unchanged: existing,
                        ..Default::default()
                    });
                }
            }
        }

        let mut warnings = Vec::new();
        let mut fetched: Option<(Vec<String>, &'static str)> = None;
        for source in &self.sources {
            match source.fetch_constituents().await {
                Ok(symbols) if !symbols.is_empty() => {
                    tracing::info!(
                        "fetched {} constituents from {}",
                        symbols.len(),
                        source.label()
                    );
                    fetched = Some((symbols, source.label()));
                    break;
                }
                Ok(_) => {
                    warnings.push(format!("{} returned an empty list", source.label()));
                }
                Err(e) => {
                    tracing::warn!("constituent source {} failed: {}", source.label(), e);
                    warnings.push(format!("{} failed: {e}", source.label()));
                }
            }
        }

        let Some((raw_symbols, source_label)) = fetched else {
            tracing::warn!("every constituent source failed; keeping current universe");
            return Ok(UniverseDiff {
                unchanged: existing,
                warnings,
                ..Default::default()
            });
        };

        let mut symbols: Vec<String> = raw_symbols
            .iter()
            .map(|s| normalize_symbol(s))
            .filter(|s| !s.is_empty())
            .collect();
        symbols.sort();
        symbols.dedup();

        let mut diff = UniverseDiff {
            warnings,
            ..Default::default()
        };

        for symbol in &symbols {
            if existing.contains(symbol) {
                diff.unchanged.push(symbol.clone());
                continue;
            }
            match self.insert_symbol(symbol).await {
                Ok(true) => diff.added.push(symbol.clone()),
                Ok(false) => {
                    diff.warnings
                        .push(format!("{symbol} failed validation, skipped"));
                }
                Err(e) => {
                    diff.warnings.push(format!("{symbol} insert failed: {e}"));
                }
            }
        }

        // Index leavers are deactivated, never purged: their history stays
        for symbol in &existing {
            if !symbols.contains(symbol) {
                self.db.set_stock_active(symbol, false).await?;
                diff.removed.push(symbol.clone());
            }
        }

        let tracked: Vec<String> = diff
            .unchanged
            .iter()
            .chain(diff.added.iter())
            .cloned()
            .collect();
        let now = Utc::now();
        let metadata = UniverseMetadata {
            universe_id: SP500_UNIVERSE_ID.to_string(),
            name: "S&P 500".to_string(),
            description: "Standard & Poor's 500 index constituents".to_string(),
            universe_type: UniverseType::Sp500,
            created_date: self
                .registry
                .universes
                .get(SP500_UNIVERSE_ID)
                .map(|r| r.metadata.created_date)
                .unwrap_or(now),
            last_updated: now,
            stock_count: tracked.len(),
            auto_sync: true,
            source_label: Some(source_label.to_string()),
        };
        self.registry.universes.insert(
            SP500_UNIVERSE_ID.to_string(),
            UniverseRecord {
                metadata,
                symbols: tracked,
            },
        );
        self.save_registry()?;

        tracing::info!(
            "universe refresh: {} added, {} removed, {} unchanged",
            diff.added.len(),
            diff.removed.len(),
            diff.unchanged.len()
        );
        Ok(diff)
    }

    /// Insert one symbol, probing the price source when a validator is
    /// configured. Returns false when the symbol fails validation.
    async fn insert_symbol(&self, symbol: &str) -> Result<bool, ScreenerError> {
        let profile = match &self.validator {
            Some(source) => match source.fetch_profile(symbol).await {
                Ok(profile) => {
                    if profile.company_name.is_none() && profile.current_price.is_none() {
                        return Ok(false);
                    }
                    Some(profile)
                }
                Err(e) => {
                    tracing::warn!("validation probe failed for {}: {}", symbol, e);
                    return Ok(false);
                }
            },
            None => None,
        };

        let now = Utc::now();
        let stock = match profile {
            Some(p) => Stock {
                symbol: symbol.to_string(),
                company_name: p
                    .company_name
                    .unwrap_or_else(|| format!("{symbol} Inc.")),
                sector: p.sector,
                industry: p.industry,
                market_cap: p.market_cap,
                listing_exchange: p.listing_exchange,
                is_active: true,
                created_at: now,
                updated_at: now,
            },
            None => Stock {
                symbol: symbol.to_string(),
                company_name: format!("{symbol} Inc."),
                sector: None,
                industry: None,
                market_cap: None,
                listing_exchange: None,
                is_active: true,
                created_at: now,
                updated_at: now,
            },
        };
        self.db.upsert_stock(&stock).await?;
        // A re-listed leaver comes back active through the upsert
        self.db.set_stock_active(symbol, true).await?;
        Ok(true)
    }

    /// Create a custom universe after validating and normalizing the
    /// symbol list. The id `sp500` is reserved.
    pub async fn create_custom_universe(
        &mut self,
        universe_id: &str,
        name: &str,
        symbols: &[String],
    ) -> Result<usize, ScreenerError> {
        if universe_id == SP500_UNIVERSE_ID {
            return Err(ScreenerError::Validation(
                "universe id 'sp500' is reserved".to_string(),
            ));
        }
        if symbols.is_empty() {
            return Err(ScreenerError::Validation(
                "custom universe needs at least one symbol".to_string(),
            ));
        }

        let mut accepted = Vec::new();
        for raw in symbols {
            let symbol = normalize_symbol(raw);
            if symbol.is_empty() || symbol.len() > 10 {
                continue;
            }
            if self.insert_symbol(&symbol).await? {
                accepted.push(symbol);
            }
        }
        if accepted.is_empty() {
            return Err(ScreenerError::Validation(
                "no symbol in the list passed validation".to_string(),
            ));
        }
        accepted.sort();
        accepted.dedup();

        let now = Utc::now();
        let record = UniverseRecord {
            metadata: UniverseMetadata {
                universe_id: universe_id.to_string(),
                name: name.to_string(),
                description: format!("Custom universe: {name}"),
                universe_type: UniverseType::Custom,
                created_date: now,
                last_updated: now,
                stock_count: accepted.len(),
                auto_sync: false,
                source_label: None,
            },
            symbols: accepted,
        };
        let count = record.symbols.len();
        self.registry
            .universes
            .insert(universe_id.to_string(), record);
        self.save_registry()?;
        Ok(count)
    }

    pub fn list_universes(&self) -> Vec<&UniverseMetadata> {
        self.registry
            .universes
            .values()
            .map(|r| &r.metadata)
            .collect()
    }

    pub fn universe_symbols(&self, universe_id: &str) -> Vec<String> {
        self.registry
            .universes
            .get(universe_id)
            .map(|r| r.symbols.clone())
            .unwrap_or_default()
    }

    pub fn universe_info(&self, universe_id: &str) -> Option<&UniverseRecord> {
        self.registry.universes.get(universe_id)
    }

    pub async fn add_symbols(
        &mut self,
        universe_id: &str,
        symbols: &[String],
    ) -> Result<usize, ScreenerError> {
        if !self.registry.universes.contains_key(universe_id) {
            return Err(ScreenerError::Validation(format!(
                "universe '{universe_id}' not found"
            )));
        }
        let mut added = 0usize;
        let mut accepted = Vec::new();
        for raw in symbols {
            let symbol = normalize_symbol(raw);
            if symbol.is_empty() {
                continue;
            }
            if self.insert_symbol(&symbol).await? {
                accepted.push(symbol);
            }
        }
        let record = self
            .registry
            .universes
            .get_mut(universe_id)
            .expect("checked above");
        for symbol in accepted {
            if !record.symbols.contains(&symbol) {
                record.symbols.push(symbol);
                added += 1;
            }
        }
        record.symbols.sort();
        record.metadata.stock_count = record.symbols.len();
        record.metadata.last_updated = Utc::now();
        self.save_registry()?;
        Ok(added)
    }

    pub fn remove_symbols(
        &mut self,
        universe_id: &str,
        symbols: &[String],
    ) -> Result<usize, ScreenerError> {
        let record = self.registry.universes.get_mut(universe_id).ok_or_else(|| {
            ScreenerError::Validation(format!("universe '{universe_id}' not found"))
        })?;
        let targets: Vec<String> = symbols.iter().map(|s| normalize_symbol(s)).collect();
        let before = record.symbols.len();
        record.symbols.retain(|s| !targets.contains(s));
        let removed = before - record.symbols.len();
        record.metadata.stock_count = record.symbols.len();
        record.metadata.last_updated = Utc::now();
        self.save_registry()?;
        Ok(removed)
    }

    /// Delete a custom universe. The S&P 500 universe is never deletable.
    pub fn delete_universe(&mut self, universe_id: &str) -> Result<(), ScreenerError> {
        if universe_id == SP500_UNIVERSE_ID {
            return Err(ScreenerError::Validation(
                "the sp500 universe cannot be deleted".to_string(),
            ));
        }
        if self.registry.universes.remove(universe_id).is_none() {
            return Err(ScreenerError::Validation(format!(
                "universe '{universe_id}' not found"
            )));
        }
        self.save_registry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StubSource {
        batches: Mutex<Vec<Result<Vec<String>, ScreenerError>>>,
    }

    impl StubSource {
        fn new(batches: Vec<Result<Vec<String>, ScreenerError>>) -> Self {
            Self {
                batches: Mutex::new(batches),
            }
        }
    }

    #[async_trait]
    impl ConstituentSource for StubSource {
        async fn fetch_constituents(&self) -> Result<Vec<String>, ScreenerError> {
            let mut batches = self.batches.lock().unwrap();
            if batches.is_empty() {
                Err(ScreenerError::Source("stub exhausted".to_string()))
            } else {
                batches.remove(0)
            }
        }

        fn label(&self) -> &'static str {
            "stub"
        }
    }

    static REGISTRY_COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn registry_path() -> PathBuf {
        let n = REGISTRY_COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!(
            "screener_universe_test_{}_{n}.json",
            std::process::id()
        ))
    }

    async fn manager_with(
        batches: Vec<Result<Vec<String>, ScreenerError>>,
    ) -> (UniverseManager, Database) {
        let db = Database::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let manager = UniverseManager::with_sources(
            db.clone(),
            registry_path(),
            vec![Box::new(StubSource::new(batches))],
        );
        (manager, db)
    }

    #[tokio::test]
    async fn refresh_adds_new_symbols_to_store() {
        let (mut manager, db) = manager_with(vec![Ok(vec![
            "AAPL".to_string(),
            "brk.b".to_string(),
        ])])
        .await;

        let diff = manager.refresh_universe(true).await.unwrap();
        assert_eq!(diff.added, vec!["AAPL", "BRK-B"]);
        assert!(diff.removed.is_empty());

        // Every added symbol exists in the stocks table
        for symbol in &diff.added {
            assert!(db.get_stock(symbol).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn refresh_deactivates_leavers_without_deleting() {
        let (mut manager, db) = manager_with(vec![
            Ok(vec!["AAPL".to_string(), "MSFT".to_string()]),
            Ok(vec!["AAPL".to_string()]),
        ])
        .await;

        manager.refresh_universe(true).await.unwrap();
        let diff = manager.refresh_universe(true).await.unwrap();

        assert_eq!(diff.removed, vec!["MSFT"]);
        assert_eq!(diff.unchanged, vec!["AAPL"]);
        let msft = db.get_stock("MSFT").await.unwrap().unwrap();
        assert!(!msft.is_active, "leavers are deactivated, not purged");
    }

    #[tokio::test]
    async fn second_refresh_within_window_is_throttled() {
        let (mut manager, _db) = manager_with(vec![
            Ok(vec!["AAPL".to_string()]),
            Ok(vec!["TSLA".to_string()]), // would change membership if fetched
        ])
        .await;

        manager.refresh_universe(true).await.unwrap();
        let diff = manager.refresh_universe(false).await.unwrap();
        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty());
        assert_eq!(diff.unchanged, vec!["AAPL"]);
    }

    #[tokio::test]
    async fn all_sources_failing_yields_empty_diff_not_mass_removal() {
        let (mut manager, db) = manager_with(vec![
            Ok(vec!["AAPL".to_string()]),
            Err(ScreenerError::Source("down".to_string())),
        ])
        .await;

        manager.refresh_universe(true).await.unwrap();
        let diff = manager.refresh_universe(true).await.unwrap();

        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty(), "failure must not read as removal");
        assert_eq!(diff.unchanged, vec!["AAPL"]);
        assert!(!diff.warnings.is_empty());
        assert!(db.get_stock("AAPL").await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn custom_universe_lifecycle() {
        let (mut manager, _db) = manager_with(vec![]).await;

        let count = manager
            .create_custom_universe("tech_watch", "Tech Watchlist", &[
                "AAPL".to_string(),
                "msft".to_string(),
            ])
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(manager.universe_symbols("tech_watch"), vec!["AAPL", "MSFT"]);

        manager
            .add_symbols("tech_watch", &["NVDA".to_string()])
            .await
            .unwrap();
        assert_eq!(manager.universe_symbols("tech_watch").len(), 3);

        let removed = manager
            .remove_symbols("tech_watch", &["MSFT".to_string()])
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(manager.universe_symbols("tech_watch"), vec!["AAPL", "NVDA"]);

        manager.delete_universe("tech_watch").unwrap();
        assert!(manager.universe_info("tech_watch").is_none());
    }

    #[tokio::test]
    async fn sp500_universe_is_not_deletable() {
        let (mut manager, _db) = manager_with(vec![Ok(vec!["AAPL".to_string()])]).await;
        manager.refresh_universe(true).await.unwrap();
        assert!(manager.delete_universe(SP500_UNIVERSE_ID).is_err());
        assert!(manager.universe_info(SP500_UNIVERSE_ID).is_some());
    }

    #[tokio::test]
    async fn reserved_id_rejected_for_custom_universe() {
        let (mut manager, _db) = manager_with(vec![]).await;
        let err = manager
            .create_custom_universe(SP500_UNIVERSE_ID, "Nope", &["AAPL".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ScreenerError::Validation(_)));
    }
}
