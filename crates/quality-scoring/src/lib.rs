//! Balance-sheet quality scorer: ROE, ROIC, debt/equity, and current
//! ratio, each banded to 0-100 and combined with redistribution over the
//! ratios the snapshot actually carries.

use chrono::Utc;
use data_versioning::VersionManager;
use screener_core::{
    score_higher_better, score_lower_better, weighted_composite, Component, ComponentMetrics,
    FundamentalSnapshot, ScoringBands, ScreenerError, SubScore,
};
use store::Database;

const WEIGHTS: [(&str, f64); 4] = [
    ("return_on_equity", 0.30),
    ("return_on_invested_capital", 0.25),
    ("debt_to_equity", 0.25),
    ("current_ratio", 0.20),
];

fn roe_bands() -> ScoringBands {
    ScoringBands::new(0.25, 0.15, 0.10, 0.05, 0.0)
}

fn roic_bands() -> ScoringBands {
    ScoringBands::new(0.20, 0.12, 0.08, 0.04, 0.0)
}

fn debt_equity_bands() -> ScoringBands {
    ScoringBands::new(0.3, 0.6, 1.0, 1.5, 2.5)
}

fn current_ratio_bands() -> ScoringBands {
    ScoringBands::new(2.0, 1.5, 1.2, 1.0, 0.5)
}

/// Yahoo reports debt/equity as a percentage for most listings; values
/// above this cutoff are treated as percent and rescaled.
fn normalize_debt_equity(raw: f64) -> f64 {
    if raw > 10.0 {
        raw / 100.0
    } else {
        raw
    }
}

pub struct QualityScorer {
    db: Database,
    versions: VersionManager,
}

impl QualityScorer {
    pub fn new(db: Database, versions: VersionManager) -> Self {
        Self { db, versions }
    }

    fn roe(&self, snapshot: &FundamentalSnapshot) -> (Option<f64>, f64) {
        match snapshot.return_on_equity {
            Some(roe) => {
                let score = if roe <= 0.0 {
                    0.0
                } else {
                    score_higher_better(roe, &roe_bands())
                };
                (Some(roe), score)
            }
            None => (None, 0.0),
        }
    }

    /// ROIC from net income over invested capital, falling back to return
    /// on assets when the balance-sheet inputs are absent.
    fn roic(&self, snapshot: &FundamentalSnapshot) -> (Option<f64>, f64) {
        let ratio = match (
            snapshot.net_income,
            snapshot.shareholders_equity,
            snapshot.total_debt,
        ) {
            (Some(net_income), Some(equity), Some(debt)) if equity + debt > 0 => {
                Some(net_income as f64 / (equity + debt) as f64)
            }
            _ => snapshot.return_on_assets,
        };
        match ratio {
            Some(v) if v > 0.0 => (Some(v), score_higher_better(v, &roic_bands())),
            Some(v) => (Some(v), 0.0),
            None => (None, 0.0),
        }
    }

    fn debt_to_equity(&self, snapshot: &FundamentalSnapshot) -> (Option<f64>, f64) {
        match snapshot.debt_to_equity {
            Some(raw) if raw >= 0.0 => {
                let ratio = normalize_debt_equity(raw);
                (
                    Some(ratio),
                    score_lower_better(ratio, &debt_equity_bands(), 1.0),
                )
            }
            _ => (None, 0.0),
        }
    }

    fn current_ratio(&self, snapshot: &FundamentalSnapshot) -> (Option<f64>, f64) {
        match snapshot.current_ratio {
            Some(v) if v > 0.0 => (Some(v), score_higher_better(v, &current_ratio_bands())),
            _ => (None, 0.0),
        }
    }

    pub fn score_snapshot(
        &self,
        snapshot: &FundamentalSnapshot,
        staleness_impact: f64,
    ) -> Vec<SubScore> {
        let (roe_raw, roe) = self.roe(snapshot);
        let (roic_raw, roic) = self.roic(snapshot);
        let (de_raw, de) = self.debt_to_equity(snapshot);
        let (cr_raw, cr) = self.current_ratio(snapshot);

        let scores = [roe, roic, de, cr];
        let raws = [roe_raw, roic_raw, de_raw, cr_raw];
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
        let versioned = self
            .versions
            .versioned_fundamentals(symbol, max_age_days)
            .await?;
        let Some(snapshot) = versioned.payload else {
            tracing::warn!("no fundamental data found for {}", symbol);
            return Ok(None);
        };
        let sector = self
            .db
            .get_stock(symbol)
            .await?
            .and_then(|stock| stock.sector);

        let subscores = self.score_snapshot(&snapshot, versioned.staleness_impact);
        let pairs: Vec<(f64, f64)> = subscores.iter().map(|s| (s.score, s.weight)).collect();
        let Some(score) = weighted_composite(&pairs) else {
            tracing::warn!("no valid quality metrics for {}", symbol);
            return Ok(None);
        };

        let valid = subscores.iter().filter(|s| s.score > 0.0).count();
        let data_quality = (valid as f64 / subscores.len() as f64
            * versioned.info.quality_score)
            .clamp(0.0, 1.0);

        Ok(Some(ComponentMetrics {
            symbol: symbol.to_string(),
            component: Component::Fundamentals,
            calculation_date: Utc::now().date_naive(),
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
    use screener_core::Stock;

    fn snapshot() -> FundamentalSnapshot {
        FundamentalSnapshot {
            symbol: "MSFT".to_string(),
            reporting_date: Utc::now().date_naive(),
            period_type: "quarterly".to_string(),
            source: "yahoo_finance".to_string(),
            return_on_equity: Some(0.28),
            return_on_assets: Some(0.14),
            net_income: Some(88_000_000_000),
            shareholders_equity: Some(250_000_000_000),
            total_debt: Some(80_000_000_000),
            debt_to_equity: Some(32.0), // percent form
            current_ratio: Some(1.8),
            quality_score: 0.9,
            created_at: Utc::now(),
            ..Default::default()
        }
    }

    async fn scorer() -> QualityScorer {
        let db = Database::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        db.upsert_stock(&Stock {
            symbol: "MSFT".to_string(),
            company_name: "Microsoft".to_string(),
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
        let versions = VersionManager::new(db.clone());
        QualityScorer::new(db, versions)
    }

    #[test]
    fn percent_form_debt_equity_is_rescaled() {
        assert!((normalize_debt_equity(32.0) - 0.32).abs() < 1e-9);
        assert!((normalize_debt_equity(0.8) - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn strong_balance_sheet_scores_high() {
        let s = scorer().await;
        let subscores = s.score_snapshot(&snapshot(), 1.0);
        let pairs: Vec<(f64, f64)> = subscores.iter().map(|x| (x.score, x.weight)).collect();
        let composite = weighted_composite(&pairs).unwrap();
        assert!(composite > 70.0, "composite was {}", composite);

        let de = subscores
            .iter()
            .find(|x| x.metric == "debt_to_equity")
            .unwrap();
        assert!((de.raw.unwrap() - 0.32).abs() < 1e-9);
        assert!(de.score >= 90.0, "low leverage should band excellent");
    }

    #[tokio::test]
    async fn roic_falls_back_to_return_on_assets() {
        let mut thin = snapshot();
        thin.net_income = None;
        thin.shareholders_equity = None;
        thin.total_debt = None;

        let s = scorer().await;
        let subscores = s.score_snapshot(&thin, 1.0);
        let roic = subscores
            .iter()
            .find(|x| x.metric == "return_on_invested_capital")
            .unwrap();
        assert!((roic.raw.unwrap() - 0.14).abs() < 1e-9);
        assert!(roic.score > 0.0);
    }

    #[tokio::test]
    async fn negative_roe_scores_zero() {
        let mut losing = snapshot();
        losing.return_on_equity = Some(-0.12);
        let s = scorer().await;
        let subscores = s.score_snapshot(&losing, 1.0);
        let roe = subscores
            .iter()
            .find(|x| x.metric == "return_on_equity")
            .unwrap();
        assert_eq!(roe.score, 0.0);
        assert!(roe.raw.unwrap() < 0.0);
    }

    #[tokio::test]
    async fn compute_emits_component_metrics() {
        let s = scorer().await;
        s.db.upsert_fundamental(&snapshot()).await.unwrap();
        let metrics = s.compute("MSFT", None).await.unwrap().unwrap();
        assert!(metrics.score > 0.0);
        assert_eq!(metrics.subscores.len(), 4);
        assert_eq!(metrics.sector.as_deref(), Some("Technology"));
    }

    #[tokio::test]
    async fn empty_snapshot_yields_none() {
        let s = scorer().await;
        let bare = FundamentalSnapshot {
            symbol: "MSFT".to_string(),
            reporting_date: Utc::now().date_naive(),
            period_type: "quarterly".to_string(),
            source: "yahoo_finance".to_string(),
            created_at: Utc::now(),
            ..Default::default()
        };
        s.db.upsert_fundamental(&bare).await.unwrap();
        assert!(s.compute("MSFT", None).await.unwrap().is_none());
    }
}
