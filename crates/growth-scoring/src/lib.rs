//! Growth scorer: revenue growth, EPS growth, revenue stability, and
//! forward growth, banded to 0-100. Stability is estimated from price-bar
//! return dispersion when no direct revenue history exists; forward
//! growth is implied by the trailing/forward P/E relationship.

use chrono::{Duration, Utc};
use data_versioning::VersionManager;
use screener_core::{
    score_higher_better, weighted_composite, Component, ComponentMetrics, FundamentalSnapshot,
    PriceBar, ScoringBands, ScreenerError, SubScore,
};
use store::Database;

const WEIGHTS: [(&str, f64); 4] = [
    ("revenue_growth", 0.30),
    ("eps_growth", 0.30),
    ("revenue_stability", 0.20),
    ("forward_growth", 0.20),
];

/// Price window used to estimate stability.
const STABILITY_LOOKBACK_DAYS: i64 = 182;
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

fn growth_bands() -> ScoringBands {
    ScoringBands::new(0.20, 0.12, 0.07, 0.02, -0.05)
}

fn stability_bands() -> ScoringBands {
    ScoringBands::new(0.85, 0.75, 0.65, 0.50, 0.30)
}

/// Stability in [0, 1]: one minus the annualized daily-return dispersion,
/// floored at zero. Needs a few weeks of bars to mean anything.
pub fn stability_from_bars(bars: &[PriceBar]) -> Option<f64> {
    if bars.len() < 20 {
        return None;
    }
    let returns: Vec<f64> = bars
        .windows(2)
        .filter(|w| w[0].close > 0.0)
        .map(|w| (w[1].close - w[0].close) / w[0].close)
        .collect();
    if returns.len() < 19 {
        return None;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance =
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    let annualized = variance.sqrt() * TRADING_DAYS_PER_YEAR.sqrt();
    Some((1.0 - annualized).clamp(0.0, 1.0))
}

/// Growth implied by the forward P/E discount to the trailing P/E.
pub fn implied_forward_growth(snapshot: &FundamentalSnapshot) -> Option<f64> {
    match (snapshot.pe_ratio, snapshot.forward_pe) {
        (Some(trailing), Some(forward)) if trailing > 0.0 && forward > 0.0 => {
            Some(trailing / forward - 1.0)
        }
        _ => None,
    }
}

pub struct GrowthScorer {
    db: Database,
    versions: VersionManager,
}

impl GrowthScorer {
    pub fn new(db: Database, versions: VersionManager) -> Self {
        Self { db, versions }
    }

    fn banded_growth(&self, value: Option<f64>) -> (Option<f64>, f64) {
        match value {
            Some(v) => (Some(v), score_higher_better(v, &growth_bands())),
            None => (None, 0.0),
        }
    }

    pub fn score_snapshot(
        &self,
        snapshot: &FundamentalSnapshot,
        stability: Option<f64>,
        staleness_impact: f64,
    ) -> Vec<SubScore> {
        let (rev_raw, rev) = self.banded_growth(snapshot.revenue_growth);
        let (eps_raw, eps) = self.banded_growth(snapshot.earnings_growth);
        let (stab_raw, stab) = match stability {
            Some(v) => (Some(v), score_higher_better(v, &stability_bands())),
            None => (None, 0.0),
        };
        let (fwd_raw, fwd) = self.banded_growth(implied_forward_growth(snapshot));

        let scores = [rev, eps, stab, fwd];
        let raws = [rev_raw, eps_raw, stab_raw, fwd_raw];
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

        let today = Utc::now().date_naive();
        let bars = self
            .db
            .price_bars_between(
                symbol,
                today - Duration::days(STABILITY_LOOKBACK_DAYS),
                today,
            )
            .await?;
        let stability = stability_from_bars(&bars);

        let sector = self
            .db
            .get_stock(symbol)
            .await?
            .and_then(|stock| stock.sector);

        let subscores =
            self.score_snapshot(&snapshot, stability, versioned.staleness_impact);
        let pairs: Vec<(f64, f64)> = subscores.iter().map(|s| (s.score, s.weight)).collect();
        let Some(score) = weighted_composite(&pairs) else {
            tracing::warn!("no valid growth metrics for {}", symbol);
            return Ok(None);
        };

        let valid = subscores.iter().filter(|s| s.score > 0.0).count();
        let data_quality = (valid as f64 / subscores.len() as f64
            * versioned.info.quality_score)
            .clamp(0.0, 1.0);

        Ok(Some(ComponentMetrics {
            symbol: symbol.to_string(),
            component: Component::Fundamentals,
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
    use chrono::NaiveDate;

    fn snapshot(revenue_growth: Option<f64>, earnings_growth: Option<f64>) -> FundamentalSnapshot {
        FundamentalSnapshot {
            symbol: "NVDA".to_string(),
            reporting_date: Utc::now().date_naive(),
            period_type: "quarterly".to_string(),
            source: "yahoo_finance".to_string(),
            revenue_growth,
            earnings_growth,
            pe_ratio: Some(40.0),
            forward_pe: Some(32.0),
            quality_score: 0.9,
            created_at: Utc::now(),
            ..Default::default()
        }
    }

    fn steady_bars(count: usize) -> Vec<PriceBar> {
        let start = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        (0..count)
            .map(|i| {
                // Gentle drift with tiny wiggle: low dispersion
                let close = 100.0 + i as f64 * 0.1 + if i % 2 == 0 { 0.05 } else { -0.05 };
                PriceBar {
                    symbol: "NVDA".to_string(),
                    trade_date: start + Duration::days(i as i64),
                    open: close - 0.1,
                    high: close + 0.2,
                    low: close - 0.2,
                    close,
                    volume: 1_000_000,
                    adjusted_close: close,
                    source: "yahoo_finance".to_string(),
                    quality_score: 1.0,
                }
            })
            .collect()
    }

    fn volatile_bars(count: usize) -> Vec<PriceBar> {
        let start = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        (0..count)
            .map(|i| {
                let close = if i % 2 == 0 { 100.0 } else { 112.0 };
                PriceBar {
                    symbol: "NVDA".to_string(),
                    trade_date: start + Duration::days(i as i64),
                    open: close - 1.0,
                    high: close + 2.0,
                    low: close - 2.0,
                    close,
                    volume: 1_000_000,
                    adjusted_close: close,
                    source: "yahoo_finance".to_string(),
                    quality_score: 1.0,
                }
            })
            .collect()
    }

    async fn scorer() -> GrowthScorer {
        let db = Database::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let versions = VersionManager::new(db.clone());
        GrowthScorer::new(db, versions)
    }

    #[test]
    fn stability_rewards_low_dispersion() {
        let steady = stability_from_bars(&steady_bars(60)).unwrap();
        let volatile = stability_from_bars(&volatile_bars(60)).unwrap();
        assert!(steady > volatile, "steady {} vs volatile {}", steady, volatile);
        assert!(steady > 0.8);
    }

    #[test]
    fn stability_needs_enough_bars() {
        assert!(stability_from_bars(&steady_bars(10)).is_none());
    }

    #[test]
    fn forward_growth_comes_from_pe_discount() {
        let s = snapshot(None, None);
        // 40 / 32 - 1 = 0.25
        assert!((implied_forward_growth(&s).unwrap() - 0.25).abs() < 1e-9);

        let mut no_forward = snapshot(None, None);
        no_forward.forward_pe = None;
        assert!(implied_forward_growth(&no_forward).is_none());
    }

    #[tokio::test]
    async fn strong_growth_scores_high() {
        let s = scorer().await;
        let subscores = s.score_snapshot(&snapshot(Some(0.25), Some(0.30)), Some(0.9), 1.0);
        let pairs: Vec<(f64, f64)> = subscores.iter().map(|x| (x.score, x.weight)).collect();
        let composite = weighted_composite(&pairs).unwrap();
        assert!(composite > 75.0, "composite was {}", composite);
    }

    #[tokio::test]
    async fn shrinking_revenue_bands_low() {
        let s = scorer().await;
        let subscores = s.score_snapshot(&snapshot(Some(-0.10), None), None, 1.0);
        let rev = subscores
            .iter()
            .find(|x| x.metric == "revenue_growth")
            .unwrap();
        assert_eq!(rev.score, 0.0, "a -10% print is beyond very_poor");
        assert!(rev.raw.unwrap() < 0.0);
    }

    #[tokio::test]
    async fn missing_subscores_redistribute() {
        let s = scorer().await;
        let mut thin = snapshot(Some(0.15), None);
        thin.forward_pe = None;
        let subscores = s.score_snapshot(&thin, None, 1.0);
        let pairs: Vec<(f64, f64)> = subscores.iter().map(|x| (x.score, x.weight)).collect();
        // Only revenue growth scored; composite equals its score
        let composite = weighted_composite(&pairs).unwrap();
        let rev = subscores
            .iter()
            .find(|x| x.metric == "revenue_growth")
            .unwrap();
        assert!((composite - rev.score).abs() < 1e-9);
    }
}
