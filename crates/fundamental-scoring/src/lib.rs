//! Fundamental valuation scorer: P/E, EV/EBITDA, PEG, and FCF yield, each
//! normalized to 0-100 over sector-adjusted thresholds and combined with
//! FCF-focus-rebalanced weights. Component scores carry the staleness
//! multiplier of the data they were computed from.

use chrono::Utc;
use data_versioning::VersionManager;
use screener_core::{
    score_higher_better, score_lower_better, weighted_composite, Component, ComponentMetrics,
    FundamentalSnapshot, ScoringBands, ScreenerError, SubScore,
};
use sector_adjustments::{FundamentalThresholds, SectorAdjustmentEngine};
use store::Database;

/// Base component weights before sector rebalancing.
const BASE_WEIGHTS: [(&str, f64); 4] = [
    ("pe_ratio", 0.30),
    ("ev_ebitda", 0.25),
    ("peg_ratio", 0.25),
    ("fcf_yield", 0.20),
];

const FCF_WEIGHT_FLOOR: f64 = 0.10;
const FCF_WEIGHT_CEILING: f64 = 0.40;

pub fn default_thresholds() -> FundamentalThresholds {
    FundamentalThresholds {
        pe_ratio: ScoringBands::new(15.0, 20.0, 25.0, 35.0, 50.0),
        ev_ebitda: ScoringBands::new(10.0, 15.0, 20.0, 30.0, 40.0),
        peg_ratio: ScoringBands::new(0.5, 1.0, 1.5, 2.0, 3.0),
        fcf_yield: ScoringBands::new(0.08, 0.05, 0.03, 0.01, 0.0),
    }
}

/// Rebalance the base weights for an FCF focus multiplier: the new FCF
/// weight is clamped to [0.10, 0.40] and the remainder is split over the
/// other ratios proportionally.
pub fn rebalanced_weights(focus: f64) -> [(&'static str, f64); 4] {
    let mut weights = BASE_WEIGHTS;
    if (focus - 1.0).abs() < f64::EPSILON {
        return weights;
    }

    let base_fcf = weights[3].1;
    let new_fcf = (base_fcf * focus).clamp(FCF_WEIGHT_FLOOR, FCF_WEIGHT_CEILING);
    let other_sum: f64 = weights[..3].iter().map(|(_, w)| w).sum();
    let adjustment = (1.0 - new_fcf) / other_sum;
    for entry in &mut weights[..3] {
        entry.1 *= adjustment;
    }
    weights[3].1 = new_fcf;
    weights
}

pub struct FundamentalScorer {
    db: Database,
    versions: VersionManager,
    sector_engine: SectorAdjustmentEngine,
    thresholds: FundamentalThresholds,
}

impl FundamentalScorer {
    pub fn new(db: Database, versions: VersionManager) -> Self {
        Self {
            db,
            versions,
            sector_engine: SectorAdjustmentEngine::new(),
            thresholds: default_thresholds(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: FundamentalThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Base weights with the FCF slot rebalanced by the sector's focus.
    pub fn sector_adjusted_weights(&self, sector: Option<&str>) -> [(&'static str, f64); 4] {
        rebalanced_weights(self.sector_engine.fcf_weight_multiplier(sector))
    }

    /// (raw, score) for P/E. Missing or non-positive ratios score 0.
    fn pe_score(
        &self,
        snapshot: &FundamentalSnapshot,
        thresholds: &FundamentalThresholds,
    ) -> (Option<f64>, f64) {
        match snapshot.pe_ratio {
            Some(pe) if pe > 0.0 => (
                Some(pe),
                score_lower_better(pe, &thresholds.pe_ratio, 10.0),
            ),
            _ => (None, 0.0),
        }
    }

    /// (raw, score) for EV/EBITDA, approximated from enterprise value over
    /// operating cash flow when the source leaves the ratio empty.
    fn ev_ebitda_score(
        &self,
        snapshot: &FundamentalSnapshot,
        thresholds: &FundamentalThresholds,
    ) -> (Option<f64>, f64) {
        let ratio = match snapshot.ev_to_ebitda {
            Some(v) if v > 0.0 => Some(v),
            _ => match (snapshot.enterprise_value, snapshot.operating_cash_flow) {
                (Some(ev), Some(ocf)) if ev > 0 && ocf > 0 => {
                    tracing::debug!(
                        "{}: approximating EV/EBITDA from operating cash flow",
                        snapshot.symbol
                    );
                    Some(ev as f64 / ocf as f64)
                }
                _ => None,
            },
        };
        match ratio {
            Some(v) => (Some(v), score_lower_better(v, &thresholds.ev_ebitda, 20.0)),
            None => (None, 0.0),
        }
    }

    /// (raw, score) for PEG, derived from P/E and earnings growth when the
    /// ratio itself is absent.
    fn peg_score(
        &self,
        snapshot: &FundamentalSnapshot,
        thresholds: &FundamentalThresholds,
    ) -> (Option<f64>, f64) {
        let ratio = match snapshot.peg_ratio {
            Some(v) => Some(v),
            None => match (snapshot.pe_ratio, snapshot.earnings_growth) {
                (Some(pe), Some(growth)) if pe > 0.0 && growth > 0.0 => {
                    // Growth arrives as a fraction; PEG wants percent
                    let growth_pct = if growth < 1.0 { growth * 100.0 } else { growth };
                    Some(pe / growth_pct)
                }
                _ => None,
            },
        };
        match ratio {
            Some(v) if v > 0.0 => (Some(v), score_lower_better(v, &thresholds.peg_ratio, 2.0)),
            _ => (None, 0.0),
        }
    }

    /// (raw, score) for FCF yield. Negative FCF keeps the raw value and
    /// scores 0; thresholds are never sector-adjusted here.
    fn fcf_yield_score(
        &self,
        snapshot: &FundamentalSnapshot,
        thresholds: &FundamentalThresholds,
    ) -> (Option<f64>, f64) {
        match (snapshot.free_cash_flow, snapshot.market_cap) {
            (Some(fcf), Some(market_cap)) if market_cap > 0 => {
                let yield_ratio = fcf as f64 / market_cap as f64;
                if yield_ratio <= 0.0 {
                    (Some(yield_ratio), 0.0)
                } else {
                    (
                        Some(yield_ratio),
                        score_higher_better(yield_ratio, &thresholds.fcf_yield),
                    )
                }
            }
            _ => (None, 0.0),
        }
    }

    /// Score one snapshot against sector-adjusted thresholds. Pure apart
    /// from logging; exposed for the composite pipeline and tests.
    pub fn score_snapshot(
        &self,
        snapshot: &FundamentalSnapshot,
        sector: Option<&str>,
        staleness_impact: f64,
    ) -> Vec<SubScore> {
        let adjusted = self.sector_engine.adjust_thresholds(&self.thresholds, sector);
        let weights = self.sector_adjusted_weights(sector);

        let (pe_raw, pe) = self.pe_score(snapshot, &adjusted);
        let (ev_raw, ev) = self.ev_ebitda_score(snapshot, &adjusted);
        let (peg_raw, peg) = self.peg_score(snapshot, &adjusted);
        let (fcf_raw, fcf) = self.fcf_yield_score(snapshot, &adjusted);

        vec![
            SubScore {
                metric: "pe_ratio".to_string(),
                raw: pe_raw,
                score: pe * staleness_impact,
                weight: weights[0].1,
            },
            SubScore {
                metric: "ev_ebitda".to_string(),
                raw: ev_raw,
                score: ev * staleness_impact,
                weight: weights[1].1,
            },
            SubScore {
                metric: "peg_ratio".to_string(),
                raw: peg_raw,
                score: peg * staleness_impact,
                weight: weights[2].1,
            },
            SubScore {
                metric: "fcf_yield".to_string(),
                raw: fcf_raw,
                score: fcf * staleness_impact,
                weight: weights[3].1,
            },
        ]
    }

    /// Compute the component metrics for one symbol, or None when no
    /// usable fundamental data is available.
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
        for warning in &versioned.info.staleness_warnings {
            tracing::warn!("{}: {}", symbol, warning);
        }

        let subscores =
            self.score_snapshot(&snapshot, sector.as_deref(), versioned.staleness_impact);
        let pairs: Vec<(f64, f64)> = subscores.iter().map(|s| (s.score, s.weight)).collect();
        let Some(score) = weighted_composite(&pairs) else {
            tracing::warn!("no valid fundamental metrics for {}", symbol);
            return Ok(None);
        };

        let valid = subscores.iter().filter(|s| s.score > 0.0).count();
        let completeness = valid as f64 / subscores.len() as f64;
        let data_quality =
            (completeness * versioned.info.quality_score).clamp(0.0, 1.0);

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
