//! Composite aggregation: combine the four component scores under
//! configured weights, dropping components whose data quality falls below
//! the floor and renormalizing the rest. Pure: given the same inputs and
//! config the output is deterministic; persistence happens elsewhere.

use chrono::NaiveDate;
use screener_core::{CalculatedMetrics, ComponentMetrics, ScreenerError};
use serde::{Deserialize, Serialize};

pub const METHODOLOGY_VERSION: &str = "v1.0";

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CompositeWeights {
    pub fundamental: f64,
    pub quality: f64,
    pub growth: f64,
    pub sentiment: f64,
}

impl Default for CompositeWeights {
    fn default() -> Self {
        Self {
            fundamental: 0.40,
            quality: 0.25,
            growth: 0.20,
            sentiment: 0.15,
        }
    }
}

impl CompositeWeights {
    pub fn sum(&self) -> f64 {
        self.fundamental + self.quality + self.growth + self.sentiment
    }

    /// Weights must sum to 1.0 within a 0.001 tolerance, each in [0, 1].
    pub fn validate(&self) -> Result<(), ScreenerError> {
        let entries = [
            ("fundamental", self.fundamental),
            ("quality", self.quality),
            ("growth", self.growth),
            ("sentiment", self.sentiment),
        ];
        for (name, weight) in entries {
            if !(0.0..=1.0).contains(&weight) {
                return Err(ScreenerError::Config(format!(
                    "component weight {name} out of range: {weight}"
                )));
            }
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > 0.001 {
            return Err(ScreenerError::Config(format!(
                "component weights must sum to 1.0 (current: {sum:.3})"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeConfig {
    pub weights: CompositeWeights,
    /// Components below this data quality are dropped before combining.
    pub min_component_quality: f64,
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            weights: CompositeWeights::default(),
            min_component_quality: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierCategory {
    Undervalued,
    FairlyValued,
    Overvalued,
    InsufficientData,
}

/// The four component results feeding one composite.
#[derive(Debug, Clone, Default)]
pub struct ComponentInputs {
    pub fundamental: Option<ComponentMetrics>,
    pub quality: Option<ComponentMetrics>,
    pub growth: Option<ComponentMetrics>,
    pub sentiment: Option<ComponentMetrics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompositeResult {
    pub symbol: String,
    pub calculation_date: NaiveDate,
    pub sector: Option<String>,
    pub fundamental_score: Option<f64>,
    pub quality_score: Option<f64>,
    pub growth_score: Option<f64>,
    pub sentiment_score: Option<f64>,
    pub composite_score: Option<f64>,
    pub data_quality: f64,
    pub sector_percentile: Option<f64>,
    pub confidence_interval_lower: Option<f64>,
    pub confidence_interval_upper: Option<f64>,
    pub category: OutlierCategory,
    pub dropped_components: Vec<&'static str>,
}

impl CompositeResult {
    pub fn to_calculated_metrics(&self) -> CalculatedMetrics {
        CalculatedMetrics {
            symbol: self.symbol.clone(),
            calculation_date: self.calculation_date,
            fundamental_score: self.fundamental_score,
            quality_score: self.quality_score,
            growth_score: self.growth_score,
            sentiment_score: self.sentiment_score,
            composite_score: self.composite_score,
            sector_percentile: self.sector_percentile,
            confidence_interval_lower: self.confidence_interval_lower,
            confidence_interval_upper: self.confidence_interval_upper,
            methodology_version: METHODOLOGY_VERSION.to_string(),
        }
    }
}

/// Percentile of `score` among same-sector cohort entries (symbol, sector,
/// composite). A cohort of one ranks at the median.
pub fn sector_percentile(
    symbol: &str,
    sector: Option<&str>,
    score: f64,
    cohort: &[(String, Option<String>, f64)],
) -> f64 {
    let peers: Vec<f64> = cohort
        .iter()
        .filter(|(peer, peer_sector, _)| {
            peer != symbol && peer_sector.as_deref() == sector
        })
        .map(|(_, _, peer_score)| *peer_score)
        .collect();
    if peers.is_empty() {
        return 50.0;
    }
    let below = peers.iter().filter(|peer| **peer < score).count();
    let equal = peers.iter().filter(|peer| (**peer - score).abs() < 1e-9).count();
    ((below as f64 + equal as f64 * 0.5) / peers.len() as f64 * 100.0).clamp(0.0, 100.0)
}

fn categorize(composite: f64, percentile: f64) -> OutlierCategory {
    if composite >= 70.0 && percentile >= 75.0 {
        OutlierCategory::Undervalued
    } else if composite <= 35.0 && percentile <= 25.0 {
        OutlierCategory::Overvalued
    } else {
        OutlierCategory::FairlyValued
    }
}

pub struct CompositeAggregator {
    config: CompositeConfig,
}

impl CompositeAggregator {
    pub fn new(config: CompositeConfig) -> Result<Self, ScreenerError> {
        config.weights.validate()?;
        Ok(Self { config })
    }

    pub fn with_defaults() -> Self {
        Self {
            config: CompositeConfig::default(),
        }
    }

    /// Combine the component results for one symbol, ranking against the
    /// supplied cohort of (symbol, sector, composite) entries.
    pub fn aggregate(
        &self,
        symbol: &str,
        calculation_date: NaiveDate,
        inputs: &ComponentInputs,
        cohort: &[(String, Option<String>, f64)],
    ) -> CompositeResult {
        let weights = self.config.weights;
        let candidates: [(&'static str, Option<&ComponentMetrics>, f64); 4] = [
            ("fundamental", inputs.fundamental.as_ref(), weights.fundamental),
            ("quality", inputs.quality.as_ref(), weights.quality),
            ("growth", inputs.growth.as_ref(), weights.growth),
            ("sentiment", inputs.sentiment.as_ref(), weights.sentiment),
        ];

        let sector = candidates
            .iter()
            .filter_map(|(_, metrics, _)| metrics.as_ref().and_then(|m| m.sector.clone()))
            .next();

        let mut surviving: Vec<(&'static str, f64, f64, f64)> = Vec::new();
        let mut dropped = Vec::new();
        for (name, metrics, weight) in &candidates {
            match metrics {
                Some(m) if m.data_quality >= self.config.min_component_quality => {
                    surviving.push((*name, m.score, m.data_quality, *weight));
                }
                Some(m) => {
                    tracing::debug!(
                        "{symbol}: dropping {name} (quality {:.2} below floor {:.2})",
                        m.data_quality,
                        self.config.min_component_quality
                    );
                    dropped.push(*name);
                }
                None => dropped.push(*name),
            }
        }

        let score_of = |name: &str| {
            surviving
                .iter()
                .find(|(n, _, _, _)| *n == name)
                .map(|(_, score, _, _)| *score)
        };

        if surviving.is_empty() {
            return CompositeResult {
                symbol: symbol.to_string(),
                calculation_date,
                sector,
                fundamental_score: None,
                quality_score: None,
                growth_score: None,
                sentiment_score: None,
                composite_score: None,
                data_quality: 0.0,
                sector_percentile: None,
                confidence_interval_lower: None,
                confidence_interval_upper: None,
                category: OutlierCategory::InsufficientData,
                dropped_components: dropped,
            };
        }

        let total_weight: f64 = surviving.iter().map(|(_, _, _, w)| w).sum();
        let composite: f64 = surviving
            .iter()
            .map(|(_, score, _, w)| score * w / total_weight)
            .sum();
        let data_quality: f64 = surviving
            .iter()
            .map(|(_, _, quality, w)| quality * w / total_weight)
            .sum();

        // Confidence width widens with poor quality and with disagreement
        // between the surviving components
        let mean_score = surviving.iter().map(|(_, s, _, _)| s).sum::<f64>()
            / surviving.len() as f64;
        let dispersion = (surviving
            .iter()
            .map(|(_, s, _, _)| (s - mean_score).powi(2))
            .sum::<f64>()
            / surviving.len() as f64)
            .sqrt();
        let half_width = ((1.0 - data_quality) * 20.0 + dispersion * 0.5).clamp(2.0, 25.0);

        let percentile = sector_percentile(symbol, sector.as_deref(), composite, cohort);

        CompositeResult {
            symbol: symbol.to_string(),
            calculation_date,
            sector,
            fundamental_score: score_of("fundamental"),
            quality_score: score_of("quality"),
            growth_score: score_of("growth"),
            sentiment_score: score_of("sentiment"),
            composite_score: Some(composite),
            data_quality,
            sector_percentile: Some(percentile),
            confidence_interval_lower: Some((composite - half_width).max(0.0)),
            confidence_interval_upper: Some((composite + half_width).min(100.0)),
            category: categorize(composite, percentile),
            dropped_components: dropped,
        }
    }
}
