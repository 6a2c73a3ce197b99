//! Sector-aware scoring adjustments. Each canonical GICS sector carries a
//! profile of multiplicative threshold adjustments plus an FCF weighting
//! focus; outlier detection needs this context to tell genuine mispricing
//! from normal sector valuation patterns.

use screener_core::ScoringBands;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrowthExpectation {
    High,
    Medium,
    Low,
}

/// Sector-specific adjustment profile.
#[derive(Debug, Clone, Serialize)]
pub struct SectorProfile {
    pub name: &'static str,
    pub pe_multiplier: f64,
    pub ev_ebitda_multiplier: f64,
    pub peg_multiplier: f64,
    /// FCF weighting focus; applied to the scorer's weight, not the
    /// thresholds.
    pub fcf_focus: f64,
    pub growth_expectation: GrowthExpectation,
}

/// Base threshold set the fundamental scorer hands in for adjustment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FundamentalThresholds {
    pub pe_ratio: ScoringBands,
    pub ev_ebitda: ScoringBands,
    pub peg_ratio: ScoringBands,
    pub fcf_yield: ScoringBands,
}

const PROFILES: &[SectorProfile] = &[
    SectorProfile {
        name: "Technology",
        pe_multiplier: 1.4,
        ev_ebitda_multiplier: 1.3,
        peg_multiplier: 1.2,
        fcf_focus: 1.1,
        growth_expectation: GrowthExpectation::High,
    },
    SectorProfile {
        name: "Financials",
        pe_multiplier: 0.8,
        ev_ebitda_multiplier: 0.7,
        peg_multiplier: 0.9,
        fcf_focus: 0.8,
        growth_expectation: GrowthExpectation::Low,
    },
    SectorProfile {
        name: "Healthcare",
        pe_multiplier: 1.2,
        ev_ebitda_multiplier: 1.15,
        peg_multiplier: 1.1,
        fcf_focus: 1.0,
        growth_expectation: GrowthExpectation::Medium,
    },
    SectorProfile {
        name: "Consumer Discretionary",
        pe_multiplier: 1.1,
        ev_ebitda_multiplier: 1.1,
        peg_multiplier: 1.0,
        fcf_focus: 1.0,
        growth_expectation: GrowthExpectation::Medium,
    },
    SectorProfile {
        name: "Consumer Staples",
        pe_multiplier: 1.0,
        ev_ebitda_multiplier: 1.0,
        peg_multiplier: 0.9,
        fcf_focus: 1.1,
        growth_expectation: GrowthExpectation::Low,
    },
    SectorProfile {
        name: "Industrials",
        pe_multiplier: 0.95,
        ev_ebitda_multiplier: 1.0,
        peg_multiplier: 0.95,
        fcf_focus: 1.0,
        growth_expectation: GrowthExpectation::Medium,
    },
    SectorProfile {
        name: "Energy",
        pe_multiplier: 0.7,
        ev_ebitda_multiplier: 0.8,
        peg_multiplier: 0.6,
        fcf_focus: 1.2,
        growth_expectation: GrowthExpectation::Low,
    },
    SectorProfile {
        name: "Utilities",
        pe_multiplier: 0.9,
        ev_ebitda_multiplier: 0.9,
        peg_multiplier: 0.8,
        fcf_focus: 1.15,
        growth_expectation: GrowthExpectation::Low,
    },
    SectorProfile {
        name: "Materials",
        pe_multiplier: 0.85,
        ev_ebitda_multiplier: 0.9,
        peg_multiplier: 0.8,
        fcf_focus: 1.0,
        growth_expectation: GrowthExpectation::Low,
    },
    SectorProfile {
        name: "Communication Services",
        pe_multiplier: 1.3,
        ev_ebitda_multiplier: 1.2,
        peg_multiplier: 1.15,
        fcf_focus: 1.0,
        growth_expectation: GrowthExpectation::High,
    },
    SectorProfile {
        name: "Real Estate",
        pe_multiplier: 0.8,
        ev_ebitda_multiplier: 0.7,
        peg_multiplier: 0.8,
        fcf_focus: 1.3,
        growth_expectation: GrowthExpectation::Low,
    },
];

/// Lowercase substring -> canonical sector name, tried in order after an
/// exact-key miss.
const ALIASES: &[(&str, &str)] = &[
    ("tech", "Technology"),
    ("information technology", "Technology"),
    ("software", "Technology"),
    ("semiconductor", "Technology"),
    ("financial", "Financials"),
    ("banks", "Financials"),
    ("insurance", "Financials"),
    ("health", "Healthcare"),
    ("pharmaceutical", "Healthcare"),
    ("biotech", "Healthcare"),
    ("medical", "Healthcare"),
    ("consumer cyclical", "Consumer Discretionary"),
    ("consumer defensive", "Consumer Staples"),
    ("staples", "Consumer Staples"),
    ("consumer", "Consumer Discretionary"),
    ("retail", "Consumer Discretionary"),
    ("industrial", "Industrials"),
    ("manufacturing", "Industrials"),
    ("oil", "Energy"),
    ("gas", "Energy"),
    ("petroleum", "Energy"),
    ("utility", "Utilities"),
    ("electric", "Utilities"),
    ("power", "Utilities"),
    ("material", "Materials"),
    ("mining", "Materials"),
    ("chemical", "Materials"),
    ("telecom", "Communication Services"),
    ("media", "Communication Services"),
    ("internet", "Communication Services"),
    ("reit", "Real Estate"),
    ("property", "Real Estate"),
];

#[derive(Debug, Clone, Default)]
pub struct SectorAdjustmentEngine;

impl SectorAdjustmentEngine {
    pub fn new() -> Self {
        Self
    }

    fn default_profile(&self) -> SectorProfile {
        SectorProfile {
            name: "Default",
            pe_multiplier: 1.0,
            ev_ebitda_multiplier: 1.0,
            peg_multiplier: 1.0,
            fcf_focus: 1.0,
            growth_expectation: GrowthExpectation::Medium,
        }
    }

    /// Profile lookup with fuzzy fallback: exact match first, then
    /// lowercase-substring aliases, then the balanced default.
    pub fn profile(&self, sector: Option<&str>) -> SectorProfile {
        let Some(sector) = sector.filter(|s| !s.is_empty()) else {
            return self.default_profile();
        };

        if let Some(profile) = PROFILES.iter().find(|p| p.name == sector) {
            return profile.clone();
        }

        let lowered = sector.to_lowercase();
        for (needle, canonical) in ALIASES {
            if lowered.contains(needle) {
                tracing::debug!("fuzzy matched sector {:?} to {:?}", sector, canonical);
                return PROFILES
                    .iter()
                    .find(|p| p.name == *canonical)
                    .cloned()
                    .unwrap_or_else(|| self.default_profile());
            }
        }

        tracing::warn!("unknown sector {:?}, using default profile", sector);
        self.default_profile()
    }

    /// Multiply the pe/ev_ebitda/peg threshold groups by the sector's
    /// multipliers. FCF thresholds are untouched; the FCF effect goes
    /// through the weight instead.
    pub fn adjust_thresholds(
        &self,
        base: &FundamentalThresholds,
        sector: Option<&str>,
    ) -> FundamentalThresholds {
        let profile = self.profile(sector);
        FundamentalThresholds {
            pe_ratio: base.pe_ratio.scaled(profile.pe_multiplier),
            ev_ebitda: base.ev_ebitda.scaled(profile.ev_ebitda_multiplier),
            peg_ratio: base.peg_ratio.scaled(profile.peg_multiplier),
            fcf_yield: base.fcf_yield,
        }
    }

    pub fn fcf_weight_multiplier(&self, sector: Option<&str>) -> f64 {
        self.profile(sector).fcf_focus
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_thresholds() -> FundamentalThresholds {
        FundamentalThresholds {
            pe_ratio: ScoringBands::new(15.0, 20.0, 25.0, 35.0, 50.0),
            ev_ebitda: ScoringBands::new(10.0, 15.0, 20.0, 30.0, 40.0),
            peg_ratio: ScoringBands::new(0.5, 1.0, 1.5, 2.0, 3.0),
            fcf_yield: ScoringBands::new(0.08, 0.05, 0.03, 0.01, 0.0),
        }
    }

    #[test]
    fn exact_sector_lookup() {
        let engine = SectorAdjustmentEngine::new();
        let tech = engine.profile(Some("Technology"));
        assert_eq!(tech.pe_multiplier, 1.4);
        assert_eq!(tech.growth_expectation, GrowthExpectation::High);
    }

    #[test]
    fn fuzzy_matching_maps_variants() {
        let engine = SectorAdjustmentEngine::new();
        assert_eq!(engine.profile(Some("tech")).name, "Technology");
        assert_eq!(engine.profile(Some("Biotech & Pharma")).name, "Healthcare");
        assert_eq!(engine.profile(Some("Oil & Gas Midstream")).name, "Energy");
        assert_eq!(engine.profile(Some("Equity REIT")).name, "Real Estate");
    }

    #[test]
    fn unknown_or_missing_sector_gets_default() {
        let engine = SectorAdjustmentEngine::new();
        let unknown = engine.profile(Some("Quantum Widgets"));
        assert_eq!(unknown.name, "Default");
        assert_eq!(unknown.pe_multiplier, 1.0);
        assert_eq!(engine.profile(None).name, "Default");
    }

    #[test]
    fn threshold_adjustment_scales_valuation_groups_only() {
        let engine = SectorAdjustmentEngine::new();
        let adjusted = engine.adjust_thresholds(&base_thresholds(), Some("Technology"));
        assert!((adjusted.pe_ratio.excellent - 21.0).abs() < 1e-9);
        assert!((adjusted.ev_ebitda.good - 19.5).abs() < 1e-9);
        assert!((adjusted.peg_ratio.average - 1.8).abs() < 1e-9);
        // FCF thresholds untouched
        assert!((adjusted.fcf_yield.excellent - 0.08).abs() < 1e-9);
    }

    #[test]
    fn utilities_tighten_pe_thresholds() {
        let engine = SectorAdjustmentEngine::new();
        let adjusted = engine.adjust_thresholds(&base_thresholds(), Some("Utilities"));
        assert!(adjusted.pe_ratio.good < base_thresholds().pe_ratio.good);
    }

    #[test]
    fn fcf_weight_multiplier_comes_from_profile() {
        let engine = SectorAdjustmentEngine::new();
        assert!((engine.fcf_weight_multiplier(Some("Real Estate")) - 1.3).abs() < 1e-9);
        assert!((engine.fcf_weight_multiplier(Some("Financials")) - 0.8).abs() < 1e-9);
        assert!((engine.fcf_weight_multiplier(None) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn consumer_aliases_resolve_before_generic_consumer() {
        let engine = SectorAdjustmentEngine::new();
        assert_eq!(
            engine.profile(Some("Consumer Defensive")).name,
            "Consumer Staples"
        );
        assert_eq!(
            engine.profile(Some("Consumer Cyclical")).name,
            "Consumer Discretionary"
        );
    }
}
