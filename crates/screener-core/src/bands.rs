//! Shared piecewise-linear band scoring used by the ratio scorers.
//!
//! Each metric has five thresholds; values map onto 0-100 with linear
//! interpolation inside each band and capped linear extensions beyond
//! the excellent / very_poor ends.

use serde::{Deserialize, Serialize};

/// Threshold set for one scored metric. For lower-is-better metrics the
/// values ascend (excellent < good < ...); for higher-is-better metrics
/// they descend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringBands {
    pub excellent: f64,
    pub good: f64,
    pub average: f64,
    pub poor: f64,
    pub very_poor: f64,
}

impl ScoringBands {
    pub fn new(excellent: f64, good: f64, average: f64, poor: f64, very_poor: f64) -> Self {
        Self {
            excellent,
            good,
            average,
            poor,
            very_poor,
        }
    }

    /// Multiply every threshold by a sector factor.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            excellent: self.excellent * factor,
            good: self.good * factor,
            average: self.average * factor,
            poor: self.poor * factor,
            very_poor: self.very_poor * factor,
        }
    }
}

/// Score a metric where lower values are better (P/E, EV/EBITDA, PEG,
/// debt/equity). `overflow_scale` controls how quickly the score decays
/// past the very_poor threshold.
pub fn score_lower_better(value: f64, bands: &ScoringBands, overflow_scale: f64) -> f64 {
    let b = bands;
    let score = if value < b.excellent {
        let boost = (b.excellent - value) / b.excellent * 10.0;
        (90.0 + boost).clamp(90.0, 100.0)
    } else if value < b.good {
        70.0 + (b.good - value) / (b.good - b.excellent) * 20.0
    } else if value < b.average {
        50.0 + (b.average - value) / (b.average - b.good) * 20.0
    } else if value < b.poor {
        30.0 + (b.poor - value) / (b.poor - b.average) * 20.0
    } else if value < b.very_poor {
        10.0 + (b.very_poor - value) / (b.very_poor - b.poor) * 20.0
    } else {
        10.0 - (value - b.very_poor) / overflow_scale
    };
    score.clamp(0.0, 100.0)
}

/// Score a metric where higher values are better (FCF yield, ROE, ROIC,
/// growth rates). Thresholds descend from excellent to very_poor.
pub fn score_higher_better(value: f64, bands: &ScoringBands) -> f64 {
    let b = bands;
    let score = if value > b.excellent {
        let boost = ((value - b.excellent) / b.excellent.abs().max(f64::EPSILON) * 20.0).min(10.0);
        90.0 + boost
    } else if value > b.good {
        70.0 + (value - b.good) / (b.excellent - b.good) * 20.0
    } else if value > b.average {
        50.0 + (value - b.average) / (b.good - b.average) * 20.0
    } else if value > b.poor {
        30.0 + (value - b.poor) / (b.average - b.poor) * 20.0
    } else if value > b.very_poor {
        10.0 + (value - b.very_poor) / (b.poor - b.very_poor) * 20.0
    } else if b.poor.abs() > f64::EPSILON {
        value / b.poor * 10.0
    } else {
        0.0
    };
    score.clamp(0.0, 100.0)
}

/// Redistribute weights across the subscores that produced a usable value
/// (score > 0), then combine. Returns None when nothing scored.
pub fn weighted_composite(scores_and_weights: &[(f64, f64)]) -> Option<f64> {
    let valid: Vec<(f64, f64)> = scores_and_weights
        .iter()
        .copied()
        .filter(|(score, _)| *score > 0.0)
        .collect();
    if valid.is_empty() {
        return None;
    }
    let total_weight: f64 = valid.iter().map(|(_, w)| w).sum();
    if total_weight <= 0.0 {
        return None;
    }
    Some(
        valid
            .iter()
            .map(|(score, weight)| score * weight / total_weight)
            .sum(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pe_bands() -> ScoringBands {
        ScoringBands::new(15.0, 20.0, 25.0, 35.0, 50.0)
    }

    fn fcf_bands() -> ScoringBands {
        ScoringBands::new(0.08, 0.05, 0.03, 0.01, 0.0)
    }

    #[test]
    fn lower_better_band_placement() {
        let b = pe_bands();
        assert!(score_lower_better(10.0, &b, 10.0) >= 90.0);
        let good = score_lower_better(18.0, &b, 10.0);
        assert!((70.0..90.0).contains(&good), "got {}", good);
        let average = score_lower_better(22.0, &b, 10.0);
        assert!((50.0..70.0).contains(&average), "got {}", average);
        let poor = score_lower_better(30.0, &b, 10.0);
        assert!((30.0..50.0).contains(&poor), "got {}", poor);
        let very_poor = score_lower_better(40.0, &b, 10.0);
        assert!((10.0..30.0).contains(&very_poor), "got {}", very_poor);
        assert!(score_lower_better(200.0, &b, 10.0) == 0.0);
    }

    #[test]
    fn lower_better_is_monotone_decreasing() {
        let b = pe_bands();
        let mut last = f64::MAX;
        for pe in [5.0, 12.0, 16.0, 19.0, 22.0, 28.0, 40.0, 60.0, 120.0] {
            let s = score_lower_better(pe, &b, 10.0);
            assert!(s <= last, "score increased at pe={}", pe);
            last = s;
        }
    }

    #[test]
    fn higher_better_band_placement() {
        let b = fcf_bands();
        assert!(score_higher_better(0.10, &b) >= 90.0);
        let good = score_higher_better(0.06, &b);
        assert!((70.0..90.0).contains(&good), "got {}", good);
        let average = score_higher_better(0.04, &b);
        assert!((50.0..70.0).contains(&average), "got {}", average);
        assert_eq!(score_higher_better(-0.05, &b), 0.0);
    }

    #[test]
    fn scores_stay_in_range() {
        let b = pe_bands();
        for v in [-10.0, 0.0, 0.001, 14.999, 50.0, 1e6] {
            let s = score_lower_better(v, &b, 10.0);
            assert!((0.0..=100.0).contains(&s), "pe {} -> {}", v, s);
        }
        let h = fcf_bands();
        for v in [-1.0, 0.0, 0.005, 0.08, 5.0] {
            let s = score_higher_better(v, &h);
            assert!((0.0..=100.0).contains(&s), "fcf {} -> {}", v, s);
        }
    }

    #[test]
    fn sector_scaling_moves_thresholds() {
        let base = pe_bands();
        let tech = base.scaled(1.4);
        // A P/E of 30 is "poor" on the base bands but "average" after the
        // 1.4x tech adjustment, so the adjusted score must be higher.
        assert!(
            score_lower_better(30.0, &tech, 10.0) > score_lower_better(30.0, &base, 10.0)
        );
    }

    #[test]
    fn composite_redistributes_dropped_weight() {
        // Two valid scores with weights 0.3/0.2: redistributed to 0.6/0.4.
        let composite = weighted_composite(&[(80.0, 0.3), (50.0, 0.2), (0.0, 0.5)]).unwrap();
        assert!((composite - (80.0 * 0.6 + 50.0 * 0.4)).abs() < 1e-9);
    }

    #[test]
    fn composite_empty_when_all_invalid() {
        assert!(weighted_composite(&[(0.0, 0.5), (0.0, 0.5)]).is_none());
    }
}
