//! End-state portfolio scoring.
//!
//! Scores a candidate terminal portfolio (the state a planner sequence would
//! leave the account in) as a weighted blend of total return, diversification,
//! long-term promise, stability, and analyst opinion. Weights are selected by
//! a risk profile chosen at bootstrap.

use std::collections::HashMap;

fn clip(value: f64, min_value: f64, max_value: f64) -> f64 {
    value.max(min_value).min(max_value)
}

/// The metrics an end-state score is computed from, keyed by a closed enum
/// rather than free-form strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKey {
    Cagr5y,
    DividendYield,
    ConsistencyScore,
    FinancialStrength,
    DividendConsistency,
    Sortino,
    VolatilityAnnual,
    MaxDrawdown,
    Sharpe,
}

#[derive(Debug, Clone, Default)]
pub struct MetricSet(pub HashMap<MetricKey, f64>);

impl MetricSet {
    pub fn get(&self, key: MetricKey) -> Option<f64> {
        self.0.get(&key).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskProfile {
    Conservative,
    Balanced,
    Aggressive,
}

struct EndStateWeights {
    total_return: f64,
    diversification: f64,
    long_term_promise: f64,
    stability: f64,
    opinion: f64,
}

fn weights_for(profile: RiskProfile) -> EndStateWeights {
    match profile {
        RiskProfile::Conservative => EndStateWeights {
            total_return: 0.25,
            diversification: 0.30,
            long_term_promise: 0.20,
            stability: 0.20,
            opinion: 0.05,
        },
        RiskProfile::Balanced => EndStateWeights {
            total_return: 0.35,
            diversification: 0.25,
            long_term_promise: 0.20,
            stability: 0.15,
            opinion: 0.05,
        },
        RiskProfile::Aggressive => EndStateWeights {
            total_return: 0.45,
            diversification: 0.20,
            long_term_promise: 0.25,
            stability: 0.05,
            opinion: 0.05,
        },
    }
}

/// Maps an annualized CAGR+yield figure into [0,1]. 0% or below scores 0;
/// 25% or above scores 1; linear in between.
fn score_total_return(cagr_plus_yield: f64) -> f64 {
    clip(cagr_plus_yield / 0.25, 0.0, 1.0)
}

fn sortino_score(sortino: f64) -> f64 {
    if sortino >= 2.0 {
        1.0
    } else if sortino >= 1.5 {
        0.8 + (sortino - 1.5) / 0.5 * 0.2
    } else if sortino >= 1.0 {
        0.6 + (sortino - 1.0) / 0.5 * 0.2
    } else if sortino >= 0.0 {
        sortino * 0.6
    } else {
        0.0
    }
}

/// Derive dividend consistency from a payout ratio when not supplied
/// directly. Flat 1.0 in [0.30, 0.60], ramping on either side, flat 0.4
/// above 0.80 (boundary inclusive on the decreasing ramp, per the system
/// this was ported from: `payout <= 0.80` still uses the ramp).
fn dividend_consistency_from_payout(payout: f64) -> f64 {
    if payout < 0.0 {
        return 0.4;
    }
    if payout < 0.30 {
        return clip(0.4 + (payout / 0.30) * 0.6, 0.0, 1.0);
    }
    if payout <= 0.60 {
        return 1.0;
    }
    if payout <= 0.80 {
        return clip(1.0 - (payout - 0.60) / 0.20 * 0.6, 0.0, 1.0);
    }
    0.4
}

fn volatility_score(vol_annual: f64) -> f64 {
    if vol_annual <= 0.15 {
        1.0
    } else if vol_annual >= 0.40 {
        0.1
    } else {
        1.0 - (vol_annual - 0.15) / 0.25 * 0.9
    }
}

fn drawdown_score(max_drawdown_abs: f64) -> f64 {
    if max_drawdown_abs <= 0.10 {
        1.0
    } else if max_drawdown_abs >= 0.50 {
        0.0
    } else {
        1.0 - (max_drawdown_abs - 0.10) / 0.40
    }
}

fn sharpe_score(sharpe: f64) -> f64 {
    if sharpe >= 2.0 {
        1.0
    } else if sharpe >= 1.0 {
        0.7 + (sharpe - 1.0) * 0.3
    } else if sharpe >= 0.5 {
        0.4 + (sharpe - 0.5) / 0.5 * 0.3
    } else if sharpe >= 0.0 {
        sharpe * 0.8
    } else {
        0.0
    }
}

fn long_term_promise(metrics: &MetricSet) -> f64 {
    let consistency = metrics.get(MetricKey::ConsistencyScore).unwrap_or(0.5);
    let financial_strength = metrics.get(MetricKey::FinancialStrength).unwrap_or(0.5);
    let dividend_consistency = metrics
        .get(MetricKey::DividendConsistency)
        .unwrap_or_else(|| dividend_consistency_from_payout(0.45));
    let sortino = metrics.get(MetricKey::Sortino).map(sortino_score).unwrap_or(0.5);

    0.35 * consistency + 0.25 * financial_strength + 0.25 * dividend_consistency + 0.15 * sortino
}

fn stability(metrics: &MetricSet) -> f64 {
    let volatility = metrics
        .get(MetricKey::VolatilityAnnual)
        .map(volatility_score)
        .unwrap_or(0.5);
    let drawdown = metrics
        .get(MetricKey::MaxDrawdown)
        .map(|dd| drawdown_score(dd.abs()))
        .unwrap_or(0.5);
    let sharpe = metrics.get(MetricKey::Sharpe).map(sharpe_score).unwrap_or(0.5);

    0.50 * volatility + 0.30 * drawdown + 0.20 * sharpe
}

fn total_return(metrics: &MetricSet) -> f64 {
    let cagr = metrics.get(MetricKey::Cagr5y).unwrap_or(0.0);
    let yield_ = metrics.get(MetricKey::DividendYield).unwrap_or(0.0);
    score_total_return(cagr + yield_)
}

/// A scorer that reads per-entity metrics and produces sub-scores and the
/// weighted end-state total. One method per sub-score rather than reflection
/// over string keys.
pub struct Scorer {
    profile: RiskProfile,
}

impl Scorer {
    pub fn new(profile: RiskProfile) -> Self {
        Self { profile }
    }

    /// Compute the end-state score for a candidate terminal portfolio.
    /// `positions` maps symbol to EUR market value; `metrics` maps symbol to
    /// its metric set; `diversification_score` is precomputed by the caller
    /// (it depends on sector/geography concentration across the whole
    /// portfolio, not any one symbol).
    pub fn score_portfolio(
        &self,
        positions: &HashMap<String, f64>,
        total_value: f64,
        diversification_score: f64,
        metrics_cache: &HashMap<String, MetricSet>,
        opinion_score: f64,
    ) -> f64 {
        if total_value <= 0.0 || positions.is_empty() {
            return 0.0;
        }

        let empty = MetricSet::default();
        let mut weighted_return = 0.0;
        let mut weighted_promise = 0.0;
        let mut weighted_stability = 0.0;

        for (symbol, value) in positions {
            let weight = value / total_value;
            let metrics = metrics_cache.get(symbol).unwrap_or(&empty);
            weighted_return += weight * total_return(metrics);
            weighted_promise += weight * long_term_promise(metrics);
            weighted_stability += weight * stability(metrics);
        }

        let weights = weights_for(self.profile);
        weights.total_return * weighted_return
            + weights.diversification * clip(diversification_score, 0.0, 1.0)
            + weights.long_term_promise * weighted_promise
            + weights.stability * weighted_stability
            + weights.opinion * clip(opinion_score, 0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dividend_consistency_boundary_at_080_still_ramps() {
        let just_under = dividend_consistency_from_payout(0.80);
        let just_over = dividend_consistency_from_payout(0.8001);
        assert!(just_under > 0.4);
        assert_eq!(just_over, 0.4);
    }

    #[test]
    fn dividend_consistency_flat_in_middle_band() {
        assert_eq!(dividend_consistency_from_payout(0.45), 1.0);
        assert_eq!(dividend_consistency_from_payout(0.30), 1.0);
        assert_eq!(dividend_consistency_from_payout(0.60), 1.0);
    }

    #[test]
    fn missing_metrics_default_sensibly() {
        let metrics = MetricSet::default();
        assert_eq!(total_return(&metrics), 0.0);
        assert_eq!(long_term_promise(&metrics), 0.35 * 0.5 + 0.25 * 0.5 + 0.25 * 1.0 + 0.15 * 0.5);
    }

    #[test]
    fn aggressive_profile_weights_return_more_than_conservative() {
        let aggressive = weights_for(RiskProfile::Aggressive);
        let conservative = weights_for(RiskProfile::Conservative);
        assert!(aggressive.total_return > conservative.total_return);
        assert!(aggressive.stability < conservative.stability);
    }

    #[test]
    fn score_portfolio_is_weighted_average_across_positions() {
        let scorer = Scorer::new(RiskProfile::Balanced);
        let mut positions = HashMap::new();
        positions.insert("A".to_string(), 600.0);
        positions.insert("B".to_string(), 400.0);

        let mut metrics_a = HashMap::new();
        metrics_a.insert(MetricKey::Cagr5y, 0.10);
        let mut metrics_b = HashMap::new();
        metrics_b.insert(MetricKey::Cagr5y, 0.20);

        let mut cache = HashMap::new();
        cache.insert("A".to_string(), MetricSet(metrics_a));
        cache.insert("B".to_string(), MetricSet(metrics_b));

        let score = scorer.score_portfolio(&positions, 1000.0, 0.5, &cache, 0.5);
        assert!(score > 0.0 && score <= 1.0);
    }

    #[test]
    fn empty_portfolio_scores_zero() {
        let scorer = Scorer::new(RiskProfile::Balanced);
        let score = scorer.score_portfolio(&HashMap::new(), 0.0, 0.5, &HashMap::new(), 0.5);
        assert_eq!(score, 0.0);
    }
}
