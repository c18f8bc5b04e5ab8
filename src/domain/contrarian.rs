//! Contrarian signal computation and target-weight builder.
//!
//! RSI, momentum, and volatility are inherently floating-point (they derive
//! from `ln`/`sqrt`), so every computation here works in `f64` and only
//! converts to `Decimal` at the caller's boundary, matching how indicator
//! pipelines are typically built in this codebase.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;

use super::model::{LotClass, Sleeve};

fn clip(value: f64, min_value: f64, max_value: f64) -> f64 {
    value.max(min_value).min(max_value)
}

fn stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Minimum rolling-252 drawdown observed in the most recent `window_days`.
pub fn recent_dd252_min(closes_oldest_first: &[f64], window_days: usize) -> f64 {
    if closes_oldest_first.is_empty() {
        return 0.0;
    }
    let closes = closes_oldest_first;
    let start_idx = closes.len().saturating_sub(window_days.max(1));
    let mut mins = Vec::new();
    for i in start_idx..closes.len() {
        let roll_start = i.saturating_sub(251);
        let roll_max = closes[roll_start..=i].iter().cloned().fold(f64::MIN, f64::max);
        let dd = if roll_max > 0.0 {
            closes[i] / roll_max - 1.0
        } else {
            0.0
        };
        mins.push(dd);
    }
    if mins.is_empty() {
        0.0
    } else {
        mins.into_iter().fold(f64::INFINITY, f64::min)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EventMemoryParams {
    pub cycle_turn: bool,
    pub freefall_block: bool,
    pub recent_dd252_min: f64,
    pub entry_t1_dd: f64,
    pub entry_t3_dd: f64,
    pub max_boost: f64,
}

/// Apply a guarded event-memory boost to a raw opportunity score. The boost
/// only applies while in a confirmed cycle turn, outside a freefall block,
/// and while the recent drawdown trough is at least as deep as `entry_t1_dd`.
pub fn effective_opportunity_score(raw_opp_score: f64, params: EventMemoryParams) -> f64 {
    let raw = clip(raw_opp_score, 0.0, 1.0);
    if params.freefall_block || !params.cycle_turn {
        return raw;
    }
    if params.recent_dd252_min > params.entry_t1_dd {
        return raw;
    }

    let depth_den = (params.entry_t3_dd - params.entry_t1_dd).abs().max(1e-9);
    let depth = clip(
        (params.recent_dd252_min.abs() - params.entry_t1_dd.abs()) / depth_den,
        0.0,
        1.0,
    );
    let boost = params.max_boost * (0.4 + 0.6 * depth);
    clip(raw + boost, 0.0, 1.0)
}

fn rsi14(closes: &[f64]) -> f64 {
    if closes.len() < 15 {
        return 50.0;
    }
    let mut gains = Vec::with_capacity(14);
    let mut losses = Vec::with_capacity(14);
    for i in (closes.len() - 14)..closes.len() {
        let delta = closes[i] - closes[i - 1];
        if delta >= 0.0 {
            gains.push(delta);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(-delta);
        }
    }
    let avg_gain = gains.iter().sum::<f64>() / 14.0;
    let avg_loss = losses.iter().sum::<f64>() / 14.0;
    if avg_loss <= 1e-12 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// Deterministic contrarian metrics computed from a close-price series,
/// oldest first. Series shorter than 130 bars yield a neutral all-zero
/// signal rather than an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContrarianSignal {
    pub dd252: f64,
    pub dd252_recent_min: f64,
    pub rsi14: f64,
    pub mom20: f64,
    pub mom60: f64,
    pub mom120: f64,
    pub vol20: f64,
    pub vol_ratio: f64,
    pub dip_score: f64,
    pub capitulation_score: f64,
    pub cycle_turn: bool,
    pub freefall_block: bool,
    pub opp_score: f64,
    pub core_rank: f64,
}

impl ContrarianSignal {
    fn neutral() -> Self {
        ContrarianSignal {
            rsi14: 50.0,
            vol_ratio: 1.0,
            ..Default::default()
        }
    }
}

pub fn compute_contrarian_signal(closes_oldest_first: &[f64]) -> ContrarianSignal {
    if closes_oldest_first.len() < 130 {
        return ContrarianSignal::neutral();
    }

    let closes = closes_oldest_first;
    let last = closes[closes.len() - 1];
    let rolling_start = closes.len().saturating_sub(252);
    let rolling = &closes[rolling_start..];
    let rolling_max = rolling.iter().cloned().fold(f64::MIN, f64::max);
    let dd252 = if rolling_max > 0.0 {
        last / rolling_max - 1.0
    } else {
        0.0
    };
    let dd252_recent_min = recent_dd252_min(closes, 42);
    let rsi = rsi14(closes);

    let at = |back: usize| closes[closes.len() - 1 - back];
    let mom20 = if at(20) > 0.0 { last / at(20) - 1.0 } else { 0.0 };
    let mom60 = if at(60) > 0.0 { last / at(60) - 1.0 } else { 0.0 };
    let mom120 = if at(120) > 0.0 { last / at(120) - 1.0 } else { 0.0 };

    let returns: Vec<f64> = (1..closes.len())
        .filter(|&i| closes[i - 1] > 0.0 && closes[i] > 0.0)
        .map(|i| (closes[i] / closes[i - 1]).ln())
        .collect();
    let vol20 = if returns.len() >= 20 {
        stdev(&returns[returns.len() - 20..])
    } else {
        0.0
    };
    let vol120 = if returns.len() >= 120 {
        stdev(&returns[returns.len() - 120..])
    } else if vol20 > 0.0 {
        vol20
    } else {
        1e-9
    };
    let vol_ratio = vol20 / vol120.max(1e-9);

    let dip = clip((dd252.abs() - 0.12) / 0.23, 0.0, 1.0);
    let cap = clip((30.0 - rsi) / 20.0, 0.0, 1.0);
    let turn = mom20 > mom60 && mom20 > -0.02;
    let block = mom20 < -0.12 && vol_ratio > 1.5;
    let mut opp = 0.5 * dip + 0.3 * cap + 0.2 * (turn as i32 as f64);
    if block {
        opp = 0.0;
    }

    let core_rank = mom120 - (0.5 * vol20);

    ContrarianSignal {
        dd252,
        dd252_recent_min,
        rsi14: rsi,
        mom20,
        mom60,
        mom120,
        vol20,
        vol_ratio,
        dip_score: dip,
        capitulation_score: cap,
        cycle_turn: turn,
        freefall_block: block,
        opp_score: clip(opp, 0.0, 1.0),
        core_rank,
    }
}

#[derive(Debug, Clone)]
pub struct LotSizeClassification {
    pub min_ticket_eur: f64,
    pub ticket_pct: f64,
    pub lot_class: LotClass,
}

/// Classify a symbol's minimum tradable ticket relative to portfolio value,
/// to decide whether standard-, coarse-, or jumbo-lot sizing rules apply.
#[allow(clippy::too_many_arguments)]
pub fn classify_lot_size(
    price: f64,
    lot_size: u32,
    fx_rate_to_eur: f64,
    portfolio_value_eur: f64,
    fee_fixed_eur: f64,
    fee_pct: f64,
    standard_max_pct: f64,
    coarse_max_pct: f64,
) -> LotSizeClassification {
    let one_lot_local = (lot_size as f64 * price).max(0.0);
    let one_lot_eur = one_lot_local * fx_rate_to_eur.max(0.0);
    let min_ticket_eur = one_lot_eur + fee_fixed_eur.max(0.0) + (one_lot_eur * fee_pct.max(0.0));
    let ticket_pct = if portfolio_value_eur <= 0.0 {
        1.0
    } else {
        min_ticket_eur / portfolio_value_eur
    };
    let lot_class = if ticket_pct <= standard_max_pct {
        LotClass::Standard
    } else if ticket_pct <= coarse_max_pct {
        LotClass::Coarse
    } else {
        LotClass::Jumbo
    };
    LotSizeClassification {
        min_ticket_eur,
        ticket_pct,
        lot_class,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TargetBuilderParams {
    pub core_target: f64,
    pub opportunity_target: f64,
    pub min_opp_score: f64,
    pub max_opportunity_target: Option<f64>,
}

/// Build normalized target allocations and sleeve assignment from
/// per-symbol signals and caller-supplied conviction multipliers.
pub fn compute_symbol_targets(
    symbol_signals: &HashMap<String, ContrarianSignal>,
    user_multipliers: &HashMap<String, f64>,
    params: TargetBuilderParams,
) -> (HashMap<String, f64>, HashMap<String, Sleeve>) {
    let mut core_candidates: HashMap<String, f64> = HashMap::new();
    let mut opp_candidates: HashMap<String, f64> = HashMap::new();

    for (symbol, metrics) in symbol_signals {
        let multiplier = user_multipliers.get(symbol).copied().unwrap_or(1.0).max(0.0);
        if multiplier <= 0.0 {
            continue;
        }
        let vol20 = metrics.vol20.max(1e-6);
        core_candidates.insert(symbol.clone(), (metrics.core_rank + 1.0).max(0.001) * multiplier);
        if metrics.opp_score >= params.min_opp_score {
            opp_candidates.insert(symbol.clone(), (metrics.opp_score / vol20) * multiplier);
        }
    }

    if core_candidates.is_empty() && opp_candidates.is_empty() {
        return (HashMap::new(), HashMap::new());
    }

    let max_opportunity_target = clip(
        params.max_opportunity_target.unwrap_or(params.opportunity_target),
        params.opportunity_target,
        1.0,
    );

    let mut effective_opportunity_target = params.opportunity_target;
    if !opp_candidates.is_empty() && max_opportunity_target > params.opportunity_target {
        let breadth = clip(opp_candidates.len() as f64 / 8.0, 0.0, 1.0);
        let avg_opp = opp_candidates
            .keys()
            .map(|s| symbol_signals[s].opp_score)
            .sum::<f64>()
            / opp_candidates.len() as f64;
        let strength = clip(
            (avg_opp - params.min_opp_score) / (1.0 - params.min_opp_score).max(1e-9),
            0.0,
            1.0,
        );
        let boost = 0.5 * breadth + 0.5 * strength;
        effective_opportunity_target =
            params.opportunity_target + (max_opportunity_target - params.opportunity_target) * boost;
    }

    let effective_core_target = (1.0 - effective_opportunity_target).max(0.0);

    let mut allocations: HashMap<String, f64> = HashMap::new();
    let mut sleeves: HashMap<String, Sleeve> = HashMap::new();

    let core_weight_sum: f64 = core_candidates.values().sum();
    if core_weight_sum > 0.0 {
        for (symbol, weight) in &core_candidates {
            *allocations.entry(symbol.clone()).or_insert(0.0) +=
                (weight / core_weight_sum) * effective_core_target;
            sleeves.entry(symbol.clone()).or_insert(Sleeve::Core);
        }
    }

    let opp_weight_sum: f64 = opp_candidates.values().sum();
    if opp_weight_sum > 0.0 {
        for (symbol, weight) in &opp_candidates {
            *allocations.entry(symbol.clone()).or_insert(0.0) +=
                (weight / opp_weight_sum) * effective_opportunity_target;
            sleeves.insert(symbol.clone(), Sleeve::Opportunity);
        }
    } else if core_weight_sum > 0.0 {
        // No tactical candidates: keep the portfolio fully invested in core.
        for (symbol, weight) in &core_candidates {
            allocations.insert(symbol.clone(), weight / core_weight_sum);
        }
    }

    let total: f64 = allocations.values().sum();
    if total <= 0.0 {
        return (HashMap::new(), HashMap::new());
    }
    let allocations: HashMap<String, f64> = allocations
        .into_iter()
        .filter(|(_, v)| *v > 0.0)
        .map(|(k, v)| (k, v / total))
        .collect();
    (allocations, sleeves)
}

/// Convenience conversion at the `Decimal` boundary, rounded to 8 places.
pub fn f64_to_decimal(value: f64) -> Decimal {
    Decimal::from_f64_retain(value).unwrap_or(Decimal::ZERO)
}

pub fn decimal_to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_series(len: usize, value: f64) -> Vec<f64> {
        vec![value; len]
    }

    #[test]
    fn short_series_returns_neutral_signal() {
        let signal = compute_contrarian_signal(&flat_series(10, 100.0));
        assert_eq!(signal.rsi14, 50.0);
        assert_eq!(signal.vol_ratio, 1.0);
        assert_eq!(signal.opp_score, 0.0);
    }

    #[test]
    fn flat_series_has_zero_momentum_and_drawdown() {
        let signal = compute_contrarian_signal(&flat_series(300, 50.0));
        assert_eq!(signal.mom20, 0.0);
        assert_eq!(signal.dd252, 0.0);
        assert_eq!(signal.dip_score, 0.0);
    }

    #[test]
    fn declining_series_triggers_dip_and_capitulation() {
        let mut closes = vec![100.0; 200];
        for (i, c) in closes.iter_mut().enumerate() {
            *c = 100.0 - (i as f64 * 0.3);
        }
        let signal = compute_contrarian_signal(&closes);
        assert!(signal.dd252 < 0.0);
        assert!(signal.dip_score > 0.0);
    }

    #[test]
    fn event_memory_boost_requires_cycle_turn_and_no_freefall() {
        let params = EventMemoryParams {
            cycle_turn: false,
            freefall_block: false,
            recent_dd252_min: -0.3,
            entry_t1_dd: -0.1,
            entry_t3_dd: -0.3,
            max_boost: 0.2,
        };
        assert_eq!(effective_opportunity_score(0.5, params), 0.5);

        let boosted_params = EventMemoryParams {
            cycle_turn: true,
            ..params
        };
        let boosted = effective_opportunity_score(0.5, boosted_params);
        assert!(boosted > 0.5);
    }

    #[test]
    fn classify_lot_size_picks_standard_for_small_ticket() {
        let result = classify_lot_size(10.0, 1, 1.0, 100_000.0, 0.0, 0.0, 0.02, 0.05);
        assert!(matches!(result.lot_class, LotClass::Standard));
    }

    #[test]
    fn classify_lot_size_picks_jumbo_for_large_ticket() {
        let result = classify_lot_size(10_000.0, 100, 1.0, 1_000.0, 0.0, 0.0, 0.02, 0.05);
        assert!(matches!(result.lot_class, LotClass::Jumbo));
    }

    #[test]
    fn compute_symbol_targets_normalizes_to_one() {
        let mut signals = HashMap::new();
        signals.insert(
            "A".to_string(),
            ContrarianSignal {
                core_rank: 0.1,
                opp_score: 0.9,
                vol20: 0.02,
                ..ContrarianSignal::neutral()
            },
        );
        signals.insert(
            "B".to_string(),
            ContrarianSignal {
                core_rank: 0.2,
                opp_score: 0.1,
                vol20: 0.02,
                ..ContrarianSignal::neutral()
            },
        );
        let multipliers: HashMap<String, f64> =
            [("A".to_string(), 1.0), ("B".to_string(), 1.0)].into_iter().collect();
        let params = TargetBuilderParams {
            core_target: 0.7,
            opportunity_target: 0.3,
            min_opp_score: 0.5,
            max_opportunity_target: None,
        };
        let (allocations, sleeves) = compute_symbol_targets(&signals, &multipliers, params);
        let total: f64 = allocations.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert_eq!(sleeves["A"], Sleeve::Opportunity);
    }

    #[test]
    fn compute_symbol_targets_empty_when_no_candidates() {
        let signals = HashMap::new();
        let multipliers = HashMap::new();
        let params = TargetBuilderParams {
            core_target: 0.7,
            opportunity_target: 0.3,
            min_opp_score: 0.5,
            max_opportunity_target: None,
        };
        let (allocations, sleeves) = compute_symbol_targets(&signals, &multipliers, params);
        assert!(allocations.is_empty());
        assert!(sleeves.is_empty());
    }
}
