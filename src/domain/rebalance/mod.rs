//! Rebalance engine.
//!
//! Turns current positions plus target sleeve allocations into an ordered
//! list of `TradeRecommendation`s: one action per security, quantity-sized
//! to whole lots, reconciled against available cash, and annotated with a
//! lot classification and reason code.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::domain::model::{LotClass, Position, Security, Side, Sleeve, TradeRecommendation};

fn clip(value: f64, min_value: f64, max_value: f64) -> f64 {
    value.max(min_value).min(max_value)
}

/// How far a position has been scaled out of (partial profit-taking) and how
/// far it has been tranched into (drawdown-triggered buys). Derived from
/// executed trades, not planned ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PositionState {
    pub scaleout_stage: u8,
    pub tranche_stage: u8,
}

/// Thresholds driving the per-symbol mini state machine.
#[derive(Debug, Clone, Copy)]
pub struct StateMachineParams {
    pub scaleout_10_gain: f64,
    pub scaleout_18_gain: f64,
    pub time_stop_days: i64,
    pub time_stop_gain_ceiling: f64,
    pub tranche_t1_dd: f64,
    pub tranche_t2_dd: f64,
    pub tranche_t3_dd: f64,
}

impl Default for StateMachineParams {
    fn default() -> Self {
        Self {
            scaleout_10_gain: 0.10,
            scaleout_18_gain: 0.18,
            time_stop_days: 180,
            time_stop_gain_ceiling: 0.10,
            tranche_t1_dd: -0.12,
            tranche_t2_dd: -0.20,
            tranche_t3_dd: -0.28,
        }
    }
}

/// One of the base actions the state machine can recommend for a symbol
/// before cash reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseAction {
    Hold,
    Buy,
    Sell,
}

#[derive(Debug, Clone)]
pub struct StateDecision {
    pub action: BaseAction,
    pub sell_fraction: f64,
    pub reason_code: &'static str,
}

/// Evaluate the per-symbol state machine for one currently-held position.
///
/// `gain` is `(current_price / avg_price) - 1`. `mom20`/`mom60` come from the
/// contrarian signal. `position_age_days` is wall-clock age of the position.
pub fn evaluate_state_machine(
    state: PositionState,
    gain: f64,
    mom20: f64,
    mom60: f64,
    position_age_days: i64,
    params: StateMachineParams,
) -> (StateDecision, PositionState) {
    if state.scaleout_stage >= 1 && mom20 < mom60 && gain > 0.0 {
        return (
            StateDecision {
                action: BaseAction::Sell,
                sell_fraction: 1.0,
                reason_code: "exit_momentum",
            },
            PositionState {
                scaleout_stage: 0,
                tranche_stage: 0,
            },
        );
    }

    if state.scaleout_stage == 0 && gain >= params.scaleout_10_gain {
        return (
            StateDecision {
                action: BaseAction::Sell,
                sell_fraction: 0.30,
                reason_code: "scaleout_10",
            },
            PositionState {
                scaleout_stage: 1,
                ..state
            },
        );
    }

    if state.scaleout_stage == 1 && gain >= params.scaleout_18_gain {
        return (
            StateDecision {
                action: BaseAction::Sell,
                sell_fraction: 0.30,
                reason_code: "scaleout_18",
            },
            PositionState {
                scaleout_stage: 2,
                ..state
            },
        );
    }

    if position_age_days > params.time_stop_days && gain < params.time_stop_gain_ceiling {
        return (
            StateDecision {
                action: BaseAction::Sell,
                sell_fraction: 1.0,
                reason_code: "time_stop_rotation",
            },
            PositionState {
                scaleout_stage: 0,
                tranche_stage: 0,
            },
        );
    }

    (
        StateDecision {
            action: BaseAction::Hold,
            sell_fraction: 0.0,
            reason_code: "hold",
        },
        state,
    )
}

/// Desired drawdown tranche stage (0..3) from the current drawdown reading.
/// Buys move the stage up monotonically; any full exit resets it to 0
/// (handled by the caller via `evaluate_state_machine`'s reset branches).
pub fn desired_tranche_stage(dd252: f64, params: StateMachineParams) -> u8 {
    if dd252 > params.tranche_t1_dd {
        0
    } else if dd252 > params.tranche_t2_dd {
        1
    } else if dd252 > params.tranche_t3_dd {
        2
    } else {
        3
    }
}

/// Whole-lot buy quantity that spends as close to `target_eur` as possible
/// without exceeding it, at `price` (native currency) converted via
/// `fx_to_eur`.
pub fn calculate_buy_quantity(target_eur: f64, price: f64, fx_to_eur: f64, min_lot: u32) -> i64 {
    if price <= 0.0 || fx_to_eur <= 0.0 || min_lot == 0 {
        return 0;
    }
    let lot_value_eur = price * fx_to_eur * min_lot as f64;
    if lot_value_eur <= 0.0 {
        return 0;
    }
    let lots = (target_eur / lot_value_eur).floor().max(0.0);
    (lots as i64) * min_lot as i64
}

/// Whole-lot sell quantity covering `target_eur`, capped at `held_quantity`.
pub fn calculate_sell_quantity(
    target_eur: f64,
    price: f64,
    fx_to_eur: f64,
    min_lot: u32,
    held_quantity: i64,
) -> i64 {
    if price <= 0.0 || fx_to_eur <= 0.0 || min_lot == 0 || held_quantity <= 0 {
        return 0;
    }
    let lot_value_eur = price * fx_to_eur * min_lot as f64;
    if lot_value_eur <= 0.0 {
        return 0;
    }
    let lots_needed = (target_eur / lot_value_eur).ceil().max(0.0) as i64 * min_lot as i64;
    let held_lots = (held_quantity / min_lot as i64) * min_lot as i64;
    lots_needed.min(held_lots).max(0)
}

/// One security's view into the rebalance engine: current holding (if any),
/// its static metadata, target allocation, and the contrarian inputs driving
/// the state machine.
#[derive(Debug, Clone)]
pub struct RebalanceInput {
    pub security: Security,
    pub position: Option<Position>,
    pub target_allocation: f64,
    pub sleeve: Sleeve,
    pub contrarian_score: f64,
    pub dd252: f64,
    pub mom20: f64,
    pub mom60: f64,
    pub price: Decimal,
    pub fx_to_eur: Decimal,
    pub position_age_days: i64,
    pub state: PositionState,
    pub is_core_holding: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct RebalanceParams {
    pub base_trade_amount_eur: f64,
    pub transaction_cost_fixed: f64,
    pub transaction_cost_percent: f64,
    pub min_trade_value: f64,
    pub core_floor_pct: f64,
    pub max_funding_sells_per_cycle: u32,
    pub max_funding_turnover_pct: f64,
    pub balance_buffer_eur: f64,
    pub standard_max_pct: f64,
    pub coarse_max_pct: f64,
}

/// Build one `TradeRecommendation` per symbol from its rebalance input,
/// before cash-constraint reconciliation. Returns `None` when the symbol's
/// state machine says hold and its allocation delta is within the ignore
/// band (no trade worth making).
pub fn build_base_recommendation(
    input: &RebalanceInput,
    total_portfolio_value_eur: f64,
    params: RebalanceParams,
    state_params: StateMachineParams,
) -> Option<TradeRecommendation> {
    let current_qty = input.position.as_ref().map(|p| p.quantity).unwrap_or(0);
    let current_value_eur = input
        .position
        .as_ref()
        .and_then(|p| p.market_value_eur)
        .map(|v| v.to_f64().unwrap_or(0.0))
        .unwrap_or(0.0);
    let current_allocation = if total_portfolio_value_eur > 0.0 {
        current_value_eur / total_portfolio_value_eur
    } else {
        0.0
    };
    let target_value_eur = input.target_allocation * total_portfolio_value_eur;
    let allocation_delta = input.target_allocation - current_allocation;

    let price_f = input.price.to_f64().unwrap_or(0.0);
    let fx_f = input.fx_to_eur.to_f64().unwrap_or(0.0);

    let avg_price_f = input.position.as_ref().map(|p| p.avg_price.to_f64().unwrap_or(0.0)).unwrap_or(0.0);
    let gain = if avg_price_f > 0.0 {
        price_f / avg_price_f - 1.0
    } else {
        0.0
    };

    if current_qty > 0 {
        let (decision, _next_state) = evaluate_state_machine(
            input.state,
            gain,
            input.mom20,
            input.mom60,
            input.position_age_days,
            state_params,
        );
        if decision.action == BaseAction::Sell {
            if input.is_core_holding
                && (current_value_eur * (1.0 - decision.sell_fraction))
                    < params.core_floor_pct * total_portfolio_value_eur
            {
                // Core floor protects the position; fall through to the
                // allocation-delta based decision instead.
            } else {
                let sell_value_eur = current_value_eur * decision.sell_fraction;
                let qty = calculate_sell_quantity(
                    sell_value_eur,
                    price_f,
                    fx_f,
                    input.security.min_lot,
                    current_qty,
                );
                if qty > 0 {
                    return Some(finalize(
                        input,
                        Side::Sell,
                        qty,
                        current_allocation,
                        target_value_eur,
                        allocation_delta,
                        current_value_eur,
                        total_portfolio_value_eur,
                        params,
                        decision.reason_code,
                        false,
                    ));
                }
            }
        }
    }

    let value_delta_eur = target_value_eur - current_value_eur;
    if value_delta_eur.abs() < params.min_trade_value {
        return None;
    }

    if value_delta_eur > 0.0 {
        if !input.security.allow_buy {
            return None;
        }
        let qty = calculate_buy_quantity(value_delta_eur, price_f, fx_f, input.security.min_lot);
        if qty <= 0 {
            return None;
        }
        Some(finalize(
            input,
            Side::Buy,
            qty,
            current_allocation,
            target_value_eur,
            allocation_delta,
            current_value_eur,
            total_portfolio_value_eur,
            params,
            "rebalance_buy",
            false,
        ))
    } else {
        if !input.security.allow_sell || current_qty <= 0 {
            return None;
        }
        let core_floor_active = input.is_core_holding
            && (current_value_eur + value_delta_eur) < params.core_floor_pct * total_portfolio_value_eur;
        if core_floor_active {
            return None;
        }
        let qty = calculate_sell_quantity(
            -value_delta_eur,
            price_f,
            fx_f,
            input.security.min_lot,
            current_qty,
        );
        if qty <= 0 {
            return None;
        }
        Some(finalize(
            input,
            Side::Sell,
            qty,
            current_allocation,
            target_value_eur,
            allocation_delta,
            current_value_eur,
            total_portfolio_value_eur,
            params,
            "rebalance_sell",
            core_floor_active,
        ))
    }
}

#[allow(clippy::too_many_arguments)]
fn finalize(
    input: &RebalanceInput,
    side: Side,
    quantity: i64,
    current_allocation: f64,
    target_value_eur: f64,
    allocation_delta: f64,
    current_value_eur: f64,
    total_portfolio_value_eur: f64,
    params: RebalanceParams,
    reason_code: &'static str,
    core_floor_active: bool,
) -> TradeRecommendation {
    let price_f = input.price.to_f64().unwrap_or(0.0);
    let fx_f = input.fx_to_eur.to_f64().unwrap_or(0.0);
    let trade_value_eur = quantity as f64 * price_f * fx_f;
    let signed_value_delta = match side {
        Side::Buy => trade_value_eur,
        Side::Sell => -trade_value_eur,
    };

    let priority = 10.0 * allocation_delta.abs()
        + match side {
            Side::Buy => input.contrarian_score,
            Side::Sell => -input.contrarian_score,
        };

    let lot = crate::domain::contrarian::classify_lot_size(
        price_f,
        input.security.min_lot,
        fx_f,
        total_portfolio_value_eur,
        params.transaction_cost_fixed,
        params.transaction_cost_percent,
        params.standard_max_pct,
        params.coarse_max_pct,
    );

    TradeRecommendation {
        side,
        symbol: input.security.symbol.clone(),
        quantity,
        price: input.price,
        currency: input.security.currency,
        current_allocation,
        target_allocation: input.target_allocation,
        allocation_delta,
        current_value_eur: Decimal::from_f64_retain(current_value_eur).unwrap_or(Decimal::ZERO),
        target_value_eur: Decimal::from_f64_retain(target_value_eur).unwrap_or(Decimal::ZERO),
        value_delta_eur: Decimal::from_f64_retain(signed_value_delta).unwrap_or(Decimal::ZERO),
        contrarian_score: input.contrarian_score,
        sleeve: input.sleeve,
        lot_class: lot.lot_class,
        ticket_pct: lot.ticket_pct,
        core_floor_active,
        reason_code: reason_code.to_string(),
        reason: format!("{reason_code} for {}", input.security.symbol),
        priority,
    }
}

/// Sell-candidate ranking mode for deficit funding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundingMode {
    /// Triggered by a buy-side cash shortfall: prefer selling the most
    /// overweight, highest-conviction, highest-scoring, largest positions.
    Rotation,
    /// Triggered by a negative cash balance: sell the weakest positions
    /// first (lowest score, then smallest value).
    CashDeficit,
}

#[derive(Debug, Clone)]
pub struct FundingCandidate {
    pub symbol: String,
    pub overweight: f64,
    pub conviction: f64,
    pub score: f64,
    pub eur_value: f64,
    pub price: Decimal,
    pub fx_to_eur: Decimal,
    pub min_lot: u32,
    pub held_quantity: i64,
}

/// Select and size sells to cover `deficit_eur`, honoring an optional
/// conviction cap (never rotate a higher-conviction holding to fund a lower
/// one) and a turnover cap on total funding-sell value.
pub fn select_funding_sells(
    mut candidates: Vec<FundingCandidate>,
    deficit_eur: f64,
    mode: FundingMode,
    max_sell_conviction: Option<f64>,
    max_sells: u32,
    max_turnover_eur: f64,
) -> Vec<(String, i64, f64)> {
    if deficit_eur <= 0.0 {
        return vec![];
    }

    match mode {
        FundingMode::Rotation => candidates.sort_by(|a, b| {
            b.overweight
                .partial_cmp(&a.overweight)
                .unwrap()
                .then(b.conviction.powi(2).partial_cmp(&a.conviction.powi(2)).unwrap())
                .then(b.score.partial_cmp(&a.score).unwrap())
                .then(b.eur_value.partial_cmp(&a.eur_value).unwrap())
        }),
        FundingMode::CashDeficit => candidates.sort_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap()
                .then(a.eur_value.partial_cmp(&b.eur_value).unwrap())
        }),
    }

    if let Some(cap) = max_sell_conviction {
        candidates.retain(|c| c.conviction <= cap);
    }

    let mut remaining = deficit_eur;
    let mut turnover = 0.0;
    let mut sells = Vec::new();

    for candidate in candidates {
        if remaining <= 0.0 || sells.len() as u32 >= max_sells || turnover >= max_turnover_eur {
            break;
        }
        let price_f = candidate.price.to_f64().unwrap_or(0.0);
        let fx_f = candidate.fx_to_eur.to_f64().unwrap_or(0.0);
        let budget = remaining.min(max_turnover_eur - turnover);
        let qty = calculate_sell_quantity(budget, price_f, fx_f, candidate.min_lot, candidate.held_quantity);
        if qty <= 0 {
            continue;
        }
        let value = qty as f64 * price_f * fx_f;
        remaining -= value;
        turnover += value;
        sells.push((candidate.symbol, qty, value));
    }

    sells
}

/// Trim and rescale buy recommendations so their total cost fits within
/// `available_budget`, preferring to drop low-conviction names first.
pub fn reconcile_cash_constraint(
    mut buys: Vec<TradeRecommendation>,
    available_budget: f64,
    min_trade_value: f64,
) -> Vec<TradeRecommendation> {
    let total_cost: f64 = buys
        .iter()
        .map(|b| b.value_delta_eur.to_f64().unwrap_or(0.0))
        .sum();
    if total_cost <= available_budget || buys.len() < 2 {
        return buys;
    }

    // Rank by priority * (0.5 + conviction); conviction approximated here by
    // the recommendation's own contrarian_score, already folded into
    // priority upstream, so rank directly on priority.
    let mut ranked: Vec<(usize, f64)> = buys
        .iter()
        .enumerate()
        .map(|(i, b)| (i, b.priority))
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
    let median_rank = ranked[ranked.len() / 2].1;

    buys.retain(|b| b.priority >= median_rank);

    let remaining_cost: f64 = buys
        .iter()
        .map(|b| b.value_delta_eur.to_f64().unwrap_or(0.0))
        .sum();
    if remaining_cost <= available_budget {
        return buys;
    }

    // Scale each buy down to its minimum whole-lot size clearing
    // `min_trade_value`, then proportionally distribute the leftover budget.
    for buy in &mut buys {
        let price_f = buy.price.to_f64().unwrap_or(0.0);
        if price_f <= 0.0 {
            continue;
        }
        let min_qty = calculate_buy_quantity(min_trade_value, price_f, 1.0, 1).max(1);
        buy.quantity = buy.quantity.min(min_qty.max(1));
    }

    let floor_cost: f64 = buys
        .iter()
        .map(|b| b.quantity as f64 * b.price.to_f64().unwrap_or(0.0))
        .sum();
    let leftover = (available_budget - floor_cost).max(0.0);
    let total_gap: f64 = buys
        .iter()
        .map(|b| (b.value_delta_eur.to_f64().unwrap_or(0.0) - b.quantity as f64 * b.price.to_f64().unwrap_or(0.0)).max(0.0))
        .sum();

    if total_gap > 0.0 {
        for buy in &mut buys {
            let price_f = buy.price.to_f64().unwrap_or(0.0);
            if price_f <= 0.0 {
                continue;
            }
            let gap = (buy.value_delta_eur.to_f64().unwrap_or(0.0) - buy.quantity as f64 * price_f).max(0.0);
            let extra_budget = leftover * (gap / total_gap);
            let extra_lots = (extra_budget / price_f).floor().max(0.0) as i64;
            buy.quantity += extra_lots;
        }
    }

    buys.into_iter().filter(|b| b.quantity > 0).collect()
}

/// Top-level entry point: build one `TradeRecommendation` per symbol, then
/// reconcile buys against the available budget. Sells are always returned
/// ahead of buys (rigid sells-first ordering), each side sorted by priority
/// descending.
///
/// This does not perform deficit-funding (§4.8.3) — that needs a candidate
/// pool wider than the symbols already carrying a base recommendation, so
/// callers that need it invoke `select_funding_sells` separately with their
/// own funding-candidate pool and splice the result in ahead of reconciled
/// buys.
pub fn build_recommendations(
    inputs: &[RebalanceInput],
    total_portfolio_value_eur: f64,
    available_cash_eur: f64,
    params: RebalanceParams,
    state_params: StateMachineParams,
) -> Vec<TradeRecommendation> {
    let mut sells = Vec::new();
    let mut buys = Vec::new();

    for input in inputs {
        if let Some(rec) = build_base_recommendation(input, total_portfolio_value_eur, params, state_params) {
            match rec.side {
                Side::Sell => sells.push(rec),
                Side::Buy => buys.push(rec),
            }
        }
    }

    sells.sort_by(|a, b| b.priority.partial_cmp(&a.priority).unwrap_or(std::cmp::Ordering::Equal));
    buys.sort_by(|a, b| b.priority.partial_cmp(&a.priority).unwrap_or(std::cmp::Ordering::Equal));

    let sell_proceeds: f64 = sells
        .iter()
        .map(|s| {
            let value = s.value_delta_eur.to_f64().unwrap_or(0.0).abs();
            let fee = params.transaction_cost_fixed + value * params.transaction_cost_percent;
            (value - fee).max(0.0)
        })
        .sum();
    let available_budget = available_cash_eur + sell_proceeds;

    let buys = reconcile_cash_constraint(buys, available_budget, params.min_trade_value);

    sells.into_iter().chain(buys).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::Currency;

    #[test]
    fn calculate_buy_quantity_rounds_down_to_whole_lots() {
        let qty = calculate_buy_quantity(1000.0, 120.0, 1.0, 8);
        assert_eq!(qty, 8);
    }

    #[test]
    fn calculate_sell_quantity_caps_at_held() {
        let qty = calculate_sell_quantity(100_000.0, 50.0, 1.0, 1, 10);
        assert_eq!(qty, 10);
    }

    #[test]
    fn desired_tranche_stage_bands() {
        let params = StateMachineParams::default();
        assert_eq!(desired_tranche_stage(-0.05, params), 0);
        assert_eq!(desired_tranche_stage(-0.15, params), 1);
        assert_eq!(desired_tranche_stage(-0.25, params), 2);
        assert_eq!(desired_tranche_stage(-0.35, params), 3);
    }

    #[test]
    fn scaleout_transitions_at_gain_10() {
        let params = StateMachineParams::default();
        let (decision, next) = evaluate_state_machine(
            PositionState::default(),
            0.11,
            0.01,
            0.0,
            10,
            params,
        );
        assert_eq!(decision.reason_code, "scaleout_10");
        assert_eq!(next.scaleout_stage, 1);
    }

    #[test]
    fn exit_momentum_fires_after_first_scaleout() {
        let params = StateMachineParams::default();
        let state = PositionState {
            scaleout_stage: 1,
            tranche_stage: 0,
        };
        let (decision, next) = evaluate_state_machine(state, 0.05, -0.02, 0.01, 10, params);
        assert_eq!(decision.reason_code, "exit_momentum");
        assert_eq!(next.scaleout_stage, 0);
    }

    #[test]
    fn time_stop_rotates_stale_low_gain_position() {
        let params = StateMachineParams::default();
        let (decision, _) = evaluate_state_machine(
            PositionState::default(),
            0.02,
            0.0,
            0.0,
            200,
            params,
        );
        assert_eq!(decision.reason_code, "time_stop_rotation");
    }

    #[test]
    fn reconcile_cash_constraint_is_noop_when_budget_suffices() {
        let buy = TradeRecommendation {
            side: Side::Buy,
            symbol: "A".into(),
            quantity: 10,
            price: Decimal::new(100, 0),
            currency: Currency::Eur,
            current_allocation: 0.0,
            target_allocation: 0.1,
            allocation_delta: 0.1,
            current_value_eur: Decimal::ZERO,
            target_value_eur: Decimal::new(1000, 0),
            value_delta_eur: Decimal::new(1000, 0),
            contrarian_score: 0.5,
            sleeve: Sleeve::Core,
            lot_class: LotClass::Standard,
            ticket_pct: 0.01,
            core_floor_active: false,
            reason_code: "rebalance_buy".into(),
            reason: String::new(),
            priority: 1.0,
        };
        let result = reconcile_cash_constraint(vec![buy], 2000.0, 100.0);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].quantity, 10);
    }

    #[test]
    fn funding_sells_respect_conviction_cap() {
        let candidates = vec![
            FundingCandidate {
                symbol: "HIGH".into(),
                overweight: 0.1,
                conviction: 2.0,
                score: 0.5,
                eur_value: 1000.0,
                price: Decimal::new(100, 0),
                fx_to_eur: Decimal::ONE,
                min_lot: 1,
                held_quantity: 10,
            },
            FundingCandidate {
                symbol: "LOW".into(),
                overweight: 0.05,
                conviction: 0.5,
                score: 0.3,
                eur_value: 500.0,
                price: Decimal::new(50, 0),
                fx_to_eur: Decimal::ONE,
                min_lot: 1,
                held_quantity: 10,
            },
        ];
        let sells = select_funding_sells(candidates, 300.0, FundingMode::Rotation, Some(1.0), 5, 10_000.0);
        assert!(sells.iter().all(|(sym, _, _)| sym != "HIGH"));
    }
}
