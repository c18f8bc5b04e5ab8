//! Opportunity calculators.
//!
//! Each struct mirrors one of the five angles the planner scores candidate
//! trades from. Parameters are fields set at construction (from config),
//! not a runtime dict — the equivalent Python calculators keyed their knobs
//! by string, which is the shape this module deliberately avoids.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::domain::model::{ActionCandidate, Side};

use super::{calculate_buy_quantity, OpportunityCalculator, PortfolioContext};

fn to_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

fn decimal(v: f64) -> Decimal {
    Decimal::from_f64_retain(v).unwrap_or(Decimal::ZERO)
}

/// Quality-gated new buys above a score threshold. Grounded in
/// `opportunity_buys.py`.
pub struct OpportunityBuysCalculator {
    pub min_quality_score: f64,
    pub base_trade_amount_eur: f64,
}

impl Default for OpportunityBuysCalculator {
    fn default() -> Self {
        Self {
            min_quality_score: 0.7,
            base_trade_amount_eur: 1000.0,
        }
    }
}

#[async_trait]
impl OpportunityCalculator for OpportunityBuysCalculator {
    fn name(&self) -> &str {
        "opportunity_buys"
    }

    async fn calculate(&self, ctx: &PortfolioContext) -> Vec<ActionCandidate> {
        let mut out = Vec::new();
        for security in &ctx.securities {
            if !security.allow_buy {
                continue;
            }
            let quality = ctx.quality_score(&security.symbol);
            if quality < self.min_quality_score {
                continue;
            }
            let Some(position) = ctx.position_for(&security.symbol) else {
                continue;
            };
            let Some(price) = position.current_price else {
                continue;
            };
            if price <= Decimal::ZERO {
                continue;
            }
            let fx = ctx.fx_to_eur(security.currency);
            let sized = calculate_buy_quantity(self.base_trade_amount_eur, to_f64(price), security.min_lot, fx);
            if sized.quantity <= 0 {
                continue;
            }
            let multiplier = to_f64(security.priority_multiplier);
            out.push(ActionCandidate {
                side: Side::Buy,
                symbol: security.symbol.clone(),
                name: security.name.clone(),
                quantity: sized.quantity,
                price,
                value_eur: decimal(sized.value_eur),
                currency: security.currency,
                priority: quality * multiplier,
                reason: format!("High quality (score: {quality:.2})"),
                tags: vec!["quality".into(), "opportunity".into()],
            });
        }
        out
    }
}

/// Buy more of owned quality securities that dipped between `max_drawdown`
/// and 0 — quality positions, not falling knives. Grounded in
/// `averaging_down.py`.
pub struct AveragingDownCalculator {
    pub max_drawdown: f64,
    pub min_quality_score: f64,
    pub priority_weight: f64,
    pub base_trade_amount_eur: f64,
}

impl Default for AveragingDownCalculator {
    fn default() -> Self {
        Self {
            max_drawdown: -0.15,
            min_quality_score: 0.6,
            priority_weight: 0.9,
            base_trade_amount_eur: 1000.0,
        }
    }
}

#[async_trait]
impl OpportunityCalculator for AveragingDownCalculator {
    fn name(&self) -> &str {
        "averaging_down"
    }

    async fn calculate(&self, ctx: &PortfolioContext) -> Vec<ActionCandidate> {
        let mut out = Vec::new();
        for security in &ctx.securities {
            if !security.allow_buy {
                continue;
            }
            let Some(position) = ctx.position_for(&security.symbol) else {
                continue;
            };
            if position.quantity <= 0 {
                continue;
            }
            let current_price = position.current_price.unwrap_or(position.avg_price);
            if current_price <= Decimal::ZERO || position.avg_price <= Decimal::ZERO {
                continue;
            }
            let loss_pct = to_f64((current_price - position.avg_price) / position.avg_price);
            if loss_pct >= 0.0 || loss_pct < self.max_drawdown {
                continue;
            }
            let quality = ctx.quality_score(&security.symbol);
            if quality < self.min_quality_score {
                continue;
            }
            let fx = ctx.fx_to_eur(security.currency);
            let sized = calculate_buy_quantity(self.base_trade_amount_eur, to_f64(current_price), security.min_lot, fx);
            if sized.quantity <= 0 {
                continue;
            }
            let multiplier = to_f64(security.priority_multiplier);
            out.push(ActionCandidate {
                side: Side::Buy,
                symbol: security.symbol.clone(),
                name: security.name.clone(),
                quantity: sized.quantity,
                price: current_price,
                value_eur: decimal(sized.value_eur),
                currency: security.currency,
                priority: (quality + loss_pct.abs()) * self.priority_weight * multiplier,
                reason: format!("Quality security down {:.0}%, averaging down", loss_pct.abs() * 100.0),
                tags: vec!["averaging_down".into(), "buy_low".into()],
            });
        }
        out
    }
}

/// Trims positions showing an excess ("windfall") gain over what a steady
/// compounding return would explain, selling a fraction scaled by how far
/// the gain exceeds the threshold. Grounded in `profit_taking.py`
/// (opportunities variant); the upstream windfall scorer it called is not
/// in `original_source` and is reconstructed here as a direct gain-based
/// ramp rather than ported line for line.
pub struct ProfitTakingCalculator {
    pub windfall_threshold: f64,
    pub priority_weight: f64,
}

impl Default for ProfitTakingCalculator {
    fn default() -> Self {
        Self {
            windfall_threshold: 0.30,
            priority_weight: 1.2,
        }
    }
}

impl ProfitTakingCalculator {
    /// `(windfall_score, suggested_sell_fraction)` for a position with this
    /// much unrealized gain. Sell fraction ramps from 20% at the threshold
    /// to 60% at three times the threshold, capped there.
    fn windfall(&self, gain: f64) -> Option<(f64, f64)> {
        if gain < self.windfall_threshold {
            return None;
        }
        let excess = gain - self.windfall_threshold;
        let ramp = (excess / (2.0 * self.windfall_threshold)).clamp(0.0, 1.0);
        let sell_fraction = 0.20 + ramp * 0.40;
        let windfall_score = (gain / self.windfall_threshold - 1.0).max(0.0);
        Some((windfall_score, sell_fraction))
    }
}

#[async_trait]
impl OpportunityCalculator for ProfitTakingCalculator {
    fn name(&self) -> &str {
        "profit_taking"
    }

    async fn calculate(&self, ctx: &PortfolioContext) -> Vec<ActionCandidate> {
        let mut out = Vec::new();
        for position in &ctx.positions {
            let Some(security) = ctx.stock_by_symbol(&position.symbol) else {
                continue;
            };
            if !security.allow_sell {
                continue;
            }
            let position_value = position.market_value_eur.map(to_f64).unwrap_or(0.0);
            if position_value <= 0.0 {
                continue;
            }
            if position.avg_price <= Decimal::ZERO {
                continue;
            }
            let current_price = position.current_price.unwrap_or(position.avg_price);
            let gain = to_f64((current_price - position.avg_price) / position.avg_price);
            let Some((windfall_score, sell_fraction)) = self.windfall(gain) else {
                continue;
            };

            let sell_qty = (position.quantity as f64 * sell_fraction) as i64;
            if sell_qty <= 0 {
                continue;
            }
            let sell_value_native = decimal(sell_qty as f64) * current_price;
            let fx = ctx.fx_to_eur(position.currency);
            let sell_value_eur = to_f64(sell_value_native) * fx;

            let multiplier = to_f64(security.priority_multiplier).max(0.01);
            let base_priority = windfall_score + 0.5;
            let priority = (base_priority * self.priority_weight) / multiplier;

            out.push(ActionCandidate {
                side: Side::Sell,
                symbol: position.symbol.clone(),
                name: security.name.clone(),
                quantity: sell_qty,
                price: current_price,
                value_eur: decimal(sell_value_eur),
                currency: position.currency,
                priority,
                reason: format!("Windfall gain {:.0}%, trimming {:.0}%", gain * 100.0, sell_fraction * 100.0),
                tags: vec!["windfall".into(), "profit_taking".into()],
            });
        }
        out
    }
}

/// Shared allocation-delta scan used by both rebalance calculators: maps
/// each security's country group to (target, current) and drives a buy
/// when underweight or a sell-candidate list when overweight.
fn group_delta(ctx: &PortfolioContext, country: &str) -> Option<(String, f64, f64)> {
    let group = ctx.country_to_group.get(country)?.clone();
    let target = ctx.country_weights.get(&group).copied()?;
    let current = ctx.country_allocations.get(&group).copied().unwrap_or(0.0);
    Some((group, target, current))
}

/// Buys into country groups that are underweight their target. Grounded in
/// `rebalance_buys.py`.
pub struct RebalanceBuysCalculator {
    pub underweight_threshold: f64,
    pub base_trade_amount_eur: f64,
}

impl Default for RebalanceBuysCalculator {
    fn default() -> Self {
        Self {
            underweight_threshold: 0.05,
            base_trade_amount_eur: 1000.0,
        }
    }
}

#[async_trait]
impl OpportunityCalculator for RebalanceBuysCalculator {
    fn name(&self) -> &str {
        "rebalance_buys"
    }

    async fn calculate(&self, ctx: &PortfolioContext) -> Vec<ActionCandidate> {
        if ctx.country_allocations.is_empty() || ctx.country_to_group.is_empty() || ctx.country_weights.is_empty() {
            return vec![];
        }
        let mut out = Vec::new();
        for security in &ctx.securities {
            if !security.allow_buy {
                continue;
            }
            let Some(position) = ctx.position_for(&security.symbol) else {
                continue;
            };
            let Some(price) = position.current_price else {
                continue;
            };
            if price <= Decimal::ZERO {
                continue;
            }
            let Some(country) = &security.country else {
                continue;
            };
            let Some((group, target, current)) = group_delta(ctx, country) else {
                continue;
            };
            if current >= target - self.underweight_threshold {
                continue;
            }
            let underweight = target - current;
            let quality = ctx.quality_score(&security.symbol);
            let fx = ctx.fx_to_eur(security.currency);
            let sized = calculate_buy_quantity(self.base_trade_amount_eur, to_f64(price), security.min_lot, fx);
            if sized.quantity <= 0 {
                continue;
            }
            let multiplier = to_f64(security.priority_multiplier);
            out.push(ActionCandidate {
                side: Side::Buy,
                symbol: security.symbol.clone(),
                name: security.name.clone(),
                quantity: sized.quantity,
                price,
                value_eur: decimal(sized.value_eur),
                currency: security.currency,
                priority: (underweight * 2.0 + quality * 0.5) * multiplier,
                reason: format!("Underweight {group} by {:.1}%", underweight * 100.0),
                tags: vec!["rebalance".into(), format!("underweight_{}", group.to_lowercase())],
            });
        }
        out
    }
}

/// Sells from country groups that are overweight their target, built by
/// symmetry with `rebalance_buys.py` — no `rebalance_sells.py` exists in
/// `original_source`, this mirrors its buy-side logic with sells instead.
pub struct RebalanceSellsCalculator {
    pub overweight_threshold: f64,
    pub sell_fraction: f64,
}

impl Default for RebalanceSellsCalculator {
    fn default() -> Self {
        Self {
            overweight_threshold: 0.05,
            sell_fraction: 0.15,
        }
    }
}

#[async_trait]
impl OpportunityCalculator for RebalanceSellsCalculator {
    fn name(&self) -> &str {
        "rebalance_sells"
    }

    async fn calculate(&self, ctx: &PortfolioContext) -> Vec<ActionCandidate> {
        if ctx.country_allocations.is_empty() || ctx.country_to_group.is_empty() || ctx.country_weights.is_empty() {
            return vec![];
        }
        let mut out = Vec::new();
        for position in &ctx.positions {
            if position.quantity <= 0 {
                continue;
            }
            let Some(security) = ctx.stock_by_symbol(&position.symbol) else {
                continue;
            };
            if !security.allow_sell {
                continue;
            }
            let Some(country) = &security.country else {
                continue;
            };
            let Some((group, target, current)) = group_delta(ctx, country) else {
                continue;
            };
            if current <= target + self.overweight_threshold {
                continue;
            }
            let overweight = current - target;
            let current_price = position.current_price.unwrap_or(position.avg_price);
            if current_price <= Decimal::ZERO {
                continue;
            }
            let sell_qty = ((position.quantity as f64) * self.sell_fraction) as i64;
            let sell_qty = sell_qty.max(security.min_lot as i64).min(position.quantity);
            if sell_qty <= 0 {
                continue;
            }
            let fx = ctx.fx_to_eur(position.currency);
            let sell_value_eur = to_f64(current_price) * fx * sell_qty as f64;
            let quality = ctx.quality_score(&position.symbol);

            out.push(ActionCandidate {
                side: Side::Sell,
                symbol: position.symbol.clone(),
                name: security.name.clone(),
                quantity: sell_qty,
                price: current_price,
                value_eur: decimal(sell_value_eur),
                currency: position.currency,
                priority: overweight * 2.0 - quality * 0.5,
                reason: format!("Overweight {group} by {:.1}%", overweight * 100.0),
                tags: vec!["rebalance".into(), format!("overweight_{}", group.to_lowercase())],
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{Currency, Position, Security};
    use rust_decimal_macros::dec;

    fn security(symbol: &str) -> Security {
        Security {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            currency: Currency::Eur,
            country: Some("DE".into()),
            industry: None,
            min_lot: 1,
            allow_buy: true,
            allow_sell: true,
            active: true,
            priority_multiplier: dec!(1),
            yahoo_symbol: None,
            isin: None,
            ml_enabled: false,
            last_synced: None,
        }
    }

    fn position(symbol: &str, qty: i64, avg: Decimal, current: Decimal) -> Position {
        Position {
            symbol: symbol.to_string(),
            quantity: qty,
            avg_price: avg,
            current_price: Some(current),
            currency: Currency::Eur,
            market_value_eur: Some(current * decimal(qty as f64)),
            cost_basis_eur: Some(avg * decimal(qty as f64)),
            first_bought_at: None,
        }
    }

    #[tokio::test]
    async fn opportunity_buys_skips_low_quality() {
        let calculator = OpportunityBuysCalculator::default();
        let mut ctx = PortfolioContext::default();
        ctx.securities.push(security("AAA"));
        ctx.positions.push(position("AAA", 0, dec!(10), dec!(10)));
        ctx.security_scores.insert("AAA".into(), 0.4);
        let result = calculator.calculate(&ctx).await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn opportunity_buys_emits_sized_buy_for_quality_name() {
        let calculator = OpportunityBuysCalculator::default();
        let mut ctx = PortfolioContext::default();
        ctx.securities.push(security("AAA"));
        ctx.positions.push(position("AAA", 0, dec!(10), dec!(10)));
        ctx.security_scores.insert("AAA".into(), 0.9);
        let result = calculator.calculate(&ctx).await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].side, Side::Buy);
        assert_eq!(result[0].quantity, 100);
    }

    #[tokio::test]
    async fn averaging_down_requires_existing_position_in_loss_band() {
        let calculator = AveragingDownCalculator::default();
        let mut ctx = PortfolioContext::default();
        ctx.securities.push(security("AAA"));
        ctx.positions.push(position("AAA", 10, dec!(100), dec!(90)));
        ctx.security_scores.insert("AAA".into(), 0.8);
        let result = calculator.calculate(&ctx).await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].side, Side::Buy);
    }

    #[tokio::test]
    async fn averaging_down_rejects_falling_knife() {
        let calculator = AveragingDownCalculator::default();
        let mut ctx = PortfolioContext::default();
        ctx.securities.push(security("AAA"));
        ctx.positions.push(position("AAA", 10, dec!(100), dec!(50)));
        ctx.security_scores.insert("AAA".into(), 0.8);
        let result = calculator.calculate(&ctx).await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn profit_taking_sells_fraction_of_windfall_position() {
        let calculator = ProfitTakingCalculator::default();
        let mut ctx = PortfolioContext::default();
        ctx.securities.push(security("AAA"));
        ctx.positions.push(position("AAA", 100, dec!(10), dec!(15)));
        let result = calculator.calculate(&ctx).await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].side, Side::Sell);
        assert!(result[0].quantity > 0 && result[0].quantity < 100);
    }

    #[tokio::test]
    async fn rebalance_buys_requires_allocation_maps() {
        let calculator = RebalanceBuysCalculator::default();
        let mut ctx = PortfolioContext::default();
        ctx.securities.push(security("AAA"));
        ctx.positions.push(position("AAA", 0, dec!(10), dec!(10)));
        let result = calculator.calculate(&ctx).await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn rebalance_buys_targets_underweight_group() {
        let calculator = RebalanceBuysCalculator::default();
        let mut ctx = PortfolioContext::default();
        ctx.securities.push(security("AAA"));
        ctx.positions.push(position("AAA", 0, dec!(10), dec!(10)));
        ctx.country_to_group.insert("DE".into(), "EUROPE".into());
        ctx.country_weights.insert("EUROPE".into(), 0.30);
        ctx.country_allocations.insert("EUROPE".into(), 0.10);
        let result = calculator.calculate(&ctx).await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].side, Side::Buy);
    }

    #[tokio::test]
    async fn rebalance_sells_trims_overweight_group() {
        let calculator = RebalanceSellsCalculator::default();
        let mut ctx = PortfolioContext::default();
        ctx.securities.push(security("AAA"));
        ctx.positions.push(position("AAA", 100, dec!(10), dec!(10)));
        ctx.country_to_group.insert("DE".into(), "EUROPE".into());
        ctx.country_weights.insert("EUROPE".into(), 0.10);
        ctx.country_allocations.insert("EUROPE".into(), 0.40);
        let result = calculator.calculate(&ctx).await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].side, Side::Sell);
    }
}
