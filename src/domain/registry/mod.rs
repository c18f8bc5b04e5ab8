//! Opportunity / pattern / sequence / filter registry.
//!
//! Four trait families turn a portfolio snapshot into ranked, ordered trade
//! sequences: opportunity calculators propose individual `ActionCandidate`s,
//! pattern generators compose those into short greedy sequences, sequence
//! generators compose them combinatorially, and sequence filters prune the
//! result. Each concrete implementation is a struct holding its own tuned
//! parameters (set at construction from config), not a dict of knobs passed
//! at call time — mirroring `domain::risk::filters::RiskValidator` from the
//! trading side of this codebase.

pub mod filters;
pub mod opportunities;
pub mod patterns;
pub mod sequences;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::model::{ActionCandidate, Currency, Position, Security};

/// Read-only view into portfolio state shared by every opportunity
/// calculator. Built once per planning cycle.
#[derive(Debug, Clone, Default)]
pub struct PortfolioContext {
    pub securities: Vec<Security>,
    pub positions: Vec<Position>,
    /// Quality score in [0,1] per symbol; absent symbols default to 0.5.
    pub security_scores: HashMap<String, f64>,
    /// Current allocation by country group, e.g. "NORTH_AMERICA" -> 0.42.
    pub country_allocations: HashMap<String, f64>,
    pub country_to_group: HashMap<String, String>,
    pub country_weights: HashMap<String, f64>,
    pub industry_allocations: HashMap<String, f64>,
    pub industry_to_group: HashMap<String, String>,
    pub industry_weights: HashMap<String, f64>,
    /// Rate to multiply a native-currency amount by to get EUR.
    pub exchange_rates_to_eur: HashMap<Currency, f64>,
    /// Pairwise correlation, keyed `"SYM1:SYM2"` with SYM1 < SYM2.
    pub correlation_matrix: HashMap<String, f64>,
}

impl PortfolioContext {
    pub fn position_for(&self, symbol: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.symbol == symbol)
    }

    pub fn stock_by_symbol(&self, symbol: &str) -> Option<&Security> {
        self.securities.iter().find(|s| s.symbol == symbol)
    }

    pub fn quality_score(&self, symbol: &str) -> f64 {
        self.security_scores.get(symbol).copied().unwrap_or(0.5)
    }

    pub fn fx_to_eur(&self, currency: Currency) -> f64 {
        if currency == Currency::Eur {
            1.0
        } else {
            self.exchange_rates_to_eur.get(&currency).copied().unwrap_or(1.0)
        }
    }
}

/// Produces candidate trades from one angle (quality buys, averaging down,
/// profit-taking, rebalancing). Registered under `name()` and toggled
/// declaratively through config.
#[async_trait]
pub trait OpportunityCalculator: Send + Sync {
    fn name(&self) -> &str;
    async fn calculate(&self, ctx: &PortfolioContext) -> Vec<ActionCandidate>;
}

/// A named collection of `ActionCandidate`s by calculator name, the input to
/// every pattern and sequence generator.
pub type OpportunitySet = HashMap<String, Vec<ActionCandidate>>;

/// Composes candidates from an `OpportunitySet` into short, greedy
/// sequences, bounded by available cash.
pub trait PatternGenerator: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, opportunities: &OpportunitySet, available_cash_eur: f64) -> Vec<Vec<ActionCandidate>>;
}

/// Composes a flat candidate pool into sequences combinatorially. Must
/// respect sells-first-then-buys ordering within every sequence.
pub trait SequenceGenerator: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, opportunities: &[ActionCandidate], ctx: &PortfolioContext) -> Vec<Vec<ActionCandidate>>;
}

/// Removes sequences that violate a cross-sequence constraint (e.g.
/// correlated buys). A no-op filter returns its input unchanged.
pub trait SequenceFilter: Send + Sync {
    fn name(&self) -> &str;
    fn filter(&self, sequences: Vec<Vec<ActionCandidate>>, ctx: &PortfolioContext) -> Vec<Vec<ActionCandidate>>;
}

/// Named, declaratively-enabled trait object collections. One instance of
/// each registry is built at bootstrap from config and shared behind `Arc`.
#[derive(Clone, Default)]
pub struct OpportunityRegistry(HashMap<String, Arc<dyn OpportunityCalculator>>);

impl OpportunityRegistry {
    pub fn register(&mut self, calculator: Arc<dyn OpportunityCalculator>) {
        self.0.insert(calculator.name().to_string(), calculator);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn OpportunityCalculator>> {
        self.0.get(name)
    }

    pub fn enabled(&self, names: &[String]) -> Vec<&Arc<dyn OpportunityCalculator>> {
        names.iter().filter_map(|n| self.0.get(n)).collect()
    }

    pub async fn run_all(&self, names: &[String], ctx: &PortfolioContext) -> OpportunitySet {
        let mut out = OpportunitySet::new();
        for calculator in self.enabled(names) {
            out.insert(calculator.name().to_string(), calculator.calculate(ctx).await);
        }
        out
    }
}

#[derive(Clone, Default)]
pub struct PatternRegistry(HashMap<String, Arc<dyn PatternGenerator>>);

impl PatternRegistry {
    pub fn register(&mut self, generator: Arc<dyn PatternGenerator>) {
        self.0.insert(generator.name().to_string(), generator);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn PatternGenerator>> {
        self.0.get(name)
    }
}

#[derive(Clone, Default)]
pub struct SequenceGeneratorRegistry(HashMap<String, Arc<dyn SequenceGenerator>>);

impl SequenceGeneratorRegistry {
    pub fn register(&mut self, generator: Arc<dyn SequenceGenerator>) {
        self.0.insert(generator.name().to_string(), generator);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn SequenceGenerator>> {
        self.0.get(name)
    }
}

#[derive(Clone, Default)]
pub struct SequenceFilterRegistry(HashMap<String, Arc<dyn SequenceFilter>>);

impl SequenceFilterRegistry {
    pub fn register(&mut self, filter: Arc<dyn SequenceFilter>) {
        self.0.insert(filter.name().to_string(), filter);
    }

    pub fn apply_all(
        &self,
        names: &[String],
        mut sequences: Vec<Vec<ActionCandidate>>,
        ctx: &PortfolioContext,
    ) -> Vec<Vec<ActionCandidate>> {
        for name in names {
            if let Some(filter) = self.0.get(name) {
                sequences = filter.filter(sequences, ctx);
            }
        }
        sequences
    }
}

/// Whole-lot buy quantity spending as close to `target_value_eur` as
/// possible without exceeding it. Shared by every opportunity calculator
/// that sizes a new buy.
pub fn calculate_buy_quantity(target_value_eur: f64, price: f64, min_lot: u32, exchange_rate_to_eur: f64) -> SizedTrade {
    if price <= 0.0 || min_lot == 0 || exchange_rate_to_eur <= 0.0 {
        return SizedTrade { quantity: 0, value_eur: 0.0 };
    }
    let lot_value_eur = price * exchange_rate_to_eur * min_lot as f64;
    if lot_value_eur <= 0.0 {
        return SizedTrade { quantity: 0, value_eur: 0.0 };
    }
    let lots = (target_value_eur / lot_value_eur).floor().max(0.0);
    let quantity = (lots as i64) * min_lot as i64;
    SizedTrade {
        quantity,
        value_eur: quantity as f64 * price * exchange_rate_to_eur,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizedTrade {
    pub quantity: i64,
    pub value_eur: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calculate_buy_quantity_rounds_to_whole_lots() {
        let sized = calculate_buy_quantity(1000.0, 120.0, 5, 1.0);
        assert_eq!(sized.quantity, 40);
        assert!(sized.value_eur <= 1000.0);
    }

    #[test]
    fn calculate_buy_quantity_zero_when_too_small_for_one_lot() {
        let sized = calculate_buy_quantity(50.0, 120.0, 5, 1.0);
        assert_eq!(sized.quantity, 0);
    }
}
