//! Pattern generators.
//!
//! Each struct composes an [`OpportunitySet`] into one or more short, greedy
//! [`Sequence`]s. Every emitted sequence obeys the rigid sells-first,
//! buys-second ordering required of every sequence in the system.

use rust_decimal::prelude::ToPrimitive;

use crate::domain::model::{ActionCandidate, Side};

use super::{OpportunitySet, PatternGenerator};

fn all_candidates(opportunities: &OpportunitySet) -> Vec<ActionCandidate> {
    opportunities.values().flatten().cloned().collect()
}

fn split_sides(mut candidates: Vec<ActionCandidate>) -> (Vec<ActionCandidate>, Vec<ActionCandidate>) {
    candidates.sort_by(|a, b| b.priority.partial_cmp(&a.priority).unwrap_or(std::cmp::Ordering::Equal));
    let (sells, buys) = candidates.into_iter().partition(|c| c.side == Side::Sell);
    (sells, buys)
}

fn value_eur(c: &ActionCandidate) -> f64 {
    c.value_eur.to_f64().unwrap_or(0.0)
}

/// Greedy buys-only sequence, taken by descending priority until
/// `available_cash_eur` is exhausted.
pub struct DirectBuyPattern;

impl PatternGenerator for DirectBuyPattern {
    fn name(&self) -> &str {
        "direct_buy"
    }

    fn generate(&self, opportunities: &OpportunitySet, available_cash_eur: f64) -> Vec<Vec<ActionCandidate>> {
        let (_, buys) = split_sides(all_candidates(opportunities));
        let mut spent = 0.0;
        let mut sequence = Vec::new();
        for buy in buys {
            let cost = value_eur(&buy);
            if spent + cost > available_cash_eur {
                continue;
            }
            spent += cost;
            sequence.push(buy);
        }
        if sequence.is_empty() {
            vec![]
        } else {
            vec![sequence]
        }
    }
}

/// The single highest-priority feasible action: a sell (always feasible, it
/// raises cash) or a buy that fits within `available_cash_eur`.
pub struct SingleBestPattern;

impl PatternGenerator for SingleBestPattern {
    fn name(&self) -> &str {
        "single_best"
    }

    fn generate(&self, opportunities: &OpportunitySet, available_cash_eur: f64) -> Vec<Vec<ActionCandidate>> {
        let mut candidates = all_candidates(opportunities);
        candidates.sort_by(|a, b| b.priority.partial_cmp(&a.priority).unwrap_or(std::cmp::Ordering::Equal));

        for candidate in candidates {
            let feasible = match candidate.side {
                Side::Sell => true,
                Side::Buy => value_eur(&candidate) <= available_cash_eur,
            };
            if feasible {
                return vec![vec![candidate]];
            }
        }
        vec![]
    }
}

/// Sell windfalls first, reinvest the proceeds into quality buys.
pub struct ProfitTakingPattern;

impl PatternGenerator for ProfitTakingPattern {
    fn name(&self) -> &str {
        "profit_taking"
    }

    fn generate(&self, opportunities: &OpportunitySet, available_cash_eur: f64) -> Vec<Vec<ActionCandidate>> {
        let sells: Vec<ActionCandidate> = opportunities
            .get("profit_taking")
            .cloned()
            .unwrap_or_default();
        let sell_proceeds: f64 = sells.iter().map(value_eur).sum();

        let mut buys: Vec<ActionCandidate> = opportunities
            .get("opportunity_buys")
            .into_iter()
            .flatten()
            .chain(opportunities.get("rebalance_buys").into_iter().flatten())
            .cloned()
            .collect();
        buys.sort_by(|a, b| b.priority.partial_cmp(&a.priority).unwrap_or(std::cmp::Ordering::Equal));

        let mut budget = available_cash_eur + sell_proceeds;
        let mut reinvest = Vec::new();
        for buy in buys {
            let cost = value_eur(&buy);
            if cost > budget {
                continue;
            }
            budget -= cost;
            reinvest.push(buy);
        }

        if sells.is_empty() && reinvest.is_empty() {
            return vec![];
        }
        let mut sequence = sells;
        sequence.sort_by(|a, b| b.priority.partial_cmp(&a.priority).unwrap_or(std::cmp::Ordering::Equal));
        sequence.extend(reinvest);
        vec![sequence]
    }
}

/// Spend cash on the strongest opportunistic buys first; leftover budget
/// goes to rebalance buys.
pub struct OpportunityFirstPattern;

impl PatternGenerator for OpportunityFirstPattern {
    fn name(&self) -> &str {
        "opportunity_first"
    }

    fn generate(&self, opportunities: &OpportunitySet, available_cash_eur: f64) -> Vec<Vec<ActionCandidate>> {
        let (sells, _) = split_sides(all_candidates(opportunities));

        let mut opp_buys: Vec<ActionCandidate> =
            opportunities.get("opportunity_buys").cloned().unwrap_or_default();
        opp_buys.sort_by(|a, b| b.priority.partial_cmp(&a.priority).unwrap_or(std::cmp::Ordering::Equal));
        let mut rebalance_buys: Vec<ActionCandidate> =
            opportunities.get("rebalance_buys").cloned().unwrap_or_default();
        rebalance_buys.sort_by(|a, b| b.priority.partial_cmp(&a.priority).unwrap_or(std::cmp::Ordering::Equal));

        let mut budget = available_cash_eur;
        let mut buys = Vec::new();
        for buy in opp_buys.into_iter().chain(rebalance_buys) {
            let cost = value_eur(&buy);
            if cost > budget {
                continue;
            }
            budget -= cost;
            buys.push(buy);
        }

        if sells.is_empty() && buys.is_empty() {
            return vec![];
        }
        vec![sells.into_iter().chain(buys).collect()]
    }
}

/// Sell-only sequence, raising cash without reinvesting it this cycle.
pub struct CashGenerationPattern;

impl PatternGenerator for CashGenerationPattern {
    fn name(&self) -> &str {
        "cash_generation"
    }

    fn generate(&self, opportunities: &OpportunitySet, _available_cash_eur: f64) -> Vec<Vec<ActionCandidate>> {
        let mut sells: Vec<ActionCandidate> = opportunities
            .get("profit_taking")
            .into_iter()
            .flatten()
            .chain(opportunities.get("rebalance_sells").into_iter().flatten())
            .cloned()
            .collect();
        sells.sort_by(|a, b| b.priority.partial_cmp(&a.priority).unwrap_or(std::cmp::Ordering::Equal));
        if sells.is_empty() {
            vec![]
        } else {
            vec![sells]
        }
    }
}

/// Minimize trade count: the fewest, largest-value candidates that fit the
/// budget, one sequence.
pub struct CostOptimizedPattern;

impl PatternGenerator for CostOptimizedPattern {
    fn name(&self) -> &str {
        "cost_optimized"
    }

    fn generate(&self, opportunities: &OpportunitySet, available_cash_eur: f64) -> Vec<Vec<ActionCandidate>> {
        let (sells, mut buys) = split_sides(all_candidates(opportunities));
        buys.sort_by(|a, b| value_eur(b).partial_cmp(&value_eur(a)).unwrap_or(std::cmp::Ordering::Equal));

        let mut budget = available_cash_eur + sells.iter().map(value_eur).sum::<f64>();
        let mut chosen = Vec::new();
        for buy in buys {
            let cost = value_eur(&buy);
            if cost > budget {
                continue;
            }
            budget -= cost;
            chosen.push(buy);
        }
        if sells.is_empty() && chosen.is_empty() {
            return vec![];
        }
        vec![sells.into_iter().chain(chosen).collect()]
    }
}

/// The full rebalance-buy/rebalance-sell set as one sequence, unfiltered by
/// cash — intended to be cash-reconciled downstream rather than trimmed here.
pub struct DeepRebalancePattern;

impl PatternGenerator for DeepRebalancePattern {
    fn name(&self) -> &str {
        "deep_rebalance"
    }

    fn generate(&self, opportunities: &OpportunitySet, _available_cash_eur: f64) -> Vec<Vec<ActionCandidate>> {
        let mut sells: Vec<ActionCandidate> =
            opportunities.get("rebalance_sells").cloned().unwrap_or_default();
        let mut buys: Vec<ActionCandidate> =
            opportunities.get("rebalance_buys").cloned().unwrap_or_default();
        if sells.is_empty() && buys.is_empty() {
            return vec![];
        }
        sells.sort_by(|a, b| b.priority.partial_cmp(&a.priority).unwrap_or(std::cmp::Ordering::Equal));
        buys.sort_by(|a, b| b.priority.partial_cmp(&a.priority).unwrap_or(std::cmp::Ordering::Equal));
        vec![sells.into_iter().chain(buys).collect()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::Currency;
    use rust_decimal::Decimal;

    fn candidate(side: Side, symbol: &str, value_eur: f64, priority: f64) -> ActionCandidate {
        ActionCandidate {
            side,
            symbol: symbol.into(),
            name: symbol.into(),
            quantity: 1,
            price: Decimal::new(100, 0),
            value_eur: Decimal::from_f64_retain(value_eur).unwrap(),
            currency: Currency::Eur,
            priority,
            reason: "test".into(),
            tags: vec![],
        }
    }

    #[test]
    fn direct_buy_stops_at_cash_budget() {
        let mut set = OpportunitySet::new();
        set.insert(
            "opportunity_buys".into(),
            vec![
                candidate(Side::Buy, "A", 600.0, 2.0),
                candidate(Side::Buy, "B", 600.0, 1.0),
            ],
        );
        let out = DirectBuyPattern.generate(&set, 1000.0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), 1);
        assert_eq!(out[0][0].symbol, "A");
    }

    #[test]
    fn single_best_prefers_sells_always_feasible() {
        let mut set = OpportunitySet::new();
        set.insert("profit_taking".into(), vec![candidate(Side::Sell, "S", 100.0, 5.0)]);
        set.insert("opportunity_buys".into(), vec![candidate(Side::Buy, "B", 2_000_000.0, 10.0)]);
        let out = SingleBestPattern.generate(&set, 100.0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0][0].symbol, "S");
    }

    #[test]
    fn deep_rebalance_orders_sells_before_buys() {
        let mut set = OpportunitySet::new();
        set.insert("rebalance_sells".into(), vec![candidate(Side::Sell, "S", 100.0, 1.0)]);
        set.insert("rebalance_buys".into(), vec![candidate(Side::Buy, "B", 100.0, 1.0)]);
        let out = DeepRebalancePattern.generate(&set, 0.0);
        assert_eq!(out[0][0].side, Side::Sell);
        assert_eq!(out[0][1].side, Side::Buy);
    }
}
