//! Sequence generators.
//!
//! Unlike the greedy [`super::PatternGenerator`]s, these compose the full
//! candidate pool combinatorially, trading completeness for the caps needed
//! to keep evaluation tractable.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use rand::prelude::*;

use crate::domain::model::{ActionCandidate, Side};

use super::{PortfolioContext, SequenceGenerator};

fn sells_first(mut sells: Vec<ActionCandidate>, buys: Vec<ActionCandidate>) -> Vec<ActionCandidate> {
    sells.extend(buys);
    sells
}

/// Exhaustively combines up to `max_sells` sell legs with up to `max_buys`
/// buy legs, under an overall `max_steps`, `max_candidates` (input pool cap
/// per side), and `max_combinations` (output cap) budget. Every emitted
/// sequence keeps the sells-first-then-buys ordering invariant.
pub struct CombinatorialGenerator {
    pub max_sells: usize,
    pub max_buys: usize,
    pub max_steps: usize,
    pub max_candidates: usize,
    pub max_combinations: usize,
}

impl Default for CombinatorialGenerator {
    fn default() -> Self {
        Self {
            max_sells: 2,
            max_buys: 3,
            max_steps: 4,
            max_candidates: 12,
            max_combinations: 500,
        }
    }
}

fn combinations<T: Clone>(items: &[T], k: usize) -> Vec<Vec<T>> {
    if k == 0 {
        return vec![vec![]];
    }
    if items.is_empty() || k > items.len() {
        return vec![];
    }
    let mut out = Vec::new();
    let (first, rest) = (items[0].clone(), &items[1..]);
    for mut with_first in combinations(rest, k - 1) {
        with_first.insert(0, first.clone());
        out.push(with_first);
    }
    out.extend(combinations(rest, k));
    out
}

impl SequenceGenerator for CombinatorialGenerator {
    fn name(&self) -> &str {
        "combinatorial"
    }

    fn generate(&self, opportunities: &[ActionCandidate], _ctx: &PortfolioContext) -> Vec<Vec<ActionCandidate>> {
        let mut sells: Vec<ActionCandidate> = opportunities
            .iter()
            .filter(|c| c.side == Side::Sell)
            .cloned()
            .collect();
        let mut buys: Vec<ActionCandidate> = opportunities
            .iter()
            .filter(|c| c.side == Side::Buy)
            .cloned()
            .collect();
        sells.sort_by(|a, b| b.priority.partial_cmp(&a.priority).unwrap_or(std::cmp::Ordering::Equal));
        buys.sort_by(|a, b| b.priority.partial_cmp(&a.priority).unwrap_or(std::cmp::Ordering::Equal));
        sells.truncate(self.max_candidates);
        buys.truncate(self.max_candidates);

        let mut out = Vec::new();
        'outer: for sell_count in 0..=self.max_sells.min(sells.len()) {
            for sell_combo in combinations(&sells, sell_count) {
                for buy_count in 0..=self.max_buys.min(buys.len()) {
                    if sell_combo.len() + buy_count == 0 {
                        continue;
                    }
                    if sell_combo.len() + buy_count > self.max_steps {
                        continue;
                    }
                    for buy_combo in combinations(&buys, buy_count) {
                        out.push(sells_first(sell_combo.clone(), buy_combo));
                        if out.len() >= self.max_combinations {
                            break 'outer;
                        }
                    }
                }
            }
        }
        out
    }
}

fn country_industry_sets(
    sequence: &[ActionCandidate],
    ctx: &PortfolioContext,
) -> (HashSet<String>, HashSet<String>) {
    let mut countries = HashSet::new();
    let mut industries = HashSet::new();
    for candidate in sequence.iter().filter(|c| c.side == Side::Buy) {
        if let Some(security) = ctx.stock_by_symbol(&candidate.symbol) {
            if let Some(country) = &security.country {
                countries.insert(country.clone());
            }
            for industry in security.industries() {
                industries.insert(industry);
            }
        }
    }
    (countries, industries)
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Samples sequences weighted by total priority rather than enumerating
/// exhaustively, rejecting any candidate whose buy-leg country AND industry
/// footprint overlaps more than 80% with one of the last 10 accepted
/// sequences (on both axes at once — a near-duplicate on only one axis is
/// still diverse enough to keep).
pub struct EnhancedCombinatorialGenerator {
    pub sample_count: usize,
    pub max_steps: usize,
    pub overlap_threshold: f64,
    recent: Mutex<VecDeque<(HashSet<String>, HashSet<String>)>>,
}

impl EnhancedCombinatorialGenerator {
    pub fn new(sample_count: usize, max_steps: usize) -> Self {
        Self {
            sample_count,
            max_steps,
            overlap_threshold: 0.8,
            recent: Mutex::new(VecDeque::with_capacity(10)),
        }
    }

    fn is_diverse_enough(&self, candidate: &(HashSet<String>, HashSet<String>)) -> bool {
        let recent = self.recent.lock().expect("recent sequence lock poisoned");
        !recent.iter().any(|(countries, industries)| {
            jaccard(&candidate.0, countries) > self.overlap_threshold
                && jaccard(&candidate.1, industries) > self.overlap_threshold
        })
    }

    fn remember(&self, fingerprint: (HashSet<String>, HashSet<String>)) {
        let mut recent = self.recent.lock().expect("recent sequence lock poisoned");
        recent.push_back(fingerprint);
        while recent.len() > 10 {
            recent.pop_front();
        }
    }
}

impl Default for EnhancedCombinatorialGenerator {
    fn default() -> Self {
        Self::new(50, 4)
    }
}

impl SequenceGenerator for EnhancedCombinatorialGenerator {
    fn name(&self) -> &str {
        "enhanced_combinatorial"
    }

    fn generate(&self, opportunities: &[ActionCandidate], ctx: &PortfolioContext) -> Vec<Vec<ActionCandidate>> {
        let sells: Vec<ActionCandidate> = opportunities
            .iter()
            .filter(|c| c.side == Side::Sell)
            .cloned()
            .collect();
        let buys: Vec<ActionCandidate> = opportunities
            .iter()
            .filter(|c| c.side == Side::Buy)
            .cloned()
            .collect();
        if sells.is_empty() && buys.is_empty() {
            return vec![];
        }

        let mut rng = rand::rng();
        let mut out = Vec::new();

        for _ in 0..self.sample_count {
            if out.len() >= self.sample_count {
                break;
            }
            let step_count = rng.random_range(1..=self.max_steps.max(1));
            let mut sequence = Vec::new();

            let sell_picks = weighted_sample(&sells, step_count.min(sells.len()), &mut rng);
            sequence.extend(sell_picks);
            let remaining = self.max_steps.saturating_sub(sequence.len());
            let buy_picks = weighted_sample(&buys, remaining.min(buys.len()).max(0), &mut rng);
            sequence.extend(buy_picks);

            if sequence.is_empty() {
                continue;
            }

            let fingerprint = country_industry_sets(&sequence, ctx);
            if !self.is_diverse_enough(&fingerprint) {
                continue;
            }
            self.remember(fingerprint);
            out.push(sequence);
        }
        out
    }
}

/// Sample `count` distinct candidates from `pool` without replacement,
/// weighted by `priority` (clamped to a small positive floor so a
/// zero-or-negative priority candidate can still occasionally be sampled).
fn weighted_sample(pool: &[ActionCandidate], count: usize, rng: &mut impl Rng) -> Vec<ActionCandidate> {
    if count == 0 || pool.is_empty() {
        return vec![];
    }
    let mut remaining: Vec<ActionCandidate> = pool.to_vec();
    let mut out = Vec::new();
    for _ in 0..count.min(remaining.len()) {
        let weights: Vec<f64> = remaining.iter().map(|c| c.priority.max(0.01)).collect();
        let total: f64 = weights.iter().sum();
        let mut pick = rng.random_range(0.0..total);
        let mut idx = 0;
        for (i, weight) in weights.iter().enumerate() {
            if pick < *weight {
                idx = i;
                break;
            }
            pick -= weight;
        }
        out.push(remaining.remove(idx));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::Currency;
    use rust_decimal::Decimal;

    fn candidate(side: Side, symbol: &str, priority: f64) -> ActionCandidate {
        ActionCandidate {
            side,
            symbol: symbol.into(),
            name: symbol.into(),
            quantity: 1,
            price: Decimal::new(100, 0),
            value_eur: Decimal::new(100, 0),
            currency: Currency::Eur,
            priority,
            reason: "test".into(),
            tags: vec![],
        }
    }

    #[test]
    fn combinatorial_emits_sells_before_buys_in_every_sequence() {
        let gen = CombinatorialGenerator::default();
        let opportunities = vec![
            candidate(Side::Sell, "S1", 1.0),
            candidate(Side::Buy, "B1", 2.0),
            candidate(Side::Buy, "B2", 1.5),
        ];
        let ctx = PortfolioContext::default();
        let out = gen.generate(&opportunities, &ctx);
        assert!(!out.is_empty());
        for sequence in &out {
            let mut seen_buy = false;
            for leg in sequence {
                if leg.side == Side::Buy {
                    seen_buy = true;
                } else {
                    assert!(!seen_buy, "sell leg appeared after a buy leg");
                }
            }
        }
    }

    #[test]
    fn combinatorial_respects_max_combinations() {
        let gen = CombinatorialGenerator {
            max_sells: 2,
            max_buys: 2,
            max_steps: 4,
            max_candidates: 10,
            max_combinations: 3,
        };
        let opportunities: Vec<ActionCandidate> = (0..5)
            .map(|i| candidate(Side::Buy, &format!("B{i}"), 1.0))
            .collect();
        let ctx = PortfolioContext::default();
        let out = gen.generate(&opportunities, &ctx);
        assert!(out.len() <= 3);
    }

    #[test]
    fn combinatorial_never_emits_empty_sequence() {
        let gen = CombinatorialGenerator::default();
        let ctx = PortfolioContext::default();
        let out = gen.generate(&[], &ctx);
        assert!(out.is_empty());
    }

    #[test]
    fn enhanced_combinatorial_returns_nonempty_when_candidates_exist() {
        let gen = EnhancedCombinatorialGenerator::new(20, 3);
        let opportunities = vec![
            candidate(Side::Buy, "B1", 3.0),
            candidate(Side::Buy, "B2", 2.0),
            candidate(Side::Sell, "S1", 1.0),
        ];
        let ctx = PortfolioContext::default();
        let out = gen.generate(&opportunities, &ctx);
        assert!(!out.is_empty());
    }
}
