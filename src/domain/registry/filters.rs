//! Sequence filters.
//!
//! Filters prune an already-generated set of candidate sequences against a
//! cross-sequence constraint. A filter with nothing to check is a pass-
//! through, never an error.

use crate::domain::model::{ActionCandidate, Side};

use super::{PortfolioContext, SequenceFilter};

/// Drops any sequence whose BUY legs contain a pair with `|correlation| >
/// threshold`. The correlation matrix is keyed `"SYM1:SYM2"`; both orderings
/// of a pair are checked since callers are not guaranteed to have inserted
/// it under a canonical key. With no correlation data at all, every sequence
/// passes through unchanged.
pub struct CorrelationAwareFilter {
    threshold: f64,
}

impl CorrelationAwareFilter {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    fn correlation(ctx: &PortfolioContext, a: &str, b: &str) -> Option<f64> {
        ctx.correlation_matrix
            .get(&format!("{a}:{b}"))
            .or_else(|| ctx.correlation_matrix.get(&format!("{b}:{a}")))
            .copied()
    }

    fn violates(&self, ctx: &PortfolioContext, buys: &[&ActionCandidate]) -> bool {
        for i in 0..buys.len() {
            for j in (i + 1)..buys.len() {
                if let Some(rho) = Self::correlation(ctx, &buys[i].symbol, &buys[j].symbol) {
                    if rho.abs() > self.threshold {
                        return true;
                    }
                }
            }
        }
        false
    }
}

impl Default for CorrelationAwareFilter {
    fn default() -> Self {
        Self::new(0.7)
    }
}

impl SequenceFilter for CorrelationAwareFilter {
    fn name(&self) -> &str {
        "correlation_aware"
    }

    fn filter(
        &self,
        sequences: Vec<Vec<ActionCandidate>>,
        ctx: &PortfolioContext,
    ) -> Vec<Vec<ActionCandidate>> {
        if ctx.correlation_matrix.is_empty() {
            return sequences;
        }
        sequences
            .into_iter()
            .filter(|sequence| {
                let buys: Vec<&ActionCandidate> =
                    sequence.iter().filter(|c| c.side == Side::Buy).collect();
                !self.violates(ctx, &buys)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::Currency;
    use rust_decimal::Decimal;

    fn buy(symbol: &str) -> ActionCandidate {
        ActionCandidate {
            side: Side::Buy,
            symbol: symbol.into(),
            name: symbol.into(),
            quantity: 1,
            price: Decimal::new(100, 0),
            value_eur: Decimal::new(100, 0),
            currency: Currency::Eur,
            priority: 1.0,
            reason: "test".into(),
            tags: vec![],
        }
    }

    fn ctx_with_correlations(pairs: &[(&str, f64)]) -> PortfolioContext {
        let mut ctx = PortfolioContext::default();
        for (key, rho) in pairs {
            ctx.correlation_matrix.insert((*key).to_string(), *rho);
        }
        ctx
    }

    #[test]
    fn drops_sequences_with_highly_correlated_buys() {
        let ctx = ctx_with_correlations(&[("GLD:SLV", 0.92), ("SPY:QQQ", 0.93), ("GLD:SPY", 0.25)]);
        let filter = CorrelationAwareFilter::new(0.7);
        let sequences = vec![
            vec![buy("GLD"), buy("SLV")],
            vec![buy("GLD"), buy("SPY")],
            vec![buy("SPY"), buy("QQQ")],
        ];
        let out = filter.filter(sequences, &ctx);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0][0].symbol, "GLD");
        assert_eq!(out[0][1].symbol, "SPY");
    }

    #[test]
    fn checks_both_key_orderings() {
        let ctx = ctx_with_correlations(&[("SLV:GLD", 0.92)]);
        let filter = CorrelationAwareFilter::new(0.7);
        let out = filter.filter(vec![vec![buy("GLD"), buy("SLV")]], &ctx);
        assert!(out.is_empty());
    }

    #[test]
    fn passes_through_with_no_correlation_data() {
        let ctx = PortfolioContext::default();
        let filter = CorrelationAwareFilter::default();
        let sequences = vec![vec![buy("GLD"), buy("SLV")]];
        let out = filter.filter(sequences, &ctx);
        assert_eq!(out.len(), 1);
    }
}
