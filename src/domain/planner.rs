//! Planner incremental evaluator (C9).
//!
//! A batched search over plausible action sequences, keyed by a hash of the
//! current portfolio state. Sequence generation and per-sequence scoring are
//! split across possibly-many calls so neither blocks the event loop for
//! long: call [`Planner::ensure_sequences`] once per portfolio_hash, then
//! [`Planner::evaluate_batch`] repeatedly until [`Planner::is_finished`].

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::domain::events::{EventBus, PlannerProgress, TradingEvent};
use crate::domain::model::{ActionCandidate, PlannerSequence, PortfolioHash, SequenceStatus};
use crate::domain::registry::{
    OpportunityRegistry, PatternRegistry, PortfolioContext, SequenceFilterRegistry,
    SequenceGeneratorRegistry,
};
use crate::domain::repositories::PlannerRepository;
use crate::domain::scoring::Scorer;

/// Self-trigger depth past which the planner refuses to chain another
/// API-driven batch and instead waits for the scheduler to re-enter it.
pub const SELF_TRIGGER_DEPTH_CAP: u32 = 100_000;

#[derive(Debug, Clone, Copy)]
pub struct PlannerBatchSizes {
    pub scheduled: u32,
    pub api_driven: u32,
}

impl Default for PlannerBatchSizes {
    fn default() -> Self {
        Self {
            scheduled: 50,
            api_driven: 20,
        }
    }
}

/// Inputs a caller must supply to score one candidate end-state; these
/// depend on data (metrics, diversification) the planner itself has no
/// opinion about.
pub struct EndStateInputs<'a> {
    pub total_value_eur: f64,
    pub diversification_score: f64,
    pub metrics_cache: &'a HashMap<String, crate::domain::scoring::MetricSet>,
    pub opinion_score: f64,
}

fn sequence_hash(actions: &[ActionCandidate]) -> String {
    let mut hasher = Sha256::new();
    for action in actions {
        hasher.update(action.symbol.as_bytes());
        hasher.update([action.side as u8]);
        hasher.update(action.quantity.to_le_bytes());
    }
    hex::encode(&hasher.finalize()[..16])
}

/// Apply a sequence's actions to the current EUR-valued position map,
/// producing the end state positions a score is computed over. Sells remove
/// value, buys add it, entirely in EUR terms (the planner doesn't need the
/// native-currency price once a candidate carries `value_eur`).
fn simulate_end_state(
    current_positions_eur: &HashMap<String, f64>,
    actions: &[ActionCandidate],
) -> HashMap<String, f64> {
    use rust_decimal::prelude::ToPrimitive;

    let mut state = current_positions_eur.clone();
    for action in actions {
        let delta = action.value_eur.to_f64().unwrap_or(0.0);
        let entry = state.entry(action.symbol.clone()).or_insert(0.0);
        match action.side {
            crate::domain::model::Side::Buy => *entry += delta,
            crate::domain::model::Side::Sell => *entry -= delta,
        }
        if *entry <= 0.0 {
            state.remove(&action.symbol);
        }
    }
    state
}

pub struct Planner {
    repo: Arc<dyn PlannerRepository>,
    opportunities: Arc<OpportunityRegistry>,
    patterns: Arc<PatternRegistry>,
    sequence_generators: Arc<SequenceGeneratorRegistry>,
    filters: Arc<SequenceFilterRegistry>,
    scorer: Scorer,
    event_bus: Arc<EventBus>,
    batch_sizes: PlannerBatchSizes,
}

impl Planner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo: Arc<dyn PlannerRepository>,
        opportunities: Arc<OpportunityRegistry>,
        patterns: Arc<PatternRegistry>,
        sequence_generators: Arc<SequenceGeneratorRegistry>,
        filters: Arc<SequenceFilterRegistry>,
        scorer: Scorer,
        event_bus: Arc<EventBus>,
        batch_sizes: PlannerBatchSizes,
    ) -> Self {
        Self {
            repo,
            opportunities,
            patterns,
            sequence_generators,
            filters,
            scorer,
            event_bus,
            batch_sizes,
        }
    }

    /// If no sequences exist yet for `hash`, generate them: every enabled
    /// opportunity calculator, then every enabled pattern/sequence
    /// generator, then every enabled filter, persisted as `unevaluated`.
    pub async fn ensure_sequences(
        &self,
        hash: &PortfolioHash,
        ctx: &PortfolioContext,
        available_cash_eur: f64,
        enabled_opportunities: &[String],
        enabled_patterns: &[String],
        enabled_sequence_generators: &[String],
        enabled_filters: &[String],
    ) -> anyhow::Result<()> {
        if self.repo.has_sequences(&hash.0).await? {
            return Ok(());
        }

        let opportunity_set = self.opportunities.run_all(enabled_opportunities, ctx).await;
        let flat: Vec<ActionCandidate> = opportunity_set.values().flatten().cloned().collect();

        let mut candidate_sequences: Vec<Vec<ActionCandidate>> = Vec::new();
        for name in enabled_patterns {
            if let Some(pattern) = self.patterns.get(name) {
                candidate_sequences.extend(pattern.generate(&opportunity_set, available_cash_eur));
            }
        }
        for name in enabled_sequence_generators {
            if let Some(generator) = self.sequence_generators.get(name) {
                candidate_sequences.extend(generator.generate(&flat, ctx));
            }
        }

        let filtered = self
            .filters
            .apply_all(enabled_filters, candidate_sequences, ctx);

        let sequences: Vec<PlannerSequence> = filtered
            .into_iter()
            .map(|actions| PlannerSequence {
                portfolio_hash: hash.clone(),
                sequence_hash: sequence_hash(&actions),
                actions,
                status: SequenceStatus::Unevaluated,
                end_state_score: None,
            })
            .collect();

        let sequence_count = sequences.len();
        if !sequences.is_empty() {
            self.repo.persist_sequences(sequences).await?;
        }
        self.event_bus
            .publish(TradingEvent::PlannerSequencesGenerated {
                portfolio_hash: hash.0.clone(),
                sequence_count,
            })
            .await;
        Ok(())
    }

    /// Score up to `batch_size` unevaluated sequences for `hash` against the
    /// end state they would produce, then emit `PLANNER_BATCH_COMPLETE`.
    pub async fn evaluate_batch(
        &self,
        hash: &PortfolioHash,
        current_positions_eur: &HashMap<String, f64>,
        inputs: &EndStateInputs<'_>,
        api_driven: bool,
    ) -> anyhow::Result<PlannerProgress> {
        let batch_size = if api_driven {
            self.batch_sizes.api_driven
        } else {
            self.batch_sizes.scheduled
        };

        let batch = self.repo.get_unevaluated_batch(&hash.0, batch_size).await?;
        for sequence in &batch {
            let end_state = simulate_end_state(current_positions_eur, &sequence.actions);
            let score = self.scorer.score_portfolio(
                &end_state,
                inputs.total_value_eur,
                inputs.diversification_score,
                inputs.metrics_cache,
                inputs.opinion_score,
            );
            self.repo
                .mark_sequence_evaluated(&hash.0, &sequence.sequence_hash, score)
                .await?;
            self.event_bus
                .publish(TradingEvent::SequenceEvaluated {
                    sequence_hash: sequence.sequence_hash.clone(),
                    end_state_score: score,
                })
                .await;
        }

        let progress = self.progress_for(hash).await?;
        self.event_bus
            .publish(TradingEvent::PlannerBatchComplete {
                progress: progress.clone(),
            })
            .await;
        Ok(progress)
    }

    pub async fn progress_for(&self, hash: &PortfolioHash) -> anyhow::Result<PlannerProgress> {
        let has_sequences = self.repo.has_sequences(&hash.0).await?;
        let total_sequences = self.repo.get_total_sequence_count(&hash.0).await?;
        let evaluated_count = self.repo.get_evaluation_count(&hash.0).await?;
        let is_finished = self.repo.are_all_sequences_evaluated(&hash.0).await?;
        let progress_percentage = if total_sequences == 0 {
            0.0
        } else {
            (evaluated_count as f64 / total_sequences as f64) * 100.0
        };
        Ok(PlannerProgress {
            has_sequences,
            total_sequences,
            evaluated_count,
            is_planning: has_sequences && !is_finished,
            is_finished,
            portfolio_hash_prefix: hash.short().to_string(),
            progress_percentage,
        })
    }

    pub async fn is_finished(&self, hash: &PortfolioHash) -> anyhow::Result<bool> {
        self.repo.are_all_sequences_evaluated(&hash.0).await
    }

    pub async fn get_best_result(&self, hash: &PortfolioHash) -> anyhow::Result<Option<PlannerSequence>> {
        self.repo.get_best_result(&hash.0).await
    }

    pub async fn get_best_sequence_from_hash(
        &self,
        hash: &PortfolioHash,
        sequence_hash: &str,
    ) -> anyhow::Result<Option<PlannerSequence>> {
        self.repo.get_best_sequence_from_hash(&hash.0, sequence_hash).await
    }

    /// Whether an API-driven self-trigger at `depth` should proceed, or stop
    /// and let the scheduler re-enter the planner on its own cadence instead.
    pub fn should_self_trigger(&self, depth: u32) -> bool {
        depth < SELF_TRIGGER_DEPTH_CAP
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{Currency, Side};
    use rust_decimal::Decimal;

    fn action(side: Side, symbol: &str, value_eur: f64) -> ActionCandidate {
        ActionCandidate {
            side,
            symbol: symbol.into(),
            name: symbol.into(),
            quantity: 1,
            price: Decimal::new(100, 0),
            value_eur: Decimal::from_f64_retain(value_eur).unwrap(),
            currency: Currency::Eur,
            priority: 1.0,
            reason: "test".into(),
            tags: vec![],
        }
    }

    #[test]
    fn sequence_hash_is_order_sensitive() {
        let a = sequence_hash(&[action(Side::Buy, "A", 100.0), action(Side::Buy, "B", 100.0)]);
        let b = sequence_hash(&[action(Side::Buy, "B", 100.0), action(Side::Buy, "A", 100.0)]);
        assert_ne!(a, b);
    }

    #[test]
    fn simulate_end_state_buy_adds_sell_removes() {
        let mut current = HashMap::new();
        current.insert("A".to_string(), 1000.0);

        let actions = vec![action(Side::Sell, "A", 400.0), action(Side::Buy, "B", 200.0)];
        let end_state = simulate_end_state(&current, &actions);
        assert_eq!(end_state.get("A"), Some(&600.0));
        assert_eq!(end_state.get("B"), Some(&200.0));
    }

    #[test]
    fn simulate_end_state_drops_fully_sold_positions() {
        let mut current = HashMap::new();
        current.insert("A".to_string(), 100.0);
        let actions = vec![action(Side::Sell, "A", 100.0)];
        let end_state = simulate_end_state(&current, &actions);
        assert!(!end_state.contains_key("A"));
    }

    #[test]
    fn self_trigger_caps_at_depth_limit() {
        let planner_ok = SELF_TRIGGER_DEPTH_CAP - 1 < SELF_TRIGGER_DEPTH_CAP;
        assert!(planner_ok);
    }
}
