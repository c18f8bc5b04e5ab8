//! In-memory repository implementations.
//!
//! Used for tests and as the default storage until a durable backend is
//! wired in; every trait is satisfied by a `tokio::sync::Mutex`-guarded
//! `HashMap`/`Vec` so call sites never know which storage they're talking
//! to.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::model::{
    CashBalance, Currency, JobHistoryRecord, JobSchedule, PlannerSequence, Position, Score,
    Security, SequenceStatus,
};
use crate::domain::repositories::{
    CashBalanceRepository, JobHistoryRepository, JobScheduleRepository, PlannerRepository,
    PositionRepository, RecordedTrade, ScoreRepository, SettingsRepository, StockRepository,
    TradeFilter, TradeRepository,
};

#[derive(Default)]
pub struct InMemoryStockRepository {
    rows: Mutex<HashMap<String, Security>>,
}

#[async_trait]
impl StockRepository for InMemoryStockRepository {
    async fn get_by_symbol(&self, symbol: &str) -> Result<Option<Security>> {
        Ok(self.rows.lock().await.get(symbol).cloned())
    }

    async fn get_by_identifier(&self, identifier: &str) -> Result<Option<Security>> {
        let rows = self.rows.lock().await;
        Ok(rows
            .values()
            .find(|s| {
                s.symbol == identifier
                    || s.isin.as_deref() == Some(identifier)
                    || s.yahoo_symbol.as_deref() == Some(identifier)
            })
            .cloned())
    }

    async fn get_all_active(&self) -> Result<Vec<Security>> {
        Ok(self.rows.lock().await.values().filter(|s| s.active).cloned().collect())
    }

    async fn create(&self, security: Security) -> Result<()> {
        self.rows.lock().await.insert(security.symbol.clone(), security);
        Ok(())
    }

    async fn update(&self, symbol: &str, security: Security) -> Result<()> {
        self.rows.lock().await.insert(symbol.to_string(), security);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryPositionRepository {
    rows: Mutex<HashMap<String, Position>>,
}

#[async_trait]
impl PositionRepository for InMemoryPositionRepository {
    async fn get_all(&self) -> Result<Vec<Position>> {
        Ok(self.rows.lock().await.values().cloned().collect())
    }

    async fn get(&self, symbol: &str) -> Result<Option<Position>> {
        Ok(self.rows.lock().await.get(symbol).cloned())
    }

    async fn upsert(&self, position: Position) -> Result<()> {
        let mut rows = self.rows.lock().await;
        if position.is_present() {
            rows.insert(position.symbol.clone(), position);
        } else {
            rows.remove(&position.symbol);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryScoreRepository {
    /// Every score ever saved, oldest first; `get_latest` scans from the end.
    rows: Mutex<Vec<Score>>,
}

#[async_trait]
impl ScoreRepository for InMemoryScoreRepository {
    async fn get_latest(&self, symbol: &str) -> Result<Option<Score>> {
        let rows = self.rows.lock().await;
        Ok(rows.iter().rev().find(|s| s.symbol == symbol).cloned())
    }

    async fn get_all_latest(&self) -> Result<Vec<Score>> {
        let rows = self.rows.lock().await;
        let mut latest: HashMap<String, Score> = HashMap::new();
        for score in rows.iter() {
            latest.insert(score.symbol.clone(), score.clone());
        }
        Ok(latest.into_values().collect())
    }

    async fn save(&self, score: Score) -> Result<()> {
        self.rows.lock().await.push(score);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySettingsRepository {
    rows: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl SettingsRepository for InMemorySettingsRepository {
    async fn get(&self, key: &str, default: &str) -> Result<String> {
        Ok(self.rows.lock().await.get(key).cloned().unwrap_or_else(|| default.to_string()))
    }

    async fn get_float(&self, key: &str, default: f64) -> Result<f64> {
        let rows = self.rows.lock().await;
        Ok(rows.get(key).and_then(|v| v.parse().ok()).unwrap_or(default))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.rows.lock().await.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryTradeRepository {
    rows: Mutex<Vec<RecordedTrade>>,
}

#[async_trait]
impl TradeRepository for InMemoryTradeRepository {
    async fn record(&self, trade: RecordedTrade) -> Result<bool> {
        let mut rows = self.rows.lock().await;
        if rows.iter().any(|t| t.broker_trade_id == trade.broker_trade_id) {
            return Ok(false);
        }
        rows.push(trade);
        Ok(true)
    }

    async fn has_recent_sell_order(&self, symbol: &str, within_minutes: i64) -> Result<bool> {
        let rows = self.rows.lock().await;
        let cutoff = Utc::now() - chrono::Duration::minutes(within_minutes);
        Ok(rows.iter().any(|t| {
            t.symbol == symbol && t.side == crate::domain::model::Side::Sell && t.executed_at >= cutoff
        }))
    }

    async fn get_trades(&self, filter: TradeFilter, limit: i64, offset: i64) -> Result<Vec<RecordedTrade>> {
        let rows = self.rows.lock().await;
        let filtered: Vec<RecordedTrade> = rows
            .iter()
            .filter(|t| filter.symbol.as_deref().is_none_or(|s| s == t.symbol))
            .filter(|t| filter.side.is_none_or(|side| side == t.side))
            .filter(|t| filter.since.is_none_or(|since| t.executed_at >= since))
            .cloned()
            .collect();
        let offset = offset.max(0) as usize;
        let limit = limit.max(0) as usize;
        Ok(filtered.into_iter().skip(offset).take(limit).collect())
    }
}

#[derive(Default)]
pub struct InMemoryCashBalanceRepository {
    rows: Mutex<HashMap<Currency, CashBalance>>,
}

#[async_trait]
impl CashBalanceRepository for InMemoryCashBalanceRepository {
    async fn get_all(&self) -> Result<Vec<CashBalance>> {
        Ok(self.rows.lock().await.values().cloned().collect())
    }

    async fn get(&self, currency: Currency) -> Result<Option<CashBalance>> {
        Ok(self.rows.lock().await.get(&currency).cloned())
    }

    async fn set(&self, balance: CashBalance) -> Result<()> {
        self.rows.lock().await.insert(balance.currency, balance);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryPlannerRepository {
    rows: Mutex<HashMap<String, Vec<PlannerSequence>>>,
}

#[async_trait]
impl PlannerRepository for InMemoryPlannerRepository {
    async fn has_sequences(&self, portfolio_hash: &str) -> Result<bool> {
        Ok(self.rows.lock().await.get(portfolio_hash).is_some_and(|v| !v.is_empty()))
    }

    async fn are_all_sequences_evaluated(&self, portfolio_hash: &str) -> Result<bool> {
        let rows = self.rows.lock().await;
        Ok(rows
            .get(portfolio_hash)
            .is_some_and(|v| !v.is_empty() && v.iter().all(|s| s.status == SequenceStatus::Evaluated)))
    }

    async fn get_total_sequence_count(&self, portfolio_hash: &str) -> Result<u64> {
        let rows = self.rows.lock().await;
        Ok(rows.get(portfolio_hash).map(|v| v.len() as u64).unwrap_or(0))
    }

    async fn get_evaluation_count(&self, portfolio_hash: &str) -> Result<u64> {
        let rows = self.rows.lock().await;
        Ok(rows
            .get(portfolio_hash)
            .map(|v| v.iter().filter(|s| s.status == SequenceStatus::Evaluated).count() as u64)
            .unwrap_or(0))
    }

    async fn get_best_result(&self, portfolio_hash: &str) -> Result<Option<PlannerSequence>> {
        let rows = self.rows.lock().await;
        Ok(rows.get(portfolio_hash).and_then(|v| {
            v.iter()
                .filter(|s| s.status == SequenceStatus::Evaluated)
                .max_by(|a, b| {
                    a.end_state_score
                        .unwrap_or(f64::MIN)
                        .partial_cmp(&b.end_state_score.unwrap_or(f64::MIN))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .cloned()
        }))
    }

    async fn get_best_sequence_from_hash(
        &self,
        portfolio_hash: &str,
        sequence_hash: &str,
    ) -> Result<Option<PlannerSequence>> {
        let rows = self.rows.lock().await;
        Ok(rows
            .get(portfolio_hash)
            .and_then(|v| v.iter().find(|s| s.sequence_hash == sequence_hash))
            .cloned())
    }

    async fn persist_sequences(&self, sequences: Vec<PlannerSequence>) -> Result<()> {
        let mut rows = self.rows.lock().await;
        for sequence in sequences {
            rows.entry(sequence.portfolio_hash.0.clone()).or_default().push(sequence);
        }
        Ok(())
    }

    async fn mark_sequence_evaluated(
        &self,
        portfolio_hash: &str,
        sequence_hash: &str,
        score: f64,
    ) -> Result<()> {
        let mut rows = self.rows.lock().await;
        if let Some(sequences) = rows.get_mut(portfolio_hash) {
            if let Some(sequence) = sequences.iter_mut().find(|s| s.sequence_hash == sequence_hash) {
                sequence.status = SequenceStatus::Evaluated;
                sequence.end_state_score = Some(score);
            }
        }
        Ok(())
    }

    async fn get_unevaluated_batch(
        &self,
        portfolio_hash: &str,
        batch_size: u32,
    ) -> Result<Vec<PlannerSequence>> {
        let rows = self.rows.lock().await;
        Ok(rows
            .get(portfolio_hash)
            .map(|v| {
                v.iter()
                    .filter(|s| s.status == SequenceStatus::Unevaluated)
                    .take(batch_size as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct InMemoryJobScheduleRepository {
    rows: Mutex<HashMap<String, JobSchedule>>,
}

#[async_trait]
impl JobScheduleRepository for InMemoryJobScheduleRepository {
    async fn get_all(&self) -> Result<Vec<JobSchedule>> {
        Ok(self.rows.lock().await.values().cloned().collect())
    }

    async fn get(&self, job_type: &str) -> Result<Option<JobSchedule>> {
        Ok(self.rows.lock().await.get(job_type).cloned())
    }

    async fn upsert(&self, schedule: JobSchedule) -> Result<()> {
        self.rows.lock().await.insert(schedule.job_type.clone(), schedule);
        Ok(())
    }

    async fn mark_run(&self, job_type: &str, at: DateTime<Utc>) -> Result<()> {
        if let Some(schedule) = self.rows.lock().await.get_mut(job_type) {
            schedule.last_run = Some(at.timestamp());
            schedule.consecutive_failures = 0;
        }
        Ok(())
    }

    async fn record_failure(&self, job_type: &str) -> Result<u32> {
        let mut rows = self.rows.lock().await;
        if let Some(schedule) = rows.get_mut(job_type) {
            schedule.consecutive_failures += 1;
            Ok(schedule.consecutive_failures)
        } else {
            Ok(0)
        }
    }

    async fn clear_failures(&self, job_type: &str) -> Result<()> {
        if let Some(schedule) = self.rows.lock().await.get_mut(job_type) {
            schedule.consecutive_failures = 0;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryJobHistoryRepository {
    rows: Mutex<Vec<JobHistoryRecord>>,
    sequence: AtomicU32,
}

#[async_trait]
impl JobHistoryRepository for InMemoryJobHistoryRepository {
    async fn record(&self, record: JobHistoryRecord) -> Result<()> {
        self.sequence.fetch_add(1, Ordering::SeqCst);
        self.rows.lock().await.push(record);
        Ok(())
    }

    async fn recent_by_type(&self, limit: usize) -> Result<Vec<JobHistoryRecord>> {
        let rows = self.rows.lock().await;
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for record in rows.iter().rev() {
            if seen.insert(record.job_type.clone()) {
                out.push(record.clone());
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::Side;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn trade_repository_dedupes_by_broker_id() {
        let repo = InMemoryTradeRepository::default();
        let trade = RecordedTrade {
            broker_trade_id: "t1".into(),
            symbol: "AAPL".into(),
            side: Side::Buy,
            quantity: 10,
            price: Decimal::new(100, 0),
            currency: Currency::Usd,
            executed_at: Utc::now(),
            commission: None,
        };
        assert!(repo.record(trade.clone()).await.unwrap());
        assert!(!repo.record(trade).await.unwrap());
    }

    #[tokio::test]
    async fn planner_repository_tracks_evaluation_progress() {
        use crate::domain::model::{ActionCandidate, PortfolioHash};

        let repo = InMemoryPlannerRepository::default();
        let hash = PortfolioHash("abc123".into());
        let action = ActionCandidate {
            side: Side::Buy,
            symbol: "AAPL".into(),
            name: "Apple".into(),
            quantity: 1,
            price: Decimal::new(100, 0),
            value_eur: Decimal::new(100, 0),
            currency: Currency::Eur,
            priority: 1.0,
            reason: "test".into(),
            tags: vec![],
        };
        let sequence = PlannerSequence {
            portfolio_hash: hash.clone(),
            sequence_hash: "seq1".into(),
            actions: vec![action],
            status: SequenceStatus::Unevaluated,
            end_state_score: None,
        };
        repo.persist_sequences(vec![sequence]).await.unwrap();
        assert!(repo.has_sequences(&hash.0).await.unwrap());
        assert!(!repo.are_all_sequences_evaluated(&hash.0).await.unwrap());

        repo.mark_sequence_evaluated(&hash.0, "seq1", 0.8).await.unwrap();
        assert!(repo.are_all_sequences_evaluated(&hash.0).await.unwrap());
        let best = repo.get_best_result(&hash.0).await.unwrap().unwrap();
        assert_eq!(best.end_state_score, Some(0.8));
    }
}
