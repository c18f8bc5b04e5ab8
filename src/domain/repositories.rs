//! Repository pattern abstractions.
//!
//! Each trait is a narrow contract on one aggregate; implementers choose
//! their own backing store (see `infrastructure::persistence` for the
//! SQLite-backed and in-memory implementations). Consumers depend only on
//! these traits, never on a concrete storage type.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::model::{
    CashBalance, Currency, JobHistoryRecord, JobSchedule, PlannerSequence, Position, Score,
    Security,
};

/// How a caller identified a security: by broker symbol, ISIN, or Yahoo
/// ticker. `detect_identifier_type` classifies a raw string into one of
/// these before a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Tradernet,
    Isin,
    Yahoo,
}

/// Classify a raw identifier string. ISINs are 12 chars, 2 letters followed
/// by 10 alphanumerics; Tradernet-style symbols carry a `.` exchange suffix;
/// anything else is treated as a bare Yahoo ticker.
pub fn detect_identifier_type(identifier: &str) -> IdentifierKind {
    let is_isin = identifier.len() == 12
        && identifier.chars().take(2).all(|c| c.is_ascii_alphabetic())
        && identifier.chars().skip(2).all(|c| c.is_ascii_alphanumeric());
    if is_isin {
        return IdentifierKind::Isin;
    }
    if identifier.contains('.') {
        return IdentifierKind::Tradernet;
    }
    IdentifierKind::Yahoo
}

#[async_trait]
pub trait StockRepository: Send + Sync {
    async fn get_by_symbol(&self, symbol: &str) -> Result<Option<Security>>;
    async fn get_by_identifier(&self, identifier: &str) -> Result<Option<Security>>;
    async fn get_all_active(&self) -> Result<Vec<Security>>;
    async fn create(&self, security: Security) -> Result<()>;
    async fn update(&self, symbol: &str, security: Security) -> Result<()>;
}

#[async_trait]
pub trait PositionRepository: Send + Sync {
    async fn get_all(&self) -> Result<Vec<Position>>;
    async fn get(&self, symbol: &str) -> Result<Option<Position>>;
    async fn upsert(&self, position: Position) -> Result<()>;
}

#[async_trait]
pub trait ScoreRepository: Send + Sync {
    async fn get_latest(&self, symbol: &str) -> Result<Option<Score>>;
    async fn get_all_latest(&self) -> Result<Vec<Score>>;
    async fn save(&self, score: Score) -> Result<()>;
}

#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn get(&self, key: &str, default: &str) -> Result<String>;
    async fn get_float(&self, key: &str, default: f64) -> Result<f64>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// A recorded, broker-confirmed fill. Distinct from the ephemeral
/// `Recommendation`/`ActionCandidate` the planner produces.
#[derive(Debug, Clone)]
pub struct RecordedTrade {
    pub broker_trade_id: String,
    pub symbol: String,
    pub side: crate::domain::model::Side,
    pub quantity: i64,
    pub price: rust_decimal::Decimal,
    pub currency: Currency,
    pub executed_at: DateTime<Utc>,
    pub commission: Option<rust_decimal::Decimal>,
}

#[derive(Debug, Clone, Default)]
pub struct TradeFilter {
    pub symbol: Option<String>,
    pub side: Option<crate::domain::model::Side>,
    pub since: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait TradeRepository: Send + Sync {
    /// Upsert by `broker_trade_id`; a duplicate id is silently skipped and
    /// does not create a second row.
    async fn record(&self, trade: RecordedTrade) -> Result<bool>;
    async fn has_recent_sell_order(&self, symbol: &str, within_minutes: i64) -> Result<bool>;
    async fn get_trades(
        &self,
        filter: TradeFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RecordedTrade>>;
}

#[async_trait]
pub trait CashBalanceRepository: Send + Sync {
    async fn get_all(&self) -> Result<Vec<CashBalance>>;
    async fn get(&self, currency: Currency) -> Result<Option<CashBalance>>;
    async fn set(&self, balance: CashBalance) -> Result<()>;
}

#[async_trait]
pub trait PlannerRepository: Send + Sync {
    async fn has_sequences(&self, portfolio_hash: &str) -> Result<bool>;
    async fn are_all_sequences_evaluated(&self, portfolio_hash: &str) -> Result<bool>;
    async fn get_total_sequence_count(&self, portfolio_hash: &str) -> Result<u64>;
    async fn get_evaluation_count(&self, portfolio_hash: &str) -> Result<u64>;
    async fn get_best_result(&self, portfolio_hash: &str) -> Result<Option<PlannerSequence>>;
    async fn get_best_sequence_from_hash(
        &self,
        portfolio_hash: &str,
        sequence_hash: &str,
    ) -> Result<Option<PlannerSequence>>;
    async fn persist_sequences(&self, sequences: Vec<PlannerSequence>) -> Result<()>;
    async fn mark_sequence_evaluated(
        &self,
        portfolio_hash: &str,
        sequence_hash: &str,
        score: f64,
    ) -> Result<()>;
    /// Up to `batch_size` unevaluated sequences for this hash.
    async fn get_unevaluated_batch(
        &self,
        portfolio_hash: &str,
        batch_size: u32,
    ) -> Result<Vec<PlannerSequence>>;
}

#[async_trait]
pub trait JobScheduleRepository: Send + Sync {
    async fn get_all(&self) -> Result<Vec<JobSchedule>>;
    async fn get(&self, job_type: &str) -> Result<Option<JobSchedule>>;
    async fn upsert(&self, schedule: JobSchedule) -> Result<()>;
    async fn mark_run(&self, job_type: &str, at: DateTime<Utc>) -> Result<()>;
    async fn record_failure(&self, job_type: &str) -> Result<u32>;
    async fn clear_failures(&self, job_type: &str) -> Result<()>;
}

#[async_trait]
pub trait JobHistoryRepository: Send + Sync {
    async fn record(&self, record: JobHistoryRecord) -> Result<()>;
    /// Most recent records, deduplicated by `job_type`, newest first.
    async fn recent_by_type(&self, limit: usize) -> Result<Vec<JobHistoryRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_isin() {
        assert_eq!(detect_identifier_type("US0378331005"), IdentifierKind::Isin);
    }

    #[test]
    fn detects_tradernet_symbol() {
        assert_eq!(detect_identifier_type("AAPL.US"), IdentifierKind::Tradernet);
    }

    #[test]
    fn detects_yahoo_symbol() {
        assert_eq!(detect_identifier_type("AAPL"), IdentifierKind::Yahoo);
    }
}
