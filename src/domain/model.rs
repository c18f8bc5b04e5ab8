//! Core entities for the investment agent.
//!
//! These are the aggregates described in the data model: securities, held
//! positions, per-currency cash balances, price history, scores, and the
//! ephemeral candidates/recommendations the planning pipeline produces.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of currencies the currency router knows how to route between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    Eur,
    Usd,
    Hkd,
    Gbp,
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Currency::Eur => "EUR",
            Currency::Usd => "USD",
            Currency::Hkd => "HKD",
            Currency::Gbp => "GBP",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "EUR" => Ok(Currency::Eur),
            "USD" => Ok(Currency::Usd),
            "HKD" => Ok(Currency::Hkd),
            "GBP" => Ok(Currency::Gbp),
            other => Err(format!("unknown currency: {other}")),
        }
    }
}

/// BUY or SELL side of a trade candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// A tradable instrument known to the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Security {
    pub symbol: String,
    pub name: String,
    pub currency: Currency,
    pub country: Option<String>,
    /// May be comma-separated for multi-category securities.
    pub industry: Option<String>,
    pub min_lot: u32,
    pub allow_buy: bool,
    pub allow_sell: bool,
    pub active: bool,
    /// User conviction multiplier, default 1.0.
    pub priority_multiplier: Decimal,
    pub yahoo_symbol: Option<String>,
    pub isin: Option<String>,
    pub ml_enabled: bool,
    pub last_synced: Option<DateTime<Utc>>,
}

impl Security {
    pub fn industries(&self) -> Vec<String> {
        self.industry
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// A held position as last synced from the broker. A row with `quantity ==
/// 0` is treated as absent by consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: i64,
    pub avg_price: Decimal,
    pub current_price: Option<Decimal>,
    pub currency: Currency,
    pub market_value_eur: Option<Decimal>,
    pub cost_basis_eur: Option<Decimal>,
    pub first_bought_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn is_present(&self) -> bool {
        self.quantity > 0
    }
}

/// Per-currency cash amount. May be negative (margin deficit).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CashBalance {
    pub currency: Currency,
    pub amount: Decimal,
}

/// One OHLCV bar for `(symbol, date)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// A scoring snapshot for a symbol at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    pub symbol: String,
    pub calculated_at: DateTime<Utc>,
    pub total_score: f64,
    pub long_term: f64,
    pub fundamentals: f64,
    pub opportunity: f64,
    pub opinion: f64,
    pub diversification: f64,
}

/// Sleeve a target allocation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sleeve {
    Core,
    Opportunity,
}

/// Relative size of one minimum-lot trade versus portfolio value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LotClass {
    Standard,
    Coarse,
    Jumbo,
}

/// An ephemeral proposed trade, not yet validated against the cash budget.
///
/// Invariants: `quantity` is a whole multiple of the security's `min_lot`;
/// `value_eur > 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionCandidate {
    pub side: Side,
    pub symbol: String,
    pub name: String,
    pub quantity: i64,
    /// Native-currency price.
    pub price: Decimal,
    pub value_eur: Decimal,
    pub currency: Currency,
    pub priority: f64,
    pub reason: String,
    pub tags: Vec<String>,
}

impl ActionCandidate {
    pub fn is_valid(&self, min_lot: u32) -> bool {
        self.quantity > 0
            && min_lot > 0
            && (self.quantity % min_lot as i64) == 0
            && self.value_eur > Decimal::ZERO
    }
}

/// An `ActionCandidate` annotated with allocation context, ready for
/// execution.
///
/// Invariants: for a SELL, `value_delta_eur < 0`; for a BUY,
/// `value_delta_eur > 0`. Both are whole-lot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecommendation {
    pub side: Side,
    pub symbol: String,
    pub quantity: i64,
    pub price: Decimal,
    pub currency: Currency,
    pub current_allocation: f64,
    pub target_allocation: f64,
    pub allocation_delta: f64,
    pub current_value_eur: Decimal,
    pub target_value_eur: Decimal,
    /// Signed; negative for SELL.
    pub value_delta_eur: Decimal,
    pub contrarian_score: f64,
    pub sleeve: Sleeve,
    pub lot_class: LotClass,
    pub ticket_pct: f64,
    pub core_floor_active: bool,
    pub reason_code: String,
    pub reason: String,
    pub priority: f64,
}

/// A deterministic digest of `(symbol, quantity)` pairs over active
/// holdings, used to key planner sequences to the state they were planned
/// for. Never persisted as a primary identity, only as a grouping key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortfolioHash(pub String);

impl fmt::Display for PortfolioHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PortfolioHash {
    /// Compute the digest over `(symbol, quantity)` pairs plus active
    /// security identities, optionally including cash balances.
    pub fn compute(
        positions: &[Position],
        active_symbols: &[String],
        cash: Option<&[CashBalance]>,
    ) -> Self {
        use sha2::{Digest, Sha256};

        let mut symbols: Vec<(String, i64)> = positions
            .iter()
            .filter(|p| p.is_present())
            .map(|p| (p.symbol.clone(), p.quantity))
            .collect();
        symbols.sort();

        let mut actives: Vec<String> = active_symbols.to_vec();
        actives.sort();

        let mut hasher = Sha256::new();
        for (symbol, qty) in &symbols {
            hasher.update(symbol.as_bytes());
            hasher.update(qty.to_le_bytes());
        }
        for symbol in &actives {
            hasher.update(b"active:");
            hasher.update(symbol.as_bytes());
        }
        if let Some(balances) = cash {
            let mut sorted: Vec<(String, String)> = balances
                .iter()
                .map(|b| (b.currency.to_string(), b.amount.to_string()))
                .collect();
            sorted.sort();
            for (ccy, amount) in sorted {
                hasher.update(b"cash:");
                hasher.update(ccy.as_bytes());
                hasher.update(amount.as_bytes());
            }
        }

        let digest = hasher.finalize();
        PortfolioHash(hex::encode(&digest[..16]))
    }

    /// First 8 hex characters, used in progress-event logging.
    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

/// Evaluation status of a persisted planner sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceStatus {
    Unevaluated,
    Evaluated,
}

/// An ordered list of `ActionCandidate`s (sells first, then buys) persisted
/// under a `portfolio_hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerSequence {
    pub portfolio_hash: PortfolioHash,
    pub sequence_hash: String,
    pub actions: Vec<ActionCandidate>,
    pub status: SequenceStatus,
    pub end_state_score: Option<f64>,
}

/// State machine for a `Recommendation`: PENDING may transition to either
/// terminal state; terminals never transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecommendationStatus {
    Pending,
    Executed,
    Dismissed,
}

impl RecommendationStatus {
    pub fn can_transition_to(self, target: RecommendationStatus) -> bool {
        matches!(
            (self, target),
            (
                RecommendationStatus::Pending,
                RecommendationStatus::Executed | RecommendationStatus::Dismissed
            )
        )
    }
}

/// The planner's "next trade" output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    pub estimated_price: Decimal,
    pub estimated_value: Decimal,
    pub reason: String,
    pub currency: Currency,
    pub status: RecommendationStatus,
}

/// The gate that classifies when a job may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketTiming {
    Any,
    AfterClose,
    DuringOpen,
    AllMarketsClosed,
}

/// A scheduler-owned job configuration row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSchedule {
    pub job_type: String,
    pub interval_minutes: u32,
    pub interval_market_open_minutes: Option<u32>,
    pub market_timing: MarketTiming,
    pub enabled: bool,
    pub last_run: Option<i64>,
    pub consecutive_failures: u32,
    pub category: String,
    pub description: String,
}

/// Outcome of one scheduler job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHistoryRecord {
    pub job_id: String,
    pub job_type: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub executed_at: DateTime<Utc>,
    pub retry_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_same_pair_roundtrips() {
        assert_eq!(Currency::from_str("eur").unwrap(), Currency::Eur);
        assert_eq!(Currency::Eur.to_string(), "EUR");
    }

    #[test]
    fn action_candidate_lot_invariant() {
        let candidate = ActionCandidate {
            side: Side::Buy,
            symbol: "AAPL.US".into(),
            name: "Apple".into(),
            quantity: 10,
            price: Decimal::new(1200, 1),
            value_eur: Decimal::new(100000, 2),
            currency: Currency::Usd,
            priority: 1.0,
            reason: "test".into(),
            tags: vec![],
        };
        assert!(candidate.is_valid(5));
        assert!(!candidate.is_valid(3));
    }

    #[test]
    fn recommendation_status_transitions() {
        use RecommendationStatus::*;
        assert!(Pending.can_transition_to(Executed));
        assert!(Pending.can_transition_to(Dismissed));
        assert!(!Executed.can_transition_to(Dismissed));
        assert!(!Dismissed.can_transition_to(Pending));
    }

    #[test]
    fn portfolio_hash_is_order_independent() {
        let positions_a = vec![
            Position {
                symbol: "AAPL".into(),
                quantity: 10,
                avg_price: Decimal::ONE,
                current_price: None,
                currency: Currency::Usd,
                market_value_eur: None,
                cost_basis_eur: None,
                first_bought_at: None,
            },
            Position {
                symbol: "MSFT".into(),
                quantity: 5,
                avg_price: Decimal::ONE,
                current_price: None,
                currency: Currency::Usd,
                market_value_eur: None,
                cost_basis_eur: None,
                first_bought_at: None,
            },
        ];
        let mut positions_b = positions_a.clone();
        positions_b.reverse();

        let hash_a = PortfolioHash::compute(&positions_a, &[], None);
        let hash_b = PortfolioHash::compute(&positions_b, &[], None);
        assert_eq!(hash_a, hash_b);
        assert_eq!(hash_a.short().len(), 8);
    }
}
