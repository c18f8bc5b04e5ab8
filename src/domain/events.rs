//! Typed system events and the in-process event bus.
//!
//! Every component that wants to observe what the agent is doing subscribes
//! to [`EventBus`]. Publishing never fails and never propagates a listener's
//! panic back to the publisher — a bad subscriber loses its own handler
//! invocation, nothing else.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::model::{Currency, Side};

/// Progress snapshot attached to `PlannerBatchComplete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerProgress {
    pub has_sequences: bool,
    pub total_sequences: u64,
    pub evaluated_count: u64,
    pub is_planning: bool,
    pub is_finished: bool,
    pub portfolio_hash_prefix: String,
    pub progress_percentage: f64,
}

/// The full set of events the agent's components emit. Variant names follow
/// the system's own lifecycle-marker vocabulary (sync/backup/maintenance
/// starts and completions, API call brackets, planner batch progress,
/// error occurrence/clearing) rather than any single upstream naming scheme.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TradingEvent {
    SyncStart {
        resource: String,
    },
    SyncComplete {
        resource: String,
        duration_ms: i64,
    },
    ApiCallStart {
        endpoint: String,
    },
    ApiCallEnd {
        endpoint: String,
        duration_ms: i64,
        success: bool,
    },
    ProcessingStart {
        task: String,
    },
    ProcessingEnd {
        task: String,
        duration_ms: i64,
    },
    WebRequest {
        method: String,
        path: String,
        status: u16,
    },
    TradeSyncStart,
    TradeSyncComplete {
        new_count: usize,
        skipped_count: usize,
    },
    CashFlowSyncStart,
    CashFlowSyncComplete {
        new_count: usize,
        skipped_count: usize,
    },
    ScoreRefreshStart,
    ScoreRefreshComplete {
        symbol_count: usize,
    },
    RebalanceStart,
    RebalanceComplete {
        recommendation_count: usize,
    },
    MaintenanceStart {
        job_type: String,
    },
    MaintenanceComplete {
        job_type: String,
        duration_ms: i64,
    },
    BackupStart,
    CleanupStart {
        target: String,
    },
    CleanupComplete {
        target: String,
        removed_count: u64,
    },
    IntegrityCheckStart,
    IntegrityCheckComplete {
        ok: bool,
        issues: Vec<String>,
    },
    ErrorOccurred {
        message: String,
        source: String,
    },
    ErrorCleared {
        source: String,
    },
    ApiError {
        endpoint: String,
        message: String,
    },
    DatabaseError {
        message: String,
    },
    BrokerError {
        message: String,
    },
    DisplayStateChanged {
        state: String,
    },
    PlannerBatchComplete {
        progress: PlannerProgress,
    },
    PlannerSequencesGenerated {
        portfolio_hash: String,
        sequence_count: usize,
    },
    RecommendationsInvalidated {
        reason: String,
    },
    PlannerStarted {
        portfolio_hash: String,
    },
    PlannerCompleted {
        portfolio_hash: String,
        recommendation: Option<String>,
        duration_ms: i64,
    },
    PlannerFailed {
        portfolio_hash: Option<String>,
        error: String,
    },
    PlannerSelfTriggered {
        depth: u32,
        portfolio_hash: String,
    },
    PlannerSelfTriggerCapped {
        depth: u32,
    },
    SequenceEvaluated {
        sequence_hash: String,
        end_state_score: f64,
    },
    RecommendationCreated {
        symbol: String,
        side: Side,
        quantity: i64,
    },
    RecommendationExecuted {
        symbol: String,
        side: Side,
        quantity: i64,
    },
    RecommendationDismissed {
        symbol: String,
        reason: String,
    },
    TradeExecutionStarted {
        symbol: String,
        side: Side,
        quantity: i64,
    },
    TradeExecutionCompleted {
        symbol: String,
        side: Side,
        quantity: i64,
        fill_price: Decimal,
    },
    TradeExecutionFailed {
        symbol: String,
        error: String,
    },
    TradeValidationFailed {
        symbol: String,
        reason: String,
    },
    OrderPlaced {
        order_id: String,
        symbol: String,
        side: Side,
        quantity: i64,
    },
    OrderFilled {
        order_id: String,
        symbol: String,
        fill_price: Decimal,
    },
    OrderRejected {
        order_id: String,
        reason: String,
    },
    MarketOpened {
        exchange: String,
    },
    MarketClosed {
        exchange: String,
    },
    CashDeficitDetected {
        currency: Currency,
        deficit: Decimal,
    },
    CurrencyExchanged {
        from: Currency,
        to: Currency,
        amount: Decimal,
        rate: Decimal,
    },
    CurrencyExchangeFailed {
        from: Currency,
        to: Currency,
        error: String,
    },
    ContrarianSignalComputed {
        symbol: String,
        score: f64,
    },
    TargetsRebuilt {
        symbol_count: usize,
    },
    RebalanceRecommendationsBuilt {
        buy_count: usize,
        sell_count: usize,
    },
    ScoreCalculated {
        symbol: String,
        total_score: f64,
    },
    JobStarted {
        job_id: String,
        job_type: String,
    },
    JobCompleted {
        job_id: String,
        job_type: String,
        duration_ms: i64,
    },
    JobFailed {
        job_id: String,
        job_type: String,
        error: String,
        consecutive_failures: u32,
    },
    JobSkipped {
        job_type: String,
        reason: String,
    },
    BackupCompleted {
        archive_path: String,
        size_bytes: u64,
    },
    BackupFailed {
        error: String,
    },
    LockAcquired {
        lock_name: String,
    },
    LockTimedOut {
        lock_name: String,
        waited_ms: u64,
    },
}

impl TradingEvent {
    /// Stable name used for log lines and test assertions, independent of
    /// the `serde` tag representation.
    pub fn kind(&self) -> &'static str {
        match self {
            TradingEvent::SyncStart { .. } => "sync_start",
            TradingEvent::SyncComplete { .. } => "sync_complete",
            TradingEvent::ApiCallStart { .. } => "api_call_start",
            TradingEvent::ApiCallEnd { .. } => "api_call_end",
            TradingEvent::ProcessingStart { .. } => "processing_start",
            TradingEvent::ProcessingEnd { .. } => "processing_end",
            TradingEvent::WebRequest { .. } => "web_request",
            TradingEvent::TradeSyncStart => "trade_sync_start",
            TradingEvent::TradeSyncComplete { .. } => "trade_sync_complete",
            TradingEvent::CashFlowSyncStart => "cash_flow_sync_start",
            TradingEvent::CashFlowSyncComplete { .. } => "cash_flow_sync_complete",
            TradingEvent::ScoreRefreshStart => "score_refresh_start",
            TradingEvent::ScoreRefreshComplete { .. } => "score_refresh_complete",
            TradingEvent::RebalanceStart => "rebalance_start",
            TradingEvent::RebalanceComplete { .. } => "rebalance_complete",
            TradingEvent::MaintenanceStart { .. } => "maintenance_start",
            TradingEvent::MaintenanceComplete { .. } => "maintenance_complete",
            TradingEvent::BackupStart => "backup_start",
            TradingEvent::CleanupStart { .. } => "cleanup_start",
            TradingEvent::CleanupComplete { .. } => "cleanup_complete",
            TradingEvent::IntegrityCheckStart => "integrity_check_start",
            TradingEvent::IntegrityCheckComplete { .. } => "integrity_check_complete",
            TradingEvent::ErrorOccurred { .. } => "error_occurred",
            TradingEvent::ErrorCleared { .. } => "error_cleared",
            TradingEvent::ApiError { .. } => "api_error",
            TradingEvent::DatabaseError { .. } => "database_error",
            TradingEvent::BrokerError { .. } => "broker_error",
            TradingEvent::DisplayStateChanged { .. } => "display_state_changed",
            TradingEvent::PlannerBatchComplete { .. } => "planner_batch_complete",
            TradingEvent::PlannerSequencesGenerated { .. } => "planner_sequences_generated",
            TradingEvent::RecommendationsInvalidated { .. } => "recommendations_invalidated",
            TradingEvent::PlannerStarted { .. } => "planner_started",
            TradingEvent::PlannerCompleted { .. } => "planner_completed",
            TradingEvent::PlannerFailed { .. } => "planner_failed",
            TradingEvent::PlannerSelfTriggered { .. } => "planner_self_triggered",
            TradingEvent::PlannerSelfTriggerCapped { .. } => "planner_self_trigger_capped",
            TradingEvent::SequenceEvaluated { .. } => "sequence_evaluated",
            TradingEvent::RecommendationCreated { .. } => "recommendation_created",
            TradingEvent::RecommendationExecuted { .. } => "recommendation_executed",
            TradingEvent::RecommendationDismissed { .. } => "recommendation_dismissed",
            TradingEvent::TradeExecutionStarted { .. } => "trade_execution_started",
            TradingEvent::TradeExecutionCompleted { .. } => "trade_execution_completed",
            TradingEvent::TradeExecutionFailed { .. } => "trade_execution_failed",
            TradingEvent::TradeValidationFailed { .. } => "trade_validation_failed",
            TradingEvent::OrderPlaced { .. } => "order_placed",
            TradingEvent::OrderFilled { .. } => "order_filled",
            TradingEvent::OrderRejected { .. } => "order_rejected",
            TradingEvent::MarketOpened { .. } => "market_opened",
            TradingEvent::MarketClosed { .. } => "market_closed",
            TradingEvent::CashDeficitDetected { .. } => "cash_deficit_detected",
            TradingEvent::CurrencyExchanged { .. } => "currency_exchanged",
            TradingEvent::CurrencyExchangeFailed { .. } => "currency_exchange_failed",
            TradingEvent::ContrarianSignalComputed { .. } => "contrarian_signal_computed",
            TradingEvent::TargetsRebuilt { .. } => "targets_rebuilt",
            TradingEvent::RebalanceRecommendationsBuilt { .. } => {
                "rebalance_recommendations_built"
            }
            TradingEvent::ScoreCalculated { .. } => "score_calculated",
            TradingEvent::JobStarted { .. } => "job_started",
            TradingEvent::JobCompleted { .. } => "job_completed",
            TradingEvent::JobFailed { .. } => "job_failed",
            TradingEvent::JobSkipped { .. } => "job_skipped",
            TradingEvent::BackupCompleted { .. } => "backup_completed",
            TradingEvent::BackupFailed { .. } => "backup_failed",
            TradingEvent::LockAcquired { .. } => "lock_acquired",
            TradingEvent::LockTimedOut { .. } => "lock_timed_out",
        }
    }
}

/// A subscription handle. Dropping the bus's internal entry for this id
/// (via [`EventBus::unsubscribe`]) stops further delivery.
pub type ListenerId = Uuid;

type Listener = Arc<dyn Fn(&TradingEvent) + Send + Sync>;

/// Fire-and-forget pub/sub for [`TradingEvent`]. Listeners run synchronously
/// on the publisher's task; a listener that panics is caught and logged, and
/// never prevents later listeners from running or the publish call from
/// returning.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<ListenerId, Listener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
        }
    }

    pub async fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&TradingEvent) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        self.listeners.write().await.insert(id, Arc::new(listener));
        id
    }

    pub async fn unsubscribe(&self, id: ListenerId) {
        self.listeners.write().await.remove(&id);
    }

    pub async fn clear_all_listeners(&self) {
        self.listeners.write().await.clear();
    }

    /// Invoke every listener with `event`, in subscription order. Each call
    /// is wrapped in `catch_unwind` so one broken subscriber cannot take
    /// down the publisher or its siblings.
    pub async fn publish(&self, event: TradingEvent) {
        let listeners: Vec<Listener> = self.listeners.read().await.values().cloned().collect();
        for listener in listeners {
            let event_ref = &event;
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| listener(event_ref)));
            if let Err(panic) = result {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                tracing::error!(
                    event = event_ref.kind(),
                    panic = %message,
                    "event listener panicked, continuing"
                );
            }
        }
    }

    pub async fn listener_count(&self) -> usize {
        self.listeners.read().await.len()
    }
}

/// Timestamped wrapper persisted by audit-style listeners (job history,
/// recommendation logs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub event: TradingEvent,
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn publish_delivers_to_all_subscribers() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count_a = count.clone();
        bus.subscribe(move |_| {
            count_a.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        let count_b = count.clone();
        bus.subscribe(move |_| {
            count_b.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        bus.publish(TradingEvent::MarketOpened {
            exchange: "XNYS".into(),
        })
        .await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn publish_swallows_listener_panics() {
        let bus = EventBus::new();
        let survived = Arc::new(AtomicUsize::new(0));

        bus.subscribe(|_| panic!("boom")).await;
        let survived_clone = survived.clone();
        bus.subscribe(move |_| {
            survived_clone.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        bus.publish(TradingEvent::MarketClosed {
            exchange: "XNYS".into(),
        })
        .await;

        assert_eq!(survived.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let id = bus
            .subscribe(move |_| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        bus.unsubscribe(id).await;
        bus.publish(TradingEvent::MarketOpened {
            exchange: "XNYS".into(),
        })
        .await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
