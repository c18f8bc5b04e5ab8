//! Trade-execution loop (C10).
//!
//! The only component that calls the broker to place orders. Runs forever
//! under the `event_based_trading` advisory lock, held across the entire
//! loop body (not reacquired per iteration), grounded in
//! `original_source/app/jobs/event_based_trading.py`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::domain::events::TradingEvent;
use crate::domain::locks::EXECUTION_TIMEOUT;
use crate::domain::model::{PortfolioHash, Side};
use crate::domain::ports::PnlState;

use super::deps::AppDeps;
use super::tasks::{exchange_suffix, portfolio_hash_now, sync_portfolio};

const PLANNING_POLL_INTERVAL: Duration = Duration::from_secs(10);
const PLANNING_POLL_MAX_ITERATIONS: u32 = 360;
const NO_RECOMMENDATION_SLEEP: Duration = Duration::from_secs(60);
const HALTED_SLEEP: Duration = Duration::from_secs(300);
const GATE_FAILED_SLEEP: Duration = Duration::from_secs(60);
const MARKET_CLOSED_SLEEP: Duration = Duration::from_secs(300);
const ORDER_SKIPPED_SLEEP: Duration = Duration::from_secs(60);
const ORDER_FAILED_SLEEP: Duration = Duration::from_secs(300);
const OUTER_ERROR_SLEEP: Duration = Duration::from_secs(60);

const MONITOR_PHASE1_TICKS: u32 = 10;
const MONITOR_PHASE1_INTERVAL: Duration = Duration::from_secs(30);
const MONITOR_PHASE2_TICKS: u32 = 15;
const MONITOR_PHASE2_INTERVAL: Duration = Duration::from_secs(60);

/// A candidate next trade read off the planner's best sequence for the
/// current portfolio hash.
struct NextAction {
    symbol: String,
    side: Side,
    quantity: i64,
    price: rust_decimal::Decimal,
}

pub struct TradeExecutionLoop {
    deps: Arc<AppDeps>,
}

impl TradeExecutionLoop {
    pub fn new(deps: Arc<AppDeps>) -> Self {
        Self { deps }
    }

    /// Runs forever. Intended to be `tokio::spawn`ed once at startup. The
    /// lock guard lives for the whole loop, never reacquired per iteration.
    pub async fn run(self) {
        let _guard = match self
            .deps
            .advisory_lock
            .acquire(crate::domain::locks::EVENT_BASED_TRADING, EXECUTION_TIMEOUT)
            .await
        {
            Ok(guard) => guard,
            Err(err) => {
                error!(error = %err, "could not acquire event_based_trading lock; execution loop will not run");
                return;
            }
        };
        self.deps
            .event_bus
            .publish(TradingEvent::LockAcquired {
                lock_name: crate::domain::locks::EVENT_BASED_TRADING.to_string(),
            })
            .await;

        loop {
            if let Err(err) = self.iteration().await {
                self.deps
                    .event_bus
                    .publish(TradingEvent::ErrorOccurred {
                        message: err.to_string(),
                        source: "execution_loop".into(),
                    })
                    .await;
                tokio::time::sleep(OUTER_ERROR_SLEEP).await;
            }
        }
    }

    async fn iteration(&self) -> anyhow::Result<()> {
        let hash = portfolio_hash_now(&self.deps).await?;

        if !self.wait_for_planning_completion(&hash).await? {
            info!(hash = %hash.short(), "planning did not finish within the poll window, proceeding with the best result so far");
        }

        let Some(action) = self.next_action(&hash).await? else {
            tokio::time::sleep(NO_RECOMMENDATION_SLEEP).await;
            return Ok(());
        };

        let pnl = self.deps.pnl_tracker.status().await?;
        if pnl.state == PnlState::Halted {
            self.deps
                .event_bus
                .publish(TradingEvent::ErrorOccurred {
                    message: pnl.reason.unwrap_or_else(|| "trading halted by daily P&L guard".into()),
                    source: "pnl_tracker".into(),
                })
                .await;
            tokio::time::sleep(HALTED_SLEEP).await;
            return Ok(());
        }

        if !self.validate_next_action(&action, &pnl).await? {
            tokio::time::sleep(GATE_FAILED_SLEEP).await;
            return Ok(());
        }

        if let Some(exchange) = exchange_suffix(&action.symbol) {
            let should_check = self.deps.market_oracle.should_check_market_hours(&exchange, action.side);
            if should_check && !self.deps.market_oracle.is_market_open(&exchange).await {
                tokio::time::sleep(MARKET_CLOSED_SLEEP).await;
                return Ok(());
            }
        }

        self.execute(&action).await
    }

    /// Poll every ~10s, triggering batch work if unfinished, for up to ~360
    /// iterations (1 hour). Returns whether planning actually finished.
    async fn wait_for_planning_completion(&self, hash: &PortfolioHash) -> anyhow::Result<bool> {
        for _ in 0..PLANNING_POLL_MAX_ITERATIONS {
            if self.deps.planner.is_finished(hash).await? {
                return Ok(true);
            }
            tokio::time::sleep(PLANNING_POLL_INTERVAL).await;
        }
        Ok(false)
    }

    async fn next_action(&self, hash: &PortfolioHash) -> anyhow::Result<Option<NextAction>> {
        let Some(sequence) = self.deps.planner.get_best_result(hash).await? else {
            return Ok(None);
        };
        let Some(first) = sequence.actions.first() else {
            return Ok(None);
        };

        self.deps
            .event_bus
            .publish(TradingEvent::RecommendationCreated {
                symbol: first.symbol.clone(),
                side: first.side,
                quantity: first.quantity,
            })
            .await;

        Ok(Some(NextAction {
            symbol: first.symbol.clone(),
            side: first.side,
            quantity: first.quantity,
            price: first.price,
        }))
    }

    /// The compound gate from §4.10 step 4.
    async fn validate_next_action(&self, action: &NextAction, pnl: &crate::domain::ports::PnlStatus) -> anyhow::Result<bool> {
        if !self.deps.trade_frequency.can_execute_trade(&action.symbol, action.side).await? {
            self.reject(action, "trade frequency cooldown active").await;
            return Ok(false);
        }

        match action.side {
            Side::Buy => {
                if !pnl.can_buy {
                    self.reject(action, "pnl guard blocks buys").await;
                    return Ok(false);
                }
                let min_trade_size = rust_decimal::Decimal::try_from(self.deps.config.broker.min_trade_size_eur)
                    .unwrap_or_default();
                let cash = self.deps.cash_balances.get_all().await?;
                let available_eur = cash
                    .iter()
                    .find(|b| b.currency == crate::domain::model::Currency::Eur)
                    .map(|b| b.amount)
                    .unwrap_or_default();
                if available_eur < min_trade_size {
                    self.reject(action, "insufficient cash for minimum trade size").await;
                    return Ok(false);
                }
            }
            Side::Sell => {
                if !pnl.can_sell {
                    self.reject(action, "pnl guard blocks sells").await;
                    return Ok(false);
                }
                let within_minutes = self.deps.config.broker.recent_sell_window_minutes;
                if self.deps.trades.has_recent_sell_order(&action.symbol, within_minutes).await? {
                    self.reject(action, "recent sell order already in flight").await;
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    async fn reject(&self, action: &NextAction, reason: &str) {
        self.deps
            .event_bus
            .publish(TradingEvent::TradeValidationFailed {
                symbol: action.symbol.clone(),
                reason: reason.to_string(),
            })
            .await;
    }

    /// Place the order, then resync the portfolio and monitor for a hash
    /// change through the two-phase window from §4.10 step 6.
    async fn execute(&self, action: &NextAction) -> anyhow::Result<()> {
        self.deps
            .event_bus
            .publish(TradingEvent::TradeExecutionStarted {
                symbol: action.symbol.clone(),
                side: action.side,
                quantity: action.quantity,
            })
            .await;

        let result = self.deps.broker.place_order(&action.symbol, action.side, action.quantity).await;

        let order = match result {
            Ok(Some(order)) => order,
            Ok(None) => {
                self.deps
                    .event_bus
                    .publish(TradingEvent::TradeExecutionFailed {
                        symbol: action.symbol.clone(),
                        error: "broker reported no order result".into(),
                    })
                    .await;
                tokio::time::sleep(ORDER_SKIPPED_SLEEP).await;
                return Ok(());
            }
            Err(err) => {
                self.deps
                    .event_bus
                    .publish(TradingEvent::TradeExecutionFailed {
                        symbol: action.symbol.clone(),
                        error: err.to_string(),
                    })
                    .await;
                tokio::time::sleep(ORDER_FAILED_SLEEP).await;
                return Ok(());
            }
        };

        self.deps
            .event_bus
            .publish(TradingEvent::OrderPlaced {
                order_id: order.order_id.clone(),
                symbol: action.symbol.clone(),
                side: action.side,
                quantity: action.quantity,
            })
            .await;
        self.deps
            .trade_frequency
            .record_trade(&action.symbol, action.side)
            .await;
        self.deps
            .event_bus
            .publish(TradingEvent::TradeExecutionCompleted {
                symbol: action.symbol.clone(),
                side: action.side,
                quantity: action.quantity,
                fill_price: action.price,
            })
            .await;

        let before_hash = sync_portfolio(&self.deps).await?;

        let changed = self.monitor_for_hash_change(&before_hash, MONITOR_PHASE1_TICKS, MONITOR_PHASE1_INTERVAL).await?
            || self.monitor_for_hash_change(&before_hash, MONITOR_PHASE2_TICKS, MONITOR_PHASE2_INTERVAL).await?;

        if changed {
            self.deps
                .event_bus
                .publish(TradingEvent::RecommendationsInvalidated {
                    reason: "portfolio hash changed after trade execution".into(),
                })
                .await;
        }

        Ok(())
    }

    async fn monitor_for_hash_change(
        &self,
        before: &PortfolioHash,
        ticks: u32,
        interval: Duration,
    ) -> anyhow::Result<bool> {
        for _ in 0..ticks {
            tokio::time::sleep(interval).await;
            let current = sync_portfolio(&self.deps).await?;
            if &current != before {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use crate::config::{
        BrokerConfig, Config, ObservabilityConfig, PlannerConfig, SchedulerConfig, StrategyConfig,
        StrategyRegistryConfig,
    };
    use crate::domain::events::EventBus;
    use crate::domain::model::Currency;
    use crate::domain::planner::Planner;
    use crate::domain::ports::PnlStatus;
    use crate::domain::registry::{
        OpportunityRegistry, PatternRegistry, SequenceFilterRegistry, SequenceGeneratorRegistry,
    };
    use crate::domain::scoring::Scorer;
    use crate::infrastructure::backup::{BackupArchiver, NoopBackupUploader};
    use crate::infrastructure::mock::{CooldownTradeFrequencyService, MockBroker, MockHistoricalRateSource, MockPriceProvider, MockRateSource, ThresholdPnlTracker};
    use crate::infrastructure::planner_trigger::NoopPlannerTrigger;
    use crate::infrastructure::repositories::{
        InMemoryCashBalanceRepository, InMemoryJobHistoryRepository, InMemoryJobScheduleRepository,
        InMemoryPlannerRepository, InMemoryPositionRepository, InMemoryScoreRepository,
        InMemorySettingsRepository, InMemoryStockRepository, InMemoryTradeRepository,
    };

    use super::*;

    /// Builds an `AppDeps` wired entirely from in-memory/mock collaborators
    /// for gate-logic tests. Mirrors `AppDeps::build`'s wiring order without
    /// touching SQLite or the filesystem advisory lock.
    async fn test_deps(data_dir: std::path::PathBuf) -> Arc<AppDeps> {
        let config = Config {
            data_dir: data_dir.clone(),
            broker: BrokerConfig::from_env(),
            planner: PlannerConfig::from_env(),
            strategy: StrategyConfig::from_env(),
            registry: StrategyRegistryConfig::balanced_default(),
            scheduler: SchedulerConfig::from_env(),
            observability: ObservabilityConfig::from_env(),
        };

        let planner_repo: Arc<dyn crate::domain::repositories::PlannerRepository> =
            Arc::new(InMemoryPlannerRepository::default());
        let opportunities = Arc::new(OpportunityRegistry::default());
        let patterns = Arc::new(PatternRegistry::default());
        let sequence_generators = Arc::new(SequenceGeneratorRegistry::default());
        let filters = Arc::new(SequenceFilterRegistry::default());
        let event_bus = Arc::new(EventBus::new());
        let scorer = Scorer::new(config.planner.risk_profile);
        let planner = Arc::new(Planner::new(
            planner_repo.clone(),
            opportunities.clone(),
            patterns.clone(),
            sequence_generators.clone(),
            filters.clone(),
            scorer,
            event_bus.clone(),
            config.planner.batch_sizes(),
        ));

        Arc::new(AppDeps {
            broker: Arc::new(MockBroker::new()),
            price_provider: Arc::new(MockPriceProvider::new()),
            pnl_tracker: Arc::new(ThresholdPnlTracker::new(config.strategy.pnl_warning_pct, config.strategy.pnl_halt_pct)),
            trade_frequency: Arc::new(CooldownTradeFrequencyService::new(config.strategy.trade_cooldown_minutes)),
            stocks: Arc::new(InMemoryStockRepository::default()),
            positions: Arc::new(InMemoryPositionRepository::default()),
            scores: Arc::new(InMemoryScoreRepository::default()),
            settings: Arc::new(InMemorySettingsRepository::default()),
            trades: Arc::new(InMemoryTradeRepository::default()),
            cash_balances: Arc::new(InMemoryCashBalanceRepository::default()),
            planner_repo,
            job_schedules: Arc::new(InMemoryJobScheduleRepository::default()),
            job_history: Arc::new(InMemoryJobHistoryRepository::default()),
            event_bus,
            advisory_lock: Arc::new(crate::infrastructure::lock::FileAdvisoryLock::new(data_dir.join("locks")).unwrap()),
            currency_router: Arc::new(crate::domain::currency::CurrencyRouter::new(
                Box::new(MockRateSource::default()),
                Box::new(MockHistoricalRateSource::default()),
            )),
            market_oracle: Arc::new(super::super::market_oracle::LiveMarketOracle::new()),
            opportunities,
            patterns,
            sequence_generators,
            filters,
            planner,
            planner_trigger: Arc::new(NoopPlannerTrigger),
            backup_archiver: Arc::new(BackupArchiver::new(&data_dir)),
            backup_uploader: Arc::new(NoopBackupUploader),
            config,
        })
    }

    async fn harness() -> (tempfile::TempDir, Arc<AppDeps>, TradeExecutionLoop) {
        let tempdir = tempfile::tempdir().unwrap();
        let deps = test_deps(tempdir.path().to_path_buf()).await;
        let loop_ = TradeExecutionLoop::new(deps.clone());
        (tempdir, deps, loop_)
    }

    fn action(symbol: &str, side: Side) -> NextAction {
        NextAction {
            symbol: symbol.to_string(),
            side,
            quantity: 8,
            price: dec!(120),
        }
    }

    /// Scenario E: a recent SELL order for the symbol blocks a further SELL.
    #[tokio::test]
    async fn recent_sell_order_blocks_sell_validation() {
        let (_tempdir, deps, loop_) = harness().await;
        deps
            .trades
            .record(crate::domain::repositories::RecordedTrade {
                broker_trade_id: "t1".into(),
                symbol: "AAPL.US".into(),
                side: Side::Sell,
                quantity: 4,
                price: dec!(120),
                currency: Currency::Usd,
                executed_at: chrono::Utc::now(),
                commission: None,
            })
            .await
            .unwrap();

        let passed = loop_
            .validate_next_action(&action("AAPL.US", Side::Sell), &PnlStatus::ok())
            .await
            .unwrap();
        assert!(!passed);
    }

    #[tokio::test]
    async fn sell_without_recent_order_passes_validation() {
        let (_tempdir, _deps, loop_) = harness().await;
        let passed = loop_
            .validate_next_action(&action("AAPL.US", Side::Sell), &PnlStatus::ok())
            .await
            .unwrap();
        assert!(passed);
    }

    #[tokio::test]
    async fn buy_below_min_trade_size_cash_fails_validation() {
        let (_tempdir, deps, loop_) = harness().await;
        deps.cash_balances.set(crate::domain::model::CashBalance { currency: Currency::Eur, amount: dec!(10) }).await.unwrap();

        let passed = loop_
            .validate_next_action(&action("AAPL.US", Side::Buy), &PnlStatus::ok())
            .await
            .unwrap();
        assert!(!passed);
    }

    #[tokio::test]
    async fn buy_with_sufficient_cash_passes_validation() {
        let (_tempdir, deps, loop_) = harness().await;
        deps.cash_balances.set(crate::domain::model::CashBalance { currency: Currency::Eur, amount: dec!(1200) }).await.unwrap();

        let passed = loop_
            .validate_next_action(&action("AAPL.US", Side::Buy), &PnlStatus::ok())
            .await
            .unwrap();
        assert!(passed);
    }

    #[tokio::test]
    async fn pnl_guard_blocks_buy_side() {
        let (_tempdir, deps, loop_) = harness().await;
        deps.cash_balances.set(crate::domain::model::CashBalance { currency: Currency::Eur, amount: dec!(1200) }).await.unwrap();
        let pnl = PnlStatus { state: crate::domain::ports::PnlState::Halted, can_buy: false, can_sell: false, reason: None };

        let passed = loop_.validate_next_action(&action("AAPL.US", Side::Buy), &pnl).await.unwrap();
        assert!(!passed);
    }

    /// The cooldown gate fires independent of P&L or cash state: a symbol
    /// just traded cannot be traded again before `trade_cooldown_minutes`.
    #[tokio::test]
    async fn cooldown_blocks_repeat_trade_on_same_symbol() {
        let (_tempdir, deps, loop_) = harness().await;
        deps.cash_balances.set(crate::domain::model::CashBalance { currency: Currency::Eur, amount: dec!(1200) }).await.unwrap();
        deps.trade_frequency.record_trade("AAPL.US", Side::Buy).await;

        let passed = loop_
            .validate_next_action(&action("AAPL.US", Side::Buy), &PnlStatus::ok())
            .await
            .unwrap();
        assert!(!passed);
    }
}
