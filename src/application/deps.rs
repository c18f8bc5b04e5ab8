//! The dependency bag every scheduled task and the execution loop is handed.
//!
//! Mirrors the teacher's `Application` struct (`application/system.rs`) and
//! the Design Note's resolution for "singletons / process-global state":
//! one explicit, dependency-injected record built once at bootstrap, never
//! hidden class/static state.

use std::sync::Arc;

use rust_decimal_macros::dec;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::config::Config;
use crate::domain::currency::CurrencyRouter;
use crate::domain::events::EventBus;
use crate::domain::locks::AdvisoryLock;
use crate::domain::model::{JobSchedule, MarketTiming};
use crate::domain::planner::Planner;
use crate::domain::ports::{Broker, DailyPnlTracker, PriceProvider, TradeFrequencyService};
use crate::domain::registry::filters::CorrelationAwareFilter;
use crate::domain::registry::opportunities::{
    AveragingDownCalculator, OpportunityBuysCalculator, ProfitTakingCalculator,
    RebalanceBuysCalculator, RebalanceSellsCalculator,
};
use crate::domain::registry::patterns::{
    CashGenerationPattern, CostOptimizedPattern, DeepRebalancePattern, DirectBuyPattern,
    OpportunityFirstPattern, ProfitTakingPattern, SingleBestPattern,
};
use crate::domain::registry::sequences::{CombinatorialGenerator, EnhancedCombinatorialGenerator};
use crate::domain::registry::{
    OpportunityRegistry, PatternRegistry, SequenceFilterRegistry, SequenceGeneratorRegistry,
};
use crate::domain::repositories::{
    CashBalanceRepository, JobHistoryRepository, JobScheduleRepository, PlannerRepository,
    PositionRepository, ScoreRepository, SettingsRepository, StockRepository, TradeRepository,
};
use crate::domain::scoring::Scorer;
use crate::infrastructure::backup::{BackupArchiver, BackupUploader, NoopBackupUploader};
use crate::infrastructure::lock::FileAdvisoryLock;
use crate::infrastructure::mock::{
    CooldownTradeFrequencyService, MockBroker, MockHistoricalRateSource, MockPriceProvider,
    MockRateSource, ThresholdPnlTracker,
};
use crate::infrastructure::planner_trigger::{NoopPlannerTrigger, PlannerTrigger};
use crate::infrastructure::repositories::{InMemoryPlannerRepository, InMemoryScoreRepository, InMemorySettingsRepository};
use crate::infrastructure::sqlite_repositories::{
    self, SqliteCashBalanceRepository, SqliteJobHistoryRepository, SqliteJobScheduleRepository,
    SqlitePositionRepository, SqliteStockRepository, SqliteTradeRepository,
};

use super::market_oracle::LiveMarketOracle;

/// Everything a `SchedulableTask` or the execution loop may need, bundled
/// once at bootstrap. Individual tasks borrow only the fields their
/// dependency-name declares they need (enforced by convention, not the type
/// system, matching `tasks.py`'s `(db, broker, planner)`-style signatures).
pub struct AppDeps {
    pub config: Config,

    pub broker: Arc<dyn Broker>,
    pub price_provider: Arc<dyn PriceProvider>,
    pub pnl_tracker: Arc<dyn DailyPnlTracker>,
    pub trade_frequency: Arc<dyn TradeFrequencyService>,

    pub stocks: Arc<dyn StockRepository>,
    pub positions: Arc<dyn PositionRepository>,
    pub scores: Arc<dyn ScoreRepository>,
    pub settings: Arc<dyn SettingsRepository>,
    pub trades: Arc<dyn TradeRepository>,
    pub cash_balances: Arc<dyn CashBalanceRepository>,
    pub planner_repo: Arc<dyn PlannerRepository>,
    pub job_schedules: Arc<dyn JobScheduleRepository>,
    pub job_history: Arc<dyn JobHistoryRepository>,

    pub event_bus: Arc<EventBus>,
    pub advisory_lock: Arc<dyn AdvisoryLock>,
    pub currency_router: Arc<CurrencyRouter>,
    pub market_oracle: Arc<LiveMarketOracle>,

    pub opportunities: Arc<OpportunityRegistry>,
    pub patterns: Arc<PatternRegistry>,
    pub sequence_generators: Arc<SequenceGeneratorRegistry>,
    pub filters: Arc<SequenceFilterRegistry>,

    pub planner: Arc<Planner>,
    pub planner_trigger: Arc<dyn PlannerTrigger>,

    pub backup_archiver: Arc<BackupArchiver>,
    pub backup_uploader: Arc<dyn BackupUploader>,
}

impl AppDeps {
    /// Wire every collaborator from `config`, open (and migrate) the SQLite
    /// store, seed the default job schedule table if empty, and return the
    /// shared bag every task borrows from. Mirrors the teacher's
    /// `Application::build` bootstrap sequence.
    pub async fn build(config: Config) -> anyhow::Result<Arc<Self>> {
        std::fs::create_dir_all(&config.data_dir)?;

        let db_path = config.data_dir.join("sentinel.db");
        let connect_options = SqliteConnectOptions::new().filename(&db_path).create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(connect_options).await?;
        sqlite_repositories::migrate(&pool).await?;

        let stocks: Arc<dyn StockRepository> = Arc::new(SqliteStockRepository::new(pool.clone()));
        let positions: Arc<dyn PositionRepository> = Arc::new(SqlitePositionRepository::new(pool.clone()));
        let cash_balances: Arc<dyn CashBalanceRepository> = Arc::new(SqliteCashBalanceRepository::new(pool.clone()));
        let trades: Arc<dyn TradeRepository> = Arc::new(SqliteTradeRepository::new(pool.clone()));
        let job_schedules: Arc<dyn JobScheduleRepository> = Arc::new(SqliteJobScheduleRepository::new(pool.clone()));
        let job_history: Arc<dyn JobHistoryRepository> = Arc::new(SqliteJobHistoryRepository::new(pool.clone()));

        let scores: Arc<dyn ScoreRepository> = Arc::new(InMemoryScoreRepository::default());
        let settings: Arc<dyn SettingsRepository> = Arc::new(InMemorySettingsRepository::default());
        let planner_repo: Arc<dyn PlannerRepository> = Arc::new(InMemoryPlannerRepository::default());

        let broker: Arc<dyn Broker> = Arc::new(MockBroker::new());
        let price_provider: Arc<dyn PriceProvider> = Arc::new(MockPriceProvider::new());
        let pnl_tracker: Arc<dyn DailyPnlTracker> = Arc::new(ThresholdPnlTracker::new(
            config.strategy.pnl_warning_pct,
            config.strategy.pnl_halt_pct,
        ));
        let trade_frequency: Arc<dyn TradeFrequencyService> =
            Arc::new(CooldownTradeFrequencyService::new(config.strategy.trade_cooldown_minutes));

        let event_bus = Arc::new(EventBus::new());
        let advisory_lock: Arc<dyn AdvisoryLock> = Arc::new(FileAdvisoryLock::new(config.data_dir.join("locks"))?);
        let market_oracle = Arc::new(LiveMarketOracle::new());

        let live_rates = MockRateSource::default();
        live_rates.set("EURUSD_T0.ITS", dec!(1.08)).await;
        live_rates.set("EURGBP_T0.ITS", dec!(0.86)).await;
        live_rates.set("GBPUSD_T0.ITS", dec!(1.27)).await;
        live_rates.set("HKD/EUR", dec!(0.115)).await;
        live_rates.set("HKD/USD", dec!(0.128)).await;

        let historical_rates = MockHistoricalRateSource::default();
        {
            let mut rates = historical_rates.rates_to_eur.lock().await;
            rates.insert(crate::domain::model::Currency::Eur, dec!(1));
            rates.insert(crate::domain::model::Currency::Usd, dec!(0.93));
            rates.insert(crate::domain::model::Currency::Gbp, dec!(1.16));
            rates.insert(crate::domain::model::Currency::Hkd, dec!(0.119));
        }
        let currency_router = Arc::new(CurrencyRouter::new(Box::new(live_rates), Box::new(historical_rates)));

        let mut opportunities = OpportunityRegistry::default();
        opportunities.register(Arc::new(OpportunityBuysCalculator::default()));
        opportunities.register(Arc::new(AveragingDownCalculator::default()));
        opportunities.register(Arc::new(ProfitTakingCalculator::default()));
        opportunities.register(Arc::new(RebalanceBuysCalculator::default()));
        opportunities.register(Arc::new(RebalanceSellsCalculator::default()));
        let opportunities = Arc::new(opportunities);

        let mut patterns = PatternRegistry::default();
        patterns.register(Arc::new(DirectBuyPattern::default()));
        patterns.register(Arc::new(SingleBestPattern::default()));
        patterns.register(Arc::new(ProfitTakingPattern::default()));
        patterns.register(Arc::new(OpportunityFirstPattern::default()));
        patterns.register(Arc::new(CashGenerationPattern::default()));
        patterns.register(Arc::new(CostOptimizedPattern::default()));
        patterns.register(Arc::new(DeepRebalancePattern::default()));
        let patterns = Arc::new(patterns);

        let mut sequence_generators = SequenceGeneratorRegistry::default();
        sequence_generators.register(Arc::new(CombinatorialGenerator::default()));
        sequence_generators.register(Arc::new(EnhancedCombinatorialGenerator::default()));
        let sequence_generators = Arc::new(sequence_generators);

        let mut filters = SequenceFilterRegistry::default();
        filters.register(Arc::new(CorrelationAwareFilter::default()));
        let filters = Arc::new(filters);

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

        let planner_trigger: Arc<dyn PlannerTrigger> = match &config.planner.self_trigger_url {
            Some(url) => Arc::new(crate::infrastructure::planner_trigger::HttpPlannerTrigger::new(
                url.clone(),
                std::time::Duration::from_secs(config.planner.self_trigger_timeout_secs),
            )),
            None => Arc::new(NoopPlannerTrigger),
        };

        let backup_archiver = Arc::new(BackupArchiver::new(&config.data_dir));
        let backup_uploader: Arc<dyn BackupUploader> = Arc::new(NoopBackupUploader);

        if job_schedules.get_all().await?.is_empty() {
            for schedule in default_job_schedules() {
                job_schedules.upsert(schedule).await?;
            }
        }

        Ok(Arc::new(Self {
            config,
            broker,
            price_provider,
            pnl_tracker,
            trade_frequency,
            stocks,
            positions,
            scores,
            settings,
            trades,
            cash_balances,
            planner_repo,
            job_schedules,
            job_history,
            event_bus,
            advisory_lock,
            currency_router,
            market_oracle,
            opportunities,
            patterns,
            sequence_generators,
            filters,
            planner,
            planner_trigger,
            backup_archiver,
            backup_uploader,
        }))
    }
}

fn job_schedule(
    job_type: &str,
    interval_minutes: u32,
    interval_market_open_minutes: Option<u32>,
    market_timing: MarketTiming,
    category: &str,
    description: &str,
) -> JobSchedule {
    JobSchedule {
        job_type: job_type.to_string(),
        interval_minutes,
        interval_market_open_minutes,
        market_timing,
        enabled: true,
        last_run: None,
        consecutive_failures: 0,
        category: category.to_string(),
        description: description.to_string(),
    }
}

/// The normative job table from §4.11, seeded once on first boot. Later
/// runs leave operator edits (made via `reschedule`/direct repository
/// writes) alone, since the seed only fires when the table is empty.
fn default_job_schedules() -> Vec<JobSchedule> {
    vec![
        job_schedule("sync:portfolio", 15, Some(5), MarketTiming::Any, "sync", "Refresh positions and cash balances from the broker"),
        job_schedule("sync:prices", 60, Some(15), MarketTiming::Any, "sync", "Refresh historical price bars"),
        job_schedule("sync:quotes", 15, Some(2), MarketTiming::DuringOpen, "sync", "Refresh live quotes"),
        job_schedule("sync:metadata", 1440, None, MarketTiming::AfterClose, "sync", "Refresh security metadata"),
        job_schedule("sync:exchange_rates", 60, Some(15), MarketTiming::Any, "sync", "Refresh FX rates to EUR"),
        job_schedule("sync:trades", 60, Some(15), MarketTiming::Any, "sync", "Reconcile broker trade history"),
        job_schedule("sync:cashflows", 240, None, MarketTiming::Any, "sync", "Reconcile broker cash flows"),
        job_schedule("sync:dividends", 1440, None, MarketTiming::AfterClose, "sync", "Reconcile dividend cash flows"),
        job_schedule("snapshot:backfill", 1440, None, MarketTiming::AfterClose, "snapshot", "Persist a daily portfolio snapshot"),
        job_schedule("aggregate:compute", 60, Some(15), MarketTiming::Any, "aggregate", "Recompute portfolio aggregates"),
        job_schedule("scoring:calculate", 1440, None, MarketTiming::AfterClose, "scoring", "Recompute per-security scores"),
        job_schedule("trading:check_markets", 5, None, MarketTiming::Any, "trading", "Refresh market-open status"),
        job_schedule("trading:rebalance", 30, Some(10), MarketTiming::DuringOpen, "trading", "Generate and evaluate planner sequences"),
        job_schedule("trading:rebalance_targets", 1440, None, MarketTiming::AfterClose, "trading", "Run the target-allocation rebalance engine"),
        job_schedule("trading:execute", 30, Some(10), MarketTiming::DuringOpen, "trading", "Place orders for the planner's best sequence"),
        job_schedule("trading:balance_fix", 60, Some(15), MarketTiming::Any, "trading", "Top up negative cash balances"),
        job_schedule("planning:refresh", 60, Some(15), MarketTiming::DuringOpen, "trading", "Refresh planner sequences outside the trading loop"),
        job_schedule("backup:daily", 1440, None, MarketTiming::AfterClose, "maintenance", "Daily backup and cleanup chain"),
        job_schedule("backup:weekly", 10080, None, MarketTiming::AfterClose, "maintenance", "Weekly backup, cleanup, and integrity check"),
        job_schedule("backup:r2", 1440, None, MarketTiming::AfterClose, "maintenance", "Upload the latest local backup archive"),
    ]
}
