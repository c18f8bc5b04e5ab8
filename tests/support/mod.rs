//! Shared integration-test harness.
//!
//! Builds the same collaborator graph `AppDeps::build` wires at bootstrap,
//! but with every repository backed by an in-memory store and every
//! external dependency backed by a mock, so tests get named handles
//! (`harness.broker`, `harness.price_provider`, ...) to set up fixtures and
//! assert on afterward. `AppDeps::build` itself only ever hands back
//! `Arc<dyn Trait>`, which is enough to run the application but not enough
//! to poke at mock internals from a test.

use std::sync::Arc;

use sentinel_agent::application::deps::AppDeps;
use sentinel_agent::config::{
    BrokerConfig, Config, ObservabilityConfig, PlannerConfig, SchedulerConfig, StrategyConfig,
    StrategyRegistryConfig,
};
use sentinel_agent::domain::currency::CurrencyRouter;
use sentinel_agent::domain::events::EventBus;
use sentinel_agent::domain::planner::Planner;
use sentinel_agent::domain::registry::filters::CorrelationAwareFilter;
use sentinel_agent::domain::registry::opportunities::{
    AveragingDownCalculator, OpportunityBuysCalculator, ProfitTakingCalculator,
    RebalanceBuysCalculator, RebalanceSellsCalculator,
};
use sentinel_agent::domain::registry::patterns::{
    CashGenerationPattern, CostOptimizedPattern, DeepRebalancePattern, DirectBuyPattern,
    OpportunityFirstPattern, ProfitTakingPattern, SingleBestPattern,
};
use sentinel_agent::domain::registry::sequences::{
    CombinatorialGenerator, EnhancedCombinatorialGenerator,
};
use sentinel_agent::domain::registry::{
    OpportunityRegistry, PatternRegistry, SequenceFilterRegistry, SequenceGeneratorRegistry,
};
use sentinel_agent::domain::scoring::Scorer;
use sentinel_agent::infrastructure::backup::{BackupArchiver, NoopBackupUploader};
use sentinel_agent::infrastructure::lock::FileAdvisoryLock;
use sentinel_agent::infrastructure::mock::{
    CooldownTradeFrequencyService, MockBroker, MockHistoricalRateSource, MockPriceProvider,
    MockRateSource, ThresholdPnlTracker,
};
use sentinel_agent::infrastructure::planner_trigger::NoopPlannerTrigger;
use sentinel_agent::infrastructure::repositories::{
    InMemoryCashBalanceRepository, InMemoryJobHistoryRepository, InMemoryJobScheduleRepository,
    InMemoryPlannerRepository, InMemoryPositionRepository, InMemoryScoreRepository,
    InMemorySettingsRepository, InMemoryStockRepository, InMemoryTradeRepository,
};

/// A fully-wired `AppDeps` plus named handles onto the mocks underneath it,
/// rooted in a temp directory that is removed when the harness is dropped.
pub struct TestHarness {
    pub deps: Arc<AppDeps>,
    pub broker: Arc<MockBroker>,
    pub price_provider: Arc<MockPriceProvider>,
    pub pnl_tracker: Arc<ThresholdPnlTracker>,
    pub trade_frequency: Arc<CooldownTradeFrequencyService>,
    _tempdir: tempfile::TempDir,
}

fn test_config(data_dir: std::path::PathBuf) -> Config {
    Config {
        data_dir,
        broker: BrokerConfig::from_env(),
        planner: PlannerConfig::from_env(),
        strategy: StrategyConfig::from_env(),
        registry: StrategyRegistryConfig::balanced_default(),
        scheduler: SchedulerConfig::from_env(),
        observability: ObservabilityConfig::from_env(),
    }
}

/// Build a harness with every collaborator mocked or in-memory. Mirrors
/// `AppDeps::build`'s wiring order without touching SQLite.
pub async fn build() -> TestHarness {
    let tempdir = tempfile::tempdir().expect("create tempdir");
    let config = test_config(tempdir.path().to_path_buf());

    let stocks = Arc::new(InMemoryStockRepository::default());
    let positions = Arc::new(InMemoryPositionRepository::default());
    let cash_balances = Arc::new(InMemoryCashBalanceRepository::default());
    let trades = Arc::new(InMemoryTradeRepository::default());
    let job_schedules = Arc::new(InMemoryJobScheduleRepository::default());
    let job_history = Arc::new(InMemoryJobHistoryRepository::default());
    let scores = Arc::new(InMemoryScoreRepository::default());
    let settings = Arc::new(InMemorySettingsRepository::default());
    let planner_repo = Arc::new(InMemoryPlannerRepository::default());

    let broker = Arc::new(MockBroker::new());
    let price_provider = Arc::new(MockPriceProvider::new());
    let pnl_tracker = Arc::new(ThresholdPnlTracker::new(config.strategy.pnl_warning_pct, config.strategy.pnl_halt_pct));
    let trade_frequency = Arc::new(CooldownTradeFrequencyService::new(config.strategy.trade_cooldown_minutes));

    let event_bus = Arc::new(EventBus::new());
    let advisory_lock = Arc::new(FileAdvisoryLock::new(config.data_dir.join("locks")).expect("create lock dir"));
    let market_oracle = Arc::new(sentinel_agent::application::market_oracle::LiveMarketOracle::new());

    let live_rates = MockRateSource::default();
    live_rates.set("EURUSD_T0.ITS", rust_decimal_macros::dec!(1.08)).await;
    let historical_rates = MockHistoricalRateSource::default();
    {
        let mut rates = historical_rates.rates_to_eur.lock().await;
        rates.insert(sentinel_agent::domain::model::Currency::Eur, rust_decimal_macros::dec!(1));
        rates.insert(sentinel_agent::domain::model::Currency::Usd, rust_decimal_macros::dec!(0.93));
        rates.insert(sentinel_agent::domain::model::Currency::Gbp, rust_decimal_macros::dec!(1.16));
        rates.insert(sentinel_agent::domain::model::Currency::Hkd, rust_decimal_macros::dec!(0.119));
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

    let backup_archiver = Arc::new(BackupArchiver::new(&config.data_dir));

    let deps = Arc::new(AppDeps {
        config,
        broker: broker.clone(),
        price_provider: price_provider.clone(),
        pnl_tracker: pnl_tracker.clone(),
        trade_frequency: trade_frequency.clone(),
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
        planner_trigger: Arc::new(NoopPlannerTrigger),
        backup_archiver,
        backup_uploader: Arc::new(NoopBackupUploader),
    });

    TestHarness {
        deps,
        broker,
        price_provider,
        pnl_tracker,
        trade_frequency,
        _tempdir: tempdir,
    }
}
