//! `AppDeps::build` seeds the default job schedule table once, on a truly
//! empty store, and never again overwrites an operator's edits on a
//! subsequent boot against the same data directory.

use sentinel_agent::application::deps::AppDeps;
use sentinel_agent::config::{
    BrokerConfig, Config, ObservabilityConfig, PlannerConfig, SchedulerConfig, StrategyConfig,
    StrategyRegistryConfig,
};

fn config_for(data_dir: std::path::PathBuf) -> Config {
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

#[tokio::test]
async fn first_boot_seeds_every_job_type_enabled() {
    let tempdir = tempfile::tempdir().unwrap();
    let deps = AppDeps::build(config_for(tempdir.path().to_path_buf())).await.unwrap();

    let schedules = deps.job_schedules.get_all().await.unwrap();
    assert!(!schedules.is_empty());
    assert!(schedules.iter().any(|s| s.job_type == "trading:execute"));
    assert!(schedules.iter().any(|s| s.job_type == "trading:rebalance_targets"));
    assert!(schedules.iter().all(|s| s.enabled));
}

#[tokio::test]
async fn second_boot_does_not_reseed_over_operator_edit() {
    let tempdir = tempfile::tempdir().unwrap();
    let config = config_for(tempdir.path().to_path_buf());

    let deps = AppDeps::build(config.clone()).await.unwrap();
    let mut edited = deps.job_schedules.get("trading:execute").await.unwrap().unwrap();
    edited.enabled = false;
    deps.job_schedules.upsert(edited).await.unwrap();
    drop(deps);

    let deps2 = AppDeps::build(config).await.unwrap();
    let reloaded = deps2.job_schedules.get("trading:execute").await.unwrap().unwrap();
    assert!(!reloaded.enabled, "re-running build() must not clobber an operator's disable");
}
