//! Typed runtime configuration.
//!
//! One sub-struct per domain, matching the teacher's `config/*_config.rs`
//! split renamed to this system's own domains. Assembled from environment
//! variables via `dotenvy` + `std::env`; the declarative opportunity/
//! pattern/sequence/filter registry config is a separate `toml`-shaped file
//! (see [`StrategyRegistryConfig`]) loaded independently since it is edited
//! by hand far more often than the rest of the process config.

mod broker_config;
mod observability_config;
mod planner_config;
mod scheduler_config;
mod strategy_config;

pub use broker_config::BrokerConfig;
pub use observability_config::ObservabilityConfig;
pub use planner_config::PlannerConfig;
pub use scheduler_config::SchedulerConfig;
pub use strategy_config::{StrategyConfig, StrategyRegistryConfig, TradingMode};

use std::env;

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Top-level configuration assembled at bootstrap and handed by reference
/// to every component that needs a tunable knob.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: std::path::PathBuf,
    pub broker: BrokerConfig,
    pub planner: PlannerConfig,
    pub strategy: StrategyConfig,
    pub registry: StrategyRegistryConfig,
    pub scheduler: SchedulerConfig,
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from process environment (after `dotenvy` has
    /// populated it), falling back to the documented defaults for anything
    /// unset. The declarative module registry is read from
    /// `SENTINEL_STRATEGY_CONFIG_PATH` if set, otherwise every module is
    /// enabled at its own defaults (the "balanced" profile).
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let registry = match env::var("SENTINEL_STRATEGY_CONFIG_PATH") {
            Ok(path) => StrategyRegistryConfig::load(std::path::Path::new(&path))?,
            Err(_) => StrategyRegistryConfig::balanced_default(),
        };

        Ok(Self {
            data_dir: env_or("SENTINEL_DATA_DIR", "./data").into(),
            broker: BrokerConfig::from_env(),
            planner: PlannerConfig::from_env(),
            strategy: StrategyConfig::from_env(),
            registry,
            scheduler: SchedulerConfig::from_env(),
            observability: ObservabilityConfig::from_env(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config {
            data_dir: "./data".into(),
            broker: BrokerConfig::from_env(),
            planner: PlannerConfig::from_env(),
            strategy: StrategyConfig::from_env(),
            registry: StrategyRegistryConfig::balanced_default(),
            scheduler: SchedulerConfig::from_env(),
            observability: ObservabilityConfig::from_env(),
        };
        assert!(config.planner.batch_size > 0);
        assert_eq!(config.strategy.trading_mode, TradingMode::Research);
        assert!(config.registry.enabled_opportunities().contains(&"profit_taking".to_string()));
    }
}
