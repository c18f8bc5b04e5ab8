//! Strategy/rebalance knobs (§6 "Configuration surface") plus the
//! declarative opportunity/pattern/sequence/filter registry config (§4.7).

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::env_parse;
use crate::domain::contrarian::TargetBuilderParams;
use crate::domain::rebalance::{RebalanceParams, StateMachineParams};

/// `research` logs would-be trades without placing orders; `live` executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Research,
    Live,
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradingMode::Research => write!(f, "research"),
            TradingMode::Live => write!(f, "live"),
        }
    }
}

/// Every tunable knob in the "Configuration surface" (§6) that isn't a
/// broker/scheduler/planner concern, as typed fields rather than a dynamic
/// `get_float(key, default)` map.
#[derive(Debug, Clone)]
pub struct StrategyConfig {
    pub trading_mode: TradingMode,
    pub transaction_cost_fixed: f64,
    pub transaction_cost_percent: f64,
    pub max_opportunities_per_category: u32,
    pub enable_combinatorial_generation: bool,
    pub priority_threshold_for_combinations: f64,
    pub combinatorial_max_combinations_per_depth: u32,
    pub combinatorial_max_sells: u32,
    pub combinatorial_max_buys: u32,
    pub combinatorial_max_candidates: u32,
    pub market_regime_detection_enabled: bool,
    pub market_regime_bull_threshold: f64,
    pub market_regime_bear_threshold: f64,
    pub stock_discovery_enabled: bool,
    pub stock_discovery_score_threshold: f64,
    pub stock_discovery_max_per_month: u32,
    pub stock_discovery_require_manual_review: bool,
    pub lot_standard_max_pct: f64,
    pub lot_coarse_max_pct: f64,
    pub core_floor_pct: f64,
    pub min_opp_score: f64,
    pub max_opportunity_target: Option<f64>,
    pub core_target: f64,
    pub opportunity_target: f64,
    pub max_funding_sells_per_cycle: u32,
    pub max_funding_turnover_pct: f64,
    pub balance_buffer_eur: f64,
    pub base_trade_amount_eur: f64,
    pub min_trade_value: f64,
    pub snapshot_retention_days: i64,
    pub daily_price_retention_days: i64,
    pub backup_retention_count: u32,
    pub event_driven_rebalancing_enabled: bool,
    pub correlation_threshold: f64,
    pub pnl_warning_pct: f64,
    pub pnl_halt_pct: f64,
    pub trade_cooldown_minutes: i64,
    pub min_trade_size_eur: f64,
    pub recent_sell_order_window_minutes: i64,
}

impl StrategyConfig {
    pub fn from_env() -> Self {
        let trading_mode = match std::env::var("SENTINEL_TRADING_MODE")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "live" => TradingMode::Live,
            _ => TradingMode::Research,
        };

        Self {
            trading_mode,
            transaction_cost_fixed: env_parse("SENTINEL_TX_COST_FIXED", 1.0),
            transaction_cost_percent: env_parse("SENTINEL_TX_COST_PERCENT", 0.001),
            max_opportunities_per_category: env_parse("SENTINEL_MAX_OPPS_PER_CATEGORY", 10),
            enable_combinatorial_generation: env_parse("SENTINEL_ENABLE_COMBINATORIAL", true),
            priority_threshold_for_combinations: env_parse("SENTINEL_PRIORITY_THRESHOLD", 0.5),
            combinatorial_max_combinations_per_depth: env_parse(
                "SENTINEL_COMBINATORIAL_MAX_COMBINATIONS_PER_DEPTH",
                200,
            ),
            combinatorial_max_sells: env_parse("SENTINEL_COMBINATORIAL_MAX_SELLS", 3),
            combinatorial_max_buys: env_parse("SENTINEL_COMBINATORIAL_MAX_BUYS", 3),
            combinatorial_max_candidates: env_parse("SENTINEL_COMBINATORIAL_MAX_CANDIDATES", 12),
            market_regime_detection_enabled: env_parse("SENTINEL_MARKET_REGIME_ENABLED", false),
            market_regime_bull_threshold: env_parse("SENTINEL_MARKET_REGIME_BULL", 0.05),
            market_regime_bear_threshold: env_parse("SENTINEL_MARKET_REGIME_BEAR", -0.10),
            stock_discovery_enabled: env_parse("SENTINEL_STOCK_DISCOVERY_ENABLED", false),
            stock_discovery_score_threshold: env_parse("SENTINEL_STOCK_DISCOVERY_THRESHOLD", 0.75),
            stock_discovery_max_per_month: env_parse("SENTINEL_STOCK_DISCOVERY_MAX_PER_MONTH", 3),
            stock_discovery_require_manual_review: env_parse(
                "SENTINEL_STOCK_DISCOVERY_MANUAL_REVIEW",
                true,
            ),
            lot_standard_max_pct: env_parse("SENTINEL_LOT_STANDARD_MAX_PCT", 0.02),
            lot_coarse_max_pct: env_parse("SENTINEL_LOT_COARSE_MAX_PCT", 0.05),
            core_floor_pct: env_parse("SENTINEL_CORE_FLOOR_PCT", 0.02),
            min_opp_score: env_parse("SENTINEL_MIN_OPP_SCORE", 0.3),
            max_opportunity_target: std::env::var("SENTINEL_MAX_OPPORTUNITY_TARGET")
                .ok()
                .and_then(|v| v.parse().ok()),
            core_target: env_parse("SENTINEL_CORE_TARGET", 0.80),
            opportunity_target: env_parse("SENTINEL_OPPORTUNITY_TARGET", 0.20),
            max_funding_sells_per_cycle: env_parse("SENTINEL_MAX_FUNDING_SELLS_PER_CYCLE", 2),
            max_funding_turnover_pct: env_parse("SENTINEL_MAX_FUNDING_TURNOVER_PCT", 0.05),
            balance_buffer_eur: env_parse("SENTINEL_BALANCE_BUFFER_EUR", 10.0),
            base_trade_amount_eur: env_parse("SENTINEL_BASE_TRADE_AMOUNT_EUR", 500.0),
            min_trade_value: env_parse("SENTINEL_MIN_TRADE_VALUE_EUR", 100.0),
            snapshot_retention_days: env_parse("SENTINEL_SNAPSHOT_RETENTION_DAYS", 90),
            daily_price_retention_days: env_parse("SENTINEL_DAILY_PRICE_RETENTION_DAYS", 365),
            backup_retention_count: env_parse("SENTINEL_BACKUP_RETENTION_COUNT", 14),
            event_driven_rebalancing_enabled: env_parse(
                "SENTINEL_EVENT_DRIVEN_REBALANCING_ENABLED",
                true,
            ),
            correlation_threshold: env_parse("SENTINEL_CORRELATION_THRESHOLD", 0.7),
            pnl_warning_pct: env_parse("SENTINEL_PNL_WARNING_PCT", -0.03),
            pnl_halt_pct: env_parse("SENTINEL_PNL_HALT_PCT", -0.05),
            trade_cooldown_minutes: env_parse("SENTINEL_TRADE_COOLDOWN_MINUTES", 5),
            min_trade_size_eur: env_parse("SENTINEL_MIN_TRADE_SIZE_EUR", 100.0),
            recent_sell_order_window_minutes: env_parse("SENTINEL_RECENT_SELL_WINDOW_MINUTES", 15),
        }
    }

    pub fn rebalance_params(&self) -> RebalanceParams {
        RebalanceParams {
            base_trade_amount_eur: self.base_trade_amount_eur,
            transaction_cost_fixed: self.transaction_cost_fixed,
            transaction_cost_percent: self.transaction_cost_percent,
            min_trade_value: self.min_trade_value,
            core_floor_pct: self.core_floor_pct,
            max_funding_sells_per_cycle: self.max_funding_sells_per_cycle,
            max_funding_turnover_pct: self.max_funding_turnover_pct,
            balance_buffer_eur: self.balance_buffer_eur,
            standard_max_pct: self.lot_standard_max_pct,
            coarse_max_pct: self.lot_coarse_max_pct,
        }
    }

    pub fn state_machine_params(&self) -> StateMachineParams {
        StateMachineParams::default()
    }

    pub fn target_builder_params(&self) -> TargetBuilderParams {
        TargetBuilderParams {
            core_target: self.core_target,
            opportunity_target: self.opportunity_target,
            min_opp_score: self.min_opp_score,
            max_opportunity_target: self.max_opportunity_target,
        }
    }
}

/// One entry in a declarative module table: whether it's wired up, and its
/// parameter overrides merged over the module's own `default_params`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleEntry {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub params: HashMap<String, toml::Value>,
}

fn default_true() -> bool {
    true
}

/// The declarative enable/disable + per-module params table described in
/// §4.7, loaded from a `strategy.toml`-shaped file. Switching between
/// conservative/balanced/aggressive profiles means loading a different one
/// of these, not changing the framework.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyRegistryConfig {
    #[serde(default)]
    pub opportunities: HashMap<String, ModuleEntry>,
    #[serde(default)]
    pub patterns: HashMap<String, ModuleEntry>,
    #[serde(default)]
    pub sequence_generators: HashMap<String, ModuleEntry>,
    #[serde(default)]
    pub filters: HashMap<String, ModuleEntry>,
}

impl StrategyRegistryConfig {
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// The "balanced" profile: every module enabled at its own defaults.
    pub fn balanced_default() -> Self {
        let all_on = |names: &[&str]| {
            names
                .iter()
                .map(|n| (n.to_string(), ModuleEntry { enabled: true, params: HashMap::new() }))
                .collect()
        };
        Self {
            opportunities: all_on(&[
                "profit_taking",
                "averaging_down",
                "opportunity_buys",
                "rebalance_buys",
                "rebalance_sells",
            ]),
            patterns: all_on(&["direct_buy", "single_best", "profit_taking"]),
            sequence_generators: all_on(&["combinatorial"]),
            filters: all_on(&["correlation_aware"]),
        }
    }

    fn enabled_names(entries: &HashMap<String, ModuleEntry>) -> Vec<String> {
        let mut names: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.enabled)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn enabled_opportunities(&self) -> Vec<String> {
        Self::enabled_names(&self.opportunities)
    }

    pub fn enabled_patterns(&self) -> Vec<String> {
        Self::enabled_names(&self.patterns)
    }

    pub fn enabled_sequence_generators(&self) -> Vec<String> {
        Self::enabled_names(&self.sequence_generators)
    }

    pub fn enabled_filters(&self) -> Vec<String> {
        Self::enabled_names(&self.filters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_default_enables_every_core_module() {
        let config = StrategyRegistryConfig::balanced_default();
        assert!(config.enabled_opportunities().contains(&"profit_taking".to_string()));
        assert!(config.enabled_filters().contains(&"correlation_aware".to_string()));
    }

    #[test]
    fn disabled_module_is_excluded() {
        let mut config = StrategyRegistryConfig::balanced_default();
        config
            .opportunities
            .get_mut("profit_taking")
            .unwrap()
            .enabled = false;
        assert!(!config.enabled_opportunities().contains(&"profit_taking".to_string()));
    }

    #[test]
    fn parses_toml_profile() {
        let raw = r#"
            [opportunities.opportunity_buys]
            enabled = true
            [opportunities.opportunity_buys.params]
            min_score = 0.8

            [filters.correlation_aware]
            enabled = false
        "#;
        let config = StrategyRegistryConfig::from_toml_str(raw).unwrap();
        assert!(config.enabled_opportunities().contains(&"opportunity_buys".to_string()));
        assert!(!config.enabled_filters().contains(&"correlation_aware".to_string()));
    }
}
