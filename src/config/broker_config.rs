//! Broker connectivity knobs.

use super::{env_or, env_parse};

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub api_base_url: String,
    pub api_key: Option<String>,
    pub connect_timeout_secs: u64,
    pub min_trade_size_eur: f64,
    pub recent_sell_window_minutes: i64,
}

impl BrokerConfig {
    pub fn from_env() -> Self {
        Self {
            api_base_url: env_or("SENTINEL_BROKER_URL", "https://broker.invalid/api"),
            api_key: std::env::var("SENTINEL_BROKER_API_KEY").ok(),
            connect_timeout_secs: env_parse("SENTINEL_BROKER_TIMEOUT_SECS", 10),
            min_trade_size_eur: env_parse("SENTINEL_MIN_TRADE_SIZE_EUR", 50.0),
            recent_sell_window_minutes: env_parse("SENTINEL_RECENT_SELL_WINDOW_MIN", 15),
        }
    }
}
