//! Logging/observability knobs.

use super::env_or;

#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_filter: String,
    pub json_logs: bool,
}

impl ObservabilityConfig {
    pub fn from_env() -> Self {
        Self {
            log_filter: env_or("SENTINEL_LOG_FILTER", "info"),
            json_logs: std::env::var("SENTINEL_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}
