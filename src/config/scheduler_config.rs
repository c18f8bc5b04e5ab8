//! Scheduler timing knobs (§4.11).

use super::env_parse;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub job_timeout: Duration,
    pub market_check_interval: Duration,
    pub startup_catchup_delay: Duration,
    pub misfire_grace: Duration,
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        Self {
            job_timeout: Duration::from_secs(env_parse("SENTINEL_JOB_TIMEOUT_SECS", 900)),
            market_check_interval: Duration::from_secs(env_parse(
                "SENTINEL_MARKET_CHECK_INTERVAL_SECS",
                300,
            )),
            startup_catchup_delay: Duration::from_secs(env_parse(
                "SENTINEL_STARTUP_CATCHUP_DELAY_SECS",
                30,
            )),
            misfire_grace: Duration::from_secs(env_parse("SENTINEL_MISFIRE_GRACE_SECS", 60)),
        }
    }
}
