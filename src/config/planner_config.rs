//! Planner batch sizing and self-trigger knobs.

use super::env_parse;
use crate::domain::planner::PlannerBatchSizes;
use crate::domain::scoring::RiskProfile;

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub batch_size: u32,
    pub batch_size_api: u32,
    pub max_plan_depth: u32,
    pub risk_profile: RiskProfile,
    pub self_trigger_url: Option<String>,
    pub self_trigger_timeout_secs: u64,
}

impl PlannerConfig {
    pub fn from_env() -> Self {
        let profile = match std::env::var("SENTINEL_RISK_PROFILE")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "conservative" => RiskProfile::Conservative,
            "aggressive" => RiskProfile::Aggressive,
            _ => RiskProfile::Balanced,
        };

        Self {
            batch_size: env_parse("SENTINEL_PLANNER_BATCH_SIZE", 50),
            batch_size_api: env_parse("SENTINEL_PLANNER_BATCH_SIZE_API", 20),
            max_plan_depth: env_parse("SENTINEL_MAX_PLAN_DEPTH", 5),
            risk_profile: profile,
            self_trigger_url: std::env::var("SENTINEL_PLANNER_SELF_TRIGGER_URL").ok(),
            self_trigger_timeout_secs: env_parse("SENTINEL_PLANNER_SELF_TRIGGER_TIMEOUT_SECS", 30),
        }
    }

    pub fn batch_sizes(&self) -> PlannerBatchSizes {
        PlannerBatchSizes {
            scheduled: self.batch_size,
            api_driven: self.batch_size_api,
        }
    }
}
