//! Outbound leg of the planner's API-driven self-trigger (§6).
//!
//! `POST /api/status/jobs/planner-batch` is best-effort: a 30s-timeout call
//! whose failure silently falls back to the scheduler re-entering the
//! planner on its own cadence. The inbound HTTP surface that would receive
//! this call is explicitly out of scope (§1); only the outbound call is
//! modeled here, behind a trait seam so scheduled-mode callers can collapse
//! it into a direct in-process re-entry instead, per the Open Question's
//! suggested resolution.

use std::time::Duration;

use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::Serialize;

use crate::infrastructure::http_client_factory::HttpClientFactory;

#[derive(Debug, Serialize)]
struct PlannerBatchRequest {
    portfolio_hash: String,
    depth: u32,
}

/// Advances the planner to its next batch, either by notifying a remote
/// service (API-driven mode) or running in-process (scheduled mode).
#[async_trait]
pub trait PlannerTrigger: Send + Sync {
    async fn trigger_next_batch(&self, portfolio_hash: &str, depth: u32);
}

/// Fires the self-trigger POST against this process's own HTTP surface.
/// Every failure (timeout, connection refused, non-2xx) is logged and
/// swallowed — this is advisory, never on the planner's critical path.
pub struct HttpPlannerTrigger {
    client: ClientWithMiddleware,
    base_url: String,
    timeout: Duration,
}

impl HttpPlannerTrigger {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            base_url: base_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl PlannerTrigger for HttpPlannerTrigger {
    async fn trigger_next_batch(&self, portfolio_hash: &str, depth: u32) {
        let url = format!("{}/api/status/jobs/planner-batch", self.base_url);
        let body = PlannerBatchRequest {
            portfolio_hash: portfolio_hash.to_string(),
            depth,
        };
        let result = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(portfolio_hash, depth, "planner self-trigger accepted");
            }
            Ok(response) => {
                tracing::warn!(
                    portfolio_hash,
                    depth,
                    status = %response.status(),
                    "planner self-trigger rejected, falling back to scheduler"
                );
            }
            Err(error) => {
                tracing::warn!(
                    portfolio_hash,
                    depth,
                    error = %error,
                    "planner self-trigger failed, falling back to scheduler"
                );
            }
        }
    }
}

/// Collapses the self-trigger into a direct call — used when the planner
/// and the scheduler share a process, so there is no need to round-trip
/// through HTTP at all.
pub struct NoopPlannerTrigger;

#[async_trait]
impl PlannerTrigger for NoopPlannerTrigger {
    async fn trigger_next_batch(&self, _portfolio_hash: &str, _depth: u32) {}
}
