//! Cooperative, in-process job scheduler (C11).
//!
//! One named job per timer, driven by `JobSchedule` rows. Mirrors the
//! teacher's `SystemHandle`/watcher pattern in spirit (long-lived spawned
//! tasks coordinated through shared state) but the timer-per-job shape and
//! task registry are grounded in `original_source/sentinel/jobs/runner.py`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::domain::model::{JobHistoryRecord, JobSchedule, JobStatus, MarketTiming};

use super::deps::AppDeps;

pub const JOB_TIMEOUT: Duration = Duration::from_secs(15 * 60);
pub const MARKET_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const STARTUP_CATCHUP_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task dependency '{0}' is missing")]
    MissingDependency(String),
    #[error("task timed out")]
    Timeout,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// One unit of scheduled work. Implementations borrow only the collaborators
/// their own task needs out of `AppDeps`, the way `tasks.py`'s functions take
/// a narrow `(db, broker, planner)`-shaped parameter list.
#[async_trait]
pub trait SchedulableTask: Send + Sync {
    async fn run(&self, deps: &AppDeps) -> Result<(), TaskError>;
}

/// A registered job: its task implementation and the other job types it
/// depends on having already run in this scheduling cycle.
pub struct JobSpec {
    pub task: Arc<dyn SchedulableTask>,
    pub dependencies: &'static [&'static str],
}

pub type TaskRegistry = HashMap<&'static str, JobSpec>;

fn pick_interval(schedule: &JobSchedule, market_open: bool) -> u32 {
    if market_open {
        schedule
            .interval_market_open_minutes
            .unwrap_or(schedule.interval_minutes)
    } else {
        schedule.interval_minutes
    }
}

/// `2^failures` minutes when `0 < failures < 3`, else the configured
/// interval — the backoff policy from §4.11.
fn effective_interval_minutes(schedule: &JobSchedule, market_open: bool) -> u32 {
    let base = pick_interval(schedule, market_open);
    if schedule.consecutive_failures > 0 && schedule.consecutive_failures < 3 {
        2u32.saturating_pow(schedule.consecutive_failures)
    } else {
        base
    }
}

fn gate_allows(timing: MarketTiming, any_open: bool) -> bool {
    match timing {
        MarketTiming::Any => true,
        MarketTiming::DuringOpen => any_open,
        MarketTiming::AfterClose => !any_open,
        MarketTiming::AllMarketsClosed => !any_open,
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub job_type: String,
    pub status: JobStatus,
    pub duration_ms: i64,
    pub error: Option<String>,
}

struct JobRuntime {
    handle: JoinHandle<()>,
}

/// Owns one `tokio::time::interval` loop task per scheduled job, plus the
/// market-status watcher and the startup catch-up, exactly the three kinds
/// of spawned background activity named in §4.11.
pub struct SchedulerRunner {
    deps: Arc<AppDeps>,
    registry: Arc<TaskRegistry>,
    jobs: Mutex<HashMap<String, JobRuntime>>,
    current_job: RwLock<Option<String>>,
    next_run: RwLock<HashMap<String, DateTime<Utc>>>,
    watcher_handle: Mutex<Option<JoinHandle<()>>>,
    catchup_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerRunner {
    pub fn new(deps: Arc<AppDeps>, registry: TaskRegistry) -> Arc<Self> {
        Arc::new(Self {
            deps,
            registry: Arc::new(registry),
            jobs: Mutex::new(HashMap::new()),
            current_job: RwLock::new(None),
            next_run: RwLock::new(HashMap::new()),
            watcher_handle: Mutex::new(None),
            catchup_handle: Mutex::new(None),
        })
    }

    /// Load schedules, determine the active market band, spin up one
    /// interval-loop task per registered job plus the two watchers.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        let any_open = self.deps.market_oracle.any_market_open().await;
        let schedules = self.deps.job_schedules.get_all().await?;

        let mut jobs = self.jobs.lock().await;
        for schedule in schedules {
            if !schedule.enabled || !self.registry.contains_key(schedule.job_type.as_str()) {
                continue;
            }
            let interval_minutes = effective_interval_minutes(&schedule, any_open).max(1);
            let handle = self.spawn_job_loop(schedule.job_type.clone(), interval_minutes);
            jobs.insert(schedule.job_type.clone(), JobRuntime { handle });
        }
        drop(jobs);

        *self.watcher_handle.lock().await = Some(self.spawn_market_watcher());
        *self.catchup_handle.lock().await = Some(self.spawn_startup_catchup());
        Ok(())
    }

    fn spawn_job_loop(self: &Arc<Self>, job_type: String, interval_minutes: u32) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let interval = Duration::from_secs(interval_minutes as u64 * 60);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick fires immediately; skip it, the timer governs cadence
            this.set_next_run(&job_type, interval).await;
            loop {
                ticker.tick().await;
                this.execute_wrapped(&job_type, false).await;
                this.set_next_run(&job_type, interval).await;
            }
        })
    }

    async fn set_next_run(self: &Arc<Self>, job_type: &str, interval: Duration) {
        let next = Utc::now()
            + chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::zero());
        self.next_run.write().await.insert(job_type.to_string(), next);
    }

    fn spawn_market_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MARKET_CHECK_INTERVAL);
            loop {
                ticker.tick().await;
                if let Ok(statuses) = this.deps.broker.get_market_status().await {
                    this.deps.market_oracle.refresh(statuses).await;
                }
                let any_open = this.deps.market_oracle.any_market_open().await;
                if let Ok(schedules) = this.deps.job_schedules.get_all().await {
                    for schedule in schedules {
                        if schedule.interval_market_open_minutes.is_some()
                            && schedule.interval_market_open_minutes != Some(schedule.interval_minutes)
                        {
                            let interval = effective_interval_minutes(&schedule, any_open).max(1);
                            this.reschedule_locked(&schedule.job_type, interval).await;
                        }
                    }
                }
            }
        })
    }

    fn spawn_startup_catchup(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(STARTUP_CATCHUP_DELAY).await;
            let _ = this.run_now("snapshot:backfill").await;
        })
    }

    async fn reschedule_locked(self: &Arc<Self>, job_type: &str, interval_minutes: u32) {
        let mut jobs = self.jobs.lock().await;
        let new_handle = self.spawn_job_loop(job_type.to_string(), interval_minutes);
        if let Some(old) = jobs.insert(job_type.to_string(), JobRuntime { handle: new_handle }) {
            old.handle.abort();
        }
    }

    /// Resolve dependencies, check the market-timing gate (unless
    /// `skip_timing_check` is set, the way `run_now` and the startup
    /// catch-up pass `skip_timing_check=True` in the original runner), run
    /// under a 15-minute timeout, and record history — the "execution
    /// wrapper" of §4.11.
    async fn execute_wrapped(self: &Arc<Self>, job_type: &str, skip_timing_check: bool) -> RunReport {
        let spec = match self.registry.get(job_type) {
            Some(spec) => spec,
            None => {
                return RunReport {
                    job_type: job_type.to_string(),
                    status: JobStatus::Skipped,
                    duration_ms: 0,
                    error: Some("unregistered job type".into()),
                }
            }
        };

        let schedule = match self.deps.job_schedules.get(job_type).await {
            Ok(Some(schedule)) => schedule,
            _ => {
                return RunReport {
                    job_type: job_type.to_string(),
                    status: JobStatus::Skipped,
                    duration_ms: 0,
                    error: Some("no schedule row".into()),
                }
            }
        };

        let any_open = self.deps.market_oracle.any_market_open().await;
        if !skip_timing_check && !gate_allows(schedule.market_timing, any_open) {
            return self.record_skip(job_type, "market_timing gate closed").await;
        }

        for dependency in spec.dependencies {
            if !self.registry.contains_key(dependency) {
                return self
                    .record_skip(job_type, &format!("missing dependency '{dependency}'"))
                    .await;
            }
        }

        *self.current_job.write().await = Some(job_type.to_string());
        let started = std::time::Instant::now();
        let job_id = uuid::Uuid::new_v4().to_string();

        self.deps
            .event_bus
            .publish(crate::domain::events::TradingEvent::JobStarted {
                job_id: job_id.clone(),
                job_type: job_type.to_string(),
            })
            .await;

        let run_result = tokio::time::timeout(JOB_TIMEOUT, spec.task.run(&self.deps)).await;
        let duration_ms = started.elapsed().as_millis() as i64;
        *self.current_job.write().await = None;

        let (status, error) = match run_result {
            Ok(Ok(())) => (JobStatus::Completed, None),
            Ok(Err(err)) => (JobStatus::Failed, Some(err.to_string())),
            Err(_) => (JobStatus::Failed, Some("job timed out".to_string())),
        };

        match status {
            JobStatus::Completed => {
                let _ = self.deps.job_schedules.mark_run(job_type, Utc::now()).await;
                let _ = self.deps.job_schedules.clear_failures(job_type).await;
                self.deps
                    .event_bus
                    .publish(crate::domain::events::TradingEvent::JobCompleted {
                        job_id: job_id.clone(),
                        job_type: job_type.to_string(),
                        duration_ms,
                    })
                    .await;
            }
            JobStatus::Failed => {
                let consecutive_failures =
                    self.deps.job_schedules.record_failure(job_type).await.unwrap_or(0);
                warn!(job_type, error = error.as_deref(), "scheduled job failed");
                self.deps
                    .event_bus
                    .publish(crate::domain::events::TradingEvent::JobFailed {
                        job_id: job_id.clone(),
                        job_type: job_type.to_string(),
                        error: error.clone().unwrap_or_default(),
                        consecutive_failures,
                    })
                    .await;
            }
            JobStatus::Skipped => {}
        }

        let _ = self
            .deps
            .job_history
            .record(JobHistoryRecord {
                job_id,
                job_type: job_type.to_string(),
                status,
                error: error.clone(),
                duration_ms,
                executed_at: Utc::now(),
                retry_count: schedule.consecutive_failures,
            })
            .await;

        RunReport { job_type: job_type.to_string(), status, duration_ms, error }
    }

    async fn record_skip(self: &Arc<Self>, job_type: &str, reason: &str) -> RunReport {
        info!(job_type, reason, "job skipped");
        self.deps
            .event_bus
            .publish(crate::domain::events::TradingEvent::JobSkipped {
                job_type: job_type.to_string(),
                reason: reason.to_string(),
            })
            .await;
        let _ = self
            .deps
            .job_history
            .record(JobHistoryRecord {
                job_id: uuid::Uuid::new_v4().to_string(),
                job_type: job_type.to_string(),
                status: JobStatus::Skipped,
                error: Some(reason.to_string()),
                duration_ms: 0,
                executed_at: Utc::now(),
                retry_count: 0,
            })
            .await;
        RunReport {
            job_type: job_type.to_string(),
            status: JobStatus::Skipped,
            duration_ms: 0,
            error: Some(reason.to_string()),
        }
    }

    /// Ignore the timing gate, run once, report the outcome.
    pub async fn run_now(self: &Arc<Self>, job_type: &str) -> RunReport {
        if !self.registry.contains_key(job_type) {
            return RunReport {
                job_type: job_type.to_string(),
                status: JobStatus::Skipped,
                duration_ms: 0,
                error: Some("unregistered job type".into()),
            };
        }
        self.execute_wrapped(job_type, true).await
    }

    /// Reload the schedule row, pick the interval for the current market
    /// state, and atomically swap the job's interval-loop task.
    pub async fn reschedule(self: &Arc<Self>, job_type: &str) -> anyhow::Result<()> {
        let schedule = self
            .deps
            .job_schedules
            .get(job_type)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no schedule for '{job_type}'"))?;
        let any_open = self.deps.market_oracle.any_market_open().await;
        let interval = effective_interval_minutes(&schedule, any_open).max(1);
        self.reschedule_locked(job_type, interval).await;
        Ok(())
    }

    pub async fn status(&self) -> SchedulerStatus {
        let current = self.current_job.read().await.clone();
        let recent = self
            .deps
            .job_history
            .recent_by_type(3)
            .await
            .unwrap_or_default();

        let mut upcoming: Vec<UpcomingJob> = self
            .next_run
            .read()
            .await
            .iter()
            .map(|(job_type, next_run)| UpcomingJob { job_type: job_type.clone(), next_run: *next_run })
            .collect();
        upcoming.sort_by_key(|job| job.next_run);
        upcoming.truncate(3);

        SchedulerStatus { current, recent, upcoming }
    }

    /// Cancel every background watcher and per-job loop; swallow the
    /// cancellation the way `CancelledError` is swallowed in the original.
    pub async fn stop(&self) {
        if let Some(handle) = self.watcher_handle.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.catchup_handle.lock().await.take() {
            handle.abort();
        }
        let mut jobs = self.jobs.lock().await;
        for (_, runtime) in jobs.drain() {
            runtime.handle.abort();
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpcomingJob {
    pub job_type: String,
    pub next_run: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SchedulerStatus {
    pub current: Option<String>,
    pub recent: Vec<JobHistoryRecord>,
    pub upcoming: Vec<UpcomingJob>,
}
