//! Advisory lock names and the lock-guard contract.
//!
//! The contract lives here so domain and application code can depend on
//! `AdvisoryLock` without pulling in the `fs2`-backed filesystem
//! implementation, which lives in `infrastructure::lock`.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Lock guarding the rebalance engine's read-modify-write cycle over a
/// single portfolio hash.
pub const REBALANCE: &str = "rebalance";
/// Lock guarding trade execution so only one order is in flight at a time.
pub const EVENT_BASED_TRADING: &str = "event_based_trading";
/// Lock guarding a full database backup.
pub const DB_BACKUP: &str = "db_backup";
/// Lock guarding a WAL-equivalent checkpoint.
pub const WAL_CHECKPOINT: &str = "wal_checkpoint";
/// Lock guarding the integrity-check maintenance step.
pub const INTEGRITY_CHECK: &str = "integrity_check";
/// Lock guarding daily-price retention pruning.
pub const CLEANUP_PRICES: &str = "cleanup_prices";
/// Lock guarding snapshot retention pruning.
pub const CLEANUP_SNAPSHOTS: &str = "cleanup_snapshots";
/// Lock guarding expired-cache pruning.
pub const CLEANUP_CACHES: &str = "cleanup_caches";
/// Lock guarding the score-refresh job.
pub const SCORE_REFRESH: &str = "score_refresh";

/// All well-known lock names, used by tests and startup sanity checks.
pub const WELL_KNOWN: &[&str] = &[
    REBALANCE,
    EVENT_BASED_TRADING,
    DB_BACKUP,
    WAL_CHECKPOINT,
    INTEGRITY_CHECK,
    CLEANUP_PRICES,
    CLEANUP_SNAPSHOTS,
    CLEANUP_CACHES,
    SCORE_REFRESH,
];

/// Default time an acquisition attempt will poll before giving up.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Poll interval between `try_lock` attempts.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Per-call-site acquisition timeouts.
pub const REBALANCE_TIMEOUT: Duration = Duration::from_secs(600);
pub const EXECUTION_TIMEOUT: Duration = Duration::from_secs(3600);
pub const BACKUP_TIMEOUT: Duration = Duration::from_secs(300);
pub const CHECKPOINT_TIMEOUT: Duration = Duration::from_secs(60);
pub const INTEGRITY_TIMEOUT: Duration = Duration::from_secs(600);
pub const CACHE_CLEANUP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock '{name}' timed out after {waited_ms}ms")]
    TimedOut { name: String, waited_ms: u64 },
    #[error("lock '{name}' io error: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// A held advisory lock. Releasing happens on drop of the concrete guard
/// type returned by the infrastructure implementation; this trait only
/// exposes the name for logging.
pub trait LockGuard: Send {
    fn name(&self) -> &str;
}

/// Cooperative, cross-process advisory locking keyed by name.
#[async_trait]
pub trait AdvisoryLock: Send + Sync {
    /// Poll for the named lock until acquired or `timeout` elapses.
    async fn acquire(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Box<dyn LockGuard>, LockError>;

    /// Acquire with the library default timeout.
    async fn acquire_default(&self, name: &str) -> Result<Box<dyn LockGuard>, LockError> {
        self.acquire(name, DEFAULT_TIMEOUT).await
    }
}
