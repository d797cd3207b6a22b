//! Retention cleanup for terminal jobs.
//!
//! The service runs on its own schedule, independently of workers, and only ever
//! deletes `completed` and `failed` rows older than their retention window. A run
//! walks every queue present in storage; a failure in one queue is recorded and
//! the remaining queues are still cleaned.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::job::Job;
use super::store::JobStore;
use crate::database::models::JobStatus;
use crate::database::time::{datetime_to_ms, hours_before, ms_to_datetime};
use crate::{Error, Result};

/// Configuration for retention cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Minutes between scheduled runs.
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    /// Completed jobs older than this are purged. 0 purges all of them.
    #[serde(default = "default_retention_completed_hours")]
    pub retention_completed_hours: u64,

    /// Failed jobs older than this are purged. 0 purges all of them.
    #[serde(default = "default_retention_failed_hours")]
    pub retention_failed_hours: u64,

    /// Rows deleted per statement.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Count eligible rows instead of deleting them.
    #[serde(default)]
    pub dry_run: bool,

    /// Delay before the first scheduled run.
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
}

fn default_interval_minutes() -> u64 {
    60
}

fn default_retention_completed_hours() -> u64 {
    24
}

fn default_retention_failed_hours() -> u64 {
    168 // 7 days
}

fn default_batch_size() -> u32 {
    1000
}

fn default_initial_delay_secs() -> u64 {
    10
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            retention_completed_hours: default_retention_completed_hours(),
            retention_failed_hours: default_retention_failed_hours(),
            batch_size: default_batch_size(),
            dry_run: false,
            initial_delay_secs: default_initial_delay_secs(),
        }
    }
}

impl CleanupConfig {
    pub fn with_interval_minutes(mut self, minutes: u64) -> Self {
        self.interval_minutes = minutes;
        self
    }

    pub fn with_retention_hours(mut self, completed: u64, failed: u64) -> Self {
        self.retention_completed_hours = completed;
        self.retention_failed_hours = failed;
        self
    }

    pub fn with_batch_size(mut self, size: u32) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_initial_delay_secs(mut self, secs: u64) -> Self {
        self.initial_delay_secs = secs;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }

    /// Retention window for a terminal status.
    pub fn retention_hours(&self, status: JobStatus) -> Option<u64> {
        match status {
            JobStatus::Completed => Some(self.retention_completed_hours),
            JobStatus::Failed => Some(self.retention_failed_hours),
            JobStatus::Waiting | JobStatus::Processing => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_minutes == 0 {
            return Err(Error::config("cleanup interval must be positive"));
        }
        if self.batch_size == 0 {
            return Err(Error::config("cleanup batch size must be at least 1"));
        }
        Ok(())
    }
}

/// Rows cleaned in one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCleanupStats {
    pub completed: u64,
    pub failed: u64,
}

impl QueueCleanupStats {
    pub fn total(&self) -> u64 {
        self.completed + self.failed
    }
}

/// A failure while cleaning one queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupError {
    pub queue: String,
    pub error: String,
}

/// Result of one cleanup run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupStats {
    /// Rows deleted (or, in a dry run, eligible).
    pub total_cleaned: u64,
    pub completed_cleaned: u64,
    pub failed_cleaned: u64,
    pub by_queue: BTreeMap<String, QueueCleanupStats>,
    /// Queues where at least one row was cleaned.
    pub queues: Vec<String>,
    pub errors: Vec<CleanupError>,
    pub duration_ms: u64,
    /// When the run started.
    pub timestamp: DateTime<Utc>,
    pub dry_run: bool,
}

impl CleanupStats {
    fn new(timestamp: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            total_cleaned: 0,
            completed_cleaned: 0,
            failed_cleaned: 0,
            by_queue: BTreeMap::new(),
            queues: Vec::new(),
            errors: Vec::new(),
            duration_ms: 0,
            timestamp,
            dry_run,
        }
    }

    fn record(&mut self, queue: &str, status: JobStatus, count: u64) {
        let entry = self.by_queue.entry(queue.to_string()).or_default();
        match status {
            JobStatus::Completed => {
                entry.completed += count;
                self.completed_cleaned += count;
            }
            JobStatus::Failed => {
                entry.failed += count;
                self.failed_cleaned += count;
            }
            JobStatus::Waiting | JobStatus::Processing => return,
        }
        self.total_cleaned += count;
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Snapshot reported to the admin surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupStatus {
    pub running: bool,
    pub scheduled: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_stats: Option<CleanupStats>,
    pub config: CleanupConfig,
}

/// Per-queue view of what a cleanup run would remove right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCleanupCandidates {
    pub queue: String,
    pub completed_total: u64,
    pub failed_total: u64,
    pub completed_eligible: u64,
    pub failed_eligible: u64,
    pub completed_cutoff: DateTime<Utc>,
    pub failed_cutoff: DateTime<Utc>,
}

/// Cutoff for "older than `hours`". Zero hours selects every row.
fn retention_cutoff(now: DateTime<Utc>, hours: u64) -> DateTime<Utc> {
    if hours == 0 {
        return DateTime::<Utc>::MAX_UTC;
    }
    ms_to_datetime(hours_before(datetime_to_ms(now), hours))
}

/// Clears the running flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Schedule {
    token: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner {
    store: JobStore,
    config: CleanupConfig,
    running: AtomicBool,
    last_stats: RwLock<Option<CleanupStats>>,
    next_run_at: RwLock<Option<DateTime<Utc>>>,
    schedule: Mutex<Option<Schedule>>,
}

/// Scheduled and on-demand purge of terminal jobs.
///
/// Clones share the schedule, the single-flight flag and the last run's stats.
#[derive(Clone)]
pub struct CleanupService {
    inner: Arc<Inner>,
}

impl CleanupService {
    pub fn new(store: JobStore, config: CleanupConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                config,
                running: AtomicBool::new(false),
                last_stats: RwLock::new(None),
                next_run_at: RwLock::new(None),
                schedule: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &CleanupConfig {
        &self.inner.config
    }

    /// Start the recurring schedule.
    pub fn start(&self) {
        self.start_with_token(CancellationToken::new());
    }

    /// Start the recurring schedule; it also stops when `parent` is cancelled.
    pub fn start_with_token(&self, parent: CancellationToken) {
        let mut schedule = self.inner.schedule.lock();
        if schedule.as_ref().is_some_and(|s| !s.task.is_finished()) {
            warn!("Cleanup service already started");
            return;
        }

        let token = parent.child_token();
        let service = self.clone();
        let task_token = token.clone();
        let task = tokio::spawn(async move { service.run_schedule(task_token).await });

        *schedule = Some(Schedule { token, task });
    }

    /// Cancel the schedule. A run in progress is not interrupted.
    pub fn stop(&self) {
        if let Some(schedule) = self.inner.schedule.lock().take() {
            schedule.token.cancel();
            *self.inner.next_run_at.write() = None;
            info!("Cleanup service stopped");
        }
    }

    /// Cancel the schedule and wait for an in-progress scheduled run to finish.
    pub async fn shutdown(&self) {
        let schedule = self.inner.schedule.lock().take();
        if let Some(schedule) = schedule {
            schedule.token.cancel();
            if let Err(e) = schedule.task.await {
                error!("Cleanup task ended abnormally: {}", e);
            }
            *self.inner.next_run_at.write() = None;
            info!("Cleanup service shut down");
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.inner
            .schedule
            .lock()
            .as_ref()
            .is_some_and(|s| !s.token.is_cancelled() && !s.task.is_finished())
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn next_run_at(&self) -> Option<DateTime<Utc>> {
        *self.inner.next_run_at.read()
    }

    pub fn last_stats(&self) -> Option<CleanupStats> {
        self.inner.last_stats.read().clone()
    }

    pub fn status(&self) -> CleanupStatus {
        CleanupStatus {
            running: self.is_running(),
            scheduled: self.is_scheduled(),
            next_run_at: self.next_run_at(),
            last_stats: self.last_stats(),
            config: self.inner.config.clone(),
        }
    }

    /// Run a cleanup now. `dry_run` overrides the configured flag.
    ///
    /// Fails with [`Error::CleanupInProgress`] if another run has not finished.
    pub async fn manual_cleanup(&self, dry_run: Option<bool>) -> Result<CleanupStats> {
        let dry_run = dry_run.unwrap_or(self.inner.config.dry_run);
        info!("Manual cleanup triggered (dry run: {})", dry_run);
        self.run(dry_run).await
    }

    /// Single-flight cleanup run over every queue.
    async fn run(&self, dry_run: bool) -> Result<CleanupStats> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::CleanupInProgress);
        }
        let _guard = RunGuard(&self.inner.running);

        let started = Instant::now();
        let now = Utc::now();
        let mut stats = CleanupStats::new(now, dry_run);

        let queues = self.inner.store.list_queue_names().await?;
        for queue in &queues {
            for status in [JobStatus::Completed, JobStatus::Failed] {
                let hours = self.inner.config.retention_hours(status).unwrap_or_default();
                let cutoff = retention_cutoff(now, hours);

                match self
                    .inner
                    .store
                    .purge_older_than(queue, status, cutoff, self.inner.config.batch_size, dry_run)
                    .await
                {
                    Ok(count) => stats.record(queue, status, count),
                    Err(e) => {
                        error!(queue = %queue, "Cleanup of {} jobs failed: {}", status, e);
                        stats.errors.push(CleanupError {
                            queue: queue.clone(),
                            error: format!("{}: {}", status, e),
                        });
                    }
                }
            }
        }

        stats.by_queue.retain(|_, s| s.total() > 0);
        stats.queues = stats.by_queue.keys().cloned().collect();
        stats.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if stats.total_cleaned > 0 || stats.has_errors() {
            info!(
                "Cleanup {}: {} job(s) (completed: {}, failed: {}) across {} queue(s), {} error(s) in {}ms",
                if dry_run { "found" } else { "removed" },
                stats.total_cleaned,
                stats.completed_cleaned,
                stats.failed_cleaned,
                stats.queues.len(),
                stats.errors.len(),
                stats.duration_ms
            );
        } else {
            debug!("Cleanup found nothing to remove");
        }

        *self.inner.last_stats.write() = Some(stats.clone());
        Ok(stats)
    }

    async fn run_schedule(self, token: CancellationToken) {
        let config = &self.inner.config;
        let initial_delay = Duration::from_secs(config.initial_delay_secs);
        let period = config.interval();

        let mut ticker = interval_at(tokio::time::Instant::now() + initial_delay, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.set_next_run(initial_delay);

        info!(
            "Cleanup service started (interval: {}m, retention completed: {}h, failed: {}h)",
            config.interval_minutes, config.retention_completed_hours, config.retention_failed_hours
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Cleanup schedule cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    self.set_next_run(period);
                    match self.run(config.dry_run).await {
                        Ok(_) => {}
                        Err(Error::CleanupInProgress) => {
                            warn!("Skipping scheduled cleanup: a run is already in progress");
                        }
                        Err(e) => error!("Scheduled cleanup failed: {}", e),
                    }
                }
            }
        }
    }

    fn set_next_run(&self, after: Duration) {
        let next = chrono::Duration::from_std(after)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d));
        *self.inner.next_run_at.write() = next;
    }

    /// Per-queue totals and retention-eligible counts. Deletes nothing.
    pub async fn candidates(&self) -> Result<Vec<QueueCleanupCandidates>> {
        let now = Utc::now();
        let completed_cutoff = retention_cutoff(now, self.inner.config.retention_completed_hours);
        let failed_cutoff = retention_cutoff(now, self.inner.config.retention_failed_hours);

        let store = &self.inner.store;
        let mut candidates = Vec::new();
        for queue in store.list_queue_names().await? {
            let counts = store.counts_by_status(&queue).await?;
            let completed_eligible = store
                .count_older_than(&queue, JobStatus::Completed, completed_cutoff)
                .await?;
            let failed_eligible = store
                .count_older_than(&queue, JobStatus::Failed, failed_cutoff)
                .await?;

            candidates.push(QueueCleanupCandidates {
                queue,
                completed_total: counts.completed,
                failed_total: counts.failed,
                completed_eligible,
                failed_eligible,
                completed_cutoff,
                failed_cutoff,
            });
        }
        Ok(candidates)
    }

    /// Jobs of `status` in `queue` created more than `hours` ago, oldest first.
    pub async fn old_jobs(
        &self,
        queue_name: &str,
        status: JobStatus,
        hours: u64,
        limit: u32,
    ) -> Result<Vec<Job>> {
        let cutoff = retention_cutoff(Utc::now(), hours);
        self.inner
            .store
            .list_older_than(queue_name, status, cutoff, limit)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::JobDbModel;
    use crate::database::models::JobCounts;
    use crate::database::repositories::{JobRepository, SqlxJobRepository};
    use crate::database::time::now_ms;
    use async_trait::async_trait;
    use tempfile::TempDir;

    const HOUR_MS: i64 = 3_600_000;

    async fn setup() -> (TempDir, SqlxJobRepository, JobStore) {
        let dir = TempDir::new().unwrap();
        let url = format!(
            "sqlite:{}?mode=rwc",
            dir.path().join("cleanup.db").to_string_lossy().replace('\\', "/")
        );
        let pool = crate::database::open(&url).await.unwrap();
        let repo = SqlxJobRepository::new(pool.clone());
        (dir, repo, JobStore::from_pool(pool))
    }

    async fn insert(repo: &SqlxJobRepository, queue: &str, status: JobStatus, age_hours: i64) {
        let model = JobDbModel::new(queue, "x", "{}")
            .with_status(status)
            .with_created_at(now_ms() - age_hours * HOUR_MS);
        repo.create_job(&model).await.unwrap();
    }

    /// Delegates to SQLite but refuses retention deletes for one queue.
    struct BrokenQueueRepository {
        inner: SqlxJobRepository,
        broken_queue: &'static str,
    }

    #[async_trait]
    impl JobRepository for BrokenQueueRepository {
        async fn create_job(&self, job: &JobDbModel) -> Result<JobDbModel> {
            self.inner.create_job(job).await
        }
        async fn get_job(&self, id: i64) -> Result<Option<JobDbModel>> {
            self.inner.get_job(id).await
        }
        async fn claim_waiting_jobs(
            &self,
            queue_name: &str,
            limit: u32,
            now_ms: i64,
        ) -> Result<Vec<JobDbModel>> {
            self.inner.claim_waiting_jobs(queue_name, limit, now_ms).await
        }
        async fn update_job_status(
            &self,
            id: i64,
            from: &[JobStatus],
            to: JobStatus,
            attempts: Option<i64>,
        ) -> Result<bool> {
            self.inner.update_job_status(id, from, to, attempts).await
        }
        async fn fail_job(&self, id: i64, attempts: i64, error: &str) -> Result<bool> {
            self.inner.fail_job(id, attempts, error).await
        }
        async fn requeue_job(
            &self,
            id: i64,
            attempts: i64,
            error: &str,
            available_at: i64,
        ) -> Result<bool> {
            self.inner.requeue_job(id, attempts, error, available_at).await
        }
        async fn reset_job_for_retry(&self, id: i64) -> Result<bool> {
            self.inner.reset_job_for_retry(id).await
        }
        async fn delete_job(&self, id: i64) -> Result<bool> {
            self.inner.delete_job(id).await
        }
        async fn delete_jobs(&self, ids: &[i64]) -> Result<u64> {
            self.inner.delete_jobs(ids).await
        }
        async fn list_jobs(
            &self,
            queue_name: &str,
            status: Option<JobStatus>,
            limit: u32,
        ) -> Result<Vec<JobDbModel>> {
            self.inner.list_jobs(queue_name, status, limit).await
        }
        async fn get_job_counts_by_status(&self, queue_name: &str) -> Result<JobCounts> {
            self.inner.get_job_counts_by_status(queue_name).await
        }
        async fn list_queue_names(&self) -> Result<Vec<String>> {
            self.inner.list_queue_names().await
        }
        async fn count_waiting_jobs(&self, queue_name: &str) -> Result<u64> {
            self.inner.count_waiting_jobs(queue_name).await
        }
        async fn count_jobs_older_than(
            &self,
            queue_name: &str,
            status: JobStatus,
            cutoff_ms: i64,
        ) -> Result<u64> {
            self.inner
                .count_jobs_older_than(queue_name, status, cutoff_ms)
                .await
        }
        async fn list_jobs_older_than(
            &self,
            queue_name: &str,
            status: JobStatus,
            cutoff_ms: i64,
            limit: u32,
        ) -> Result<Vec<JobDbModel>> {
            self.inner
                .list_jobs_older_than(queue_name, status, cutoff_ms, limit)
                .await
        }
        async fn delete_jobs_older_than(
            &self,
            queue_name: &str,
            status: JobStatus,
            cutoff_ms: i64,
            limit: u32,
        ) -> Result<u64> {
            if queue_name == self.broken_queue {
                return Err(Error::Database("disk I/O error".to_string()));
            }
            self.inner
                .delete_jobs_older_than(queue_name, status, cutoff_ms, limit)
                .await
        }
        async fn reset_processing_jobs(&self, queue_name: &str) -> Result<u64> {
            self.inner.reset_processing_jobs(queue_name).await
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(CleanupConfig::default().validate().is_ok());
        assert!(
            CleanupConfig::default()
                .with_interval_minutes(0)
                .validate()
                .is_err()
        );
        assert!(CleanupConfig::default().with_batch_size(0).validate().is_err());
    }

    #[test]
    fn test_retention_cutoff() {
        let now = Utc::now();
        assert_eq!(retention_cutoff(now, 0), DateTime::<Utc>::MAX_UTC);
        let cutoff = retention_cutoff(now, 24);
        assert_eq!((now - cutoff).num_hours(), 24);
    }

    #[tokio::test]
    async fn test_manual_cleanup_respects_retention() {
        let (_dir, repo, store) = setup().await;
        insert(&repo, "q", JobStatus::Completed, 48).await;
        insert(&repo, "q", JobStatus::Completed, 1).await;
        insert(&repo, "q", JobStatus::Failed, 200).await;
        insert(&repo, "q", JobStatus::Failed, 100).await;
        insert(&repo, "q", JobStatus::Waiting, 500).await;

        let service = CleanupService::new(store.clone(), CleanupConfig::default()).unwrap();
        let stats = service.manual_cleanup(None).await.unwrap();

        assert_eq!(stats.completed_cleaned, 1);
        assert_eq!(stats.failed_cleaned, 1);
        assert_eq!(stats.total_cleaned, 2);
        assert_eq!(stats.queues, vec!["q".to_string()]);
        assert!(stats.errors.is_empty());
        assert!(!stats.dry_run);
        assert_eq!(service.last_stats(), Some(stats));

        let counts = store.counts_by_status("q").await.unwrap();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.waiting, 1);
    }

    #[tokio::test]
    async fn test_dry_run_counts_without_deleting() {
        let (_dir, repo, store) = setup().await;
        insert(&repo, "q", JobStatus::Completed, 48).await;
        insert(&repo, "q", JobStatus::Failed, 200).await;

        let service = CleanupService::new(store.clone(), CleanupConfig::default()).unwrap();
        let stats = service.manual_cleanup(Some(true)).await.unwrap();
        assert!(stats.dry_run);
        assert_eq!(stats.total_cleaned, 2);
        assert_eq!(store.counts_by_status("q").await.unwrap().total(), 2);
    }

    #[tokio::test]
    async fn test_zero_retention_purges_everything() {
        let (_dir, repo, store) = setup().await;
        insert(&repo, "q", JobStatus::Completed, 0).await;
        insert(&repo, "q", JobStatus::Failed, 0).await;

        let config = CleanupConfig::default().with_retention_hours(0, 0);
        let service = CleanupService::new(store.clone(), config).unwrap();
        assert_eq!(service.manual_cleanup(None).await.unwrap().total_cleaned, 2);
        assert_eq!(store.counts_by_status("q").await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_run_is_rejected() {
        let (_dir, _repo, store) = setup().await;
        let service = CleanupService::new(store, CleanupConfig::default()).unwrap();

        service.inner.running.store(true, Ordering::Release);
        assert!(matches!(
            service.manual_cleanup(None).await,
            Err(Error::CleanupInProgress)
        ));
        service.inner.running.store(false, Ordering::Release);
        assert!(service.manual_cleanup(None).await.is_ok());
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn test_candidates_and_old_jobs() {
        let (_dir, repo, store) = setup().await;
        insert(&repo, "a", JobStatus::Completed, 48).await;
        insert(&repo, "a", JobStatus::Completed, 1).await;
        insert(&repo, "b", JobStatus::Failed, 1).await;

        let service = CleanupService::new(store, CleanupConfig::default()).unwrap();
        let candidates = service.candidates().await.unwrap();
        assert_eq!(candidates.len(), 2);

        let a = &candidates[0];
        assert_eq!(a.queue, "a");
        assert_eq!(a.completed_total, 2);
        assert_eq!(a.completed_eligible, 1);

        let b = &candidates[1];
        assert_eq!(b.failed_total, 1);
        assert_eq!(b.failed_eligible, 0);

        let old = service
            .old_jobs("a", JobStatus::Completed, 24, 10)
            .await
            .unwrap();
        assert_eq!(old.len(), 1);
    }

    #[tokio::test]
    async fn test_schedule_runs_and_stops() {
        let (_dir, repo, store) = setup().await;
        insert(&repo, "q", JobStatus::Failed, 500).await;

        let config = CleanupConfig::default().with_initial_delay_secs(0);
        let service = CleanupService::new(store, config).unwrap();
        service.start();
        service.start();
        assert!(service.is_scheduled());

        tokio::time::timeout(Duration::from_secs(10), async {
            while service.last_stats().is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(service.last_stats().unwrap().failed_cleaned, 1);
        assert!(service.next_run_at().is_some());

        service.shutdown().await;
        assert!(!service.is_scheduled());
        assert!(service.next_run_at().is_none());
    }

    #[tokio::test]
    async fn test_failing_queue_does_not_abort_other_queues() {
        let (_dir, repo, _) = setup().await;
        insert(&repo, "healthy", JobStatus::Completed, 48).await;
        insert(&repo, "healthy", JobStatus::Failed, 200).await;
        insert(&repo, "broken", JobStatus::Completed, 48).await;

        let store = JobStore::new(Arc::new(BrokenQueueRepository {
            inner: repo.clone(),
            broken_queue: "broken",
        }));
        let service = CleanupService::new(store.clone(), CleanupConfig::default()).unwrap();
        let stats = service.manual_cleanup(Some(false)).await.unwrap();

        assert_eq!(stats.total_cleaned, 2);
        assert_eq!(stats.queues, vec!["healthy".to_string()]);
        assert!(stats.has_errors());
        assert!(stats.errors.iter().all(|e| e.queue == "broken"));
        assert!(stats.errors[0].error.contains("disk I/O error"));
        assert_eq!(service.last_stats(), Some(stats));

        assert_eq!(store.counts_by_status("healthy").await.unwrap().total(), 0);
        assert_eq!(store.counts_by_status("broken").await.unwrap().completed, 1);
    }
}
