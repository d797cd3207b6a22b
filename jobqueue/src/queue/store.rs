//! Durable, queue-scoped job storage.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info};

use super::job::{Job, jobs_from_models};
use crate::database::models::{JobCounts, JobDbModel, JobStatus};
use crate::database::repositories::{JobRepository, SqlxJobRepository};
use crate::database::time::{datetime_to_ms, now_ms};
use crate::database::{self, DbPool};
use crate::{Error, Result};

/// Pause between purge batches so a large purge does not monopolise the write lock.
const PURGE_BATCH_PAUSE: Duration = Duration::from_millis(10);

/// The job store.
///
/// Owns every job record. Workers, recovery, cleanup and the admin surface all go
/// through it; nothing else keeps state about a job. Cloning is cheap and clones
/// share the repository and the enqueue notifier.
#[derive(Clone)]
pub struct JobStore {
    repository: Arc<dyn JobRepository>,
    /// Pool behind the repository, when the store owns one (needed for `close`).
    pool: Option<DbPool>,
    /// Wakes workers when new work becomes claimable.
    notify: Arc<Notify>,
}

impl JobStore {
    /// Create a store over an arbitrary repository.
    pub fn new(repository: Arc<dyn JobRepository>) -> Self {
        Self {
            repository,
            pool: None,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Create a store over an open pool with the schema already migrated.
    pub fn from_pool(pool: DbPool) -> Self {
        Self {
            repository: Arc::new(SqlxJobRepository::new(pool.clone())),
            pool: Some(pool),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Open (and migrate) the database at `database_url`.
    pub async fn open(database_url: &str) -> Result<Self> {
        let pool = database::open(database_url).await?;
        Ok(Self::from_pool(pool))
    }

    /// Notifier signalled on enqueue and operator retry.
    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Enqueue a new job with an opaque payload.
    pub async fn enqueue(
        &self,
        queue_name: &str,
        name: &str,
        payload: impl Into<String>,
    ) -> Result<Job> {
        if queue_name.is_empty() {
            return Err(Error::validation("queue name must not be empty"));
        }
        if name.is_empty() {
            return Err(Error::validation("job name must not be empty"));
        }

        let model = JobDbModel::new(queue_name, name, payload);
        let job = Job::try_from(self.repository.create_job(&model).await?)?;

        info!(job_id = job.id, queue = queue_name, "Enqueued job {}", name);
        self.notify.notify_waiters();
        Ok(job)
    }

    /// Enqueue a job whose payload is `payload` serialized as JSON.
    pub async fn enqueue_json<T: Serialize + ?Sized>(
        &self,
        queue_name: &str,
        name: &str,
        payload: &T,
    ) -> Result<Job> {
        let data = serde_json::to_string(payload)?;
        self.enqueue(queue_name, name, data).await
    }

    pub async fn get(&self, id: i64) -> Result<Option<Job>> {
        self.repository
            .get_job(id)
            .await?
            .map(Job::try_from)
            .transpose()
    }

    /// Claim up to `limit` waiting jobs of `queue_name`, oldest first.
    ///
    /// The returned jobs are already `processing`: selection and status change
    /// are one atomic statement, so concurrent workers never share a job.
    pub async fn claim_waiting(&self, queue_name: &str, limit: u32) -> Result<Vec<Job>> {
        let rows = self
            .repository
            .claim_waiting_jobs(queue_name, limit, now_ms())
            .await?;
        if !rows.is_empty() {
            debug!(queue = queue_name, "Claimed {} job(s)", rows.len());
        }
        jobs_from_models(rows)
    }

    /// Move a job along the state machine, optionally updating its attempt count.
    ///
    /// Only the edges `waiting -> processing` and `processing -> {waiting, completed,
    /// failed}` are accepted.
    pub async fn set_status(&self, id: i64, status: JobStatus, attempts: Option<u32>) -> Result<()> {
        let updated = self
            .repository
            .update_job_status(id, status.predecessors(), status, attempts.map(i64::from))
            .await?;
        if !updated {
            return Err(self.transition_error(id, status).await);
        }
        Ok(())
    }

    /// Mark a processing job as completed (retained until cleanup).
    pub async fn complete(&self, id: i64) -> Result<()> {
        self.set_status(id, JobStatus::Completed, None).await
    }

    /// Mark a processing job as terminally failed.
    pub async fn fail(&self, id: i64, attempts: u32, error: &str) -> Result<()> {
        if !self
            .repository
            .fail_job(id, i64::from(attempts), error)
            .await?
        {
            return Err(self.transition_error(id, JobStatus::Failed).await);
        }
        Ok(())
    }

    /// Return a processing job to `waiting`; it becomes claimable at `available_at`.
    pub async fn requeue(
        &self,
        id: i64,
        attempts: u32,
        error: &str,
        available_at: DateTime<Utc>,
    ) -> Result<()> {
        let updated = self
            .repository
            .requeue_job(id, i64::from(attempts), error, datetime_to_ms(available_at))
            .await?;
        if !updated {
            return Err(self.transition_error(id, JobStatus::Waiting).await);
        }
        Ok(())
    }

    /// Operator retry: a terminal job goes back to `waiting` with attempts reset to 0.
    pub async fn retry(&self, id: i64) -> Result<Job> {
        if !self.repository.reset_job_for_retry(id).await? {
            return Err(self.transition_error(id, JobStatus::Waiting).await);
        }

        let job = self
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found("Job", id.to_string()))?;
        info!(job_id = id, queue = %job.queue_name, "Job reset for retry");
        self.notify.notify_waiters();
        Ok(job)
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        if !self.repository.delete_job(id).await? {
            return Err(Error::not_found("Job", id.to_string()));
        }
        debug!(job_id = id, "Deleted job");
        Ok(())
    }

    /// Delete every listed job; unknown ids are ignored. Returns the number deleted.
    pub async fn delete_batch(&self, ids: &[i64]) -> Result<u64> {
        self.repository.delete_jobs(ids).await
    }

    /// Jobs of a queue, newest first, optionally filtered by status.
    pub async fn list_by_status(
        &self,
        queue_name: &str,
        status: Option<JobStatus>,
        limit: u32,
    ) -> Result<Vec<Job>> {
        jobs_from_models(self.repository.list_jobs(queue_name, status, limit).await?)
    }

    pub async fn counts_by_status(&self, queue_name: &str) -> Result<JobCounts> {
        self.repository.get_job_counts_by_status(queue_name).await
    }

    /// Every queue name that currently has at least one row.
    pub async fn list_queue_names(&self) -> Result<Vec<String>> {
        self.repository.list_queue_names().await
    }

    pub async fn count_waiting(&self, queue_name: &str) -> Result<u64> {
        self.repository.count_waiting_jobs(queue_name).await
    }

    /// Number of `status` rows created strictly before `cutoff`.
    pub async fn count_older_than(
        &self,
        queue_name: &str,
        status: JobStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        self.repository
            .count_jobs_older_than(queue_name, status, datetime_to_ms(cutoff))
            .await
    }

    /// Oldest-first listing of `status` rows created strictly before `cutoff`.
    pub async fn list_older_than(
        &self,
        queue_name: &str,
        status: JobStatus,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Job>> {
        let rows = self
            .repository
            .list_jobs_older_than(queue_name, status, datetime_to_ms(cutoff), limit)
            .await?;
        jobs_from_models(rows)
    }

    /// Delete `status` rows created before `cutoff`, `batch_size` rows at a time,
    /// until none remain. With `dry_run` nothing is deleted and the matching
    /// rows are only counted.
    pub async fn purge_older_than(
        &self,
        queue_name: &str,
        status: JobStatus,
        cutoff: DateTime<Utc>,
        batch_size: u32,
        dry_run: bool,
    ) -> Result<u64> {
        if batch_size == 0 {
            return Err(Error::validation("purge batch size must be positive"));
        }

        let cutoff_ms = datetime_to_ms(cutoff);
        if dry_run {
            return self
                .repository
                .count_jobs_older_than(queue_name, status, cutoff_ms)
                .await;
        }

        let mut total: u64 = 0;
        loop {
            let deleted = self
                .repository
                .delete_jobs_older_than(queue_name, status, cutoff_ms, batch_size)
                .await?;
            total += deleted;

            if deleted < u64::from(batch_size) {
                break;
            }
            tokio::time::sleep(PURGE_BATCH_PAUSE).await;
        }

        if total > 0 {
            debug!(queue = queue_name, "Purged {} {} job(s)", total, status);
        }
        Ok(total)
    }

    /// Reset every `processing` job of the queue to `waiting`.
    pub async fn recover_orphans(&self, queue_name: &str) -> Result<u64> {
        let reset = self.repository.reset_processing_jobs(queue_name).await?;
        if reset > 0 {
            self.notify.notify_waiters();
        }
        Ok(reset)
    }

    /// Close the underlying pool, if this store owns one.
    pub async fn close(&self) {
        if let Some(pool) = &self.pool {
            pool.close().await;
            info!("Job store closed");
        }
    }

    /// Explain why a conditional update matched no row.
    async fn transition_error(&self, id: i64, to: JobStatus) -> Error {
        match self.repository.get_job(id).await {
            Ok(Some(row)) => Error::invalid_transition(row.status, to),
            Ok(None) => Error::not_found("Job", id.to_string()),
            Err(e) => e,
        }
    }
}
