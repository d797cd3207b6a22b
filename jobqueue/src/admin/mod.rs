//! Administrative surface.
//!
//! Thin pass-throughs to [`JobStore`] and [`CleanupService`] for the HTTP layer.
//! Every operation returns an [`AdminResponse`]; failures never escape as errors.

pub mod models;

pub use models::{AdminResponse, DeletedJob, OldJobsResponse, QueueSummary};

use chrono::Utc;
use tracing::{debug, info};

use crate::database::models::JobStatus;
use crate::queue::{
    CleanupService, CleanupStats, CleanupStatus, Job, JobStore, QueueCleanupCandidates,
};
use crate::{Error, Result};

/// Default number of jobs returned by listings.
pub const DEFAULT_LIST_LIMIT: u32 = 50;
/// Upper bound on any listing.
pub const MAX_LIST_LIMIT: u32 = 1000;

fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

fn parse_status(status: &str) -> Result<JobStatus> {
    status
        .parse::<JobStatus>()
        .map_err(|_| Error::validation(format!("unknown job status '{}'", status)))
}

/// Admin operations over the job store and cleanup service.
#[derive(Clone)]
pub struct AdminService {
    store: JobStore,
    cleanup: CleanupService,
}

impl AdminService {
    pub fn new(store: JobStore, cleanup: CleanupService) -> Self {
        Self { store, cleanup }
    }

    /// Every queue with its per-status counts.
    pub async fn list_queues(&self) -> AdminResponse<Vec<QueueSummary>> {
        self.queue_summaries().await.into()
    }

    async fn queue_summaries(&self) -> Result<Vec<QueueSummary>> {
        let mut summaries = Vec::new();
        for name in self.store.list_queue_names().await? {
            let counts = self.store.counts_by_status(&name).await?;
            summaries.push(QueueSummary {
                total: counts.total(),
                name,
                counts,
            });
        }
        Ok(summaries)
    }

    /// Jobs of a queue, newest first, optionally filtered by status name.
    pub async fn list_jobs(
        &self,
        queue_name: &str,
        status: Option<&str>,
        limit: Option<u32>,
    ) -> AdminResponse<Vec<Job>> {
        self.jobs(queue_name, status, limit).await.into()
    }

    async fn jobs(
        &self,
        queue_name: &str,
        status: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<Job>> {
        let status = status.map(parse_status).transpose()?;
        self.ensure_queue(queue_name).await?;
        self.store
            .list_by_status(queue_name, status, clamp_limit(limit))
            .await
    }

    /// Put a terminal job back in `waiting` with attempts reset to 0.
    pub async fn retry_job(&self, id: i64) -> AdminResponse<Job> {
        let result = self.store.retry(id).await;
        if result.is_ok() {
            info!(job_id = id, "Job retried by operator");
        }
        result.into()
    }

    pub async fn delete_job(&self, id: i64) -> AdminResponse<DeletedJob> {
        let result = self.store.delete(id).await.map(|()| DeletedJob { id });
        if result.is_ok() {
            info!(job_id = id, "Job deleted by operator");
        }
        result.into()
    }

    pub fn cleanup_status(&self) -> AdminResponse<CleanupStatus> {
        AdminResponse::ok(self.cleanup.status())
    }

    /// Run a cleanup now; `dry_run` overrides the configured flag.
    pub async fn trigger_cleanup(&self, dry_run: Option<bool>) -> AdminResponse<CleanupStats> {
        self.cleanup.manual_cleanup(dry_run).await.into()
    }

    pub async fn cleanup_candidates(&self) -> AdminResponse<Vec<QueueCleanupCandidates>> {
        self.cleanup.candidates().await.into()
    }

    /// Jobs of `status` in `queue_name` created more than `hours` ago.
    pub async fn old_jobs(
        &self,
        queue_name: &str,
        status: &str,
        hours: u64,
        limit: Option<u32>,
    ) -> AdminResponse<OldJobsResponse> {
        self.old_jobs_inner(queue_name, status, hours, limit)
            .await
            .into()
    }

    async fn old_jobs_inner(
        &self,
        queue_name: &str,
        status: &str,
        hours: u64,
        limit: Option<u32>,
    ) -> Result<OldJobsResponse> {
        let status = parse_status(status)?;
        self.ensure_queue(queue_name).await?;
        let jobs = self
            .cleanup
            .old_jobs(queue_name, status, hours, clamp_limit(limit))
            .await?;
        debug!(queue = queue_name, "Found {} {} job(s) older than {}h", jobs.len(), status, hours);

        Ok(OldJobsResponse {
            queue: queue_name.to_string(),
            status,
            hours,
            count: jobs.len(),
            jobs,
            generated_at: Utc::now(),
        })
    }

    async fn ensure_queue(&self, queue_name: &str) -> Result<()> {
        let queues = self.store.list_queue_names().await?;
        if queues.iter().any(|q| q == queue_name) {
            Ok(())
        } else {
            Err(Error::not_found("Queue", queue_name))
        }
    }
}
