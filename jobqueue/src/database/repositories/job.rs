//! Job repository.

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::database::models::{JobCounts, JobDbModel, JobStatus};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;
use crate::Result;

/// SQLite's default host-parameter limit is 999 on older builds; stay well below it.
const DELETE_CHUNK_SIZE: usize = 500;

/// Job repository trait.
///
/// Row-level access to the `jobs` table. Every method is scoped either by row id
/// or by queue name; the store never interprets `data`.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a row and return it with its assigned id.
    async fn create_job(&self, job: &JobDbModel) -> Result<JobDbModel>;
    async fn get_job(&self, id: i64) -> Result<Option<JobDbModel>>;

    /// Atomically move up to `limit` claimable waiting rows to `processing`
    /// and return them in FIFO order.
    async fn claim_waiting_jobs(
        &self,
        queue_name: &str,
        limit: u32,
        now_ms: i64,
    ) -> Result<Vec<JobDbModel>>;

    /// Conditional status update: applies only while the row is in one of `from`.
    /// Returns whether a row was updated.
    async fn update_job_status(
        &self,
        id: i64,
        from: &[JobStatus],
        to: JobStatus,
        attempts: Option<i64>,
    ) -> Result<bool>;
    /// `processing -> failed` with the final attempt count and error.
    async fn fail_job(&self, id: i64, attempts: i64, error: &str) -> Result<bool>;
    /// `processing -> waiting`, not claimable before `available_at`.
    async fn requeue_job(
        &self,
        id: i64,
        attempts: i64,
        error: &str,
        available_at: i64,
    ) -> Result<bool>;
    /// Terminal -> waiting with attempts and error cleared.
    async fn reset_job_for_retry(&self, id: i64) -> Result<bool>;

    async fn delete_job(&self, id: i64) -> Result<bool>;
    async fn delete_jobs(&self, ids: &[i64]) -> Result<u64>;

    async fn list_jobs(
        &self,
        queue_name: &str,
        status: Option<JobStatus>,
        limit: u32,
    ) -> Result<Vec<JobDbModel>>;
    async fn get_job_counts_by_status(&self, queue_name: &str) -> Result<JobCounts>;
    async fn list_queue_names(&self) -> Result<Vec<String>>;
    async fn count_waiting_jobs(&self, queue_name: &str) -> Result<u64>;

    // Retention
    async fn count_jobs_older_than(
        &self,
        queue_name: &str,
        status: JobStatus,
        cutoff_ms: i64,
    ) -> Result<u64>;
    async fn list_jobs_older_than(
        &self,
        queue_name: &str,
        status: JobStatus,
        cutoff_ms: i64,
        limit: u32,
    ) -> Result<Vec<JobDbModel>>;
    /// Delete at most `limit` matching rows; returns the number deleted.
    async fn delete_jobs_older_than(
        &self,
        queue_name: &str,
        status: JobStatus,
        cutoff_ms: i64,
        limit: u32,
    ) -> Result<u64>;

    /// Reset every `processing` row of the queue to `waiting`.
    async fn reset_processing_jobs(&self, queue_name: &str) -> Result<u64>;
}

/// SQLx implementation of JobRepository.
#[derive(Clone)]
pub struct SqlxJobRepository {
    pool: SqlitePool,
}

impl SqlxJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl JobRepository for SqlxJobRepository {
    async fn create_job(&self, job: &JobDbModel) -> Result<JobDbModel> {
        retry_on_sqlite_busy("create_job", || async {
            let created = sqlx::query_as::<_, JobDbModel>(
                r#"
                INSERT INTO jobs
                    (queue_name, name, data, status, attempts, error, created_at, available_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING *
                "#,
            )
            .bind(&job.queue_name)
            .bind(&job.name)
            .bind(&job.data)
            .bind(&job.status)
            .bind(job.attempts)
            .bind(&job.error)
            .bind(job.created_at)
            .bind(job.available_at)
            .bind(job.updated_at)
            .fetch_one(&self.pool)
            .await?;
            Ok(created)
        })
        .await
    }

    async fn get_job(&self, id: i64) -> Result<Option<JobDbModel>> {
        let job = sqlx::query_as::<_, JobDbModel>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn claim_waiting_jobs(
        &self,
        queue_name: &str,
        limit: u32,
        now_ms: i64,
    ) -> Result<Vec<JobDbModel>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        // Single statement: selection and the status flip happen under one write
        // lock, so two claimers can never both observe the same row as waiting.
        let mut jobs = retry_on_sqlite_busy("claim_waiting_jobs", || async {
            let rows = sqlx::query_as::<_, JobDbModel>(
                r#"
                UPDATE jobs
                SET status = 'processing', updated_at = ?
                WHERE status = 'waiting'
                  AND id IN (
                    SELECT id FROM jobs
                    WHERE queue_name = ? AND status = 'waiting' AND available_at <= ?
                    ORDER BY created_at ASC, id ASC
                    LIMIT ?
                  )
                RETURNING *
                "#,
            )
            .bind(now_ms)
            .bind(queue_name)
            .bind(now_ms)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        })
        .await?;

        // RETURNING order is unspecified.
        jobs.sort_by_key(|job| (job.created_at, job.id));
        Ok(jobs)
    }

    async fn update_job_status(
        &self,
        id: i64,
        from: &[JobStatus],
        to: JobStatus,
        attempts: Option<i64>,
    ) -> Result<bool> {
        if from.is_empty() {
            return Ok(false);
        }

        retry_on_sqlite_busy("update_job_status", || async {
            let mut qb = QueryBuilder::<Sqlite>::new("UPDATE jobs SET status = ");
            qb.push_bind(to.as_str());
            qb.push(", updated_at = ");
            qb.push_bind(now_ms());
            if let Some(attempts) = attempts {
                qb.push(", attempts = ");
                qb.push_bind(attempts);
            }
            qb.push(" WHERE id = ");
            qb.push_bind(id);
            qb.push(" AND status IN (");
            let mut statuses = qb.separated(", ");
            for status in from {
                statuses.push_bind(status.as_str());
            }
            statuses.push_unseparated(")");

            let result = qb.build().execute(&self.pool).await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn fail_job(&self, id: i64, attempts: i64, error: &str) -> Result<bool> {
        retry_on_sqlite_busy("fail_job", || async {
            let result = sqlx::query(
                r#"
                UPDATE jobs SET status = 'failed', attempts = ?, error = ?, updated_at = ?
                WHERE id = ? AND status = 'processing'
                "#,
            )
            .bind(attempts)
            .bind(error)
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn requeue_job(
        &self,
        id: i64,
        attempts: i64,
        error: &str,
        available_at: i64,
    ) -> Result<bool> {
        retry_on_sqlite_busy("requeue_job", || async {
            let result = sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'waiting', attempts = ?, error = ?, available_at = ?, updated_at = ?
                WHERE id = ? AND status = 'processing'
                "#,
            )
            .bind(attempts)
            .bind(error)
            .bind(available_at)
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn reset_job_for_retry(&self, id: i64) -> Result<bool> {
        retry_on_sqlite_busy("reset_job_for_retry", || async {
            let now = now_ms();
            let result = sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'waiting', attempts = 0, error = NULL, available_at = ?, updated_at = ?
                WHERE id = ? AND status IN ('completed', 'failed')
                "#,
            )
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn delete_job(&self, id: i64) -> Result<bool> {
        retry_on_sqlite_busy("delete_job", || async {
            let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn delete_jobs(&self, ids: &[i64]) -> Result<u64> {
        let mut deleted = 0u64;
        for chunk in ids.chunks(DELETE_CHUNK_SIZE) {
            deleted += retry_on_sqlite_busy("delete_jobs", || async {
                let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM jobs WHERE id IN (");
                let mut separated = qb.separated(", ");
                for id in chunk {
                    separated.push_bind(*id);
                }
                separated.push_unseparated(")");
                let result = qb.build().execute(&self.pool).await?;
                Ok(result.rows_affected())
            })
            .await?;
        }
        Ok(deleted)
    }

    async fn list_jobs(
        &self,
        queue_name: &str,
        status: Option<JobStatus>,
        limit: u32,
    ) -> Result<Vec<JobDbModel>> {
        let jobs = match status {
            Some(status) => {
                sqlx::query_as::<_, JobDbModel>(
                    r#"
                    SELECT * FROM jobs WHERE queue_name = ? AND status = ?
                    ORDER BY created_at DESC, id DESC LIMIT ?
                    "#,
                )
                .bind(queue_name)
                .bind(status.as_str())
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, JobDbModel>(
                    r#"
                    SELECT * FROM jobs WHERE queue_name = ?
                    ORDER BY created_at DESC, id DESC LIMIT ?
                    "#,
                )
                .bind(queue_name)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(jobs)
    }

    async fn get_job_counts_by_status(&self, queue_name: &str) -> Result<JobCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM jobs WHERE queue_name = ? GROUP BY status",
        )
        .bind(queue_name)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = JobCounts::default();
        for (status, count) in rows {
            match JobStatus::parse(&status) {
                Some(status) => counts.set(status, count.max(0) as u64),
                None => tracing::warn!(queue = queue_name, "Ignoring unknown job status '{}'", status),
            }
        }
        Ok(counts)
    }

    async fn list_queue_names(&self) -> Result<Vec<String>> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT queue_name FROM jobs ORDER BY queue_name")
                .fetch_all(&self.pool)
                .await?;
        Ok(names)
    }

    async fn count_waiting_jobs(&self, queue_name: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE queue_name = ? AND status = 'waiting'",
        )
        .bind(queue_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn count_jobs_older_than(
        &self,
        queue_name: &str,
        status: JobStatus,
        cutoff_ms: i64,
    ) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE queue_name = ? AND status = ? AND created_at < ?",
        )
        .bind(queue_name)
        .bind(status.as_str())
        .bind(cutoff_ms)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn list_jobs_older_than(
        &self,
        queue_name: &str,
        status: JobStatus,
        cutoff_ms: i64,
        limit: u32,
    ) -> Result<Vec<JobDbModel>> {
        let jobs = sqlx::query_as::<_, JobDbModel>(
            r#"
            SELECT * FROM jobs
            WHERE queue_name = ? AND status = ? AND created_at < ?
            ORDER BY created_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(queue_name)
        .bind(status.as_str())
        .bind(cutoff_ms)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    async fn delete_jobs_older_than(
        &self,
        queue_name: &str,
        status: JobStatus,
        cutoff_ms: i64,
        limit: u32,
    ) -> Result<u64> {
        retry_on_sqlite_busy("delete_jobs_older_than", || async {
            let result = sqlx::query(
                r#"
                DELETE FROM jobs WHERE id IN (
                    SELECT id FROM jobs
                    WHERE queue_name = ? AND status = ? AND created_at < ?
                    ORDER BY created_at ASC, id ASC
                    LIMIT ?
                )
                "#,
            )
            .bind(queue_name)
            .bind(status.as_str())
            .bind(cutoff_ms)
            .bind(i64::from(limit))
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    async fn reset_processing_jobs(&self, queue_name: &str) -> Result<u64> {
        retry_on_sqlite_busy("reset_processing_jobs", || async {
            let result = sqlx::query(
                r#"
                UPDATE jobs SET status = 'waiting', updated_at = ?
                WHERE queue_name = ? AND status = 'processing'
                "#,
            )
            .bind(now_ms())
            .bind(queue_name)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }
}
