//! Job database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::now_ms;

/// Job database model.
/// One row of the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JobDbModel {
    /// Auto-assigned, monotonically increasing identifier.
    pub id: i64,
    /// Queue partition this job belongs to.
    pub queue_name: String,
    /// Job-type tag used to select a handler.
    pub name: String,
    /// Serialized payload; never interpreted by the store.
    pub data: String,
    /// Status: waiting, processing, completed, failed
    pub status: String,
    /// Number of failed executions so far.
    pub attempts: i64,
    /// Last failure message.
    pub error: Option<String>,
    /// Epoch ms when the job was enqueued.
    pub created_at: i64,
    /// Epoch ms before which the job may not be claimed.
    pub available_at: i64,
    /// Epoch ms of the last status change.
    pub updated_at: i64,
}

impl JobDbModel {
    /// Build an unsaved waiting row. `id` is assigned by the database on insert.
    pub fn new(
        queue_name: impl Into<String>,
        name: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        let now = now_ms();
        Self {
            id: 0,
            queue_name: queue_name.into(),
            name: name.into(),
            data: data.into(),
            status: JobStatus::Waiting.as_str().to_string(),
            attempts: 0,
            error: None,
            created_at: now,
            available_at: now,
            updated_at: now,
        }
    }

    /// Override the creation timestamp (used when importing or backdating rows).
    pub fn with_created_at(mut self, created_at_ms: i64) -> Self {
        self.created_at = created_at_ms;
        self
    }

    /// Override the status.
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status.as_str().to_string();
        self
    }
}

/// Job status values.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Queued and eligible to be claimed.
    Waiting,
    /// Claimed by a worker and currently executing.
    Processing,
    /// Finished successfully and retained for inspection.
    Completed,
    /// Failed after exhausting its attempts.
    Failed,
}

impl JobStatus {
    /// Stored column value.
    pub fn as_str(&self) -> &'static str {
        (*self).into()
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Statuses a job may be in immediately before entering `self` during
    /// normal execution. Operator retries of terminal jobs are handled separately.
    pub fn predecessors(&self) -> &'static [JobStatus] {
        match self {
            Self::Waiting => &[Self::Processing],
            Self::Processing => &[Self::Waiting],
            Self::Completed | Self::Failed => &[Self::Processing],
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        next.predecessors().contains(self)
    }
}

/// Per-status row counts for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl JobCounts {
    pub fn total(&self) -> u64 {
        self.waiting + self.processing + self.completed + self.failed
    }

    pub fn get(&self, status: JobStatus) -> u64 {
        match status {
            JobStatus::Waiting => self.waiting,
            JobStatus::Processing => self.processing,
            JobStatus::Completed => self.completed,
            JobStatus::Failed => self.failed,
        }
    }

    pub(crate) fn set(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Waiting => self.waiting = count,
            JobStatus::Processing => self.processing = count,
            JobStatus::Completed => self.completed = count,
            JobStatus::Failed => self.failed = count,
        }
    }
}
