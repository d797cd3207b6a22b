//! Admin response models.
//!
//! These are the shapes handed to the HTTP layer, which serializes them as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;
use crate::database::models::{JobCounts, JobStatus};
use crate::queue::Job;

/// Envelope for every admin operation.
///
/// ```json
/// { "success": true, "data": { ... } }
/// { "success": false, "error": "Entity not found: Job with id 7", "code": "NOT_FOUND" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error code for programmatic handling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl<T> AdminResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn err(error: &Error) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            code: Some(error_code(error).to_string()),
        }
    }

    pub fn into_result(self) -> std::result::Result<T, String> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            _ => Err(self.error.unwrap_or_default()),
        }
    }
}

impl<T> From<crate::Result<T>> for AdminResponse<T> {
    fn from(result: crate::Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::err(&e),
        }
    }
}

fn error_code(error: &Error) -> &'static str {
    match error {
        Error::NotFound { .. } => "NOT_FOUND",
        Error::InvalidStateTransition { .. } => "INVALID_STATE",
        Error::Validation(_) => "VALIDATION_ERROR",
        Error::CleanupInProgress => "CONFLICT",
        Error::Configuration(_) => "CONFIGURATION_ERROR",
        e if e.is_storage() => "STORAGE_ERROR",
        _ => "INTERNAL_ERROR",
    }
}

/// A queue with its per-status counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSummary {
    pub name: String,
    pub counts: JobCounts,
    pub total: u64,
}

/// Result of deleting a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedJob {
    pub id: i64,
}

/// Jobs older than a number of hours.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OldJobsResponse {
    pub queue: String,
    pub status: JobStatus,
    pub hours: u64,
    pub count: usize,
    pub jobs: Vec<Job>,
    pub generated_at: DateTime<Utc>,
}
