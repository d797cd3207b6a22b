//! The job record handed to handlers and returned by the store.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::database::models::{JobDbModel, JobStatus};
use crate::database::time::ms_to_datetime;
use crate::{Error, Result};

/// A job in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Unique, monotonically assigned ID.
    pub id: i64,
    /// Queue this job belongs to for its whole life.
    pub queue_name: String,
    /// Job type; selects the handler.
    pub name: String,
    /// Opaque serialized payload. Only the handler for `name` interprets it.
    pub data: String,
    /// Current status.
    pub status: JobStatus,
    /// Number of failed executions.
    pub attempts: u32,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
    /// Earliest time the job may be claimed again.
    pub available_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
    /// Last failure message.
    pub error: Option<String>,
}

impl Job {
    /// Deserialize the payload as JSON.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.data)?)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl TryFrom<JobDbModel> for Job {
    type Error = Error;

    fn try_from(model: JobDbModel) -> Result<Self> {
        let status = JobStatus::parse(&model.status).ok_or_else(|| {
            Error::Database(format!(
                "job {} has unknown status '{}'",
                model.id, model.status
            ))
        })?;

        Ok(Self {
            id: model.id,
            queue_name: model.queue_name,
            name: model.name,
            data: model.data,
            status,
            attempts: u32::try_from(model.attempts).unwrap_or(0),
            created_at: ms_to_datetime(model.created_at),
            available_at: ms_to_datetime(model.available_at),
            updated_at: ms_to_datetime(model.updated_at),
            error: model.error,
        })
    }
}

/// Convert a batch of rows, failing on the first malformed one.
pub(crate) fn jobs_from_models(models: Vec<JobDbModel>) -> Result<Vec<Job>> {
    models.into_iter().map(Job::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_db_model() {
        let mut model = JobDbModel::new("webhooks", "deliver", r#"{"foo":1}"#);
        model.id = 9;
        model.attempts = 2;
        model.error = Some("timeout".into());

        let job = Job::try_from(model).unwrap();
        assert_eq!(job.id, 9);
        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.attempts, 2);
        assert_eq!(job.error.as_deref(), Some("timeout"));
        assert_eq!(job.payload::<serde_json::Value>().unwrap(), json!({"foo": 1}));
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let mut model = JobDbModel::new("q", "x", "{}");
        model.status = "paused".into();
        assert!(matches!(Job::try_from(model), Err(Error::Database(_))));
    }

    #[test]
    fn test_payload_type_mismatch() {
        let job = Job::try_from(JobDbModel::new("q", "x", "not json")).unwrap();
        assert!(matches!(
            job.payload::<serde_json::Value>(),
            Err(Error::Serialization(_))
        ));
    }
}
