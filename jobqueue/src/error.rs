//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("A cleanup run is already in progress")]
    CleanupInProgress,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Whether this error came from the storage layer (I/O, SQL, schema).
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::DatabaseSqlx(_) | Self::Migration(_) | Self::Database(_) | Self::Io(_)
        )
    }

    /// Whether this error is a rejected caller request rather than a fault.
    pub fn is_operation(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::InvalidStateTransition { .. }
                | Self::Validation(_)
                | Self::CleanupInProgress
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::Database("disk full".into()).is_storage());
        assert!(!Error::Database("disk full".into()).is_operation());

        assert!(Error::not_found("Job", "42").is_operation());
        assert!(Error::invalid_transition("waiting", "completed").is_operation());
        assert!(Error::CleanupInProgress.is_operation());

        let config = Error::config("poll interval must be positive");
        assert!(!config.is_storage());
        assert!(!config.is_operation());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            Error::not_found("Job", "7").to_string(),
            "Entity not found: Job with id 7"
        );
        assert_eq!(
            Error::invalid_transition("failed", "processing").to_string(),
            "Invalid state transition: cannot transition from failed to processing"
        );
    }
}
