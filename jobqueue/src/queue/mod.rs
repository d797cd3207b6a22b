//! Job queue services.
//!
//! - [`JobStore`]: durable, queue-scoped job storage.
//! - [`Worker`]: polls one queue and runs its handler.
//! - [`RecoveryManager`]: resets jobs orphaned by a crash.
//! - [`CleanupService`]: purges terminal jobs past their retention window.

pub mod cleanup;
pub mod handler;
pub mod job;
pub mod recovery;
pub mod store;
pub mod worker;

pub use cleanup::{
    CleanupConfig, CleanupError, CleanupService, CleanupStats, CleanupStatus,
    QueueCleanupCandidates, QueueCleanupStats,
};
pub use handler::{FnHandler, HandlerRegistry, JobHandler, handler_fn};
pub use job::Job;
pub use recovery::RecoveryManager;
pub use store::JobStore;
pub use worker::{CompletionPolicy, Worker, WorkerConfig};
