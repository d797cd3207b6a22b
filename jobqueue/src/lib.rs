//! jobqueue library crate.
//!
//! A durable job queue on SQLite: producers enqueue jobs into named queues,
//! workers claim and run them with bounded retries, orphaned jobs are recovered
//! at startup and terminal jobs are purged after a retention window.

pub mod admin;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod queue;
pub mod services;

pub use database::models::{JobCounts, JobStatus};
pub use error::{Error, Result};
pub use queue::{
    CleanupConfig, CleanupService, CompletionPolicy, HandlerRegistry, Job, JobHandler, JobStore,
    RecoveryManager, Worker, WorkerConfig, handler_fn,
};
