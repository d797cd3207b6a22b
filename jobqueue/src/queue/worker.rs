//! Queue worker.
//!
//! A worker is bound to one queue and one handler. Each poll tick it atomically
//! claims up to `batch_size` waiting jobs and runs them one after another:
//!
//! ```text
//! waiting -> processing -> deleted / completed   (handler ok)
//!                       -> waiting                (handler err, attempts < max)
//!                       -> failed                 (handler err, attempts >= max)
//! ```
//!
//! Handler errors and panics are contained per job and never stop the loop.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handler::JobHandler;
use super::job::Job;
use super::recovery::RecoveryManager;
use super::store::JobStore;
use crate::database::models::JobStatus;
use crate::{Error, Result};

/// What happens to a job after its handler succeeds.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum CompletionPolicy {
    /// Remove the row.
    #[default]
    Delete,
    /// Keep the row as `completed` until cleanup purges it.
    Retain,
}

/// Worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Delay between poll ticks.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// A failing execution that brings `attempts` to this value fails the job.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Jobs claimed per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Base delay before a failed job becomes claimable again. 0 retries on the next tick.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Upper bound for the exponential retry delay.
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    #[serde(default)]
    pub completion: CompletionPolicy,

    /// Reset orphaned `processing` jobs of the queue before polling starts.
    ///
    /// Only safe while no other worker serves the queue: recovery also resets
    /// jobs that a live worker is still running.
    #[serde(default = "default_recover_on_start")]
    pub recover_on_start: bool,
}

/// Largest accepted `max_retry_delay_ms` (7 days).
pub const MAX_RETRY_DELAY_LIMIT_MS: u64 = 7 * 24 * 60 * 60 * 1000;

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_batch_size() -> u32 {
    1
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_max_retry_delay_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_recover_on_start() -> bool {
    true
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
            batch_size: default_batch_size(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            completion: CompletionPolicy::default(),
            recover_on_start: default_recover_on_start(),
        }
    }
}

impl WorkerConfig {
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_batch_size(mut self, size: u32) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_retry_delay_ms(mut self, ms: u64) -> Self {
        self.retry_delay_ms = ms;
        self
    }

    pub fn with_max_retry_delay_ms(mut self, ms: u64) -> Self {
        self.max_retry_delay_ms = ms;
        self
    }

    pub fn with_completion(mut self, completion: CompletionPolicy) -> Self {
        self.completion = completion;
        self
    }

    pub fn with_recover_on_start(mut self, recover: bool) -> Self {
        self.recover_on_start = recover;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Delay before a job that has failed `attempts` times may run again:
    /// `retry_delay_ms * 2^(attempts - 1)`, capped at `max_retry_delay_ms`.
    pub fn retry_delay(&self, attempts: u32) -> Duration {
        if self.retry_delay_ms == 0 {
            return Duration::ZERO;
        }
        let exponent = attempts.saturating_sub(1).min(32);
        let ms = self
            .retry_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_retry_delay_ms);
        Duration::from_millis(ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::config("poll interval must be positive"));
        }
        if self.max_attempts == 0 {
            return Err(Error::config("max attempts must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(Error::config("worker batch size must be at least 1"));
        }
        if self.max_retry_delay_ms < self.retry_delay_ms {
            return Err(Error::config(
                "max retry delay must not be smaller than the retry delay",
            ));
        }
        if self.max_retry_delay_ms > MAX_RETRY_DELAY_LIMIT_MS {
            return Err(Error::config(format!(
                "max retry delay must not exceed {}ms",
                MAX_RETRY_DELAY_LIMIT_MS
            )));
        }
        Ok(())
    }
}

/// Handle to a running worker.
///
/// Polling starts in [`Worker::start`]. Dropping the handle does not stop the
/// loop; call [`Worker::stop`] or [`Worker::close`].
pub struct Worker {
    queue_name: String,
    cancellation_token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Recover orphans (when configured) and start polling `queue_name`.
    ///
    /// With `recover_on_start` set, start at most one worker per queue this
    /// way; see [`WorkerConfig::recover_on_start`].
    pub async fn start(
        store: JobStore,
        queue_name: impl Into<String>,
        handler: impl JobHandler + 'static,
        config: WorkerConfig,
    ) -> Result<Self> {
        Self::start_with_token(
            store,
            queue_name,
            handler,
            config,
            CancellationToken::new(),
        )
        .await
    }

    /// Like [`Worker::start`], but polling also stops when `token` is cancelled.
    pub async fn start_with_token(
        store: JobStore,
        queue_name: impl Into<String>,
        handler: impl JobHandler + 'static,
        config: WorkerConfig,
        token: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        let queue_name = queue_name.into();
        if queue_name.is_empty() {
            return Err(Error::config("worker queue name must not be empty"));
        }

        if config.recover_on_start {
            RecoveryManager::new(store.clone()).recover(&queue_name).await;
        }

        info!(
            queue = %queue_name,
            "Starting worker (poll: {}ms, batch: {}, max attempts: {})",
            config.poll_interval_ms, config.batch_size, config.max_attempts
        );

        let worker_loop = WorkerLoop {
            store,
            queue_name: queue_name.clone(),
            handler: Arc::new(handler),
            config,
            cancellation_token: token.clone(),
        };
        let task = tokio::spawn(worker_loop.run());

        Ok(Self {
            queue_name,
            cancellation_token: token,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
            && self
                .task
                .lock()
                .as_ref()
                .is_some_and(|task| !task.is_finished())
    }

    /// Stop polling. A job already being handled is allowed to finish.
    pub fn stop(&self) {
        if !self.cancellation_token.is_cancelled() {
            info!(queue = %self.queue_name, "Stopping worker");
            self.cancellation_token.cancel();
        }
    }

    /// Stop polling, wait for the in-flight job to resolve and release the
    /// worker's store handle.
    pub async fn close(&self) {
        self.stop();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(queue = %self.queue_name, "Worker task ended abnormally: {}", e);
            }
        }
        debug!(queue = %self.queue_name, "Worker closed");
    }
}

/// State owned by the spawned poll loop.
struct WorkerLoop {
    store: JobStore,
    queue_name: String,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
    cancellation_token: CancellationToken,
}

impl WorkerLoop {
    async fn run(self) {
        let notifier = self.store.notifier();
        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => break,
                _ = ticker.tick() => {}
                _ = notifier.notified() => {}
            }

            if let Err(e) = self.tick().await {
                error!(queue = %self.queue_name, "Poll tick failed: {}", e);
            }
        }

        info!(queue = %self.queue_name, "Worker stopped");
    }

    async fn tick(&self) -> Result<()> {
        let jobs = self
            .store
            .claim_waiting(&self.queue_name, self.config.batch_size)
            .await?;

        let mut jobs = jobs.into_iter();
        for job in jobs.by_ref() {
            self.process(job).await;
            if self.cancellation_token.is_cancelled() {
                break;
            }
        }

        // Hand back anything claimed but not started before the stop.
        for job in jobs {
            if let Err(e) = self.store.set_status(job.id, JobStatus::Waiting, None).await {
                warn!(job_id = job.id, "Failed to release claimed job: {}", e);
            }
        }
        Ok(())
    }

    async fn process(&self, job: Job) {
        debug!(job_id = job.id, queue = %self.queue_name, "Processing job {}", job.name);

        let outcome = AssertUnwindSafe(self.handler.handle(&job))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(Ok(())) => self.on_success(&job).await,
            Ok(Err(e)) => self.on_failure(&job, format!("{:#}", e)).await,
            Err(panic) => self.on_failure(&job, panic_message(panic)).await,
        };

        if let Err(e) = result {
            error!(
                job_id = job.id,
                queue = %self.queue_name,
                "Failed to record job outcome: {}", e
            );
        }
    }

    async fn on_success(&self, job: &Job) -> Result<()> {
        match self.config.completion {
            CompletionPolicy::Delete => self.store.delete(job.id).await?,
            CompletionPolicy::Retain => self.store.complete(job.id).await?,
        }
        debug!(job_id = job.id, queue = %self.queue_name, "Job {} succeeded", job.name);
        Ok(())
    }

    async fn on_failure(&self, job: &Job, message: String) -> Result<()> {
        let attempts = job.attempts.saturating_add(1);

        if attempts >= self.config.max_attempts {
            self.store.fail(job.id, attempts, &message).await?;
            error!(
                job_id = job.id,
                queue = %self.queue_name,
                "Job {} failed permanently after {} attempt(s): {}",
                job.name, attempts, message
            );
            return Ok(());
        }

        let delay = self.config.retry_delay(attempts);
        let available_at = retry_at(Utc::now(), delay);
        self.store
            .requeue(job.id, attempts, &message, available_at)
            .await?;
        warn!(
            job_id = job.id,
            queue = %self.queue_name,
            "Job {} failed (attempt {}/{}), retrying in {:?}: {}",
            job.name, attempts, self.config.max_attempts, delay, message
        );
        Ok(())
    }
}

/// `now + delay`, clamped to the latest representable instant.
fn retry_at(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", msg)
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", msg)
    } else {
        "handler panicked".to_string()
    }
}
