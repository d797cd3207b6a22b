//! Service container for dependency injection.
//!
//! The ServiceContainer owns every long-lived service of the process and
//! manages their lifecycle: nothing in the crate is a global.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Result;
use crate::admin::AdminService;
use crate::config::AppConfig;
use crate::database::{self, DbPool};
use crate::queue::{CleanupService, JobHandler, JobStore, RecoveryManager, Worker, WorkerConfig};

/// Default shutdown timeout.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Service container holding all application services.
pub struct ServiceContainer {
    /// Database connection pool.
    pub pool: DbPool,
    /// Job store shared by every service.
    pub store: JobStore,
    /// Retention cleanup.
    pub cleanup: CleanupService,
    /// Admin surface for the HTTP layer.
    pub admin: AdminService,
    recovery: RecoveryManager,
    worker_config: WorkerConfig,
    workers: Mutex<Vec<Arc<Worker>>>,
    /// Cancellation token for graceful shutdown.
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Open the database, apply migrations and build the services.
    pub async fn new(config: &AppConfig) -> Result<Self> {
        config.validate()?;
        let pool = database::open(&config.database_url).await?;
        Self::with_pool(pool, config)
    }

    /// Build the services over an already migrated pool.
    pub fn with_pool(pool: DbPool, config: &AppConfig) -> Result<Self> {
        info!("Initializing service container");

        let store = JobStore::from_pool(pool.clone());
        let cleanup = CleanupService::new(store.clone(), config.cleanup.clone())?;
        let admin = AdminService::new(store.clone(), cleanup.clone());
        let recovery = RecoveryManager::new(store.clone());

        info!("Service container initialized");

        Ok(Self {
            pool,
            store,
            cleanup,
            admin,
            recovery,
            worker_config: config.worker.clone(),
            workers: Mutex::new(Vec::new()),
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Recover orphaned jobs in every queue, then start the cleanup schedule.
    ///
    /// Call before attaching workers.
    pub async fn start(&self) -> Result<()> {
        self.recovery.recover_all().await;
        self.cleanup
            .start_with_token(self.cancellation_token.clone());
        Ok(())
    }

    /// Attach a worker to `queue_name` with the container's worker configuration.
    pub async fn spawn_worker(
        &self,
        queue_name: &str,
        handler: impl JobHandler + 'static,
    ) -> Result<Arc<Worker>> {
        self.spawn_worker_with_config(queue_name, handler, self.worker_config.clone())
            .await
    }

    /// Attach a worker with its own configuration.
    ///
    /// Orphans are recovered once in [`ServiceContainer::start`], so
    /// `recover_on_start` is ignored here: a worker joining a served queue must
    /// not reset jobs that its siblings are running.
    pub async fn spawn_worker_with_config(
        &self,
        queue_name: &str,
        handler: impl JobHandler + 'static,
        config: WorkerConfig,
    ) -> Result<Arc<Worker>> {
        let config = config.with_recover_on_start(false);
        let worker = Arc::new(
            Worker::start_with_token(
                self.store.clone(),
                queue_name,
                handler,
                config,
                self.cancellation_token.child_token(),
            )
            .await?,
        );
        self.workers.lock().push(worker.clone());
        Ok(worker)
    }

    /// Shutdown all services gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Shutdown all services gracefully with a custom timeout.
    ///
    /// Workers get `timeout` to finish their in-flight jobs; the pool is closed
    /// either way.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        info!("Shutting down services (timeout: {:?})", timeout);

        // Signal all background tasks to stop
        self.cancellation_token.cancel();

        let workers: Vec<Arc<Worker>> = self.workers.lock().drain(..).collect();
        info!("Stopping {} worker(s)...", workers.len());
        let drained = tokio::time::timeout(timeout, async {
            for worker in &workers {
                worker.close().await;
            }
            self.cleanup.shutdown().await;
        })
        .await;

        if drained.is_err() {
            warn!("Shutdown timeout reached, forcing shutdown");
        }

        // Close database pool
        info!("Closing database pool...");
        self.store.close().await;

        info!("Services shut down");
        Ok(())
    }

    /// Get the cancellation token for external use.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Check if shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub fn stats(&self) -> ServiceStats {
        let workers = self.workers.lock();
        ServiceStats {
            worker_count: workers.len(),
            running_workers: workers.iter().filter(|w| w.is_running()).count(),
            cleanup_scheduled: self.cleanup.is_scheduled(),
            cleanup_running: self.cleanup.is_running(),
        }
    }
}

/// Service statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStats {
    /// Attached workers.
    pub worker_count: usize,
    /// Workers whose poll loop is still alive.
    pub running_workers: usize,
    pub cleanup_scheduled: bool,
    pub cleanup_running: bool,
}
