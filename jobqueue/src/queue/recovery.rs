//! Orphan recovery.
//!
//! A job left in `processing` when its process died can only be resolved by
//! putting it back in `waiting`. Recovery runs before any worker polls, so every
//! `processing` row it finds is necessarily abandoned.

use tracing::{error, info, warn};

use super::store::JobStore;
use crate::Result;

/// Resets orphaned jobs at startup.
#[derive(Clone)]
pub struct RecoveryManager {
    store: JobStore,
}

impl RecoveryManager {
    pub fn new(store: JobStore) -> Self {
        Self { store }
    }

    /// Recover one queue, surfacing storage failures to the caller.
    pub async fn try_recover(&self, queue_name: &str) -> Result<u64> {
        let recovered = self.store.recover_orphans(queue_name).await?;
        if recovered > 0 {
            warn!(
                queue = queue_name,
                "Recovered {} orphaned job(s) left in processing", recovered
            );
        }
        Ok(recovered)
    }

    /// Recover one queue. Failures are logged and reported as zero recovered jobs,
    /// so boot continues and the next startup tries again.
    pub async fn recover(&self, queue_name: &str) -> u64 {
        match self.try_recover(queue_name).await {
            Ok(recovered) => recovered,
            Err(e) => {
                error!(queue = queue_name, "Orphan recovery failed: {}", e);
                0
            }
        }
    }

    /// Recover every queue present in storage. Returns the total recovered.
    pub async fn recover_all(&self) -> u64 {
        let queues = match self.store.list_queue_names().await {
            Ok(queues) => queues,
            Err(e) => {
                error!("Orphan recovery could not list queues: {}", e);
                return 0;
            }
        };

        let mut total = 0;
        for queue in &queues {
            total += self.recover(queue).await;
        }

        if total > 0 {
            info!(
                "Recovery complete: {} job(s) reset across {} queue(s)",
                total,
                queues.len()
            );
        }
        total
    }
}
