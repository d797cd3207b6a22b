//! Retry helpers for write paths that can hit `SQLITE_BUSY`.
//!
//! Several workers, the recovery pass and the cleanup service all write to the
//! same database file. WAL mode lets readers proceed, but writers still
//! serialize on a single lock; transient busy/locked errors are retried here
//! before they surface as storage errors.

use rand::random;
use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::{Error, Result};

const SQLITE_BUSY_MAX_RETRIES: u32 = 12;
const SQLITE_BUSY_BASE_DELAY_MS: u64 = 10;
const SQLITE_BUSY_MAX_DELAY_MS: u64 = 2000;

/// SQLite primary result codes for `SQLITE_BUSY` and `SQLITE_LOCKED`.
const BUSY_CODES: [&str; 2] = ["5", "6"];

fn message_is_busy(msg: &str) -> bool {
    let msg = msg.to_ascii_lowercase();
    msg.contains("database is locked") || msg.contains("database is busy")
}

/// Whether a sqlx error is a transient lock conflict.
pub fn is_sqlite_busy(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db_err) = err else {
        return message_is_busy(&err.to_string());
    };

    let code = db_err.code().map(Cow::into_owned);
    if code.as_deref().is_some_and(|c| BUSY_CODES.contains(&c)) {
        return true;
    }

    message_is_busy(db_err.message())
}

fn is_retryable(err: &Error) -> bool {
    match err {
        Error::DatabaseSqlx(sqlx_err) => is_sqlite_busy(sqlx_err),
        _ => false,
    }
}

/// Exponential backoff with up to 25% jitter, capped at two seconds.
fn busy_delay(attempt: u32) -> Duration {
    let exp_ms = SQLITE_BUSY_BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(16));
    let capped_ms = exp_ms.min(SQLITE_BUSY_MAX_DELAY_MS);
    let jitter_ms = random::<u64>() % (capped_ms / 4 + 1);
    Duration::from_millis((capped_ms + jitter_ms).min(SQLITE_BUSY_MAX_DELAY_MS))
}

/// Run `op`, retrying while it fails with `SQLITE_BUSY`/`SQLITE_LOCKED`.
///
/// Any other error, or exhausting the retry budget, is returned unchanged.
pub async fn retry_on_sqlite_busy<T, F, Fut>(op_name: &'static str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_retryable(&err) && attempt < SQLITE_BUSY_MAX_RETRIES => {
                let delay = busy_delay(attempt);
                debug!(
                    "SQLite busy during {}, retrying in {:?} (attempt {}/{})",
                    op_name,
                    delay,
                    attempt + 1,
                    SQLITE_BUSY_MAX_RETRIES
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_busy_delay_is_capped() {
        for attempt in 0..20 {
            assert!(busy_delay(attempt) <= Duration::from_millis(SQLITE_BUSY_MAX_DELAY_MS));
        }
        assert!(busy_delay(0) >= Duration::from_millis(SQLITE_BUSY_BASE_DELAY_MS));
    }

    #[test]
    fn test_busy_detection_by_message() {
        assert!(is_sqlite_busy(&sqlx::Error::Protocol(
            "database is locked".to_string()
        )));
        assert!(!is_sqlite_busy(&sqlx::Error::RowNotFound));
    }

    #[tokio::test]
    async fn test_non_busy_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_on_sqlite_busy("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::validation("nope")) }
        })
        .await;

        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_busy_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_on_sqlite_busy("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::DatabaseSqlx(sqlx::Error::Protocol(
                        "database is busy".to_string(),
                    )))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
