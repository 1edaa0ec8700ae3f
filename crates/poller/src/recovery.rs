//! Bounded retry of storage calls with session recreation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use tradewatch_core::{RecoveryConfig, StorageBackend, StorageConnector, StorageError, StorageResult};

/// Wraps every storage call a poller makes.
///
/// Transient errors are retried on a fresh session with exponential backoff
/// (`base_delay`, `2 * base_delay`, ...) until `max_attempts` calls have been
/// made; fatal errors are returned on the spot.
pub struct ErrorRecoveryManager {
    connector: Arc<dyn StorageConnector>,
    session: RwLock<Arc<dyn StorageBackend>>,
    max_attempts: u32,
    base_delay: Duration,
}

impl std::fmt::Debug for ErrorRecoveryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorRecoveryManager")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .finish_non_exhaustive()
    }
}

impl ErrorRecoveryManager {
    /// Opens the first session through `connector`, retrying transient
    /// failures under the same policy as regular calls.
    ///
    /// # Errors
    /// Returns the fatal error, or `Exhausted` once every attempt failed.
    pub async fn connect(
        connector: Arc<dyn StorageConnector>,
        config: &RecoveryConfig,
    ) -> StorageResult<Self> {
        let max_attempts = config.max_attempts.max(1);
        let base_delay = config.base_delay();
        let mut attempt = 1;
        loop {
            match connector.connect().await {
                Ok(session) => {
                    return Ok(Self {
                        connector,
                        session: RwLock::new(session),
                        max_attempts,
                        base_delay,
                    })
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = backoff(base_delay, attempt);
                    warn!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "Storage connect failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    return Err(StorageError::Exhausted {
                        attempts: attempt,
                        last: e.to_string(),
                    })
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Wraps an already open session.
    #[must_use]
    pub fn with_session(
        connector: Arc<dyn StorageConnector>,
        session: Arc<dyn StorageBackend>,
        config: &RecoveryConfig,
    ) -> Self {
        Self {
            connector,
            session: RwLock::new(session),
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
        }
    }

    /// Current session, for best-effort writes that must not be retried.
    pub async fn session(&self) -> Arc<dyn StorageBackend> {
        self.session.read().await.clone()
    }

    /// Runs `op` against the current session, recovering from transient
    /// failures.
    ///
    /// # Errors
    /// Returns a non-transient error unchanged, or `Exhausted` when the
    /// last permitted attempt still failed transiently.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut op: F) -> StorageResult<T>
    where
        F: FnMut(Arc<dyn StorageBackend>) -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let mut attempt = 1;
        loop {
            let session = self.session().await;
            match op(session).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Storage call recovered");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = backoff(self.base_delay, attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Transient storage error, recreating session"
                    );
                    tokio::time::sleep(delay).await;
                    self.reconnect().await?;
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    return Err(StorageError::Exhausted {
                        attempts: attempt,
                        last: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn reconnect(&self) -> StorageResult<()> {
        match self.connector.connect().await {
            Ok(fresh) => {
                *self.session.write().await = fresh;
                Ok(())
            }
            // The next attempt runs on the old session and fails or succeeds on its own.
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Could not recreate storage session");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow(attempt.saturating_sub(1))
}
