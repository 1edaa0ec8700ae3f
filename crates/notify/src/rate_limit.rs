//! Minimum-spacing limiter for chat messages.
//!
//! One limiter exists per instance. A send requested before the spacing has
//! elapsed waits for it; nothing is dropped. The clock is tokio's monotonic
//! `Instant`, so paused-time tests drive it deterministically.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

#[derive(Debug)]
pub struct ChatRateLimiter {
    min_spacing: Duration,
    last_send: Mutex<Option<Instant>>,
}

impl ChatRateLimiter {
    #[must_use]
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            min_spacing,
            last_send: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn min_spacing(&self) -> Duration {
        self.min_spacing
    }

    /// Runs `send` once the spacing since the previous send has elapsed.
    ///
    /// Concurrent callers queue on the lock, so sends through one limiter
    /// never overlap. The timestamp is taken when `send` finishes, whether
    /// it succeeded or not.
    pub async fn throttle<F, T>(&self, send: F) -> T
    where
        F: Future<Output = T>,
    {
        let mut last_send = self.last_send.lock().await;

        if let Some(previous) = *last_send {
            let ready_at = previous + self.min_spacing;
            if ready_at > Instant::now() {
                tracing::debug!(
                    wait_ms = (ready_at - Instant::now()).as_millis() as u64,
                    "Delaying chat message for rate limit"
                );
                sleep_until(ready_at).await;
            }
        }

        let output = send.await;
        *last_send = Some(Instant::now());
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn test_first_send_is_immediate() {
        let limiter = ChatRateLimiter::new(Duration::from_secs(5));
        let start = Instant::now();
        limiter.throttle(async {}).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sends_one_second_apart_are_spaced_five() {
        let limiter = Arc::new(ChatRateLimiter::new(Duration::from_secs(5)));

        let first = limiter.throttle(async { Instant::now() }).await;
        sleep(Duration::from_secs(1)).await;
        let second = limiter.throttle(async { Instant::now() }).await;

        assert!(second - first >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_delay_after_spacing_elapsed() {
        let limiter = ChatRateLimiter::new(Duration::from_secs(5));
        limiter.throttle(async {}).await;
        sleep(Duration::from_secs(6)).await;

        let before = Instant::now();
        limiter.throttle(async {}).await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_limiters_do_not_block_each_other() {
        let a = ChatRateLimiter::new(Duration::from_secs(5));
        let b = ChatRateLimiter::new(Duration::from_secs(5));
        a.throttle(async {}).await;

        let before = Instant::now();
        b.throttle(async {}).await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }
}
