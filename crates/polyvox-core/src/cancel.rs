//! Cancellation token
//!
//! One token is shared between the HTTP progress callback, the stream
//! parser, retry backoff sleeps and the realtime session task. Cancelling
//! is idempotent and never blocks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Reset for reuse across requests on the same session.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Release);
    }

    /// Sleep that wakes early when the token is cancelled.
    ///
    /// Returns `true` if the full duration elapsed, `false` on cancellation.
    /// Polls at a coarse interval; backoff sleeps do not need finer grain.
    pub async fn sleep(&self, duration: Duration) -> bool {
        const POLL: Duration = Duration::from_millis(50);
        let deadline = tokio::time::Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return true;
            }
            let step = POLL.min(deadline - now);
            tokio::time::sleep(step).await;
        }
    }
}
