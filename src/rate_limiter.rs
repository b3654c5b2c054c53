//! Global gate over all outbound Steam traffic.
//!
//! One limiter per process: every scraper request passes through
//! `acquire` before touching the network, which enforces a minimum gap
//! between requests across all concurrent sessions. HTTP 429 responses
//! inflate the gap; successes decay it back toward the configured base.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::ImportError;

const MAX_INTERVAL: Duration = Duration::from_secs(60);

pub struct RateLimiter {
    state: Mutex<LimiterState>,
}

struct LimiterState {
    base: Duration,
    interval: Duration,
    next_at: Instant,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            state: Mutex::new(LimiterState {
                base: min_interval,
                interval: min_interval,
                next_at: Instant::now(),
            }),
        }
    }

    /// Suspends the caller until it may proceed or `cancel` fires.
    ///
    /// The tokio mutex queues waiters fairly, and the slot sleep happens
    /// with the lock held, so concurrent callers are admitted strictly
    /// FIFO.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), ImportError> {
        let mut state = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ImportError::Cancelled),
            guard = self.state.lock() => guard,
        };

        if state.next_at > Instant::now() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ImportError::Cancelled),
                _ = sleep_until(state.next_at) => {}
            }
        }

        state.next_at = Instant::now() + state.interval;
        Ok(())
    }

    /// Called when Steam answers 429: doubles the gap (capped) and pushes
    /// the next slot out by the new gap.
    pub async fn backoff(&self) {
        let mut state = self.state.lock().await;
        state.interval = (state.interval * 2).min(MAX_INTERVAL);
        state.next_at = Instant::now() + state.interval;
        log::warn!(
            "Steam rate limit hit, request gap inflated to {:?}",
            state.interval
        );
    }

    /// Called after a successful request: halves any inflation, never
    /// dropping below the base gap.
    pub async fn decay(&self) {
        let mut state = self.state.lock().await;
        if state.interval > state.base {
            state.interval = std::cmp::max(state.base, state.interval / 2);
        }
    }

    pub async fn current_interval(&self) -> Duration {
        self.state.lock().await.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn enforces_minimum_gap() {
        let limiter = RateLimiter::new(Duration::from_millis(100));
        let cancel = CancellationToken::new();

        let start = Instant::now();
        limiter.acquire(&cancel).await.unwrap();
        limiter.acquire(&cancel).await.unwrap();
        limiter.acquire(&cancel).await.unwrap();

        // First acquisition is free; the next two each wait one gap.
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn backoff_doubles_and_decay_halves() {
        let limiter = RateLimiter::new(Duration::from_millis(1000));

        limiter.backoff().await;
        assert_eq!(
            limiter.current_interval().await,
            Duration::from_millis(2000)
        );

        limiter.backoff().await;
        assert_eq!(
            limiter.current_interval().await,
            Duration::from_millis(4000)
        );

        limiter.decay().await;
        assert_eq!(
            limiter.current_interval().await,
            Duration::from_millis(2000)
        );

        limiter.decay().await;
        limiter.decay().await;
        // Never decays below the base gap.
        assert_eq!(
            limiter.current_interval().await,
            Duration::from_millis(1000)
        );
    }

    #[tokio::test]
    async fn backoff_is_capped() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        for _ in 0..12 {
            limiter.backoff().await;
        }
        assert_eq!(limiter.current_interval().await, MAX_INTERVAL);
    }

    #[tokio::test]
    async fn cancelled_token_rejects_immediately() {
        let limiter = RateLimiter::new(Duration::from_secs(5));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = limiter.acquire(&cancel).await.unwrap_err();
        assert!(matches!(err, ImportError::Cancelled));
    }

    #[tokio::test]
    async fn cancel_wakes_a_sleeping_waiter() {
        let limiter = std::sync::Arc::new(RateLimiter::new(Duration::from_secs(30)));
        let cancel = CancellationToken::new();

        // Consume the free slot so the next acquire has to sleep.
        limiter.acquire(&cancel).await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.acquire(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter did not wake after cancel")
            .unwrap();
        assert!(matches!(result, Err(ImportError::Cancelled)));
    }
}
