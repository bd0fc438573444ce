//! Request throttling for provider fetches.

use crate::traits::RateLimiter;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{sleep_until, Instant};

/// Caps concurrent requests and spaces request starts evenly.
///
/// `acquire` waits for a concurrency slot, then until at least
/// `min_interval` has passed since the previous request started.
/// Every `acquire` must be paired with a `release`.
pub struct IntervalRateLimiter {
    slots: Semaphore,
    min_interval: Duration,
    next_start: Mutex<Option<Instant>>,
    in_flight: AtomicUsize,
}

impl IntervalRateLimiter {
    pub fn new(max_concurrent: usize, min_interval: Duration) -> Self {
        Self {
            slots: Semaphore::new(max_concurrent.max(1)),
            min_interval,
            next_start: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Spacing derived from a requests-per-minute budget; 0 means unthrottled.
    pub fn per_minute(max_concurrent: usize, requests_per_minute: u32) -> Self {
        let interval = if requests_per_minute == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(60) / requests_per_minute
        };
        Self::new(max_concurrent, interval)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

impl Default for IntervalRateLimiter {
    fn default() -> Self {
        // 1 request at a time, 200ms apart
        Self::new(1, Duration::from_millis(200))
    }
}

#[async_trait]
impl RateLimiter for IntervalRateLimiter {
    async fn acquire(&self) {
        match self.slots.acquire().await {
            Ok(permit) => permit.forget(),
            // closed semaphore: nothing left to throttle
            Err(_) => return,
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        if self.min_interval.is_zero() {
            return;
        }
        let wait_until = {
            let mut next = self.next_start.lock().await;
            let now = Instant::now();
            let start = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(start + self.min_interval);
            start
        };
        sleep_until(wait_until).await;
    }

    fn release(&self) {
        let released = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if released {
            self.slots.add_permits(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn per_minute_derives_interval() {
        assert_eq!(
            IntervalRateLimiter::per_minute(1, 60).min_interval(),
            Duration::from_secs(1)
        );
        assert_eq!(
            IntervalRateLimiter::per_minute(1, 0).min_interval(),
            Duration::ZERO
        );
    }

    #[tokio::test(start_paused = true)]
    async fn spaces_consecutive_requests() {
        let limiter = IntervalRateLimiter::new(4, Duration::from_millis(500));
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire().await;
            limiter.release();
        }

        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn release_without_acquire_is_ignored() {
        let limiter = IntervalRateLimiter::new(1, Duration::ZERO);
        limiter.release();
        assert_eq!(limiter.in_flight(), 0);

        limiter.acquire().await;
        assert_eq!(limiter.in_flight(), 1);
        limiter.release();
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn concurrency_is_capped() {
        let limiter = Arc::new(IntervalRateLimiter::new(1, Duration::ZERO));
        limiter.acquire().await;

        let waiter = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move {
                limiter.acquire().await;
                limiter.release();
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        limiter.release();
        waiter.await.unwrap();
        assert_eq!(limiter.in_flight(), 0);
    }
}
