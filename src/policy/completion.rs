//! When a batch has run long or large enough to stop.

use crate::domain::RecipeBatch;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionReason {
    BatchSizeReached,
    TimeWindowExceeded,
    /// Both limits hold at once. Not a tie-break; neither limit wins.
    Both,
    NotComplete,
}

/// Pure decision service over a batch and a point in time.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchCompletionPolicy;

impl BatchCompletionPolicy {
    pub fn should_complete_batch(&self, batch: &RecipeBatch, now: DateTime<Utc>) -> bool {
        Self::size_reached(batch) || Self::window_exceeded(batch, now)
    }

    pub fn completion_reason(&self, batch: &RecipeBatch, now: DateTime<Utc>) -> CompletionReason {
        match (Self::size_reached(batch), Self::window_exceeded(batch, now)) {
            (true, true) => CompletionReason::Both,
            (true, false) => CompletionReason::BatchSizeReached,
            (false, true) => CompletionReason::TimeWindowExceeded,
            (false, false) => CompletionReason::NotComplete,
        }
    }

    fn size_reached(batch: &RecipeBatch) -> bool {
        batch.processed_count() >= batch.batch_size()
    }

    fn window_exceeded(batch: &RecipeBatch, now: DateTime<Utc>) -> bool {
        batch.elapsed(now) >= batch.time_window()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BatchStatus;
    use std::time::Duration;

    const HOUR: Duration = Duration::from_secs(3600);

    fn batch(size: u32, window: Duration) -> RecipeBatch {
        RecipeBatch::create_batch("example", size, window).unwrap()
    }

    fn restored_with(size: u32, processed: usize, started_ago: chrono::Duration) -> RecipeBatch {
        let mut snapshot = batch(1, HOUR).snapshot();
        snapshot.batch_size = size;
        snapshot.started_at = Utc::now() - started_ago;
        snapshot.processed_urls = (0..processed)
            .map(|i| format!("https://example.com/r/{i}"))
            .collect();
        snapshot.status = BatchStatus::InProgress;
        RecipeBatch::restore(snapshot).unwrap()
    }

    #[test]
    fn size_reached_after_five_processed() {
        let mut b = batch(5, HOUR);
        let policy = BatchCompletionPolicy;
        for i in 0..5 {
            assert!(!policy.should_complete_batch(&b, Utc::now()));
            b.mark_recipe_processed(format!("https://example.com/r/{i}"))
                .unwrap();
        }
        let now = Utc::now();
        assert!(policy.should_complete_batch(&b, now));
        assert_eq!(
            policy.completion_reason(&b, now),
            CompletionReason::BatchSizeReached
        );
    }

    #[test]
    fn window_exceeded_after_sixty_five_minutes() {
        let b = restored_with(100, 5, chrono::Duration::minutes(65));
        let policy = BatchCompletionPolicy;
        let now = Utc::now();
        assert!(policy.should_complete_batch(&b, now));
        assert_eq!(
            policy.completion_reason(&b, now),
            CompletionReason::TimeWindowExceeded
        );
    }

    #[test]
    fn both_reported_literally() {
        let b = restored_with(2, 3, chrono::Duration::minutes(90));
        assert_eq!(
            BatchCompletionPolicy.completion_reason(&b, Utc::now()),
            CompletionReason::Both
        );
    }

    #[test]
    fn zero_size_batch_completes_immediately() {
        let b = restored_with(0, 0, chrono::Duration::zero());
        assert!(BatchCompletionPolicy.should_complete_batch(&b, Utc::now()));
    }

    #[test]
    fn fresh_batch_is_not_complete() {
        let b = batch(10, HOUR);
        assert_eq!(
            BatchCompletionPolicy.completion_reason(&b, Utc::now()),
            CompletionReason::NotComplete
        );
    }

    #[test]
    fn clock_before_start_counts_as_no_elapsed_time() {
        let b = batch(10, HOUR);
        let earlier = b.started_at() - chrono::Duration::minutes(5);
        assert!(!BatchCompletionPolicy.should_complete_batch(&b, earlier));
    }
}
