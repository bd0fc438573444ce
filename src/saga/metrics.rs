//! Counters accumulated over a saga run.

use crate::core::StateMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SagaMetrics {
    pub items_processed: u64,
    pub items_failed: u64,
    /// Number of `update_progress` calls.
    pub total_updates: u64,
    /// Number of times the saga entered `Failed`.
    pub failure_count: u64,
    pub total_processing_time: Duration,
    pub last_progress_update: Option<DateTime<Utc>>,
    /// Final metrics merged in by `complete`.
    pub custom: StateMap,
}

impl SagaMetrics {
    /// Add to the counters. Never decreases anything.
    pub fn accumulate(
        &mut self,
        items_processed: u64,
        items_failed: u64,
        phase_duration: Option<Duration>,
    ) {
        self.items_processed = self.items_processed.saturating_add(items_processed);
        self.items_failed = self.items_failed.saturating_add(items_failed);
        if let Some(d) = phase_duration {
            self.total_processing_time = self.total_processing_time.saturating_add(d);
        }
    }
}
