//! Size- and time-bounded progress of one provider run.

use crate::core::{RecordHeader, State};
use crate::error::StateError;
use crate::validation::{rules, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum BatchStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl State for BatchStatus {
    fn name(&self) -> &str {
        match self {
            Self::Pending => "Pending",
            Self::InProgress => "InProgress",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }

    fn is_final(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn is_error(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// One bounded unit of work for a provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecipeBatch {
    header: RecordHeader,
    provider_id: String,
    batch_size: u32,
    time_window: Duration,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    processed_count: u32,
    skipped_count: u32,
    failed_count: u32,
    processed_urls: Vec<String>,
    skipped_urls: Vec<String>,
    failed_urls: Vec<String>,
    status: BatchStatus,
}

/// Persisted form of a batch, accepted by [`RecipeBatch::restore`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchSnapshot {
    pub id: Uuid,
    pub provider_id: String,
    pub batch_size: u32,
    pub time_window: Duration,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub processed_urls: Vec<String>,
    pub skipped_urls: Vec<String>,
    pub failed_urls: Vec<String>,
    pub status: BatchStatus,
}

impl RecipeBatch {
    /// Start a batch for `provider_id`. Status is `InProgress` immediately.
    pub fn create_batch(
        provider_id: impl Into<String>,
        batch_size: u32,
        time_window: Duration,
    ) -> Result<Self, ValidationError> {
        let provider_id = provider_id.into();
        rules::validate(
            "RecipeBatch",
            vec![
                rules::non_empty("provider_id", &provider_id),
                rules::max_len(
                    "provider_id",
                    &provider_id,
                    rules::MAX_PROVIDER_NAME_LENGTH,
                ),
                rules::positive("batch_size", i64::from(batch_size)),
                rules::positive(
                    "time_window",
                    i64::try_from(time_window.as_millis()).unwrap_or(i64::MAX),
                ),
            ],
        )?;

        let header = RecordHeader::new();
        Ok(Self {
            started_at: header.created_at,
            header,
            provider_id,
            batch_size,
            time_window,
            completed_at: None,
            processed_count: 0,
            skipped_count: 0,
            failed_count: 0,
            processed_urls: Vec::new(),
            skipped_urls: Vec::new(),
            failed_urls: Vec::new(),
            status: BatchStatus::InProgress,
        })
    }

    /// Rebuild a batch from storage. Size and window are not re-validated,
    /// but `completed_at` must agree with the status.
    pub fn restore(snapshot: BatchSnapshot) -> Result<Self, StateError> {
        if snapshot.status.is_final() != snapshot.completed_at.is_some() {
            return Err(StateError::InvalidTransition {
                entity: "RecipeBatch",
                operation: "restore",
                status: snapshot.status.name().to_string(),
            });
        }
        let count = |urls: &Vec<String>| u32::try_from(urls.len()).unwrap_or(u32::MAX);
        Ok(Self {
            header: RecordHeader::restore(snapshot.id, snapshot.started_at, snapshot.updated_at),
            provider_id: snapshot.provider_id,
            batch_size: snapshot.batch_size,
            time_window: snapshot.time_window,
            started_at: snapshot.started_at,
            completed_at: snapshot.completed_at,
            processed_count: count(&snapshot.processed_urls),
            skipped_count: count(&snapshot.skipped_urls),
            failed_count: count(&snapshot.failed_urls),
            processed_urls: snapshot.processed_urls,
            skipped_urls: snapshot.skipped_urls,
            failed_urls: snapshot.failed_urls,
            status: snapshot.status,
        })
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        BatchSnapshot {
            id: self.header.id,
            provider_id: self.provider_id.clone(),
            batch_size: self.batch_size,
            time_window: self.time_window,
            started_at: self.started_at,
            completed_at: self.completed_at,
            updated_at: self.header.updated_at,
            processed_urls: self.processed_urls.clone(),
            skipped_urls: self.skipped_urls.clone(),
            failed_urls: self.failed_urls.clone(),
            status: self.status,
        }
    }

    fn require_in_progress(&self, operation: &'static str) -> Result<(), StateError> {
        if self.status == BatchStatus::InProgress {
            Ok(())
        } else {
            Err(StateError::InvalidTransition {
                entity: "RecipeBatch",
                operation,
                status: self.status.name().to_string(),
            })
        }
    }

    pub fn mark_recipe_processed(&mut self, url: impl Into<String>) -> Result<(), StateError> {
        self.require_in_progress("mark a recipe processed in")?;
        self.processed_urls.push(url.into());
        self.processed_count += 1;
        self.header.touch();
        Ok(())
    }

    pub fn mark_recipe_skipped(&mut self, url: impl Into<String>) -> Result<(), StateError> {
        self.require_in_progress("mark a recipe skipped in")?;
        self.skipped_urls.push(url.into());
        self.skipped_count += 1;
        self.header.touch();
        Ok(())
    }

    pub fn mark_recipe_failed(&mut self, url: impl Into<String>) -> Result<(), StateError> {
        self.require_in_progress("mark a recipe failed in")?;
        self.failed_urls.push(url.into());
        self.failed_count += 1;
        self.header.touch();
        Ok(())
    }

    /// Same size/time check as the completion policy, without the service.
    pub fn should_stop_processing(&self, now: DateTime<Utc>) -> bool {
        self.processed_count >= self.batch_size || self.elapsed(now) >= self.time_window
    }

    pub fn complete_batch(&mut self) -> Result<(), StateError> {
        self.require_in_progress("complete")?;
        self.status = BatchStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.header.touch();
        Ok(())
    }

    pub fn fail_batch(&mut self) -> Result<(), StateError> {
        self.require_in_progress("fail")?;
        self.status = BatchStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.header.touch();
        Ok(())
    }

    /// Elapsed time since the batch started; zero if `now` is earlier.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn get_total_processed(&self) -> u32 {
        self.processed_count + self.skipped_count + self.failed_count
    }

    pub fn id(&self) -> Uuid {
        self.header.id
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    pub fn time_window(&self) -> Duration {
        self.time_window
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn processed_count(&self) -> u32 {
        self.processed_count
    }

    pub fn skipped_count(&self) -> u32 {
        self.skipped_count
    }

    pub fn failed_count(&self) -> u32 {
        self.failed_count
    }

    pub fn processed_urls(&self) -> &[String] {
        &self.processed_urls
    }

    pub fn skipped_urls(&self) -> &[String] {
        &self.skipped_urls
    }

    pub fn failed_urls(&self) -> &[String] {
        &self.failed_urls
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.header.updated_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::Violation;

    const HOUR: Duration = Duration::from_secs(3600);

    fn batch(size: u32) -> RecipeBatch {
        RecipeBatch::create_batch("allrecipes", size, HOUR).unwrap()
    }

    #[test]
    fn create_batch_starts_in_progress() {
        let b = batch(5);
        assert_eq!(b.status(), BatchStatus::InProgress);
        assert_eq!(b.get_total_processed(), 0);
        assert!(b.completed_at().is_none());
    }

    #[test]
    fn create_batch_rejects_zero_size_and_window() {
        let err = RecipeBatch::create_batch("", 0, Duration::ZERO).unwrap_err();
        assert_eq!(err.violations.len(), 3);
        assert!(err.has(|v| matches!(v, Violation::NotPositive { field: "batch_size" })));
        assert!(err.has(|v| matches!(v, Violation::NotPositive { field: "time_window" })));
    }

    #[test]
    fn counters_add_up_to_total() {
        let mut b = batch(10);
        b.mark_recipe_processed("https://a.test/1").unwrap();
        b.mark_recipe_processed("https://a.test/2").unwrap();
        b.mark_recipe_skipped("https://a.test/3").unwrap();
        b.mark_recipe_failed("https://a.test/4").unwrap();

        assert_eq!(b.processed_count(), 2);
        assert_eq!(b.skipped_count(), 1);
        assert_eq!(b.failed_count(), 1);
        assert_eq!(
            b.processed_count() + b.skipped_count() + b.failed_count(),
            b.get_total_processed()
        );
        assert_eq!(b.failed_urls(), &["https://a.test/4".to_string()]);
    }

    #[test]
    fn mutations_require_in_progress() {
        let mut b = batch(1);
        b.complete_batch().unwrap();

        assert!(b.mark_recipe_processed("https://a.test/1").is_err());
        assert!(b.mark_recipe_skipped("https://a.test/1").is_err());
        assert!(b.mark_recipe_failed("https://a.test/1").is_err());
        assert!(b.complete_batch().is_err());
        assert_eq!(b.status(), BatchStatus::Completed);
        assert!(b.completed_at().is_some());
    }

    #[test]
    fn should_stop_processing_on_size() {
        let mut b = batch(2);
        let now = Utc::now();
        assert!(!b.should_stop_processing(now));
        b.mark_recipe_processed("https://a.test/1").unwrap();
        b.mark_recipe_processed("https://a.test/2").unwrap();
        assert!(b.should_stop_processing(now));
    }

    #[test]
    fn should_stop_processing_on_time() {
        let b = batch(100);
        let later = b.started_at() + chrono::Duration::minutes(61);
        assert!(b.should_stop_processing(later));
    }

    #[test]
    fn snapshot_restores_identically() {
        let mut b = batch(3);
        b.mark_recipe_processed("https://a.test/1").unwrap();
        b.mark_recipe_failed("https://a.test/2").unwrap();

        let restored = RecipeBatch::restore(b.snapshot()).unwrap();
        assert_eq!(restored, b);
    }

    #[test]
    fn restore_rejects_inconsistent_completion() {
        let mut snapshot = batch(3).snapshot();
        snapshot.status = BatchStatus::Completed;
        assert!(RecipeBatch::restore(snapshot).is_err());
    }
}
