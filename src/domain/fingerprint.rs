//! Content fingerprints: one per scrape attempt of one URL.
//!
//! A fingerprint carries the SHA-256 of the fetched content, an estimate of
//! its quality and the retry bookkeeping for failed or blocked fetches. The
//! saga uses it for change detection and to skip content it has already
//! turned into a recipe.

use crate::core::{RecordHeader, State, StateMap, StateValue};
use crate::error::StateError;
use crate::validation::{rules, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Retries allowed after the first failed attempt.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum FingerprintStatus {
    Success,
    Failed,
    Processing,
    Blocked,
}

impl State for FingerprintStatus {
    fn name(&self) -> &str {
        match self {
            Self::Success => "Success",
            Self::Failed => "Failed",
            Self::Processing => "Processing",
            Self::Blocked => "Blocked",
        }
    }

    fn is_error(&self) -> bool {
        matches!(self, Self::Failed | Self::Blocked)
    }
}

/// Ordered estimate of how usable fetched content is.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub enum ContentQuality {
    Poor,
    Acceptable,
    Good,
    Excellent,
}

impl ContentQuality {
    /// Below this many bytes a page is treated as an error or stub page.
    pub const MIN_USEFUL_BYTES: usize = 512;

    /// Heuristic used when a fetcher does not grade its own output.
    ///
    /// Structured recipe markup wins over keyword hits, and anything shorter
    /// than [`Self::MIN_USEFUL_BYTES`] is poor regardless of markup.
    pub fn assess(content: &str) -> Self {
        if content.len() < Self::MIN_USEFUL_BYTES {
            return Self::Poor;
        }
        let lower = content.to_ascii_lowercase();
        let has_json_ld = lower.contains("application/ld+json");
        let has_recipe_type = lower.contains("\"@type\":\"recipe\"")
            || lower.contains("\"@type\": \"recipe\"")
            || lower.contains("schema.org/recipe");
        if has_json_ld && has_recipe_type {
            Self::Excellent
        } else if has_recipe_type || lower.contains("ingredient") {
            Self::Good
        } else {
            Self::Acceptable
        }
    }
}

/// SHA-256 of `content` as lower-case hex; empty input gives an empty hash.
pub fn compute_content_hash(content: &str) -> String {
    if content.is_empty() {
        return String::new();
    }
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    header: RecordHeader,
    url: String,
    content_hash: String,
    raw_content: Option<String>,
    scraped_at: DateTime<Utc>,
    provider_name: String,
    status: FingerprintStatus,
    quality: ContentQuality,
    error_message: Option<String>,
    retry_count: u32,
    processed_at: Option<DateTime<Utc>>,
    recipe_id: Option<Uuid>,
    metadata: StateMap,
}

impl Fingerprint {
    fn validate_identity(url: &str, provider_name: &str) -> Vec<rules::Check> {
        let mut checks = rules::required_url("url", url);
        checks.push(rules::non_empty("provider_name", provider_name));
        checks.push(rules::max_len(
            "provider_name",
            provider_name,
            rules::MAX_PROVIDER_NAME_LENGTH,
        ));
        checks
    }

    fn blank(url: String, provider_name: String, status: FingerprintStatus) -> Self {
        let header = RecordHeader::new();
        Self {
            scraped_at: header.created_at,
            header,
            url,
            content_hash: String::new(),
            raw_content: None,
            provider_name,
            status,
            quality: ContentQuality::Poor,
            error_message: None,
            retry_count: 0,
            processed_at: None,
            recipe_id: None,
            metadata: StateMap::new(),
        }
    }

    /// Fingerprint for a successful fetch. Content must be non-empty.
    pub fn create_success(
        url: impl Into<String>,
        content: impl Into<String>,
        provider_name: impl Into<String>,
        quality: ContentQuality,
    ) -> Result<Self, ValidationError> {
        let (url, content, provider_name) = (url.into(), content.into(), provider_name.into());
        let mut checks = Self::validate_identity(&url, &provider_name);
        checks.push(rules::non_empty("content", &content));
        rules::validate("Fingerprint", checks)?;

        let mut fp = Self::blank(url, provider_name, FingerprintStatus::Success);
        fp.content_hash = compute_content_hash(&content);
        fp.raw_content = Some(content);
        fp.quality = quality;
        Ok(fp)
    }

    pub fn create_failure(
        url: impl Into<String>,
        provider_name: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let (url, provider_name, error_message) =
            (url.into(), provider_name.into(), error_message.into());
        let mut checks = Self::validate_identity(&url, &provider_name);
        checks.push(rules::non_empty("error_message", &error_message));
        rules::validate("Fingerprint", checks)?;

        let mut fp = Self::blank(url, provider_name, FingerprintStatus::Failed);
        fp.error_message = Some(error_message);
        Ok(fp)
    }

    /// `true` for a first-ever scrape; `false` when either side did not
    /// succeed; otherwise whether the hashes differ.
    pub fn has_content_changed(&self, previous: Option<&Fingerprint>) -> bool {
        let Some(previous) = previous else {
            return true;
        };
        if self.status != FingerprintStatus::Success
            || previous.status != FingerprintStatus::Success
        {
            return false;
        }
        self.content_hash != previous.content_hash
    }

    pub fn is_ready_for_processing(&self) -> bool {
        self.status == FingerprintStatus::Success
            && self.quality >= ContentQuality::Acceptable
            && !self.content_hash.is_empty()
            && self.raw_content.is_some()
            && !self.is_processed()
    }

    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }

    pub fn can_retry(&self) -> bool {
        matches!(
            self.status,
            FingerprintStatus::Failed | FingerprintStatus::Blocked
        ) && self.retry_count < MAX_RETRY_ATTEMPTS
    }

    pub fn mark_as_processed(&mut self, recipe_id: Option<Uuid>) -> Result<(), StateError> {
        if self.is_processed() {
            return Err(StateError::AlreadyProcessed(self.header.id));
        }
        if self.status != FingerprintStatus::Success {
            return Err(StateError::NotSuccessful(self.header.id));
        }
        self.processed_at = Some(Utc::now());
        self.recipe_id = recipe_id;
        self.header.touch();
        Ok(())
    }

    /// Enter a retry attempt. Consumes one unit of the retry budget.
    pub fn prepare_for_retry(&mut self) -> Result<(), StateError> {
        if !self.can_retry() {
            return Err(StateError::RetryNotAllowed {
                id: self.header.id,
                status: self.status.name().to_string(),
                retry_count: self.retry_count,
            });
        }
        self.retry_count += 1;
        self.status = FingerprintStatus::Processing;
        self.header.touch();
        Ok(())
    }

    pub fn complete_retry_success(
        &mut self,
        content: impl Into<String>,
        quality: ContentQuality,
    ) -> Result<(), StateError> {
        self.require_processing("complete a retry of")?;
        let content = content.into();
        if content.is_empty() {
            return self.complete_retry_failure("retry returned empty content");
        }
        self.content_hash = compute_content_hash(&content);
        self.raw_content = Some(content);
        self.quality = quality;
        self.status = FingerprintStatus::Success;
        self.error_message = None;
        self.scraped_at = Utc::now();
        self.header.touch();
        Ok(())
    }

    pub fn complete_retry_failure(
        &mut self,
        error_message: impl Into<String>,
    ) -> Result<(), StateError> {
        self.require_processing("fail a retry of")?;
        self.status = FingerprintStatus::Failed;
        self.error_message = Some(error_message.into());
        self.scraped_at = Utc::now();
        self.header.touch();
        Ok(())
    }

    /// Anti-bot wall hit. The blocked attempt uses one unit of retry budget.
    pub fn mark_as_blocked(&mut self, reason: impl Into<String>) -> Result<(), StateError> {
        if self.is_processed() {
            return Err(StateError::AlreadyProcessed(self.header.id));
        }
        self.status = FingerprintStatus::Blocked;
        self.error_message = Some(format!(
            "Blocked by anti-bot protection: {}",
            reason.into()
        ));
        self.content_hash.clear();
        self.raw_content = None;
        self.quality = ContentQuality::Poor;
        self.retry_count = (self.retry_count + 1).min(MAX_RETRY_ATTEMPTS);
        self.header.touch();
        Ok(())
    }

    /// Drop the raw content once it has been turned into a recipe.
    pub fn clear_raw_content(&mut self) -> Result<(), StateError> {
        if !self.is_processed() {
            return Err(StateError::NotProcessed(self.header.id));
        }
        self.raw_content = None;
        self.header.touch();
        Ok(())
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<StateValue>) {
        self.metadata.insert(key.into(), value.into());
    }

    fn require_processing(&self, operation: &'static str) -> Result<(), StateError> {
        if self.status == FingerprintStatus::Processing {
            Ok(())
        } else {
            Err(StateError::InvalidTransition {
                entity: "Fingerprint",
                operation,
                status: self.status.name().to_string(),
            })
        }
    }

    pub fn id(&self) -> Uuid {
        self.header.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn raw_content(&self) -> Option<&str> {
        self.raw_content.as_deref()
    }

    pub fn scraped_at(&self) -> DateTime<Utc> {
        self.scraped_at
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub fn status(&self) -> FingerprintStatus {
        self.status
    }

    pub fn quality(&self) -> ContentQuality {
        self.quality
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    pub fn recipe_id(&self) -> Option<Uuid> {
        self.recipe_id
    }

    pub fn metadata(&self) -> &StateMap {
        &self.metadata
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.header.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://www.example.com/recipe/pancakes";

    fn success(content: &str) -> Fingerprint {
        Fingerprint::create_success(URL, content, "example", ContentQuality::Good).unwrap()
    }

    fn failure() -> Fingerprint {
        Fingerprint::create_failure(URL, "example", "connection reset").unwrap()
    }

    #[test]
    fn hash_is_lower_hex_sha256() {
        assert_eq!(
            compute_content_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(compute_content_hash(""), "");
    }

    #[test]
    fn success_has_hash_and_failure_does_not() {
        let ok = success("<html>pancakes</html>");
        assert_eq!(ok.status(), FingerprintStatus::Success);
        assert!(!ok.content_hash().is_empty());

        let bad = failure();
        assert_eq!(bad.status(), FingerprintStatus::Failed);
        assert!(bad.content_hash().is_empty());
        assert_eq!(bad.error_message(), Some("connection reset"));
    }

    #[test]
    fn construction_rejects_bad_input() {
        let err = Fingerprint::create_success("not-a-url", "", "", ContentQuality::Good)
            .unwrap_err();
        assert_eq!(err.entity, "Fingerprint");
        assert_eq!(err.violations.len(), 3);

        let long_provider = "p".repeat(101);
        assert!(Fingerprint::create_failure(URL, long_provider, "boom").is_err());
    }

    #[test]
    fn content_change_detection() {
        let first = success("v1");
        assert!(first.has_content_changed(None));

        let same = success("v1");
        assert!(!same.has_content_changed(Some(&first)));

        let changed = success("v2");
        assert!(changed.has_content_changed(Some(&first)));

        assert!(!failure().has_content_changed(Some(&first)));
        assert!(!first.has_content_changed(Some(&failure())));
    }

    #[test]
    fn readiness_requires_quality_and_content() {
        let ready = success("content");
        assert!(ready.is_ready_for_processing());

        let poor =
            Fingerprint::create_success(URL, "content", "example", ContentQuality::Poor).unwrap();
        assert!(!poor.is_ready_for_processing());

        assert!(!failure().is_ready_for_processing());
    }

    #[test]
    fn mark_as_processed_only_once_and_only_on_success() {
        let mut fp = success("content");
        let recipe = Uuid::new_v4();
        fp.mark_as_processed(Some(recipe)).unwrap();
        assert_eq!(fp.recipe_id(), Some(recipe));
        assert!(!fp.is_ready_for_processing());
        assert!(matches!(
            fp.mark_as_processed(None),
            Err(StateError::AlreadyProcessed(_))
        ));

        let mut bad = failure();
        assert!(matches!(
            bad.mark_as_processed(None),
            Err(StateError::NotSuccessful(_))
        ));
    }

    #[test]
    fn clear_raw_content_requires_processed() {
        let mut fp = success("content");
        assert!(fp.clear_raw_content().is_err());
        fp.mark_as_processed(None).unwrap();
        fp.clear_raw_content().unwrap();
        assert!(fp.raw_content().is_none());
        assert!(!fp.content_hash().is_empty());
    }

    #[test]
    fn retry_budget_is_bounded() {
        let mut fp = failure();
        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            assert!(fp.can_retry());
            fp.prepare_for_retry().unwrap();
            assert_eq!(fp.retry_count(), attempt);
            fp.complete_retry_failure("still down").unwrap();
        }
        assert!(!fp.can_retry());
        assert!(fp.prepare_for_retry().is_err());
        assert_eq!(fp.retry_count(), MAX_RETRY_ATTEMPTS);
    }

    #[test]
    fn retry_success_restores_content() {
        let mut fp = failure();
        fp.prepare_for_retry().unwrap();
        assert_eq!(fp.status(), FingerprintStatus::Processing);
        fp.complete_retry_success("fresh", ContentQuality::Excellent)
            .unwrap();
        assert_eq!(fp.status(), FingerprintStatus::Success);
        assert_eq!(fp.content_hash(), compute_content_hash("fresh"));
        assert!(fp.error_message().is_none());
        assert!(fp.is_ready_for_processing());
    }

    #[test]
    fn completing_a_retry_requires_preparation() {
        let mut fp = failure();
        assert!(fp.complete_retry_failure("x").is_err());
        assert!(fp
            .complete_retry_success("x", ContentQuality::Good)
            .is_err());
    }

    #[test]
    fn blocked_counts_toward_budget() {
        let mut fp = success("content");
        fp.mark_as_blocked("captcha").unwrap();
        assert_eq!(fp.status(), FingerprintStatus::Blocked);
        assert!(fp.content_hash().is_empty());
        assert_eq!(fp.retry_count(), 1);
        assert!(fp.error_message().unwrap().contains("captcha"));
        assert!(fp.can_retry());
    }

    #[test]
    fn quality_assessment() {
        assert_eq!(ContentQuality::assess("tiny"), ContentQuality::Poor);

        let filler = "x".repeat(ContentQuality::MIN_USEFUL_BYTES);
        assert_eq!(ContentQuality::assess(&filler), ContentQuality::Acceptable);

        let keyword = format!("{filler} ingredients: flour");
        assert_eq!(ContentQuality::assess(&keyword), ContentQuality::Good);

        let structured = format!(
            r#"<script type="application/ld+json">{{"@type":"Recipe"}}</script>{filler}"#
        );
        assert_eq!(ContentQuality::assess(&structured), ContentQuality::Excellent);

        assert!(ContentQuality::Poor < ContentQuality::Acceptable);
        assert!(ContentQuality::Good < ContentQuality::Excellent);
    }
}
