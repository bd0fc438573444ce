//! Run settings for one provider.

use crate::domain::MAX_RETRY_ATTEMPTS;
use crate::policy::RetryPolicy;
use crate::validation::{rules, ValidationError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Provider run configuration.
///
/// Deserialises from any serde format, fills missing fields from
/// [`Default`], and can be adjusted with the `with_*` setters.
///
/// ```rust
/// use recipe_saga::saga::SagaConfig;
/// use std::time::Duration;
///
/// let config = SagaConfig::new("bbc-food", "https://www.bbc.co.uk/food/recipes")
///     .with_batch_size(20)
///     .with_time_window(Duration::from_secs(15 * 60));
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.max_retries, 3);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SagaConfig {
    pub provider_id: String,
    pub seed_url: String,
    pub batch_size: u32,
    pub time_window: Duration,
    pub max_depth: u32,
    pub max_urls: u32,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for SagaConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            provider_id: String::new(),
            seed_url: String::new(),
            batch_size: 50,
            time_window: Duration::from_secs(60 * 60),
            max_depth: 2,
            max_urls: 500,
            max_retries: retry.max_retries,
            base_delay: retry.base_delay,
            jitter_factor: retry.jitter_factor,
        }
    }
}

impl SagaConfig {
    pub fn new(provider_id: impl Into<String>, seed_url: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            seed_url: seed_url.into(),
            ..Self::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_time_window(mut self, time_window: Duration) -> Self {
        self.time_window = time_window;
        self
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_max_urls(mut self, max_urls: u32) -> Self {
        self.max_urls = max_urls;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Clamped to `[0, 0.5]`; non-finite values fail `validate`.
    pub fn with_jitter_factor(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.base_delay, self.jitter_factor)
    }

    /// A missing provider or seed is reported here, before anything runs.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut checks = vec![
            rules::non_empty("provider_id", &self.provider_id),
            rules::max_len(
                "provider_id",
                &self.provider_id,
                rules::MAX_PROVIDER_NAME_LENGTH,
            ),
            rules::positive("batch_size", i64::from(self.batch_size)),
            rules::positive(
                "time_window",
                i64::try_from(self.time_window.as_millis()).unwrap_or(i64::MAX),
            ),
            rules::positive("max_urls", i64::from(self.max_urls)),
            rules::in_range(
                "max_retries",
                i64::from(self.max_retries),
                1,
                i64::from(MAX_RETRY_ATTEMPTS),
            ),
            rules::finite("jitter_factor", self.jitter_factor),
        ];
        checks.extend(rules::required_url("seed_url", &self.seed_url));
        rules::validate("SagaConfig", checks)
    }
}
