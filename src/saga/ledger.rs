//! Typed view over the well-known keys of a saga's `state_data`.
//!
//! The state map stays schema-less so phases can stash what they need, but
//! the keys the orchestrator depends on for resumption are read and written
//! only through [`SagaLedger`].

use crate::core::{StateMap, StateValue};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

pub const BATCH_ID: &str = "BatchId";
pub const DISCOVERED_URLS: &str = "DiscoveredUrls";
pub const FINGERPRINTED_URLS: &str = "FingerprintedUrls";
pub const FINGERPRINT_IDS: &str = "FingerprintIds";
pub const PROCESSED_URLS: &str = "ProcessedUrls";
pub const SKIPPED_URLS: &str = "SkippedUrls";
pub const FAILED_URLS: &str = "FailedUrls";
pub const CURRENT_INDEX: &str = "CurrentIndex";
pub const FINGERPRINT_INDEX: &str = "FingerprintIndex";
pub const RETRY_COUNTS: &str = "RetryCounts";

/// One entry of `FailedUrls`.
#[derive(Clone, Debug, PartialEq)]
pub struct FailedUrlRecord {
    pub url: String,
    pub error: String,
    pub error_type: String,
    pub is_permanent: bool,
    pub retry_count: u32,
    pub retryable: bool,
    pub timestamp: DateTime<Utc>,
    pub phase: String,
}

impl FailedUrlRecord {
    pub fn to_value(&self) -> StateValue {
        let mut map = StateMap::new();
        map.insert("Url".into(), self.url.as_str().into());
        map.insert("Error".into(), self.error.as_str().into());
        map.insert("ErrorType".into(), self.error_type.as_str().into());
        map.insert("IsPermanent".into(), self.is_permanent.into());
        map.insert("RetryCount".into(), self.retry_count.into());
        map.insert("Retryable".into(), self.retryable.into());
        map.insert("Timestamp".into(), self.timestamp.into());
        map.insert("Phase".into(), self.phase.as_str().into());
        StateValue::Map(map)
    }

    /// `None` when the entry has no `Url`. Other missing fields take defaults.
    pub fn from_value(value: &StateValue) -> Option<Self> {
        let map = value.as_map()?;
        let text = |key: &str| {
            map.get(key)
                .and_then(StateValue::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let flag = |key: &str| map.get(key).and_then(StateValue::as_bool).unwrap_or(false);
        let url = map.get("Url").and_then(StateValue::as_str)?.to_string();

        Some(Self {
            url,
            error: text("Error"),
            error_type: text("ErrorType"),
            is_permanent: flag("IsPermanent"),
            retry_count: map
                .get("RetryCount")
                .and_then(StateValue::as_i64)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(0),
            retryable: flag("Retryable"),
            timestamp: map
                .get("Timestamp")
                .and_then(StateValue::as_timestamp)
                .unwrap_or_else(Utc::now),
            phase: text("Phase"),
        })
    }
}

/// Everything a run needs to pick up where a previous one stopped.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SagaLedger {
    pub batch_id: Option<Uuid>,
    pub discovered_urls: Vec<String>,
    /// Next position in `discovered_urls` to fingerprint.
    pub fingerprint_index: usize,
    pub fingerprinted_urls: Vec<String>,
    /// Fingerprint chosen for each fingerprinted URL.
    pub fingerprint_ids: BTreeMap<String, Uuid>,
    /// Next position in `fingerprinted_urls` to process.
    pub current_index: usize,
    pub processed_urls: Vec<String>,
    pub skipped_urls: Vec<String>,
    pub failed_urls: Vec<FailedUrlRecord>,
    /// Retries used per URL that has not settled yet.
    pub retry_counts: BTreeMap<String, u32>,
}

impl SagaLedger {
    pub fn from_state(data: &StateMap) -> Self {
        let list = |key: &str| {
            data.get(key)
                .map(StateValue::as_string_list)
                .unwrap_or_default()
        };
        let index = |key: &str| {
            data.get(key)
                .and_then(StateValue::as_i64)
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(0)
        };

        Self {
            batch_id: data
                .get(BATCH_ID)
                .and_then(StateValue::as_str)
                .and_then(|s| Uuid::parse_str(s).ok()),
            discovered_urls: list(DISCOVERED_URLS),
            fingerprint_index: index(FINGERPRINT_INDEX),
            fingerprinted_urls: list(FINGERPRINTED_URLS),
            fingerprint_ids: data
                .get(FINGERPRINT_IDS)
                .and_then(StateValue::as_map)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|(url, id)| {
                            let id = Uuid::parse_str(id.as_str()?).ok()?;
                            Some((url.clone(), id))
                        })
                        .collect()
                })
                .unwrap_or_default(),
            current_index: index(CURRENT_INDEX),
            processed_urls: list(PROCESSED_URLS),
            skipped_urls: list(SKIPPED_URLS),
            failed_urls: data
                .get(FAILED_URLS)
                .and_then(StateValue::as_list)
                .map(|items| items.iter().filter_map(FailedUrlRecord::from_value).collect())
                .unwrap_or_default(),
            retry_counts: data
                .get(RETRY_COUNTS)
                .and_then(StateValue::as_map)
                .map(|counts| {
                    counts
                        .iter()
                        .filter_map(|(url, n)| {
                            let n = u32::try_from(n.as_i64()?).ok()?;
                            Some((url.clone(), n))
                        })
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// All ledger keys, ready to merge into `state_data`.
    pub fn to_state(&self) -> StateMap {
        let mut data = StateMap::new();
        data.insert(
            BATCH_ID.into(),
            self.batch_id
                .map(|id| StateValue::from(id.to_string()))
                .unwrap_or(StateValue::Null),
        );
        data.insert(
            DISCOVERED_URLS.into(),
            StateValue::string_list(&self.discovered_urls),
        );
        data.insert(FINGERPRINT_INDEX.into(), self.fingerprint_index.into());
        data.insert(
            FINGERPRINTED_URLS.into(),
            StateValue::string_list(&self.fingerprinted_urls),
        );
        data.insert(
            FINGERPRINT_IDS.into(),
            StateValue::Map(
                self.fingerprint_ids
                    .iter()
                    .map(|(url, id)| (url.clone(), StateValue::from(id.to_string())))
                    .collect(),
            ),
        );
        data.insert(CURRENT_INDEX.into(), self.current_index.into());
        data.insert(
            PROCESSED_URLS.into(),
            StateValue::string_list(&self.processed_urls),
        );
        data.insert(SKIPPED_URLS.into(), StateValue::string_list(&self.skipped_urls));
        data.insert(
            FAILED_URLS.into(),
            StateValue::List(self.failed_urls.iter().map(FailedUrlRecord::to_value).collect()),
        );
        data.insert(
            RETRY_COUNTS.into(),
            StateValue::Map(
                self.retry_counts
                    .iter()
                    .map(|(url, n)| (url.clone(), StateValue::from(*n)))
                    .collect(),
            ),
        );
        data
    }

    /// Whether `url` already has a final outcome in this run.
    pub fn is_settled(&self, url: &str) -> bool {
        self.processed_urls.iter().any(|u| u == url)
            || self.skipped_urls.iter().any(|u| u == url)
            || self.failed_record(url).is_some()
    }

    pub fn failed_record(&self, url: &str) -> Option<&FailedUrlRecord> {
        self.failed_urls.iter().find(|f| f.url == url)
    }

    /// Discovered URLs still waiting for a fingerprint, in discovery order.
    pub fn pending_fingerprints(&self) -> Vec<String> {
        let fingerprinted: HashSet<&str> =
            self.fingerprinted_urls.iter().map(String::as_str).collect();
        self.discovered_urls
            .iter()
            .skip(self.fingerprint_index)
            .filter(|u| !fingerprinted.contains(u.as_str()) && !self.is_settled(u))
            .cloned()
            .collect()
    }

    /// Fingerprinted URLs not yet processed, starting at `current_index`.
    pub fn remaining_to_process(&self) -> Vec<String> {
        self.fingerprinted_urls
            .iter()
            .skip(self.current_index)
            .filter(|u| !self.is_settled(u))
            .cloned()
            .collect()
    }

    pub fn retries_used(&self, url: &str) -> u32 {
        self.retry_counts.get(url).copied().unwrap_or(0)
    }

    /// Queue `url` for processing from `fingerprint_id`. Extraction starts
    /// with a fresh retry budget.
    pub fn record_fingerprinted(&mut self, url: &str, fingerprint_id: Uuid) {
        self.retry_counts.remove(url);
        self.fingerprint_ids.insert(url.to_string(), fingerprint_id);
        self.fingerprinted_urls.push(url.to_string());
    }

    pub fn record_processed(&mut self, url: &str) {
        self.retry_counts.remove(url);
        self.processed_urls.push(url.to_string());
    }

    pub fn record_skipped(&mut self, url: &str) {
        self.retry_counts.remove(url);
        self.skipped_urls.push(url.to_string());
    }

    pub fn record_failed(&mut self, record: FailedUrlRecord) {
        self.retry_counts.remove(&record.url);
        self.failed_urls.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(url: &str, permanent: bool) -> FailedUrlRecord {
        FailedUrlRecord {
            url: url.to_string(),
            error: "bad json".into(),
            error_type: "MalformedDataError".into(),
            is_permanent: permanent,
            retry_count: if permanent { 0 } else { 3 },
            retryable: false,
            timestamp: Utc::now(),
            phase: "Processing".into(),
        }
    }

    #[test]
    fn empty_state_gives_empty_ledger() {
        assert_eq!(SagaLedger::from_state(&StateMap::new()), SagaLedger::default());
    }

    #[test]
    fn ledger_survives_the_state_map() {
        let mut ledger = SagaLedger {
            batch_id: Some(Uuid::new_v4()),
            discovered_urls: vec!["u1".into(), "u2".into(), "u3".into()],
            fingerprint_index: 3,
            fingerprinted_urls: vec!["u1".into(), "u2".into(), "u3".into()],
            current_index: 2,
            ..SagaLedger::default()
        };
        ledger.record_processed("u1");
        ledger.record_failed(failed("u2", true));
        ledger.retry_counts.insert("u3".into(), 1);

        let back = SagaLedger::from_state(&ledger.to_state());
        assert_eq!(back.batch_id, ledger.batch_id);
        assert_eq!(back.processed_urls, ledger.processed_urls);
        assert_eq!(back.failed_urls.len(), 1);
        assert_eq!(back.failed_urls[0].url, "u2");
        assert!(back.failed_urls[0].is_permanent);
        assert_eq!(back.retries_used("u3"), 1);
        assert_eq!(back.current_index, 2);
    }

    #[test]
    fn remaining_excludes_settled_urls() {
        let mut ledger = SagaLedger {
            fingerprinted_urls: vec!["u1".into(), "u2".into(), "u3".into(), "u4".into()],
            current_index: 0,
            ..SagaLedger::default()
        };
        ledger.record_processed("u1");
        ledger.record_failed(failed("u3", false));

        assert_eq!(ledger.remaining_to_process(), vec!["u2", "u4"]);
        ledger.current_index = 2;
        assert_eq!(ledger.remaining_to_process(), vec!["u4"]);
    }

    #[test]
    fn pending_fingerprints_skip_known_urls() {
        let mut ledger = SagaLedger {
            discovered_urls: vec!["a".into(), "b".into(), "c".into()],
            fingerprinted_urls: vec!["a".into()],
            fingerprint_index: 1,
            ..SagaLedger::default()
        };
        ledger.record_skipped("b");
        assert_eq!(ledger.pending_fingerprints(), vec!["c"]);
    }

    #[test]
    fn settling_clears_retry_count() {
        let mut ledger = SagaLedger::default();
        ledger.retry_counts.insert("u1".into(), 2);
        ledger.record_processed("u1");
        assert_eq!(ledger.retries_used("u1"), 0);
    }

    #[test]
    fn fingerprinting_resets_retries_and_keeps_the_chosen_id() {
        let mut ledger = SagaLedger::default();
        let id = Uuid::new_v4();
        ledger.retry_counts.insert("u1".into(), 2);
        ledger.record_fingerprinted("u1", id);

        assert_eq!(ledger.retries_used("u1"), 0);
        assert_eq!(ledger.remaining_to_process(), vec!["u1"]);
        let back = SagaLedger::from_state(&ledger.to_state());
        assert_eq!(back.fingerprint_ids.get("u1"), Some(&id));
    }

    #[test]
    fn failed_record_without_url_is_ignored() {
        let mut map = StateMap::new();
        map.insert("Error".into(), "x".into());
        assert!(FailedUrlRecord::from_value(&StateValue::Map(map)).is_none());
    }
}
