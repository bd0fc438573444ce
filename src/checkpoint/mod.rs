//! Persisted form of a saga.
//!
//! A [`SagaMemento`] is the only thing needed to resume a crashed run. It is
//! versioned and can be written as JSON (readable, for inspection) or as
//! bincode (compact, for frequent per-item writes).

use crate::core::{StateHistory, StateMap};
use crate::saga::{SagaMetrics, SagaStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod error;

pub use error::CheckpointError;

/// Version identifier for the memento format
pub const CHECKPOINT_VERSION: u32 = 1;

/// Field-by-field snapshot of a `SagaState`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SagaMemento {
    pub version: u32,
    pub id: Uuid,
    pub saga_type: String,
    pub correlation_id: String,
    pub status: SagaStatus,
    pub current_phase: String,
    pub phase_progress: u8,
    pub state_data: StateMap,
    pub checkpoint_data: StateMap,
    pub metrics: SagaMetrics,
    pub error_message: Option<String>,
    pub error_stack_trace: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub history: StateHistory<SagaStatus>,
}

impl SagaMemento {
    pub fn to_json(&self) -> Result<String, CheckpointError> {
        serde_json::to_string_pretty(self).map_err(|e| CheckpointError::SerializationFailed {
            format: "json",
            reason: e.to_string(),
        })
    }

    pub fn from_json(json: &str) -> Result<Self, CheckpointError> {
        let memento: Self =
            serde_json::from_str(json).map_err(|e| CheckpointError::DeserializationFailed {
                format: "json",
                reason: e.to_string(),
            })?;
        memento.check_version()?;
        Ok(memento)
    }

    pub fn to_binary(&self) -> Result<Vec<u8>, CheckpointError> {
        bincode::serialize(self).map_err(|e| CheckpointError::SerializationFailed {
            format: "binary",
            reason: e.to_string(),
        })
    }

    pub fn from_binary(bytes: &[u8]) -> Result<Self, CheckpointError> {
        let memento: Self =
            bincode::deserialize(bytes).map_err(|e| CheckpointError::DeserializationFailed {
                format: "binary",
                reason: e.to_string(),
            })?;
        memento.check_version()?;
        Ok(memento)
    }

    fn check_version(&self) -> Result<(), CheckpointError> {
        if self.version == CHECKPOINT_VERSION {
            Ok(())
        } else {
            Err(CheckpointError::UnsupportedVersion {
                found: self.version,
                supported: CHECKPOINT_VERSION,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StateValue;
    use crate::saga::SagaState;

    fn running_memento() -> SagaMemento {
        let mut saga = SagaState::create_for_recipe_processing("corr-1").unwrap();
        saga.start().unwrap();
        let mut data = StateMap::new();
        data.insert(
            "ProcessedUrls".into(),
            StateValue::string_list(["https://example.com/a"]),
        );
        data.insert("CurrentIndex".into(), StateValue::from(1usize));
        saga.update_progress("Processing", 60, Some(data)).unwrap();
        saga.to_memento()
    }

    #[test]
    fn json_round_trip_preserves_fields() {
        let memento = running_memento();
        let back = SagaMemento::from_json(&memento.to_json().unwrap()).unwrap();

        assert_eq!(back.id, memento.id);
        assert_eq!(back.status, SagaStatus::Running);
        assert_eq!(back.phase_progress, 60);
        assert_eq!(back.state_data, memento.state_data);
        assert_eq!(back.history.transitions().len(), 1);
    }

    #[test]
    fn binary_round_trip_preserves_fields() {
        let memento = running_memento();
        let back = SagaMemento::from_binary(&memento.to_binary().unwrap()).unwrap();

        assert_eq!(back.correlation_id, "corr-1");
        assert_eq!(back.state_data, memento.state_data);
        assert_eq!(back.metrics, memento.metrics);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut memento = running_memento();
        memento.version = 99;
        let json = memento.to_json().unwrap();

        assert_eq!(
            SagaMemento::from_json(&json).unwrap_err(),
            CheckpointError::UnsupportedVersion {
                found: 99,
                supported: CHECKPOINT_VERSION
            }
        );
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(
            SagaMemento::from_binary(&[1, 2, 3]),
            Err(CheckpointError::DeserializationFailed { format: "binary", .. })
        ));
        assert!(matches!(
            SagaMemento::from_json("{"),
            Err(CheckpointError::DeserializationFailed { format: "json", .. })
        ));
    }
}
