//! Domain events emitted by `SagaState` operations.
//!
//! Operations return their events instead of buffering them inside the
//! aggregate; the orchestrator forwards them to an [`EventSink`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SagaEvent {
    Started {
        saga_id: Uuid,
        at: DateTime<Utc>,
    },
    ProgressUpdated {
        saga_id: Uuid,
        phase: String,
        progress: u8,
    },
    CheckpointCreated {
        saga_id: Uuid,
        name: String,
        phase: String,
        progress: u8,
    },
    Paused {
        saga_id: Uuid,
    },
    Resumed {
        saga_id: Uuid,
    },
    Completed {
        saga_id: Uuid,
        at: DateTime<Utc>,
    },
    Failed {
        saga_id: Uuid,
        message: String,
        at: DateTime<Utc>,
    },
}

impl SagaEvent {
    pub fn saga_id(&self) -> Uuid {
        match self {
            Self::Started { saga_id, .. }
            | Self::ProgressUpdated { saga_id, .. }
            | Self::CheckpointCreated { saga_id, .. }
            | Self::Paused { saga_id }
            | Self::Resumed { saga_id }
            | Self::Completed { saga_id, .. }
            | Self::Failed { saga_id, .. } => *saga_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "SagaStarted",
            Self::ProgressUpdated { .. } => "SagaProgressUpdated",
            Self::CheckpointCreated { .. } => "SagaCheckpointCreated",
            Self::Paused { .. } => "SagaPaused",
            Self::Resumed { .. } => "SagaResumed",
            Self::Completed { .. } => "SagaCompleted",
            Self::Failed { .. } => "SagaFailed",
        }
    }
}

/// Receiver for saga events (message bus, audit log, ...).
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &SagaEvent);
}

/// Sink that only logs each event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: &SagaEvent) {
        tracing::debug!(saga_id = %event.saga_id(), event = event.name(), "saga event");
    }
}

/// Sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: Mutex<Vec<SagaEvent>>,
}

impl CollectingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SagaEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for CollectingEventSink {
    fn publish(&self, event: &SagaEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
