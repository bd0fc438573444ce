//! Durable state machine record for one saga execution.
//!
//! ```text
//! Created ──start──▶ Running ──pause──▶ Paused
//!    │                 │  ▲               │
//!    │                 │  └────resume─────┘
//!    │               complete / fail   complete / fail
//!    └──fail──▶ Failed     ▼
//!                   Completed | Failed
//! ```
//!
//! Completed and Failed are terminal. Calling `complete` on a completed saga
//! or `fail` on a failed one is a no-op; every other operation on a terminal
//! saga is an error.

use crate::checkpoint::{CheckpointError, SagaMemento, CHECKPOINT_VERSION};
use crate::core::{Guard, RecordHeader, State, StateHistory, StateMap, StateTransition, StateValue};
use crate::error::StateError;
use crate::saga::events::SagaEvent;
use crate::saga::metrics::SagaMetrics;
use crate::validation::{rules, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

pub const RECIPE_PROCESSING_SAGA: &str = "RecipeProcessingSaga";

pub const LAST_CHECKPOINT_TIME: &str = "LastCheckpointTime";
pub const LAST_CHECKPOINT_PHASE: &str = "LastCheckpointPhase";
pub const LAST_CHECKPOINT_PROGRESS: &str = "LastCheckpointProgress";

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum SagaStatus {
    Created,
    Running,
    Paused,
    Completed,
    Failed,
}

impl State for SagaStatus {
    fn name(&self) -> &str {
        match self {
            Self::Created => "Created",
            Self::Running => "Running",
            Self::Paused => "Paused",
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

#[derive(Clone, Copy, Debug)]
enum Operation {
    Start,
    Pause,
    Resume,
    Complete,
    Fail,
    Mutate,
}

impl Operation {
    fn verb(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Complete => "complete",
            Self::Fail => "fail",
            Self::Mutate => "update",
        }
    }

    fn guard(self) -> Guard<SagaStatus> {
        use SagaStatus::*;
        match self {
            Self::Start => Guard::one_of(&[Created, Paused]),
            Self::Pause => Guard::one_of(&[Running]),
            Self::Resume => Guard::one_of(&[Paused]),
            Self::Complete => Guard::one_of(&[Running, Paused]),
            Self::Fail | Self::Mutate => Guard::new(|s: &SagaStatus| !s.is_final()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SagaState {
    header: RecordHeader,
    saga_type: String,
    correlation_id: String,
    status: SagaStatus,
    current_phase: String,
    phase_progress: u8,
    state_data: StateMap,
    checkpoint_data: StateMap,
    metrics: SagaMetrics,
    error_message: Option<String>,
    error_stack_trace: Option<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    history: StateHistory<SagaStatus>,
}

impl SagaState {
    pub fn new(
        saga_type: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let (saga_type, correlation_id) = (saga_type.into(), correlation_id.into());
        rules::validate(
            "SagaState",
            vec![
                rules::non_empty("saga_type", &saga_type),
                rules::max_len("saga_type", &saga_type, rules::MAX_SAGA_TYPE_LENGTH),
                rules::non_empty("correlation_id", &correlation_id),
                rules::max_len(
                    "correlation_id",
                    &correlation_id,
                    rules::MAX_CORRELATION_ID_LENGTH,
                ),
            ],
        )?;

        Ok(Self {
            header: RecordHeader::new(),
            saga_type,
            correlation_id,
            status: SagaStatus::Created,
            current_phase: String::new(),
            phase_progress: 0,
            state_data: StateMap::new(),
            checkpoint_data: StateMap::new(),
            metrics: SagaMetrics::default(),
            error_message: None,
            error_stack_trace: None,
            started_at: None,
            completed_at: None,
            history: StateHistory::new(),
        })
    }

    pub fn create_for_recipe_processing(
        correlation_id: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        Self::new(RECIPE_PROCESSING_SAGA, correlation_id)
    }

    fn ensure(&self, op: Operation) -> Result<(), StateError> {
        if op.guard().check(&self.status) {
            Ok(())
        } else {
            Err(StateError::InvalidTransition {
                entity: "SagaState",
                operation: op.verb(),
                status: self.status.name().to_string(),
            })
        }
    }

    fn transition(&mut self, to: SagaStatus, op: Operation) {
        let now = Utc::now();
        self.history = self.history.record(StateTransition {
            from: self.status,
            to,
            timestamp: now,
            trigger: op.verb().to_string(),
        });
        self.status = to;
        self.header.updated_at = now;
    }

    pub fn start(&mut self) -> Result<SagaEvent, StateError> {
        self.ensure(Operation::Start)?;
        self.transition(SagaStatus::Running, Operation::Start);
        let at = self.header.updated_at;
        self.started_at.get_or_insert(at);
        Ok(SagaEvent::Started {
            saga_id: self.id(),
            at,
        })
    }

    pub fn pause(&mut self) -> Result<SagaEvent, StateError> {
        self.ensure(Operation::Pause)?;
        self.transition(SagaStatus::Paused, Operation::Pause);
        Ok(SagaEvent::Paused { saga_id: self.id() })
    }

    pub fn resume(&mut self) -> Result<SagaEvent, StateError> {
        self.ensure(Operation::Resume)?;
        self.transition(SagaStatus::Running, Operation::Resume);
        Ok(SagaEvent::Resumed { saga_id: self.id() })
    }

    /// Set phase and progress, merging `state_data` into the saga's data.
    pub fn update_progress(
        &mut self,
        phase: impl Into<String>,
        progress: i64,
        state_data: Option<StateMap>,
    ) -> Result<SagaEvent, StateError> {
        self.ensure(Operation::Mutate)?;
        let progress =
            u8::try_from(progress).ok().filter(|p| *p <= 100).ok_or(StateError::ProgressOutOfRange(progress))?;

        self.current_phase = phase.into();
        self.phase_progress = progress;
        if let Some(data) = state_data {
            self.state_data.extend(data);
        }
        let now = Utc::now();
        self.metrics.total_updates += 1;
        self.metrics.last_progress_update = Some(now);
        self.header.updated_at = now;

        Ok(SagaEvent::ProgressUpdated {
            saga_id: self.id(),
            phase: self.current_phase.clone(),
            progress,
        })
    }

    /// Store `data` under `name`, with the last-checkpoint sidecar keys.
    pub fn create_checkpoint(
        &mut self,
        name: &str,
        data: StateMap,
    ) -> Result<SagaEvent, StateError> {
        self.ensure(Operation::Mutate)?;
        if name.trim().is_empty() {
            return Err(StateError::EmptyCheckpointName);
        }
        let now = Utc::now();
        self.checkpoint_data
            .insert(name.to_string(), StateValue::Map(data));
        self.checkpoint_data
            .insert(LAST_CHECKPOINT_TIME.to_string(), StateValue::from(now));
        self.checkpoint_data.insert(
            LAST_CHECKPOINT_PHASE.to_string(),
            StateValue::from(self.current_phase.as_str()),
        );
        self.checkpoint_data.insert(
            LAST_CHECKPOINT_PROGRESS.to_string(),
            StateValue::from(self.phase_progress),
        );
        self.header.updated_at = now;

        Ok(SagaEvent::CheckpointCreated {
            saga_id: self.id(),
            name: name.to_string(),
            phase: self.current_phase.clone(),
            progress: self.phase_progress,
        })
    }

    pub fn get_checkpoint(&self, name: &str) -> Option<&StateMap> {
        self.checkpoint_data.get(name).and_then(StateValue::as_map)
    }

    pub fn update_metrics(
        &mut self,
        items_processed: u64,
        items_failed: u64,
        phase_duration: Option<Duration>,
    ) -> Result<(), StateError> {
        self.ensure(Operation::Mutate)?;
        self.metrics
            .accumulate(items_processed, items_failed, phase_duration);
        self.header.touch();
        Ok(())
    }

    /// Returns `None` when the saga was already completed.
    pub fn complete(
        &mut self,
        final_metrics: Option<StateMap>,
    ) -> Result<Option<SagaEvent>, StateError> {
        if self.status == SagaStatus::Completed {
            return Ok(None);
        }
        self.ensure(Operation::Complete)?;
        self.transition(SagaStatus::Completed, Operation::Complete);
        let at = self.header.updated_at;
        self.completed_at = Some(at);
        self.phase_progress = 100;
        if let Some(extra) = final_metrics {
            self.metrics.custom.extend(extra);
        }
        Ok(Some(SagaEvent::Completed {
            saga_id: self.id(),
            at,
        }))
    }

    /// Returns `None` when the saga had already failed.
    pub fn fail(
        &mut self,
        message: impl Into<String>,
        stack_trace: Option<String>,
    ) -> Result<Option<SagaEvent>, StateError> {
        if self.status == SagaStatus::Failed {
            return Ok(None);
        }
        self.ensure(Operation::Fail)?;
        let message = message.into();
        self.transition(SagaStatus::Failed, Operation::Fail);
        let at = self.header.updated_at;
        self.completed_at = Some(at);
        self.error_message = Some(message.clone());
        self.error_stack_trace = stack_trace;
        self.metrics.failure_count += 1;
        Ok(Some(SagaEvent::Failed {
            saga_id: self.id(),
            message,
            at,
        }))
    }

    pub fn to_memento(&self) -> SagaMemento {
        SagaMemento {
            version: CHECKPOINT_VERSION,
            id: self.header.id,
            saga_type: self.saga_type.clone(),
            correlation_id: self.correlation_id.clone(),
            status: self.status,
            current_phase: self.current_phase.clone(),
            phase_progress: self.phase_progress,
            state_data: self.state_data.clone(),
            checkpoint_data: self.checkpoint_data.clone(),
            metrics: self.metrics.clone(),
            error_message: self.error_message.clone(),
            error_stack_trace: self.error_stack_trace.clone(),
            created_at: self.header.created_at,
            started_at: self.started_at,
            updated_at: self.header.updated_at,
            completed_at: self.completed_at,
            history: self.history.clone(),
        }
    }

    /// Rebuild a saga from its memento. No events, no field validation;
    /// only structural consistency is checked.
    pub fn reconstitute(memento: SagaMemento) -> Result<Self, CheckpointError> {
        let inconsistent = |reason: &str| CheckpointError::Inconsistent {
            saga_id: memento.id,
            reason: reason.to_string(),
        };
        if memento.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: memento.version,
                supported: CHECKPOINT_VERSION,
            });
        }
        if memento.phase_progress > 100 {
            return Err(inconsistent("phase progress above 100"));
        }
        if memento.status.is_final() != memento.completed_at.is_some() {
            return Err(inconsistent(
                "completed_at must be set exactly when the saga is terminal",
            ));
        }
        if memento.status != SagaStatus::Created && memento.started_at.is_none() {
            return Err(inconsistent("a started saga has no started_at"));
        }

        Ok(Self {
            header: RecordHeader::restore(memento.id, memento.created_at, memento.updated_at),
            saga_type: memento.saga_type,
            correlation_id: memento.correlation_id,
            status: memento.status,
            current_phase: memento.current_phase,
            phase_progress: memento.phase_progress,
            state_data: memento.state_data,
            checkpoint_data: memento.checkpoint_data,
            metrics: memento.metrics,
            error_message: memento.error_message,
            error_stack_trace: memento.error_stack_trace,
            started_at: memento.started_at,
            completed_at: memento.completed_at,
            history: memento.history,
        })
    }

    pub fn id(&self) -> Uuid {
        self.header.id
    }

    pub fn saga_type(&self) -> &str {
        &self.saga_type
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn status(&self) -> SagaStatus {
        self.status
    }

    pub fn is_completed(&self) -> bool {
        self.status == SagaStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == SagaStatus::Failed
    }

    pub fn current_phase(&self) -> &str {
        &self.current_phase
    }

    pub fn phase_progress(&self) -> u8 {
        self.phase_progress
    }

    pub fn state_data(&self) -> &StateMap {
        &self.state_data
    }

    pub fn checkpoint_data(&self) -> &StateMap {
        &self.checkpoint_data
    }

    pub fn metrics(&self) -> &SagaMetrics {
        &self.metrics
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn error_stack_trace(&self) -> Option<&str> {
        self.error_stack_trace.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.header.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.header.updated_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn history(&self) -> &StateHistory<SagaStatus> {
        &self.history
    }
}
