//! Status transition history.
//!
//! Every status change of a saga is appended here and persisted with the
//! memento, so the audit trail survives a crash and a reconstitution.

use super::state::State;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One status change.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct StateTransition<S: State> {
    pub from: S,
    pub to: S,
    pub timestamp: DateTime<Utc>,
    /// Operation that caused the change (`"start"`, `"pause"`, `"fail"`, ...).
    pub trigger: String,
}

/// Ordered, append-only list of transitions.
///
/// `record` returns a new history and leaves the receiver untouched.
///
/// # Example
///
/// ```rust
/// use recipe_saga::core::{StateHistory, StateTransition};
/// use recipe_saga::saga::SagaStatus;
/// use chrono::Utc;
///
/// let history = StateHistory::new().record(StateTransition {
///     from: SagaStatus::Created,
///     to: SagaStatus::Running,
///     timestamp: Utc::now(),
///     trigger: "start".to_string(),
/// });
///
/// assert_eq!(history.get_path(), vec![&SagaStatus::Created, &SagaStatus::Running]);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct StateHistory<S: State> {
    transitions: Vec<StateTransition<S>>,
}

impl<S: State> Default for StateHistory<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: State> StateHistory<S> {
    pub fn new() -> Self {
        Self {
            transitions: Vec::new(),
        }
    }

    /// Record a transition, returning a new history.
    pub fn record(&self, transition: StateTransition<S>) -> Self {
        let mut transitions = self.transitions.clone();
        transitions.push(transition);
        Self { transitions }
    }

    /// Statuses traversed, starting with the first `from`.
    pub fn get_path(&self) -> Vec<&S> {
        let mut path = Vec::with_capacity(self.transitions.len() + 1);
        if let Some(first) = self.transitions.first() {
            path.push(&first.from);
        }
        for transition in &self.transitions {
            path.push(&transition.to);
        }
        path
    }

    /// Time between the first and the last transition.
    pub fn duration(&self) -> Option<Duration> {
        let (first, last) = (self.transitions.first()?, self.transitions.last()?);
        last.timestamp
            .signed_duration_since(first.timestamp)
            .to_std()
            .ok()
    }

    pub fn last(&self) -> Option<&StateTransition<S>> {
        self.transitions.last()
    }

    pub fn transitions(&self) -> &[StateTransition<S>] {
        &self.transitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
    enum Step {
        Queued,
        Working,
        Done,
    }

    impl State for Step {
        fn name(&self) -> &str {
            match self {
                Self::Queued => "Queued",
                Self::Working => "Working",
                Self::Done => "Done",
            }
        }
    }

    fn transition(from: Step, to: Step, trigger: &str) -> StateTransition<Step> {
        StateTransition {
            from,
            to,
            timestamp: Utc::now(),
            trigger: trigger.to_string(),
        }
    }

    #[test]
    fn empty_history_has_no_path() {
        let history: StateHistory<Step> = StateHistory::new();
        assert!(history.get_path().is_empty());
        assert!(history.duration().is_none());
        assert!(history.last().is_none());
    }

    #[test]
    fn record_leaves_original_untouched() {
        let history = StateHistory::new();
        let next = history.record(transition(Step::Queued, Step::Working, "start"));

        assert_eq!(history.transitions().len(), 0);
        assert_eq!(next.transitions().len(), 1);
        assert_eq!(next.last().map(|t| t.trigger.as_str()), Some("start"));
    }

    #[test]
    fn path_follows_recorded_order() {
        let history = StateHistory::new()
            .record(transition(Step::Queued, Step::Working, "start"))
            .record(transition(Step::Working, Step::Done, "complete"));

        assert_eq!(
            history.get_path(),
            vec![&Step::Queued, &Step::Working, &Step::Done]
        );
    }

    #[test]
    fn duration_spans_first_to_last() {
        let start = Utc::now();
        let history = StateHistory::new()
            .record(StateTransition {
                from: Step::Queued,
                to: Step::Working,
                timestamp: start,
                trigger: "start".into(),
            })
            .record(StateTransition {
                from: Step::Working,
                to: Step::Done,
                timestamp: start + chrono::Duration::seconds(3),
                trigger: "complete".into(),
            });

        assert_eq!(history.duration(), Some(Duration::from_secs(3)));
    }
}
