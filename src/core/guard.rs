//! Guard predicates that decide whether a lifecycle operation may run.

use super::state::State;
use std::marker::PhantomData;
use std::sync::Arc;

/// Pure predicate over a status.
///
/// The saga state machine keeps one guard per operation (`start`, `pause`,
/// `resume`, ...) and evaluates it against the current status before
/// mutating anything.
///
/// # Example
///
/// ```rust
/// use recipe_saga::core::Guard;
/// use recipe_saga::saga::SagaStatus;
///
/// let can_pause = Guard::new(|s: &SagaStatus| matches!(s, SagaStatus::Running));
///
/// assert!(can_pause.check(&SagaStatus::Running));
/// assert!(!can_pause.check(&SagaStatus::Created));
/// ```
pub struct Guard<S: State> {
    predicate: Arc<dyn Fn(&S) -> bool + Send + Sync>,
    _phantom: PhantomData<S>,
}

impl<S: State> Guard<S> {
    /// Create a guard from a predicate. The predicate must be deterministic.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&S) -> bool + Send + Sync + 'static,
    {
        Guard {
            predicate: Arc::new(predicate),
            _phantom: PhantomData,
        }
    }

    /// Guard that admits exactly the listed statuses.
    pub fn one_of(allowed: &[S]) -> Self
    where
        S: 'static,
    {
        let allowed = allowed.to_vec();
        Self::new(move |s| allowed.contains(s))
    }

    pub fn check(&self, state: &S) -> bool {
        (self.predicate)(state)
    }
}

impl<S: State> Clone for Guard<S> {
    fn clone(&self) -> Self {
        Self {
            predicate: Arc::clone(&self.predicate),
            _phantom: PhantomData,
        }
    }
}
