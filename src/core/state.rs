//! Status trait shared by every lifecycle in the crate.
//!
//! Saga, batch and fingerprint statuses all implement [`State`], which gives
//! the orchestrator a uniform way to name a status in logs and to ask whether
//! it is terminal.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Trait for lifecycle statuses.
///
/// All methods are pure. A status is an immutable value describing where an
/// aggregate currently sits in its lifecycle.
///
/// # Example
///
/// ```rust
/// use recipe_saga::core::State;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
/// enum ImportStatus {
///     Queued,
///     Importing,
///     Imported,
///     Rejected,
/// }
///
/// impl State for ImportStatus {
///     fn name(&self) -> &str {
///         match self {
///             Self::Queued => "Queued",
///             Self::Importing => "Importing",
///             Self::Imported => "Imported",
///             Self::Rejected => "Rejected",
///         }
///     }
///
///     fn is_final(&self) -> bool {
///         matches!(self, Self::Imported | Self::Rejected)
///     }
///
///     fn is_error(&self) -> bool {
///         matches!(self, Self::Rejected)
///     }
/// }
///
/// assert!(ImportStatus::Rejected.is_final());
/// ```
pub trait State:
    Clone + PartialEq + Debug + Serialize + for<'de> Deserialize<'de> + Send + Sync
{
    /// Stable display name, used as the persisted tag and in log fields.
    fn name(&self) -> &str;

    /// Terminal statuses accept no further transitions.
    ///
    /// Default implementation returns `false`.
    fn is_final(&self) -> bool {
        false
    }

    /// Failure statuses. Usually also final, but this is not enforced.
    ///
    /// Default implementation returns `false`.
    fn is_error(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
    enum RunStatus {
        Queued,
        Running,
        Done,
        Crashed,
    }

    impl State for RunStatus {
        fn name(&self) -> &str {
            match self {
                Self::Queued => "Queued",
                Self::Running => "Running",
                Self::Done => "Done",
                Self::Crashed => "Crashed",
            }
        }

        fn is_final(&self) -> bool {
            matches!(self, Self::Done | Self::Crashed)
        }

        fn is_error(&self) -> bool {
            matches!(self, Self::Crashed)
        }
    }

    #[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
    enum Plain {
        Only,
    }

    impl State for Plain {
        fn name(&self) -> &str {
            "Only"
        }
    }

    #[test]
    fn defaults_are_non_terminal() {
        assert!(!Plain::Only.is_final());
        assert!(!Plain::Only.is_error());
    }

    #[test]
    fn terminal_and_error_flags() {
        assert!(!RunStatus::Queued.is_final());
        assert!(!RunStatus::Running.is_final());
        assert!(RunStatus::Done.is_final());
        assert!(!RunStatus::Done.is_error());
        assert!(RunStatus::Crashed.is_final());
        assert!(RunStatus::Crashed.is_error());
    }

    #[test]
    fn status_survives_json() {
        let json = serde_json::to_string(&RunStatus::Running).unwrap();
        let back: RunStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RunStatus::Running);
        assert_eq!(back.name(), "Running");
    }
}
