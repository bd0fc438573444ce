//! Error types shared across the crate.

use crate::checkpoint::CheckpointError;
use crate::validation::ValidationError;
use thiserror::Error;

/// Illegal lifecycle operation on an aggregate.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StateError {
    #[error("cannot {operation} {entity} while it is {status}")]
    InvalidTransition {
        entity: &'static str,
        operation: &'static str,
        status: String,
    },

    #[error("progress must be between 0 and 100 (got {0})")]
    ProgressOutOfRange(i64),

    #[error("checkpoint name must not be empty")]
    EmptyCheckpointName,

    #[error("fingerprint {0} has already been processed")]
    AlreadyProcessed(uuid::Uuid),

    #[error("fingerprint {0} did not complete successfully")]
    NotSuccessful(uuid::Uuid),

    #[error("fingerprint {0} has not been processed yet")]
    NotProcessed(uuid::Uuid),

    #[error("fingerprint {id} cannot be retried (status {status}, {retry_count} retries used)")]
    RetryNotAllowed {
        id: uuid::Uuid,
        status: String,
        retry_count: u32,
    },
}

/// Category of a collaborator failure, used by the error classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    // network layer
    Connection,
    Timeout,
    Socket,
    Io,
    // data layer
    MalformedData,
    MissingField,
    InvalidArgument,
    InvalidOperation,
    /// Anti-bot wall or explicit block by the provider.
    Blocked,
    Other,
}

impl FailureKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connection => "ConnectionError",
            Self::Timeout => "TimeoutError",
            Self::Socket => "SocketError",
            Self::Io => "IoError",
            Self::MalformedData => "MalformedDataError",
            Self::MissingField => "MissingFieldError",
            Self::InvalidArgument => "InvalidArgumentError",
            Self::InvalidOperation => "InvalidOperationError",
            Self::Blocked => "BlockedError",
            Self::Other => "UnknownError",
        }
    }
}

/// Failure of a single item: a fetch, an extraction or a per-item write.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{}: {message}", .kind.name())]
pub struct ItemError {
    pub kind: FailureKind,
    pub message: String,
}

impl ItemError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Connection, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(FailureKind::MalformedData, message)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            FailureKind::MissingField,
            format!("required field '{field}' is missing"),
        )
    }
}

impl From<std::io::Error> for ItemError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        let kind = match err.kind() {
            ErrorKind::TimedOut => FailureKind::Timeout,
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected => FailureKind::Connection,
            ErrorKind::BrokenPipe | ErrorKind::AddrInUse | ErrorKind::AddrNotAvailable => {
                FailureKind::Socket
            }
            ErrorKind::InvalidInput => FailureKind::InvalidArgument,
            ErrorKind::InvalidData => FailureKind::MalformedData,
            _ => FailureKind::Io,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<ValidationError> for ItemError {
    fn from(err: ValidationError) -> Self {
        Self::new(FailureKind::InvalidArgument, err.to_string())
    }
}

impl From<StateError> for ItemError {
    fn from(err: StateError) -> Self {
        Self::new(FailureKind::InvalidOperation, err.to_string())
    }
}

/// Failure reported by a repository.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RepositoryError {
    #[error("{entity} {id} already exists")]
    Duplicate { entity: &'static str, id: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Errors that end a saga run.
#[derive(Debug, Error)]
pub enum SagaError {
    #[error("saga configuration is invalid: {0}")]
    Configuration(#[from] ValidationError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("URL discovery failed: {0}")]
    Discovery(ItemError),

    #[error("saga {id} is already {status} and cannot be run again")]
    AlreadyFinished { id: uuid::Uuid, status: String },

    #[error("saga ledger is inconsistent: {0}")]
    Ledger(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_failure_kinds() {
        let timeout: ItemError = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow").into();
        assert_eq!(timeout.kind, FailureKind::Timeout);

        let refused: ItemError =
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "nope").into();
        assert_eq!(refused.kind, FailureKind::Connection);

        let bad: ItemError = std::io::Error::new(std::io::ErrorKind::InvalidData, "bad").into();
        assert_eq!(bad.kind, FailureKind::MalformedData);

        let other: ItemError = std::io::Error::other("disk").into();
        assert_eq!(other.kind, FailureKind::Io);
    }

    #[test]
    fn item_error_display_names_the_kind() {
        let err = ItemError::missing_field("recipeIngredient");
        assert_eq!(
            err.to_string(),
            "MissingFieldError: required field 'recipeIngredient' is missing"
        );
    }
}
