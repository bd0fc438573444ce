//! Transient / permanent classification of item failures.

use crate::error::{FailureKind, ItemError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Environment or network trouble; worth retrying.
    Transient,
    /// Bad data or logic; retrying cannot help.
    Permanent,
}

/// Stateless mapping from a failure to its class.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn classify(&self, error: &ItemError) -> ErrorClass {
        Self::classify_kind(error.kind)
    }

    /// Unknown kinds are permanent so an unrecognised failure can never
    /// loop through the retry path forever.
    pub fn classify_kind(kind: FailureKind) -> ErrorClass {
        match kind {
            FailureKind::Connection
            | FailureKind::Timeout
            | FailureKind::Socket
            | FailureKind::Io => ErrorClass::Transient,
            FailureKind::MalformedData
            | FailureKind::MissingField
            | FailureKind::InvalidArgument
            | FailureKind::InvalidOperation
            | FailureKind::Blocked
            | FailureKind::Other => ErrorClass::Permanent,
        }
    }

    pub fn is_transient(&self, error: &ItemError) -> bool {
        self.classify(error) == ErrorClass::Transient
    }
}
