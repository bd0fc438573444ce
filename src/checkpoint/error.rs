//! Checkpoint error types.

use thiserror::Error;

/// Errors raised while encoding, decoding or reconstituting a memento.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CheckpointError {
    #[error("failed to encode {format} memento: {reason}")]
    SerializationFailed { format: &'static str, reason: String },

    #[error("failed to decode {format} memento: {reason}")]
    DeserializationFailed { format: &'static str, reason: String },

    #[error("unsupported memento version {found}, supported: {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// Decoded fine, but the fields contradict each other.
    #[error("memento for saga {saga_id} is inconsistent: {reason}")]
    Inconsistent { saga_id: uuid::Uuid, reason: String },
}
