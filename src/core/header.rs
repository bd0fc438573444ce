//! Identity and timestamps embedded in every aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Common record header. Aggregates embed it instead of inheriting it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordHeader {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecordHeader {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Header for a record loaded from storage.
    pub fn restore(id: Uuid, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at,
            updated_at,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Default for RecordHeader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_header_has_matching_timestamps() {
        let header = RecordHeader::new();
        assert_eq!(header.created_at, header.updated_at);
    }

    #[test]
    fn touch_moves_updated_at_only() {
        let mut header = RecordHeader::new();
        let created = header.created_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        header.touch();
        assert_eq!(header.created_at, created);
        assert!(header.updated_at > created);
    }
}
