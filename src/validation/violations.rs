//! Construction-time violations.

use thiserror::Error;

/// One failed construction rule.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Violation {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} exceeds {max} characters (got {actual})")]
    TooLong {
        field: &'static str,
        max: usize,
        actual: usize,
    },

    #[error("{field} is not a valid http(s) URL: {reason}")]
    InvalidUrl { field: &'static str, reason: String },

    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },

    #[error("{field} must be a finite number")]
    NotFinite { field: &'static str },

    #[error("{field} must be between {min} and {max} (got {actual})")]
    OutOfRange {
        field: &'static str,
        min: i64,
        max: i64,
        actual: i64,
    },
}

/// Every rule an entity violated when it was being built.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("invalid {entity}: {}", render(.violations))]
pub struct ValidationError {
    pub entity: &'static str,
    pub violations: Vec<Violation>,
}

impl ValidationError {
    pub fn has(&self, predicate: impl Fn(&Violation) -> bool) -> bool {
        self.violations.iter().any(predicate)
    }
}

fn render(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_every_violation() {
        let err = ValidationError {
            entity: "Fingerprint",
            violations: vec![
                Violation::Empty { field: "url" },
                Violation::TooLong {
                    field: "provider_name",
                    max: 100,
                    actual: 120,
                },
            ],
        };

        assert_eq!(
            err.to_string(),
            "invalid Fingerprint: url must not be empty; provider_name exceeds 100 characters (got 120)"
        );
    }
}
