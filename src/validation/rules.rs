//! Field rules, each returning a `Validation` so failures accumulate.

use crate::validation::violations::{ValidationError, Violation};
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;
use url::Url;

/// Outcome of one field rule.
pub type Check = Validation<(), NonEmptyVec<Violation>>;

pub const MAX_URL_LENGTH: usize = 2048;
pub const MAX_PROVIDER_NAME_LENGTH: usize = 100;
pub const MAX_SAGA_TYPE_LENGTH: usize = 100;
pub const MAX_CORRELATION_ID_LENGTH: usize = 200;
pub const MAX_TITLE_LENGTH: usize = 500;

pub fn non_empty(field: &'static str, value: &str) -> Check {
    if value.trim().is_empty() {
        Validation::fail(Violation::Empty { field })
    } else {
        Validation::success(())
    }
}

/// Empty values pass; pair with [`non_empty`] when the field is required.
pub fn max_len(field: &'static str, value: &str, max: usize) -> Check {
    let actual = value.chars().count();
    if actual > max {
        Validation::fail(Violation::TooLong { field, max, actual })
    } else {
        Validation::success(())
    }
}

pub fn http_url(field: &'static str, value: &str) -> Check {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Validation::success(()),
        Ok(url) => Validation::fail(Violation::InvalidUrl {
            field,
            reason: format!("unsupported scheme '{}'", url.scheme()),
        }),
        Err(e) => Validation::fail(Violation::InvalidUrl {
            field,
            reason: e.to_string(),
        }),
    }
}

pub fn positive(field: &'static str, value: i64) -> Check {
    if value > 0 {
        Validation::success(())
    } else {
        Validation::fail(Violation::NotPositive { field })
    }
}

pub fn finite(field: &'static str, value: f64) -> Check {
    if value.is_finite() {
        Validation::success(())
    } else {
        Validation::fail(Violation::NotFinite { field })
    }
}

pub fn in_range(field: &'static str, value: i64, min: i64, max: i64) -> Check {
    if (min..=max).contains(&value) {
        Validation::success(())
    } else {
        Validation::fail(Violation::OutOfRange {
            field,
            min,
            max,
            actual: value,
        })
    }
}

/// Required http(s) URL within the length limit.
pub fn required_url(field: &'static str, value: &str) -> Vec<Check> {
    if value.trim().is_empty() {
        return vec![non_empty(field, value)];
    }
    vec![max_len(field, value, MAX_URL_LENGTH), http_url(field, value)]
}

/// Collapse all checks into a `Result`, keeping every violation.
pub fn validate(entity: &'static str, checks: Vec<Check>) -> Result<(), ValidationError> {
    match Validation::all_vec(checks).map(|_| ()) {
        Validation::Success(()) => Ok(()),
        Validation::Failure(errors) => Err(ValidationError {
            entity,
            violations: errors.iter().cloned().collect(),
        }),
    }
}
