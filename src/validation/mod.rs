//! Construction-time validation for the aggregates.
//!
//! Rules return Stillwater's `Validation` so that building an entity reports
//! every broken rule at once instead of stopping at the first one.
//!
//! # Example
//!
//! ```rust
//! use recipe_saga::validation::{rules, Violation};
//!
//! let err = rules::validate(
//!     "RecipeBatch",
//!     vec![rules::non_empty("provider_id", ""), rules::positive("batch_size", 0)],
//! )
//! .unwrap_err();
//!
//! assert_eq!(err.violations.len(), 2);
//! assert!(err.has(|v| matches!(v, Violation::NotPositive { .. })));
//! ```

pub mod rules;
pub mod violations;

pub use violations::{ValidationError, Violation};
