//! Pure building blocks shared by the aggregates.
//!
//! - Status definitions via the `State` trait
//! - Guard predicates for lifecycle operations
//! - Immutable transition history
//! - Typed values for schema-less state maps
//! - The record header every aggregate embeds
//!
//! Nothing in this module performs I/O.

mod guard;
mod header;
mod history;
mod state;
mod value;

pub use guard::Guard;
pub use header::RecordHeader;
pub use history::{StateHistory, StateTransition};
pub use state::State;
pub use value::{StateMap, StateValue};
