//! Repository implementations.
//!
//! Only the in-memory backend ships with the crate; database backends
//! implement the traits in [`crate::traits`] out of tree.

pub mod memory;

pub use memory::{
    InMemoryBatchRepository, InMemoryFingerprintRepository, InMemoryRecipeRepository,
    InMemorySagaStateRepository,
};
