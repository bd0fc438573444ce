//! Recipe Saga: resumable, checkpointed recipe acquisition.
//!
//! A provider run discovers recipe pages, fingerprints their content,
//! extracts recipes and persists them. The whole run is a saga whose state
//! is written after every item, so a crashed process can reload it and carry
//! on without processing anything twice.
//!
//! # Core Concepts
//!
//! - **SagaState**: the persisted state machine (`Created → Running ⇄ Paused → Completed | Failed`)
//! - **RecipeBatch**: size- and time-bounded progress of one provider run
//! - **Fingerprint**: content hash and retry bookkeeping for one scrape
//! - **ErrorClassifier** / **RetryPolicy**: transient failures back off and retry, permanent ones are recorded
//! - **BatchCompletionPolicy**: decides when a batch has done enough
//!
//! Side effects live behind the traits in [`traits`]; everything else is pure.
//!
//! # Example
//!
//! ```rust
//! use recipe_saga::saga::{SagaState, SagaStatus};
//!
//! let mut saga = SagaState::create_for_recipe_processing("allrecipes-2024-06-01").unwrap();
//! saga.start().unwrap();
//! saga.update_progress("Discovering", 25, None).unwrap();
//! saga.update_progress("Persisting", 90, None).unwrap();
//! saga.complete(None).unwrap();
//!
//! assert_eq!(saga.status(), SagaStatus::Completed);
//! assert_eq!(saga.history().transitions().len(), 2);
//! ```

pub mod checkpoint;
pub mod core;
pub mod domain;
pub mod error;
pub mod policy;
pub mod rate_limit;
pub mod saga;
pub mod storage;
pub mod traits;
pub mod validation;

// Re-export commonly used types
pub use core::{Guard, State, StateHistory, StateMap, StateTransition, StateValue};
pub use error::{ItemError, SagaError};
pub use saga::{RecipeProcessingSaga, SagaConfig, SagaOutcome, SagaState};
