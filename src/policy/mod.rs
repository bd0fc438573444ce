//! Pure decision services used by the saga.
//!
//! - [`ErrorClassifier`]: transient or permanent?
//! - [`RetryPolicy`]: how long to back off, and whether to try again
//! - [`BatchCompletionPolicy`]: has the batch done enough?

pub mod classifier;
pub mod completion;
pub mod retry;

pub use classifier::{ErrorClass, ErrorClassifier};
pub use completion::{BatchCompletionPolicy, CompletionReason};
pub use retry::RetryPolicy;
