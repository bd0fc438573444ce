//! Aggregates the saga mutates: batches, fingerprints and recipes.

pub mod batch;
pub mod fingerprint;
pub mod recipe;

pub use batch::{BatchSnapshot, BatchStatus, RecipeBatch};
pub use fingerprint::{
    compute_content_hash, ContentQuality, Fingerprint, FingerprintStatus, MAX_RETRY_ATTEMPTS,
};
pub use recipe::{DiscoveredUrl, Recipe};
