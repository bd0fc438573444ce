//! The saga: its persisted state machine, ledger, configuration and the
//! orchestrator that drives a provider run.

pub mod config;
pub mod events;
pub mod ledger;
pub mod metrics;
pub mod orchestrator;
pub mod state;

pub use config::SagaConfig;
pub use events::{CollectingEventSink, EventSink, SagaEvent, TracingEventSink};
pub use ledger::{FailedUrlRecord, SagaLedger};
pub use metrics::SagaMetrics;
pub use orchestrator::{
    Phase, RecipeProcessingSaga, SagaDependencies, SagaOutcome, SagaReport,
};
pub use state::{SagaState, SagaStatus, RECIPE_PROCESSING_SAGA};
