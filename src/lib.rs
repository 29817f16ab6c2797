//! Wellspring - On-device wellbeing pipeline for wearable health data
//!
//! Wellspring turns raw health-store samples into a daily wellbeing score
//! through a deterministic pipeline: sample ingestion → daily aggregation →
//! robust baselines → feature bundling → online scoring, with a coverage gate
//! deciding when retrieved context is solid enough to ground a response.
//!
//! ## Modules
//!
//! - **Ingestion**: bootstrap, retry, backfill, and live observation of the
//!   platform health store
//! - **Engine**: the single-writer actor owning every daily record, baseline,
//!   and feature vector

pub mod aggregator;
pub mod baseline;
pub mod config;
pub mod coverage;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod features;
pub mod harness;
pub mod ingest;
pub mod source;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::{PipelineConfig, TargetWeights};
pub use engine::{Engine, EngineHandle};
pub use error::PipelineError;
pub use ingest::IngestController;

// Collaborator seams
pub use coverage::{CoverageDecision, CoverageGate, CoverageKind, Retrieval};
pub use source::{AccessStatus, DateRange, HealthSource, SampleDelivery};
pub use store::{MemoryStore, Store};

/// Wellspring version embedded in diagnostics.
pub const WELLSPRING_VERSION: &str = env!("CARGO_PKG_VERSION");
