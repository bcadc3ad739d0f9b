//! # trainguard-core: crash-resilient checkpoint/resume for epoch-based training
//!
//! Wraps an opaque, call-once training loop so that long runs survive process
//! restarts, resource exhaustion, manual termination and NaN/Inf divergence.
//! Each (architecture, split) run keeps two independent snapshot lineages,
//! `latest` and `best`, and a status ledger recording why it last stopped.
//!
//! ```text
//! CrossValidationRunner → SplitTrainer → TrainingOrchestrator
//!        → CheckpointPolicy → EventBus → SnapshotStore / StatusLedger
//! ```

// Foundation
pub mod config;
pub mod error;
pub mod persistence;

// Durable state
pub mod layout;
pub mod snapshot;
pub mod status;

// Epoch-level decisions
pub mod events;
pub mod policy;
pub mod scheduler;
pub mod terminate;

// Collaborators and results
pub mod collab;
pub mod metrics;
pub mod settings;

// Orchestration
pub mod cross_validation;
pub mod inspect;
pub mod orchestrator;
pub mod split;

// Re-exports
pub use collab::{
    Architecture, DataSplit, Dataset, EpochControl, EpochDirective, EpochHooks, FitPlan,
    LoopError, Model, Predictions, SampleSet, WeightSource,
};
pub use config::{TrainguardConfig, load_config};
pub use cross_validation::{CrossValidationOutcome, CrossValidationRunner};
pub use error::{Result, TrainguardError};
pub use events::{EventBus, EventHandler, PolicyEvent};
pub use layout::{RunIdentity, RunLayout, RunTarget};
pub use metrics::Evaluation;
pub use orchestrator::{TrainingOrchestrator, TrainingState};
pub use policy::{CheckpointPolicy, Direction, MonitorMode, infer_direction};
pub use scheduler::PlateauScheduler;
pub use settings::RunSettings;
pub use snapshot::{Lineage, Snapshot, SnapshotStore};
pub use split::SplitTrainer;
pub use status::{StatusLedger, TrainingStatus};
pub use terminate::TerminateOnDemand;
