//! Hindsight: an in-process learning pipeline.
//!
//! Consumes a stream of raw interaction events (user messages, tool
//! invocations, outcomes) and distills them into durable, generalizable rules
//! of behavior. The pipeline is a chain of weak-signal detectors, a
//! per-session decision-record state machine, and a periodic distiller whose
//! candidates pass a memory gate before being persisted.
//!
//! All processing is fail-open: a broken detector, a malformed event, or an
//! unavailable store degrades to "skip and count", never to an error on the
//! hot path.

pub mod aggregator;
pub mod config;
pub mod detectors;
pub mod distiller;
pub mod engine;
pub mod event;
pub mod gate;
pub mod session;
pub mod signal;
pub mod stats;
pub mod step;
pub mod store;
pub(crate) mod text;

pub use aggregator::{Aggregator, KeywordFilter, StatementFilter};
pub use config::PipelineConfig;
pub use detectors::Detector;
pub use distiller::{Candidate, Distiller};
pub use engine::spawn_pipeline_loop;
pub use event::{EventKind, InteractionEvent};
pub use gate::{GateDecision, MemoryGate};
pub use signal::{DetectedSignal, SignalType};
pub use stats::StatsSnapshot;
pub use step::{Evaluation, Step};
pub use store::{Distillation, DistillationType, MemoryStore, SqliteStore, Store};

use thiserror::Error;

/// Pipeline errors.
#[derive(Debug, Error)]
pub enum HindsightError {
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("detector error: {0}")]
    Detector(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
