//! Safety coordination engine
//!
//! Observes a traffic simulation through [`SimulatorInterface`], assesses
//! collision risk inside RSU zones, issues advisories back to the simulator
//! and keeps a rolling safety score. Everything here runs headless and is
//! driven one tick at a time by [`CoordinationLoop`].

mod advisory;
mod config;
mod coordinator;
mod error;
mod events;
mod metrics;
mod registry;
mod risk;
mod scorer;
mod simulator;
mod types;

pub use advisory::{
    response_for, Advisory, AdvisoryAction, AdvisoryBatch, AdvisoryGenerator, AdvisoryId,
    AdvisoryKind, AdvisoryTarget, Issuer, Response, SpeedCap, Suppression, SuppressionReason,
};
pub use config::{EngineConfig, RsuConfig, SafetyConfig};
pub use coordinator::{CoordinationLoop, LoopState, RunContext, RunStatus, StopHandle, TickOutcome};
pub use error::{ConfigError, EngineError};
pub use events::{EntityRef, Event, EventId, EventKind, EventLog};
pub use metrics::{
    EngineSnapshot, LogSink, MemorySink, MetricsSink, RunReport, RunSummary, SnapshotPublisher,
    SnapshotReader, TickMetrics,
};
pub use registry::{EntityRegistry, RegistryUpdate};
pub use risk::{
    classify, project_pair, PairKinematics, RiskAssessment, RiskEvaluator, RiskSet, RiskSubject,
    ZoneSummary,
};
pub use scorer::{SafetyScorer, ScorePoint, ScoreStats};
pub use simulator::{ApplyOutcome, ScriptedSimulator, SimulatorInterface, Snapshot, VehicleReport};
pub use types::{
    Position, Rsu, RsuId, Severity, SignalHandle, Vehicle, VehicleId, VehicleKind, Velocity,
};
