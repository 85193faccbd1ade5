//! Error taxonomy for the engine
//!
//! Only `FatalRun` ends a run. Every other variant is recovered from
//! locally and recorded in the event log.

use thiserror::Error;

/// Errors raised while processing a tick
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// A snapshot entry could not be turned into a vehicle state
    #[error("malformed snapshot entry '{entry}': {reason}")]
    MalformedInput { entry: String, reason: String },

    /// An advisory or assessment referred to an entity that is not live
    #[error("unknown entity '{entity}': {reason}")]
    UnknownEntity { entity: String, reason: String },

    /// The compute phase of a tick failed
    #[error("tick {tick} failed: {reason}")]
    TickFailure { tick: u64, reason: String },

    /// Consecutive tick failures exceeded the configured threshold
    #[error("run aborted after {consecutive} consecutive tick failures (limit {limit})")]
    FatalRun { consecutive: u32, limit: u32 },
}

impl EngineError {
    pub fn malformed(entry: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::MalformedInput {
            entry: entry.into(),
            reason: reason.into(),
        }
    }

    pub fn unknown(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::UnknownEntity {
            entity: entity.into(),
            reason: reason.into(),
        }
    }
}

/// Invalid engine configuration
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("'{field}' must be a finite positive number, got {value}")]
    NotPositive { field: &'static str, value: f64 },

    #[error("'{field}' must be finite and non-negative, got {value}")]
    Negative { field: &'static str, value: f64 },

    #[error("thresholds out of order: {0}")]
    Ordering(String),

    #[error("'{field}' is out of range: {reason}")]
    OutOfRange { field: &'static str, reason: String },

    #[error("duplicate RSU id '{0}'")]
    DuplicateRsu(String),

    #[error("RSU '{id}' is invalid: {reason}")]
    InvalidRsu { id: String, reason: String },
}
