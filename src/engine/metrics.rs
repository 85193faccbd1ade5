//! Metrics publication and end-of-run reporting
//!
//! The loop publishes per-tick metrics to any number of [`MetricsSink`]s and
//! hands an immutable [`EngineSnapshot`] to observers at every tick boundary.
//! Observers only ever see whole ticks: the snapshot is swapped in atomically
//! as a new `Arc`, and readers load the `Arc` out without locking.

use anyhow::{Context, Result};
use arc_swap::ArcSwapOption;
use log::{debug, info};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use super::advisory::AdvisoryKind;
use super::coordinator::{LoopState, RunStatus};
use super::events::Event;
use super::scorer::{ScorePoint, ScoreStats};
use super::types::{Severity, Vehicle};

/// Published once per tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickMetrics {
    pub tick: u64,
    pub live_vehicle_count: usize,
    /// Advisories applied during this tick
    pub active_advisories: usize,
    pub current_safety_score: f64,
    pub new_events: Vec<Event>,
}

/// Published once when the run stops
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub total_ticks: u64,
    pub failed_ticks: u64,
    pub min_score: f64,
    pub max_score: f64,
    pub final_score: f64,
    pub event_counts_by_severity: BTreeMap<Severity, usize>,
    pub advisory_counts_by_kind: BTreeMap<AdvisoryKind, usize>,
    pub vehicles_seen: usize,
    pub status: RunStatus,
}

/// Consumer of engine metrics
pub trait MetricsSink {
    fn publish_tick(&mut self, metrics: &TickMetrics);

    fn publish_summary(&mut self, _summary: &RunSummary) {}
}

/// Writes metrics through the `log` facade
#[derive(Debug, Default)]
pub struct LogSink;

impl MetricsSink for LogSink {
    fn publish_tick(&mut self, metrics: &TickMetrics) {
        debug!(
            "tick={} vehicles={} advisories={} score={:.1} events={}",
            metrics.tick,
            metrics.live_vehicle_count,
            metrics.active_advisories,
            metrics.current_safety_score,
            metrics.new_events.len()
        );
    }

    fn publish_summary(&mut self, summary: &RunSummary) {
        info!("=== RUN COMPLETE ===");
        info!("Status: {:?}", summary.status);
        info!("Total ticks: {}", summary.total_ticks);
        info!("Failed ticks: {}", summary.failed_ticks);
        info!("Vehicles seen: {}", summary.vehicles_seen);
        info!(
            "Safety score: final {:.1} (min {:.1}, max {:.1})",
            summary.final_score, summary.min_score, summary.max_score
        );
        for (severity, count) in &summary.event_counts_by_severity {
            info!("Risk events ({}): {}", severity, count);
        }
        for (kind, count) in &summary.advisory_counts_by_kind {
            info!("Advisories ({}): {}", kind.as_str(), count);
        }
    }
}

/// Collects everything it is given; handy for inspection and tests
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub ticks: Arc<Mutex<Vec<TickMetrics>>>,
    pub summaries: Arc<Mutex<Vec<RunSummary>>>,
}

impl MemorySink {
    pub fn ticks(&self) -> Vec<TickMetrics> {
        self.ticks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn summary(&self) -> Option<RunSummary> {
        self.summaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

impl MetricsSink for MemorySink {
    fn publish_tick(&mut self, metrics: &TickMetrics) {
        self.ticks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(metrics.clone());
    }

    fn publish_summary(&mut self, summary: &RunSummary) {
        self.summaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(summary.clone());
    }
}

/// Immutable copy of engine state taken at a tick boundary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub state: LoopState,
    pub metrics: TickMetrics,
    pub score: ScoreStats,
    pub vehicles: Vec<Vehicle>,
    pub total_events: usize,
}

/// Producer half of the last-write-wins snapshot handoff
#[derive(Debug, Default)]
pub struct SnapshotPublisher {
    slot: Arc<ArcSwapOption<EngineSnapshot>>,
}

/// Observer half; cheap to clone and safe to move to another thread
///
/// Reads never take a lock, so an observer cannot stall the tick.
#[derive(Debug, Clone, Default)]
pub struct SnapshotReader {
    slot: Arc<ArcSwapOption<EngineSnapshot>>,
}

impl SnapshotPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            slot: Arc::clone(&self.slot),
        }
    }

    pub fn publish(&self, snapshot: EngineSnapshot) {
        self.slot.store(Some(Arc::new(snapshot)));
    }
}

impl SnapshotReader {
    /// Latest published snapshot, if any
    pub fn latest(&self) -> Option<Arc<EngineSnapshot>> {
        self.slot.load_full()
    }
}

/// Everything a report writer needs at the end of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub summary: RunSummary,
    pub score_history: Vec<ScorePoint>,
    pub events: Vec<Event>,
}

impl RunReport {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize run report")
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = self.to_json()?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        Ok(())
    }
}
