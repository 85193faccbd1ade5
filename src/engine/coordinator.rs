//! The per-tick coordination loop
//!
//! One tick runs to completion before the next starts:
//! snapshot → registry → risk → advisories → apply → score → publish.
//! All mutable run state lives in [`RunContext`], owned by the loop and
//! touched only inside a tick. A stop request is honoured at the next tick
//! boundary, never mid-tick.

use log::{error, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::advisory::{AdvisoryBatch, AdvisoryGenerator, AdvisoryKind, AdvisoryTarget};
use super::config::{EngineConfig, SafetyConfig};
use super::error::{ConfigError, EngineError};
use super::events::{EntityRef, EventKind, EventLog};
use super::metrics::{
    EngineSnapshot, MetricsSink, RunReport, RunSummary, SnapshotPublisher, SnapshotReader,
    TickMetrics,
};
use super::registry::EntityRegistry;
use super::risk::{RiskEvaluator, RiskSubject};
use super::scorer::SafetyScorer;
use super::simulator::{ApplyOutcome, SimulatorInterface};
use super::types::Severity;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The simulator reported end of run
    Completed,
    /// An explicit stop was requested
    StopRequested,
    /// Too many consecutive tick failures
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Running,
    /// Observing only: risk and score are updated, no advisories are issued
    Paused,
    Stopped(RunStatus),
}

/// Cross-thread stop request, honoured at the next tick boundary
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of one call to [`CoordinationLoop::step`]
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Completed(TickMetrics),
    /// The tick failed but the run continues
    Failed { tick: u64, error: EngineError },
    /// The loop is (now) stopped; no tick was executed
    Stopped(RunStatus),
    /// `start` has not been called yet
    NotStarted,
}

/// All mutable state of one run
#[derive(Debug)]
pub struct RunContext {
    pub registry: EntityRegistry,
    pub evaluator: RiskEvaluator,
    pub generator: AdvisoryGenerator,
    pub scorer: SafetyScorer,
    pub log: EventLog,
    tick: u64,
    failed_ticks: u64,
    consecutive_failures: u32,
    vehicles_seen: usize,
    advisory_counts: BTreeMap<AdvisoryKind, usize>,
    last_sim_tick: Option<u64>,
}

impl RunContext {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            registry: EntityRegistry::new(config.build_rsus()),
            evaluator: RiskEvaluator::new(config.safety.clone()),
            generator: AdvisoryGenerator::new(config.safety.clone()),
            scorer: SafetyScorer::new(&config.safety),
            log: EventLog::new(),
            tick: 0,
            failed_ticks: 0,
            consecutive_failures: 0,
            vehicles_seen: 0,
            advisory_counts: BTreeMap::new(),
            last_sim_tick: None,
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn failed_ticks(&self) -> u64 {
        self.failed_ticks
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn advisory_counts(&self) -> &BTreeMap<AdvisoryKind, usize> {
        &self.advisory_counts
    }
}

/// Event waiting for the tick to succeed before it is committed
struct StagedEvent {
    kind: EventKind,
    entities: Vec<EntityRef>,
    severity: Severity,
    advisories: Vec<super::advisory::AdvisoryId>,
}

impl StagedEvent {
    fn plain(kind: EventKind, entities: Vec<EntityRef>) -> Self {
        Self {
            kind,
            entities,
            severity: Severity::None,
            advisories: Vec::new(),
        }
    }
}

pub struct CoordinationLoop<S: SimulatorInterface> {
    config: SafetyConfig,
    simulator: S,
    context: RunContext,
    state: LoopState,
    sinks: Vec<Box<dyn MetricsSink>>,
    publisher: SnapshotPublisher,
    stop: StopHandle,
    summary: Option<RunSummary>,
}

impl<S: SimulatorInterface> CoordinationLoop<S> {
    pub fn new(config: EngineConfig, simulator: S) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            context: RunContext::new(&config),
            config: config.safety,
            simulator,
            state: LoopState::Idle,
            sinks: Vec::new(),
            publisher: SnapshotPublisher::new(),
            stop: StopHandle::default(),
            summary: None,
        })
    }

    pub fn with_sink(mut self, sink: impl MetricsSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Start from a non-baseline safety score
    pub fn with_initial_score(mut self, score: f64) -> Self {
        self.context.scorer = SafetyScorer::new(&self.config).with_initial_score(score);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn events(&self) -> &EventLog {
        &self.context.log
    }

    pub fn score(&self) -> f64 {
        self.context.scorer.current()
    }

    pub fn simulator(&self) -> &S {
        &self.simulator
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn snapshot_reader(&self) -> SnapshotReader {
        self.publisher.reader()
    }

    pub fn start(&mut self) {
        match self.state {
            LoopState::Idle => {
                info!("Coordination loop running");
                self.state = LoopState::Running;
            }
            LoopState::Stopped(_) => warn!("Cannot start a stopped run"),
            LoopState::Running | LoopState::Paused => {}
        }
    }

    pub fn pause(&mut self) {
        if self.state == LoopState::Running {
            info!("Coordination loop paused; advisories suspended");
            self.state = LoopState::Paused;
        }
    }

    pub fn resume(&mut self) {
        if self.state == LoopState::Paused {
            info!("Coordination loop resumed");
            self.state = LoopState::Running;
        }
    }

    pub fn request_stop(&self) {
        self.stop.request_stop();
    }

    /// Execute one tick, or reach `Stopped` at this boundary
    ///
    /// Returns `Err(EngineError::FatalRun)` when this tick pushed consecutive
    /// failures past the configured limit; the loop is stopped by then.
    pub fn step(&mut self) -> Result<TickOutcome, EngineError> {
        match self.state {
            LoopState::Idle => return Ok(TickOutcome::NotStarted),
            LoopState::Stopped(status) => return Ok(TickOutcome::Stopped(status)),
            LoopState::Running | LoopState::Paused => {}
        }

        if self.stop.is_requested() {
            self.finish(RunStatus::StopRequested);
            return Ok(TickOutcome::Stopped(RunStatus::StopRequested));
        }
        if self.simulator.is_run_complete() {
            self.finish(RunStatus::Completed);
            return Ok(TickOutcome::Stopped(RunStatus::Completed));
        }

        let started = Instant::now();
        self.context.tick += 1;
        let tick = self.context.tick;
        let log_start = self.context.log.len();
        let advise = self.state == LoopState::Running;

        let result = self.process_tick(tick, advise);
        let applied = match &result {
            Ok(applied) => {
                self.context.consecutive_failures = 0;
                *applied
            }
            Err(err) => {
                self.context.failed_ticks += 1;
                self.context.consecutive_failures += 1;
                error!(
                    "Tick {} failed ({} consecutive): {}",
                    tick, self.context.consecutive_failures, err
                );
                self.context.log.record(
                    tick,
                    EventKind::TickFailure {
                        reason: err.to_string(),
                    },
                    Vec::new(),
                    Severity::None,
                    Vec::new(),
                );
                0
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if self.config.tick_budget_ms > 0 && elapsed_ms > self.config.tick_budget_ms {
            warn!(
                "Tick {} took {} ms, over the {} ms budget",
                tick, elapsed_ms, self.config.tick_budget_ms
            );
            self.context.log.record(
                tick,
                EventKind::DegradedPerformance {
                    elapsed_ms,
                    budget_ms: self.config.tick_budget_ms,
                },
                Vec::new(),
                Severity::None,
                Vec::new(),
            );
        }

        let metrics = TickMetrics {
            tick,
            live_vehicle_count: self.context.registry.vehicle_count(),
            active_advisories: applied,
            current_safety_score: self.context.scorer.current(),
            new_events: self.context.log.since(log_start).to_vec(),
        };
        self.publish(&metrics);

        match result {
            Ok(_) => Ok(TickOutcome::Completed(metrics)),
            Err(error) => {
                let limit = self.config.max_consecutive_failures;
                let consecutive = self.context.consecutive_failures;
                if consecutive > limit {
                    let fatal = EngineError::FatalRun { consecutive, limit };
                    error!("{}", fatal);
                    self.finish(RunStatus::Fatal);
                    return Err(fatal);
                }
                Ok(TickOutcome::Failed { tick, error })
            }
        }
    }

    /// Compute phase of a tick; returns the number of advisories applied
    fn process_tick(&mut self, tick: u64, advise: bool) -> Result<usize, EngineError> {
        let snapshot = self
            .simulator
            .snapshot()
            .map_err(|e| EngineError::TickFailure {
                tick,
                reason: format!("snapshot unavailable: {:#}", e),
            })?;

        if let Some(last) = self.context.last_sim_tick {
            if snapshot.tick <= last {
                return Err(EngineError::TickFailure {
                    tick,
                    reason: format!(
                        "stale snapshot: simulator tick {} after {}",
                        snapshot.tick, last
                    ),
                });
            }
        }
        self.context.last_sim_tick = Some(snapshot.tick);

        let update = self.context.registry.update(&snapshot);
        self.context.vehicles_seen += update.entered.len();

        let mut staged: Vec<StagedEvent> = update
            .rejected
            .iter()
            .map(|err| {
                let entry = match err {
                    EngineError::MalformedInput { entry, .. } => entry.clone(),
                    other => other.to_string(),
                };
                StagedEvent::plain(
                    EventKind::MalformedInput {
                        reason: err.to_string(),
                    },
                    vec![EntityRef::Raw(entry)],
                )
            })
            .collect();

        let risks = self.context.evaluator.evaluate(&self.context.registry);
        let batch = if advise {
            self.context
                .generator
                .generate(&risks, &self.context.registry, tick)
        } else {
            self.context.generator.retain_live(&self.context.registry);
            AdvisoryBatch::default()
        };

        let mut applied = HashSet::new();
        let mut applied_counts: BTreeMap<AdvisoryKind, usize> = BTreeMap::new();
        for advisory in &batch.advisories {
            if let AdvisoryTarget::Vehicle(id) = &advisory.target {
                if !self.context.registry.is_live(id) {
                    let err = EngineError::unknown(id.0.clone(), "advisory target departed");
                    warn!("{}", err);
                    staged.push(StagedEvent::plain(
                        EventKind::UnknownEntity {
                            reason: err.to_string(),
                        },
                        vec![EntityRef::Vehicle(id.clone())],
                    ));
                    continue;
                }
            }

            match self.simulator.apply_advisory(advisory) {
                Ok(ApplyOutcome::Applied) => {
                    applied.insert(advisory.id);
                    *applied_counts.entry(advisory.kind()).or_insert(0) += 1;
                }
                Ok(ApplyOutcome::UnknownTarget) => {
                    let err = EngineError::unknown(
                        advisory.target_label(),
                        "simulator does not know the advisory target",
                    );
                    warn!("{}", err);
                    staged.push(StagedEvent::plain(
                        EventKind::UnknownEntity {
                            reason: err.to_string(),
                        },
                        vec![EntityRef::Raw(advisory.target_label())],
                    ));
                }
                Err(e) => {
                    return Err(EngineError::TickFailure {
                        tick,
                        reason: format!("failed to apply {}: {:#}", advisory.id, e),
                    });
                }
            }
        }

        for err in &batch.dropped {
            let entity = match err {
                EngineError::UnknownEntity { entity, .. } => entity.clone(),
                other => other.to_string(),
            };
            staged.push(StagedEvent::plain(
                EventKind::UnknownEntity {
                    reason: err.to_string(),
                },
                vec![EntityRef::Raw(entity)],
            ));
        }

        for (index, assessment) in risks.assessments.iter().enumerate() {
            let advisories: Vec<_> = batch
                .by_assessment
                .get(&index)
                .map(|ids| ids.iter().copied().filter(|id| applied.contains(id)).collect())
                .unwrap_or_default();
            let suppressed = advisories.is_empty();
            let kind = match assessment.subject {
                RiskSubject::Pair(..) => EventKind::RiskDetected {
                    rsu: assessment.rsu.clone(),
                    suppressed,
                },
                RiskSubject::Zone(..) => EventKind::ZoneRisk {
                    rsu: assessment.rsu.clone(),
                    suppressed,
                },
            };
            staged.push(StagedEvent {
                kind,
                entities: assessment
                    .subject
                    .vehicles()
                    .into_iter()
                    .map(|id| EntityRef::Vehicle(id.clone()))
                    .collect(),
                severity: assessment.severity,
                advisories,
            });
        }

        for (rsu, advisory_id) in &batch.signal_changes {
            if !applied.contains(advisory_id) {
                continue;
            }
            let severity = risks.zone(rsu).map(|z| z.worst).unwrap_or_default();
            staged.push(StagedEvent {
                kind: EventKind::SignalChange { rsu: rsu.clone() },
                entities: vec![EntityRef::Rsu(rsu.clone())],
                severity,
                advisories: vec![*advisory_id],
            });
        }

        // Commit point: nothing below can fail the tick
        for (kind, count) in applied_counts {
            *self.context.advisory_counts.entry(kind).or_insert(0) += count;
        }
        let log_start = self.context.log.len();
        for event in staged {
            self.context.log.record(
                tick,
                event.kind,
                event.entities,
                event.severity,
                event.advisories,
            );
        }
        self.context
            .scorer
            .record(tick, self.context.log.since(log_start));

        Ok(applied.len())
    }

    fn publish(&mut self, metrics: &TickMetrics) {
        for sink in &mut self.sinks {
            sink.publish_tick(metrics);
        }
        self.publisher.publish(EngineSnapshot {
            state: self.state,
            metrics: metrics.clone(),
            score: self.context.scorer.stats(),
            vehicles: self.context.registry.vehicles().cloned().collect(),
            total_events: self.context.log.len(),
        });
    }

    /// Transition to `Stopped`: flush the log, publish the summary and
    /// release the simulator. Idempotent.
    pub fn finish(&mut self, status: RunStatus) {
        if let LoopState::Stopped(_) = self.state {
            return;
        }

        let tick = self.context.tick;
        self.context.log.record(
            tick,
            EventKind::RunStopped { status },
            Vec::new(),
            Severity::None,
            Vec::new(),
        );
        self.state = LoopState::Stopped(status);
        info!("Coordination loop stopped at tick {} ({:?})", tick, status);

        let summary = self.build_summary(status);
        for sink in &mut self.sinks {
            sink.publish_summary(&summary);
        }
        self.publisher.publish(EngineSnapshot {
            state: self.state,
            metrics: TickMetrics {
                tick,
                live_vehicle_count: self.context.registry.vehicle_count(),
                active_advisories: 0,
                current_safety_score: self.context.scorer.current(),
                new_events: self.context.log.since(self.context.log.len() - 1).to_vec(),
            },
            score: self.context.scorer.stats(),
            vehicles: self.context.registry.vehicles().cloned().collect(),
            total_events: self.context.log.len(),
        });
        self.summary = Some(summary);
        self.simulator.close();
    }

    fn build_summary(&self, status: RunStatus) -> RunSummary {
        let stats = self.context.scorer.stats();
        let mut advisory_counts = BTreeMap::new();
        for kind in [
            AdvisoryKind::SpeedLimit,
            AdvisoryKind::SignalChange,
            AdvisoryKind::Alert,
        ] {
            advisory_counts.insert(
                kind,
                self.context.advisory_counts.get(&kind).copied().unwrap_or(0),
            );
        }
        RunSummary {
            total_ticks: self.context.tick,
            failed_ticks: self.context.failed_ticks,
            min_score: stats.min,
            max_score: stats.max,
            final_score: stats.current,
            event_counts_by_severity: self.context.log.counts_by_severity(),
            advisory_counts_by_kind: advisory_counts,
            vehicles_seen: self.context.vehicles_seen,
            status,
        }
    }

    /// Drive the loop until it stops, then return the final report
    pub fn run(&mut self) -> RunReport {
        self.start();
        loop {
            match self.step() {
                Ok(TickOutcome::Stopped(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
        self.final_report()
    }

    /// The final report; stops the run first if it is still live
    pub fn final_report(&mut self) -> RunReport {
        if !matches!(self.state, LoopState::Stopped(_)) {
            self.finish(RunStatus::StopRequested);
        }
        let summary = match &self.summary {
            Some(summary) => summary.clone(),
            None => self.build_summary(RunStatus::StopRequested),
        };
        RunReport {
            summary,
            score_history: self.context.scorer.history().copied().collect(),
            events: self.context.log.as_slice().to_vec(),
        }
    }
}
