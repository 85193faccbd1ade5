//! Append-only event log
//!
//! Events are immutable once recorded and live for the whole run.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use super::advisory::AdvisoryId;
use super::coordinator::RunStatus;
use super::types::{RsuId, Severity, VehicleId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EventId(pub u64);

/// An entity mentioned by an event
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityRef {
    Vehicle(VehicleId),
    Rsu(RsuId),
    /// An entry that could not be resolved to a live entity
    Raw(String),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Vehicle(id) => write!(f, "{}", id),
            EntityRef::Rsu(id) => write!(f, "{}", id),
            EntityRef::Raw(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A vehicle pair at caution level or worse
    RiskDetected { rsu: RsuId, suppressed: bool },
    /// A vehicle flagged against its zone's congestion limit
    ZoneRisk { rsu: RsuId, suppressed: bool },
    SignalChange { rsu: RsuId },
    MalformedInput { reason: String },
    UnknownEntity { reason: String },
    TickFailure { reason: String },
    DegradedPerformance { elapsed_ms: u64, budget_ms: u64 },
    RunStopped { status: RunStatus },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::RiskDetected { .. } => "risk-detected",
            EventKind::ZoneRisk { .. } => "zone-risk",
            EventKind::SignalChange { .. } => "signal-change",
            EventKind::MalformedInput { .. } => "malformed-input",
            EventKind::UnknownEntity { .. } => "unknown-entity",
            EventKind::TickFailure { .. } => "tick-failure",
            EventKind::DegradedPerformance { .. } => "degraded-performance",
            EventKind::RunStopped { .. } => "run-stopped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub id: EventId,
    pub tick: u64,
    pub kind: EventKind,
    pub entities: Vec<EntityRef>,
    pub severity: Severity,
    /// Advisories that resulted from this event, if any
    pub advisories: Vec<AdvisoryId>,
}

impl Event {
    /// Risk events are the only ones that feed the safety score
    pub fn is_risk(&self) -> bool {
        matches!(
            self.kind,
            EventKind::RiskDetected { .. } | EventKind::ZoneRisk { .. }
        )
    }

    pub fn is_adverse(&self) -> bool {
        self.is_risk() && self.severity.is_adverse()
    }

    pub fn involves_vehicle(&self, id: &VehicleId) -> bool {
        self.entities
            .iter()
            .any(|e| matches!(e, EntityRef::Vehicle(v) if v == id))
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new event and return a reference to it
    pub fn record(
        &mut self,
        tick: u64,
        kind: EventKind,
        entities: Vec<EntityRef>,
        severity: Severity,
        advisories: Vec<AdvisoryId>,
    ) -> &Event {
        let id = EventId(self.events.len() as u64 + 1);
        self.events.push(Event {
            id,
            tick,
            kind,
            entities,
            severity,
            advisories,
        });
        &self.events[self.events.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    /// Events recorded at or after position `start`
    pub fn since(&self, start: usize) -> &[Event] {
        &self.events[start.min(self.events.len())..]
    }

    pub fn as_slice(&self) -> &[Event] {
        &self.events
    }

    /// Risk events per severity
    pub fn counts_by_severity(&self) -> BTreeMap<Severity, usize> {
        let mut counts: BTreeMap<Severity, usize> = Severity::ALL
            .iter()
            .filter(|s| **s != Severity::None)
            .map(|s| (*s, 0))
            .collect();
        for event in self.events.iter().filter(|e| e.is_risk()) {
            *counts.entry(event.severity).or_insert(0) += 1;
        }
        counts
    }

    /// Events per kind name
    pub fn counts_by_kind(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for event in &self.events {
            *counts.entry(event.kind.name()).or_insert(0) += 1;
        }
        counts
    }
}
