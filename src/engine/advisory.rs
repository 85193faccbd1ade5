//! Advisory generation
//!
//! Turns the tick's risk set into control actions for the simulator. Each
//! vehicle receives at most one speed limit and one alert per tick, taken
//! from the most severe assessment implicating it.

use log::{debug, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use super::config::SafetyConfig;
use super::error::EngineError;
use super::registry::EntityRegistry;
use super::risk::RiskSet;
use super::types::{RsuId, Severity, VehicleId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct AdvisoryId(pub u64);

impl fmt::Display for AdvisoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "adv-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryTarget {
    Vehicle(VehicleId),
    /// The intersection controlled by an RSU
    Rsu(RsuId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Issuer {
    Rsu(RsuId),
    Engine,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryAction {
    /// Cap the target's speed (m/s)
    SpeedLimit { max_speed: f64 },
    /// Switch the RSU's signal program to a phase
    SignalChange { signal_id: String, phase: u32 },
    /// Informational hazard notice, no control effect
    Alert { severity: Severity },
}

/// Advisory categories used for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryKind {
    SpeedLimit,
    SignalChange,
    Alert,
}

impl AdvisoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdvisoryKind::SpeedLimit => "speed-limit",
            AdvisoryKind::SignalChange => "signal-change",
            AdvisoryKind::Alert => "alert",
        }
    }
}

impl AdvisoryAction {
    pub fn kind(&self) -> AdvisoryKind {
        match self {
            AdvisoryAction::SpeedLimit { .. } => AdvisoryKind::SpeedLimit,
            AdvisoryAction::SignalChange { .. } => AdvisoryKind::SignalChange,
            AdvisoryAction::Alert { .. } => AdvisoryKind::Alert,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Advisory {
    pub id: AdvisoryId,
    pub target: AdvisoryTarget,
    pub action: AdvisoryAction,
    pub issuer: Issuer,
    pub tick: u64,
}

impl Advisory {
    pub fn kind(&self) -> AdvisoryKind {
        self.action.kind()
    }

    pub fn target_label(&self) -> String {
        match &self.target {
            AdvisoryTarget::Vehicle(id) => id.0.clone(),
            AdvisoryTarget::Rsu(id) => id.0.clone(),
        }
    }
}

/// How hard a speed cap bites
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedCap {
    /// Straight to the configured speed floor
    Floor,
    /// A fraction of the current speed, never below the floor
    Reduced,
}

/// Control response owed to a vehicle at a given severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub speed_cap: Option<SpeedCap>,
    pub alert: bool,
}

impl Response {
    pub fn is_empty(&self) -> bool {
        self.speed_cap.is_none() && !self.alert
    }
}

/// Total mapping from severity to response
pub fn response_for(severity: Severity) -> Response {
    match severity {
        Severity::Critical => Response {
            speed_cap: Some(SpeedCap::Floor),
            alert: true,
        },
        Severity::Warning => Response {
            speed_cap: Some(SpeedCap::Reduced),
            alert: false,
        },
        Severity::Caution => Response {
            speed_cap: None,
            alert: true,
        },
        Severity::None => Response {
            speed_cap: None,
            alert: false,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressionReason {
    /// A more severe assessment already governs this vehicle
    Outranked,
    /// The vehicle cannot receive V2X messages
    NotV2xCapable,
}

/// An assessment that did not produce an advisory for one of its vehicles
#[derive(Debug, Clone, PartialEq)]
pub struct Suppression {
    pub assessment: usize,
    pub vehicle: VehicleId,
    pub reason: SuppressionReason,
}

/// Everything the generator decided for one tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdvisoryBatch {
    pub advisories: Vec<Advisory>,
    /// Advisory ids produced by each assessment (index into the risk set)
    pub by_assessment: BTreeMap<usize, Vec<AdvisoryId>>,
    /// Signal-change advisory per triggering zone
    pub signal_changes: Vec<(RsuId, AdvisoryId)>,
    pub suppressed: Vec<Suppression>,
    /// `UnknownEntity` errors for targets that are no longer live
    pub dropped: Vec<EngineError>,
}

impl AdvisoryBatch {
    pub fn speed_limit_for(&self, vehicle: &VehicleId) -> Option<&Advisory> {
        self.advisories.iter().find(|a| {
            a.kind() == AdvisoryKind::SpeedLimit
                && matches!(&a.target, AdvisoryTarget::Vehicle(id) if id == vehicle)
        })
    }
}

/// A speed limit currently held by a vehicle
#[derive(Debug, Clone, Copy, PartialEq)]
struct ActiveCap {
    severity: Severity,
    max_speed: f64,
}

#[derive(Debug, Clone)]
pub struct AdvisoryGenerator {
    config: SafetyConfig,
    next_id: u64,
    active_caps: BTreeMap<VehicleId, ActiveCap>,
}

impl AdvisoryGenerator {
    pub fn new(config: SafetyConfig) -> Self {
        Self {
            config,
            next_id: 0,
            active_caps: BTreeMap::new(),
        }
    }

    fn next_advisory_id(&mut self) -> AdvisoryId {
        self.next_id += 1;
        AdvisoryId(self.next_id)
    }

    /// Number of vehicles currently holding a speed limit
    pub fn active_speed_limits(&self) -> usize {
        self.active_caps.len()
    }

    /// Forget caps of vehicles that are no longer live
    pub fn retain_live(&mut self, registry: &EntityRegistry) {
        self.active_caps.retain(|id, _| registry.is_live(id));
    }

    pub fn generate(&mut self, risks: &RiskSet, registry: &EntityRegistry, tick: u64) -> AdvisoryBatch {
        let mut batch = AdvisoryBatch::default();
        let worst = risks.worst_by_vehicle();

        for (index, assessment) in risks.assessments.iter().enumerate() {
            for id in assessment.subject.vehicles() {
                if worst.get(id) != Some(&index) {
                    batch.suppressed.push(Suppression {
                        assessment: index,
                        vehicle: id.clone(),
                        reason: SuppressionReason::Outranked,
                    });
                }
            }
        }

        // Caps lapse once a vehicle is no longer implicated in any risk
        self.active_caps.retain(|id, _| worst.contains_key(id));

        for (vehicle_id, index) in &worst {
            let assessment = &risks.assessments[*index];
            let response = response_for(assessment.severity);
            if response.is_empty() {
                continue;
            }

            let Some(vehicle) = registry.vehicle(vehicle_id) else {
                let err = EngineError::unknown(vehicle_id.0.clone(), "advisory target is not live");
                warn!("Dropping advisory at tick {}: {}", tick, err);
                self.active_caps.remove(vehicle_id);
                batch.dropped.push(err);
                continue;
            };

            if !vehicle.v2x_capable {
                debug!("Vehicle {} is not V2X capable, advisory suppressed", vehicle_id);
                self.active_caps.remove(vehicle_id);
                batch.suppressed.push(Suppression {
                    assessment: *index,
                    vehicle: vehicle_id.clone(),
                    reason: SuppressionReason::NotV2xCapable,
                });
                continue;
            }

            let issuer = Issuer::Rsu(assessment.rsu.clone());
            let mut issued = Vec::new();

            match response.speed_cap {
                Some(cap) => {
                    let max_speed = match self.active_caps.get(vehicle_id) {
                        // Re-issue the held cap unchanged while the severity holds
                        Some(active) if active.severity == assessment.severity => active.max_speed,
                        _ => match cap {
                            SpeedCap::Floor => self.config.speed_floor,
                            SpeedCap::Reduced => (vehicle.speed * self.config.warning_speed_factor)
                                .max(self.config.speed_floor),
                        },
                    };
                    self.active_caps.insert(
                        vehicle_id.clone(),
                        ActiveCap {
                            severity: assessment.severity,
                            max_speed,
                        },
                    );
                    let id = self.next_advisory_id();
                    batch.advisories.push(Advisory {
                        id,
                        target: AdvisoryTarget::Vehicle(vehicle_id.clone()),
                        action: AdvisoryAction::SpeedLimit { max_speed },
                        issuer: issuer.clone(),
                        tick,
                    });
                    issued.push(id);
                }
                None => {
                    self.active_caps.remove(vehicle_id);
                }
            }

            if response.alert {
                let id = self.next_advisory_id();
                batch.advisories.push(Advisory {
                    id,
                    target: AdvisoryTarget::Vehicle(vehicle_id.clone()),
                    action: AdvisoryAction::Alert {
                        severity: assessment.severity,
                    },
                    issuer,
                    tick,
                });
                issued.push(id);
            }

            batch.by_assessment.entry(*index).or_default().extend(issued);
        }

        for zone in &risks.zones {
            let Some(rsu) = registry.rsu(&zone.rsu) else {
                let err = EngineError::unknown(zone.rsu.0.clone(), "zone refers to an unknown RSU");
                warn!("Dropping signal advisory at tick {}: {}", tick, err);
                batch.dropped.push(err);
                continue;
            };
            let Some(signal) = &rsu.signal else {
                continue;
            };
            let dense = zone.vehicle_count >= self.config.signal_vehicle_threshold;
            let risky = zone.adverse_pairs() >= self.config.signal_risk_threshold;
            if !(dense || risky) {
                continue;
            }

            let id = self.next_advisory_id();
            debug!(
                "Zone {} needs mitigation (vehicles={}, adverse pairs={}), requesting phase {}",
                rsu.id,
                zone.vehicle_count,
                zone.adverse_pairs(),
                signal.mitigation_phase
            );
            batch.advisories.push(Advisory {
                id,
                target: AdvisoryTarget::Rsu(rsu.id.clone()),
                action: AdvisoryAction::SignalChange {
                    signal_id: signal.signal_id.clone(),
                    phase: signal.mitigation_phase,
                },
                issuer: Issuer::Rsu(rsu.id.clone()),
                tick,
            });
            batch.signal_changes.push((rsu.id.clone(), id));
        }

        batch
    }
}
