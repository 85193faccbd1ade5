//! Collision-risk evaluation
//!
//! Risk is evaluated per RSU zone: only vehicles inside an RSU's detection
//! radius are paired, which keeps the per-tick cost bounded by zone
//! occupancy rather than by the whole map. Every value here is a pure
//! function of the current registry contents and configuration.

use log::warn;
use ordered_float::OrderedFloat;
use std::collections::{BTreeMap, HashSet};

use super::config::SafetyConfig;
use super::registry::EntityRegistry;
use super::types::{Position, Rsu, RsuId, Severity, Vehicle, VehicleId, Velocity};

const EPSILON: f64 = 1e-9;

/// What an assessment refers to
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RiskSubject {
    /// Two vehicles, ids in ascending order
    Pair(VehicleId, VehicleId),
    /// A vehicle relative to the RSU zone it is in
    Zone(VehicleId),
}

impl RiskSubject {
    pub fn vehicles(&self) -> Vec<&VehicleId> {
        match self {
            RiskSubject::Pair(a, b) => vec![a, b],
            RiskSubject::Zone(v) => vec![v],
        }
    }

    pub fn involves(&self, id: &VehicleId) -> bool {
        match self {
            RiskSubject::Pair(a, b) => a == id || b == id,
            RiskSubject::Zone(v) => v == id,
        }
    }
}

/// Relative motion of two vehicles under constant-velocity extrapolation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairKinematics {
    /// Current separation (m)
    pub distance: f64,
    /// Rate at which the separation shrinks right now (m/s, positive = closing)
    pub closing_speed: f64,
    /// Time of closest approach, clamped to the horizon (s)
    pub time_to_closest: f64,
    /// Separation at the time of closest approach (m)
    pub min_separation: f64,
    /// First time within the horizon at which separation reaches `conflict_radius`
    pub time_to_conflict: Option<f64>,
}

/// Extrapolate two vehicles over `horizon` seconds
pub fn project_pair(a: &Vehicle, b: &Vehicle, horizon: f64, conflict_radius: f64) -> PairKinematics {
    project(
        &a.position,
        a.velocity(),
        &b.position,
        b.velocity(),
        horizon,
        conflict_radius,
    )
}

fn project(
    pa: &Position,
    va: Velocity,
    pb: &Position,
    vb: Velocity,
    horizon: f64,
    conflict_radius: f64,
) -> PairKinematics {
    let dx = pb.x - pa.x;
    let dy = pb.y - pa.y;
    let rvx = vb.vx - va.vx;
    let rvy = vb.vy - va.vy;

    let dd = dx * dx + dy * dy;
    let dv = dx * rvx + dy * rvy;
    let vv = rvx * rvx + rvy * rvy;
    let distance = dd.sqrt();

    let closing_speed = if distance > EPSILON {
        -dv / distance
    } else {
        vv.sqrt()
    };

    let time_to_closest = if vv > EPSILON {
        (-dv / vv).clamp(0.0, horizon)
    } else {
        0.0
    };
    let cx = dx + rvx * time_to_closest;
    let cy = dy + rvy * time_to_closest;
    let min_separation = (cx * cx + cy * cy).sqrt();

    let r2 = conflict_radius * conflict_radius;
    let time_to_conflict = if dd <= r2 {
        Some(0.0)
    } else if vv > EPSILON {
        // |d + v t|^2 = r^2, earliest root
        let disc = dv * dv - vv * (dd - r2);
        if disc >= 0.0 {
            let t = (-dv - disc.sqrt()) / vv;
            (0.0..=horizon).contains(&t).then_some(t)
        } else {
            None
        }
    } else {
        None
    };

    PairKinematics {
        distance,
        closing_speed,
        time_to_closest,
        min_separation,
        time_to_conflict,
    }
}

/// Severity of a projected pair encounter
///
/// Monotone: a smaller projected separation never yields a lower severity.
pub fn classify(kinematics: &PairKinematics, config: &SafetyConfig) -> Severity {
    if kinematics.min_separation < config.critical_distance {
        Severity::Critical
    } else if kinematics.min_separation < config.warning_distance {
        Severity::Warning
    } else if kinematics.closing_speed > config.caution_closing_speed
        && kinematics.distance < config.caution_distance
    {
        Severity::Caution
    } else {
        Severity::None
    }
}

/// One derived risk judgement for the current tick
#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    /// Zone in which the risk was observed
    pub rsu: RsuId,
    pub subject: RiskSubject,
    pub distance: f64,
    pub closing_speed: f64,
    pub min_separation: f64,
    pub time_to_closest: f64,
    pub time_to_conflict: Option<f64>,
    pub severity: Severity,
}

/// Per-zone aggregate used for signal decisions and reporting
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ZoneSummary {
    pub rsu: RsuId,
    pub vehicle_count: usize,
    /// Pair assessments attributed to this zone, by severity
    pub pair_counts: BTreeMap<Severity, usize>,
    pub worst: Severity,
}

impl ZoneSummary {
    /// Pair assessments at warning level or worse
    pub fn adverse_pairs(&self) -> usize {
        self.pair_counts
            .iter()
            .filter(|(severity, _)| severity.is_adverse())
            .map(|(_, count)| count)
            .sum()
    }
}

/// All assessments of one tick, in deterministic order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RiskSet {
    pub assessments: Vec<RiskAssessment>,
    pub zones: Vec<ZoneSummary>,
}

impl RiskSet {
    /// Index of the highest-severity assessment for every implicated vehicle
    ///
    /// Ties go to the smaller projected separation, then to the earlier assessment.
    pub fn worst_by_vehicle(&self) -> BTreeMap<VehicleId, usize> {
        let mut worst: BTreeMap<VehicleId, usize> = BTreeMap::new();
        for (index, assessment) in self.assessments.iter().enumerate() {
            let key = rank(assessment);
            for id in assessment.subject.vehicles() {
                match worst.get(id) {
                    Some(&current) if rank(&self.assessments[current]) >= key => {}
                    _ => {
                        worst.insert(id.clone(), index);
                    }
                }
            }
        }
        worst
    }

    pub fn max_severity(&self) -> Severity {
        self.assessments
            .iter()
            .map(|a| a.severity)
            .max()
            .unwrap_or(Severity::None)
    }

    pub fn involving<'a>(&'a self, id: &'a VehicleId) -> impl Iterator<Item = &'a RiskAssessment> + 'a {
        self.assessments.iter().filter(move |a| a.subject.involves(id))
    }

    pub fn zone(&self, rsu: &RsuId) -> Option<&ZoneSummary> {
        self.zones.iter().find(|z| &z.rsu == rsu)
    }
}

fn rank(assessment: &RiskAssessment) -> (Severity, OrderedFloat<f64>) {
    (assessment.severity, OrderedFloat(-assessment.min_separation))
}

#[derive(Debug, Clone)]
pub struct RiskEvaluator {
    config: SafetyConfig,
}

impl RiskEvaluator {
    pub fn new(config: SafetyConfig) -> Self {
        Self { config }
    }

    /// Evaluate every zone of the registry
    pub fn evaluate(&self, registry: &EntityRegistry) -> RiskSet {
        let mut set = RiskSet::default();
        let mut seen_pairs: HashSet<(VehicleId, VehicleId)> = HashSet::new();

        for rsu in registry.rsus() {
            let members: Vec<&Vehicle> = registry
                .vehicles_in_zone(rsu)
                .filter(|v| {
                    let ok = v.velocity().vx.is_finite() && v.velocity().vy.is_finite();
                    if !ok {
                        warn!("Skipping vehicle {} with non-finite kinematics", v.id);
                    }
                    ok
                })
                .collect();

            let mut summary = ZoneSummary {
                rsu: rsu.id.clone(),
                vehicle_count: members.len(),
                ..ZoneSummary::default()
            };

            for (i, a) in members.iter().enumerate() {
                for b in &members[i + 1..] {
                    let key = (a.id.clone(), b.id.clone());
                    if seen_pairs.contains(&key) {
                        continue;
                    }
                    let Some(assessment) = self.assess_pair(rsu, a, b) else {
                        continue;
                    };
                    seen_pairs.insert(key);
                    if assessment.severity == Severity::None {
                        continue;
                    }
                    *summary.pair_counts.entry(assessment.severity).or_insert(0) += 1;
                    summary.worst = summary.worst.max(assessment.severity);
                    set.assessments.push(assessment);
                }
            }

            if members.len() >= self.config.congestion_vehicle_threshold {
                for vehicle in &members {
                    if vehicle.speed > self.config.congestion_speed_limit {
                        let assessment = self.assess_congestion(rsu, vehicle);
                        summary.worst = summary.worst.max(assessment.severity);
                        set.assessments.push(assessment);
                    }
                }
            }

            set.zones.push(summary);
        }

        set
    }

    fn assess_pair(&self, rsu: &Rsu, a: &Vehicle, b: &Vehicle) -> Option<RiskAssessment> {
        let kinematics = project_pair(
            a,
            b,
            self.config.horizon_secs,
            self.config.critical_distance,
        );
        if !kinematics.min_separation.is_finite() || !kinematics.closing_speed.is_finite() {
            warn!(
                "Skipping pair {}/{}: projection produced non-finite values",
                a.id, b.id
            );
            return None;
        }

        Some(RiskAssessment {
            rsu: rsu.id.clone(),
            subject: RiskSubject::Pair(a.id.clone(), b.id.clone()),
            distance: kinematics.distance,
            closing_speed: kinematics.closing_speed,
            min_separation: kinematics.min_separation,
            time_to_closest: kinematics.time_to_closest,
            time_to_conflict: kinematics.time_to_conflict,
            severity: classify(&kinematics, &self.config),
        })
    }

    fn assess_congestion(&self, rsu: &Rsu, vehicle: &Vehicle) -> RiskAssessment {
        // Treat the RSU as a stationary point to get the radial approach rate
        let kinematics = project(
            &vehicle.position,
            vehicle.velocity(),
            &rsu.position,
            Velocity::default(),
            self.config.horizon_secs,
            self.config.critical_distance,
        );
        RiskAssessment {
            rsu: rsu.id.clone(),
            subject: RiskSubject::Zone(vehicle.id.clone()),
            distance: kinematics.distance,
            closing_speed: kinematics.closing_speed,
            min_separation: kinematics.distance,
            time_to_closest: kinematics.time_to_closest,
            time_to_conflict: None,
            severity: Severity::Caution,
        }
    }
}
