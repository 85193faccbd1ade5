//! Core types for the safety coordination engine
//!
//! These are plain value types shared by every stage of the tick pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A unique identifier for a vehicle, as reported by the simulator
/// Treated as an opaque string and never reinterpreted
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VehicleId(pub String);

/// A unique identifier for a road-side unit
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct RsuId(pub String);

impl VehicleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl RsuId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for RsuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Type of vehicle in the simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleKind {
    Car,
    Suv,
    Truck,
}

impl VehicleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleKind::Car => "car",
            VehicleKind::Suv => "suv",
            VehicleKind::Truck => "truck",
        }
    }
}

/// A 2D position on the road network plane (metres)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn lerp(&self, other: &Position, t: f64) -> Position {
        Position {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }

    /// Heading from this position to another, in degrees clockwise from north
    pub fn heading_to(&self, other: &Position) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        if dx == 0.0 && dy == 0.0 {
            return 0.0;
        }
        dx.atan2(dy).to_degrees().rem_euclid(360.0)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// A velocity vector derived from speed and heading
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Velocity {
    pub vx: f64,
    pub vy: f64,
}

impl Velocity {
    /// Heading is in degrees, 0 = north (+y), increasing clockwise
    pub fn from_heading(speed: f64, heading_deg: f64) -> Self {
        let rad = heading_deg.to_radians();
        Self {
            vx: speed * rad.sin(),
            vy: speed * rad.cos(),
        }
    }
}

/// Collision-risk severity, ordered from harmless to critical
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    None,
    Caution,
    Warning,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::None,
        Severity::Caution,
        Severity::Warning,
        Severity::Critical,
    ];

    /// Whether this severity counts against the safety score
    pub fn is_adverse(&self) -> bool {
        matches!(self, Severity::Warning | Severity::Critical)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Caution => "caution",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live vehicle as last observed in a simulator snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub kind: VehicleKind,
    pub position: Position,
    /// Speed in metres per second
    pub speed: f64,
    /// Heading in degrees clockwise from north
    pub heading: f64,
    pub v2x_capable: bool,
    /// Tick at which the vehicle was first seen
    pub first_seen: u64,
    /// Tick of the latest update
    pub last_seen: u64,
}

impl Vehicle {
    pub fn velocity(&self) -> Velocity {
        Velocity::from_heading(self.speed, self.heading)
    }
}

/// Signal-control authority owned by an RSU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalHandle {
    /// Identifier of the traffic-light program in the simulator
    pub signal_id: String,
    /// Phase requested when the zone needs traffic-flow mitigation
    pub mitigation_phase: u32,
}

/// A road-side unit: fixed for the whole run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rsu {
    pub id: RsuId,
    pub position: Position,
    pub radius: f64,
    pub signal: Option<SignalHandle>,
}

impl Rsu {
    pub fn covers(&self, position: &Position) -> bool {
        self.position.distance(position) <= self.radius
    }
}
