//! Vehicle movement for the demo grid
//!
//! Vehicles drive at their desired speed, reduced by any speed cap they
//! hold, and never close within [`MIN_GAP`] of the vehicle ahead. A junction
//! holding its signal stops them at the stop line.

use anyhow::{Context, Result};
use std::collections::BTreeMap;

use super::junction::Junction;
use super::network::{JunctionId, RoadId, RoadNetwork};
use crate::engine::{Position, VehicleKind};

/// Minimum bumper-to-bumper spacing kept behind a leader (metres)
pub const MIN_GAP: f64 = 6.0;

/// Where vehicles wait in front of a holding junction (metres before it)
pub const STOP_LINE: f64 = 12.0;

/// Lateral offset of the driving lane from the road centreline (metres)
pub const LANE_OFFSET: f64 = 4.5;

/// How long an applied speed cap stays in force (seconds)
pub const CAP_HOLD_SECS: f64 = 3.0;

#[derive(Debug, Clone, PartialEq)]
pub enum VehicleUpdate {
    Continue,
    Arrived(JunctionId),
}

/// A speed cap received from the engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedCapHold {
    pub max_speed: f64,
    pub remaining: f64,
}

#[derive(Debug, Clone)]
pub struct DemoVehicle {
    pub id: u64,
    pub kind: VehicleKind,
    pub v2x_capable: bool,
    pub desired_speed: f64,
    /// Speed actually driven during the last step
    pub speed: f64,
    pub current_road: RoadId,
    pub distance_along_road: f64,
    pub path: Vec<JunctionId>,
    pub position: Position,
    pub heading: f64,
    pub cap: Option<SpeedCapHold>,
    pub alerts: usize,
}

impl DemoVehicle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        kind: VehicleKind,
        v2x_capable: bool,
        desired_speed: f64,
        current_road: RoadId,
        path: Vec<JunctionId>,
        position: Position,
        heading: f64,
    ) -> Self {
        Self {
            id,
            kind,
            v2x_capable,
            desired_speed,
            speed: desired_speed,
            current_road,
            distance_along_road: 0.0,
            path,
            position,
            heading,
            cap: None,
            alerts: 0,
        }
    }

    pub fn label(&self) -> String {
        vehicle_label(self.id)
    }

    /// Speed the driver would choose right now
    pub fn target_speed(&self) -> f64 {
        match self.cap {
            Some(cap) => self.desired_speed.min(cap.max_speed),
            None => self.desired_speed,
        }
    }

    /// Apply or refresh a speed cap
    pub fn apply_cap(&mut self, max_speed: f64) {
        self.cap = Some(SpeedCapHold {
            max_speed,
            remaining: CAP_HOLD_SECS,
        });
    }

    fn update_cap(&mut self, delta_secs: f64) {
        if let Some(cap) = &mut self.cap {
            cap.remaining -= delta_secs;
            if cap.remaining <= 0.0 {
                self.cap = None;
            }
        }
    }

    pub fn update(
        &mut self,
        delta_secs: f64,
        network: &mut RoadNetwork,
        junctions: &BTreeMap<JunctionId, Junction>,
    ) -> Result<VehicleUpdate> {
        let Some(&target) = self.path.first() else {
            return Ok(VehicleUpdate::Arrived(self.road_end(network)?));
        };

        let road = network
            .road(self.current_road)
            .context("Road not found")?
            .clone();
        let start = *network
            .junction_position(road.from)
            .context("Start junction not found")?;
        let end = *network
            .junction_position(target)
            .context("Target junction not found")?;

        let previous = (self.current_road, self.distance_along_road);
        let mut advance = self.target_speed() * delta_secs;

        if let Some((ahead, _)) = network.vehicle_ahead(self.current_road, self.distance_along_road) {
            let room = ahead - self.distance_along_road - MIN_GAP;
            advance = advance.min(room.max(0.0));
        }

        let holding = junctions.get(&target).is_some_and(Junction::is_holding);
        let stop_at = road.length - STOP_LINE;
        if holding && self.distance_along_road <= stop_at {
            advance = advance.min(stop_at - self.distance_along_road);
        }

        self.speed = if delta_secs > 0.0 { advance / delta_secs } else { 0.0 };
        self.distance_along_road += advance;
        self.update_cap(delta_secs);

        if self.distance_along_road >= road.length {
            let reached = self.path.remove(0);
            let Some(&next) = self.path.first() else {
                self.position = end;
                network.untrack_vehicle(self.id);
                return Ok(VehicleUpdate::Arrived(reached));
            };

            let next_road = network
                .find_road_between(reached, next)
                .context("No road between route junctions")?;
            let heading = network
                .road(next_road)
                .context("Next road not found")?
                .heading;
            self.current_road = next_road;
            self.distance_along_road = 0.0;
            self.heading = heading;
            self.position = end;
        } else {
            let mut position = start.lerp(&end, self.distance_along_road / road.length);
            let (dx, dy) = lane_offset(road.heading);
            position.x += dx;
            position.y += dy;
            self.position = position;
            self.heading = road.heading;
        }

        network.track_vehicle(
            self.id,
            self.current_road,
            self.distance_along_road,
            Some(previous),
        );
        Ok(VehicleUpdate::Continue)
    }

    fn road_end(&self, network: &RoadNetwork) -> Result<JunctionId> {
        Ok(network
            .road(self.current_road)
            .context("Road not found")?
            .to)
    }
}

/// Offset to the right-hand lane for a road heading (degrees from north)
pub fn lane_offset(heading: f64) -> (f64, f64) {
    let rad = (heading + 90.0).to_radians();
    (rad.sin() * LANE_OFFSET, rad.cos() * LANE_OFFSET)
}

pub fn vehicle_label(id: u64) -> String {
    format!("veh_{}", id)
}

/// Inverse of [`vehicle_label`]
pub fn parse_vehicle_label(label: &str) -> Option<u64> {
    label.strip_prefix("veh_")?.parse().ok()
}
