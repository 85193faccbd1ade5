//! Entity registry: live vehicles and the fixed RSU set
//!
//! Each snapshot is diffed against the previous one. Vehicles absent from a
//! snapshot are removed before anything downstream runs, so risk is never
//! evaluated on departed vehicles.

use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::error::EngineError;
use super::simulator::{Snapshot, VehicleReport};
use super::types::{Rsu, RsuId, Vehicle, VehicleId};

/// Result of applying one snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryUpdate {
    pub entered: Vec<VehicleId>,
    pub updated: Vec<VehicleId>,
    pub departed: Vec<VehicleId>,
    /// Live vehicles whose entry was malformed this tick; removed from live
    /// lookups but not treated as departed
    pub withheld: Vec<VehicleId>,
    /// One `MalformedInput` per dropped snapshot entry
    pub rejected: Vec<EngineError>,
}

#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    vehicles: BTreeMap<VehicleId, Vehicle>,
    rsus: BTreeMap<RsuId, Rsu>,
    /// Live vehicles whose latest entry was malformed, kept until they
    /// report cleanly again or leave the snapshot
    withheld: BTreeMap<VehicleId, Vehicle>,
    /// Every id that has left the run; ids are never reused
    departed: HashSet<VehicleId>,
    last_tick: u64,
}

impl EntityRegistry {
    pub fn new(rsus: Vec<Rsu>) -> Self {
        Self {
            rsus: rsus.into_iter().map(|r| (r.id.clone(), r)).collect(),
            ..Self::default()
        }
    }

    /// Apply a full snapshot of present vehicles
    pub fn update(&mut self, snapshot: &Snapshot) -> RegistryUpdate {
        let mut result = RegistryUpdate::default();
        let mut present: BTreeSet<VehicleId> = BTreeSet::new();
        let reported: HashSet<&str> = snapshot
            .vehicles
            .iter()
            .map(|v| v.id.as_str())
            .filter(|id| !id.is_empty())
            .collect();

        for report in &snapshot.vehicles {
            let vehicle = match self.validate(report, snapshot.tick, &present) {
                Ok(vehicle) => vehicle,
                Err(err) => {
                    warn!("Dropping snapshot entry at tick {}: {}", snapshot.tick, err);
                    result.rejected.push(err);
                    continue;
                }
            };

            present.insert(vehicle.id.clone());
            if let Some(existing) = self.vehicles.get_mut(&vehicle.id) {
                existing.kind = vehicle.kind;
                existing.position = vehicle.position;
                existing.speed = vehicle.speed;
                existing.heading = vehicle.heading;
                existing.v2x_capable = vehicle.v2x_capable;
                existing.last_seen = snapshot.tick;
                result.updated.push(vehicle.id);
            } else if let Some(held) = self.withheld.remove(&vehicle.id) {
                debug!("Vehicle {} reporting cleanly again at tick {}", vehicle.id, snapshot.tick);
                result.updated.push(vehicle.id.clone());
                self.vehicles.insert(
                    vehicle.id.clone(),
                    Vehicle {
                        first_seen: held.first_seen,
                        ..vehicle
                    },
                );
            } else {
                debug!("Vehicle {} entered at tick {}", vehicle.id, snapshot.tick);
                result.entered.push(vehicle.id.clone());
                self.vehicles.insert(vehicle.id.clone(), vehicle);
            }
        }

        // Still-withheld vehicles stay withheld while they keep reporting
        let still_held: Vec<VehicleId> = self.withheld.keys().cloned().collect();
        for id in still_held {
            if reported.contains(id.0.as_str()) {
                result.withheld.push(id);
            } else {
                self.withheld.remove(&id);
                self.depart(id, snapshot.tick, &mut result);
            }
        }

        let gone: Vec<VehicleId> = self
            .vehicles
            .keys()
            .filter(|id| !present.contains(*id))
            .cloned()
            .collect();
        for id in gone {
            let Some(vehicle) = self.vehicles.remove(&id) else {
                continue;
            };
            if reported.contains(id.0.as_str()) {
                self.withheld.insert(id.clone(), vehicle);
                result.withheld.push(id);
            } else {
                self.depart(id, snapshot.tick, &mut result);
            }
        }

        result.entered.sort();
        result.updated.sort();
        result.withheld.sort();
        result.departed.sort();
        self.last_tick = snapshot.tick;
        result
    }

    fn depart(&mut self, id: VehicleId, tick: u64, result: &mut RegistryUpdate) {
        debug!("Vehicle {} departed at tick {}", id, tick);
        self.departed.insert(id.clone());
        result.departed.push(id);
    }

    fn validate(
        &self,
        report: &VehicleReport,
        tick: u64,
        present: &BTreeSet<VehicleId>,
    ) -> Result<Vehicle, EngineError> {
        let label = if report.id.is_empty() {
            "<unnamed>".to_string()
        } else {
            report.id.clone()
        };
        if report.id.is_empty() {
            return Err(EngineError::malformed(label, "missing id"));
        }

        let id = VehicleId(report.id.clone());
        if present.contains(&id) {
            return Err(EngineError::malformed(label, "duplicate id in snapshot"));
        }
        if self.departed.contains(&id) {
            return Err(EngineError::malformed(label, "id reused after departure"));
        }

        let kind = report
            .kind
            .ok_or_else(|| EngineError::malformed(&label, "missing vehicle type"))?;
        let position = report
            .position
            .ok_or_else(|| EngineError::malformed(&label, "missing position"))?;
        let speed = report
            .speed
            .ok_or_else(|| EngineError::malformed(&label, "missing speed"))?;
        let heading = report
            .heading
            .ok_or_else(|| EngineError::malformed(&label, "missing heading"))?;

        if !position.is_finite() {
            return Err(EngineError::malformed(label, "non-finite position"));
        }
        if !speed.is_finite() || speed < 0.0 {
            return Err(EngineError::malformed(label, format!("invalid speed {}", speed)));
        }
        if !heading.is_finite() {
            return Err(EngineError::malformed(label, "non-finite heading"));
        }

        let first_seen = self
            .vehicles
            .get(&id)
            .map(|v| v.first_seen)
            .unwrap_or(tick);

        Ok(Vehicle {
            id,
            kind,
            position,
            speed,
            heading: heading.rem_euclid(360.0),
            v2x_capable: report.v2x_capable,
            first_seen,
            last_seen: tick,
        })
    }

    pub fn vehicle(&self, id: &VehicleId) -> Option<&Vehicle> {
        self.vehicles.get(id)
    }

    pub fn is_live(&self, id: &VehicleId) -> bool {
        self.vehicles.contains_key(id)
    }

    /// Live vehicles in id order
    pub fn vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.values()
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    pub fn rsu(&self, id: &RsuId) -> Option<&Rsu> {
        self.rsus.get(id)
    }

    /// RSUs in id order
    pub fn rsus(&self) -> impl Iterator<Item = &Rsu> {
        self.rsus.values()
    }

    /// Live vehicles inside an RSU's detection radius, in id order
    pub fn vehicles_in_zone<'a>(&'a self, rsu: &'a Rsu) -> impl Iterator<Item = &'a Vehicle> + 'a {
        self.vehicles.values().filter(move |v| rsu.covers(&v.position))
    }

    pub fn has_departed(&self, id: &VehicleId) -> bool {
        self.departed.contains(id)
    }

    /// Whether a vehicle is live but currently withheld for a malformed entry
    pub fn is_withheld(&self, id: &VehicleId) -> bool {
        self.withheld.contains_key(id)
    }

    pub fn last_tick(&self) -> u64 {
        self.last_tick
    }
}
