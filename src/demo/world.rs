//! Headless grid simulator
//!
//! A small stand-in for a microscopic traffic simulator so the engine can
//! be exercised end to end without one. Vehicles are spawned from a seeded
//! RNG, routed over the grid with A* and honour the speed caps and signal
//! holds the engine sends back.

use anyhow::{bail, ensure, Context, Result};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

use super::junction::Junction;
use super::network::{JunctionId, RoadNetwork};
use super::vehicle::{lane_offset, parse_vehicle_label, DemoVehicle, VehicleUpdate};
use crate::engine::{
    Advisory, AdvisoryAction, AdvisoryTarget, ApplyOutcome, Position, Rsu, SimulatorInterface,
    Snapshot, VehicleKind, VehicleReport,
};

/// No vehicle spawns while another is this close to its origin (metres)
pub const SPAWN_CLEARANCE: f64 = 15.0;

const KINDS: [VehicleKind; 4] = [
    VehicleKind::Car,
    VehicleKind::Car,
    VehicleKind::Suv,
    VehicleKind::Truck,
];

/// Desired speed range per vehicle kind (m/s)
pub fn speed_range(kind: VehicleKind) -> std::ops::Range<f64> {
    match kind {
        VehicleKind::Car => 9.0..14.0,
        VehicleKind::Suv => 8.0..12.5,
        VehicleKind::Truck => 6.0..10.0,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DemoSettings {
    pub grid_size: usize,
    pub spacing: f64,
    pub origin: Position,
    pub duration_secs: f64,
    pub delta_secs: f64,
    /// Vehicles kept on the network
    pub target_vehicles: usize,
    /// Fraction of snapshot entries reported without a position
    pub malformed_rate: f64,
    /// Fraction of spawned vehicles able to receive advisories
    pub v2x_share: f64,
    pub seed: u64,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            grid_size: 3,
            spacing: 200.0,
            origin: Position::new(200.0, 200.0),
            duration_secs: 150.0,
            delta_secs: 0.2,
            target_vehicles: 20,
            malformed_rate: 0.0,
            v2x_share: 0.8,
            seed: 42,
        }
    }
}

impl DemoSettings {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.grid_size >= 2, "grid size must be at least 2");
        ensure!(
            self.spacing.is_finite() && self.spacing > 0.0,
            "grid spacing must be positive"
        );
        ensure!(
            self.delta_secs.is_finite() && self.delta_secs > 0.0,
            "time step must be positive"
        );
        ensure!(
            self.duration_secs.is_finite() && self.duration_secs >= self.delta_secs,
            "duration must cover at least one step"
        );
        ensure!(
            (0.0..=1.0).contains(&self.malformed_rate),
            "malformed rate must be within [0, 1]"
        );
        ensure!(
            (0.0..=1.0).contains(&self.v2x_share),
            "V2X share must be within [0, 1]"
        );
        Ok(())
    }

    pub fn total_steps(&self) -> u64 {
        (self.duration_secs / self.delta_secs).round() as u64
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DemoStats {
    pub spawned: usize,
    pub arrived: usize,
    pub speed_limits_applied: usize,
    pub alerts_delivered: usize,
    pub signal_changes: usize,
    pub malformed_injected: usize,
}

pub struct GridSimulator {
    pub network: RoadNetwork,
    pub junctions: BTreeMap<JunctionId, Junction>,
    pub vehicles: BTreeMap<u64, DemoVehicle>,
    pub settings: DemoSettings,
    pub stats: DemoStats,
    /// Simulated seconds
    pub time: f64,
    step: u64,
    total_steps: u64,
    next_vehicle: u64,
    rng: StdRng,
    closed: bool,
}

impl GridSimulator {
    pub fn new(settings: DemoSettings) -> Result<Self> {
        settings.validate().context("Invalid demo settings")?;
        let network = RoadNetwork::grid(settings.grid_size, settings.spacing, settings.origin)?;
        let junctions = network
            .junctions()
            .map(|(id, position)| (*id, Junction::new(*id, *position)))
            .collect();

        Ok(Self {
            network,
            junctions,
            vehicles: BTreeMap::new(),
            total_steps: settings.total_steps(),
            rng: StdRng::seed_from_u64(settings.seed),
            settings,
            stats: DemoStats::default(),
            time: 0.0,
            step: 0,
            next_vehicle: 0,
            closed: false,
        })
    }

    /// Attach each RSU's signal program to the junction it sits on
    pub fn with_signals<'a>(mut self, rsus: impl IntoIterator<Item = &'a Rsu>) -> Self {
        for rsu in rsus {
            let Some(signal) = &rsu.signal else {
                continue;
            };
            match self.network.find_closest_junction(&rsu.position) {
                Some(id) => {
                    if let Some(junction) = self.junctions.get_mut(&id) {
                        junction.signal_id = Some(signal.signal_id.clone());
                    }
                }
                None => warn!("No junction for signal {} of {}", signal.signal_id, rsu.id),
            }
        }
        self
    }

    pub fn step_count(&self) -> u64 {
        self.step
    }

    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    fn next_vehicle_id(&mut self) -> u64 {
        let id = self.next_vehicle;
        self.next_vehicle += 1;
        id
    }

    /// Spawn a vehicle routed from `from` to `to`
    pub fn spawn_vehicle(&mut self, from: JunctionId, to: JunctionId, kind: VehicleKind) -> Result<u64> {
        let path = self
            .network
            .find_path(from, to)
            .context("No path found to destination")?;
        let first = *path.first().context("Origin and destination coincide")?;
        let road_id = self
            .network
            .find_road_between(from, first)
            .context("No road to first route junction")?;
        let heading = self.network.road(road_id).context("Road not found")?.heading;
        let origin = *self
            .network
            .junction_position(from)
            .context("Origin junction not found")?;

        let desired_speed = self.rng.random_range(speed_range(kind));
        let v2x_capable = self.rng.random_bool(self.settings.v2x_share);
        let (dx, dy) = lane_offset(heading);
        let position = Position::new(origin.x + dx, origin.y + dy);

        let id = self.next_vehicle_id();
        let vehicle = DemoVehicle::new(
            id,
            kind,
            v2x_capable,
            desired_speed,
            road_id,
            path,
            position,
            heading,
        );
        self.network.track_vehicle(id, road_id, 0.0, None);
        debug!(
            "Spawned {} ({}, {:.1} m/s, v2x={})",
            vehicle.label(),
            kind.as_str(),
            desired_speed,
            v2x_capable
        );
        self.vehicles.insert(id, vehicle);
        self.stats.spawned += 1;
        Ok(id)
    }

    /// Top the network up by at most one vehicle per step
    fn spawn_traffic(&mut self) {
        if self.vehicles.len() >= self.settings.target_vehicles {
            return;
        }
        let ids: Vec<JunctionId> = self.junctions.keys().copied().collect();
        let (Some(&from), Some(&to)) = (ids.choose(&mut self.rng), ids.choose(&mut self.rng)) else {
            return;
        };
        if from == to {
            return;
        }
        let Some(origin) = self.network.junction_position(from).copied() else {
            return;
        };
        let crowded = self
            .vehicles
            .values()
            .any(|v| v.position.distance(&origin) < SPAWN_CLEARANCE);
        if crowded {
            return;
        }

        let kind = KINDS.choose(&mut self.rng).copied().unwrap_or(VehicleKind::Car);
        if let Err(e) = self.spawn_vehicle(from, to, kind) {
            warn!("Failed to spawn vehicle: {:#}", e);
        }
    }

    /// Advance the world by one step of `delta_secs`
    pub fn tick(&mut self, delta_secs: f64) {
        self.time += delta_secs;
        for junction in self.junctions.values_mut() {
            junction.update_timer(delta_secs);
        }

        self.spawn_traffic();

        let ids: Vec<u64> = self.vehicles.keys().copied().collect();
        for id in ids {
            let Some(mut vehicle) = self.vehicles.remove(&id) else {
                continue;
            };
            match vehicle.update(delta_secs, &mut self.network, &self.junctions) {
                Ok(VehicleUpdate::Continue) => {
                    self.vehicles.insert(id, vehicle);
                }
                Ok(VehicleUpdate::Arrived(_)) => {
                    debug!("{} arrived at t={:.1}s", vehicle.label(), self.time);
                    self.stats.arrived += 1;
                }
                Err(e) => {
                    warn!("Removing {}: {:#}", vehicle.label(), e);
                    self.network.untrack_vehicle(id);
                }
            }
        }
    }

    fn reports(&mut self) -> Vec<VehicleReport> {
        let mut reports = Vec::with_capacity(self.vehicles.len());
        for vehicle in self.vehicles.values() {
            let mut report = VehicleReport::new(
                vehicle.label(),
                vehicle.kind,
                vehicle.position.x,
                vehicle.position.y,
                vehicle.speed,
                vehicle.heading,
            );
            if !vehicle.v2x_capable {
                report = report.without_v2x();
            }
            if self.settings.malformed_rate > 0.0 && self.rng.random_bool(self.settings.malformed_rate) {
                report = report.without_position();
                self.stats.malformed_injected += 1;
            }
            reports.push(report);
        }
        reports
    }

    fn junction_with_signal(&mut self, signal_id: &str) -> Option<&mut Junction> {
        self.junctions
            .values_mut()
            .find(|j| j.signal_id.as_deref() == Some(signal_id))
    }

    pub fn print_summary(&self) {
        println!("=== Grid Simulation Summary ===");
        println!("Time: {:.1}s ({} steps)", self.time, self.step);
        println!(
            "Junctions: {}, Roads: {}",
            self.network.junction_count(),
            self.network.road_count()
        );
        println!(
            "Vehicles: {} active, {} spawned, {} arrived",
            self.vehicles.len(),
            self.stats.spawned,
            self.stats.arrived
        );
        println!(
            "Advisories received: {} speed limits, {} alerts, {} signal changes",
            self.stats.speed_limits_applied, self.stats.alerts_delivered, self.stats.signal_changes
        );
        if self.stats.malformed_injected > 0 {
            println!("Malformed entries injected: {}", self.stats.malformed_injected);
        }
    }
}

impl SimulatorInterface for GridSimulator {
    fn snapshot(&mut self) -> Result<Snapshot> {
        if self.closed {
            bail!("grid simulator is closed");
        }
        self.tick(self.settings.delta_secs);
        self.step += 1;
        Ok(Snapshot {
            tick: self.step,
            vehicles: self.reports(),
        })
    }

    fn apply_advisory(&mut self, advisory: &Advisory) -> Result<ApplyOutcome> {
        if self.closed {
            bail!("grid simulator is closed");
        }

        match (&advisory.target, &advisory.action) {
            (AdvisoryTarget::Vehicle(id), AdvisoryAction::SpeedLimit { max_speed }) => {
                let Some(vehicle) = parse_vehicle_label(&id.0).and_then(|n| self.vehicles.get_mut(&n)) else {
                    return Ok(ApplyOutcome::UnknownTarget);
                };
                vehicle.apply_cap(*max_speed);
                self.stats.speed_limits_applied += 1;
            }
            (AdvisoryTarget::Vehicle(id), AdvisoryAction::Alert { .. }) => {
                let Some(vehicle) = parse_vehicle_label(&id.0).and_then(|n| self.vehicles.get_mut(&n)) else {
                    return Ok(ApplyOutcome::UnknownTarget);
                };
                vehicle.alerts += 1;
                self.stats.alerts_delivered += 1;
            }
            (AdvisoryTarget::Rsu(_), AdvisoryAction::SignalChange { signal_id, phase }) => {
                let Some(junction) = self.junction_with_signal(signal_id) else {
                    return Ok(ApplyOutcome::UnknownTarget);
                };
                if junction.request_phase(*phase) {
                    debug!("Signal {} switched to phase {}", signal_id, phase);
                    self.stats.signal_changes += 1;
                }
            }
            (target, action) => {
                bail!("unsupported advisory {:?} for {:?}", action.kind(), target);
            }
        }
        Ok(ApplyOutcome::Applied)
    }

    fn is_run_complete(&self) -> bool {
        self.step >= self.total_steps
    }

    fn close(&mut self) {
        if !self.closed {
            info!(
                "Grid simulator closed after {:.1}s ({} vehicles spawned)",
                self.time, self.stats.spawned
            );
            self.closed = true;
        }
    }
}
