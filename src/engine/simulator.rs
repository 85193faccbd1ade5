//! Boundary to the external microscopic traffic simulator
//!
//! The engine never computes vehicle motion. It reads snapshots through
//! [`SimulatorInterface`] and pushes advisories back the same way.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::advisory::{Advisory, AdvisoryTarget};
use super::types::{Position, VehicleKind};

/// One vehicle entry in a simulator snapshot
///
/// Fields are optional because the simulator may report partial data;
/// the registry rejects entries missing anything it requires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleReport {
    pub id: String,
    pub kind: Option<VehicleKind>,
    pub position: Option<Position>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    #[serde(default = "default_v2x")]
    pub v2x_capable: bool,
}

fn default_v2x() -> bool {
    true
}

impl VehicleReport {
    pub fn new(id: impl Into<String>, kind: VehicleKind, x: f64, y: f64, speed: f64, heading: f64) -> Self {
        Self {
            id: id.into(),
            kind: Some(kind),
            position: Some(Position::new(x, y)),
            speed: Some(speed),
            heading: Some(heading),
            v2x_capable: true,
        }
    }

    pub fn without_v2x(mut self) -> Self {
        self.v2x_capable = false;
        self
    }

    pub fn without_position(mut self) -> Self {
        self.position = None;
        self
    }
}

/// Full set of vehicles present at one simulator step
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub tick: u64,
    pub vehicles: Vec<VehicleReport>,
}

/// How the simulator handled an advisory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The simulator does not know the target (e.g. it left the network)
    UnknownTarget,
}

/// The engine's only view of the traffic simulator
pub trait SimulatorInterface {
    /// Advance the simulator one step and return the resulting state
    fn snapshot(&mut self) -> Result<Snapshot>;

    /// Apply a control action. Re-applying an identical advisory must be a no-op.
    fn apply_advisory(&mut self, advisory: &Advisory) -> Result<ApplyOutcome>;

    fn is_run_complete(&self) -> bool;

    /// Release the simulator connection
    fn close(&mut self) {}
}

/// Replays a fixed sequence of snapshots and records applied advisories
///
/// Used for deterministic runs and tests. Snapshot failures can be injected
/// at given step indices (0-based).
#[derive(Debug, Clone, Default)]
pub struct ScriptedSimulator {
    frames: Vec<Snapshot>,
    cursor: usize,
    failing_steps: HashSet<usize>,
    step: usize,
    current_ids: HashSet<String>,
    pub applied: Vec<Advisory>,
    pub closed: bool,
}

impl ScriptedSimulator {
    pub fn new(frames: Vec<Snapshot>) -> Self {
        Self {
            frames,
            ..Self::default()
        }
    }

    /// Build from per-step vehicle lists, numbering ticks from 1
    pub fn from_frames(frames: Vec<Vec<VehicleReport>>) -> Self {
        let snapshots = frames
            .into_iter()
            .enumerate()
            .map(|(i, vehicles)| Snapshot {
                tick: i as u64 + 1,
                vehicles,
            })
            .collect();
        Self::new(snapshots)
    }

    /// Make the snapshot call at `step` fail without consuming a frame
    pub fn fail_at(mut self, steps: impl IntoIterator<Item = usize>) -> Self {
        self.failing_steps.extend(steps);
        self
    }

    pub fn remaining(&self) -> usize {
        self.frames.len() - self.cursor
    }
}

impl SimulatorInterface for ScriptedSimulator {
    fn snapshot(&mut self) -> Result<Snapshot> {
        let step = self.step;
        self.step += 1;
        if self.failing_steps.contains(&step) {
            bail!("injected simulator failure at step {}", step);
        }
        let Some(frame) = self.frames.get(self.cursor).cloned() else {
            bail!("no more scripted snapshots");
        };
        self.cursor += 1;
        self.current_ids = frame.vehicles.iter().map(|v| v.id.clone()).collect();
        Ok(frame)
    }

    fn apply_advisory(&mut self, advisory: &Advisory) -> Result<ApplyOutcome> {
        if let AdvisoryTarget::Vehicle(id) = &advisory.target {
            if !self.current_ids.contains(&id.0) {
                return Ok(ApplyOutcome::UnknownTarget);
            }
        }
        self.applied.push(advisory.clone());
        Ok(ApplyOutcome::Applied)
    }

    fn is_run_complete(&self) -> bool {
        self.cursor >= self.frames.len()
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
