//! Signalised junctions

use super::network::JunctionId;
use crate::engine::Position;

/// How long a mitigation phase holds approaching traffic (seconds)
pub const SIGNAL_HOLD_SECS: f64 = 4.0;

/// Minimum time traffic is released between two holds (seconds)
pub const SIGNAL_RELEASE_SECS: f64 = 6.0;

#[derive(Debug, Clone)]
pub struct Junction {
    pub id: JunctionId,
    pub position: Position,
    /// Signal program controlling this junction, if any
    pub signal_id: Option<String>,
    pub phase: u32,
    /// Remaining time approaching vehicles must wait at the stop line
    pub hold_remaining: f64,
    release_remaining: f64,
    pub phase_changes: usize,
}

impl Junction {
    pub fn new(id: JunctionId, position: Position) -> Self {
        Self {
            id,
            position,
            signal_id: None,
            phase: 0,
            hold_remaining: 0.0,
            release_remaining: 0.0,
            phase_changes: 0,
        }
    }

    /// Request a mitigation phase; returns whether the signal changed
    ///
    /// A request for the phase already held, or one arriving while released
    /// traffic still has its minimum green, leaves the signal as it is.
    pub fn request_phase(&mut self, phase: u32) -> bool {
        if self.is_holding() || self.release_remaining > 0.0 {
            return false;
        }
        self.phase = phase;
        self.hold_remaining = SIGNAL_HOLD_SECS;
        self.phase_changes += 1;
        true
    }

    pub fn is_holding(&self) -> bool {
        self.hold_remaining > 0.0
    }

    pub fn update_timer(&mut self, delta_secs: f64) {
        if self.hold_remaining > 0.0 {
            self.hold_remaining = (self.hold_remaining - delta_secs).max(0.0);
            if self.hold_remaining == 0.0 {
                self.phase = 0;
                self.release_remaining = SIGNAL_RELEASE_SECS;
            }
        } else if self.release_remaining > 0.0 {
            self.release_remaining = (self.release_remaining - delta_secs).max(0.0);
        }
    }
}
