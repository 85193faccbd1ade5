//! Engine configuration
//!
//! Thresholds and weights are simulation-tuning parameters, so every field of
//! [`SafetyConfig`] is required when loading from JSON. The only built-in
//! values live in [`EngineConfig::grid_preset`], which matches the demo grid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use super::error::ConfigError;
use super::types::{Position, Rsu, RsuId, SignalHandle};

/// Tunable thresholds for risk evaluation, advisories and scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SafetyConfig {
    /// Projected separation below this is critical (m)
    pub critical_distance: f64,
    /// Projected separation below this is a warning (m)
    pub warning_distance: f64,
    /// Outer margin inside which closing vehicles are a caution (m)
    pub caution_distance: f64,
    /// Closing speed above which a pair inside the caution margin is flagged (m/s)
    pub caution_closing_speed: f64,
    /// Extrapolation horizon for time-to-conflict (s)
    pub horizon_secs: f64,
    /// Speed cap issued on critical risk (m/s)
    pub speed_floor: f64,
    /// Fraction of current speed kept on a warning advisory
    pub warning_speed_factor: f64,
    pub baseline_score: f64,
    pub score_delta_critical: f64,
    pub score_delta_warning: f64,
    /// Points regained per tick without critical or warning events
    pub recovery_rate: f64,
    /// Zone vehicle count that triggers a signal-phase change
    pub signal_vehicle_threshold: usize,
    /// Warning-or-worse pair assessments in a zone that trigger a signal change
    pub signal_risk_threshold: usize,
    /// Zone vehicle count at which fast vehicles get a congestion caution
    pub congestion_vehicle_threshold: usize,
    /// Speed above which a vehicle in a congested zone is flagged (m/s)
    pub congestion_speed_limit: f64,
    pub max_consecutive_failures: u32,
    /// Wall-clock budget for one tick (ms); 0 disables the check
    pub tick_budget_ms: u64,
    /// Number of (tick, score) points retained for trend reporting
    pub score_history_len: usize,
}

impl SafetyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("critical_distance", self.critical_distance),
            ("warning_distance", self.warning_distance),
            ("caution_distance", self.caution_distance),
            ("horizon_secs", self.horizon_secs),
            ("baseline_score", self.baseline_score),
            ("score_delta_warning", self.score_delta_warning),
            ("score_delta_critical", self.score_delta_critical),
        ];
        for (field, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::NotPositive { field, value });
            }
        }

        let non_negative = [
            ("caution_closing_speed", self.caution_closing_speed),
            ("speed_floor", self.speed_floor),
            ("recovery_rate", self.recovery_rate),
            ("congestion_speed_limit", self.congestion_speed_limit),
        ];
        for (field, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Negative { field, value });
            }
        }

        if self.critical_distance >= self.warning_distance {
            return Err(ConfigError::Ordering(format!(
                "critical_distance ({}) must be below warning_distance ({})",
                self.critical_distance, self.warning_distance
            )));
        }
        if self.warning_distance > self.caution_distance {
            return Err(ConfigError::Ordering(format!(
                "warning_distance ({}) must not exceed caution_distance ({})",
                self.warning_distance, self.caution_distance
            )));
        }
        if self.score_delta_critical <= self.score_delta_warning {
            return Err(ConfigError::Ordering(format!(
                "score_delta_critical ({}) must exceed score_delta_warning ({})",
                self.score_delta_critical, self.score_delta_warning
            )));
        }
        if !(self.warning_speed_factor > 0.0 && self.warning_speed_factor <= 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "warning_speed_factor",
                reason: format!("{} is not in (0, 1]", self.warning_speed_factor),
            });
        }
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::OutOfRange {
                field: "max_consecutive_failures",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.signal_vehicle_threshold == 0 || self.signal_risk_threshold == 0 {
            return Err(ConfigError::OutOfRange {
                field: "signal thresholds",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.congestion_vehicle_threshold == 0 {
            return Err(ConfigError::OutOfRange {
                field: "congestion_vehicle_threshold",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.score_history_len == 0 {
            return Err(ConfigError::OutOfRange {
                field: "score_history_len",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Static description of one road-side unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RsuConfig {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    #[serde(default)]
    pub signal: Option<SignalHandle>,
}

impl RsuConfig {
    pub fn to_rsu(&self) -> Rsu {
        Rsu {
            id: RsuId(self.id.clone()),
            position: Position::new(self.x, self.y),
            radius: self.radius,
            signal: self.signal.clone(),
        }
    }
}

/// Full engine configuration: thresholds plus RSU topology
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub safety: SafetyConfig,
    pub rsus: Vec<RsuConfig>,
}

impl EngineConfig {
    /// Load and validate a configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: EngineConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.safety.validate()?;

        let mut seen = HashSet::new();
        for rsu in &self.rsus {
            if rsu.id.is_empty() {
                return Err(ConfigError::InvalidRsu {
                    id: rsu.id.clone(),
                    reason: "id is empty".to_string(),
                });
            }
            if !seen.insert(rsu.id.as_str()) {
                return Err(ConfigError::DuplicateRsu(rsu.id.clone()));
            }
            if !rsu.x.is_finite() || !rsu.y.is_finite() {
                return Err(ConfigError::InvalidRsu {
                    id: rsu.id.clone(),
                    reason: "position is not finite".to_string(),
                });
            }
            if !rsu.radius.is_finite() || rsu.radius <= 0.0 {
                return Err(ConfigError::InvalidRsu {
                    id: rsu.id.clone(),
                    reason: format!("radius {} must be positive", rsu.radius),
                });
            }
        }
        Ok(())
    }

    pub fn build_rsus(&self) -> Vec<Rsu> {
        self.rsus.iter().map(RsuConfig::to_rsu).collect()
    }

    /// Preset matching the demo 3x3 grid: five RSUs with 100 m zones on
    /// signalised junctions, thresholds tuned for urban speeds
    pub fn grid_preset() -> Self {
        let rsu = |id: &str, x: f64, y: f64| RsuConfig {
            id: format!("rsu_{}", id),
            x,
            y,
            radius: 100.0,
            signal: Some(SignalHandle {
                signal_id: id.to_string(),
                mitigation_phase: 1,
            }),
        };

        Self {
            safety: SafetyConfig {
                critical_distance: 5.0,
                warning_distance: 8.0,
                caution_distance: 15.0,
                caution_closing_speed: 0.5,
                horizon_secs: 2.0,
                speed_floor: 2.0,
                warning_speed_factor: 0.6,
                baseline_score: 100.0,
                score_delta_critical: 10.0,
                score_delta_warning: 2.0,
                recovery_rate: 0.1,
                signal_vehicle_threshold: 10,
                signal_risk_threshold: 3,
                congestion_vehicle_threshold: 10,
                congestion_speed_limit: 10.0,
                max_consecutive_failures: 5,
                tick_budget_ms: 50,
                score_history_len: 600,
            },
            rsus: vec![
                rsu("A1", 200.0, 200.0),
                rsu("B0", 200.0, 400.0),
                rsu("B1", 400.0, 400.0),
                rsu("B2", 600.0, 400.0),
                rsu("C1", 400.0, 600.0),
            ],
        }
    }
}
