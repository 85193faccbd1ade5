#![allow(dead_code)]

use v2x_safety::engine::{
    EngineConfig, EntityRegistry, RsuConfig, SafetyConfig, SignalHandle, Snapshot, VehicleKind,
    VehicleReport,
};

pub const RSU: &str = "rsu_main";

/// Preset thresholds with the wall-clock budget check disabled
pub fn safety() -> SafetyConfig {
    let mut safety = EngineConfig::grid_preset().safety;
    safety.tick_budget_ms = 0;
    safety
}

/// One signalised RSU at the origin with a 100 m zone
pub fn single_zone_config() -> EngineConfig {
    EngineConfig {
        safety: safety(),
        rsus: vec![RsuConfig {
            id: RSU.to_string(),
            x: 0.0,
            y: 0.0,
            radius: 100.0,
            signal: Some(SignalHandle {
                signal_id: "J0".to_string(),
                mitigation_phase: 2,
            }),
        }],
    }
}

pub fn car(id: &str, x: f64, y: f64, speed: f64, heading: f64) -> VehicleReport {
    VehicleReport::new(id, VehicleKind::Car, x, y, speed, heading)
}

/// Two cars 15 m apart driving straight at each other at 10 m/s each
pub fn head_on() -> Vec<VehicleReport> {
    vec![
        car("veh_a", 0.0, -7.5, 10.0, 0.0),
        car("veh_b", 0.0, 7.5, 10.0, 180.0),
    ]
}

pub fn snapshot(tick: u64, vehicles: Vec<VehicleReport>) -> Snapshot {
    Snapshot { tick, vehicles }
}

pub fn registry_with(config: &EngineConfig, vehicles: Vec<VehicleReport>) -> EntityRegistry {
    let mut registry = EntityRegistry::new(config.build_rsus());
    registry.update(&snapshot(1, vehicles));
    registry
}
