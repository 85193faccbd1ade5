use std::fs;

use tempfile::tempdir;
use v2x_safety::engine::{ConfigError, EngineConfig, RsuConfig};

#[test]
fn test_grid_preset_is_valid() {
    let config = EngineConfig::grid_preset();
    assert_eq!(config.validate(), Ok(()));
    assert_eq!(config.rsus.len(), 5);
    assert!(config.rsus.iter().all(|r| r.radius == 100.0));

    let rsus = config.build_rsus();
    let b1 = rsus
        .iter()
        .find(|r| r.id.0 == "rsu_B1")
        .expect("rsu_B1 in preset");
    assert_eq!((b1.position.x, b1.position.y), (400.0, 400.0));
    assert_eq!(b1.signal.as_ref().map(|s| s.signal_id.as_str()), Some("B1"));
}

#[test]
fn test_json_file_round_trip() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("engine.json");
    let config = EngineConfig::grid_preset();
    fs::write(&path, serde_json::to_string_pretty(&config).expect("serialize")).expect("write");

    let loaded = EngineConfig::from_json_file(&path).expect("load config");
    assert_eq!(loaded, config);
}

#[test]
fn test_missing_file_is_reported_with_path() {
    let err = EngineConfig::from_json_file("/nonexistent/engine.json").unwrap_err();
    assert!(format!("{:#}", err).contains("/nonexistent/engine.json"));
}

#[test]
fn test_thresholds_are_required() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("partial.json");
    let mut value = serde_json::to_value(EngineConfig::grid_preset()).expect("to value");
    value["safety"]
        .as_object_mut()
        .expect("safety object")
        .remove("critical_distance");
    fs::write(&path, value.to_string()).expect("write");

    let err = EngineConfig::from_json_file(&path).unwrap_err();
    assert!(
        format!("{:#}", err).contains("critical_distance"),
        "error was {:#}",
        err
    );
}

#[test]
fn test_unknown_fields_are_rejected() {
    let mut value = serde_json::to_value(EngineConfig::grid_preset()).expect("to value");
    value["safety"]["critcal_distance"] = serde_json::json!(4.0);
    assert!(serde_json::from_value::<EngineConfig>(value).is_err());
}

#[test]
fn test_threshold_ordering_is_validated() {
    let mut config = EngineConfig::grid_preset();
    config.safety.critical_distance = 8.0;
    assert!(matches!(config.validate(), Err(ConfigError::Ordering(_))));

    let mut config = EngineConfig::grid_preset();
    config.safety.score_delta_warning = 12.0;
    assert!(matches!(config.validate(), Err(ConfigError::Ordering(_))));

    let mut config = EngineConfig::grid_preset();
    config.safety.horizon_secs = 0.0;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::NotPositive {
            field: "horizon_secs",
            ..
        })
    ));

    let mut config = EngineConfig::grid_preset();
    config.safety.warning_speed_factor = 1.5;
    assert!(matches!(config.validate(), Err(ConfigError::OutOfRange { .. })));
}

#[test]
fn test_rsu_topology_is_validated() {
    let mut config = EngineConfig::grid_preset();
    config.rsus.push(config.rsus[0].clone());
    assert_eq!(
        config.validate(),
        Err(ConfigError::DuplicateRsu("rsu_A1".to_string()))
    );

    let mut config = EngineConfig::grid_preset();
    config.rsus.push(RsuConfig {
        id: "rsu_bad".to_string(),
        x: 0.0,
        y: 0.0,
        radius: -1.0,
        signal: None,
    });
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidRsu { id, .. }) if id == "rsu_bad"
    ));
}
