mod common;

use common::{car, head_on, registry_with, safety, single_zone_config};
use v2x_safety::engine::{
    classify, project_pair, EngineConfig, PairKinematics, RiskEvaluator, RiskSubject, RsuConfig,
    RsuId, Severity, VehicleId, ZoneSummary,
};

fn evaluator() -> RiskEvaluator {
    RiskEvaluator::new(safety())
}

fn kinematics(distance: f64, closing_speed: f64, min_separation: f64) -> PairKinematics {
    PairKinematics {
        distance,
        closing_speed,
        time_to_closest: 0.0,
        min_separation,
        time_to_conflict: None,
    }
}

#[test]
fn test_head_on_projection() {
    let config = single_zone_config();
    let registry = registry_with(&config, head_on());
    let a = registry.vehicle(&VehicleId::new("veh_a")).expect("veh_a");
    let b = registry.vehicle(&VehicleId::new("veh_b")).expect("veh_b");

    let k = project_pair(a, b, 2.0, 5.0);
    assert!((k.distance - 15.0).abs() < 1e-9);
    assert!((k.closing_speed - 20.0).abs() < 1e-9);
    assert!((k.time_to_closest - 0.75).abs() < 1e-9);
    assert!(k.min_separation < 1e-6);
    let ttc = k.time_to_conflict.expect("conflict within horizon");
    assert!((ttc - 0.5).abs() < 1e-9);
}

#[test]
fn test_diverging_pair_has_closest_approach_now() {
    let config = single_zone_config();
    let registry = registry_with(
        &config,
        vec![
            car("veh_a", 0.0, -10.0, 10.0, 180.0),
            car("veh_b", 0.0, 10.0, 10.0, 0.0),
        ],
    );
    let a = registry.vehicle(&VehicleId::new("veh_a")).expect("veh_a");
    let b = registry.vehicle(&VehicleId::new("veh_b")).expect("veh_b");

    let k = project_pair(a, b, 2.0, 5.0);
    assert_eq!(k.time_to_closest, 0.0);
    assert!((k.min_separation - 20.0).abs() < 1e-9);
    assert!(k.closing_speed < 0.0);
    assert_eq!(k.time_to_conflict, None);
}

#[test]
fn test_classification_thresholds() {
    let config = safety();
    assert_eq!(classify(&kinematics(15.0, 20.0, 0.0), &config), Severity::Critical);
    assert_eq!(classify(&kinematics(15.0, 20.0, 4.99), &config), Severity::Critical);
    assert_eq!(classify(&kinematics(15.0, 20.0, 5.0), &config), Severity::Warning);
    assert_eq!(classify(&kinematics(9.0, 0.0, 7.9), &config), Severity::Warning);
    assert_eq!(classify(&kinematics(12.0, 1.0, 10.0), &config), Severity::Caution);
    assert_eq!(classify(&kinematics(12.0, 0.4, 10.0), &config), Severity::None);
    assert_eq!(classify(&kinematics(16.0, 5.0, 10.0), &config), Severity::None);
}

#[test]
fn test_classification_is_monotone_in_separation() {
    let config = safety();
    let mut previous = Severity::Critical;
    for step in 0..200 {
        let separation = step as f64 * 0.1;
        let severity = classify(&kinematics(14.0, 2.0, separation), &config);
        assert!(severity <= previous, "severity rose at separation {}", separation);
        previous = severity;
    }
}

#[test]
fn test_head_on_is_critical() {
    let config = single_zone_config();
    let registry = registry_with(&config, head_on());
    let risks = evaluator().evaluate(&registry);

    assert_eq!(risks.assessments.len(), 1);
    let assessment = &risks.assessments[0];
    assert_eq!(assessment.severity, Severity::Critical);
    assert_eq!(assessment.rsu, RsuId::new("rsu_main"));
    assert_eq!(
        assessment.subject,
        RiskSubject::Pair(VehicleId::new("veh_a"), VehicleId::new("veh_b"))
    );
    assert_eq!(risks.max_severity(), Severity::Critical);

    let zone = risks.zone(&RsuId::new("rsu_main")).expect("zone summary");
    assert_eq!(zone.vehicle_count, 2);
    assert_eq!(zone.worst, Severity::Critical);
    assert_eq!(zone.adverse_pairs(), 1);
}

#[test]
fn test_parallel_close_pair_is_warning_and_catching_up_is_caution() {
    let config = single_zone_config();
    let registry = registry_with(
        &config,
        vec![
            car("veh_a", 0.0, 0.0, 10.0, 0.0),
            car("veh_b", 6.0, 0.0, 10.0, 0.0),
            car("veh_c", 60.0, 0.0, 10.0, 0.0),
            car("veh_d", 60.0, -12.0, 11.0, 0.0),
        ],
    );
    let risks = evaluator().evaluate(&registry);

    let severity_of = |a: &str, b: &str| {
        risks
            .assessments
            .iter()
            .find(|x| x.subject == RiskSubject::Pair(VehicleId::new(a), VehicleId::new(b)))
            .map(|x| x.severity)
    };
    assert_eq!(severity_of("veh_a", "veh_b"), Some(Severity::Warning));
    assert_eq!(severity_of("veh_c", "veh_d"), Some(Severity::Caution));
    assert_eq!(risks.assessments.len(), 2);
}

#[test]
fn test_vehicles_outside_radius_are_never_assessed() {
    let config = single_zone_config();
    let registry = registry_with(
        &config,
        vec![
            car("veh_a", 0.0, 101.0, 10.0, 180.0),
            car("veh_b", 0.0, 110.0, 10.0, 0.0),
            car("veh_c", 0.0, 50.0, 0.0, 0.0),
        ],
    );
    let risks = evaluator().evaluate(&registry);

    assert!(risks.assessments.is_empty());
    assert_eq!(risks.zones[0].vehicle_count, 1);
}

#[test]
fn test_overlapping_zones_attribute_pair_once() {
    let mut config = single_zone_config();
    config.rsus = vec![
        RsuConfig {
            id: "rsu_b".to_string(),
            x: 10.0,
            y: 0.0,
            radius: 100.0,
            signal: None,
        },
        RsuConfig {
            id: "rsu_a".to_string(),
            x: -10.0,
            y: 0.0,
            radius: 100.0,
            signal: None,
        },
    ];
    let registry = registry_with(&config, head_on());
    let risks = evaluator().evaluate(&registry);

    assert_eq!(risks.assessments.len(), 1);
    assert_eq!(risks.assessments[0].rsu, RsuId::new("rsu_a"));
    assert_eq!(risks.zones.len(), 2);
    assert_eq!(risks.zone(&RsuId::new("rsu_b")).map(|z| z.vehicle_count), Some(2));
    assert_eq!(risks.zone(&RsuId::new("rsu_b")).map(|z| z.adverse_pairs()), Some(0));
}

#[test]
fn test_congested_zone_flags_fast_vehicles() {
    let config = single_zone_config();
    let mut vehicles: Vec<_> = (0..10)
        .map(|i| car(&format!("veh_{}", i), -90.0 + 20.0 * i as f64, 0.0, 12.0, 0.0))
        .collect();
    // A slow one is not flagged
    vehicles[3].speed = Some(5.0);
    let registry = registry_with(&config, vehicles);

    let risks = evaluator().evaluate(&registry);
    let zone_flags: Vec<_> = risks
        .assessments
        .iter()
        .filter(|a| matches!(a.subject, RiskSubject::Zone(_)))
        .collect();

    assert_eq!(zone_flags.len(), 9);
    assert!(zone_flags.iter().all(|a| a.severity == Severity::Caution));
    assert!(!zone_flags
        .iter()
        .any(|a| a.subject.involves(&VehicleId::new("veh_3"))));
}

#[test]
fn test_worst_assessment_wins_per_vehicle() {
    let config = single_zone_config();
    // veh_b is critical with veh_a and only a warning with veh_c
    let registry = registry_with(
        &config,
        vec![
            car("veh_a", 0.0, -7.5, 10.0, 0.0),
            car("veh_b", 0.0, 7.5, 10.0, 180.0),
            car("veh_c", 6.0, 7.5, 10.0, 180.0),
        ],
    );
    let risks = evaluator().evaluate(&registry);
    let worst = risks.worst_by_vehicle();

    let b = worst[&VehicleId::new("veh_b")];
    assert_eq!(risks.assessments[b].severity, Severity::Critical);
    assert!(risks.assessments[b]
        .subject
        .involves(&VehicleId::new("veh_a")));
    assert_eq!(risks.involving(&VehicleId::new("veh_b")).count(), 2);
}

#[test]
fn test_evaluation_is_deterministic() {
    let config = EngineConfig::grid_preset();
    let vehicles = (0..12)
        .map(|i| {
            car(
                &format!("veh_{}", i),
                380.0 + 4.0 * i as f64,
                390.0 + (i % 3) as f64 * 6.0,
                8.0 + i as f64,
                (i * 37) as f64,
            )
        })
        .collect();
    let registry = registry_with(&config, vehicles);
    let evaluator = RiskEvaluator::new(config.safety.clone());

    let first = evaluator.evaluate(&registry);
    let second = evaluator.evaluate(&registry);
    assert_eq!(first, second);
    assert!(!first.assessments.is_empty());
}

#[test]
fn test_empty_zone_summary() {
    let zone = ZoneSummary::default();
    assert_eq!(zone.rsu, RsuId::default());
    assert_eq!(zone.vehicle_count, 0);
    assert_eq!(zone.worst, Severity::None);
    assert_eq!(zone.adverse_pairs(), 0);
}
