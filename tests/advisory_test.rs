mod common;

use common::{car, head_on, registry_with, safety, single_zone_config, snapshot};
use v2x_safety::engine::{
    response_for, AdvisoryAction, AdvisoryGenerator, AdvisoryId, AdvisoryKind, AdvisoryTarget,
    EngineError, Issuer, RiskEvaluator, RsuId, Severity, SpeedCap, SuppressionReason, VehicleId,
};

fn speed_limit(action: &AdvisoryAction) -> Option<f64> {
    match action {
        AdvisoryAction::SpeedLimit { max_speed } => Some(*max_speed),
        _ => None,
    }
}

#[test]
fn test_severity_response_mapping_is_total() {
    let critical = response_for(Severity::Critical);
    assert_eq!(critical.speed_cap, Some(SpeedCap::Floor));
    assert!(critical.alert);

    let warning = response_for(Severity::Warning);
    assert_eq!(warning.speed_cap, Some(SpeedCap::Reduced));
    assert!(!warning.alert);

    let caution = response_for(Severity::Caution);
    assert_eq!(caution.speed_cap, None);
    assert!(caution.alert);

    assert!(response_for(Severity::None).is_empty());
}

#[test]
fn test_critical_pair_caps_both_vehicles_at_floor() {
    let config = single_zone_config();
    let registry = registry_with(&config, head_on());
    let risks = RiskEvaluator::new(safety()).evaluate(&registry);
    let mut generator = AdvisoryGenerator::new(safety());

    let batch = generator.generate(&risks, &registry, 1);

    assert_eq!(batch.advisories.len(), 4);
    let ids: Vec<AdvisoryId> = batch.advisories.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![AdvisoryId(1), AdvisoryId(2), AdvisoryId(3), AdvisoryId(4)]);

    for vehicle in ["veh_a", "veh_b"] {
        let advisory = batch
            .speed_limit_for(&VehicleId::new(vehicle))
            .expect("speed limit issued");
        assert_eq!(speed_limit(&advisory.action), Some(2.0));
        assert_eq!(advisory.issuer, Issuer::Rsu(RsuId::new("rsu_main")));
        assert_eq!(advisory.tick, 1);
    }
    let alerts = batch
        .advisories
        .iter()
        .filter(|a| a.kind() == AdvisoryKind::Alert)
        .count();
    assert_eq!(alerts, 2);
    assert_eq!(batch.by_assessment[&0].len(), 4);
    assert!(batch.suppressed.is_empty());
    assert!(batch.signal_changes.is_empty());
    assert_eq!(generator.active_speed_limits(), 2);
}

#[test]
fn test_warning_reduces_speed_with_floor() {
    let config = single_zone_config();
    let registry = registry_with(
        &config,
        vec![
            car("veh_a", 0.0, 0.0, 10.0, 0.0),
            car("veh_b", 6.0, 0.0, 10.0, 0.0),
            car("veh_c", 50.0, 0.0, 2.5, 0.0),
            car("veh_d", 56.0, 0.0, 2.5, 0.0),
        ],
    );
    let risks = RiskEvaluator::new(safety()).evaluate(&registry);
    let batch = AdvisoryGenerator::new(safety()).generate(&risks, &registry, 1);

    let cap = |id: &str| {
        batch
            .speed_limit_for(&VehicleId::new(id))
            .and_then(|a| speed_limit(&a.action))
    };
    assert_eq!(cap("veh_a"), Some(6.0));
    assert_eq!(cap("veh_b"), Some(6.0));
    // 2.5 * 0.6 falls under the floor
    assert_eq!(cap("veh_c"), Some(2.0));
    assert!(batch.advisories.iter().all(|a| a.kind() == AdvisoryKind::SpeedLimit));
}

#[test]
fn test_held_cap_is_reissued_until_severity_changes() {
    let config = single_zone_config();
    let evaluator = RiskEvaluator::new(safety());
    let mut generator = AdvisoryGenerator::new(safety());
    let mut registry = registry_with(
        &config,
        vec![car("veh_a", 0.0, 0.0, 10.0, 0.0), car("veh_b", 6.0, 0.0, 10.0, 0.0)],
    );

    let first = generator.generate(&evaluator.evaluate(&registry), &registry, 1);
    let first_cap = first
        .speed_limit_for(&VehicleId::new("veh_a"))
        .and_then(|a| speed_limit(&a.action));
    assert_eq!(first_cap, Some(6.0));

    // Vehicles slowed down but are still a warning pair
    registry.update(&snapshot(
        2,
        vec![car("veh_a", 0.0, 1.2, 6.0, 0.0), car("veh_b", 6.0, 1.2, 6.0, 0.0)],
    ));
    let second = generator.generate(&evaluator.evaluate(&registry), &registry, 2);
    let second_cap = second
        .speed_limit_for(&VehicleId::new("veh_a"))
        .and_then(|a| speed_limit(&a.action));
    assert_eq!(second_cap, Some(6.0));

    // Escalation replaces the held cap
    registry.update(&snapshot(
        3,
        vec![car("veh_a", 0.0, 2.4, 6.0, 0.0), car("veh_b", 3.0, 2.4, 6.0, 0.0)],
    ));
    let third = generator.generate(&evaluator.evaluate(&registry), &registry, 3);
    let third_cap = third
        .speed_limit_for(&VehicleId::new("veh_a"))
        .and_then(|a| speed_limit(&a.action));
    assert_eq!(third_cap, Some(2.0));

    // Risk cleared, cap lapses
    registry.update(&snapshot(
        4,
        vec![car("veh_a", 0.0, 3.0, 6.0, 0.0), car("veh_b", 40.0, 3.0, 6.0, 0.0)],
    ));
    let fourth = generator.generate(&evaluator.evaluate(&registry), &registry, 4);
    assert!(fourth.advisories.is_empty());
    assert_eq!(generator.active_speed_limits(), 0);
}

#[test]
fn test_one_speed_limit_per_vehicle_from_worst_assessment() {
    let config = single_zone_config();
    let registry = registry_with(
        &config,
        vec![
            car("veh_a", 0.0, -7.5, 10.0, 0.0),
            car("veh_b", 0.0, 7.5, 10.0, 180.0),
            car("veh_c", 6.0, 7.5, 10.0, 180.0),
        ],
    );
    let risks = RiskEvaluator::new(safety()).evaluate(&registry);
    let batch = AdvisoryGenerator::new(safety()).generate(&risks, &registry, 1);

    for vehicle in ["veh_a", "veh_b", "veh_c"] {
        let limits = batch
            .advisories
            .iter()
            .filter(|a| {
                a.kind() == AdvisoryKind::SpeedLimit
                    && a.target == AdvisoryTarget::Vehicle(VehicleId::new(vehicle))
            })
            .count();
        assert_eq!(limits, 1, "{} got {} speed limits", vehicle, limits);
    }

    let b = batch
        .speed_limit_for(&VehicleId::new("veh_b"))
        .and_then(|a| speed_limit(&a.action));
    assert_eq!(b, Some(2.0));

    let outranked: Vec<_> = batch
        .suppressed
        .iter()
        .filter(|s| s.reason == SuppressionReason::Outranked)
        .collect();
    assert!(outranked
        .iter()
        .any(|s| s.vehicle == VehicleId::new("veh_b")
            && risks.assessments[s.assessment].severity == Severity::Warning));
}

#[test]
fn test_non_v2x_vehicle_gets_no_advisory() {
    let config = single_zone_config();
    let mut vehicles = head_on();
    vehicles[1] = vehicles[1].clone().without_v2x();
    let registry = registry_with(&config, vehicles);
    let risks = RiskEvaluator::new(safety()).evaluate(&registry);
    let batch = AdvisoryGenerator::new(safety()).generate(&risks, &registry, 1);

    assert!(batch.speed_limit_for(&VehicleId::new("veh_a")).is_some());
    assert!(batch.speed_limit_for(&VehicleId::new("veh_b")).is_none());
    assert!(batch
        .advisories
        .iter()
        .all(|a| a.target != AdvisoryTarget::Vehicle(VehicleId::new("veh_b"))));
    assert!(batch.suppressed.iter().any(|s| s.vehicle == VehicleId::new("veh_b")
        && s.reason == SuppressionReason::NotV2xCapable));
}

#[test]
fn test_zone_risk_triggers_signal_change() {
    let mut config = single_zone_config();
    config.safety.signal_risk_threshold = 1;
    let registry = registry_with(&config, head_on());
    let risks = RiskEvaluator::new(config.safety.clone()).evaluate(&registry);
    let batch = AdvisoryGenerator::new(config.safety.clone()).generate(&risks, &registry, 7);

    assert_eq!(batch.signal_changes.len(), 1);
    let (rsu, id) = &batch.signal_changes[0];
    assert_eq!(rsu, &RsuId::new("rsu_main"));
    let advisory = batch
        .advisories
        .iter()
        .find(|a| a.id == *id)
        .expect("signal advisory present");
    assert_eq!(advisory.target, AdvisoryTarget::Rsu(RsuId::new("rsu_main")));
    assert_eq!(
        advisory.action,
        AdvisoryAction::SignalChange {
            signal_id: "J0".to_string(),
            phase: 2
        }
    );
    assert_eq!(advisory.tick, 7);
}

#[test]
fn test_dense_zone_triggers_signal_change() {
    let mut config = single_zone_config();
    config.safety.signal_vehicle_threshold = 3;
    let registry = registry_with(
        &config,
        vec![
            car("veh_a", -60.0, 0.0, 5.0, 0.0),
            car("veh_b", 0.0, 0.0, 5.0, 0.0),
            car("veh_c", 60.0, 0.0, 5.0, 0.0),
        ],
    );
    let risks = RiskEvaluator::new(config.safety.clone()).evaluate(&registry);
    let batch = AdvisoryGenerator::new(config.safety.clone()).generate(&risks, &registry, 1);

    assert!(risks.assessments.is_empty());
    assert_eq!(batch.advisories.len(), 1);
    assert_eq!(batch.advisories[0].kind(), AdvisoryKind::SignalChange);
}

#[test]
fn test_departed_target_is_dropped_as_unknown_entity() {
    let config = single_zone_config();
    let mut registry = registry_with(&config, head_on());
    let risks = RiskEvaluator::new(safety()).evaluate(&registry);

    // veh_b leaves before advisories go out
    registry.update(&snapshot(2, vec![head_on()[0].clone()]));
    let batch = AdvisoryGenerator::new(safety()).generate(&risks, &registry, 2);

    assert!(batch
        .advisories
        .iter()
        .all(|a| a.target != AdvisoryTarget::Vehicle(VehicleId::new("veh_b"))));
    assert_eq!(batch.dropped.len(), 1);
    assert!(matches!(
        &batch.dropped[0],
        EngineError::UnknownEntity { entity, .. } if entity == "veh_b"
    ));
}
