// Integration tests for joint rotation through the public vessel API

use glam::{DQuat, DVec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use swivel_rs::{
    Assembly, BodyId, CONTINUOUS, Config, NodeJointFinder, ResourceKind, ResourcePool, RotateError, RotatorConfig,
    RotatorId, StructureEvent, Vessel,
};

const DT: f64 = 0.02;

struct Arm {
    vessel: Vessel,
    base: BodyId,
    arm: BodyId,
    tip: BodyId,
    strut: BodyId,
    hinge: RotatorId,
    wrist: RotatorId,
}

/// base -> arm -> tip, plus a strut on the base locked to the arm, the tip
/// and the base.
fn arm(rotator: RotatorConfig) -> Arm {
    let mut asm = Assembly::new(1, "arm");
    let base = asm.add_body("base", DQuat::IDENTITY, DVec3::ZERO);
    let arm = asm.add_body("arm", DQuat::IDENTITY, DVec3::new(0.0, 1.0, 0.0));
    let tip = asm.add_body("tip", DQuat::IDENTITY, DVec3::new(0.0, 2.0, 0.0));
    let strut = asm.add_body("strut", DQuat::IDENTITY, DVec3::new(1.0, 1.0, 0.0));
    asm.attach(arm, base, &[DVec3::new(0.0, -0.5, 0.0)]).unwrap();
    asm.attach(tip, arm, &[DVec3::new(0.0, -0.5, 0.0), DVec3::new(0.1, -0.5, 0.0)])
        .unwrap();
    asm.attach(strut, base, &[]).unwrap();
    asm.add_auto_lock(tip, strut).unwrap();
    asm.add_auto_lock(arm, strut).unwrap();
    asm.add_auto_lock(base, strut).unwrap();

    let config = Config {
        rotator,
        ..Default::default()
    };
    let mut vessel = Vessel::new(asm, config);
    let hinge = vessel
        .add_rotator(arm, Box::new(NodeJointFinder::new(DVec3::Y, DVec3::ZERO)))
        .unwrap();
    let wrist = vessel
        .add_rotator(tip, Box::new(NodeJointFinder::new(DVec3::Y, DVec3::ZERO)))
        .unwrap();
    assert!(vessel.start().is_clean());
    Arm {
        vessel,
        base,
        arm,
        tip,
        strut,
        hinge,
        wrist,
    }
}

fn run(vessel: &mut Vessel, ticks: usize) {
    for _ in 0..ticks {
        vessel.fixed_update(DT, false);
    }
}

fn assert_angle(vessel: &Vessel, id: RotatorId, expected: f64) {
    let angle = vessel.current_angle(id).unwrap();
    assert!((angle - expected).abs() < 1e-6, "{} at {}, expected {}", id, angle, expected);
}

#[test]
fn test_bounded_requests_add_up() {
    let mut a = arm(RotatorConfig::default());
    assert!(a.vessel.enqueue_rotation(a.hinge, 30.0, 10.0).unwrap());
    run(&mut a.vessel, 10);
    assert!(a.vessel.enqueue_rotation(a.hinge, 15.0, 10.0).unwrap());
    let target = a.vessel.status().rotators[0].target;
    assert_eq!(target, Some(45.0));
    run(&mut a.vessel, 1000);
    assert!(!a.vessel.is_rotating(a.hinge).unwrap());
    assert_angle(&a.vessel, a.hinge, 45.0);
}

#[test]
fn test_nan_requests_never_start_a_rotation() {
    let mut a = arm(RotatorConfig::default());
    assert!(!a.vessel.enqueue_rotation(a.hinge, f64::NAN, 10.0).unwrap());
    assert!(!a.vessel.enqueue_rotation(a.hinge, 30.0, f64::NAN).unwrap());
    run(&mut a.vessel, 10);
    assert!(!a.vessel.is_rotating(a.hinge).unwrap());
    assert_eq!(a.vessel.in_motion_count(), 0);
    assert_eq!(a.vessel.assembly().engaged_locks(), 3);
    assert_angle(&a.vessel, a.hinge, 0.0);

    // a running rotation ignores them and still finishes
    assert!(a.vessel.enqueue_rotation(a.hinge, 20.0, 10.0).unwrap());
    run(&mut a.vessel, 5);
    assert!(!a.vessel.enqueue_rotation(a.hinge, 30.0, f64::NAN).unwrap());
    run(&mut a.vessel, 1000);
    assert_eq!(a.vessel.in_motion_count(), 0);
    assert_eq!(a.vessel.assembly().engaged_locks(), 3);
    assert_angle(&a.vessel, a.hinge, 20.0);
}

#[test]
fn test_continuous_request_is_idempotent() {
    let mut a = arm(RotatorConfig::default());
    assert!(a.vessel.enqueue_rotation(a.hinge, CONTINUOUS, 10.0).unwrap());
    run(&mut a.vessel, 20);
    assert!(a.vessel.enqueue_rotation(a.hinge, CONTINUOUS, 25.0).unwrap());
    let jm = a.vessel.status().rotators[0].clone();
    assert_eq!(jm.target, Some(CONTINUOUS));
    assert_eq!(a.vessel.rotator(a.hinge).unwrap().frozen().angle, CONTINUOUS);

    // a bounded request anchors on the stopping point instead
    assert!(a.vessel.enqueue_rotation(a.hinge, 10.0, 25.0).unwrap());
    let target = a.vessel.status().rotators[0].target.unwrap();
    assert!(target < 100.0);
    run(&mut a.vessel, 1000);
    assert!(!a.vessel.is_rotating(a.hinge).unwrap());
    assert!(!a.vessel.rotator(a.hinge).unwrap().frozen().is_pending());
}

#[test]
fn test_structure_change_freezes_and_resumes_to_absolute_target() {
    let mut a = arm(RotatorConfig::default());
    assert!(a.vessel.enqueue_rotation(a.hinge, 90.0, 20.0).unwrap());
    run(&mut a.vessel, 60);
    let before = a.vessel.current_angle(a.hinge).unwrap();
    assert!(before > 0.0 && before < 90.0);

    let visitor = a.vessel.assembly_mut().add_body("visitor", DQuat::IDENTITY, DVec3::new(-1.0, 0.0, 0.0));
    let report = a.vessel.notify(StructureEvent::Couple { from: visitor, to: a.base });
    assert_eq!(report.notified, 2);
    assert!(!a.vessel.is_rotating(a.hinge).unwrap());
    assert_eq!(a.vessel.in_motion_count(), 0);
    let frozen = a.vessel.rotator(a.hinge).unwrap().frozen();
    assert!((frozen.angle - (90.0 - before)).abs() < 1e-9);
    assert!(frozen.start_speed > 0.0);

    a.vessel.assembly_mut().attach(visitor, a.base, &[]).unwrap();
    a.vessel.notify(StructureEvent::CoupleComplete { from: visitor, to: a.base });
    assert_angle(&a.vessel, a.hinge, before);

    run(&mut a.vessel, 1);
    assert!(a.vessel.is_rotating(a.hinge).unwrap());
    run(&mut a.vessel, 1000);
    assert_angle(&a.vessel, a.hinge, 90.0);
    assert_eq!(a.vessel.in_motion_count(), 0);
}

#[test]
fn test_in_motion_count_and_locks_across_rails() {
    let mut a = arm(RotatorConfig::default());
    assert_eq!(a.vessel.assembly().engaged_locks(), 3);
    a.vessel.enqueue_rotation(a.hinge, 40.0, 10.0).unwrap();
    a.vessel.enqueue_rotation(a.wrist, -40.0, 10.0).unwrap();
    run(&mut a.vessel, 5);
    assert_eq!(a.vessel.in_motion_count(), 2);
    assert_eq!(a.vessel.assembly().engaged_locks(), 0);

    a.vessel.notify(StructureEvent::GoOnRails);
    assert_eq!(a.vessel.in_motion_count(), 0);
    assert_eq!(a.vessel.assembly().engaged_locks(), 3);
    run(&mut a.vessel, 50);
    assert_eq!(a.vessel.in_motion_count(), 0);

    a.vessel.notify(StructureEvent::GoOffRails);
    run(&mut a.vessel, 2);
    assert_eq!(a.vessel.in_motion_count(), 2);
    run(&mut a.vessel, 2000);
    assert_eq!(a.vessel.in_motion_count(), 0);
    assert_eq!(a.vessel.assembly().engaged_locks(), 3);
    assert_angle(&a.vessel, a.hinge, 40.0);
    assert_angle(&a.vessel, a.wrist, -40.0);
}

#[test]
fn test_nested_smart_rotation_releases_crossing_locks_only() {
    let smart = RotatorConfig {
        smart_auto_struts: true,
        ..Default::default()
    };
    let mut a = arm(smart);
    a.vessel.enqueue_rotation(a.wrist, 60.0, 20.0).unwrap();
    run(&mut a.vessel, 2);
    // only tip-strut crosses the tip subtree
    assert_eq!(a.vessel.assembly().engaged_locks(), 2);

    a.vessel.enqueue_rotation(a.hinge, 30.0, 10.0).unwrap();
    run(&mut a.vessel, 2);
    // arm-strut now crosses too, base-strut stays engaged
    assert_eq!(a.vessel.assembly().engaged_locks(), 1);
    assert_eq!(a.vessel.in_motion_count(), 2);

    run(&mut a.vessel, 2000);
    assert_eq!(a.vessel.in_motion_count(), 0);
    assert_eq!(a.vessel.assembly().engaged_locks(), 3);
    assert_angle(&a.vessel, a.hinge, 30.0);
    assert_angle(&a.vessel, a.wrist, 60.0);

    // the tip followed the arm about the hinge axis
    let tip = a.vessel.assembly().body(a.tip).unwrap();
    let expected = DQuat::from_axis_angle(DVec3::Y, 90f64.to_radians());
    assert!((tip.rest_rotation.dot(expected).abs() - 1.0).abs() < 1e-9);
}

#[test]
fn test_repeated_before_change_in_one_tick_is_dispatched_once() {
    let mut a = arm(RotatorConfig::default());
    let first = a.vessel.notify(StructureEvent::Decouple { part: a.strut });
    assert_eq!(first.notified, 2);
    let again = a.vessel.notify(StructureEvent::Couple { from: a.strut, to: a.base });
    assert_eq!(again.notified, 0);

    a.vessel.assembly_mut().detach(a.strut).unwrap();
    let after = a.vessel.notify(StructureEvent::DecoupleComplete { part: a.strut });
    assert_eq!(after.notified, 2);
    assert_eq!(a.vessel.assembly().engaged_locks(), 0);

    run(&mut a.vessel, 1);
    let next_tick = a.vessel.notify(StructureEvent::JointUpdate);
    assert_eq!(next_tick.notified, 2);

    // events about bodies that are not part of the vessel are ignored
    let stray = a.vessel.notify(StructureEvent::UndockComplete { part: BodyId(99) });
    assert_eq!(stray.notified, 0);
}

#[test]
fn test_same_vessel_dock_is_deferred_to_the_next_tick() {
    let mut a = arm(RotatorConfig::default());
    let tick = a.vessel.tick();
    let hinge_setup = a.vessel.rotator(a.hinge).unwrap().setup_done_at();
    let report = a.vessel.notify(StructureEvent::SameVesselDock { from: a.arm, to: a.strut });
    assert_eq!(report.notified, 0);
    assert!(a.vessel.manager().has_deferred());

    let report = a.vessel.fixed_update(DT, false);
    assert_eq!(report.notified, 1);
    assert!(!a.vessel.manager().has_deferred());
    assert_eq!(a.vessel.rotator(a.hinge).unwrap().setup_done_at(), Some(tick + 1));
    assert_eq!(a.vessel.rotator(a.wrist).unwrap().setup_done_at(), hinge_setup);
}

#[test]
fn test_removed_owner_hands_over_rotation() {
    let mut a = arm(RotatorConfig::default());
    let base_side = a
        .vessel
        .add_rotator(
            a.base,
            Box::new(NodeJointFinder::new(DVec3::Y, DVec3::ZERO).with_neighbor(a.arm)),
        )
        .unwrap();
    assert!(a.vessel.enqueue_rotation(a.hinge, CONTINUOUS, 10.0).unwrap());
    run(&mut a.vessel, 30);

    let removed = a.vessel.remove_rotator(a.hinge).unwrap();
    assert!(!removed.frozen().is_pending());
    assert!(a.vessel.rotator(a.hinge).is_none());
    assert_eq!(a.vessel.rotator(base_side).unwrap().frozen().angle, CONTINUOUS);

    run(&mut a.vessel, 1);
    assert!(a.vessel.is_rotating(base_side).unwrap());
    let status = a.vessel.status();
    let heir = status.rotators.iter().find(|r| r.id == base_side).unwrap();
    assert!(heir.controller);
    assert!(heir.velocity > 0.0);
}

#[test]
fn test_rotation_aborts_when_charge_runs_out() {
    let mut a = arm(RotatorConfig::default());
    let mut vessel = std::mem::replace(&mut a.vessel, Vessel::new(Assembly::default(), Config::default()));
    vessel = vessel.with_resources(Box::new(ResourcePool::new().with(ResourceKind::ElectricCharge, 0.5)));

    vessel.enqueue_rotation(a.hinge, 90.0, 10.0).unwrap();
    run(&mut vessel, 24);
    assert!(vessel.is_rotating(a.hinge).unwrap());
    let reached = vessel.current_angle(a.hinge).unwrap();

    run(&mut vessel, 5);
    assert!(!vessel.is_rotating(a.hinge).unwrap());
    assert_eq!(vessel.in_motion_count(), 0);
    assert_eq!(vessel.assembly().engaged_locks(), 3);
    let stopped = vessel.current_angle(a.hinge).unwrap();
    assert!(stopped >= reached && stopped < 90.0);

    // nothing left to drive with
    vessel.enqueue_rotation(a.hinge, 10.0, 10.0).unwrap();
    run(&mut vessel, 3);
    assert!(!vessel.is_rotating(a.hinge).unwrap());
    assert!((vessel.current_angle(a.hinge).unwrap() - stopped).abs() < 1e-2);
}

#[test]
fn test_snap_lands_on_grid() {
    let mut a = arm(RotatorConfig::default());
    a.vessel.enqueue_rotation(a.wrist, 37.0, 20.0).unwrap();
    run(&mut a.vessel, 1000);
    assert_angle(&a.vessel, a.wrist, 37.0);
    assert!(a.vessel.enqueue_rotation_to_snap(a.wrist, 0.0).unwrap());
    run(&mut a.vessel, 1000);
    assert_angle(&a.vessel, a.wrist, 30.0);
    assert!(!a.vessel.enqueue_rotation_to_snap(a.wrist, 0.0).unwrap());
}

#[test]
fn test_clockwise_steps_and_brake() {
    let mut a = arm(RotatorConfig::default());
    assert!(a.vessel.rotate_clockwise(a.hinge).unwrap());
    assert!(a.vessel.rotate_clockwise(a.hinge).unwrap());
    run(&mut a.vessel, 1500);
    assert_angle(&a.vessel, a.hinge, 30.0);

    assert!(a.vessel.rotate_counterclockwise(a.hinge).unwrap());
    run(&mut a.vessel, 100);
    assert!(a.vessel.brake(a.hinge).unwrap());
    // braking rotations take no more requests
    assert!(!a.vessel.rotate_clockwise(a.hinge).unwrap());
    run(&mut a.vessel, 1000);
    let angle = a.vessel.current_angle(a.hinge).unwrap();
    assert!(angle < 30.0 && angle > 15.0);
    assert!(!a.vessel.brake(a.hinge).unwrap());
}

#[test]
fn test_save_and_load_resume_running_rotations() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("arm.json");

    let mut a = arm(RotatorConfig::default());
    a.vessel.enqueue_rotation(a.hinge, CONTINUOUS, 10.0).unwrap();
    a.vessel.enqueue_rotation(a.wrist, 60.0, 20.0).unwrap();
    run(&mut a.vessel, 100);
    let hinge = a.vessel.current_angle(a.hinge).unwrap();
    let wrist = a.vessel.current_angle(a.wrist).unwrap();
    assert!(wrist > 0.0 && wrist < 60.0);
    a.vessel.save(&path).unwrap();

    let mut b = arm(RotatorConfig::default());
    let report = b.vessel.load(&path).unwrap();
    assert!(report.is_clean());
    assert!((b.vessel.current_angle(b.hinge).unwrap() - hinge).abs() < 1e-6);
    assert!((b.vessel.current_angle(b.wrist).unwrap() - wrist).abs() < 1e-6);
    assert_eq!(b.vessel.rotator(b.hinge).unwrap().frozen().angle, CONTINUOUS);

    run(&mut b.vessel, 1);
    assert!(b.vessel.is_rotating(b.hinge).unwrap());
    assert!(b.vessel.is_rotating(b.wrist).unwrap());
    run(&mut b.vessel, 2000);
    assert!(b.vessel.is_rotating(b.hinge).unwrap());
    assert!(!b.vessel.is_rotating(b.wrist).unwrap());
    assert_angle(&b.vessel, b.wrist, 60.0);
}

#[test]
fn test_loading_a_looped_arena_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("looped.json");
    let smart = RotatorConfig {
        smart_auto_struts: true,
        ..Default::default()
    };
    let mut a = arm(smart);
    a.vessel.save(&path).unwrap();

    // make the base a child of the arm
    let mut json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    json["assembly"]["bodies"][a.base.0 as usize]["parent"] = serde_json::json!(a.arm.0);
    std::fs::write(&path, serde_json::to_string(&json).unwrap()).unwrap();

    assert!(matches!(a.vessel.load(&path), Err(RotateError::InvalidAssembly(_))));
    assert!(a.vessel.assembly().body(a.base).unwrap().parent.is_none());

    // the vessel kept its own arena and still rotates
    assert!(a.vessel.enqueue_rotation(a.hinge, 30.0, 10.0).unwrap());
    run(&mut a.vessel, 1000);
    assert_angle(&a.vessel, a.hinge, 30.0);
}

#[test]
fn test_motion_count_matches_running_joints_under_random_requests() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut a = arm(RotatorConfig {
        smart_auto_struts: true,
        ..Default::default()
    });
    let mut on_rails = false;
    for _ in 0..3000 {
        if rng.random_bool(0.02) {
            let id = if rng.random_bool(0.5) { a.hinge } else { a.wrist };
            let angle = rng.random_range(-90.0..90.0);
            let speed = rng.random_range(1.0..30.0);
            a.vessel.enqueue_rotation(id, angle, speed).unwrap();
        }
        if rng.random_bool(0.005) {
            on_rails = !on_rails;
            let event = if on_rails {
                StructureEvent::GoOnRails
            } else {
                StructureEvent::GoOffRails
            };
            a.vessel.notify(event);
        }
        a.vessel.fixed_update(DT, false);

        let running = [a.hinge, a.wrist]
            .into_iter()
            .filter(|id| a.vessel.is_rotating(*id).unwrap())
            .count();
        assert_eq!(a.vessel.in_motion_count() as usize, running);
        if running == 0 {
            assert_eq!(a.vessel.assembly().engaged_locks(), 3);
        }
        if on_rails {
            assert_eq!(running, 0);
        }
    }
}

#[test]
fn test_travel_limit_holds_across_symmetric_inputs() {
    let mut a = arm(RotatorConfig {
        max_angle: Some(60.0),
        rotation_step: 40.0,
        rotation_speed: 20.0,
        ..Default::default()
    });
    a.vessel.link_symmetry(&[a.hinge, a.wrist]).unwrap();
    assert!(a.vessel.rotate_clockwise(a.hinge).unwrap());
    assert!(a.vessel.rotate_clockwise(a.hinge).unwrap());
    assert!(!a.vessel.rotate_clockwise(a.hinge).unwrap());
    run(&mut a.vessel, 1000);
    assert_angle(&a.vessel, a.hinge, 60.0);
    assert_angle(&a.vessel, a.wrist, 60.0);

    // nothing left to deploy into
    assert!(!a.vessel.toggle_deploy(a.wrist).unwrap());
    assert!(a.vessel.set_target_angle(a.wrist, 0.0).unwrap());
    run(&mut a.vessel, 1000);
    assert_angle(&a.vessel, a.hinge, 0.0);
    assert_angle(&a.vessel, a.wrist, 0.0);

    assert!(a.vessel.toggle_deploy(a.hinge).unwrap());
    run(&mut a.vessel, 1000);
    for id in [a.hinge, a.wrist] {
        assert_angle(&a.vessel, id, 60.0);
        assert!(a.vessel.rotator(id).unwrap().is_deployed());
    }
    assert_eq!(a.vessel.in_motion_count(), 0);
}
