//! One vessel: the assembly, its coordinator, joint owners and sessions.
//!
//! `Vessel` is the explicit per-assembly context. The host reports
//! structural events through [`Vessel::notify`], mutates the assembly between
//! the before and after notifications, and calls [`Vessel::fixed_update`]
//! once per fixed tick.
//!
//! Rotators linked with [`Vessel::link_symmetry`] repeat each other's
//! manual inputs. Each counterpart clips the input against its own travel.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::assembly::{Assembly, BodyId, JointId};
use crate::config::{Config, RotatorConfig};
use crate::discovery::JointFinder;
use crate::error::RotateError;
use crate::feedback::{LogFeedback, MotionFeedback};
use crate::frozen::FrozenRotation;
use crate::joint_motion::JointMotion;
use crate::manager::{self, DispatchReport, StructureEvent, VesselMotionManager};
use crate::resource::{ResourceProvider, Unlimited};
use crate::rotator::{NodeRole, Rotator, RotatorEnv, RotatorId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotatorSnapshot {
    pub id: RotatorId,
    pub frozen: FrozenRotation,
    #[serde(default)]
    pub commanded: f64,
    #[serde(default)]
    pub deployed: bool,
}

/// Persisted vessel state: baked rest poses and pending rotations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VesselSnapshot {
    pub assembly: Assembly,
    pub rotators: Vec<RotatorSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RotatorStatus {
    pub id: RotatorId,
    pub body: BodyId,
    pub joint: Option<JointId>,
    pub role: NodeRole,
    pub angle: f64,
    pub velocity: f64,
    pub target: Option<f64>,
    pub rotating: bool,
    pub controller: bool,
    pub frozen: FrozenRotation,
    pub commanded: f64,
    pub deployed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VesselStatus {
    pub tick: u64,
    pub on_rails: bool,
    pub in_motion: u32,
    pub engaged_locks: usize,
    pub rotators: Vec<RotatorStatus>,
}

pub struct Vessel {
    assembly: Assembly,
    manager: VesselMotionManager,
    rotators: BTreeMap<RotatorId, Rotator>,
    joint_motions: BTreeMap<JointId, JointMotion>,
    resources: Box<dyn ResourceProvider>,
    feedback: Box<dyn MotionFeedback>,
    config: Config,
    tick: u64,
    paused: bool,
    next_rotator: u32,
    symmetry: Vec<BTreeSet<RotatorId>>,
    airspeed: Option<f64>,
}

impl Vessel {
    pub fn new(assembly: Assembly, config: Config) -> Self {
        Self {
            assembly,
            manager: VesselMotionManager::new(),
            rotators: BTreeMap::new(),
            joint_motions: BTreeMap::new(),
            resources: Box::new(Unlimited),
            feedback: Box::new(LogFeedback),
            config,
            tick: 0,
            paused: false,
            next_rotator: 1,
            symmetry: Vec::new(),
            airspeed: None,
        }
    }

    pub fn with_resources(mut self, resources: Box<dyn ResourceProvider>) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_feedback(mut self, feedback: Box<dyn MotionFeedback>) -> Self {
        self.feedback = feedback;
        self
    }

    pub fn assembly(&self) -> &Assembly {
        &self.assembly
    }

    /// Structural mutation belongs between a before and an after
    /// notification.
    pub fn assembly_mut(&mut self) -> &mut Assembly {
        &mut self.assembly
    }

    pub fn manager(&self) -> &VesselMotionManager {
        &self.manager
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Airspeed fed to speed-controlled rotators; `None` before launch.
    pub fn set_airspeed(&mut self, airspeed: Option<f64>) {
        self.airspeed = airspeed;
    }

    pub fn airspeed(&self) -> Option<f64> {
        self.airspeed
    }

    pub fn in_motion_count(&self) -> u32 {
        self.manager.rot_count()
    }

    pub fn rotator(&self, id: RotatorId) -> Option<&Rotator> {
        self.rotators.get(&id)
    }

    pub fn rotators(&self) -> impl Iterator<Item = &Rotator> {
        self.rotators.values()
    }

    pub fn joint_motion(&self, joint: JointId) -> Option<&JointMotion> {
        self.joint_motions.get(&joint)
    }

    fn parts(&mut self) -> (&mut BTreeMap<RotatorId, Rotator>, RotatorEnv<'_>) {
        (
            &mut self.rotators,
            RotatorEnv {
                assembly: &mut self.assembly,
                joint_motions: &mut self.joint_motions,
                manager: &mut self.manager,
                resources: self.resources.as_mut(),
                feedback: self.feedback.as_mut(),
                tuning: self.config.motion,
                tick: self.tick,
            },
        )
    }

    fn with_rotator<T>(&mut self, id: RotatorId, f: impl FnOnce(&mut Rotator, &mut RotatorEnv<'_>) -> T) -> Result<T, RotateError> {
        let (rotators, mut env) = self.parts();
        let rotator = rotators.get_mut(&id).ok_or(RotateError::UnknownRotator(id))?;
        Ok(f(rotator, &mut env))
    }

    /// Repeat `f` on every symmetry counterpart of `id`. The result is the
    /// one of `id` itself.
    fn with_group(&mut self, id: RotatorId, f: impl Fn(&mut Rotator, &mut RotatorEnv<'_>) -> bool) -> Result<bool, RotateError> {
        let accepted = self.with_rotator(id, &f)?;
        for other in self.symmetry_counterparts(id) {
            let ok = self.with_rotator(other, &f)?;
            debug!("{}: symmetric input from {}, accepted {}", other, id, ok);
        }
        Ok(accepted)
    }

    /// Link rotators that mirror each other. A rotator belongs to at most
    /// one group; linking moves it out of its previous one.
    pub fn link_symmetry(&mut self, ids: &[RotatorId]) -> Result<(), RotateError> {
        for id in ids {
            self.get(*id)?;
        }
        let group: BTreeSet<RotatorId> = ids.iter().copied().collect();
        for g in &mut self.symmetry {
            g.retain(|id| !group.contains(id));
        }
        self.symmetry.retain(|g| g.len() > 1);
        if group.len() > 1 {
            info!("symmetry group {:?}", group);
            self.symmetry.push(group);
        }
        Ok(())
    }

    pub fn symmetry_counterparts(&self, id: RotatorId) -> Vec<RotatorId> {
        self.symmetry
            .iter()
            .find(|g| g.contains(&id))
            .map(|g| g.iter().copied().filter(|other| *other != id).collect())
            .unwrap_or_default()
    }

    pub fn add_rotator(&mut self, body: BodyId, finder: Box<dyn JointFinder>) -> Result<RotatorId, RotateError> {
        let config = self.config.rotator.clone();
        self.add_rotator_with(body, config, finder)
    }

    /// Register a joint owner. It is set up right away when the vessel is
    /// off rails.
    pub fn add_rotator_with(&mut self, body: BodyId, mut config: RotatorConfig, finder: Box<dyn JointFinder>) -> Result<RotatorId, RotateError> {
        self.assembly.body(body)?;
        config.verbose_events |= self.config.simulation.verbose_events;
        let id = RotatorId(self.next_rotator);
        self.next_rotator += 1;
        self.rotators.insert(id, Rotator::new(id, body, config, finder));
        info!("{}: rotator registered on {}", id, body);
        if !self.manager.is_on_rails() {
            self.with_rotator(id, |r, env| r.do_setup(env))?;
        }
        Ok(id)
    }

    /// Deregister a joint owner. A rotation it was driving is frozen and
    /// handed to the first remaining owner of the same joint.
    pub fn remove_rotator(&mut self, id: RotatorId) -> Result<Rotator, RotateError> {
        let freeze = self.with_rotator(id, |r, env| r.freeze("removed", true, env))?;
        if let Err(e) = freeze {
            warn!("{}: freeze on removal failed: {}", id, e);
        }
        let mut removed = self.rotators.remove(&id).ok_or(RotateError::UnknownRotator(id))?;
        for g in &mut self.symmetry {
            g.remove(&id);
        }
        self.symmetry.retain(|g| g.len() > 1);

        let Some(joint) = removed.joint() else {
            return Ok(removed);
        };
        let heir = self
            .rotators
            .values_mut()
            .find(|r| r.joint() == Some(joint));
        if let Some(jm) = self.joint_motions.get_mut(&joint) {
            if jm.controller() == Some(id) {
                jm.set_controller(heir.as_ref().map(|r| r.id()));
            }
        }
        let frozen = removed.frozen();
        if let Some(heir) = heir {
            if frozen.is_pending() {
                info!("{}: adopts frozen rotation of {}", heir.id(), id);
                heir.enqueue_frozen_rotation(frozen.angle, frozen.speed, frozen.start_speed);
                removed.set_frozen(FrozenRotation::default());
            }
        }
        Ok(removed)
    }

    /// Drop sessions on joints that no longer exist and controllers that are
    /// no longer registered.
    fn prune(&mut self) {
        let (rotators, mut env) = self.parts();
        let (motions, mut ctx) = env.split();
        let gone: Vec<JointId> = motions
            .keys()
            .copied()
            .filter(|j| ctx.assembly.joint(*j).is_err())
            .collect();
        for joint in gone {
            if let Some(mut jm) = motions.remove(&joint) {
                if jm.abort_current(&mut ctx).is_some() {
                    warn!("{}: joint removed while rotating", joint);
                }
                debug!("{}: joint motion dropped", joint);
            }
        }
        for jm in motions.values_mut() {
            if let Some(controller) = jm.controller() {
                if !rotators.contains_key(&controller) {
                    debug!("{}: controller {} is gone", jm.joint(), controller);
                    jm.set_controller(None);
                }
            }
        }
    }

    /// Report a raw structural event from the host.
    pub fn notify(&mut self, event: StructureEvent) -> DispatchReport {
        let Some(dispatch) = self.manager.route(&event, &mut self.assembly, self.tick) else {
            return DispatchReport::default();
        };
        if dispatch.phase != manager::Phase::BeforeChange && dispatch.phase != manager::Phase::OnRails {
            self.prune();
        }
        let (rotators, mut env) = self.parts();
        let report = manager::dispatch(dispatch, rotators, &mut env);
        if !report.is_clean() {
            warn!("{}: {} listener failures", event.label(), report.failures.len());
        }
        report
    }

    /// Go off rails: set up every joint owner.
    pub fn start(&mut self) -> DispatchReport {
        self.notify(StructureEvent::GoOffRails)
    }

    /// Advance one fixed tick: deferred notifications, then frozen
    /// rotation checks, then every live session.
    pub fn fixed_update(&mut self, dt: f64, stop_asserted: bool) -> DispatchReport {
        self.tick += 1;
        let mut report = DispatchReport::default();
        for dispatch in self.manager.take_due(self.tick) {
            self.prune();
            let (rotators, mut env) = self.parts();
            report.merge(manager::dispatch(dispatch, rotators, &mut env));
        }

        if self.paused || self.manager.is_on_rails() {
            return report;
        }

        let airspeed = self.airspeed;
        let (rotators, mut env) = self.parts();
        for rotator in rotators.values_mut() {
            rotator.check_frozen_rotation(&mut env);
        }
        if let Some(airspeed) = airspeed {
            for rotator in rotators.values_mut() {
                rotator.follow_airspeed(airspeed, &mut env);
            }
        }
        let (motions, mut ctx) = env.split();
        for jm in motions.values_mut() {
            jm.advance(dt, stop_asserted, &mut ctx);
        }
        report
    }

    pub fn enqueue_rotation(&mut self, id: RotatorId, angle: f64, speed: f64) -> Result<bool, RotateError> {
        self.with_rotator(id, |r, env| r.request_rotation(angle, speed, env))
    }

    pub fn enqueue_rotation_to_snap(&mut self, id: RotatorId, snap: f64) -> Result<bool, RotateError> {
        self.with_rotator(id, |r, env| r.rotate_to_snap(snap, env))
    }

    pub fn rotate_clockwise(&mut self, id: RotatorId) -> Result<bool, RotateError> {
        self.with_group(id, |r, env| r.rotate_clockwise(env))
    }

    pub fn rotate_counterclockwise(&mut self, id: RotatorId) -> Result<bool, RotateError> {
        self.with_group(id, |r, env| r.rotate_counterclockwise(env))
    }

    pub fn toggle_deploy(&mut self, id: RotatorId) -> Result<bool, RotateError> {
        self.with_group(id, |r, env| r.toggle_deploy(env))
    }

    pub fn set_target_angle(&mut self, id: RotatorId, target: f64) -> Result<bool, RotateError> {
        self.with_group(id, |r, env| r.set_target_angle(target, env))
    }

    pub fn set_speed_controller(&mut self, id: RotatorId, on: bool) -> Result<(), RotateError> {
        self.with_group(id, |r, _| {
            r.set_speed_controller(on);
            true
        })?;
        Ok(())
    }

    pub fn brake(&mut self, id: RotatorId) -> Result<bool, RotateError> {
        self.with_rotator(id, |r, env| r.stop_rotation(env))
    }

    fn get(&self, id: RotatorId) -> Result<&Rotator, RotateError> {
        self.rotators.get(&id).ok_or(RotateError::UnknownRotator(id))
    }

    pub fn is_rotating(&self, id: RotatorId) -> Result<bool, RotateError> {
        Ok(self.get(id)?.is_rotating(&self.joint_motions))
    }

    pub fn current_angle(&self, id: RotatorId) -> Result<f64, RotateError> {
        Ok(self.get(id)?.current_angle(&self.assembly, &self.joint_motions))
    }

    pub fn current_velocity(&self, id: RotatorId) -> Result<f64, RotateError> {
        Ok(self.get(id)?.current_velocity(&self.joint_motions))
    }

    pub fn status(&self) -> VesselStatus {
        let rotators = self
            .rotators
            .values()
            .map(|r| {
                let jm = r.joint().and_then(|j| self.joint_motions.get(&j));
                RotatorStatus {
                    id: r.id(),
                    body: r.body(),
                    joint: r.joint(),
                    role: r.role(),
                    angle: r.current_angle(&self.assembly, &self.joint_motions),
                    velocity: r.current_velocity(&self.joint_motions),
                    target: jm.and_then(|jm| jm.current()).map(|a| a.motion().target()),
                    rotating: r.is_rotating(&self.joint_motions),
                    controller: jm.and_then(|jm| jm.controller()) == Some(r.id()),
                    frozen: r.frozen(),
                    commanded: r.commanded_angle(),
                    deployed: r.is_deployed(),
                }
            })
            .collect();
        VesselStatus {
            tick: self.tick,
            on_rails: self.manager.is_on_rails(),
            in_motion: self.manager.rot_count(),
            engaged_locks: self.assembly.engaged_locks(),
            rotators,
        }
    }

    /// Capture persistent state. Running rotations are baked at their
    /// current position and their remainder stored as frozen rotations.
    pub fn snapshot(&self) -> Result<VesselSnapshot, RotateError> {
        let mut assembly = self.assembly.clone();
        let mut pending: BTreeMap<RotatorId, FrozenRotation> =
            self.rotators.values().map(|r| (r.id(), r.frozen())).collect();

        for jm in self.joint_motions.values() {
            let (Some(anim), Some(axis)) = (jm.current(), jm.axis()) else {
                continue;
            };
            let motion = anim.motion();
            let joint = assembly.joint(jm.joint())?;
            let (host, target) = (joint.host, joint.target);
            let (axis_v, pivot_v) = assembly.to_vessel_frame(target, axis.axis, axis.pivot)?;
            assembly.rotate_subtree(host, axis_v, pivot_v, motion.position())?;

            if let Some(frozen) = jm.controller().and_then(|c| pending.get_mut(&c)) {
                let remaining = if motion.continuous() {
                    motion.target()
                } else {
                    motion.target() - motion.position()
                };
                frozen.accumulate(remaining, motion.max_velocity(), 0.0);
            }
        }

        Ok(VesselSnapshot {
            assembly,
            rotators: pending
                .into_iter()
                .map(|(id, frozen)| {
                    let (commanded, deployed) = self
                        .rotators
                        .get(&id)
                        .map(|r| (r.commanded_angle(), r.is_deployed()))
                        .unwrap_or_default();
                    RotatorSnapshot { id, frozen, commanded, deployed }
                })
                .collect(),
        })
    }

    /// Replace the persistent state and go off rails again. A snapshot whose
    /// arena fails [`Assembly::validate`] is refused and nothing changes.
    pub fn apply_snapshot(&mut self, snapshot: VesselSnapshot) -> Result<DispatchReport, RotateError> {
        snapshot.assembly.validate()?;
        self.assembly = snapshot.assembly;
        self.joint_motions.clear();
        self.manager = VesselMotionManager::new();
        for saved in snapshot.rotators {
            match self.rotators.get_mut(&saved.id) {
                Some(r) => {
                    r.set_frozen(saved.frozen);
                    r.restore_travel(saved.commanded, saved.deployed);
                }
                None => warn!("{}: no such rotator, saved state ignored", saved.id),
            }
        }
        Ok(self.start())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), RotateError> {
        let json = serde_json::to_string_pretty(&self.snapshot()?)?;
        std::fs::write(path.as_ref(), json)?;
        info!("vessel saved to {}", path.as_ref().display());
        Ok(())
    }

    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<DispatchReport, RotateError> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let snapshot: VesselSnapshot = serde_json::from_str(&json)?;
        let report = self.apply_snapshot(snapshot)?;
        info!("vessel loaded from {}", path.as_ref().display());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::NodeJointFinder;
    use glam::{DQuat, DVec3};

    fn vessel() -> (Vessel, RotatorId, BodyId) {
        let mut asm = Assembly::new(3, "v");
        let root = asm.add_body("root", DQuat::IDENTITY, DVec3::ZERO);
        let arm = asm.add_body("arm", DQuat::IDENTITY, DVec3::Y);
        asm.attach(arm, root, &[DVec3::ZERO]).unwrap();
        asm.add_auto_lock(root, arm).unwrap();
        let mut vessel = Vessel::new(asm, Config::default());
        let id = vessel
            .add_rotator(arm, Box::new(NodeJointFinder::new(DVec3::Y, DVec3::ZERO)))
            .unwrap();
        (vessel, id, arm)
    }

    fn run(vessel: &mut Vessel, ticks: usize) {
        for _ in 0..ticks {
            vessel.fixed_update(0.02, false);
        }
    }

    #[test]
    fn test_nothing_moves_on_rails() {
        let (mut vessel, id, _) = vessel();
        assert!(vessel.current_angle(id).unwrap().is_nan());
        assert!(!vessel.enqueue_rotation(id, 30.0, 10.0).unwrap());
        assert!(vessel.start().is_clean());
        assert_eq!(vessel.current_angle(id).unwrap(), 0.0);
        assert!(vessel.enqueue_rotation(id, 30.0, 10.0).unwrap());
        vessel.set_paused(true);
        run(&mut vessel, 10);
        assert_eq!(vessel.current_velocity(id).unwrap(), 0.0);
        vessel.set_paused(false);
        run(&mut vessel, 10);
        assert!(vessel.current_velocity(id).unwrap() > 0.0);
    }

    #[test]
    fn test_rotation_reaches_target() {
        let (mut vessel, id, _) = vessel();
        vessel.start();
        assert!(vessel.enqueue_rotation(id, 30.0, 10.0).unwrap());
        run(&mut vessel, 2);
        assert_eq!(vessel.in_motion_count(), 1);
        assert_eq!(vessel.assembly().engaged_locks(), 0);
        run(&mut vessel, 1000);
        assert!(!vessel.is_rotating(id).unwrap());
        assert!((vessel.current_angle(id).unwrap() - 30.0).abs() < 1e-9);
        assert_eq!(vessel.in_motion_count(), 0);
        assert_eq!(vessel.assembly().engaged_locks(), 1);
    }

    #[test]
    fn test_unknown_rotator() {
        let (mut vessel, _, _) = vessel();
        let missing = RotatorId(99);
        assert!(matches!(vessel.brake(missing), Err(RotateError::UnknownRotator(_))));
        assert!(vessel.current_angle(missing).is_err());
    }

    #[test]
    fn test_going_on_rails_freezes_without_speed() {
        let (mut vessel, id, _) = vessel();
        vessel.start();
        vessel.enqueue_rotation(id, 90.0, 20.0).unwrap();
        run(&mut vessel, 50);
        let before = vessel.current_angle(id).unwrap();
        vessel.notify(StructureEvent::GoOnRails);
        let frozen = vessel.rotator(id).unwrap().frozen();
        assert!(frozen.is_pending());
        assert_eq!(frozen.start_speed, 0.0);
        assert!((frozen.angle + before - 90.0).abs() < 1e-9);
        assert_eq!(vessel.in_motion_count(), 0);

        vessel.start();
        run(&mut vessel, 2000);
        assert!((vessel.current_angle(id).unwrap() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_status_reports_rotators() {
        let (mut vessel, id, arm) = vessel();
        vessel.start();
        vessel.enqueue_rotation(id, 45.0, 10.0).unwrap();
        run(&mut vessel, 5);
        let status = vessel.status();
        assert_eq!(status.in_motion, 1);
        assert!(!status.on_rails);
        let r = &status.rotators[0];
        assert_eq!(r.body, arm);
        assert_eq!(r.role, NodeRole::Host);
        assert!(r.rotating && r.controller);
        assert_eq!(r.target, Some(45.0));
    }

    fn mirrored(config: RotatorConfig) -> (Vessel, RotatorId, RotatorId) {
        let mut asm = Assembly::new(4, "m");
        let root = asm.add_body("root", DQuat::IDENTITY, DVec3::ZERO);
        let left = asm.add_body("left", DQuat::IDENTITY, DVec3::X);
        let right = asm.add_body("right", DQuat::IDENTITY, -DVec3::X);
        asm.attach(left, root, &[DVec3::ZERO]).unwrap();
        asm.attach(right, root, &[DVec3::ZERO]).unwrap();
        let mut vessel = Vessel::new(asm, Config::default());
        let a = vessel
            .add_rotator_with(left, config.clone(), Box::new(NodeJointFinder::new(DVec3::Y, DVec3::ZERO)))
            .unwrap();
        let b = vessel
            .add_rotator_with(right, config, Box::new(NodeJointFinder::new(DVec3::Y, DVec3::ZERO)))
            .unwrap();
        vessel.start();
        (vessel, a, b)
    }

    fn limited() -> RotatorConfig {
        RotatorConfig {
            max_angle: Some(60.0),
            rotation_step: 40.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_symmetric_inputs_reach_counterparts() {
        let (mut vessel, a, b) = mirrored(limited());
        assert!(vessel.link_symmetry(&[a, RotatorId(99)]).is_err());
        vessel.link_symmetry(&[a, b]).unwrap();
        assert_eq!(vessel.symmetry_counterparts(a), vec![b]);

        assert!(vessel.rotate_clockwise(a).unwrap());
        assert!(vessel.rotate_clockwise(b).unwrap());
        for id in [a, b] {
            assert_eq!(vessel.rotator(id).unwrap().commanded_angle(), 60.0);
        }
        assert!(vessel.set_target_angle(b, 10.0).unwrap());
        run(&mut vessel, 2000);
        for id in [a, b] {
            assert!((vessel.current_angle(id).unwrap() - 10.0).abs() < 1e-9);
        }
        // raw requests stay local
        assert!(vessel.enqueue_rotation(a, 20.0, 10.0).unwrap());
        assert_eq!(vessel.rotator(b).unwrap().commanded_angle(), 10.0);

        vessel.remove_rotator(b).unwrap();
        assert!(vessel.symmetry_counterparts(a).is_empty());
    }

    #[test]
    fn test_speed_controller_follows_airspeed() {
        let config = RotatorConfig {
            max_angle: Some(90.0),
            speed_controller: true,
            ..Default::default()
        };
        let (mut vessel, a, b) = mirrored(config);
        vessel.set_speed_controller(b, false).unwrap();
        run(&mut vessel, 100);
        assert!(!vessel.is_rotating(a).unwrap());

        vessel.set_airspeed(Some(250.0));
        run(&mut vessel, 2000);
        assert!((vessel.current_angle(a).unwrap() - 90.0).abs() < 1e-9);
        assert_eq!(vessel.current_angle(b).unwrap(), 0.0);

        vessel.set_airspeed(Some(0.0));
        run(&mut vessel, 2000);
        assert!(vessel.current_angle(a).unwrap().abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_keeps_deploy_state() {
        let (mut vessel, a, _) = mirrored(limited());
        assert!(vessel.toggle_deploy(a).unwrap());
        let snapshot = vessel.snapshot().unwrap();
        let saved = snapshot.rotators.iter().find(|r| r.id == a).unwrap();
        assert_eq!(saved.commanded, 60.0);
        assert!(saved.deployed);

        vessel.apply_snapshot(snapshot).unwrap();
        run(&mut vessel, 2000);
        assert!((vessel.current_angle(a).unwrap() - 60.0).abs() < 1e-9);
        // retract from the restored state
        assert!(vessel.toggle_deploy(a).unwrap());
        assert_eq!(vessel.rotator(a).unwrap().commanded_angle(), 0.0);

        let legacy: RotatorSnapshot =
            serde_json::from_str(r#"{"id":1,"frozen":{"angle":0.0,"speed":0.0,"start_speed":0.0}}"#).unwrap();
        assert_eq!(legacy.commanded, 0.0);
        assert!(!legacy.deployed);
    }
}
