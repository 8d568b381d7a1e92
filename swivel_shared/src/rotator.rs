//! Joint owners.
//!
//! A [`Rotator`] sits on one body and drives the joint its [`JointFinder`]
//! discovers. It turns user input into rotation requests, keeps the frozen
//! rotation that survives structural changes, and answers the coordinator's
//! before/after change and rails notifications.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::assembly::{Assembly, BodyId, JointId};
use crate::config::{MotionConfig, RotatorConfig};
use crate::discovery::JointFinder;
use crate::error::RotateError;
use crate::feedback::MotionFeedback;
use crate::frozen::FrozenRotation;
use crate::joint_motion::{JointMotion, MotionContext, RotationRequest};
use crate::manager::{StructureChangeListener, VesselMotionManager};
use crate::resource::ResourceProvider;
use crate::smooth_motion::CONTINUOUS;

/// Speed used when auto-snapping a freshly set up joint.
const AUTO_SNAP_SPEED: f64 = 5.0;

/// Opaque requester token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RotatorId(pub u32);

impl fmt::Display for RotatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    None,
    Host,
    Target,
}

/// Vessel state a rotator works against during a call.
pub struct RotatorEnv<'a> {
    pub assembly: &'a mut Assembly,
    pub joint_motions: &'a mut BTreeMap<JointId, JointMotion>,
    pub manager: &'a mut VesselMotionManager,
    pub resources: &'a mut dyn ResourceProvider,
    pub feedback: &'a mut dyn MotionFeedback,
    pub tuning: MotionConfig,
    pub tick: u64,
}

impl RotatorEnv<'_> {
    pub fn split(&mut self) -> (&mut BTreeMap<JointId, JointMotion>, MotionContext<'_>) {
        (
            &mut *self.joint_motions,
            MotionContext {
                assembly: &mut *self.assembly,
                manager: &mut *self.manager,
                resources: &mut *self.resources,
                feedback: &mut *self.feedback,
            },
        )
    }
}

#[derive(Debug)]
pub struct Rotator {
    id: RotatorId,
    body: BodyId,
    pub config: RotatorConfig,
    finder: Box<dyn JointFinder>,
    joint: Option<JointId>,
    role: NodeRole,
    setup_done_at: Option<u64>,
    frozen: FrozenRotation,
    commanded: f64,
    deployed: bool,
}

impl Rotator {
    pub fn new(id: RotatorId, body: BodyId, config: RotatorConfig, finder: Box<dyn JointFinder>) -> Self {
        Self {
            id,
            body,
            config,
            finder,
            joint: None,
            role: NodeRole::None,
            setup_done_at: None,
            frozen: FrozenRotation::default(),
            commanded: 0.0,
            deployed: false,
        }
    }

    pub fn id(&self) -> RotatorId {
        self.id
    }

    pub fn body(&self) -> BodyId {
        self.body
    }

    pub fn joint(&self) -> Option<JointId> {
        self.joint
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn setup_done(&self) -> bool {
        self.setup_done_at.is_some()
    }

    pub fn setup_done_at(&self) -> Option<u64> {
        self.setup_done_at
    }

    pub fn frozen(&self) -> FrozenRotation {
        self.frozen
    }

    pub fn set_frozen(&mut self, frozen: FrozenRotation) {
        self.frozen = frozen;
    }

    /// Sum of the accepted user requests, the angle the travel limit is
    /// checked against.
    pub fn commanded_angle(&self) -> f64 {
        self.commanded
    }

    pub fn is_deployed(&self) -> bool {
        self.deployed
    }

    pub fn restore_travel(&mut self, commanded: f64, deployed: bool) {
        self.commanded = commanded;
        self.deployed = deployed;
    }

    /// Configured step; below 0.1 degrees means continuous.
    pub fn step(&self) -> f64 {
        let mut s = self.config.rotation_step.abs();
        if s < 0.1 {
            s = CONTINUOUS;
        }
        if self.config.reverse_rotation {
            s = -s;
        }
        s
    }

    pub fn speed(&self) -> f64 {
        self.config.rotation_speed.abs().max(1.0)
    }

    fn desc(&self) -> String {
        format!("{}@{}", self.id, self.body)
    }

    /// Rediscover the joint. Discovery failures are logged and leave the
    /// rotator without a joint.
    pub fn do_setup(&mut self, env: &mut RotatorEnv<'_>) {
        if let Some(jm) = self.joint.and_then(|j| env.joint_motions.get(&j)) {
            if jm.is_rotating() {
                info!("{}: skipping setup, is rotating", self.desc());
                return;
            }
        }

        self.joint = None;
        self.role = NodeRole::None;

        match self.attach_joint(env) {
            Ok(Some(joint)) => {
                self.joint = Some(joint);
                self.role = match env.assembly.joint(joint) {
                    Ok(j) if j.host == self.body => NodeRole::Host,
                    Ok(j) if j.target == self.body => NodeRole::Target,
                    _ => NodeRole::None,
                };
            }
            Ok(None) => {}
            Err(e @ RotateError::SafetyCheck(_)) => info!("{}: {}", self.desc(), e),
            Err(e) => {
                let sep = "-".repeat(40);
                error!("{}\n{}: exception during setup: {}\n{}", sep, self.desc(), e, sep);
            }
        }

        info!("{}.do_setup(): joint {:?} role {:?}", self.desc(), self.joint, self.role);
        self.setup_done_at = Some(env.tick);

        if self.role == NodeRole::Host && !self.frozen.is_pending() && self.config.auto_snap {
            self.auto_snap(env);
        }
    }

    fn attach_joint(&mut self, env: &mut RotatorEnv<'_>) -> Result<Option<JointId>, RotateError> {
        let Some(joint) = self.finder.find_joint(env.assembly, self.body, self.config.verbose_events)? else {
            return Ok(None);
        };
        if !self.finder.safety_check(env.assembly, joint) {
            return Err(RotateError::SafetyCheck(joint));
        }

        let tuning = env.tuning;
        let jm = env
            .joint_motions
            .entry(joint)
            .or_insert_with(|| JointMotion::new(joint, tuning));
        if !jm.has_controller() {
            jm.set_controller(Some(self.id));
        }
        if jm.controller() == Some(self.id) || jm.axis().is_none() {
            jm.set_axis(env.assembly, self.body, self.finder.axis(), self.finder.pivot())?;
        }
        env.assembly.rederive_nominal(joint)?;
        Ok(Some(joint))
    }

    fn auto_snap(&mut self, env: &mut RotatorEnv<'_>) {
        let step = self.config.rotation_step.abs();
        if step < 0.1 {
            return;
        }
        let Some(jm) = self.joint.and_then(|j| env.joint_motions.get(&j)) else {
            return;
        };
        let delta = jm.angle_to_snap(step, env.assembly);
        if delta.abs() > 1e-6 {
            info!("{}: auto-snap by {:.3}", self.desc(), delta);
            self.enqueue_frozen_rotation(delta, AUTO_SNAP_SPEED, 0.0);
        }
    }

    /// Accumulate onto the pending frozen rotation.
    pub fn enqueue_frozen_rotation(&mut self, angle: f64, speed: f64, start_speed: f64) {
        let prev = self.frozen;
        self.frozen.accumulate(angle, speed, start_speed);
        info!("{}.enqueue_frozen_rotation(): {:?} -> {:?}", self.desc(), prev, self.frozen);
    }

    /// Capture the running rotation into the frozen state and stop it, if
    /// this rotator controls it.
    pub fn freeze(&mut self, msg: &str, keep_speed: bool, env: &mut RotatorEnv<'_>) -> Result<(), RotateError> {
        let Some(joint) = self.joint else {
            return Ok(());
        };
        let (motions, mut ctx) = env.split();
        let jm = motions.get_mut(&joint).ok_or(RotateError::UnknownJoint(joint))?;
        if !jm.is_rotating() {
            return Ok(());
        }
        if jm.controller() != Some(self.id) {
            debug!("{}.freeze(): skipping, not controller", self.desc());
            return Ok(());
        }
        info!("{}.freeze({}, {})", self.desc(), msg, keep_speed);
        if let Some(rest) = jm.abort_current(&mut ctx) {
            let start_speed = if keep_speed { rest.start_speed } else { 0.0 };
            self.enqueue_frozen_rotation(rest.angle, rest.speed, start_speed);
        }
        Ok(())
    }

    /// Submit a request to the joint motion. False when there is no joint
    /// or the request is rejected.
    pub fn enqueue_rotation(&mut self, angle: f64, speed: f64, start_speed: f64, env: &mut RotatorEnv<'_>) -> bool {
        let Some(joint) = self.joint else {
            debug!("{}.enqueue_rotation(): no rotating joint, skipped", self.desc());
            return false;
        };
        if self.setup_done_at.is_none() {
            debug!("{}.enqueue_rotation(): not set up, skipped", self.desc());
            return false;
        }
        let Some(jm) = env.joint_motions.get_mut(&joint) else {
            return false;
        };
        if !jm.is_rotating() {
            if let Err(e) = jm.set_axis(env.assembly, self.body, self.finder.axis(), self.finder.pivot()) {
                info!("{}.enqueue_rotation(): {}", self.desc(), e);
                return false;
            }
        }
        let req = RotationRequest {
            requester: self.id,
            angle,
            speed,
            start_speed,
            smart_auto_struts: self.config.smart_auto_struts,
            electricity_rate: self.config.electricity_rate,
        };
        let accepted = jm.enqueue(&req, env.assembly);
        if accepted {
            self.update_frozen_rotation(env);
        }
        accepted
    }

    /// Resume a pending frozen rotation, then refresh the frozen state from
    /// the live session.
    pub fn check_frozen_rotation(&mut self, env: &mut RotatorEnv<'_>) {
        if !self.setup_done() {
            return;
        }
        // a session taken over by another requester is not reclaimed
        let taken_over = self
            .joint
            .and_then(|j| env.joint_motions.get(&j))
            .is_some_and(|jm| jm.is_rotating() && jm.controller() != Some(self.id));
        if self.frozen.is_pending() && !taken_over {
            let FrozenRotation { angle, speed, start_speed } = self.frozen;
            self.enqueue_rotation(angle, speed, start_speed, env);
        }
        self.update_frozen_rotation(env);
    }

    /// A continuous rotation under this rotator's control is kept frozen so
    /// it survives any interruption; anything else clears the frozen state.
    pub fn update_frozen_rotation(&mut self, env: &mut RotatorEnv<'_>) {
        let prev = self.frozen;
        let live = self
            .joint
            .and_then(|j| env.joint_motions.get(&j))
            .filter(|jm| jm.controller() == Some(self.id))
            .and_then(|jm| jm.current())
            .map(|anim| anim.motion())
            .filter(|m| m.continuous());
        match live {
            Some(m) => self.frozen = FrozenRotation::new(m.target(), m.max_velocity(), 0.0),
            None => self.frozen.clear(),
        }
        if self.frozen != prev {
            debug!("{}.update_frozen_rotation(): {:?} -> {:?}", self.desc(), prev, self.frozen);
        }
    }

    /// Clip a request so the commanded angle stays inside the travel
    /// range, `[0, max]` or `[-max, 0]` when reversed.
    fn clamp_to_travel(&self, angle: f64) -> f64 {
        let Some(max) = self.config.max_angle else {
            return angle;
        };
        let cur = self.commanded;
        let (lo, hi) = if self.config.reverse_rotation { (-max, 0.0) } else { (0.0, max) };
        (cur + angle).max(lo).min(hi) - cur
    }

    fn track_commanded(&mut self, angle: f64) {
        if angle.abs() > CONTINUOUS / 2.0 {
            return;
        }
        self.commanded += angle;
        let sign = if self.config.reverse_rotation { -1.0 } else { 1.0 };
        if self.config.travel() > 359.0 && self.commanded * sign > 359.0 {
            self.commanded = 0.0;
        }
    }

    /// User request: clipped to the travel limit, then enqueued. The
    /// commanded angle only moves when the joint accepts.
    pub fn request_rotation(&mut self, angle: f64, speed: f64, env: &mut RotatorEnv<'_>) -> bool {
        let angle = self.clamp_to_travel(angle);
        if self.config.max_angle.is_some() && angle.abs() < 1e-6 {
            debug!("{}: at travel limit, commanded {:.3}", self.desc(), self.commanded);
            return false;
        }
        if !self.enqueue_rotation(angle, speed, 0.0, env) {
            return false;
        }
        self.track_commanded(angle);
        true
    }

    fn can_start_rotation(&self) -> bool {
        if !self.config.rotation_enabled {
            debug!("{}: rotation disabled", self.desc());
            return false;
        }
        self.joint.is_some() && self.setup_done()
    }

    fn manual_input_allowed(&self) -> bool {
        if self.config.speed_controller {
            debug!("{}: airspeed controlled, manual input ignored", self.desc());
            return false;
        }
        self.can_start_rotation()
    }

    fn rotate_step(&mut self, sign: f64, env: &mut RotatorEnv<'_>) -> bool {
        if !self.manual_input_allowed() {
            return false;
        }
        let accepted = self.request_rotation(sign * self.step(), self.speed(), env);
        if accepted && self.config.flip_flop_mode {
            self.config.reverse_rotation = !self.config.reverse_rotation;
        }
        accepted
    }

    pub fn rotate_clockwise(&mut self, env: &mut RotatorEnv<'_>) -> bool {
        self.rotate_step(1.0, env)
    }

    pub fn rotate_counterclockwise(&mut self, env: &mut RotatorEnv<'_>) -> bool {
        self.rotate_step(-1.0, env)
    }

    /// Rotate to the nearest multiple of `snap` degrees (15 when below 0.1).
    pub fn rotate_to_snap(&mut self, snap: f64, env: &mut RotatorEnv<'_>) -> bool {
        if !self.can_start_rotation() {
            return false;
        }
        let snap = if snap.abs() < 0.1 { 15.0 } else { snap.abs() };
        let Some(jm) = self.joint.and_then(|j| env.joint_motions.get(&j)) else {
            return false;
        };
        let delta = jm.angle_to_snap(snap, env.assembly);
        if delta.abs() < 1e-6 {
            debug!("{}: already aligned to {}", self.desc(), snap);
            return false;
        }
        self.request_rotation(delta, self.speed(), env)
    }

    /// Swing the full travel out, or back when already deployed.
    pub fn toggle_deploy(&mut self, env: &mut RotatorEnv<'_>) -> bool {
        if !self.manual_input_allowed() {
            return false;
        }
        let dir = if self.deployed { -1.0 } else { 1.0 };
        let sign = if self.config.reverse_rotation { -1.0 } else { 1.0 };
        let accepted = self.request_rotation(self.config.travel() * dir * sign, self.speed(), env);
        if accepted {
            self.deployed = !self.deployed;
            info!("{}: deployed {}", self.desc(), self.deployed);
        }
        accepted
    }

    /// Move to `target` degrees of commanded travel, clamped to the range.
    pub fn set_target_angle(&mut self, target: f64, env: &mut RotatorEnv<'_>) -> bool {
        if !target.is_finite() {
            warn!("{}: invalid target angle {}", self.desc(), target);
            return false;
        }
        if !self.manual_input_allowed() {
            return false;
        }
        self.move_to_target(target.min(self.config.travel()).max(0.0), env)
    }

    fn move_to_target(&mut self, target: f64, env: &mut RotatorEnv<'_>) -> bool {
        self.config.target_angle = target;
        let sign = if self.config.reverse_rotation { -1.0 } else { 1.0 };
        let delta = (target - self.commanded.abs()) * sign;
        if delta.abs() < 1e-6 {
            return false;
        }
        self.request_rotation(delta, self.speed(), env)
    }

    pub fn set_speed_controller(&mut self, on: bool) {
        if self.config.speed_controller != on {
            info!("{}: speed controller {}", self.desc(), if on { "on" } else { "off" });
        }
        self.config.speed_controller = on;
    }

    /// Travel the airspeed maps to: none at or below `min_airspeed`, full
    /// at or above `max_airspeed`, linear between.
    pub fn airspeed_target(&self, airspeed: f64) -> f64 {
        let (min, max) = (self.config.min_airspeed, self.config.max_airspeed);
        let travel = self.config.travel();
        if airspeed <= min {
            0.0
        } else if airspeed >= max {
            travel
        } else {
            (travel / (max - min + 0.001) * (airspeed - min)).min(travel).max(0.0)
        }
    }

    /// Speed controller step. True when a request was accepted.
    pub fn follow_airspeed(&mut self, airspeed: f64, env: &mut RotatorEnv<'_>) -> bool {
        if !self.config.speed_controller || !airspeed.is_finite() || !self.can_start_rotation() {
            return false;
        }
        let target = self.airspeed_target(airspeed);
        self.move_to_target(target, env)
    }

    pub fn stop_rotation(&mut self, env: &mut RotatorEnv<'_>) -> bool {
        self.joint
            .and_then(|j| env.joint_motions.get_mut(&j))
            .map(|jm| jm.brake())
            .unwrap_or(false)
    }

    pub fn is_rotating(&self, joint_motions: &BTreeMap<JointId, JointMotion>) -> bool {
        self.joint
            .and_then(|j| joint_motions.get(&j))
            .map(|jm| jm.is_rotating())
            .unwrap_or(false)
    }

    /// NaN when there is no joint.
    pub fn current_angle(&self, assembly: &Assembly, joint_motions: &BTreeMap<JointId, JointMotion>) -> f64 {
        self.joint
            .and_then(|j| joint_motions.get(&j))
            .map(|jm| jm.rotation_angle(assembly))
            .unwrap_or(f64::NAN)
    }

    pub fn current_velocity(&self, joint_motions: &BTreeMap<JointId, JointMotion>) -> f64 {
        self.joint
            .and_then(|j| joint_motions.get(&j))
            .map(|jm| jm.velocity())
            .unwrap_or(0.0)
    }
}

impl StructureChangeListener for Rotator {
    fn listener_id(&self) -> RotatorId {
        self.id
    }

    fn body(&self) -> BodyId {
        self.body
    }

    fn wants_verbose_events(&self) -> bool {
        self.config.verbose_events
    }

    fn on_rails(&mut self, env: &mut RotatorEnv<'_>) -> Result<(), RotateError> {
        let frozen = self.freeze("go on rails", false, env);
        self.setup_done_at = None;
        env.manager.reset_rot_count();
        frozen
    }

    fn off_rails(&mut self, env: &mut RotatorEnv<'_>) -> Result<(), RotateError> {
        // velocity continuity is lost across a rails transition
        self.frozen.start_speed = 0.0;
        self.setup_done_at = None;
        self.do_setup(env);
        Ok(())
    }

    fn before_change(&mut self, env: &mut RotatorEnv<'_>) -> Result<(), RotateError> {
        self.setup_done_at = None;
        self.freeze("structure change", true, env)
    }

    fn after_change(&mut self, env: &mut RotatorEnv<'_>) -> Result<(), RotateError> {
        self.do_setup(env);
        Ok(())
    }
}
