//! Rotation sessions bound to one joint.
//!
//! A [`JointMotion`] exists for every joint some rotator has set up. While
//! the joint is being driven it holds a [`RotationAnimation`]: the motion
//! profile plus everything needed to write the profile position into the
//! joint constraints and, once motion ends, to bake the net rotation into
//! the rest pose of the rotating subtree.

use std::collections::BTreeSet;

use glam::{DQuat, DVec3};
use tracing::{debug, info, warn};

use crate::assembly::{normalize_degrees, Assembly, BodyId, JointId};
use crate::config::MotionConfig;
use crate::error::RotateError;
use crate::feedback::MotionFeedback;
use crate::frozen::FrozenRotation;
use crate::manager::VesselMotionManager;
use crate::resource::{ResourceKind, ResourceProvider};
use crate::rotator::RotatorId;
use crate::smooth_motion::{normalize_continuous, MotionHooks, SmoothMotion};

/// Fraction of the requested charge below which a driving step aborts.
const MIN_RESOURCE_RATIO: f64 = 0.9;

/// Everything a session touches outside of itself.
pub struct MotionContext<'a> {
    pub assembly: &'a mut Assembly,
    pub manager: &'a mut VesselMotionManager,
    pub resources: &'a mut dyn ResourceProvider,
    pub feedback: &'a mut dyn MotionFeedback,
}

/// Rotation axis and pivot in the target body frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointAxis {
    pub axis: DVec3,
    pub pivot: DVec3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationRequest {
    pub requester: RotatorId,
    pub angle: f64,
    pub speed: f64,
    pub start_speed: f64,
    pub smart_auto_struts: bool,
    pub electricity_rate: f64,
}

impl RotationRequest {
    pub fn new(requester: RotatorId, angle: f64, speed: f64) -> Self {
        Self {
            requester,
            angle,
            speed,
            start_speed: 0.0,
            smart_auto_struts: false,
            electricity_rate: 0.0,
        }
    }
}

/// Joint side of a running session.
#[derive(Debug, Clone)]
struct JointDrive {
    joint: JointId,
    host: BodyId,
    target: BodyId,
    axis: JointAxis,
    /// Bodies below the joint, when only crossing locks are released.
    partition: Option<BTreeSet<BodyId>>,
    /// Constraint configuration captured at start.
    org: Vec<(DQuat, DVec3)>,
    electricity_rate: f64,
    counted: bool,
}

impl JointDrive {
    fn on_start(&mut self, motion: &mut SmoothMotion, ctx: &mut MotionContext<'_>) {
        let org: Vec<(DQuat, DVec3)> = match ctx.assembly.joint(self.joint) {
            Ok(joint) => joint
                .constraints
                .iter()
                .map(|c| (c.nominal_rotation, c.nominal_position))
                .collect(),
            Err(e) => {
                warn!("{}: cannot start rotation: {}", self.joint, e);
                motion.abort();
                return;
            }
        };
        self.org = org;

        let released = match &self.partition {
            Some(partition) => ctx.assembly.release_crossing(partition),
            None => ctx.assembly.release_all_locks(),
        };
        debug!(
            "{}: released {} auto-locks ({})",
            self.joint,
            released,
            if self.partition.is_some() { "smart" } else { "all" }
        );

        ctx.manager.change_count(1, ctx.assembly);
        self.counted = true;
        ctx.feedback.motion_started(self.joint);
    }

    fn on_step(&mut self, motion: &mut SmoothMotion, dt: f64, ctx: &mut MotionContext<'_>) {
        let q = DQuat::from_axis_angle(self.axis.axis, motion.position().to_radians());
        let pivot = self.axis.pivot;
        match ctx.assembly.joint_mut(self.joint) {
            Ok(joint) => {
                for (c, (org_rot, org_pos)) in joint.constraints.iter_mut().zip(&self.org) {
                    c.target_rotation = q * *org_rot;
                    c.target_position = q * (*org_pos - pivot) + pivot;
                }
            }
            Err(e) => {
                warn!("{}: lost joint while rotating: {}", self.joint, e);
                motion.abort();
                return;
            }
        }

        if dt > 0.0 && self.electricity_rate > 0.0 {
            let request = self.electricity_rate * dt;
            let got = ctx.resources.consume(ResourceKind::ElectricCharge, request);
            if got < MIN_RESOURCE_RATIO * request {
                warn!(
                    "{}: not enough electric charge ({:.4} of {:.4}), stopping",
                    self.joint, got, request
                );
                motion.abort();
            }
        }
    }

    fn on_stop(&mut self, motion: &mut SmoothMotion, ctx: &mut MotionContext<'_>) {
        self.on_step(motion, 0.0, ctx);
        self.staticize(motion.position(), ctx);
        self.release_count(ctx);
        ctx.feedback.motion_stopped(self.joint, false);
    }

    /// Finish path for aborted motion: bake the pose reached so far.
    fn finish_aborted(&mut self, motion: &SmoothMotion, ctx: &mut MotionContext<'_>) {
        self.staticize(motion.position(), ctx);
        if self.counted {
            ctx.feedback.motion_stopped(self.joint, true);
        }
        self.release_count(ctx);
    }

    fn release_count(&mut self, ctx: &mut MotionContext<'_>) {
        if self.counted {
            self.counted = false;
            ctx.manager.change_count(-1, ctx.assembly);
        }
    }

    /// Bake `angle` into the rest pose of the host subtree and refresh the
    /// nominal configuration of the joints it affects.
    fn staticize(&mut self, angle: f64, ctx: &mut MotionContext<'_>) {
        debug!("{}: staticize {:.3}", self.joint, angle);
        let result = ctx
            .assembly
            .to_vessel_frame(self.target, self.axis.axis, self.axis.pivot)
            .and_then(|(axis, pivot)| {
                if angle != 0.0 {
                    ctx.assembly.rotate_subtree(self.host, axis, pivot, angle)?;
                }
                ctx.assembly.rederive_nominal(self.joint)
            });
        if let Err(e) = result {
            warn!("{}: staticize failed: {}", self.joint, e);
        }
    }
}

struct DriveHooks<'d, 'c, 'a> {
    drive: &'d mut JointDrive,
    ctx: &'c mut MotionContext<'a>,
}

impl MotionHooks for DriveHooks<'_, '_, '_> {
    fn on_start(&mut self, motion: &mut SmoothMotion) {
        self.drive.on_start(motion, self.ctx);
    }

    fn on_step(&mut self, motion: &mut SmoothMotion, dt: f64) {
        self.drive.on_step(motion, dt, self.ctx);
    }

    fn on_stop(&mut self, motion: &mut SmoothMotion) {
        self.drive.on_stop(motion, self.ctx);
    }
}

/// Live session: a motion profile driving one joint.
#[derive(Debug, Clone)]
pub struct RotationAnimation {
    motion: SmoothMotion,
    drive: JointDrive,
}

impl RotationAnimation {
    pub fn motion(&self) -> &SmoothMotion {
        &self.motion
    }

    pub fn is_smart(&self) -> bool {
        self.drive.partition.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct JointMotion {
    joint: JointId,
    controller: Option<RotatorId>,
    axis: Option<JointAxis>,
    rot_cur: Option<RotationAnimation>,
    tuning: MotionConfig,
}

impl JointMotion {
    pub fn new(joint: JointId, tuning: MotionConfig) -> Self {
        Self {
            joint,
            controller: None,
            axis: None,
            rot_cur: None,
            tuning,
        }
    }

    pub fn joint(&self) -> JointId {
        self.joint
    }

    pub fn controller(&self) -> Option<RotatorId> {
        self.controller
    }

    pub fn has_controller(&self) -> bool {
        self.controller.is_some()
    }

    pub fn set_controller(&mut self, controller: Option<RotatorId>) {
        self.controller = controller;
    }

    pub fn axis(&self) -> Option<JointAxis> {
        self.axis
    }

    /// Set the rotation axis from a direction and pivot given in `owner`'s
    /// body frame.
    pub fn set_axis(&mut self, assembly: &Assembly, owner: BodyId, axis: DVec3, pivot: DVec3) -> Result<(), RotateError> {
        let target = assembly.joint(self.joint)?.target;
        let (axis_v, pivot_v) = assembly.to_vessel_frame(owner, axis, pivot)?;
        let (axis_t, pivot_t) = assembly.to_body_frame(target, axis_v, pivot_v)?;
        let axis_t = axis_t
            .try_normalize()
            .ok_or_else(|| RotateError::Setup(format!("{}: degenerate axis", self.joint)))?;
        self.axis = Some(JointAxis { axis: axis_t, pivot: pivot_t });
        Ok(())
    }

    pub fn current(&self) -> Option<&RotationAnimation> {
        self.rot_cur.as_ref()
    }

    pub fn is_rotating(&self) -> bool {
        self.rot_cur.is_some()
    }

    pub fn velocity(&self) -> f64 {
        self.rot_cur.as_ref().map(|r| r.motion.velocity()).unwrap_or(0.0)
    }

    /// Accept or merge a rotation request. Returns false when rejected.
    pub fn enqueue(&mut self, req: &RotationRequest, assembly: &Assembly) -> bool {
        if req.angle.is_nan() || !req.speed.is_finite() || !req.start_speed.is_finite() {
            warn!(
                "{}: invalid request angle {} speed {} start speed {}, rotation rejected",
                self.joint, req.angle, req.speed, req.start_speed
            );
            return false;
        }
        if req.speed < self.tuning.min_speed {
            warn!("{}: speed {} too low, rotation rejected", self.joint, req.speed);
            return false;
        }
        let joint = match assembly.joint(self.joint) {
            Ok(joint) => joint,
            Err(e) => {
                warn!("{}: rotation rejected: {}", self.joint, e);
                return false;
            }
        };

        let mut angle = req.angle;
        let continuous = normalize_continuous(&mut angle);

        if let Some(anim) = self.rot_cur.as_mut() {
            let motion = &mut anim.motion;
            if motion.is_braking() {
                debug!("{}: braking, rotation rejected", self.joint);
                return false;
            }
            let was_continuous = motion.is_continuous();
            if continuous {
                if !(was_continuous && angle * motion.target() > 0.0) {
                    motion.set_target(angle);
                }
            } else if was_continuous {
                let anchored = motion.position() + motion.stopping_distance(0.0) + angle;
                motion.set_target(anchored);
            } else {
                motion.set_target(motion.target() + angle);
            }
            motion.set_max_velocity(req.speed);
            self.controller = Some(req.requester);
            info!(
                "{}: rotation merged by {}, target {:.3} speed {}",
                self.joint,
                req.requester,
                motion.target(),
                req.speed
            );
            return true;
        }

        let Some(axis) = self.axis else {
            warn!("{}: no rotation axis, rotation rejected", self.joint);
            return false;
        };
        let partition = if req.smart_auto_struts {
            match assembly.subtree(joint.host) {
                Ok(bodies) => Some(bodies.into_iter().collect()),
                Err(e) => {
                    warn!("{}: rotation rejected: {}", self.joint, e);
                    return false;
                }
            }
        } else {
            None
        };

        let mut motion = SmoothMotion::new(0.0, angle, req.speed, self.tuning);
        motion.set_velocity(req.start_speed);
        self.rot_cur = Some(RotationAnimation {
            motion,
            drive: JointDrive {
                joint: self.joint,
                host: joint.host,
                target: joint.target,
                axis,
                partition,
                org: Vec::new(),
                electricity_rate: req.electricity_rate,
                counted: false,
            },
        });
        self.controller = Some(req.requester);
        info!(
            "{}: new rotation by {}, {:.3} at {} (start {})",
            self.joint, req.requester, angle, req.speed, req.start_speed
        );
        true
    }

    /// Convert the running rotation into a bounded stop.
    pub fn brake(&mut self) -> bool {
        match self.rot_cur.as_mut() {
            Some(anim) => {
                anim.motion.brake();
                true
            }
            None => false,
        }
    }

    /// One fixed tick. The session is dropped once it finishes or aborts.
    pub fn advance(&mut self, dt: f64, stop_asserted: bool, ctx: &mut MotionContext<'_>) {
        let Some(anim) = self.rot_cur.as_mut() else {
            return;
        };
        if stop_asserted && !anim.motion.is_braking() {
            anim.motion.brake();
        }
        anim.motion.clamp_angle();
        let RotationAnimation { motion, drive } = anim;
        motion.advance(dt, &mut DriveHooks { drive: &mut *drive, ctx: &mut *ctx });

        if motion.is_aborted() {
            drive.finish_aborted(motion, ctx);
            self.rot_cur = None;
        } else if motion.is_finished() {
            debug!("{}: rotation finished at {:.3}", self.joint, motion.position());
            self.rot_cur = None;
        }
    }

    /// Abort the running rotation, bake the pose reached and drop the
    /// session. Returns the remaining delta, max velocity and velocity.
    pub fn abort_current(&mut self, ctx: &mut MotionContext<'_>) -> Option<FrozenRotation> {
        let mut anim = self.rot_cur.take()?;
        let motion = &mut anim.motion;
        motion.is_continuous();
        let remaining = FrozenRotation::new(motion.target() - motion.position(), motion.max_velocity(), motion.velocity());
        motion.abort();
        anim.drive.finish_aborted(&anim.motion, ctx);
        info!("{}: rotation aborted, {:.3} remaining", self.joint, remaining.angle);
        Some(remaining)
    }

    /// Static twist of the joint plus the running rotation, in (-180, 180].
    /// NaN when the joint or its axis is unknown.
    pub fn rotation_angle(&self, assembly: &Assembly) -> f64 {
        let Some(axis) = self.axis else {
            return f64::NAN;
        };
        let pos = self.rot_cur.as_ref().map(|r| r.motion.position()).unwrap_or(0.0);
        match assembly.twist_angle(self.joint, axis.axis) {
            Ok(angle) => normalize_degrees(angle + pos),
            Err(_) => f64::NAN,
        }
    }

    /// Delta that brings the final angle onto the nearest multiple of
    /// `snap`, taking the running rotation into account.
    pub fn angle_to_snap(&self, snap: f64, assembly: &Assembly) -> f64 {
        let Some(axis) = self.axis else {
            return 0.0;
        };
        let Ok(static_angle) = assembly.twist_angle(self.joint, axis.axis) else {
            return 0.0;
        };
        let pending = match &self.rot_cur {
            Some(anim) if anim.motion.continuous() => {
                anim.motion.position() + anim.motion.stopping_distance(0.0)
            }
            Some(anim) => anim.motion.target(),
            None => 0.0,
        };
        let a = static_angle + pending;
        snap * (a / snap + 0.5).floor() - a
    }
}
