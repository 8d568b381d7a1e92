//! Kinematic motion profile for a single rotation.
//!
//! `SmoothMotion` turns a target angle into a time-stepped trapezoidal
//! velocity trajectory: accelerate toward `max_velocity`, cruise, then brake
//! so the position lands on the target without overshoot. It knows nothing
//! about joints or assemblies; side effects are delegated to a
//! [`MotionHooks`] implementation passed to [`SmoothMotion::advance`].

use serde::{Deserialize, Serialize};

use crate::config::MotionConfig;

/// Target magnitude meaning "rotate forever in this direction".
pub const CONTINUOUS: f64 = 999_999.0;

/// Normalize a target angle: anything beyond half the sentinel becomes the
/// signed sentinel itself. Returns true when the target is continuous.
pub fn normalize_continuous(target: &mut f64) -> bool {
    if target.abs() > CONTINUOUS / 2.0 {
        *target = CONTINUOUS.copysign(*target);
        true
    } else {
        false
    }
}

/// Side effects invoked while a profile advances.
pub trait MotionHooks {
    /// Called once, on the first advance.
    fn on_start(&mut self, _motion: &mut SmoothMotion) {}

    /// Called after every integration step. May call [`SmoothMotion::abort`].
    fn on_step(&mut self, _motion: &mut SmoothMotion, _dt: f64) {}

    /// Called once when the profile reaches its target.
    fn on_stop(&mut self, _motion: &mut SmoothMotion) {}
}

impl MotionHooks for () {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmoothMotion {
    pos: f64,
    vel: f64,
    tgt: f64,
    max_vel: f64,
    max_acc: f64,
    continuous: bool,
    braking: bool,
    started: bool,
    finished: bool,
    aborted: bool,
    elapsed: f64,
    tuning: MotionConfig,
}

impl SmoothMotion {
    pub fn new(pos: f64, tgt: f64, max_vel: f64, tuning: MotionConfig) -> Self {
        let mut motion = Self {
            pos,
            vel: 0.0,
            tgt,
            max_vel,
            max_acc: tuning.min_acceleration,
            continuous: false,
            braking: false,
            started: false,
            finished: false,
            aborted: false,
            elapsed: 0.0,
            tuning,
        };
        motion.is_continuous();
        motion.update_max_acceleration();
        motion
    }

    pub fn position(&self) -> f64 {
        self.pos
    }

    pub fn velocity(&self) -> f64 {
        self.vel
    }

    pub fn set_velocity(&mut self, vel: f64) {
        self.vel = vel;
    }

    pub fn target(&self) -> f64 {
        self.tgt
    }

    pub fn set_target(&mut self, tgt: f64) {
        self.tgt = tgt;
        self.is_continuous();
    }

    pub fn max_velocity(&self) -> f64 {
        self.max_vel
    }

    pub fn set_max_velocity(&mut self, max_vel: f64) {
        self.max_vel = max_vel;
        self.update_max_acceleration();
    }

    pub fn max_acceleration(&self) -> f64 {
        self.max_acc
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub fn is_braking(&self) -> bool {
        self.braking
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Re-normalize the target and report whether it is continuous.
    pub fn is_continuous(&mut self) -> bool {
        self.continuous = normalize_continuous(&mut self.tgt);
        self.continuous
    }

    /// Continuous flag as of the last normalization.
    pub fn continuous(&self) -> bool {
        self.continuous
    }

    fn update_max_acceleration(&mut self) {
        self.max_acc = (self.max_vel / self.tuning.accel_time)
            .clamp(self.tuning.min_acceleration, self.tuning.max_acceleration);
    }

    /// Signed distance covered while braking from the current velocity, with
    /// a margin of `stop_margin` ticks of length `dt`.
    pub fn stopping_distance(&self, dt: f64) -> f64 {
        let time = self.vel.abs() / self.max_acc + 2.0 * self.tuning.stop_margin * dt;
        self.vel / 2.0 * time
    }

    pub fn advance<H: MotionHooks + ?Sized>(&mut self, dt: f64, hooks: &mut H) {
        if self.finished {
            return;
        }

        self.is_continuous();
        self.update_max_acceleration();

        let delta = self.tgt - self.pos;
        let going_right_way = self.vel == 0.0 || delta * self.vel > 0.0;
        let braking_distance = self.stopping_distance(dt).abs();

        let mut new_vel = self.vel;
        if going_right_way && self.vel.abs() <= self.max_vel && delta.abs() > braking_distance {
            new_vel += dt * delta.signum() * self.max_acc;
            new_vel = new_vel.clamp(-self.max_vel, self.max_vel);
        } else {
            let dv = dt * self.max_acc;
            new_vel = if new_vel.abs() <= dv {
                0.0
            } else {
                new_vel - dv * new_vel.signum()
            };
        }

        if !self.started {
            self.started = true;
            hooks.on_start(self);
            if self.finished {
                return;
            }
        }

        self.vel = new_vel;
        self.pos += self.vel * dt;
        self.elapsed += dt;

        hooks.on_step(self, dt);
        if self.finished {
            // aborted from inside the step hook
            return;
        }

        if self.check_finished(dt) {
            hooks.on_stop(self);
        }
    }

    fn check_finished(&mut self, dt: f64) -> bool {
        if self.finished {
            return true;
        }
        if self.vel.abs() < self.tuning.stop_margin * dt * self.max_acc
            && (self.tgt - self.pos).abs() < dt * dt * self.max_acc
        {
            self.pos = self.tgt;
            self.vel = 0.0;
            self.finished = true;
        }
        self.finished
    }

    /// Convert any in-flight motion into a bounded stop.
    pub fn brake(&mut self) {
        self.update_max_acceleration();
        self.tgt = self.pos + self.stopping_distance(0.0);
        self.continuous = false;
        self.braking = true;
    }

    /// Re-zero position and target by whole turns once the position drifts
    /// past the configured range.
    pub fn clamp_angle(&mut self) {
        if self.pos.abs() <= self.tuning.clamp_range {
            return;
        }
        let new_zero = 360.0 * (self.pos / 360.0 + 0.5).floor();
        self.pos -= new_zero;
        if !self.is_continuous() {
            self.tgt -= new_zero;
        }
    }

    /// Force an immediate stop without running the finish hook.
    pub fn abort(&mut self) {
        self.tgt = self.pos;
        self.vel = 0.0;
        self.continuous = false;
        self.finished = true;
        self.aborted = true;
    }
}
