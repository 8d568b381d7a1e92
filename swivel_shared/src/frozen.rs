//! Resumable snapshot of a rotation interrupted by a structural change.

use serde::{Deserialize, Serialize};

use crate::smooth_motion::normalize_continuous;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FrozenRotation {
    /// Remaining signed delta; zero means nothing pending.
    pub angle: f64,
    /// Max velocity to resume with.
    pub speed: f64,
    /// Velocity to resume at.
    pub start_speed: f64,
}

impl FrozenRotation {
    pub fn new(angle: f64, speed: f64, start_speed: f64) -> Self {
        Self {
            angle,
            speed,
            start_speed,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.angle.abs() > f64::EPSILON
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Add a delta on top of whatever is already pending.
    pub fn accumulate(&mut self, angle: f64, speed: f64, start_speed: f64) {
        let mut angle = angle + self.angle;
        normalize_continuous(&mut angle);
        *self = Self::new(angle, speed, start_speed);
    }
}
