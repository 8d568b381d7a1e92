// swivel_shared/src/feedback.rs - host visible motion indication

use tracing::{debug, info};

use crate::assembly::JointId;

/// Receives start/stop notifications for driven joints (sound, lights, UI).
pub trait MotionFeedback: Send {
    fn motion_started(&mut self, joint: JointId);
    fn motion_stopped(&mut self, joint: JointId, aborted: bool);
}

/// Default feedback: log lines only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFeedback;

impl MotionFeedback for LogFeedback {
    fn motion_started(&mut self, joint: JointId) {
        info!("{}: motion started", joint);
    }

    fn motion_stopped(&mut self, joint: JointId, aborted: bool) {
        if aborted {
            info!("{}: motion aborted", joint);
        } else {
            debug!("{}: motion stopped", joint);
        }
    }
}
