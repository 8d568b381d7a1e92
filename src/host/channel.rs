//! Messages between front-ends and the rotation host task.

use std::path::PathBuf;

use swivel_shared::manager::DispatchReport;
use swivel_shared::{RotatorId, StructureEvent, VesselStatus};
use tokio::sync::oneshot;

/// A request sent to the task that owns the vessel.
#[derive(Debug)]
pub enum HostRequest {
    /// Rotate by a relative angle; the rotator's speed when `speed` is None.
    Rotate {
        rotator: RotatorId,
        angle: f64,
        speed: Option<f64>,
        respond_to: oneshot::Sender<Result<bool, String>>,
    },
    /// One configured step, clockwise or counterclockwise.
    Step {
        rotator: RotatorId,
        clockwise: bool,
        respond_to: oneshot::Sender<Result<bool, String>>,
    },
    RotateToSnap {
        rotator: RotatorId,
        snap: f64,
        respond_to: oneshot::Sender<Result<bool, String>>,
    },
    /// Swing the full travel out or back.
    Deploy {
        rotator: RotatorId,
        respond_to: oneshot::Sender<Result<bool, String>>,
    },
    Target {
        rotator: RotatorId,
        angle: f64,
        respond_to: oneshot::Sender<Result<bool, String>>,
    },
    /// Feed speed-controlled rotators; `None` stops feeding.
    Airspeed {
        airspeed: Option<f64>,
        respond_to: oneshot::Sender<()>,
    },
    Stop {
        rotator: RotatorId,
        respond_to: oneshot::Sender<Result<bool, String>>,
    },
    Status {
        respond_to: oneshot::Sender<VesselStatus>,
    },
    /// Forward a raw structural event to the coordinator.
    Notify {
        event: StructureEvent,
        respond_to: oneshot::Sender<DispatchReport>,
    },
    Save {
        path: PathBuf,
        respond_to: oneshot::Sender<Result<(), String>>,
    },
    Load {
        path: PathBuf,
        respond_to: oneshot::Sender<Result<DispatchReport, String>>,
    },
}
