// swivel_shared: rotation core shared by the host, the simulator and tests

pub mod assembly;
pub mod config;
pub mod discovery;
pub mod error;
pub mod feedback;
pub mod frozen;
pub mod joint_motion;
pub mod manager;
pub mod resource;
pub mod rotator;
pub mod smooth_motion;
pub mod vessel;

pub use assembly::{Assembly, BodyId, JointId};
pub use config::{Config, ConfigError, MotionConfig, RotatorConfig, SimulationConfig, load_config};
pub use discovery::{JointFinder, NodeJointFinder};
pub use error::RotateError;
pub use feedback::{LogFeedback, MotionFeedback};
pub use frozen::FrozenRotation;
pub use joint_motion::{JointMotion, RotationRequest};
pub use manager::{DispatchReport, StructureEvent, VesselMotionManager};
pub use resource::{ResourceKind, ResourcePool, ResourceProvider, Unlimited};
pub use rotator::{NodeRole, Rotator, RotatorId};
pub use smooth_motion::{CONTINUOUS, SmoothMotion};
pub use vessel::{Vessel, VesselSnapshot, VesselStatus};
