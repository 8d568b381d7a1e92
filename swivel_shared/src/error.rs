//! Error types for the rotation core.

use thiserror::Error;

use crate::assembly::{BodyId, JointId};
use crate::rotator::RotatorId;

#[derive(Debug, Error)]
pub enum RotateError {
    #[error("unknown body: {0}")]
    UnknownBody(BodyId),
    #[error("unknown joint: {0}")]
    UnknownJoint(JointId),
    #[error("unknown rotator: {0}")]
    UnknownRotator(RotatorId),
    #[error("setup failed: {0}")]
    Setup(String),
    #[error("invalid assembly: {0}")]
    InvalidAssembly(String),
    #[error("joint {0} rejected by safety check")]
    SafetyCheck(JointId),
    #[error("persistence error: {0}")]
    Persistence(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
