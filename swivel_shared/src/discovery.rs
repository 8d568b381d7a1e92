// swivel_shared/src/discovery.rs - finding the joint a rotator drives

use std::fmt;

use glam::DVec3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::assembly::{Assembly, BodyId, JointId};
use crate::error::RotateError;

/// Locates the joint a rotator owns and describes its rotation axis.
pub trait JointFinder: fmt::Debug + Send {
    fn find_joint(&self, assembly: &Assembly, owner: BodyId, verbose: bool) -> Result<Option<JointId>, RotateError>;

    /// Rotation axis in the owner body frame.
    fn axis(&self) -> DVec3;

    /// Point on the axis in the owner body frame.
    fn pivot(&self) -> DVec3;

    /// Gate for accepting a discovered joint.
    fn safety_check(&self, assembly: &Assembly, joint: JointId) -> bool {
        match assembly.joint(joint) {
            Ok(j) => j.host != j.target && assembly.contains(j.host) && assembly.contains(j.target),
            Err(_) => false,
        }
    }
}

/// Finder for an attachment node: the joint to a fixed neighbor, or to the
/// owner's parent when no neighbor is given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeJointFinder {
    pub axis: DVec3,
    #[serde(default)]
    pub pivot: DVec3,
    #[serde(default)]
    pub neighbor: Option<BodyId>,
}

impl NodeJointFinder {
    pub fn new(axis: DVec3, pivot: DVec3) -> Self {
        Self { axis, pivot, neighbor: None }
    }

    pub fn with_neighbor(mut self, neighbor: BodyId) -> Self {
        self.neighbor = Some(neighbor);
        self
    }
}

impl JointFinder for NodeJointFinder {
    fn find_joint(&self, assembly: &Assembly, owner: BodyId, verbose: bool) -> Result<Option<JointId>, RotateError> {
        if !assembly.contains(owner) {
            return Err(RotateError::UnknownBody(owner));
        }
        let joint = match self.neighbor {
            Some(other) => assembly.joint_between(owner, other),
            None => assembly.parent_joint(owner),
        };
        if verbose {
            debug!("{}: find_joint() -> {:?}", owner, joint);
        }
        Ok(joint)
    }

    fn axis(&self) -> DVec3 {
        self.axis
    }

    fn pivot(&self) -> DVec3 {
        self.pivot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DQuat;

    #[test]
    fn test_finds_parent_or_neighbor_joint() {
        let mut asm = Assembly::new(1, "t");
        let root = asm.add_body("root", DQuat::IDENTITY, DVec3::ZERO);
        let port = asm.add_body("port", DQuat::IDENTITY, DVec3::Y);
        let j = asm.attach(port, root, &[]).unwrap();

        let finder = NodeJointFinder::new(DVec3::Y, DVec3::ZERO);
        assert_eq!(finder.find_joint(&asm, port, true).unwrap(), Some(j));
        assert_eq!(finder.find_joint(&asm, root, false).unwrap(), None);

        let from_parent = NodeJointFinder::new(DVec3::Y, DVec3::ZERO).with_neighbor(port);
        assert_eq!(from_parent.find_joint(&asm, root, false).unwrap(), Some(j));
        assert!(finder.safety_check(&asm, j));

        asm.detach(port).unwrap();
        assert!(finder.find_joint(&asm, port, false).is_err());
        assert!(!finder.safety_check(&asm, j));
    }
}
