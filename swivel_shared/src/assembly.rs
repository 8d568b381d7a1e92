//! Arena of rigid bodies, joints and auto-locks making up one vessel.
//!
//! Bodies form a parent-pointer tree. Every non-root body is linked to its
//! parent by a joint whose `host` is the child (the side that rotates) and
//! whose `target` is the parent. Rest poses are expressed in the vessel
//! frame; constraint configurations are expressed in the target body frame.

use std::collections::BTreeSet;
use std::fmt;

use glam::{DQuat, DVec3};
use serde::{Deserialize, Serialize};

use crate::error::RotateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BodyId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JointId(pub u32);

impl fmt::Display for BodyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

impl fmt::Display for JointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "J{}", self.0)
    }
}

fn invalid(msg: String) -> Result<(), RotateError> {
    Err(RotateError::InvalidAssembly(msg))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Body {
    pub name: String,
    pub parent: Option<BodyId>,
    pub rest_rotation: DQuat,
    pub rest_position: DVec3,
    pub attached: bool,
}

/// One constraint primitive of a joint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraint {
    /// Anchor point in the host body frame.
    pub anchor: DVec3,
    /// Host orientation relative to the target body at rest.
    pub nominal_rotation: DQuat,
    /// Host anchor in the target body frame at rest.
    pub nominal_position: DVec3,
    /// Driven configuration, equal to the nominal one when idle.
    pub target_rotation: DQuat,
    pub target_position: DVec3,
}

impl Constraint {
    fn new(anchor: DVec3) -> Self {
        Self {
            anchor,
            nominal_rotation: DQuat::IDENTITY,
            nominal_position: DVec3::ZERO,
            target_rotation: DQuat::IDENTITY,
            target_position: DVec3::ZERO,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JointConstraints {
    Single(Constraint),
    Composite(Vec<Constraint>),
}

impl JointConstraints {
    fn from_anchors(anchors: &[DVec3]) -> Self {
        match anchors {
            [] => JointConstraints::Single(Constraint::new(DVec3::ZERO)),
            [one] => JointConstraints::Single(Constraint::new(*one)),
            many => JointConstraints::Composite(many.iter().copied().map(Constraint::new).collect()),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Constraint> {
        match self {
            JointConstraints::Single(c) => std::slice::from_ref(c).iter(),
            JointConstraints::Composite(cs) => cs.iter(),
        }
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Constraint> {
        match self {
            JointConstraints::Single(c) => std::slice::from_mut(c).iter_mut(),
            JointConstraints::Composite(cs) => cs.iter_mut(),
        }
    }

    pub fn len(&self) -> usize {
        self.iter().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Joint {
    pub host: BodyId,
    pub target: BodyId,
    pub constraints: JointConstraints,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoLock {
    pub a: BodyId,
    pub b: BodyId,
    pub engaged: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Assembly {
    pub id: u32,
    pub name: String,
    bodies: Vec<Body>,
    joints: Vec<Option<Joint>>,
    auto_locks: Vec<AutoLock>,
}

impl Assembly {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn add_body(&mut self, name: impl Into<String>, rotation: DQuat, position: DVec3) -> BodyId {
        let id = BodyId(self.bodies.len() as u32);
        self.bodies.push(Body {
            name: name.into(),
            parent: None,
            rest_rotation: rotation,
            rest_position: position,
            attached: true,
        });
        id
    }

    pub fn body(&self, id: BodyId) -> Result<&Body, RotateError> {
        self.bodies.get(id.0 as usize).ok_or(RotateError::UnknownBody(id))
    }

    fn body_mut(&mut self, id: BodyId) -> Result<&mut Body, RotateError> {
        self.bodies.get_mut(id.0 as usize).ok_or(RotateError::UnknownBody(id))
    }

    pub fn bodies(&self) -> impl Iterator<Item = (BodyId, &Body)> {
        self.bodies.iter().enumerate().map(|(i, b)| (BodyId(i as u32), b))
    }

    /// True when the body exists and is part of this vessel.
    pub fn contains(&self, id: BodyId) -> bool {
        self.body(id).map(|b| b.attached).unwrap_or(false)
    }

    pub fn joint(&self, id: JointId) -> Result<&Joint, RotateError> {
        self.joints
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(RotateError::UnknownJoint(id))
    }

    pub(crate) fn joint_mut(&mut self, id: JointId) -> Result<&mut Joint, RotateError> {
        self.joints
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(RotateError::UnknownJoint(id))
    }

    pub fn joints(&self) -> impl Iterator<Item = (JointId, &Joint)> {
        self.joints
            .iter()
            .enumerate()
            .filter_map(|(i, j)| j.as_ref().map(|j| (JointId(i as u32), j)))
    }

    /// Joint linking `body` to its parent.
    pub fn parent_joint(&self, body: BodyId) -> Option<JointId> {
        self.joints().find(|(_, j)| j.host == body).map(|(id, _)| id)
    }

    /// Joint between two bodies, in either direction.
    pub fn joint_between(&self, a: BodyId, b: BodyId) -> Option<JointId> {
        self.joints()
            .find(|(_, j)| (j.host == a && j.target == b) || (j.host == b && j.target == a))
            .map(|(id, _)| id)
    }

    /// Link `child` under `parent`, creating one constraint per anchor.
    pub fn attach(&mut self, child: BodyId, parent: BodyId, anchors: &[DVec3]) -> Result<JointId, RotateError> {
        self.body(parent)?;
        if child == parent {
            return Err(RotateError::Setup(format!("cannot attach {} to itself", child)));
        }
        if self.body(child)?.parent.is_some() {
            return Err(RotateError::Setup(format!("{} already has a parent", child)));
        }
        if self.subtree(child)?.contains(&parent) {
            return Err(RotateError::Setup(format!("attaching {} under {} makes a cycle", child, parent)));
        }
        self.body_mut(child)?.parent = Some(parent);
        let attached = self.body(parent)?.attached;
        for id in self.subtree(child)? {
            self.body_mut(id)?.attached = attached;
        }
        let id = JointId(self.joints.len() as u32);
        self.joints.push(Some(Joint {
            host: child,
            target: parent,
            constraints: JointConstraints::from_anchors(anchors),
        }));
        self.rederive_nominal(id)?;
        Ok(id)
    }

    /// Cut `child` off its parent. The subtree leaves the vessel and any
    /// auto-lock touching it is dropped.
    pub fn detach(&mut self, child: BodyId) -> Result<Option<JointId>, RotateError> {
        let joint = self.parent_joint(child);
        if let Some(id) = joint {
            self.joints[id.0 as usize] = None;
        }
        self.body_mut(child)?.parent = None;
        let subtree: BTreeSet<BodyId> = self.subtree(child)?.into_iter().collect();
        for id in &subtree {
            self.body_mut(*id)?.attached = false;
        }
        self.auto_locks
            .retain(|l| !subtree.contains(&l.a) && !subtree.contains(&l.b));
        Ok(joint)
    }

    /// Re-link a detached subtree, keeping its current rest pose.
    pub fn reattach(&mut self, child: BodyId, parent: BodyId, anchors: &[DVec3]) -> Result<JointId, RotateError> {
        if self.body(child)?.parent.is_some() {
            self.detach(child)?;
        }
        self.attach(child, parent, anchors)
    }

    /// `root` and all of its descendants, root first. Each body is listed
    /// once even if the parent links loop.
    pub fn subtree(&self, root: BodyId) -> Result<Vec<BodyId>, RotateError> {
        self.body(root)?;
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        let mut work = vec![root];
        while let Some(id) = work.pop() {
            if !seen.insert(id) {
                continue;
            }
            out.push(id);
            work.extend(
                self.bodies()
                    .filter(|(child, b)| b.parent == Some(id) && !seen.contains(child))
                    .map(|(child, _)| child),
            );
        }
        Ok(out)
    }

    /// Check the structure of an arena that did not come from `attach`, such
    /// as a deserialized one: parents and joints must point at existing
    /// bodies, parent links must not loop, every joint must match its host's
    /// parent link, and rest poses must be finite.
    pub fn validate(&self) -> Result<(), RotateError> {
        let n = self.bodies.len();
        for (id, body) in self.bodies() {
            if !body.rest_rotation.is_finite() || !body.rest_position.is_finite() {
                return invalid(format!("{} has a non-finite rest pose", id));
            }
            let mut cur = body.parent;
            let mut hops = 0;
            while let Some(parent) = cur {
                if parent.0 as usize >= n {
                    return invalid(format!("{} has unknown parent {}", id, parent));
                }
                hops += 1;
                if parent == id || hops > n {
                    return invalid(format!("parent links of {} form a cycle", id));
                }
                cur = self.bodies[parent.0 as usize].parent;
            }
        }
        let mut hosts = BTreeSet::new();
        for (id, joint) in self.joints() {
            let Ok(host) = self.body(joint.host) else {
                return invalid(format!("{} has unknown host {}", id, joint.host));
            };
            if self.body(joint.target).is_err() {
                return invalid(format!("{} has unknown target {}", id, joint.target));
            }
            if host.parent != Some(joint.target) {
                return invalid(format!("{} does not match the parent of {}", id, joint.host));
            }
            if !hosts.insert(joint.host) {
                return invalid(format!("{} has more than one parent joint", joint.host));
            }
        }
        for lock in &self.auto_locks {
            if lock.a.0 as usize >= n || lock.b.0 as usize >= n {
                return invalid(format!("auto-lock {}-{} references an unknown body", lock.a, lock.b));
            }
        }
        Ok(())
    }

    /// Rotate the rest pose of `root` and its descendants about a vessel
    /// frame axis through `pivot`, then refresh every joint crossing the
    /// subtree boundary.
    pub fn rotate_subtree(&mut self, root: BodyId, axis: DVec3, pivot: DVec3, angle_deg: f64) -> Result<(), RotateError> {
        let axis = axis.try_normalize().ok_or_else(|| RotateError::Setup("degenerate rotation axis".to_string()))?;
        let q = DQuat::from_axis_angle(axis, angle_deg.to_radians());
        let subtree: BTreeSet<BodyId> = self.subtree(root)?.into_iter().collect();
        for id in &subtree {
            let body = self.body_mut(*id)?;
            body.rest_rotation = (q * body.rest_rotation).normalize();
            body.rest_position = q * (body.rest_position - pivot) + pivot;
        }
        let crossing: Vec<JointId> = self
            .joints()
            .filter(|(_, j)| subtree.contains(&j.host) != subtree.contains(&j.target))
            .map(|(id, _)| id)
            .collect();
        for id in crossing {
            self.rederive_nominal(id)?;
        }
        Ok(())
    }

    /// Recompute every constraint's nominal configuration from the current
    /// rest poses and reset its drive to it.
    pub fn rederive_nominal(&mut self, id: JointId) -> Result<(), RotateError> {
        let joint = self.joint(id)?;
        let host = self.body(joint.host)?;
        let target = self.body(joint.target)?;
        let inv = target.rest_rotation.inverse();
        let rotation = (inv * host.rest_rotation).normalize();
        let (host_rot, host_pos, target_pos) = (host.rest_rotation, host.rest_position, target.rest_position);
        for c in self.joint_mut(id)?.constraints.iter_mut() {
            c.nominal_rotation = rotation;
            c.nominal_position = inv * (host_rot * c.anchor + host_pos - target_pos);
            c.target_rotation = c.nominal_rotation;
            c.target_position = c.nominal_position;
        }
        Ok(())
    }

    /// Convert a direction and point from a body frame into the vessel frame.
    pub fn to_vessel_frame(&self, body: BodyId, dir: DVec3, point: DVec3) -> Result<(DVec3, DVec3), RotateError> {
        let b = self.body(body)?;
        Ok((b.rest_rotation * dir, b.rest_rotation * point + b.rest_position))
    }

    /// Convert a direction and point from the vessel frame into a body frame.
    pub fn to_body_frame(&self, body: BodyId, dir: DVec3, point: DVec3) -> Result<(DVec3, DVec3), RotateError> {
        let b = self.body(body)?;
        let inv = b.rest_rotation.inverse();
        Ok((inv * dir, inv * (point - b.rest_position)))
    }

    /// Static rotation of the host about `axis` (target frame), in degrees,
    /// normalized to (-180, 180].
    pub fn twist_angle(&self, id: JointId, axis: DVec3) -> Result<f64, RotateError> {
        let joint = self.joint(id)?;
        let host = self.body(joint.host)?;
        let target = self.body(joint.target)?;
        let r = target.rest_rotation.inverse() * host.rest_rotation;
        let axis = axis.normalize_or_zero();
        let twist = 2.0 * DVec3::new(r.x, r.y, r.z).dot(axis).atan2(r.w);
        Ok(normalize_degrees(twist.to_degrees()))
    }

    pub fn add_auto_lock(&mut self, a: BodyId, b: BodyId) -> Result<(), RotateError> {
        self.body(a)?;
        self.body(b)?;
        self.auto_locks.push(AutoLock { a, b, engaged: true });
        Ok(())
    }

    pub fn auto_locks(&self) -> &[AutoLock] {
        &self.auto_locks
    }

    pub fn engaged_locks(&self) -> usize {
        self.auto_locks.iter().filter(|l| l.engaged).count()
    }

    pub fn release_all_locks(&mut self) -> usize {
        let mut released = 0;
        for lock in self.auto_locks.iter_mut().filter(|l| l.engaged) {
            lock.engaged = false;
            released += 1;
        }
        released
    }

    /// Release only the locks with exactly one end inside `partition`.
    pub fn release_crossing(&mut self, partition: &BTreeSet<BodyId>) -> usize {
        let mut released = 0;
        for lock in self.auto_locks.iter_mut() {
            if lock.engaged && partition.contains(&lock.a) != partition.contains(&lock.b) {
                lock.engaged = false;
                released += 1;
            }
        }
        released
    }

    pub fn restore_all_locks(&mut self) {
        for lock in self.auto_locks.iter_mut() {
            lock.engaged = true;
        }
    }
}

/// Wrap an angle in degrees into (-180, 180].
pub fn normalize_degrees(angle: f64) -> f64 {
    let mut a = angle % 360.0;
    if a <= -180.0 {
        a += 360.0;
    } else if a > 180.0 {
        a -= 360.0;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> (Assembly, BodyId, BodyId, BodyId, JointId) {
        let mut asm = Assembly::new(1, "test");
        let root = asm.add_body("root", DQuat::IDENTITY, DVec3::ZERO);
        let mid = asm.add_body("mid", DQuat::IDENTITY, DVec3::new(0.0, 1.0, 0.0));
        let tip = asm.add_body("tip", DQuat::IDENTITY, DVec3::new(1.0, 1.0, 0.0));
        let joint = asm.attach(mid, root, &[DVec3::new(0.0, -0.5, 0.0)]).unwrap();
        asm.attach(tip, mid, &[DVec3::ZERO]).unwrap();
        (asm, root, mid, tip, joint)
    }

    #[test]
    fn test_attach_derives_nominal() {
        let (asm, _, _, _, joint) = chain();
        let j = asm.joint(joint).unwrap();
        let c = j.constraints.iter().next().unwrap();
        assert!(c.nominal_rotation.abs_diff_eq(DQuat::IDENTITY, 1e-12));
        assert!(c.nominal_position.abs_diff_eq(DVec3::new(0.0, 0.5, 0.0), 1e-12));
        assert_eq!(asm.twist_angle(joint, DVec3::Y).unwrap(), 0.0);
    }

    #[test]
    fn test_validate_rejects_corrupt_arenas() {
        let (asm, root, mid, tip, joint) = chain();
        assert!(asm.validate().is_ok());

        let mut looped = asm.clone();
        looped.bodies[root.0 as usize].parent = Some(tip);
        assert!(matches!(looped.validate(), Err(RotateError::InvalidAssembly(_))));
        // walking a looped arena still terminates
        let mut all = looped.subtree(mid).unwrap();
        all.sort();
        assert_eq!(all, vec![root, mid, tip]);

        let mut dangling = asm.clone();
        dangling.bodies[tip.0 as usize].parent = Some(BodyId(42));
        assert!(dangling.validate().is_err());

        let mut mismatched = asm.clone();
        mismatched.joints[joint.0 as usize].as_mut().unwrap().target = tip;
        assert!(mismatched.validate().is_err());

        let mut nan = asm;
        nan.bodies[mid.0 as usize].rest_position.x = f64::NAN;
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_attach_rejects_cycles() {
        let (mut asm, root, mid, _, _) = chain();
        asm.detach(mid).unwrap();
        assert!(asm.attach(root, root, &[]).is_err());
        let tip2 = asm.add_body("tip2", DQuat::IDENTITY, DVec3::ZERO);
        asm.attach(tip2, mid, &[]).unwrap();
        assert!(asm.attach(mid, tip2, &[]).is_err());
    }

    #[test]
    fn test_subtree_walks_descendants() {
        let (asm, root, mid, tip, _) = chain();
        let sub = asm.subtree(mid).unwrap();
        assert_eq!(sub, vec![mid, tip]);
        assert_eq!(asm.subtree(root).unwrap().len(), 3);
        assert!(matches!(asm.subtree(BodyId(99)), Err(RotateError::UnknownBody(_))));
    }

    #[test]
    fn test_rotate_subtree_moves_descendants_and_twists_joint() {
        let (mut asm, _, mid, tip, joint) = chain();
        asm.rotate_subtree(mid, DVec3::Y, DVec3::new(0.0, 1.0, 0.0), 90.0).unwrap();
        let tip_pos = asm.body(tip).unwrap().rest_position;
        assert!(tip_pos.abs_diff_eq(DVec3::new(0.0, 1.0, -1.0), 1e-9), "{:?}", tip_pos);
        assert!((asm.twist_angle(joint, DVec3::Y).unwrap() - 90.0).abs() < 1e-9);
        // Joint inside the subtree keeps its relative geometry.
        let inner = asm.parent_joint(tip).unwrap();
        assert!(asm.twist_angle(inner, DVec3::Y).unwrap().abs() < 1e-9);
    }

    #[test]
    fn test_detach_drops_subtree_and_locks() {
        let (mut asm, root, mid, tip, joint) = chain();
        asm.add_auto_lock(root, tip).unwrap();
        asm.add_auto_lock(root, mid).unwrap();
        assert_eq!(asm.detach(mid).unwrap(), Some(joint));
        assert!(!asm.contains(mid));
        assert!(!asm.contains(tip));
        assert!(asm.contains(root));
        assert!(asm.auto_locks().is_empty());
        assert!(matches!(asm.joint(joint), Err(RotateError::UnknownJoint(_))));

        let again = asm.reattach(mid, root, &[DVec3::ZERO]).unwrap();
        assert_ne!(again, joint);
        assert!(asm.contains(tip));
    }

    #[test]
    fn test_lock_release_and_restore() {
        let (mut asm, root, mid, tip, _) = chain();
        asm.add_auto_lock(root, tip).unwrap();
        asm.add_auto_lock(mid, tip).unwrap();
        let partition: BTreeSet<BodyId> = [tip].into_iter().collect();
        assert_eq!(asm.release_crossing(&partition), 2);
        asm.restore_all_locks();
        let partition: BTreeSet<BodyId> = [mid, tip].into_iter().collect();
        assert_eq!(asm.release_crossing(&partition), 1);
        assert_eq!(asm.engaged_locks(), 1);
        assert_eq!(asm.release_all_locks(), 1);
        assert_eq!(asm.engaged_locks(), 0);
        asm.restore_all_locks();
        assert_eq!(asm.engaged_locks(), 2);
    }

    #[test]
    fn test_normalize_degrees() {
        assert_eq!(normalize_degrees(190.0), -170.0);
        assert_eq!(normalize_degrees(-180.0), 180.0);
        assert_eq!(normalize_degrees(720.0), 0.0);
        assert_eq!(normalize_degrees(180.0), 180.0);
    }

    #[test]
    fn test_composite_constraints() {
        let mut asm = Assembly::new(1, "sym");
        let a = asm.add_body("a", DQuat::IDENTITY, DVec3::ZERO);
        let b = asm.add_body("b", DQuat::IDENTITY, DVec3::X);
        let j = asm.attach(b, a, &[DVec3::Y, -DVec3::Y]).unwrap();
        let joint = asm.joint(j).unwrap();
        assert!(matches!(joint.constraints, JointConstraints::Composite(_)));
        assert_eq!(joint.constraints.len(), 2);
    }
}
