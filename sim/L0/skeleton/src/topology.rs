//! Registry of bodies and bilateral joints.
//!
//! This is the joint-management side skeletons build against: it knows which
//! two bodies each joint connects, which skeleton (if any) each body belongs
//! to, and which skeleton owns each joint as a tree edge after finalization.

use sim_types::{BodyId, JointId, JointInfo, SimError, SkeletonId};

#[derive(Debug, Clone, Default)]
struct BodyRecord {
    skeleton: Option<SkeletonId>,
    joints: Vec<JointId>,
}

#[derive(Debug, Clone, Copy)]
struct JointRecord {
    body0: BodyId,
    body1: BodyId,
    owner: Option<SkeletonId>,
}

/// Bodies, bilateral joints and their skeleton back-references.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    bodies: Vec<BodyRecord>,
    joints: Vec<JointRecord>,
}

impl Topology {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a body. Ids are dense, starting at 0.
    pub fn add_body(&mut self) -> BodyId {
        let id = BodyId::from(self.bodies.len());
        self.bodies.push(BodyRecord::default());
        id
    }

    /// Register a bilateral joint between `body0` and `body1`.
    ///
    /// A tree edge runs from child to parent, so `body0` is normally the
    /// child.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidBodyId`] if either body is unknown or both
    /// ids are the same body.
    pub fn add_joint(&mut self, body0: BodyId, body1: BodyId) -> sim_types::Result<JointId> {
        if !self.contains_body(body0) {
            return Err(SimError::InvalidBodyId(body0.raw()));
        }
        if !self.contains_body(body1) || body0 == body1 {
            return Err(SimError::InvalidBodyId(body1.raw()));
        }
        let id = JointId::new(self.joints.len() as u64);
        self.joints.push(JointRecord {
            body0,
            body1,
            owner: None,
        });
        self.bodies[body0.index()].joints.push(id);
        self.bodies[body1.index()].joints.push(id);
        Ok(id)
    }

    /// Number of registered bodies.
    #[must_use]
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Number of registered joints.
    #[must_use]
    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    /// Whether `body` is registered.
    #[must_use]
    pub fn contains_body(&self, body: BodyId) -> bool {
        body.index() < self.bodies.len()
    }

    /// The `(body0, body1)` pair a joint connects.
    #[must_use]
    pub fn joint_bodies(&self, joint: JointId) -> Option<(BodyId, BodyId)> {
        self.joints
            .get(joint.index())
            .map(|record| (record.body0, record.body1))
    }

    /// Joints touching `body`, in registration order.
    #[must_use]
    pub fn joints_of(&self, body: BodyId) -> &[JointId] {
        self.bodies
            .get(body.index())
            .map_or(&[][..], |record| record.joints.as_slice())
    }

    /// First registered joint connecting `a` and `b`, in either orientation.
    #[must_use]
    pub fn find_bilateral_joint(&self, a: BodyId, b: BodyId) -> Option<JointId> {
        self.joints_of(a).iter().copied().find(|&joint| {
            self.joint_bodies(joint)
                .is_some_and(|(b0, b1)| (b0 == a && b1 == b) || (b0 == b && b1 == a))
        })
    }

    /// Skeleton `body` belongs to.
    #[must_use]
    pub fn body_skeleton(&self, body: BodyId) -> Option<SkeletonId> {
        self.bodies.get(body.index()).and_then(|record| record.skeleton)
    }

    /// Skeleton owning `joint` as a tree edge, set at finalization.
    #[must_use]
    pub fn joint_owner(&self, joint: JointId) -> Option<SkeletonId> {
        self.joints.get(joint.index()).and_then(|record| record.owner)
    }

    /// Describe `row_count` rows of `joint` starting at `row_start`.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidJointId`] for an unknown joint.
    pub fn joint_info(
        &self,
        joint: JointId,
        row_start: usize,
        row_count: usize,
    ) -> sim_types::Result<JointInfo> {
        let (body0, body1) = self
            .joint_bodies(joint)
            .ok_or(SimError::InvalidJointId(joint.raw()))?;
        Ok(JointInfo::new(joint, body0, body1, row_start, row_count))
    }

    pub(crate) fn set_body_skeleton(&mut self, body: BodyId, skeleton: Option<SkeletonId>) {
        if let Some(record) = self.bodies.get_mut(body.index()) {
            record.skeleton = skeleton;
        }
    }

    pub(crate) fn set_joint_owner(&mut self, joint: JointId, owner: Option<SkeletonId>) {
        if let Some(record) = self.joints.get_mut(joint.index()) {
            record.owner = owner;
        }
    }
}
