//! Skeleton container: joint tree construction and finalization.
//!
//! A skeleton grows from a root body. Each added body becomes a node whose
//! parent joint is the registered bilateral joint to its parent body. Joints
//! that would close a loop are kept aside as cycling joints and solved through
//! the auxiliary path. [`SkeletonContainer::finalize`] fixes the post-order
//! (children before parents, root last) used by every solve.

use std::collections::HashSet;

use sim_types::{BodyId, ConstraintRow, JointId, JointInfo, SimError, SkeletonId};
use tracing::debug;

use crate::config::SkeletonSolverConfig;
use crate::error::{Result, SkeletonError};
use crate::graph::{Children, GraphNode, JointGraph, NodeId, MAX_SKELETON_NODES};
use crate::scratch::{joint_info, ScratchLayout};
use crate::topology::Topology;

/// Callback invoked once when a container is dropped.
pub type DestructorCallback = Box<dyn FnOnce(&SkeletonContainer) + Send + Sync>;

/// One articulated tree of bodies and its cycling joints.
pub struct SkeletonContainer {
    pub(crate) id: SkeletonId,
    pub(crate) graph: JointGraph,
    /// Post-order node list, valid once finalized.
    pub(crate) order: Vec<NodeId>,
    pub(crate) cycling: Vec<JointId>,
    pub(crate) config: SkeletonSolverConfig,
    pub(crate) finalized: bool,
    destructor: Option<DestructorCallback>,
}

impl std::fmt::Debug for SkeletonContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkeletonContainer")
            .field("id", &self.id)
            .field("nodes", &self.graph.len())
            .field("cycling", &self.cycling)
            .field("finalized", &self.finalized)
            .field("has_destructor", &self.destructor.is_some())
            .finish_non_exhaustive()
    }
}

impl SkeletonContainer {
    /// Create a skeleton rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` is unknown or already belongs to a skeleton.
    pub fn new(id: SkeletonId, topology: &mut Topology, root: BodyId) -> Result<Self> {
        claim_body(topology, root)?;
        topology.set_body_skeleton(root, Some(id));
        Ok(Self {
            id,
            graph: JointGraph::new(root),
            order: Vec::new(),
            cycling: Vec::new(),
            config: SkeletonSolverConfig::default(),
            finalized: false,
            destructor: None,
        })
    }

    /// Unique id of this skeleton.
    #[must_use]
    pub fn id(&self) -> SkeletonId {
        self.id
    }

    /// Solver configuration.
    #[must_use]
    pub fn config(&self) -> &SkeletonSolverConfig {
        &self.config
    }

    /// Replace the solver configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SkeletonError::InvalidConfig`] if the configuration is invalid.
    pub fn set_config(&mut self, config: SkeletonSolverConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Register a callback fired once when this container is dropped.
    pub fn set_destructor_callback<F>(&mut self, callback: F)
    where
        F: FnOnce(&SkeletonContainer) + Send + Sync + 'static,
    {
        self.destructor = Some(Box::new(callback));
    }

    /// Add `body` below `parent` (the root when `None`).
    ///
    /// The connecting joint is looked up in `topology`. A joint oriented from
    /// parent to child is accepted only when the parent is the root; the new
    /// body then becomes the root and the old root its child.
    ///
    /// # Errors
    ///
    /// Rejects edits after finalization, bodies already in a skeleton,
    /// unknown parents, missing joints, reversed joints below the root and
    /// skeletons at capacity.
    pub fn add_child(
        &mut self,
        topology: &mut Topology,
        body: BodyId,
        parent: Option<BodyId>,
    ) -> Result<NodeId> {
        if self.finalized {
            return Err(SkeletonError::AlreadyFinalized);
        }
        claim_body(topology, body)?;
        let parent_body = parent.unwrap_or_else(|| self.graph.node(self.graph.root()).body());
        let parent_node = self
            .graph
            .find(parent_body)
            .ok_or(SkeletonError::ParentNotInSkeleton(parent_body))?;
        let joint = topology
            .find_bilateral_joint(body, parent_body)
            .ok_or(SkeletonError::NoConnectingJoint {
                body,
                parent: parent_body,
            })?;
        self.attach(topology, body, parent_node, joint)
    }

    /// Grow the tree from the root through the listed joints, depth first.
    ///
    /// Bodies already in another skeleton are not entered. Returns the listed
    /// joints left unused whose bodies both ended up in this tree; these are
    /// the loop-closure candidates for [`Self::attach_cycling_joint`].
    ///
    /// The whole growth is checked before any body is attached, so on error
    /// the tree and `topology` are unchanged.
    ///
    /// # Errors
    ///
    /// Same as [`Self::add_child`], plus unknown joint ids.
    pub fn add_joint_list(
        &mut self,
        topology: &mut Topology,
        joints: &[JointId],
    ) -> Result<Vec<JointId>> {
        if self.finalized {
            return Err(SkeletonError::AlreadyFinalized);
        }
        let pairs = joints
            .iter()
            .map(|&joint| {
                topology
                    .joint_bodies(joint)
                    .ok_or(SimError::InvalidJointId(joint.raw()))
            })
            .collect::<sim_types::Result<Vec<_>>>()?;

        let plan = self.plan_growth(topology, joints, &pairs)?;
        if self.graph.len() + plan.len() > MAX_SKELETON_NODES {
            return Err(SkeletonError::TooManyNodes {
                max: MAX_SKELETON_NODES,
            });
        }
        let mut used = vec![false; joints.len()];
        for &(edge, body, parent) in &plan {
            let parent_node = self
                .graph
                .find(parent)
                .ok_or(SkeletonError::ParentNotInSkeleton(parent))?;
            self.attach(topology, body, parent_node, joints[edge])?;
            used[edge] = true;
        }

        let in_tree = |b: BodyId| topology.body_skeleton(b) == Some(self.id);
        let mut leftover = Vec::new();
        for ((&joint, &(body0, body1)), &was_used) in joints.iter().zip(&pairs).zip(&used) {
            if !was_used && in_tree(body0) && in_tree(body1) {
                leftover.push(joint);
            }
        }
        Ok(leftover)
    }

    /// Record a loop-closing joint.
    ///
    /// Returns `true` and records the joint when at least one endpoint is in
    /// this tree and neither endpoint belongs to another skeleton; returns
    /// `false` and records nothing otherwise.
    ///
    /// # Errors
    ///
    /// Rejects edits after finalization, unknown joints and joints that are
    /// already tree edges.
    pub fn attach_cycling_joint(&mut self, topology: &Topology, joint: JointId) -> Result<bool> {
        if self.finalized {
            return Err(SkeletonError::AlreadyFinalized);
        }
        let (body0, body1) = topology
            .joint_bodies(joint)
            .ok_or(SimError::InvalidJointId(joint.raw()))?;
        if self.graph.contains_joint(joint) {
            return Err(SkeletonError::JointAlreadyInTree(joint));
        }
        if self.cycling.contains(&joint) {
            return Ok(true);
        }

        let owner0 = topology.body_skeleton(body0);
        let owner1 = topology.body_skeleton(body1);
        let ours = |owner: Option<SkeletonId>| owner == Some(self.id);
        let foreign = |owner: Option<SkeletonId>| owner.is_some_and(|id| id != self.id);
        if !(ours(owner0) || ours(owner1)) || foreign(owner0) || foreign(owner1) {
            debug!(skeleton = %self.id, %joint, "cycling joint rejected");
            return Ok(false);
        }
        self.cycling.push(joint);
        Ok(true)
    }

    /// Forget a cycling joint. Returns whether it was recorded.
    pub fn remove_cycling_joint(&mut self, joint: JointId) -> bool {
        let before = self.cycling.len();
        self.cycling.retain(|&j| j != joint);
        self.cycling.len() != before
    }

    /// Fix the post-order and mark every tree joint as owned by this skeleton.
    ///
    /// Running it again on an unchanged tree yields the same order.
    pub fn finalize(&mut self, topology: &mut Topology) {
        self.order = self.graph.post_order();
        self.graph.assign_indices(&self.order);
        for (_, node) in self.graph.iter() {
            if let Some(joint) = node.joint() {
                topology.set_joint_owner(joint, Some(self.id));
            }
        }
        self.finalized = true;
        debug!(
            skeleton = %self.id,
            nodes = self.order.len(),
            cycling = self.cycling.len(),
            "skeleton finalized"
        );
    }

    /// Whether [`Self::finalize`] has run.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Clear every back-reference this skeleton left in `topology`, then drop
    /// it.
    pub fn detach(self, topology: &mut Topology) {
        for (_, node) in self.graph.iter() {
            topology.set_body_skeleton(node.body(), None);
            if let Some(joint) = node.joint() {
                if topology.joint_owner(joint) == Some(self.id) {
                    topology.set_joint_owner(joint, None);
                }
            }
        }
    }

    /// Root node.
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.graph.root()
    }

    /// Node record.
    #[must_use]
    pub fn node(&self, node: NodeId) -> Option<&GraphNode> {
        self.graph.get(node)
    }

    /// Parent of `node`.
    #[must_use]
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.graph.get(node).and_then(GraphNode::parent)
    }

    /// First child of `node`.
    #[must_use]
    pub fn first_child(&self, node: NodeId) -> Option<NodeId> {
        self.graph.get(node).and_then(GraphNode::first_child)
    }

    /// Next sibling of `node`.
    #[must_use]
    pub fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        self.graph.get(node).and_then(GraphNode::next_sibling)
    }

    /// Children of `node` in sibling-list order.
    #[must_use]
    pub fn children(&self, node: NodeId) -> Children<'_> {
        self.graph.children(node)
    }

    /// Body of `node`.
    #[must_use]
    pub fn body(&self, node: NodeId) -> Option<BodyId> {
        self.graph.get(node).map(GraphNode::body)
    }

    /// Joint from `node` to its parent.
    #[must_use]
    pub fn parent_joint(&self, node: NodeId) -> Option<JointId> {
        self.graph.get(node).and_then(GraphNode::joint)
    }

    /// Post-order index of `node`, once finalized.
    #[must_use]
    pub fn node_index(&self, node: NodeId) -> Option<usize> {
        self.graph.get(node).and_then(GraphNode::index)
    }

    /// Node standing for `body`.
    #[must_use]
    pub fn find_node(&self, body: BodyId) -> Option<NodeId> {
        self.graph.find(body)
    }

    /// Number of nodes, root included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.len()
    }

    /// Nodes in post-order, empty until finalized.
    #[must_use]
    pub fn nodes_in_order(&self) -> &[NodeId] {
        &self.order
    }

    /// Recorded cycling joints.
    #[must_use]
    pub fn cycling_joints(&self) -> &[JointId] {
        &self.cycling
    }

    /// Scratch sizes for this step's rows.
    ///
    /// Body state is not known here, so every non-root body is counted as
    /// dynamic. A static non-root body moves its joint's rows to the auxiliary
    /// set at factorization time.
    ///
    /// # Errors
    ///
    /// Returns an error for tree or cycling joints missing from `joints` or
    /// whose rows run past `rows`.
    pub fn scratch_layout(
        &self,
        joints: &[JointInfo],
        rows: &[ConstraintRow],
    ) -> Result<ScratchLayout> {
        let mut layout = ScratchLayout {
            node_count: self.graph.len(),
            ..ScratchLayout::default()
        };
        for (_, node) in self.graph.iter() {
            if let Some(joint) = node.joint() {
                let info = joint_info(joints, joint, rows.len())?;
                layout.row_count += info.row_count;
                layout.auxiliary_row_count +=
                    rows[info.rows()].iter().filter(|r| !r.is_unbounded()).count();
            }
        }
        for &joint in &self.cycling {
            let info = joint_info(joints, joint, rows.len())?;
            layout.row_count += info.row_count;
            layout.auxiliary_row_count += info.row_count;
        }
        Ok(layout)
    }

    /// Bytes of scratch storage this step needs.
    ///
    /// # Errors
    ///
    /// Same as [`Self::scratch_layout`].
    pub fn calculate_memory_buffer_size_in_bytes(
        &self,
        joints: &[JointInfo],
        rows: &[ConstraintRow],
    ) -> Result<usize> {
        Ok(self.scratch_layout(joints, rows)?.size_in_bytes())
    }

    /// Dry run of [`Self::add_joint_list`]: the `(edge, body, parent)`
    /// attachments in the order they will be made.
    fn plan_growth(
        &self,
        topology: &Topology,
        joints: &[JointId],
        pairs: &[(BodyId, BodyId)],
    ) -> Result<Vec<(usize, BodyId, BodyId)>> {
        let mut root = self.graph.node(self.graph.root()).body();
        let mut reached = HashSet::new();
        let mut used = vec![false; pairs.len()];
        let mut plan = Vec::new();
        let mut stack = vec![root];
        while let Some(body) = stack.pop() {
            for (i, &(body0, body1)) in pairs.iter().enumerate() {
                if used[i] {
                    continue;
                }
                let other = if body0 == body {
                    body1
                } else if body1 == body {
                    body0
                } else {
                    continue;
                };
                if topology.body_skeleton(other).is_some() || reached.contains(&other) {
                    continue;
                }
                // Same orientation rule as `attach`.
                if body0 != other {
                    if body != root {
                        return Err(SkeletonError::ReversedJoint { joint: joints[i] });
                    }
                    root = other;
                }
                used[i] = true;
                reached.insert(other);
                plan.push((i, other, body));
                stack.push(other);
            }
        }
        Ok(plan)
    }

    fn attach(
        &mut self,
        topology: &mut Topology,
        body: BodyId,
        parent: NodeId,
        joint: JointId,
    ) -> Result<NodeId> {
        if self.graph.len() >= MAX_SKELETON_NODES {
            return Err(SkeletonError::TooManyNodes {
                max: MAX_SKELETON_NODES,
            });
        }
        let (body0, _) = topology
            .joint_bodies(joint)
            .ok_or(SimError::InvalidJointId(joint.raw()))?;

        let node = if body0 == body {
            self.graph.insert_child(parent, body, joint)
        } else if parent == self.graph.root() {
            debug!(skeleton = %self.id, %body, %joint, "reversed joint, re-rooting");
            self.graph.insert_root(body, joint)
        } else {
            return Err(SkeletonError::ReversedJoint { joint });
        };
        topology.set_body_skeleton(body, Some(self.id));
        Ok(node)
    }
}

impl Drop for SkeletonContainer {
    fn drop(&mut self) {
        if let Some(callback) = self.destructor.take() {
            callback(self);
        }
    }
}

/// Check that `body` exists and is free to join a skeleton.
fn claim_body(topology: &Topology, body: BodyId) -> Result<()> {
    if !topology.contains_body(body) {
        return Err(SimError::InvalidBodyId(body.raw()).into());
    }
    if let Some(skeleton) = topology.body_skeleton(body) {
        return Err(SkeletonError::BodyAlreadyInSkeleton { body, skeleton });
    }
    Ok(())
}
