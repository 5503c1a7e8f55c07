//! Arena-backed joint tree.
//!
//! One [`GraphNode`] per rigid body, linked to its parent, first child and
//! next sibling by arena slot. Every node except the root holds the bilateral
//! joint to its parent, oriented `body0 = node`, `body1 = parent`.

use sim_types::{BodyId, JointId};

/// Maximum number of bodies in one skeleton.
pub const MAX_SKELETON_NODES: usize = 1024;

/// Arena slot of a node. Stable for the lifetime of the skeleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Arena slot.
    #[must_use]
    pub const fn slot(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

/// One rigid body's position in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    body: BodyId,
    joint: Option<JointId>,
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    next_sibling: Option<NodeId>,
    index: Option<usize>,
}

impl GraphNode {
    fn new(body: BodyId) -> Self {
        Self {
            body,
            joint: None,
            parent: None,
            first_child: None,
            next_sibling: None,
            index: None,
        }
    }

    /// Body this node stands for.
    #[must_use]
    pub fn body(&self) -> BodyId {
        self.body
    }

    /// Joint to the parent. `None` only for the root.
    #[must_use]
    pub fn joint(&self) -> Option<JointId> {
        self.joint
    }

    /// Parent node.
    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Most recently attached child.
    #[must_use]
    pub fn first_child(&self) -> Option<NodeId> {
        self.first_child
    }

    /// Next child of the same parent.
    #[must_use]
    pub fn next_sibling(&self) -> Option<NodeId> {
        self.next_sibling
    }

    /// Post-order index, assigned at finalization.
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        self.index
    }
}

/// Node arena plus the current root.
#[derive(Debug, Clone)]
pub(crate) struct JointGraph {
    nodes: Vec<GraphNode>,
    root: NodeId,
}

impl JointGraph {
    pub(crate) fn new(root_body: BodyId) -> Self {
        Self {
            nodes: vec![GraphNode::new(root_body)],
            root: NodeId(0),
        }
    }

    pub(crate) fn root(&self) -> NodeId {
        self.root
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn get(&self, node: NodeId) -> Option<&GraphNode> {
        self.nodes.get(node.0)
    }

    /// Node for an id handed out by this graph.
    pub(crate) fn node(&self, node: NodeId) -> &GraphNode {
        &self.nodes[node.0]
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (NodeId, &GraphNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub(crate) fn find(&self, body: BodyId) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.body == body).map(NodeId)
    }

    pub(crate) fn contains_joint(&self, joint: JointId) -> bool {
        self.nodes.iter().any(|n| n.joint == Some(joint))
    }

    /// Attach `body` as the new first child of `parent`.
    pub(crate) fn insert_child(&mut self, parent: NodeId, body: BodyId, joint: JointId) -> NodeId {
        let id = NodeId(self.nodes.len());
        let mut node = GraphNode::new(body);
        node.joint = Some(joint);
        node.parent = Some(parent);
        node.next_sibling = self.nodes[parent.0].first_child;
        self.nodes.push(node);
        self.nodes[parent.0].first_child = Some(id);
        id
    }

    /// Make `body` the new root with the old root as its only new child.
    ///
    /// The old root takes `joint`, which must run from the old root's body to
    /// `body`.
    pub(crate) fn insert_root(&mut self, body: BodyId, joint: JointId) -> NodeId {
        let id = NodeId(self.nodes.len());
        let old_root = self.root;
        let mut node = GraphNode::new(body);
        node.first_child = Some(old_root);
        self.nodes.push(node);

        let demoted = &mut self.nodes[old_root.0];
        demoted.parent = Some(id);
        demoted.joint = Some(joint);
        demoted.next_sibling = None;
        self.root = id;
        id
    }

    pub(crate) fn children(&self, node: NodeId) -> Children<'_> {
        Children {
            graph: self,
            next: self.get(node).and_then(GraphNode::first_child),
        }
    }

    /// Children before parents, siblings in list order, root last.
    pub(crate) fn post_order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(self.root, false)];
        let mut siblings = Vec::new();
        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                order.push(node);
                continue;
            }
            stack.push((node, true));
            siblings.clear();
            siblings.extend(self.children(node));
            stack.extend(siblings.iter().rev().map(|&child| (child, false)));
        }
        order
    }

    pub(crate) fn assign_indices(&mut self, order: &[NodeId]) {
        for (index, node) in order.iter().enumerate() {
            self.nodes[node.0].index = Some(index);
        }
    }
}

/// Iterator over a node's children in sibling-list order.
pub struct Children<'a> {
    graph: &'a JointGraph,
    next: Option<NodeId>,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.graph.get(current).and_then(GraphNode::next_sibling);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(i: u64) -> BodyId {
        BodyId::new(i)
    }

    fn joint(i: u64) -> JointId {
        JointId::new(i)
    }

    #[test]
    fn test_children_in_sibling_order() {
        let mut graph = JointGraph::new(body(0));
        let root = graph.root();
        let a = graph.insert_child(root, body(1), joint(0));
        let b = graph.insert_child(root, body(2), joint(1));

        // Newest child comes first.
        let children: Vec<_> = graph.children(root).collect();
        assert_eq!(children, vec![b, a]);
        assert_eq!(graph.find(body(2)), Some(b));
        assert!(graph.contains_joint(joint(1)));
        assert!(!graph.contains_joint(joint(7)));
    }

    #[test]
    fn test_post_order_children_first() {
        let mut graph = JointGraph::new(body(0));
        let root = graph.root();
        let a = graph.insert_child(root, body(1), joint(0));
        let b = graph.insert_child(root, body(2), joint(1));
        let c = graph.insert_child(a, body(3), joint(2));

        let order = graph.post_order();
        assert_eq!(order, vec![b, c, a, root]);

        graph.assign_indices(&order);
        for (id, node) in graph.iter() {
            if let Some(parent) = node.parent() {
                let child_index = node.index().unwrap_or(usize::MAX);
                let parent_index = graph.get(parent).and_then(GraphNode::index);
                assert!(Some(child_index) < parent_index, "{id} after its parent");
            }
        }
    }

    #[test]
    fn test_insert_root() {
        let mut graph = JointGraph::new(body(0));
        let old_root = graph.root();
        let new_root = graph.insert_root(body(1), joint(0));

        assert_eq!(graph.root(), new_root);
        let demoted = graph.get(old_root).cloned();
        assert_eq!(demoted.as_ref().and_then(GraphNode::parent), Some(new_root));
        assert_eq!(demoted.as_ref().and_then(GraphNode::joint), Some(joint(0)));
        assert_eq!(graph.get(new_root).and_then(GraphNode::joint), None);
        assert_eq!(graph.children(new_root).collect::<Vec<_>>(), vec![old_root]);
    }
}
