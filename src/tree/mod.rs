//! Regression tree storage.
//!
//! The tree is an index-addressable arena: nodes are identified by their
//! position in a flat vector and reference each other through ids, so there
//! is no cyclic ownership to manage. The builder grows the tree level by
//! level; a pruning updater may later delete nodes, which is why deletion is
//! a flag rather than removal (instance positions are repaired by walking up
//! to the nearest live ancestor).

/// Node identifier within one tree.
pub type NodeId = u32;

const NO_CHILD: NodeId = NodeId::MAX;

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    left: NodeId,
    right: NodeId,
    split_index: u32,
    split_cond: f32,
    default_left: bool,
    leaf_value: f32,
    is_leaf: bool,
    /// Leaf created by the current depth's split commit; becomes false once
    /// the node is finalized as a leaf or turned into a split.
    fresh: bool,
    deleted: bool,
}

impl Node {
    fn fresh_leaf(parent: Option<NodeId>) -> Self {
        Self {
            parent,
            left: NO_CHILD,
            right: NO_CHILD,
            split_index: 0,
            split_cond: 0.0,
            default_left: false,
            leaf_value: 0.0,
            is_leaf: true,
            fresh: true,
            deleted: false,
        }
    }
}

/// Auxiliary per-node statistics recorded after a tree is grown.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeStat {
    /// Loss change of the best split found at this node (0 for leaves).
    pub loss_chg: f32,
    /// Newton-optimal weight of the node before any split.
    pub base_weight: f32,
    /// Total hessian mass that reached the node.
    pub sum_hess: f32,
}

/// Arena-allocated regression tree with numeric splits.
#[derive(Debug, Clone)]
pub struct RegTree {
    nodes: Vec<Node>,
    stats: Vec<NodeStat>,
}

impl Default for RegTree {
    fn default() -> Self {
        Self::new()
    }
}

impl RegTree {
    /// Create a tree holding a single fresh-leaf root.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::fresh_leaf(None)],
            stats: vec![NodeStat::default()],
        }
    }

    /// Number of nodes, including deleted ones.
    #[inline]
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Check if a node is a leaf.
    #[inline]
    pub fn is_leaf(&self, node: NodeId) -> bool {
        self.nodes[node as usize].is_leaf
    }

    /// Check if a node is a leaf created by the most recent split commit.
    #[inline]
    pub fn is_fresh_leaf(&self, node: NodeId) -> bool {
        let n = &self.nodes[node as usize];
        n.is_leaf && n.fresh
    }

    /// Check if a node has been deleted by a pruner.
    #[inline]
    pub fn is_deleted(&self, node: NodeId) -> bool {
        self.nodes[node as usize].deleted
    }

    /// Parent id, `None` for the root.
    #[inline]
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node as usize].parent
    }

    /// Left child id. Only meaningful for split nodes.
    #[inline]
    pub fn left_child(&self, node: NodeId) -> NodeId {
        self.nodes[node as usize].left
    }

    /// Right child id. Only meaningful for split nodes.
    #[inline]
    pub fn right_child(&self, node: NodeId) -> NodeId {
        self.nodes[node as usize].right
    }

    /// Split feature of a split node.
    #[inline]
    pub fn split_index(&self, node: NodeId) -> u32 {
        self.nodes[node as usize].split_index
    }

    /// Split threshold; values strictly below go left.
    #[inline]
    pub fn split_cond(&self, node: NodeId) -> f32 {
        self.nodes[node as usize].split_cond
    }

    /// Default direction for missing values at a split node.
    #[inline]
    pub fn default_left(&self, node: NodeId) -> bool {
        self.nodes[node as usize].default_left
    }

    /// Leaf value of a leaf node.
    #[inline]
    pub fn leaf_value(&self, node: NodeId) -> f32 {
        self.nodes[node as usize].leaf_value
    }

    /// Allocate two fresh-leaf children for `node` and return their ids.
    ///
    /// The node itself stays a leaf until [`set_split`](Self::set_split) is
    /// called with the chosen condition.
    pub fn add_children(&mut self, node: NodeId) -> (NodeId, NodeId) {
        let left = self.nodes.len() as NodeId;
        let right = left + 1;
        self.nodes.push(Node::fresh_leaf(Some(node)));
        self.nodes.push(Node::fresh_leaf(Some(node)));
        self.stats.push(NodeStat::default());
        self.stats.push(NodeStat::default());
        let n = &mut self.nodes[node as usize];
        n.left = left;
        n.right = right;
        (left, right)
    }

    /// Turn a node into a split node. Children must already exist.
    pub fn set_split(&mut self, node: NodeId, feature: u32, threshold: f32, default_left: bool) {
        let n = &mut self.nodes[node as usize];
        assert!(n.left != NO_CHILD, "set_split requires children");
        n.split_index = feature;
        n.split_cond = threshold;
        n.default_left = default_left;
        n.is_leaf = false;
        n.fresh = false;
    }

    /// Finalize a node as a leaf with the given value.
    pub fn set_leaf(&mut self, node: NodeId, value: f32) {
        let n = &mut self.nodes[node as usize];
        n.leaf_value = value;
        n.is_leaf = true;
        n.fresh = false;
        n.left = NO_CHILD;
        n.right = NO_CHILD;
    }

    /// Mark a node (and nothing else) as deleted. Used by pruning updaters;
    /// instance positions pointing here are repaired afterwards.
    pub fn delete_node(&mut self, node: NodeId) {
        assert!(node != 0, "cannot delete the root");
        self.nodes[node as usize].deleted = true;
    }

    /// Auxiliary statistics of a node.
    #[inline]
    pub fn stat(&self, node: NodeId) -> &NodeStat {
        &self.stats[node as usize]
    }

    /// Mutable auxiliary statistics of a node.
    #[inline]
    pub fn stat_mut(&mut self, node: NodeId) -> &mut NodeStat {
        &mut self.stats[node as usize]
    }

    /// Traverse from the root to a leaf for a dense feature vector.
    ///
    /// Missing features (`NaN` or absent) follow the default direction.
    pub fn predict_row(&self, features: &[f32]) -> f32 {
        let mut nid: NodeId = 0;
        while !self.is_leaf(nid) {
            let fvalue = features
                .get(self.split_index(nid) as usize)
                .copied()
                .unwrap_or(f32::NAN);
            nid = if fvalue.is_nan() {
                if self.default_left(nid) {
                    self.left_child(nid)
                } else {
                    self.right_child(nid)
                }
            } else if fvalue < self.split_cond(nid) {
                self.left_child(nid)
            } else {
                self.right_child(nid)
            };
        }
        self.leaf_value(nid)
    }

    /// Number of leaf nodes (deleted nodes excluded).
    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.is_leaf && !n.deleted)
            .count()
    }

    /// Maximum depth over live leaves; a lone root has depth 0.
    pub fn max_depth(&self) -> usize {
        (0..self.nodes.len() as NodeId)
            .filter(|&nid| self.is_leaf(nid) && !self.is_deleted(nid))
            .map(|nid| self.depth(nid))
            .max()
            .unwrap_or(0)
    }

    /// Depth of a node (root = 0).
    pub fn depth(&self, node: NodeId) -> usize {
        let mut depth = 0;
        let mut nid = node;
        while let Some(parent) = self.parent(nid) {
            nid = parent;
            depth += 1;
        }
        depth
    }
}
