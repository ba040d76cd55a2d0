use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::promql::ast::{
    Aggregation, AggregationType, BinaryExpr, BinaryOperator, Call, Func, MatrixSelector, Node,
    NumberLiteral, ParenExpr, Placeholder, StartOrEnd, StringLiteral, Subquery, UnaryExpr,
    UnaryOperator, VectorMatching, VectorSelector,
};
use crate::promql::serialize::serialize;
use crate::promql::types::NodeQueryResult;

pub type NodeId = u64;

// ═══════════════════════════════════════════════════════════════════
// ID allocation
// ═══════════════════════════════════════════════════════════════════

/// Hands out node IDs. IDs are never reused for the lifetime of an
/// allocator, so undo snapshots and async results can refer to them safely.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: NodeId,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next_id(&mut self) -> NodeId {
        let id = self.next;
        self.next += 1;
        id
    }

    /// The ID the next call to `next_id` will return.
    pub fn peek(&self) -> NodeId {
        self.next
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════
// Tree types
// ═══════════════════════════════════════════════════════════════════

/// An AST node with its child slots removed. Children live in
/// `TreeNode::child_ids`.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedNode {
    Aggregation {
        op: AggregationType,
        grouping: Vec<String>,
        without: bool,
    },
    BinaryExpr {
        op: BinaryOperator,
        matching: Option<VectorMatching>,
        return_bool: bool,
    },
    Call {
        func: Func,
    },
    MatrixSelector(MatrixSelector),
    Subquery {
        range: u64,
        offset: i64,
        step: u64,
        timestamp: Option<i64>,
        start_or_end: Option<StartOrEnd>,
    },
    NumberLiteral(NumberLiteral),
    ParenExpr,
    StringLiteral(StringLiteral),
    UnaryExpr {
        op: UnaryOperator,
    },
    VectorSelector(VectorSelector),
    Placeholder,
}

impl NormalizedNode {
    fn strip(node: &Node) -> Self {
        match node {
            Node::Aggregation(agg) => NormalizedNode::Aggregation {
                op: agg.op,
                grouping: agg.grouping.clone(),
                without: agg.without,
            },
            Node::BinaryExpr(b) => NormalizedNode::BinaryExpr {
                op: b.op,
                matching: b.matching.clone(),
                return_bool: b.return_bool,
            },
            Node::Call(call) => NormalizedNode::Call { func: call.func.clone() },
            Node::MatrixSelector(ms) => NormalizedNode::MatrixSelector(ms.clone()),
            Node::Subquery(sq) => NormalizedNode::Subquery {
                range: sq.range,
                offset: sq.offset,
                step: sq.step,
                timestamp: sq.timestamp,
                start_or_end: sq.start_or_end,
            },
            Node::NumberLiteral(n) => NormalizedNode::NumberLiteral(n.clone()),
            Node::ParenExpr(_) => NormalizedNode::ParenExpr,
            Node::StringLiteral(s) => NormalizedNode::StringLiteral(s.clone()),
            Node::UnaryExpr(u) => NormalizedNode::UnaryExpr { op: u.op },
            Node::VectorSelector(vs) => NormalizedNode::VectorSelector(vs.clone()),
            Node::Placeholder(_) => NormalizedNode::Placeholder,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            NormalizedNode::Aggregation { .. } => "aggregation",
            NormalizedNode::BinaryExpr { .. } => "binaryExpr",
            NormalizedNode::Call { .. } => "call",
            NormalizedNode::MatrixSelector(_) => "matrixSelector",
            NormalizedNode::Subquery { .. } => "subquery",
            NormalizedNode::NumberLiteral(_) => "numberLiteral",
            NormalizedNode::ParenExpr => "parenExpr",
            NormalizedNode::StringLiteral(_) => "stringLiteral",
            NormalizedNode::UnaryExpr { .. } => "unaryExpr",
            NormalizedNode::VectorSelector(_) => "vectorSelector",
            NormalizedNode::Placeholder => "placeholder",
        }
    }
}

/// Result of the last query issued for a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum NodeQueryState {
    Running,
    Success(NodeQueryResult),
    Error { message: String },
    NodeIncomplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditMode {
    #[default]
    None,
    Text,
    Form,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub child_ids: Vec<NodeId>,
    pub node: NormalizedNode,
    pub query_state: NodeQueryState,
    pub edit_mode: EditMode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    pub nodes: BTreeMap<NodeId, TreeNode>,
    pub root_id: NodeId,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TreeError {
    #[error("root node {0} is missing")]
    MissingRoot(NodeId),
    #[error("root node {0} has a parent")]
    RootHasParent(NodeId),
    #[error("node {parent} references missing child {child}")]
    DanglingChild { parent: NodeId, child: NodeId },
    #[error("node {child} is listed under {listed} but its parent is {actual:?}")]
    ParentMismatch {
        child: NodeId,
        listed: NodeId,
        actual: Option<NodeId>,
    },
    #[error("node {0} is not reachable from the root")]
    Unreachable(NodeId),
}

// ═══════════════════════════════════════════════════════════════════
// Normalize / denormalize
// ═══════════════════════════════════════════════════════════════════

/// Flatten an AST into a tree. Children are numbered before their parent,
/// so the root always carries the highest ID of the call.
pub fn normalize(ast: &Node, ids: &mut IdAllocator) -> Tree {
    let mut nodes = BTreeMap::new();
    let root_id = insert_subtree(ast, ids, &mut nodes);
    Tree { nodes, root_id }
}

fn insert_subtree(
    node: &Node,
    ids: &mut IdAllocator,
    nodes: &mut BTreeMap<NodeId, TreeNode>,
) -> NodeId {
    let child_ids: Vec<NodeId> = node
        .children()
        .into_iter()
        .map(|child| insert_subtree(child, ids, nodes))
        .collect();

    let id = ids.next_id();
    for child_id in &child_ids {
        if let Some(child) = nodes.get_mut(child_id) {
            child.parent_id = Some(id);
        }
    }

    nodes.insert(
        id,
        TreeNode {
            id,
            parent_id: None,
            child_ids,
            node: NormalizedNode::strip(node),
            query_state: NodeQueryState::Running,
            edit_mode: EditMode::None,
        },
    );
    id
}

/// Rebuild the full AST rooted at `id`.
///
/// Panics if the tree is inconsistent (missing node, wrong number of
/// children for a node type). Trees are only ever built by `normalize` and
/// `Tree::replace_subtree`, so this indicates a bug.
pub fn denormalize(tree: &Tree, id: NodeId) -> Node {
    let tn = tree.expect_node(id);
    let children: Vec<Node> = tn.child_ids.iter().map(|cid| denormalize(tree, *cid)).collect();

    match &tn.node {
        NormalizedNode::Aggregation { op, grouping, without } => {
            let (param, expr) = if op.has_param() {
                let [param, expr] = slots::<2>(children, tn);
                (Some(Box::new(param)), expr)
            } else {
                let [expr] = slots::<1>(children, tn);
                (None, expr)
            };
            Node::Aggregation(Aggregation {
                op: *op,
                expr: Box::new(expr),
                param,
                grouping: grouping.clone(),
                without: *without,
            })
        }
        NormalizedNode::BinaryExpr { op, matching, return_bool } => {
            let [lhs, rhs] = slots::<2>(children, tn);
            Node::BinaryExpr(BinaryExpr {
                op: *op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                matching: matching.clone(),
                return_bool: *return_bool,
            })
        }
        NormalizedNode::Call { func } => Node::Call(Call {
            func: func.clone(),
            args: children,
        }),
        NormalizedNode::MatrixSelector(ms) => {
            let [] = slots::<0>(children, tn);
            Node::MatrixSelector(ms.clone())
        }
        NormalizedNode::Subquery {
            range,
            offset,
            step,
            timestamp,
            start_or_end,
        } => {
            let [expr] = slots::<1>(children, tn);
            Node::Subquery(Subquery {
                expr: Box::new(expr),
                range: *range,
                offset: *offset,
                step: *step,
                timestamp: *timestamp,
                start_or_end: *start_or_end,
            })
        }
        NormalizedNode::NumberLiteral(n) => {
            let [] = slots::<0>(children, tn);
            Node::NumberLiteral(n.clone())
        }
        NormalizedNode::ParenExpr => {
            let [expr] = slots::<1>(children, tn);
            Node::ParenExpr(ParenExpr { expr: Box::new(expr) })
        }
        NormalizedNode::StringLiteral(s) => {
            let [] = slots::<0>(children, tn);
            Node::StringLiteral(s.clone())
        }
        NormalizedNode::UnaryExpr { op } => {
            let [expr] = slots::<1>(children, tn);
            Node::UnaryExpr(UnaryExpr {
                op: *op,
                expr: Box::new(expr),
            })
        }
        NormalizedNode::VectorSelector(vs) => {
            let [] = slots::<0>(children, tn);
            Node::VectorSelector(vs.clone())
        }
        NormalizedNode::Placeholder => Node::Placeholder(Placeholder { children }),
    }
}

fn slots<const N: usize>(children: Vec<Node>, tn: &TreeNode) -> [Node; N] {
    let count = children.len();
    children.try_into().unwrap_or_else(|_: Vec<Node>| {
        panic!(
            "{} node {} has {count} children, expected {N}",
            tn.node.type_name(),
            tn.id
        )
    })
}

/// SHA-256 of the canonical text of the subtree at `id`, as lowercase hex.
/// Used to check that an async result still belongs to the node's content.
pub fn fingerprint(tree: &Tree, id: NodeId) -> String {
    let mut hasher = Sha256::new();
    hasher.update(serialize(&denormalize(tree, id)).as_bytes());
    format!("{:x}", hasher.finalize())
}

// ═══════════════════════════════════════════════════════════════════
// Tree operations
// ═══════════════════════════════════════════════════════════════════

impl Tree {
    /// A tree holding a single placeholder.
    pub fn placeholder(ids: &mut IdAllocator) -> Self {
        normalize(&Node::placeholder(), ids)
    }

    pub fn get(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut TreeNode> {
        self.nodes.get_mut(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn root(&self) -> &TreeNode {
        self.expect_node(self.root_id)
    }

    fn expect_node(&self, id: NodeId) -> &TreeNode {
        self.nodes
            .get(&id)
            .unwrap_or_else(|| panic!("tree has no node {id}"))
    }

    /// Full AST of the whole tree.
    pub fn to_ast(&self) -> Node {
        denormalize(self, self.root_id)
    }

    /// Move the root to a different ID, rewiring its children's back-links.
    /// After this call `root_id == new_id`.
    pub fn rekey_root(&mut self, new_id: NodeId) {
        if new_id == self.root_id {
            return;
        }
        let Some(mut root) = self.nodes.remove(&self.root_id) else {
            return;
        };
        root.id = new_id;
        for child_id in &root.child_ids {
            if let Some(child) = self.nodes.get_mut(child_id) {
                child.parent_id = Some(new_id);
            }
        }
        self.nodes.insert(new_id, root);
        self.root_id = new_id;
    }

    /// IDs in display order: `lhs, self, rhs` for binary expressions,
    /// `self, children...` for everything else.
    pub fn ordered_node_ids(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        self.collect_ordered(self.root_id, &mut out);
        out
    }

    fn collect_ordered(&self, id: NodeId, out: &mut Vec<NodeId>) {
        let Some(tn) = self.nodes.get(&id) else {
            return;
        };
        if let (NormalizedNode::BinaryExpr { .. }, [lhs, rhs]) = (&tn.node, tn.child_ids.as_slice()) {
            self.collect_ordered(*lhs, out);
            out.push(id);
            self.collect_ordered(*rhs, out);
            return;
        }
        out.push(id);
        for child_id in &tn.child_ids {
            self.collect_ordered(*child_id, out);
        }
    }

    /// `id` and every node below it.
    pub fn subtree_ids(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(tn) = self.nodes.get(&next) {
                out.push(next);
                stack.extend(tn.child_ids.iter().rev());
            }
        }
        out
    }

    /// Whether `ancestor` is `id` or lies on the path from `id` to the root.
    pub fn is_ancestor_or_self(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(cur) = current {
            if cur == ancestor {
                return true;
            }
            current = self.nodes.get(&cur).and_then(|tn| tn.parent_id);
        }
        false
    }

    /// Replace the subtree at `node_id` with a freshly normalized `ast`.
    ///
    /// The new subtree's root keeps `node_id` as its ID, its parent link and
    /// its edit mode, so outside references to `node_id` stay valid. All
    /// other previous descendants are removed. Returns false if `node_id` is
    /// not in the tree.
    pub fn replace_subtree(&mut self, node_id: NodeId, ast: &Node, ids: &mut IdAllocator) -> bool {
        let Some(old) = self.nodes.get(&node_id) else {
            return false;
        };
        let parent_id = old.parent_id;
        let edit_mode = old.edit_mode;

        let mut sub = normalize(ast, ids);
        sub.rekey_root(node_id);
        if let Some(root) = sub.nodes.get_mut(&node_id) {
            root.parent_id = parent_id;
            root.edit_mode = edit_mode;
        }

        for id in self.subtree_ids(node_id) {
            self.nodes.remove(&id);
        }
        self.nodes.extend(sub.nodes);
        tracing::debug!(node_id, nodes = self.nodes.len(), "replaced subtree");
        true
    }

    /// Verify parent/child links: the root has no parent, every child ID
    /// exists and points back at its parent, and every node is reachable.
    pub fn check_consistency(&self) -> Result<(), TreeError> {
        let root = self
            .nodes
            .get(&self.root_id)
            .ok_or(TreeError::MissingRoot(self.root_id))?;
        if root.parent_id.is_some() {
            return Err(TreeError::RootHasParent(self.root_id));
        }

        for tn in self.nodes.values() {
            for child_id in &tn.child_ids {
                let child = self.nodes.get(child_id).ok_or(TreeError::DanglingChild {
                    parent: tn.id,
                    child: *child_id,
                })?;
                if child.parent_id != Some(tn.id) {
                    return Err(TreeError::ParentMismatch {
                        child: *child_id,
                        listed: tn.id,
                        actual: child.parent_id,
                    });
                }
            }
        }

        let reachable = self.subtree_ids(self.root_id);
        if reachable.len() != self.nodes.len() {
            if let Some(orphan) = self.nodes.keys().find(|id| !reachable.contains(id)) {
                return Err(TreeError::Unreachable(*orphan));
            }
        }
        Ok(())
    }
}
