use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

use super::export::ExportedState;
use super::tree::{EditMode, IdAllocator, NodeId, NodeQueryState, Tree, denormalize, fingerprint, normalize};
use crate::promql::ast::{Node, Placeholder};

/// Depth of the undo history.
pub const MAX_UNDO_ITEMS: usize = 20;

pub const DEFAULT_SERVER_URL: &str = "https://demo.promlabs.com";

// ═══════════════════════════════════════════════════════════════════
// State
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerAccess {
    #[default]
    Direct,
    Proxy,
}

/// Which Prometheus server to query. `Proxy` goes through a Grafana
/// datasource proxy identified by `datasource_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSettings {
    pub url: String,
    pub access: ServerAccess,
    #[serde(rename = "datasourceID")]
    pub datasource_id: Option<u64>,
    pub with_credentials: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_SERVER_URL.to_string(),
            access: ServerAccess::Direct,
            datasource_id: None,
            with_credentials: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualizerTab {
    #[default]
    Table,
    Graph,
    Explain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeVisualizerState {
    pub active_tab: VisualizerTab,
    pub end_time: Option<i64>,
    /// Graph range in milliseconds.
    pub range: u64,
    pub resolution: Option<u64>,
    pub stacked: bool,
}

impl Default for NodeVisualizerState {
    fn default() -> Self {
        Self {
            active_tab: VisualizerTab::Table,
            end_time: None,
            range: 3_600_000,
            resolution: None,
            stacked: false,
        }
    }
}

/// A node in one of the query panes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlobalNodeId {
    #[serde(rename = "queryID")]
    pub query_id: usize,
    #[serde(rename = "nodeID")]
    pub node_id: NodeId,
}

impl GlobalNodeId {
    pub fn new(query_id: usize, node_id: NodeId) -> Self {
        Self { query_id, node_id }
    }
}

/// One query pane. Trees are shared with undo snapshots and copied on write.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub expr: String,
    pub expr_stale: bool,
    pub show_metrics_explorer: bool,
    pub tree: Arc<Tree>,
}

impl Query {
    /// An empty pane holding a single placeholder.
    pub fn new(ids: &mut IdAllocator) -> Self {
        Self::with_expr(String::new(), ids)
    }

    fn with_expr(expr: String, ids: &mut IdAllocator) -> Self {
        Self {
            expr,
            expr_stale: false,
            show_metrics_explorer: false,
            tree: Arc::new(Tree::placeholder(ids)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryHistory {
    pub past: VecDeque<Vec<Query>>,
    pub future: VecDeque<Vec<Query>>,
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub server_settings: ServerSettings,
    pub queries: Vec<Query>,
    pub query_history: QueryHistory,
    pub selected_node_id: Option<GlobalNodeId>,
    /// Clipboard, shared by all panes.
    pub copied_node: Option<Node>,
    pub node_visualizer: NodeVisualizerState,
    ids: IdAllocator,
}

// ═══════════════════════════════════════════════════════════════════
// Actions
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    ImportState(ExportedState),
    SetServerSettings(ServerSettings),
    SetExpr {
        query_id: usize,
        expr: String,
    },
    SetShowMetricsExplorer {
        query_id: usize,
        show: bool,
    },
    SetTree {
        query_id: usize,
        ast: Node,
    },
    /// Store a query result. Ignored unless `fingerprint` still matches the
    /// node's current content.
    SetNodeQueryState {
        id: GlobalNodeId,
        fingerprint: String,
        state: NodeQueryState,
    },
    SetEditMode {
        id: GlobalNodeId,
        edit_mode: EditMode,
    },
    SelectNode(GlobalNodeId),
    DeselectNode,
    SelectRoot,
    SelectNextNode,
    SelectPreviousNode,
    SelectNextQuery,
    SelectPreviousQuery,
    UpdateNode {
        id: GlobalNodeId,
        ast: Node,
    },
    DeleteNode(GlobalNodeId),
    CopyNode(GlobalNodeId),
    CutNode(GlobalNodeId),
    PasteNode(GlobalNodeId),
    MoveNode {
        source: GlobalNodeId,
        target: GlobalNodeId,
    },
    InsertParent(GlobalNodeId),
    Undo,
    Redo,
    AddQuery,
    InsertQuery {
        index: usize,
        expr: String,
    },
    DeleteQuery(usize),
    SetNodeVisualizerState(NodeVisualizerState),
}

impl Action {
    /// Whether the action snapshots the queries into the undo history.
    pub fn is_recorded(&self) -> bool {
        matches!(
            self,
            Action::SetTree { .. }
                | Action::SetExpr { .. }
                | Action::SetEditMode { .. }
                | Action::UpdateNode { .. }
                | Action::DeleteNode(_)
                | Action::CutNode(_)
                | Action::PasteNode(_)
                | Action::MoveNode { .. }
                | Action::InsertParent(_)
                | Action::AddQuery
                | Action::InsertQuery { .. }
                | Action::DeleteQuery(_)
        )
    }
}

// ═══════════════════════════════════════════════════════════════════
// Reducer
// ═══════════════════════════════════════════════════════════════════

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    /// One empty query pane with its placeholder root selected.
    pub fn new() -> Self {
        let mut ids = IdAllocator::new();
        let query = Query::new(&mut ids);
        let selected = GlobalNodeId::new(0, query.tree.root_id);
        Self {
            server_settings: ServerSettings::default(),
            queries: vec![query],
            query_history: QueryHistory::default(),
            selected_node_id: Some(selected),
            copied_node: None,
            node_visualizer: NodeVisualizerState::default(),
            ids,
        }
    }

    /// Apply `action` and return the resulting state.
    pub fn reduce(mut self, action: Action) -> Self {
        self.dispatch(action);
        self
    }

    /// Apply `action` in place. Actions that refer to queries or nodes that
    /// do not exist leave the state untouched.
    pub fn dispatch(&mut self, action: Action) {
        if !action.is_recorded() {
            self.apply(action);
            return;
        }

        let before = self.queries.clone();
        self.apply(action);
        if same_queries(&before, &self.queries) {
            return;
        }

        let history = &mut self.query_history;
        history.past.push_back(before);
        while history.past.len() > MAX_UNDO_ITEMS {
            history.past.pop_front();
        }
        history.future.clear();
    }

    fn apply(&mut self, action: Action) {
        match action {
            Action::ImportState(exported) => self.import(exported),
            Action::SetServerSettings(settings) => self.server_settings = settings,
            Action::SetExpr { query_id, expr } => {
                if let Some(query) = self.queries.get_mut(query_id) {
                    query.expr = expr;
                    query.expr_stale = false;
                }
            }
            Action::SetShowMetricsExplorer { query_id, show } => {
                if let Some(query) = self.queries.get_mut(query_id) {
                    query.show_metrics_explorer = show;
                }
            }
            Action::SetTree { query_id, ast } => {
                if let Err(e) = ast.validate() {
                    tracing::warn!(query_id, "rejecting malformed query tree: {e}");
                    return;
                }
                if let Some(query) = self.queries.get_mut(query_id) {
                    let tree = normalize(&ast, &mut self.ids);
                    self.selected_node_id = Some(GlobalNodeId::new(query_id, tree.root_id));
                    query.tree = Arc::new(tree);
                    query.expr_stale = false;
                }
            }
            Action::SetNodeQueryState {
                id,
                fingerprint: expected,
                state,
            } => self.set_node_query_state(id, &expected, state),
            Action::SetEditMode { id, edit_mode } => {
                if let Some(query) = self.queries.get_mut(id.query_id) {
                    let changed = query
                        .tree
                        .get(id.node_id)
                        .is_some_and(|node| node.edit_mode != edit_mode);
                    if changed {
                        if let Some(node) = Arc::make_mut(&mut query.tree).get_mut(id.node_id) {
                            node.edit_mode = edit_mode;
                        }
                    }
                }
            }
            Action::SelectNode(id) => {
                if self.node_exists(id) {
                    self.selected_node_id = Some(id);
                }
            }
            Action::DeselectNode => self.selected_node_id = None,
            Action::SelectRoot => self.select_root(),
            Action::SelectNextNode => self.step_node(true),
            Action::SelectPreviousNode => self.step_node(false),
            Action::SelectNextQuery => self.step_query(true),
            Action::SelectPreviousQuery => self.step_query(false),
            Action::UpdateNode { id, ast } => {
                self.replace_node(id, &ast);
            }
            Action::DeleteNode(id) => self.delete_node(id),
            Action::CopyNode(id) => {
                if let Some(ast) = self.denormalize_node(id) {
                    self.copied_node = Some(ast);
                }
            }
            Action::CutNode(id) => {
                if let Some(ast) = self.denormalize_node(id) {
                    self.copied_node = Some(ast);
                    self.delete_node(id);
                }
            }
            Action::PasteNode(id) => {
                if let Some(ast) = self.copied_node.clone() {
                    self.replace_node(id, &ast);
                }
            }
            Action::MoveNode { source, target } => self.move_node(source, target),
            Action::InsertParent(id) => {
                if let Some(ast) = self.denormalize_node(id) {
                    let wrapped = Node::Placeholder(Placeholder { children: vec![ast] });
                    self.replace_node(id, &wrapped);
                }
            }
            Action::Undo => self.undo(),
            Action::Redo => self.redo(),
            Action::AddQuery => {
                let query = Query::new(&mut self.ids);
                self.selected_node_id = Some(GlobalNodeId::new(self.queries.len(), query.tree.root_id));
                self.queries.push(query);
            }
            Action::InsertQuery { index, expr } => {
                let index = index.min(self.queries.len());
                let query = Query::with_expr(expr, &mut self.ids);
                self.queries.insert(index, query);
                self.selected_node_id = None;
            }
            Action::DeleteQuery(query_id) => self.delete_query(query_id),
            Action::SetNodeVisualizerState(state) => self.node_visualizer = state,
        }
    }

    // ── lookups ──

    pub fn query(&self, query_id: usize) -> Option<&Query> {
        self.queries.get(query_id)
    }

    pub fn node_exists(&self, id: GlobalNodeId) -> bool {
        self.queries
            .get(id.query_id)
            .is_some_and(|q| q.tree.contains(id.node_id))
    }

    /// Full AST of the subtree at `id`.
    pub fn denormalize_node(&self, id: GlobalNodeId) -> Option<Node> {
        let query = self.queries.get(id.query_id)?;
        query
            .tree
            .contains(id.node_id)
            .then(|| denormalize(&query.tree, id.node_id))
    }

    /// Content fingerprint of the node at `id`, to be echoed back in
    /// `Action::SetNodeQueryState` once its query completes.
    pub fn node_fingerprint(&self, id: GlobalNodeId) -> Option<String> {
        let query = self.queries.get(id.query_id)?;
        query
            .tree
            .contains(id.node_id)
            .then(|| fingerprint(&query.tree, id.node_id))
    }

    // ── edits ──

    /// Replace the subtree at `id`, keeping `id` itself valid. Marks the
    /// query's expression stale and drops a selection that no longer exists.
    fn replace_node(&mut self, id: GlobalNodeId, ast: &Node) -> bool {
        let Some(query) = self.queries.get_mut(id.query_id) else {
            return false;
        };
        if !query.tree.contains(id.node_id) {
            return false;
        }
        if let Err(e) = ast.validate() {
            tracing::warn!(?id, "rejecting malformed replacement tree: {e}");
            return false;
        }

        let tree = Arc::make_mut(&mut query.tree);
        tree.replace_subtree(id.node_id, ast, &mut self.ids);
        query.expr_stale = true;

        if let Some(selected) = self.selected_node_id {
            if selected.query_id == id.query_id && !tree.contains(selected.node_id) {
                self.selected_node_id = None;
            }
        }
        true
    }

    fn delete_node(&mut self, id: GlobalNodeId) {
        let is_root = self
            .queries
            .get(id.query_id)
            .is_some_and(|q| q.tree.root_id == id.node_id);
        if id.query_id > 0 && is_root {
            self.delete_query(id.query_id);
            return;
        }
        self.replace_node(id, &Node::placeholder());
    }

    fn move_node(&mut self, source: GlobalNodeId, target: GlobalNodeId) {
        if source == target {
            return;
        }
        if source.query_id == target.query_id {
            let into_own_subtree = self
                .queries
                .get(source.query_id)
                .is_some_and(|q| q.tree.is_ancestor_or_self(source.node_id, target.node_id));
            if into_own_subtree {
                tracing::debug!(?source, ?target, "refusing to move node into its own subtree");
                return;
            }
        }

        let Some(ast) = self.denormalize_node(source) else {
            return;
        };
        if !self.replace_node(target, &ast) {
            return;
        }
        // Gone if the target was one of its ancestors.
        if self.node_exists(source) {
            self.replace_node(source, &Node::placeholder());
        }
    }

    fn set_node_query_state(&mut self, id: GlobalNodeId, expected: &str, state: NodeQueryState) {
        let Some(current) = self.node_fingerprint(id) else {
            tracing::debug!(?id, "query result for a node that no longer exists");
            return;
        };
        if current != expected {
            tracing::warn!(?id, "discarding query result for changed node content");
            return;
        }
        if let Some(query) = self.queries.get_mut(id.query_id) {
            if let Some(node) = Arc::make_mut(&mut query.tree).get_mut(id.node_id) {
                node.query_state = state;
            }
        }
    }

    fn delete_query(&mut self, query_id: usize) {
        if query_id >= self.queries.len() {
            return;
        }
        if self.queries.len() == 1 {
            self.queries = vec![Query::new(&mut self.ids)];
            self.selected_node_id = None;
            return;
        }

        self.selected_node_id = match self.selected_node_id {
            Some(sel) if sel.query_id == query_id => None,
            Some(sel) if sel.query_id > query_id => Some(GlobalNodeId::new(sel.query_id - 1, sel.node_id)),
            other => other,
        };
        self.queries.remove(query_id);
    }

    fn import(&mut self, exported: ExportedState) {
        let mut queries: Vec<Query> = exported
            .queries
            .iter()
            .map(|q| Query {
                expr: q.expr.clone(),
                expr_stale: q.expr_stale,
                show_metrics_explorer: false,
                tree: Arc::new(normalize(&q.ast, &mut self.ids)),
            })
            .collect();
        if queries.is_empty() {
            queries.push(Query::new(&mut self.ids));
        }

        self.selected_node_id = exported.selected_node_idx.and_then(|idx| {
            let query = queries.get(idx.query_id)?;
            let node_id = *query.tree.ordered_node_ids().get(idx.node_idx)?;
            Some(GlobalNodeId::new(idx.query_id, node_id))
        });
        self.server_settings = exported.server_settings;
        self.node_visualizer = exported.node_visualizer;
        self.queries = queries;
        self.query_history = QueryHistory::default();
        self.copied_node = None;
        tracing::debug!(queries = self.queries.len(), "imported state");
    }

    // ── history ──

    fn undo(&mut self) {
        let Some(previous) = self.query_history.past.pop_back() else {
            return;
        };
        let current = std::mem::replace(&mut self.queries, previous);
        self.query_history.future.push_front(current);
        self.selected_node_id = None;
    }

    fn redo(&mut self) {
        let Some(next) = self.query_history.future.pop_front() else {
            return;
        };
        let current = std::mem::replace(&mut self.queries, next);
        self.query_history.past.push_back(current);
        self.selected_node_id = None;
    }

    // ── keyboard navigation ──

    fn select_first_root(&mut self) {
        if let Some(query) = self.queries.first() {
            self.selected_node_id = Some(GlobalNodeId::new(0, query.tree.root_id));
        }
    }

    fn select_root(&mut self) {
        let Some(selected) = self.selected_node_id else {
            self.select_first_root();
            return;
        };
        if let Some(query) = self.queries.get(selected.query_id) {
            self.selected_node_id = if selected.node_id == query.tree.root_id {
                None
            } else {
                Some(GlobalNodeId::new(selected.query_id, query.tree.root_id))
            };
        }
    }

    fn step_node(&mut self, forward: bool) {
        let Some(selected) = self.selected_node_id else {
            self.select_first_root();
            return;
        };
        let Some(query) = self.queries.get(selected.query_id) else {
            return;
        };
        let ordered = query.tree.ordered_node_ids();
        let Some(pos) = ordered.iter().position(|id| *id == selected.node_id) else {
            return;
        };
        let len = ordered.len();
        let next = if forward { (pos + 1) % len } else { (pos + len - 1) % len };
        self.selected_node_id = Some(GlobalNodeId::new(selected.query_id, ordered[next]));
    }

    fn step_query(&mut self, forward: bool) {
        let Some(selected) = self.selected_node_id else {
            self.select_first_root();
            return;
        };
        let len = self.queries.len();
        let query_id = if forward {
            (selected.query_id + 1) % len
        } else {
            (selected.query_id + len - 1) % len
        };
        if let Some(query) = self.queries.get(query_id) {
            self.selected_node_id = Some(GlobalNodeId::new(query_id, query.tree.root_id));
        }
    }
}

/// Cheap check for whether an action touched the queries. Edited trees are
/// always reallocated by `Arc::make_mut` while a snapshot shares them.
fn same_queries(a: &[Query], b: &[Query]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            Arc::ptr_eq(&x.tree, &y.tree)
                && x.expr == y.expr
                && x.expr_stale == y.expr_stale
                && x.show_metrics_explorer == y.show_metrics_explorer
        })
}
