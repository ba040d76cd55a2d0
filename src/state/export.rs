use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::reducer::{AppState, NodeVisualizerState, ServerSettings};
use crate::promql::ast::{AstError, Node};

/// Version written by `export_state`.
pub const EXPORT_VERSION: u64 = 3;

// ═══════════════════════════════════════════════════════════════════
// Link-sharing format
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedQuery {
    pub expr: String,
    pub expr_stale: bool,
    pub ast: Node,
}

/// Selected node as a position in the query's display order, since node IDs
/// are not stable across sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedNodeIdx {
    #[serde(rename = "queryID")]
    pub query_id: usize,
    #[serde(rename = "nodeIdx")]
    pub node_idx: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedState {
    pub version: u64,
    pub server_settings: ServerSettings,
    pub queries: Vec<ExportedQuery>,
    pub selected_node_idx: Option<SelectedNodeIdx>,
    pub node_visualizer: NodeVisualizerState,
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("invalid exported state: {0}")]
    Json(#[from] serde_json::Error),
    #[error("exported state has no version")]
    MissingVersion,
    #[error("unsupported exported state version {0}")]
    UnsupportedVersion(u64),
    #[error("version 1 state has no serverURL")]
    MissingServerUrl,
    #[error("selected node {node_idx} in query {query_id} does not exist")]
    InvalidSelection { query_id: usize, node_idx: usize },
    #[error("query {query_id} has an invalid expression tree: {source}")]
    InvalidAst {
        query_id: usize,
        #[source]
        source: AstError,
    },
}

// ═══════════════════════════════════════════════════════════════════
// Export / import
// ═══════════════════════════════════════════════════════════════════

pub fn export_state(state: &AppState) -> ExportedState {
    let selected_node_idx = state.selected_node_id.and_then(|sel| {
        let query = state.queries.get(sel.query_id)?;
        let node_idx = query
            .tree
            .ordered_node_ids()
            .iter()
            .position(|id| *id == sel.node_id)?;
        Some(SelectedNodeIdx {
            query_id: sel.query_id,
            node_idx,
        })
    });

    ExportedState {
        version: EXPORT_VERSION,
        server_settings: state.server_settings.clone(),
        queries: state
            .queries
            .iter()
            .map(|q| ExportedQuery {
                expr: q.expr.clone(),
                expr_stale: q.expr_stale,
                ast: q.tree.to_ast(),
            })
            .collect(),
        selected_node_idx,
        node_visualizer: state.node_visualizer.clone(),
    }
}

/// Parse a shared state document of any supported version (1, 2 or 3) and
/// migrate it to the current shape. Apply the result with
/// `Action::ImportState`.
pub fn import_state(json: &str) -> Result<ExportedState, ImportError> {
    let mut doc: Value = serde_json::from_str(json)?;
    let version = doc
        .get("version")
        .and_then(Value::as_u64)
        .ok_or(ImportError::MissingVersion)?;
    if !(1..=EXPORT_VERSION).contains(&version) {
        return Err(ImportError::UnsupportedVersion(version));
    }

    if version == 1 {
        let url = doc
            .get("serverURL")
            .and_then(Value::as_str)
            .ok_or(ImportError::MissingServerUrl)?
            .to_string();
        let settings = ServerSettings {
            url,
            ..ServerSettings::default()
        };
        doc["serverSettings"] = serde_json::to_value(settings)?;
    }

    // Before version 3 selectors and subqueries had no @ modifier fields.
    if version < 3 {
        if let Some(queries) = doc.get_mut("queries").and_then(Value::as_array_mut) {
            for query in queries {
                if let Some(ast) = query.get_mut("ast") {
                    set_at_modifier_defaults(ast);
                }
            }
        }
    }

    let exported: ExportedState = serde_json::from_value(doc)?;
    for (query_id, query) in exported.queries.iter().enumerate() {
        query
            .ast
            .validate()
            .map_err(|source| ImportError::InvalidAst { query_id, source })?;
    }
    if let Some(sel) = exported.selected_node_idx {
        let node_count = exported.queries.get(sel.query_id).map(|q| count_nodes(&q.ast));
        if node_count.is_none_or(|count| sel.node_idx >= count) {
            return Err(ImportError::InvalidSelection {
                query_id: sel.query_id,
                node_idx: sel.node_idx,
            });
        }
    }
    tracing::debug!(version, queries = exported.queries.len(), "parsed exported state");
    Ok(exported)
}

fn set_at_modifier_defaults(value: &mut Value) {
    match value {
        Value::Object(obj) => {
            let is_target = matches!(
                obj.get("type").and_then(Value::as_str),
                Some("vectorSelector" | "matrixSelector" | "subquery")
            );
            if is_target {
                obj.insert("timestamp".to_string(), Value::Null);
                obj.insert("startOrEnd".to_string(), Value::Null);
            }
            for child in obj.values_mut() {
                set_at_modifier_defaults(child);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(set_at_modifier_defaults),
        _ => {}
    }
}

fn count_nodes(node: &Node) -> usize {
    1 + node.children().into_iter().map(count_nodes).sum::<usize>()
}
