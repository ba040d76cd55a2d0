use serde::{Deserialize, Serialize};

use crate::promql::ast::Node;
use crate::promql::types::NodeQueryResult;
use crate::state::reducer::ServerSettings;

/// `expr` query-string or form parameter of `/api/parse`.
#[derive(Debug, Deserialize)]
pub struct ParseParams {
    #[serde(default)]
    pub expr: String,
}

/// Error body of `/api/parse`, matching what the UI expects.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ParseErrorBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

impl ParseErrorBody {
    pub fn new(err: impl std::fmt::Display) -> Self {
        Self {
            kind: "error".to_string(),
            message: format!("Expression incomplete or buggy: {err}"),
        }
    }
}

/// Format either PromQL text or a JSON AST. `ast` wins if both are given.
#[derive(Debug, Deserialize)]
pub struct FormatRequest {
    pub expr: Option<String>,
    pub ast: Option<Node>,
    #[serde(default)]
    pub pretty: bool,
}

#[derive(Debug, Serialize)]
pub struct FormatResponse {
    pub expr: String,
    /// False while the expression still contains placeholders.
    pub submittable: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationsRequest {
    pub node: Node,
    pub parent: Option<Node>,
    pub query_result: Option<NodeQueryResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainRequest {
    pub expr: String,
    /// Evaluation time in Unix seconds, defaults to now on the server.
    pub time: Option<f64>,
    /// Return every match group instead of the configured maximum.
    #[serde(default)]
    pub show_all: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageConfig {
    pub now: i64,
    #[serde(rename = "defaultPrometheusURL")]
    pub default_prometheus_url: String,
    pub server_settings: ServerSettings,
}
