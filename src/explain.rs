use serde::Serialize;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::promapi::{ApiError, InstantQuerier};
use crate::promql::ast::{BinaryExpr, Node, ValueType};
use crate::promql::binary::{
    BinOpLimits, BinOpResult, VectorScalarRow, compute_vector_scalar_bin_op,
    compute_vector_vector_bin_op, scalar_bin_op,
};
use crate::promql::serialize::{is_submittable, serialize};
use crate::promql::types::{InstantSample, QueryResult, summarize_result};
use crate::state::tree::NodeQueryState;

#[derive(Debug, thiserror::Error)]
pub enum ExplainError {
    #[error("expression contains unfinished nodes")]
    Incomplete,
    #[error("not a binary expression")]
    NotBinary,
    #[error("vector-to-vector operation without vector matching")]
    MissingMatching,
    #[error("{side} operand returned a {got:?} result, expected {expected:?}")]
    UnexpectedResult {
        side: &'static str,
        expected: ValueType,
        got: ValueType,
    },
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Operand values and the per-element results of a binary expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BinaryExplanation {
    #[serde(rename_all = "camelCase")]
    ScalarScalar { lhs: f64, rhs: f64, result: f64 },
    #[serde(rename_all = "camelCase")]
    VectorScalar {
        scalar: f64,
        scalar_left: bool,
        rows: Vec<VectorScalarRow>,
    },
    VectorVector(BinOpResult),
}

// ═══════════════════════════════════════════════════════════════════
// Binary expression explanation
// ═══════════════════════════════════════════════════════════════════

/// Query both operands of a binary expression concurrently and evaluate the
/// operator over the results. Both queries must succeed; a cancelled query
/// fails the whole explanation with `ApiError::Aborted`.
pub async fn explain_binary_expr(
    querier: &dyn InstantQuerier,
    node: &Node,
    time: Option<f64>,
    cancel: &CancellationToken,
    limits: &BinOpLimits,
) -> Result<BinaryExplanation, ExplainError> {
    let Node::BinaryExpr(b) = strip_parens(node) else {
        return Err(ExplainError::NotBinary);
    };
    if !is_submittable(node) {
        return Err(ExplainError::Incomplete);
    }

    let lhs_expr = serialize(&b.lhs);
    let rhs_expr = serialize(&b.rhs);
    let (lhs, rhs) = tokio::try_join!(
        querier.instant_query(&lhs_expr, time, cancel),
        querier.instant_query(&rhs_expr, time, cancel),
    )?;

    let explanation = match (lhs, rhs) {
        (QueryResult::Scalar(l), QueryResult::Scalar(r)) => {
            let (lhs, rhs) = (l.value(), r.value());
            BinaryExplanation::ScalarScalar {
                lhs,
                rhs,
                result: scalar_bin_op(b.op, lhs, rhs),
            }
        }
        (QueryResult::Vector(vector), QueryResult::Scalar(s)) => vector_scalar(b, &vector, s.value(), false),
        (QueryResult::Scalar(s), QueryResult::Vector(vector)) => vector_scalar(b, &vector, s.value(), true),
        (QueryResult::Vector(l), QueryResult::Vector(r)) => {
            let matching = b.matching.as_ref().ok_or(ExplainError::MissingMatching)?;
            let result = compute_vector_vector_bin_op(b.op, matching, b.return_bool, &l, &r, limits);
            tracing::debug!(
                groups = result.num_groups,
                errors = result.has_errors(),
                "explained vector-to-vector operation"
            );
            BinaryExplanation::VectorVector(result)
        }
        (l, r) => {
            let (side, got) = if matches!(l, QueryResult::Vector(_) | QueryResult::Scalar(_)) {
                ("right", r.value_type())
            } else {
                ("left", l.value_type())
            };
            return Err(ExplainError::UnexpectedResult {
                side,
                expected: ValueType::Vector,
                got,
            });
        }
    };
    Ok(explanation)
}

fn vector_scalar(b: &BinaryExpr, vector: &[InstantSample], scalar: f64, scalar_left: bool) -> BinaryExplanation {
    BinaryExplanation::VectorScalar {
        scalar,
        scalar_left,
        rows: compute_vector_scalar_bin_op(b.op, b.return_bool, vector, scalar, scalar_left),
    }
}

fn strip_parens(node: &Node) -> &Node {
    match node {
        Node::ParenExpr(p) => strip_parens(&p.expr),
        other => other,
    }
}

// ═══════════════════════════════════════════════════════════════════
// Per-node queries
// ═══════════════════════════════════════════════════════════════════

/// Run the instant query for a tree node and summarize the result.
///
/// Returns `None` if the query was aborted, in which case nothing should be
/// recorded for the node.
pub async fn query_node_state(
    querier: &dyn InstantQuerier,
    node: &Node,
    time: Option<f64>,
    cancel: &CancellationToken,
) -> Option<NodeQueryState> {
    if !is_submittable(node) {
        return Some(NodeQueryState::NodeIncomplete);
    }

    let expr = serialize(node);
    let started = Instant::now();
    match querier.instant_query(&expr, time, cancel).await {
        Ok(result) => {
            let query_time = started.elapsed().as_millis() as u64;
            Some(NodeQueryState::Success(summarize_result(&result, query_time)))
        }
        Err(e) if e.is_aborted() => {
            tracing::debug!("query for {expr} aborted");
            None
        }
        Err(e) => {
            tracing::warn!("query for {expr} failed: {e}");
            Some(NodeQueryState::Error { message: e.to_string() })
        }
    }
}
