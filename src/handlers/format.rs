use axum::{Json, http::StatusCode};

use crate::models::lens::{FormatRequest, FormatResponse};
use crate::promql::serialize::{is_submittable, serialize, serialize_pretty};
use crate::promql::translate::parse;

/// Canonical (or pretty) PromQL text for an expression or JSON AST.
pub async fn format_expr(
    Json(req): Json<FormatRequest>,
) -> Result<Json<FormatResponse>, (StatusCode, String)> {
    let node = match (req.ast, req.expr) {
        (Some(ast), _) => ast,
        (None, Some(expr)) => parse(&expr).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?,
        (None, None) => {
            return Err((StatusCode::BAD_REQUEST, "either expr or ast is required".to_string()));
        }
    };

    let expr = if req.pretty { serialize_pretty(&node) } else { serialize(&node) };
    Ok(Json(FormatResponse {
        expr,
        submittable: is_submittable(&node),
    }))
}
