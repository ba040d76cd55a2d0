use axum::{
    Json,
    extract::State,
    http::StatusCode,
};
use tokio_util::sync::CancellationToken;

use crate::ServerState;
use crate::explain::{BinaryExplanation, ExplainError, explain_binary_expr};
use crate::models::lens::ExplainRequest;
use crate::promql::binary::BinOpLimits;
use crate::promql::translate::parse;

/// Evaluate a binary expression step by step against the configured
/// Prometheus server.
pub async fn explain_binary(
    State(state): State<ServerState>,
    Json(req): Json<ExplainRequest>,
) -> Result<Json<BinaryExplanation>, (StatusCode, String)> {
    let node = parse(&req.expr).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let limits = if req.show_all {
        BinOpLimits::unlimited()
    } else {
        state.config.bin_op_limits()
    };
    let time = req
        .time
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis() as f64 / 1000.0);

    // Both operand queries are cancelled if the client goes away.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    explain_binary_expr(&*state.prom, &node, Some(time), &cancel, &limits)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::warn!("explain failed for {:?}: {e}", req.expr);
            (error_status(&e), e.to_string())
        })
}

fn error_status(err: &ExplainError) -> StatusCode {
    match err {
        ExplainError::Incomplete | ExplainError::NotBinary | ExplainError::MissingMatching => {
            StatusCode::BAD_REQUEST
        }
        ExplainError::Api(e) if e.is_aborted() => StatusCode::SERVICE_UNAVAILABLE,
        ExplainError::Api(_) | ExplainError::UnexpectedResult { .. } => StatusCode::BAD_GATEWAY,
    }
}
