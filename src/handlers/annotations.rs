use axum::Json;

use crate::models::lens::AnnotationsRequest;
use crate::promql::annotations::{NodeAnnotations, get_node_annotations};

/// Warnings and suggested rewrites for a node in the context of its parent.
pub async fn node_annotations(Json(req): Json<AnnotationsRequest>) -> Json<NodeAnnotations> {
    Json(get_node_annotations(
        &req.node,
        req.parent.as_ref(),
        req.query_result.as_ref(),
    ))
}
