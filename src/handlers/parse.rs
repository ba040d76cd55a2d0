use axum::{
    Form, Json,
    extract::Query,
    http::StatusCode,
};

use crate::models::lens::{ParseErrorBody, ParseParams};
use crate::promql::ast::Node;
use crate::promql::translate::parse;

type ParseResult = Result<Json<Node>, (StatusCode, Json<ParseErrorBody>)>;

/// Parse `?expr=` into the JSON AST.
pub async fn parse_query(Query(params): Query<ParseParams>) -> ParseResult {
    parse_expr(&params.expr)
}

/// Parse a form-encoded `expr` into the JSON AST.
pub async fn parse_form(Form(params): Form<ParseParams>) -> ParseResult {
    parse_expr(&params.expr)
}

fn parse_expr(expr: &str) -> ParseResult {
    parse(expr).map(Json).map_err(|e| {
        tracing::debug!("rejecting expression {expr:?}: {e}");
        (StatusCode::BAD_REQUEST, Json(ParseErrorBody::new(e)))
    })
}
