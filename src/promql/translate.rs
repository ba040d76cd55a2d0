use std::time::{Duration, SystemTime, UNIX_EPOCH};

use promql_parser::label::{MatchOp, Matcher};
use promql_parser::parser::token::{self, TokenType};
use promql_parser::parser::{
    self, AtModifier, BinModifier, Expr, LabelModifier, Offset,
    VectorMatchCardinality as ParserCardinality,
};

use super::ast::{
    Aggregation, AggregationType, BinaryExpr, BinaryOperator, Call, Func, LabelMatcher, MatchType,
    MatrixSelector, Node, NumberLiteral, ParenExpr, StartOrEnd, StringLiteral, Subquery, UnaryExpr,
    UnaryOperator, ValueType, VectorMatchCardinality, VectorMatching, VectorSelector,
};
use super::duration::format_prometheus_float;
use super::functions::function_signature;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("{0}")]
    Syntax(String),
    #[error("unsupported expression: {0}")]
    Unsupported(String),
}

/// Parse PromQL text into an expression tree.
pub fn parse(input: &str) -> Result<Node, ParseError> {
    let expr = parser::parse(input).map_err(ParseError::Syntax)?;
    to_node(&expr)
}

/// Convert a promql-parser expression into our AST.
pub fn to_node(expr: &Expr) -> Result<Node, ParseError> {
    match expr {
        Expr::Aggregate(agg) => {
            let (grouping, without) = extract_label_modifier(&agg.modifier);
            let param = match &agg.param {
                Some(p) => Some(Box::new(to_node(p)?)),
                None => None,
            };
            Ok(Node::Aggregation(Aggregation {
                op: to_agg_op(agg.op)?,
                expr: Box::new(to_node(&agg.expr)?),
                param,
                grouping,
                without,
            }))
        }
        Expr::Unary(unary) => Ok(Node::UnaryExpr(UnaryExpr {
            op: UnaryOperator::Minus,
            expr: Box::new(to_node(&unary.expr)?),
        })),
        Expr::Binary(bin) => {
            let op = to_binary_op(bin.op)?;
            let lhs = to_node(&bin.lhs)?;
            let rhs = to_node(&bin.rhs)?;
            let vector_vector = lhs.value_type() == ValueType::Vector && rhs.value_type() == ValueType::Vector;
            let matching = vector_vector.then(|| to_vector_matching(op, &bin.modifier));
            let return_bool = bin.modifier.as_ref().is_some_and(|m| m.return_bool);
            Ok(Node::BinaryExpr(BinaryExpr {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                matching,
                return_bool,
            }))
        }
        Expr::Paren(paren) => Ok(Node::ParenExpr(ParenExpr {
            expr: Box::new(to_node(&paren.expr)?),
        })),
        Expr::Subquery(sq) => {
            let (timestamp, start_or_end) = to_at(&sq.at);
            Ok(Node::Subquery(Subquery {
                expr: Box::new(to_node(&sq.expr)?),
                range: millis(&sq.range),
                offset: to_offset(&sq.offset),
                step: sq.step.as_ref().map_or(0, millis),
                timestamp,
                start_or_end,
            }))
        }
        Expr::NumberLiteral(num) => Ok(Node::NumberLiteral(NumberLiteral {
            val: format_prometheus_float(num.val),
        })),
        Expr::StringLiteral(s) => Ok(Node::StringLiteral(StringLiteral { val: s.val.clone() })),
        Expr::VectorSelector(vs) => Ok(Node::VectorSelector(to_vector_selector(vs)?)),
        Expr::MatrixSelector(ms) => {
            let vs = to_vector_selector(&ms.vs)?;
            Ok(Node::MatrixSelector(MatrixSelector::from_vector(&vs, millis(&ms.range))))
        }
        Expr::Call(call) => {
            let func = function_signature(call.func.name).unwrap_or_else(|| Func {
                name: call.func.name.to_string(),
                arg_types: call.func.arg_types.iter().map(to_value_type).collect(),
                variadic: 0,
                return_type: to_value_type(&call.func.return_type),
            });
            let args = call
                .args
                .args
                .iter()
                .map(|a| to_node(a))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Node::Call(Call { func, args }))
        }
        Expr::Extension(_) => Err(ParseError::Unsupported("extension expression".to_string())),
    }
}

fn to_vector_selector(vs: &parser::VectorSelector) -> Result<VectorSelector, ParseError> {
    if !vs.matchers.or_matchers.is_empty() {
        return Err(ParseError::Unsupported("\"or\" label matchers".to_string()));
    }
    let name = vs.name.clone().unwrap_or_default();
    let matchers = vs
        .matchers
        .matchers
        .iter()
        // The parser folds the metric name into a __name__ matcher; it is carried by `name`.
        .filter(|m| !(m.name == "__name__" && matches!(m.op, MatchOp::Equal) && m.value == name))
        .map(to_label_matcher)
        .collect();
    let (timestamp, start_or_end) = to_at(&vs.at);
    Ok(VectorSelector {
        name,
        matchers,
        offset: to_offset(&vs.offset),
        timestamp,
        start_or_end,
    })
}

fn to_label_matcher(m: &Matcher) -> LabelMatcher {
    let match_type = match &m.op {
        MatchOp::Equal => MatchType::Equal,
        MatchOp::NotEqual => MatchType::NotEqual,
        MatchOp::Re(_) => MatchType::MatchRegexp,
        MatchOp::NotRe(_) => MatchType::MatchNotRegexp,
    };
    LabelMatcher::new(match_type, m.name.clone(), m.value.clone())
}

fn to_value_type(vt: &parser::value::ValueType) -> ValueType {
    match vt {
        parser::value::ValueType::Vector => ValueType::Vector,
        parser::value::ValueType::Scalar => ValueType::Scalar,
        parser::value::ValueType::Matrix => ValueType::Matrix,
        parser::value::ValueType::String => ValueType::String,
    }
}

fn millis(d: &Duration) -> u64 {
    d.as_millis() as u64
}

fn to_offset(offset: &Option<Offset>) -> i64 {
    match offset {
        Some(Offset::Pos(d)) => d.as_millis() as i64,
        Some(Offset::Neg(d)) => -(d.as_millis() as i64),
        None => 0,
    }
}

fn to_at(at: &Option<AtModifier>) -> (Option<i64>, Option<StartOrEnd>) {
    match at {
        Some(AtModifier::Start) => (None, Some(StartOrEnd::Start)),
        Some(AtModifier::End) => (None, Some(StartOrEnd::End)),
        Some(AtModifier::At(t)) => (Some(unix_millis(t)), None),
        None => (None, None),
    }
}

fn unix_millis(t: &SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

fn to_vector_matching(op: BinaryOperator, modifier: &Option<BinModifier>) -> VectorMatching {
    let mut matching = VectorMatching::for_operator(op);
    let Some(m) = modifier else {
        return matching;
    };

    match &m.matching {
        Some(LabelModifier::Include(labels)) => {
            matching.on = true;
            matching.labels = labels.labels.clone();
        }
        Some(LabelModifier::Exclude(labels)) => {
            matching.on = false;
            matching.labels = labels.labels.clone();
        }
        None => {}
    }
    if !op.is_set_operator() {
        match &m.card {
            ParserCardinality::ManyToOne(include) => {
                matching.card = VectorMatchCardinality::ManyToOne;
                matching.include = include.labels.clone();
            }
            ParserCardinality::OneToMany(include) => {
                matching.card = VectorMatchCardinality::OneToMany;
                matching.include = include.labels.clone();
            }
            ParserCardinality::OneToOne | ParserCardinality::ManyToMany => {}
        }
    }
    matching
}

/// Map a promql-parser aggregation TokenType to our aggregation type.
pub fn to_agg_op(tt: TokenType) -> Result<AggregationType, ParseError> {
    let t = tt.id();
    if t == token::T_SUM { return Ok(AggregationType::Sum); }
    if t == token::T_AVG { return Ok(AggregationType::Avg); }
    if t == token::T_MIN { return Ok(AggregationType::Min); }
    if t == token::T_MAX { return Ok(AggregationType::Max); }
    if t == token::T_COUNT { return Ok(AggregationType::Count); }
    if t == token::T_STDDEV { return Ok(AggregationType::Stddev); }
    if t == token::T_STDVAR { return Ok(AggregationType::Stdvar); }
    if t == token::T_QUANTILE { return Ok(AggregationType::Quantile); }
    if t == token::T_TOPK { return Ok(AggregationType::Topk); }
    if t == token::T_BOTTOMK { return Ok(AggregationType::Bottomk); }
    if t == token::T_GROUP { return Ok(AggregationType::Group); }
    if t == token::T_COUNT_VALUES { return Ok(AggregationType::CountValues); }
    Err(ParseError::Unsupported(format!("aggregation {tt:?}")))
}

/// Map a promql-parser binary operator TokenType to our operator.
pub fn to_binary_op(tt: TokenType) -> Result<BinaryOperator, ParseError> {
    let t = tt.id();
    if t == token::T_ADD { return Ok(BinaryOperator::Add); }
    if t == token::T_SUB { return Ok(BinaryOperator::Sub); }
    if t == token::T_MUL { return Ok(BinaryOperator::Mul); }
    if t == token::T_DIV { return Ok(BinaryOperator::Div); }
    if t == token::T_MOD { return Ok(BinaryOperator::Mod); }
    if t == token::T_POW { return Ok(BinaryOperator::Pow); }
    if t == token::T_EQLC { return Ok(BinaryOperator::Eql); }
    if t == token::T_NEQ { return Ok(BinaryOperator::Neq); }
    if t == token::T_GTR { return Ok(BinaryOperator::Gtr); }
    if t == token::T_LSS { return Ok(BinaryOperator::Lss); }
    if t == token::T_GTE { return Ok(BinaryOperator::Gte); }
    if t == token::T_LTE { return Ok(BinaryOperator::Lte); }
    if t == token::T_LAND { return Ok(BinaryOperator::And); }
    if t == token::T_LOR { return Ok(BinaryOperator::Or); }
    if t == token::T_LUNLESS { return Ok(BinaryOperator::Unless); }
    if t == token::T_ATAN2 { return Ok(BinaryOperator::Atan2); }
    Err(ParseError::Unsupported(format!("binary operator {tt:?}")))
}

/// Extract the label list and whether it's "by" (include) or "without" (exclude)
/// from a promql-parser LabelModifier.
pub fn extract_label_modifier(modifier: &Option<LabelModifier>) -> (Vec<String>, bool) {
    match modifier {
        Some(LabelModifier::Include(labels)) => (labels.labels.clone(), false),
        Some(LabelModifier::Exclude(labels)) => (labels.labels.clone(), true),
        None => (vec![], false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promql::serialize::serialize;

    #[test]
    fn test_parse_rate() {
        let node = parse("rate(http_requests_total{job=\"api\"}[5m])").unwrap();
        let Node::Call(call) = node else { panic!("expected call") };
        assert_eq!(call.func.name, "rate");
        assert_eq!(call.func.return_type, ValueType::Vector);
        let Node::MatrixSelector(ms) = &call.args[0] else { panic!("expected matrix selector") };
        assert_eq!(ms.name, "http_requests_total");
        assert_eq!(ms.range, 300_000);
        assert_eq!(ms.matchers, vec![LabelMatcher::new(MatchType::Equal, "job", "api")]);
    }

    #[test]
    fn test_parse_vector_matching() {
        let Node::BinaryExpr(b) = parse("a / on(instance) group_left(version) b").unwrap() else {
            panic!("expected binary expression");
        };
        assert_eq!(b.op, BinaryOperator::Div);
        assert_eq!(
            b.matching,
            Some(VectorMatching {
                on: true,
                labels: vec!["instance".to_string()],
                card: VectorMatchCardinality::ManyToOne,
                include: vec!["version".to_string()],
            })
        );

        let Node::BinaryExpr(b) = parse("a and b").unwrap() else { panic!() };
        assert_eq!(b.matching.unwrap().card, VectorMatchCardinality::ManyToMany);

        let Node::BinaryExpr(b) = parse("a - b").unwrap() else { panic!() };
        assert_eq!(b.matching, Some(VectorMatching::for_operator(BinaryOperator::Sub)));
    }

    #[test]
    fn test_scalar_operands_have_no_matching() {
        let Node::BinaryExpr(b) = parse("5 > bool 3").unwrap() else { panic!() };
        assert!(b.return_bool);
        assert!(b.matching.is_none());

        let Node::BinaryExpr(b) = parse("up * 2").unwrap() else { panic!() };
        assert!(b.matching.is_none());
    }

    #[test]
    fn test_parse_aggregations() {
        let Node::Aggregation(agg) = parse("sum by(job, instance) (x)").unwrap() else { panic!() };
        assert_eq!(agg.op, AggregationType::Sum);
        assert_eq!(agg.grouping, vec!["job".to_string(), "instance".to_string()]);
        assert!(!agg.without);
        assert!(agg.param.is_none());

        let Node::Aggregation(agg) = parse("topk without(a) (5, x)").unwrap() else { panic!() };
        assert_eq!(agg.op, AggregationType::Topk);
        assert!(agg.without);
        assert_eq!(agg.param.as_deref(), Some(&Node::number("5")));
    }

    #[test]
    fn test_parse_modifiers() {
        let Node::VectorSelector(vs) = parse("up offset 1h").unwrap() else { panic!() };
        assert_eq!(vs.offset, 3_600_000);

        let Node::VectorSelector(vs) = parse("up @ 1609746000").unwrap() else { panic!() };
        assert_eq!(vs.timestamp, Some(1_609_746_000_000));

        let Node::VectorSelector(vs) = parse("up @ start()").unwrap() else { panic!() };
        assert_eq!(vs.start_or_end, Some(StartOrEnd::Start));

        let Node::Subquery(sq) = parse("rate(x[5m])[30m:1m]").unwrap() else { panic!() };
        assert_eq!(sq.range, 1_800_000);
        assert_eq!(sq.step, 60_000);
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(parse("sum(rate(x[5m])"), Err(ParseError::Syntax(_))));
        assert!(matches!(parse("foo{"), Err(ParseError::Syntax(_))));
    }

    #[test]
    fn test_serialize_round_trip() {
        let corpus = [
            "up",
            r#"http_requests_total{job="api",status=~"5.."}"#,
            "rate(http_requests_total[5m])",
            "sum by(job, instance) (rate(x[5m]))",
            "histogram_quantile(0.9, sum by(le) (rate(x_bucket[5m])))",
            "topk(5, x)",
            r#"count_values("value", x)"#,
            "sum without(a) (x)",
            "a / on(instance) group_left(version) b",
            "a * ignoring(mode) b",
            "a > bool b",
            "a and on(job) b",
            "-x",
            "(a + b) * c",
            "x offset 1h",
            "x @ 1609746000",
            "rate(x[5m])[30m:1m]",
            "time()",
            r#"label_replace(up, "a", "$1", "b", "(.*)")"#,
        ];
        for expr in corpus {
            let ast = parse(expr).unwrap();
            let text = serialize(&ast);
            let reparsed = parse(&text).unwrap_or_else(|e| panic!("{expr:?} -> {text:?}: {e}"));
            assert_eq!(reparsed, ast, "round trip of {expr:?} via {text:?}");
        }
    }

    #[test]
    fn test_canonical_text() {
        assert_eq!(
            serialize(&parse("sum  by (le)(rate( x_bucket [5m] ))").unwrap()),
            "sum by(le) (rate(x_bucket[5m]))"
        );
        assert_eq!(serialize(&parse("a/on(instance)b").unwrap()), "a / on(instance) b");
    }
}
