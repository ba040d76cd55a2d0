use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════
// Enumerations
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    None,
    Vector,
    Scalar,
    Matrix,
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationType {
    Sum,
    Min,
    Max,
    Avg,
    Group,
    Stddev,
    Stdvar,
    Count,
    CountValues,
    Bottomk,
    Topk,
    Quantile,
}

impl AggregationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationType::Sum => "sum",
            AggregationType::Min => "min",
            AggregationType::Max => "max",
            AggregationType::Avg => "avg",
            AggregationType::Group => "group",
            AggregationType::Stddev => "stddev",
            AggregationType::Stdvar => "stdvar",
            AggregationType::Count => "count",
            AggregationType::CountValues => "count_values",
            AggregationType::Bottomk => "bottomk",
            AggregationType::Topk => "topk",
            AggregationType::Quantile => "quantile",
        }
    }

    /// Whether the aggregator takes a leading parameter (`topk(5, ...)`).
    pub fn has_param(&self) -> bool {
        matches!(
            self,
            AggregationType::Topk
                | AggregationType::Bottomk
                | AggregationType::Quantile
                | AggregationType::CountValues
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOperator {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
    #[serde(rename = "%")]
    Mod,
    #[serde(rename = "^")]
    Pow,
    #[serde(rename = "==")]
    Eql,
    #[serde(rename = "!=")]
    Neq,
    #[serde(rename = ">")]
    Gtr,
    #[serde(rename = "<")]
    Lss,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "and")]
    And,
    #[serde(rename = "or")]
    Or,
    #[serde(rename = "unless")]
    Unless,
    #[serde(rename = "atan2")]
    Atan2,
}

impl BinaryOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Mod => "%",
            BinaryOperator::Pow => "^",
            BinaryOperator::Eql => "==",
            BinaryOperator::Neq => "!=",
            BinaryOperator::Gtr => ">",
            BinaryOperator::Lss => "<",
            BinaryOperator::Gte => ">=",
            BinaryOperator::Lte => "<=",
            BinaryOperator::And => "and",
            BinaryOperator::Or => "or",
            BinaryOperator::Unless => "unless",
            BinaryOperator::Atan2 => "atan2",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Eql
                | BinaryOperator::Neq
                | BinaryOperator::Gtr
                | BinaryOperator::Lss
                | BinaryOperator::Gte
                | BinaryOperator::Lte
        )
    }

    pub fn is_set_operator(&self) -> bool {
        matches!(self, BinaryOperator::And | BinaryOperator::Or | BinaryOperator::Unless)
    }

    /// Binding strength, higher binds tighter. Follows the Prometheus grammar.
    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOperator::Or => 1,
            BinaryOperator::And | BinaryOperator::Unless => 2,
            BinaryOperator::Eql
            | BinaryOperator::Neq
            | BinaryOperator::Gtr
            | BinaryOperator::Lss
            | BinaryOperator::Gte
            | BinaryOperator::Lte => 3,
            BinaryOperator::Add | BinaryOperator::Sub => 4,
            BinaryOperator::Mul | BinaryOperator::Div | BinaryOperator::Mod | BinaryOperator::Atan2 => 5,
            BinaryOperator::Pow => 6,
        }
    }

    /// Only `^` groups from the right.
    pub fn is_right_associative(&self) -> bool {
        matches!(self, BinaryOperator::Pow)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOperator {
    #[serde(rename = "+")]
    Plus,
    #[serde(rename = "-")]
    Minus,
}

impl UnaryOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOperator::Plus => "+",
            UnaryOperator::Minus => "-",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchType {
    #[serde(rename = "=")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = "=~")]
    MatchRegexp,
    #[serde(rename = "!~")]
    MatchNotRegexp,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Equal => "=",
            MatchType::NotEqual => "!=",
            MatchType::MatchRegexp => "=~",
            MatchType::MatchNotRegexp => "!~",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartOrEnd {
    Start,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VectorMatchCardinality {
    OneToOne,
    ManyToOne,
    OneToMany,
    ManyToMany,
}

// ═══════════════════════════════════════════════════════════════════
// Node payloads
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelMatcher {
    #[serde(rename = "type")]
    pub match_type: MatchType,
    pub name: String,
    pub value: String,
}

impl LabelMatcher {
    pub fn new(match_type: MatchType, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            match_type,
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatching {
    pub on: bool,
    pub labels: Vec<String>,
    pub card: VectorMatchCardinality,
    pub include: Vec<String>,
}

impl VectorMatching {
    /// Default matching for a vector-vector operation without modifiers.
    pub fn for_operator(op: BinaryOperator) -> Self {
        Self {
            on: false,
            labels: vec![],
            card: if op.is_set_operator() {
                VectorMatchCardinality::ManyToMany
            } else {
                VectorMatchCardinality::OneToOne
            },
            include: vec![],
        }
    }
}

/// Function signature. `variadic` is 0 for fixed arity, N > 0 for up to N
/// optional trailing arguments and -1 for unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Func {
    pub name: String,
    pub arg_types: Vec<ValueType>,
    pub variadic: i32,
    pub return_type: ValueType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub op: AggregationType,
    pub expr: Box<Node>,
    pub param: Option<Box<Node>>,
    pub grouping: Vec<String>,
    pub without: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryExpr {
    pub op: BinaryOperator,
    pub lhs: Box<Node>,
    pub rhs: Box<Node>,
    pub matching: Option<VectorMatching>,
    #[serde(rename = "bool")]
    pub return_bool: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub func: Func,
    pub args: Vec<Node>,
}

/// Instant vector selector. Offsets are milliseconds (positive looks into the
/// past), `timestamp` is a Unix timestamp in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorSelector {
    pub name: String,
    pub matchers: Vec<LabelMatcher>,
    pub offset: i64,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub start_or_end: Option<StartOrEnd>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixSelector {
    pub name: String,
    pub matchers: Vec<LabelMatcher>,
    pub range: u64,
    pub offset: i64,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub start_or_end: Option<StartOrEnd>,
}

impl MatrixSelector {
    /// Turn an instant selector into a range selector over `range` milliseconds.
    pub fn from_vector(vs: &VectorSelector, range: u64) -> Self {
        Self {
            name: vs.name.clone(),
            matchers: vs.matchers.clone(),
            range,
            offset: vs.offset,
            timestamp: vs.timestamp,
            start_or_end: vs.start_or_end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subquery {
    pub expr: Box<Node>,
    pub range: u64,
    pub offset: i64,
    pub step: u64,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub start_or_end: Option<StartOrEnd>,
}

/// Numeric literal. Kept as text so `Inf`, `NaN` and the original precision survive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberLiteral {
    pub val: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringLiteral {
    pub val: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParenExpr {
    pub expr: Box<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnaryExpr {
    pub op: UnaryOperator,
    pub expr: Box<Node>,
}

/// Editor-only marker for an unfilled slot. Its children are free-form and
/// hold whatever was wrapped when a parent was inserted above a node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Placeholder {
    #[serde(default)]
    pub children: Vec<Node>,
}

// ═══════════════════════════════════════════════════════════════════
// Node
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Node {
    Aggregation(Aggregation),
    BinaryExpr(BinaryExpr),
    Call(Call),
    MatrixSelector(MatrixSelector),
    Subquery(Subquery),
    NumberLiteral(NumberLiteral),
    ParenExpr(ParenExpr),
    StringLiteral(StringLiteral),
    UnaryExpr(UnaryExpr),
    VectorSelector(VectorSelector),
    Placeholder(Placeholder),
}

impl Node {
    pub fn placeholder() -> Node {
        Node::Placeholder(Placeholder::default())
    }

    pub fn number(val: impl Into<String>) -> Node {
        Node::NumberLiteral(NumberLiteral { val: val.into() })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Node::Aggregation(_) => "aggregation",
            Node::BinaryExpr(_) => "binaryExpr",
            Node::Call(_) => "call",
            Node::MatrixSelector(_) => "matrixSelector",
            Node::Subquery(_) => "subquery",
            Node::NumberLiteral(_) => "numberLiteral",
            Node::ParenExpr(_) => "parenExpr",
            Node::StringLiteral(_) => "stringLiteral",
            Node::UnaryExpr(_) => "unaryExpr",
            Node::VectorSelector(_) => "vectorSelector",
            Node::Placeholder(_) => "placeholder",
        }
    }

    /// Direct children in tree order. For aggregations the parameter (if
    /// any) comes first and the aggregated expression last.
    pub fn children(&self) -> Vec<&Node> {
        match self {
            Node::Aggregation(agg) => {
                let mut out = Vec::with_capacity(2);
                if let Some(param) = &agg.param {
                    out.push(param.as_ref());
                }
                out.push(agg.expr.as_ref());
                out
            }
            Node::Subquery(sq) => vec![sq.expr.as_ref()],
            Node::ParenExpr(p) => vec![p.expr.as_ref()],
            Node::UnaryExpr(u) => vec![u.expr.as_ref()],
            Node::Call(call) => call.args.iter().collect(),
            Node::BinaryExpr(b) => vec![b.lhs.as_ref(), b.rhs.as_ref()],
            Node::Placeholder(p) => p.children.iter().collect(),
            Node::MatrixSelector(_)
            | Node::VectorSelector(_)
            | Node::NumberLiteral(_)
            | Node::StringLiteral(_) => vec![],
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut Node> {
        match self {
            Node::Aggregation(agg) => {
                let mut out = Vec::with_capacity(2);
                if let Some(param) = &mut agg.param {
                    out.push(param.as_mut());
                }
                out.push(agg.expr.as_mut());
                out
            }
            Node::Subquery(sq) => vec![sq.expr.as_mut()],
            Node::ParenExpr(p) => vec![p.expr.as_mut()],
            Node::UnaryExpr(u) => vec![u.expr.as_mut()],
            Node::Call(call) => call.args.iter_mut().collect(),
            Node::BinaryExpr(b) => vec![b.lhs.as_mut(), b.rhs.as_mut()],
            Node::Placeholder(p) => p.children.iter_mut().collect(),
            Node::MatrixSelector(_)
            | Node::VectorSelector(_)
            | Node::NumberLiteral(_)
            | Node::StringLiteral(_) => vec![],
        }
    }

    /// The PromQL value type this expression evaluates to.
    pub fn value_type(&self) -> ValueType {
        match self {
            Node::Aggregation(_) => ValueType::Vector,
            Node::BinaryExpr(b) => {
                if b.lhs.value_type() == ValueType::Scalar && b.rhs.value_type() == ValueType::Scalar {
                    ValueType::Scalar
                } else {
                    ValueType::Vector
                }
            }
            Node::Call(call) => call.func.return_type,
            Node::MatrixSelector(_) | Node::Subquery(_) => ValueType::Matrix,
            Node::NumberLiteral(_) => ValueType::Scalar,
            Node::StringLiteral(_) => ValueType::String,
            Node::ParenExpr(p) => p.expr.value_type(),
            Node::UnaryExpr(u) => u.expr.value_type(),
            Node::VectorSelector(_) => ValueType::Vector,
            Node::Placeholder(_) => ValueType::None,
        }
    }

    /// Whether this node or any descendant is a placeholder.
    pub fn contains_placeholder(&self) -> bool {
        matches!(self, Node::Placeholder(_)) || self.children().into_iter().any(Node::contains_placeholder)
    }

    /// Metric name for selector nodes.
    pub fn selector_name(&self) -> Option<&str> {
        match self {
            Node::VectorSelector(vs) => Some(&vs.name),
            Node::MatrixSelector(ms) => Some(&ms.name),
            _ => None,
        }
    }

    /// Check the shape constraints the JSON form cannot express. Trees built
    /// from deserialized ASTs must pass this before being normalized.
    pub fn validate(&self) -> Result<(), AstError> {
        if let Node::Aggregation(agg) = self {
            match (agg.op.has_param(), agg.param.is_some()) {
                (true, false) => return Err(AstError::MissingParam(agg.op.as_str())),
                (false, true) => return Err(AstError::UnexpectedParam(agg.op.as_str())),
                _ => {}
            }
        }
        self.children().into_iter().try_for_each(|child| child.validate())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AstError {
    #[error("{0} aggregation requires a parameter")]
    MissingParam(&'static str),
    #[error("{0} aggregation takes no parameter")]
    UnexpectedParam(&'static str),
}

const COUNTER_SUFFIXES: [&str; 4] = ["_total", "_count", "_sum", "_bucket"];

/// Whether a metric name looks like a counter (or a histogram/summary counter series).
pub fn has_counter_suffix(name: &str) -> bool {
    COUNTER_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

#[cfg(test)]
impl Node {
    /// The same tree with every `ParenExpr` removed, for comparing parse
    /// results against trees built by edits.
    pub(crate) fn without_parens(self) -> Node {
        match self {
            Node::ParenExpr(p) => (*p.expr).without_parens(),
            mut other => {
                for child in other.children_mut() {
                    let owned = std::mem::replace(child, Node::placeholder());
                    *child = owned.without_parens();
                }
                other
            }
        }
    }
}
