use serde::Serialize;

use super::ast::{
    Aggregation, AggregationType, Call, MatrixSelector, Node, has_counter_suffix,
};
use super::functions::builtin;
use super::types::NodeQueryResult;

/// Functions that only work on counters.
const STRICT_COUNTER_FUNCS: [&str; 4] = ["rate", "irate", "increase", "resets"];

/// Functions that can make sense to run directly on counters.
const COUNTER_FUNCS: [&str; 8] = [
    "rate",
    "irate",
    "increase",
    "resets",
    "absent",
    "absent_over_time",
    "count_over_time",
    "present_over_time",
];

const DEFAULT_RATE_RANGE_MS: u64 = 5 * 60 * 1000;

/// A suggested rewrite. `new_node` replaces the annotated node as a whole.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAction {
    pub title: String,
    pub description: String,
    pub new_node: Node,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct NodeAnnotations {
    pub warnings: Vec<String>,
    pub actions: Vec<NodeAction>,
}

fn is_counter_func(name: &str) -> bool {
    COUNTER_FUNCS.contains(&name)
}

/// Wrap a selector in `rate()`, turning instant selectors into 5m range selectors.
fn rate_of(node: &Node) -> Option<Node> {
    let arg = match node {
        Node::VectorSelector(vs) => Node::MatrixSelector(MatrixSelector::from_vector(vs, DEFAULT_RATE_RANGE_MS)),
        Node::MatrixSelector(_) => node.clone(),
        _ => return None,
    };
    Some(Node::Call(Call {
        func: builtin("rate"),
        args: vec![arg],
    }))
}

/// Static checks on a node in the context of its parent and last query result.
pub fn get_node_annotations(
    node: &Node,
    parent: Option<&Node>,
    query_result: Option<&NodeQueryResult>,
) -> NodeAnnotations {
    let mut out = NodeAnnotations::default();

    if let Node::Call(call) = node {
        check_counter_func_args(call, &mut out);
    }
    suggest_rate(node, parent, &mut out);
    suggest_histogram_quantile(node, parent, &mut out);
    if let (Some(Node::Call(p)), Node::Aggregation(agg)) = (parent, node) {
        if p.func.name == "histogram_quantile" {
            check_le_label(agg, &mut out);
        }
    }
    suggest_sum(node, parent, query_result, &mut out);

    out
}

fn check_counter_func_args(call: &Call, out: &mut NodeAnnotations) {
    let func = call.func.name.as_str();

    // rate()/irate()/... on non-counter metrics.
    if STRICT_COUNTER_FUNCS.contains(&func) {
        if let Some(Node::MatrixSelector(ms)) = call.args.first() {
            if !has_counter_suffix(&ms.name) {
                out.warnings.push(format!(
                    "{func}() is only meant to be used on counter metrics, but {} does not look like a counter metric. Did you mean deriv()?",
                    ms.name
                ));
                out.actions.push(NodeAction {
                    title: "change to deriv()".to_string(),
                    description: format!(
                        "deriv() is more likely to be the correct function to call on {}, since it does not look like a counter metric.",
                        ms.name
                    ),
                    new_node: Node::Call(Call {
                        func: builtin("deriv"),
                        args: call.args.clone(),
                    }),
                });
            }
        }
    }

    // Non-counter function on counter.
    if !is_counter_func(func) {
        for name in call.args.iter().filter_map(Node::selector_name) {
            if has_counter_suffix(name) {
                out.warnings.push(format!(
                    "{func}() is not meant to be used on raw counter metrics, but {name} looks like a counter metric. Did you mean to apply rate(), irate(), or increase() instead?"
                ));
            }
        }
    }
}

/// Counter without a counter-function parent.
fn suggest_rate(node: &Node, parent: Option<&Node>, out: &mut NodeAnnotations) {
    let parent_allows_rate = match parent {
        None => true,
        Some(Node::Call(p)) => !is_counter_func(&p.func.name),
        Some(_) => false,
    };
    let Some(name) = node.selector_name() else { return };
    if !parent_allows_rate || !has_counter_suffix(name) {
        return;
    }
    let Some(new_node) = rate_of(node) else { return };

    out.actions.push(NodeAction {
        title: "add rate()".to_string(),
        description: format!(
            "{name} looks like a counter metric. It usually makes sense to compute a counter's rate of increase before using it further."
        ),
        new_node,
    });
}

/// Histogram buckets without any parent.
fn suggest_histogram_quantile(node: &Node, parent: Option<&Node>, out: &mut NodeAnnotations) {
    let Node::VectorSelector(vs) = node else { return };
    if parent.is_some() || !vs.name.ends_with("_bucket") {
        return;
    }
    let Some(rate) = rate_of(node) else { return };

    out.actions.push(NodeAction {
        title: "add histogram_quantile()".to_string(),
        description: format!(
            "{} looks like a histogram metric. Do you want to calculate an aggregated quantile value from it?",
            vs.name
        ),
        new_node: Node::Call(Call {
            func: builtin("histogram_quantile"),
            args: vec![
                Node::number("0.9"),
                Node::Aggregation(Aggregation {
                    op: AggregationType::Sum,
                    expr: Box::new(rate),
                    param: None,
                    grouping: vec!["le".to_string()],
                    without: false,
                }),
            ],
        }),
    });
}

/// Aggregation passed to histogram_quantile() must keep the "le" label.
fn check_le_label(agg: &Aggregation, out: &mut NodeAnnotations) {
    let has_le = agg.grouping.iter().any(|l| l == "le");
    if agg.without != has_le {
        return;
    }

    out.warnings.push(
        "When passing an aggregated histogram into histogram_quantile(), you need to preserve the le (\"less-than-or-equal\") label in the aggregation.".to_string(),
    );

    let mut fixed = agg.clone();
    if agg.without {
        fixed.grouping.retain(|l| l != "le");
    } else {
        fixed.grouping.push("le".to_string());
    }
    out.actions.push(NodeAction {
        title: "keep le label".to_string(),
        description: "It looks like the le label is not preserved in this aggregation, but histogram_quantile() requires it.".to_string(),
        new_node: Node::Aggregation(fixed),
    });
}

/// Multiple non-counter series, suggest aggregating.
fn suggest_sum(
    node: &Node,
    parent: Option<&Node>,
    query_result: Option<&NodeQueryResult>,
    out: &mut NodeAnnotations,
) {
    let aggregatable = match node {
        Node::VectorSelector(vs) => !has_counter_suffix(&vs.name),
        Node::Call(call) => is_counter_func(&call.func.name),
        _ => false,
    };
    if !aggregatable
        || !query_result.is_some_and(|r| r.num_series > 1)
        || matches!(parent, Some(Node::Aggregation(_)))
    {
        return;
    }

    out.actions.push(NodeAction {
        title: "add sum()".to_string(),
        description: "This expression yields multiple series. Depending on your goal, it may make sense to aggregate over them.".to_string(),
        new_node: Node::Aggregation(Aggregation {
            op: AggregationType::Sum,
            expr: Box::new(node.clone()),
            param: None,
            grouping: vec![],
            without: false,
        }),
    });
}
