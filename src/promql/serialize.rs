use super::ast::{
    Aggregation, BinaryExpr, BinaryOperator, LabelMatcher, Node, StartOrEnd, VectorMatchCardinality,
};
use super::duration::format_duration;

/// Rendering of an unfilled placeholder slot. Never valid PromQL.
pub const PLACEHOLDER_MARKER: &str = "…";

const INDENT: &str = "  ";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SerializeOptions {
    /// Multi-line output with children indented one level deeper than their parent.
    pub pretty: bool,
    /// Drop parentheses that only wrap a selector or literal.
    pub strip_trivial_parens: bool,
}

/// Canonical single-line PromQL text for an expression.
pub fn serialize(node: &Node) -> String {
    serialize_with(node, SerializeOptions::default())
}

/// Indented multi-line rendering, used for node previews.
pub fn serialize_pretty(node: &Node) -> String {
    serialize_with(
        node,
        SerializeOptions {
            pretty: true,
            strip_trivial_parens: false,
        },
    )
}

pub fn serialize_with(node: &Node, opts: SerializeOptions) -> String {
    Serializer { opts }.node(node, 0)
}

/// An expression can be sent to Prometheus only once every placeholder is filled in.
pub fn is_submittable(node: &Node) -> bool {
    !node.contains_placeholder()
}

/// Escape a string for use inside a double-quoted PromQL string.
pub fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

fn is_leaf(node: &Node) -> bool {
    matches!(
        node,
        Node::VectorSelector(_) | Node::MatrixSelector(_) | Node::NumberLiteral(_) | Node::StringLiteral(_)
    )
}

struct Serializer {
    opts: SerializeOptions,
}

impl Serializer {
    fn indent(&self, level: usize) -> String {
        if self.opts.pretty {
            INDENT.repeat(level)
        } else {
            String::new()
        }
    }

    /// `head(child, child, ...)` on one line, or one child per line in pretty mode.
    fn wrapped(&self, head: &str, children: &[&Node], level: usize) -> String {
        let ind = self.indent(level);
        if !self.opts.pretty {
            let inner: Vec<String> = children.iter().map(|c| self.node(c, 0)).collect();
            return format!("{head}({})", inner.join(", "));
        }
        if children.is_empty() {
            return format!("{ind}{head}()");
        }
        let inner: Vec<String> = children.iter().map(|c| self.node(c, level + 1)).collect();
        format!("{ind}{head}(\n{}\n{ind})", inner.join(",\n"))
    }

    fn node(&self, node: &Node, level: usize) -> String {
        let ind = self.indent(level);
        match node {
            Node::Aggregation(agg) => self.aggregation(agg, level),
            Node::BinaryExpr(b) => self.binary(b, level),
            Node::Call(call) => {
                let args: Vec<&Node> = call.args.iter().collect();
                self.wrapped(&call.func.name, &args, level)
            }
            Node::MatrixSelector(ms) => format!(
                "{ind}{}[{}]{}",
                selector(&ms.name, &ms.matchers),
                format_duration(ms.range),
                at_and_offset(ms.timestamp, ms.start_or_end, ms.offset)
            ),
            Node::Subquery(sq) => {
                let step = if sq.step == 0 {
                    String::new()
                } else {
                    format_duration(sq.step)
                };
                let wrap = matches!(*sq.expr, Node::BinaryExpr(_) | Node::UnaryExpr(_));
                format!(
                    "{}[{}:{}]{}",
                    self.operand(&sq.expr, level, wrap),
                    format_duration(sq.range),
                    step,
                    at_and_offset(sq.timestamp, sq.start_or_end, sq.offset)
                )
            }
            Node::NumberLiteral(n) => format!("{ind}{}", n.val),
            Node::StringLiteral(s) => format!("{ind}\"{}\"", escape_string(&s.val)),
            Node::ParenExpr(p) => {
                if self.opts.strip_trivial_parens && is_leaf(&p.expr) {
                    return self.node(&p.expr, level);
                }
                self.parenthesized(&p.expr, level)
            }
            Node::UnaryExpr(u) => {
                // Unary minus binds looser than `^` only.
                let wrap = matches!(&*u.expr, Node::BinaryExpr(b) if b.op.precedence() < BinaryOperator::Pow.precedence());
                let operand = self.operand(&u.expr, level, wrap);
                format!("{ind}{}{}", u.op.as_str(), operand.trim_start())
            }
            Node::VectorSelector(vs) => format!(
                "{ind}{}{}",
                selector(&vs.name, &vs.matchers),
                at_and_offset(vs.timestamp, vs.start_or_end, vs.offset)
            ),
            Node::Placeholder(_) => format!("{ind}{PLACEHOLDER_MARKER}"),
        }
    }

    fn aggregation(&self, agg: &Aggregation, level: usize) -> String {
        let grouping = if agg.without {
            format!(" without({}) ", agg.grouping.join(", "))
        } else if !agg.grouping.is_empty() {
            format!(" by({}) ", agg.grouping.join(", "))
        } else {
            String::new()
        };
        let head = format!("{}{grouping}", agg.op.as_str());

        let mut children: Vec<&Node> = Vec::with_capacity(2);
        if let Some(param) = &agg.param {
            children.push(param);
        }
        children.push(&agg.expr);
        self.wrapped(&head, &children, level)
    }

    fn binary(&self, b: &BinaryExpr, level: usize) -> String {
        let mut op = b.op.as_str().to_string();
        if b.return_bool {
            op.push_str(" bool");
        }
        if let Some(m) = &b.matching {
            let grouped = matches!(
                m.card,
                VectorMatchCardinality::ManyToOne | VectorMatchCardinality::OneToMany
            );
            if m.on || !m.labels.is_empty() || grouped {
                let kw = if m.on { "on" } else { "ignoring" };
                op.push_str(&format!(" {kw}({})", m.labels.join(", ")));
            }
            match m.card {
                VectorMatchCardinality::ManyToOne => {
                    op.push_str(&format!(" group_left({})", m.include.join(", ")))
                }
                VectorMatchCardinality::OneToMany => {
                    op.push_str(&format!(" group_right({})", m.include.join(", ")))
                }
                VectorMatchCardinality::OneToOne | VectorMatchCardinality::ManyToMany => {}
            }
        }

        let wrap_lhs = needs_parens(&b.lhs, b.op, false);
        let wrap_rhs = needs_parens(&b.rhs, b.op, true);
        if self.opts.pretty {
            let ind = self.indent(level);
            format!(
                "{}\n{ind}{op}\n{}",
                self.operand(&b.lhs, level + 1, wrap_lhs),
                self.operand(&b.rhs, level + 1, wrap_rhs)
            )
        } else {
            format!(
                "{} {op} {}",
                self.operand(&b.lhs, 0, wrap_lhs),
                self.operand(&b.rhs, 0, wrap_rhs)
            )
        }
    }

    fn parenthesized(&self, inner: &Node, level: usize) -> String {
        if self.opts.pretty {
            let ind = self.indent(level);
            format!("{ind}(\n{}\n{ind})", self.node(inner, level + 1))
        } else {
            format!("({})", self.node(inner, 0))
        }
    }

    fn operand(&self, node: &Node, level: usize, wrap: bool) -> String {
        if wrap {
            self.parenthesized(node, level)
        } else {
            self.node(node, level)
        }
    }
}

/// Whether an operand of `parent` must be parenthesized to parse back into the
/// same tree. Trees built by edits carry no `ParenExpr` around nested operators.
fn needs_parens(child: &Node, parent: BinaryOperator, is_rhs: bool) -> bool {
    match child {
        Node::BinaryExpr(c) => {
            let (cp, pp) = (c.op.precedence(), parent.precedence());
            cp < pp || (cp == pp && is_rhs != parent.is_right_associative())
        }
        // `-a ^ b` parses as `-(a ^ b)`.
        Node::UnaryExpr(_) => !is_rhs && parent == BinaryOperator::Pow,
        _ => false,
    }
}

fn selector(name: &str, matchers: &[LabelMatcher]) -> String {
    let rendered: Vec<String> = matchers
        .iter()
        .filter(|m| !(m.name == "__name__" && m.value == name && !name.is_empty()))
        .map(|m| format!("{}{}\"{}\"", m.name, m.match_type.as_str(), escape_string(&m.value)))
        .collect();

    if rendered.is_empty() && !name.is_empty() {
        name.to_string()
    } else {
        format!("{name}{{{}}}", rendered.join(","))
    }
}

fn at_and_offset(timestamp: Option<i64>, start_or_end: Option<StartOrEnd>, offset: i64) -> String {
    let mut out = String::new();
    if let Some(ts) = timestamp {
        out.push_str(&format!(" @ {:.3}", ts as f64 / 1000.0));
    } else if let Some(soe) = start_or_end {
        out.push_str(match soe {
            StartOrEnd::Start => " @ start()",
            StartOrEnd::End => " @ end()",
        });
    }

    if offset > 0 {
        out.push_str(&format!(" offset {}", format_duration(offset.unsigned_abs())));
    } else if offset < 0 {
        out.push_str(&format!(" offset -{}", format_duration(offset.unsigned_abs())));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promql::ast::*;
    use crate::promql::functions::function_signature;

    fn vs(name: &str) -> VectorSelector {
        VectorSelector {
            name: name.to_string(),
            matchers: vec![],
            offset: 0,
            timestamp: None,
            start_or_end: None,
        }
    }

    fn ms(name: &str, range: u64) -> Node {
        Node::MatrixSelector(MatrixSelector::from_vector(&vs(name), range))
    }

    fn call(name: &str, args: Vec<Node>) -> Node {
        Node::Call(Call {
            func: function_signature(name).unwrap(),
            args,
        })
    }

    fn agg(op: AggregationType, grouping: &[&str], without: bool, param: Option<Node>, expr: Node) -> Node {
        Node::Aggregation(Aggregation {
            op,
            expr: Box::new(expr),
            param: param.map(Box::new),
            grouping: grouping.iter().map(|s| s.to_string()).collect(),
            without,
        })
    }

    fn bin(op: BinaryOperator, lhs: Node, rhs: Node, matching: Option<VectorMatching>, return_bool: bool) -> Node {
        Node::BinaryExpr(BinaryExpr {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            matching,
            return_bool,
        })
    }

    #[test]
    fn test_selectors() {
        let mut sel = vs("http_requests_total");
        assert_eq!(serialize(&Node::VectorSelector(sel.clone())), "http_requests_total");

        sel.matchers = vec![
            LabelMatcher::new(MatchType::Equal, "__name__", "http_requests_total"),
            LabelMatcher::new(MatchType::Equal, "job", "api"),
            LabelMatcher::new(MatchType::MatchNotRegexp, "status", "5.."),
        ];
        assert_eq!(
            serialize(&Node::VectorSelector(sel.clone())),
            r#"http_requests_total{job="api",status!~"5.."}"#
        );

        let nameless = VectorSelector {
            name: String::new(),
            matchers: vec![LabelMatcher::new(MatchType::MatchRegexp, "__name__", "http_.*")],
            ..vs("")
        };
        assert_eq!(serialize(&Node::VectorSelector(nameless)), r#"{__name__=~"http_.*"}"#);
        assert_eq!(serialize(&ms("up", 300_000)), "up[5m]");
    }

    #[test]
    fn test_matcher_escaping() {
        let sel = VectorSelector {
            matchers: vec![LabelMatcher::new(MatchType::Equal, "path", "a\\b\"c\nd")],
            ..vs("x")
        };
        assert_eq!(serialize(&Node::VectorSelector(sel)), r#"x{path="a\\b\"c\nd"}"#);
        assert_eq!(
            serialize(&Node::StringLiteral(StringLiteral { val: "say \"hi\"".to_string() })),
            r#""say \"hi\"""#
        );
    }

    #[test]
    fn test_at_and_offset() {
        let sel = VectorSelector {
            offset: 300_000,
            timestamp: Some(1_609_746_000_000),
            ..vs("up")
        };
        assert_eq!(serialize(&Node::VectorSelector(sel)), "up @ 1609746000.000 offset 5m");

        let sel = VectorSelector {
            offset: -3_600_000,
            start_or_end: Some(StartOrEnd::End),
            ..vs("up")
        };
        assert_eq!(serialize(&Node::VectorSelector(sel)), "up @ end() offset -1h");

        let sq = Node::Subquery(Subquery {
            expr: Box::new(call("rate", vec![ms("x", 300_000)])),
            range: 1_800_000,
            offset: 0,
            step: 60_000,
            timestamp: None,
            start_or_end: Some(StartOrEnd::Start),
        });
        assert_eq!(serialize(&sq), "rate(x[5m])[30m:1m] @ start()");

        let sq_no_step = Node::Subquery(Subquery {
            expr: Box::new(Node::VectorSelector(vs("x"))),
            range: 1_800_000,
            offset: 0,
            step: 0,
            timestamp: None,
            start_or_end: None,
        });
        assert_eq!(serialize(&sq_no_step), "x[30m:]");
    }

    #[test]
    fn test_aggregations() {
        let rate = call("rate", vec![ms("request_duration_seconds_bucket", 300_000)]);
        let by = agg(AggregationType::Sum, &["instance", "job", "le"], false, None, rate.clone());
        assert_eq!(
            serialize(&by),
            "sum by(instance, job, le) (rate(request_duration_seconds_bucket[5m]))"
        );

        let without = agg(AggregationType::Avg, &["a", "b"], true, None, Node::VectorSelector(vs("x")));
        assert_eq!(serialize(&without), "avg without(a, b) (x)");

        let plain = agg(AggregationType::Sum, &[], false, None, Node::VectorSelector(vs("x")));
        assert_eq!(serialize(&plain), "sum(x)");

        let topk = agg(AggregationType::Topk, &[], false, Some(Node::number("5")), Node::VectorSelector(vs("x")));
        assert_eq!(serialize(&topk), "topk(5, x)");

        let quantile = call("histogram_quantile", vec![Node::number("0.9"), by]);
        assert_eq!(
            serialize(&quantile),
            "histogram_quantile(0.9, sum by(instance, job, le) (rate(request_duration_seconds_bucket[5m])))"
        );
    }

    #[test]
    fn test_binary_modifiers() {
        let a = || Node::VectorSelector(vs("a"));
        let b = || Node::VectorSelector(vs("b"));

        let plain = bin(BinaryOperator::Div, a(), b(), Some(VectorMatching::for_operator(BinaryOperator::Div)), false);
        assert_eq!(serialize(&plain), "a / b");

        let on = VectorMatching {
            on: true,
            labels: vec!["instance".into(), "job".into()],
            card: VectorMatchCardinality::OneToOne,
            include: vec![],
        };
        assert_eq!(serialize(&bin(BinaryOperator::Div, a(), b(), Some(on), false)), "a / on(instance, job) b");

        let group_left = VectorMatching {
            on: false,
            labels: vec!["mode".into()],
            card: VectorMatchCardinality::ManyToOne,
            include: vec!["version".into()],
        };
        assert_eq!(
            serialize(&bin(BinaryOperator::Mul, a(), b(), Some(group_left), false)),
            "a * ignoring(mode) group_left(version) b"
        );

        let group_right = VectorMatching {
            on: true,
            labels: vec![],
            card: VectorMatchCardinality::OneToMany,
            include: vec![],
        };
        assert_eq!(
            serialize(&bin(BinaryOperator::Add, a(), b(), Some(group_right), false)),
            "a + on() group_right() b"
        );

        let cmp = bin(BinaryOperator::Gtr, Node::number("5"), Node::number("3"), None, true);
        assert_eq!(serialize(&cmp), "5 > bool 3");

        let set = bin(BinaryOperator::Unless, a(), b(), Some(VectorMatching::for_operator(BinaryOperator::Unless)), false);
        assert_eq!(serialize(&set), "a unless b");
    }

    #[test]
    fn test_paren_unary_placeholder() {
        let paren = Node::ParenExpr(ParenExpr {
            expr: Box::new(Node::VectorSelector(vs("x"))),
        });
        let neg = Node::UnaryExpr(UnaryExpr {
            op: UnaryOperator::Minus,
            expr: Box::new(paren.clone()),
        });
        assert_eq!(serialize(&neg), "-(x)");
        assert_eq!(
            serialize_with(&neg, SerializeOptions { pretty: false, strip_trivial_parens: true }),
            "-x"
        );

        let incomplete = call("abs", vec![Node::placeholder()]);
        assert_eq!(serialize(&incomplete), "abs(…)");
        assert!(!is_submittable(&incomplete));
        assert!(is_submittable(&paren));
    }

    #[test]
    fn test_pretty() {
        let node = agg(
            AggregationType::Sum,
            &["job"],
            false,
            None,
            bin(
                BinaryOperator::Div,
                call("rate", vec![ms("a_total", 300_000)]),
                Node::VectorSelector(vs("b")),
                Some(VectorMatching::for_operator(BinaryOperator::Div)),
                false,
            ),
        );
        let expected = "sum by(job) (\n    rate(\n      a_total[5m]\n    )\n  /\n    b\n)";
        assert_eq!(serialize_pretty(&node), expected);
    }

    #[test]
    fn test_operator_precedence_parens() {
        let sel = |name: &str| Node::VectorSelector(vs(name));
        let op = |op: BinaryOperator, lhs: Node, rhs: Node| bin(op, lhs, rhs, Some(VectorMatching::for_operator(op)), false);
        let neg = |expr: Node| {
            Node::UnaryExpr(UnaryExpr {
                op: UnaryOperator::Minus,
                expr: Box::new(expr),
            })
        };
        let sum = || op(BinaryOperator::Add, sel("c"), sel("d"));
        let pow = || op(BinaryOperator::Pow, sel("c"), sel("d"));

        let cases = [
            (op(BinaryOperator::Mul, sel("a"), sum()), "a * (c + d)"),
            (op(BinaryOperator::Mul, sum(), sel("a")), "(c + d) * a"),
            (op(BinaryOperator::Add, sel("a"), op(BinaryOperator::Mul, sel("c"), sel("d"))), "a + c * d"),
            (op(BinaryOperator::Sub, sel("a"), op(BinaryOperator::Sub, sel("c"), sel("d"))), "a - (c - d)"),
            (op(BinaryOperator::Pow, pow(), sel("a")), "(c ^ d) ^ a"),
            (op(BinaryOperator::Pow, sel("a"), pow()), "a ^ c ^ d"),
            (op(BinaryOperator::Pow, neg(sel("a")), sel("b")), "(-a) ^ b"),
            (op(BinaryOperator::Mul, neg(sel("a")), sel("b")), "-a * b"),
            (neg(sum()), "-(c + d)"),
            (neg(pow()), "-c ^ d"),
            (op(BinaryOperator::Gtr, sel("a"), op(BinaryOperator::Or, sel("c"), sel("d"))), "a > (c or d)"),
        ];
        for (node, expected) in cases {
            let text = serialize(&node);
            assert_eq!(text, expected);
            let reparsed = crate::promql::translate::parse(&text).unwrap();
            assert_eq!(reparsed.without_parens(), node);
        }

        let sq = Node::Subquery(Subquery {
            expr: Box::new(sum()),
            range: 300_000,
            offset: 0,
            step: 0,
            timestamp: None,
            start_or_end: None,
        });
        assert_eq!(serialize(&sq), "(c + d)[5m:]");
        assert_eq!(serialize_pretty(&op(BinaryOperator::Mul, sel("a"), sum())), "  a\n*\n  (\n      c\n    +\n      d\n  )");
    }
}
