use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::ast::{BinaryOperator, VectorMatchCardinality, VectorMatching};
use super::types::{InstantSample, Labels};

/// Separator between label values in a match signature.
const SIGNATURE_SEPARATOR: char = '\u{ff}';

const METRIC_NAME: &str = "__name__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// Cardinality violation detected inside a single match group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum VectorMatchError {
    #[serde(rename_all = "camelCase")]
    MultipleMatchesForOneToOneMatching { dupe_side: Side },
    MultipleMatchesOnBothSides,
    MultipleMatchesOnOneSide,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub sample: InstantSample,
    /// Index into the group's many-side samples this result was computed from.
    pub many_side_idx: usize,
    /// The pair was matched but a comparison filtered it out of the output.
    pub filtered: bool,
}

/// All samples from both operands that share one match signature.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BinOpMatchGroup {
    pub group_labels: Labels,
    pub lhs: Vec<InstantSample>,
    pub lhs_count: usize,
    pub rhs: Vec<InstantSample>,
    pub rhs_count: usize,
    pub result: Vec<MatchResult>,
    pub error: Option<VectorMatchError>,
}

impl BinOpMatchGroup {
    fn new(group_labels: Labels) -> Self {
        Self {
            group_labels,
            lhs: vec![],
            lhs_count: 0,
            rhs: vec![],
            rhs_count: 0,
            result: vec![],
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BinOpResult {
    pub groups: Vec<BinOpMatchGroup>,
    /// Number of distinct match signatures, including groups cut off by limits.
    pub num_groups: usize,
}

impl BinOpResult {
    /// Output samples of all error-free groups, without filtered pairs.
    pub fn samples(&self) -> Vec<InstantSample> {
        self.groups
            .iter()
            .filter(|g| g.error.is_none())
            .flat_map(|g| g.result.iter())
            .filter(|r| !r.filtered)
            .map(|r| r.sample.clone())
            .collect()
    }

    pub fn has_errors(&self) -> bool {
        self.groups.iter().any(|g| g.error.is_some())
    }
}

/// Caps on how much of a vector-vector match is materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinOpLimits {
    pub max_groups: Option<usize>,
    pub max_series_per_group: Option<usize>,
}

impl BinOpLimits {
    pub fn new(max_groups: usize, max_series_per_group: usize) -> Self {
        Self {
            max_groups: Some(max_groups),
            max_series_per_group: Some(max_series_per_group),
        }
    }

    /// No caps, every group and series is kept.
    pub fn unlimited() -> Self {
        Self {
            max_groups: None,
            max_series_per_group: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Element-wise operators
// ═══════════════════════════════════════════════════════════════════

/// Apply an arithmetic or comparison operator to two values. Returns the
/// result value and whether the pair is kept. Comparisons yield the left value.
pub fn vector_elem_bin_op(op: BinaryOperator, lhs: f64, rhs: f64) -> (f64, bool) {
    match op {
        BinaryOperator::Add => (lhs + rhs, true),
        BinaryOperator::Sub => (lhs - rhs, true),
        BinaryOperator::Mul => (lhs * rhs, true),
        BinaryOperator::Div => (lhs / rhs, true),
        BinaryOperator::Mod => (lhs % rhs, true),
        BinaryOperator::Pow => (lhs.powf(rhs), true),
        BinaryOperator::Atan2 => (lhs.atan2(rhs), true),
        BinaryOperator::Eql => (lhs, lhs == rhs),
        BinaryOperator::Neq => (lhs, lhs != rhs),
        BinaryOperator::Gtr => (lhs, lhs > rhs),
        BinaryOperator::Lss => (lhs, lhs < rhs),
        BinaryOperator::Gte => (lhs, lhs >= rhs),
        BinaryOperator::Lte => (lhs, lhs <= rhs),
        BinaryOperator::And | BinaryOperator::Or | BinaryOperator::Unless => {
            panic!("set operator {op:?} has no element-wise semantics")
        }
    }
}

/// Scalar-scalar operation. Comparisons yield 0 or 1.
pub fn scalar_bin_op(op: BinaryOperator, lhs: f64, rhs: f64) -> f64 {
    let (value, keep) = vector_elem_bin_op(op, lhs, rhs);
    if op.is_comparison() {
        if keep { 1.0 } else { 0.0 }
    } else {
        value
    }
}

fn drops_metric_name(op: BinaryOperator, return_bool: bool) -> bool {
    return_bool
        || matches!(
            op,
            BinaryOperator::Add
                | BinaryOperator::Sub
                | BinaryOperator::Mul
                | BinaryOperator::Div
                | BinaryOperator::Mod
                | BinaryOperator::Pow
                | BinaryOperator::Atan2
        )
}

// ═══════════════════════════════════════════════════════════════════
// Vector-scalar
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorScalarRow {
    pub input: InstantSample,
    pub output: InstantSample,
    pub kept: bool,
}

/// Apply an operator between every sample of a vector and a scalar.
/// `scalar_left` is set when the scalar is the left operand.
pub fn compute_vector_scalar_bin_op(
    op: BinaryOperator,
    return_bool: bool,
    vector: &[InstantSample],
    scalar: f64,
    scalar_left: bool,
) -> Vec<VectorScalarRow> {
    vector
        .iter()
        .map(|sample| {
            let v = sample.value.value();
            let (l, r) = if scalar_left { (scalar, v) } else { (v, scalar) };
            let (mut value, mut keep) = vector_elem_bin_op(op, l, r);
            // Comparisons always return the vector element's value.
            if op.is_comparison() && scalar_left {
                value = v;
            }
            if return_bool {
                value = if keep { 1.0 } else { 0.0 };
                keep = true;
            }

            let mut metric = sample.metric.clone();
            if drops_metric_name(op, return_bool) {
                metric.remove(METRIC_NAME);
            }
            VectorScalarRow {
                input: sample.clone(),
                output: InstantSample::new(metric, sample.value.timestamp(), value),
                kept: keep,
            }
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════
// Vector-vector
// ═══════════════════════════════════════════════════════════════════

/// Labels that make up the match signature of a series.
fn signature_labels(metric: &Labels, matching: &VectorMatching) -> Labels {
    if matching.on {
        matching
            .labels
            .iter()
            .filter_map(|l| metric.get(l).map(|v| (l.clone(), v.clone())))
            .collect()
    } else {
        metric
            .iter()
            .filter(|(k, _)| k.as_str() != METRIC_NAME && !matching.labels.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Match signature: values of the signature labels in sorted name order.
/// Missing `on` labels count as empty values.
fn signature(metric: &Labels, matching: &VectorMatching) -> String {
    let values: Vec<&str> = if matching.on {
        let mut names: Vec<&String> = matching.labels.iter().collect();
        names.sort();
        names.dedup();
        names
            .into_iter()
            .map(|n| metric.get(n).map_or("", String::as_str))
            .collect()
    } else {
        // Values only, without names: {a="x"} and {b="x"} share a signature.
        // Kept as is so explain output agrees with the UI's matcher.
        metric
            .iter()
            .filter(|(k, _)| k.as_str() != METRIC_NAME && !matching.labels.contains(k))
            .map(|(_, v)| v.as_str())
            .collect()
    };
    values.join(&SIGNATURE_SEPARATOR.to_string())
}

/// Label set of an output sample, starting from the many side's labels.
fn result_metric(
    many: &Labels,
    one: &Labels,
    op: BinaryOperator,
    matching: &VectorMatching,
    return_bool: bool,
) -> Labels {
    let mut metric = many.clone();
    if drops_metric_name(op, return_bool) {
        metric.remove(METRIC_NAME);
    }

    if matching.card == VectorMatchCardinality::OneToOne {
        if matching.on {
            metric.retain(|name, _| matching.labels.contains(name));
        } else {
            for name in &matching.labels {
                metric.remove(name);
            }
        }
    }

    for name in &matching.include {
        match one.get(name) {
            Some(v) => {
                metric.insert(name.clone(), v.clone());
            }
            None => {
                metric.remove(name);
            }
        }
    }
    metric
}

struct Grouper<'a> {
    matching: &'a VectorMatching,
    limits: &'a BinOpLimits,
    groups: Vec<BinOpMatchGroup>,
    index: HashMap<String, usize>,
    seen: HashSet<String>,
}

impl<'a> Grouper<'a> {
    fn add(&mut self, sample: &InstantSample, side: Side) {
        let sig = signature(&sample.metric, self.matching);
        self.seen.insert(sig.clone());

        let idx = match self.index.get(&sig) {
            Some(idx) => *idx,
            None => {
                if self.limits.max_groups.is_some_and(|max| self.groups.len() >= max) {
                    return;
                }
                self.groups
                    .push(BinOpMatchGroup::new(signature_labels(&sample.metric, self.matching)));
                self.index.insert(sig, self.groups.len() - 1);
                self.groups.len() - 1
            }
        };

        let group = &mut self.groups[idx];
        let (samples, count) = match side {
            Side::Left => (&mut group.lhs, &mut group.lhs_count),
            Side::Right => (&mut group.rhs, &mut group.rhs_count),
        };
        if self.limits.max_series_per_group.is_none_or(|max| *count < max) {
            samples.push(sample.clone());
        }
        *count += 1;
    }
}

fn check_cardinality(group: &BinOpMatchGroup, card: VectorMatchCardinality) -> Option<VectorMatchError> {
    match card {
        VectorMatchCardinality::OneToOne => {
            if group.lhs_count > 1 && group.rhs_count > 1 {
                Some(VectorMatchError::MultipleMatchesOnBothSides)
            } else if group.lhs_count > 1 {
                Some(VectorMatchError::MultipleMatchesForOneToOneMatching { dupe_side: Side::Left })
            } else if group.rhs_count > 1 {
                Some(VectorMatchError::MultipleMatchesForOneToOneMatching { dupe_side: Side::Right })
            } else {
                None
            }
        }
        // The "one" side is always on the right at this point.
        VectorMatchCardinality::ManyToOne | VectorMatchCardinality::OneToMany => {
            (group.rhs_count > 1).then_some(VectorMatchError::MultipleMatchesOnOneSide)
        }
        // Set operators permit any multiplicity.
        VectorMatchCardinality::ManyToMany => None,
    }
}

fn compute_set_op(op: BinaryOperator, group: &mut BinOpMatchGroup) {
    let keep_lhs = match op {
        BinaryOperator::And => group.rhs_count > 0,
        BinaryOperator::Or => true,
        BinaryOperator::Unless => group.rhs_count == 0,
        _ => unreachable!("not a set operator: {op:?}"),
    };

    let results: Vec<MatchResult> = if keep_lhs && group.lhs_count > 0 {
        group.lhs.iter().enumerate().map(|(idx, s)| set_result(s, idx)).collect()
    } else if op == BinaryOperator::Or {
        group.rhs.iter().enumerate().map(|(idx, s)| set_result(s, idx)).collect()
    } else {
        vec![]
    };
    group.result = results;
}

fn set_result(sample: &InstantSample, idx: usize) -> MatchResult {
    MatchResult {
        sample: sample.clone(),
        many_side_idx: idx,
        filtered: false,
    }
}

/// Match two instant vectors according to `matching` and apply `op` to every
/// matched pair. Cardinality violations are reported on the affected group
/// only; other groups are still computed.
pub fn compute_vector_vector_bin_op(
    op: BinaryOperator,
    matching: &VectorMatching,
    return_bool: bool,
    lhs: &[InstantSample],
    rhs: &[InstantSample],
    limits: &BinOpLimits,
) -> BinOpResult {
    // Normalize so that the "one" side of a one-to-many match is on the right.
    let swapped = matching.card == VectorMatchCardinality::OneToMany;
    let (lhs, rhs) = if swapped { (rhs, lhs) } else { (lhs, rhs) };

    let mut grouper = Grouper {
        matching,
        limits,
        groups: vec![],
        index: HashMap::new(),
        seen: HashSet::new(),
    };
    for sample in rhs {
        grouper.add(sample, Side::Right);
    }
    for sample in lhs {
        grouper.add(sample, Side::Left);
    }
    let num_groups = grouper.seen.len();
    let mut groups = grouper.groups;

    for group in &mut groups {
        if op.is_set_operator() {
            compute_set_op(op, group);
            continue;
        }

        if let Some(err) = check_cardinality(group, matching.card) {
            tracing::warn!(?err, group = ?group.group_labels, "vector matching error");
            group.error = Some(err);
            continue;
        }

        let mut results = Vec::with_capacity(group.lhs.len() * group.rhs.len());
        for (many_idx, many) in group.lhs.iter().enumerate() {
            for one in &group.rhs {
                let (mv, ov) = (many.value.value(), one.value.value());
                // Operands keep their original order for the computation.
                let (vl, vr) = if swapped { (ov, mv) } else { (mv, ov) };
                let (mut value, keep) = vector_elem_bin_op(op, vl, vr);
                if return_bool {
                    value = if keep { 1.0 } else { 0.0 };
                }
                let metric = result_metric(&many.metric, &one.metric, op, matching, return_bool);
                results.push(MatchResult {
                    sample: InstantSample::new(metric, many.value.timestamp(), value),
                    many_side_idx: many_idx,
                    filtered: !keep && !return_bool,
                });
            }
        }
        group.result = results;
    }

    if swapped {
        for group in &mut groups {
            std::mem::swap(&mut group.lhs, &mut group.rhs);
            std::mem::swap(&mut group.lhs_count, &mut group.rhs_count);
        }
    }

    tracing::debug!(
        op = op.as_str(),
        num_groups,
        shown_groups = groups.len(),
        "computed vector-vector binary operation"
    );

    BinOpResult { groups, num_groups }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promql::types::labels;

    const TS: f64 = 1_700_000_000.0;

    fn sample(pairs: &[(&str, &str)], value: f64) -> InstantSample {
        InstantSample::new(labels(pairs.iter().copied()), TS, value)
    }

    fn on(names: &[&str], card: VectorMatchCardinality, include: &[&str]) -> VectorMatching {
        VectorMatching {
            on: true,
            labels: names.iter().map(|s| s.to_string()).collect(),
            card,
            include: include.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn values(result: &BinOpResult) -> Vec<(Labels, f64)> {
        result
            .samples()
            .into_iter()
            .map(|s| {
                let v = s.value.value();
                (s.metric, v)
            })
            .collect()
    }

    #[test]
    fn test_one_to_one_division() {
        let lhs = vec![sample(&[("instance", "a")], 1.0), sample(&[("instance", "b")], 2.0)];
        let rhs = vec![sample(&[("instance", "a")], 10.0), sample(&[("instance", "b")], 20.0)];
        let matching = on(&["instance"], VectorMatchCardinality::OneToOne, &[]);

        let result = compute_vector_vector_bin_op(BinaryOperator::Div, &matching, false, &lhs, &rhs, &BinOpLimits::unlimited());
        assert_eq!(result.num_groups, 2);
        assert!(!result.has_errors());
        assert_eq!(
            values(&result),
            vec![(labels([("instance", "a")]), 0.1), (labels([("instance", "b")]), 0.1)]
        );
    }

    #[test]
    fn test_one_to_one_duplicate_is_per_group() {
        let lhs = vec![sample(&[("instance", "a")], 1.0), sample(&[("instance", "b")], 2.0)];
        let rhs = vec![
            sample(&[("instance", "a"), ("job", "x")], 10.0),
            sample(&[("instance", "a"), ("job", "y")], 11.0),
            sample(&[("instance", "b")], 20.0),
        ];
        let matching = on(&["instance"], VectorMatchCardinality::OneToOne, &[]);

        let result = compute_vector_vector_bin_op(BinaryOperator::Div, &matching, false, &lhs, &rhs, &BinOpLimits::unlimited());
        let group_a = &result.groups[0];
        assert_eq!(group_a.group_labels, labels([("instance", "a")]));
        assert_eq!(
            group_a.error,
            Some(VectorMatchError::MultipleMatchesForOneToOneMatching { dupe_side: Side::Right })
        );
        assert!(group_a.result.is_empty());

        let group_b = &result.groups[1];
        assert_eq!(group_b.error, None);
        assert_eq!(values(&result), vec![(labels([("instance", "b")]), 0.1)]);
    }

    #[test]
    fn test_one_to_one_duplicates_on_both_sides() {
        let lhs = vec![sample(&[("job", "x"), ("i", "1")], 1.0), sample(&[("job", "x"), ("i", "2")], 1.0)];
        let rhs = vec![sample(&[("job", "x"), ("i", "3")], 1.0), sample(&[("job", "x"), ("i", "4")], 1.0)];
        let matching = on(&["job"], VectorMatchCardinality::OneToOne, &[]);

        let result = compute_vector_vector_bin_op(BinaryOperator::Add, &matching, false, &lhs, &rhs, &BinOpLimits::unlimited());
        assert_eq!(result.groups[0].error, Some(VectorMatchError::MultipleMatchesOnBothSides));
        assert!(result.samples().is_empty());
    }

    #[test]
    fn test_error_serialization() {
        let err = VectorMatchError::MultipleMatchesForOneToOneMatching { dupe_side: Side::Left };
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            serde_json::json!({"type": "multipleMatchesForOneToOneMatching", "dupeSide": "left"})
        );
    }

    #[test]
    fn test_comparison_filter_and_bool() {
        let lhs = vec![
            sample(&[("__name__", "a"), ("instance", "x")], 5.0),
            sample(&[("__name__", "a"), ("instance", "y")], 1.0),
        ];
        let rhs = vec![
            sample(&[("__name__", "b"), ("instance", "x")], 3.0),
            sample(&[("__name__", "b"), ("instance", "y")], 3.0),
        ];
        let matching = VectorMatching::for_operator(BinaryOperator::Gtr);

        let filtered = compute_vector_vector_bin_op(BinaryOperator::Gtr, &matching, false, &lhs, &rhs, &BinOpLimits::unlimited());
        assert_eq!(
            values(&filtered),
            vec![(labels([("__name__", "a"), ("instance", "x")]), 5.0)]
        );
        assert!(filtered.groups[1].result[0].filtered);

        let with_bool = compute_vector_vector_bin_op(BinaryOperator::Gtr, &matching, true, &lhs, &rhs, &BinOpLimits::unlimited());
        assert_eq!(
            values(&with_bool),
            vec![(labels([("instance", "x")]), 1.0), (labels([("instance", "y")]), 0.0)]
        );
    }

    #[test]
    fn test_group_left_include() {
        let lhs = vec![
            sample(&[("__name__", "cpu"), ("instance", "a"), ("cpu", "0")], 2.0),
            sample(&[("__name__", "cpu"), ("instance", "a"), ("cpu", "1")], 4.0),
            sample(&[("__name__", "cpu"), ("instance", "c"), ("cpu", "0")], 4.0),
        ];
        let rhs = vec![sample(&[("__name__", "info"), ("instance", "a"), ("version", "1.0")], 1.0)];
        let matching = on(&["instance"], VectorMatchCardinality::ManyToOne, &["version"]);

        let result = compute_vector_vector_bin_op(BinaryOperator::Mul, &matching, false, &lhs, &rhs, &BinOpLimits::unlimited());
        assert!(!result.has_errors());
        assert_eq!(
            values(&result),
            vec![
                (labels([("instance", "a"), ("cpu", "0"), ("version", "1.0")]), 2.0),
                (labels([("instance", "a"), ("cpu", "1"), ("version", "1.0")]), 4.0),
            ]
        );
        // instance="c" has nothing on the one side: dropped, not an error.
        let unmatched = &result.groups[1];
        assert_eq!(unmatched.lhs_count, 1);
        assert_eq!(unmatched.rhs_count, 0);
        assert!(unmatched.result.is_empty());
        assert!(unmatched.error.is_none());
    }

    #[test]
    fn test_group_left_duplicate_one_side() {
        let lhs = vec![sample(&[("instance", "a"), ("cpu", "0")], 2.0)];
        let rhs = vec![
            sample(&[("instance", "a"), ("version", "1")], 1.0),
            sample(&[("instance", "a"), ("version", "2")], 1.0),
        ];
        let matching = on(&["instance"], VectorMatchCardinality::ManyToOne, &[]);
        let result = compute_vector_vector_bin_op(BinaryOperator::Mul, &matching, false, &lhs, &rhs, &BinOpLimits::unlimited());
        assert_eq!(result.groups[0].error, Some(VectorMatchError::MultipleMatchesOnOneSide));
    }

    #[test]
    fn test_group_right_keeps_operand_order() {
        let lhs = vec![sample(&[("instance", "a")], 10.0)];
        let rhs = vec![
            sample(&[("instance", "a"), ("cpu", "0")], 1.0),
            sample(&[("instance", "a"), ("cpu", "1")], 2.0),
        ];
        let matching = on(&["instance"], VectorMatchCardinality::OneToMany, &[]);

        let result = compute_vector_vector_bin_op(BinaryOperator::Sub, &matching, false, &lhs, &rhs, &BinOpLimits::unlimited());
        let group = &result.groups[0];
        assert_eq!(group.lhs_count, 1);
        assert_eq!(group.rhs_count, 2);
        assert_eq!(group.lhs, lhs);
        assert_eq!(
            values(&result),
            vec![
                (labels([("instance", "a"), ("cpu", "0")]), 9.0),
                (labels([("instance", "a"), ("cpu", "1")]), 8.0),
            ]
        );
    }

    #[test]
    fn test_ignoring_excludes_metric_name() {
        let lhs = vec![sample(&[("__name__", "a"), ("job", "x"), ("mode", "idle")], 6.0)];
        let rhs = vec![sample(&[("__name__", "b"), ("job", "x")], 3.0)];
        let matching = VectorMatching {
            on: false,
            labels: vec!["mode".to_string()],
            card: VectorMatchCardinality::OneToOne,
            include: vec![],
        };
        let result = compute_vector_vector_bin_op(BinaryOperator::Div, &matching, false, &lhs, &rhs, &BinOpLimits::unlimited());
        assert_eq!(values(&result), vec![(labels([("job", "x")]), 2.0)]);
        assert_eq!(result.groups[0].group_labels, labels([("job", "x")]));
    }

    #[test]
    fn test_ignoring_signature_uses_values_only() {
        let matching = VectorMatching::for_operator(BinaryOperator::Add);
        assert_eq!(
            signature(&labels([("a", "x")]), &matching),
            signature(&labels([("b", "x")]), &matching)
        );
        assert_ne!(
            signature(&labels([("a", "x")]), &matching),
            signature(&labels([("a", "y")]), &matching)
        );
    }

    #[test]
    fn test_set_operators() {
        let lhs = vec![sample(&[("job", "a")], 1.0), sample(&[("job", "b")], 2.0)];
        let rhs = vec![sample(&[("job", "b")], 20.0), sample(&[("job", "c")], 30.0)];
        let m = |op| VectorMatching::for_operator(op);
        let run = |op| compute_vector_vector_bin_op(op, &m(op), false, &lhs, &rhs, &BinOpLimits::unlimited());

        assert_eq!(values(&run(BinaryOperator::And)), vec![(labels([("job", "b")]), 2.0)]);
        assert_eq!(values(&run(BinaryOperator::Unless)), vec![(labels([("job", "a")]), 1.0)]);

        let mut or = values(&run(BinaryOperator::Or));
        or.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            or,
            vec![
                (labels([("job", "a")]), 1.0),
                (labels([("job", "b")]), 2.0),
                (labels([("job", "c")]), 30.0),
            ]
        );
    }

    #[test]
    fn test_limits() {
        let lhs: Vec<InstantSample> = ["a", "a", "a", "b"]
            .iter()
            .enumerate()
            .map(|(i, job)| sample(&[("job", *job), ("i", &i.to_string())], 1.0))
            .collect();
        let rhs = vec![sample(&[("job", "a")], 1.0), sample(&[("job", "b")], 1.0)];
        let matching = on(&["job"], VectorMatchCardinality::ManyToOne, &[]);

        let result = compute_vector_vector_bin_op(BinaryOperator::Add, &matching, false, &lhs, &rhs, &BinOpLimits::new(1, 2));
        assert_eq!(result.num_groups, 2);
        assert_eq!(result.groups.len(), 1);
        assert_eq!(result.groups[0].lhs.len(), 2);
        assert_eq!(result.groups[0].lhs_count, 3);
        assert_eq!(result.groups[0].result.len(), 2);

        let all = compute_vector_vector_bin_op(BinaryOperator::Add, &matching, false, &lhs, &rhs, &BinOpLimits::unlimited());
        assert_eq!(all.groups.len(), 2);
        assert_eq!(all.samples().len(), 4);
    }

    #[test]
    fn test_scalar_scalar() {
        assert_eq!(scalar_bin_op(BinaryOperator::Gtr, 5.0, 3.0), 1.0);
        assert_eq!(scalar_bin_op(BinaryOperator::Gtr, 2.0, 3.0), 0.0);
        assert_eq!(scalar_bin_op(BinaryOperator::Div, 1.0, 0.0), f64::INFINITY);
        assert_eq!(scalar_bin_op(BinaryOperator::Div, -1.0, 0.0), f64::NEG_INFINITY);
        assert!(scalar_bin_op(BinaryOperator::Div, 0.0, 0.0).is_nan());
        assert_eq!(scalar_bin_op(BinaryOperator::Mod, -7.0, 3.0), -1.0);
        assert_eq!(scalar_bin_op(BinaryOperator::Pow, 2.0, 10.0), 1024.0);
    }

    #[test]
    fn test_vector_scalar() {
        let vector = vec![
            sample(&[("__name__", "x"), ("job", "a")], 10.0),
            sample(&[("__name__", "x"), ("job", "b")], 1.0),
        ];

        let gtr = compute_vector_scalar_bin_op(BinaryOperator::Gtr, false, &vector, 5.0, false);
        assert_eq!(gtr.iter().map(|r| r.kept).collect::<Vec<_>>(), vec![true, false]);
        assert_eq!(gtr[0].output, vector[0]);

        // 5 < x keeps the vector value, not the scalar.
        let lss = compute_vector_scalar_bin_op(BinaryOperator::Lss, false, &vector, 5.0, true);
        assert!(lss[0].kept);
        assert_eq!(lss[0].output.value.value(), 10.0);

        let with_bool = compute_vector_scalar_bin_op(BinaryOperator::Gtr, true, &vector, 5.0, false);
        assert!(with_bool.iter().all(|r| r.kept));
        assert_eq!(with_bool[1].output, sample(&[("job", "b")], 0.0));

        let mul = compute_vector_scalar_bin_op(BinaryOperator::Mul, false, &vector, 2.0, false);
        assert_eq!(mul[0].output, sample(&[("job", "a")], 20.0));
    }
}
