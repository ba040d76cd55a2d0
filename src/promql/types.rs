use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ═══════════════════════════════════════════════════════════════════
// Prometheus query result types (as returned by /api/v1/query*)
// ═══════════════════════════════════════════════════════════════════

/// A label set. Ordered so that signatures and output are deterministic.
pub type Labels = BTreeMap<String, String>;

/// A `[unixSeconds, "value"]` pair. Values stay strings on the wire so that
/// `+Inf`, `-Inf` and `NaN` survive JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleValue(pub f64, pub String);

impl SampleValue {
    pub fn timestamp(&self) -> f64 {
        self.0
    }

    pub fn value(&self) -> f64 {
        super::duration::parse_prometheus_float(&self.1)
    }
}

/// A single labeled sample of an instant vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstantSample {
    pub metric: Labels,
    pub value: SampleValue,
}

impl InstantSample {
    pub fn new(metric: Labels, timestamp: f64, value: f64) -> Self {
        Self {
            metric,
            value: SampleValue(timestamp, super::duration::format_prometheus_float(value)),
        }
    }
}

/// A labeled series of samples from a range vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeSamples {
    pub metric: Labels,
    pub values: Vec<SampleValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
pub enum QueryResult {
    Vector(Vec<InstantSample>),
    Matrix(Vec<RangeSamples>),
    Scalar(SampleValue),
    String(SampleValue),
}

impl QueryResult {
    pub fn value_type(&self) -> super::ast::ValueType {
        use super::ast::ValueType;
        match self {
            QueryResult::Vector(_) => ValueType::Vector,
            QueryResult::Matrix(_) => ValueType::Matrix,
            QueryResult::Scalar(_) => ValueType::Scalar,
            QueryResult::String(_) => ValueType::String,
        }
    }

    pub fn num_series(&self) -> usize {
        match self {
            QueryResult::Vector(v) => v.len(),
            QueryResult::Matrix(m) => m.len(),
            QueryResult::Scalar(_) | QueryResult::String(_) => 1,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Per-node result summary (drives tree view badges and annotations)
// ═══════════════════════════════════════════════════════════════════

const MAX_LABEL_EXAMPLES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelExample {
    pub value: String,
    pub count: usize,
}

/// Summary of the result of querying a single tree node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeQueryResult {
    pub num_series: usize,
    /// Query duration in milliseconds.
    pub query_time: u64,
    pub label_cardinalities: BTreeMap<String, usize>,
    pub label_examples: BTreeMap<String, Vec<LabelExample>>,
}

/// Summarize a set of series label sets: series count, per-label value
/// cardinalities and the most frequent example values per label.
pub fn summarize_series<'a>(
    metrics: impl IntoIterator<Item = &'a Labels>,
    query_time: u64,
) -> NodeQueryResult {
    let mut num_series = 0;
    let mut values: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();

    for metric in metrics {
        num_series += 1;
        for (name, value) in metric {
            *values
                .entry(name.clone())
                .or_default()
                .entry(value.clone())
                .or_default() += 1;
        }
    }

    let mut label_cardinalities = BTreeMap::new();
    let mut label_examples = BTreeMap::new();
    for (name, counts) in values {
        label_cardinalities.insert(name.clone(), counts.len());

        let mut examples: Vec<LabelExample> = counts
            .into_iter()
            .map(|(value, count)| LabelExample { value, count })
            .collect();
        // Most frequent first; ties keep lexical value order.
        examples.sort_by(|a, b| b.count.cmp(&a.count));
        examples.truncate(MAX_LABEL_EXAMPLES);
        label_examples.insert(name, examples);
    }

    NodeQueryResult {
        num_series,
        query_time,
        label_cardinalities,
        label_examples,
    }
}

/// Summarize a query result of any type.
pub fn summarize_result(result: &QueryResult, query_time: u64) -> NodeQueryResult {
    match result {
        QueryResult::Vector(samples) => summarize_series(samples.iter().map(|s| &s.metric), query_time),
        QueryResult::Matrix(series) => summarize_series(series.iter().map(|s| &s.metric), query_time),
        QueryResult::Scalar(_) | QueryResult::String(_) => NodeQueryResult {
            num_series: 1,
            query_time,
            ..Default::default()
        },
    }
}

/// Build a label set from `(name, value)` pairs.
pub fn labels<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Labels {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
