//! Builders for search query and aggregation bodies.
//!
//! Each helper returns one JSON fragment; callers compose them.

use serde::Serialize;
use serde_json::{json, Map, Value};

/* ---------------- query clauses ---------------- */

/// Half-open range `[gte, lt)`.
pub fn range<V: Serialize>(field: &str, gte: V, lt: V) -> Value {
    json!({ "range": { field: { "gte": gte, "lt": lt } } })
}

pub fn range_gt<V: Serialize>(field: &str, v: V) -> Value {
    json!({ "range": { field: { "gt": v } } })
}

pub fn range_lte<V: Serialize>(field: &str, v: V) -> Value {
    json!({ "range": { field: { "lte": v } } })
}

pub fn term<V: Serialize>(field: &str, v: V) -> Value {
    json!({ "term": { field: { "value": v } } })
}

pub fn terms<V: Serialize>(field: &str, vs: &[V]) -> Value {
    json!({ "terms": { field: vs } })
}

pub fn wildcard(field: &str, pattern: &str) -> Value {
    json!({ "wildcard": { field: { "value": pattern } } })
}

pub fn exists(field: &str) -> Value {
    json!({ "exists": { "field": field } })
}

pub fn script_filter(src: &str) -> Value {
    json!({ "script": { "script": { "lang": "painless", "source": src } } })
}

/// `bool` query with `filter` clauses and optional `must_not` clauses.
pub fn bool_filter(filters: Vec<Value>, must_not: Vec<Value>) -> Value {
    let mut b = Map::new();
    b.insert("filter".into(), Value::Array(filters));
    if !must_not.is_empty() {
        b.insert("must_not".into(), Value::Array(must_not));
    }
    json!({ "bool": b })
}

/// `bool` query whose clauses must all match.
pub fn bool_must(clauses: Vec<Value>) -> Value {
    json!({ "bool": { "must": clauses } })
}

/// `bool` query with at least one matching clause.
pub fn bool_should(clauses: Vec<Value>) -> Value {
    json!({ "bool": { "should": clauses, "minimum_should_match": 1 } })
}

/// Top-level search body. `size` is omitted when `None`.
pub fn search_body(query: Value, size: Option<usize>) -> Value {
    let mut body = Map::new();
    body.insert("query".into(), query);
    if let Some(n) = size {
        body.insert("size".into(), json!(n));
    }
    Value::Object(body)
}

/* ---------------- aggregations ---------------- */

pub fn terms_agg(field: &str, size: usize) -> Value {
    json!({ "terms": { "field": field, "size": size } })
}

/// Single-value metric such as `sum`, `avg`, `max`, `cardinality`, `value_count`.
pub fn metric(kind: &str, field: &str) -> Value {
    json!({ kind: { "field": field } })
}

pub fn filter_agg(q: Value) -> Value {
    json!({ "filter": q })
}

/// `bucket_script` over named bucket paths (`params.<name>` in `script`).
pub fn bucket_script(paths: &[(&str, &str)], script: &str) -> Value {
    let bp: Map<String, Value> =
        paths.iter().map(|(k, v)| ((*k).to_string(), Value::String((*v).to_string()))).collect();
    json!({ "bucket_script": { "buckets_path": bp, "script": script } })
}

pub fn percentiles(field: &str, percents: &[f64]) -> Value {
    json!({ "percentiles": { "field": field, "percents": percents } })
}

/// Attach sub-aggregations to a bucket aggregation.
pub fn with_sub_aggs(mut agg: Value, subs: Map<String, Value>) -> Value {
    if let Some(obj) = agg.as_object_mut() {
        obj.insert("aggs".into(), Value::Object(subs));
    }
    agg
}

/// One painless runtime field definition, keyed by `name`.
pub fn runtime_field(name: &str, kind: &str, painless_src: &str) -> (String, Value) {
    (
        name.to_string(),
        json!({ "type": kind, "script": { "language": "painless", "source": painless_src } }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;

    #[test]
    fn record_time_range() {
        assert_json_eq!(
            range("RecordTime", 100, 200),
            json!({"range": {"RecordTime": {"gte": 100, "lt": 200}}})
        );
        assert_json_eq!(range_gt("CommittedTime", 10800), json!({"range": {"CommittedTime": {"gt": 10800}}}));
        assert_json_eq!(range_lte("x", 60), json!({"range": {"x": {"lte": 60}}}));
    }

    #[test]
    fn bool_filter_omits_empty_must_not() {
        let q = bool_filter(vec![term("JobUniverse", 5)], vec![]);
        assert_json_eq!(q, json!({"bool": {"filter": [{"term": {"JobUniverse": {"value": 5}}}]}}));

        let q = bool_filter(vec![exists("a")], vec![terms("JobUniverse", &[7, 12])]);
        assert_json_eq!(
            q,
            json!({"bool": {
                "filter": [{"exists": {"field": "a"}}],
                "must_not": [{"terms": {"JobUniverse": [7, 12]}}]
            }})
        );
    }

    #[test]
    fn search_body_size() {
        assert_json_eq!(search_body(json!({"match_all": {}}), Some(0)), json!({"query": {"match_all": {}}, "size": 0}));
        assert_json_eq!(search_body(json!({"match_all": {}}), None), json!({"query": {"match_all": {}}}));
    }

    #[test]
    fn aggregation_shapes() {
        assert_json_eq!(metric("sum", "NumJobStarts"), json!({"sum": {"field": "NumJobStarts"}}));
        assert_json_eq!(
            bucket_script(&[("a", "held._count"), ("b", "total_jobs")], "params.a / params.b * 100"),
            json!({"bucket_script": {
                "buckets_path": {"a": "held._count", "b": "total_jobs"},
                "script": "params.a / params.b * 100"
            }})
        );
        let mut subs = Map::new();
        subs.insert("n".into(), metric("value_count", "GlobalJobId.keyword"));
        assert_json_eq!(
            with_sub_aggs(terms_agg("ProjectName.keyword", 1024), subs),
            json!({"terms": {"field": "ProjectName.keyword", "size": 1024},
                   "aggs": {"n": {"value_count": {"field": "GlobalJobId.keyword"}}}})
        );
        assert_json_eq!(
            percentiles("CpuCoreHours", &[25.0, 50.0]),
            json!({"percentiles": {"field": "CpuCoreHours", "percents": [25.0, 50.0]}})
        );
    }

    #[test]
    fn runtime_field_shape() {
        let (name, def) = runtime_field("numHolds", "long", "emit(1)");
        assert_eq!(name, "numHolds");
        assert_json_eq!(def, json!({"type": "long", "script": {"language": "painless", "source": "emit(1)"}}));
    }
}
