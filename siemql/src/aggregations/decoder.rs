//! Flattening of nested bucket aggregations into tabular rows
//!
//! A two-level `terms` response such as
//!
//! ```json
//! {"host": {"buckets": [
//!     {"key": "h1", "doc_count": 5, "gen": {"buckets": [
//!         {"key": "g1", "doc_count": 3},
//!         {"key": "g2", "doc_count": 2}
//!     ]}}
//! ]}}
//! ```
//!
//! flattens to `{host: h1, gen: g1, count: 3}` and `{host: h1, gen: g2, count: 2}`:
//! one row per leaf combination, each carrying the leaf's document count.

use serde::Serialize;
use serde_json::{Map, Value};

/// Bucket keys that are never nested aggregations
const BUCKET_META_KEYS: &[&str] = &["key", "key_as_string", "doc_count"];

/// Output key holding the document count
pub const COUNT_KEY: &str = "count";

/// One decoded row: alias values plus exactly one document count
///
/// Serializes as its [`FlatRow::into_map`] form, so an alias named `count`
/// never appears next to the document count.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "Map<String, Value>")]
pub struct FlatRow {
    pub values: Map<String, Value>,
    pub count: u64,
}

impl FlatRow {
    fn leaf(alias: &str, key: Value, count: u64) -> Self {
        let mut values = Map::new();
        values.insert(alias.to_string(), key);
        Self { values, count }
    }

    pub fn get(&self, alias: &str) -> Option<&Value> {
        self.values.get(alias)
    }

    /// Render as a single mapping with the count under [`COUNT_KEY`]
    pub fn into_map(self) -> Map<String, Value> {
        let mut map = self.values;
        map.insert(COUNT_KEY.to_string(), Value::from(self.count));
        map
    }
}

impl From<FlatRow> for Map<String, Value> {
    fn from(row: FlatRow) -> Self {
        row.into_map()
    }
}

/// Flatten every named bucket aggregation in `aggregations`, depth first
pub fn flatten(aggregations: &Map<String, Value>) -> Vec<FlatRow> {
    aggregations
        .iter()
        .flat_map(|(name, agg)| flatten_named(name, agg))
        .collect()
}

fn flatten_named(name: &str, agg: &Value) -> Vec<FlatRow> {
    let Some(buckets) = agg.get("buckets").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut rows = Vec::new();
    for bucket in buckets {
        let Some(bucket) = bucket.as_object() else {
            continue;
        };
        let key = bucket.get("key").cloned().unwrap_or(Value::Null);
        let doc_count = bucket.get("doc_count").and_then(Value::as_u64).unwrap_or(0);

        let sub_rows: Vec<FlatRow> = bucket
            .iter()
            .filter(|(k, v)| !BUCKET_META_KEYS.contains(&k.as_str()) && v.is_object())
            .flat_map(|(k, v)| flatten_named(k, v))
            .collect();

        if sub_rows.is_empty() {
            rows.push(FlatRow::leaf(name, key, doc_count));
            continue;
        }

        // Deeper levels already own the count; only the key is added here.
        rows.extend(sub_rows.into_iter().map(|mut row| {
            row.values.insert(name.to_string(), key.clone());
            row
        }));
    }
    rows
}

/// Seed every requested alias with `null` and merge decoded rows on top
///
/// The backend omits fields whose bucket value is null, so the seeded schema
/// keeps rows rectangular. No rows at all yields a single empty mapping,
/// distinguishing "zero groups" from "nothing requested".
pub fn with_base_schema(rows: Vec<FlatRow>, aliases: &[&str]) -> Vec<Map<String, Value>> {
    if rows.is_empty() {
        return vec![Map::new()];
    }

    let base: Map<String, Value> = aliases
        .iter()
        .map(|alias| (alias.to_string(), Value::Null))
        .collect();

    rows.into_iter()
        .map(|row| {
            let mut merged = base.clone();
            merged.extend(row.into_map());
            merged
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {}", other),
        }
    }

    #[test]
    fn test_flatten_single_level() {
        let aggs = as_map(json!({
            "b": {
                "doc_count_error_upper_bound": 0,
                "sum_other_doc_count": 0,
                "buckets": [
                    {"key": "v1", "doc_count": 3},
                    {"key": "v2", "doc_count": 5}
                ]
            }
        }));

        let rows: Vec<_> = flatten(&aggs).into_iter().map(FlatRow::into_map).collect();
        assert_eq!(
            rows,
            vec![
                as_map(json!({"b": "v1", "count": 3})),
                as_map(json!({"b": "v2", "count": 5})),
            ]
        );
    }

    #[test]
    fn test_flatten_nested_keeps_leaf_counts() {
        let aggs = as_map(json!({
            "host": {"buckets": [
                {"key": "h1", "doc_count": 5, "gen": {"buckets": [
                    {"key": "g1", "doc_count": 3},
                    {"key": "g2", "doc_count": 2}
                ]}},
                {"key": "h2", "doc_count": 7, "gen": {"buckets": [
                    {"key": "g1", "doc_count": 7}
                ]}}
            ]}
        }));

        let rows = flatten(&aggs);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].get("host"), Some(&json!("h1")));
        assert_eq!(rows[0].get("gen"), Some(&json!("g1")));
        assert_eq!(rows[0].count, 3);
        assert_eq!(rows[1].count, 2);
        assert_eq!(rows[2].get("host"), Some(&json!("h2")));
        assert_eq!(rows[2].count, 7);
    }

    #[test]
    fn test_flatten_bucket_with_empty_sub_aggregation_is_a_leaf() {
        let aggs = as_map(json!({
            "host": {"buckets": [
                {"key": "h1", "doc_count": 4, "gen": {"buckets": []}}
            ]}
        }));
        let rows = flatten(&aggs);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].count, 4);
        assert!(rows[0].get("gen").is_none());
    }

    #[test]
    fn test_flatten_ignores_metric_sub_aggregations() {
        let aggs = as_map(json!({
            "host": {"buckets": [
                {"key": "h1", "key_as_string": "h1", "doc_count": 2, "avg_size": {"value": 10.5}}
            ]},
            "total": {"value": 99}
        }));
        let rows = flatten(&aggs);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].clone().into_map(), as_map(json!({"host": "h1", "count": 2})));
    }

    #[test]
    fn test_flatten_numeric_keys_preserved() {
        let aggs = as_map(json!({
            "port": {"buckets": [{"key": 443, "doc_count": 1}]}
        }));
        assert_eq!(flatten(&aggs)[0].get("port"), Some(&json!(443)));
    }

    #[test]
    fn test_base_schema_fills_missing_aliases() {
        let rows = vec![FlatRow::leaf("a", json!("x"), 2)];
        let merged = with_base_schema(rows, &["a", "b"]);
        assert_eq!(merged, vec![as_map(json!({"a": "x", "b": null, "count": 2}))]);
    }

    #[test]
    fn test_base_schema_sentinel_for_no_rows() {
        assert_eq!(with_base_schema(Vec::new(), &["a"]), vec![Map::new()]);
    }

    #[test]
    fn test_flat_row_serializes_flat() {
        let row = FlatRow::leaf("a", json!("x"), 2);
        assert_eq!(serde_json::to_value(&row).unwrap(), json!({"a": "x", "count": 2}));
    }

    #[test]
    fn test_count_alias_serializes_once() {
        let row = FlatRow::leaf(COUNT_KEY, json!("x"), 7);
        let text = serde_json::to_string(&row).unwrap();
        assert_eq!(text.matches("\"count\"").count(), 1);
        assert_eq!(serde_json::to_value(&row).unwrap(), json!({"count": 7}));
        assert_eq!(serde_json::to_value(&row).unwrap(), Value::Object(row.into_map()));
    }
}
