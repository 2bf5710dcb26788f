//! Search response model and partial-failure validation

use crate::dialect::{Dialect, TotalHitsShape};
use crate::error::PartialResultWarning;
use crate::metrics;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lenient view of a backend search response; every section is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub took: Option<u64>,
    #[serde(
        default,
        deserialize_with = "deserialize_error",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<ErrorBody>,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default, rename = "_shards", skip_serializing_if = "Option::is_none")]
    pub shards: Option<ShardStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hits: Option<HitsSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregations: Option<Map<String, Value>>,
    /// Cursor of an open scroll, present on scrolled searches
    #[serde(default, rename = "_scroll_id", skip_serializing_if = "Option::is_none")]
    pub scroll_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub root_cause: Option<Vec<RootCause>>,
    #[serde(default, rename = "type")]
    pub error_type: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RootCause {
    #[serde(default, rename = "type")]
    pub error_type: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardStats {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub successful: u64,
    #[serde(default)]
    pub skipped: u64,
    #[serde(default)]
    pub failed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HitsSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<TotalHits>,
    #[serde(default)]
    pub hits: Vec<Value>,
}

impl ErrorBody {
    /// Top-level type followed by every root-cause type
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.error_type.as_deref().into_iter().chain(
            self.root_cause
                .iter()
                .flatten()
                .filter_map(|c| c.error_type.as_deref()),
        )
    }
}

/// Legacy stores report errors as a bare message string
fn deserialize_error<'de, D>(deserializer: D) -> Result<Option<ErrorBody>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Body(ErrorBody),
        Message(String),
    }

    Ok(Option::<Repr>::deserialize(deserializer)?.map(|repr| match repr {
        Repr::Body(body) => body,
        Repr::Message(message) => ErrorBody {
            reason: Some(message),
            ..Default::default()
        },
    }))
}

/// `hits.total`: a bare number (legacy) or `{value, relation}` (modern)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TotalHits {
    Scalar(u64),
    Object {
        value: u64,
        #[serde(default)]
        relation: Option<String>,
    },
}

impl TotalHits {
    pub fn value(&self) -> u64 {
        match self {
            TotalHits::Scalar(v) => *v,
            TotalHits::Object { value, .. } => *value,
        }
    }

    pub fn shape(&self) -> TotalHitsShape {
        match self {
            TotalHits::Scalar(_) => TotalHitsShape::Scalar,
            TotalHits::Object { .. } => TotalHitsShape::Object,
        }
    }
}

impl SearchResponse {
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    /// Server-reported total hit count, if present
    pub fn total_hits(&self) -> Option<u64> {
        self.hits.as_ref()?.total.as_ref().map(TotalHits::value)
    }

    pub fn into_hits(self) -> Vec<Value> {
        self.hits.map(|h| h.hits).unwrap_or_default()
    }
}

/// Outcome of [`ResponseValidator::check`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub warnings: Vec<PartialResultWarning>,
    /// Set when the response carried a top-level error and its aggregations
    /// were cleared; callers should return an empty result
    pub invalidated: bool,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty() && !self.invalidated
    }
}

/// Inspects responses for total or partial failure
pub struct ResponseValidator;

impl ResponseValidator {
    /// Log and report failures; a top-level error clears the aggregations
    pub fn check(response: &mut SearchResponse) -> ValidationReport {
        let mut report = ValidationReport::default();

        if let Some(causes) = response.error.as_ref().and_then(|e| e.root_cause.as_ref()) {
            let types: Vec<String> = causes
                .iter()
                .map(|c| c.error_type.clone().unwrap_or_else(|| "unknown".to_string()))
                .collect();
            tracing::error!("Storage returned errors: {}", types.join(","));
            metrics::record_partial_result("backend_error");

            response.aggregations = None;
            report.invalidated = true;
            report.warnings.push(PartialResultWarning::BackendErrors(types));
            return report;
        }

        if response.timed_out {
            tracing::warn!("Storage timed out for some shards, some data has been lost");
            metrics::record_partial_result("timed_out");
            report.warnings.push(PartialResultWarning::TimedOut);
        }

        let failed = response.shards.as_ref().map(|s| s.failed).unwrap_or(0);
        if failed != 0 {
            tracing::warn!(
                "Storage returned {} failed shards, some data has been lost",
                failed
            );
            metrics::record_partial_result("shard_failure");
            report
                .warnings
                .push(PartialResultWarning::ShardFailures { failed });
        }

        if let Some(aggs) = &response.aggregations {
            for (name, agg) in aggs {
                Self::check_undercount(name, agg, &mut report.warnings);
            }
        }

        report
    }

    fn check_undercount(name: &str, agg: &Value, warnings: &mut Vec<PartialResultWarning>) {
        // The store reports -1 when it cannot bound the error
        let counter = |key: &str| agg.get(key).and_then(Value::as_i64).unwrap_or(0);
        let doc_count_error_upper_bound = counter("doc_count_error_upper_bound");
        let sum_other_doc_count = counter("sum_other_doc_count");

        if doc_count_error_upper_bound != 0 || sum_other_doc_count != 0 {
            tracing::warn!(
                "Aggregation '{}' returned doc count error (bound {}, other {}), some data has been lost",
                name,
                doc_count_error_upper_bound,
                sum_other_doc_count
            );
            metrics::record_partial_result("bucket_undercount");
            warnings.push(PartialResultWarning::BucketUndercount {
                aggregation: name.to_string(),
                doc_count_error_upper_bound,
                sum_other_doc_count,
            });
        }

        let buckets = agg.get("buckets").and_then(Value::as_array);
        for bucket in buckets.into_iter().flatten().filter_map(Value::as_object) {
            for (sub_name, sub_agg) in bucket {
                if sub_agg.get("buckets").is_some() {
                    Self::check_undercount(sub_name, sub_agg, warnings);
                }
            }
        }
    }

    /// True when the response reports zero hits
    ///
    /// An absent response (or one without a `hits` section) is empty too, but
    /// is logged as an error since it is not a legitimate zero-hit result.
    /// A total in the other dialect's shape is still read for its value and
    /// logged as a warning.
    pub fn is_empty(response: Option<&SearchResponse>, dialect: Dialect) -> bool {
        let Some(response) = response else {
            tracing::error!("Storage returned empty response");
            return true;
        };
        let Some(total) = response.hits.as_ref().and_then(|h| h.total.as_ref()) else {
            tracing::error!("Storage response has no hit totals");
            return true;
        };

        let expected = dialect.profile().total_hits;
        if total.shape() != expected {
            tracing::warn!(
                "Hit total shape {:?} does not match dialect {} (expected {:?})",
                total.shape(),
                dialect,
                expected
            );
        }
        total.value() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> SearchResponse {
        SearchResponse::from_value(value).unwrap()
    }

    #[test]
    fn test_is_empty_per_dialect() {
        let legacy_zero = parse(json!({"hits": {"total": 0, "hits": []}}));
        let legacy_some = parse(json!({"hits": {"total": 3, "hits": []}}));
        assert!(ResponseValidator::is_empty(Some(&legacy_zero), Dialect::Legacy));
        assert!(!ResponseValidator::is_empty(Some(&legacy_some), Dialect::Legacy));

        let modern_zero = parse(json!({"hits": {"total": {"value": 0, "relation": "eq"}}}));
        let modern_some = parse(json!({"hits": {"total": {"value": 12, "relation": "gte"}}}));
        for dialect in [Dialect::Modern, Dialect::ModernRollover] {
            assert!(ResponseValidator::is_empty(Some(&modern_zero), dialect));
            assert!(!ResponseValidator::is_empty(Some(&modern_some), dialect));
        }
    }

    #[test]
    fn test_is_empty_absent_response() {
        assert!(ResponseValidator::is_empty(None, Dialect::Modern));
        assert!(ResponseValidator::is_empty(
            Some(&SearchResponse::default()),
            Dialect::Legacy
        ));
    }

    #[test]
    fn test_root_cause_invalidates() {
        let mut response = parse(json!({
            "error": {
                "root_cause": [
                    {"type": "query_shard_exception", "reason": "bad"},
                    {"type": "parse_exception", "reason": "worse"}
                ],
                "type": "search_phase_execution_exception"
            },
            "aggregations": {"a": {"buckets": []}}
        }));

        let report = ResponseValidator::check(&mut response);
        assert!(report.invalidated);
        assert!(response.aggregations.is_none());
        assert_eq!(
            report.warnings,
            vec![PartialResultWarning::BackendErrors(vec![
                "query_shard_exception".to_string(),
                "parse_exception".to_string()
            ])]
        );
    }

    #[test]
    fn test_timeout_and_shard_failures_are_reported_not_fatal() {
        let mut response = parse(json!({
            "timed_out": true,
            "_shards": {"total": 5, "successful": 3, "skipped": 0, "failed": 2},
            "hits": {"total": {"value": 1}},
            "aggregations": {"a": {"buckets": [{"key": "x", "doc_count": 1}]}}
        }));

        let report = ResponseValidator::check(&mut response);
        assert!(!report.invalidated);
        assert!(response.aggregations.is_some());
        assert_eq!(
            report.warnings,
            vec![
                PartialResultWarning::TimedOut,
                PartialResultWarning::ShardFailures { failed: 2 }
            ]
        );
    }

    #[test]
    fn test_undercount_detected_at_any_depth() {
        let mut response = parse(json!({
            "_shards": {"failed": 0},
            "aggregations": {
                "host": {
                    "doc_count_error_upper_bound": 0,
                    "sum_other_doc_count": 0,
                    "buckets": [{
                        "key": "h1",
                        "doc_count": 10,
                        "gen": {
                            "doc_count_error_upper_bound": 0,
                            "sum_other_doc_count": 4,
                            "buckets": [{"key": "g", "doc_count": 6}]
                        }
                    }]
                }
            }
        }));

        let report = ResponseValidator::check(&mut response);
        assert_eq!(
            report.warnings,
            vec![PartialResultWarning::BucketUndercount {
                aggregation: "gen".to_string(),
                doc_count_error_upper_bound: 0,
                sum_other_doc_count: 4
            }]
        );
    }

    #[test]
    fn test_unknown_error_bound_is_reported() {
        let mut response = parse(json!({
            "aggregations": {
                "host": {
                    "doc_count_error_upper_bound": -1,
                    "sum_other_doc_count": 0,
                    "buckets": [{"key": "h1", "doc_count": 10}]
                }
            }
        }));

        let report = ResponseValidator::check(&mut response);
        assert!(!report.invalidated);
        assert_eq!(
            report.warnings,
            vec![PartialResultWarning::BucketUndercount {
                aggregation: "host".to_string(),
                doc_count_error_upper_bound: -1,
                sum_other_doc_count: 0
            }]
        );
    }

    #[test]
    fn test_mismatched_total_shape_is_still_read() {
        let legacy_object = parse(json!({"hits": {"total": {"value": 4, "relation": "eq"}}}));
        let modern_scalar = parse(json!({"hits": {"total": 0}}));
        assert!(!ResponseValidator::is_empty(Some(&legacy_object), Dialect::Legacy));
        assert!(ResponseValidator::is_empty(Some(&modern_scalar), Dialect::Modern));
    }

    #[test]
    fn test_scroll_id_parses() {
        let response = parse(json!({"_scroll_id": "c2Nhbjs2", "hits": {"total": 0, "hits": []}}));
        assert_eq!(response.scroll_id.as_deref(), Some("c2Nhbjs2"));
        assert!(parse(json!({})).scroll_id.is_none());
    }

    #[test]
    fn test_legacy_string_error_parses() {
        let response = parse(json!({"error": "IndexMissingException[[x] missing]", "status": 404}));
        let error = response.error.unwrap();
        assert_eq!(error.reason.as_deref(), Some("IndexMissingException[[x] missing]"));
        assert!(error.root_cause.is_none());
    }

    #[test]
    fn test_error_types() {
        let response = parse(json!({"error": {
            "type": "index_not_found_exception",
            "root_cause": [{"type": "a"}, {"reason": "no type"}]
        }}));
        let error = response.error.unwrap();
        assert_eq!(error.types().collect::<Vec<_>>(), vec!["index_not_found_exception", "a"]);
    }

    #[test]
    fn test_clean_response() {
        let mut response = parse(json!({
            "timed_out": false,
            "_shards": {"total": 1, "successful": 1, "skipped": 0, "failed": 0},
            "hits": {"total": {"value": 5, "relation": "eq"}, "hits": []},
            "aggregations": {"a": {"buckets": []}}
        }));
        assert!(ResponseValidator::check(&mut response).is_clean());
        assert_eq!(response.total_hits(), Some(5));
    }
}
