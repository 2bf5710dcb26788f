//! Compiles declarative filter specs into dialect-correct bool queries

use crate::aggregations::AggregationNode;
use crate::config::Config;
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::query::types::{parse_field_list, FieldSpec, FilterClause, FilterSpec, TimeRange};
use chrono::FixedOffset;
use serde_json::{json, Map, Value};

/// Range bound format; the offset is applied before formatting
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Output of the compiler: a bool query and an optional aggregation chain
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    /// Contents of `query.bool`
    pub bool_query: Value,
    pub aggregation_tree: Option<AggregationNode>,
}

impl CompiledQuery {
    /// The `query` section of a search request
    pub fn query(&self) -> Value {
        json!({ "bool": self.bool_query })
    }

    /// Full search request body returning at most `size` hits
    pub fn search_body(&self, size: usize) -> Value {
        let mut body = Map::new();
        body.insert("query".to_string(), self.query());
        if let Some(tree) = &self.aggregation_tree {
            body.insert("aggs".to_string(), tree.to_aggs());
        }
        body.insert("size".to_string(), Value::from(size));
        Value::Object(body)
    }

    /// Clauses in the named bool bucket (`filter`, `must`, `must_not`)
    pub fn clauses(&self, bucket: &str) -> &[Value] {
        self.bool_query
            .get(bucket)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Output aliases of the aggregation chain, outermost first
    pub fn group_aliases(&self) -> Vec<&str> {
        self.aggregation_tree
            .as_ref()
            .map(|tree| tree.aliases())
            .unwrap_or_default()
    }
}

/// Builds bool queries and terms-aggregation chains
#[derive(Debug, Clone)]
pub struct QueryCompiler {
    time_field: String,
    bucket_size: usize,
    timezone: FixedOffset,
}

impl QueryCompiler {
    pub fn new(time_field: impl Into<String>, bucket_size: usize, timezone: FixedOffset) -> Self {
        Self {
            time_field: time_field.into(),
            bucket_size,
            timezone,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            config.query.time_field.clone(),
            config.query.bucket_size,
            config.storage.timezone_offset()?,
        ))
    }

    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    /// Compile the bool query for `spec` over `range`
    pub fn compile_filter_query(
        &self,
        spec: &FilterSpec,
        range: &TimeRange,
        dialect: Dialect,
    ) -> Result<CompiledQuery> {
        let profile = dialect.profile();

        let mut positive = vec![self.range_clause(range)?];
        positive.extend(Self::embed_all(&spec.positive, dialect)?);
        let negative = Self::embed_all(&spec.negative, dialect)?;

        let mut bool_query = Map::new();
        bool_query.insert(profile.clause_bucket.to_string(), Value::Array(positive));
        bool_query.insert("must_not".to_string(), Value::Array(negative));

        Ok(CompiledQuery {
            bool_query: Value::Object(bool_query),
            aggregation_tree: None,
        })
    }

    /// Compile the bool query plus a nested terms chain for `group_fields`
    /// (`"field [as alias], ..."`)
    pub fn compile_aggregation_query(
        &self,
        spec: &FilterSpec,
        group_fields: &str,
        range: &TimeRange,
        dialect: Dialect,
    ) -> Result<CompiledQuery> {
        let fields = parse_field_list(group_fields)?;
        self.compile_grouped(spec, &fields, range, dialect)
    }

    /// Same as [`compile_aggregation_query`](Self::compile_aggregation_query)
    /// with pre-parsed fields
    pub fn compile_grouped(
        &self,
        spec: &FilterSpec,
        fields: &[FieldSpec],
        range: &TimeRange,
        dialect: Dialect,
    ) -> Result<CompiledQuery> {
        if fields.is_empty() {
            return Err(Error::InvalidFieldList(
                "at least one group-by field is required".to_string(),
            ));
        }

        let mut compiled = self.compile_filter_query(spec, range, dialect)?;
        let rewrite = dialect.profile().rewrite_field_separator;
        let levels = fields.iter().map(|f| {
            let field = if rewrite {
                f.name.replace('/', ".")
            } else {
                f.name.clone()
            };
            (f.alias.clone(), field)
        });
        compiled.aggregation_tree =
            AggregationNode::chain(levels.collect::<Vec<_>>(), self.bucket_size);

        Ok(compiled)
    }

    fn range_clause(&self, range: &TimeRange) -> Result<Value> {
        let (begin, end) = range.bounds_in(&self.timezone)?;
        Ok(json!({
            "range": {
                self.time_field.as_str(): {
                    "gte": begin.format(TIME_FORMAT).to_string(),
                    "lte": end.format(TIME_FORMAT).to_string(),
                }
            }
        }))
    }

    fn embed_all(clauses: &[FilterClause], dialect: Dialect) -> Result<Vec<Value>> {
        clauses
            .iter()
            .filter_map(|clause| Self::gate(clause, dialect))
            .map(|text| Self::embed(text, dialect))
            .collect()
    }

    /// Clause text if the clause applies to `dialect`
    fn gate(clause: &FilterClause, dialect: Dialect) -> Option<&str> {
        match clause {
            FilterClause::Plain(text) => Some(text),
            FilterClause::VersionGated { clause, applies_to } if applies_to.applies_to(dialect) => {
                Some(clause)
            }
            FilterClause::VersionGated { clause, applies_to } => {
                tracing::debug!(
                    "Dropping clause tagged '{}' for dialect {}: {}",
                    applies_to,
                    dialect,
                    clause
                );
                None
            }
        }
    }

    fn embed(text: &str, dialect: Dialect) -> Result<Value> {
        let parsed = if dialect.profile().rewrite_field_separator {
            serde_json::from_str(&text.replace('/', "."))
        } else {
            serde_json::from_str(text)
        };
        parsed.map_err(|e| Error::Compilation(format!("{}: {}", e, text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DialectTag;

    fn compiler() -> QueryCompiler {
        QueryCompiler::new("time", 1000, FixedOffset::east_opt(0).unwrap())
    }

    fn range() -> TimeRange {
        TimeRange::new(1_700_000_000, 1_700_003_600).unwrap()
    }

    #[test]
    fn test_range_clause_always_first() {
        let compiled = compiler()
            .compile_filter_query(&FilterSpec::new(), &range(), Dialect::Modern)
            .unwrap();
        assert_eq!(
            compiled.clauses("filter"),
            &[json!({"range": {"time": {
                "gte": "2023-11-14T22:13:20Z",
                "lte": "2023-11-14T23:13:20Z"
            }}})]
        );
        assert!(compiled.clauses("must_not").is_empty());
        assert!(compiled.aggregation_tree.is_none());
    }

    #[test]
    fn test_range_bounds_use_configured_offset() {
        let msk = QueryCompiler::new("time", 10, FixedOffset::east_opt(3 * 3600).unwrap());
        let compiled = msk
            .compile_filter_query(&FilterSpec::new(), &range(), Dialect::Modern)
            .unwrap();
        assert_eq!(
            compiled.clauses("filter")[0]["range"]["time"]["gte"],
            json!("2023-11-15T01:13:20Z")
        );
    }

    #[test]
    fn test_clause_buckets_per_dialect() {
        let spec = FilterSpec::new()
            .with_positive(FilterClause::plain(r#"{"term": {"a": "x"}}"#))
            .with_negative(FilterClause::plain(r#"{"term": {"b": "y"}}"#));

        let legacy = compiler()
            .compile_filter_query(&spec, &range(), Dialect::Legacy)
            .unwrap();
        assert_eq!(legacy.clauses("must").len(), 2);
        assert!(legacy.bool_query.get("filter").is_none());
        assert_eq!(legacy.clauses("must_not"), &[json!({"term": {"b": "y"}})]);

        for dialect in [Dialect::Modern, Dialect::ModernRollover] {
            let modern = compiler().compile_filter_query(&spec, &range(), dialect).unwrap();
            assert_eq!(modern.clauses("filter").len(), 2);
            assert!(modern.bool_query.get("must").is_none());
            assert_eq!(modern.clauses("must_not").len(), 1);
        }
    }

    #[test]
    fn test_gated_clauses() {
        let spec = FilterSpec::new()
            .with_negative(FilterClause::gated(
                r#"{"term": {"only": "modern"}}"#,
                DialectTag::Only(Dialect::Modern),
            ))
            .with_negative(FilterClause::gated(r#"{"term": {"every": 1}}"#, DialectTag::All));

        let modern = compiler()
            .compile_filter_query(&spec, &range(), Dialect::Modern)
            .unwrap();
        assert_eq!(modern.clauses("must_not").len(), 2);

        let rollover = compiler()
            .compile_filter_query(&spec, &range(), Dialect::ModernRollover)
            .unwrap();
        assert_eq!(rollover.clauses("must_not"), &[json!({"term": {"every": 1}})]);
    }

    #[test]
    fn test_dropped_clause_is_not_validated() {
        let spec = FilterSpec::new().with_positive(FilterClause::gated(
            "not json at all",
            DialectTag::Only(Dialect::Legacy),
        ));
        assert!(compiler()
            .compile_filter_query(&spec, &range(), Dialect::Modern)
            .is_ok());
        assert!(matches!(
            compiler().compile_filter_query(&spec, &range(), Dialect::Legacy),
            Err(Error::Compilation(_))
        ));
    }

    #[test]
    fn test_legacy_rewrites_field_separators() {
        let spec = FilterSpec::new()
            .with_positive(FilterClause::plain(r#"{"term": {"event_src/category": "DNS"}}"#));

        let legacy = compiler()
            .compile_aggregation_query(&spec, "dst/ip as object", &range(), Dialect::Legacy)
            .unwrap();
        assert_eq!(legacy.clauses("must")[1], json!({"term": {"event_src.category": "DNS"}}));
        let tree = legacy.aggregation_tree.unwrap();
        assert_eq!(tree.field, "dst.ip");
        assert_eq!(tree.alias, "object");

        let modern = compiler()
            .compile_aggregation_query(&spec, "dst/ip as object", &range(), Dialect::Modern)
            .unwrap();
        assert_eq!(modern.clauses("filter")[1], json!({"term": {"event_src/category": "DNS"}}));
        assert_eq!(modern.aggregation_tree.unwrap().field, "dst/ip");
    }

    #[test]
    fn test_aggregation_depth_matches_field_count() {
        let compiled = compiler()
            .compile_aggregation_query(&FilterSpec::new(), "a,b", &range(), Dialect::Modern)
            .unwrap();
        let tree = compiled.aggregation_tree.as_ref().unwrap();
        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.alias, "a");
        assert_eq!(tree.children().len(), 1);
        assert_eq!(tree.children()[0].alias, "b");
        assert_eq!(tree.size, 1000);
        assert_eq!(compiled.group_aliases(), vec!["a", "b"]);
    }

    #[test]
    fn test_aggregation_requires_fields() {
        assert!(matches!(
            compiler().compile_grouped(&FilterSpec::new(), &[], &range(), Dialect::Modern),
            Err(Error::InvalidFieldList(_))
        ));
    }

    #[test]
    fn test_search_body() {
        let compiled = compiler()
            .compile_aggregation_query(&FilterSpec::new(), "a", &range(), Dialect::Modern)
            .unwrap();
        let body = compiled.search_body(0);
        assert_eq!(body["size"], json!(0));
        assert_eq!(body["aggs"]["a"]["terms"]["field"], json!("a"));
        assert!(body["query"]["bool"]["filter"].is_array());

        let plain = compiler()
            .compile_filter_query(&FilterSpec::new(), &range(), Dialect::Modern)
            .unwrap()
            .search_body(10);
        assert!(plain.get("aggs").is_none());
    }

    #[test]
    fn test_compilation_is_deterministic() {
        let spec = FilterSpec::new()
            .with_positive(FilterClause::plain(r#"{"terms": {"x": [1, 2]}}"#))
            .with_negative(FilterClause::gated(r#"{"term": {"y": 1}}"#, DialectTag::All));
        let a = compiler()
            .compile_aggregation_query(&spec, "x as X, y", &range(), Dialect::Legacy)
            .unwrap();
        let b = compiler()
            .compile_aggregation_query(&spec, "x as X, y", &range(), Dialect::Legacy)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.search_body(0), b.search_body(0));
    }
}
