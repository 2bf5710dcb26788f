//! Declarative request types
//!
//! A request is a [`TimeRange`] plus a [`FilterSpec`]. Filter specs keep the
//! document shape operators already write by hand:
//!
//! ```json
//! {
//!   "es_filter": ["{\"term\": {\"event_src/category\": \"DNS server\"}}"],
//!   "es_filter_not": [
//!     {"{\"range\": {\"dst/ip\": {\"gte\": \"10.0.0.0\", \"lte\": \"10.255.255.255\"}}}": "ALL"},
//!     {"{\"range\": {\"dst/ip\": {\"gte\": \"127.0.0.0\", \"lte\": \"127.255.255.255\"}}}": "7"}
//!   ],
//!   "fields": "dst/ip as object, src/ip as subject"
//! }
//! ```

use crate::dialect::DialectTag;
use crate::error::{Error, Result};
use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Inclusive time range in unix seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTimeRange")]
pub struct TimeRange {
    begin: i64,
    end: i64,
}

#[derive(Deserialize)]
struct RawTimeRange {
    begin: i64,
    end: i64,
}

impl TryFrom<RawTimeRange> for TimeRange {
    type Error = Error;

    fn try_from(raw: RawTimeRange) -> Result<Self> {
        TimeRange::new(raw.begin, raw.end)
    }
}

impl TimeRange {
    pub fn new(begin: i64, end: i64) -> Result<Self> {
        if begin > end {
            return Err(Error::InvalidTimeRange { begin, end });
        }
        Ok(Self { begin, end })
    }

    pub fn begin(&self) -> i64 {
        self.begin
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    /// Both bounds as wall-clock times in `tz`
    pub fn bounds_in(&self, tz: &FixedOffset) -> Result<(DateTime<FixedOffset>, DateTime<FixedOffset>)> {
        Ok((to_datetime(self.begin, tz)?, to_datetime(self.end, tz)?))
    }

    /// Calendar days touched by the range in `tz`, ascending
    pub fn days_in(&self, tz: &FixedOffset) -> Result<Vec<NaiveDate>> {
        let (begin, end) = self.bounds_in(tz)?;
        Ok(begin
            .date_naive()
            .iter_days()
            .take_while(|day| *day <= end.date_naive())
            .collect())
    }
}

fn to_datetime(secs: i64, tz: &FixedOffset) -> Result<DateTime<FixedOffset>> {
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.with_timezone(tz))
        .ok_or(Error::InvalidTimeRange {
            begin: secs,
            end: secs,
        })
}

/// One filter clause, carried as raw query-DSL JSON text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawClause", into = "RawClause")]
pub enum FilterClause {
    /// Always included
    Plain(String),
    /// Included only when the tag matches the active dialect (or is `ALL`)
    VersionGated { clause: String, applies_to: DialectTag },
}

/// Serialized forms: `"<json>"` or `{"<json>": "<tag>"}`
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawClause {
    Plain(String),
    Gated(BTreeMap<String, String>),
}

impl TryFrom<RawClause> for FilterClause {
    type Error = Error;

    fn try_from(raw: RawClause) -> Result<Self> {
        match raw {
            RawClause::Plain(clause) => Ok(FilterClause::Plain(clause)),
            RawClause::Gated(map) => {
                if map.len() != 1 {
                    return Err(Error::Compilation(format!(
                        "gated clause must have exactly one entry, got {}",
                        map.len()
                    )));
                }
                let (clause, tag) = map.into_iter().next().ok_or_else(|| {
                    Error::Compilation("gated clause is empty".to_string())
                })?;
                Ok(FilterClause::VersionGated {
                    clause,
                    applies_to: tag.parse()?,
                })
            }
        }
    }
}

impl From<FilterClause> for RawClause {
    fn from(clause: FilterClause) -> Self {
        match clause {
            FilterClause::Plain(clause) => RawClause::Plain(clause),
            FilterClause::VersionGated { clause, applies_to } => {
                RawClause::Gated(BTreeMap::from([(clause, applies_to.to_string())]))
            }
        }
    }
}

impl FilterClause {
    pub fn plain(clause: impl Into<String>) -> Self {
        FilterClause::Plain(clause.into())
    }

    pub fn gated(clause: impl Into<String>, applies_to: DialectTag) -> Self {
        FilterClause::VersionGated {
            clause: clause.into(),
            applies_to,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            FilterClause::Plain(clause) => clause,
            FilterClause::VersionGated { clause, .. } => clause,
        }
    }
}

/// A group-by or projection field with its output alias
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub alias: String,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: alias.into(),
        }
    }

    /// Parse `field` or `field as alias`
    pub fn parse(token: &str) -> Result<Self> {
        let token = token.trim();
        let (name, alias) = match token.split_once(" as ") {
            Some((name, alias)) => (name.trim(), alias.trim()),
            None => (token, token),
        };
        if name.is_empty() || alias.is_empty() {
            return Err(Error::InvalidFieldList(format!(
                "empty field or alias in '{}'",
                token
            )));
        }
        Ok(Self::new(name, alias))
    }
}

/// Parse a comma-separated list of `field [as alias]` tokens, preserving order
pub fn parse_field_list(text: &str) -> Result<Vec<FieldSpec>> {
    text.split(',').map(FieldSpec::parse).collect()
}

/// Declarative filter plus projection / group-by fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(default, alias = "es_filter")]
    pub positive: Vec<FilterClause>,

    #[serde(default, alias = "es_filter_not")]
    pub negative: Vec<FilterClause>,

    /// Projection list, or group-by key order for aggregation calls
    #[serde(default, deserialize_with = "deserialize_fields")]
    pub fields: Vec<FieldSpec>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FieldsRepr {
    Text(String),
    List(Vec<FieldSpec>),
}

fn deserialize_fields<'de, D>(deserializer: D) -> std::result::Result<Vec<FieldSpec>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<FieldsRepr>::deserialize(deserializer)? {
        None => Ok(Vec::new()),
        Some(FieldsRepr::List(list)) => Ok(list),
        Some(FieldsRepr::Text(text)) if text.trim().is_empty() => Ok(Vec::new()),
        Some(FieldsRepr::Text(text)) => parse_field_list(&text).map_err(serde::de::Error::custom),
    }
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_positive(mut self, clause: FilterClause) -> Self {
        self.positive.push(clause);
        self
    }

    pub fn with_negative(mut self, clause: FilterClause) -> Self {
        self.negative.push(clause);
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, alias: impl Into<String>) -> Self {
        self.fields.push(FieldSpec::new(name, alias));
        self
    }

    /// Output aliases in field order
    pub fn aliases(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.alias.as_str()).collect()
    }
}
