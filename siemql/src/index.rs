//! Physical index selection for a time range
//!
//! Day-sharded stores get one synthesized `{prefix}_{YYYY-MM-DD}` name per
//! calendar day. Rollover stores are asked for their datastream listing and
//! only backing indices whose embedded date falls inside the range are kept.

use crate::config::IndexConfig;
use crate::dialect::{Dialect, IndexNaming};
use crate::error::Result;
use crate::query::TimeRange;
use chrono::{Days, FixedOffset, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A datastream and its backing indices, as listed by `/_data_stream`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataStream {
    pub name: String,
    #[serde(default)]
    pub indices: Vec<BackingIndex>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackingIndex {
    pub index_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_uuid: Option<String>,
}

/// Something that can enumerate datastreams
pub trait DatastreamSource {
    fn list_datastreams(&self) -> Result<Vec<DataStream>>;
}

/// Fixed listing, for offline resolution and tests
impl DatastreamSource for Vec<DataStream> {
    fn list_datastreams(&self) -> Result<Vec<DataStream>> {
        Ok(self.clone())
    }
}

/// Computes the index names a time range must query
#[derive(Debug, Clone)]
pub struct IndexResolver {
    config: IndexConfig,
    timezone: FixedOffset,
}

impl IndexResolver {
    pub fn new(config: IndexConfig, timezone: FixedOffset) -> Self {
        Self { config, timezone }
    }

    /// Index names for `range` in `dialect`, ascending by day
    ///
    /// `source` is only consulted for datastream-backed dialects.
    pub fn resolve(
        &self,
        range: &TimeRange,
        dialect: Dialect,
        source: &dyn DatastreamSource,
    ) -> Result<Vec<String>> {
        let days = self.days(range)?;
        let (Some(&first), Some(&last)) = (days.first(), days.last()) else {
            return Ok(Vec::new());
        };

        let names = match dialect.profile().naming {
            IndexNaming::DaySharded => {
                let prefix = match dialect {
                    Dialect::Legacy => &self.config.legacy_prefix,
                    _ => &self.config.modern_prefix,
                };
                days.iter()
                    .map(|day| format!("{}_{}", prefix, day.format("%Y-%m-%d")))
                    .collect()
            }
            IndexNaming::Datastream => self.backing_indices(first, last, source)?,
        };

        tracing::debug!(
            "Resolved {} indices for {} in {}: {:?}",
            names.len(),
            dialect,
            self.timezone,
            names
        );
        Ok(names)
    }

    /// Calendar days of `range` plus the configured trailing margin
    fn days(&self, range: &TimeRange) -> Result<Vec<NaiveDate>> {
        let mut days = range.days_in(&self.timezone)?;
        if let Some(&last) = days.last() {
            let margin = u64::from(self.config.boundary_margin_days);
            days.extend((1..=margin).filter_map(|n| last.checked_add_days(Days::new(n))));
        }
        Ok(days)
    }

    fn backing_indices(
        &self,
        first: NaiveDate,
        last: NaiveDate,
        source: &dyn DatastreamSource,
    ) -> Result<Vec<String>> {
        let pattern = backing_index_pattern(&self.config.datastream)?;
        let streams = source.list_datastreams()?;

        let mut dated: Vec<(NaiveDate, String)> = streams
            .into_iter()
            .filter(|stream| stream.name == self.config.datastream)
            .flat_map(|stream| stream.indices)
            .filter_map(|index| match embedded_date(&pattern, &index.index_name) {
                Some(date) => Some((date, index.index_name)),
                None => {
                    tracing::debug!("Skipping backing index '{}'", index.index_name);
                    None
                }
            })
            .filter(|(date, _)| *date >= first && *date <= last)
            .collect();

        // Stable: same-day generations keep listing order
        dated.sort_by_key(|(date, _)| *date);
        let mut names: Vec<String> = Vec::with_capacity(dated.len());
        for (_, name) in dated {
            if !names.contains(&name) {
                names.push(name);
            }
        }

        if names.is_empty() {
            tracing::warn!(
                "Datastream '{}' has no backing indices between {} and {}",
                self.config.datastream,
                first,
                last
            );
        }
        Ok(names)
    }
}

/// `.ds-{datastream}-YYYY.MM.DD[-generation]`
fn backing_index_pattern(datastream: &str) -> Result<Regex> {
    let pattern = format!(
        r"^\.ds-{}-(\d{{4}}\.\d{{2}}\.\d{{2}})(?:-|$)",
        regex::escape(datastream)
    );
    Regex::new(&pattern).map_err(|e| crate::Error::Configuration(e.to_string()))
}

fn embedded_date(pattern: &Regex, index_name: &str) -> Option<NaiveDate> {
    let captures = pattern.captures(index_name)?;
    NaiveDate::parse_from_str(captures.get(1)?.as_str(), "%Y.%m.%d").ok()
}
