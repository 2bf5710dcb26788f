//! Storage dialects and their per-dialect wire rules
//!
//! The event store exists in three incompatible flavours:
//! - `Legacy`: single-index 1.7 store, flat field names, scalar hit totals
//! - `Modern`: day-sharded 7.x store, object hit totals
//! - `ModernRollover`: 7.17 datastream store whose backing indices are enumerated
//!
//! Everything that differs between them lives in one [`DialectProfile`] row,
//! so callers never branch on the dialect themselves.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Wire dialect of the backing event store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    Legacy,
    Modern,
    ModernRollover,
}

/// Shape of `hits.total` in a search response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalHitsShape {
    /// `"total": 42`
    Scalar,
    /// `"total": {"value": 42, "relation": "eq"}`
    Object,
}

/// How physical index names are found for a time range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexNaming {
    /// One synthesized `{prefix}_{YYYY-MM-DD}` index per calendar day
    DaySharded,
    /// Backing indices enumerated from the datastream listing
    Datastream,
}

/// How an event scroll is opened, continued and cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollStyle {
    /// Scroll id in the query string; no `_doc` sort, totals always exact
    QueryString,
    /// `{"scroll", "scroll_id"}` JSON bodies, `_doc` sort, `track_total_hits`
    JsonBody,
}

/// One row of the dialect dispatch table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialectProfile {
    /// Bool-query bucket receiving positive clauses
    pub clause_bucket: &'static str,
    /// Rewrite `/` field separators to `.` in clauses and aggregation fields
    pub rewrite_field_separator: bool,
    pub total_hits: TotalHitsShape,
    pub naming: IndexNaming,
    pub scroll: ScrollStyle,
}

const LEGACY: DialectProfile = DialectProfile {
    clause_bucket: "must",
    rewrite_field_separator: true,
    total_hits: TotalHitsShape::Scalar,
    naming: IndexNaming::DaySharded,
    scroll: ScrollStyle::QueryString,
};

const MODERN: DialectProfile = DialectProfile {
    clause_bucket: "filter",
    rewrite_field_separator: false,
    total_hits: TotalHitsShape::Object,
    naming: IndexNaming::DaySharded,
    scroll: ScrollStyle::JsonBody,
};

const MODERN_ROLLOVER: DialectProfile = DialectProfile {
    clause_bucket: "filter",
    rewrite_field_separator: false,
    total_hits: TotalHitsShape::Object,
    naming: IndexNaming::Datastream,
    scroll: ScrollStyle::JsonBody,
};

impl Dialect {
    /// Dispatch-table row for this dialect
    pub fn profile(&self) -> &'static DialectProfile {
        match self {
            Dialect::Legacy => &LEGACY,
            Dialect::Modern => &MODERN,
            Dialect::ModernRollover => &MODERN_ROLLOVER,
        }
    }

    /// Version tag used by gated filter clauses (`"1.7"`, `"7"`, `"7.17"`)
    pub fn version_tag(&self) -> &'static str {
        match self {
            Dialect::Legacy => "1.7",
            Dialect::Modern => "7",
            Dialect::ModernRollover => "7.17",
        }
    }

    /// Map a backend version number (as reported by `/_nodes`) to a dialect
    pub fn from_version(version: &str) -> Result<Self> {
        let version = version.trim();
        if version.starts_with("7.17") {
            Ok(Dialect::ModernRollover)
        } else if version.starts_with("7.") {
            Ok(Dialect::Modern)
        } else if version == "1.7" || version.starts_with("1.7.") {
            Ok(Dialect::Legacy)
        } else {
            Err(Error::Configuration(format!(
                "storage version '{}' is not supported",
                version
            )))
        }
    }

    pub fn all() -> &'static [Dialect] {
        &[Dialect::Legacy, Dialect::Modern, Dialect::ModernRollover]
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::Legacy => write!(f, "legacy"),
            Dialect::Modern => write!(f, "modern"),
            Dialect::ModernRollover => write!(f, "modern-rollover"),
        }
    }
}

impl std::str::FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "legacy" | "1.7" => Ok(Dialect::Legacy),
            "modern" | "7" => Ok(Dialect::Modern),
            "modern-rollover" | "modern_rollover" | "7.17" => Ok(Dialect::ModernRollover),
            other => Err(Error::Configuration(format!("unknown dialect '{}'", other))),
        }
    }
}

/// Applicability tag of a version-gated filter clause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialectTag {
    Only(Dialect),
    All,
}

impl DialectTag {
    pub fn applies_to(&self, dialect: Dialect) -> bool {
        match self {
            DialectTag::All => true,
            DialectTag::Only(d) => *d == dialect,
        }
    }
}

impl std::fmt::Display for DialectTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DialectTag::All => write!(f, "ALL"),
            DialectTag::Only(d) => write!(f, "{}", d.version_tag()),
        }
    }
}

impl std::str::FromStr for DialectTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("all") {
            Ok(DialectTag::All)
        } else {
            s.parse().map(DialectTag::Only)
        }
    }
}
