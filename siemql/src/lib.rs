//! Query front-end for a time-partitioned SIEM event store
//!
//! The store exists in three incompatible wire dialects (see [`Dialect`]).
//! This crate turns a declarative request, a [`TimeRange`] plus a
//! [`FilterSpec`], into the dialect-correct search and reads the answer back:
//!
//! - [`IndexResolver`] picks the physical indices a range must hit
//! - [`QueryCompiler`] builds the bool query and the nested `terms` chain
//! - [`ResponseValidator`] reports total and partial failures
//! - [`aggregations::flatten`] turns nested buckets into flat rows
//! - [`EventPager`] streams raw events in bounded batches
//!
//! [`EventStore`] wires these together over any [`HttpExecutor`].
//!
//! ```no_run
//! use siemql::{Config, EventStore, FilterSpec, TimeRange};
//!
//! let config = Config::default();
//! let store = EventStore::connect(&config)?;
//! let spec = FilterSpec::new().with_field("src/ip", "subject");
//! for row in store.group_by(&spec, TimeRange::new(1_709_251_200, 1_709_337_599)?)? {
//!     println!("{}", serde_json::Value::Object(row));
//! }
//! # Ok::<(), siemql::Error>(())
//! ```

pub mod aggregations;
pub mod config;
pub mod dialect;
pub mod error;
pub mod index;
pub mod metrics;
pub mod observability;
pub mod pager;
pub mod query;
pub mod response;
pub mod store;
pub mod transport;

pub use aggregations::{AggregationNode, FlatRow};
pub use config::Config;
pub use dialect::{Dialect, DialectTag};
pub use error::{Error, PartialResultWarning, Result};
pub use index::{DataStream, DatastreamSource, IndexResolver};
pub use pager::EventPager;
pub use query::{CompiledQuery, FieldSpec, FilterClause, FilterSpec, QueryCompiler, TimeRange};
pub use response::{ResponseValidator, SearchResponse, ValidationReport};
pub use store::EventStore;
pub use transport::{HttpExecutor, HttpRequest, HttpResponse, StorageClient};
