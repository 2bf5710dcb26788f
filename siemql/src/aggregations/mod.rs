pub mod decoder;
mod tree;

pub use decoder::{flatten, with_base_schema, FlatRow, COUNT_KEY};
pub use tree::AggregationNode;
