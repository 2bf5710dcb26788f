//! Declarative requests and their compilation into wire queries

pub mod compiler;
pub mod types;

pub use compiler::{CompiledQuery, QueryCompiler};
pub use types::{parse_field_list, FieldSpec, FilterClause, FilterSpec, TimeRange};
