use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsupported storage dialect: {0}")]
    Configuration(String),

    #[error("Invalid filter clause: {0}")]
    Compilation(String),

    #[error("Invalid group-by field list: {0}")]
    InvalidFieldList(String),

    #[error("Invalid time range: begin {begin} is after end {end}")]
    InvalidTimeRange { begin: i64, end: i64 },

    #[error("Backend query failed (status {status}): {reason}")]
    BackendQuery { status: u16, reason: String },

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Errors raised by the backend rather than by local compilation
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            Self::BackendQuery { .. } | Self::IndexNotFound(_) | Self::Http(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Conditions that leave a response usable but incomplete.
///
/// These never surface as `Err`; the validator logs them and hands them back
/// in its report so callers can decide whether partial data is acceptable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartialResultWarning {
    #[error("Storage returned errors: {}", .0.join(","))]
    BackendErrors(Vec<String>),

    #[error("Storage timed out for some shards, some data has been lost")]
    TimedOut,

    #[error("Storage reported {failed} failed shards, some data has been lost")]
    ShardFailures { failed: u64 },

    #[error(
        "Aggregation '{aggregation}' undercounted (error bound {doc_count_error_upper_bound}, \
         other docs {sum_other_doc_count}); bucket size is too small"
    )]
    BucketUndercount {
        aggregation: String,
        doc_count_error_upper_bound: i64,
        sum_other_doc_count: i64,
    },
}
