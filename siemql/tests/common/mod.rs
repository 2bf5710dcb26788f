//! Shared helpers for integration tests

use serde_json::Value;
use siemql::transport::Method;
use siemql::{HttpExecutor, HttpRequest, HttpResponse, Result};
use std::cell::RefCell;
use std::collections::VecDeque;

/// Replays canned responses in order and records every request
///
/// Scroll clears are acknowledged without consuming a canned response.
pub struct MockExecutor {
    responses: RefCell<VecDeque<HttpResponse>>,
    requests: RefCell<Vec<HttpRequest>>,
}

impl MockExecutor {
    pub fn new(responses: Vec<HttpResponse>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn ok(bodies: Vec<Value>) -> Self {
        Self::new(bodies.into_iter().map(|b| HttpResponse::new(200, b)).collect())
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.borrow().clone()
    }
}

impl HttpExecutor for MockExecutor {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests.borrow_mut().push(request.clone());
        if request.method == Method::Delete {
            return Ok(HttpResponse::new(200, serde_json::json!({"succeeded": true})));
        }
        let response = self.responses.borrow_mut().pop_front();
        Ok(response.unwrap_or_else(|| {
            panic!("no canned response left for {:?} {}", request.method, request.path)
        }))
    }
}

/// 2023-11-14T22:13:20Z
pub const BEGIN: i64 = 1_700_000_000;
/// One hour later
pub const END: i64 = 1_700_003_600;

pub const SCROLL_ID: &str = "FGluY2x1ZGVfY29udGV4dF91dWlk";

pub fn hits<S: AsRef<str>>(ids: &[S], total: u64) -> Value {
    let hits: Vec<Value> = ids
        .iter()
        .map(|id| serde_json::json!({"_index": "siem_events_2023-11-14", "_id": id.as_ref()}))
        .collect();
    serde_json::json!({
        "_scroll_id": SCROLL_ID,
        "took": 4,
        "timed_out": false,
        "_shards": {"total": 1, "successful": 1, "skipped": 0, "failed": 0},
        "hits": {"total": {"value": total, "relation": "eq"}, "hits": hits}
    })
}
