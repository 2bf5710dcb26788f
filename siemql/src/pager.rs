//! Lazy, batched raw-event fetch over a server-side scroll

use crate::dialect::{Dialect, ScrollStyle};
use crate::error::{Error, Result};
use crate::metrics;
use crate::query::CompiledQuery;
use crate::response::{ResponseValidator, SearchResponse};
use crate::transport::{HttpExecutor, HttpRequest};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use url::form_urlencoded;

const DEFAULT_KEEP_ALIVE: &str = "1m";

/// Streams every hit matching a compiled query, one request per batch
///
/// The first request opens a scroll over the indices; later batches follow
/// its cursor, so the stream is not bounded by the store's result window and
/// sees one consistent view of indices still being written. The scroll is
/// cleared once the last batch arrives, on failure, or when the pager is
/// dropped early.
///
/// Single pass and not restartable. A missing index ends the stream without
/// an error; any other backend failure is yielded once and ends it.
pub struct EventPager<'a, E: HttpExecutor + ?Sized> {
    executor: &'a E,
    indices: String,
    query: Value,
    style: ScrollStyle,
    batch_size: usize,
    timeout: Duration,
    keep_alive: String,
    scroll_id: Option<String>,
    batches: u64,
    buffer: std::vec::IntoIter<Value>,
    reported_total: Option<u64>,
    yielded: u64,
    started: Instant,
    state: State,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Fetching,
    /// Last batch received; drain the buffer
    Draining,
    Finished,
}

impl<'a, E: HttpExecutor + ?Sized> EventPager<'a, E> {
    pub fn new(
        executor: &'a E,
        query: &CompiledQuery,
        indices: &[String],
        dialect: Dialect,
        batch_size: usize,
        timeout: Duration,
    ) -> Self {
        let state = if indices.is_empty() {
            tracing::warn!("No indices to fetch events from");
            State::Finished
        } else {
            State::Fetching
        };

        Self {
            executor,
            indices: indices.join(","),
            query: query.query(),
            style: dialect.profile().scroll,
            batch_size: batch_size.max(1),
            timeout,
            keep_alive: DEFAULT_KEEP_ALIVE.to_string(),
            scroll_id: None,
            batches: 0,
            buffer: Vec::new().into_iter(),
            reported_total: None,
            yielded: 0,
            started: Instant::now(),
            state,
        }
    }

    /// How long the store keeps the scroll open between batches (e.g. `"5m"`)
    pub fn with_keep_alive(mut self, keep_alive: impl Into<String>) -> Self {
        self.keep_alive = keep_alive.into();
        self
    }

    /// Hits yielded so far
    pub fn yielded(&self) -> u64 {
        self.yielded
    }

    /// Total reported by the first batch
    pub fn reported_total(&self) -> Option<u64> {
        self.reported_total
    }

    fn open_request(&self) -> HttpRequest {
        let mut body = json!({
            "query": self.query,
            "size": self.batch_size,
        });
        if self.style == ScrollStyle::JsonBody {
            body["sort"] = json!(["_doc"]);
            body["track_total_hits"] = json!(true);
        }
        HttpRequest::post(
            format!("{}/_search?scroll={}", self.indices, encode(&self.keep_alive)),
            body,
            self.timeout,
        )
    }

    fn continue_request(&self, scroll_id: &str) -> HttpRequest {
        match self.style {
            ScrollStyle::JsonBody => HttpRequest::post(
                "_search/scroll",
                json!({"scroll": self.keep_alive, "scroll_id": scroll_id}),
                self.timeout,
            ),
            ScrollStyle::QueryString => HttpRequest::get(
                format!(
                    "_search/scroll?scroll={}&scroll_id={}",
                    encode(&self.keep_alive),
                    encode(scroll_id)
                ),
                self.timeout,
            ),
        }
    }

    fn clear_request(&self, scroll_id: &str) -> HttpRequest {
        match self.style {
            ScrollStyle::JsonBody => HttpRequest::delete(
                "_search/scroll",
                Some(json!({"scroll_id": [scroll_id]})),
                self.timeout,
            ),
            ScrollStyle::QueryString => HttpRequest::delete(
                format!("_search/scroll?scroll_id={}", encode(scroll_id)),
                None,
                self.timeout,
            ),
        }
    }

    fn fetch_batch(&mut self) -> Result<()> {
        let request = match &self.scroll_id {
            Some(scroll_id) => self.continue_request(scroll_id),
            None => self.open_request(),
        };
        let started = Instant::now();
        let body = match self.executor.execute(request).and_then(|r| r.into_success()) {
            Ok(body) => body,
            Err(Error::IndexNotFound(reason)) => {
                tracing::error!("Event fetch hit a missing index: {}", reason);
                self.clear_scroll();
                self.state = State::Finished;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        metrics::record_query_duration("events", started.elapsed());

        let mut response = SearchResponse::from_value(body)?;
        if let Some(scroll_id) = response.scroll_id.take() {
            self.scroll_id = Some(scroll_id);
        }
        ResponseValidator::check(&mut response);
        if self.reported_total.is_none() {
            self.reported_total = response.total_hits();
        }

        let hits = response.into_hits();
        self.batches += 1;
        tracing::debug!(
            "Fetched {} events in batch {} from {}",
            hits.len(),
            self.batches,
            self.indices
        );

        if hits.len() < self.batch_size {
            self.state = State::Draining;
            self.clear_scroll();
        } else if self.scroll_id.is_none() {
            return Err(Error::BackendQuery {
                status: 200,
                reason: "full event batch returned without a scroll id".to_string(),
            });
        }
        self.buffer = hits.into_iter();
        Ok(())
    }

    /// Release the server-side scroll; failures only cost the store memory
    /// until the keep-alive lapses
    fn clear_scroll(&mut self) {
        let Some(scroll_id) = self.scroll_id.take() else {
            return;
        };
        let request = self.clear_request(&scroll_id);
        match self.executor.execute(request).and_then(|r| r.into_success()) {
            Ok(_) => tracing::debug!("Cleared event scroll after {} batches", self.batches),
            Err(e) => tracing::debug!("Could not clear event scroll: {}", e),
        }
    }

    fn finish(&mut self) {
        self.state = State::Finished;
        metrics::record_rows("events", self.yielded as usize);
        tracing::info!(
            "Events query finished: lines={}, took={}ms",
            self.yielded,
            self.started.elapsed().as_millis()
        );
        if let Some(total) = self.reported_total {
            if total != self.yielded {
                tracing::warn!(
                    "Storage reported {} events but {} were fetched",
                    total,
                    self.yielded
                );
            }
        }
    }
}

fn encode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

impl<E: HttpExecutor + ?Sized> Iterator for EventPager<'_, E> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(hit) = self.buffer.next() {
                self.yielded += 1;
                return Some(Ok(hit));
            }
            match self.state {
                State::Finished => return None,
                State::Draining => {
                    self.finish();
                    return None;
                }
                State::Fetching => {
                    if let Err(e) = self.fetch_batch() {
                        tracing::error!("Event fetch failed: {}", e);
                        metrics::record_backend_error("events");
                        self.clear_scroll();
                        self.state = State::Finished;
                        return Some(Err(e));
                    }
                }
            }
        }
    }
}

impl<E: HttpExecutor + ?Sized> std::iter::FusedIterator for EventPager<'_, E> {}

impl<E: HttpExecutor + ?Sized> Drop for EventPager<'_, E> {
    fn drop(&mut self) {
        self.clear_scroll();
    }
}
