//! Event store facade
//!
//! Runs the full flow for one request: compile the query, pick the indices,
//! execute, validate, then decode grouped rows or page through raw events.

use crate::aggregations::{flatten, with_base_schema};
use crate::config::Config;
use crate::dialect::Dialect;
use crate::error::Result;
use crate::index::IndexResolver;
use crate::metrics;
use crate::pager::EventPager;
use crate::query::{CompiledQuery, FilterSpec, QueryCompiler, TimeRange};
use crate::response::{ResponseValidator, SearchResponse};
use crate::transport::{detect_dialect, ExecutorDatastreams, HttpExecutor, HttpRequest, StorageClient};
use serde_json::{Map, Value};
use std::time::{Duration, Instant};

/// Query front-end bound to one store and one dialect
pub struct EventStore<E: HttpExecutor> {
    executor: E,
    dialect: Dialect,
    compiler: QueryCompiler,
    resolver: IndexResolver,
    batch_size: usize,
    scroll_keep_alive: String,
    connection_timeout: Duration,
    request_timeout: Duration,
}

impl EventStore<StorageClient> {
    /// Connect over HTTP, detecting the dialect unless the config pins one
    pub fn connect(config: &Config) -> Result<Self> {
        let timeout = config.storage.connection_timeout();
        let client = StorageClient::new(&config.storage.url, timeout)?;
        let dialect = match &config.storage.dialect {
            Some(pinned) => pinned.parse()?,
            None => detect_dialect(&client, timeout)?,
        };
        tracing::info!("Connected to {} ({})", client.base_url(), dialect);
        Self::new(client, dialect, config)
    }
}

impl<E: HttpExecutor> EventStore<E> {
    pub fn new(executor: E, dialect: Dialect, config: &Config) -> Result<Self> {
        let timezone = config.storage.timezone_offset()?;
        Ok(Self {
            executor,
            dialect,
            compiler: QueryCompiler::from_config(config)?,
            resolver: IndexResolver::new(config.indices.clone(), timezone),
            batch_size: config.query.batch_size,
            scroll_keep_alive: config.query.scroll_keep_alive.clone(),
            connection_timeout: config.storage.connection_timeout(),
            request_timeout: config.storage.request_timeout(),
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Bool query for `spec` over `range`
    pub fn compile(&self, spec: &FilterSpec, range: &TimeRange) -> Result<CompiledQuery> {
        self.compiler.compile_filter_query(spec, range, self.dialect)
    }

    /// Bool query plus the aggregation chain over `spec.fields`
    pub fn compile_group_by(&self, spec: &FilterSpec, range: &TimeRange) -> Result<CompiledQuery> {
        self.compiler
            .compile_grouped(spec, &spec.fields, range, self.dialect)
    }

    pub fn resolve_indices(&self, range: &TimeRange) -> Result<Vec<String>> {
        let source = ExecutorDatastreams::new(&self.executor, self.connection_timeout);
        self.resolver.resolve(range, self.dialect, &source)
    }

    /// Group matching events by `spec.fields` and count each combination
    ///
    /// Every row maps each requested alias (null when the store omitted it)
    /// plus `count`. A request that finds nothing returns one empty mapping.
    pub fn group_by(&self, spec: &FilterSpec, range: TimeRange) -> Result<Vec<Map<String, Value>>> {
        let compiled = self.compile_group_by(spec, &range)?;
        tracing::debug!("Compiled group-by query: {}", compiled.search_body(0));

        let indices = self.resolve_indices(&range)?;
        if indices.is_empty() {
            tracing::warn!("No indices cover {}..{}, empty report", range.begin(), range.end());
            return Ok(vec![Map::new()]);
        }

        let request = HttpRequest::post(
            format!("{}/_search?ignore_unavailable=true", indices.join(",")),
            compiled.search_body(0),
            self.request_timeout,
        );

        let started = Instant::now();
        let body = self.execute_search(request).inspect_err(|e| {
            tracing::error!("Group-by query failed: {}", e);
            metrics::record_backend_error("group_by");
        })?;
        let took = started.elapsed();
        metrics::record_query_duration("group_by", took);

        let mut response = SearchResponse::from_value(body)?;
        let report = ResponseValidator::check(&mut response);
        if report.invalidated || ResponseValidator::is_empty(Some(&response), self.dialect) {
            tracing::debug!("Empty report: lines=0");
            return Ok(vec![Map::new()]);
        }

        let rows = response
            .aggregations
            .as_ref()
            .map(flatten)
            .unwrap_or_default();
        let lines = rows.len();
        let rows = with_base_schema(rows, &compiled.group_aliases());

        metrics::record_rows("group_by", lines);
        tracing::info!(
            "Group-by query executed: lines={}, took={}ms",
            lines,
            took.as_millis()
        );
        Ok(rows)
    }

    /// Response body of a search; errors with root causes are left for the
    /// validator to report
    fn execute_search(&self, request: HttpRequest) -> Result<Value> {
        let response = self.executor.execute(request)?;
        let has_root_cause = response.body.pointer("/error/root_cause").is_some();
        if has_root_cause {
            return Ok(response.body);
        }
        response.into_success()
    }

    /// Lazily fetch every raw event matching `spec` in batches over a scroll
    pub fn events(&self, spec: &FilterSpec, range: TimeRange) -> Result<EventPager<'_, E>> {
        let compiled = self.compile(spec, &range)?;
        tracing::debug!("Compiled events query: {}", compiled.query());

        let indices = self.resolve_indices(&range)?;
        Ok(EventPager::new(
            &self.executor,
            &compiled,
            &indices,
            self.dialect,
            self.batch_size,
            self.request_timeout,
        )
        .with_keep_alive(self.scroll_keep_alive.as_str()))
    }
}
