//! HTTP seam between the query subsystem and the event store
//!
//! Everything that talks to storage goes through [`HttpExecutor`]. The
//! bundled [`StorageClient`] is a blocking reqwest implementation; callers
//! with their own authenticated session implement the trait themselves.

use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::index::{DataStream, DatastreamSource};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

const INDEX_NOT_FOUND: &str = "index_not_found_exception";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

/// A single storage request
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    /// Path and query string relative to the store's base URL
    pub path: String,
    pub body: Option<Value>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
            timeout,
        }
    }

    pub fn post(path: impl Into<String>, body: Value, timeout: Duration) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: Some(body),
            timeout,
        }
    }

    pub fn delete(path: impl Into<String>, body: Option<Value>, timeout: Duration) -> Self {
        Self {
            method: Method::Delete,
            path: path.into(),
            body,
            timeout,
        }
    }
}

/// Status and decoded JSON body of a storage response
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Value,
}

impl HttpResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body of a 2xx response, or the backend error it carries
    pub fn into_success(self) -> Result<Value> {
        if self.is_success() {
            return Ok(self.body);
        }

        let error = self.body.get("error");
        let reason = error
            .and_then(|e| e.get("reason").and_then(Value::as_str).or_else(|| e.as_str()))
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", self.status));

        if error_types(error).any(|t| t == INDEX_NOT_FOUND) {
            return Err(Error::IndexNotFound(reason));
        }
        Err(Error::BackendQuery {
            status: self.status,
            reason,
        })
    }
}

/// `error.type` followed by every `error.root_cause[].type`
fn error_types(error: Option<&Value>) -> impl Iterator<Item = &str> {
    let top = error.and_then(|e| e.get("type")).and_then(Value::as_str);
    let causes = error
        .and_then(|e| e.get("root_cause"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|cause| cause.get("type").and_then(Value::as_str));
    top.into_iter().chain(causes)
}

/// Executes storage requests on behalf of the query subsystem
pub trait HttpExecutor {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

impl<E: HttpExecutor + ?Sized> HttpExecutor for &E {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        (**self).execute(request)
    }
}

/// Blocking reqwest-backed executor
#[derive(Debug, Clone)]
pub struct StorageClient {
    base_url: String,
    client: reqwest::blocking::Client,
    timeout: Duration,
}

impl StorageClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("siemql/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(timeout)
            .build()?;
        Ok(Self::with_client(base_url, client, timeout))
    }

    /// Wrap a pre-built (e.g. already authenticated) client
    pub fn with_client(
        base_url: impl Into<String>,
        client: reqwest::blocking::Client,
        timeout: Duration,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl HttpExecutor for StorageClient {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = self.url(&request.path);
        tracing::trace!("{:?} {}", request.method, url);

        let builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Delete => self.client.delete(&url),
        };
        let builder = match &request.body {
            Some(body) => builder.json(body),
            None => builder,
        };

        let response = builder.timeout(request.timeout).send()?;
        let status = response.status().as_u16();
        let text = response.text()?;

        // Proxies in front of the store may answer with plain text
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(HttpResponse { status, body })
    }
}

impl DatastreamSource for StorageClient {
    fn list_datastreams(&self) -> Result<Vec<DataStream>> {
        list_datastreams(self, self.timeout)
    }
}

#[derive(Deserialize)]
struct NodesInfo {
    #[serde(default)]
    nodes: BTreeMap<String, NodeInfo>,
}

#[derive(Deserialize)]
struct NodeInfo {
    version: Option<String>,
}

/// Detect the store's dialect from `GET /_nodes`
///
/// The first node reporting a version decides; nodes disagreeing with it are
/// logged.
pub fn detect_dialect<E: HttpExecutor + ?Sized>(executor: &E, timeout: Duration) -> Result<Dialect> {
    let body = executor
        .execute(HttpRequest::get("_nodes", timeout))?
        .into_success()?;
    let info: NodesInfo = serde_json::from_value(body)?;

    let mut versions = info
        .nodes
        .iter()
        .filter_map(|(id, node)| node.version.as_deref().map(|v| (id, v)));
    let Some((_, first)) = versions.next() else {
        return Err(Error::Configuration(
            "storage did not report a version".to_string(),
        ));
    };
    for (id, version) in versions.filter(|(_, v)| *v != first) {
        tracing::warn!(
            "Storage node {} reports version {}, using {}",
            id,
            version,
            first
        );
    }

    let dialect = Dialect::from_version(first)?;
    tracing::info!("Detected storage version {} ({})", first, dialect);
    Ok(dialect)
}

#[derive(Deserialize)]
struct DataStreamList {
    #[serde(default)]
    data_streams: Vec<DataStream>,
}

/// List every datastream with its backing indices (`GET /_data_stream/*`)
pub fn list_datastreams<E: HttpExecutor + ?Sized>(
    executor: &E,
    timeout: Duration,
) -> Result<Vec<DataStream>> {
    let body = executor
        .execute(HttpRequest::get("_data_stream/*", timeout))?
        .into_success()?;
    let list: DataStreamList = serde_json::from_value(body)?;
    Ok(list.data_streams)
}

/// Adapts any executor into a [`DatastreamSource`]
pub struct ExecutorDatastreams<'a, E: ?Sized> {
    executor: &'a E,
    timeout: Duration,
}

impl<'a, E: HttpExecutor + ?Sized> ExecutorDatastreams<'a, E> {
    pub fn new(executor: &'a E, timeout: Duration) -> Self {
        Self { executor, timeout }
    }
}

impl<E: HttpExecutor + ?Sized> DatastreamSource for ExecutorDatastreams<'_, E> {
    fn list_datastreams(&self) -> Result<Vec<DataStream>> {
        list_datastreams(self.executor, self.timeout)
    }
}
