//! Connector contracts and the HTTP implementation.
//!
//! A [`SourceConnector`] opens [`SourceConnection`]s for one registered
//! [`Source`]. The access manager keeps those connections in a per-source
//! pool and never talks to the network directly.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http_client::{HttpAuth, HttpClient, HttpRequest, ReqwestHttpClient};
use crate::{CacheMode, ConnectorError, Payload, Source, SourceId, UtcDateTime};

pub type ConnectorFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ConnectorError>> + Send + 'a>>;

/// A request to a source: an operation name plus string parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Query {
    pub operation: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub cache_mode: CacheMode,
}

impl Query {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            params: BTreeMap::new(),
            cache_mode: CacheMode::Use,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_cache_mode(mut self, cache_mode: CacheMode) -> Self {
        self.cache_mode = cache_mode;
        self
    }

    /// Lightweight query used by health checks. Never cached.
    pub fn probe() -> Self {
        Self::new("ping").with_cache_mode(CacheMode::Bypass)
    }

    /// Stable textual form of the operation and its parameters.
    pub fn fingerprint(&self) -> String {
        let params = self.encoded_params();
        if params.is_empty() {
            self.operation.clone()
        } else {
            format!("{}?{params}", self.operation)
        }
    }

    pub fn cache_key(&self, source_id: &SourceId) -> String {
        format!("{source_id}:{}", self.fingerprint())
    }

    fn encoded_params(&self) -> String {
        self.params
            .iter()
            .map(|(key, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(key),
                    urlencoding::encode(value)
                )
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Outcome of a successful fetch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchResult {
    pub source_id: SourceId,
    pub payload: Payload,
    pub cached: bool,
    pub latency_ms: u64,
    pub fetched_at: UtcDateTime,
    pub warnings: Vec<String>,
}

/// One open channel to a source.
pub trait SourceConnection: Send {
    fn execute<'a>(&'a mut self, query: &'a Query) -> ConnectorFuture<'a, Payload>;

    fn ping<'a>(&'a mut self) -> ConnectorFuture<'a, ()>;

    fn close<'a>(&'a mut self) -> ConnectorFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// Opens connections for a source.
pub trait SourceConnector: Send + Sync {
    fn connect<'a>(&'a self, source: &'a Source) -> ConnectorFuture<'a, Box<dyn SourceConnection>>;
}

/// Connector issuing `GET {endpoint}/{operation}?{params}` requests.
#[derive(Clone)]
pub struct HttpConnector {
    client: Arc<dyn HttpClient>,
}

impl HttpConnector {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self { client }
    }
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self::new(Arc::new(ReqwestHttpClient::new()))
    }
}

impl SourceConnector for HttpConnector {
    fn connect<'a>(&'a self, source: &'a Source) -> ConnectorFuture<'a, Box<dyn SourceConnection>> {
        Box::pin(async move {
            let auth = source
                .auth
                .resolve()
                .map_err(|error| ConnectorError::new(error.to_string()))?;

            let connection: Box<dyn SourceConnection> = Box::new(HttpConnection {
                client: Arc::clone(&self.client),
                endpoint: source.endpoint.trim_end_matches('/').to_owned(),
                auth,
                timeout: source.settings.timeout(),
            });
            Ok(connection)
        })
    }
}

struct HttpConnection {
    client: Arc<dyn HttpClient>,
    endpoint: String,
    auth: HttpAuth,
    timeout: Duration,
}

impl HttpConnection {
    fn request(&self, query: &Query) -> HttpRequest {
        let params = query.encoded_params();
        let url = if params.is_empty() {
            format!("{}/{}", self.endpoint, query.operation)
        } else {
            format!("{}/{}?{params}", self.endpoint, query.operation)
        };

        HttpRequest::get(url, self.timeout).with_auth(&self.auth)
    }
}

impl SourceConnection for HttpConnection {
    fn execute<'a>(&'a mut self, query: &'a Query) -> ConnectorFuture<'a, Payload> {
        Box::pin(async move {
            let response = self
                .client
                .get(self.request(query))
                .await
                .map_err(|error| ConnectorError::new(error.to_string()))?;

            if !response.is_success() {
                return Err(ConnectorError::new(format!(
                    "source responded with HTTP {}",
                    response.status
                )));
            }

            let body: serde_json::Value = serde_json::from_str(&response.body)
                .map_err(|error| ConnectorError::new(format!("invalid JSON body: {error}")))?;

            Payload::from_json(body)
                .ok_or_else(|| ConnectorError::new("response body is not a JSON object"))
        })
    }

    fn ping<'a>(&'a mut self) -> ConnectorFuture<'a, ()> {
        Box::pin(async move {
            let response = self
                .client
                .get(self.request(&Query::probe()))
                .await
                .map_err(|error| ConnectorError::new(error.to_string()))?;

            if response.is_success() {
                Ok(())
            } else {
                Err(ConnectorError::new(format!(
                    "ping responded with HTTP {}",
                    response.status
                )))
            }
        })
    }
}
