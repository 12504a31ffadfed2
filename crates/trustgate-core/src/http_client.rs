//! HTTP transport for sources reached over the network.
//!
//! Sources are read-only from the access layer's point of view, so every
//! request is a `GET` carrying resolved credentials and the source timeout.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;

/// Credentials attached to a request once a [`SourceAuth`](crate::SourceAuth)
/// has been resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpAuth {
    None,
    BearerToken(String),
    Header { name: String, value: String },
    Cookie(String),
}

impl HttpAuth {
    fn header(&self) -> Option<(String, String)> {
        match self {
            Self::None => None,
            Self::BearerToken(token) => {
                Some((String::from("authorization"), format!("Bearer {token}")))
            }
            Self::Header { name, value } => Some((name.to_ascii_lowercase(), value.clone())),
            Self::Cookie(cookie) => Some((String::from("cookie"), cookie.clone())),
        }
    }
}

/// A `GET` against a source endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    /// Lower-cased header names.
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::from([(String::from("accept"), String::from("application/json"))]),
            timeout,
        }
    }

    pub fn with_auth(mut self, auth: &HttpAuth) -> Self {
        if let Some((name, value)) = auth.header() {
            self.headers.insert(name, value);
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok_json(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
        }
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Transport failure before a status code was available.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HttpError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("could not connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("could not read response body from {url}: {reason}")]
    Body { url: String, reason: String },
}

pub type HttpFuture<'a> = Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>>;

pub trait HttpClient: Send + Sync {
    fn get<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a>;
}

/// Offline transport for tests. Answers by longest matching URL prefix,
/// falling back to a default response, and records every request.
#[derive(Debug)]
pub struct StaticHttpClient {
    fallback: HttpResponse,
    routes: Vec<(String, HttpResponse)>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl StaticHttpClient {
    pub fn new(fallback: HttpResponse) -> Self {
        Self {
            fallback,
            routes: Vec::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_route(mut self, url_prefix: impl Into<String>, response: HttpResponse) -> Self {
        self.routes.push((url_prefix.into(), response));
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .expect("static client request log is not poisoned")
            .clone()
    }

    fn respond(&self, url: &str) -> HttpResponse {
        self.routes
            .iter()
            .filter(|(prefix, _)| url.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map_or_else(|| self.fallback.clone(), |(_, response)| response.clone())
    }
}

impl HttpClient for StaticHttpClient {
    fn get<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
        let response = self.respond(&request.url);
        self.requests
            .lock()
            .expect("static client request log is not poisoned")
            .push(request);
        Box::pin(async move { Ok(response) })
    }
}

#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Arc<reqwest::Client>,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("trustgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self::with_client(client)
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for ReqwestHttpClient {
    fn get<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
        Box::pin(async move {
            let HttpRequest {
                url,
                headers,
                timeout,
            } = request;
            let builder = headers
                .iter()
                .fold(self.client.get(&url), |builder, (name, value)| {
                    builder.header(name, value)
                })
                .timeout(timeout);

            let response = builder.send().await.map_err(|error| {
                let reason = error.to_string();
                if error.is_timeout() {
                    HttpError::Timeout { url: url.clone() }
                } else if error.is_connect() {
                    HttpError::Connect {
                        url: url.clone(),
                        reason,
                    }
                } else {
                    HttpError::Request {
                        url: url.clone(),
                        reason,
                    }
                }
            })?;

            let status = response.status().as_u16();
            let body = response.text().await.map_err(|error| HttpError::Body {
                url,
                reason: error.to_string(),
            })?;
            Ok(HttpResponse { status, body })
        })
    }
}
