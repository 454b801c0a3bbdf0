//! Proxy pipeline primitives.
//!
//! A gateway endpoint is served by a chain of [`Proxy`] stages. Factories
//! build the chain once per endpoint (and once per backend) at startup;
//! decorators such as request validation wrap the stage they are given and
//! delegate to it.
//!
//! ```text
//! endpoint handler ─▶ [validation] ─▶ endpoint proxy ─┬▶ [validation] ─▶ http backend
//!                                                     └▶ [validation] ─▶ http backend
//! ```

mod backend;
mod context;
mod endpoint;
#[cfg(test)]
pub(crate) mod test_utils;

use std::{collections::HashMap, future::Future, sync::Arc};

use async_trait::async_trait;
use axum::body::Body;
use http::{HeaderMap, Method, StatusCode};
use serde_json::Value;

pub use backend::{HttpBackend, HttpBackendFactory};
pub use context::Context;
pub use endpoint::EndpointProxyFactory;

use crate::{
    config::{BackendConfig, EndpointConfig},
    validation::ValidationError,
};

/// An incoming request as seen by proxy stages.
#[derive(Debug, Default)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    /// Route parameters captured from the endpoint path.
    pub params: HashMap<String, String>,
    pub headers: HeaderMap,
    /// Body stream. Readable once; stages that consume it must put back an
    /// equivalent stream before delegating.
    pub body: Option<Body>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn take_body(&mut self) -> Option<Body> {
        self.body.take()
    }

    pub fn set_body(&mut self, body: impl Into<Body>) {
        self.body = Some(body.into());
    }

    /// Copy everything except the body stream.
    pub fn clone_without_body(&self) -> Self {
        Self {
            method: self.method.clone(),
            path: self.path.clone(),
            query: self.query.clone(),
            params: self.params.clone(),
            headers: self.headers.clone(),
            body: None,
        }
    }
}

/// Response produced by a proxy stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pub data: Value,
    /// False when only part of the backends answered.
    pub is_complete: bool,
    pub metadata: Metadata,
}

impl Response {
    /// A complete `200 OK` response carrying `data`.
    pub fn new(data: Value) -> Self {
        Self {
            data,
            is_complete: true,
            metadata: Metadata::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// Errors that know which HTTP status they map to.
///
/// Only client-caused failures implement this; the gateway boundary checks
/// for it through [`ProxyError::status_code`].
pub trait HasStatusCode {
    fn status_code(&self) -> StatusCode;
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Body(axum::Error),

    #[error("Backend request failed: {0}")]
    Backend(#[from] reqwest::Error),

    #[error("Backend {url} responded with status {status}")]
    UpstreamStatus { url: String, status: StatusCode },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    Timeout,

    #[error("Endpoint {0} has no backends")]
    NoBackends(String),

    #[error("Route parameter '{name}' cannot be used as a path segment")]
    InvalidParam { name: String },

    #[error("{0}")]
    Internal(String),
}

impl ProxyError {
    /// Status for errors classified as client errors, `None` otherwise.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            ProxyError::Validation(err) => Some(err.status_code()),
            ProxyError::InvalidParam { .. } => Some(StatusCode::BAD_REQUEST),
            _ => None,
        }
    }
}

/// A stage of the proxy pipeline.
#[async_trait]
pub trait Proxy: Send + Sync {
    async fn call(&self, ctx: Context, request: Request) -> Result<Response, ProxyError>;
}

pub type BoxProxy = Arc<dyn Proxy>;

/// Proxy backed by an async closure.
pub struct ProxyFn<F>(F);

#[async_trait]
impl<F, Fut> Proxy for ProxyFn<F>
where
    F: Fn(Context, Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, ProxyError>> + Send,
{
    async fn call(&self, ctx: Context, request: Request) -> Result<Response, ProxyError> {
        (self.0)(ctx, request).await
    }
}

pub fn proxy_fn<F, Fut>(f: F) -> BoxProxy
where
    F: Fn(Context, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, ProxyError>> + Send + 'static,
{
    Arc::new(ProxyFn(f))
}

/// Builds the proxy chain serving one endpoint.
pub trait ProxyFactory: Send + Sync {
    fn new_proxy(&self, endpoint: &EndpointConfig) -> Result<BoxProxy, ProxyError>;
}

/// Builds the proxy talking to one backend. Construction cannot fail.
pub trait BackendFactory: Send + Sync {
    fn new_backend(&self, backend: &BackendConfig) -> BoxProxy;
}

pub struct FactoryFn<F>(F);

impl<F> ProxyFactory for FactoryFn<F>
where
    F: Fn(&EndpointConfig) -> Result<BoxProxy, ProxyError> + Send + Sync,
{
    fn new_proxy(&self, endpoint: &EndpointConfig) -> Result<BoxProxy, ProxyError> {
        (self.0)(endpoint)
    }
}

pub fn factory_fn<F>(f: F) -> FactoryFn<F>
where
    F: Fn(&EndpointConfig) -> Result<BoxProxy, ProxyError> + Send + Sync,
{
    FactoryFn(f)
}

pub struct BackendFn<F>(F);

impl<F> BackendFactory for BackendFn<F>
where
    F: Fn(&BackendConfig) -> BoxProxy + Send + Sync,
{
    fn new_backend(&self, backend: &BackendConfig) -> BoxProxy {
        (self.0)(backend)
    }
}

pub fn backend_fn<F>(f: F) -> BackendFn<F>
where
    F: Fn(&BackendConfig) -> BoxProxy + Send + Sync,
{
    BackendFn(f)
}
