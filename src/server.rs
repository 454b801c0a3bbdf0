//! HTTP host for the proxy pipeline.
//!
//! Each configured endpoint becomes an axum route whose handler turns the
//! incoming request into a proxy [`Request`], runs it through the endpoint's
//! chain and renders the result as JSON.

use std::{collections::HashMap, error::Error as _, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::Path,
    response::{IntoResponse, Response as HttpResponse},
    routing::{MethodFilter, get, on},
};
use http::{HeaderName, HeaderValue, Method, StatusCode};
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::{
    config::{EndpointConfig, GatewayConfig},
    proxy::{
        Context, EndpointProxyFactory, HttpBackendFactory, ProxyError, ProxyFactory, Request,
        Response,
    },
    validation,
};

pub const HEALTH_PATH: &str = "/health";

/// Set on proxied responses: `false` when only part of the backends answered.
pub const COMPLETED_HEADER: HeaderName = HeaderName::from_static("x-schemagate-completed");

/// Build the gateway router: HTTP backends, request validation on endpoints
/// and backends that configure a schema, and the standard layers.
pub fn build_gateway(config: &GatewayConfig, client: reqwest::Client) -> Result<Router, ProxyError> {
    let backends = validation::backend_factory(HttpBackendFactory::new(client));
    let factory = validation::proxy_factory(EndpointProxyFactory::new(backends));
    build_router(config, &factory)
}

/// Build the router with proxies from `factory`.
pub fn build_router(
    config: &GatewayConfig,
    factory: &impl ProxyFactory,
) -> Result<Router, ProxyError> {
    let default_timeout = Duration::from_secs(config.server.timeout_secs);
    let mut router = Router::new().route(HEALTH_PATH, get(health));

    for endpoint in &config.endpoints {
        if endpoint.endpoint == HEALTH_PATH {
            return Err(ProxyError::Internal(format!(
                "endpoint path {HEALTH_PATH} is reserved"
            )));
        }

        let filter = method_filter(endpoint)?;
        let route = Arc::new(EndpointRoute {
            proxy: factory.new_proxy(endpoint)?,
            timeout: endpoint
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(default_timeout),
        });

        tracing::info!(
            endpoint = %endpoint.endpoint,
            method = %endpoint.method,
            backends = endpoint.backend.len(),
            "Registered endpoint"
        );

        router = router.route(
            &endpoint.endpoint,
            on(
                filter,
                move |params: Option<Path<HashMap<String, String>>>,
                      request: axum::extract::Request| {
                    let route = route.clone();
                    async move { route.handle(params, request).await }
                },
            ),
        );
    }

    let layers = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::extract::Request| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }),
        )
        .layer(RequestBodyLimitLayer::new(config.server.body_limit_bytes));

    Ok(router.layer(layers))
}

fn method_filter(endpoint: &EndpointConfig) -> Result<MethodFilter, ProxyError> {
    let method = Method::from_bytes(endpoint.method.to_ascii_uppercase().as_bytes())
        .map_err(|e| ProxyError::Internal(format!("endpoint {}: {e}", endpoint.endpoint)))?;
    MethodFilter::try_from(method)
        .map_err(|e| ProxyError::Internal(format!("endpoint {}: {e}", endpoint.endpoint)))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

struct EndpointRoute {
    proxy: crate::proxy::BoxProxy,
    timeout: Duration,
}

impl EndpointRoute {
    async fn handle(
        &self,
        params: Option<Path<HashMap<String, String>>>,
        request: axum::extract::Request,
    ) -> HttpResponse {
        let (parts, body) = request.into_parts();

        let mut proxied = Request::new(parts.method, parts.uri.path());
        proxied.query = parts.uri.query().map(str::to_owned);
        proxied.params = params.map(|Path(params)| params).unwrap_or_default();
        proxied.headers = parts.headers;
        proxied.body = Some(body);

        // Cancelled when the client goes away and this future is dropped.
        let token = CancellationToken::new();
        let _guard = token.clone().drop_guard();
        let ctx = Context::with_cancellation(token).with_timeout(self.timeout);

        match ctx.run(self.proxy.call(ctx.clone(), proxied)).await {
            Ok(response) => render(response),
            Err(e) => e.into_response(),
        }
    }
}

fn render(response: Response) -> HttpResponse {
    let completed = if response.is_complete { "true" } else { "false" };
    let mut rendered = (response.metadata.status, Json(response.data)).into_response();
    rendered
        .headers_mut()
        .insert(COMPLETED_HEADER, HeaderValue::from_static(completed));
    rendered
}

/// Error body returned by the gateway.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorInfo,
}

#[derive(Debug, Serialize)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub error_type: &'static str,
    pub message: String,
    pub code: &'static str,
}

impl ProxyError {
    /// Status and machine-readable code used when this error reaches a client.
    fn classify(&self) -> (StatusCode, &'static str) {
        if let Some(status) = self.status_code() {
            let code = match self {
                ProxyError::Validation(e) => e.code(),
                ProxyError::InvalidParam { .. } => "invalid_param",
                _ => "invalid_request",
            };
            return (status, code);
        }

        match self {
            ProxyError::Body(_) if body_too_large(self) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "body_too_large")
            }
            ProxyError::Body(_) => (StatusCode::INTERNAL_SERVER_ERROR, "body_read_error"),
            ProxyError::Backend(e) if e.is_timeout() => {
                (StatusCode::GATEWAY_TIMEOUT, "backend_timeout")
            }
            ProxyError::Backend(_) => (StatusCode::BAD_GATEWAY, "backend_error"),
            ProxyError::UpstreamStatus { .. } => (StatusCode::BAD_GATEWAY, "upstream_status"),
            ProxyError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            ProxyError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "cancelled"),
            ProxyError::NoBackends(_) => (StatusCode::INTERNAL_SERVER_ERROR, "no_backends"),
            ProxyError::Validation(_)
            | ProxyError::InvalidParam { .. }
            | ProxyError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        }
    }
}

/// Whether the error was caused by the request body exceeding the limit.
fn body_too_large(err: &ProxyError) -> bool {
    let mut source = err.source();
    while let Some(e) = source {
        if e.is::<http_body_util::LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> HttpResponse {
        let (status, code) = self.classify();
        let error_type = match status.as_u16() {
            400..=499 => "invalid_request_error",
            502 | 504 => "upstream_error",
            _ => "server_error",
        };

        if status.is_server_error() {
            tracing::warn!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let body = ErrorResponse {
            error: ErrorInfo {
                error_type,
                message: self.to_string(),
                code,
            },
        };
        (status, Json(body)).into_response()
    }
}
