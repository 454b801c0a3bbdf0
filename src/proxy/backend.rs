//! HTTP backend proxy.
//!
//! Forwards a request to the first configured host of a backend using the
//! gateway's shared `reqwest::Client`, and decodes the upstream body as JSON.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use http::{
    HeaderMap, HeaderName, HeaderValue, Method,
    header::{ACCEPT, CONTENT_TYPE},
};
use http_body_util::BodyExt;
use serde_json::Value;
use url::Url;

use super::{BackendFactory, BoxProxy, Context, Metadata, Proxy, ProxyError, Request, Response};
use crate::config::BackendConfig;

/// Incoming headers copied to the upstream request.
const FORWARDED_HEADERS: &[&str] = &["content-type", "accept", "x-request-id"];

/// Creates an [`HttpBackend`] per backend, all sharing one client.
#[derive(Debug, Clone)]
pub struct HttpBackendFactory {
    client: reqwest::Client,
}

impl HttpBackendFactory {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl BackendFactory for HttpBackendFactory {
    fn new_backend(&self, backend: &BackendConfig) -> BoxProxy {
        Arc::new(HttpBackend::new(self.client.clone(), backend))
    }
}

#[derive(Debug)]
pub struct HttpBackend {
    client: reqwest::Client,
    host: String,
    url_pattern: String,
    method: Option<Method>,
    headers: HeaderMap,
}

impl HttpBackend {
    pub fn new(client: reqwest::Client, config: &BackendConfig) -> Self {
        let host = config
            .host
            .first()
            .map(|h| h.trim_end_matches('/').to_string())
            .unwrap_or_default();

        let method = config
            .method
            .as_deref()
            .and_then(|m| Method::from_bytes(m.to_ascii_uppercase().as_bytes()).ok());

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            match (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => tracing::warn!(
                    backend = %config.url_pattern,
                    header = %name,
                    "Skipping invalid backend header"
                ),
            }
        }

        Self {
            client,
            host,
            url_pattern: config.url_pattern.clone(),
            method,
            headers,
        }
    }

    /// Upstream URL for `request`: the pattern's segments appended to the
    /// host with `{param}` placeholders filled in, plus the incoming query
    /// string. Each filled segment is percent-encoded as a single segment.
    fn url_for(&self, request: &Request) -> Result<Url, ProxyError> {
        let mut url = Url::parse(&self.host)
            .map_err(|e| ProxyError::Internal(format!("backend host '{}': {e}", self.host)))?;

        let (pattern, pattern_query) = match self.url_pattern.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (self.url_pattern.as_str(), None),
        };

        let mut segments = Vec::new();
        for template in pattern.trim_start_matches('/').split('/') {
            let (segment, filled_by) = fill_segment(template, &request.params);
            if let Some(name) = filled_by
                && matches!(segment.as_str(), "." | "..")
            {
                return Err(ProxyError::InvalidParam { name: name.to_string() });
            }
            segments.push(segment);
        }

        {
            let mut path = url.path_segments_mut().map_err(|()| {
                ProxyError::Internal(format!("backend host '{}' cannot be a base URL", self.host))
            })?;
            path.pop_if_empty();
            for segment in &segments {
                path.push(segment);
            }
        }

        let query = [pattern_query, request.query.as_deref()]
            .into_iter()
            .flatten()
            .filter(|q| !q.is_empty())
            .collect::<Vec<_>>()
            .join("&");
        if !query.is_empty() {
            url.set_query(Some(&query));
        }
        Ok(url)
    }

    fn upstream_headers(&self, incoming: &HeaderMap) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for name in FORWARDED_HEADERS {
            if let Some(value) = incoming.get(*name) {
                headers.insert(HeaderName::from_static(*name), value.clone());
            }
        }
        headers.extend(self.headers.clone());
        headers
    }

    async fn send(
        &self,
        url: Url,
        method: Method,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<Response, ProxyError> {
        let mut builder = self.client.request(method, url.clone()).headers(headers);
        if !body.is_empty() {
            builder = builder.body(body);
        }

        let upstream = builder.send().await?;
        let status = upstream.status();
        let headers = upstream.headers().clone();
        let bytes = upstream.bytes().await?;

        if !status.is_success() {
            return Err(ProxyError::UpstreamStatus {
                url: url.to_string(),
                status,
            });
        }

        Ok(Response {
            data: decode_body(&headers, &bytes),
            is_complete: true,
            metadata: Metadata { status, headers },
        })
    }
}

/// Fill the `{name}` placeholders of one pattern segment from `params`.
/// Returns the segment and the first parameter used, if any. Unknown
/// placeholders are kept as written.
fn fill_segment<'a>(
    template: &str,
    params: &'a HashMap<String, String>,
) -> (String, Option<&'a str>) {
    let mut segment = String::with_capacity(template.len());
    let mut filled_by = None;
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        segment.push_str(&rest[..start]);
        let tail = &rest[start..];
        let param = tail
            .find('}')
            .and_then(|end| params.get_key_value(&tail[1..end]).map(|kv| (end, kv)));
        match param {
            Some((end, (name, value))) => {
                segment.push_str(value);
                filled_by.get_or_insert(name.as_str());
                rest = &tail[end + 1..];
            }
            None => {
                segment.push('{');
                rest = &tail[1..];
            }
        }
    }
    segment.push_str(rest);
    (segment, filled_by)
}

/// Decode an upstream body: JSON when it parses, a string otherwise.
fn decode_body(headers: &HeaderMap, bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(e) => {
            let content_type = headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            if content_type.contains("json") {
                tracing::debug!(error = %e, "Backend declared JSON but body did not parse");
            }
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

#[async_trait]
impl Proxy for HttpBackend {
    async fn call(&self, ctx: Context, mut request: Request) -> Result<Response, ProxyError> {
        let url = self.url_for(&request)?;
        let method = self
            .method
            .clone()
            .unwrap_or_else(|| request.method.clone());

        let mut headers = self.upstream_headers(&request.headers);
        if !headers.contains_key(ACCEPT) {
            headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        }

        let body = match request.take_body() {
            Some(body) => body.collect().await.map_err(ProxyError::Body)?.to_bytes(),
            None => Bytes::new(),
        };

        tracing::debug!(url = %url, method = %method, "Forwarding request to backend");
        ctx.run(self.send(url, method, headers, body)).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_json, header, method, path, query_param},
    };

    use super::*;

    fn backend_for(server: &MockServer, url_pattern: &str) -> HttpBackend {
        HttpBackend::new(
            reqwest::Client::new(),
            &BackendConfig::new(server.uri(), url_pattern),
        )
    }

    #[test]
    fn test_url_substitutes_params_and_query() {
        let backend = HttpBackend::new(
            reqwest::Client::new(),
            &BackendConfig::new("http://users.internal/", "/v1/users/{id}/posts/{post}"),
        );
        let mut request = Request::new(Method::GET, "/users/7/posts/9");
        request.params.insert("id".into(), "7".into());
        request.params.insert("post".into(), "9".into());
        request.query = Some("page=2".into());

        assert_eq!(
            backend.url_for(&request).unwrap().as_str(),
            "http://users.internal/v1/users/7/posts/9?page=2"
        );
    }

    #[test]
    fn test_params_encoded_as_single_segment() {
        let backend = HttpBackend::new(
            reqwest::Client::new(),
            &BackendConfig::new("http://users.internal", "/v1/users/{id}"),
        );
        let mut request = Request::new(Method::GET, "/users/x");
        request.params.insert("id".into(), "../admin?drop=1#frag".into());

        assert_eq!(
            backend.url_for(&request).unwrap().as_str(),
            "http://users.internal/v1/users/..%2Fadmin%3Fdrop=1%23frag"
        );

        request.params.insert("id".into(), "ada lovelace".into());
        assert_eq!(
            backend.url_for(&request).unwrap().as_str(),
            "http://users.internal/v1/users/ada%20lovelace"
        );
    }

    #[test]
    fn test_dot_segment_param_rejected() {
        let backend = HttpBackend::new(
            reqwest::Client::new(),
            &BackendConfig::new("http://users.internal", "/v1/users/{id}/posts"),
        );
        for value in [".", ".."] {
            let mut request = Request::new(Method::GET, "/users/x/posts");
            request.params.insert("id".into(), value.into());

            let err = backend.url_for(&request).unwrap_err();
            assert!(matches!(&err, ProxyError::InvalidParam { name } if name == "id"));
            assert_eq!(err.status_code(), Some(http::StatusCode::BAD_REQUEST));
        }
    }

    #[test]
    fn test_pattern_query_and_base_path_kept() {
        let backend = HttpBackend::new(
            reqwest::Client::new(),
            &BackendConfig::new("http://users.internal/api/", "/users/{id}.json?v=2"),
        );
        let mut request = Request::new(Method::GET, "/users/7");
        request.params.insert("id".into(), "7".into());
        request.query = Some("page=2".into());

        assert_eq!(
            backend.url_for(&request).unwrap().as_str(),
            "http://users.internal/api/users/7.json?v=2&page=2"
        );
    }

    #[tokio::test]
    async fn test_dot_segment_param_never_reaches_backend() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let backend = backend_for(&server, "/v1/users/{id}");
        let mut request = Request::new(Method::GET, "/users/x");
        request.params.insert("id".into(), "..".into());

        let err = backend.call(Context::new(), request).await.unwrap_err();
        assert!(matches!(err, ProxyError::InvalidParam { .. }));
    }

    #[test]
    fn test_invalid_backend_header_skipped() {
        let mut config = BackendConfig::new("http://localhost", "/");
        config.headers.insert("x-tenant".into(), "acme".into());
        config.headers.insert("bad header".into(), "value".into());

        let backend = HttpBackend::new(reqwest::Client::new(), &config);
        assert_eq!(backend.headers.len(), 1);
        assert_eq!(backend.headers["x-tenant"], "acme");
    }

    #[test]
    fn test_decode_body() {
        let headers = HeaderMap::new();
        assert_eq!(decode_body(&headers, b""), Value::Null);
        assert_eq!(decode_body(&headers, b"{\"a\":1}"), json!({"a": 1}));
        assert_eq!(decode_body(&headers, b"plain"), json!("plain"));
    }

    #[tokio::test]
    async fn test_forwards_body_and_decodes_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/users/42"))
            .and(query_param("dry_run", "true"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({"name": "ada"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 42})))
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend_for(&server, "/v1/users/{id}");
        let mut request =
            Request::new(Method::POST, "/users/42").with_body(r#"{"name":"ada"}"#);
        request.params.insert("id".into(), "42".into());
        request.query = Some("dry_run=true".into());
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let response = backend.call(Context::new(), request).await.unwrap();
        assert_eq!(response.data, json!({"id": 42}));
        assert_eq!(response.metadata.status, http::StatusCode::CREATED);
        assert!(response.is_complete);
    }

    #[tokio::test]
    async fn test_configured_method_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/items"))
            .and(header("x-tenant", "acme"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = BackendConfig::new(server.uri(), "/items");
        config.method = Some("put".into());
        config.headers.insert("x-tenant".into(), "acme".into());
        let backend = HttpBackend::new(reqwest::Client::new(), &config);

        let response = backend
            .call(Context::new(), Request::new(Method::POST, "/items"))
            .await
            .unwrap();
        assert_eq!(response.data, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_upstream_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let backend = backend_for(&server, "/down");
        let err = backend
            .call(Context::new(), Request::new(Method::GET, "/down"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProxyError::UpstreamStatus { status, .. } if status == http::StatusCode::SERVICE_UNAVAILABLE
        ));
    }

    #[tokio::test]
    async fn test_deadline_bounds_backend_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let backend = backend_for(&server, "/slow");
        let ctx = Context::new().with_timeout(Duration::from_millis(50));
        let err = backend
            .call(ctx, Request::new(Method::GET, "/slow"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Timeout));
    }

    #[tokio::test]
    async fn test_cancelled_context_skips_backend() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let backend = backend_for(&server, "/never");
        let ctx = Context::new();
        ctx.cancel();
        let err = backend
            .call(ctx, Request::new(Method::GET, "/never"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Cancelled));
    }
}
