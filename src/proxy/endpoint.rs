use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use bytes::Bytes;
use futures::future::join_all;
use http_body_util::BodyExt;
use serde_json::{Map, Value};

use super::{
    BackendFactory, BoxProxy, Context, Metadata, Proxy, ProxyError, ProxyFactory, Request,
    Response,
};
use crate::config::EndpointConfig;

/// Builds the proxy serving an endpoint from its backends.
///
/// A single backend is called directly. Several backends are called
/// concurrently and their object responses merged.
pub struct EndpointProxyFactory<B> {
    backends: B,
}

impl<B: BackendFactory> EndpointProxyFactory<B> {
    pub fn new(backends: B) -> Self {
        Self { backends }
    }
}

impl<B: BackendFactory> ProxyFactory for EndpointProxyFactory<B> {
    fn new_proxy(&self, endpoint: &EndpointConfig) -> Result<BoxProxy, ProxyError> {
        let mut backends: Vec<BoxProxy> = endpoint
            .backend
            .iter()
            .map(|backend| self.backends.new_backend(backend))
            .collect();

        match backends.len() {
            0 => Err(ProxyError::NoBackends(endpoint.endpoint.clone())),
            1 => Ok(backends.remove(0)),
            _ => Ok(Arc::new(MergingProxy { backends })),
        }
    }
}

/// Fans a request out to every backend and merges the results.
struct MergingProxy {
    backends: Vec<BoxProxy>,
}

#[async_trait]
impl Proxy for MergingProxy {
    async fn call(&self, ctx: Context, mut request: Request) -> Result<Response, ProxyError> {
        let body: Option<Bytes> = match request.take_body() {
            Some(body) => Some(body.collect().await.map_err(ProxyError::Body)?.to_bytes()),
            None => None,
        };

        let calls = self.backends.iter().map(|backend| {
            let mut copy = request.clone_without_body();
            if let Some(bytes) = &body {
                copy.set_body(Body::from(bytes.clone()));
            }
            backend.call(ctx.clone(), copy)
        });

        merge(join_all(calls).await)
    }
}

/// Merge backend results in declaration order. Keys already present are not
/// overwritten. The merged response is incomplete when any backend failed or
/// answered with something other than an object.
fn merge(results: Vec<Result<Response, ProxyError>>) -> Result<Response, ProxyError> {
    let mut data = Map::new();
    let mut is_complete = true;
    let mut first_error = None;
    let mut any_ok = false;
    let mut metadata = Metadata::default();

    for result in results {
        match result {
            Ok(response) => {
                if !any_ok {
                    metadata.status = response.metadata.status;
                }
                any_ok = true;
                is_complete &= response.is_complete;
                match response.data {
                    Value::Object(object) => {
                        for (key, value) in object {
                            data.entry(key).or_insert(value);
                        }
                    }
                    _ => is_complete = false,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Backend call failed, merging partial response");
                is_complete = false;
                first_error.get_or_insert(e);
            }
        }
    }

    match (any_ok, first_error) {
        (false, Some(e)) => Err(e),
        _ => Ok(Response {
            data: Value::Object(data),
            is_complete,
            metadata,
        }),
    }
}
