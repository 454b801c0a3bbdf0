//! The validating proxy decorator.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use http_body_util::BodyExt;
use serde_json::Value;

use super::{CompiledSchema, ValidationError};
use crate::proxy::{BoxProxy, Context, Proxy, ProxyError, Request, Response};

/// Wrap `next` so every request body is checked against `schema` first.
///
/// The body is buffered and handed to `next` as a fresh stream over the
/// same bytes. `next` runs at most once, only for valid bodies, and its
/// result is returned untouched.
pub fn decorate(schema: CompiledSchema, next: BoxProxy) -> BoxProxy {
    Arc::new(ValidatingProxy { schema, next })
}

struct ValidatingProxy {
    schema: CompiledSchema,
    next: BoxProxy,
}

#[async_trait]
impl Proxy for ValidatingProxy {
    async fn call(&self, ctx: Context, mut request: Request) -> Result<Response, ProxyError> {
        let Some(body) = request.take_body() else {
            return Err(ValidationError::EmptyBody.into());
        };

        let bytes = body.collect().await.map_err(ProxyError::Body)?.to_bytes();
        if bytes.is_empty() {
            return Err(ValidationError::EmptyBody.into());
        }
        request.set_body(Body::from(bytes.clone()));

        let document: Value = serde_json::from_slice(&bytes).map_err(ValidationError::Parse)?;
        self.schema
            .validate(&document)
            .map_err(ValidationError::Schema)?;

        self.next.call(ctx, request).await
    }
}
