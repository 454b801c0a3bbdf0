//! Test doubles for proxy stages.
//!
//! [`RecordingProxy`] stands in for the next stage of a chain: it counts
//! calls, captures the body it was handed and replies with a fixed result.
#![allow(dead_code)]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use http_body_util::BodyExt;
use serde_json::Value;

use super::{BoxProxy, Context, Proxy, ProxyError, Request, Response};

type Reply = dyn Fn() -> Result<Response, ProxyError> + Send + Sync;

#[derive(Clone)]
pub struct RecordingProxy {
    inner: Arc<Inner>,
}

struct Inner {
    calls: AtomicUsize,
    bodies: Mutex<Vec<Vec<u8>>>,
    saw_cancelled: Mutex<Vec<bool>>,
    reply: Box<Reply>,
}

impl RecordingProxy {
    /// Replies with a complete response carrying `data`.
    pub fn ok(data: Value) -> Self {
        Self::replying(move || Ok(Response::new(data.clone())))
    }

    pub fn replying(
        reply: impl Fn() -> Result<Response, ProxyError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                calls: AtomicUsize::new(0),
                bodies: Mutex::new(Vec::new()),
                saw_cancelled: Mutex::new(Vec::new()),
                reply: Box::new(reply),
            }),
        }
    }

    pub fn boxed(self) -> BoxProxy {
        Arc::new(self)
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    /// Bodies received, in call order. Calls without a body are not recorded.
    pub fn bodies(&self) -> Vec<Vec<u8>> {
        self.inner.bodies.lock().unwrap().clone()
    }

    /// Cancellation state of the context at each call.
    pub fn saw_cancelled(&self) -> Vec<bool> {
        self.inner.saw_cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl Proxy for RecordingProxy {
    async fn call(&self, ctx: Context, mut request: Request) -> Result<Response, ProxyError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        self.inner
            .saw_cancelled
            .lock()
            .unwrap()
            .push(ctx.is_cancelled());

        if let Some(body) = request.take_body() {
            let bytes = body.collect().await.map_err(ProxyError::Body)?.to_bytes();
            self.inner.bodies.lock().unwrap().push(bytes.to_vec());
        }

        (self.inner.reply)()
    }
}
