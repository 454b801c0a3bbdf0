//! Factory wiring: installs the validating decorator around endpoint and
//! backend proxies that have a schema configured.

use super::{CompilationError, CompiledSchema, compile, decorate, extract};
use crate::{
    config::{BackendConfig, EndpointConfig, ExtraConfig},
    proxy::{BackendFactory, BoxProxy, ProxyError, ProxyFactory},
};

/// Validate requests entering an endpoint before `inner`'s proxy sees them.
pub fn proxy_factory<F: ProxyFactory>(inner: F) -> ValidatingProxyFactory<F> {
    ValidatingProxyFactory { inner }
}

/// Validate requests sent to each backend before `inner`'s proxy sees them.
pub fn backend_factory<B: BackendFactory>(inner: B) -> ValidatingBackendFactory<B> {
    ValidatingBackendFactory { inner }
}

pub struct ValidatingProxyFactory<F> {
    inner: F,
}

impl<F: ProxyFactory> ProxyFactory for ValidatingProxyFactory<F> {
    fn new_proxy(&self, endpoint: &EndpointConfig) -> Result<BoxProxy, ProxyError> {
        let next = self.inner.new_proxy(endpoint)?;

        match configured_schema(&endpoint.extra_config) {
            None => Ok(next),
            Some(Err(e)) => {
                tracing::error!(
                    endpoint = %endpoint.endpoint,
                    error = %e,
                    "Invalid JSON schema, request validation disabled"
                );
                Ok(next)
            }
            Some(Ok(schema)) => {
                tracing::debug!(endpoint = %endpoint.endpoint, "Validator enabled");
                Ok(decorate(schema, next))
            }
        }
    }
}

pub struct ValidatingBackendFactory<B> {
    inner: B,
}

impl<B: BackendFactory> BackendFactory for ValidatingBackendFactory<B> {
    fn new_backend(&self, backend: &BackendConfig) -> BoxProxy {
        let next = self.inner.new_backend(backend);

        match configured_schema(&backend.extra_config) {
            None => next,
            Some(Err(e)) => {
                tracing::error!(
                    backend = %backend.url_pattern,
                    error = %e,
                    "Invalid JSON schema, request validation disabled"
                );
                next
            }
            Some(Ok(schema)) => {
                tracing::debug!(backend = %backend.url_pattern, "Validator enabled");
                decorate(schema, next)
            }
        }
    }
}

fn configured_schema(extra_config: &ExtraConfig) -> Option<Result<CompiledSchema, CompilationError>> {
    extract(extra_config).map(compile)
}
