use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Free-form per-endpoint and per-backend settings consumed by gateway
/// components. Each component reads only its own namespaced key.
pub type ExtraConfig = serde_json::Map<String, serde_json::Value>;

/// A public endpoint exposed by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointConfig {
    /// Route path. Parameters use `{name}` segments (e.g. `/users/{id}`).
    pub endpoint: String,

    /// HTTP method accepted by this endpoint.
    #[serde(default = "default_method")]
    pub method: String,

    /// Per-endpoint timeout in seconds. Falls back to `server.timeout_secs`.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Upstream targets the request is forwarded to.
    #[serde(default)]
    pub backend: Vec<BackendConfig>,

    /// Namespaced component settings.
    #[serde(default)]
    pub extra_config: ExtraConfig,
}

impl EndpointConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: default_method(),
            timeout_secs: None,
            backend: Vec::new(),
            extra_config: ExtraConfig::new(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.endpoint.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "endpoint '{}' must start with '/'",
                self.endpoint
            )));
        }
        if self.endpoint.split('/').any(|segment| segment.starts_with(':')) {
            return Err(ConfigError::Validation(format!(
                "endpoint '{}' uses ':param' segments; use '{{param}}' instead",
                self.endpoint
            )));
        }
        if http::Method::from_bytes(self.method.as_bytes()).is_err() {
            return Err(ConfigError::Validation(format!(
                "endpoint '{}' has an invalid method '{}'",
                self.endpoint, self.method
            )));
        }
        for backend in &self.backend {
            backend.validate(&self.endpoint)?;
        }
        Ok(())
    }
}

/// An upstream service an endpoint forwards to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Base URLs of the upstream. The first entry is used.
    #[serde(default)]
    pub host: Vec<String>,

    /// Path on the upstream. Supports `{name}` placeholders filled from the
    /// endpoint's route parameters.
    pub url_pattern: String,

    /// Method to use upstream. Defaults to the incoming request's method.
    #[serde(default)]
    pub method: Option<String>,

    /// Extra headers sent with every upstream request.
    #[serde(default)]
    pub headers: std::collections::BTreeMap<String, String>,

    /// Namespaced component settings.
    #[serde(default)]
    pub extra_config: ExtraConfig,
}

impl BackendConfig {
    pub fn new(host: impl Into<String>, url_pattern: impl Into<String>) -> Self {
        Self {
            host: vec![host.into()],
            url_pattern: url_pattern.into(),
            ..Default::default()
        }
    }

    fn validate(&self, endpoint: &str) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Validation(format!(
                "backend '{}' of endpoint '{}' has no host",
                self.url_pattern, endpoint
            )));
        }
        if let Some(method) = &self.method
            && http::Method::from_bytes(method.as_bytes()).is_err()
        {
            return Err(ConfigError::Validation(format!(
                "backend '{}' of endpoint '{}' has an invalid method '{}'",
                self.url_pattern, endpoint, method
            )));
        }
        Ok(())
    }
}

fn default_method() -> String {
    "GET".to_string()
}

/// Route path with parameter names erased: `/users/{id}` and
/// `/users/{name}` share the shape `/users/{}`.
fn route_shape(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if segment.starts_with("{*") && segment.ends_with('}') {
                "{*}"
            } else if segment.starts_with('{') && segment.ends_with('}') {
                "{}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Validate every endpoint and reject duplicate method/path pairs. Paths
/// with the same shape must also name their parameters identically, since
/// they share one route.
pub(super) fn validate_endpoints(endpoints: &[EndpointConfig]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    let mut shapes: HashMap<String, &str> = HashMap::new();
    for endpoint in endpoints {
        endpoint.validate()?;

        let shape = route_shape(&endpoint.endpoint);
        let registered = *shapes.entry(shape.clone()).or_insert(endpoint.endpoint.as_str());
        if registered != endpoint.endpoint {
            return Err(ConfigError::Validation(format!(
                "endpoint '{}' conflicts with '{}'; use the same parameter names",
                endpoint.endpoint, registered
            )));
        }

        if !seen.insert((endpoint.method.to_ascii_uppercase(), shape)) {
            return Err(ConfigError::Validation(format!(
                "duplicate endpoint {} {}",
                endpoint.method, endpoint.endpoint
            )));
        }
    }
    Ok(())
}
