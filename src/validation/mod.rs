//! JSON Schema request validation.
//!
//! Endpoints and backends opt in by placing a JSON Schema document under
//! [`NAMESPACE`] in their `extra_config`:
//!
//! ```toml
//! [[endpoints]]
//! endpoint = "/users"
//! method = "POST"
//!
//! [endpoints.extra_config."github.com/devopsfaith/krakend-jsonschema"]
//! type = "object"
//! required = ["name"]
//! ```
//!
//! The schema is compiled once when the proxy chain is built. Each request
//! body is then parsed and checked before the next stage sees it; failures
//! are returned as [`ValidationError`]s that map to `400 Bad Request`.
//!
//! A schema that fails to compile is logged and the stage is left
//! unwrapped, so a typo in one schema does not take the route offline.

mod config;
mod error;
mod factory;
mod middleware;
mod schema;

pub use config::{NAMESPACE, extract};
pub use error::ValidationError;
pub use factory::{ValidatingBackendFactory, ValidatingProxyFactory, backend_factory, proxy_factory};
pub use middleware::decorate;
pub use schema::{
    CompilationError, CompiledSchema, DocumentValidator, JsonSchemaEngine, RESOURCE_NAME,
    SchemaEngine, Violation, compile, compile_with,
};
