//! Gateway that validates JSON request bodies against per-endpoint and
//! per-backend JSON Schemas before proxying them.

pub mod config;
#[cfg(feature = "server")]
pub mod observability;
pub mod proxy;
pub mod server;
pub mod validation;
