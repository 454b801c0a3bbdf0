//! Observability module.
//!
//! Installs the global `tracing` subscriber with a configurable output
//! format. Library code only emits events through `tracing` macros; the
//! binary decides where they go.

mod tracing_init;

pub use tracing_init::*;
