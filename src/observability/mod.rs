//! Observability: structured logging through `tracing`.
//!
//! Log output is configured from `[observability.logging]`; `RUST_LOG`
//! overrides the configured filter when set.

mod tracing_init;

pub use tracing_init::*;
