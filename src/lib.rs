// src/lib.rs
// Public library surface for integration tests and the binary entry point.

pub mod analyze;
pub mod api;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod publish;
pub mod rank;
pub mod schedule;
pub mod store;
pub mod vibe;

// Convenient access to the router: `crate_root::api::router` and `crate_root::router`
pub use crate::api::router;
pub use crate::error::{PipelineError, Result};
pub use crate::pipeline::{Pipeline, TickOutcome};
