// src/lib.rs
// Public library surface shared by both binaries and the integration tests.

pub mod api;
pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod fallback;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod scheduler;
pub mod service;
pub mod source;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::config::PipelineConfig;
pub use crate::model::{AcquireParams, AcquireResult, Provenance, RequestKind};
pub use crate::orchestrator::Orchestrator;
pub use crate::service::Service;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const ENV_LOG_JSON: &str = "PIPELINE_LOG_JSON";

/// Install the global subscriber. `RUST_LOG` wins over the default filter;
/// `PIPELINE_LOG_JSON=1` switches to JSON lines. Logs go to stderr so the
/// CLI can keep stdout for its result.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("trend_pipeline=info,warn"));
    let json = std::env::var(ENV_LOG_JSON).is_ok_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
