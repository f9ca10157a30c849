//! Command-line surface: `pipeline-cli <operation> [json-params]`.
//!
//! One acquisition per invocation; the answer is a single JSON envelope on
//! stdout, so callers in other processes can shell out to it.

use clap::Parser;
use serde_json::{json, Value};
use thiserror::Error;

use crate::model::{AcquireParams, RequestKind};
use crate::orchestrator::Orchestrator;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("unknown operation")]
    UnknownOperation(String),
    #[error("invalid params: {0}")]
    InvalidParams(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "pipeline-cli")]
#[command(about = "Run one trend acquisition and print the result as JSON")]
#[command(version)]
pub struct Cli {
    /// get_trending_topics, search_topics, get_user_notes, get_platform_stats
    /// or get_trending_keywords
    pub operation: String,

    /// JSON object of parameters, e.g. '{"limit":5,"keyword":"skincare"}'
    #[arg(default_value = "{}")]
    pub params: String,
}

/// Map an operation name to its request kind.
pub fn parse_operation(op: &str) -> Result<RequestKind, CliError> {
    match op {
        "get_trending_topics" => Ok(RequestKind::Topics),
        "search_topics" => Ok(RequestKind::Search),
        "get_user_notes" => Ok(RequestKind::UserNotes),
        "get_platform_stats" => Ok(RequestKind::Stats),
        "get_trending_keywords" => Ok(RequestKind::Keywords),
        other => Err(CliError::UnknownOperation(other.to_string())),
    }
}

pub fn parse_params(raw: &str) -> Result<AcquireParams, CliError> {
    if raw.trim().is_empty() {
        return Ok(AcquireParams::default());
    }
    Ok(serde_json::from_str(raw)?)
}

fn failure(error: impl std::fmt::Display) -> Value {
    json!({ "success": false, "error": error.to_string(), "data": null })
}

/// Run the requested operation and return the envelope to print.
pub async fn dispatch(orchestrator: &Orchestrator, cli: &Cli) -> Value {
    let kind = match parse_operation(&cli.operation) {
        Ok(k) => k,
        Err(e) => {
            tracing::warn!(operation = %cli.operation, "unknown operation");
            return failure(e);
        }
    };
    let params = match parse_params(&cli.params) {
        Ok(p) => p,
        Err(e) => return failure(e),
    };
    match orchestrator.acquire(kind, &params).await {
        Ok(acq) => serde_json::to_value(&acq.result).unwrap_or_else(failure),
        Err(e) => failure(e),
    }
}
