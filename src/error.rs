// src/error.rs
//! Typed failures of each tier.
//!
//! The orchestrator matches on these explicitly: source and store errors mean
//! "try the next tier", a [`GenerationError`] is the only request-fatal case.

use std::time::Duration;

use thiserror::Error;

use crate::model::RequestKind;

/// Failures of the live crawler tier.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    /// Sidecar unreachable, refused the request, or answered `success=false`.
    #[error("live source unavailable: {0}")]
    Unavailable(String),
    /// The live step exceeded the orchestration budget.
    #[error("live source timed out after {0:?}")]
    Timeout(Duration),
    /// Payload that cannot be turned into records.
    #[error("live source returned malformed data: {0}")]
    Malformed(String),
}

impl SourceError {
    /// Timeouts are reported as unavailability in the public taxonomy.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SourceError::Unavailable(_) | SourceError::Timeout(_))
    }
}

/// Failures of the persistent store tier.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store query failed: {0}")]
    Query(String),
}

/// The fallback generator produced a payload of the wrong shape.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GenerationError {
    #[error("fallback for {kind} produced {got} items, expected {expected}")]
    InvariantViolation {
        kind: RequestKind,
        expected: usize,
        got: usize,
    },
}

/// Outcome of a write-path operation run by the scheduler.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}
