//! Errors surfaced to callers of the batch engine.
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid batch: {0}")]
    Validation(String),
    #[error("batch {0} not found")]
    NotFound(i64),
    #[error("batch {0} is processing")]
    Busy(i64),
    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

/// Why a single listing could not be published. Recorded on the item, never
/// propagated past the processor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("marketplace rejected listing ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("rate limited by marketplace: {0}")]
    RateLimited(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("publish timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

pub type EngineResult<T> = Result<T, EngineError>;
