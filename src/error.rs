//! Failure taxonomy for upstream calls and orchestration cycles.
//!
//! Upstream adapters return [`SourceError`] / [`EmbedError`] so the shared
//! retry policy can tell transient failures from fatal ones. A whole
//! ingestion cycle fails with [`CycleError`], which never mutates the
//! checkpoint.

use chrono::NaiveDate;
use thiserror::Error;

use crate::retry::Retryable;

/// Errors from the regulatory content source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// HTTP 429.
    #[error("Rate limited by content source")]
    RateLimited,

    /// 5xx, timeout, or connection failure.
    #[error("Transient content source failure: {0}")]
    Transient(String),

    /// HTTP 404.
    #[error("Content not found")]
    NotFound,

    /// Any other non-2xx status.
    #[error("Content source returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed content source response: {0}")]
    Decode(String),
}

impl SourceError {
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            429 => SourceError::RateLimited,
            404 => SourceError::NotFound,
            s if s >= 500 => SourceError::Transient(format!("HTTP {}: {}", s, body)),
            s => SourceError::Status { status: s, body },
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SourceError::Decode(err.to_string())
        } else {
            SourceError::Transient(err.to_string())
        }
    }
}

impl Retryable for SourceError {
    fn is_retryable(&self) -> bool {
        matches!(self, SourceError::RateLimited | SourceError::Transient(_))
    }
}

/// Errors from the embedding provider.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("Embedding provider rate limited")]
    RateLimited,

    #[error("Transient embedding failure: {0}")]
    Transient(String),

    #[error("Embedding API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid embedding response: {0}")]
    Decode(String),

    #[error("Embedding provider is disabled")]
    Disabled,
}

impl EmbedError {
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            429 => EmbedError::RateLimited,
            s if s >= 500 => EmbedError::Transient(format!("HTTP {}: {}", s, body)),
            s => EmbedError::Api { status: s, body },
        }
    }
}

impl From<reqwest::Error> for EmbedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            EmbedError::Decode(err.to_string())
        } else {
            EmbedError::Transient(err.to_string())
        }
    }
}

impl Retryable for EmbedError {
    fn is_retryable(&self) -> bool {
        matches!(self, EmbedError::RateLimited | EmbedError::Transient(_))
    }
}

/// Fatal conditions that abort a whole orchestration cycle.
///
/// The checkpoint is left untouched whenever one of these is returned, so
/// the next run retries the same date.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("Application state not found; run `regobs init` first")]
    MissingCheckpoint,

    #[error("{failed} of {total} reference tasks failed, at or above the failure threshold")]
    FailureRate { failed: usize, total: usize },

    /// The requested date is not the checkpoint's next date.
    #[error("Run requested for {requested} but next processing date is {expected}")]
    SchedulingDrift {
        requested: NaiveDate,
        expected: NaiveDate,
    },

    /// Caught up, and the next date lies beyond the present.
    #[error("Next processing date {date} is after the present ({present}); nothing to ingest yet")]
    NotYetDue { date: NaiveDate, present: NaiveDate },

    #[error("Checkpoint task for {date} failed; checkpoint not advanced")]
    DesignatedTaskFailed { date: NaiveDate },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
