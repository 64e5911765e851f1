//! Error types for the measurement engine
//!
//! Two layers:
//! - [`MedirError`] carries the full context of a failure (status codes,
//!   durations, partial results) and is what `Result` propagates.
//! - [`ErrorKind`] is the compact classification the aggregator counts
//!   failures under, and the retry policy decides on.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::AggregatedReport;

/// Result type alias for medir operations
pub type Result<T> = std::result::Result<T, MedirError>;

/// Error type for all measurement engine operations
#[derive(Debug, Error)]
pub enum MedirError {
    /// Connection-level failure: reset, refused, DNS, TLS, mid-stream cut
    #[error("transport error: {message}")]
    Transport {
        /// Human-readable transport failure description
        message: String,
    },

    /// Server-side failure (HTTP 5xx)
    #[error("server error: HTTP {status}")]
    Server {
        /// HTTP status code in the 500..=599 range
        status: u16,
    },

    /// Endpoint signalled explicit rate limiting (HTTP 429)
    #[error("rate limited by endpoint")]
    RateLimited {
        /// Server-suggested delay before the next attempt, if provided
        retry_after: Option<Duration>,
    },

    /// Request was rejected as malformed or unauthorized (4xx other than 429)
    #[error("client error: HTTP {status}")]
    Client {
        /// HTTP status code in the 400..=499 range (never 429)
        status: u16,
    },

    /// Per-request timeout elapsed before the attempt completed
    #[error("request timed out after {elapsed:?}")]
    Timeout {
        /// Time spent before the deadline fired
        elapsed: Duration,
    },

    /// Backend delivered lifecycle events out of order; the attempt's
    /// timeline cannot be trusted and is discarded
    #[error("malformed event order from backend: {detail}")]
    MalformedEventOrder {
        /// What was observed, e.g. "Token after Completed"
        detail: String,
    },

    /// All retry attempts were consumed without success
    #[error("retries exhausted after {attempts} attempts (last: {last})")]
    RetriesExhausted {
        /// Total attempts made, including the first
        attempts: usize,
        /// Classification of the final attempt's failure
        last: ErrorKind,
    },

    /// The run as a whole could not make progress; partial results attached
    #[error("run aborted: {reason}")]
    RunAborted {
        /// Why the run stopped making progress
        reason: String,
        /// Snapshot of everything aggregated before the abort
        partial: Box<AggregatedReport>,
    },

    /// No usable monotonic clock on this platform; fatal at startup
    #[error("monotonic clock unavailable: {detail}")]
    ClockUnavailable {
        /// Probe failure description
        detail: String,
    },

    /// A configuration value failed validation
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Which field and why
        message: String,
    },
}

impl MedirError {
    /// Classify this error for counting and retry decisions
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Server { .. } => ErrorKind::Server,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Client { .. } => ErrorKind::Client,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::MalformedEventOrder { .. } => ErrorKind::MalformedEventOrder,
            Self::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            Self::RunAborted { .. } | Self::ClockUnavailable { .. } | Self::InvalidConfig { .. } => {
                ErrorKind::Fatal
            }
        }
    }

    /// Transport error from any displayable source
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Build the appropriate variant from an HTTP status code
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimited { retry_after: None },
            500..=599 => Self::Server { status },
            _ => Self::Client { status },
        }
    }
}

/// Compact failure classification used by counters and the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Connection-level failure
    Transport,
    /// HTTP 5xx
    Server,
    /// HTTP 429
    RateLimited,
    /// HTTP 4xx other than 429
    Client,
    /// Per-request timeout
    Timeout,
    /// Backend event stream violated lifecycle ordering
    MalformedEventOrder,
    /// Retry budget consumed
    RetriesExhausted,
    /// Run-level fatal condition
    Fatal,
}

impl ErrorKind {
    /// Stable string form, used as a report map key
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Server => "server",
            Self::RateLimited => "rate_limited",
            Self::Client => "client",
            Self::Timeout => "timeout",
            Self::MalformedEventOrder => "malformed_event_order",
            Self::RetriesExhausted => "retries_exhausted",
            Self::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
