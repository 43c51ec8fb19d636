//! Error types for sigmahub.
//!
//! Uses `thiserror` for structured error types that map to exit codes and to
//! the admin HTTP envelope.
//!
//! ## Error Taxonomy
//!
//! Errors are grouped into six categories:
//! - **Authentication**: missing credentials, rejected or unobtainable tokens
//! - **Remote**: non-2xx answers, timeouts and transport failures from Kiwify
//! - **Record**: a single remote record that could not be mapped or written
//! - **Storage**: cache store failures outside a single record
//! - **Configuration**: config file, range or argument problems
//! - **Internal**: I/O, JSON and unclassified failures
//!
//! Each error has a stable code (e.g., `SHUB-A001`) for programmatic handling.
//! Record-level errors never abort a sync run; the engine folds them into the
//! run's failure list.

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// High-level error categories for classification and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Credential or token failures.
    Authentication,
    /// Remote platform failures (status codes, transport, timeouts).
    Remote,
    /// Per-record mapping or write failures.
    Record,
    /// Cache store failures.
    Storage,
    /// Configuration and input validation failures.
    Configuration,
    /// Internal errors (bugs, unexpected state, unclassified).
    Internal,
}

impl ErrorCategory {
    /// Returns a human-readable description of the category.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Authentication => "Authentication error",
            Self::Remote => "Remote API error",
            Self::Record => "Record error",
            Self::Storage => "Storage error",
            Self::Configuration => "Configuration error",
            Self::Internal => "Internal error",
        }
    }

    /// Returns a short code prefix for this category.
    #[must_use]
    pub const fn code_prefix(&self) -> &'static str {
        match self {
            Self::Authentication => "A",
            Self::Remote => "R",
            Self::Record => "M",
            Self::Storage => "S",
            Self::Configuration => "C",
            Self::Internal => "X",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

// =============================================================================
// Exit Codes
// =============================================================================

/// Process exit codes for the `sigmahub` binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// Unexpected failure, remote failure, or drift found by `doctor`
    GeneralError = 1,
    /// Credentials missing or rejected
    AuthError = 2,
    /// Invalid configuration, range, or arguments
    InputError = 3,
    /// Timeout
    Timeout = 4,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

/// Main error type for sigmahub operations.
#[derive(Error, Debug)]
pub enum HubError {
    // ==========================================================================
    // Authentication errors (Category: Authentication)
    // ==========================================================================
    /// Client credentials are not configured.
    #[error("remote credentials not configured: {0}")]
    AuthNotConfigured(String),

    /// Token issuance failed, or the remote rejected a freshly refreshed token.
    #[error("authentication failed{}: {reason}", status_suffix(*.status_code))]
    Auth {
        status_code: Option<u16>,
        reason: String,
    },

    // ==========================================================================
    // Remote errors (Category: Remote)
    // ==========================================================================
    /// Remote platform answered with a non-2xx status.
    #[error("remote API returned HTTP {status_code}: {body}")]
    RemoteApi {
        status_code: u16,
        body: String,
        retry_after: Option<Duration>,
    },

    /// Request timed out.
    #[error("request timeout after {0} seconds")]
    Timeout(u64),

    /// Transport-level failure (DNS, connect, reset).
    #[error("network error: {0}")]
    Network(String),

    /// Response body was not the expected JSON shape.
    #[error("failed to parse response: {0}")]
    ParseResponse(String),

    // ==========================================================================
    // Record errors (Category: Record)
    // ==========================================================================
    /// A remote record could not be mapped into the local schema.
    #[error("cannot map {resource} record {external_id}: {reason}")]
    Mapping {
        resource: String,
        external_id: String,
        reason: String,
    },

    /// A mapped record could not be written to the cache.
    #[error("cache write failed for {external_id}: {reason}")]
    CacheWrite { external_id: String, reason: String },

    // ==========================================================================
    // Storage errors (Category: Storage)
    // ==========================================================================
    /// Cache store failure (open, migrate, query).
    #[error("cache error: {0}")]
    Cache(String),

    // ==========================================================================
    // Configuration errors (Category: Configuration)
    // ==========================================================================
    /// A sync range with `start >= end` or unparsable bounds.
    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// Configuration or argument error.
    #[error("configuration error: {0}")]
    Config(String),

    // ==========================================================================
    // Internal errors (Category: Internal)
    // ==========================================================================
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for other errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HubError {
    /// Build a `RemoteApi` error without a retry hint.
    #[must_use]
    pub fn remote(status_code: u16, body: impl Into<String>) -> Self {
        Self::RemoteApi {
            status_code,
            body: body.into(),
            retry_after: None,
        }
    }

    /// Map error to a process exit code.
    #[must_use]
    pub const fn exit_code(&self) -> ExitCode {
        match self {
            Self::AuthNotConfigured(_) | Self::Auth { .. } => ExitCode::AuthError,

            Self::InvalidRange(_) | Self::Config(_) => ExitCode::InputError,

            Self::Timeout(_) => ExitCode::Timeout,

            Self::RemoteApi { .. }
            | Self::Network(_)
            | Self::ParseResponse(_)
            | Self::Mapping { .. }
            | Self::CacheWrite { .. }
            | Self::Cache(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Other(_) => ExitCode::GeneralError,
        }
    }

    /// Returns the error category for classification and routing.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::AuthNotConfigured(_) | Self::Auth { .. } => ErrorCategory::Authentication,

            Self::RemoteApi { .. }
            | Self::Timeout(_)
            | Self::Network(_)
            | Self::ParseResponse(_) => ErrorCategory::Remote,

            Self::Mapping { .. } | Self::CacheWrite { .. } => ErrorCategory::Record,

            Self::Cache(_) => ErrorCategory::Storage,

            Self::InvalidRange(_) | Self::Config(_) => ErrorCategory::Configuration,

            Self::Io(_) | Self::Json(_) | Self::Other(_) => ErrorCategory::Internal,
        }
    }

    /// Returns a stable error code for programmatic handling.
    ///
    /// Format: `SHUB-{category}{number}`.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::AuthNotConfigured(_) => "SHUB-A001",
            Self::Auth { .. } => "SHUB-A002",

            Self::RemoteApi { .. } => "SHUB-R001",
            Self::Timeout(_) => "SHUB-R002",
            Self::Network(_) => "SHUB-R003",
            Self::ParseResponse(_) => "SHUB-R004",

            Self::Mapping { .. } => "SHUB-M001",
            Self::CacheWrite { .. } => "SHUB-M002",

            Self::Cache(_) => "SHUB-S001",

            Self::InvalidRange(_) => "SHUB-C001",
            Self::Config(_) => "SHUB-C002",

            Self::Io(_) => "SHUB-X001",
            Self::Json(_) => "SHUB-X002",
            Self::Other(_) => "SHUB-X099",
        }
    }

    /// Returns whether the error is transient and worth retrying.
    ///
    /// HTTP 429 and the 5xx gateway family are transient; any other status is
    /// surfaced immediately.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::RemoteApi { status_code, .. } => {
                matches!(*status_code, 429 | 500 | 502 | 503 | 504)
            }
            Self::Timeout(_) | Self::Network(_) => true,
            _ => false,
        }
    }

    /// Returns the retry-after duration if this error specifies one.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RemoteApi { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// HTTP status code carried by the error, if any.
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::RemoteApi { status_code, .. } => Some(*status_code),
            Self::Auth { status_code, .. } => *status_code,
            _ => None,
        }
    }

    /// Whether this error belongs to a single record rather than the whole run.
    #[must_use]
    pub const fn is_record_level(&self) -> bool {
        matches!(self.category(), ErrorCategory::Record)
    }
}

fn status_suffix(status_code: Option<u16>) -> String {
    status_code.map(|c| format!(" (HTTP {c})")).unwrap_or_default()
}

/// Result type alias using `HubError`.
pub type Result<T> = std::result::Result<T, HubError>;
