use serde::{Deserialize, Serialize};

/// Error type for dispatch construction and outbound transport.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid dispatch: {0}")]
    Prepare(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Aborted by the caller")]
    Aborted,
}

impl DispatchError {
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, DispatchError::Aborted)
    }
}

/// Failure raised by a provider parse function for one wire message.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("provider reported an error: {0}")]
    Upstream(String),
    #[error("unexpected payload: {0}")]
    Schema(String),
}

/// Pipeline phase an error event originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorStage {
    DispatchPrepare,
    DispatchFetch,
    DispatchRead,
    DispatchParse,
}

impl ErrorStage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorStage::DispatchPrepare => "dispatch-prepare",
            ErrorStage::DispatchFetch => "dispatch-fetch",
            ErrorStage::DispatchRead => "dispatch-read",
            ErrorStage::DispatchParse => "dispatch-parse",
        }
    }

    /// Human-readable label used in user-facing error messages.
    #[must_use]
    pub fn issue_label(self) -> &'static str {
        match self {
            ErrorStage::DispatchPrepare => "configuration issue",
            ErrorStage::DispatchFetch => "service issue",
            ErrorStage::DispatchRead => "connection issue",
            ErrorStage::DispatchParse => "response issue",
        }
    }

    /// Whether errors of this stage may ever reach the shared operational log.
    ///
    /// Prepare and read failures are local to the client or its configuration.
    #[must_use]
    pub fn may_mirror_to_shared_log(self) -> bool {
        matches!(self, ErrorStage::DispatchFetch | ErrorStage::DispatchParse)
    }
}

impl std::fmt::Display for ErrorStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broad error category for upstream HTTP statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Authentication,
    Permission,
    NotFound,
    RateLimit,
    ServerError,
    Unknown,
}

impl ErrorCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::InvalidRequest => "invalid request",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Permission => "permission",
            ErrorCategory::NotFound => "not found",
            ErrorCategory::RateLimit => "rate limit",
            ErrorCategory::ServerError => "server error",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

/// Map an upstream HTTP status code to an error category.
#[must_use]
pub fn category_from_upstream_status(status: u16) -> ErrorCategory {
    match status {
        400 | 422 => ErrorCategory::InvalidRequest,
        401 => ErrorCategory::Authentication,
        403 => ErrorCategory::Permission,
        404 => ErrorCategory::NotFound,
        429 => ErrorCategory::RateLimit,
        500..=599 => ErrorCategory::ServerError,
        _ => ErrorCategory::Unknown,
    }
}
