use std::time::Duration;

/// Faults on the push transport. All of them are recovered by reconnecting.
#[derive(Clone, Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("transport closed")]
    Closed,
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ConnectFailed(_) => "connect_failed",
            Self::SendFailed(_) => "send_failed",
            Self::Closed => "closed",
            Self::Protocol(_) => "protocol",
        }
    }
}

/// Faults in an inbound payload. The payload is dropped, the stream continues.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
}

/// Faults while asking the orchestrator for the next turn. Logged, never retried.
#[derive(Clone, Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("orchestrator returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("no endpoint configured for agent {0}")]
    UnknownAgent(String),
    #[error("{0} not supported by this orchestrator")]
    Unsupported(&'static str),
}

impl OrchestratorError {
    pub fn from_status(status: u16, body: String) -> Self {
        Self::Status { status, body }
    }

    /// Whether a later attempt could plausibly succeed. Informational only:
    /// the scheduler waits for the next organic trigger instead of retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status == 429 || (500..=599).contains(status),
            Self::Network(_) | Self::Timeout(_) => true,
            Self::InvalidEndpoint(_) | Self::UnknownAgent(_) | Self::Unsupported(_) => false,
        }
    }

    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::InvalidEndpoint(_) => "invalid_endpoint",
            Self::UnknownAgent(_) => "unknown_agent",
            Self::Unsupported(_) => "unsupported",
        }
    }
}

/// Reasons the scheduler refuses a manual continuation.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("a continuation request is already in flight")]
    RequestInFlight,
    #[error("prompt is empty")]
    EmptyPrompt,
}

/// Errors that can occur when loading or parsing settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}
