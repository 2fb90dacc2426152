/// Failure reported by an agent collaborator (execution engine or source
/// provider). Never retried; the optional status is a hint for the HTTP
/// response.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct AgentError {
    pub message: String,
    pub status: Option<u16>,
}

/// Status used when the collaborator gives no usable hint.
pub const DEFAULT_ERROR_STATUS: u16 = 500;

impl AgentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(message: impl Into<String>, status: u16) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
        }
    }

    /// The status to answer with: the hint when it is a valid error status,
    /// otherwise [`DEFAULT_ERROR_STATUS`].
    pub fn status_or_default(&self) -> u16 {
        match self.status {
            Some(status @ 400..=599) => status,
            _ => DEFAULT_ERROR_STATUS,
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self.status {
            Some(401 | 403) => "unauthorized",
            Some(429) => "rate_limited",
            Some(400..=499) => "rejected",
            Some(500..=599) => "upstream_failure",
            _ => "agent_failure",
        }
    }
}
