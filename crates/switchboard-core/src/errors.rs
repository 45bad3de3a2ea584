use crate::ids::SessionId;

/// Failures raised by the transport underneath a connection.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The peer or the network closed the connection.
    #[error("connection closed ({code}): {reason}")]
    Closed { code: u16, reason: String },
    #[error("transport failure: {0}")]
    Failed(String),
}

impl TransportError {
    pub fn closed(code: u16, reason: impl Into<String>) -> Self {
        Self::Closed {
            code,
            reason: reason.into(),
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }
}

/// Failures while resolving or loading a session.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(SessionId),
    #[error("session store error: {0}")]
    Store(String),
}

/// Command-level failures. These are scoped to one dispatched command and
/// are reported back to the client rather than tearing down the connection.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unrecognized command: {0:?}")]
    UnrecognizedCommand(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("command failed: {0}")]
    Failed(String),
    #[error("worker pool unavailable")]
    WorkerUnavailable,
}

impl CommandError {
    /// Stable code carried in error replies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnrecognizedCommand(_) => "UNRECOGNIZED_COMMAND",
            Self::InvalidParams(_) => "INVALID_PARAMS",
            Self::Failed(_) => "COMMAND_FAILED",
            Self::WorkerUnavailable => "WORKER_UNAVAILABLE",
        }
    }
}

/// Connection-scoped failures that end a connection's read loop.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// Frame payload was not a JSON object.
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    /// The connection was refused after its handshake.
    #[error("connection rejected: {0}")]
    Rejected(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ConnectionError {
    /// Whether this is the expected end of a connection rather than a fault.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Transport(t) if t.is_closed())
    }
}

impl From<serde_json::Error> for ConnectionError {
    fn from(e: serde_json::Error) -> Self {
        Self::MalformedRequest(e.to_string())
    }
}
