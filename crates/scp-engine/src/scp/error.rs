//! SCP-specific error type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Categorised SCP error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScpError {
    pub kind: ScpErrorKind,
    pub message: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScpErrorKind {
    /// Channel open / read / write failure.
    Transport,
    /// Malformed control record or unexpected acknowledgment byte.
    Protocol,
    /// Local file open / create / write / sync failure.
    LocalIo,
    /// The remote scp reported a warning (0x01) or fatal error (0x02).
    Remote,
    /// Record type this engine does not handle (`D`, `E`, `T`).
    Unsupported,
    /// TCP / handshake failure while establishing the SSH session.
    ConnectionFailed,
    /// Every configured authentication method was rejected.
    AuthFailed,
    /// Session was not found (invalid session_id).
    SessionNotFound,
    /// Config / parameter validation error.
    InvalidConfig,
    /// Task join failure or poisoned channel lock.
    Internal,
}

pub type ScpResult<T> = Result<T, ScpError>;

// ── Construction helpers ─────────────────────────────────────────────

impl ScpError {
    pub fn new(kind: ScpErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            session_id: None,
        }
    }

    pub fn with_session(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::new(ScpErrorKind::Transport, msg)
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::new(ScpErrorKind::Protocol, msg)
    }

    pub fn local_io(msg: impl Into<String>) -> Self {
        Self::new(ScpErrorKind::LocalIo, msg)
    }

    pub fn remote(msg: impl Into<String>) -> Self {
        Self::new(ScpErrorKind::Remote, msg)
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::new(ScpErrorKind::Unsupported, msg)
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::new(ScpErrorKind::ConnectionFailed, msg)
    }

    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::new(ScpErrorKind::AuthFailed, msg)
    }

    pub fn session_not_found(id: &str) -> Self {
        Self::new(
            ScpErrorKind::SessionNotFound,
            format!("SCP session '{}' not found", id),
        )
        .with_session(id)
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(ScpErrorKind::InvalidConfig, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ScpErrorKind::Internal, msg)
    }

    /// Wrap a channel-side `io::Error` with the step that failed.
    pub fn channel_io(step: &str, e: std::io::Error) -> Self {
        Self::transport(format!("{}: {}", step, e))
    }

    /// Wrap a local-file `io::Error` with the path involved.
    pub fn file_io(path: &std::path::Path, e: std::io::Error) -> Self {
        Self::local_io(format!("'{}': {}", path.display(), e))
    }

    pub fn is_kind(&self, kind: ScpErrorKind) -> bool {
        self.kind == kind
    }
}

impl fmt::Display for ScpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.session_id {
            Some(ref id) => write!(f, "[SCP {:?} {}] {}", self.kind, id, self.message),
            None => write!(f, "[SCP {:?}] {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ScpError {}

impl From<std::io::Error> for ScpError {
    fn from(e: std::io::Error) -> Self {
        Self::transport(e.to_string())
    }
}

impl From<ssh2::Error> for ScpError {
    fn from(e: ssh2::Error) -> Self {
        Self::transport(format!("ssh: {}", e))
    }
}

impl From<tokio::task::JoinError> for ScpError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::internal(format!("transfer task failed: {}", e))
    }
}

impl From<ScpError> for String {
    fn from(e: ScpError) -> String {
        e.to_string()
    }
}
