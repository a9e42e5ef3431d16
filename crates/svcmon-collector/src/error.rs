use std::time::Duration;

/// Failures establishing or checking the remote session. Both abort the
/// current cycle; the next tick reconnects.
///
/// # Examples
///
/// ```rust
/// use svcmon_collector::error::SessionError;
///
/// let err = SessionError::Authentication("Permission denied (publickey)".to_string());
/// assert!(err.is_authentication());
/// assert!(err.to_string().contains("publickey"));
/// ```
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// The cluster rejected the credentials. Not retried within the cycle.
    #[error("authentication rejected: {0}")]
    Authentication(String),

    /// Network failure or connect timeout. Retried on the next tick.
    #[error("connectivity failure: {0}")]
    Connectivity(String),
}

impl SessionError {
    pub fn is_authentication(&self) -> bool {
        matches!(self, SessionError::Authentication(_))
    }
}

/// Failure of a single catalog command. Isolated to that command.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    /// The SSH channel failed while running the command.
    #[error("channel failure: {0}")]
    Channel(String),

    #[error("exited with status {status}: {stderr}")]
    ExitStatus { status: i32, stderr: String },

    /// The cluster CLI reported an error (`CMMVC....E` message).
    #[error("cluster CLI error {code}: {message}")]
    Cli { code: String, message: String },

    #[error("no live session")]
    NotConnected,
}

impl CommandError {
    /// Whether the session can no longer be trusted after this error.
    pub fn poisons_session(&self) -> bool {
        matches!(
            self,
            CommandError::Timeout(_) | CommandError::Channel(_) | CommandError::NotConnected
        )
    }
}

/// A row or block the parser had to skip.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {reason}")]
pub struct ParseError {
    pub line: usize,
    pub reason: String,
}

/// A parsed record that could not be turned into samples.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{command}: record '{record}' is missing required field '{field}'")]
pub struct NormalizationError {
    pub command: String,
    pub record: String,
    pub field: String,
}
