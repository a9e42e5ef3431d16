//! Ownership of the single SSH session to a cluster.
//!
//! The transport sits behind [`Connector`] and [`Connection`] so the pipeline
//! can run against a scripted cluster in tests; [`crate::ssh`] holds the
//! OpenSSH implementation.

use crate::error::{CommandError, SessionError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTarget {
    /// Cluster name used in tags and logs.
    pub name: String,
    pub address: String,
    pub port: u16,
    pub username: String,
    pub private_key: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status; `None` when the remote process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// A live, authenticated connection.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn exec(&self, command: &str) -> Result<CommandOutput, CommandError>;

    async fn is_alive(&self) -> bool;

    async fn close(&mut self);
}

/// Opens connections to a cluster target.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &ClusterTarget) -> Result<Box<dyn Connection>, SessionError>;
}

/// The captured result of running one catalog command.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResult {
    pub command: String,
    pub exit_status: Option<i32>,
    pub output: String,
    pub stderr: String,
    pub captured_at: DateTime<Utc>,
    pub error: Option<CommandError>,
    pub attempts: u32,
}

impl RawResult {
    fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            exit_status: None,
            output: String::new(),
            stderr: String::new(),
            captured_at: Utc::now(),
            error: None,
            attempts: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

struct RemoteSession {
    connection: Box<dyn Connection>,
    healthy: bool,
    opened_at: DateTime<Utc>,
}

pub struct SessionManager {
    target: ClusterTarget,
    connector: Arc<dyn Connector>,
    session: Option<RemoteSession>,
    command_attempts: u32,
    retry_delay: Duration,
}

impl SessionManager {
    pub fn new(target: ClusterTarget, connector: Arc<dyn Connector>) -> Self {
        Self {
            target,
            connector,
            session: None,
            command_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// How many times a command rejected by the cluster CLI is attempted.
    pub fn with_command_attempts(mut self, attempts: u32) -> Self {
        self.command_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn target(&self) -> &ClusterTarget {
        &self.target
    }

    /// True when a session is open and not flagged unhealthy.
    pub fn is_healthy(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.healthy)
    }

    /// Reuse the current session if it is healthy and still alive, otherwise
    /// open a new one.
    pub async fn ensure_connected(&mut self) -> Result<(), SessionError> {
        let reusable = match &self.session {
            Some(session) => session.healthy && session.connection.is_alive().await,
            None => false,
        };
        if reusable {
            return Ok(());
        }
        if self.session.is_some() {
            tracing::info!(cluster = %self.target.name, "Session no longer usable, reconnecting");
            self.close().await;
        }

        tracing::debug!(
            cluster = %self.target.name,
            address = %self.target.address,
            port = self.target.port,
            user = %self.target.username,
            "Connecting to cluster"
        );
        let connection = self.connector.connect(&self.target).await?;
        self.session = Some(RemoteSession {
            connection,
            healthy: true,
            opened_at: Utc::now(),
        });
        tracing::info!(cluster = %self.target.name, "Connected to cluster");
        Ok(())
    }

    /// Run one command under `timeout`.
    ///
    /// Never fails: errors are carried in the returned [`RawResult`]. Timeouts
    /// and channel failures flag the session unhealthy; CLI errors are retried
    /// up to the configured number of attempts.
    pub async fn execute(&mut self, name: &str, command: &str, timeout: Duration) -> RawResult {
        let mut result = RawResult::new(name);
        let attempts = self.command_attempts;
        let Some(session) = self.session.as_mut().filter(|s| s.healthy) else {
            result.error = Some(CommandError::NotConnected);
            return result;
        };

        for attempt in 1..=attempts {
            result.attempts = attempt;
            result.captured_at = Utc::now();

            let output = match tokio::time::timeout(timeout, session.connection.exec(command)).await {
                Err(_) => {
                    session.healthy = false;
                    result.error = Some(CommandError::Timeout(timeout));
                    return result;
                }
                Ok(Err(e)) => {
                    if e.poisons_session() {
                        session.healthy = false;
                    }
                    result.error = Some(e);
                    return result;
                }
                Ok(Ok(output)) => output,
            };

            result.error = classify_output(&output);
            result.exit_status = output.status;
            result.output = output.stdout;
            result.stderr = output.stderr;

            match &result.error {
                None => return result,
                Some(e) if attempt < attempts => {
                    tracing::debug!(
                        command = name,
                        attempt,
                        error = %e,
                        "Cluster rejected command, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Some(_) => {}
            }
        }

        result
    }

    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.connection.close().await;
            tracing::info!(
                cluster = %self.target.name,
                open_secs = (Utc::now() - session.opened_at).num_seconds(),
                "Session closed"
            );
        }
    }
}

/// Map a completed command to a CLI error, if any. The CLI reports errors on
/// stderr as `CMMVCnnnnE <message>`, sometimes with a zero exit status.
fn classify_output(output: &CommandOutput) -> Option<CommandError> {
    let stderr = output.stderr.trim();
    if let Some(start) = stderr.find("CMMVC") {
        let code = stderr[start..]
            .split_whitespace()
            .next()
            .unwrap_or("CMMVC")
            .to_string();
        return Some(CommandError::Cli {
            code,
            message: stderr.to_string(),
        });
    }
    match output.status {
        Some(0) => None,
        Some(status) => Some(CommandError::ExitStatus {
            status,
            stderr: stderr.to_string(),
        }),
        None => Some(CommandError::ExitStatus {
            status: -1,
            stderr: stderr.to_string(),
        }),
    }
}
