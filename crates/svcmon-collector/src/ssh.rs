//! OpenSSH transport.
//!
//! Uses the system `ssh` client in control-master mode, so one authenticated
//! master connection carries every command of a cycle.

use crate::error::{CommandError, SessionError};
use crate::session::{ClusterTarget, CommandOutput, Connection, Connector};
use async_trait::async_trait;
use openssh::{KnownHosts, Session, SessionBuilder};
use std::io::ErrorKind;
use std::time::Duration;

pub struct OpensshConnector {
    connect_timeout: Duration,
}

impl OpensshConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for OpensshConnector {
    async fn connect(&self, target: &ClusterTarget) -> Result<Box<dyn Connection>, SessionError> {
        let mut builder = SessionBuilder::default();
        builder
            .user(target.username.clone())
            .port(target.port)
            .keyfile(&target.private_key)
            .connect_timeout(self.connect_timeout)
            .known_hosts_check(KnownHosts::Add);

        // ConnectTimeout only bounds the TCP connect, not key exchange or auth.
        let session = tokio::time::timeout(self.connect_timeout, builder.connect(&target.address))
            .await
            .map_err(|_| connect_timed_out(self.connect_timeout))?
            .map_err(classify_connect_error)?;

        Ok(Box::new(OpensshConnection {
            session: Some(session),
        }))
    }
}

fn connect_timed_out(after: Duration) -> SessionError {
    SessionError::Connectivity(format!("session not established within {after:?}"))
}

fn classify_connect_error(err: openssh::Error) -> SessionError {
    let message = err.to_string();
    let auth_rejected = match &err {
        openssh::Error::Connect(io) => io.kind() == ErrorKind::PermissionDenied,
        _ => false,
    };
    if auth_rejected || message.contains("Permission denied") {
        SessionError::Authentication(message)
    } else {
        SessionError::Connectivity(message)
    }
}

struct OpensshConnection {
    session: Option<Session>,
}

#[async_trait]
impl Connection for OpensshConnection {
    async fn exec(&self, command: &str) -> Result<CommandOutput, CommandError> {
        let session = self.session.as_ref().ok_or(CommandError::NotConnected)?;
        let output = session
            .raw_command(command)
            .output()
            .await
            .map_err(|e| CommandError::Channel(e.to_string()))?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn is_alive(&self) -> bool {
        match &self.session {
            Some(session) => session.check().await.is_ok(),
            None => false,
        }
    }

    async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close().await {
                tracing::warn!(error = %e, "Failed to close SSH session cleanly");
            }
        }
    }
}
