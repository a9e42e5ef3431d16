//! Scripted cluster and in-memory sink used by the crate's tests.

use crate::error::{CommandError, SessionError};
use crate::session::{ClusterTarget, CommandOutput, Connection, Connector};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use svcmon_common::types::CollectionBatch;
use svcmon_sink::{DeliveryReport, DeliveryResult, Sink};

#[derive(Debug, Clone)]
pub enum Reply {
    Output(&'static str),
    Stderr { status: i32, stderr: &'static str },
    /// Never answers within any reasonable timeout.
    Hang,
    ChannelFailure,
}

#[derive(Default)]
struct State {
    replies: Mutex<HashMap<String, Vec<Reply>>>,
    executions: Mutex<Vec<String>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
    reject_auth: AtomicBool,
    unreachable: AtomicBool,
    dead: AtomicBool,
}

impl State {
    fn next_reply(&self, command: &str) -> Option<Reply> {
        let mut replies = self.replies.lock().unwrap();
        let queue = replies.get_mut(command)?;
        if queue.len() > 1 {
            Some(queue.remove(0))
        } else {
            queue.first().cloned()
        }
    }
}

#[derive(Clone, Default)]
pub struct MockCluster {
    state: Arc<State>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(&self) -> ClusterTarget {
        ClusterTarget {
            name: "svc01".into(),
            address: "svc01.example.net".into(),
            port: 22,
            username: "monitor".into(),
            private_key: PathBuf::from("/nonexistent/id_rsa"),
        }
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    pub fn script(&self, command: &str, reply: Reply) {
        self.script_sequence(command, vec![reply]);
    }

    /// Replies are consumed in order; the last one repeats.
    pub fn script_sequence(&self, command: &str, replies: Vec<Reply>) {
        self.state
            .replies
            .lock()
            .unwrap()
            .insert(command.to_string(), replies);
    }

    pub fn reject_auth(&self, reject: bool) {
        self.state.reject_auth.store(reject, Ordering::SeqCst);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_alive(&self, alive: bool) {
        self.state.dead.store(!alive, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn executions(&self, command: &str) -> usize {
        self.state
            .executions
            .lock()
            .unwrap()
            .iter()
            .filter(|c| *c == command)
            .count()
    }
}

#[async_trait]
impl Connector for MockCluster {
    async fn connect(&self, _target: &ClusterTarget) -> Result<Box<dyn Connection>, SessionError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if self.state.reject_auth.load(Ordering::SeqCst) {
            return Err(SessionError::Authentication(
                "Permission denied (publickey)".into(),
            ));
        }
        if self.state.unreachable.load(Ordering::SeqCst) {
            return Err(SessionError::Connectivity("Connection refused".into()));
        }
        self.state.dead.store(false, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockConnection {
    state: Arc<State>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn exec(&self, command: &str) -> Result<CommandOutput, CommandError> {
        self.state
            .executions
            .lock()
            .unwrap()
            .push(command.to_string());
        match self.state.next_reply(command) {
            Some(Reply::Output(stdout)) => Ok(CommandOutput {
                status: Some(0),
                stdout: stdout.to_string(),
                stderr: String::new(),
            }),
            Some(Reply::Stderr { status, stderr }) => Ok(CommandOutput {
                status: Some(status),
                stdout: String::new(),
                stderr: stderr.to_string(),
            }),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(CommandOutput::default())
            }
            Some(Reply::ChannelFailure) => Err(CommandError::Channel("broken pipe".into())),
            None => Ok(CommandOutput {
                status: Some(1),
                stdout: String::new(),
                stderr: format!("rbash: {command}: command not found"),
            }),
        }
    }

    async fn is_alive(&self) -> bool {
        !self.state.dead.load(Ordering::SeqCst)
    }

    async fn close(&mut self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
pub struct MemorySink {
    batches: Arc<Mutex<Vec<CollectionBatch>>>,
}

impl MemorySink {
    pub fn batches(&self) -> Vec<CollectionBatch> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn deliver(&self, batch: &CollectionBatch) -> DeliveryResult {
        self.batches.lock().unwrap().push(batch.clone());
        Ok(DeliveryReport {
            accepted: batch.samples.len(),
            rejected: Vec::new(),
        })
    }
}
