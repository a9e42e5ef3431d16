use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use svcmon_collector::session::ClusterTarget;
use svcmon_common::types::Tags;
use svcmon_sink::SinkConfig;

#[derive(Debug, Deserialize)]
pub struct AgentConfig {
    pub cluster: ClusterConfig,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Attempts per command when the cluster CLI reports an error
    #[serde(default = "default_command_attempts")]
    pub command_attempts: u32,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default)]
    pub verbose: bool,
    /// Log raw command output
    #[serde(default)]
    pub debug: bool,
    /// Extra tags attached to every sample
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub sink: SinkConfig,
}

#[derive(Debug, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    pub address: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    pub private_key_path: PathBuf,
}

fn default_interval_secs() -> u64 {
    60
}

fn default_command_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    15
}

fn default_command_attempts() -> u32 {
    3
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_ssh_port() -> u16 {
    22
}

impl AgentConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {path}"))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {path}"))?;
        Ok(config)
    }

    /// Reject configurations the collector cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let cluster = &self.cluster;
        if cluster.name.trim().is_empty() {
            bail!("cluster.name must not be empty");
        }
        if cluster.address.trim().is_empty() {
            bail!("cluster.address must not be empty");
        }
        if cluster.username.trim().is_empty() {
            bail!("cluster.username must not be empty");
        }
        if cluster.port == 0 {
            bail!("cluster.port must be greater than 0");
        }
        std::fs::metadata(&cluster.private_key_path).with_context(|| {
            format!(
                "cluster.private_key_path {} is not readable",
                cluster.private_key_path.display()
            )
        })?;

        for (key, value) in [
            ("interval_secs", self.interval_secs),
            ("command_timeout_secs", self.command_timeout_secs),
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("command_attempts", u64::from(self.command_attempts)),
        ] {
            if value == 0 {
                bail!("{key} must be greater than 0");
            }
        }
        if self.tags.keys().any(|k| k.trim().is_empty()) {
            bail!("tag keys must not be empty");
        }
        if self.tags.contains_key("cluster") {
            bail!("the 'cluster' tag is reserved");
        }
        if let SinkConfig::Graphite { address, .. } = &self.sink {
            if address.trim().is_empty() {
                bail!("sink.address must not be empty for the graphite sink");
            }
        }
        Ok(())
    }

    pub fn target(&self) -> ClusterTarget {
        ClusterTarget {
            name: self.cluster.name.trim().to_string(),
            address: self.cluster.address.trim().to_string(),
            port: self.cluster.port,
            username: self.cluster.username.trim().to_string(),
            private_key: self.cluster.private_key_path.clone(),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
