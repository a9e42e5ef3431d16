use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tag set attached to a sample. Ordered so that encoded series names are stable.
pub type Tags = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Dotted metric path, e.g. `iogrp.vdisk_count`.
    pub name: String,
    pub value: f64,
    pub tags: Tags,
    /// Seconds since the Unix epoch, shared by every sample of one cycle.
    pub timestamp: i64,
}

/// One structured record produced by parsing a command's output.
///
/// `key` identifies the entity the record describes (an I/O group name, a
/// pool name, a node name). Commands that describe a single entity use the
/// value of their sentinel field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRecord {
    pub key: String,
    pub fields: BTreeMap<String, String>,
}

impl ParsedRecord {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

/// Per-command result of one collection cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CommandStatus {
    Succeeded { samples: usize, warnings: usize },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSummary {
    pub command: String,
    #[serde(flatten)]
    pub status: CommandStatus,
}

impl CommandSummary {
    pub fn is_success(&self) -> bool {
        matches!(self.status, CommandStatus::Succeeded { .. })
    }
}

/// Everything one cycle produced, handed to the sink exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionBatch {
    pub cluster: String,
    pub timestamp: i64,
    pub samples: Vec<MetricSample>,
    pub commands: Vec<CommandSummary>,
}

impl CollectionBatch {
    pub fn new(cluster: impl Into<String>, collected_at: DateTime<Utc>) -> Self {
        Self {
            cluster: cluster.into(),
            timestamp: collected_at.timestamp(),
            samples: Vec::new(),
            commands: Vec::new(),
        }
    }

    pub fn failed_commands(&self) -> usize {
        self.commands.iter().filter(|c| !c.is_success()).count()
    }
}

/// Format a tag set into a human-readable string.
///
/// # Examples
///
/// ```
/// use svcmon_common::types::{format_tags, Tags};
///
/// let mut tags = Tags::new();
/// tags.insert("pool".to_string(), "Pool0".to_string());
/// tags.insert("cluster".to_string(), "svc01".to_string());
/// assert_eq!(format_tags(&tags), "cluster=svc01, pool=Pool0");
/// ```
pub fn format_tags(tags: &Tags) -> String {
    tags.iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}
