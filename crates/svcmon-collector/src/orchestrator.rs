use crate::catalog::{CommandSpec, Resolution};
use crate::error::SessionError;
use crate::normalizer::{normalize, resolve_placeholders};
use crate::session::{RawResult, SessionManager};
use crate::Collector;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use svcmon_common::types::{
    format_tags, CollectionBatch, CommandStatus, CommandSummary, MetricSample, ParsedRecord, Tags,
};
use svcmon_sink::Sink;

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub command_timeout: Duration,
    /// Log per-cycle and per-command summaries at info level.
    pub verbose: bool,
    /// Log every command's raw output.
    pub debug: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(30),
            verbose: false,
            debug: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Complete {
        commands: usize,
        samples: usize,
    },
    Partial {
        succeeded: usize,
        total: usize,
        samples: usize,
    },
    /// Connecting failed; nothing was dispatched.
    Aborted {
        reason: SessionError,
    },
}

/// Runs collection cycles: executes the catalog over the session, normalizes
/// the output and hands one batch per cycle to the sink.
pub struct CollectionOrchestrator {
    session: SessionManager,
    catalog: Vec<CommandSpec>,
    sink: Arc<dyn Sink>,
    base_tags: Tags,
    options: OrchestratorOptions,
}

impl CollectionOrchestrator {
    /// `extra_tags` are added to every sample together with `cluster=<name>`.
    pub fn new(
        session: SessionManager,
        catalog: Vec<CommandSpec>,
        sink: Arc<dyn Sink>,
        extra_tags: Tags,
        options: OrchestratorOptions,
    ) -> Self {
        let mut base_tags: Tags = extra_tags
            .into_iter()
            .filter(|(k, v)| !k.trim().is_empty() && !v.trim().is_empty())
            .collect();
        base_tags.insert("cluster".to_string(), session.target().name.clone());
        tracing::debug!(tags = %format_tags(&base_tags), "Tags attached to every sample");
        Self {
            session,
            catalog,
            sink,
            base_tags,
            options,
        }
    }

    pub fn cluster(&self) -> &str {
        &self.session.target().name
    }

    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let started = Instant::now();
        let mut batch = CollectionBatch::new(self.cluster(), Utc::now());

        if let Err(e) = self.session.ensure_connected().await {
            if e.is_authentication() {
                self.session.close().await;
            }
            tracing::error!(
                cluster = %batch.cluster,
                error = %e,
                "Collection cycle aborted, nothing dispatched"
            );
            return CycleOutcome::Aborted { reason: e };
        }

        for spec in &self.catalog {
            if !self.session.is_healthy() {
                if let Err(e) = self.session.ensure_connected().await {
                    tracing::warn!(command = spec.name, error = %e, "Reconnect failed");
                    batch.commands.push(CommandSummary {
                        command: spec.name.to_string(),
                        status: CommandStatus::Failed {
                            error: e.to_string(),
                        },
                    });
                    continue;
                }
            }

            let raw = self
                .session
                .execute(spec.name, spec.command, self.options.command_timeout)
                .await;
            let status = process_result(
                &mut self.session,
                spec,
                raw,
                &self.base_tags,
                batch.timestamp,
                &self.options,
                &mut batch.samples,
            )
            .await;
            batch.commands.push(CommandSummary {
                command: spec.name.to_string(),
                status,
            });
        }

        let total = batch.commands.len();
        let succeeded = total - batch.failed_commands();
        let samples = batch.samples.len();

        match self.sink.deliver(&batch).await {
            Ok(report) if report.rejected.is_empty() => {
                tracing::debug!(sink = self.sink.name(), accepted = report.accepted, "Batch delivered");
            }
            Ok(report) => {
                for rejected in &report.rejected {
                    tracing::debug!(metric = %rejected.metric, reason = %rejected.reason, "Sample rejected");
                }
                tracing::warn!(
                    sink = self.sink.name(),
                    accepted = report.accepted,
                    rejected = report.rejected.len(),
                    "Sink rejected part of the batch"
                );
            }
            Err(e) => {
                tracing::error!(sink = self.sink.name(), error = %e, samples, "Batch delivery failed");
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if succeeded == total {
            if self.options.verbose {
                tracing::info!(cluster = %batch.cluster, samples, elapsed_ms, "Collection cycle complete: {succeeded}/{total} commands succeeded");
            } else {
                tracing::debug!(cluster = %batch.cluster, samples, elapsed_ms, "Collection cycle complete: {succeeded}/{total} commands succeeded");
            }
            CycleOutcome::Complete {
                commands: total,
                samples,
            }
        } else {
            let failed: Vec<&str> = batch
                .commands
                .iter()
                .filter(|c| !c.is_success())
                .map(|c| c.command.as_str())
                .collect();
            tracing::warn!(
                cluster = %batch.cluster,
                samples,
                elapsed_ms,
                failed = ?failed,
                "Collection cycle partially succeeded: {succeeded}/{total} commands succeeded"
            );
            CycleOutcome::Partial {
                succeeded,
                total,
                samples,
            }
        }
    }
}

async fn process_result(
    session: &mut SessionManager,
    spec: &CommandSpec,
    raw: RawResult,
    base_tags: &Tags,
    timestamp: i64,
    options: &OrchestratorOptions,
    samples: &mut Vec<MetricSample>,
) -> CommandStatus {
    if options.debug {
        tracing::debug!(
            command = spec.name,
            exit_status = ?raw.exit_status,
            attempts = raw.attempts,
            stderr = %raw.stderr,
            "Raw output:\n{}",
            raw.output
        );
    }

    if let Some(error) = raw.error {
        tracing::warn!(command = spec.name, attempts = raw.attempts, error = %error, "Command failed");
        return CommandStatus::Failed {
            error: error.to_string(),
        };
    }

    let mut parsed = spec.parser.parse(&raw.output);
    for e in &parsed.errors {
        tracing::warn!(command = spec.name, line = e.line, reason = %e.reason, "Skipped malformed output");
    }

    let unresolved = match &spec.resolve {
        Some(resolution) => {
            resolve(session, spec, resolution, &mut parsed.records, options).await
        }
        None => 0,
    };

    let normalized = normalize(spec, &parsed.records, base_tags, timestamp);
    for e in &normalized.errors {
        tracing::warn!(command = spec.name, error = %e, "Skipped record");
    }

    let count = normalized.samples.len();
    let warnings = parsed.errors.len() + normalized.errors.len() + unresolved;
    if options.verbose {
        tracing::info!(
            command = spec.name,
            records = parsed.records.len(),
            samples = count,
            warnings,
            "Command collected"
        );
    }
    samples.extend(normalized.samples);

    CommandStatus::Succeeded {
        samples: count,
        warnings,
    }
}

/// Runs the follow-up command when any record carries the placeholder and
/// patches the records in place. Returns the number left unresolved.
async fn resolve(
    session: &mut SessionManager,
    spec: &CommandSpec,
    resolution: &Resolution,
    records: &mut [ParsedRecord],
    options: &OrchestratorOptions,
) -> usize {
    let pending = records
        .iter()
        .filter(|r| r.get(resolution.column) == Some(resolution.placeholder))
        .count();
    if pending == 0 {
        return 0;
    }
    tracing::debug!(
        command = spec.name,
        pending,
        followup = resolution.command,
        "Resolving '{}' values",
        resolution.placeholder
    );

    let raw = session
        .execute(resolution.command, resolution.command, options.command_timeout)
        .await;
    let lookup = match raw.error {
        Some(error) => {
            tracing::warn!(
                command = spec.name,
                followup = resolution.command,
                error = %error,
                "Follow-up command failed, dropping unresolved values"
            );
            Vec::new()
        }
        None => resolution.parser.parse(&raw.output).records,
    };

    let unresolved = resolve_placeholders(records, resolution, &lookup);
    if unresolved > 0 {
        tracing::warn!(
            command = spec.name,
            unresolved,
            "Some '{}' values could not be resolved",
            resolution.placeholder
        );
    }
    unresolved
}

#[async_trait]
impl Collector for CollectionOrchestrator {
    fn name(&self) -> &str {
        self.cluster()
    }

    async fn collect(&mut self) -> CycleOutcome {
        self.run_cycle().await
    }

    async fn shutdown(&mut self) {
        self.session.close().await;
    }
}
