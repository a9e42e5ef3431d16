//! Collection pipeline for SVC/Storwize clusters.
//!
//! A [`Collector`] runs one collection cycle per call: it opens (or reuses)
//! an SSH session to the cluster, runs the command catalog, parses and
//! normalizes the output into samples and hands a single batch to a sink.
//! The [`scheduler::Scheduler`] drives collectors at a fixed interval.

pub mod catalog;
pub mod error;
pub mod normalizer;
pub mod orchestrator;
pub mod parser;
pub mod scheduler;
pub mod session;
pub mod ssh;

#[cfg(test)]
pub(crate) mod testing;
#[cfg(test)]
mod tests;

use async_trait::async_trait;
use orchestrator::CycleOutcome;

/// A source of metric batches driven by the scheduler.
///
/// Cycles never overlap: the scheduler holds `&mut self` for the whole
/// cycle, so implementations can own their session outright.
#[async_trait]
pub trait Collector: Send {
    /// Used for logging, typically the cluster name.
    fn name(&self) -> &str;

    /// Runs one collection cycle. Failures are reported through the
    /// outcome, never by panicking or returning early without a batch.
    async fn collect(&mut self) -> CycleOutcome;

    /// Releases any held resources. Called once when the scheduler stops.
    async fn shutdown(&mut self);
}
