//! End-to-end cycles against a scripted cluster.

use crate::catalog::{default_catalog, CommandSpec};
use crate::error::SessionError;
use crate::orchestrator::{CollectionOrchestrator, CycleOutcome, OrchestratorOptions};
use crate::session::SessionManager;
use crate::testing::{MemorySink, MockCluster, Reply};
use std::sync::Arc;
use std::time::Duration;
use svcmon_common::types::{CommandStatus, Tags};

const LSSYSTEM: &str = "\
id:000002006B80B2F4
name:svc01
total_mdisk_capacity:1000
total_used_capacity:250
total_free_space:750
code_level:8.4.0.4 (build 152.19.2106090822000)
";

const LSIOGRP: &str = "\
id:name:node_count:vdisk_count:host_count:site_id:site_name
0:io_grp0:2:12:4::
1:io_grp1:2:7:4::
";

const LSMDISKGRP: &str = "\
id:name:status:mdisk_count:vdisk_count:capacity:free_capacity:used_capacity
0:Pool0:online:4:10:2000:1500:500
1:Pool1:online:2:9:1000:800:200
";

const LSNODESTATS: &str = "\
node_id:node_name:stat_name:stat_current:stat_peak:stat_peak_time
1:node1:cpu_pc:12:20:211017120000
2:node2:cpu_pc:9:15:211017120000
";

fn catalog() -> Vec<CommandSpec> {
    default_catalog()
        .into_iter()
        .filter(|spec| spec.name != "systemstats")
        .collect()
}

fn script_healthy(cluster: &MockCluster, catalog: &[CommandSpec]) {
    for spec in catalog {
        let reply = match spec.name {
            "system" => LSSYSTEM,
            "iogrp" => LSIOGRP,
            "mdiskgrp" => LSMDISKGRP,
            "nodestats" => LSNODESTATS,
            _ => "id:name:IO_group_name:mdisk_grp_name:capacity\n0:vol0:io_grp0:Pool0:100\n",
        };
        cluster.script(spec.command, Reply::Output(reply));
    }
}

fn orchestrator(
    cluster: &MockCluster,
    catalog: Vec<CommandSpec>,
    sink: &MemorySink,
) -> CollectionOrchestrator {
    let session = SessionManager::new(cluster.target(), cluster.connector())
        .with_retry_delay(Duration::from_millis(10));
    let mut extra = Tags::new();
    extra.insert("dc".into(), "fra1".into());
    CollectionOrchestrator::new(
        session,
        catalog,
        Arc::new(sink.clone()),
        extra,
        OrchestratorOptions {
            command_timeout: Duration::from_secs(30),
            ..OrchestratorOptions::default()
        },
    )
}

#[tokio::test]
async fn healthy_cycle_dispatches_one_complete_batch() {
    let cluster = MockCluster::new();
    let catalog = catalog();
    script_healthy(&cluster, &catalog);
    let sink = MemorySink::default();
    let mut orch = orchestrator(&cluster, catalog, &sink);

    let outcome = orch.run_cycle().await;

    let batches = sink.batches();
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert_eq!(batch.cluster, "svc01");
    assert_eq!(batch.commands.len(), 5);
    assert_eq!(batch.failed_commands(), 0);
    assert_eq!(
        outcome,
        CycleOutcome::Complete {
            commands: 5,
            samples: batch.samples.len(),
        }
    );
    assert!(batch.samples.iter().any(|s| s.name == "iogrp.vdisk_count"
        && s.value == 12.0
        && s.tags.get("io_group").map(String::as_str) == Some("io_grp0")));
    assert!(batch.samples.iter().all(|s| {
        s.tags.get("cluster").map(String::as_str) == Some("svc01")
            && s.tags.get("dc").map(String::as_str) == Some("fra1")
    }));
}

#[tokio::test]
async fn every_sample_carries_the_cycle_timestamp() {
    let cluster = MockCluster::new();
    let catalog = catalog();
    script_healthy(&cluster, &catalog);
    let sink = MemorySink::default();
    let mut orch = orchestrator(&cluster, catalog, &sink);

    orch.run_cycle().await;

    let batch = &sink.batches()[0];
    assert!(!batch.samples.is_empty());
    assert!(batch.samples.iter().all(|s| s.timestamp == batch.timestamp));
}

#[tokio::test(start_paused = true)]
async fn one_hung_command_yields_a_partial_batch() {
    let cluster = MockCluster::new();
    let catalog = catalog();
    script_healthy(&cluster, &catalog);
    cluster.script("lsvdisk -bytes -delim :", Reply::Hang);
    let sink = MemorySink::default();
    let mut orch = orchestrator(&cluster, catalog, &sink);

    let outcome = orch.run_cycle().await;

    let batches = sink.batches();
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert_eq!(
        outcome,
        CycleOutcome::Partial {
            succeeded: 4,
            total: 5,
            samples: batch.samples.len(),
        }
    );
    let vdisk = batch
        .commands
        .iter()
        .find(|c| c.command == "vdisk")
        .unwrap();
    assert!(matches!(&vdisk.status, CommandStatus::Failed { error } if error.contains("timed out")));
    assert!(batch.samples.iter().all(|s| !s.name.starts_with("vdisk.")));
    assert!(batch.samples.iter().any(|s| s.name.starts_with("nodestats.")));
    // the command after the timeout ran over a fresh session
    assert_eq!(cluster.connects(), 2);
}

#[tokio::test]
async fn failing_command_does_not_affect_the_others() {
    let cluster = MockCluster::new();
    let catalog = catalog();
    script_healthy(&cluster, &catalog);
    cluster.script(
        "lsmdiskgrp -bytes -delim :",
        Reply::Stderr {
            status: 1,
            stderr: "CMMVC5786E The action failed because the cluster is not in a stable state.",
        },
    );
    let sink = MemorySink::default();
    let mut orch = orchestrator(&cluster, catalog, &sink);

    let outcome = orch.run_cycle().await;

    assert!(matches!(outcome, CycleOutcome::Partial { succeeded: 4, total: 5, .. }));
    assert_eq!(cluster.executions("lsmdiskgrp -bytes -delim :"), 3);
    assert_eq!(cluster.connects(), 1);
}

#[tokio::test]
async fn authentication_failure_aborts_without_dispatch() {
    let cluster = MockCluster::new();
    let catalog = catalog();
    script_healthy(&cluster, &catalog);
    cluster.reject_auth(true);
    let sink = MemorySink::default();
    let mut orch = orchestrator(&cluster, catalog, &sink);

    let outcome = orch.run_cycle().await;

    assert!(matches!(
        outcome,
        CycleOutcome::Aborted {
            reason: SessionError::Authentication(_)
        }
    ));
    assert!(sink.batches().is_empty());
    assert_eq!(cluster.executions("lsiogrp -delim :"), 0);

    cluster.reject_auth(false);
    let outcome = orch.run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::Complete { .. }));
    assert_eq!(sink.batches().len(), 1);
    assert_eq!(cluster.connects(), 2);
}

#[tokio::test]
async fn unreachable_cluster_aborts_the_cycle() {
    let cluster = MockCluster::new();
    cluster.set_unreachable(true);
    let sink = MemorySink::default();
    let mut orch = orchestrator(&cluster, catalog(), &sink);

    let outcome = orch.run_cycle().await;

    assert!(matches!(
        outcome,
        CycleOutcome::Aborted {
            reason: SessionError::Connectivity(_)
        }
    ));
    assert!(sink.batches().is_empty());
}

#[tokio::test]
async fn session_is_reused_across_cycles() {
    let cluster = MockCluster::new();
    let catalog = catalog();
    script_healthy(&cluster, &catalog);
    let sink = MemorySink::default();
    let mut orch = orchestrator(&cluster, catalog, &sink);

    orch.run_cycle().await;
    orch.run_cycle().await;

    assert_eq!(sink.batches().len(), 2);
    assert_eq!(cluster.connects(), 1);
    assert_eq!(cluster.executions("lssystem -delim :"), 2);
}

#[tokio::test]
async fn empty_catalog_still_dispatches_an_empty_batch() {
    let cluster = MockCluster::new();
    let sink = MemorySink::default();
    let mut orch = orchestrator(&cluster, Vec::new(), &sink);

    let outcome = orch.run_cycle().await;

    assert_eq!(
        outcome,
        CycleOutcome::Complete {
            commands: 0,
            samples: 0
        }
    );
    let batches = sink.batches();
    assert_eq!(batches.len(), 1);
    assert!(batches[0].samples.is_empty());
}

#[tokio::test]
async fn shutdown_closes_the_session() {
    use crate::Collector;

    let cluster = MockCluster::new();
    let sink = MemorySink::default();
    let mut orch = orchestrator(&cluster, Vec::new(), &sink);

    orch.collect().await;
    orch.shutdown().await;

    assert_eq!(cluster.closes(), 1);
}

#[tokio::test]
async fn channel_failure_reconnects_for_the_next_command() {
    let cluster = MockCluster::new();
    let catalog = catalog();
    script_healthy(&cluster, &catalog);
    cluster.script("lsiogrp -delim :", Reply::ChannelFailure);
    let sink = MemorySink::default();
    let mut orch = orchestrator(&cluster, catalog, &sink);

    let outcome = orch.run_cycle().await;

    assert!(matches!(outcome, CycleOutcome::Partial { succeeded: 4, total: 5, .. }));
    // channel failures are not retried
    assert_eq!(cluster.executions("lsiogrp -delim :"), 1);
    assert_eq!(cluster.connects(), 2);

    let batch = &sink.batches()[0];
    let iogrp = batch.commands.iter().find(|c| c.command == "iogrp").unwrap();
    assert!(matches!(&iogrp.status, CommandStatus::Failed { error } if error.contains("channel")));
    assert!(batch.samples.iter().all(|s| !s.name.starts_with("iogrp.")));
    for prefix in ["mdiskgrp.", "vdisk.", "nodestats."] {
        assert!(
            batch.samples.iter().any(|s| s.name.starts_with(prefix)),
            "no {prefix} samples after reconnect"
        );
    }
}

const LSVDISK_MANY: &str = "\
id:name:IO_group_name:mdisk_grp_name:capacity
0:vol0:io_grp0:Pool0:100
1:vol1:io_grp0:many:200
";

const LSVDISKCOPY: &str = "\
vdisk_id:vdisk_name:copy_id:status:sync:primary:mdisk_grp_id:mdisk_grp_name:capacity
1:vol1:0:online:yes:yes:1:Pool1:200
1:vol1:1:online:yes:no:0:Pool0:200
";

fn vdisk_pool(batch: &svcmon_common::types::CollectionBatch, volume: &str) -> Option<String> {
    batch
        .samples
        .iter()
        .find(|s| s.name == "vdisk.capacity" && s.tags.get("volume").map(String::as_str) == Some(volume))
        .and_then(|s| s.tags.get("pool").cloned())
}

#[tokio::test]
async fn volumes_in_many_pools_are_resolved_from_their_copies() {
    let cluster = MockCluster::new();
    let catalog = catalog();
    script_healthy(&cluster, &catalog);
    cluster.script("lsvdisk -bytes -delim :", Reply::Output(LSVDISK_MANY));
    cluster.script("lsvdiskcopy -delim :", Reply::Output(LSVDISKCOPY));
    let sink = MemorySink::default();
    let mut orch = orchestrator(&cluster, catalog, &sink);

    let outcome = orch.run_cycle().await;

    assert!(matches!(outcome, CycleOutcome::Complete { commands: 5, .. }));
    assert_eq!(cluster.executions("lsvdiskcopy -delim :"), 1);
    let batch = &sink.batches()[0];
    assert_eq!(vdisk_pool(batch, "vol0").as_deref(), Some("Pool0"));
    assert_eq!(vdisk_pool(batch, "vol1").as_deref(), Some("Pool1"));
}

#[tokio::test]
async fn copies_are_not_listed_when_no_volume_needs_them() {
    let cluster = MockCluster::new();
    let catalog = catalog();
    script_healthy(&cluster, &catalog);
    let sink = MemorySink::default();
    let mut orch = orchestrator(&cluster, catalog, &sink);

    orch.run_cycle().await;

    assert_eq!(cluster.executions("lsvdiskcopy -delim :"), 0);
}

#[tokio::test]
async fn failed_copy_listing_drops_the_placeholder_pool() {
    let cluster = MockCluster::new();
    let catalog = catalog();
    script_healthy(&cluster, &catalog);
    cluster.script("lsvdisk -bytes -delim :", Reply::Output(LSVDISK_MANY));
    // lsvdiskcopy left unscripted: the mock answers "command not found"
    let sink = MemorySink::default();
    let mut orch = orchestrator(&cluster, catalog, &sink);

    let outcome = orch.run_cycle().await;

    assert!(matches!(outcome, CycleOutcome::Complete { .. }));
    let batch = &sink.batches()[0];
    assert_eq!(vdisk_pool(batch, "vol1"), None);
    assert!(batch
        .samples
        .iter()
        .all(|s| s.tags.get("pool").map_or(true, |p| p != "many")));
    let vdisk = batch.commands.iter().find(|c| c.command == "vdisk").unwrap();
    assert!(matches!(vdisk.status, CommandStatus::Succeeded { warnings: 1, .. }));
}
