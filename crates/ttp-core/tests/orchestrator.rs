//! Setup, rollback and teardown against the in-memory lab.

mod common;

use std::time::Duration;

use common::{LOCAL, Lab, PEER, opts};
use ttp_core::lock::ExclusiveResource;
use ttp_core::options::RunOptions;
use ttp_core::scenario::Outcome;

#[tokio::test]
async fn test_full_run_passes_and_cleans_up() {
    let lab = Lab::new();
    let ctx = opts().validate().unwrap();

    let report = lab.orchestrator.run(ctx).await.unwrap();

    let failures: Vec<_> = report.failures().collect();
    assert!(report.is_success(), "unexpected failures: {failures:?}");
    assert!(report.passed() > 0);
    // No trafgen anywhere: every packet scenario is skipped.
    assert_eq!(report.skipped(), 6);
    assert_eq!(
        report.get("packet", "recv_open").unwrap().outcome,
        Outcome::Skipped("no trafgen on peer".to_string())
    );

    let local_load = lab.exec.position(LOCAL, "sudo insmod").unwrap();
    let peer_load = lab.exec.position(PEER, "sudo insmod").unwrap();
    assert!(local_load < peer_load);
    assert_eq!(lab.exec.count(LOCAL, "sudo rmmod modttpoe"), 1);
    assert_eq!(lab.exec.count(PEER, "sudo rmmod modttpoe"), 1);
    assert!(lab.lock_files().is_empty());

    assert!(lab.sleeper.calls().contains(&Duration::from_millis(500)));
}

#[tokio::test]
async fn test_insmod_arguments_per_node() {
    let lab = Lab::new();
    let ctx = RunOptions {
        verbose: 2,
        drop_pct: Some(10),
        peer_dev: Some("eth1".into()),
        ..opts()
    }
    .validate()
    .unwrap();

    let session = lab.orchestrator.setup(ctx).await.unwrap();
    assert_eq!(session.ctx.settle, Duration::from_secs(2));
    lab.orchestrator.teardown(session).await;

    let local = lab.exec.commands_on(LOCAL);
    assert!(local.contains(
        &"sudo insmod /mnt/mac/modttpoe.ko verbose=2 dev=vleth drop_pct=10".to_string()
    ));
    let peer = lab.exec.commands_on(PEER);
    assert!(peer.contains(&"sudo insmod /mnt/mac/modttpoe.ko verbose=2 dev=eth1 drop_pct=10".to_string()));
    assert!(peer.contains(&"ip link show dev eth1 > /dev/null".to_string()));
}

#[tokio::test]
async fn test_setup_sets_local_target_and_reads_baselines() {
    let lab = Lab::new();
    lab.exec.set_param(PEER, "tag_seq", "7");
    let ctx = RunOptions {
        vci: Some(2),
        ..opts()
    }
    .validate()
    .unwrap();

    let session = lab.orchestrator.setup(ctx).await.unwrap();
    assert_eq!(session.baseline, 1);
    assert_eq!(session.peer_baseline, Some(7));
    assert_eq!(session.locked_nodes(), vec!["node-01", "node-0a"]);
    assert_eq!(lab.exec.param(LOCAL, "target").as_deref(), Some("00000a"));
    assert_eq!(lab.exec.param(LOCAL, "vci").as_deref(), Some("2"));

    let vci = lab.exec.position(LOCAL, "echo 2 > ").unwrap();
    let target = lab.exec.position(LOCAL, "echo 00000a > ").unwrap();
    assert!(vci < target);

    lab.orchestrator.teardown(session).await;
    assert!(lab.lock_files().is_empty());
}

#[tokio::test]
async fn test_peer_load_failure_rolls_back() {
    let lab = Lab::new();
    lab.exec.fail(PEER, "sudo insmod");
    let ctx = opts().validate().unwrap();

    let err = lab.orchestrator.run(ctx).await.err().unwrap();

    assert!(err.is_module_load(), "{err}");
    assert_eq!(lab.exec.count(LOCAL, "sudo rmmod"), 1);
    assert_eq!(lab.exec.count(PEER, "sudo rmmod"), 0);
    assert!(lab.lock_files().is_empty());
}

#[tokio::test]
async fn test_local_load_failure_releases_locks_only() {
    let lab = Lab::new();
    lab.exec.fail(LOCAL, "sudo insmod");
    let ctx = opts().validate().unwrap();

    let err = lab.orchestrator.setup(ctx).await.err().unwrap();

    assert!(err.is_module_load());
    assert_eq!(lab.exec.count(LOCAL, "sudo rmmod"), 0);
    assert_eq!(lab.exec.count(PEER, "sudo insmod"), 0);
    assert!(lab.lock_files().is_empty());
}

#[tokio::test]
async fn test_gateway_timeout_after_exact_budget() {
    let lab = Lab::new();
    let ctx = RunOptions {
        use_gw: true,
        ..opts()
    }
    .validate()
    .unwrap();

    let err = lab.orchestrator.setup(ctx).await.err().unwrap();

    assert!(err.is_timeout(), "{err}");
    let probes = lab.exec.count(LOCAL, "cat /sys/module/modttpoe/parameters/nhmac");
    assert_eq!(probes, 10);
    assert_eq!(lab.sleeper.calls(), vec![Duration::from_secs(1); 10]);
    assert_eq!(lab.exec.count(LOCAL, "echo 1 > "), 0);
    assert_eq!(lab.exec.count(LOCAL, "sudo rmmod"), 1);
    assert_eq!(lab.exec.count(PEER, "sudo insmod"), 0);
    assert!(lab.lock_files().is_empty());
}

#[tokio::test]
async fn test_gateway_resolves_before_target_is_set() {
    let lab = Lab::new();
    lab.exec.queue_param_reads(
        LOCAL,
        "nhmac",
        &["00:00:00:00:00:00", "00:00:00:00:00:00", "02:aa:bb:cc:dd:ee"],
    );
    let ctx = RunOptions {
        use_gw: true,
        ..opts()
    }
    .validate()
    .unwrap();

    let session = lab.orchestrator.setup(ctx).await.unwrap();
    let gateway = session.gateway.unwrap();
    assert_eq!(gateway.attempts, 3);
    assert_eq!(gateway.nhmac.to_string(), "02:aa:bb:cc:dd:ee");
    assert_eq!(lab.exec.param(LOCAL, "use_gw").as_deref(), Some("1"));

    let use_gw = lab.exec.position(LOCAL, "echo 1 > /sys/module/modttpoe/parameters/use_gw").unwrap();
    let target = lab.exec.position(LOCAL, "echo 00000a > ").unwrap();
    assert!(use_gw < target);
    lab.orchestrator.teardown(session).await;
}

#[tokio::test]
async fn test_ipv4_sets_target_before_next_hop_poll() {
    let lab = Lab::new();
    lab.exec
        .queue_param_reads(LOCAL, "nhmac", &["00:00:00:00:00:00", "02:00:00:00:00:09"]);
    let ctx = RunOptions {
        ipv4: true,
        ..opts()
    }
    .validate()
    .unwrap();

    let session = lab.orchestrator.setup(ctx).await.unwrap();
    assert_eq!(session.identities.local.target_code, "000001");

    let target = lab.exec.position(LOCAL, "echo 00000a > ").unwrap();
    let first_probe = lab
        .exec
        .position(LOCAL, "cat /sys/module/modttpoe/parameters/nhmac")
        .unwrap();
    assert!(target < first_probe);
    assert_eq!(lab.exec.count(LOCAL, "echo 1 > "), 0);
    assert!(lab.exec.commands_on(LOCAL).iter().any(|c| {
        c.starts_with("sudo insmod") && c.ends_with("dev=vlip4 drop_pct=0 ipv4=1 prefix=10.0.0.0/8")
    }));
    lab.orchestrator.teardown(session).await;
}

#[tokio::test]
async fn test_busy_peer_leaves_no_trace() {
    let lab = Lab::new();
    let other_run = lab.locks.try_acquire("node-0a").unwrap();
    let ctx = opts().validate().unwrap();

    let err = lab.orchestrator.run(ctx).await.err().unwrap();

    assert!(err.is_resource_busy());
    assert_eq!(lab.exec.count(LOCAL, "sudo insmod"), 0);
    assert_eq!(lab.lock_files(), vec!["ttp-host-lock-node-0a"]);
    lab.locks.release(&other_run).unwrap();
}

#[tokio::test]
async fn test_self_target_is_rejected_before_locking() {
    let lab = Lab::new();
    let ctx = RunOptions {
        target: Some("1".into()),
        ..RunOptions::default()
    }
    .validate()
    .unwrap();

    let err = lab.orchestrator.run(ctx).await.err().unwrap();

    assert!(err.is_config());
    assert!(lab.lock_files().is_empty());
    assert_eq!(lab.exec.count(LOCAL, "sudo insmod"), 0);
}

#[tokio::test]
async fn test_plain_file_debug_device_is_rejected() {
    let lab = Lab::new();
    lab.exec.fail(PEER, "test ! -e /dev/noc_debug");
    let ctx = opts().validate().unwrap();

    let err = lab.orchestrator.run(ctx).await.err().unwrap();

    assert!(err.is_config());
    assert!(err.to_string().contains("not a character device"));
    assert!(lab.lock_files().is_empty());
}

#[tokio::test]
async fn test_no_remote_runs_locally() {
    let lab = Lab::new();
    let ctx = RunOptions {
        no_remote: true,
        ..opts()
    }
    .validate()
    .unwrap();

    let report = lab.orchestrator.run(ctx).await.unwrap();

    assert!(lab.exec.commands_on(PEER).is_empty());
    assert!(report.is_success());
    assert_eq!(
        report.get("seq_ids", "tx_seq").unwrap().outcome,
        Outcome::Skipped("--no-remote specified".to_string())
    );
    assert_eq!(report.get("cleanup", "local_pending").unwrap().outcome, Outcome::Passed);
    assert!(lab.lock_files().is_empty());
}

#[tokio::test]
async fn test_no_load_and_no_unload() {
    let lab = Lab::new();
    let ctx = RunOptions {
        no_load: true,
        no_unload: true,
        no_traffic: true,
        ..opts()
    }
    .validate()
    .unwrap();

    let report = lab.orchestrator.run(ctx).await.unwrap();

    assert_eq!(lab.exec.count(LOCAL, "sudo insmod"), 0);
    assert_eq!(lab.exec.count(PEER, "sudo insmod"), 0);
    assert_eq!(lab.exec.count(LOCAL, "sudo rmmod"), 0);
    assert_eq!(lab.exec.count(PEER, "sudo rmmod"), 0);
    assert_eq!(
        report.get("seq_ids", "rx_seq").unwrap().outcome,
        Outcome::Skipped("requires module reload".to_string())
    );
    assert_eq!(
        report.get("traffic", "single_500").unwrap().outcome,
        Outcome::Skipped("--no-traffic specified".to_string())
    );
    assert!(lab.lock_files().is_empty());
}
