mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use gangway::dispatch::{Dispatcher, DispatcherClients, DispatcherOptions, InstallInstance, InstanceState};
use gangway::host::{Operation, OsType};
use gangway::solution::build_for_host;
use gangway::transport::retry::RetryPolicy;

const SUCCESS_STEP: &str = "install_agent";

struct Harness {
    dispatcher: Dispatcher,
    shell: Arc<common::FakeShell>,
    remote: Arc<common::FakeRemoteCommand>,
    jobs: Arc<common::FakeJobBackend>,
    cache: Arc<common::MemoryCache>,
    facts: Arc<common::RecordingFacts>,
    reports: Arc<common::MemoryReports>,
}

fn harness_with(options: DispatcherOptions, shell: common::FakeShell) -> Harness {
    common::init_tracing();
    let shell = Arc::new(shell);
    let remote = Arc::new(common::FakeRemoteCommand::default());
    let jobs = Arc::new(common::FakeJobBackend::new());
    let cache = Arc::new(common::MemoryCache::new());
    let facts = Arc::new(common::RecordingFacts::default());
    let reports = Arc::new(common::MemoryReports::new());
    let clients = DispatcherClients {
        shell: shell.clone(),
        remote: remote.clone(),
        jobs: jobs.clone(),
        cache: cache.clone(),
        facts: facts.clone(),
        reports: reports.clone(),
    };
    Harness {
        dispatcher: Dispatcher::new(options, clients),
        shell,
        remote,
        jobs,
        cache,
        facts,
        reports,
    }
}

fn harness(timeout_ticks: u32) -> Harness {
    let options = DispatcherOptions {
        tick_interval: Duration::from_millis(10),
        timeout_ticks,
        retry: RetryPolicy {
            attempts: 2,
            backoff: Duration::from_millis(1),
        },
        ..Default::default()
    };
    harness_with(options, common::FakeShell::default())
}

fn instance(id: &str, os: OsType, jump: bool, manual: bool) -> InstallInstance {
    let mut ctx = common::build_context(os);
    ctx.host.host_id = format!("{id}-host");
    ctx.host.manual_install = manual;
    ctx.host.needs_jump_server = jump;
    if jump {
        ctx.jump = Some(common::jump_server());
    }
    let solutions = build_for_host(&ctx).unwrap();
    InstallInstance::new(id, ctx.host, Operation::Install, solutions, SUCCESS_STEP)
}

#[tokio::test]
async fn linux_install_succeeds_after_two_drains() {
    let mut h = harness(30);
    h.dispatcher.admit(instance("inst-1", OsType::Linux, false, false));

    h.dispatcher.tick(None).await;
    assert_eq!(h.dispatcher.instance("inst-1").unwrap().state, InstanceState::AwaitingReport);

    h.reports.append_record("inst-1", "x", "DONE", "step done").await;
    let s = h.dispatcher.tick(None).await;
    assert_eq!(s.succeeded, 0, "DONE on a non-marker step is not terminal");
    assert_eq!(h.dispatcher.instance("inst-1").unwrap().state, InstanceState::AwaitingReport);

    h.reports.append_record("inst-1", SUCCESS_STEP, "DONE", "agent installed").await;
    let s = h.dispatcher.tick(None).await;
    assert_eq!(s.succeeded, 1);
    assert_eq!(h.dispatcher.instance("inst-1").unwrap().state, InstanceState::Succeeded);
}

#[tokio::test]
async fn unix_channel_walks_solution_in_step_order() {
    let mut h = harness(30);
    h.dispatcher.admit(instance("inst-1", OsType::Linux, false, false));
    h.dispatcher.tick(None).await;

    let log = h.shell.log.lock().await;
    let entries: Vec<&str> = log.iter().map(|(_, e)| e.as_str()).collect();
    assert!(entries[0].contains("mkdir"), "first command creates directories: {entries:?}");
    assert!(entries.iter().any(|e| e.contains("curl")), "download runs over the session");
    assert!(entries.iter().any(|e| e.contains("chmod")));
    assert!(entries.last().unwrap().contains("nohup"), "run command is detached: {entries:?}");
}

#[tokio::test]
async fn failed_record_fails_the_instance_with_reason() {
    let mut h = harness(30);
    h.dispatcher.admit(instance("inst-1", OsType::Linux, false, false));
    h.dispatcher.tick(None).await;

    h.reports
        .append_record("inst-1", "download", "FAILED", "curl: (7) connection refused")
        .await;
    let s = h.dispatcher.tick(None).await;
    assert_eq!(s.failed, 1);
    match &h.dispatcher.instance("inst-1").unwrap().state {
        InstanceState::Failed { reason } => {
            assert!(reason.contains("download"), "reason names the failing step: {reason}")
        }
        other => panic!("expected Failed, got {other:?}"),
    }
}

#[tokio::test]
async fn times_out_exactly_after_budget_never_earlier() {
    let mut h = harness(3);
    // Manual install: enters AwaitingReport directly, no dispatch needed.
    h.dispatcher.admit(instance("inst-1", OsType::Linux, false, true));

    let mut timed_out_total = 0;
    for tick in 1..=2 {
        let s = h.dispatcher.tick(None).await;
        timed_out_total += s.timed_out;
        assert_eq!(
            h.dispatcher.instance("inst-1").unwrap().state,
            InstanceState::AwaitingReport,
            "must not time out at tick {tick}"
        );
    }
    let s = h.dispatcher.tick(None).await;
    timed_out_total += s.timed_out;
    assert_eq!(h.dispatcher.instance("inst-1").unwrap().state, InstanceState::TimedOut);
    assert_eq!(timed_out_total, 1, "transition happens exactly once");

    let s = h.dispatcher.tick(None).await;
    assert_eq!(s.timed_out, 0);
}

#[tokio::test]
async fn manual_instances_skip_dispatch_but_share_report_machinery() {
    let mut h = harness(30);
    h.dispatcher.admit(instance("inst-1", OsType::Linux, false, true));

    h.dispatcher.tick(None).await;
    assert!(h.shell.log.lock().await.is_empty(), "nothing is executed for manual installs");

    h.reports.append_record("inst-1", SUCCESS_STEP, "DONE", "operator ran it").await;
    let s = h.dispatcher.tick(None).await;
    assert_eq!(s.succeeded, 1);
}

#[tokio::test]
async fn cancelled_instances_are_dropped_silently() {
    let mut h = harness(30);
    h.dispatcher.admit(instance("inst-1", OsType::Linux, false, false));
    h.dispatcher.admit(instance("inst-2", OsType::Linux, false, false));

    let active: HashSet<String> = ["inst-2".to_string()].into();
    let s = h.dispatcher.tick(Some(&active)).await;
    assert_eq!(s.cancelled, 1);
    assert!(h.dispatcher.instance("inst-1").is_none());
    assert_eq!(h.dispatcher.instance("inst-2").unwrap().state, InstanceState::AwaitingReport);
}

#[tokio::test]
async fn one_host_failure_never_aborts_siblings() {
    let shell = common::FakeShell {
        refuse: vec!["inst-bad-host".into()],
        ..Default::default()
    };
    let options = DispatcherOptions {
        tick_interval: Duration::from_millis(10),
        timeout_ticks: 30,
        retry: RetryPolicy {
            attempts: 2,
            backoff: Duration::from_millis(1),
        },
        ..Default::default()
    };
    let mut h = harness_with(options, shell);
    h.dispatcher.admit(instance("inst-bad", OsType::Linux, false, false));
    h.dispatcher.admit(instance("inst-good", OsType::Linux, false, false));

    let s = h.dispatcher.tick(None).await;
    assert_eq!(s.failed, 1);
    assert_eq!(s.dispatched, 1);
    assert!(matches!(
        h.dispatcher.instance("inst-bad").unwrap().state,
        InstanceState::Failed { .. }
    ));
    assert_eq!(h.dispatcher.instance("inst-good").unwrap().state, InstanceState::AwaitingReport);
}

#[tokio::test]
async fn windows_channel_probes_before_executing() {
    let mut h = harness(30);
    h.dispatcher.admit(instance("inst-1", OsType::Windows, false, false));
    h.dispatcher.tick(None).await;

    let log = h.remote.log.lock().await;
    let entries: Vec<&str> = log.iter().map(|(_, e)| e.as_str()).collect();
    assert_eq!(entries[0], "probe", "connectivity pre-check comes first: {entries:?}");
    assert!(entries.iter().any(|e| e.starts_with("push:curl.exe")), "platform deps are pushed");
    assert!(entries.last().unwrap().starts_with("exec:start /b"));
}

#[tokio::test]
async fn relay_instances_submit_one_backend_job_and_record_its_id() {
    let mut h = harness(30);
    h.dispatcher.admit(instance("inst-1", OsType::Linux, true, false));
    h.dispatcher.tick(None).await;

    assert_eq!(h.jobs.submission_count().await, 1);
    let inst = h.dispatcher.instance("inst-1").unwrap();
    assert_eq!(inst.state, InstanceState::AwaitingReport);
    assert_eq!(inst.backend_job_id.as_deref(), Some("job-1"));
}

#[tokio::test]
async fn config_payload_is_cached_on_dispatch() {
    let mut h = harness(30);
    h.dispatcher.admit(instance("inst-1", OsType::Linux, false, false));
    h.dispatcher.tick(None).await;
    assert!(h.cache.contains("gangway:cfg:inst-1").await);
}

#[tokio::test]
async fn facts_flush_once_per_distinct_value() {
    let mut h = harness(30);
    h.dispatcher.admit(instance("inst-1", OsType::Linux, false, false));
    h.dispatcher.admit(instance("inst-2", OsType::Linux, false, false));
    h.dispatcher.tick(None).await;

    h.reports.append_record("inst-1", "report_cpu_arch", "-", "arm64").await;
    h.reports.append_record("inst-2", "report_cpu_arch", "-", "arm64").await;
    h.dispatcher.tick(None).await;

    {
        let flushes = h.facts.flushes.lock().await;
        assert_eq!(flushes.len(), 1);
        assert_eq!(flushes[0].len(), 1, "one write per distinct value, not one per host");
        let mut hosts = flushes[0][0].hosts.clone();
        hosts.sort();
        assert_eq!(hosts, vec!["inst-1-host".to_string(), "inst-2-host".to_string()]);
    }

    // The same value reported again is not re-flushed.
    h.reports.append_record("inst-1", "report_cpu_arch", "-", "arm64").await;
    h.dispatcher.tick(None).await;
    assert_eq!(h.facts.flushes.lock().await.len(), 1);
}
