//! End-to-end cluster tests.
//!
//! Each test runs a real controller (synchronizer + scheduler) and, where
//! needed, simulated hosts with short loop intervals, then drives it
//! through the state store the way the ingress API does.

use std::time::Duration;

use corral_agent::{ControllerClient, LocalHost, SimulatedRuntime};
use corral_cluster::{ChannelReportSink, ReportSink};
use corral_core::{AgentConfig, ControllerConfig};
use corral_state::{Container, Host, Request, RequestStatus, Reservation, StateStore, epoch_millis};
use corrald::agent_mode::spawn_host;
use corrald::controller::{serve, start_controller};
use corrald::standalone::{Standalone, StandaloneOptions, start_standalone};
use tokio::sync::watch;

const MB: u64 = 1024 * 1024;

fn controller_config() -> ControllerConfig {
    ControllerConfig {
        scheduler_interval_ms: 10,
        host_timeout_ms: 30_000,
        liveness_check_ms: 1_000,
        ..Default::default()
    }
}

fn agent_config() -> AgentConfig {
    AgentConfig {
        monitor_interval_ms: 5,
        manager_interval_ms: 5,
        retention_ms: 60_000,
        max_start_attempts: 1,
        ..Default::default()
    }
}

fn options(hosts: usize, cores: u32, run_for: Duration) -> StandaloneOptions {
    StandaloneOptions {
        hosts,
        cores,
        memory_bytes: 1024 * MB,
        run_for,
        controller: controller_config(),
        agent: agent_config(),
    }
}

/// Store containers, then the NEW request naming them.
fn submit(store: &StateStore, id: &str, containers: &[(&str, u32)]) {
    let now = epoch_millis();
    for (name, cores) in containers {
        let c = Container::new(*name, id, Reservation::new(*cores, 64 * MB), now);
        store.put_container(&c).unwrap();
    }
    let names = containers.iter().map(|(n, _)| n.to_string()).collect();
    store.put_request(&Request::new(id, names, now)).unwrap();
}

/// Poll until the request reaches `target`; returns every status observed.
async fn wait_for(store: &StateStore, id: &str, target: RequestStatus) -> Vec<RequestStatus> {
    let mut seen = Vec::new();
    for _ in 0..1_000 {
        if let Some(request) = store.get_request(id).unwrap() {
            if seen.last() != Some(&request.status) {
                seen.push(request.status);
            }
            if request.status == target {
                return seen;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("request {id} never reached {target}; saw {seen:?}");
}

async fn stop(cluster: Standalone, shutdown: watch::Sender<bool>) {
    shutdown.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), cluster.join())
        .await
        .expect("loops did not stop");
}

#[tokio::test]
async fn request_runs_to_completion() {
    let store = StateStore::open_in_memory().unwrap();
    let (tx, rx) = watch::channel(false);
    let cluster = start_standalone(store.clone(), &options(1, 2, Duration::from_millis(150)), rx)
        .await
        .unwrap();

    submit(&store, "r1", &[("c1", 1)]);
    let seen = wait_for(&store, "r1", RequestStatus::Finished).await;

    assert!(seen.contains(&RequestStatus::Running), "saw {seen:?}");
    assert_eq!(seen.last(), Some(&RequestStatus::Finished));
    assert!(!cluster.controller.api.cluster.read().await.requests.contains("r1"));

    let history = store.list_container_history("c1", 100).unwrap();
    let statuses: Vec<_> = history.iter().map(|c| c.status).collect();
    assert!(statuses.contains(&corral_state::ContainerStatus::Active));
    assert!(statuses.contains(&corral_state::ContainerStatus::Finished));
    let canonical = store.get_container("c1").unwrap().unwrap();
    assert_eq!(canonical.hostname.as_deref(), Some("host-0"));

    stop(cluster, tx).await;
}

#[tokio::test]
async fn request_without_hosts_stays_queued() {
    let store = StateStore::open_in_memory().unwrap();
    let (tx, rx) = watch::channel(false);
    let controller = start_controller(store.clone(), &controller_config(), rx)
        .await
        .unwrap();

    submit(&store, "r1", &[("c1", 1)]);
    wait_for(&store, "r1", RequestStatus::Queued).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        store.get_request("r1").unwrap().unwrap().status,
        RequestStatus::Queued
    );
    assert!(controller.api.cluster.read().await.requests.contains("r1"));

    tx.send(true).unwrap();
    controller.join().await;
}

#[tokio::test]
async fn repeated_hostname_keeps_latest_report() {
    let store = StateStore::open_in_memory().unwrap();
    let (tx, rx) = watch::channel(false);
    let controller = start_controller(store.clone(), &controller_config(), rx)
        .await
        .unwrap();
    let sink = ChannelReportSink::new(controller.api.reports.clone());

    let mut first = Host::new("h1", 4, 1024);
    first.reported_at = 1;
    let mut second = Host::new("h1", 4, 1024);
    second.available_cores = 1;
    second.reported_at = 2;
    sink.send_report(&first).await.unwrap();
    sink.send_report(&second).await.unwrap();

    {
        let cluster = controller.api.cluster.read().await;
        assert_eq!(cluster.hosts.len(), 1);
        assert_eq!(cluster.hosts.get("h1").unwrap().host.available_cores, 1);
    }
    assert_eq!(store.list_host_history("h1", 10).unwrap().len(), 2);

    tx.send(true).unwrap();
    controller.join().await;
}

#[tokio::test]
async fn failed_container_fails_request_while_sibling_runs() {
    let store = StateStore::open_in_memory().unwrap();
    let (tx, rx) = watch::channel(false);
    let cluster = start_standalone(store.clone(), &options(1, 4, Duration::from_secs(3600)), rx)
        .await
        .unwrap();
    cluster.hosts[0].runtime.fail_start("bad");

    submit(&store, "r1", &[("good", 1), ("bad", 1)]);
    wait_for(&store, "r1", RequestStatus::Failed).await;

    assert!(cluster.hosts[0].host.lock().await.is_active("good"));
    assert!(!cluster.controller.api.cluster.read().await.requests.contains("r1"));

    stop(cluster, tx).await;
}

#[tokio::test]
async fn oversized_request_waits_while_others_complete() {
    let store = StateStore::open_in_memory().unwrap();
    let (tx, rx) = watch::channel(false);
    let cluster = start_standalone(store.clone(), &options(2, 2, Duration::from_millis(20)), rx)
        .await
        .unwrap();

    submit(&store, "big", &[("big-0", 8)]);
    submit(&store, "a", &[("a-0", 2)]);
    submit(&store, "b", &[("b-0", 1), ("b-1", 1)]);

    wait_for(&store, "a", RequestStatus::Finished).await;
    wait_for(&store, "b", RequestStatus::Finished).await;
    assert_eq!(
        store.get_request("big").unwrap().unwrap().status,
        RequestStatus::Queued
    );

    // Both containers of "b" went to the same host.
    let b0 = store.get_container("b-0").unwrap().unwrap().hostname;
    let b1 = store.get_container("b-1").unwrap().unwrap().hostname;
    assert!(b0.is_some());
    assert_eq!(b0, b1);

    stop(cluster, tx).await;
}

#[tokio::test]
async fn queued_request_is_recovered_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corral.redb");
    {
        let store = StateStore::open(&path).unwrap();
        let c = Container::new("c1", "r1", Reservation::new(1, 64 * MB), 1);
        store.put_container(&c).unwrap();
        let mut request = Request::new("r1", vec!["c1".into()], 1);
        request.status = RequestStatus::Queued;
        store.put_request(&request).unwrap();
    }

    let store = StateStore::open(&path).unwrap();
    let (tx, rx) = watch::channel(false);
    let cluster = start_standalone(store.clone(), &options(1, 1, Duration::from_millis(20)), rx)
        .await
        .unwrap();

    wait_for(&store, "r1", RequestStatus::Finished).await;
    stop(cluster, tx).await;
}

#[tokio::test]
async fn agent_over_http_completes_request() {
    let store = StateStore::open_in_memory().unwrap();
    let (tx, rx) = watch::channel(false);
    let controller = start_controller(store.clone(), &controller_config(), rx.clone())
        .await
        .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let server = tokio::spawn(serve(listener, controller.api.clone(), rx.clone()));

    let config = AgentConfig {
        hostname: "remote-1".into(),
        ..agent_config()
    };
    let client = ControllerClient::new(&addr);
    let tasks = spawn_host(
        LocalHost::new("remote-1", 2, 1024 * MB).shared(),
        std::sync::Arc::new(SimulatedRuntime::new(Duration::from_millis(20))),
        client.clone(),
        client,
        StateStore::open_in_memory().unwrap(),
        &config,
        rx,
    );

    submit(&store, "r1", &[("c1", 1)]);
    wait_for(&store, "r1", RequestStatus::Finished).await;
    assert_eq!(
        store.get_container("c1").unwrap().unwrap().hostname.as_deref(),
        Some("remote-1")
    );

    tx.send(true).unwrap();
    for task in tasks {
        task.await.unwrap();
    }
    server.await.unwrap().unwrap();
    controller.join().await;
}
