//! Agent mode: runs on a compute host and reports to a controller.
//!
//! In this mode, the daemon:
//! 1. Opens a local state store for container history
//! 2. Builds the configured container runtime and admission policy
//! 3. Runs the host monitor and the container manager over one shared host
//! 4. Talks to the controller's REST API for reports and placed containers

use std::sync::Arc;
use std::time::Duration;

use corral_agent::{
    ContainerManager, ContainerRuntime, ControllerClient, HostAgent, LocalHost, SharedHost,
    policy_for, runtime_for,
};
use corral_cluster::{ContainerSource, ReportSink};
use corral_core::{AgentConfig, CorralConfig};
use corral_state::StateStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Spawn the monitor and manager loops for one host.
pub fn spawn_host<R, S>(
    host: SharedHost,
    runtime: Arc<dyn ContainerRuntime>,
    sink: R,
    source: S,
    store: StateStore,
    config: &AgentConfig,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>>
where
    R: ReportSink + 'static,
    S: ContainerSource + 'static,
{
    let manager = ContainerManager::new(
        host.clone(),
        runtime.clone(),
        policy_for(config.memory_headroom_fraction),
        source,
    )
    .with_max_start_attempts(config.max_start_attempts)
    .with_cooldown(config.cooldown());
    let monitor = HostAgent::new(
        host,
        runtime,
        sink,
        store,
        Duration::from_millis(config.retention_ms),
    );

    vec![
        tokio::spawn(monitor.run(config.monitor_interval(), shutdown.clone())),
        tokio::spawn(manager.run(config.manager_interval(), shutdown)),
    ]
}

/// Run the agent node until Ctrl-C.
pub async fn run_agent(config: CorralConfig) -> anyhow::Result<()> {
    let agent = &config.agent;
    info!(hostname = %agent.hostname, controller = %agent.controller, "Corral daemon starting in agent mode");
    std::fs::create_dir_all(&agent.data_dir)?;
    let db_path = agent.data_dir.join("agent.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "local state store opened");

    let runtime = runtime_for(&config.container);
    info!(engine = ?config.container.engine, "container runtime initialized");

    let host = LocalHost::new(&agent.hostname, agent.total_cores, agent.total_memory_bytes).shared();
    let client = ControllerClient::new(&agent.controller);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tasks = spawn_host(host, runtime, client.clone(), client, store, agent, shutdown_rx);

    crate::shutdown_on_ctrl_c(shutdown_tx).await;
    for task in tasks {
        let _ = task.await;
    }
    info!("agent stopped");
    Ok(())
}
