//! Standalone mode: a controller and N simulated hosts in one process.
//!
//! Hosts talk to the controller over the in-process transport: reports go
//! straight onto the synchronizer's channel and placed containers are
//! drained from the scheduler's host queues. The REST API is still served
//! so clients can submit requests.

use std::sync::Arc;
use std::time::Duration;

use corral_agent::{LocalHost, SharedHost, SimulatedRuntime};
use corral_cluster::{ChannelReportSink, QueueContainerSource};
use corral_core::{AgentConfig, ControllerConfig};
use corral_state::StateStore;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::agent_mode::spawn_host;
use crate::controller::{Controller, serve, start_controller};

/// Shape of a standalone cluster.
#[derive(Debug, Clone)]
pub struct StandaloneOptions {
    pub hosts: usize,
    pub cores: u32,
    pub memory_bytes: u64,
    /// Simulated container run time.
    pub run_for: Duration,
    pub controller: ControllerConfig,
    /// Template for every host; the hostname is replaced.
    pub agent: AgentConfig,
}

/// Simulated host handles, for inspection and failure injection.
pub struct SimHost {
    pub hostname: String,
    pub host: SharedHost,
    pub runtime: Arc<SimulatedRuntime>,
}

/// A running standalone cluster.
pub struct Standalone {
    pub controller: Controller,
    pub hosts: Vec<SimHost>,
    pub tasks: Vec<JoinHandle<()>>,
}

impl Standalone {
    /// Wait for every controller and host loop to exit.
    pub async fn join(self) {
        for task in self.tasks {
            let _ = task.await;
        }
        self.controller.join().await;
    }
}

/// Start the controller loops and one simulated agent per host.
pub async fn start_standalone(
    store: StateStore,
    options: &StandaloneOptions,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<Standalone> {
    let controller = start_controller(store, &options.controller, shutdown.clone()).await?;

    let mut hosts = Vec::with_capacity(options.hosts);
    let mut tasks = Vec::new();
    for i in 0..options.hosts {
        let hostname = format!("host-{i}");
        let host = LocalHost::new(&hostname, options.cores, options.memory_bytes).shared();
        let runtime = Arc::new(SimulatedRuntime::new(options.run_for));
        let agent = AgentConfig {
            hostname: hostname.clone(),
            ..options.agent.clone()
        };
        tasks.extend(spawn_host(
            host.clone(),
            runtime.clone(),
            ChannelReportSink::new(controller.api.reports.clone()),
            QueueContainerSource::new(controller.api.queues.clone()),
            StateStore::open_in_memory()?,
            &agent,
            shutdown.clone(),
        ));
        hosts.push(SimHost {
            hostname,
            host,
            runtime,
        });
    }
    info!(
        hosts = options.hosts,
        cores = options.cores,
        memory_bytes = options.memory_bytes,
        "simulated hosts started"
    );

    Ok(Standalone {
        controller,
        hosts,
        tasks,
    })
}

/// Run a standalone cluster until Ctrl-C.
pub async fn run_standalone(options: StandaloneOptions) -> anyhow::Result<()> {
    info!("Corral daemon starting in standalone mode");
    std::fs::create_dir_all(&options.controller.data_dir)?;
    let db_path = options.controller.data_dir.join("corral.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cluster = start_standalone(store, &options, shutdown_rx.clone()).await?;

    let listener = TcpListener::bind(&options.controller.listen).await?;
    tokio::spawn(crate::shutdown_on_ctrl_c(shutdown_tx));
    serve(listener, cluster.controller.api.clone(), shutdown_rx).await?;

    cluster.join().await;
    info!("standalone cluster stopped");
    Ok(())
}
