//! Controller mode: the cluster's single source of truth.
//!
//! In this mode, the daemon:
//! 1. Opens the redb state store
//! 2. Rebuilds the live request set from stored QUEUED/RUNNING requests
//! 3. Runs the synchronizer (host reports) and the global scheduler
//! 4. Serves the REST API that agents and clients talk to

use std::sync::Arc;
use std::time::Duration;

use corral_api::{ApiState, build_router};
use corral_cluster::{ClusterState, HostQueues, Synchronizer, report_channel};
use corral_core::ControllerConfig;
use corral_placement::OneHostPlacement;
use corral_scheduler::GlobalScheduler;
use corral_state::StateStore;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Capacity of the report channel between the API and the synchronizer.
const REPORT_BACKLOG: usize = 256;

/// A running controller: the handlers' shared state and its loops.
pub struct Controller {
    pub api: ApiState,
    pub tasks: Vec<JoinHandle<()>>,
}

impl Controller {
    /// Wait for every controller loop to exit.
    pub async fn join(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Recover scheduler state and spawn the synchronizer and scheduler loops.
pub async fn start_controller(
    store: StateStore,
    config: &ControllerConfig,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<Controller> {
    let cluster = ClusterState::shared(Duration::from_millis(config.host_timeout_ms));
    let queues = Arc::new(HostQueues::new());
    let (reports_tx, reports_rx) = report_channel(REPORT_BACKLOG);

    let mut scheduler = GlobalScheduler::new(
        store.clone(),
        cluster.clone(),
        OneHostPlacement,
        queues.clone(),
    );
    let recovered = scheduler.recover().await?;
    info!(recovered, "scheduler initialized");

    let synchronizer = Synchronizer::new(cluster.clone(), store.clone());
    let sync_handle = tokio::spawn(synchronizer.run(
        reports_rx,
        config.liveness_check_interval(),
        shutdown.clone(),
    ));
    let sched_handle = tokio::spawn(scheduler.run(config.scheduler_interval(), shutdown));

    Ok(Controller {
        api: ApiState::new(store, cluster, queues, reports_tx),
        tasks: vec![sync_handle, sched_handle],
    })
}

/// Serve the REST API until shutdown.
pub async fn serve(
    listener: TcpListener,
    api: ApiState,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "API server starting");
    axum::serve(listener, build_router(api))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}

/// Run the controller node until Ctrl-C.
pub async fn run_controller(config: ControllerConfig) -> anyhow::Result<()> {
    info!("Corral daemon starting in controller mode");
    std::fs::create_dir_all(&config.data_dir)?;
    let db_path = config.data_dir.join("corral.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let controller = start_controller(store, &config, shutdown_rx.clone()).await?;

    let listener = TcpListener::bind(&config.listen).await?;
    tokio::spawn(crate::shutdown_on_ctrl_c(shutdown_tx));
    serve(listener, controller.api.clone(), shutdown_rx).await?;

    controller.join().await;
    info!("controller stopped");
    Ok(())
}
