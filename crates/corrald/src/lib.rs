//! corrald: assembly of the Corral loops into runnable nodes.
//!
//! - [`controller`] wires the state store, synchronizer, global scheduler,
//!   and REST API.
//! - [`agent_mode`] wires one host's monitor and container manager to a
//!   controller, over HTTP or in-process.
//! - [`standalone`] runs a controller and N simulated hosts in one process.

pub mod agent_mode;
pub mod controller;
pub mod standalone;

use tokio::sync::watch;
use tracing::{info, warn};

/// Wait for Ctrl-C, then tell every loop to stop.
pub async fn shutdown_on_ctrl_c(shutdown_tx: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C, shutting down");
    } else {
        info!("shutdown signal received");
    }
    let _ = shutdown_tx.send(true);
}
