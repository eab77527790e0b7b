//! Container runtimes.
//!
//! The runtime owns container mechanics; the agent loops only ask it to
//! create, start, and report on containers by name. Failures are returned,
//! never raised, so a misbehaving container cannot take down a loop.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use corral_core::{ContainerConfig, EngineType};
use corral_state::{Container, ContainerStatus};
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::error::{RuntimeError, RuntimeResult};

/// Engine that actually runs containers.
pub trait ContainerRuntime: Send + Sync {
    /// Prepare a container that just arrived on this host.
    fn create(&self, container: &Container) -> RuntimeResult<()>;

    /// Launch a created container pinned to `cores`.
    fn start(&self, container: &Container, cores: &[u32]) -> RuntimeResult<()>;

    /// Current status of a started container, `None` if the runtime has
    /// never started it.
    fn status(&self, name: &str) -> RuntimeResult<Option<ContainerStatus>>;
}

/// Build the runtime selected by the `[container]` config section.
pub fn runtime_for(config: &ContainerConfig) -> Arc<dyn ContainerRuntime> {
    match config.engine {
        EngineType::Simulated => Arc::new(SimulatedRuntime::new(Duration::from_millis(
            config.simulated_run_ms,
        ))),
        EngineType::Process => Arc::new(ProcessRuntime::new()),
    }
}

// ── Simulated ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SimState {
    created: HashSet<String>,
    started: HashMap<String, Instant>,
    fail_start: HashSet<String>,
    fail_run: HashSet<String>,
}

/// Runtime whose containers finish after a fixed run time.
///
/// Supports failure injection so tests and the standalone mode can exercise
/// the failure paths.
#[derive(Debug)]
pub struct SimulatedRuntime {
    run_for: Duration,
    inner: Mutex<SimState>,
}

impl SimulatedRuntime {
    pub fn new(run_for: Duration) -> Self {
        Self {
            run_for,
            inner: Mutex::new(SimState::default()),
        }
    }

    /// Make every start of `name` fail.
    pub fn fail_start(&self, name: &str) {
        self.lock().fail_start.insert(name.to_string());
    }

    /// Make `name` terminate as FAILED instead of FINISHED.
    pub fn fail_run(&self, name: &str) {
        self.lock().fail_run.insert(name.to_string());
    }

    /// Names the runtime has created, for inspection.
    pub fn created(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().created.iter().cloned().collect();
        names.sort();
        names
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ContainerRuntime for SimulatedRuntime {
    fn create(&self, container: &Container) -> RuntimeResult<()> {
        self.lock().created.insert(container.name.clone());
        debug!(container = %container.name, "simulated container created");
        Ok(())
    }

    fn start(&self, container: &Container, cores: &[u32]) -> RuntimeResult<()> {
        let mut inner = self.lock();
        if !inner.created.contains(&container.name) {
            return Err(RuntimeError::Start {
                name: container.name.clone(),
                reason: "container was never created".into(),
            });
        }
        if inner.fail_start.contains(&container.name) {
            return Err(RuntimeError::Start {
                name: container.name.clone(),
                reason: "injected start failure".into(),
            });
        }
        inner.started.insert(container.name.clone(), Instant::now());
        debug!(container = %container.name, ?cores, "simulated container started");
        Ok(())
    }

    fn status(&self, name: &str) -> RuntimeResult<Option<ContainerStatus>> {
        let inner = self.lock();
        let Some(started) = inner.started.get(name) else {
            return Ok(None);
        };
        if started.elapsed() < self.run_for {
            return Ok(Some(ContainerStatus::Active));
        }
        if inner.fail_run.contains(name) {
            Ok(Some(ContainerStatus::Failed))
        } else {
            Ok(Some(ContainerStatus::Finished))
        }
    }
}

// ── Process ────────────────────────────────────────────────────────

/// Runtime that runs a container's `command` as a child process.
///
/// The child sees its core set and memory reservation in `CORRAL_CORES`
/// and `CORRAL_MEMORY_BYTES`. Exit status 0 means FINISHED, anything else
/// FAILED. Must be used from within a tokio runtime.
#[derive(Debug, Default)]
pub struct ProcessRuntime {
    children: Mutex<HashMap<String, Child>>,
    exited: Mutex<HashMap<String, ContainerStatus>>,
}

impl ProcessRuntime {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContainerRuntime for ProcessRuntime {
    fn create(&self, container: &Container) -> RuntimeResult<()> {
        if container.command.is_empty() {
            return Err(RuntimeError::InvalidSpec {
                name: container.name.clone(),
                reason: "empty command".into(),
            });
        }
        Ok(())
    }

    fn start(&self, container: &Container, cores: &[u32]) -> RuntimeResult<()> {
        let Some((program, args)) = container.command.split_first() else {
            return Err(RuntimeError::InvalidSpec {
                name: container.name.clone(),
                reason: "empty command".into(),
            });
        };
        let core_list = cores
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let child = Command::new(program)
            .args(args)
            .env("CORRAL_CONTAINER", &container.name)
            .env("CORRAL_CORES", &core_list)
            .env(
                "CORRAL_MEMORY_BYTES",
                container.reservation.memory_bytes.to_string(),
            )
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RuntimeError::Start {
                name: container.name.clone(),
                reason: e.to_string(),
            })?;

        info!(container = %container.name, pid = ?child.id(), cores = %core_list, "process started");
        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(container.name.clone(), child);
        Ok(())
    }

    fn status(&self, name: &str) -> RuntimeResult<Option<ContainerStatus>> {
        let mut exited = self.exited.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(status) = exited.get(name) {
            return Ok(Some(*status));
        }

        let mut children = self.children.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(child) = children.get_mut(name) else {
            return Ok(None);
        };
        match child.try_wait() {
            Ok(None) => Ok(Some(ContainerStatus::Active)),
            Ok(Some(exit)) => {
                let status = if exit.success() {
                    ContainerStatus::Finished
                } else {
                    ContainerStatus::Failed
                };
                debug!(container = %name, ?exit, "process exited");
                children.remove(name);
                exited.insert(name.to_string(), status);
                Ok(Some(status))
            }
            Err(e) => Err(RuntimeError::Status {
                name: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}
