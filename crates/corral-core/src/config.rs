//! corral.toml configuration parser.
//!
//! A single file configures both sides of the cluster: the `[controller]`
//! section is read by `corrald controller`, the `[agent]` and `[container]`
//! sections by `corrald agent`. Every field has a default, so an empty file
//! is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::bail;
use serde::{Deserialize, Serialize};

/// Interval helpers never return less than this, so a zero setting cannot
/// turn a periodic loop into a busy spin.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

fn interval(ms: u64) -> Duration {
    Duration::from_millis(ms).max(MIN_INTERVAL)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CorralConfig {
    pub controller: ControllerConfig,
    pub agent: AgentConfig,
    pub container: ContainerConfig,
}

/// Settings for the central controller (synchronizer + global scheduler).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    /// Address the REST API listens on.
    pub listen: String,
    /// Directory holding the controller's redb file.
    pub data_dir: PathBuf,
    /// Global scheduler cycle period.
    pub scheduler_interval_ms: u64,
    /// A host whose last report is older than this is marked unreachable.
    pub host_timeout_ms: u64,
    /// How often host liveness is re-evaluated.
    pub liveness_check_ms: u64,
}

/// Settings for a per-host agent (host monitor + container manager).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub hostname: String,
    /// Controller REST address (`ip:port`).
    pub controller: String,
    pub data_dir: PathBuf,
    pub total_cores: u32,
    pub total_memory_bytes: u64,
    pub monitor_interval_ms: u64,
    pub manager_interval_ms: u64,
    /// How long finalized containers stay in local tracking.
    pub retention_ms: u64,
    /// Start attempts before a container is declared failed.
    pub max_start_attempts: u32,
    /// Fraction (0.0–1.0) of total memory held back from admission.
    pub memory_headroom_fraction: f64,
    /// How long a finalized container name is held back before the same
    /// name may be admitted again.
    pub cooldown_ms: u64,
}

/// Container engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContainerConfig {
    /// Engine type: "simulated" or "process".
    #[serde(rename = "type")]
    pub engine: EngineType,
    /// Run time of a simulated container before it reports finished.
    pub simulated_run_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngineType {
    #[default]
    Simulated,
    Process,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:7400".to_string(),
            data_dir: PathBuf::from("/var/lib/corral"),
            scheduler_interval_ms: 10_000,
            host_timeout_ms: 30_000,
            liveness_check_ms: 5_000,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
            controller: "127.0.0.1:7400".to_string(),
            data_dir: PathBuf::from("/var/lib/corral-agent"),
            total_cores: std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1),
            total_memory_bytes: 4 * 1024 * 1024 * 1024,
            monitor_interval_ms: 1_000,
            manager_interval_ms: 10_000,
            retention_ms: 60_000,
            max_start_attempts: 3,
            memory_headroom_fraction: 0.0,
            cooldown_ms: 10_000,
        }
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            engine: EngineType::Simulated,
            simulated_run_ms: 5_000,
        }
    }
}

impl CorralConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CorralConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no loop can run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let intervals = [
            ("controller.scheduler_interval_ms", self.controller.scheduler_interval_ms),
            ("controller.liveness_check_ms", self.controller.liveness_check_ms),
            ("agent.monitor_interval_ms", self.agent.monitor_interval_ms),
            ("agent.manager_interval_ms", self.agent.manager_interval_ms),
        ];
        if let Some((key, _)) = intervals.iter().find(|(_, ms)| *ms == 0) {
            bail!("{key} must be greater than zero");
        }
        let headroom = self.agent.memory_headroom_fraction;
        if !(0.0..=1.0).contains(&headroom) {
            bail!("agent.memory_headroom_fraction must be within 0.0..=1.0, got {headroom}");
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

impl ControllerConfig {
    pub fn scheduler_interval(&self) -> Duration {
        interval(self.scheduler_interval_ms)
    }

    pub fn liveness_check_interval(&self) -> Duration {
        interval(self.liveness_check_ms)
    }
}

impl AgentConfig {
    pub fn monitor_interval(&self) -> Duration {
        interval(self.monitor_interval_ms)
    }

    pub fn manager_interval(&self) -> Duration {
        interval(self.manager_interval_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}
