//! corral-agent: everything that runs on a compute host.
//!
//! Two loops share one [`LocalHost`]:
//!
//! - **`HostAgent`** (`monitor`) refreshes container and occupancy state,
//!   records local history, reports the snapshot to the controller, and
//!   prunes finalized containers once they have been reported.
//! - **`ContainerManager`** (`manager`) takes ownership of containers the
//!   controller placed here, shapes free memory through an admission
//!   policy, and starts containers in arrival order when resources allow.
//!
//! Container mechanics sit behind [`ContainerRuntime`]; the controller is
//! reached through the `corral-cluster` transport traits, either in-process
//! or over HTTP ([`remote::ControllerClient`]).

pub mod cooldown;
pub mod error;
pub mod host;
pub mod manager;
pub mod monitor;
pub mod policy;
pub mod remote;
pub mod runtime;

pub use cooldown::Cooldown;
pub use error::{AgentError, AgentResult, RuntimeError, RuntimeResult};
pub use host::{LocalHost, SharedHost};
pub use manager::{ContainerManager, ManagerPass};
pub use monitor::{HostAgent, MonitorPass};
pub use policy::{AdmissionPolicy, Headroom, Unshaped, policy_for};
pub use remote::ControllerClient;
pub use runtime::{ContainerRuntime, ProcessRuntime, SimulatedRuntime, runtime_for};
