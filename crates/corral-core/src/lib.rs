pub mod config;

pub use config::{AgentConfig, ContainerConfig, ControllerConfig, CorralConfig, EngineType};
