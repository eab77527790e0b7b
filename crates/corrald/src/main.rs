//! corrald: the Corral daemon.
//!
//! One binary, three roles:
//! - `controller`: state store, synchronizer, global scheduler, REST API
//! - `agent`: host monitor and container manager for one compute host
//! - `standalone`: a controller plus N simulated hosts in one process
//!
//! # Usage
//!
//! ```text
//! corrald controller --config corral.toml --listen 0.0.0.0:7400
//! corrald agent --config corral.toml --hostname node-1 --controller 10.0.0.1:7400
//! corrald standalone --hosts 3 --cores 4 --memory-mb 8192
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use corral_core::CorralConfig;
use corrald::standalone::StandaloneOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,corrald=debug,corral=debug";

#[derive(Parser)]
#[command(name = "corrald", about = "Corral cluster daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the central controller.
    Controller {
        /// Path to corral.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// REST API listen address (overrides the config file).
        #[arg(long)]
        listen: Option<String>,

        /// Data directory for persistent state (overrides the config file).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Run a host agent that reports to a controller.
    Agent {
        /// Path to corral.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Name this host reports under (overrides the config file).
        #[arg(long)]
        hostname: Option<String>,

        /// Controller REST address (overrides the config file).
        #[arg(long)]
        controller: Option<String>,
    },

    /// Run a controller and simulated hosts in one process.
    Standalone {
        /// Path to corral.toml, for intervals and the listen address.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of simulated hosts.
        #[arg(long, default_value = "3")]
        hosts: usize,

        /// Cores per host.
        #[arg(long, default_value = "4")]
        cores: u32,

        /// Memory per host in MiB.
        #[arg(long, default_value = "8192")]
        memory_mb: u64,

        /// How long a simulated container runs, in milliseconds.
        #[arg(long)]
        run_ms: Option<u64>,

        /// REST API listen address.
        #[arg(long)]
        listen: Option<String>,

        /// Data directory for persistent state.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<CorralConfig> {
    match path {
        Some(path) => {
            let config = CorralConfig::from_file(path)?;
            info!(path = ?path, "configuration loaded");
            Ok(config)
        }
        None => Ok(CorralConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    match cli.command {
        Command::Controller {
            config,
            listen,
            data_dir,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(listen) = listen {
                config.controller.listen = listen;
            }
            if let Some(data_dir) = data_dir {
                config.controller.data_dir = data_dir;
            }
            corrald::controller::run_controller(config.controller).await
        }
        Command::Agent {
            config,
            hostname,
            controller,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(hostname) = hostname {
                config.agent.hostname = hostname;
            }
            if let Some(controller) = controller {
                config.agent.controller = controller;
            }
            corrald::agent_mode::run_agent(config).await
        }
        Command::Standalone {
            config,
            hosts,
            cores,
            memory_mb,
            run_ms,
            listen,
            data_dir,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(listen) = listen {
                config.controller.listen = listen;
            }
            if let Some(data_dir) = data_dir {
                config.controller.data_dir = data_dir;
            }
            let run_ms = run_ms.unwrap_or(config.container.simulated_run_ms);
            corrald::standalone::run_standalone(StandaloneOptions {
                hosts,
                cores,
                memory_bytes: memory_mb * 1024 * 1024,
                run_for: Duration::from_millis(run_ms),
                controller: config.controller,
                agent: config.agent,
            })
            .await
        }
    }
}
