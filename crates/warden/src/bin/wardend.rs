use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use warden::SupervisorDaemon;
use warden_core::{DEFAULT_DAEMON_PORT, DaemonConfig};

/// Supervisor daemon for warden worker and relay processes.
#[derive(Debug, Parser)]
#[command(name = "wardend", version, about)]
struct Cli {
    /// Address the control-plane listener binds (keep on loopback: no auth)
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Control-plane port
    #[arg(long, default_value_t = DEFAULT_DAEMON_PORT)]
    port: u16,

    /// Base directory for managed projects
    #[arg(long)]
    projects_dir: Option<PathBuf>,

    /// Worker server binary (must accept --port, --projects-dir, --audit-log)
    #[arg(long)]
    worker_cmd: Option<String>,

    /// Relay binary (must accept --port and optionally --config)
    #[arg(long)]
    relay_cmd: Option<String>,

    /// SIGTERM leftover worker processes from a previous run before listening
    #[arg(long)]
    sweep: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut builder = DaemonConfig::builder();
    builder.host(cli.host).port(cli.port);
    if let Some(dir) = cli.projects_dir {
        builder.projects_dir(dir);
    }
    if let Some(cmd) = cli.worker_cmd {
        builder.worker_command(cmd);
    }
    if let Some(cmd) = cli.relay_cmd {
        builder.relay_command(cmd);
    }
    let config = builder.build()?;

    let daemon = Arc::new(SupervisorDaemon::new(config)?);

    if cli.sweep {
        let swept = daemon.sweep_strays();
        if swept > 0 {
            info!("Swept {swept} stray worker processes");
        }
    }

    let shutdown = daemon.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received; shutting down");
            shutdown.cancel();
        }
    });

    daemon.serve().await?;
    Ok(())
}
