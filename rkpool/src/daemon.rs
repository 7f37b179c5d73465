use anyhow::{Context, Result};
use daemonize::Daemonize;
use libworkerpool::{CommandLauncher, Supervisor, XlineStore};
use std::fs::File;
use std::path::Path;
use tracing::info;

use crate::config::Config;
use crate::signals;

/// Detach from the terminal. Must run before the tokio runtime is started.
pub fn detach(stdout: Option<&Path>, stderr: Option<&Path>) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current dir")?;
    let mut daemonize = Daemonize::new().working_directory(cwd);
    if let Some(path) = stdout {
        let out = File::create(path)
            .with_context(|| format!("Failed to open stdout log {}", path.display()))?;
        daemonize = daemonize.stdout(out);
    }
    if let Some(path) = stderr {
        let err = File::create(path)
            .with_context(|| format!("Failed to open stderr log {}", path.display()))?;
        daemonize = daemonize.stderr(err);
    }
    daemonize.start().context("Failed to daemonize")?;
    Ok(())
}

/// Build the supervisor from `config` and run it until a shutdown signal.
#[tokio::main]
pub async fn run(config: Config) -> Result<()> {
    let hostname = config.hostname();
    let store = XlineStore::new(
        config.xline_config.endpoints.clone(),
        &config.namespace,
        &hostname,
    );
    let launcher = CommandLauncher::new(config.worker_command());
    let supervisor = Supervisor::new(config.supervisor_config()?, launcher, store)?;
    signals::install(config.signal_table()?, supervisor.control_handle())?;

    info!(
        "rkpool {} on {hostname}, namespace {}, xline {:?}",
        env!("CARGO_PKG_VERSION"),
        config.namespace,
        config.xline_config.endpoints
    );
    supervisor.run().await;
    Ok(())
}
