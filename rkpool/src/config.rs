use anyhow::{Context, Result, bail};
use libworkerpool::supervisor::{DEFAULT_MAX_CHILDREN, DEFAULT_RECONCILE_TICKS};
use libworkerpool::{ControlRequest, SupervisorConfig, WorkerCommand};
use nix::sys::signal::Signal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::logging::Verbosity;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of workers on this host.
    pub max_children: usize,
    /// Tick interval in seconds.
    pub interval: f64,
    pub reconcile_ticks: u32,
    /// Key namespace in the store, `plugins:<namespace>:...`.
    pub namespace: String,
    /// Defaults to the machine hostname.
    pub hostname: Option<String>,
    pub xline_config: XlineConfig,
    pub verbosity: Verbosity,
    pub task_file: Option<PathBuf>,
    pub pid_file: Option<PathBuf>,
    pub worker: WorkerConfig,
    /// Signal name to control request, e.g. `SIGHUP: purge_and_restart`.
    pub signals: BTreeMap<String, ControlRequest>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct XlineConfig {
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub program: String,
    pub args: Vec<String>,
    pub queue_env: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_children: DEFAULT_MAX_CHILDREN,
            interval: 0.1,
            reconcile_ticks: DEFAULT_RECONCILE_TICKS,
            namespace: "resque".to_string(),
            hostname: None,
            xline_config: XlineConfig::default(),
            verbosity: Verbosity::default(),
            task_file: None,
            pid_file: None,
            worker: WorkerConfig::default(),
            signals: default_signals(),
        }
    }
}

impl Default for XlineConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["127.0.0.1:2379".to_string()],
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let cmd = WorkerCommand::default();
        Self {
            program: cmd.program,
            args: cmd.args,
            queue_env: cmd.queue_env,
        }
    }
}

pub fn default_signals() -> BTreeMap<String, ControlRequest> {
    [
        ("SIGTERM", ControlRequest::Shutdown),
        ("SIGINT", ControlRequest::Shutdown),
        ("SIGQUIT", ControlRequest::Shutdown),
        ("SIGHUP", ControlRequest::PurgeAndRestart),
        ("SIGWINCH", ControlRequest::PurgeAndPause),
        ("SIGUSR2", ControlRequest::Pause),
        ("SIGCONT", ControlRequest::Resume),
    ]
    .into_iter()
    .map(|(name, req)| (name.to_string(), req))
    .collect()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let cfg: Config = serde_yaml::from_str(&content).context("Failed to parse YAML config")?;
    Ok(cfg)
}

impl Config {
    /// Reject values the supervisor cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.supervisor_config()?;
        self.signal_table()?;
        if self.xline_config.endpoints.is_empty() {
            bail!("At least one xline endpoint is required");
        }
        if self.worker.program.is_empty() {
            bail!("Worker program must not be empty");
        }
        Ok(())
    }

    pub fn supervisor_config(&self) -> Result<SupervisorConfig> {
        if !self.interval.is_finite() || self.interval <= 0.0 {
            bail!("Invalid interval ({}), must be a positive number of seconds", self.interval);
        }
        let interval = Duration::try_from_secs_f64(self.interval)
            .with_context(|| format!("Invalid interval ({})", self.interval))?;
        let cfg = SupervisorConfig {
            max_children: self.max_children,
            interval,
            reconcile_ticks: self.reconcile_ticks,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn worker_command(&self) -> WorkerCommand {
        WorkerCommand {
            program: self.worker.program.clone(),
            args: self.worker.args.clone(),
            queue_env: self.worker.queue_env.clone(),
            task_file: self.task_file.clone(),
        }
    }

    pub fn signal_table(&self) -> Result<Vec<(Signal, ControlRequest)>> {
        self.signals
            .iter()
            .map(|(name, req)| {
                let sig = Signal::from_str(name)
                    .with_context(|| format!("Unknown signal name {name}"))?;
                if matches!(sig, Signal::SIGKILL | Signal::SIGSTOP) {
                    bail!("{name} cannot be handled");
                }
                Ok((sig, *req))
            })
            .collect()
    }

    pub fn hostname(&self) -> String {
        match &self.hostname {
            Some(name) => name.clone(),
            None => gethostname::gethostname().to_string_lossy().into_owned(),
        }
    }
}
