use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use crate::config::{Config, load_config};
use crate::logging::Verbosity;

#[derive(Parser, Debug)]
#[command(
    name = "rkpool",
    version,
    about = "Keep the queue workers of this host in sync with desired state in Xline"
)]
pub struct Cli {
    /// YAML config file; flags override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum number of workers on this host
    #[arg(short = 'n', long)]
    pub max_children: Option<usize>,

    /// Tick interval in seconds
    #[arg(short, long)]
    pub interval: Option<f64>,

    /// Xline endpoints, comma separated
    #[arg(short, long, value_delimiter = ',')]
    pub endpoints: Option<Vec<String>>,

    #[arg(long)]
    pub namespace: Option<String>,

    /// Name this host is known by in the store
    #[arg(long)]
    pub hostname: Option<String>,

    #[arg(long, value_enum)]
    pub verbosity: Option<Verbosity>,

    /// Task definition file handed to every worker
    #[arg(short = 'f', long)]
    pub task_file: Option<PathBuf>,

    #[arg(short, long)]
    pub pid_file: Option<PathBuf>,

    /// Run in the background
    #[arg(short, long)]
    pub daemon: bool,

    /// Redirect stdout here when running as a daemon
    #[arg(long)]
    pub stdout: Option<PathBuf>,

    /// Redirect stderr here when running as a daemon
    #[arg(long)]
    pub stderr: Option<PathBuf>,
}

impl Cli {
    /// Read the config file if given, apply flag overrides and validate the result.
    pub fn load_config(&self) -> Result<Config> {
        let mut cfg = match &self.config {
            Some(path) => load_config(path)?,
            None => Config::default(),
        };
        if let Some(n) = self.max_children {
            cfg.max_children = n;
        }
        if let Some(interval) = self.interval {
            cfg.interval = interval;
        }
        if let Some(endpoints) = &self.endpoints {
            cfg.xline_config.endpoints = endpoints.clone();
        }
        if let Some(namespace) = &self.namespace {
            cfg.namespace = namespace.clone();
        }
        if let Some(hostname) = &self.hostname {
            cfg.hostname = Some(hostname.clone());
        }
        if let Some(verbosity) = self.verbosity {
            cfg.verbosity = verbosity;
        }
        if let Some(task_file) = &self.task_file {
            cfg.task_file = Some(task_file.clone());
        }
        if let Some(pid_file) = &self.pid_file {
            cfg.pid_file = Some(pid_file.clone());
        }
        cfg.validate()?;
        Ok(cfg)
    }
}
