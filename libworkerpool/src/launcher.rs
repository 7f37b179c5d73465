use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{PoolError, Result};
use crate::models::{ProcessHandle, QueueName};

/// Outcome of a liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Exited(Option<i32>),
    StillRunning,
    /// The launcher no longer knows the process. Treated the same as `Exited`.
    NotFound,
}

impl Liveness {
    pub fn is_gone(&self) -> bool {
        !matches!(self, Liveness::StillRunning)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Let the worker finish its current job, then exit (SIGQUIT).
    Graceful,
    /// Stop right away (SIGTERM).
    Immediate,
}

impl StopMode {
    fn signal(self) -> Signal {
        match self {
            StopMode::Graceful => Signal::SIGQUIT,
            StopMode::Immediate => Signal::SIGTERM,
        }
    }
}

/// Starts, signals and watches worker processes.
///
/// The supervisor only talks to workers through this trait, so a fake
/// launcher can stand in for real processes.
#[async_trait]
pub trait ProcessLauncher: Send {
    /// Start a worker bound to `queue`.
    fn spawn(&mut self, queue: &QueueName) -> Result<ProcessHandle>;

    /// Ask a worker to stop. A worker that is already gone is not an error.
    fn signal(&mut self, handle: ProcessHandle, mode: StopMode) -> Result<()>;

    /// Check whether the worker is still alive, waiting at most `wait`.
    async fn poll(&mut self, handle: ProcessHandle, wait: Duration) -> Liveness;

    /// Block until the worker has exited.
    async fn wait(&mut self, handle: ProcessHandle);
}

/// How a worker process is invoked.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Environment variable carrying the queue name.
    pub queue_env: String,
    /// Optional task definition file, passed as `-f <file>`.
    pub task_file: Option<PathBuf>,
}

impl Default for WorkerCommand {
    fn default() -> Self {
        Self {
            program: "rake".to_string(),
            args: vec!["resque:work".to_string()],
            queue_env: "QUEUE".to_string(),
            task_file: None,
        }
    }
}

impl WorkerCommand {
    fn build(&self, queue: &QueueName) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(file) = &self.task_file {
            cmd.arg("-f").arg(file);
        }
        cmd.args(&self.args)
            .env(&self.queue_env, queue)
            .stdin(Stdio::null())
            .kill_on_drop(false);
        cmd
    }
}

/// Launches workers as native child processes.
pub struct CommandLauncher {
    command: WorkerCommand,
    children: HashMap<ProcessHandle, Child>,
}

impl CommandLauncher {
    pub fn new(command: WorkerCommand) -> Self {
        Self {
            command,
            children: HashMap::new(),
        }
    }
}

#[async_trait]
impl ProcessLauncher for CommandLauncher {
    fn spawn(&mut self, queue: &QueueName) -> Result<ProcessHandle> {
        let child = self
            .command
            .build(queue)
            .spawn()
            .map_err(|source| PoolError::Spawn {
                queue: queue.clone(),
                source,
            })?;
        let pid = child
            .id()
            .ok_or_else(|| anyhow!("worker for queue {queue} exited before it got a pid"))?;
        let handle = ProcessHandle(pid);
        debug!("spawned worker {handle} for queue {queue}");
        self.children.insert(handle, child);
        Ok(handle)
    }

    fn signal(&mut self, handle: ProcessHandle, mode: StopMode) -> Result<()> {
        match kill(Pid::from_raw(handle.0 as i32), mode.signal()) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(source) => Err(PoolError::Signal {
                pid: handle.0,
                source,
            }),
        }
    }

    async fn poll(&mut self, handle: ProcessHandle, wait: Duration) -> Liveness {
        let Some(child) = self.children.get_mut(&handle) else {
            return Liveness::NotFound;
        };
        match timeout(wait, child.wait()).await {
            Err(_) => Liveness::StillRunning,
            Ok(Ok(status)) => {
                self.children.remove(&handle);
                Liveness::Exited(status.code())
            }
            Ok(Err(e)) => {
                warn!("failed to check worker {handle}: {e}");
                self.children.remove(&handle);
                Liveness::NotFound
            }
        }
    }

    async fn wait(&mut self, handle: ProcessHandle) {
        if let Some(mut child) = self.children.remove(&handle) {
            if let Err(e) = child.wait().await {
                warn!("failed to wait for worker {handle}: {e}");
            }
        }
    }
}
