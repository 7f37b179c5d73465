#![allow(dead_code)]
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use nix::errno::Errno;
use libworkerpool::error::Result;
use libworkerpool::{
    CapacityRegistry, DesiredState, DesiredStateSource, Liveness, PoolError, ProcessHandle,
    ProcessLauncher, QueueName, StopMode, Supervisor, SupervisorConfig,
};

pub const HOST: &str = "web1";

struct FakeProcesses {
    next_pid: u32,
    alive: BTreeMap<ProcessHandle, QueueName>,
    spawned: Vec<QueueName>,
    signals: Vec<(ProcessHandle, StopMode)>,
    failing: HashSet<QueueName>,
    exit_on_signal: bool,
    refuse_signals: bool,
}

/// Launcher that only pretends to run processes. Clones share state,
/// so a test can keep one and hand the other to the supervisor.
#[derive(Clone)]
pub struct FakeLauncher {
    inner: Arc<Mutex<FakeProcesses>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeProcesses {
                next_pid: 100,
                alive: BTreeMap::new(),
                spawned: Vec::new(),
                signals: Vec::new(),
                failing: HashSet::new(),
                exit_on_signal: true,
                refuse_signals: false,
            })),
        }
    }

    /// Simulate a worker dying on its own.
    pub fn crash(&self, handle: ProcessHandle) {
        self.inner.lock().unwrap().alive.remove(&handle);
    }

    pub fn alive(&self) -> Vec<ProcessHandle> {
        self.inner.lock().unwrap().alive.keys().copied().collect()
    }

    pub fn alive_queues(&self) -> Vec<QueueName> {
        let mut queues: Vec<_> = self.inner.lock().unwrap().alive.values().cloned().collect();
        queues.sort();
        queues
    }

    pub fn spawned(&self) -> Vec<QueueName> {
        self.inner.lock().unwrap().spawned.clone()
    }

    pub fn signals(&self) -> Vec<(ProcessHandle, StopMode)> {
        self.inner.lock().unwrap().signals.clone()
    }

    pub fn fail_queue(&self, queue: &str) {
        self.inner.lock().unwrap().failing.insert(queue.to_string());
    }

    pub fn heal_queue(&self, queue: &str) {
        self.inner.lock().unwrap().failing.remove(queue);
    }

    /// When true, every signal fails as if the worker belonged to another user.
    pub fn set_refuse_signals(&self, refuse: bool) {
        self.inner.lock().unwrap().refuse_signals = refuse;
    }

    /// When false, signalled workers keep running until [`FakeLauncher::crash`].
    pub fn set_exit_on_signal(&self, exit: bool) {
        self.inner.lock().unwrap().exit_on_signal = exit;
    }
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    fn spawn(&mut self, queue: &QueueName) -> Result<ProcessHandle> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing.contains(queue) {
            return Err(PoolError::Spawn {
                queue: queue.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such task runner"),
            });
        }
        let handle = ProcessHandle(inner.next_pid);
        inner.next_pid += 1;
        inner.alive.insert(handle, queue.clone());
        inner.spawned.push(queue.clone());
        Ok(handle)
    }

    fn signal(&mut self, handle: ProcessHandle, mode: StopMode) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.refuse_signals {
            return Err(PoolError::Signal {
                pid: handle.0,
                source: Errno::EPERM,
            });
        }
        inner.signals.push((handle, mode));
        if inner.exit_on_signal {
            inner.alive.remove(&handle);
        }
        Ok(())
    }

    async fn poll(&mut self, handle: ProcessHandle, _wait: Duration) -> Liveness {
        if self.inner.lock().unwrap().alive.contains_key(&handle) {
            Liveness::StillRunning
        } else {
            Liveness::Exited(Some(0))
        }
    }

    async fn wait(&mut self, handle: ProcessHandle) {
        self.inner.lock().unwrap().alive.remove(&handle);
    }
}

#[derive(Default)]
struct StoreData {
    desired: DesiredState,
    hosts: BTreeMap<String, usize>,
    failing: bool,
    reads: usize,
}

/// In-memory stand-in for the shared store, scoped to [`HOST`].
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreData>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_desired(&self, entries: &[(&str, usize)]) {
        self.inner.lock().unwrap().desired = desired(entries);
    }

    pub fn set_failing(&self, failing: bool) {
        self.inner.lock().unwrap().failing = failing;
    }

    pub fn capacity(&self, host: &str) -> Option<usize> {
        self.inner.lock().unwrap().hosts.get(host).copied()
    }

    pub fn reads(&self) -> usize {
        self.inner.lock().unwrap().reads
    }
}

#[async_trait]
impl DesiredStateSource for MemoryStore {
    async fn desired_state(&mut self) -> Result<DesiredState> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing {
            return Err(anyhow!("store unavailable").into());
        }
        inner.reads += 1;
        Ok(inner.desired.clone())
    }
}

#[async_trait]
impl CapacityRegistry for MemoryStore {
    async fn register(&mut self, max_children: usize) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing {
            return Err(anyhow!("store unavailable").into());
        }
        inner.hosts.insert(HOST.to_string(), max_children);
        Ok(())
    }

    async fn deregister(&mut self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing {
            return Err(anyhow!("store unavailable").into());
        }
        inner.hosts.remove(HOST);
        Ok(())
    }
}

pub fn desired(entries: &[(&str, usize)]) -> DesiredState {
    entries.iter().map(|(q, n)| (q.to_string(), *n)).collect()
}

pub const INTERVAL: Duration = Duration::from_millis(100);
pub const RECONCILE_EVERY: Duration = Duration::from_secs(20);

pub fn make_supervisor(
    max_children: usize,
    launcher: &FakeLauncher,
    store: &MemoryStore,
) -> Supervisor<FakeLauncher, MemoryStore> {
    let config = SupervisorConfig {
        max_children,
        interval: INTERVAL,
        reconcile_ticks: 200,
    };
    Supervisor::new(config, launcher.clone(), store.clone()).unwrap()
}

pub fn queues_of(supervisor: &Supervisor<FakeLauncher, MemoryStore>) -> Vec<QueueName> {
    let mut queues: Vec<_> = supervisor.workers().iter().map(|w| w.queue.clone()).collect();
    queues.sort();
    queues
}
