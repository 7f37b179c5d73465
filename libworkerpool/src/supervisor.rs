use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc::Receiver;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::control::{ControlHandle, ControlRequest, control_channel, transition};
use crate::error::{PoolError, Result};
use crate::launcher::{ProcessLauncher, StopMode};
use crate::models::{ProcessHandle, QueueName, SupervisorState, TrackedWorker, TrackedWorkers};
use crate::reconcile::diff;
use crate::store::{CapacityRegistry, DesiredStateSource};

pub const DEFAULT_MAX_CHILDREN: usize = 5;
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);
/// 20 seconds at the default interval.
pub const DEFAULT_RECONCILE_TICKS: u32 = 200;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Upper bound on tracked workers.
    pub max_children: usize,
    /// Time between two ticks.
    pub interval: Duration,
    /// Reconcile against the store once every this many ticks.
    pub reconcile_ticks: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_children: DEFAULT_MAX_CHILDREN,
            interval: DEFAULT_INTERVAL,
            reconcile_ticks: DEFAULT_RECONCILE_TICKS,
        }
    }
}

impl SupervisorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_children == 0 {
            return Err(PoolError::InvalidConfig(
                "max_children must be positive".to_string(),
            ));
        }
        if self.interval.is_zero() {
            return Err(PoolError::InvalidConfig(
                "interval must be positive".to_string(),
            ));
        }
        if self.reconcile_ticks == 0 {
            return Err(PoolError::InvalidConfig(
                "reconcile_ticks must be positive".to_string(),
            ));
        }
        if Instant::now().checked_add(self.reconcile_interval()).is_none() {
            return Err(PoolError::InvalidConfig(format!(
                "reconcile interval {:?} is too large",
                self.reconcile_interval()
            )));
        }
        Ok(())
    }

    pub fn reconcile_interval(&self) -> Duration {
        self.interval.saturating_mul(self.reconcile_ticks)
    }

    /// How long a single liveness check may block.
    pub fn poll_timeout(&self) -> Duration {
        self.interval / 100
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Stop,
}

/// Delays spawning after consecutive spawn failures.
#[derive(Debug, Default)]
struct SpawnBackoff {
    failures: u32,
    retry_at: Option<Instant>,
}

impl SpawnBackoff {
    fn ready(&self, now: Instant) -> bool {
        self.retry_at.is_none_or(|at| now >= at)
    }

    /// Record a failure and return the delay before the next attempt.
    fn fail(&mut self, now: Instant, base: Duration, cap: Duration) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let factor = 2_u32.saturating_pow(self.failures - 1);
        let delay = base.saturating_mul(factor).min(cap);
        // unrepresentable deadline, keep the previous one
        self.retry_at = now.checked_add(delay).or(self.retry_at);
        delay
    }

    fn reset(&mut self) {
        self.failures = 0;
        self.retry_at = None;
    }
}

/// Keeps the workers on this host in line with desired state.
///
/// All mutable state lives here and is only touched from [`Supervisor::tick`].
/// Other tasks talk to a running supervisor through a [`ControlHandle`].
///
/// # Example
/// ```ignore
/// let mut supervisor = Supervisor::new(config, CommandLauncher::new(cmd), store)?;
/// let control = supervisor.control_handle();
/// tokio::spawn(forward_signals(control));
/// supervisor.run().await;
/// ```
pub struct Supervisor<L, S> {
    config: SupervisorConfig,
    launcher: L,
    store: S,
    state: SupervisorState,
    workers: TrackedWorkers,
    need_queue: VecDeque<QueueName>,
    dead_queue: VecDeque<QueueName>,
    requests: Receiver<ControlRequest>,
    control: ControlHandle,
    last_reconcile: Option<Instant>,
    backoff: SpawnBackoff,
    status: String,
}

impl<L, S> Supervisor<L, S>
where
    L: ProcessLauncher,
    S: DesiredStateSource + CapacityRegistry,
{
    pub fn new(config: SupervisorConfig, launcher: L, store: S) -> Result<Self> {
        config.validate()?;
        let (control, requests) = control_channel();
        Ok(Self {
            config,
            launcher,
            store,
            state: SupervisorState::Running,
            workers: TrackedWorkers::new(),
            need_queue: VecDeque::new(),
            dead_queue: VecDeque::new(),
            requests,
            control,
            last_reconcile: None,
            backoff: SpawnBackoff::default(),
            status: String::new(),
        })
    }

    pub fn control_handle(&self) -> ControlHandle {
        self.control.clone()
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn workers(&self) -> &TrackedWorkers {
        &self.workers
    }

    pub fn need_queue(&self) -> &VecDeque<QueueName> {
        &self.need_queue
    }

    pub fn dead_queue(&self) -> &VecDeque<QueueName> {
        &self.dead_queue
    }

    /// Advertise this host's capacity. A store failure is logged, not fatal.
    pub async fn start(&mut self) {
        info!(
            "starting with max_children={}, interval={:?}",
            self.config.max_children, self.config.interval
        );
        if let Err(e) = self.store.register(self.config.max_children).await {
            warn!("failed to register capacity: {e}");
        }
        self.refresh_status();
    }

    /// Register, then tick until shut down.
    pub async fn run(mut self) {
        self.start().await;
        let mut timer = interval(self.config.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let now = timer.tick().await;
            if self.tick(now).await == TickOutcome::Stop {
                break;
            }
        }
        info!("supervisor stopped");
    }

    /// One iteration of the supervision loop.
    ///
    /// Order within a tick: control requests, reconciliation, spawning, then
    /// liveness polling. Workers spawned in this tick are not polled until the next.
    pub async fn tick(&mut self, now: Instant) -> TickOutcome {
        self.apply_requests().await;
        if self.state == SupervisorState::ShuttingDown {
            return TickOutcome::Stop;
        }

        let mut spawned = Vec::new();
        if self.state == SupervisorState::Running {
            if self.reconcile_due(now) {
                self.reconcile(now).await;
            }
            spawned = self.fill(now);
        }

        self.poll_workers(&spawned).await;
        self.refresh_status();
        TickOutcome::Continue
    }

    async fn apply_requests(&mut self) {
        while let Ok(request) = self.requests.try_recv() {
            if self.state == SupervisorState::ShuttingDown {
                debug!("ignoring {request:?} while shutting down");
                continue;
            }
            info!("received control request {request:?}");
            let next = transition(self.state, request);
            if next.next == SupervisorState::ShuttingDown {
                self.shutdown().await;
                continue;
            }
            if next.purge {
                self.purge().await;
            }
            self.state = next.next;
        }
    }

    fn reconcile_due(&self, now: Instant) -> bool {
        let every = self.config.reconcile_interval();
        self.last_reconcile
            .is_none_or(|last| now.saturating_duration_since(last) >= every)
    }

    /// Diff desired state against running workers and apply it.
    /// A store failure skips this round; the next window retries.
    pub async fn reconcile(&mut self, now: Instant) {
        self.last_reconcile = Some(now);
        let desired = match self.store.desired_state().await {
            Ok(desired) => desired,
            Err(e) => {
                warn!("failed to read desired state, skipping reconciliation: {e}");
                return;
            }
        };

        let plan = diff(&desired, &self.workers.running(), self.config.max_children);
        if !plan.is_empty() {
            info!("reconciling: start {:?}, stop {:?}", plan.to_start, plan.to_kill);
        }
        // Pending respawns already stand for a missing worker. Keep the ones
        // still wanted and let them take the matching fresh starts.
        let mut to_start = plan.to_start;
        self.dead_queue
            .retain(|queue| match to_start.iter().position(|q| q == queue) {
                Some(idx) => {
                    to_start.remove(idx);
                    true
                }
                None => {
                    debug!("dropping respawn of queue {queue}, no longer desired");
                    false
                }
            });
        self.need_queue = to_start.into();
        for handle in plan.to_kill {
            if let Err(e) = self.kill(handle, StopMode::Graceful) {
                error!("failed to stop worker {handle}: {e}");
            }
        }
    }

    /// Ask a worker to stop. It stays tracked until a liveness poll sees it gone,
    /// and its queue is not respawned. A worker that could not be signalled
    /// keeps running as before and is picked again by the next reconciliation.
    pub fn kill(&mut self, handle: ProcessHandle, mode: StopMode) -> Result<()> {
        if self.workers.get(handle).is_none() {
            debug!("worker {handle} is not tracked, nothing to stop");
            return Ok(());
        }
        self.launcher.signal(handle, mode)?;
        self.workers.mark_draining(handle);
        Ok(())
    }

    fn next_queue(&mut self) -> Option<QueueName> {
        self.dead_queue
            .pop_front()
            .or_else(|| self.need_queue.pop_front())
    }

    /// Spawn workers while capacity allows, dead queues first.
    fn fill(&mut self, now: Instant) -> Vec<ProcessHandle> {
        let mut spawned = Vec::new();
        while self.workers.len() < self.config.max_children && self.backoff.ready(now) {
            let Some(queue) = self.next_queue() else {
                break;
            };
            match self.launcher.spawn(&queue) {
                Ok(handle) => {
                    info!("started worker {handle} for queue {queue}");
                    self.workers.insert(handle, queue);
                    self.backoff.reset();
                    spawned.push(handle);
                }
                Err(e) => {
                    error!("{e}");
                    self.dead_queue.push_front(queue);
                    let delay = self.backoff.fail(
                        now,
                        self.config.interval,
                        self.config.reconcile_interval(),
                    );
                    warn!("spawning paused for {delay:?}");
                    break;
                }
            }
        }
        spawned
    }

    async fn poll_workers(&mut self, skip: &[ProcessHandle]) {
        let wait = self.config.poll_timeout();
        for handle in self.workers.handles() {
            if skip.contains(&handle) {
                continue;
            }
            let liveness = self.launcher.poll(handle, wait).await;
            if !liveness.is_gone() {
                continue;
            }
            let Some(worker) = self.workers.remove(handle) else {
                continue;
            };
            if worker.draining {
                info!("worker {handle} for queue {} stopped", worker.queue);
            } else {
                warn!(
                    "worker {handle} for queue {} died ({liveness:?}), queued for respawn",
                    worker.queue
                );
                self.dead_queue.push_front(worker.queue);
            }
        }
    }

    /// Gracefully stop every tracked worker and wait for all of them.
    async fn stop_all(&mut self) -> Vec<TrackedWorker> {
        let handles = self.workers.handles();
        for handle in &handles {
            if let Err(e) = self.launcher.signal(*handle, StopMode::Graceful) {
                error!("failed to stop worker {handle}: {e}");
            }
        }
        let mut stopped = Vec::with_capacity(handles.len());
        for handle in handles {
            self.launcher.wait(handle).await;
            if let Some(worker) = self.workers.remove(handle) {
                stopped.push(worker);
            }
        }
        stopped
    }

    /// Stop every worker; the ones not already draining are queued for respawn.
    async fn purge(&mut self) {
        info!("purging {} workers", self.workers.len());
        for worker in self.stop_all().await {
            if !worker.draining {
                self.dead_queue.push_front(worker.queue);
            }
        }
        self.refresh_status();
    }

    /// Stop every worker, wait for them and deregister this host.
    pub async fn shutdown(&mut self) {
        if self.state == SupervisorState::ShuttingDown {
            return;
        }
        info!("shutting down, stopping {} workers", self.workers.len());
        self.state = SupervisorState::ShuttingDown;
        self.need_queue.clear();
        self.dead_queue.clear();
        self.stop_all().await;
        if let Err(e) = self.store.deregister().await {
            warn!("failed to deregister capacity: {e}");
        }
        self.refresh_status();
    }

    /// Human readable summary of the tracked workers.
    pub fn status_line(&self) -> String {
        let workers: Vec<_> = self
            .workers
            .iter()
            .map(|w| format!("{} ({})", w.handle, w.queue))
            .collect();
        let state = match self.state {
            SupervisorState::Running => "",
            SupervisorState::Paused => " (paused)",
            SupervisorState::ShuttingDown => " (shutting down)",
        };
        format!("rkpool{state}: managing [{}]", workers.join(", "))
    }

    fn refresh_status(&mut self) {
        let status = self.status_line();
        if status != self.status {
            info!("{status}");
            self.status = status;
        }
    }
}
