use std::collections::BTreeMap;
use std::fmt;

/// Name of a queue a worker is bound to. No internal structure is assumed.
pub type QueueName = String;

/// Desired worker count per queue for this host, read fresh on every reconciliation.
pub type DesiredState = BTreeMap<QueueName, usize>;

/// Identifies a spawned worker process. On the native launcher this is the OS pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessHandle(pub u32);

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Running,
    /// Reconciliation and spawning are suspended, liveness polling is not.
    Paused,
    /// Terminal.
    ShuttingDown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedWorker {
    pub handle: ProcessHandle,
    pub queue: QueueName,
    /// Asked to stop by reconciliation; its exit must not trigger a respawn.
    pub draining: bool,
}

/// Child processes owned by the supervisor, kept in spawn order (oldest first).
#[derive(Debug, Default, Clone)]
pub struct TrackedWorkers {
    workers: Vec<TrackedWorker>,
}

impl TrackedWorkers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: ProcessHandle, queue: QueueName) {
        self.workers.push(TrackedWorker {
            handle,
            queue,
            draining: false,
        });
    }

    pub fn remove(&mut self, handle: ProcessHandle) -> Option<TrackedWorker> {
        let idx = self.workers.iter().position(|w| w.handle == handle)?;
        Some(self.workers.remove(idx))
    }

    pub fn get(&self, handle: ProcessHandle) -> Option<&TrackedWorker> {
        self.workers.iter().find(|w| w.handle == handle)
    }

    /// Mark a worker as draining. Returns false if the handle is not tracked.
    pub fn mark_draining(&mut self, handle: ProcessHandle) -> bool {
        match self.workers.iter_mut().find(|w| w.handle == handle) {
            Some(w) => {
                w.draining = true;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedWorker> {
        self.workers.iter()
    }

    pub fn handles(&self) -> Vec<ProcessHandle> {
        self.workers.iter().map(|w| w.handle).collect()
    }

    /// Workers that count as running toward desired state, oldest first.
    pub fn running(&self) -> Vec<(ProcessHandle, QueueName)> {
        self.workers
            .iter()
            .filter(|w| !w.draining)
            .map(|w| (w.handle, w.queue.clone()))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_running_skips_draining_and_keeps_spawn_order() {
        let mut workers = TrackedWorkers::new();
        workers.insert(ProcessHandle(30), "a".to_string());
        workers.insert(ProcessHandle(10), "b".to_string());
        workers.insert(ProcessHandle(20), "a".to_string());
        assert!(workers.mark_draining(ProcessHandle(10)));
        assert!(!workers.mark_draining(ProcessHandle(99)));

        assert_eq!(
            workers.running(),
            vec![
                (ProcessHandle(30), "a".to_string()),
                (ProcessHandle(20), "a".to_string())
            ]
        );
        assert_eq!(workers.len(), 3);

        let removed = workers.remove(ProcessHandle(10)).unwrap();
        assert!(removed.draining);
        assert!(workers.remove(ProcessHandle(10)).is_none());
        assert_eq!(workers.handles(), vec![ProcessHandle(30), ProcessHandle(20)]);
    }
}
