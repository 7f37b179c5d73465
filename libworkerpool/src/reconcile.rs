use std::collections::HashMap;
use std::iter;

use tracing::warn;

use crate::models::{DesiredState, ProcessHandle, QueueName};

/// Result of comparing desired state against the running workers.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Queues that need a fresh worker, in goal order.
    pub to_start: Vec<QueueName>,
    /// Workers running in excess of desired state, oldest first.
    pub to_kill: Vec<ProcessHandle>,
    /// Applying the diff would exceed `max_children`.
    pub over_capacity: bool,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.to_start.is_empty() && self.to_kill.is_empty()
    }
}

/// Compute which queues must be started and which workers must be killed.
///
/// `running` must be ordered oldest-spawned first: when a queue has more
/// workers than desired, the oldest ones are selected for killing.
/// `desired` iterates in queue-name order, so `to_start` is deterministic.
/// Each queue contributes at most `max_children` entries to `to_start`,
/// whatever count the store holds.
pub fn diff(
    desired: &DesiredState,
    running: &[(ProcessHandle, QueueName)],
    max_children: usize,
) -> Reconciliation {
    let mut checklist: HashMap<&str, usize> = HashMap::new();
    for (_, queue) in running {
        *checklist.entry(queue.as_str()).or_insert(0) += 1;
    }

    // A queue never needs more fresh starts than the host can run at once.
    let mut to_start = Vec::new();
    let mut missing_total: usize = 0;
    for (queue, &count) in desired {
        let have = checklist.get_mut(queue.as_str()).map_or(0, |left| {
            let used = (*left).min(count);
            *left -= used;
            used
        });
        let missing = count - have;
        missing_total = missing_total.saturating_add(missing);
        if missing > max_children {
            warn!("queue {queue} is short {missing} workers, starting at most {max_children}");
        }
        to_start.extend(iter::repeat_n(queue.clone(), missing.min(max_children)));
    }

    let mut to_kill = Vec::new();
    for (handle, queue) in running {
        if let Some(left) = checklist.get_mut(queue.as_str()) {
            if *left > 0 {
                *left -= 1;
                to_kill.push(*handle);
            }
        }
    }

    let projected = (running.len() - to_kill.len()).saturating_add(missing_total);
    let over_capacity = projected > max_children;
    if over_capacity {
        warn!(
            "desired workers ({projected}) exceed max children ({max_children}), excess starts are deferred"
        );
    }

    Reconciliation {
        to_start,
        to_kill,
        over_capacity,
    }
}
