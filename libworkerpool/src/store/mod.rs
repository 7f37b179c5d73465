use async_trait::async_trait;

use crate::error::Result;
use crate::models::DesiredState;

pub mod xline;

pub use xline::XlineStore;

/// Read side of the shared store: how many workers this host should run per queue.
#[async_trait]
pub trait DesiredStateSource: Send {
    async fn desired_state(&mut self) -> Result<DesiredState>;
}

/// Write side of the shared store: advertises this host's capacity to other hosts.
#[async_trait]
pub trait CapacityRegistry: Send {
    async fn register(&mut self, max_children: usize) -> Result<()>;

    async fn deregister(&mut self) -> Result<()>;
}

/// Key of the hash holding desired counts for `hostname`.
pub fn desired_state_key(namespace: &str, hostname: &str) -> String {
    format!("plugins:{namespace}:{hostname}")
}

/// Key of the hash mapping hostnames to their capacity.
pub fn hosts_key(namespace: &str) -> String {
    format!("plugins:{namespace}:hosts")
}

/// Hash fields live under `<hash>/<field>`.
pub fn field_key(hash: &str, field: &str) -> String {
    format!("{hash}/{field}")
}
