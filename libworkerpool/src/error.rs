use thiserror::Error;

use crate::models::QueueName;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("store access failed: {0}")]
    Store(#[from] etcd_client::Error),

    #[error("failed to spawn worker for queue {queue}: {source}")]
    Spawn {
        queue: QueueName,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to signal worker {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: nix::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("control request queue is closed")]
    ControlQueueClosed,

    #[error(transparent)]
    AnyhowError(#[from] anyhow::Error),
}

pub type Result<T, E = PoolError> = std::result::Result<T, E>;
