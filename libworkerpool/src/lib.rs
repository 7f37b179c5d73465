//! Keeps the queue workers of one host in line with the desired state stored in Xline.
//!
//! - [`reconcile::diff`] compares desired counts with the running workers.
//! - [`supervisor::Supervisor`] owns the workers and runs the tick loop.
//! - [`control`] turns external requests into supervisor state changes.
//! - [`launcher`] and [`store`] are the seams to processes and the shared store.
pub mod control;
pub mod error;
pub mod launcher;
pub mod models;
pub mod reconcile;
pub mod store;
pub mod supervisor;

pub use control::{ControlHandle, ControlRequest};
pub use error::PoolError;
pub use launcher::{CommandLauncher, Liveness, ProcessLauncher, StopMode, WorkerCommand};
pub use models::{DesiredState, ProcessHandle, QueueName, SupervisorState, TrackedWorkers};
pub use store::{CapacityRegistry, DesiredStateSource, XlineStore};
pub use supervisor::{Supervisor, SupervisorConfig, TickOutcome};
