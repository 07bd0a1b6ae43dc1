//! # pwmux Pool
//!
//! Supervision and leasing of `playwright-mcp` child processes.
//!
//! A [`PoolRegistry`] owns named [`Pool`]s; each pool owns N
//! [`ChildSupervisor`]s and one [`LeaseQueue`]. Tool calls lease exactly one
//! child (FIFO among "any" waiters, or targeted by id/alias), speak
//! newline-delimited JSON-RPC 2.0 over the child's stdio with strict
//! request/response correlation, and release the child on every exit path
//! through the RAII [`Lease`] guard.
//!
//! Health probes run on a timer per pool and ping children directly over the
//! same stdio, bypassing the lease queue, so busy children are still
//! observed.

pub mod child;
pub mod command;
#[cfg(test)]
pub(crate) mod testutil;
pub mod error;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod rpc;

pub use child::{ChildState, ChildSupervisor, ChildTimeouts, LeaseInfo, ProgressNotification};
pub use command::LaunchSpec;
pub use error::{ChildError, PoolError};
pub use pool::{InstanceStatus, Lease, Pool, PoolStatus};
pub use queue::LeaseQueue;
pub use registry::{FleetStatus, InstanceKey, LeaseHint, PoolRegistry, StatusSummary};
