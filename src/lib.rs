//! # pwmux
//!
//! Pooling multiplexer for Microsoft's `playwright-mcp` browser-automation
//! server. pwmux sits between an MCP client and a fleet of long-lived
//! `playwright-mcp` child processes, each driving a browser:
//!
//! - children are organized into named **pools** and spawned eagerly at
//!   startup, supervised over newline-delimited JSON-RPC on their stdio;
//! - every tool call **leases** exactly one child (FIFO, or targeted by
//!   id/alias) and releases it on every exit path;
//! - oversize binary payloads (screenshots, PDFs) are swapped for
//!   content-addressed `blob://` references backed by a TTL-bounded on-disk
//!   store;
//! - paginated ARIA snapshots are cached by fingerprint so later pages are
//!   served without re-invoking the child;
//! - health probes ping children directly on a timer, bypassing the lease
//!   queue, and fail unresponsive instances out of the fleet.
//!
//! [`ProxyRuntime`] wires the pieces together with an explicit
//! init/teardown lifecycle:
//!
//! ```no_run
//! use pwmux::ProxyRuntime;
//!
//! # async fn run() -> Result<(), pwmux::RuntimeError> {
//! let runtime = ProxyRuntime::start_from_env().await?;
//! let dispatcher = runtime.dispatcher();
//! // ... hand `dispatcher` to the MCP server layer ...
//! runtime.shutdown(std::time::Duration::from_secs(5)).await;
//! # Ok(())
//! # }
//! ```

pub mod runtime;

pub use runtime::{ProxyRuntime, RuntimeError};

pub use pwmux_blob::{BlobRef, BlobStore, BlobStoreConfig};
pub use pwmux_config::{BlobConfig, BrowserConfig, FleetConfig, PoolSettings};
pub use pwmux_pool::{Pool, PoolRegistry};
pub use pwmux_proxy::{
    PassthroughPostprocessor, ProxyError, SnapshotPostprocessor, ToolDispatcher, ToolInvocation,
};
