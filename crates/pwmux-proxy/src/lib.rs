//! # pwmux Proxy
//!
//! The dispatch layer in front of the pool registry: every inbound tool call
//! is resolved to a pool, leased onto exactly one child, forwarded over
//! JSON-RPC, and its result post-processed — oversize binary payloads are
//! swapped for `blob://` references, and paginated ARIA snapshots are cached
//! by fingerprint for page-wise retrieval without re-invoking the child.
//!
//! The JMESPath/ARIA query engine stays external; [`SnapshotPostprocessor`]
//! is the seam a host implements to plug one in.

pub mod aria;
pub mod dispatcher;
pub mod error;
pub mod intercept;
pub mod snapshot;

pub use aria::{
    extract_snapshot_text, OutputFormat, PassthroughPostprocessor, SnapshotPostprocessor,
};
pub use dispatcher::{ToolDispatcher, ToolInvocation};
pub use error::ProxyError;
pub use intercept::BinaryInterceptor;
pub use snapshot::{fingerprint, SnapshotCache, SnapshotEntry, SnapshotPage};
