//! Pool and child supervision errors.

use thiserror::Error;

/// Errors surfaced by a single child supervisor.
#[derive(Debug, Error)]
pub enum ChildError {
    /// The child failed to start or complete the initialize handshake.
    #[error("Child startup failed: {0}")]
    Startup(String),

    /// The child did not reply within the per-call deadline. The child
    /// itself remains usable; the late reply will be discarded.
    #[error("Call to '{method}' timed out after {after_ms}ms")]
    Timeout { method: String, after_ms: u64 },

    /// The child exited or closed stdout mid-call. The child is failed and
    /// will never be leased again.
    #[error("Child process gone")]
    ChildGone,

    /// The child returned a JSON-RPC error object. The child remains usable.
    #[error("Remote error {code}: {message}")]
    Remote { code: i64, message: String },

    /// The call was cancelled (supervisor shutdown).
    #[error("Call cancelled")]
    Cancelled,

    /// IO error on the child's stdio.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Outbound frame serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced by pools and the registry.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Unknown pool name or instance key, or the targeted child is failed.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An alias given without a pool matched instances in multiple pools.
    #[error("Alias '{0}' is ambiguous across pools; specify browser_pool")]
    AmbiguousAlias(String),

    /// A lease was requested after shutdown was initiated.
    #[error("Pool is shutting down")]
    ShuttingDown,

    /// The configured lease-wait ceiling elapsed with no idle child.
    #[error("Pool exhausted: no instance became available within {waited_ms}ms")]
    Exhausted { waited_ms: u64 },
}
