//! Dispatcher-level errors, mapped onto the caller's tool response.

use serde_json::{json, Value};
use thiserror::Error;

use pwmux_blob::BlobError;
use pwmux_pool::{ChildError, PoolError};

/// Every failure a tool caller can observe.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Unknown pool, unknown instance key, or missing blob.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Alias without a pool matched instances in multiple pools.
    #[error("Alias '{0}' is ambiguous across pools; specify browser_pool")]
    AmbiguousAlias(String),

    /// Lease requested after shutdown was initiated.
    #[error("Proxy is shutting down")]
    ShuttingDown,

    /// The lease-wait ceiling elapsed with no idle instance.
    #[error("Pool exhausted: no instance became available within {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    /// The child did not reply within the call deadline; it remains usable.
    #[error("Call to '{method}' timed out after {after_ms}ms")]
    Timeout { method: String, after_ms: u64 },

    /// The child died mid-call and has been marked failed.
    #[error("Browser instance exited mid-call")]
    ChildGone,

    /// JSON-RPC error object from the child, passed through verbatim.
    #[error("Remote error {code}: {message}")]
    RemoteError { code: i64, message: String },

    /// An intercepted payload exceeds the per-blob cap; nothing was stored.
    #[error("Payload too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },

    /// The caller's cancellation fired; any lease was released.
    #[error("Call cancelled")]
    Cancelled,

    /// Malformed tool arguments.
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Anything that should not happen.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Stable tag for the user-visible failure shape.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::NotFound(_) => "not_found",
            ProxyError::AmbiguousAlias(_) => "ambiguous_alias",
            ProxyError::ShuttingDown => "shutting_down",
            ProxyError::PoolExhausted { .. } => "pool_exhausted",
            ProxyError::Timeout { .. } => "timeout",
            ProxyError::ChildGone => "child_gone",
            ProxyError::RemoteError { .. } => "remote_error",
            ProxyError::TooLarge { .. } => "too_large",
            ProxyError::Cancelled => "cancelled",
            ProxyError::InvalidParams(_) => "invalid_params",
            ProxyError::Internal(_) => "internal",
        }
    }

    /// The tool-level failure object: `{"error": {"kind", "message"}}`.
    pub fn to_value(&self) -> Value {
        json!({
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
            }
        })
    }
}

impl From<PoolError> for ProxyError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::NotFound(what) => ProxyError::NotFound(what),
            PoolError::AmbiguousAlias(alias) => ProxyError::AmbiguousAlias(alias),
            PoolError::ShuttingDown => ProxyError::ShuttingDown,
            PoolError::Exhausted { waited_ms } => ProxyError::PoolExhausted { waited_ms },
        }
    }
}

impl From<ChildError> for ProxyError {
    fn from(err: ChildError) -> Self {
        match err {
            ChildError::Timeout { method, after_ms } => ProxyError::Timeout { method, after_ms },
            ChildError::ChildGone => ProxyError::ChildGone,
            ChildError::Remote { code, message } => ProxyError::RemoteError { code, message },
            ChildError::Cancelled => ProxyError::Cancelled,
            other => ProxyError::Internal(other.to_string()),
        }
    }
}

impl From<BlobError> for ProxyError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::NotFound(id) => ProxyError::NotFound(format!("blob {id}")),
            BlobError::TooLarge { size, max } => ProxyError::TooLarge { size, max },
            other => ProxyError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
