//! Configuration errors.

use thiserror::Error;

/// Configuration error types. All of these are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `PW_MCP_PROXY_INSTANCES` set at the global stratum.
    #[error(
        "PW_MCP_PROXY_INSTANCES is not allowed; each pool must define \
         INSTANCES explicitly: PW_MCP_PROXY__<POOL>_INSTANCES"
    )]
    GlobalInstances,

    /// A stratum-restricted key appeared at the wrong stratum.
    #[error("{key} is a {allowed}-only setting (found at the {found} stratum)")]
    RestrictedKey {
        key: String,
        allowed: &'static str,
        found: &'static str,
    },

    /// No pools were defined at all.
    #[error("no pools defined; define at least one: PW_MCP_PROXY__<POOL>_INSTANCES=N")]
    NoPools,

    /// A discovered pool has no INSTANCES setting.
    #[error("pool '{0}' missing required INSTANCES configuration")]
    MissingInstances(String),

    /// INSTANCES was present but not a positive integer.
    #[error("pool '{pool}': INSTANCES must be a positive integer, got '{value}'")]
    InvalidInstances { pool: String, value: String },

    /// An instance override references an id outside `[0, instances)`.
    #[error("pool '{pool}': instance override for id {id} out of range (instances={instances})")]
    InstanceOutOfRange {
        pool: String,
        id: usize,
        instances: usize,
    },

    /// No pool has IS_DEFAULT=true.
    #[error("no default pool defined; set IS_DEFAULT=true for exactly one pool")]
    NoDefaultPool,

    /// More than one pool has IS_DEFAULT=true.
    #[error("multiple default pools defined: {0}; only one pool can have IS_DEFAULT=true")]
    MultipleDefaultPools(String),

    /// Two instances within a pool share an alias.
    #[error("pool '{pool}': duplicate alias '{alias}' (aliases must be unique within a pool)")]
    DuplicateAlias { pool: String, alias: String },

    /// An alias is all digits, which is reserved for numeric instance ids.
    #[error("pool '{pool}' instance {id}: alias '{alias}' is numeric (reserved for instance ids)")]
    NumericAlias {
        pool: String,
        id: usize,
        alias: String,
    },

    /// A value failed to parse.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}
