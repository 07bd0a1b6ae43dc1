//! # pwmux Config
//!
//! Hierarchical configuration for the pwmux browser fleet.
//!
//! Configuration is read from `PW_MCP_PROXY_*` environment variables in three
//! strata with Instance > Pool > Global precedence:
//!
//! ```text
//! PW_MCP_PROXY_<KEY>=<v>                  global
//! PW_MCP_PROXY__<POOL>_<KEY>=<v>          pool
//! PW_MCP_PROXY__<POOL>__<ID>_<KEY>=<v>    instance
//! ```
//!
//! Blob storage settings come from the `BLOB_*` family. The loader works over
//! any `key -> value` map, so tests never mutate the process environment.

pub mod env;
pub mod error;
pub mod schema;
pub mod validate;

pub use env::{
    load_blob_config, load_fleet_config, load_fleet_config_with_settings, process_env, EnvMap,
};
pub use error::ConfigError;
pub use schema::{
    BlobConfig, BrowserConfig, FleetConfig, InstanceConfig, PoolConfig, PoolSettings,
};
