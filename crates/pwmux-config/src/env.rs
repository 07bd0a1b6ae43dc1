//! Environment variable parsing for the three configuration strata.
//!
//! Pool names are discovered by scanning for `PW_MCP_PROXY__<POOL>_*` and
//! `PW_MCP_PROXY__<POOL>__<ID>_*` patterns. A pool name runs up to the first
//! single underscore, so names themselves cannot contain underscores.

use std::collections::BTreeMap;

use regex::Regex;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::schema::{BlobConfig, BrowserConfig, FleetConfig, InstanceConfig, PoolConfig, PoolSettings};
use crate::validate::validate_pools;

/// Key/value view of the environment. `BTreeMap` keeps discovery order stable.
pub type EnvMap = BTreeMap<String, String>;

const PREFIX: &str = "PW_MCP_PROXY_";

/// Env suffixes that map onto [`BrowserConfig`] keys, valid at every stratum.
const CONFIG_KEYS: &[&str] = &[
    "BROWSER",
    "HEADLESS",
    "NO_SANDBOX",
    "DEVICE",
    "VIEWPORT_SIZE",
    "ISOLATED",
    "USER_DATA_DIR",
    "STORAGE_STATE",
    "ALLOWED_ORIGINS",
    "BLOCKED_ORIGINS",
    "PROXY_SERVER",
    "CAPS",
    "SAVE_SESSION",
    "SAVE_TRACE",
    "SAVE_VIDEO",
    "OUTPUT_DIR",
    "TIMEOUT_ACTION",
    "TIMEOUT_NAVIGATION",
    "IMAGE_RESPONSES",
    "USER_AGENT",
    "INIT_SCRIPT",
    "IGNORE_HTTPS_ERRORS",
    "ENABLE_STEALTH",
    "EXTENSION",
    "EXTENSION_TOKEN",
];

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

fn parse_u64(key: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("expected an integer, got '{raw}'"),
    })
}

/// Apply one `<suffix> = <raw>` override onto a config.
fn apply_key(
    config: &mut BrowserConfig,
    suffix: &str,
    key: &str,
    raw: &str,
) -> Result<(), ConfigError> {
    match suffix {
        "BROWSER" => config.browser = Some(raw.to_string()),
        "HEADLESS" => config.headless = Some(parse_bool(raw)),
        "NO_SANDBOX" => config.no_sandbox = Some(parse_bool(raw)),
        "DEVICE" => config.device = Some(raw.to_string()),
        "VIEWPORT_SIZE" => config.viewport_size = Some(raw.to_string()),
        "ISOLATED" => config.isolated = Some(parse_bool(raw)),
        "USER_DATA_DIR" => config.user_data_dir = Some(raw.to_string()),
        "STORAGE_STATE" => config.storage_state = Some(raw.to_string()),
        "ALLOWED_ORIGINS" => config.allowed_origins = Some(raw.to_string()),
        "BLOCKED_ORIGINS" => config.blocked_origins = Some(raw.to_string()),
        "PROXY_SERVER" => config.proxy_server = Some(raw.to_string()),
        "CAPS" => config.caps = Some(raw.to_string()),
        "SAVE_SESSION" => config.save_session = Some(parse_bool(raw)),
        "SAVE_TRACE" => config.save_trace = Some(parse_bool(raw)),
        "SAVE_VIDEO" => config.save_video = Some(raw.to_string()),
        "OUTPUT_DIR" => config.output_dir = Some(raw.to_string()),
        "TIMEOUT_ACTION" => config.timeout_action = Some(parse_u64(key, raw)?),
        "TIMEOUT_NAVIGATION" => config.timeout_navigation = Some(parse_u64(key, raw)?),
        "IMAGE_RESPONSES" => config.image_responses = Some(raw.to_string()),
        "USER_AGENT" => config.user_agent = Some(raw.to_string()),
        "INIT_SCRIPT" => config.init_script = Some(raw.to_string()),
        "IGNORE_HTTPS_ERRORS" => config.ignore_https_errors = Some(parse_bool(raw)),
        "ENABLE_STEALTH" => config.enable_stealth = Some(parse_bool(raw)),
        "EXTENSION" => config.extension = Some(parse_bool(raw)),
        "EXTENSION_TOKEN" => config.extension_token = Some(raw.to_string()),
        _ => {}
    }
    Ok(())
}

/// Apply every known config key found under `prefix` onto `config`.
fn apply_overrides(
    env: &EnvMap,
    config: &mut BrowserConfig,
    prefix: &str,
) -> Result<(), ConfigError> {
    for suffix in CONFIG_KEYS {
        let key = format!("{prefix}{suffix}");
        if let Some(raw) = env.get(&key) {
            apply_key(config, suffix, &key, raw)?;
        }
    }
    Ok(())
}

/// Reject stratum-restricted keys found at the wrong stratum.
fn check_restricted(env: &EnvMap) -> Result<(), ConfigError> {
    if env.contains_key("PW_MCP_PROXY_INSTANCES") {
        return Err(ConfigError::GlobalInstances);
    }
    for key in ["IS_DEFAULT", "DESCRIPTION", "ALIAS"] {
        let global = format!("{PREFIX}{key}");
        if env.contains_key(&global) {
            return Err(ConfigError::RestrictedKey {
                key: global,
                allowed: if key == "ALIAS" { "instance" } else { "pool" },
                found: "global",
            });
        }
    }

    let instance_pattern =
        Regex::new(r"^PW_MCP_PROXY__([A-Z0-9]+)__(\d+)_([A-Z0-9_]+)$").unwrap();
    for key in env.keys() {
        if let Some(caps) = instance_pattern.captures(key) {
            match &caps[3] {
                "INSTANCES" | "IS_DEFAULT" | "DESCRIPTION" => {
                    return Err(ConfigError::RestrictedKey {
                        key: key.clone(),
                        allowed: "pool",
                        found: "instance",
                    });
                }
                _ => {}
            }
        }
    }

    let pool_pattern = Regex::new(r"^PW_MCP_PROXY__([A-Z0-9]+)_ALIAS$").unwrap();
    for key in env.keys() {
        if pool_pattern.is_match(key) {
            return Err(ConfigError::RestrictedKey {
                key: key.clone(),
                allowed: "instance",
                found: "pool",
            });
        }
    }

    Ok(())
}

/// Discover pool names from the pool- and instance-level patterns.
fn discover_pools(env: &EnvMap) -> Vec<String> {
    let pool_pattern = Regex::new(r"^PW_MCP_PROXY__([A-Z0-9]+?)_([A-Z0-9_]+)$").unwrap();
    let instance_pattern = Regex::new(r"^PW_MCP_PROXY__([A-Z0-9]+?)__\d+_").unwrap();

    let mut pools: Vec<String> = Vec::new();
    for key in env.keys() {
        let name = if let Some(caps) = instance_pattern.captures(key) {
            Some(caps[1].to_string())
        } else {
            pool_pattern.captures(key).map(|caps| caps[1].to_string())
        };
        if let Some(name) = name {
            if !pools.contains(&name) {
                pools.push(name);
            }
        }
    }
    pools.sort();
    info!("discovered {} pool(s): {:?}", pools.len(), pools);
    pools
}

/// Highest instance id referenced by an override for `pool`, if any.
fn max_override_id(env: &EnvMap, pool: &str) -> Option<usize> {
    let pattern = Regex::new(&format!(r"^PW_MCP_PROXY__{pool}__(\d+)_")).unwrap();
    env.keys()
        .filter_map(|key| pattern.captures(key))
        .filter_map(|caps| caps[1].parse::<usize>().ok())
        .max()
}

fn parse_instance_config(
    env: &EnvMap,
    pool_name: &str,
    id: usize,
    pool_config: &BrowserConfig,
) -> Result<InstanceConfig, ConfigError> {
    let prefix = format!("PW_MCP_PROXY__{pool_name}__{id}_");
    let mut browser = pool_config.clone();
    apply_overrides(env, &mut browser, &prefix)?;
    browser.apply_stealth();

    let alias = env.get(&format!("{prefix}ALIAS")).cloned();

    Ok(InstanceConfig { id, alias, browser })
}

fn parse_pool_config(
    env: &EnvMap,
    pool_name: &str,
    global: &BrowserConfig,
    settings: &PoolSettings,
) -> Result<PoolConfig, ConfigError> {
    let prefix = format!("PW_MCP_PROXY__{pool_name}_");

    let mut pool_config = global.clone();
    apply_overrides(env, &mut pool_config, &prefix)?;

    let instances_key = format!("{prefix}INSTANCES");
    let instances = match env.get(&instances_key) {
        None => return Err(ConfigError::MissingInstances(pool_name.to_string())),
        Some(raw) => raw
            .parse::<usize>()
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| ConfigError::InvalidInstances {
                pool: pool_name.to_string(),
                value: raw.clone(),
            })?,
    };

    if let Some(max_id) = max_override_id(env, pool_name) {
        if max_id >= instances {
            return Err(ConfigError::InstanceOutOfRange {
                pool: pool_name.to_string(),
                id: max_id,
                instances,
            });
        }
    }

    let is_default = env
        .get(&format!("{prefix}IS_DEFAULT"))
        .map(|raw| parse_bool(raw))
        .unwrap_or(false);
    let description = env
        .get(&format!("{prefix}DESCRIPTION"))
        .cloned()
        .unwrap_or_default();

    let mut instance_configs = Vec::with_capacity(instances);
    for id in 0..instances {
        instance_configs.push(parse_instance_config(env, pool_name, id, &pool_config)?);
    }

    debug!(
        pool = pool_name,
        instances,
        is_default,
        browser = pool_config.browser.as_deref().unwrap_or("chromium"),
        "parsed pool configuration"
    );

    Ok(PoolConfig {
        name: pool_name.to_string(),
        description,
        is_default,
        instances,
        instance_configs,
        settings: settings.clone(),
    })
}

/// Load and validate the full fleet configuration from an environment map.
pub fn load_fleet_config(env: &EnvMap) -> Result<FleetConfig, ConfigError> {
    load_fleet_config_with_settings(env, &PoolSettings::default())
}

/// Same as [`load_fleet_config`] but with custom per-pool runtime settings.
pub fn load_fleet_config_with_settings(
    env: &EnvMap,
    settings: &PoolSettings,
) -> Result<FleetConfig, ConfigError> {
    check_restricted(env)?;

    let mut global = BrowserConfig::default();
    apply_overrides(env, &mut global, PREFIX)?;
    global.apply_defaults();

    let pool_names = discover_pools(env);
    if pool_names.is_empty() {
        return Err(ConfigError::NoPools);
    }

    let mut pools = Vec::with_capacity(pool_names.len());
    for name in &pool_names {
        pools.push(parse_pool_config(env, name, &global, settings)?);
    }

    validate_pools(&pools)?;

    let default_pool = pools
        .iter()
        .find(|p| p.is_default)
        .map(|p| p.name.clone())
        .ok_or(ConfigError::NoDefaultPool)?;

    info!(
        pools = pools.len(),
        instances = pools.iter().map(|p| p.instances).sum::<usize>(),
        default = %default_pool,
        "fleet configuration loaded"
    );

    Ok(FleetConfig {
        pools,
        default_pool,
        global,
    })
}

/// Load blob storage configuration from the `BLOB_*` family.
pub fn load_blob_config(env: &EnvMap) -> Result<BlobConfig, ConfigError> {
    let mut config = BlobConfig::default();
    if let Some(raw) = env.get("BLOB_STORAGE_ROOT") {
        config.storage_root = raw.into();
    }
    if let Some(raw) = env.get("BLOB_MAX_SIZE_MB") {
        config.max_size_mb = parse_u64("BLOB_MAX_SIZE_MB", raw)?;
    }
    if let Some(raw) = env.get("BLOB_TTL_HOURS") {
        config.ttl_hours = parse_u64("BLOB_TTL_HOURS", raw)?;
    }
    if let Some(raw) = env.get("BLOB_SIZE_THRESHOLD_KB") {
        config.size_threshold_kb = parse_u64("BLOB_SIZE_THRESHOLD_KB", raw)?;
    }
    if let Some(raw) = env.get("BLOB_CLEANUP_INTERVAL_MINUTES") {
        config.cleanup_interval_minutes = parse_u64("BLOB_CLEANUP_INTERVAL_MINUTES", raw)?;
    }
    Ok(config)
}

/// Snapshot of the process environment as an [`EnvMap`].
pub fn process_env() -> EnvMap {
    std::env::vars().collect()
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
