//! Startup validation of the parsed pool set. All failures are fatal.

use std::collections::HashSet;

use regex::Regex;

use crate::error::ConfigError;
use crate::schema::PoolConfig;

/// Validate the invariants over the full pool set:
///
/// - exactly one pool has `is_default=true`
/// - every pool declares at least one instance
/// - aliases are unique within a pool (case-sensitive)
/// - no alias is all digits (reserved for numeric ids)
pub fn validate_pools(pools: &[PoolConfig]) -> Result<(), ConfigError> {
    let numeric = Regex::new(r"^\d+$").unwrap();

    for pool in pools {
        if pool.instances == 0 {
            return Err(ConfigError::InvalidInstances {
                pool: pool.name.clone(),
                value: "0".to_string(),
            });
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for instance in &pool.instance_configs {
            let Some(alias) = instance.alias.as_deref() else {
                continue;
            };
            if numeric.is_match(alias) {
                return Err(ConfigError::NumericAlias {
                    pool: pool.name.clone(),
                    id: instance.id,
                    alias: alias.to_string(),
                });
            }
            if !seen.insert(alias) {
                return Err(ConfigError::DuplicateAlias {
                    pool: pool.name.clone(),
                    alias: alias.to_string(),
                });
            }
        }
    }

    let defaults: Vec<&str> = pools
        .iter()
        .filter(|p| p.is_default)
        .map(|p| p.name.as_str())
        .collect();
    match defaults.len() {
        0 => Err(ConfigError::NoDefaultPool),
        1 => Ok(()),
        _ => Err(ConfigError::MultipleDefaultPools(defaults.join(", "))),
    }
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod tests;
