//! Registry owning all pools; routes `(pool, instance)` selections.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tracing::info;

use pwmux_config::{BrowserConfig, FleetConfig};

use crate::command::LaunchSpec;
use crate::error::{ChildError, PoolError};
use crate::pool::{Pool, PoolStatus};

/// Selector for one instance within a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceKey {
    Id(usize),
    Alias(String),
}

impl InstanceKey {
    /// Parse a caller-supplied instance string: all digits means a numeric
    /// id (validation reserves that shape), anything else is an alias.
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<usize>() {
            Ok(id) if raw.chars().all(|c| c.is_ascii_digit()) => InstanceKey::Id(id),
            _ => InstanceKey::Alias(raw.to_string()),
        }
    }
}

/// How to pick an instance when leasing from a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseHint {
    /// First available, FIFO.
    Any,
    /// That instance and no other.
    Specific(InstanceKey),
}

/// Fleet-wide status aggregation.
#[derive(Debug, Clone, Serialize)]
pub struct FleetStatus {
    pub pools: Vec<PoolStatus>,
    pub summary: StatusSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSummary {
    pub total_pools: usize,
    pub total_instances: usize,
    pub healthy_instances: usize,
    pub failed_instances: usize,
    pub leased_instances: usize,
    pub available_instances: usize,
}

/// Owns every pool. Immutable after startup.
pub struct PoolRegistry {
    pools: HashMap<String, Arc<Pool>>,
    default_pool: String,
}

impl PoolRegistry {
    /// Build the fleet: initialize every pool eagerly (children spawn in
    /// parallel) and start the per-pool health loops.
    pub async fn init(config: &FleetConfig) -> Result<Self, PoolError> {
        Self::init_with_launcher(config, LaunchSpec::from_config).await
    }

    /// Like [`PoolRegistry::init`] with a custom launch-spec builder.
    pub async fn init_with_launcher<F>(
        config: &FleetConfig,
        launcher: F,
    ) -> Result<Self, PoolError>
    where
        F: Fn(&BrowserConfig) -> Result<LaunchSpec, ChildError> + Copy,
    {
        info!(
            pools = config.pools.len(),
            instances = config.total_instances(),
            default = %config.default_pool,
            "building pool registry"
        );

        let mut pools = HashMap::new();
        for pool_config in &config.pools {
            let pool = Pool::init_with_launcher(pool_config, launcher).await?;
            pool.spawn_health_loop();
            pools.insert(pool_config.name.clone(), pool);
        }

        Ok(Self {
            pools,
            default_pool: config.default_pool.clone(),
        })
    }

    /// Look up a pool by name, or the default pool when `name` is `None`.
    pub fn get(&self, name: Option<&str>) -> Result<Arc<Pool>, PoolError> {
        let name = name.unwrap_or(&self.default_pool);
        self.pools.get(name).cloned().ok_or_else(|| {
            let mut available: Vec<&str> = self.pools.keys().map(String::as_str).collect();
            available.sort_unstable();
            PoolError::NotFound(format!(
                "pool '{name}' (available: {})",
                available.join(", ")
            ))
        })
    }

    /// The default pool.
    pub fn default_pool(&self) -> Arc<Pool> {
        // The configuration validator guarantees the default pool exists.
        self.pools[&self.default_pool].clone()
    }

    /// Resolve a `(pool, instance)` selection to a pool and a lease hint.
    ///
    /// An alias given without a pool is resolved across all pools; a match
    /// in more than one pool is `AmbiguousAlias`. With an explicit pool the
    /// alias is scoped to that pool.
    pub fn resolve(
        &self,
        pool: Option<&str>,
        instance: Option<&str>,
    ) -> Result<(Arc<Pool>, LeaseHint), PoolError> {
        let Some(raw) = instance else {
            return Ok((self.get(pool)?, LeaseHint::Any));
        };

        let key = InstanceKey::parse(raw);

        if pool.is_none() {
            if let InstanceKey::Alias(alias) = &key {
                let matches: Vec<&Arc<Pool>> = self
                    .pools
                    .values()
                    .filter(|p| p.has_alias(alias))
                    .collect();
                return match matches.len() {
                    0 => Err(PoolError::NotFound(format!("alias '{alias}'"))),
                    1 => Ok((
                        Arc::clone(matches[0]),
                        LeaseHint::Specific(key.clone()),
                    )),
                    _ => Err(PoolError::AmbiguousAlias(alias.clone())),
                };
            }
        }

        let pool = self.get(pool)?;
        // Unknown keys fail here rather than blocking forever in the queue.
        pool.resolve_key(&key)?;
        Ok((pool, LeaseHint::Specific(key)))
    }

    /// Status of one pool, or of the whole fleet.
    pub fn status(&self, pool: Option<&str>) -> Result<FleetStatus, PoolError> {
        let statuses: Vec<PoolStatus> = match pool {
            Some(_) => vec![self.get(pool)?.status()],
            None => {
                let mut all: Vec<PoolStatus> =
                    self.pools.values().map(|p| p.status()).collect();
                all.sort_by(|a, b| a.name.cmp(&b.name));
                all
            }
        };

        let summary = StatusSummary {
            total_pools: statuses.len(),
            total_instances: statuses.iter().map(|s| s.total_instances).sum(),
            healthy_instances: statuses.iter().map(|s| s.healthy_instances).sum(),
            failed_instances: statuses
                .iter()
                .map(|s| s.total_instances - s.healthy_instances)
                .sum(),
            leased_instances: statuses.iter().map(|s| s.leased_instances).sum(),
            available_instances: statuses.iter().map(|s| s.available_instances).sum(),
        };

        Ok(FleetStatus {
            pools: statuses,
            summary,
        })
    }

    /// Shut down every pool in parallel.
    pub async fn shutdown_all(&self, grace: Duration) {
        info!("shutting down all pools");
        join_all(self.pools.values().map(|pool| pool.shutdown(grace))).await;
    }

    /// Pool names, sorted.
    pub fn pool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.keys().cloned().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
