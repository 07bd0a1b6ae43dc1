//! A named pool of supervised children sharing one lease queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use pwmux_config::{InstanceConfig, PoolConfig, PoolSettings};

use crate::child::{ChildState, ChildSupervisor, ChildTimeouts};
use crate::command::LaunchSpec;
use crate::error::{ChildError, PoolError};
use crate::queue::LeaseQueue;
use crate::registry::{InstanceKey, LeaseHint};

/// Status snapshot for one instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatus {
    pub id: usize,
    pub alias: Option<String>,
    pub status: String,
    pub leased: bool,
    pub lease_started_at: Option<DateTime<Utc>>,
    pub lease_duration_ms: Option<i64>,
    pub browser: String,
    pub headless: bool,
    pub process_id: Option<u32>,
    pub health_check: HealthStatus,
}

/// Last health-probe outcome for one instance.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub last_check: Option<DateTime<Utc>>,
    pub responsive: bool,
    pub error: Option<String>,
}

/// Status snapshot for one pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub name: String,
    pub description: String,
    pub is_default: bool,
    pub total_instances: usize,
    pub healthy_instances: usize,
    pub leased_instances: usize,
    pub available_instances: usize,
    pub instances: Vec<InstanceStatus>,
}

/// RAII lease over one child. Dropping the guard releases the child back to
/// the queue, or drops it permanently when it failed while leased.
pub struct Lease {
    child: Arc<ChildSupervisor>,
    queue: Arc<LeaseQueue>,
}

impl Lease {
    /// The leased child.
    pub fn child(&self) -> &Arc<ChildSupervisor> {
        &self.child
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("child_id", &self.child.id())
            .finish()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.child.mark_released();
        match self.child.state() {
            ChildState::Failed | ChildState::Stopped => {
                debug!(
                    instance = self.child.id(),
                    state = %self.child.state(),
                    "dropping failed handle instead of re-queueing"
                );
                self.queue.remove(self.child.id());
            }
            _ => self.queue.release(self.child.id()),
        }
    }
}

/// A named group of sibling children with FIFO leasing.
pub struct Pool {
    name: String,
    description: String,
    is_default: bool,
    children: Vec<Arc<ChildSupervisor>>,
    queue: Arc<LeaseQueue>,
    settings: PoolSettings,
    shutting_down: AtomicBool,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.name)
            .field("is_default", &self.is_default)
            .finish_non_exhaustive()
    }
}

impl Pool {
    /// Spawn every child eagerly in parallel and populate the lease queue.
    ///
    /// Children that fail the startup window are retained as `Failed` and
    /// never enqueued; the pool starts as long as the configuration is
    /// sound. Browser startup costs seconds, so paying it here keeps the
    /// first tool call fast.
    pub async fn init(config: &PoolConfig) -> Result<Arc<Self>, PoolError> {
        Self::init_with_launcher(config, LaunchSpec::from_config).await
    }

    /// Like [`Pool::init`], with a custom launch-spec builder. Tests inject
    /// scripted children through this seam.
    pub async fn init_with_launcher<F>(
        config: &PoolConfig,
        launcher: F,
    ) -> Result<Arc<Self>, PoolError>
    where
        F: Fn(&pwmux_config::BrowserConfig) -> Result<LaunchSpec, ChildError>,
    {
        info!(
            pool = %config.name,
            instances = config.instances,
            "initializing pool"
        );

        let timeouts = ChildTimeouts {
            startup: config.settings.startup_timeout,
            call: config.settings.call_timeout,
            probe: config.settings.probe_timeout,
            stop_grace: config.settings.stop_grace,
        };

        let children: Vec<Arc<ChildSupervisor>> = config
            .instance_configs
            .iter()
            .map(|instance: &InstanceConfig| {
                Arc::new(ChildSupervisor::new(
                    instance.id,
                    instance.alias.clone(),
                    config.name.clone(),
                    instance.browser.clone(),
                    timeouts,
                ))
            })
            .collect();

        let startups = config.instance_configs.iter().zip(&children).map(
            |(instance, child)| {
                let spec = launcher(&instance.browser);
                let child = Arc::clone(child);
                async move {
                    match spec {
                        Ok(spec) => child.start(spec).await,
                        Err(e) => Err(e),
                    }
                }
            },
        );
        let outcomes = join_all(startups).await;

        let mut ready_ids = Vec::new();
        for (child, outcome) in children.iter().zip(outcomes) {
            match outcome {
                Ok(()) => ready_ids.push(child.id()),
                Err(e) => {
                    error!(
                        pool = %config.name,
                        instance = child.id(),
                        error = %e,
                        "instance failed to start; excluded from leasing"
                    );
                    child.mark_failed();
                }
            }
        }

        info!(
            pool = %config.name,
            ready = ready_ids.len(),
            failed = children.len() - ready_ids.len(),
            "pool initialized"
        );

        Ok(Arc::new(Self {
            name: config.name.clone(),
            description: config.description.clone(),
            is_default: config.is_default,
            children,
            queue: LeaseQueue::new(ready_ids),
            settings: config.settings.clone(),
            shutting_down: AtomicBool::new(false),
            health_task: Mutex::new(None),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    /// Children of this pool, including failed ones.
    pub fn children(&self) -> &[Arc<ChildSupervisor>] {
        &self.children
    }

    /// Resolve an instance key to a pool-local id.
    pub fn resolve_key(&self, key: &InstanceKey) -> Result<usize, PoolError> {
        match key {
            InstanceKey::Id(id) => {
                if *id < self.children.len() {
                    Ok(*id)
                } else {
                    Err(PoolError::NotFound(format!(
                        "pool '{}' has no instance {id}",
                        self.name
                    )))
                }
            }
            InstanceKey::Alias(alias) => self
                .children
                .iter()
                .find(|c| c.alias() == Some(alias.as_str()))
                .map(|c| c.id())
                .ok_or_else(|| {
                    PoolError::NotFound(format!("pool '{}' has no alias '{alias}'", self.name))
                }),
        }
    }

    /// Whether any instance carries this alias.
    pub fn has_alias(&self, alias: &str) -> bool {
        self.children
            .iter()
            .any(|c| c.alias() == Some(alias))
    }

    /// Acquire a lease. Blocks until a child is available (or the optional
    /// lease-wait ceiling elapses). Cancellation is dropping the future; the
    /// lease is then never granted and no handle is consumed.
    pub async fn lease(&self, hint: &LeaseHint) -> Result<Lease, PoolError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(PoolError::ShuttingDown);
        }

        let acquire = async {
            match hint {
                LeaseHint::Any => self.queue.lease_any().await,
                LeaseHint::Specific(key) => {
                    let id = self.resolve_key(key)?;
                    // A failed handle fails fast rather than blocking forever.
                    match self.children[id].state() {
                        ChildState::Failed | ChildState::Stopped => {
                            return Err(PoolError::NotFound(format!(
                                "instance {id} in pool '{}' is {}",
                                self.name,
                                self.children[id].state()
                            )));
                        }
                        _ => {}
                    }
                    self.queue.lease_specific(id).await
                }
            }
        };

        let id = match self.settings.lease_timeout {
            Some(ceiling) => match tokio::time::timeout(ceiling, acquire).await {
                Ok(outcome) => outcome?,
                Err(_) => {
                    return Err(PoolError::Exhausted {
                        waited_ms: ceiling.as_millis() as u64,
                    })
                }
            },
            None => acquire.await?,
        };

        let child = Arc::clone(&self.children[id]);
        child.mark_leased();
        debug!(pool = %self.name, instance = id, "lease granted");

        Ok(Lease {
            child,
            queue: Arc::clone(&self.queue),
        })
    }

    /// Start the periodic health loop. Probes ping every child directly,
    /// bypassing the lease queue — probing through the queue would report
    /// busy children as unhealthy and idle-starved pools as healthy.
    pub fn spawn_health_loop(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        let interval = self.settings.health_check_interval;
        let threshold = self.settings.health_failure_threshold;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                pool.check_all_health(threshold).await;
            }
        });
        *self.health_task.lock() = Some(handle);
    }

    /// Probe every live child once. A single failed probe only increments
    /// the child's failure counter; `threshold` consecutive failures mark it
    /// failed and remove it from the queue.
    pub async fn check_all_health(&self, threshold: u32) {
        let probes = self.children.iter().map(|child| {
            let child = Arc::clone(child);
            async move {
                match child.state() {
                    ChildState::Failed | ChildState::Stopped => None,
                    _ => Some((child.id(), child.probe().await)),
                }
            }
        });

        for outcome in join_all(probes).await.into_iter().flatten() {
            let (id, result) = outcome;
            let child = &self.children[id];
            match result {
                Ok(()) => child.record_probe_ok(),
                Err(e) => {
                    let failures = child.record_probe_failure(&e);
                    warn!(
                        pool = %self.name,
                        instance = id,
                        failures,
                        error = %e,
                        "health probe failed"
                    );
                    if failures >= threshold {
                        error!(
                            pool = %self.name,
                            instance = id,
                            "instance failed {failures} consecutive probes; marking failed"
                        );
                        child.mark_failed();
                        self.queue.remove(id);
                    }
                }
            }
        }
    }

    /// Snapshot the pool's state for status reporting.
    pub fn status(&self) -> PoolStatus {
        let instances: Vec<InstanceStatus> = self
            .children
            .iter()
            .map(|child| {
                let state = child.state();
                let lease = child.lease_info();
                let config = child.config();
                InstanceStatus {
                    id: child.id(),
                    alias: child.alias().map(str::to_string),
                    status: state.to_string(),
                    leased: state == ChildState::Leased,
                    lease_started_at: lease.as_ref().map(|l| l.started_at),
                    lease_duration_ms: lease
                        .as_ref()
                        .map(|l| (Utc::now() - l.started_at).num_milliseconds()),
                    browser: config
                        .browser
                        .clone()
                        .unwrap_or_else(|| "chromium".to_string()),
                    headless: config.headless.unwrap_or(false),
                    process_id: child.pid(),
                    health_check: HealthStatus {
                        last_check: child.last_health_ok(),
                        responsive: !matches!(
                            state,
                            ChildState::Failed | ChildState::Stopped
                        ),
                        error: child.last_probe_error(),
                    },
                }
            })
            .collect();

        let healthy = instances
            .iter()
            .filter(|i| i.status == "ready" || i.status == "leased")
            .count();
        let leased = instances.iter().filter(|i| i.leased).count();

        PoolStatus {
            name: self.name.clone(),
            description: self.description.clone(),
            is_default: self.is_default,
            total_instances: instances.len(),
            healthy_instances: healthy,
            leased_instances: leased,
            available_instances: healthy - leased,
            instances,
        }
    }

    /// Drain the queue, stop all children in parallel and reject further
    /// lease requests with `ShuttingDown`.
    pub async fn shutdown(&self, grace: Duration) {
        info!(pool = %self.name, "shutting down pool");
        self.shutting_down.store(true, Ordering::SeqCst);
        if let Some(handle) = self.health_task.lock().take() {
            handle.abort();
        }
        self.queue.close();
        join_all(self.children.iter().map(|child| child.stop(grace))).await;
        info!(pool = %self.name, "pool stopped");
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
