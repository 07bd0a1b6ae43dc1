//! Assembly of the proxy: configuration → blob store → registry →
//! dispatcher, plus the background janitor tasks.
//!
//! The blob store and snapshot cache are process-wide singletons built once
//! here and threaded into the dispatcher as explicit parameters; teardown
//! happens in reverse order through [`ProxyRuntime::shutdown`].

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use pwmux_blob::{BlobStore, BlobStoreConfig, Sweeper};
use pwmux_config::{load_blob_config, load_fleet_config, process_env, EnvMap};
use pwmux_config::{BlobConfig, ConfigError, FleetConfig};
use pwmux_pool::{PoolError, PoolRegistry};
use pwmux_proxy::snapshot::DEFAULT_SNAPSHOT_TTL;
use pwmux_proxy::{PassthroughPostprocessor, SnapshotCache, SnapshotPostprocessor, ToolDispatcher};

/// Startup failures. Configuration problems are fatal; the proxy refuses to
/// start rather than run with a partial fleet definition.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pool startup error: {0}")]
    Pool(#[from] PoolError),

    #[error("Blob store error: {0}")]
    Blob(#[from] pwmux_blob::BlobError),
}

/// The running proxy core: pools, caches and janitors, with the dispatcher
/// as its front door.
pub struct ProxyRuntime {
    registry: Arc<PoolRegistry>,
    dispatcher: Arc<ToolDispatcher>,
    blob_sweeper: Sweeper,
    eviction_task: JoinHandle<()>,
    eviction_shutdown: watch::Sender<bool>,
    stop_grace: Duration,
}

impl std::fmt::Debug for ProxyRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyRuntime").finish_non_exhaustive()
    }
}

impl ProxyRuntime {
    /// Start from the process environment (`PW_MCP_PROXY_*` / `BLOB_*`).
    pub async fn start_from_env() -> Result<Self, RuntimeError> {
        Self::start_from_map(&process_env()).await
    }

    /// Start from an explicit environment map.
    pub async fn start_from_map(env: &EnvMap) -> Result<Self, RuntimeError> {
        let fleet = load_fleet_config(env)?;
        let blob = load_blob_config(env)?;
        Self::start(fleet, blob, Arc::new(PassthroughPostprocessor)).await
    }

    /// Start from parsed configuration with a host-supplied snapshot
    /// post-processor.
    pub async fn start(
        fleet: FleetConfig,
        blob: BlobConfig,
        postprocessor: Arc<dyn SnapshotPostprocessor>,
    ) -> Result<Self, RuntimeError> {
        Self::start_with_launcher(fleet, blob, postprocessor, pwmux_pool::LaunchSpec::from_config)
            .await
    }

    /// Same as [`ProxyRuntime::start`] with a custom launch-spec builder,
    /// the seam tests use to substitute scripted children.
    pub async fn start_with_launcher<F>(
        fleet: FleetConfig,
        blob: BlobConfig,
        postprocessor: Arc<dyn SnapshotPostprocessor>,
        launcher: F,
    ) -> Result<Self, RuntimeError>
    where
        F: Fn(&pwmux_config::BrowserConfig) -> Result<pwmux_pool::LaunchSpec, pwmux_pool::ChildError>
            + Copy,
    {
        info!(
            pools = fleet.pools.len(),
            instances = fleet.total_instances(),
            blob_root = %blob.storage_root.display(),
            "starting pwmux proxy core"
        );

        let store_config = BlobStoreConfig {
            root_dir: blob.storage_root.clone(),
            max_blob_bytes: blob.max_bytes(),
            ttl: blob.ttl(),
            sweep_interval: blob.cleanup_interval(),
        };
        let blob_store = Arc::new(BlobStore::open(&store_config).await?);
        let snapshots = Arc::new(SnapshotCache::new(DEFAULT_SNAPSHOT_TTL));

        let stop_grace = fleet
            .pools
            .first()
            .map(|p| p.settings.stop_grace)
            .unwrap_or(Duration::from_secs(5));
        let registry = Arc::new(PoolRegistry::init_with_launcher(&fleet, launcher).await?);

        let dispatcher = Arc::new(ToolDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&blob_store),
            Arc::clone(&snapshots),
            blob.inline_threshold_bytes(),
            postprocessor,
        ));

        // Blob sweeping and snapshot eviction share the same timer family.
        let blob_sweeper = Sweeper::start(Arc::clone(&blob_store), store_config.sweep_interval);
        let (eviction_shutdown, eviction_task) =
            spawn_snapshot_eviction(Arc::clone(&snapshots), store_config.sweep_interval);

        info!("pwmux proxy core started");
        Ok(Self {
            registry,
            dispatcher,
            blob_sweeper,
            eviction_task,
            eviction_shutdown,
            stop_grace,
        })
    }

    /// The dispatcher handling every inbound tool call.
    pub fn dispatcher(&self) -> Arc<ToolDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// The pool registry (status reporting, targeted shutdown).
    pub fn registry(&self) -> Arc<PoolRegistry> {
        Arc::clone(&self.registry)
    }

    /// Stop janitors and pools, then the children, with `grace` per
    /// escalation step.
    pub async fn shutdown(self, grace: Duration) {
        info!("shutting down pwmux proxy core");
        let _ = self.eviction_shutdown.send(true);
        let _ = self.eviction_task.await;
        self.blob_sweeper.stop().await;
        self.registry.shutdown_all(grace.max(self.stop_grace)).await;
        info!("pwmux proxy core stopped");
    }
}

fn spawn_snapshot_eviction(
    snapshots: Arc<SnapshotCache>,
    interval: Duration,
) -> (watch::Sender<bool>, JoinHandle<()>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = snapshots.evict_expired();
                    if evicted > 0 {
                        debug!(evicted, "snapshot cache janitor evicted entries");
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }
    });
    (shutdown_tx, handle)
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
