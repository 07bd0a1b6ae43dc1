//! Configuration schema for the browser fleet.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// User agent injected by the stealth macro when no stratum sets one.
pub const STEALTH_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Settings for one `playwright-mcp` subprocess.
///
/// Every field is optional; the effective configuration of an instance is the
/// overlay of the three strata (Instance > Pool > Global) followed by
/// [`BrowserConfig::apply_defaults`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserConfig {
    // Browser selection
    pub browser: Option<String>,
    pub headless: Option<bool>,
    pub no_sandbox: Option<bool>,
    pub device: Option<String>,
    pub viewport_size: Option<String>,

    // Profile / storage
    pub isolated: Option<bool>,
    pub user_data_dir: Option<String>,
    pub storage_state: Option<String>,

    // Network
    pub allowed_origins: Option<String>,
    pub blocked_origins: Option<String>,
    pub proxy_server: Option<String>,

    // Capabilities
    pub caps: Option<String>,

    // Output
    pub save_session: Option<bool>,
    pub save_trace: Option<bool>,
    pub save_video: Option<String>,
    pub output_dir: Option<String>,

    // Timeouts (milliseconds)
    pub timeout_action: Option<u64>,
    pub timeout_navigation: Option<u64>,

    // Images
    pub image_responses: Option<String>,

    // Stealth
    pub user_agent: Option<String>,
    pub init_script: Option<String>,
    pub ignore_https_errors: Option<bool>,
    pub enable_stealth: Option<bool>,

    // Extension support
    pub extension: Option<bool>,
    pub extension_token: Option<String>,
}

macro_rules! overlay_field {
    ($base:ident, $over:ident, $($field:ident),+ $(,)?) => {
        $(
            if $over.$field.is_some() {
                $base.$field = $over.$field.clone();
            }
        )+
    };
}

impl BrowserConfig {
    /// Overlay `other` on top of `self`: any key set in `other` wins.
    pub fn overlay(&self, other: &BrowserConfig) -> BrowserConfig {
        let mut merged = self.clone();
        overlay_field!(
            merged,
            other,
            browser,
            headless,
            no_sandbox,
            device,
            viewport_size,
            isolated,
            user_data_dir,
            storage_state,
            allowed_origins,
            blocked_origins,
            proxy_server,
            caps,
            save_session,
            save_trace,
            save_video,
            output_dir,
            timeout_action,
            timeout_navigation,
            image_responses,
            user_agent,
            init_script,
            ignore_https_errors,
            enable_stealth,
            extension,
            extension_token,
        );
        merged
    }

    /// Fill in the fleet-wide defaults for keys no stratum set.
    pub fn apply_defaults(&mut self) {
        self.browser.get_or_insert_with(|| "chromium".to_string());
        self.headless.get_or_insert(false);
        self.caps.get_or_insert_with(|| "vision,pdf".to_string());
        self.timeout_action.get_or_insert(15_000);
        self.timeout_navigation.get_or_insert(5_000);
        self.image_responses.get_or_insert_with(|| "allow".to_string());
        self.viewport_size.get_or_insert_with(|| "1920x1080".to_string());
    }

    /// Apply the stealth macro after all strata were overlaid.
    ///
    /// `enable_stealth=true` injects stealth defaults for keys no stratum set
    /// explicitly: headed mode and a recent Chrome user agent. The bundled
    /// stealth init script is materialized by the launch-spec builder when
    /// `init_script` is still unset.
    pub fn apply_stealth(&mut self) {
        if self.enable_stealth != Some(true) {
            return;
        }
        self.headless.get_or_insert(false);
        self.user_agent
            .get_or_insert_with(|| STEALTH_USER_AGENT.to_string());
    }
}

/// Tunables for a pool's runtime behavior.
///
/// These are not env-driven; hosts adjust them in code before building the
/// registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    /// Interval between health-check sweeps.
    pub health_check_interval: Duration,
    /// Consecutive probe failures before a child is marked failed.
    pub health_failure_threshold: u32,
    /// How long a child may take to complete the initialize handshake.
    pub startup_timeout: Duration,
    /// Default per-call deadline for tool invocations.
    pub call_timeout: Duration,
    /// Deadline for a liveness probe.
    pub probe_timeout: Duration,
    /// Grace period per escalation step during shutdown (close stdin, TERM, KILL).
    pub stop_grace: Duration,
    /// Optional ceiling on lease waits; `None` blocks unboundedly.
    pub lease_timeout: Option<Duration>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(20),
            health_failure_threshold: 3,
            startup_timeout: Duration::from_secs(60),
            call_timeout: Duration::from_secs(90),
            probe_timeout: Duration::from_secs(5),
            stop_grace: Duration::from_secs(5),
            lease_timeout: None,
        }
    }
}

/// One browser instance within a pool: a pool-local id, an optional alias,
/// and the fully overlaid effective configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceConfig {
    pub id: usize,
    pub alias: Option<String>,
    pub browser: BrowserConfig,
}

/// A named pool of sibling instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub name: String,
    pub description: String,
    pub is_default: bool,
    pub instances: usize,
    pub instance_configs: Vec<InstanceConfig>,
    pub settings: PoolSettings,
}

/// The frozen fleet configuration: every pool plus the name of the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetConfig {
    pub pools: Vec<PoolConfig>,
    pub default_pool: String,
    pub global: BrowserConfig,
}

impl FleetConfig {
    /// Total instance count across all pools.
    pub fn total_instances(&self) -> usize {
        self.pools.iter().map(|p| p.instances).sum()
    }
}

/// Blob storage settings (`BLOB_*` environment family).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobConfig {
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,
    #[serde(default = "default_size_threshold_kb")]
    pub size_threshold_kb: u64,
    #[serde(default = "default_cleanup_interval_minutes")]
    pub cleanup_interval_minutes: u64,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("/mnt/blob-storage")
}

fn default_max_size_mb() -> u64 {
    500
}

fn default_ttl_hours() -> u64 {
    24
}

fn default_size_threshold_kb() -> u64 {
    50
}

fn default_cleanup_interval_minutes() -> u64 {
    60
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            max_size_mb: default_max_size_mb(),
            ttl_hours: default_ttl_hours(),
            size_threshold_kb: default_size_threshold_kb(),
            cleanup_interval_minutes: default_cleanup_interval_minutes(),
        }
    }
}

impl BlobConfig {
    /// Per-blob size cap in bytes.
    pub fn max_bytes(&self) -> u64 {
        self.max_size_mb * 1024 * 1024
    }

    /// Blob time-to-live.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours * 3600)
    }

    /// Interval between sweeper runs.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_minutes * 60)
    }

    /// Inline threshold in bytes for binary interception.
    pub fn inline_threshold_bytes(&self) -> usize {
        (self.size_threshold_kb * 1024) as usize
    }
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
