//! Blob store configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Blob store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobStoreConfig {
    /// Directory holding blob files and their sidecars.
    pub root_dir: PathBuf,

    /// Maximum size of a single blob in bytes.
    #[serde(default = "default_max_blob_bytes")]
    pub max_blob_bytes: u64,

    /// Time-to-live for stored blobs.
    #[serde(default = "default_ttl", with = "duration_secs")]
    pub ttl: Duration,

    /// Interval between background sweeps.
    #[serde(default = "default_sweep_interval", with = "duration_secs")]
    pub sweep_interval: Duration,
}

fn default_max_blob_bytes() -> u64 {
    500 * 1024 * 1024
}

fn default_ttl() -> Duration {
    Duration::from_secs(24 * 3600)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(3600)
}

impl BlobStoreConfig {
    /// Config rooted at `root_dir` with default cap, TTL and sweep interval.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            max_blob_bytes: default_max_blob_bytes(),
            ttl: default_ttl(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
