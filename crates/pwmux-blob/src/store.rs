//! On-disk blob storage with atomic writes and TTL-based expiry.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};

use crate::config::BlobStoreConfig;
use crate::error::BlobError;
use crate::types::{extension_for_mime, BlobMeta, BlobRef};

const META_SUFFIX: &str = ".meta";

/// A retrieved blob.
#[derive(Debug)]
pub struct BlobData {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub size_bytes: u64,
    pub expires_at: DateTime<Utc>,
}

/// Content-addressed blob store.
///
/// Ids encode the wall-clock second and a truncated content digest, so two
/// identical payloads stored in different seconds get distinct ids;
/// de-duplication is not a contract. Writes go to a uniquely named temp file
/// and are renamed into place, so readers never observe partial blobs.
pub struct BlobStore {
    root: PathBuf,
    max_bytes: u64,
    ttl: ChronoDuration,
    temp_seq: AtomicU64,
}

impl BlobStore {
    /// Open (and create if needed) a store rooted at `config.root_dir`.
    pub async fn open(config: &BlobStoreConfig) -> Result<Self, BlobError> {
        fs::create_dir_all(&config.root_dir).await?;
        debug!(root = %config.root_dir.display(), "blob store opened");
        Ok(Self {
            root: config.root_dir.clone(),
            max_bytes: config.max_blob_bytes,
            ttl: ChronoDuration::from_std(config.ttl)
                .unwrap_or_else(|_| ChronoDuration::hours(24)),
            temp_seq: AtomicU64::new(0),
        })
    }

    /// Store `bytes` and return the reference. Fails with
    /// [`BlobError::TooLarge`] when the payload exceeds the per-blob cap.
    pub async fn put(
        &self,
        bytes: &[u8],
        mime: &str,
        tags: &[String],
    ) -> Result<BlobRef, BlobError> {
        let size = bytes.len() as u64;
        if size > self.max_bytes {
            return Err(BlobError::TooLarge {
                size,
                max: self.max_bytes,
            });
        }

        let now = Utc::now();
        let blob_id = format!("{:010}-{}", now.timestamp(), digest12(bytes));
        let ext = extension_for_mime(mime);
        let file_name = format!("{blob_id}.{ext}");

        let meta = BlobMeta {
            blob_id: blob_id.clone(),
            mime_type: mime.to_string(),
            size_bytes: size,
            created_at: now,
            expires_at: now + self.ttl,
            tags: tags.to_vec(),
        };
        let meta_json = serde_json::to_vec_pretty(&meta)
            .map_err(|e| BlobError::Metadata(e.to_string()))?;

        // Sidecar first, data second: a visible data file always has metadata.
        let meta_path = self.root.join(format!("{file_name}{META_SUFFIX}"));
        self.write_atomic(&meta_path, &meta_json).await?;

        let data_path = self.root.join(&file_name);
        self.write_atomic(&data_path, bytes).await?;

        debug!(blob_id = %blob_id, size, mime, "blob stored");
        Ok(meta.to_ref())
    }

    /// Retrieve a blob by id. Expired-but-unswept blobs still serve.
    pub async fn get(&self, blob_id: &str) -> Result<BlobData, BlobError> {
        let Some(data_path) = self.find_data_file(blob_id).await? else {
            return Err(BlobError::NotFound(blob_id.to_string()));
        };
        let meta = self.read_meta(&data_path).await?;

        let bytes = match fs::read(&data_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Swept between lookup and read.
                return Err(BlobError::NotFound(blob_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(BlobData {
            bytes,
            mime_type: meta.mime_type,
            size_bytes: meta.size_bytes,
            expires_at: meta.expires_at,
        })
    }

    /// Enumerate surviving blobs, optionally filtered by id prefix and tags.
    /// Ordering is unspecified.
    pub async fn list(
        &self,
        prefix: Option<&str>,
        tags: Option<&[String]>,
    ) -> Result<Vec<BlobRef>, BlobError> {
        let mut refs = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.ends_with(META_SUFFIX) {
                continue;
            }
            let meta = match read_meta_file(&path).await {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable sidecar");
                    continue;
                }
            };
            if let Some(prefix) = prefix {
                if !meta.blob_id.starts_with(prefix) {
                    continue;
                }
            }
            if let Some(tags) = tags {
                if !tags.iter().all(|t| meta.tags.contains(t)) {
                    continue;
                }
            }
            // The sidecar may outlive a just-deleted data file briefly.
            let data_path = path.with_file_name(name.trim_end_matches(META_SUFFIX));
            if !fs::try_exists(&data_path).await.unwrap_or(false) {
                continue;
            }
            refs.push(meta.to_ref());
        }

        Ok(refs)
    }

    /// Delete a blob and its sidecar. Returns whether the data file existed.
    pub async fn delete(&self, blob_id: &str) -> Result<bool, BlobError> {
        let Some(data_path) = self.find_data_file(blob_id).await? else {
            return Ok(false);
        };
        let meta_path = sidecar_path(&data_path);
        let existed = fs::remove_file(&data_path).await.is_ok();
        let _ = fs::remove_file(&meta_path).await;
        Ok(existed)
    }

    /// Remove every record whose `expires_at` is in the past, plus orphan
    /// files older than the TTL. Returns the number of records removed.
    ///
    /// Safe to run concurrently with `put`/`get`: data files are complete
    /// from the moment they are visible, and a `get` racing a sweep either
    /// reads the full file or reports `NotFound`.
    pub async fn sweep_expired(&self) -> Result<usize, BlobError> {
        let now = Utc::now();
        let mut removed = 0usize;
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if name.ends_with(META_SUFFIX) {
                let expired = match read_meta_file(&path).await {
                    Ok(meta) => meta.expires_at < now,
                    // Unreadable sidecar: treat as orphan, age by mtime.
                    Err(_) => self.older_than_ttl(&path).await,
                };
                if expired {
                    let data_path = path.with_file_name(name.trim_end_matches(META_SUFFIX));
                    let had_data = fs::remove_file(&data_path).await.is_ok();
                    let _ = fs::remove_file(&path).await;
                    if had_data {
                        removed += 1;
                    }
                }
            } else if !name.starts_with('.') {
                // Data file: an orphan (no sidecar) is deleted once older
                // than the TTL.
                let meta_path = sidecar_path(&path);
                if !fs::try_exists(&meta_path).await.unwrap_or(false)
                    && self.older_than_ttl(&path).await
                {
                    if fs::remove_file(&path).await.is_ok() {
                        removed += 1;
                    }
                }
            }
        }

        if removed > 0 {
            debug!(removed, "blob sweep removed expired records");
        }
        Ok(removed)
    }

    async fn write_atomic(&self, dest: &Path, bytes: &[u8]) -> Result<(), BlobError> {
        let seq = self.temp_seq.fetch_add(1, Ordering::Relaxed);
        let temp = self.root.join(format!(
            ".tmp-{}-{}-{}",
            std::process::id(),
            seq,
            dest.file_name().and_then(|n| n.to_str()).unwrap_or("blob")
        ));
        if let Err(e) = fs::write(&temp, bytes).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&temp, dest).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Locate the data file for an id (the extension is not known upfront).
    async fn find_data_file(&self, blob_id: &str) -> Result<Option<PathBuf>, BlobError> {
        let wanted = format!("{blob_id}.");
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with(&wanted) && !name.ends_with(META_SUFFIX) {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    async fn read_meta(&self, data_path: &Path) -> Result<BlobMeta, BlobError> {
        read_meta_file(&sidecar_path(data_path)).await
    }

    async fn older_than_ttl(&self, path: &Path) -> bool {
        let Ok(std_ttl) = self.ttl.to_std() else {
            return false;
        };
        match fs::metadata(path).await.and_then(|m| m.modified()) {
            Ok(modified) => modified
                .elapsed()
                .map(|age| age > std_ttl)
                .unwrap_or(false),
            Err(_) => false,
        }
    }
}

fn sidecar_path(data_path: &Path) -> PathBuf {
    let mut name = data_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    name.push_str(META_SUFFIX);
    data_path.with_file_name(name)
}

async fn read_meta_file(path: &Path) -> Result<BlobMeta, BlobError> {
    let content = fs::read_to_string(path).await?;
    serde_json::from_str(&content).map_err(|e| BlobError::Metadata(e.to_string()))
}

/// First 12 hex chars of the SHA-256 digest.
fn digest12(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest
        .iter()
        .take(6)
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
