//! Blob identifiers and sidecar metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reference to a stored blob, returned to callers in place of raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    /// Opaque id of the form `<10-digit unix ts>-<12 hex digest chars>`.
    pub blob_id: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub expires_at: DateTime<Utc>,
}

impl BlobRef {
    /// String form handed to tool callers: `blob://<id>.<ext>`.
    pub fn uri(&self) -> String {
        format!(
            "blob://{}.{}",
            self.blob_id,
            extension_for_mime(&self.mime_type)
        )
    }
}

/// JSON sidecar stored next to each blob file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobMeta {
    pub blob_id: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl BlobMeta {
    pub fn to_ref(&self) -> BlobRef {
        BlobRef {
            blob_id: self.blob_id.clone(),
            mime_type: self.mime_type.clone(),
            size_bytes: self.size_bytes,
            expires_at: self.expires_at,
        }
    }
}

/// File extension for a mime type.
pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpeg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "application/pdf" => "pdf",
        "text/plain" => "txt",
        "application/json" => "json",
        _ => "bin",
    }
}

/// Guess a mime type from magic bytes.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(b"\xff\xd8\xff") {
        Some("image/jpeg")
    } else if bytes.starts_with(b"%PDF-") {
        Some("application/pdf")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
