//! # pwmux Blob Store
//!
//! Content-addressed, TTL-bounded on-disk storage for large binary payloads
//! (screenshots, PDFs) intercepted from tool results.
//!
//! ## Layout
//!
//! ```text
//! {root}/
//! ├── 1712345678-a1b2c3d4e5f6.png        blob data
//! ├── 1712345678-a1b2c3d4e5f6.png.meta   JSON sidecar
//! └── ...
//! ```
//!
//! There is no index file; the directory listing is authoritative. Records
//! are written temp-then-rename so a visible blob is always complete, and the
//! sidecar lands before the data file so a visible blob always has metadata.

pub mod config;
pub mod error;
pub mod store;
pub mod sweeper;
pub mod types;

pub use config::BlobStoreConfig;
pub use error::BlobError;
pub use store::{BlobData, BlobStore};
pub use sweeper::Sweeper;
pub use types::{extension_for_mime, sniff_mime, BlobMeta, BlobRef};
