//! Binary interception: replace oversize base64 payloads with blob
//! references.
//!
//! A string field is intercepted iff its decoded size is strictly greater
//! than the inline threshold AND one of:
//!
//! - it is a `data:<mime>;base64,` URI,
//! - its characters fit the standard base64 alphabet (padding included), or
//! - the tool is in the forced set and the field name is a known binary key,
//!   in which case embedded whitespace is tolerated before decoding.
//!
//! Strings already of the form `blob://...` are never rewritten, which makes
//! the transform idempotent. False positives (large text that happens to be
//! valid base64) are accepted. A field that looks binary but fails to decode
//! is logged and left untouched; the call does not fail.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;
use tracing::{debug, warn};

use pwmux_blob::{sniff_mime, BlobError, BlobStore};

/// Tools whose results are always scanned for known binary keys.
const FORCED_TOOLS: &[&str] = &[
    "browser_take_screenshot",
    "browser_screenshot",
    "browser_pdf_save",
    "browser_save_as_pdf",
];

/// Field names that commonly carry binary payloads.
const BINARY_KEYS: &[&str] = &["screenshot", "pdf", "image", "data", "bytes", "file"];

/// One path step into a JSON tree.
#[derive(Debug, Clone)]
enum Seg {
    Key(String),
    Index(usize),
}

struct Candidate {
    path: Vec<Seg>,
    bytes: Vec<u8>,
    mime: String,
    /// Field name when the parent is an object; drives sibling metadata.
    key: Option<String>,
}

/// The result transformer interposed by the dispatcher.
pub struct BinaryInterceptor {
    store: Arc<BlobStore>,
    threshold: usize,
}

impl BinaryInterceptor {
    pub fn new(store: Arc<BlobStore>, threshold: usize) -> Self {
        Self { store, threshold }
    }

    /// Transform a tool result. Inputs with no oversize binary fields come
    /// back unchanged.
    pub async fn transform(&self, tool: &str, mut result: Value) -> Result<Value, BlobError> {
        let forced = FORCED_TOOLS.contains(&tool);

        let mut candidates = Vec::new();
        self.collect(forced, &result, &mut Vec::new(), &mut candidates);
        if candidates.is_empty() {
            return Ok(result);
        }

        for candidate in candidates {
            let blob_ref = self
                .store
                .put(&candidate.bytes, &candidate.mime, &[tool.to_string()])
                .await?;
            debug!(
                tool,
                blob_id = %blob_ref.blob_id,
                size = blob_ref.size_bytes,
                "binary field moved to blob store"
            );
            apply_replacement(&mut result, &candidate, &blob_ref);
        }

        Ok(result)
    }

    fn collect(
        &self,
        forced: bool,
        value: &Value,
        path: &mut Vec<Seg>,
        out: &mut Vec<Candidate>,
    ) {
        match value {
            Value::Object(map) => {
                // MCP content items carry the payload's mime in a sibling.
                let sibling_mime = map
                    .get("mimeType")
                    .or_else(|| map.get("mime_type"))
                    .and_then(Value::as_str);
                for (key, child) in map {
                    path.push(Seg::Key(key.clone()));
                    if let Value::String(s) = child {
                        if let Some(candidate) =
                            self.inspect(forced, Some(key), sibling_mime, s, path)
                        {
                            out.push(candidate);
                        }
                    } else {
                        self.collect(forced, child, path, out);
                    }
                    path.pop();
                }
            }
            Value::Array(items) => {
                for (index, child) in items.iter().enumerate() {
                    path.push(Seg::Index(index));
                    if let Value::String(s) = child {
                        if let Some(candidate) = self.inspect(forced, None, None, s, path) {
                            out.push(candidate);
                        }
                    } else {
                        self.collect(forced, child, path, out);
                    }
                    path.pop();
                }
            }
            _ => {}
        }
    }

    /// Apply the detection heuristic to one string field.
    fn inspect(
        &self,
        forced: bool,
        key: Option<&str>,
        sibling_mime: Option<&str>,
        s: &str,
        path: &[Seg],
    ) -> Option<Candidate> {
        if s.starts_with("blob://") {
            return None;
        }

        let lenient = forced && key.map(is_binary_key).unwrap_or(false);

        let (payload, uri_mime): (std::borrow::Cow<'_, str>, Option<String>) =
            match parse_data_uri(s) {
                Some((mime, payload)) => (payload.into(), Some(mime)),
                None if lenient => {
                    let stripped: String =
                        s.chars().filter(|c| !c.is_ascii_whitespace()).collect();
                    if !is_base64_profile(&stripped) {
                        return None;
                    }
                    (stripped.into(), None)
                }
                None => {
                    if !is_base64_profile(s) {
                        return None;
                    }
                    (s.into(), None)
                }
            };

        // Cheap size gate before decoding: 4 encoded chars per 3 bytes.
        if payload.len() / 4 * 3 <= self.threshold {
            return None;
        }

        let bytes = match BASE64.decode(payload.as_bytes()) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "binary-looking field failed base64 decode; leaving as-is");
                return None;
            }
        };
        if bytes.len() <= self.threshold {
            return None;
        }

        let mime = uri_mime
            .or_else(|| sibling_mime.map(str::to_string))
            .or_else(|| sniff_mime(&bytes).map(str::to_string))
            .or_else(|| key.and_then(mime_for_key).map(str::to_string))
            .unwrap_or_else(|| "application/octet-stream".to_string());

        Some(Candidate {
            path: path.to_vec(),
            bytes,
            mime,
            key: key.map(str::to_string),
        })
    }
}

fn is_binary_key(key: &str) -> bool {
    BINARY_KEYS.contains(&key.to_ascii_lowercase().as_str())
}

fn mime_for_key(key: &str) -> Option<&'static str> {
    match key.to_ascii_lowercase().as_str() {
        "screenshot" | "image" => Some("image/png"),
        "pdf" => Some("application/pdf"),
        _ => None,
    }
}

/// `data:<mime>;base64,<payload>`
fn parse_data_uri(s: &str) -> Option<(String, String)> {
    let rest = s.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(";base64,")?;
    Some((header.to_string(), payload.to_string()))
}

/// Standard base64 alphabet with padding only at the end, length a multiple
/// of four.
fn is_base64_profile(s: &str) -> bool {
    if s.len() < 4 || s.len() % 4 != 0 {
        return false;
    }
    let trimmed = s.trim_end_matches('=');
    if s.len() - trimmed.len() > 2 {
        return false;
    }
    trimmed
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
}

/// Swap the field for the blob URI and add the three sibling keys when the
/// parent is an object.
fn apply_replacement(result: &mut Value, candidate: &Candidate, blob_ref: &pwmux_blob::BlobRef) {
    let Some((last, parents)) = candidate.path.split_last() else {
        return;
    };

    let mut target = &mut *result;
    for seg in parents {
        target = match seg {
            Seg::Key(key) => match target.get_mut(key) {
                Some(next) => next,
                None => return,
            },
            Seg::Index(index) => match target.get_mut(index) {
                Some(next) => next,
                None => return,
            },
        };
    }

    let uri = Value::String(blob_ref.uri());
    match (last, &mut *target) {
        (Seg::Key(key), Value::Object(map)) => {
            map.insert(key.clone(), uri);
            if let Some(field) = &candidate.key {
                map.insert(
                    format!("{field}_size_kb"),
                    Value::from(blob_ref.size_bytes / 1024),
                );
                map.insert(
                    format!("{field}_mime_type"),
                    Value::String(blob_ref.mime_type.clone()),
                );
                map.insert(
                    format!("{field}_expires_at"),
                    Value::String(blob_ref.expires_at.to_rfc3339()),
                );
            }
        }
        (Seg::Index(index), Value::Array(items)) => {
            if let Some(slot) = items.get_mut(*index) {
                *slot = uri;
            }
        }
        _ => {}
    }
}

#[cfg(test)]
#[path = "intercept_tests.rs"]
mod tests;
