//! Seam to the external ARIA parsing and query machinery.
//!
//! The YAML→tree parser and the JMESPath engine live outside this crate; the
//! dispatcher drives them through [`SnapshotPostprocessor`]. The bundled
//! [`PassthroughPostprocessor`] understands JSON payloads and `children`
//! hierarchies, enough for hosts that post-process snapshots elsewhere (and
//! for tests).

use serde_json::{json, Value};

/// Output rendering for snapshot pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Yaml,
}

impl OutputFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "yaml" => Some(OutputFormat::Yaml),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Yaml => "yaml",
        }
    }
}

/// Post-processing of raw snapshot payloads: parse, flatten, query, render.
pub trait SnapshotPostprocessor: Send + Sync {
    /// Parse the raw snapshot text into a tree.
    fn parse_snapshot(&self, raw: &str) -> Result<Value, String>;

    /// Flatten a `children`-nested tree into a depth-first node list.
    fn flatten(&self, tree: &Value) -> Value;

    /// Apply a query expression to the (possibly flattened) tree.
    fn query(&self, tree: &Value, expression: &str) -> Result<Value, String>;

    /// Render one page of items.
    fn format(&self, items: &Value, format: OutputFormat) -> String;
}

/// Minimal implementation with no external engines.
///
/// Parses JSON payloads (non-JSON text becomes a single string node),
/// flattens `children` arrays depth-first with `_depth` / `_parent_role` /
/// `_index` annotations, rejects queries, and renders JSON for either output
/// format (a YAML emitter is the host's concern).
#[derive(Debug, Default)]
pub struct PassthroughPostprocessor;

impl SnapshotPostprocessor for PassthroughPostprocessor {
    fn parse_snapshot(&self, raw: &str) -> Result<Value, String> {
        match serde_json::from_str(raw) {
            Ok(value) => Ok(value),
            Err(_) => Ok(Value::String(raw.to_string())),
        }
    }

    fn flatten(&self, tree: &Value) -> Value {
        let mut out = Vec::new();
        match tree {
            Value::Array(nodes) => {
                for node in nodes {
                    flatten_node(node, 0, None, &mut out);
                }
            }
            other => flatten_node(other, 0, None, &mut out),
        }
        for (index, node) in out.iter_mut().enumerate() {
            if let Value::Object(map) = node {
                map.insert("_index".to_string(), Value::from(index));
            }
        }
        Value::Array(out)
    }

    fn query(&self, _tree: &Value, _expression: &str) -> Result<Value, String> {
        Err("no query engine configured".to_string())
    }

    fn format(&self, items: &Value, _format: OutputFormat) -> String {
        serde_json::to_string_pretty(items).unwrap_or_else(|_| "null".to_string())
    }
}

fn flatten_node(node: &Value, depth: usize, parent_role: Option<&str>, out: &mut Vec<Value>) {
    let Value::Object(map) = node else {
        out.push(json!({
            "value": node,
            "_depth": depth,
            "_parent_role": parent_role,
        }));
        return;
    };

    let role = map.get("role").and_then(Value::as_str).map(str::to_string);
    let mut flat = map.clone();
    let children = flat.remove("children");
    flat.insert("_depth".to_string(), Value::from(depth));
    flat.insert(
        "_parent_role".to_string(),
        parent_role.map(|r| Value::String(r.to_string())).unwrap_or(Value::Null),
    );
    out.push(Value::Object(flat));

    if let Some(Value::Array(children)) = children {
        for child in &children {
            flatten_node(child, depth + 1, role.as_deref(), out);
        }
    }
}

/// Pull the snapshot text out of an MCP tool result's content array.
pub fn extract_snapshot_text(result: &Value) -> Option<String> {
    let content = result.get("content")?.as_array()?;
    content.iter().find_map(|item| {
        (item.get("type")?.as_str()? == "text")
            .then(|| item.get("text")?.as_str().map(str::to_string))
            .flatten()
    })
}

#[cfg(test)]
#[path = "aria_tests.rs"]
mod tests;
