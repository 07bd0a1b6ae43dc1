//! The front door for every inbound tool call.
//!
//! Resolve → lease → call → intercept → snapshot-cache → release, with the
//! release guaranteed on every exit path by the pool's RAII lease guard. A
//! snapshot-cache hit skips the lease entirely: no child interaction, no
//! queueing. `browser_execute_bulk` holds a single lease across all of its
//! sub-commands.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use pwmux_blob::BlobStore;
use pwmux_pool::{ChildSupervisor, PoolRegistry};

use crate::aria::{extract_snapshot_text, OutputFormat, SnapshotPostprocessor};
use crate::error::ProxyError;
use crate::intercept::BinaryInterceptor;
use crate::snapshot::{fingerprint, SnapshotCache, SnapshotPage};

/// Tools whose results carry a pageable snapshot payload.
const SNAPSHOT_TOOLS: &[&str] = &["browser_navigate", "browser_snapshot", "browser_evaluate"];

const BULK_TOOL: &str = "browser_execute_bulk";
const STATUS_TOOL: &str = "browser_pool_status";

/// Default page size for snapshot pagination.
const DEFAULT_PAGE_LIMIT: usize = 50;
const MAX_PAGE_LIMIT: usize = 10_000;

/// One inbound tool call.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub tool: String,
    pub args: Map<String, Value>,
    pub pool: Option<String>,
    pub instance: Option<String>,
}

impl ToolInvocation {
    /// Build an invocation from a tool name and a JSON object of arguments.
    /// `browser_pool` / `browser_instance` keys inside the arguments select
    /// the target and are stripped before the call is forwarded.
    pub fn new(tool: impl Into<String>, args: Value) -> Result<Self, ProxyError> {
        let mut args = match args {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(ProxyError::InvalidParams(format!(
                    "tool arguments must be an object, got {other}"
                )))
            }
        };
        let pool = take_string(&mut args, "browser_pool");
        let instance = take_string(&mut args, "browser_instance");
        Ok(Self {
            tool: tool.into(),
            args,
            pool,
            instance,
        })
    }
}

/// Parameters controlling snapshot post-processing, stripped from the
/// forwarded arguments.
#[derive(Debug, Clone)]
struct SnapshotParams {
    cache_key: Option<String>,
    offset: usize,
    limit: usize,
    flatten: bool,
    query: Option<String>,
    output_format: OutputFormat,
    silent_mode: bool,
    pagination_given: bool,
}

impl SnapshotParams {
    fn extract(args: &mut Map<String, Value>) -> Result<Self, ProxyError> {
        let cache_key = take_string(args, "cache_key");
        let offset = take_usize(args, "offset")?;
        let limit = take_usize(args, "limit")?;
        let flatten = take_bool(args, "flatten")?.unwrap_or(false);
        let query = take_string(args, "jmespath_query");
        let silent_mode = take_bool(args, "silent_mode")?.unwrap_or(false);
        let output_format = match take_string(args, "output_format") {
            Some(raw) => OutputFormat::parse(&raw).ok_or_else(|| {
                ProxyError::InvalidParams("output_format must be 'json' or 'yaml'".to_string())
            })?,
            None => OutputFormat::Yaml,
        };

        let pagination_given = offset.is_some() || limit.is_some();
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if limit == 0 || limit > MAX_PAGE_LIMIT {
            return Err(ProxyError::InvalidParams(format!(
                "limit must be between 1 and {MAX_PAGE_LIMIT}"
            )));
        }

        let params = Self {
            cache_key,
            offset: offset.unwrap_or(0),
            limit,
            flatten,
            query,
            output_format,
            silent_mode,
            pagination_given,
        };

        // Raw ARIA snapshots are a single tree; pagination only makes sense
        // over a flattened list, a query result, or a cached entry.
        if params.pagination_given
            && !params.flatten
            && params.query.is_none()
            && params.cache_key.is_none()
        {
            return Err(ProxyError::InvalidParams(
                "pagination (offset/limit) requires flatten=true, jmespath_query, or cache_key"
                    .to_string(),
            ));
        }

        Ok(params)
    }

    fn postprocessing_requested(&self) -> bool {
        self.flatten || self.query.is_some() || self.cache_key.is_some() || self.pagination_given
    }

    fn page_index(&self) -> usize {
        self.offset / self.limit
    }
}

/// The tool dispatcher: one per proxy process, shared by all callers.
pub struct ToolDispatcher {
    registry: Arc<PoolRegistry>,
    blob_store: Arc<BlobStore>,
    snapshots: Arc<SnapshotCache>,
    interceptor: BinaryInterceptor,
    postprocessor: Arc<dyn SnapshotPostprocessor>,
    call_timeout: Option<Duration>,
}

impl ToolDispatcher {
    pub fn new(
        registry: Arc<PoolRegistry>,
        blob_store: Arc<BlobStore>,
        snapshots: Arc<SnapshotCache>,
        inline_threshold: usize,
        postprocessor: Arc<dyn SnapshotPostprocessor>,
    ) -> Self {
        Self {
            registry,
            interceptor: BinaryInterceptor::new(Arc::clone(&blob_store), inline_threshold),
            blob_store,
            snapshots,
            postprocessor,
            call_timeout: None,
        }
    }

    /// Override the per-call deadline (the child supervisor's default
    /// applies when unset).
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// The shared blob store (for hosts exposing retrieval tools).
    pub fn blob_store(&self) -> &Arc<BlobStore> {
        &self.blob_store
    }

    /// The shared snapshot cache.
    pub fn snapshots(&self) -> &Arc<SnapshotCache> {
        &self.snapshots
    }

    /// Dispatch one tool call end to end.
    pub async fn dispatch(&self, invocation: ToolInvocation) -> Result<Value, ProxyError> {
        let ToolInvocation {
            tool,
            mut args,
            pool,
            instance,
        } = invocation;

        if tool == STATUS_TOOL {
            let pool_name = take_string(&mut args, "pool_name");
            return self.pool_status(pool_name.as_deref());
        }
        if tool == BULK_TOOL {
            return self
                .dispatch_bulk(args, pool.as_deref(), instance.as_deref())
                .await;
        }

        let snapshot_params = if SNAPSHOT_TOOLS.contains(&tool.as_str()) {
            Some(SnapshotParams::extract(&mut args)?)
        } else {
            None
        };

        // Cache short-circuit: a known page needs no child at all.
        if let Some(params) = &snapshot_params {
            if let Some(key) = &params.cache_key {
                if let Some(page) = self.snapshots.lookup(key, params.page_index()) {
                    debug!(tool, cache_key = %key, "snapshot cache hit; lease skipped");
                    return Ok(page_response(key, &page));
                }
                debug!(tool, cache_key = %key, "snapshot cache miss; re-invoking child");
            }
        }

        let (pool, hint) = self
            .registry
            .resolve(pool.as_deref(), instance.as_deref())?;
        let lease = pool.lease(&hint).await?;

        let outcome = self
            .run_on_child(lease.child(), &tool, args, snapshot_params.as_ref())
            .await;
        // The lease guard releases on drop — also on the error path.
        drop(lease);
        outcome
    }

    /// The per-call pipeline once a child is in hand: forward, intercept,
    /// post-process. Shared by single calls and bulk sub-commands.
    async fn run_on_child(
        &self,
        child: &Arc<ChildSupervisor>,
        tool: &str,
        args: Map<String, Value>,
        snapshot_params: Option<&SnapshotParams>,
    ) -> Result<Value, ProxyError> {
        let raw = child
            .call(tool, Value::Object(args), self.call_timeout)
            .await?;

        let result = self.interceptor.transform(tool, raw).await?;

        match snapshot_params {
            Some(params) if params.silent_mode => Ok(json!({ "success": true })),
            Some(params) if params.postprocessing_requested() => {
                self.postprocess_snapshot(tool, &result, params)
            }
            _ => Ok(result),
        }
    }

    /// Parse, flatten, query, paginate and cache a snapshot payload, then
    /// return the requested page.
    fn postprocess_snapshot(
        &self,
        tool: &str,
        result: &Value,
        params: &SnapshotParams,
    ) -> Result<Value, ProxyError> {
        let raw_text = extract_snapshot_text(result).ok_or_else(|| {
            ProxyError::Internal(format!("no snapshot payload found in {tool} response"))
        })?;

        let parsed = self
            .postprocessor
            .parse_snapshot(&raw_text)
            .map_err(|e| ProxyError::Internal(format!("snapshot parse failed: {e}")))?;

        let mut data = if params.flatten {
            self.postprocessor.flatten(&parsed)
        } else {
            parsed
        };
        if let Some(expression) = &params.query {
            data = self
                .postprocessor
                .query(&data, expression)
                .map_err(ProxyError::InvalidParams)?;
        }

        let items: Vec<Value> = match data {
            Value::Array(items) => items,
            single => vec![single],
        };
        let total_items = items.len();

        let pages: Vec<String> = items
            .chunks(params.limit)
            .map(|chunk| {
                self.postprocessor
                    .format(&Value::Array(chunk.to_vec()), params.output_format)
            })
            .collect();
        let pages = if pages.is_empty() {
            vec![self
                .postprocessor
                .format(&Value::Array(Vec::new()), params.output_format)]
        } else {
            pages
        };

        let key = fingerprint(
            &raw_text,
            params.query.as_deref(),
            params.flatten,
            params.output_format.as_str(),
        );
        let mode = if tool == "browser_evaluate" {
            "evaluate"
        } else {
            "snapshot"
        };
        self.snapshots.store(&key, mode, pages, total_items);

        // A failed store only logs inside the cache; the lookup must hit.
        let page = self
            .snapshots
            .lookup(&key, params.page_index())
            .unwrap_or_else(|| SnapshotPage {
                page: String::new(),
                total_pages: 0,
                total_items,
                has_more: false,
            });
        Ok(page_response(&key, &page))
    }

    /// Execute a command list under a single lease (S6). Each sub-command is
    /// individually intercepted and post-processed on the same child.
    async fn dispatch_bulk(
        &self,
        mut args: Map<String, Value>,
        pool: Option<&str>,
        instance: Option<&str>,
    ) -> Result<Value, ProxyError> {
        let commands = match args.remove("commands") {
            Some(Value::Array(commands)) => commands,
            _ => {
                return Err(ProxyError::InvalidParams(
                    "commands must be a non-empty array".to_string(),
                ))
            }
        };
        if commands.is_empty() {
            return Err(ProxyError::InvalidParams(
                "commands array cannot be empty".to_string(),
            ));
        }
        let stop_on_error = take_bool(&mut args, "stop_on_error")?.unwrap_or(true);
        let return_all_results = take_bool(&mut args, "return_all_results")?.unwrap_or(false);

        // Validate shape upfront so a malformed entry fails the whole call
        // before any command runs.
        let mut parsed: Vec<(String, Map<String, Value>, bool)> = Vec::with_capacity(commands.len());
        for (index, command) in commands.into_iter().enumerate() {
            let Value::Object(mut command) = command else {
                return Err(ProxyError::InvalidParams(format!(
                    "command at index {index} is not an object"
                )));
            };
            let Some(tool) = take_string(&mut command, "tool") else {
                return Err(ProxyError::InvalidParams(format!(
                    "command at index {index} missing required 'tool' field"
                )));
            };
            if tool == BULK_TOOL {
                return Err(ProxyError::InvalidParams(
                    "browser_execute_bulk cannot be nested".to_string(),
                ));
            }
            let command_args = match command.remove("args") {
                Some(Value::Object(map)) => map,
                Some(Value::Null) | None => {
                    return Err(ProxyError::InvalidParams(format!(
                        "command at index {index} missing required 'args' field"
                    )))
                }
                Some(_) => {
                    return Err(ProxyError::InvalidParams(format!(
                        "command at index {index}: args must be an object"
                    )))
                }
            };
            let return_result = command
                .get("return_result")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            parsed.push((tool, command_args, return_result));
        }

        let total_count = parsed.len();
        info!(
            commands = total_count,
            stop_on_error, "bulk execution starting under a single lease"
        );

        let (pool, hint) = self.registry.resolve(pool, instance)?;
        let lease = pool.lease(&hint).await?;

        let mut results: Vec<Value> = Vec::with_capacity(total_count);
        let mut errors: Vec<Value> = Vec::with_capacity(total_count);
        let mut executed_count = 0usize;
        let mut stopped_at: Option<usize> = None;

        for (index, (tool, mut command_args, return_result)) in parsed.into_iter().enumerate() {
            // The whole batch runs on the one leased child; per-command
            // instance targeting is meaningless here.
            if take_string(&mut command_args, "browser_pool").is_some()
                | take_string(&mut command_args, "browser_instance").is_some()
            {
                warn!(
                    tool = %tool,
                    index,
                    "ignoring per-command browser_pool/browser_instance inside bulk"
                );
            }

            let snapshot_params = if SNAPSHOT_TOOLS.contains(&tool.as_str()) {
                match SnapshotParams::extract(&mut command_args) {
                    Ok(params) => Some(params),
                    Err(e) => {
                        results.push(Value::Null);
                        errors.push(Value::String(e.to_string()));
                        executed_count += 1;
                        if stop_on_error {
                            stopped_at = Some(index);
                            break;
                        }
                        continue;
                    }
                }
            } else {
                None
            };

            // Cache hits inside a bulk skip the child call too.
            let cached = snapshot_params.as_ref().and_then(|params| {
                let key = params.cache_key.as_deref()?;
                self.snapshots
                    .lookup(key, params.page_index())
                    .map(|page| page_response(key, &page))
            });

            let outcome = match cached {
                Some(page) => Ok(page),
                None => {
                    self.run_on_child(
                        lease.child(),
                        &tool,
                        command_args,
                        snapshot_params.as_ref(),
                    )
                    .await
                }
            };

            executed_count += 1;
            match outcome {
                Ok(result) => {
                    results.push(if return_result || return_all_results {
                        result
                    } else {
                        Value::Null
                    });
                    errors.push(Value::Null);
                }
                Err(e) => {
                    results.push(Value::Null);
                    errors.push(Value::String(e.to_string()));
                    if stop_on_error {
                        stopped_at = Some(index);
                        break;
                    }
                }
            }
        }

        drop(lease);

        // Pad the arrays when execution stopped early.
        while results.len() < total_count {
            results.push(Value::Null);
            errors.push(Value::Null);
        }

        let success = errors.iter().all(Value::is_null);
        Ok(json!({
            "success": success,
            "executed_count": executed_count,
            "total_count": total_count,
            "results": results,
            "errors": errors,
            "stopped_at": stopped_at,
        }))
    }

    /// The `browser_pool_status` surface: §4.6 per-pool detail plus fleet
    /// summary counters.
    pub fn pool_status(&self, pool: Option<&str>) -> Result<Value, ProxyError> {
        let status = self.registry.status(pool)?;
        serde_json::to_value(&status)
            .map_err(|e| ProxyError::Internal(format!("status serialization failed: {e}")))
    }
}

fn page_response(fingerprint: &str, page: &SnapshotPage) -> Value {
    json!({
        "page": page.page,
        "total_pages": page.total_pages,
        "total_items": page.total_items,
        "has_more": page.has_more,
        "fingerprint": fingerprint,
    })
}

fn take_string(args: &mut Map<String, Value>, key: &str) -> Option<String> {
    match args.remove(key) {
        Some(Value::String(s)) => Some(s),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    }
}

fn take_bool(args: &mut Map<String, Value>, key: &str) -> Result<Option<bool>, ProxyError> {
    match args.remove(key) {
        Some(Value::Bool(b)) => Ok(Some(b)),
        Some(Value::Null) | None => Ok(None),
        Some(other) => Err(ProxyError::InvalidParams(format!(
            "{key} must be a boolean, got {other}"
        ))),
    }
}

fn take_usize(args: &mut Map<String, Value>, key: &str) -> Result<Option<usize>, ProxyError> {
    match args.remove(key) {
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|v| Some(v as usize))
            .ok_or_else(|| {
                ProxyError::InvalidParams(format!("{key} must be a non-negative integer"))
            }),
        Some(Value::Null) | None => Ok(None),
        Some(other) => Err(ProxyError::InvalidParams(format!(
            "{key} must be a non-negative integer, got {other}"
        ))),
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
