//! Supervisor for one `playwright-mcp` subprocess.
//!
//! Owns the OS process and frames its stdio as newline-delimited JSON-RPC.
//! Outbound requests carry monotonically increasing integer ids and are
//! serialized under a stdin mutex; a single reader task consumes stdout and
//! routes replies to waiters by id, so calls and liveness probes interleave
//! freely on the same pipe.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::{broadcast, oneshot, Mutex};
use tracing::{debug, error, info, warn};

use pwmux_config::BrowserConfig;

use crate::command::LaunchSpec;
use crate::error::ChildError;
use crate::rpc::{self, Incoming, RpcNotification, RpcRequest};

/// Child lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Starting,
    Ready,
    Leased,
    Failed,
    Stopped,
}

impl std::fmt::Display for ChildState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChildState::Starting => write!(f, "starting"),
            ChildState::Ready => write!(f, "ready"),
            ChildState::Leased => write!(f, "leased"),
            ChildState::Failed => write!(f, "failed"),
            ChildState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Present while the child is leased to a tool call.
#[derive(Debug, Clone)]
pub struct LeaseInfo {
    pub instance_id: usize,
    pub started_at: DateTime<Utc>,
}

/// A `notifications/progress` frame surfaced from the child.
#[derive(Debug, Clone)]
pub struct ProgressNotification {
    pub params: Value,
}

/// Deadlines governing one supervisor.
#[derive(Debug, Clone, Copy)]
pub struct ChildTimeouts {
    /// Window for spawn plus the initialize handshake.
    pub startup: Duration,
    /// Default per-call deadline.
    pub call: Duration,
    /// Deadline for a liveness probe.
    pub probe: Duration,
    /// Grace per escalation step during stop.
    pub stop_grace: Duration,
}

impl Default for ChildTimeouts {
    fn default() -> Self {
        Self {
            startup: Duration::from_secs(60),
            call: Duration::from_secs(90),
            probe: Duration::from_secs(5),
            stop_grace: Duration::from_secs(5),
        }
    }
}

type PendingMap = HashMap<u64, oneshot::Sender<Result<Value, ChildError>>>;

/// Supervisor for one child process.
pub struct ChildSupervisor {
    id: usize,
    alias: Option<String>,
    pool_name: String,
    config: BrowserConfig,
    timeouts: ChildTimeouts,

    state: RwLock<ChildState>,
    pid: RwLock<Option<u32>>,
    tools: RwLock<Vec<String>>,

    process: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    next_request_id: AtomicU64,
    pending: Arc<tokio::sync::RwLock<PendingMap>>,
    progress_tx: broadcast::Sender<ProgressNotification>,

    lease_info: RwLock<Option<LeaseInfo>>,
    last_health_ok: RwLock<Option<DateTime<Utc>>>,
    last_probe_error: RwLock<Option<String>>,
    health_failures: AtomicU32,
}

impl ChildSupervisor {
    pub fn new(
        id: usize,
        alias: Option<String>,
        pool_name: impl Into<String>,
        config: BrowserConfig,
        timeouts: ChildTimeouts,
    ) -> Self {
        let (progress_tx, _) = broadcast::channel(16);
        Self {
            id,
            alias,
            pool_name: pool_name.into(),
            config,
            timeouts,
            state: RwLock::new(ChildState::Starting),
            pid: RwLock::new(None),
            tools: RwLock::new(Vec::new()),
            process: Mutex::new(None),
            stdin: Mutex::new(None),
            next_request_id: AtomicU64::new(1),
            pending: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
            progress_tx,
            lease_info: RwLock::new(None),
            last_health_ok: RwLock::new(None),
            last_probe_error: RwLock::new(None),
            health_failures: AtomicU32::new(0),
        }
    }

    /// Spawn the process and run the MCP initialize handshake.
    ///
    /// On handshake timeout or failure the process is terminated and the
    /// child transitions to `Failed`.
    pub async fn start(self: &Arc<Self>, spec: LaunchSpec) -> Result<(), ChildError> {
        info!(
            pool = %self.pool_name,
            instance = self.id,
            program = %spec.program.display(),
            "starting playwright-mcp child"
        );

        let mut child = tokio::process::Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.env.iter().cloned())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ChildError::Startup(format!("spawn failed: {e}")))?;

        *self.pid.write() = child.id();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ChildError::Startup("failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ChildError::Startup("failed to capture stdout".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            let pool = self.pool_name.clone();
            let id = self.id;
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        warn!(pool = %pool, instance = id, "upstream[stderr] {line}");
                    }
                }
            });
        }

        *self.process.lock().await = Some(child);
        *self.stdin.lock().await = Some(stdin);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.read_stdout(stdout).await;
        });

        match tokio::time::timeout(self.timeouts.startup, self.handshake()).await {
            Ok(Ok(())) => {
                // The reader may have failed the child right after the
                // handshake replies arrived; never resurrect it.
                let became_ready = {
                    let mut state = self.state.write();
                    if *state == ChildState::Starting {
                        *state = ChildState::Ready;
                        true
                    } else {
                        false
                    }
                };
                if !became_ready {
                    self.abort_startup().await;
                    return Err(ChildError::Startup(
                        "child exited during startup".to_string(),
                    ));
                }
                *self.last_health_ok.write() = Some(Utc::now());
                info!(
                    pool = %self.pool_name,
                    instance = self.id,
                    pid = ?self.pid(),
                    tools = self.tools.read().len(),
                    "child ready"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                error!(pool = %self.pool_name, instance = self.id, error = %e, "handshake failed");
                self.abort_startup().await;
                Err(ChildError::Startup(format!("initialize handshake failed: {e}")))
            }
            Err(_) => {
                error!(
                    pool = %self.pool_name,
                    instance = self.id,
                    timeout = ?self.timeouts.startup,
                    "startup window elapsed"
                );
                self.abort_startup().await;
                Err(ChildError::Startup(format!(
                    "child did not become ready within {:?}",
                    self.timeouts.startup
                )))
            }
        }
    }

    async fn handshake(&self) -> Result<(), ChildError> {
        let init_params = json!({
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "clientInfo": {
                "name": "pwmux",
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        self.call_raw("initialize", init_params, self.timeouts.startup)
            .await?;

        self.send_notification("notifications/initialized", Value::Null)
            .await?;

        let listing = self
            .call_raw("tools/list", json!({}), self.timeouts.startup)
            .await?;
        let names: Vec<String> = listing
            .get("tools")
            .and_then(Value::as_array)
            .map(|tools| {
                tools
                    .iter()
                    .filter_map(|t| t.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        *self.tools.write() = names;

        Ok(())
    }

    async fn abort_startup(&self) {
        {
            let mut state = self.state.write();
            if *state != ChildState::Stopped {
                *state = ChildState::Failed;
            }
        }
        self.fail_pending(|| ChildError::ChildGone).await;
        *self.stdin.lock().await = None;
        if let Some(mut child) = self.process.lock().await.take() {
            let _ = child.kill().await;
        }
    }

    /// Invoke a tool or MCP method on the child.
    ///
    /// On timeout the waiter is removed and the child stays usable; the late
    /// reply, if any, is discarded by the reader.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, ChildError> {
        match self.state() {
            ChildState::Ready | ChildState::Leased => {}
            ChildState::Starting => {
                return Err(ChildError::Startup(
                    "initialize handshake not complete".to_string(),
                ))
            }
            ChildState::Failed | ChildState::Stopped => return Err(ChildError::ChildGone),
        }
        self.call_raw(method, params, timeout.unwrap_or(self.timeouts.call))
            .await
    }

    /// Liveness probe: an MCP `ping` with a short deadline, sharing the
    /// stdio pair with in-flight tool calls. Never queued behind leases.
    pub async fn probe(&self) -> Result<(), ChildError> {
        match self.state() {
            ChildState::Failed | ChildState::Stopped => return Err(ChildError::ChildGone),
            _ => {}
        }
        self.call_raw("ping", json!({}), self.timeouts.probe)
            .await
            .map(|_| ())
    }

    async fn call_raw(
        &self,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, ChildError> {
        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let request = RpcRequest::new(id, method, params);
        let frame = serde_json::to_string(&request)?;

        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(id, tx);

        if let Err(e) = self.write_frame(&frame).await {
            self.pending.write().await.remove(&id);
            warn!(
                pool = %self.pool_name,
                instance = self.id,
                method,
                error = %e,
                "stdin write failed; failing child"
            );
            self.fail_from_io().await;
            return Err(ChildError::ChildGone);
        }

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ChildError::ChildGone),
            Err(_) => {
                self.pending.write().await.remove(&id);
                debug!(
                    pool = %self.pool_name,
                    instance = self.id,
                    method,
                    id,
                    "call deadline elapsed; any late reply will be dropped"
                );
                Err(ChildError::Timeout {
                    method: method.to_string(),
                    after_ms: deadline.as_millis() as u64,
                })
            }
        }
    }

    async fn send_notification(&self, method: &str, params: Value) -> Result<(), ChildError> {
        let frame = serde_json::to_string(&RpcNotification::new(method, params))?;
        self.write_frame(&frame).await
    }

    async fn write_frame(&self, frame: &str) -> Result<(), ChildError> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(ChildError::ChildGone)?;
        stdin.write_all(frame.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Single reader task: routes replies by id, surfaces progress
    /// notifications, and fails the child on EOF or an unparseable frame.
    async fn read_stdout(self: Arc<Self>, stdout: ChildStdout) {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match rpc::decode_line(trimmed) {
                        Ok(Incoming::Response(response)) => {
                            let waiter = self.pending.write().await.remove(&response.id);
                            match waiter {
                                Some(tx) => {
                                    let outcome = match response.error {
                                        Some(err) => Err(ChildError::Remote {
                                            code: err.code,
                                            message: err.message,
                                        }),
                                        None => Ok(response.result.unwrap_or(Value::Null)),
                                    };
                                    let _ = tx.send(outcome);
                                }
                                None => {
                                    debug!(
                                        pool = %self.pool_name,
                                        instance = self.id,
                                        id = response.id,
                                        "dropping reply to unknown or timed-out request"
                                    );
                                }
                            }
                        }
                        Ok(Incoming::Notification(notification)) => {
                            if notification.method == "notifications/progress" {
                                let _ = self.progress_tx.send(ProgressNotification {
                                    params: notification.params,
                                });
                            }
                        }
                        Err(e) => {
                            error!(
                                pool = %self.pool_name,
                                instance = self.id,
                                error = %e,
                                "unparseable frame from child; failing instance"
                            );
                            self.fail_from_io().await;
                            return;
                        }
                    }
                }
                Ok(None) | Err(_) => {
                    debug!(
                        pool = %self.pool_name,
                        instance = self.id,
                        "child stdout closed"
                    );
                    self.fail_from_io().await;
                    return;
                }
            }
        }
    }

    /// Transition after an unrecoverable stdio event. During shutdown the
    /// waiters complete with `Cancelled` and the state stays `Stopped`.
    async fn fail_from_io(&self) {
        let stopping = {
            let mut state = self.state.write();
            match *state {
                ChildState::Stopped => true,
                _ => {
                    *state = ChildState::Failed;
                    false
                }
            }
        };
        if stopping {
            self.fail_pending(|| ChildError::Cancelled).await;
        } else {
            warn!(pool = %self.pool_name, instance = self.id, "child marked failed");
            self.fail_pending(|| ChildError::ChildGone).await;
        }
    }

    async fn fail_pending(&self, err: impl Fn() -> ChildError) {
        let waiters: Vec<_> = {
            let mut pending = self.pending.write().await;
            pending.drain().map(|(_, tx)| tx).collect()
        };
        for tx in waiters {
            let _ = tx.send(Err(err()));
        }
    }

    /// Graceful stop: close stdin, wait, SIGTERM, wait, SIGKILL.
    pub async fn stop(&self, grace: Duration) {
        {
            let mut state = self.state.write();
            if *state == ChildState::Stopped {
                return;
            }
            *state = ChildState::Stopped;
        }
        info!(pool = %self.pool_name, instance = self.id, "stopping child");

        self.fail_pending(|| ChildError::Cancelled).await;
        *self.stdin.lock().await = None;

        let Some(mut child) = self.process.lock().await.take() else {
            return;
        };

        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            debug!(pool = %self.pool_name, instance = self.id, "child exited after stdin close");
            return;
        }

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }

        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            debug!(pool = %self.pool_name, instance = self.id, "child exited after SIGTERM");
            return;
        }

        warn!(pool = %self.pool_name, instance = self.id, "child ignored SIGTERM; killing");
        let _ = child.kill().await;
        let _ = child.wait().await;
    }

    // --- lease bookkeeping (driven by the pool) ---

    pub(crate) fn mark_leased(&self) {
        let mut state = self.state.write();
        if *state == ChildState::Ready {
            *state = ChildState::Leased;
        }
        *self.lease_info.write() = Some(LeaseInfo {
            instance_id: self.id,
            started_at: Utc::now(),
        });
    }

    pub(crate) fn mark_released(&self) {
        let mut state = self.state.write();
        if *state == ChildState::Leased {
            *state = ChildState::Ready;
        }
        *self.lease_info.write() = None;
    }

    pub(crate) fn mark_failed(&self) {
        let mut state = self.state.write();
        if *state != ChildState::Stopped {
            *state = ChildState::Failed;
        }
    }

    // --- health bookkeeping (driven by the pool's health loop) ---

    pub(crate) fn record_probe_ok(&self) {
        self.health_failures.store(0, Ordering::SeqCst);
        *self.last_health_ok.write() = Some(Utc::now());
        *self.last_probe_error.write() = None;
    }

    pub(crate) fn record_probe_failure(&self, error: &ChildError) -> u32 {
        *self.last_probe_error.write() = Some(error.to_string());
        self.health_failures.fetch_add(1, Ordering::SeqCst) + 1
    }

    // --- accessors ---

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn state(&self) -> ChildState {
        *self.state.read()
    }

    pub fn pid(&self) -> Option<u32> {
        *self.pid.read()
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    pub fn lease_info(&self) -> Option<LeaseInfo> {
        self.lease_info.read().clone()
    }

    pub fn last_health_ok(&self) -> Option<DateTime<Utc>> {
        *self.last_health_ok.read()
    }

    pub fn last_probe_error(&self) -> Option<String> {
        self.last_probe_error.read().clone()
    }

    /// Tool names discovered during the handshake.
    pub fn tools(&self) -> Vec<String> {
        self.tools.read().clone()
    }

    /// Subscribe to `notifications/progress` frames from this child.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressNotification> {
        self.progress_tx.subscribe()
    }
}

#[cfg(test)]
#[path = "child_tests.rs"]
mod tests;
