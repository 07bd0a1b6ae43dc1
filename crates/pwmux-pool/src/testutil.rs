//! Test doubles: scripted `/bin/sh` children speaking the wire protocol.

use std::time::Duration;

use pwmux_config::{BrowserConfig, InstanceConfig, PoolConfig, PoolSettings};

use crate::command::LaunchSpec;
use crate::error::ChildError;

/// A shell stand-in for `playwright-mcp`: answers the initialize handshake,
/// echoes tool calls, and exposes hooks for timeouts, crashes, reordering
/// and protocol errors.
pub(crate) const FAKE_CHILD_SCRIPT: &str = r##"
defer_id=""
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  [ -n "$id" ] || continue
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2025-06-18","capabilities":{}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"browser_navigate"},{"name":"browser_snapshot"},{"name":"browser_take_screenshot"}]}}\n' "$id" ;;
    *'"method":"ping"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id" ;;
    *'"method":"slow_call"'*)
      sleep 2
      printf '{"jsonrpc":"2.0","id":%s,"result":{"slow":true}}\n' "$id" ;;
    *'"method":"defer"'*)
      defer_id=$id ;;
    *'"method":"flush"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"flushed":true}}\n' "$id"
      if [ -n "$defer_id" ]; then
        printf '{"jsonrpc":"2.0","id":%s,"result":{"deferred":true}}\n' "$defer_id"
        defer_id=""
      fi ;;
    *'"method":"phantom"'*)
      printf '{"jsonrpc":"2.0","id":999999,"result":{"phantom":true}}\n'
      printf '{"jsonrpc":"2.0","id":%s,"result":{"real":true}}\n' "$id" ;;
    *'"method":"progress_then_reply"'*)
      printf '{"jsonrpc":"2.0","method":"notifications/progress","params":{"progress":1,"total":2}}\n'
      printf '{"jsonrpc":"2.0","id":%s,"result":{"done":true}}\n' "$id" ;;
    *'"method":"fail_call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32000,"message":"boom"}}\n' "$id" ;;
    *'"method":"garbage"'*)
      printf 'this is not json\n' ;;
    *'"method":"die_now"'*)
      exit 3 ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"echo":%s}}\n' "$id" "$line" ;;
  esac
done
"##;

/// Variant that swallows pings, so health probes time out while tool calls
/// still work.
pub(crate) const DEAF_CHILD_SCRIPT: &str = r##"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  [ -n "$id" ] || continue
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2025-06-18","capabilities":{}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[]}}\n' "$id" ;;
    *'"method":"ping"'*)
      ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"echo":%s}}\n' "$id" "$line" ;;
  esac
done
"##;

pub(crate) fn sh_spec(script: &str) -> LaunchSpec {
    LaunchSpec {
        program: "/bin/sh".into(),
        args: vec!["-c".to_string(), script.to_string()],
        env: Vec::new(),
    }
}

/// Launcher producing well-behaved scripted children.
pub(crate) fn fake_launcher(_config: &BrowserConfig) -> Result<LaunchSpec, ChildError> {
    Ok(sh_spec(FAKE_CHILD_SCRIPT))
}

/// Launcher producing ping-deaf children.
pub(crate) fn deaf_launcher(_config: &BrowserConfig) -> Result<LaunchSpec, ChildError> {
    Ok(sh_spec(DEAF_CHILD_SCRIPT))
}

/// Launcher whose children exit immediately; instances marked "broken" in
/// their config get the dead program, the rest behave.
pub(crate) fn flaky_launcher(config: &BrowserConfig) -> Result<LaunchSpec, ChildError> {
    if config.browser.as_deref() == Some("broken") {
        Ok(LaunchSpec {
            program: "/bin/false".into(),
            args: Vec::new(),
            env: Vec::new(),
        })
    } else {
        fake_launcher(config)
    }
}

/// Pool settings tightened for tests.
pub(crate) fn test_settings() -> PoolSettings {
    PoolSettings {
        health_check_interval: Duration::from_secs(3600),
        health_failure_threshold: 2,
        startup_timeout: Duration::from_secs(10),
        call_timeout: Duration::from_secs(5),
        probe_timeout: Duration::from_millis(300),
        stop_grace: Duration::from_millis(300),
        lease_timeout: None,
    }
}

/// A pool config with `aliases.len()` instances; `Some(alias)` names one.
pub(crate) fn test_pool_config(
    name: &str,
    is_default: bool,
    aliases: &[Option<&str>],
) -> PoolConfig {
    PoolConfig {
        name: name.to_string(),
        description: format!("{name} test pool"),
        is_default,
        instances: aliases.len(),
        instance_configs: aliases
            .iter()
            .enumerate()
            .map(|(id, alias)| InstanceConfig {
                id,
                alias: alias.map(str::to_string),
                browser: BrowserConfig::default(),
            })
            .collect(),
        settings: test_settings(),
    }
}
