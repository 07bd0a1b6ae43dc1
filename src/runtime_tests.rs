
use super::*;
use pwmux_config::{BrowserConfig, InstanceConfig, PoolConfig, PoolSettings};
use pwmux_pool::{ChildError, LaunchSpec};
use pwmux_proxy::ToolInvocation;
use serde_json::json;
use tempfile::TempDir;

const SCRIPT: &str = r##"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  [ -n "$id" ] || continue
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2025-06-18","capabilities":{}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[]}}\n' "$id" ;;
    *'"method":"ping"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id" ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"success":true}}\n' "$id" ;;
  esac
done
"##;

fn sh_launcher(_config: &BrowserConfig) -> Result<LaunchSpec, ChildError> {
    Ok(LaunchSpec {
        program: "/bin/sh".into(),
        args: vec!["-c".to_string(), SCRIPT.to_string()],
        env: Vec::new(),
    })
}

fn test_fleet() -> FleetConfig {
    FleetConfig {
        pools: vec![PoolConfig {
            name: "DEFAULT".to_string(),
            description: String::new(),
            is_default: true,
            instances: 1,
            instance_configs: vec![InstanceConfig {
                id: 0,
                alias: None,
                browser: BrowserConfig::default(),
            }],
            settings: PoolSettings {
                health_check_interval: Duration::from_secs(3600),
                startup_timeout: Duration::from_secs(10),
                stop_grace: Duration::from_millis(300),
                ..Default::default()
            },
        }],
        default_pool: "DEFAULT".to_string(),
        global: BrowserConfig::default(),
    }
}

#[tokio::test]
async fn test_full_lifecycle_with_scripted_fleet() {
    let blob_dir = TempDir::new().unwrap();
    let blob = BlobConfig {
        storage_root: blob_dir.path().to_path_buf(),
        ..Default::default()
    };

    let runtime = ProxyRuntime::start_with_launcher(
        test_fleet(),
        blob,
        Arc::new(PassthroughPostprocessor),
        sh_launcher,
    )
    .await
    .unwrap();

    // S1 shape: one call leases instance 0 and comes back whole.
    let dispatcher = runtime.dispatcher();
    let invocation =
        ToolInvocation::new("browser_navigate", json!({"url": "https://example.com"})).unwrap();
    let result = dispatcher.dispatch(invocation).await.unwrap();
    assert_eq!(result, json!({"success": true}));

    let status = dispatcher.pool_status(None).unwrap();
    assert_eq!(status["summary"]["total_instances"], 1);
    assert_eq!(status["summary"]["healthy_instances"], 1);
    assert_eq!(status["summary"]["leased_instances"], 0);

    runtime.shutdown(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_start_from_map_rejects_bad_config() {
    // No pools defined: fatal before anything spawns.
    let env = EnvMap::new();
    let err = ProxyRuntime::start_from_map(&env).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Config(ConfigError::NoPools)));
}

#[tokio::test]
async fn test_shutdown_rejects_subsequent_dispatch() {
    let blob_dir = TempDir::new().unwrap();
    let blob = BlobConfig {
        storage_root: blob_dir.path().to_path_buf(),
        ..Default::default()
    };

    let runtime = ProxyRuntime::start_with_launcher(
        test_fleet(),
        blob,
        Arc::new(PassthroughPostprocessor),
        sh_launcher,
    )
    .await
    .unwrap();

    let dispatcher = runtime.dispatcher();
    runtime.shutdown(Duration::from_millis(300)).await;

    let invocation = ToolInvocation::new("browser_click", json!({})).unwrap();
    let err = dispatcher.dispatch(invocation).await.unwrap_err();
    assert_eq!(err.kind(), "shutting_down");
}
