//! Launch command derivation for `playwright-mcp` children.
//!
//! The effective instance configuration maps onto `npx @playwright/mcp`
//! flags. The stealth init script ships embedded and is materialized to a
//! temp file on demand.

use std::path::PathBuf;

use pwmux_config::BrowserConfig;
use tracing::debug;

use crate::error::ChildError;

/// Bundled stealth init script.
const STEALTH_SCRIPT: &str = include_str!("stealth.js");

/// Fully resolved command line and environment for one child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl LaunchSpec {
    /// Derive the launch spec for an effective instance configuration.
    ///
    /// Locates `npx` on PATH and expands the config into the flag table.
    pub fn from_config(config: &BrowserConfig) -> Result<Self, ChildError> {
        let npx = which::which("npx").map_err(|_| {
            ChildError::Startup(
                "npx not found; ensure Node.js is installed and npx is in PATH".to_string(),
            )
        })?;

        let mut env = Vec::new();
        if let Some(token) = config.extension_token.as_deref() {
            if !token.is_empty() {
                env.push((
                    "PLAYWRIGHT_MCP_EXTENSION_TOKEN".to_string(),
                    token.to_string(),
                ));
            }
        }

        let spec = Self {
            program: npx,
            args: build_args(config)?,
            env,
        };
        debug!(program = %spec.program.display(), args = ?spec.args, "derived launch spec");
        Ok(spec)
    }
}

/// Expand the configuration into `@playwright/mcp` arguments.
fn build_args(config: &BrowserConfig) -> Result<Vec<String>, ChildError> {
    let mut args = vec!["@playwright/mcp@latest".to_string()];

    let mut flag = |name: &str, value: Option<&str>| {
        if let Some(value) = value {
            args.push(name.to_string());
            args.push(value.to_string());
        }
    };

    flag("--browser", config.browser.as_deref());
    flag("--device", config.device.as_deref());
    flag("--viewport-size", config.viewport_size.as_deref());
    flag("--user-data-dir", config.user_data_dir.as_deref());
    flag("--storage-state", config.storage_state.as_deref());
    flag("--allowed-origins", config.allowed_origins.as_deref());
    flag("--blocked-origins", config.blocked_origins.as_deref());
    flag("--proxy-server", config.proxy_server.as_deref());
    flag("--caps", config.caps.as_deref());
    flag("--save-video", config.save_video.as_deref());
    flag("--output-dir", config.output_dir.as_deref());
    flag(
        "--timeout-action",
        config.timeout_action.map(|v| v.to_string()).as_deref(),
    );
    flag(
        "--timeout-navigation",
        config.timeout_navigation.map(|v| v.to_string()).as_deref(),
    );
    flag("--image-responses", config.image_responses.as_deref());
    flag("--user-agent", config.user_agent.as_deref());

    // Stealth injects the bundled init script when none is configured.
    let init_script = match config.init_script.as_deref() {
        Some(path) => Some(path.to_string()),
        None if config.enable_stealth == Some(true) => {
            Some(materialize_stealth_script()?.display().to_string())
        }
        None => None,
    };
    flag("--init-script", init_script.as_deref());

    let mut switch = |name: &str, value: Option<bool>| {
        if value == Some(true) {
            args.push(name.to_string());
        }
    };

    switch("--headless", config.headless);
    switch("--no-sandbox", config.no_sandbox);
    switch("--isolated", config.isolated);
    switch("--save-session", config.save_session);
    switch("--save-trace", config.save_trace);
    switch("--ignore-https-errors", config.ignore_https_errors);
    switch("--extension", config.extension);

    Ok(args)
}

/// Write the bundled stealth script to a stable temp path.
fn materialize_stealth_script() -> Result<PathBuf, ChildError> {
    let path = std::env::temp_dir().join("pwmux_stealth.js");
    std::fs::write(&path, STEALTH_SCRIPT)
        .map_err(|e| ChildError::Startup(format!("failed to write stealth script: {e}")))?;
    Ok(path)
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
