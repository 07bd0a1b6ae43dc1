
use super::*;
use pwmux_config::BrowserConfig;

fn args_for(config: &BrowserConfig) -> Vec<String> {
    build_args(config).unwrap()
}

#[test]
fn test_base_command_targets_playwright_mcp() {
    let args = args_for(&BrowserConfig::default());
    assert_eq!(args[0], "@playwright/mcp@latest");
}

#[test]
fn test_value_flags() {
    let config = BrowserConfig {
        browser: Some("firefox".to_string()),
        viewport_size: Some("1280x720".to_string()),
        device: Some("iPhone 15".to_string()),
        proxy_server: Some("http://proxy:8080".to_string()),
        caps: Some("vision,pdf".to_string()),
        timeout_action: Some(15000),
        timeout_navigation: Some(5000),
        image_responses: Some("allow".to_string()),
        user_agent: Some("agent".to_string()),
        output_dir: Some("/tmp/out".to_string()),
        ..Default::default()
    };
    let args = args_for(&config);

    for (flag, value) in [
        ("--browser", "firefox"),
        ("--viewport-size", "1280x720"),
        ("--device", "iPhone 15"),
        ("--proxy-server", "http://proxy:8080"),
        ("--caps", "vision,pdf"),
        ("--timeout-action", "15000"),
        ("--timeout-navigation", "5000"),
        ("--image-responses", "allow"),
        ("--user-agent", "agent"),
        ("--output-dir", "/tmp/out"),
    ] {
        let pos = args
            .iter()
            .position(|a| a == flag)
            .unwrap_or_else(|| panic!("missing {flag}"));
        assert_eq!(args[pos + 1], value, "wrong value for {flag}");
    }
}

#[test]
fn test_boolean_switches_only_when_true() {
    let config = BrowserConfig {
        headless: Some(true),
        no_sandbox: Some(true),
        isolated: Some(true),
        save_session: Some(true),
        save_trace: Some(true),
        ignore_https_errors: Some(true),
        extension: Some(true),
        ..Default::default()
    };
    let args = args_for(&config);
    for flag in [
        "--headless",
        "--no-sandbox",
        "--isolated",
        "--save-session",
        "--save-trace",
        "--ignore-https-errors",
        "--extension",
    ] {
        assert!(args.contains(&flag.to_string()), "missing {flag}");
    }

    let off = BrowserConfig {
        headless: Some(false),
        no_sandbox: Some(false),
        ..Default::default()
    };
    let args = args_for(&off);
    assert!(!args.contains(&"--headless".to_string()));
    assert!(!args.contains(&"--no-sandbox".to_string()));
}

#[test]
fn test_unset_keys_produce_no_flags() {
    let args = args_for(&BrowserConfig::default());
    assert_eq!(args.len(), 1, "unexpected flags: {args:?}");
}

#[test]
fn test_explicit_init_script_wins_over_stealth() {
    let config = BrowserConfig {
        enable_stealth: Some(true),
        init_script: Some("/custom/script.js".to_string()),
        ..Default::default()
    };
    let args = args_for(&config);
    let pos = args.iter().position(|a| a == "--init-script").unwrap();
    assert_eq!(args[pos + 1], "/custom/script.js");
}

#[test]
fn test_stealth_materializes_bundled_script() {
    let config = BrowserConfig {
        enable_stealth: Some(true),
        ..Default::default()
    };
    let args = args_for(&config);
    let pos = args.iter().position(|a| a == "--init-script").unwrap();
    let path = std::path::PathBuf::from(&args[pos + 1]);
    assert!(path.exists());
    let script = std::fs::read_to_string(path).unwrap();
    assert!(script.contains("webdriver"));
}

#[test]
fn test_extension_token_exported_via_env() {
    // Token flows through the environment, never through argv.
    let config = BrowserConfig {
        extension: Some(true),
        extension_token: Some("secret-token".to_string()),
        ..Default::default()
    };
    let args = args_for(&config);
    assert!(args.iter().all(|a| !a.contains("secret-token")));
}
