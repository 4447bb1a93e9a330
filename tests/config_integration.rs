use assistant_chat::config::AppConfig;
use serial_test::serial;
use std::env;
use std::fs;
use std::io::Write;
use std::time::Duration;

const BIN: &str = "assistant-chat";

// Clear environment variables that might interfere with tests
fn clear_env_vars() {
    unsafe {
        for key in [
            "CONFIG_FILE",
            "PORT",
            "OPENAI_API_KEY",
            "OPENAI_BASE_URL",
            "OPENAI_MODEL",
            "CHAT_SERVER__PORT",
            "CHAT_GATEWAY__API_KEY",
            "CHAT_ASSISTANT__MODEL",
            "CHAT_POLLING__INTERVAL_MS",
            "CHAT_POLLING__MAX_WAIT_SECS",
        ] {
            env::remove_var(key);
        }
    }
}

fn yaml_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("Failed to create temp config");
    file.write_all(content.as_bytes())
        .expect("Failed to write temp config");
    file
}

#[test]
#[serial]
fn test_default_config() {
    clear_env_vars();

    let config = AppConfig::load_from_args([BIN]).expect("defaults should load");

    assert_eq!(config.server.port, 3000);
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.gateway.base_url, "https://api.openai.com");
    assert_eq!(config.gateway.request_timeout_secs, 60);
    assert_eq!(config.assistant.name, "Default Assistant");
    assert_eq!(config.assistant.instructions, "");
    assert_eq!(config.assistant.model, "gpt-4o-mini");

    let policy = config.poll_policy();
    assert_eq!(policy.interval, Duration::from_secs(1));
    assert_eq!(policy.max_wait, Some(Duration::from_secs(600)));

    // No key anywhere: the gateway cannot be built.
    assert!(config.gateway_settings().is_err());
}

#[test]
#[serial]
fn test_env_override() {
    clear_env_vars();
    unsafe {
        env::set_var("CHAT_SERVER__PORT", "9090");
        env::set_var("CHAT_POLLING__INTERVAL_MS", "250");
        env::set_var("CHAT_POLLING__MAX_WAIT_SECS", "0");
        env::set_var("CHAT_ASSISTANT__MODEL", "gpt-4o");
    }

    let config = AppConfig::load_from_args([BIN]).expect("Failed to load config");
    assert_eq!(config.server.port, 9090);
    assert_eq!(config.assistant.model, "gpt-4o");

    let policy = config.poll_policy();
    assert_eq!(policy.interval, Duration::from_millis(250));
    assert_eq!(policy.max_wait, None);

    clear_env_vars();
}

#[test]
#[serial]
fn test_api_key_from_environment() {
    clear_env_vars();
    unsafe {
        env::set_var("OPENAI_API_KEY", "sk-from-env");
    }

    let config = AppConfig::load_from_args([BIN]).expect("Failed to load config");
    let settings = config.gateway_settings().expect("key should be present");
    assert_eq!(settings.api_key, "sk-from-env");
    assert_eq!(settings.request_timeout, Duration::from_secs(60));
    assert!(!format!("{config:?}").contains("sk-from-env"));

    clear_env_vars();
}

#[test]
#[serial]
fn test_file_load() {
    clear_env_vars();

    let file = yaml_file(
        r#"
server:
  port: 7070
gateway:
  api_key: sk-from-file
  organization: org-42
assistant:
  name: Helper
  instructions: Be concise.
"#,
    );
    let path = file.path().to_str().expect("utf-8 temp path");

    let config =
        AppConfig::load_from_args([BIN, "--config", path]).expect("Failed to load config from file");
    assert_eq!(config.server.port, 7070);
    assert_eq!(config.assistant.name, "Helper");
    assert_eq!(config.assistant.model, "gpt-4o-mini");

    let defaults = config.assistant_defaults();
    assert_eq!(defaults.instructions, "Be concise.");

    let settings = config.gateway_settings().expect("key from file");
    assert_eq!(settings.api_key, "sk-from-file");
    assert_eq!(settings.organization.as_deref(), Some("org-42"));
}

#[test]
#[serial]
fn test_config_file_from_env_var() {
    clear_env_vars();

    let file = yaml_file("server:\n  port: 5050\n");
    unsafe {
        env::set_var("CONFIG_FILE", file.path());
    }

    let config = AppConfig::load_from_args([BIN]).expect("Failed to load config");
    assert_eq!(config.server.port, 5050);

    clear_env_vars();
}

#[test]
#[serial]
fn test_missing_explicit_file_is_an_error() {
    clear_env_vars();

    let result = AppConfig::load_from_args([BIN, "--config", "/nonexistent/chat.yaml"]);
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_cli_overrides_env() {
    clear_env_vars();
    unsafe {
        env::set_var("CHAT_SERVER__PORT", "9090");
        env::set_var("OPENAI_MODEL", "gpt-4o");
    }

    let config = AppConfig::load_from_args([
        BIN,
        "--port",
        "8181",
        "--model",
        "gpt-4.1-mini",
        "--base-url",
        "http://localhost:8080",
        "--api-key",
        "sk-cli",
    ])
    .expect("Failed to load config");

    assert_eq!(config.server.port, 8181);
    assert_eq!(config.assistant.model, "gpt-4.1-mini");
    assert_eq!(config.gateway.base_url, "http://localhost:8080");
    assert_eq!(config.gateway_settings().unwrap().api_key, "sk-cli");

    clear_env_vars();
}

#[test]
#[serial]
fn test_cwd_config_fallback() {
    clear_env_vars();

    let cwd_path = "config.yaml";
    fs::write(cwd_path, "server:\n  port: 6060\n").expect("Failed to write ./config.yaml");

    let result = std::panic::catch_unwind(|| {
        let config = AppConfig::load_from_args([BIN]).expect("Failed to load config");
        assert_eq!(config.server.port, 6060);
    });

    fs::remove_file(cwd_path).unwrap();

    if let Err(e) = result {
        std::panic::resume_unwind(e);
    }
}
