//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading, validation, and error handling.

use avs_client::config::{AvsConfig, ConfigError};
use avs_client::connection::{ConnectionSettings, ReconnectPolicy};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    write!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[avs]
endpoint = "https://avs-alexa-fe.amazon.com"
api_version = "v20160207"

[auth]
token_url = "https://api.amazon.com/auth/o2/token"
refresh_token_env = "KITCHEN_DEVICE_REFRESH_TOKEN"

[connection]
ping_interval_secs = 300
reconnect_pause_ms = 500

[connection.reconnect]
max_attempts = 3
backoff_pattern_ms = [250, 500]
sustained_delay_ms = 2000
"#,
    );

    let config = AvsConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.avs.endpoint, "https://avs-alexa-fe.amazon.com");
    assert_eq!(config.auth.refresh_token_env, "KITCHEN_DEVICE_REFRESH_TOKEN");
    assert_eq!(config.auth.client_id_env, "AVS_CLIENT_ID");
    assert_eq!(config.connection.ping_interval(), Duration::from_secs(300));
    assert_eq!(config.connection.reconnect.max_attempts, 3);
}

#[test]
fn test_connection_settings_follow_config() {
    let temp_file = write_config(
        r#"
[connection]
ping_interval_secs = 120
reconnect_pause_ms = 50

[connection.reconnect]
max_attempts = 0
backoff_pattern_ms = [10, 20]
sustained_delay_ms = 40
"#,
    );

    let config = AvsConfig::load_from_file(temp_file.path()).unwrap();
    let settings = ConnectionSettings::from_config(&config.connection);

    assert_eq!(settings.ping_interval, Duration::from_secs(120));
    assert_eq!(settings.reconnect_pause, Duration::from_millis(50));
    assert_eq!(
        settings.reconnect,
        ReconnectPolicy {
            max_attempts: None,
            backoff_pattern: vec![10, 20],
            sustained_delay: 40,
        }
    );
}

#[test]
fn test_config_fails_with_missing_file() {
    let result = AvsConfig::load_from_file(Path::new("/nonexistent/avs.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_config_fails_with_invalid_toml_syntax() {
    let temp_file = write_config("[connection\nping_interval_secs = \"soon\"");

    let result = AvsConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_rejects_wrong_field_type() {
    let temp_file = write_config("[connection]\nping_interval_secs = \"four minutes\"\n");

    let result = AvsConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_validation_runs_on_load() {
    let temp_file = write_config("[auth]\ntoken_url = \"::not-a-url::\"\n");

    let result = AvsConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(msg)) if msg.contains("auth.token_url")));
}

#[test]
fn test_refresh_token_read_from_named_env_var() {
    let temp_file = write_config("[auth]\nrefresh_token_env = \"AVS_CONFIG_LOADING_TEST_REFRESH\"\n");
    let config = AvsConfig::load_from_file(temp_file.path()).unwrap();

    std::env::set_var("AVS_CONFIG_LOADING_TEST_REFRESH", "Atzr|from-env");
    assert_eq!(config.get_refresh_token().unwrap(), "Atzr|from-env");
    std::env::remove_var("AVS_CONFIG_LOADING_TEST_REFRESH");

    assert!(matches!(
        config.get_refresh_token(),
        Err(ConfigError::EnvVarNotFound(name)) if name == "AVS_CONFIG_LOADING_TEST_REFRESH"
    ));
}

#[test]
fn test_config_round_trips_through_toml() {
    let config = AvsConfig::default();
    let rendered = toml::to_string_pretty(&config).unwrap();

    assert_eq!(AvsConfig::from_toml_str(&rendered).unwrap(), config);
}
