//! Configuration loading and validation tests
//!
//! Tests focus on the observable outcome of loading a file: what parses,
//! what defaults apply, and which mistakes are rejected.

use amr_console::config::{ConfigError, ConsoleConfig};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

const MINIMAL: &str = r#"
[iot]
region = "ap-northeast-1"
endpoint = "abc123-ats.iot.ap-northeast-1.amazonaws.com"
thing_name = "AMR-001"
shadow_name = "robot"

[identity]
identity_pool_id = "ap-northeast-1:00000000-0000-0000-0000-000000000000"
user_pool_id = "ap-northeast-1_POOL"

[console]
destinations = ["A-01", "B-02"]
"#;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    write!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(MINIMAL);

    let config = ConsoleConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.iot.region, "ap-northeast-1");
    assert_eq!(config.iot.thing_name, "AMR-001");
    assert_eq!(config.console.destinations, vec!["A-01", "B-02"]);
    assert_eq!(config.console.bind, "127.0.0.1:8080");
    assert_eq!(config.liveness.tick_interval_ms, 1000);
    assert_eq!(config.transport.keep_alive_secs, 60);
    assert_eq!(config.identity.endpoint, None);
}

#[test]
fn test_config_loads_with_all_sections() {
    let content = format!(
        r#"{MINIMAL}
[liveness]
tick_interval_ms = 500
soft_threshold_ms = 10000
hard_threshold_ms = 60000
resync_cooldown_ms = 5000

[reconnect]
initial_delay_ms = 500
max_delay_ms = 10000
multiplier = 3
max_attempts = 8

[transport]
keep_alive_secs = 30
connect_timeout_secs = 5
clean_session = false
"#
    );
    let temp_file = write_config(&content);

    let config = ConsoleConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.liveness.soft_threshold_ms, 10_000);
    assert_eq!(config.liveness.hard_threshold_ms, 60_000);
    assert_eq!(config.reconnect.multiplier, 3);
    assert_eq!(config.reconnect.max_attempts, Some(8));
    assert!(!config.transport.clean_session);
}

#[test]
fn test_missing_file_is_read_error() {
    let result = ConsoleConfig::load_from_file(Path::new("/nonexistent/amr-console.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_parse_error() {
    let temp_file = write_config("[iot\nregion = ");
    let result = ConsoleConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_missing_required_section_is_parse_error() {
    let temp_file = write_config(
        r#"
[iot]
region = "us-east-1"
endpoint = "example.com"
thing_name = "AMR-001"
shadow_name = "robot"
"#,
    );
    let result = ConsoleConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_invalid_thing_name_rejected_on_load() {
    let temp_file = write_config(&MINIMAL.replace("AMR-001", "AMR/001"));
    let result = ConsoleConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidThingName(_))));
}

#[test]
fn test_soft_threshold_above_hard_rejected_on_load() {
    let content = format!(
        "{MINIMAL}\n[liveness]\nsoft_threshold_ms = 200000\nhard_threshold_ms = 100000\n"
    );
    let temp_file = write_config(&content);
    let result = ConsoleConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_config_round_trips_through_show_output() {
    let config = ConsoleConfig::from_toml_str(MINIMAL).unwrap();
    let rendered = toml::to_string_pretty(&config).unwrap();
    let reparsed = ConsoleConfig::from_toml_str(&rendered).unwrap();
    assert_eq!(config, reparsed);
}
