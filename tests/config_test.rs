//! Integration tests for configuration loading

use parking_gate::infra::{Config, HardwareMode};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

#[test]
fn test_load_config_from_file() {
    let temp_file = write_config(
        r#"
[site]
id = "test-lot"

[spots]
thresholds = [300, 300, 300, 300]
max_raw = 4095

[access]
authorized_uids = ["03:0C:49:16", "04A22B9A5C6180"]

[gate]
passage_threshold_cm = 11.0
closing_grace_ms = 5000
max_open_ms = 30000

[passage]
echo_timeout_ms = 25

[control]
cycle_period_ms = 200
io_timeout_ms = 50

[hardware]
mode = "sim"

[mqtt]
host = "test-host"
port = 1884

[acl]
enabled = true
topic = "lot/acl"

[metrics]
interval_secs = 15
prometheus_port = 9091
"#,
    );

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "test-lot");
    assert_eq!(config.spot_thresholds(), &[300, 300, 300, 300]);
    assert_eq!(config.max_raw(), 4095);
    assert_eq!(config.authorized_uids().len(), 2);
    assert_eq!(config.authorized_uids()[1].len(), 7);
    assert_eq!(config.passage_threshold_cm(), 11.0);
    assert_eq!(config.closing_grace(), Duration::from_millis(5000));
    assert_eq!(config.max_open(), Duration::from_secs(30));
    assert_eq!(config.echo_timeout(), Duration::from_millis(25));
    assert_eq!(config.cycle_period(), Duration::from_millis(200));
    assert_eq!(config.io_timeout(), Duration::from_millis(50));
    assert_eq!(config.hardware_mode(), HardwareMode::Sim);
    assert_eq!(config.mqtt_host(), "test-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert!(config.acl_enabled());
    assert_eq!(config.acl_topic(), "lot/acl");
    assert_eq!(config.prometheus_port(), 9091);
}

#[test]
fn test_missing_sections_use_defaults() {
    let temp_file = write_config("[site]\nid = \"minimal\"\n");

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "minimal");
    assert_eq!(config.spot_thresholds(), &[500, 270, 400]);
    assert_eq!(config.authorized_uids()[0].to_hex(), "03:0C:49:16");
    assert_eq!(config.passage_threshold_cm(), 12.0);
    assert_eq!(config.closing_grace(), Duration::from_millis(2500));
    assert_eq!(config.hardware_mode(), HardwareMode::Serial);
    assert_eq!(config.mqtt_egress_availability_topic(), "parking/available");
}

#[test]
fn test_invalid_uid_rejected() {
    let temp_file = write_config("[access]\nauthorized_uids = [\"03:0C:49\"]\n");

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{:#}", err).contains("03:0C:49"));
}

#[test]
fn test_grace_longer_than_max_open_rejected() {
    let temp_file = write_config("[gate]\nclosing_grace_ms = 30000\nmax_open_ms = 20000\n");

    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_empty_spot_list_rejected() {
    let temp_file = write_config("[spots]\nthresholds = []\n");

    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_unparseable_file_rejected() {
    let temp_file = write_config("[gate\npassage_threshold_cm = ");

    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.mqtt_host(), "localhost");
    assert_eq!(config.mqtt_port(), 1883);
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_resolve_config_path_from_args() {
    let args = vec!["parking-gate".to_string(), "--config".to_string(), "lot.toml".to_string()];
    assert_eq!(Config::resolve_config_path(&args), "lot.toml");

    let args = vec!["parking-gate".to_string(), "--config=other.toml".to_string()];
    assert_eq!(Config::resolve_config_path(&args), "other.toml");
}
