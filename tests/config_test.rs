//! Tests for configuration defaults, TOML overrides and validation.

use greenhouse_daq::config::GreenhouseConfig;
use std::time::Duration;

fn parse(toml_str: &str) -> GreenhouseConfig {
    toml::from_str(toml_str).expect("Failed to parse test config")
}

#[test]
fn test_empty_file_uses_defaults() {
    let config = parse("");
    assert_eq!(config.serial.baud_rate, 115_200);
    assert_eq!(config.serial.image_timeout(), None);
    assert_eq!(config.broadcast.interval(), Duration::from_secs(1));
    assert_eq!(config.mqtt.command_topic, "yolouno/pump");
    assert_eq!(config.health.stale_after_secs, 120);
    assert_eq!(config.health.harvest_window_days, 7);
    assert!(config.validate().is_ok());
}

#[test]
fn test_partial_sections_override_only_given_keys() {
    let config = parse(
        r#"
        [serial]
        port = "/dev/ttyACM0"
        image_timeout_secs = 30

        [storage]
        data_dir = "/var/lib/greenhouse"

        [health]
        temperature_range = [10.0, 40.0]
        "#,
    );

    assert_eq!(config.serial.port, "/dev/ttyACM0");
    assert_eq!(config.serial.baud_rate, 115_200);
    assert_eq!(config.serial.image_timeout(), Some(Duration::from_secs(30)));
    assert_eq!(
        config.storage.telemetry_path(),
        std::path::Path::new("/var/lib/greenhouse/sensor_data.csv")
    );
    assert_eq!(config.health.temperature_range, (10.0, 40.0));
    assert_eq!(config.health.humidity_range, (30.0, 100.0));
    assert!(config.validate().is_ok());
}

#[test]
fn test_invalid_log_level_rejected() {
    let config = parse(
        r#"
        [application]
        log_level = "loud"
        "#,
    );
    let err = config.validate().unwrap_err().to_string();
    assert!(err.contains("log_level"));
}

#[test]
fn test_inverted_range_rejected() {
    let config = parse(
        r#"
        [health]
        humidity_range = [90.0, 30.0]
        "#,
    );
    assert!(config.validate().is_err());
}

#[test]
fn test_zero_baud_rate_rejected() {
    let config = parse(
        r#"
        [serial]
        baud_rate = 0
        "#,
    );
    assert!(config.validate().is_err());
}

#[test]
fn test_sample_config_file_loads() {
    let config = GreenhouseConfig::load_from(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/config/greenhouse.toml"
    ))
    .expect("sample config should load");
    assert!(config.validate().is_ok());
}
