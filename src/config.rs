//! Configuration System using Figment
//!
//! Configuration is loaded from:
//! 1. `config/greenhouse.toml` (base configuration, optional)
//! 2. Environment variables prefixed with `GREENHOUSE_`, nested keys split on `__`
//!
//! Every section has defaults matching the behaviour of the deployed controller, so an
//! empty file (or no file at all) yields a working configuration.
//!
//! # Example
//! ```no_run
//! use greenhouse_daq::config::GreenhouseConfig;
//!
//! let config = GreenhouseConfig::load()?;
//! println!("Serial port: {}", config.serial.port);
//! # Ok::<(), greenhouse_daq::error::GreenhouseError>(())
//! ```

use crate::error::{AppResult, GreenhouseError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/greenhouse.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GreenhouseConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Serial link to the field device
    pub serial: SerialConfig,
    /// Flat-file storage locations
    pub storage: StorageConfig,
    /// Live push of the latest reading
    pub broadcast: BroadcastConfig,
    /// Pump command bus
    pub mqtt: MqttConfig,
    /// Plausibility bounds and alert windows
    pub health: HealthConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "greenhouse-daq".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Serial port settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Communication speed
    pub baud_rate: u32,
    /// How long a single read may block before the reader re-checks framing timeouts
    pub read_timeout_ms: u64,
    /// Abandon an image transfer after this many idle seconds (0 = never)
    pub image_timeout_secs: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            read_timeout_ms: 1000,
            image_timeout_secs: 0,
        }
    }
}

impl SerialConfig {
    /// Read timeout as a `Duration`
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Image idle timeout, `None` when disabled
    pub fn image_timeout(&self) -> Option<Duration> {
        (self.image_timeout_secs > 0).then(|| Duration::from_secs(self.image_timeout_secs))
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the telemetry log and plant registry
    pub data_dir: PathBuf,
    /// Telemetry log file name inside `data_dir`
    pub telemetry_file: String,
    /// Plant registry file name inside `data_dir`
    pub plant_file: String,
    /// Directory receiving captured images
    pub image_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("Data"),
            telemetry_file: "sensor_data.csv".to_string(),
            plant_file: "plant_records.csv".to_string(),
            image_dir: PathBuf::from("images"),
        }
    }
}

impl StorageConfig {
    /// Full path of the telemetry log
    pub fn telemetry_path(&self) -> PathBuf {
        self.data_dir.join(&self.telemetry_file)
    }

    /// Full path of the plant registry
    pub fn plant_path(&self) -> PathBuf {
        self.data_dir.join(&self.plant_file)
    }
}

/// Broadcaster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Push cadence in milliseconds
    pub interval_ms: u64,
    /// Per-subscriber queue depth; a full queue drops the update for that subscriber
    pub subscriber_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            subscriber_capacity: 16,
        }
    }
}

impl BroadcastConfig {
    /// Push cadence as a `Duration`
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// MQTT command bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker host name
    pub broker_host: String,
    /// Broker port
    pub broker_port: u16,
    /// Client identifier presented to the broker
    pub client_id: String,
    /// Topic receiving pump commands
    pub command_topic: String,
    /// Keep-alive interval in seconds
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "broker.hivemq.com".to_string(),
            broker_port: 1883,
            client_id: "greenhouse-daq".to_string(),
            command_topic: "yolouno/pump".to_string(),
            keep_alive_secs: 60,
        }
    }
}

/// Sensor plausibility bounds and alert windows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Latest reading older than this is reported as stale
    pub stale_after_secs: u64,
    /// Inclusive temperature range in °C
    pub temperature_range: (f64, f64),
    /// Inclusive relative humidity range in %
    pub humidity_range: (f64, f64),
    /// Inclusive soil moisture range in %
    pub soil_moisture_range: (f64, f64),
    /// Minimum plausible illuminance in lux
    pub min_lux: f64,
    /// Days before the expected harvest date at which plants are flagged
    pub harvest_window_days: i64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 120,
            temperature_range: (8.0, 50.0),
            humidity_range: (30.0, 100.0),
            soil_moisture_range: (0.0, 100.0),
            min_lux: 100.0,
            harvest_window_days: 7,
        }
    }
}

impl GreenhouseConfig {
    /// Load configuration from `config/greenhouse.toml` and environment variables
    ///
    /// Environment variables override the file with prefix `GREENHOUSE_`.
    /// Example: `GREENHOUSE_SERIAL__PORT=/dev/ttyACM0`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("GREENHOUSE_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(GreenhouseError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(GreenhouseError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.serial.baud_rate == 0 {
            return Err(GreenhouseError::Configuration(
                "serial.baud_rate must be positive".to_string(),
            ));
        }

        if self.serial.read_timeout_ms == 0 {
            return Err(GreenhouseError::Configuration(
                "serial.read_timeout_ms must be positive".to_string(),
            ));
        }

        if self.broadcast.interval_ms == 0 || self.broadcast.subscriber_capacity == 0 {
            return Err(GreenhouseError::Configuration(
                "broadcast.interval_ms and broadcast.subscriber_capacity must be positive"
                    .to_string(),
            ));
        }

        for (name, (low, high)) in [
            ("temperature_range", self.health.temperature_range),
            ("humidity_range", self.health.humidity_range),
            ("soil_moisture_range", self.health.soil_moisture_range),
        ] {
            if low > high {
                return Err(GreenhouseError::Configuration(format!(
                    "health.{name} lower bound {low} exceeds upper bound {high}"
                )));
            }
        }

        if self.health.harvest_window_days < 0 {
            return Err(GreenhouseError::Configuration(format!(
                "Invalid harvest_window_days {}. Must be >= 0",
                self.health.harvest_window_days
            )));
        }

        if self.mqtt.command_topic.is_empty() {
            return Err(GreenhouseError::Configuration(
                "mqtt.command_topic must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = GreenhouseConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.health.stale_after_secs, 120);
        assert!(config.serial.image_timeout().is_none());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = GreenhouseConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config.storage.telemetry_file, "sensor_data.csv");
        assert_eq!(config.mqtt.command_topic, "yolouno/pump");
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("greenhouse.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[serial]
port = "/dev/ttyACM1"
image_timeout_secs = 15

[health]
min_lux = 50.0
"#
        )
        .unwrap();

        let config = GreenhouseConfig::load_from(&path).unwrap();
        assert_eq!(config.serial.port, "/dev/ttyACM1");
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.serial.image_timeout(), Some(Duration::from_secs(15)));
        assert_eq!(config.health.min_lux, 50.0);
        assert_eq!(config.health.temperature_range, (8.0, 50.0));
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let mut config = GreenhouseConfig::default();
        config.application.log_level = "verbose".to_string();
        assert!(matches!(
            config.validate(),
            Err(GreenhouseError::Configuration(_))
        ));
    }

    #[test]
    fn inverted_range_is_rejected() {
        let mut config = GreenhouseConfig::default();
        config.health.humidity_range = (90.0, 30.0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("humidity_range"));
    }

    #[test]
    fn storage_paths_join_data_dir() {
        let config = StorageConfig::default();
        assert_eq!(config.telemetry_path(), PathBuf::from("Data/sensor_data.csv"));
        assert_eq!(config.plant_path(), PathBuf::from("Data/plant_records.csv"));
    }
}
