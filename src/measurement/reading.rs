//! Decoded sensor records and the wire format of a sensor line.

use crate::error::{AppResult, GreenhouseError};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of comma-separated fields in a sensor line on the wire.
pub const SENSOR_LINE_FIELDS: usize = 5;

/// Pump relay state as reported by the device (`0` or `1` on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum PumpState {
    /// Relay open
    Off,
    /// Relay closed, water flowing
    On,
}

impl PumpState {
    /// Whether the pump is running.
    pub fn is_on(self) -> bool {
        matches!(self, PumpState::On)
    }
}

impl From<PumpState> for u8 {
    fn from(state: PumpState) -> Self {
        match state {
            PumpState::Off => 0,
            PumpState::On => 1,
        }
    }
}

impl TryFrom<u8> for PumpState {
    type Error = GreenhouseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PumpState::Off),
            1 => Ok(PumpState::On),
            other => Err(GreenhouseError::Decode(format!(
                "pump_status must be 0 or 1, got {other}"
            ))),
        }
    }
}

impl std::str::FromStr for PumpState {
    type Err = GreenhouseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0" => Ok(PumpState::Off),
            "1" => Ok(PumpState::On),
            other => Err(GreenhouseError::Decode(format!(
                "pump_status must be 0 or 1, got '{other}'"
            ))),
        }
    }
}

/// Numeric channels of a reading that can be aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorField {
    /// Air temperature in °C
    Temperature,
    /// Relative humidity in %
    Humidity,
    /// Soil moisture in %
    SoilMoisture,
    /// Illuminance in lux
    Lux,
}

impl SensorField {
    /// Every channel, in column order.
    pub const ALL: [SensorField; 4] = [
        SensorField::Temperature,
        SensorField::Humidity,
        SensorField::SoilMoisture,
        SensorField::Lux,
    ];

    /// Column name used in the telemetry log.
    pub fn as_str(self) -> &'static str {
        match self {
            SensorField::Temperature => "temperature",
            SensorField::Humidity => "humidity",
            SensorField::SoilMoisture => "soil_moisture",
            SensorField::Lux => "lux",
        }
    }
}

impl fmt::Display for SensorField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One timestamped sensor record. Immutable once appended to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Local receipt time
    pub timestamp: NaiveDateTime,
    /// Air temperature in °C
    pub temperature: f64,
    /// Relative humidity in %
    pub humidity: f64,
    /// Soil moisture in %
    pub soil_moisture: f64,
    /// Illuminance in lux
    pub lux: f64,
    /// Pump relay state
    pub pump_status: PumpState,
}

impl SensorReading {
    /// Parse a wire line `temperature,humidity,soil_moisture,lux,pump_status`.
    ///
    /// # Errors
    /// Returns `GreenhouseError::Decode` if the field count is wrong or any field
    /// fails to parse. The caller drops the line.
    pub fn from_line(line: &str, timestamp: NaiveDateTime) -> AppResult<Self> {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != SENSOR_LINE_FIELDS {
            return Err(GreenhouseError::Decode(format!(
                "expected {SENSOR_LINE_FIELDS} fields, got {}",
                fields.len()
            )));
        }

        Ok(Self {
            timestamp,
            temperature: parse_float(SensorField::Temperature, fields[0])?,
            humidity: parse_float(SensorField::Humidity, fields[1])?,
            soil_moisture: parse_float(SensorField::SoilMoisture, fields[2])?,
            lux: parse_float(SensorField::Lux, fields[3])?,
            pump_status: fields[4].parse()?,
        })
    }

    /// Value of a numeric channel.
    pub fn value(&self, field: SensorField) -> f64 {
        match field {
            SensorField::Temperature => self.temperature,
            SensorField::Humidity => self.humidity,
            SensorField::SoilMoisture => self.soil_moisture,
            SensorField::Lux => self.lux,
        }
    }
}

fn parse_float(field: SensorField, raw: &str) -> AppResult<f64> {
    raw.parse::<f64>()
        .map_err(|e| GreenhouseError::Decode(format!("invalid {field} '{raw}': {e}")))
}
