//! Daily statistics and sensor health over telemetry snapshots.
//!
//! Everything here is a pure function of a reading slice and an explicit `now`; callers
//! take the snapshot (see [`TelemetryStore::with_readings`]) and nothing is cached.
//!
//! [`TelemetryStore::with_readings`]: crate::data::TelemetryStore::with_readings

use crate::config::HealthConfig;
use crate::measurement::{SensorField, SensorReading};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::fmt;

fn on_day(readings: &[SensorReading], day: NaiveDate) -> impl Iterator<Item = &SensorReading> {
    readings.iter().filter(move |r| r.timestamp.date() == day)
}

/// Mean of `field` over the readings taken on `today`, `None` without any.
pub fn avg_today(readings: &[SensorReading], field: SensorField, today: NaiveDate) -> Option<f64> {
    let (sum, count) = on_day(readings, today).fold((0.0, 0usize), |(sum, count), r| {
        (sum + r.value(field), count + 1)
    });
    (count > 0).then(|| sum / count as f64)
}

/// Number of today's readings reporting the pump on.
pub fn pump_activations_today(readings: &[SensorReading], today: NaiveDate) -> usize {
    on_day(readings, today)
        .filter(|r| r.pump_status.is_on())
        .count()
}

/// A reading field outside its plausible range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldFault {
    /// Channel that is out of range
    pub field: SensorField,
    /// Offending value
    pub value: f64,
}

/// Outcome of [`health_check`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HealthReport {
    /// The telemetry log is empty
    NoData,
    /// The latest reading is older than the staleness limit
    Stale {
        /// Receipt time of the latest reading
        last_seen: NaiveDateTime,
        /// Seconds since that reading
        age_secs: i64,
    },
    /// The latest reading is fresh but some fields are implausible
    Faulted {
        /// Every violated field, in column order
        faults: Vec<FieldFault>,
    },
    /// Fresh and plausible
    Stable,
}

impl HealthReport {
    /// Whether the latest reading is fresh and plausible.
    pub fn is_stable(&self) -> bool {
        matches!(self, HealthReport::Stable)
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthReport::NoData => write!(f, "No sensor data."),
            HealthReport::Stale { last_seen, age_secs } => write!(
                f,
                "Sensors stopped reporting (last reading {last_seen}, {age_secs}s ago); the system is faulted."
            ),
            HealthReport::Faulted { faults } => {
                write!(f, "System fault: ")?;
                for (i, fault) in faults.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} sensor abnormal ({})", fault.field, fault.value)?;
                }
                Ok(())
            }
            HealthReport::Stable => write!(f, "System is operating normally."),
        }
    }
}

/// Evaluate sensor health from the latest reading.
///
/// Rule order: empty log, then staleness, then per-field bounds. Staleness wins over
/// bounds so a dead sensor is not reported by its last implausible value.
pub fn health_check(readings: &[SensorReading], now: NaiveDateTime, limits: &HealthConfig) -> HealthReport {
    let Some(latest) = readings.last() else {
        return HealthReport::NoData;
    };

    let age = now - latest.timestamp;
    let stale_after = i64::try_from(limits.stale_after_secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX);
    if age > stale_after {
        return HealthReport::Stale {
            last_seen: latest.timestamp,
            age_secs: age.num_seconds(),
        };
    }

    let in_range = |value: f64, (low, high): (f64, f64)| (low..=high).contains(&value);
    let faults: Vec<FieldFault> = SensorField::ALL
        .iter()
        .copied()
        .filter(|&field| {
            let value = latest.value(field);
            match field {
                SensorField::Temperature => !in_range(value, limits.temperature_range),
                SensorField::Humidity => !in_range(value, limits.humidity_range),
                SensorField::SoilMoisture => !in_range(value, limits.soil_moisture_range),
                SensorField::Lux => value < limits.min_lux || value.is_nan(),
            }
        })
        .map(|field| FieldFault {
            field,
            value: latest.value(field),
        })
        .collect();

    if faults.is_empty() {
        HealthReport::Stable
    } else {
        HealthReport::Faulted { faults }
    }
}
