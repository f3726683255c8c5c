//! Operator-facing digests built from the aggregation functions.

use crate::analysis::aggregation::{avg_today, health_check, pump_activations_today, HealthReport};
use crate::config::HealthConfig;
use crate::measurement::{SensorField, SensorReading};
use crate::registry::Plant;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::fmt;

/// What the greenhouse looks like today.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySummary {
    /// Local calendar day the summary covers
    pub date: NaiveDate,
    /// Mean temperature of today's readings
    pub avg_temperature: Option<f64>,
    /// Mean humidity of today's readings
    pub avg_humidity: Option<f64>,
    /// Most recent reading, if any
    pub current: Option<SensorReading>,
    /// Today's readings with the pump on
    pub pump_activations: usize,
    /// Health of the latest reading
    pub health: HealthReport,
}

impl DailySummary {
    /// Summarize `readings` as of `now`.
    pub fn build(readings: &[SensorReading], now: NaiveDateTime, limits: &HealthConfig) -> Self {
        let today = now.date();
        Self {
            date: today,
            avg_temperature: avg_today(readings, SensorField::Temperature, today),
            avg_humidity: avg_today(readings, SensorField::Humidity, today),
            current: readings.last().cloned(),
            pump_activations: pump_activations_today(readings, today),
            health: health_check(readings, now, limits),
        }
    }
}

impl fmt::Display for DailySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Summary for {}", self.date)?;
        match (self.avg_temperature, &self.current) {
            (Some(avg), Some(now)) => writeln!(
                f,
                "  Temperature: {avg:.2}°C average today, {:.2}°C now",
                now.temperature
            )?,
            _ => writeln!(f, "  Temperature: no data today")?,
        }
        match (self.avg_humidity, &self.current) {
            (Some(avg), Some(now)) => writeln!(
                f,
                "  Humidity:    {avg:.2}% average today, {:.2}% now",
                now.humidity
            )?,
            _ => writeln!(f, "  Humidity:    no data today")?,
        }
        writeln!(f, "  Pump ran {} times today", self.pump_activations)?;
        write!(f, "  Health: {}", self.health)
    }
}

/// One row of the harvest schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarvestEntry {
    /// Registry id
    pub plant_id: u64,
    /// Plant name
    pub plant_name: String,
    /// When the plant should be ready
    pub expected_harvest_date: NaiveDateTime,
}

/// Expected harvest date of every plant, in registry order.
pub fn harvest_schedule(plants: &[Plant]) -> Vec<HarvestEntry> {
    plants
        .iter()
        .map(|p| HarvestEntry {
            plant_id: p.id,
            plant_name: p.name.clone(),
            expected_harvest_date: p.expected_harvest_date,
        })
        .collect()
}
