//! Plant lifecycle records.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Column header of the plant registry file.
pub const PLANT_HEADER: [&str; 6] = [
    "plant_id",
    "plant_name",
    "planting_date",
    "expected_harvest_date",
    "notes",
    "status",
];

/// Where a plant is in its grow cycle.
///
/// `growing` and `harvested` are recognised case-insensitively; anything else is kept
/// verbatim so hand-edited registries survive a load/save cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PlantStatus {
    /// Planted and not yet harvested (the default for new plants)
    #[default]
    Growing,
    /// Done; never alerted again
    Harvested,
    /// Any other operator-supplied status
    Other(String),
}

impl PlantStatus {
    /// Token stored in the registry file.
    pub fn as_str(&self) -> &str {
        match self {
            PlantStatus::Growing => "growing",
            PlantStatus::Harvested => "harvested",
            PlantStatus::Other(other) => other,
        }
    }

    /// Whether the plant has been harvested.
    pub fn is_harvested(&self) -> bool {
        matches!(self, PlantStatus::Harvested)
    }
}

impl From<&str> for PlantStatus {
    fn from(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("growing") {
            PlantStatus::Growing
        } else if trimmed.eq_ignore_ascii_case("harvested") {
            PlantStatus::Harvested
        } else {
            PlantStatus::Other(trimmed.to_string())
        }
    }
}

impl From<String> for PlantStatus {
    fn from(raw: String) -> Self {
        PlantStatus::from(raw.as_str())
    }
}

impl From<PlantStatus> for String {
    fn from(status: PlantStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for PlantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracked plant, as stored in the registry file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plant {
    /// Identifier assigned at creation, never reused
    #[serde(rename = "plant_id")]
    pub id: u64,
    /// Operator-chosen name
    #[serde(rename = "plant_name")]
    pub name: String,
    /// Creation time, to whole seconds
    #[serde(with = "registry_datetime")]
    pub planting_date: NaiveDateTime,
    /// Planting date plus the growth period
    #[serde(with = "registry_datetime")]
    pub expected_harvest_date: NaiveDateTime,
    /// Free-form notes
    #[serde(default)]
    pub notes: String,
    /// Lifecycle status
    #[serde(default)]
    pub status: PlantStatus,
}

impl Plant {
    /// Whole days since planting at `now`, rounded toward negative infinity.
    pub fn days_since_planting(&self, now: NaiveDateTime) -> i64 {
        whole_days(now - self.planting_date)
    }

    /// Whole days left until the expected harvest at `now`; negative once overdue.
    pub fn days_until_harvest(&self, now: NaiveDateTime) -> i64 {
        whole_days(self.expected_harvest_date - now)
    }

    /// Derived view at `now`.
    pub fn status_view(&self, now: NaiveDateTime) -> PlantStatusView {
        PlantStatusView {
            plant_id: self.id,
            plant_name: self.name.clone(),
            days_since_planting: self.days_since_planting(now),
            days_until_harvest: self.days_until_harvest(now),
            status: self.status.clone(),
            notes: self.notes.clone(),
        }
    }
}

/// A plant's current status with derived timing fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlantStatusView {
    /// Registry id
    pub plant_id: u64,
    /// Plant name
    pub plant_name: String,
    /// Whole days since planting
    pub days_since_planting: i64,
    /// Whole days until harvest; negative once overdue
    pub days_until_harvest: i64,
    /// Lifecycle status
    pub status: PlantStatus,
    /// Free-form notes
    pub notes: String,
}

/// Floor of a signed duration in days. -1 second is day -1, not day 0.
pub fn whole_days(delta: Duration) -> i64 {
    delta.num_milliseconds().div_euclid(86_400_000)
}

/// `YYYY-MM-DD HH:MM:SS` datetimes; fractional seconds are tolerated on read.
pub(crate) mod registry_datetime {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&value.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<NaiveDateTime, chrono::ParseError> {
        let raw = raw.trim();
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
    }
}
