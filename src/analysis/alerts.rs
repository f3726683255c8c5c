//! Harvest timing alerts.

use crate::registry::Plant;
use chrono::NaiveDateTime;
use serde::Serialize;

/// Why a plant was flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Harvest is due within the window
    ReadySoon {
        /// Whole days until the expected harvest date
        days_left: i64,
    },
    /// The expected harvest date has passed
    Overdue {
        /// Whole days past the expected harvest date
        days_over: i64,
    },
}

/// A transient alert about one plant. Recomputed on every query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    /// Registry id of the flagged plant
    pub plant_id: u64,
    /// Name of the flagged plant
    pub plant_name: String,
    /// Human-readable alert text
    pub message: String,
    /// Why the plant was flagged
    pub kind: AlertKind,
}

/// Alerts for every unharvested plant whose harvest is at most `window_days` away or
/// already past, in registry order.
pub fn harvest_alerts(plants: &[Plant], now: NaiveDateTime, window_days: i64) -> Vec<Alert> {
    plants
        .iter()
        .filter(|plant| !plant.status.is_harvested())
        .filter_map(|plant| {
            let days = plant.days_until_harvest(now);
            let (kind, message) = if (0..=window_days).contains(&days) {
                (
                    AlertKind::ReadySoon { days_left: days },
                    format!("{} will be ready to harvest in {days} days", plant.name),
                )
            } else if days < 0 {
                (
                    AlertKind::Overdue { days_over: -days },
                    format!("{} is due for harvest", plant.name),
                )
            } else {
                return None;
            };
            Some(Alert {
                plant_id: plant.id,
                plant_name: plant.name.clone(),
                message,
                kind,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PlantStatus;
    use chrono::{Duration, NaiveDate};

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 10)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn plant(id: u64, harvest_in: Duration, status: PlantStatus) -> Plant {
        Plant {
            id,
            name: format!("plant-{id}"),
            planting_date: now() - Duration::days(60),
            expected_harvest_date: now() + harvest_in,
            notes: String::new(),
            status,
        }
    }

    #[test]
    fn flags_window_and_overdue_but_not_far_future() {
        let plants = vec![
            plant(1, Duration::days(7), PlantStatus::Growing),
            plant(2, Duration::days(8), PlantStatus::Growing),
            plant(3, Duration::hours(2), PlantStatus::Growing),
            plant(4, -Duration::days(3), PlantStatus::Other("flowering".into())),
        ];

        let alerts = harvest_alerts(&plants, now(), 7);
        let ids: Vec<u64> = alerts.iter().map(|a| a.plant_id).collect();
        assert_eq!(ids, vec![1, 3, 4]);
        assert_eq!(alerts[0].kind, AlertKind::ReadySoon { days_left: 7 });
        assert_eq!(alerts[1].kind, AlertKind::ReadySoon { days_left: 0 });
        assert_eq!(alerts[2].kind, AlertKind::Overdue { days_over: 3 });
        assert_eq!(alerts[0].message, "plant-1 will be ready to harvest in 7 days");
    }

    #[test]
    fn harvested_plants_never_alert() {
        let plants = vec![
            plant(1, Duration::days(2), PlantStatus::Harvested),
            plant(2, -Duration::days(40), PlantStatus::Harvested),
        ];
        assert!(harvest_alerts(&plants, now(), 7).is_empty());
    }

    #[test]
    fn one_second_overdue_counts_as_overdue() {
        let plants = vec![plant(1, -Duration::seconds(1), PlantStatus::Growing)];
        let alerts = harvest_alerts(&plants, now(), 7);
        assert_eq!(alerts[0].kind, AlertKind::Overdue { days_over: 1 });
    }
}
