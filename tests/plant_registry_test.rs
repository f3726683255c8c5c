//! Plant registry scenarios across process restarts and concurrent callers.

use chrono::{Duration, NaiveDate};
use greenhouse_daq::analysis::{harvest_alerts, AlertKind};
use greenhouse_daq::clock::{Clock, ManualClock};
use greenhouse_daq::registry::{PlantRegistry, PlantStatus};
use std::sync::Arc;

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        NaiveDate::from_ymd_opt(2024, 2, 1)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap(),
    ))
}

#[test]
fn test_tomato_is_five_days_overdue_on_day_ninety_five() {
    let dir = tempfile::tempdir().unwrap();
    let clock = clock();
    let registry = PlantRegistry::open(dir.path().join("plant_records.csv"), clock.clone()).unwrap();

    let id = registry.create("Tomato", 90, "").unwrap();
    let fresh = registry.get_status(id).unwrap();
    assert_eq!(fresh.days_since_planting, 0);
    assert_eq!(fresh.status, PlantStatus::Growing);

    clock.advance(Duration::days(95));
    assert_eq!(registry.get_status(id).unwrap().days_until_harvest, -5);

    let alerts = harvest_alerts(&registry.list_all(), clock.now(), 7);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::Overdue { days_over: 5 });
}

#[test]
fn test_harvested_plants_are_never_alerted() {
    let dir = tempfile::tempdir().unwrap();
    let clock = clock();
    let registry = PlantRegistry::open(dir.path().join("plants.csv"), clock.clone()).unwrap();

    let early = registry.create("Radish", 25, "").unwrap();
    let late = registry.create("Pumpkin", 10, "").unwrap();
    assert!(registry.update_status(late, PlantStatus::Harvested, None).unwrap());

    for days in [0, 20, 30, 400] {
        clock.set(
            NaiveDate::from_ymd_opt(2024, 2, 1)
                .unwrap()
                .and_hms_opt(6, 0, 0)
                .unwrap()
                + Duration::days(days),
        );
        let alerts = harvest_alerts(&registry.list_all(), clock.now(), 7);
        assert!(alerts.iter().all(|a| a.plant_id != late));
        assert_eq!(alerts.iter().any(|a| a.plant_id == early), days >= 18);
    }
}

#[test]
fn test_ids_stay_unique_across_deletes_and_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plant_records.csv");
    let clock = clock();

    let mut seen = Vec::new();
    for round in 0..3 {
        let registry = PlantRegistry::open(&path, clock.clone()).unwrap();
        let a = registry.create(&format!("A{round}"), 10, "").unwrap();
        let b = registry.create(&format!("B{round}"), 10, "").unwrap();
        assert!(registry.delete(b).unwrap());
        seen.extend([a, b]);
    }

    let mut deduped = seen.clone();
    deduped.sort_unstable();
    deduped.dedup();
    assert_eq!(deduped.len(), seen.len());
}

#[test]
fn test_concurrent_creates_are_serialized() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(
        PlantRegistry::open(dir.path().join("plant_records.csv"), clock()).unwrap(),
    );

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let registry = registry.clone();
            std::thread::spawn(move || {
                (0..5)
                    .map(|i| registry.create(&format!("p{t}-{i}"), 30, "").unwrap())
                    .collect::<Vec<u64>>()
            })
        })
        .collect();

    let mut ids: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, (1..=40).collect::<Vec<u64>>());

    // Nothing was lost on disk either
    let reopened = PlantRegistry::open(registry.path(), clock()).unwrap();
    assert_eq!(reopened.len(), 40);
}
