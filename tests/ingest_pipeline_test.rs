//! End-to-end ingestion: a simulated device writes to a duplex stream, the reader task
//! demultiplexes it, and the service answers queries from what was stored.

use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use greenhouse_daq::analysis::HealthReport;
use greenhouse_daq::broadcast::run_broadcaster;
use greenhouse_daq::clock::ManualClock;
use greenhouse_daq::config::GreenhouseConfig;
use greenhouse_daq::ingest::TelemetryIngestor;
use greenhouse_daq::measurement::PumpState;
use greenhouse_daq::service::GreenhouseService;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 9, 1)
        .unwrap()
        .and_hms_opt(7, 45, 0)
        .unwrap()
}

fn open_service(dir: &tempfile::TempDir) -> (GreenhouseService, Arc<ManualClock>) {
    let mut config = GreenhouseConfig::default();
    config.storage.data_dir = dir.path().to_path_buf();
    let clock = Arc::new(ManualClock::new(start()));
    let service = GreenhouseService::open(&config, clock.clone()).expect("service opens");
    (service, clock)
}

#[tokio::test]
async fn test_interleaved_stream_is_demultiplexed() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _clock) = open_service(&dir);
    let (mut device, host) = tokio::io::duplex(64);

    let ingestor = TelemetryIngestor::new(service.store(), service.images(), service.clock());
    let reader = tokio::spawn(ingestor.run(BufReader::new(host), CancellationToken::new()));

    // Small duplex buffer forces lines to arrive split across reads
    device
        .write_all(
            b"26.5,70,55,12000,0\r\n\
              IMG_START\r\n\
              /9j/4AAQSkZJRgABAQ\r\n\
              \r\n\
              AAABAAEAAD/2wBDAA\r\n\
              IMG_END\r\n\
              \xff\xfe27.0,71,54,12100,1\r\n\
              \r\n\
              bogus\r\n",
        )
        .await
        .unwrap();
    drop(device);

    let stats = reader.await.unwrap().unwrap();
    assert_eq!(stats.sensor_records, 2);
    assert_eq!(stats.decode_faults, 1);
    assert_eq!(stats.images_saved, 1);

    let readings = service.get_tail(10);
    assert_eq!(readings.len(), 2);
    assert_eq!(readings[1].temperature, 27.0);
    assert_eq!(readings[1].pump_status, PumpState::On);

    let images: Vec<_> = std::fs::read_dir(service.images().dir())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(images.len(), 1);
    assert_eq!(
        std::fs::read(&images[0]).unwrap(),
        b"/9j/4AAQSkZJRgABAQAAABAAEAAD/2wBDAA"
    );
}

#[tokio::test]
async fn test_persisted_log_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let (service, _) = open_service(&dir);
        TelemetryIngestor::new(service.store(), service.images(), service.clock())
            .run(BufReader::new(&b"21,60,40,500,0\n22,61,41,510,1\n"[..]), CancellationToken::new())
            .await
            .unwrap();
    }

    let (reopened, _) = open_service(&dir);
    let day = reopened.get_by_date("2024-09-01").unwrap();
    assert_eq!(day.len(), 2);
    assert_eq!(reopened.get_latest().unwrap().temperature, 22.0);
}

#[tokio::test]
async fn test_health_reflects_ingested_readings() {
    let dir = tempfile::tempdir().unwrap();
    let (service, clock) = open_service(&dir);

    TelemetryIngestor::new(service.store(), service.images(), service.clock())
        .run(BufReader::new(&b"5,60,40,500,0\n"[..]), CancellationToken::new())
        .await
        .unwrap();

    clock.advance(ChronoDuration::seconds(30));
    match service.get_sensor_alerts() {
        HealthReport::Faulted { faults } => {
            assert!(faults.iter().any(|f| f.field.as_str() == "temperature"))
        }
        other => panic!("expected temperature fault, got {other:?}"),
    }

    clock.advance(ChronoDuration::minutes(3));
    assert!(matches!(
        service.get_sensor_alerts(),
        HealthReport::Stale { .. }
    ));

    let summary = service.daily_summary();
    assert_eq!(summary.avg_temperature, Some(5.0));
}

#[tokio::test]
async fn test_live_subscribers_receive_ingested_readings() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _) = open_service(&dir);
    let shutdown = CancellationToken::new();
    let (mut device, host) = tokio::io::duplex(256);

    let mut live = service.subscribe("dashboard").await;
    let reader = tokio::spawn(
        TelemetryIngestor::new(service.store(), service.images(), service.clock())
            .run(BufReader::new(host), shutdown.clone()),
    );
    let broadcaster = tokio::spawn(run_broadcaster(
        service.store(),
        service.distributor(),
        Duration::from_millis(10),
        shutdown.clone(),
    ));

    device.write_all(b"24.25,65,50,8000,1\n").await.unwrap();
    let pushed = tokio::time::timeout(Duration::from_secs(2), live.recv())
        .await
        .expect("a reading is pushed")
        .unwrap();
    assert_eq!(pushed.temperature, 24.25);

    shutdown.cancel();
    reader.await.unwrap().unwrap();
    broadcaster.await.unwrap();
}
