//! Query and command surface for the presentation layer.
//!
//! [`GreenhouseService`] bundles the explicitly owned resources (stores, clock, command
//! bus, classifier) and exposes them transport-neutrally. Reads never fail on an empty
//! store; they return `None` or an empty list instead.

use crate::analysis::{
    harvest_alerts, harvest_schedule, health_check, Alert, DailySummary, HarvestEntry, HealthReport,
};
use crate::broadcast::ReadingDistributor;
use crate::classifier::{Classification, ImageClassifier};
use crate::clock::Clock;
use crate::commands::{CommandPublisher, PumpCommand};
use crate::config::{GreenhouseConfig, HealthConfig};
use crate::data::{FsImageSink, TelemetryStore};
use crate::error::{AppResult, GreenhouseError};
use crate::measurement::SensorReading;
use crate::registry::{Plant, PlantRegistry, PlantStatus, PlantStatusView};
use chrono::NaiveDate;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Date format accepted by [`GreenhouseService::get_by_date`].
pub const QUERY_DATE_FORMAT: &str = "%Y-%m-%d";

/// Everything the presentation layer can ask of the system.
pub struct GreenhouseService {
    store: Arc<TelemetryStore>,
    registry: Arc<PlantRegistry>,
    images: Arc<FsImageSink>,
    distributor: Arc<ReadingDistributor>,
    clock: Arc<dyn Clock>,
    health: HealthConfig,
    publisher: Option<Arc<dyn CommandPublisher>>,
    classifier: Option<Arc<dyn ImageClassifier>>,
    last_command: Mutex<Option<PumpCommand>>,
}

impl GreenhouseService {
    /// Open the stores named in `config`. No command bus or classifier is attached.
    pub fn open(config: &GreenhouseConfig, clock: Arc<dyn Clock>) -> AppResult<Self> {
        let storage = &config.storage;
        let store = Arc::new(TelemetryStore::open(storage.telemetry_path())?);
        let registry = Arc::new(PlantRegistry::open(storage.plant_path(), clock.clone())?);
        let images = Arc::new(FsImageSink::new(storage.data_dir.join(&storage.image_dir))?);
        let distributor = Arc::new(ReadingDistributor::new(config.broadcast.subscriber_capacity));

        Ok(Self {
            store,
            registry,
            images,
            distributor,
            clock,
            health: config.health.clone(),
            publisher: None,
            classifier: None,
            last_command: Mutex::new(None),
        })
    }

    /// Attach the pump command bus.
    pub fn with_publisher(mut self, publisher: Arc<dyn CommandPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Attach an image classifier.
    pub fn with_classifier(mut self, classifier: Arc<dyn ImageClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Shared telemetry store handle.
    pub fn store(&self) -> Arc<TelemetryStore> {
        self.store.clone()
    }

    /// Shared plant registry handle.
    pub fn registry(&self) -> Arc<PlantRegistry> {
        self.registry.clone()
    }

    /// Image sink the reader task writes captures to.
    pub fn images(&self) -> Arc<FsImageSink> {
        self.images.clone()
    }

    /// Fan-out used by the broadcaster.
    pub fn distributor(&self) -> Arc<ReadingDistributor> {
        self.distributor.clone()
    }

    /// Time source shared with the reader task.
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    // --- Telemetry ---

    /// Most recent reading, if any.
    pub fn get_latest(&self) -> Option<SensorReading> {
        self.store.latest()
    }

    /// Last `n` readings in arrival order.
    pub fn get_tail(&self, n: usize) -> Vec<SensorReading> {
        self.store.tail(n)
    }

    /// Readings of one local calendar day given as `YYYY-MM-DD`.
    pub fn get_by_date(&self, date: &str) -> AppResult<Vec<SensorReading>> {
        let day = NaiveDate::parse_from_str(date.trim(), QUERY_DATE_FORMAT).map_err(|e| {
            GreenhouseError::InvalidInput(format!("invalid date '{date}', expected YYYY-MM-DD: {e}"))
        })?;
        Ok(self.store.range_by_date(day))
    }

    /// Live feed of the latest reading, pushed by the broadcaster.
    pub async fn subscribe(&self, name: impl Into<String>) -> mpsc::Receiver<SensorReading> {
        self.distributor.subscribe(name).await
    }

    // --- Plants ---

    /// Every plant in registry order.
    pub fn list_plants(&self) -> Vec<Plant> {
        self.registry.list_all()
    }

    /// Status view of one plant at the current time.
    pub fn get_plant(&self, id: u64) -> Option<PlantStatusView> {
        self.registry.get_status(id)
    }

    /// Register a plant planted now; returns its new id.
    pub fn create_plant(&self, name: &str, growth_days: i64, notes: &str) -> AppResult<u64> {
        self.registry.create(name, growth_days, notes)
    }

    /// Remove a plant; `false` when the id is unknown.
    pub fn delete_plant(&self, id: u64) -> AppResult<bool> {
        self.registry.delete(id)
    }

    /// Set a plant's status, and its notes when non-empty notes are given.
    pub fn update_plant_status(&self, id: u64, status: &str, notes: Option<&str>) -> AppResult<bool> {
        if status.trim().is_empty() {
            return Err(GreenhouseError::InvalidInput(
                "status must not be empty".to_string(),
            ));
        }
        self.registry.update_status(id, PlantStatus::from(status), notes)
    }

    // --- Alerts and digests ---

    /// Health of the latest reading.
    pub fn get_sensor_alerts(&self) -> HealthReport {
        let now = self.clock.now();
        self.store
            .with_readings(|readings| health_check(readings, now, &self.health))
    }

    /// Harvest alerts within the configured window.
    pub fn get_harvest_alerts(&self) -> Vec<Alert> {
        harvest_alerts(
            &self.registry.list_all(),
            self.clock.now(),
            self.health.harvest_window_days,
        )
    }

    /// Today's digest.
    pub fn daily_summary(&self) -> DailySummary {
        let now = self.clock.now();
        self.store
            .with_readings(|readings| DailySummary::build(readings, now, &self.health))
    }

    /// Expected harvest dates of all plants.
    pub fn harvest_schedule(&self) -> Vec<HarvestEntry> {
        harvest_schedule(&self.registry.list_all())
    }

    // --- Upstream collaborators ---

    /// Publish `pump_on` or `pump_off`.
    ///
    /// # Errors
    /// `InvalidInput` for any other token; `Upstream` when no bus is attached or the bus
    /// refuses the command.
    pub async fn send_command(&self, action: &str) -> AppResult<PumpCommand> {
        let command: PumpCommand = action.parse()?;
        let publisher = self
            .publisher
            .as_ref()
            .ok_or_else(|| GreenhouseError::Upstream("no command bus configured".to_string()))?;

        publisher.publish(command).await?;
        *self.last_command.lock() = Some(command);
        Ok(command)
    }

    /// The last command sent since the previous call, clearing it.
    pub fn take_last_command(&self) -> Option<PumpCommand> {
        self.last_command.lock().take()
    }

    /// Classify a stored image.
    ///
    /// # Errors
    /// `InvalidInput` if the file does not exist; `Upstream` when no classifier is
    /// attached or it fails.
    pub async fn classify_image(&self, path: &Path) -> AppResult<Classification> {
        if !path.is_file() {
            return Err(GreenhouseError::InvalidInput(format!(
                "no image at {}",
                path.display()
            )));
        }
        let classifier = self
            .classifier
            .as_ref()
            .ok_or_else(|| GreenhouseError::Upstream("no image classifier configured".to_string()))?;

        match classifier.classify(path).await {
            Ok(result) => {
                info!(path = %path.display(), label = %result.label, confidence = result.confidence, "Image classified");
                Ok(result)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Image classification failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::measurement::PumpState;
    use async_trait::async_trait;
    use chrono::{Duration, NaiveDateTime};

    #[derive(Default)]
    struct RecordingPublisher {
        sent: Mutex<Vec<PumpCommand>>,
    }

    #[async_trait]
    impl CommandPublisher for RecordingPublisher {
        async fn publish(&self, command: PumpCommand) -> AppResult<()> {
            self.sent.lock().push(command);
            Ok(())
        }
    }

    struct UnreachableBus;

    #[async_trait]
    impl CommandPublisher for UnreachableBus {
        async fn publish(&self, _command: PumpCommand) -> AppResult<()> {
            Err(GreenhouseError::Upstream("broker down".to_string()))
        }
    }

    struct FixedClassifier;

    #[async_trait]
    impl ImageClassifier for FixedClassifier {
        async fn classify(&self, _path: &Path) -> AppResult<Classification> {
            Ok(Classification {
                label: "Potato___healthy".to_string(),
                confidence: 0.93,
            })
        }
    }

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 8, 15)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn service(dir: &tempfile::TempDir) -> (GreenhouseService, Arc<ManualClock>) {
        let mut config = GreenhouseConfig::default();
        config.storage.data_dir = dir.path().to_path_buf();
        let clock = Arc::new(ManualClock::new(start()));
        (GreenhouseService::open(&config, clock.clone()).unwrap(), clock)
    }

    fn reading(ts: NaiveDateTime, temperature: f64) -> SensorReading {
        SensorReading {
            timestamp: ts,
            temperature,
            humidity: 55.0,
            soil_moisture: 35.0,
            lux: 700.0,
            pump_status: PumpState::Off,
        }
    }

    #[test]
    fn empty_store_reads_as_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let (svc, _) = service(&dir);
        assert_eq!(svc.get_latest(), None);
        assert!(svc.get_tail(5).is_empty());
        assert_eq!(svc.get_sensor_alerts(), HealthReport::NoData);
        assert!(svc.get_by_date("2024-08-15").unwrap().is_empty());
    }

    #[test]
    fn get_by_date_validates_format() {
        let dir = tempfile::tempdir().unwrap();
        let (svc, _) = service(&dir);
        svc.store().append(&reading(start(), 22.0)).unwrap();

        assert_eq!(svc.get_by_date("2024-08-15").unwrap().len(), 1);
        assert!(matches!(
            svc.get_by_date("15/08/2024"),
            Err(GreenhouseError::InvalidInput(_))
        ));
    }

    #[test]
    fn sensor_alerts_follow_the_clock() {
        let dir = tempfile::tempdir().unwrap();
        let (svc, clock) = service(&dir);
        svc.store().append(&reading(start(), 5.0)).unwrap();

        clock.advance(Duration::seconds(30));
        assert!(matches!(svc.get_sensor_alerts(), HealthReport::Faulted { .. }));

        clock.advance(Duration::minutes(3));
        assert!(matches!(svc.get_sensor_alerts(), HealthReport::Stale { .. }));
    }

    #[test]
    fn plant_lifecycle_through_service() {
        let dir = tempfile::tempdir().unwrap();
        let (svc, clock) = service(&dir);

        let id = svc.create_plant("Tomato", 90, "").unwrap();
        assert_eq!(svc.get_plant(id).unwrap().days_since_planting, 0);

        clock.advance(Duration::days(85));
        assert_eq!(svc.get_harvest_alerts().len(), 1);

        assert!(svc.update_plant_status(id, "harvested", Some("12 kg")).unwrap());
        assert!(svc.get_harvest_alerts().is_empty());
        assert_eq!(svc.get_plant(id).unwrap().notes, "12 kg");
        assert_eq!(svc.harvest_schedule().len(), 1);

        assert!(svc.delete_plant(id).unwrap());
        assert!(!svc.delete_plant(id).unwrap());
        assert!(svc.get_plant(id).is_none());
    }

    #[tokio::test]
    async fn commands_need_a_bus_and_a_valid_token() {
        let dir = tempfile::tempdir().unwrap();
        let (svc, _) = service(&dir);
        assert!(matches!(
            svc.send_command("pump_on").await,
            Err(GreenhouseError::Upstream(_))
        ));

        let bus = Arc::new(RecordingPublisher::default());
        let svc = svc.with_publisher(bus.clone());
        assert!(matches!(
            svc.send_command("open_valve").await,
            Err(GreenhouseError::InvalidInput(_))
        ));
        assert_eq!(svc.send_command("pump_off").await.unwrap(), PumpCommand::Off);
        assert_eq!(*bus.sent.lock(), vec![PumpCommand::Off]);

        assert_eq!(svc.take_last_command(), Some(PumpCommand::Off));
        assert_eq!(svc.take_last_command(), None);
    }

    #[tokio::test]
    async fn unreachable_bus_is_reported_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let (svc, _) = service(&dir);
        let svc = svc.with_publisher(Arc::new(UnreachableBus));

        let err = svc.send_command("pump_on").await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(svc.take_last_command(), None);
    }

    #[tokio::test]
    async fn mqtt_bus_without_broker_is_not_recorded() {
        use crate::commands::MqttCommandPublisher;
        use crate::config::MqttConfig;
        use tokio_util::sync::CancellationToken;

        let dir = tempfile::tempdir().unwrap();
        let (svc, _) = service(&dir);
        let shutdown = CancellationToken::new();
        let bus = MqttCommandPublisher::connect(
            &MqttConfig {
                broker_host: "127.0.0.1".to_string(),
                broker_port: 1,
                ..MqttConfig::default()
            },
            &shutdown,
        );
        let svc = svc.with_publisher(Arc::new(bus));

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(matches!(
            svc.send_command("pump_on").await,
            Err(GreenhouseError::Upstream(_))
        ));
        assert_eq!(svc.take_last_command(), None);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn classification_requires_classifier() {
        let dir = tempfile::tempdir().unwrap();
        let (svc, _) = service(&dir);
        let image = dir.path().join("leaf.jpg");
        std::fs::write(&image, b"jpeg").unwrap();

        assert!(matches!(
            svc.classify_image(&image).await,
            Err(GreenhouseError::Upstream(_))
        ));

        let svc = svc.with_classifier(Arc::new(FixedClassifier));
        let result = svc.classify_image(&image).await.unwrap();
        assert_eq!(result.label, "Potato___healthy");
        assert!(matches!(
            svc.classify_image(&dir.path().join("missing.jpg")).await,
            Err(GreenhouseError::InvalidInput(_))
        ));
    }
}
