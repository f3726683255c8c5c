//! Derived, read-only views over the telemetry log and the plant registry.
pub mod aggregation;
pub mod alerts;
pub mod summary;

pub use aggregation::{avg_today, health_check, pump_activations_today, FieldFault, HealthReport};
pub use alerts::{harvest_alerts, Alert, AlertKind};
pub use summary::{harvest_schedule, DailySummary, HarvestEntry};
