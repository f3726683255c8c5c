//! Plant lifecycle tracking.
pub mod plant;
pub mod plant_registry;

pub use plant::{whole_days, Plant, PlantStatus, PlantStatusView, PLANT_HEADER};
pub use plant_registry::PlantRegistry;
