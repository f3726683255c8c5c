//! Persistent plant registry.
//!
//! The whole set lives in memory behind one mutex, which serializes every mutation.
//! A mutation is applied to a copy, the copy is written out (temp file, then rename) and
//! only then swapped in, so a failed write leaves both the file and memory untouched.
//!
//! Ids come from a strictly increasing counter kept in a sidecar file next to the
//! registry (`plant_records.seq` for `plant_records.csv`). Deleting a plant never frees
//! its id.

use crate::clock::Clock;
use crate::error::{AppResult, GreenhouseError};
use crate::registry::plant::{Plant, PlantStatus, PlantStatusView, PLANT_HEADER};
use chrono::{Duration, Timelike};
use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct RegistryState {
    plants: Vec<Plant>,
    next_id: u64,
}

/// CRUD store of [`Plant`]s backed by a CSV file.
pub struct PlantRegistry {
    path: PathBuf,
    counter_path: PathBuf,
    clock: Arc<dyn Clock>,
    state: Mutex<RegistryState>,
}

impl PlantRegistry {
    /// Open the registry at `path`, creating an empty one if it does not exist.
    pub fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let counter_path = path.with_extension("seq");

        let plants = if path.exists() {
            load_plants(&path)?
        } else {
            Vec::new()
        };
        let stored_next = read_counter(&counter_path);
        let after_max = plants.iter().map(|p| p.id + 1).max().unwrap_or(1);
        let next_id = stored_next.unwrap_or(1).max(after_max).max(1);

        let registry = Self {
            path,
            counter_path,
            clock,
            state: Mutex::new(RegistryState { plants, next_id }),
        };
        if !registry.path.exists() {
            let state = registry.state.lock();
            registry.persist(&state)?;
        }

        info!(
            path = %registry.path.display(),
            plants = registry.len(),
            next_id,
            "Plant registry opened"
        );
        Ok(registry)
    }

    /// Location of the registry file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of plants.
    pub fn len(&self) -> usize {
        self.state.lock().plants.len()
    }

    /// Whether the registry holds no plants.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add a plant planted now and return its id.
    ///
    /// # Errors
    /// `InvalidInput` for an empty name or negative `growth_days`; I/O errors if the
    /// registry cannot be written, in which case nothing changes.
    pub fn create(&self, name: &str, growth_days: i64, notes: &str) -> AppResult<u64> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GreenhouseError::InvalidInput(
                "plant name must not be empty".to_string(),
            ));
        }
        if growth_days < 0 {
            return Err(GreenhouseError::InvalidInput(format!(
                "growth_days must be non-negative, got {growth_days}"
            )));
        }

        let now = self.clock.now();
        let planting_date = now.with_nanosecond(0).unwrap_or(now);
        let expected_harvest_date = Duration::try_days(growth_days)
            .and_then(|d| planting_date.checked_add_signed(d))
            .ok_or_else(|| {
                GreenhouseError::InvalidInput(format!("growth_days {growth_days} is out of range"))
            })?;

        let mut state = self.state.lock();
        let mut candidate = state.clone();
        let id = candidate.next_id;
        candidate.next_id += 1;
        candidate.plants.push(Plant {
            id,
            name: name.to_string(),
            planting_date,
            expected_harvest_date,
            notes: notes.to_string(),
            status: PlantStatus::Growing,
        });
        self.persist(&candidate)?;
        *state = candidate;
        drop(state);

        info!(plant_id = id, name, growth_days, "Plant created");
        Ok(id)
    }

    /// Remove a plant. Returns whether it existed.
    pub fn delete(&self, id: u64) -> AppResult<bool> {
        let removed = self
            .mutate(|state| {
                let index = state.plants.iter().position(|p| p.id == id)?;
                Some(state.plants.remove(index))
            })?
            .is_some();

        if removed {
            info!(plant_id = id, "Plant deleted");
        } else {
            debug!(plant_id = id, "Delete of unknown plant ignored");
        }
        Ok(removed)
    }

    /// Set a plant's status, and its notes when `notes` is non-empty.
    /// Returns whether the plant existed.
    pub fn update_status(
        &self,
        id: u64,
        status: PlantStatus,
        notes: Option<&str>,
    ) -> AppResult<bool> {
        let updated = self
            .mutate(|state| {
                let plant = state.plants.iter_mut().find(|p| p.id == id)?;
                plant.status = status.clone();
                if let Some(notes) = notes.filter(|n| !n.is_empty()) {
                    plant.notes = notes.to_string();
                }
                Some(())
            })?
            .is_some();

        if updated {
            info!(plant_id = id, status = %status, "Plant status updated");
        }
        Ok(updated)
    }

    /// The plant's status and timing as of now, `None` if unknown.
    pub fn get_status(&self, id: u64) -> Option<PlantStatusView> {
        let now = self.clock.now();
        self.get(id).map(|plant| plant.status_view(now))
    }

    /// A copy of one plant.
    pub fn get(&self, id: u64) -> Option<Plant> {
        self.state.lock().plants.iter().find(|p| p.id == id).cloned()
    }

    /// All plants in creation order.
    pub fn list_all(&self) -> Vec<Plant> {
        self.state.lock().plants.clone()
    }

    /// Apply `change` to a copy of the state; persist and commit it only if `change`
    /// returned `Some`.
    fn mutate<T>(&self, change: impl FnOnce(&mut RegistryState) -> Option<T>) -> AppResult<Option<T>> {
        let mut state = self.state.lock();
        let mut candidate = state.clone();
        let Some(outcome) = change(&mut candidate) else {
            return Ok(None);
        };
        self.persist(&candidate)?;
        *state = candidate;
        Ok(Some(outcome))
    }

    fn persist(&self, state: &RegistryState) -> AppResult<()> {
        write_atomically(&self.counter_path, state.next_id.to_string().as_bytes())?;
        write_atomically(&self.path, &encode_plants(&state.plants)?)?;
        debug!(plants = state.plants.len(), "Plant registry written");
        Ok(())
    }
}

fn encode_plants(plants: &[Plant]) -> AppResult<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(PLANT_HEADER)?;
    for plant in plants {
        writer.serialize(plant)?;
    }
    writer
        .into_inner()
        .map_err(|e| GreenhouseError::Io(e.into_error()))
}

fn write_atomically(path: &Path, contents: &[u8]) -> AppResult<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let mut file = std::fs::File::create(&tmp)?;
    file.write_all(contents)?;
    file.flush()?;
    drop(file);
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn read_counter(path: &Path) -> Option<u64> {
    let raw = std::fs::read_to_string(path).ok()?;
    match raw.trim().parse() {
        Ok(next) => Some(next),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable id counter");
            None
        }
    }
}

fn load_plants(path: &Path) -> AppResult<Vec<Plant>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let mut plants: Vec<Plant> = Vec::new();
    for (index, row) in reader.deserialize::<Plant>().enumerate() {
        match row {
            Ok(plant) if plants.iter().any(|p| p.id == plant.id) => warn!(
                path = %path.display(),
                row = index + 1,
                plant_id = plant.id,
                "Skipping duplicate plant id"
            ),
            Ok(plant) => plants.push(plant),
            Err(e) => warn!(
                path = %path.display(),
                row = index + 1,
                error = %e,
                "Skipping unreadable plant row"
            ),
        }
    }
    Ok(plants)
}
