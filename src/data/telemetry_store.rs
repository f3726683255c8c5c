//! Append-only telemetry log.
//!
//! Readings are persisted as CSV rows `timestamp,temperature,humidity,soil_moisture,lux,pump_status`
//! and mirrored in memory for queries. The reader task is the only writer; any number of
//! readers may query concurrently.
//!
//! Each row is encoded completely before it touches the file and is flushed immediately,
//! because the serial stream cannot be replayed. A reading becomes visible to queries only
//! after its row has been written, so readers never observe a half-written record.
//! A row that fails partway through is truncated back out of the file, and a log that
//! does not end in a newline (power loss mid-row) is terminated on open so the next
//! append starts on its own line.
//!
//! The mirror holds every reading for the life of the process. A reading is 48 bytes,
//! so one line per second costs roughly 4 MB of RAM per day of uptime on top of the
//! file itself.

use crate::error::{AppResult, GreenhouseError};
use crate::measurement::{PumpState, SensorReading};
use chrono::{NaiveDate, NaiveDateTime};
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Column header of the telemetry log.
pub const TELEMETRY_HEADER: [&str; 6] = [
    "timestamp",
    "temperature",
    "humidity",
    "soil_moisture",
    "lux",
    "pump_status",
];

/// ISO-8601 local timestamp; fractional seconds are written only when present.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Append-only store of sensor readings backed by a CSV file.
pub struct TelemetryStore {
    path: PathBuf,
    file: Mutex<File>,
    readings: RwLock<Vec<SensorReading>>,
    appended: watch::Sender<usize>,
}

impl TelemetryStore {
    /// Open (or create) the log at `path`, loading any existing rows.
    ///
    /// Rows that cannot be parsed are skipped with a warning.
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let readings = if path.exists() {
            load_readings(&path)?
        } else {
            Vec::new()
        };

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        if terminate_last_row(&mut file)? {
            warn!(path = %path.display(), "Telemetry log ended mid-row; terminated it");
        }
        if file.metadata()?.len() == 0 {
            file.write_all(&encode_row(TELEMETRY_HEADER)?)?;
            file.flush()?;
        }

        info!(
            path = %path.display(),
            records = readings.len(),
            "Telemetry store opened"
        );

        let (appended, _) = watch::channel(readings.len());
        Ok(Self {
            path,
            file: Mutex::new(file),
            readings: RwLock::new(readings),
            appended,
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one reading and flush it to disk.
    pub fn append(&self, reading: &SensorReading) -> AppResult<()> {
        let row = encode_row(reading_fields(reading))?;

        let mut file = self.file.lock();
        write_row(&mut *file, &row)?;

        let count = {
            let mut readings = self.readings.write();
            readings.push(reading.clone());
            readings.len()
        };
        drop(file);

        self.appended.send_replace(count);
        debug!(records = count, "Telemetry record appended");
        Ok(())
    }

    /// Most recent reading, `None` when the log is empty.
    pub fn latest(&self) -> Option<SensorReading> {
        self.readings.read().last().cloned()
    }

    /// The `n` most recent readings in arrival order.
    pub fn tail(&self, n: usize) -> Vec<SensorReading> {
        let readings = self.readings.read();
        readings[readings.len().saturating_sub(n)..].to_vec()
    }

    /// All readings received on the given local calendar date, in arrival order.
    pub fn range_by_date(&self, date: NaiveDate) -> Vec<SensorReading> {
        self.readings
            .read()
            .iter()
            .filter(|r| r.timestamp.date() == date)
            .cloned()
            .collect()
    }

    /// Run `f` over a consistent view of the whole log without copying it.
    pub fn with_readings<R>(&self, f: impl FnOnce(&[SensorReading]) -> R) -> R {
        f(&self.readings.read())
    }

    /// Number of stored readings.
    pub fn len(&self) -> usize {
        self.readings.read().len()
    }

    /// Whether the log holds no readings.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Watch the record count; it changes after every committed append.
    pub fn subscribe_appends(&self) -> watch::Receiver<usize> {
        self.appended.subscribe()
    }
}

/// A log file that can be cut back to a known length.
trait RowSink: Write {
    fn committed_len(&self) -> io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl RowSink for File {
    fn committed_len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Write `row` completely or leave the sink at its previous length.
fn write_row<S: RowSink + ?Sized>(sink: &mut S, row: &[u8]) -> io::Result<()> {
    let committed = sink.committed_len()?;
    if let Err(e) = sink.write_all(row).and_then(|()| sink.flush()) {
        if let Err(rollback) = sink.truncate_to(committed) {
            warn!(error = %rollback, "Failed to remove partial telemetry row");
        }
        return Err(e);
    }
    Ok(())
}

/// Append a newline when the file's last byte is not one. Returns whether it did.
fn terminate_last_row(file: &mut File) -> io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(false);
    }
    file.write_all(b"\n")?;
    file.flush()?;
    Ok(true)
}

fn reading_fields(reading: &SensorReading) -> [String; 6] {
    [
        reading.timestamp.format(TIMESTAMP_FORMAT).to_string(),
        reading.temperature.to_string(),
        reading.humidity.to_string(),
        reading.soil_moisture.to_string(),
        reading.lux.to_string(),
        u8::from(reading.pump_status).to_string(),
    ]
}

fn encode_row<I, T>(fields: I) -> AppResult<Vec<u8>>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(fields)?;
    writer
        .into_inner()
        .map_err(|e| GreenhouseError::Io(e.into_error()))
}

fn load_readings(path: &Path) -> AppResult<Vec<SensorReading>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let mut readings = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let parsed = record
            .map_err(GreenhouseError::from)
            .and_then(|record| parse_row(&record));
        match parsed {
            Ok(reading) => readings.push(reading),
            Err(e) => warn!(
                path = %path.display(),
                row = index + 1,
                error = %e,
                "Skipping unreadable telemetry row"
            ),
        }
    }
    Ok(readings)
}

fn parse_row(record: &csv::StringRecord) -> AppResult<SensorReading> {
    let field = |i: usize| {
        record
            .get(i)
            .map(str::trim)
            .ok_or_else(|| GreenhouseError::Decode(format!("missing column {}", TELEMETRY_HEADER[i])))
    };
    let number = |i: usize| -> AppResult<f64> {
        let raw = field(i)?;
        raw.parse().map_err(|e| {
            GreenhouseError::Decode(format!("invalid {} '{raw}': {e}", TELEMETRY_HEADER[i]))
        })
    };

    Ok(SensorReading {
        timestamp: parse_timestamp(field(0)?)?,
        temperature: number(1)?,
        humidity: number(2)?,
        soil_moisture: number(3)?,
        lux: number(4)?,
        pump_status: field(5)?.parse::<PumpState>()?,
    })
}

/// Parse a stored timestamp, accepting both `T` and space separators.
pub(crate) fn parse_timestamp(raw: &str) -> AppResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|e| GreenhouseError::Decode(format!("invalid timestamp '{raw}': {e}")))
}
