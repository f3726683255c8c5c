//! CLI Entry Point for greenhouse-daq
//!
//! Provides command-line interface for:
//! - Running the serial reader and live broadcaster until Ctrl+C
//! - Replaying a captured serial stream into the stores
//! - Querying telemetry, health and plant status
//! - Sending pump commands over MQTT
//!
//! # Usage
//!
//! ```bash
//! greenhouse-daq run --echo
//! greenhouse-daq replay capture.log
//! greenhouse-daq plants add Tomato 90 --notes "south bed"
//! greenhouse-daq pump on
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use greenhouse_daq::broadcast::run_broadcaster;
use greenhouse_daq::clock::{Clock, SystemClock};
use greenhouse_daq::commands::{MqttCommandPublisher, PumpCommand};
use greenhouse_daq::config::{GreenhouseConfig, DEFAULT_CONFIG_PATH};
use greenhouse_daq::hardware::{open_serial_async, BufferedSerial};
use greenhouse_daq::ingest::{IngestStats, TelemetryIngestor};
use greenhouse_daq::service::GreenhouseService;
use greenhouse_daq::tracing_setup;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// How long a one-shot command waits for the broker to accept the connection.
const BROKER_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a one-shot command waits for its PUBLISH to be written out.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "greenhouse-daq")]
#[command(about = "Greenhouse telemetry ingestion and plant tracking", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Print query results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read the serial port and broadcast the latest reading until Ctrl+C
    Run {
        /// Override the configured serial port
        #[arg(long)]
        port: Option<String>,

        /// Print every broadcast reading to stdout
        #[arg(long)]
        echo: bool,
    },

    /// Feed a captured serial stream through the reader
    Replay {
        /// File holding raw bytes as received from the device
        file: PathBuf,
    },

    /// Today's summary and sensor health
    Status,

    /// Show the most recent readings
    Tail {
        #[arg(default_value_t = 10)]
        n: usize,
    },

    /// Readings of one day
    Day {
        /// Date as YYYY-MM-DD
        date: String,
    },

    /// Manage tracked plants
    Plants {
        #[command(subcommand)]
        action: PlantCommands,
    },

    /// Switch the irrigation pump
    Pump {
        #[arg(value_enum)]
        state: PumpSwitch,
    },
}

#[derive(Subcommand)]
enum PlantCommands {
    /// List every plant
    List,
    /// Start tracking a plant planted now
    Add {
        name: String,
        /// Days from planting to expected harvest
        growth_days: i64,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Status and timing of one plant
    Show { id: u64 },
    /// Change a plant's status and optionally its notes
    Update {
        id: u64,
        status: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Stop tracking a plant
    Delete { id: u64 },
    /// Plants ready soon or overdue
    Alerts,
    /// Expected harvest date of every plant
    Schedule,
}

#[derive(Clone, Copy, ValueEnum)]
enum PumpSwitch {
    On,
    Off,
}

impl From<PumpSwitch> for PumpCommand {
    fn from(switch: PumpSwitch) -> Self {
        match switch {
            PumpSwitch::On => PumpCommand::On,
            PumpSwitch::Off => PumpCommand::Off,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = GreenhouseConfig::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    config.validate().context("invalid configuration")?;
    tracing_setup::init_from_config(&config).context("initializing logging")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let service = GreenhouseService::open(&config, clock).context("opening data stores")?;

    match cli.command {
        Commands::Run { port, echo } => run(config, service, port, echo).await,
        Commands::Replay { file } => replay(&config, &service, file).await,
        Commands::Status => {
            let summary = service.daily_summary();
            if cli.json {
                print_json(&summary)
            } else {
                println!("{summary}");
                Ok(())
            }
        }
        Commands::Tail { n } => print_readings(cli.json, &service.get_tail(n)),
        Commands::Day { date } => print_readings(cli.json, &service.get_by_date(&date)?),
        Commands::Plants { action } => plants(&service, action, cli.json),
        Commands::Pump { state } => pump(&config, service, state.into()).await,
    }
}

async fn run(
    config: GreenhouseConfig,
    service: GreenhouseService,
    port: Option<String>,
    echo: bool,
) -> Result<()> {
    let port = port.unwrap_or_else(|| config.serial.port.clone());
    let stream = open_serial_async(&port, config.serial.baud_rate, "greenhouse controller")
        .await
        .with_context(|| format!("opening serial port {port}"))?;
    let reader = BufferedSerial::new(Box::new(stream));

    let shutdown = CancellationToken::new();
    let ingestor = TelemetryIngestor::new(service.store(), service.images(), service.clock())
        .with_read_timeout(config.serial.read_timeout())
        .with_image_timeout(config.serial.image_timeout());
    let mut reader_task = tokio::spawn(ingestor.run(reader, shutdown.clone()));

    let broadcaster = tokio::spawn(run_broadcaster(
        service.store(),
        service.distributor(),
        config.broadcast.interval(),
        shutdown.clone(),
    ));

    if echo {
        let mut live = service.subscribe("stdout").await;
        tokio::spawn(async move {
            while let Some(reading) = live.recv().await {
                println!(
                    "{} T={:.1}°C H={:.1}% soil={:.1}% lux={:.0} pump={}",
                    reading.timestamp.format("%H:%M:%S"),
                    reading.temperature,
                    reading.humidity,
                    reading.soil_moisture,
                    reading.lux,
                    u8::from(reading.pump_status)
                );
            }
        });
    }

    info!(port = %port, "Greenhouse DAQ running, press Ctrl+C to stop");

    let finished = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for Ctrl+C")?;
            info!("Shutdown requested");
            None
        }
        joined = &mut reader_task => Some(joined),
    };
    shutdown.cancel();
    let outcome = match finished {
        Some(joined) => joined,
        None => reader_task.await,
    };
    broadcaster.await.context("broadcaster task panicked")?;

    let stats = outcome.context("reader task panicked")?.map_err(|e| {
        error!(error = %e, "Serial reader failed");
        e
    })?;
    report_stats(&stats);
    Ok(())
}

async fn replay(config: &GreenhouseConfig, service: &GreenhouseService, file: PathBuf) -> Result<()> {
    let input = tokio::fs::File::open(&file)
        .await
        .with_context(|| format!("opening {}", file.display()))?;

    let stats = TelemetryIngestor::new(service.store(), service.images(), service.clock())
        .with_read_timeout(config.serial.read_timeout())
        .run(tokio::io::BufReader::new(input), CancellationToken::new())
        .await?;
    report_stats(&stats);
    Ok(())
}

fn report_stats(stats: &IngestStats) {
    println!(
        "records={} decode_faults={} images={} empty_images={} abandoned_images={} write_faults={}",
        stats.sensor_records,
        stats.decode_faults,
        stats.images_saved,
        stats.empty_images,
        stats.images_abandoned,
        stats.write_faults
    );
}

fn plants(service: &GreenhouseService, action: PlantCommands, json: bool) -> Result<()> {
    match action {
        PlantCommands::List => {
            let plants = service.list_plants();
            if json {
                return print_json(&plants);
            }
            if plants.is_empty() {
                println!("No plants tracked.");
            }
            for p in plants {
                println!(
                    "{:>4}  {:<20} planted {}  harvest {}  [{}]  {}",
                    p.id,
                    p.name,
                    p.planting_date.format("%Y-%m-%d"),
                    p.expected_harvest_date.format("%Y-%m-%d"),
                    p.status,
                    p.notes
                );
            }
        }
        PlantCommands::Add {
            name,
            growth_days,
            notes,
        } => {
            let id = service.create_plant(&name, growth_days, &notes)?;
            println!("Created plant {id}");
        }
        PlantCommands::Show { id } => match service.get_plant(id) {
            Some(view) if json => return print_json(&view),
            Some(view) => println!(
                "{} (#{}): {} days since planting, {} days until harvest, status {}, notes: {}",
                view.plant_name,
                view.plant_id,
                view.days_since_planting,
                view.days_until_harvest,
                view.status,
                view.notes
            ),
            None => anyhow::bail!("plant {id} not found"),
        },
        PlantCommands::Update { id, status, notes } => {
            if !service.update_plant_status(id, &status, notes.as_deref())? {
                anyhow::bail!("plant {id} not found");
            }
            println!("Updated plant {id}");
        }
        PlantCommands::Delete { id } => {
            if !service.delete_plant(id)? {
                anyhow::bail!("plant {id} not found");
            }
            println!("Deleted plant {id}");
        }
        PlantCommands::Alerts => {
            let alerts = service.get_harvest_alerts();
            if json {
                return print_json(&alerts);
            }
            if alerts.is_empty() {
                println!("No plants close to harvest.");
            }
            for alert in alerts {
                println!("{}", alert.message);
            }
        }
        PlantCommands::Schedule => {
            let schedule = service.harvest_schedule();
            if json {
                return print_json(&schedule);
            }
            for entry in schedule {
                println!(
                    "{} is expected to be harvested on {}",
                    entry.plant_name, entry.expected_harvest_date
                );
            }
        }
    }
    Ok(())
}

async fn pump(config: &GreenhouseConfig, service: GreenhouseService, command: PumpCommand) -> Result<()> {
    let shutdown = CancellationToken::new();
    let publisher = Arc::new(MqttCommandPublisher::connect(&config.mqtt, &shutdown));
    let service = service.with_publisher(publisher.clone());

    publisher.wait_connected(BROKER_CONNECT_TIMEOUT).await?;
    service.send_command(command.as_str()).await?;
    publisher.flush(PUBLISH_TIMEOUT).await?;
    shutdown.cancel();
    println!("Sent {command}");
    Ok(())
}

fn print_readings(json: bool, readings: &[greenhouse_daq::measurement::SensorReading]) -> Result<()> {
    if json {
        return print_json(&readings);
    }
    if readings.is_empty() {
        println!("No sensor data.");
    }
    for r in readings {
        println!(
            "{}  T={:.1}°C  H={:.1}%  soil={:.1}%  lux={:.0}  pump={}",
            r.timestamp.format("%Y-%m-%d %H:%M:%S"),
            r.temperature,
            r.humidity,
            r.soil_moisture,
            r.lux,
            u8::from(r.pump_status)
        );
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
