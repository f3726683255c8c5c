//! Live push of the latest reading to presentation clients.
//!
//! ```text
//! TelemetryStore::latest() --(every interval)--> ReadingDistributor → [client 1, client 2, ...]
//! ```
//!
//! Delivery is best effort. Each subscriber has its own bounded channel fed with
//! `try_send`, so a slow client loses ticks instead of stalling the broadcaster, and a
//! client that went away is pruned on the next tick.

use crate::data::TelemetryStore;
use crate::measurement::SensorReading;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Delivery counters for one subscriber.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriberMetricsSnapshot {
    /// Name given at subscription
    pub subscriber: String,
    /// Readings delivered into the channel
    pub total_sent: u64,
    /// Readings dropped because the channel was full
    pub total_dropped: u64,
}

struct SubscriberEntry {
    name: String,
    sender: mpsc::Sender<SensorReading>,
    total_sent: u64,
    total_dropped: u64,
}

/// Non-blocking fan-out of readings to named subscribers.
pub struct ReadingDistributor {
    subscribers: Mutex<Vec<SubscriberEntry>>,
    capacity: usize,
}

impl ReadingDistributor {
    /// Distributor whose subscriber channels each buffer `capacity` readings.
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    /// Register a subscriber. Dropping the receiver unsubscribes it.
    pub async fn subscribe(&self, name: impl Into<String>) -> mpsc::Receiver<SensorReading> {
        let name = name.into();
        let (tx, rx) = mpsc::channel(self.capacity);
        info!(subscriber = %name, capacity = self.capacity, "Live subscriber registered");
        self.subscribers.lock().await.push(SubscriberEntry {
            name,
            sender: tx,
            total_sent: 0,
            total_dropped: 0,
        });
        rx
    }

    /// Offer `reading` to every subscriber without waiting. Returns how many accepted it.
    pub async fn broadcast(&self, reading: &SensorReading) -> usize {
        let mut subscribers = self.subscribers.lock().await;
        let mut delivered = 0;

        subscribers.retain_mut(|entry| match entry.sender.try_send(reading.clone()) {
            Ok(()) => {
                entry.total_sent += 1;
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                entry.total_dropped += 1;
                if entry.total_dropped.is_power_of_two() {
                    warn!(
                        subscriber = %entry.name,
                        dropped = entry.total_dropped,
                        "Live subscriber falling behind, dropping readings"
                    );
                }
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                info!(subscriber = %entry.name, "Live subscriber disconnected");
                false
            }
        });

        delivered
    }

    /// Number of live subscribers as of the last broadcast.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Delivery counters per subscriber.
    pub async fn metrics(&self) -> Vec<SubscriberMetricsSnapshot> {
        self.subscribers
            .lock()
            .await
            .iter()
            .map(|entry| SubscriberMetricsSnapshot {
                subscriber: entry.name.clone(),
                total_sent: entry.total_sent,
                total_dropped: entry.total_dropped,
            })
            .collect()
    }
}

/// Push the latest stored reading to all subscribers every `interval` until cancelled.
///
/// Ticks with an empty store push nothing.
#[instrument(name = "broadcaster", skip_all, fields(interval_ms = interval.as_millis() as u64))]
pub async fn run_broadcaster(
    store: Arc<TelemetryStore>,
    distributor: Arc<ReadingDistributor>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("Broadcaster started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Some(latest) = store.latest() {
                    let delivered = distributor.broadcast(&latest).await;
                    debug!(delivered, "Latest reading pushed");
                }
            }
        }
    }

    info!("Broadcaster stopped");
}
