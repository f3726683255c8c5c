//! Outbound pump commands.
//!
//! Commands are published to a topic on an MQTT broker at QoS 0, so the device never
//! acknowledges them. The publisher does track its own link: a command is refused with
//! `Upstream` unless the broker has accepted the connection, and callers that need to
//! know a command left the host can wait for it with [`MqttCommandPublisher::flush`].
//! The broker connection is an explicitly owned [`MqttCommandPublisher`]; the rest of
//! the crate only sees the [`CommandPublisher`] trait.

use crate::config::MqttConfig;
use crate::error::{AppResult, GreenhouseError};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Delay between reconnect attempts after the broker connection drops.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Requests buffered between the client handle and the event loop.
const REQUEST_CAPACITY: usize = 10;

/// A command for the pump actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpCommand {
    /// Start watering
    On,
    /// Stop watering
    Off,
}

impl PumpCommand {
    /// Token published on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            PumpCommand::On => "pump_on",
            PumpCommand::Off => "pump_off",
        }
    }
}

impl fmt::Display for PumpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PumpCommand {
    type Err = GreenhouseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pump_on" => Ok(PumpCommand::On),
            "pump_off" => Ok(PumpCommand::Off),
            other => Err(GreenhouseError::InvalidInput(format!(
                "unknown command '{other}', expected pump_on or pump_off"
            ))),
        }
    }
}

/// Publishes commands to the actuator bus.
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    /// Publish one command.
    ///
    /// # Errors
    /// `Upstream` when the bus is not connected or cannot accept the command.
    async fn publish(&self, command: PumpCommand) -> AppResult<()>;
}

/// Broker link as observed by the event loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct LinkState {
    connected: bool,
    /// PUBLISH packets written to the socket
    sent: u64,
}

impl LinkState {
    /// Fold one event-loop outcome into the state. Returns whether anything changed.
    fn observe(&mut self, event: Result<&Event, ()>) -> bool {
        let before = *self;
        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                self.connected = ack.code == ConnectReturnCode::Success;
            }
            Ok(Event::Outgoing(Outgoing::Publish(_))) => self.sent += 1,
            Ok(Event::Outgoing(Outgoing::Disconnect) | Event::Incoming(Packet::Disconnect)) | Err(()) => {
                self.connected = false;
            }
            Ok(_) => {}
        }
        *self != before
    }
}

/// [`CommandPublisher`] backed by an MQTT broker.
pub struct MqttCommandPublisher {
    client: AsyncClient,
    topic: String,
    link: watch::Receiver<LinkState>,
    queued: AtomicU64,
    connection: CancellationToken,
}

impl MqttCommandPublisher {
    /// Create the client and spawn its event loop on the current runtime.
    ///
    /// The connection is established lazily by the event loop and re-attempted after
    /// failures until `shutdown` fires or the publisher is dropped.
    pub fn connect(config: &MqttConfig, shutdown: &CancellationToken) -> Self {
        let mut options = MqttOptions::new(
            config.client_id.clone(),
            config.broker_host.clone(),
            config.broker_port,
        );
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let connection = shutdown.child_token();
        let (link_tx, link) = watch::channel(LinkState::default());
        tokio::spawn(drive_event_loop(
            eventloop,
            client.clone(),
            link_tx,
            connection.clone(),
        ));

        info!(
            broker = %config.broker_host,
            port = config.broker_port,
            topic = %config.command_topic,
            "MQTT command publisher started"
        );
        Self {
            client,
            topic: config.command_topic.clone(),
            link,
            queued: AtomicU64::new(0),
            connection,
        }
    }

    /// Topic commands are published to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Whether the broker has accepted the current connection.
    pub fn is_connected(&self) -> bool {
        self.link.borrow().connected
    }

    /// Wait until the broker accepts the connection.
    ///
    /// # Errors
    /// `Upstream` when no connection is established within `limit`.
    pub async fn wait_connected(&self, limit: Duration) -> AppResult<()> {
        self.wait_link(limit, |link| link.connected)
            .await
            .map_err(|reason| GreenhouseError::Upstream(format!("MQTT broker not reachable: {reason}")))
    }

    /// Wait until every command accepted by [`CommandPublisher::publish`] has been written
    /// to the broker socket.
    ///
    /// # Errors
    /// `Upstream` when the commands are still queued after `limit`.
    pub async fn flush(&self, limit: Duration) -> AppResult<()> {
        let target = self.queued.load(Ordering::SeqCst);
        self.wait_link(limit, |link| link.sent >= target)
            .await
            .map_err(|reason| GreenhouseError::Upstream(format!("MQTT command not delivered: {reason}")))
    }

    async fn wait_link(
        &self,
        limit: Duration,
        ready: impl FnMut(&LinkState) -> bool,
    ) -> Result<(), String> {
        let mut link = self.link.clone();
        let outcome = match tokio::time::timeout(limit, link.wait_for(ready)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err("event loop stopped".to_string()),
            Err(_) => Err(format!("timed out after {limit:?}")),
        };
        outcome
    }
}

impl Drop for MqttCommandPublisher {
    fn drop(&mut self) {
        self.connection.cancel();
    }
}

#[async_trait]
impl CommandPublisher for MqttCommandPublisher {
    async fn publish(&self, command: PumpCommand) -> AppResult<()> {
        if !self.is_connected() {
            return Err(GreenhouseError::Upstream(
                "not connected to MQTT broker".to_string(),
            ));
        }
        self.client
            .try_publish(self.topic.as_str(), QoS::AtMostOnce, false, command.as_str())
            .map_err(|e| GreenhouseError::Upstream(format!("MQTT publish failed: {e}")))?;
        self.queued.fetch_add(1, Ordering::SeqCst);
        info!(topic = %self.topic, command = %command, "Pump command published");
        Ok(())
    }
}

#[instrument(name = "mqtt_event_loop", skip_all)]
async fn drive_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    link: watch::Sender<LinkState>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = client.try_disconnect();
                link.send_if_modified(|state| state.observe(Err(())));
                debug!("MQTT event loop cancelled");
                break;
            }
            event = eventloop.poll() => match event {
                Ok(event) => {
                    link.send_if_modified(|state| state.observe(Ok(&event)));
                    if let Event::Incoming(Packet::ConnAck(ack)) = &event {
                        info!(code = ?ack.code, "Connected to MQTT broker");
                    }
                }
                Err(e) => {
                    link.send_if_modified(|state| state.observe(Err(())));
                    warn!(error = %e, "MQTT connection error, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_only_known_commands() {
        assert_eq!("pump_on".parse::<PumpCommand>().unwrap(), PumpCommand::On);
        assert_eq!(" pump_off\n".parse::<PumpCommand>().unwrap(), PumpCommand::Off);
        assert!(matches!(
            "pump_toggle".parse::<PumpCommand>(),
            Err(GreenhouseError::InvalidInput(_))
        ));
        assert!("PUMP_ON".parse::<PumpCommand>().is_err());
    }

    #[test]
    fn wire_tokens() {
        assert_eq!(PumpCommand::On.to_string(), "pump_on");
        assert_eq!(PumpCommand::Off.as_str(), "pump_off");
    }

    fn local_broker(port: u16) -> MqttConfig {
        MqttConfig {
            broker_host: "127.0.0.1".to_string(),
            broker_port: port,
            client_id: "greenhouse-test".to_string(),
            ..MqttConfig::default()
        }
    }

    #[test]
    fn link_state_follows_connack_and_errors() {
        use rumqttc::ConnAck;

        let mut link = LinkState::default();
        let accepted = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
        }));
        assert!(link.observe(Ok(&accepted)));
        assert!(link.connected);

        assert!(link.observe(Ok(&Event::Outgoing(Outgoing::Publish(0)))));
        assert_eq!(link.sent, 1);
        assert!(!link.observe(Ok(&Event::Outgoing(Outgoing::PingReq))));

        assert!(link.observe(Err(())));
        assert!(!link.connected);
        assert_eq!(link.sent, 1);
    }

    #[tokio::test]
    async fn unreachable_broker_is_reported_as_upstream() {
        let shutdown = CancellationToken::new();
        let publisher = MqttCommandPublisher::connect(&local_broker(1), &shutdown);
        assert_eq!(publisher.topic(), "yolouno/pump");

        assert!(matches!(
            publisher.publish(PumpCommand::On).await,
            Err(GreenhouseError::Upstream(_))
        ));
        assert!(matches!(
            publisher.wait_connected(Duration::from_millis(500)).await,
            Err(GreenhouseError::Upstream(_))
        ));
        assert!(matches!(
            publisher.publish(PumpCommand::Off).await,
            Err(GreenhouseError::Upstream(_))
        ));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn command_reaches_a_connected_broker() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut chunk = [0u8; 256];
            let n = socket.read(&mut chunk).await.unwrap();
            received.extend_from_slice(&chunk[..n]);
            // CONNACK, session not present, accepted
            socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
            while !received.windows(7).any(|w| w == b"pump_on") {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "client hung up before publishing");
                received.extend_from_slice(&chunk[..n]);
            }
            received
        });

        let shutdown = CancellationToken::new();
        let publisher = MqttCommandPublisher::connect(&local_broker(port), &shutdown);
        publisher.wait_connected(Duration::from_secs(5)).await.unwrap();
        assert!(publisher.is_connected());

        publisher.publish(PumpCommand::On).await.unwrap();
        publisher.flush(Duration::from_secs(5)).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), broker)
            .await
            .unwrap()
            .unwrap();
        assert!(received.windows(12).any(|w| w == b"yolouno/pump"));
        shutdown.cancel();
    }
}
