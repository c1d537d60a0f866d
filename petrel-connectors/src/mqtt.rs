//! MQTT Uplink - Publisher and Connection-State Bridge
//!
//! Built on `rumqttc`'s synchronous client. The client side is cheap to
//! clone and channel-backed, so [`MqttPublisher`] implements the core's
//! `Publisher` trait directly; the connection event loop runs on the bridge
//! thread, which doubles as the transport layer that owns the uplink
//! watermark flags.
//!
//! QoS 1 everywhere: the pipeline already tolerates duplicates
//! (at-least-once end to end), and QoS 2's extra round-trips buy nothing on
//! a link that is expected to drop.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};
use rumqttc::{Client, ClientError, Connection, Event, MqttOptions, Outgoing, Packet, QoS};

use petrel_core::publish::{PublishError, Publisher};
use petrel_core::{Flag, SignalGroup};

use crate::ConnectorError;

/// MQTT connection settings
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker host name or address
    pub host: String,
    /// Broker port (1883 plain, 8883 TLS at the broker's discretion)
    pub port: u16,
    /// Client identifier; must be unique per node on the broker
    pub client_id: String,
    /// Keep-alive interval
    pub keep_alive: Duration,
    /// Username/password credentials, if the broker wants them
    pub credentials: Option<(String, String)>,
    /// Outgoing request queue depth
    pub queue_capacity: usize,
    /// Delay between reconnect attempts after a connection error
    pub reconnect_delay: Duration,
}

impl MqttConfig {
    /// Config with the defaults that suit a battery sensor node
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            keep_alive: Duration::from_secs(60),
            credentials: None,
            queue_capacity: 16,
            reconnect_delay: Duration::from_secs(5),
        }
    }

    /// Attach username/password credentials
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    fn options(&self) -> Result<MqttOptions, ConnectorError> {
        if self.client_id.is_empty() {
            return Err(ConnectorError::Config("client_id must not be empty"));
        }
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        if let Some((username, password)) = &self.credentials {
            options.set_credentials(username.clone(), password.clone());
        }
        Ok(options)
    }
}

/// `Publisher` backed by the rumqttc client channel
pub struct MqttPublisher {
    client: Client,
}

impl Publisher for MqttPublisher {
    fn enqueue(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        // Non-blocking enqueue: a saturated request channel surfaces as a
        // retryable error instead of wedging the drain task inside the
        // client, keeping every wait shutdown-interruptible
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(map_client_error)
    }
}

fn map_client_error(e: ClientError) -> PublishError {
    // Channel-level failures only: the event loop either went away or is
    // saturated. Both clear up, so both are retryable.
    match e {
        ClientError::Request(_) => PublishError::NotConnected,
        ClientError::TryRequest(_) => PublishError::QueueFull,
    }
}

/// A started MQTT uplink: publisher handle plus the bridge thread
pub struct MqttUplink {
    publisher: Arc<MqttPublisher>,
    client: Client,
    bridge: Option<JoinHandle<()>>,
}

impl MqttUplink {
    /// Connect the client and start the bridge thread
    ///
    /// Raises `UPLINK_STARTED` immediately and `UPLINK_DOWN` until the first
    /// ConnAck arrives; from then on the bridge keeps the connected/down
    /// pair current.
    pub fn start(config: MqttConfig, signals: Arc<SignalGroup>) -> Result<Self, ConnectorError> {
        let options = config.options()?;
        let (client, connection) = Client::new(options, config.queue_capacity);

        signals.set(Flag::UplinkDown);
        signals.set(Flag::UplinkStarted);

        let reconnect_delay = config.reconnect_delay;
        let bridge = thread::Builder::new()
            .name("petrel-mqtt-bridge".into())
            .spawn(move || bridge_loop(connection, &signals, reconnect_delay))?;

        Ok(Self {
            publisher: Arc::new(MqttPublisher {
                client: client.clone(),
            }),
            client,
            bridge: Some(bridge),
        })
    }

    /// Publisher handle for `TelemetrySystem::init`
    pub fn publisher(&self) -> Arc<MqttPublisher> {
        Arc::clone(&self.publisher)
    }

    /// Disconnect and join the bridge thread
    pub fn stop(&mut self) {
        if let Some(handle) = self.bridge.take() {
            if let Err(e) = self.client.disconnect() {
                debug!("disconnect while stopping uplink: {e}");
            }
            if handle.join().is_err() {
                warn!("mqtt bridge thread panicked");
            }
        }
    }
}

impl Drop for MqttUplink {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Event loop: translate broker session state into the uplink flags
fn bridge_loop(mut connection: Connection, signals: &SignalGroup, reconnect_delay: Duration) {
    for notification in connection.iter() {
        if signals.is_set(Flag::Shutdown) {
            break;
        }
        match notification {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                signals.set(Flag::UplinkConnected);
                signals.clear(Flag::UplinkDown);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                info!("mqtt disconnect requested by broker");
                signals.clear(Flag::UplinkConnected);
                signals.set(Flag::UplinkDown);
            }
            // Our own disconnect request: leave instead of reconnecting
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(event) => {
                debug!("mqtt event: {event:?}");
            }
            Err(e) => {
                warn!("mqtt connection error: {e}; retrying");
                signals.clear(Flag::UplinkConnected);
                signals.set(Flag::UplinkDown);
                // The iterator retries the connection on next() - pace it
                thread::sleep(reconnect_delay);
            }
        }
    }
    signals.clear(Flag::UplinkConnected);
    signals.clear(Flag::UplinkStarted);
    signals.set(Flag::UplinkDown);
    info!("mqtt bridge stopped");
}
