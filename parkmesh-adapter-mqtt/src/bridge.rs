//! MQTT implementation of the broker bridge
//!
//! Construction only validates the endpoint. [`BrokerBridge::start`] builds
//! the client and spawns the event loop, once. The event loop reports
//! connection edges on the connectivity channel; reconnecting is left to
//! rumqttc, which reconnects on the next poll after an error.

use std::time::Duration;

use parking_lot::Mutex;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use tracing::{debug, info, warn};

use parkmesh_core::config::BrokerConfig;
use parkmesh_core::{BrokerBridge, BrokerError, EventSender, UpstreamEvent};

use crate::endpoint::BrokerEndpoint;

/// Requests buffered between the client handle and the event loop
const REQUEST_CAPACITY: usize = 10;

/// Settings of one MQTT bridge
#[derive(Debug, Clone)]
pub struct MqttBridgeConfig {
    pub endpoint: BrokerEndpoint,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    /// Bound on a single publish
    pub publish_timeout: Duration,
    /// Pause after a connection error before polling again
    pub retry_delay: Duration,
}

impl MqttBridgeConfig {
    pub fn from_broker_config(config: &BrokerConfig) -> Result<Self, BrokerError> {
        Ok(Self {
            endpoint: BrokerEndpoint::parse(&config.uri)?,
            client_id: config.client_id.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            keep_alive: Duration::from_secs(30),
            publish_timeout: config.publish_timeout,
            retry_delay: Duration::from_secs(5),
        })
    }

    /// Set the pause between reconnect attempts
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.client_id.clone(),
            self.endpoint.host.clone(),
            self.endpoint.port,
        );
        options.set_keep_alive(self.keep_alive);

        match (&self.username, &self.password) {
            (Some(username), password) => {
                // username-only logins send an empty password
                options.set_credentials(username, password.as_deref().unwrap_or(""));
            }
            (None, Some(_)) => warn!("Broker password given without a username, ignoring it"),
            (None, None) => {}
        }
        options
    }
}

/// Broker bridge over an rumqttc client
#[derive(Debug)]
pub struct MqttBridge {
    config: MqttBridgeConfig,
    events: EventSender,
    client: Mutex<Option<AsyncClient>>,
}

impl MqttBridge {
    /// Validate the endpoint. Does not connect.
    pub fn new(config: &BrokerConfig, events: EventSender) -> Result<Self, BrokerError> {
        Ok(Self::with_config(
            MqttBridgeConfig::from_broker_config(config)?,
            events,
        ))
    }

    pub fn with_config(config: MqttBridgeConfig, events: EventSender) -> Self {
        Self {
            config,
            events,
            client: Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.config.endpoint
    }
}

impl BrokerBridge for MqttBridge {
    fn start(&self) -> Result<(), BrokerError> {
        let mut client = self.client.lock();
        if client.is_some() {
            debug!("MQTT client already started");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BrokerError::Start(e.to_string()))?;

        let (handle, event_loop) = AsyncClient::new(self.config.options(), REQUEST_CAPACITY);
        runtime.spawn(drive_event_loop(
            event_loop,
            self.events.clone(),
            self.config.retry_delay,
            self.config.endpoint.to_string(),
        ));
        *client = Some(handle);

        info!(
            "MQTT client '{}' started for {}",
            self.config.client_id, self.config.endpoint
        );
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.client.lock().is_some()
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let client = self.client.lock().clone().ok_or(BrokerError::NotStarted)?;

        let publish = client.publish(topic, QoS::AtLeastOnce, false, payload.to_vec());
        match tokio::time::timeout(self.config.publish_timeout, publish).await {
            Ok(Ok(())) => {
                debug!("Queued {} bytes for {}", payload.len(), topic);
                Ok(())
            }
            Ok(Err(e)) => Err(BrokerError::Publish(e.to_string())),
            Err(_) => Err(BrokerError::Timeout),
        }
    }
}

/// Connection edge detector: one event per up/down change
#[derive(Debug, Default)]
pub(crate) struct LinkEdge {
    connected: bool,
}

impl LinkEdge {
    pub(crate) fn update(&mut self, connected: bool) -> Option<UpstreamEvent> {
        if self.connected == connected {
            return None;
        }
        self.connected = connected;
        Some(if connected {
            UpstreamEvent::BrokerConnected
        } else {
            UpstreamEvent::BrokerDisconnected
        })
    }
}

async fn drive_event_loop(
    mut event_loop: EventLoop,
    events: EventSender,
    retry_delay: Duration,
    broker: String,
) {
    debug!("MQTT event loop started for {}", broker);
    let mut link = LinkEdge::default();

    loop {
        let edge = match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    info!("Connected to MQTT broker {}", broker);
                    link.update(true)
                } else {
                    warn!("MQTT broker {} refused connection: {:?}", broker, ack.code);
                    link.update(false)
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("MQTT broker {} closed the session", broker);
                link.update(false)
            }
            Ok(notification) => {
                debug!("MQTT event: {:?}", notification);
                None
            }
            Err(e) => {
                warn!("MQTT connection error for {}: {}", broker, e);
                let edge = link.update(false);
                if let Some(event) = edge {
                    if events.send(event.into()).await.is_err() {
                        break;
                    }
                }
                tokio::time::sleep(retry_delay).await;
                continue;
            }
        };

        if let Some(event) = edge {
            if events.send(event.into()).await.is_err() {
                break;
            }
        }
    }

    debug!("Connectivity channel closed, MQTT event loop for {} stopping", broker);
}
