//! MQTT transport.

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, Transport,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use scalesync_common::{Error, Result, Secret};

/// Publish-only view of a broker connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Open a session and wait for the broker to accept it.
    async fn connect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Publish with at-least-once delivery and wait for the acknowledgement.
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

/// Broker connection and topic settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<Secret>,
    pub use_tls: bool,
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// How long to wait for the broker to acknowledge a connect or publish.
    pub ack_timeout_secs: u64,
    pub topic_prefix: String,
    /// Publish a retained discovery document after connecting.
    pub discovery: bool,
    pub utc_offset_minutes: i32,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8883,
            username: None,
            password: None,
            use_tls: true,
            client_id: "scalesync".to_string(),
            keep_alive_secs: 30,
            ack_timeout_secs: 10,
            topic_prefix: "scalesync/measurements".to_string(),
            discovery: false,
            utc_offset_minutes: 0,
        }
    }
}

impl MqttSettings {
    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs.max(1)));

        if let Some(username) = self.username.as_deref().filter(|u| !u.is_empty()) {
            let password = self
                .password
                .as_ref()
                .map(|p| p.expose().to_string())
                .unwrap_or_default();
            options.set_credentials(username, password);
        }

        if self.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        options
    }

    fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs.max(1))
    }
}

/// Publish progress reported by the event loop, by packet id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PublishEvent {
    Sent(u16),
    Acked(u16),
}

struct Session {
    client: AsyncClient,
    events: mpsc::UnboundedReceiver<PublishEvent>,
    poller: JoinHandle<()>,
}

/// Take the packet id of the next outgoing publish and wait for its PubAck.
/// Acknowledgements for other packet ids are skipped.
async fn await_ack(events: &mut mpsc::UnboundedReceiver<PublishEvent>) -> Result<u16> {
    let mut sent = None;
    while let Some(event) = events.recv().await {
        match (sent, event) {
            (None, PublishEvent::Sent(pkid)) => sent = Some(pkid),
            (Some(expected), PublishEvent::Acked(pkid)) if pkid == expected => return Ok(pkid),
            (_, other) => debug!("Skipping {:?} while waiting for acknowledgement", other),
        }
    }
    Err(Error::Network(
        "connection closed before acknowledgement".to_string(),
    ))
}

/// [`MessagePublisher`] over `rumqttc`.
///
/// The event loop runs on its own task once the broker has acknowledged the
/// connection. Outgoing publish packet ids and acknowledgements are
/// forwarded to the publishing side, which matches them by packet id; an
/// event loop error ends the session.
pub struct RumqttPublisher {
    settings: MqttSettings,
    session: Mutex<Option<Session>>,
    connected: Arc<AtomicBool>,
}

impl RumqttPublisher {
    pub fn new(settings: MqttSettings) -> Self {
        Self {
            settings,
            session: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn await_connack(eventloop: &mut EventLoop) -> Result<()> {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    return if ack.code == ConnectReturnCode::Success {
                        Ok(())
                    } else {
                        Err(Error::Network(format!("broker refused connection: {:?}", ack.code)))
                    };
                }
                Ok(event) => debug!("MQTT event before connack: {:?}", event),
                Err(e) => return Err(Error::Network(e.to_string())),
            }
        }
    }

    fn spawn_poller(
        mut eventloop: EventLoop,
        events: mpsc::UnboundedSender<PublishEvent>,
        connected: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let forwarded = match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                        events.send(PublishEvent::Sent(pkid))
                    }
                    Ok(Event::Incoming(Packet::PubAck(ack))) => {
                        events.send(PublishEvent::Acked(ack.pkid))
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        warn!("Broker closed the MQTT session");
                        break;
                    }
                    Ok(_) => Ok(()),
                    Err(e) => {
                        warn!("MQTT connection lost: {}", e);
                        break;
                    }
                };
                if forwarded.is_err() {
                    break;
                }
            }
            connected.store(false, Ordering::SeqCst);
        })
    }
}

#[async_trait]
impl MessagePublisher for RumqttPublisher {
    async fn connect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if let Some(old) = session.take() {
            old.poller.abort();
        }

        let (client, mut eventloop) = AsyncClient::new(self.settings.options(), 16);
        tokio::time::timeout(self.settings.ack_timeout(), Self::await_connack(&mut eventloop))
            .await
            .map_err(|_| Error::Timeout(format!("connecting to {}:{}", self.settings.host, self.settings.port)))??;

        let (tx, rx) = mpsc::unbounded_channel();
        self.connected.store(true, Ordering::SeqCst);
        let poller = Self::spawn_poller(eventloop, tx, self.connected.clone());

        *session = Some(Session {
            client,
            events: rx,
            poller,
        });
        info!("Connected to MQTT broker {}:{}", self.settings.host, self.settings.port);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()> {
        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| Error::Network("MQTT session not established".to_string()))?;

        // Events left over from timed-out publishes.
        while session.events.try_recv().is_ok() {}

        session
            .client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        match tokio::time::timeout(self.settings.ack_timeout(), await_ack(&mut session.events)).await {
            Ok(Ok(pkid)) => {
                debug!("Publish to {} acknowledged (pkid {})", topic, pkid);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Timeout(format!("waiting for acknowledgement on {}", topic))),
        }
    }

    async fn disconnect(&self) -> Result<()> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.take() {
            if let Err(e) = session.client.disconnect().await {
                debug!("MQTT disconnect request failed: {}", e);
            }
            session.poller.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
