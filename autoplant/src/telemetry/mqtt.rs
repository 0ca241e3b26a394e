//! MQTT-over-TLS transport built on rumqttc.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    TlsConfiguration, Transport as WireTransport,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::transport::{ConnectRequest, Qos, Session, Transport, TransportError, TransportEvent};

const REQUEST_CHANNEL_CAPACITY: usize = 32;
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Broker endpoint settings shared by every session.
#[derive(Debug, Clone)]
pub struct MqttTransport {
    host: String,
    port: u16,
    ca_certs: Option<Vec<u8>>,
    keep_alive: Duration,
    connect_timeout: Duration,
}

impl MqttTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ca_certs: None,
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Use TLS, trusting the given PEM bundle of root certificates.
    pub fn with_ca_certs(mut self, pem: Vec<u8>) -> Self {
        self.ca_certs = Some(pem);
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn options(&self, request: &ConnectRequest) -> MqttOptions {
        let mut options = MqttOptions::new(request.client_id.clone(), self.host.clone(), self.port);
        options.set_credentials(request.username.clone(), request.password.clone());
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);

        if let Some(ca) = &self.ca_certs {
            options.set_transport(WireTransport::Tls(TlsConfiguration::Simple {
                ca: ca.clone(),
                alpn: None,
                client_auth: None,
            }));
        }

        options
    }
}

fn wire_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
    }
}

/// Poll the event loop until the broker acknowledges the connection.
async fn await_connack(eventloop: &mut EventLoop) -> Result<(), TransportError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(TransportError::Rejected(format!("{:?}", ack.code)))
                };
            }
            Ok(event) => trace!(?event, "event before connack"),
            Err(rumqttc::ConnectionError::Tls(e)) => return Err(TransportError::Tls(e.to_string())),
            Err(e) => return Err(TransportError::Connect(e.to_string())),
        }
    }
}

/// Forward inbound traffic until the connection ends.
///
/// rumqttc would reconnect on the next poll after an error; the link owns
/// reconnection instead, so the driver stops at the first failure.
async fn drive(mut eventloop: EventLoop, session: u64, events: mpsc::Sender<TransportEvent>) {
    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => TransportEvent::Message {
                session,
                topic: publish.topic.clone(),
                payload: publish.payload.to_vec(),
            },
            Ok(Event::Incoming(Packet::Disconnect)) => TransportEvent::Disconnected {
                session,
                reason: "broker sent disconnect".to_string(),
            },
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!(session, "client disconnect sent");
                return;
            }
            Ok(_) => continue,
            Err(e) => TransportEvent::Disconnected {
                session,
                reason: e.to_string(),
            },
        };

        let done = matches!(event, TransportEvent::Disconnected { .. });
        if events.send(event).await.is_err() || done {
            return;
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(
        &self,
        request: ConnectRequest,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Box<dyn Session>, TransportError> {
        debug!(
            host = %self.host,
            port = self.port,
            client_id = %request.client_id,
            "opening MQTT session"
        );

        let (client, mut eventloop) = AsyncClient::new(self.options(&request), REQUEST_CHANNEL_CAPACITY);

        tokio::time::timeout(self.connect_timeout, await_connack(&mut eventloop))
            .await
            .map_err(|_| TransportError::Timeout)??;

        let driver = tokio::spawn(drive(eventloop, request.session, events));

        Ok(Box::new(MqttSession { client, driver }))
    }
}

struct MqttSession {
    client: AsyncClient,
    driver: JoinHandle<()>,
}

#[async_trait]
impl Session for MqttSession {
    async fn subscribe(&mut self, topic: &str, qos: Qos) -> Result<(), TransportError> {
        self.client
            .subscribe(topic, wire_qos(qos))
            .await
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: Qos,
    ) -> Result<(), TransportError> {
        if self.driver.is_finished() {
            return Err(TransportError::Closed);
        }
        self.client
            .publish(topic, wire_qos(qos), false, payload)
            .await
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if self.driver.is_finished() {
            return Ok(());
        }

        let result = self
            .client
            .disconnect()
            .await
            .map_err(|e| TransportError::Request(e.to_string()));

        if tokio::time::timeout(DISCONNECT_GRACE, &mut self.driver).await.is_err() {
            warn!("MQTT driver did not stop after disconnect, aborting");
            self.driver.abort();
        }

        result
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        self.driver.abort();
    }
}
