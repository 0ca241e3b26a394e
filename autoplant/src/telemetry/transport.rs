//! Seam between the telemetry link and the MQTT client library.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Delivery guarantee requested for a subscription or publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("connection rejected by broker: {0}")]
    Rejected(String),

    #[error("timed out waiting for the broker")]
    Timeout,

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("session closed")]
    Closed,
}

/// Identity presented when opening a session.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Identifies the session; echoed in every [`TransportEvent`] it produces.
    pub session: u64,
    pub client_id: String,
    pub username: String,
    pub password: String,
}

/// Inbound traffic from an open session.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Message {
        session: u64,
        topic: String,
        payload: Vec<u8>,
    },
    Disconnected {
        session: u64,
        reason: String,
    },
}

impl TransportEvent {
    pub fn session(&self) -> u64 {
        match self {
            Self::Message { session, .. } | Self::Disconnected { session, .. } => *session,
        }
    }
}

/// Opens broker sessions. Implementations push inbound traffic into `events`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        request: ConnectRequest,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Box<dyn Session>, TransportError>;
}

/// An established broker session.
#[async_trait]
pub trait Session: Send + Sync {
    async fn subscribe(&mut self, topic: &str, qos: Qos) -> Result<(), TransportError>;

    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: Qos,
    ) -> Result<(), TransportError>;

    async fn disconnect(&mut self) -> Result<(), TransportError>;
}
