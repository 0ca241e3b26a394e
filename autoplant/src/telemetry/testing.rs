//! In-memory transport for exercising the link without a broker.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::transport::{ConnectRequest, Qos, Session, Transport, TransportError, TransportEvent};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Published {
    pub session: u64,
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
}

#[derive(Default)]
struct FakeState {
    failures_remaining: usize,
    always_fail: bool,
    stall: bool,
    connects: Vec<ConnectRequest>,
    subscriptions: Vec<(u64, String, Qos)>,
    published: Vec<Published>,
    disconnects: Vec<u64>,
    events: Option<(u64, mpsc::Sender<TransportEvent>)>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `count` connection attempts.
    pub fn failing_first(count: usize) -> Self {
        let transport = Self::new();
        transport.state.lock().failures_remaining = count;
        transport
    }

    pub fn always_failing() -> Self {
        let transport = Self::new();
        transport.state.lock().always_fail = true;
        transport
    }

    /// Never answer a connection attempt.
    pub fn stalled() -> Self {
        let transport = Self::new();
        transport.state.lock().stall = true;
        transport
    }

    pub fn connects(&self) -> Vec<ConnectRequest> {
        self.state.lock().connects.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connects.len()
    }

    pub fn subscriptions(&self) -> Vec<(u64, String, Qos)> {
        self.state.lock().subscriptions.clone()
    }

    pub fn published(&self) -> Vec<Published> {
        self.state.lock().published.clone()
    }

    pub fn disconnects(&self) -> Vec<u64> {
        self.state.lock().disconnects.clone()
    }

    /// Deliver an inbound message on the most recent session.
    pub async fn inject(&self, topic: &str, payload: &[u8]) {
        let target = self.state.lock().events.clone();
        if let Some((session, events)) = target {
            let _ = events
                .send(TransportEvent::Message {
                    session,
                    topic: topic.to_string(),
                    payload: payload.to_vec(),
                })
                .await;
        }
    }

    /// Simulate the broker dropping the most recent session.
    pub async fn drop_connection(&self, reason: &str) {
        let target = self.state.lock().events.clone();
        if let Some((session, events)) = target {
            let _ = events
                .send(TransportEvent::Disconnected {
                    session,
                    reason: reason.to_string(),
                })
                .await;
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(
        &self,
        request: ConnectRequest,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Box<dyn Session>, TransportError> {
        let stall = {
            let mut state = self.state.lock();
            state.connects.push(request.clone());
            state.stall
        };
        if stall {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock();
        let session = request.session;

        if state.always_fail {
            return Err(TransportError::Connect("connection refused".to_string()));
        }
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        state.events = Some((session, events));
        Ok(Box::new(FakeSession {
            session,
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeSession {
    session: u64,
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl Session for FakeSession {
    async fn subscribe(&mut self, topic: &str, qos: Qos) -> Result<(), TransportError> {
        self.state
            .lock()
            .subscriptions
            .push((self.session, topic.to_string(), qos));
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: Qos,
    ) -> Result<(), TransportError> {
        self.state.lock().published.push(Published {
            session: self.session,
            topic: topic.to_string(),
            payload,
            qos,
        });
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.state.lock().disconnects.push(self.session);
        Ok(())
    }
}
