//! Connection state machine for the device's broker session.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::Backoff;
use super::command::{RemoteCommand, decode_command};
use super::credential::{Credential, DEFAULT_CREDENTIAL_TTL, TokenSigner};
use super::transport::{ConnectRequest, Qos, Session, Transport, TransportError, TransportEvent};
use super::{LinkError, Metric};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Device identity and retry policy for a [`TelemetryLink`].
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub project_id: String,
    pub cloud_region: String,
    pub registry_id: String,
    pub device_id: String,
    /// The broker ignores the username; the credential goes in the password.
    pub username: String,
    pub credential_ttl: Duration,
    pub backoff_floor: Duration,
    pub backoff_ceiling: Duration,
    pub backoff_jitter: bool,
}

impl LinkConfig {
    pub fn new(
        project_id: impl Into<String>,
        cloud_region: impl Into<String>,
        registry_id: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            cloud_region: cloud_region.into(),
            registry_id: registry_id.into(),
            device_id: device_id.into(),
            username: "unused".to_string(),
            credential_ttl: DEFAULT_CREDENTIAL_TTL,
            backoff_floor: Duration::from_secs(1),
            backoff_ceiling: Duration::from_secs(128),
            backoff_jitter: true,
        }
    }

    pub fn client_id(&self) -> String {
        format!(
            "projects/{}/locations/{}/registries/{}/devices/{}",
            self.project_id, self.cloud_region, self.registry_id, self.device_id
        )
    }

    pub fn events_topic(&self) -> String {
        format!("/devices/{}/events", self.device_id)
    }

    pub fn config_topic(&self) -> String {
        format!("/devices/{}/config", self.device_id)
    }

    fn commands_prefix(&self) -> String {
        format!("/devices/{}/commands", self.device_id)
    }

    /// Wildcard filter covering every command subfolder.
    pub fn commands_subscription(&self) -> String {
        format!("{}/#", self.commands_prefix())
    }

    pub fn is_command_topic(&self, topic: &str) -> bool {
        let prefix = self.commands_prefix();
        topic
            .strip_prefix(prefix.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    BackoffWait,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::BackoffWait => "backoff_wait",
            Self::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Owns the broker session, its credential and the reconnect policy.
///
/// The link publishes metrics handed to it over a channel and forwards
/// decoded remote commands to the orchestrator. Every session gets a new id;
/// disconnect notices from older sessions are ignored.
pub struct TelemetryLink {
    config: LinkConfig,
    transport: Arc<dyn Transport>,
    signer: TokenSigner,
    state: ConnectionState,
    credential: Option<Credential>,
    session: Option<Box<dyn Session>>,
    session_id: u64,
    backoff: Backoff,
    events_tx: mpsc::Sender<TransportEvent>,
    events_rx: mpsc::Receiver<TransportEvent>,
    cancel: CancellationToken,
}

impl fmt::Debug for TelemetryLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryLink")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl TelemetryLink {
    pub fn new(
        config: LinkConfig,
        transport: Arc<dyn Transport>,
        signer: TokenSigner,
        cancel: CancellationToken,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let backoff = Backoff::new(config.backoff_floor, config.backoff_ceiling)
            .with_jitter(config.backoff_jitter);

        Self {
            config,
            transport,
            signer,
            state: ConnectionState::Disconnected,
            credential: None,
            session: None,
            session_id: 0,
            backoff,
            events_tx,
            events_rx,
            cancel,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// One connection attempt with a freshly minted credential.
    async fn try_connect(&mut self) -> Result<(), LinkError> {
        self.state = ConnectionState::Connecting;
        self.session_id += 1;

        let credential = self
            .signer
            .issue(&self.config.project_id, self.config.credential_ttl)?;

        let request = ConnectRequest {
            session: self.session_id,
            client_id: self.config.client_id(),
            username: self.config.username.clone(),
            password: credential.token().to_string(),
        };

        let mut session = self
            .transport
            .connect(request, self.events_tx.clone())
            .await?;

        if let Err(e) = subscribe_device_topics(session.as_mut(), &self.config).await {
            let _ = session.disconnect().await;
            return Err(e.into());
        }

        info!(
            session = self.session_id,
            client_id = %self.config.client_id(),
            "connected to broker"
        );

        self.session = Some(session);
        self.credential = Some(credential);
        self.state = ConnectionState::Connected;
        self.backoff.reset();
        Ok(())
    }

    /// Connect, retrying with exponential backoff until the ceiling is passed.
    pub async fn connect_with_retry(&mut self) -> Result<(), LinkError> {
        self.retry_loop(false).await
    }

    async fn retry_loop(&mut self, wait_first: bool) -> Result<(), LinkError> {
        let mut attempt = !wait_first;

        loop {
            if attempt {
                let cancel = self.cancel.clone();
                let connected = tokio::select! {
                    _ = cancel.cancelled() => Err(LinkError::Cancelled),
                    result = self.try_connect() => result,
                };
                match connected {
                    Ok(()) => return Ok(()),
                    Err(LinkError::Cancelled) => {
                        self.state = ConnectionState::Disconnected;
                        return Err(LinkError::Cancelled);
                    }
                    Err(e) if e.is_fatal() => {
                        self.state = ConnectionState::Disconnected;
                        return Err(e);
                    }
                    Err(e) => warn!(session = self.session_id, error = %e, "connection attempt failed"),
                }
            }
            attempt = true;

            self.state = ConnectionState::BackoffWait;
            let Some(delay) = self.backoff.next_delay() else {
                self.state = ConnectionState::Disconnected;
                error!(
                    ceiling = ?self.config.backoff_ceiling,
                    "exceeded maximum backoff time, giving up"
                );
                return Err(LinkError::BackoffExhausted {
                    ceiling: self.config.backoff_ceiling,
                });
            };

            debug!(delay_ms = delay.as_millis() as u64, "waiting before reconnecting");
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.state = ConnectionState::Disconnected;
                    return Err(LinkError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.disconnect().await {
                warn!(session = self.session_id, error = %e, "error while disconnecting");
            }
        }
        self.state = ConnectionState::Disconnected;
    }

    async fn refresh_if_stale(&mut self) -> Result<(), LinkError> {
        let Some(credential) = &self.credential else {
            return Ok(());
        };
        if self.state != ConnectionState::Connected || !credential.is_stale() {
            return Ok(());
        }

        info!(
            age_secs = credential.age().as_secs(),
            "credential expired, reconnecting with a new one"
        );
        self.close_session().await;
        self.connect_with_retry().await
    }

    /// Publish `{key: value}` at least once, refreshing the credential first
    /// if it has outlived its TTL.
    pub async fn publish(&mut self, metric: &Metric) -> Result<(), LinkError> {
        self.refresh_if_stale().await?;

        let topic = metric
            .topic
            .clone()
            .unwrap_or_else(|| self.config.events_topic());

        let mut body = serde_json::Map::new();
        body.insert(metric.key.clone(), metric.value.clone());
        let payload = serde_json::to_vec(&body)?;

        let session = match (self.state, self.session.as_mut()) {
            (ConnectionState::Connected, Some(session)) => session,
            _ => return Err(LinkError::NotConnected),
        };

        session.publish(&topic, payload, Qos::AtLeastOnce).await?;
        debug!(%topic, key = %metric.key, "published metric");
        Ok(())
    }

    /// React to inbound traffic from the transport.
    pub async fn handle_event(
        &mut self,
        event: TransportEvent,
        commands: &mpsc::Sender<RemoteCommand>,
    ) -> Result<(), LinkError> {
        match event {
            TransportEvent::Message { topic, payload, .. } => {
                self.dispatch_message(&topic, &payload, commands).await;
                Ok(())
            }
            TransportEvent::Disconnected { session, reason } => {
                if session != self.session_id || self.state != ConnectionState::Connected {
                    debug!(session, %reason, "ignoring disconnect of a previous session");
                    return Ok(());
                }

                warn!(session, %reason, "connection to broker lost");
                self.session = None;
                self.retry_loop(true).await
            }
        }
    }

    async fn dispatch_message(
        &self,
        topic: &str,
        payload: &[u8],
        commands: &mpsc::Sender<RemoteCommand>,
    ) {
        if payload.is_empty() {
            debug!(topic, "ignoring empty message");
            return;
        }

        if topic == self.config.config_topic() {
            info!(bytes = payload.len(), "received device configuration, ignoring");
            return;
        }

        if !self.config.is_command_topic(topic) {
            debug!(topic, "message on unhandled topic");
            return;
        }

        match decode_command(payload) {
            Ok(command) => {
                info!(?command, "received remote command");
                if commands.send(command).await.is_err() {
                    debug!("command receiver closed, dropping command");
                }
            }
            Err(e) => warn!(topic, error = %e, "ignoring invalid command"),
        }
    }

    /// Disconnect if connected. Safe to call repeatedly.
    pub async fn shutdown(&mut self) {
        if self.session.is_some() {
            self.close_session().await;
            info!("disconnected from broker");
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Connect, then serve metrics and inbound events until cancelled.
    ///
    /// Returns an error only when the link cannot continue, for example
    /// after the backoff ceiling has been exceeded.
    pub async fn run(
        mut self,
        mut metrics: mpsc::Receiver<Metric>,
        commands: mpsc::Sender<RemoteCommand>,
    ) -> Result<(), LinkError> {
        let result = self.serve(&mut metrics, &commands).await;
        self.shutdown().await;

        match result {
            Err(LinkError::Cancelled) => Ok(()),
            other => other,
        }
    }

    async fn serve(
        &mut self,
        metrics: &mut mpsc::Receiver<Metric>,
        commands: &mpsc::Sender<RemoteCommand>,
    ) -> Result<(), LinkError> {
        self.connect_with_retry().await?;

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return Ok(()),

                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event, commands).await?;
                }

                metric = metrics.recv() => {
                    let Some(metric) = metric else {
                        debug!("metric channel closed");
                        return Ok(());
                    };
                    if let Err(e) = self.publish(&metric).await {
                        if e.is_fatal() || matches!(e, LinkError::Cancelled) {
                            return Err(e);
                        }
                        warn!(key = %metric.key, error = %e, "failed to publish metric");
                    }
                }
            }
        }
    }
}

async fn subscribe_device_topics(
    session: &mut dyn Session,
    config: &LinkConfig,
) -> Result<(), TransportError> {
    session
        .subscribe(&config.config_topic(), Qos::AtLeastOnce)
        .await?;
    session
        .subscribe(&config.commands_subscription(), Qos::AtMostOnce)
        .await
}
