//! Cloud telemetry: MQTT session management, metric publishing and
//! remote command intake.

mod backoff;
mod command;
mod credential;
mod link;
mod mqtt;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::AppConfig;

pub use backoff::Backoff;
pub use command::{CommandError, RemoteCommand, decode_command};
pub use credential::{
    Claims, Credential, CredentialError, DEFAULT_CREDENTIAL_TTL, SigningAlgorithm, TokenSigner,
};
pub use link::{ConnectionState, LinkConfig, TelemetryLink};
pub use mqtt::MqttTransport;
pub use transport::{ConnectRequest, Qos, Session, Transport, TransportError, TransportEvent};

/// A single measurement to publish as `{key: value}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub key: String,
    pub value: serde_json::Value,
    /// Overrides the device's events topic.
    pub topic: Option<String>,
}

impl Metric {
    pub fn new(key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            topic: None,
        }
    }
}

const METRIC_CHANNEL_CAPACITY: usize = 32;
const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// Orchestrator-side ends of the channels connecting it to a running link.
#[derive(Debug)]
pub struct TelemetryChannels {
    pub metrics: mpsc::Sender<Metric>,
    pub commands: mpsc::Receiver<RemoteCommand>,
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("exceeded maximum backoff time ({ceiling:?}), giving up")]
    BackoffExhausted { ceiling: Duration },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("failed to read CA certificates {path}: {source}")]
    CaCertificates {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("not connected")]
    NotConnected,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("telemetry link cancelled")]
    Cancelled,
}

impl LinkError {
    /// Errors after which the link stops for good.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::BackoffExhausted { .. } | Self::Credential(_) | Self::CaCertificates { .. }
        )
    }
}

/// Run `link` on its own task and return the orchestrator's channel ends.
///
/// A fatal link error is logged when it happens; the task's result carries it
/// as well. Dropping the link closes the command channel.
pub fn spawn_link(link: TelemetryLink) -> (TelemetryChannels, JoinHandle<Result<(), LinkError>>) {
    let (metrics_tx, metrics_rx) = mpsc::channel(METRIC_CHANNEL_CAPACITY);
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

    let handle = tokio::spawn(async move {
        let result = link.run(metrics_rx, commands_tx).await;
        if let Err(e) = &result {
            error!(error = %e, "telemetry link stopped; scheduling continues without it");
        }
        result
    });

    (
        TelemetryChannels {
            metrics: metrics_tx,
            commands: commands_rx,
        },
        handle,
    )
}

/// Build the link described by `config`, loading the CA bundle and signing key.
pub fn build_link(config: &AppConfig, cancel: CancellationToken) -> Result<TelemetryLink, LinkError> {
    let t = &config.telemetry;

    let mut transport = MqttTransport::new(t.mqtt_bridge_hostname.clone(), t.mqtt_bridge_port)
        .with_keep_alive(Duration::from_secs(t.keep_alive_secs));
    if let Some(ca_certs) = &t.ca_certs {
        let pem = std::fs::read(ca_certs).map_err(|source| LinkError::CaCertificates {
            path: ca_certs.display().to_string(),
            source,
        })?;
        transport = transport.with_ca_certs(pem);
    }

    let signer = TokenSigner::from_pem_file(&t.private_key_file, t.algorithm)?;

    Ok(TelemetryLink::new(config.link(), Arc::new(transport), signer, cancel))
}

/// Start the telemetry link when it is enabled.
///
/// A link that cannot be built is logged and left out; scheduling and
/// actuation run without it.
pub fn start(
    config: &AppConfig,
    cancel: CancellationToken,
) -> Option<(TelemetryChannels, JoinHandle<Result<(), LinkError>>)> {
    if !config.telemetry.enabled {
        info!("telemetry disabled");
        return None;
    }

    match build_link(config, cancel) {
        Ok(link) => Some(spawn_link(link)),
        Err(e) => {
            error!(error = %e, "failed to set up telemetry; scheduling continues without it");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_config(dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.telemetry.enabled = true;
        config.telemetry.private_key_file = dir.join("rsa_private.pem");
        config.telemetry.ca_certs = Some(dir.join("roots.pem"));
        config
    }

    #[test]
    fn test_missing_ca_bundle_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = enabled_config(dir.path());

        let err = build_link(&config, CancellationToken::new()).unwrap_err();
        assert!(matches!(err, LinkError::CaCertificates { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_missing_private_key_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = enabled_config(dir.path());
        config.telemetry.ca_certs = None;

        let err = build_link(&config, CancellationToken::new()).unwrap_err();
        assert!(matches!(err, LinkError::Credential(CredentialError::KeyFile { .. })));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_start_without_usable_key_leaves_telemetry_out() {
        let dir = tempfile::tempdir().unwrap();
        let config = enabled_config(dir.path());

        assert!(start(&config, CancellationToken::new()).is_none());
    }

    #[tokio::test]
    async fn test_start_when_disabled() {
        assert!(start(&AppConfig::default(), CancellationToken::new()).is_none());
    }
}
