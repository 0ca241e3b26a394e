//! Daemon configuration.
//!
//! Values come from an optional TOML file, then command-line flags and
//! environment variables override them (see [`crate::cli::Args`]). Every
//! field has a default, so an empty file is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::orchestrator::{OrchestratorConfig, SamplingConfig};
use crate::telemetry::{LinkConfig, SigningAlgorithm};

/// File looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "autoplant.toml";

/// Cron expressions have minute granularity, so the schedule must tick once a minute.
const REQUIRED_TICK_SECS: u64 = 60;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub schedule: ScheduleConfig,
    pub sensors: SensorConfig,
    pub actuators: ActuatorConfig,
    pub telemetry: TelemetryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Cron-style job table, re-read on every tick.
    pub file: PathBuf,
    pub tick_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("cron"),
            tick_secs: REQUIRED_TICK_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub period_secs: u64,
    /// Reads per measurement.
    pub samples: usize,
    pub sample_interval_ms: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            period_secs: 60,
            samples: 5,
            sample_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    /// Period for jobs that do not give one.
    pub default_duration_secs: u64,
    pub pump_check_interval_ms: u64,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            default_duration_secs: 10,
            pump_check_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub project_id: String,
    pub cloud_region: String,
    pub registry_id: String,
    pub device_id: String,
    pub private_key_file: PathBuf,
    pub algorithm: SigningAlgorithm,
    /// Root CA bundle. TLS is used whenever this is set.
    pub ca_certs: Option<PathBuf>,
    pub mqtt_bridge_hostname: String,
    pub mqtt_bridge_port: u16,
    pub credential_ttl_mins: u64,
    pub backoff_floor_secs: u64,
    pub backoff_ceiling_secs: u64,
    pub keep_alive_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            project_id: String::new(),
            cloud_region: "us-central1".to_string(),
            registry_id: String::new(),
            device_id: String::new(),
            private_key_file: PathBuf::from("rsa_private.pem"),
            algorithm: SigningAlgorithm::Rs256,
            ca_certs: Some(PathBuf::from("roots.pem")),
            mqtt_bridge_hostname: "mqtt.googleapis.com".to_string(),
            mqtt_bridge_port: 8883,
            credential_ttl_mins: 60,
            backoff_floor_secs: 1,
            backoff_ceiling_secs: 128,
            keep_alive_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for daily log files. Console only when unset.
    pub directory: Option<PathBuf>,
    pub retention_days: i64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            retention_days: 7,
        }
    }
}

impl AppConfig {
    /// Load from `path`, or from [`DEFAULT_CONFIG_FILE`] if it exists, or defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if !fallback.exists() {
                    debug!("no configuration file, using defaults");
                    return Ok(Self::default());
                }
                fallback
            }
        };

        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&content)
            .map_err(|e| Error::config(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(e.to_string()))
    }

    /// Check the invariants the daemon relies on.
    pub fn validate(&self) -> Result<()> {
        if self.schedule.tick_secs != REQUIRED_TICK_SECS {
            return Err(Error::config(format!(
                "schedule.tick_secs must be {REQUIRED_TICK_SECS} to match cron granularity, got {}",
                self.schedule.tick_secs
            )));
        }
        if self.sensors.period_secs == 0 {
            return Err(Error::config("sensors.period_secs must be positive"));
        }
        if self.sensors.samples == 0 {
            return Err(Error::config("sensors.samples must be positive"));
        }
        if self.actuators.pump_check_interval_ms == 0 {
            return Err(Error::config("actuators.pump_check_interval_ms must be positive"));
        }

        let telemetry = &self.telemetry;
        if telemetry.backoff_floor_secs == 0 {
            return Err(Error::config("telemetry.backoff_floor_secs must be positive"));
        }
        if telemetry.backoff_floor_secs > telemetry.backoff_ceiling_secs {
            return Err(Error::config(format!(
                "telemetry.backoff_floor_secs ({}) exceeds backoff_ceiling_secs ({})",
                telemetry.backoff_floor_secs, telemetry.backoff_ceiling_secs
            )));
        }

        if telemetry.enabled {
            for (name, value) in [
                ("project_id", &telemetry.project_id),
                ("registry_id", &telemetry.registry_id),
                ("device_id", &telemetry.device_id),
                ("cloud_region", &telemetry.cloud_region),
                ("mqtt_bridge_hostname", &telemetry.mqtt_bridge_hostname),
            ] {
                if value.trim().is_empty() {
                    return Err(Error::config(format!(
                        "telemetry.{name} is required when telemetry is enabled"
                    )));
                }
            }
            if telemetry.credential_ttl_mins == 0 {
                return Err(Error::config("telemetry.credential_ttl_mins must be positive"));
            }
        }

        Ok(())
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            schedule_file: self.schedule.file.clone(),
            tick_period: Duration::from_secs(self.schedule.tick_secs),
            sampling: SamplingConfig {
                period: Duration::from_secs(self.sensors.period_secs),
                samples: self.sensors.samples,
                interval: Duration::from_millis(self.sensors.sample_interval_ms),
            },
            default_duration: Duration::from_secs(self.actuators.default_duration_secs),
            pump_check_interval: Duration::from_millis(self.actuators.pump_check_interval_ms),
        }
    }

    pub fn link(&self) -> LinkConfig {
        let t = &self.telemetry;
        let mut link = LinkConfig::new(
            t.project_id.clone(),
            t.cloud_region.clone(),
            t.registry_id.clone(),
            t.device_id.clone(),
        );
        link.credential_ttl = Duration::from_secs(t.credential_ttl_mins.saturating_mul(60));
        link.backoff_floor = Duration::from_secs(t.backoff_floor_secs);
        link.backoff_ceiling = Duration::from_secs(t.backoff_ceiling_secs);
        link
    }
}
