//! Command-line interface.

use std::path::PathBuf;

use clap::Parser;

use crate::config::AppConfig;
use crate::telemetry::SigningAlgorithm;

/// Automatic gardening daemon: runs pump and lamp jobs from a cron table
/// and reports to the cloud over MQTT.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TOML configuration file (defaults to ./autoplant.toml when present)
    #[arg(short, long, env = "AUTOPLANT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Which encryption algorithm to use to generate the JWT
    #[arg(long, value_enum, env = "AUTOPLANT_ALGORITHM")]
    pub algorithm: Option<SigningAlgorithm>,

    /// CA root bundle used to verify the MQTT bridge
    #[arg(long, env = "AUTOPLANT_CA_CERTS")]
    pub ca_certs: Option<PathBuf>,

    /// Cloud region
    #[arg(long, env = "AUTOPLANT_CLOUD_REGION")]
    pub cloud_region: Option<String>,

    /// Cloud IoT device id
    #[arg(long, env = "AUTOPLANT_DEVICE_ID")]
    pub device_id: Option<String>,

    /// MQTT bridge hostname
    #[arg(long, env = "AUTOPLANT_MQTT_BRIDGE_HOSTNAME")]
    pub mqtt_bridge_hostname: Option<String>,

    /// MQTT bridge port
    #[arg(long, env = "AUTOPLANT_MQTT_BRIDGE_PORT", value_parser = parse_bridge_port)]
    pub mqtt_bridge_port: Option<u16>,

    /// Path to the device's private key
    #[arg(long, env = "AUTOPLANT_PRIVATE_KEY_FILE")]
    pub private_key_file: Option<PathBuf>,

    /// Cloud project id
    #[arg(long, env = "AUTOPLANT_PROJECT_ID")]
    pub project_id: Option<String>,

    /// Cloud IoT registry id
    #[arg(long, env = "AUTOPLANT_REGISTRY_ID")]
    pub registry_id: Option<String>,

    /// Cron-style job table
    #[arg(long, env = "AUTOPLANT_SCHEDULE_FILE")]
    pub schedule_file: Option<PathBuf>,

    /// Connect to the MQTT bridge and publish telemetry
    #[arg(long, env = "AUTOPLANT_DO_MQTT")]
    pub do_mqtt: bool,

    /// Also write daily log files to this directory
    #[arg(long, env = "AUTOPLANT_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

fn parse_bridge_port(value: &str) -> Result<u16, String> {
    match value.parse::<u16>() {
        Ok(port @ (8883 | 443)) => Ok(port),
        _ => Err(format!("'{value}' is not a bridge port (expected 8883 or 443)")),
    }
}

impl Args {
    /// Override file values with the flags that were given.
    pub fn apply_to(&self, config: &mut AppConfig) {
        let telemetry = &mut config.telemetry;

        if let Some(algorithm) = self.algorithm {
            telemetry.algorithm = algorithm;
        }
        if let Some(ca_certs) = &self.ca_certs {
            telemetry.ca_certs = Some(ca_certs.clone());
        }
        if let Some(region) = &self.cloud_region {
            telemetry.cloud_region = region.clone();
        }
        if let Some(device_id) = &self.device_id {
            telemetry.device_id = device_id.clone();
        }
        if let Some(hostname) = &self.mqtt_bridge_hostname {
            telemetry.mqtt_bridge_hostname = hostname.clone();
        }
        if let Some(port) = self.mqtt_bridge_port {
            telemetry.mqtt_bridge_port = port;
        }
        if let Some(key) = &self.private_key_file {
            telemetry.private_key_file = key.clone();
        }
        if let Some(project_id) = &self.project_id {
            telemetry.project_id = project_id.clone();
        }
        if let Some(registry_id) = &self.registry_id {
            telemetry.registry_id = registry_id.clone();
        }
        if self.do_mqtt {
            telemetry.enabled = true;
        }

        if let Some(file) = &self.schedule_file {
            config.schedule.file = file.clone();
        }
        if let Some(dir) = &self.log_dir {
            config.logging.directory = Some(dir.clone());
        }
    }
}
