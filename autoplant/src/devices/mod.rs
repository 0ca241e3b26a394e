//! Hardware collaborator boundary.
//!
//! The daemon never touches GPIO directly. Sensors, actuators and the status
//! display are reached through the traits below, and a [`DeviceSet`] of
//! explicitly owned handles is passed to the orchestrator at construction.

pub mod sampling;
pub mod sim;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

pub use sampling::{ClimateReading, sample_climate, sample_level};

/// Errors reported by device collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// A read failed but may succeed if retried (e.g. DHT checksum errors).
    #[error("transient read failure on {device}: {reason}")]
    TransientRead { device: String, reason: String },

    #[error("failed to drive {device}: {reason}")]
    Write { device: String, reason: String },
}

impl DeviceError {
    pub fn transient(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TransientRead {
            device: device.into(),
            reason: reason.into(),
        }
    }

    pub fn write(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Write {
            device: device.into(),
            reason: reason.into(),
        }
    }
}

/// Reading of the tank level switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaterLevel {
    Full,
    Empty,
}

impl WaterLevel {
    pub fn is_empty(self) -> bool {
        self == Self::Empty
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Empty => "empty",
        }
    }
}

impl fmt::Display for WaterLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An on/off output such as a relay.
///
/// `set_active(false)` is the safe state: the physical device is off.
/// Concurrent writers are not serialized; the last write wins.
pub trait Actuator: Send + Sync {
    fn name(&self) -> &str;

    fn set_active(&self, active: bool) -> Result<(), DeviceError>;

    fn is_active(&self) -> bool;
}

/// The tank level switch.
pub trait LevelSensor: Send + Sync {
    fn read_level(&self) -> Result<WaterLevel, DeviceError>;
}

/// Combined temperature (°C) and relative humidity (%) sensor.
pub trait ClimateSensor: Send + Sync {
    fn read_temperature_humidity(&self) -> Result<(f32, f32), DeviceError>;
}

/// Character display for human-readable status.
pub trait Display: Send + Sync {
    fn clear(&self);

    fn show_text(&self, text: &str);
}

/// Handles to every device the daemon drives.
#[derive(Clone)]
pub struct DeviceSet {
    pub pump: Arc<dyn Actuator>,
    pub lamp: Arc<dyn Actuator>,
    pub level: Arc<dyn LevelSensor>,
    pub climate: Arc<dyn ClimateSensor>,
    pub display: Arc<dyn Display>,
}

impl DeviceSet {
    /// Put every actuator into its safe state and announce readiness.
    pub fn initialize(&self) -> Result<(), DeviceError> {
        self.display.clear();
        self.display.show_text("initializing...");

        self.pump.set_active(false)?;
        self.lamp.set_active(false)?;

        self.display.clear();
        self.display.show_text("init done");
        info!("devices initialized, actuators in safe state");
        Ok(())
    }
}
