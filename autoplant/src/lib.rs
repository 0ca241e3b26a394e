//! Automatic gardening daemon.
//!
//! Runs pump and lamp jobs from a cron-style table, samples climate and tank
//! sensors, and keeps an MQTT telemetry link to the cloud that publishes
//! readings and accepts remote actuation commands.

pub mod actuator;
pub mod cli;
pub mod config;
pub mod devices;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod telemetry;

pub use error::{Error, Result};
