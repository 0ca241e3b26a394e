//! In-memory device backend.
//!
//! Used by the daemon when no hardware backend is wired in (dry runs on a
//! development machine) and by tests, which script sensor readings and
//! inspect actuator writes.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::{Actuator, ClimateSensor, DeviceError, DeviceSet, Display, LevelSensor, WaterLevel};

/// Relay output that remembers every write.
#[derive(Debug)]
pub struct SimulatedActuator {
    name: String,
    active: AtomicBool,
    fail_activation: AtomicBool,
    writes: Mutex<Vec<bool>>,
}

impl SimulatedActuator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: AtomicBool::new(false),
            fail_activation: AtomicBool::new(false),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Make every later `set_active(true)` fail. Deactivation keeps working.
    pub fn fail_activation(&self, fail: bool) {
        self.fail_activation.store(fail, Ordering::SeqCst);
    }

    /// Every value written so far, oldest first.
    pub fn writes(&self) -> Vec<bool> {
        self.writes.lock().clone()
    }
}

impl Actuator for SimulatedActuator {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_active(&self, active: bool) -> Result<(), DeviceError> {
        if active && self.fail_activation.load(Ordering::SeqCst) {
            return Err(DeviceError::write(&self.name, "relay did not respond"));
        }
        self.writes.lock().push(active);
        let was = self.active.swap(active, Ordering::SeqCst);
        if was != active {
            debug!(device = %self.name, active, "actuator switched");
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Tank level switch with a settable state.
///
/// Scripted reads are returned first, in order, before the settable state.
#[derive(Debug)]
pub struct SimulatedLevel {
    empty: AtomicBool,
    script: Mutex<VecDeque<Result<WaterLevel, DeviceError>>>,
}

impl SimulatedLevel {
    pub fn new(level: WaterLevel) -> Self {
        Self {
            empty: AtomicBool::new(level.is_empty()),
            script: Mutex::new(VecDeque::new()),
        }
    }

    pub fn set(&self, level: WaterLevel) {
        self.empty.store(level.is_empty(), Ordering::SeqCst);
    }

    pub fn push_read(&self, read: Result<WaterLevel, DeviceError>) {
        self.script.lock().push_back(read);
    }
}

impl LevelSensor for SimulatedLevel {
    fn read_level(&self) -> Result<WaterLevel, DeviceError> {
        if let Some(scripted) = self.script.lock().pop_front() {
            return scripted;
        }
        if self.empty.load(Ordering::SeqCst) {
            Ok(WaterLevel::Empty)
        } else {
            Ok(WaterLevel::Full)
        }
    }
}

type ClimateResult = Result<(f32, f32), DeviceError>;

/// Temperature/humidity sensor.
///
/// Scripted readings are returned first, in order; afterwards it reports a
/// nominal value with a little noise.
#[derive(Debug)]
pub struct SimulatedClimate {
    nominal: (f32, f32),
    script: Mutex<VecDeque<ClimateResult>>,
}

impl SimulatedClimate {
    pub fn new(temperature: f32, humidity: f32) -> Self {
        Self {
            nominal: (temperature, humidity),
            script: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push_reading(&self, reading: ClimateResult) {
        self.script.lock().push_back(reading);
    }
}

impl ClimateSensor for SimulatedClimate {
    fn read_temperature_humidity(&self) -> ClimateResult {
        if let Some(scripted) = self.script.lock().pop_front() {
            return scripted;
        }
        let noise = || rand::random::<f32>() - 0.5;
        Ok((self.nominal.0 + noise(), self.nominal.1 + noise()))
    }
}

/// Display that keeps the last text and mirrors it to the log.
#[derive(Debug, Default)]
pub struct LogDisplay {
    text: Mutex<String>,
}

impl LogDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> String {
        self.text.lock().clone()
    }
}

impl Display for LogDisplay {
    fn clear(&self) {
        self.text.lock().clear();
    }

    fn show_text(&self, text: &str) {
        info!(target: "autoplant::display", "{}", text.replace('\n', " | "));
        self.text.lock().push_str(text);
    }
}

/// A complete simulated device set with typed access to each device.
#[derive(Debug, Clone)]
pub struct SimulatedDevices {
    pub pump: Arc<SimulatedActuator>,
    pub lamp: Arc<SimulatedActuator>,
    pub level: Arc<SimulatedLevel>,
    pub climate: Arc<SimulatedClimate>,
    pub display: Arc<LogDisplay>,
}

impl SimulatedDevices {
    pub fn new() -> Self {
        Self {
            pump: Arc::new(SimulatedActuator::new("pump")),
            lamp: Arc::new(SimulatedActuator::new("lamp")),
            level: Arc::new(SimulatedLevel::new(WaterLevel::Full)),
            climate: Arc::new(SimulatedClimate::new(22.0, 55.0)),
            display: Arc::new(LogDisplay::new()),
        }
    }

    pub fn device_set(&self) -> DeviceSet {
        DeviceSet {
            pump: self.pump.clone(),
            lamp: self.lamp.clone(),
            level: self.level.clone(),
            climate: self.climate.clone(),
            display: self.display.clone(),
        }
    }
}

impl Default for SimulatedDevices {
    fn default() -> Self {
        Self::new()
    }
}
