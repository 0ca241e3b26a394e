//! Time-boxed, cancellable actuator routines.
//!
//! Every routine holds a [`SafeStateGuard`] for its whole lifetime, so the
//! actuator is switched off on every exit path: deadline, low water,
//! cancellation, device error, panic or abort of the owning task.

mod guard;
mod routine;

use std::fmt;
use std::time::Duration;

use cron_table::JobAction;

pub use guard::SafeStateGuard;
pub use routine::{PUMP_LEVEL_CHECK_INTERVAL, run_lamp, run_pump};

/// Which actuator a task drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActuatorKind {
    Pump,
    Lamp,
}

impl ActuatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pump => "pump",
            Self::Lamp => "lamp",
        }
    }
}

impl fmt::Display for ActuatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<JobAction> for ActuatorKind {
    fn from(action: JobAction) -> Self {
        match action {
            JobAction::Pump => Self::Pump,
            JobAction::Lamp => Self::Lamp,
        }
    }
}

/// Where an actuation request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOrigin {
    /// A job table entry.
    Schedule,
    /// A command received over the telemetry link.
    Remote,
}

impl fmt::Display for RequestOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schedule => f.write_str("schedule"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

/// A request to run one actuator for a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuatorRequest {
    pub kind: ActuatorKind,
    pub duration: Duration,
    pub origin: RequestOrigin,
}

impl ActuatorRequest {
    pub fn new(kind: ActuatorKind, duration: Duration, origin: RequestOrigin) -> Self {
        Self {
            kind,
            duration,
            origin,
        }
    }
}

/// How an actuator task ended. The actuator is in its safe state in every case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Ran until its deadline.
    Completed,
    /// The pump stopped early because the tank reported empty.
    LowWater,
    /// Cancelled through its token (shutdown).
    Cancelled,
    /// A device error ended the task.
    Failed(String),
}
