use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{SafeStateGuard, TaskOutcome};
use crate::devices::{Actuator, LevelSensor, WaterLevel};

/// How often a running pump re-checks the tank level.
pub const PUMP_LEVEL_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Run the pump for up to `period`, polling the level switch every
/// `check_interval`.
///
/// The pump is only held on while the tank reports water. An empty tank ends
/// the task at the next poll instead of at the deadline.
pub async fn run_pump(
    pump: Arc<dyn Actuator>,
    level: Arc<dyn LevelSensor>,
    period: Duration,
    check_interval: Duration,
    cancel: CancellationToken,
) -> TaskOutcome {
    let guard = SafeStateGuard::new(pump);
    let started = Instant::now();
    let deadline = started.checked_add(period).unwrap_or_else(far_future);
    info!(period_secs = period.as_secs(), "will try to start pump");

    let outcome = loop {
        if Instant::now() >= deadline {
            break TaskOutcome::Completed;
        }

        match level.read_level() {
            Ok(WaterLevel::Empty) => {
                warn!("water level is too low; can not run pump");
                break TaskOutcome::LowWater;
            }
            Ok(WaterLevel::Full) => {}
            Err(e) => {
                error!(error = %e, "level check failed while pumping");
                break TaskOutcome::Failed(e.to_string());
            }
        }

        if let Err(e) = guard.actuator().set_active(true) {
            error!(error = %e, "failed to switch pump on");
            break TaskOutcome::Failed(e.to_string());
        }

        let wake = (Instant::now() + check_interval).min(deadline);
        tokio::select! {
            _ = cancel.cancelled() => break TaskOutcome::Cancelled,
            _ = tokio::time::sleep_until(wake) => {}
        }
    };

    drop(guard);
    info!(
        ran_secs = started.elapsed().as_secs_f32(),
        outcome = ?outcome,
        "stopping pump"
    );
    outcome
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365 * 30)
}

/// Keep the lamp on for `period`.
pub async fn run_lamp(
    lamp: Arc<dyn Actuator>,
    period: Duration,
    cancel: CancellationToken,
) -> TaskOutcome {
    let guard = SafeStateGuard::new(lamp);
    info!(period_secs = period.as_secs(), "will try to start lamp");

    let outcome = match guard.actuator().set_active(true) {
        Err(e) => {
            error!(error = %e, "failed to switch lamp on");
            TaskOutcome::Failed(e.to_string())
        }
        Ok(()) => tokio::select! {
            _ = cancel.cancelled() => TaskOutcome::Cancelled,
            _ = tokio::time::sleep(period) => TaskOutcome::Completed,
        },
    };

    drop(guard);
    info!(outcome = ?outcome, "stopping lamp");
    outcome
}
