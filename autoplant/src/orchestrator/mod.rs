//! The daemon's control loop.
//!
//! The orchestrator owns the device handles and runs three concerns side by
//! side: periodic sensor sampling, the schedule tick and remote command
//! intake. Every actuation becomes its own tracked task with a child
//! cancellation token, so shutdown can stop them all and wait until each
//! actuator is back in its safe state.

mod schedule;
mod sensors;

use std::path::PathBuf;
use std::time::Duration;

use chrono::Local;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::actuator::{
    ActuatorKind, ActuatorRequest, RequestOrigin, TaskOutcome, run_lamp, run_pump,
};
use crate::devices::DeviceSet;
use crate::error::Result;
use crate::telemetry::{RemoteCommand, TelemetryChannels};

pub use schedule::{due_requests, load_table};
pub use sensors::{SamplingConfig, SensorSnapshot, measure, report};

/// Timing and defaults for the control loop.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub schedule_file: PathBuf,
    /// Schedule evaluation period. Must match the one-minute cron granularity.
    pub tick_period: Duration,
    pub sampling: SamplingConfig,
    /// Period used for jobs that do not name one.
    pub default_duration: Duration,
    pub pump_check_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            schedule_file: PathBuf::from("cron"),
            tick_period: Duration::from_secs(60),
            sampling: SamplingConfig {
                period: Duration::from_secs(60),
                samples: 5,
                interval: Duration::from_secs(1),
            },
            default_duration: Duration::from_secs(10),
            pump_check_interval: crate::actuator::PUMP_LEVEL_CHECK_INTERVAL,
        }
    }
}

pub struct Orchestrator {
    devices: DeviceSet,
    config: OrchestratorConfig,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl Orchestrator {
    pub fn new(devices: DeviceSet, config: OrchestratorConfig, cancel: CancellationToken) -> Self {
        Self {
            devices,
            config,
            cancel,
            tasks: TaskTracker::new(),
        }
    }

    /// Number of actuator tasks currently running.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Start an actuator task. Returns `None` once shutdown has begun.
    pub fn spawn_actuator(&self, request: ActuatorRequest) -> Option<JoinHandle<TaskOutcome>> {
        if self.cancel.is_cancelled() {
            debug!(kind = %request.kind, "shutting down, not starting actuator task");
            return None;
        }

        let token = self.cancel.child_token();
        let devices = self.devices.clone();
        let check_interval = self.config.pump_check_interval;

        info!(
            kind = %request.kind,
            origin = %request.origin,
            duration_secs = request.duration.as_secs(),
            "starting actuator task"
        );

        Some(self.tasks.spawn(async move {
            let outcome = match request.kind {
                ActuatorKind::Pump => {
                    run_pump(devices.pump, devices.level, request.duration, check_interval, token).await
                }
                ActuatorKind::Lamp => run_lamp(devices.lamp, request.duration, token).await,
            };
            info!(kind = %request.kind, ?outcome, "actuator task finished");
            outcome
        }))
    }

    /// Start the task a remote command asks for.
    pub fn handle_command(&self, command: RemoteCommand) -> Option<JoinHandle<TaskOutcome>> {
        let kind = match command {
            RemoteCommand::PumpOn { .. } => ActuatorKind::Pump,
            RemoteCommand::LampOn { .. } => ActuatorKind::Lamp,
        };
        self.spawn_actuator(ActuatorRequest::new(kind, command.duration(), RequestOrigin::Remote))
    }

    /// One schedule tick: reload the table and start the due batch.
    ///
    /// Returns the number of tasks started.
    pub async fn evaluate_schedule(&self) -> usize {
        let now = Local::now();
        let table = match load_table(&self.config.schedule_file, now).await {
            Ok(table) => table,
            Err(e) => {
                warn!(
                    path = %self.config.schedule_file.display(),
                    error = %e,
                    "failed to load schedule"
                );
                return 0;
            }
        };

        let requests = due_requests(
            &table,
            now,
            self.config.tick_period,
            self.config.default_duration,
        );

        // Resolve the whole batch before starting any of it.
        requests
            .into_iter()
            .filter_map(|request| self.spawn_actuator(request))
            .count()
    }

    /// Run until the cancellation token fires, then stop every task.
    ///
    /// With `telemetry` present, sensor metrics are forwarded to the link and
    /// remote commands are accepted. If the link goes away, command intake
    /// stops and everything else keeps running.
    pub async fn run(self, telemetry: Option<TelemetryChannels>) -> Result<()> {
        self.devices.initialize()?;

        let (metrics, mut commands) = match telemetry {
            Some(channels) => (Some(channels.metrics), Some(channels.commands)),
            None => (None, None),
        };

        let sensor_task = tokio::spawn(sensors::sensor_loop(
            self.devices.clone(),
            self.config.sampling,
            metrics,
            self.cancel.child_token(),
        ));

        let mut schedule_tick = tokio::time::interval(self.config.tick_period);
        schedule_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            schedule = %self.config.schedule_file.display(),
            remote_commands = commands.is_some(),
            "orchestrator started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                command = next_command(&mut commands), if commands.is_some() => match command {
                    Some(command) => {
                        self.handle_command(command);
                    }
                    None => {
                        warn!("telemetry link stopped, remote commands disabled");
                        commands = None;
                    }
                },

                _ = schedule_tick.tick() => {
                    let started = self.evaluate_schedule().await;
                    if started > 0 {
                        debug!(started, "scheduled batch started");
                    }
                }
            }
        }

        self.shutdown(sensor_task).await;
        Ok(())
    }

    async fn shutdown(&self, sensor_task: JoinHandle<()>) {
        info!(in_flight = self.tasks.len(), "stopping orchestrator");
        self.tasks.close();
        self.tasks.wait().await;

        if let Err(e) = sensor_task.await {
            warn!(error = %e, "sensor loop ended abnormally");
        }
        info!("orchestrator stopped, actuators in safe state");
    }
}

async fn next_command(commands: &mut Option<mpsc::Receiver<RemoteCommand>>) -> Option<RemoteCommand> {
    match commands {
        Some(rx) => rx.recv().await,
        None => None,
    }
}
