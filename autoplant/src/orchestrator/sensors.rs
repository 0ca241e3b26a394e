//! Periodic climate and tank sampling.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::devices::{ClimateReading, DeviceSet, WaterLevel, sample_climate, sample_level};
use crate::telemetry::Metric;

/// Result of one sampling round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSnapshot {
    pub climate: Option<ClimateReading>,
    pub level: Option<WaterLevel>,
}

impl SensorSnapshot {
    /// Status text for the character display.
    pub fn display_text(&self) -> String {
        if self.level == Some(WaterLevel::Empty) {
            return "tank empty".to_string();
        }
        match self.climate {
            Some(c) => format!("Temp: {:.1} C\nHumidity: {:.1} %", c.temperature, c.humidity),
            None => "sensor error".to_string(),
        }
    }

    /// Metrics to publish. Channels that could not be measured are left out.
    pub fn metrics(&self) -> Vec<Metric> {
        let mut metrics = Vec::with_capacity(3);
        if let Some(c) = self.climate {
            metrics.push(Metric::new("temp", round_tenth(c.temperature)));
            metrics.push(Metric::new("humid", round_tenth(c.humidity)));
        }
        if let Some(level) = self.level {
            metrics.push(Metric::new("level", level.as_str()));
        }
        metrics
    }
}

fn round_tenth(value: f32) -> f64 {
    (f64::from(value) * 10.0).round() / 10.0
}

#[derive(Debug, Clone, Copy)]
pub struct SamplingConfig {
    pub period: Duration,
    pub samples: usize,
    pub interval: Duration,
}

/// Sample every sensor once.
pub async fn measure(devices: &DeviceSet, config: &SamplingConfig) -> SensorSnapshot {
    let climate = sample_climate(devices.climate.as_ref(), config.samples, config.interval).await;
    let level = sample_level(devices.level.as_ref(), config.samples, config.interval).await;
    SensorSnapshot { climate, level }
}

/// Show, log and forward a snapshot.
pub fn report(devices: &DeviceSet, snapshot: &SensorSnapshot, metrics: Option<&mpsc::Sender<Metric>>) {
    devices.display.clear();
    devices.display.show_text(&snapshot.display_text());

    match (snapshot.climate, snapshot.level) {
        (Some(c), level) => info!(
            temperature = c.temperature,
            humidity = c.humidity,
            level = level.map(WaterLevel::as_str).unwrap_or("unknown"),
            "sensor reading"
        ),
        (None, level) => warn!(
            level = level.map(WaterLevel::as_str).unwrap_or("unknown"),
            "climate sensor produced no usable reading"
        ),
    }

    let Some(metrics) = metrics else {
        return;
    };
    for metric in snapshot.metrics() {
        match metrics.try_send(metric) {
            Ok(()) => {}
            Err(TrySendError::Full(metric)) => {
                debug!(key = %metric.key, "telemetry backlog full, dropping metric");
            }
            Err(TrySendError::Closed(_)) => {
                debug!("telemetry link gone, not publishing");
                return;
            }
        }
    }
}

/// Sample on a fixed period until cancelled.
pub async fn sensor_loop(
    devices: DeviceSet,
    config: SamplingConfig,
    metrics: Option<mpsc::Sender<Metric>>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let snapshot = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            snapshot = measure(&devices, &config) => snapshot,
        };

        report(&devices, &snapshot, metrics.as_ref());
    }

    debug!("sensor loop stopped");
}
