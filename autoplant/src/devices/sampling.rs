//! Repeated sampling of noisy sensors.
//!
//! Single DHT reads are unreliable, so a measurement is a series of reads
//! one interval apart. Climate values are averaged after dropping the
//! highest and lowest read; the level switch is decided by majority vote.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use super::{ClimateSensor, LevelSensor, WaterLevel};

/// Minimum number of successful reads needed to drop both extremes and
/// still have something to average.
const MIN_CLIMATE_READS: usize = 3;

/// Averaged climate measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClimateReading {
    pub temperature: f32,
    pub humidity: f32,
}

/// Take `samples` climate reads and average them without the extremes.
///
/// Failed reads are logged and skipped. Returns `None` when fewer than three
/// reads succeeded.
pub async fn sample_climate(
    sensor: &dyn ClimateSensor,
    samples: usize,
    interval: Duration,
) -> Option<ClimateReading> {
    let mut temperatures = Vec::with_capacity(samples);
    let mut humidities = Vec::with_capacity(samples);

    for _ in 0..samples {
        match sensor.read_temperature_humidity() {
            Ok((t, h)) => {
                temperatures.push(t);
                humidities.push(h);
            }
            Err(e) => warn!(error = %e, "climate read failed"),
        }
        tokio::time::sleep(interval).await;
    }

    let temperature = trimmed_mean(&mut temperatures)?;
    let humidity = trimmed_mean(&mut humidities)?;
    debug!(temperature, humidity, reads = temperatures.len(), "climate sampled");

    Some(ClimateReading {
        temperature,
        humidity,
    })
}

/// Take `samples` level reads and report the majority.
///
/// The tank counts as empty when more than half of the successful reads
/// say so. Returns `None` when every read failed.
pub async fn sample_level(
    sensor: &dyn LevelSensor,
    samples: usize,
    interval: Duration,
) -> Option<WaterLevel> {
    let mut reads = 0usize;
    let mut empties = 0usize;

    for _ in 0..samples {
        match sensor.read_level() {
            Ok(level) => {
                reads += 1;
                if level.is_empty() {
                    empties += 1;
                }
            }
            Err(e) => warn!(error = %e, "level read failed"),
        }
        tokio::time::sleep(interval).await;
    }

    if reads == 0 {
        return None;
    }

    Some(if empties * 2 > reads {
        WaterLevel::Empty
    } else {
        WaterLevel::Full
    })
}

/// Mean of `values` after removing one minimum and one maximum.
fn trimmed_mean(values: &mut [f32]) -> Option<f32> {
    if values.len() < MIN_CLIMATE_READS {
        return None;
    }
    values.sort_by(f32::total_cmp);
    let inner = &values[1..values.len() - 1];
    Some(inner.iter().sum::<f32>() / inner.len() as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::DeviceError;
    use crate::devices::sim::{SimulatedClimate, SimulatedLevel};

    const INTERVAL: Duration = Duration::from_secs(1);

    #[test]
    fn test_trimmed_mean_drops_extremes() {
        let mut values = [20.0, 50.0, 21.0, -10.0, 22.0];
        assert_eq!(trimmed_mean(&mut values), Some(21.0));
    }

    #[test]
    fn test_trimmed_mean_needs_three_values() {
        assert_eq!(trimmed_mean(&mut [1.0, 2.0]), None);
        assert_eq!(trimmed_mean(&mut [1.0, 2.0, 3.0]), Some(2.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sample_climate_discards_outliers() {
        let climate = SimulatedClimate::new(0.0, 0.0);
        for reading in [(21.0, 40.0), (80.0, 99.0), (22.0, 41.0), (-5.0, 1.0), (23.0, 42.0)] {
            climate.push_reading(Ok(reading));
        }

        let start = tokio::time::Instant::now();
        let reading = sample_climate(&climate, 5, INTERVAL).await.unwrap();

        assert_eq!(reading.temperature, 22.0);
        assert_eq!(reading.humidity, 41.0);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sample_climate_skips_failed_reads() {
        let climate = SimulatedClimate::new(0.0, 0.0);
        climate.push_reading(Err(DeviceError::transient("dht", "checksum")));
        for reading in [(20.0, 50.0), (21.0, 51.0), (22.0, 52.0), (23.0, 53.0)] {
            climate.push_reading(Ok(reading));
        }

        let reading = sample_climate(&climate, 5, INTERVAL).await.unwrap();
        assert_eq!(reading.temperature, 21.5);
        assert_eq!(reading.humidity, 51.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sample_climate_gives_up_with_too_few_reads() {
        let climate = SimulatedClimate::new(0.0, 0.0);
        for _ in 0..3 {
            climate.push_reading(Err(DeviceError::transient("dht", "timeout")));
        }
        climate.push_reading(Ok((20.0, 50.0)));
        climate.push_reading(Ok((21.0, 51.0)));

        assert_eq!(sample_climate(&climate, 5, INTERVAL).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sample_level_unanimous() {
        let level = SimulatedLevel::new(WaterLevel::Empty);
        assert_eq!(
            sample_level(&level, 5, INTERVAL).await,
            Some(WaterLevel::Empty)
        );

        level.set(WaterLevel::Full);
        assert_eq!(
            sample_level(&level, 5, INTERVAL).await,
            Some(WaterLevel::Full)
        );
    }

    fn scripted_level(reads: &[Option<WaterLevel>]) -> SimulatedLevel {
        let level = SimulatedLevel::new(WaterLevel::Full);
        for read in reads {
            level.push_read(read.ok_or_else(|| DeviceError::transient("level", "bounce")));
        }
        level
    }

    #[tokio::test(start_paused = true)]
    async fn test_sample_level_majority() {
        use WaterLevel::{Empty, Full};

        let cases: [([Option<WaterLevel>; 5], Option<WaterLevel>); 5] = [
            ([Some(Empty), Some(Full), Some(Empty), Some(Full), Some(Empty)], Some(Empty)),
            ([Some(Empty), Some(Full), Some(Full), Some(Empty), Some(Full)], Some(Full)),
            // Failed reads are left out of the vote: 2 of 3 successful reads.
            ([None, Some(Empty), None, Some(Empty), Some(Full)], Some(Empty)),
            // A tie is not a majority.
            ([Some(Empty), None, Some(Full), Some(Empty), Some(Full)], Some(Full)),
            ([None; 5], None),
        ];

        for (reads, expected) in cases {
            let level = scripted_level(&reads);
            let start = tokio::time::Instant::now();

            assert_eq!(
                sample_level(&level, reads.len(), INTERVAL).await,
                expected,
                "reads: {reads:?}"
            );
            assert_eq!(start.elapsed(), Duration::from_secs(5));
        }
    }
}
