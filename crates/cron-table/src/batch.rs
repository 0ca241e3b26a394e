//! Resolution of the next batch of simultaneous jobs.

use std::time::Duration;

use chrono::{DateTime, Local};

use crate::entry::JobEntry;
use crate::error::ScheduleError;

/// Every entry sharing the earliest fire time in a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobBatch {
    pub fire_time: DateTime<Local>,
    pub jobs: Vec<JobEntry>,
}

impl JobBatch {
    /// Whether the batch should fire on a tick taken at `now`.
    ///
    /// A batch is due when its fire time is less than one tick `window`
    /// away. The window must equal the tick period and the cron granularity
    /// (one minute): a shorter tick misses fires, a longer one fires late.
    pub fn is_due(&self, now: DateTime<Local>, window: Duration) -> bool {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        self.fire_time - now < window
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Select all entries that share the minimum fire time.
///
/// Ties are not broken: every entry at the earliest instant is returned, in
/// table order.
pub fn next_batch(entries: &[JobEntry]) -> Result<JobBatch, ScheduleError> {
    let mut sorted: Vec<&JobEntry> = entries.iter().collect();
    // Stable sort keeps table order among equal fire times.
    sorted.sort_by_key(|e| e.fire_time);

    let first = sorted.first().ok_or(ScheduleError::EmptyTable)?;
    let fire_time = first.fire_time;

    let jobs = sorted
        .into_iter()
        .take_while(|e| e.fire_time == fire_time)
        .cloned()
        .collect();

    Ok(JobBatch { fire_time, jobs })
}
