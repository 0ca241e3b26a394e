//! Schedule file loading and batch resolution for one tick.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Local};
use cron_table::{ParsedTable, ScheduleError, next_batch, parse_table};
use tracing::{debug, info, warn};

use crate::actuator::{ActuatorRequest, RequestOrigin};
use crate::error::Result;

/// Read and parse the schedule file against `reference`.
///
/// The file is read afresh on every call, so edits take effect on the next tick.
pub async fn load_table(path: &Path, reference: DateTime<Local>) -> Result<ParsedTable> {
    let content = tokio::fs::read_to_string(path).await?;
    let table = parse_table(&content, reference);
    debug!(
        path = %path.display(),
        entries = table.entries.len(),
        rejected = table.rejected.len(),
        "schedule loaded"
    );
    Ok(table)
}

/// Turn the table's next batch into actuator requests if it is due at `now`.
///
/// Returns no requests when the table is empty or the batch lies more than
/// one `window` in the future. Jobs whose duration argument is not a whole
/// number of seconds are skipped.
pub fn due_requests(
    table: &ParsedTable,
    now: DateTime<Local>,
    window: Duration,
    default_duration: Duration,
) -> Vec<ActuatorRequest> {
    let batch = match next_batch(&table.entries) {
        Ok(batch) => batch,
        Err(ScheduleError::EmptyTable) => {
            debug!("no scheduled jobs");
            return Vec::new();
        }
    };

    if !batch.is_due(now, window) {
        debug!(next = %batch.fire_time.format("%Y-%m-%d %H:%M"), jobs = batch.len(), "next batch not due");
        return Vec::new();
    }

    batch
        .jobs
        .iter()
        .filter_map(|job| match job.duration(default_duration) {
            Ok(duration) => {
                info!(job = %job, "running scheduled job");
                Some(ActuatorRequest::new(
                    job.action.into(),
                    duration,
                    RequestOrigin::Schedule,
                ))
            }
            Err(e) => {
                warn!(job = %job, error = %e, "skipping scheduled job");
                None
            }
        })
        .collect()
}
