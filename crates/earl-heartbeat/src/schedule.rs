use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule as CronSchedule;
use tracing::warn;

use crate::types::Schedule;

/// Compute the next UTC execution time for `schedule`, strictly after `from`.
///
/// Returns `None` when the schedule can never produce another run (an
/// unparseable cron expression is logged and treated as permanently due-never
/// rather than panicking the tick loop).
pub fn compute_next_run(schedule: &Schedule, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::Interval { seconds } => Some(from + Duration::seconds(*seconds as i64)),
        Schedule::Cron { expression } => match CronSchedule::from_str(expression) {
            Ok(parsed) => parsed.after(&from).next(),
            Err(e) => {
                warn!(expression, error = %e, "invalid cron expression, heartbeat will never fire");
                None
            }
        },
    }
}
