use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

use crate::interval::Schedule;
use crate::scheduler::job::{JobId, JobKind, JobSpec, Trigger};

/// Poll interval of the per-cluster refresh job.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Grace period between a window's graceful stop and its forced power-off.
pub const KILL_GRACE_MINUTES: i64 = 30;

/// Turn one cluster's schedule into the set of jobs that must exist.
///
/// Always yields the cluster's periodic refresh job (the caller decides
/// whether it is active). Every window with a future `from` yields a start
/// job, every window with a future `to` a stop job, and a kill job fires
/// 30 minutes after `to` if that instant is still ahead. Windows entirely
/// in the past yield nothing.
pub fn compile(now: DateTime<Utc>, cluster: &str, schedule: &Schedule) -> Vec<JobSpec> {
    let mut jobs = vec![JobSpec::new(
        JobId::refresh(cluster),
        Trigger::Every(REFRESH_INTERVAL),
        now,
    )];

    for window in schedule.windows() {
        if window.from > now {
            jobs.push(JobSpec::new(
                JobId::timed(cluster, JobKind::Start, window.from),
                Trigger::At(window.from),
                now,
            ));
        }

        if window.to > now {
            jobs.push(JobSpec::new(
                JobId::timed(cluster, JobKind::Stop, window.to),
                Trigger::At(window.to),
                now,
            ));
        }

        let kill_at = window.to + ChronoDuration::minutes(KILL_GRACE_MINUTES);
        if kill_at > now {
            jobs.push(JobSpec::new(
                JobId::timed(cluster, JobKind::Kill, kill_at),
                Trigger::At(kill_at),
                now,
            ));
        }
    }

    jobs
}
