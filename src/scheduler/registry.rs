use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::{Result, SchedError};
use crate::scheduler::job::{JobId, JobSpec, JobView};

/// Lifecycle of one registered job.
///
/// One-shot jobs go `Scheduled -> Running` and are removed on completion;
/// periodic jobs cycle `Scheduled <-> Running` and sit in `Paused` while
/// nobody is observing. A job can only be cancelled (removed) while it is
/// not `Running`; an in-flight worker always runs to termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Scheduled { due: DateTime<Utc> },
    Paused,
    Running,
}

#[derive(Debug)]
pub struct JobEntry {
    pub spec: JobSpec,
    pub state: JobState,
    /// Set when a worker is spawned for this job, cleared when it terminates.
    pub active_since: Option<DateTime<Utc>>,
}

/// Live registry of jobs, exclusively owned by the scheduler's control task.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: HashMap<JobId, JobEntry>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job. A name collision is an error for the caller to log
    /// and swallow; the existing entry is left untouched.
    pub fn insert(&mut self, spec: JobSpec, state: JobState) -> Result<()> {
        if self.jobs.contains_key(&spec.id) {
            return Err(SchedError::DuplicateJob(spec.id.to_string()));
        }
        self.jobs.insert(
            spec.id.clone(),
            JobEntry {
                spec,
                state,
                active_since: None,
            },
        );
        Ok(())
    }

    pub fn remove(&mut self, id: &JobId) -> Option<JobEntry> {
        self.jobs.remove(id)
    }

    /// Drop every entry. Timers of scheduled jobs die with their entries;
    /// already-running workers are not cancelled, their completion messages
    /// will simply find no entry.
    pub fn clear(&mut self) {
        self.jobs.clear();
    }

    pub fn get(&self, id: &JobId) -> Option<&JobEntry> {
        self.jobs.get(id)
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.jobs.contains_key(id)
    }

    /// Earliest due instant over all scheduled jobs, if any.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.jobs
            .values()
            .filter_map(|e| match e.state {
                JobState::Scheduled { due } => Some(due),
                _ => None,
            })
            .min()
    }

    /// Ids of all scheduled jobs whose due instant has arrived.
    pub fn due_jobs(&self, now: DateTime<Utc>) -> Vec<JobId> {
        self.jobs
            .iter()
            .filter(|(_, e)| matches!(e.state, JobState::Scheduled { due } if due <= now))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn mark_running(&mut self, id: &JobId, now: DateTime<Utc>) -> bool {
        match self.jobs.get_mut(id) {
            Some(entry) => {
                entry.state = JobState::Running;
                entry.active_since = Some(now);
                true
            }
            None => false,
        }
    }

    /// Return a periodic job to `Scheduled` after its worker terminated.
    pub fn mark_scheduled(&mut self, id: &JobId, due: DateTime<Utc>) -> bool {
        match self.jobs.get_mut(id) {
            Some(entry) => {
                entry.state = JobState::Scheduled { due };
                entry.active_since = None;
                true
            }
            None => false,
        }
    }

    /// Park a periodic job; it keeps its registry entry but no timer.
    pub fn pause(&mut self, id: &JobId) -> bool {
        match self.jobs.get_mut(id) {
            Some(entry) => {
                entry.state = JobState::Paused;
                entry.active_since = None;
                true
            }
            None => false,
        }
    }

    /// Snapshot for observers, sorted by job name.
    pub fn views(&self) -> Vec<JobView> {
        let mut views: Vec<JobView> = self
            .jobs
            .values()
            .map(|e| JobView {
                name: e.spec.id.to_string(),
                trigger: e.spec.trigger.to_string(),
                uptime_since: e.active_since,
            })
            .collect();
        views.sort_by(|a, b| a.name.cmp(&b.name));
        views
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::{JobKind, Trigger};
    use chrono::TimeZone;
    use std::time::Duration;

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 11, hour, 0, 0).unwrap()
    }

    fn timed_spec(cluster: &str, kind: JobKind, at: DateTime<Utc>) -> JobSpec {
        JobSpec::new(JobId::timed(cluster, kind, at), Trigger::At(at), t(0))
    }

    fn refresh_spec(cluster: &str) -> JobSpec {
        JobSpec::new(
            JobId::refresh(cluster),
            Trigger::Every(Duration::from_secs(60)),
            t(0),
        )
    }

    #[test]
    fn duplicate_insert_is_rejected_and_keeps_original() {
        let mut registry = JobRegistry::new();
        let spec = timed_spec("alpha", JobKind::Start, t(9));

        registry
            .insert(spec.clone(), JobState::Scheduled { due: t(9) })
            .unwrap();
        let err = registry
            .insert(spec.clone(), JobState::Scheduled { due: t(10) })
            .unwrap_err();
        assert!(matches!(err, SchedError::DuplicateJob(_)));

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get(&spec.id).unwrap().state,
            JobState::Scheduled { due: t(9) }
        );
    }

    #[test]
    fn next_due_picks_earliest_scheduled_job() {
        let mut registry = JobRegistry::new();
        registry
            .insert(
                timed_spec("alpha", JobKind::Stop, t(12)),
                JobState::Scheduled { due: t(12) },
            )
            .unwrap();
        registry
            .insert(
                timed_spec("alpha", JobKind::Start, t(9)),
                JobState::Scheduled { due: t(9) },
            )
            .unwrap();
        registry
            .insert(refresh_spec("alpha"), JobState::Paused)
            .unwrap();

        assert_eq!(registry.next_due(), Some(t(9)));
    }

    #[test]
    fn paused_and_running_jobs_have_no_due_instant() {
        let mut registry = JobRegistry::new();
        registry
            .insert(refresh_spec("alpha"), JobState::Paused)
            .unwrap();
        assert_eq!(registry.next_due(), None);

        registry.mark_running(&JobId::refresh("alpha"), t(9));
        assert_eq!(registry.next_due(), None);
        assert!(registry.due_jobs(t(23)).is_empty());
    }

    #[test]
    fn due_jobs_returns_everything_at_or_past_due() {
        let mut registry = JobRegistry::new();
        registry
            .insert(
                timed_spec("alpha", JobKind::Start, t(9)),
                JobState::Scheduled { due: t(9) },
            )
            .unwrap();
        registry
            .insert(
                timed_spec("beta", JobKind::Start, t(10)),
                JobState::Scheduled { due: t(10) },
            )
            .unwrap();

        let due = registry.due_jobs(t(9));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0], JobId::timed("alpha", JobKind::Start, t(9)));
        assert_eq!(registry.due_jobs(t(11)).len(), 2);
    }

    #[test]
    fn running_job_tracks_uptime_and_rescheduling_clears_it() {
        let mut registry = JobRegistry::new();
        let id = JobId::refresh("alpha");
        registry
            .insert(refresh_spec("alpha"), JobState::Paused)
            .unwrap();

        assert!(registry.mark_running(&id, t(9)));
        assert_eq!(registry.get(&id).unwrap().active_since, Some(t(9)));

        assert!(registry.mark_scheduled(&id, t(10)));
        let entry = registry.get(&id).unwrap();
        assert_eq!(entry.state, JobState::Scheduled { due: t(10) });
        assert_eq!(entry.active_since, None);
    }

    #[test]
    fn transitions_on_unknown_job_report_false() {
        let mut registry = JobRegistry::new();
        let id = JobId::refresh("ghost");
        assert!(!registry.mark_running(&id, t(9)));
        assert!(!registry.mark_scheduled(&id, t(9)));
        assert!(!registry.pause(&id));
    }

    #[test]
    fn clear_drops_all_entries() {
        let mut registry = JobRegistry::new();
        registry
            .insert(refresh_spec("alpha"), JobState::Paused)
            .unwrap();
        registry
            .insert(
                timed_spec("alpha", JobKind::Start, t(9)),
                JobState::Scheduled { due: t(9) },
            )
            .unwrap();
        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.next_due(), None);
    }

    #[test]
    fn views_are_sorted_and_expose_trigger_and_uptime() {
        let mut registry = JobRegistry::new();
        registry
            .insert(refresh_spec("beta"), JobState::Paused)
            .unwrap();
        registry
            .insert(refresh_spec("alpha"), JobState::Paused)
            .unwrap();
        registry.mark_running(&JobId::refresh("alpha"), t(9));

        let views = registry.views();
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].name, "refresh-alpha");
        assert_eq!(views[0].trigger, "every 60s");
        assert_eq!(views[0].uptime_since, Some(t(9)));
        assert_eq!(views[1].name, "refresh-beta");
        assert_eq!(views[1].uptime_since, None);
    }
}
