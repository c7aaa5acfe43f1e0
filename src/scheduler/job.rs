use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a job does when its worker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    /// Periodic poll of actual machine state; never changes power state.
    Refresh,
    Start,
    Stop,
    /// Safety net: forced power-off after a stop window closed, fired
    /// regardless of whether the graceful stop took effect.
    Kill,
    ManualStart,
    ManualStop,
}

impl JobKind {
    pub fn is_manual(&self) -> bool {
        matches!(self, JobKind::ManualStart | JobKind::ManualStop)
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Refresh => write!(f, "refresh"),
            JobKind::Start => write!(f, "start"),
            JobKind::Stop => write!(f, "stop"),
            JobKind::Kill => write!(f, "kill"),
            JobKind::ManualStart => write!(f, "manual-start"),
            JobKind::ManualStop => write!(f, "manual-stop"),
        }
    }
}

/// Structured job identifier: `(cluster, kind, fire instant)`.
///
/// Timed jobs carry their fire instant; manual and periodic jobs carry
/// `None`, so re-deriving the same job always yields the same identity.
/// Re-issuing a manual command therefore replaces rather than duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId {
    pub cluster: String,
    pub kind: JobKind,
    pub fire: Option<DateTime<Utc>>,
}

impl JobId {
    pub fn timed(cluster: impl Into<String>, kind: JobKind, fire: DateTime<Utc>) -> Self {
        Self {
            cluster: cluster.into(),
            kind,
            fire: Some(fire),
        }
    }

    pub fn manual(cluster: impl Into<String>, kind: JobKind) -> Self {
        debug_assert!(kind.is_manual());
        Self {
            cluster: cluster.into(),
            kind,
            fire: None,
        }
    }

    pub fn refresh(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            kind: JobKind::Refresh,
            fire: None,
        }
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.kind, self.fire) {
            (JobKind::Refresh, _) => write!(f, "refresh-{}", self.cluster),
            (kind, Some(at)) => write!(f, "{}-{}-{}", kind, self.cluster, at.to_rfc3339()),
            (kind, None) => write!(f, "{}-{}", kind, self.cluster),
        }
    }
}

/// When a job fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// One-shot, at a fixed instant.
    At(DateTime<Utc>),
    /// Periodic, at a fixed interval.
    Every(Duration),
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::At(at) => write!(f, "at {}", at.to_rfc3339()),
            Trigger::Every(interval) => write!(f, "every {}s", interval.as_secs()),
        }
    }
}

/// A concretely timed unit of work the scheduler will execute.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub id: JobId,
    pub trigger: Trigger,
    pub created_at: DateTime<Utc>,
}

impl JobSpec {
    pub fn new(id: JobId, trigger: Trigger, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            trigger,
            created_at,
        }
    }
}

/// Registry snapshot entry as shown to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub name: String,
    pub trigger: String,
    pub uptime_since: Option<DateTime<Utc>>,
}
