//! The JobScheduler control task.
//!
//! Everything here runs on one tokio task: incoming commands, timer
//! firings and worker messages are dispatched through a single
//! `tokio::select!` loop, so the job registry, status cache and session
//! set need no locks. Anything that talks to the actuator is delegated to
//! spawned workers that report back over a typed channel.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::actuator::Actuator;
use crate::config::{Cluster, ConfigStore, RawDocuments, ScheduleEntry};
use crate::error::{Result, SchedError};
use crate::events::{Event, EventBroadcaster, SessionId};
use crate::interval::Schedule;
use crate::scheduler::compile::{self, REFRESH_INTERVAL};
use crate::scheduler::job::{JobId, JobKind, JobSpec, JobView, Trigger};
use crate::scheduler::registry::{JobRegistry, JobState};
use crate::status::{MachineState, StatusCache};
use crate::worker::{self, WorkerConfig, WorkerEvent, WorkerMessage};

/// One cluster as presented to observers: credentials stripped, machine
/// states resolved from the status cache, schedule attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterView {
    pub name: String,
    pub url: String,
    pub machines: Vec<MachineView>,
    pub schedule: Schedule,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineView {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub state: MachineState,
}

/// Commands accepted by the scheduler's control task.
#[derive(Debug)]
enum Command {
    Reload {
        reply: oneshot::Sender<Result<()>>,
    },
    RunNow {
        cluster: String,
        kind: JobKind,
        reply: oneshot::Sender<Result<()>>,
    },
    ListJobs {
        reply: oneshot::Sender<Vec<JobView>>,
    },
    GetClusters {
        reply: oneshot::Sender<Vec<ClusterView>>,
    },
    OverrideSchedules {
        entries: Vec<ScheduleEntry>,
        reply: oneshot::Sender<Result<Vec<ClusterView>>>,
    },
    GetLogs {
        reply: oneshot::Sender<Vec<String>>,
    },
    GetJsons {
        reply: oneshot::Sender<Result<RawDocuments>>,
    },
    SetJsons {
        docs: RawDocuments,
        reply: oneshot::Sender<Result<RawDocuments>>,
    },
    GetSettings {
        reply: oneshot::Sender<Result<serde_json::Value>>,
    },
    Connect {
        session: SessionId,
        events: mpsc::UnboundedSender<Event>,
        reply: oneshot::Sender<()>,
    },
    Disconnect {
        session: SessionId,
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle for talking to a running scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Command>,
}

impl SchedulerHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, reply) = oneshot::channel();
        self.tx
            .send(make(tx))
            .await
            .map_err(|_| SchedError::Internal("scheduler is not running".to_string()))?;
        reply
            .await
            .map_err(|_| SchedError::Internal("scheduler dropped the request".to_string()))
    }

    pub async fn reload(&self) -> Result<()> {
        self.request(|reply| Command::Reload { reply }).await?
    }

    pub async fn start_cluster(&self, cluster: impl Into<String>) -> Result<()> {
        self.run_now(cluster.into(), JobKind::ManualStart).await
    }

    pub async fn stop_cluster(&self, cluster: impl Into<String>) -> Result<()> {
        self.run_now(cluster.into(), JobKind::ManualStop).await
    }

    async fn run_now(&self, cluster: String, kind: JobKind) -> Result<()> {
        self.request(|reply| Command::RunNow {
            cluster,
            kind,
            reply,
        })
        .await?
    }

    pub async fn list_jobs(&self) -> Result<Vec<JobView>> {
        self.request(|reply| Command::ListJobs { reply }).await
    }

    pub async fn get_clusters(&self) -> Result<Vec<ClusterView>> {
        self.request(|reply| Command::GetClusters { reply }).await
    }

    pub async fn override_schedules(&self, entries: Vec<ScheduleEntry>) -> Result<Vec<ClusterView>> {
        self.request(|reply| Command::OverrideSchedules { entries, reply })
            .await?
    }

    pub async fn get_logs(&self) -> Result<Vec<String>> {
        self.request(|reply| Command::GetLogs { reply }).await
    }

    pub async fn get_jsons(&self) -> Result<RawDocuments> {
        self.request(|reply| Command::GetJsons { reply }).await?
    }

    pub async fn set_jsons(&self, docs: RawDocuments) -> Result<RawDocuments> {
        self.request(|reply| Command::SetJsons { docs, reply }).await?
    }

    pub async fn get_settings(&self) -> Result<serde_json::Value> {
        self.request(|reply| Command::GetSettings { reply }).await?
    }

    /// Register an observer session. If it is the first one, every
    /// cluster's refresh job becomes active and runs immediately.
    pub async fn connect(
        &self,
        session: SessionId,
        events: mpsc::UnboundedSender<Event>,
    ) -> Result<()> {
        self.request(|reply| Command::Connect {
            session,
            events,
            reply,
        })
        .await
    }

    /// Remove an observer session. When the last one leaves, refresh jobs
    /// are parked and the status cache is wiped.
    pub async fn disconnect(&self, session: SessionId) -> Result<()> {
        self.request(|reply| Command::Disconnect { session, reply })
            .await
    }
}

pub struct Scheduler {
    store: ConfigStore,
    actuator: Arc<dyn Actuator>,
    worker_config: WorkerConfig,

    clusters: Vec<Cluster>,
    schedules: Vec<ScheduleEntry>,
    registry: JobRegistry,
    cache: StatusCache,
    broadcaster: EventBroadcaster,

    worker_tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl Scheduler {
    /// Spawn the control task and return its handle. The task runs until
    /// `shutdown` is cancelled.
    pub fn spawn(
        store: ConfigStore,
        actuator: Arc<dyn Actuator>,
        worker_config: WorkerConfig,
        shutdown: CancellationToken,
    ) -> SchedulerHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();

        let scheduler = Scheduler {
            store,
            actuator,
            worker_config,
            clusters: Vec::new(),
            schedules: Vec::new(),
            registry: JobRegistry::new(),
            cache: StatusCache::new(),
            broadcaster: EventBroadcaster::new(),
            worker_tx,
        };

        tokio::spawn(scheduler.run(cmd_rx, worker_rx, shutdown));

        SchedulerHandle { tx: cmd_tx }
    }

    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut worker_rx: mpsc::UnboundedReceiver<WorkerMessage>,
        shutdown: CancellationToken,
    ) {
        tracing::info!("Scheduler control task started");

        loop {
            let next_due = self.registry.next_due();

            tokio::select! {
                Some(cmd) = cmd_rx.recv() => {
                    self.handle_command(cmd).await;
                }

                Some(msg) = worker_rx.recv() => {
                    self.handle_worker_message(msg);
                }

                _ = sleep_until(next_due), if next_due.is_some() => {
                    self.fire_due_jobs();
                }

                _ = shutdown.cancelled() => {
                    tracing::info!("Scheduler control task shutting down");
                    break;
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Reload { reply } => {
                let _ = reply.send(self.reload().await);
            }
            Command::RunNow {
                cluster,
                kind,
                reply,
            } => {
                let _ = reply.send(self.run_now(&cluster, kind));
            }
            Command::ListJobs { reply } => {
                let _ = reply.send(self.registry.views());
            }
            Command::GetClusters { reply } => {
                let _ = reply.send(self.cluster_views());
            }
            Command::OverrideSchedules { entries, reply } => {
                let result = match self.override_schedules(entries).await {
                    Ok(()) => Ok(self.cluster_views()),
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::GetLogs { reply } => {
                let _ = reply.send(self.broadcaster.recent_logs());
            }
            Command::GetJsons { reply } => {
                let _ = reply.send(self.store.read_raw().await);
            }
            Command::SetJsons { docs, reply } => {
                let result = self.set_jsons(docs).await;
                let _ = reply.send(result);
            }
            Command::GetSettings { reply } => {
                let result = self.store.load_settings().await.map(|s| s.redacted());
                let _ = reply.send(result);
            }
            Command::Connect {
                session,
                events,
                reply,
            } => {
                self.connect(session, events);
                let _ = reply.send(());
            }
            Command::Disconnect { session, reply } => {
                self.disconnect(&session);
                let _ = reply.send(());
            }
        }
    }

    /// Recompile every cluster's jobs from the configuration store. All
    /// existing jobs are removed first so no stale timer survives an edit;
    /// a load failure leaves the current jobs and configuration in place.
    async fn reload(&mut self) -> Result<()> {
        let clusters = self.store.load_clusters().await?;
        let schedules = self.store.load_schedules().await?;

        self.registry.clear();
        self.clusters = clusters;
        self.schedules = schedules;

        let now = Utc::now();
        let observed = self.broadcaster.session_count() > 0;

        for cluster in &self.clusters {
            let schedule = self
                .schedules
                .iter()
                .find(|s| s.name == cluster.name)
                .map(|s| s.schedule.clone())
                .unwrap_or_default();

            for spec in compile::compile(now, &cluster.name, &schedule) {
                let state = match spec.trigger {
                    // Refresh only polls while somebody is watching; an
                    // immediate due instant doubles as the initial run
                    Trigger::Every(_) if observed => JobState::Scheduled { due: now },
                    Trigger::Every(_) => JobState::Paused,
                    Trigger::At(at) => JobState::Scheduled { due: at },
                };
                if let Err(e) = self.registry.insert(spec, state) {
                    tracing::warn!(error = %e, "Skipping duplicate job during reload");
                }
            }
        }

        self.broadcaster
            .log(format!("Jobs reloaded, {} registered", self.registry.len()));
        Ok(())
    }

    /// Create (or no-op on) the manual job for a cluster and run it now.
    fn run_now(&mut self, cluster: &str, kind: JobKind) -> Result<()> {
        if !self.clusters.iter().any(|c| c.name == cluster) {
            return Err(SchedError::UnknownCluster(cluster.to_string()));
        }

        let now = Utc::now();
        let id = JobId::manual(cluster, kind);
        let spec = JobSpec::new(id.clone(), Trigger::At(now), now);

        match self.registry.insert(spec, JobState::Scheduled { due: now }) {
            Ok(()) => {
                self.spawn_worker(&id, now);
                Ok(())
            }
            Err(SchedError::DuplicateJob(name)) => {
                // A timer-fired or previously issued job for the same
                // cluster and kind is still live; tolerated, not an error
                self.broadcaster
                    .log(format!("Job {} already running, ignoring", name));
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn override_schedules(&mut self, entries: Vec<ScheduleEntry>) -> Result<()> {
        self.store.save_schedules(&entries).await?;
        self.reload().await
    }

    async fn set_jsons(&mut self, docs: RawDocuments) -> Result<RawDocuments> {
        // write_raw validates every document before writing; on failure the
        // previous configuration stays active
        self.store.write_raw(&docs).await?;
        self.reload().await?;
        self.store.read_raw().await
    }

    fn connect(&mut self, session: SessionId, events: mpsc::UnboundedSender<Event>) {
        self.broadcaster.subscribe(session, events);
        let count = self.broadcaster.session_count();
        self.broadcaster
            .log(format!("Observer connected ({} active)", count));

        if count == 1 {
            self.start_refresh();
        }
    }

    fn disconnect(&mut self, session: &SessionId) {
        self.broadcaster.unsubscribe(session);
        let count = self.broadcaster.session_count();
        self.broadcaster
            .log(format!("Observer disconnected ({} active)", count));

        if count == 0 {
            self.stop_refresh();
        }
    }

    /// Activate every cluster's refresh job and trigger one run right away
    /// so observers see fresh state instead of waiting a full interval.
    fn start_refresh(&mut self) {
        let now = Utc::now();
        for cluster in &self.clusters {
            let id = JobId::refresh(&cluster.name);
            if matches!(self.registry.get(&id).map(|e| e.state), Some(JobState::Paused)) {
                self.registry.mark_scheduled(&id, now);
            }
        }
    }

    /// Park every refresh job and wipe the status cache: with nobody
    /// observing, polling would only generate actuator traffic.
    fn stop_refresh(&mut self) {
        for cluster in &self.clusters {
            let id = JobId::refresh(&cluster.name);
            if matches!(
                self.registry.get(&id).map(|e| e.state),
                Some(JobState::Scheduled { .. })
            ) {
                self.registry.pause(&id);
            }
        }
        self.cache.clear();
    }

    fn fire_due_jobs(&mut self) {
        let now = Utc::now();
        for id in self.registry.due_jobs(now) {
            self.spawn_worker(&id, now);
        }
    }

    /// Move a job to `running` and hand it to an isolated worker task.
    fn spawn_worker(&mut self, id: &JobId, now: DateTime<Utc>) {
        let Some(cluster) = self.clusters.iter().find(|c| c.name == id.cluster).cloned() else {
            tracing::warn!(job = %id, "Job references an unknown cluster, removing");
            self.registry.remove(id);
            return;
        };

        if !self.registry.mark_running(id, now) {
            return;
        }

        self.broadcaster.log(format!("Job {} started", id));
        tokio::spawn(worker::run(
            id.clone(),
            cluster,
            Arc::clone(&self.actuator),
            self.worker_config.clone(),
            self.worker_tx.clone(),
        ));
        self.push_jobs_snapshot();
    }

    /// Consume one message from a worker. Messages from a single worker
    /// arrive in emission order; nothing is assumed across workers.
    fn handle_worker_message(&mut self, msg: WorkerMessage) {
        match msg.event {
            WorkerEvent::StatusUpdate { statuses, metrics } => {
                for (machine, state) in &statuses {
                    self.cache.record(&msg.job.cluster, machine, *state);
                }
                if metrics.is_some() {
                    tracing::debug!(cluster = %msg.job.cluster, "Received cluster metrics");
                }
                self.broadcaster.broadcast(Event::VmStatusUpdate {
                    cluster: msg.job.cluster.clone(),
                    statuses,
                });
            }
            WorkerEvent::Completed => {
                self.finish_job(&msg.job, None);
            }
            WorkerEvent::Failed(reason) => {
                self.finish_job(&msg.job, Some(reason));
            }
        }
    }

    fn finish_job(&mut self, id: &JobId, failure: Option<String>) {
        match &failure {
            Some(reason) => self
                .broadcaster
                .log(format!("Job {} failed: {}", id, reason)),
            None => self.broadcaster.log(format!("Job {} completed", id)),
        }

        let Some(trigger) = self.registry.get(id).map(|e| e.spec.trigger) else {
            // A reload removed the entry while the worker was in flight
            tracing::debug!(job = %id, "Completion for unregistered job");
            return;
        };

        match trigger {
            Trigger::Every(interval) => {
                if self.broadcaster.session_count() > 0 {
                    let due = Utc::now()
                        + chrono::Duration::from_std(interval).unwrap_or_else(|_| {
                            chrono::Duration::seconds(REFRESH_INTERVAL.as_secs() as i64)
                        });
                    self.registry.mark_scheduled(id, due);
                } else {
                    self.registry.pause(id);
                }
            }
            Trigger::At(_) => {
                // One-shot: completed is terminal
                self.registry.remove(id);
            }
        }
        self.push_jobs_snapshot();
    }

    fn push_jobs_snapshot(&mut self) {
        let jobs = self.registry.views();
        self.broadcaster.broadcast(Event::Jobs { jobs });
    }

    fn cluster_views(&self) -> Vec<ClusterView> {
        self.clusters
            .iter()
            .map(|cluster| ClusterView {
                name: cluster.name.clone(),
                url: cluster.url.clone(),
                machines: cluster
                    .machines
                    .iter()
                    .map(|m| MachineView {
                        id: m.id.clone(),
                        name: m.name.clone(),
                        state: self.cache.get(&cluster.name, &m.id),
                    })
                    .collect(),
                schedule: self
                    .schedules
                    .iter()
                    .find(|s| s.name == cluster.name)
                    .map(|s| s.schedule.clone())
                    .unwrap_or_default(),
            })
            .collect()
    }
}

/// Sleep until a scheduled instant; an instant already in the past yields
/// immediately.
async fn sleep_until(due: Option<DateTime<Utc>>) {
    let Some(due) = due else {
        return;
    };
    let wait = (due - Utc::now())
        .to_std()
        .unwrap_or(std::time::Duration::ZERO);
    tokio::time::sleep(wait).await;
}
