//! Isolated execution of one job.
//!
//! A worker runs as its own tokio task so a hang or crash while driving
//! the actuator cannot block the scheduler's control loop. Communication
//! back is one-directional: a worker posts zero or more status messages
//! followed by a terminal completion or failure, then ends. It never
//! touches scheduler state directly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::actuator::Actuator;
use crate::config::Cluster;
use crate::error::Result;
use crate::scheduler::job::{JobId, JobKind};
use crate::status::MachineState;

/// Batching parameters for power operations, sized to avoid overloading
/// the console backing the actuator.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub batch_size: usize,
    pub batch_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay: Duration::from_secs(60),
        }
    }
}

/// Message variants a worker may post back to the scheduler.
#[derive(Debug)]
pub enum WorkerEvent {
    StatusUpdate {
        statuses: HashMap<String, MachineState>,
        metrics: Option<serde_json::Value>,
    },
    Completed,
    Failed(String),
}

#[derive(Debug)]
pub struct WorkerMessage {
    pub job: JobId,
    pub event: WorkerEvent,
}

/// Execute one job to termination.
///
/// Actuator errors are caught and reported as a `Failed` message; the
/// worker never retries and never propagates a panic-worthy condition.
/// The next periodic refresh reconciles true machine state.
pub async fn run(
    job: JobId,
    cluster: Cluster,
    actuator: Arc<dyn Actuator>,
    config: WorkerConfig,
    tx: mpsc::UnboundedSender<WorkerMessage>,
) {
    tracing::debug!(job = %job, cluster = %cluster.name, "Worker started");

    let event = match execute(&job, &cluster, actuator.as_ref(), &config, &tx).await {
        Ok(()) => {
            tracing::debug!(job = %job, "Worker completed");
            WorkerEvent::Completed
        }
        Err(e) => {
            tracing::warn!(job = %job, cluster = %cluster.name, error = %e, "Worker failed");
            WorkerEvent::Failed(e.to_string())
        }
    };

    // The scheduler may already be gone during shutdown
    let _ = tx.send(WorkerMessage { job, event });
}

async fn execute(
    job: &JobId,
    cluster: &Cluster,
    actuator: &dyn Actuator,
    config: &WorkerConfig,
    tx: &mpsc::UnboundedSender<WorkerMessage>,
) -> Result<()> {
    match job.kind {
        JobKind::Refresh => {
            let statuses = actuator.machine_states(cluster).await?;
            let metrics = match actuator.metrics(cluster).await {
                Ok(metrics) => metrics,
                Err(e) => {
                    // Metrics are best-effort, the status update still goes out
                    tracing::warn!(cluster = %cluster.name, error = %e, "Metrics query failed");
                    None
                }
            };
            let _ = tx.send(WorkerMessage {
                job: job.clone(),
                event: WorkerEvent::StatusUpdate { statuses, metrics },
            });
            Ok(())
        }
        JobKind::Start | JobKind::ManualStart => {
            let targets = select_targets(job, cluster, actuator, |s| s != MachineState::Running).await?;
            batched(cluster, &targets, config, |chunk| actuator.start_machines(cluster, chunk)).await
        }
        JobKind::Stop | JobKind::ManualStop => {
            let targets = select_targets(job, cluster, actuator, |s| s != MachineState::Stopped).await?;
            batched(cluster, &targets, config, |chunk| actuator.stop_machines(cluster, chunk)).await
        }
        JobKind::Kill => {
            // Forced power-off of anything not stopped, whether or not the
            // graceful stop before it succeeded
            let targets = select_targets(job, cluster, actuator, |s| s != MachineState::Stopped).await?;
            batched(cluster, &targets, config, |chunk| actuator.kill_machines(cluster, chunk)).await
        }
    }
}

async fn select_targets(
    job: &JobId,
    cluster: &Cluster,
    actuator: &dyn Actuator,
    wanted: impl Fn(MachineState) -> bool,
) -> Result<Vec<String>> {
    let statuses = actuator.machine_states(cluster).await?;
    let mut targets = Vec::new();
    for id in cluster.machine_ids() {
        let state = statuses.get(&id).copied().unwrap_or(MachineState::Unknown);
        if wanted(state) {
            targets.push(id);
        } else {
            tracing::debug!(job = %job, machine = %id, state = %state, "Machine already in target state");
        }
    }
    Ok(targets)
}

/// Apply a power operation `batch_size` machines at a time with a fixed
/// delay between batches. The sleep is not cancellable mid-batch.
async fn batched<'a, F, Fut>(
    cluster: &Cluster,
    targets: &'a [String],
    config: &WorkerConfig,
    op: F,
) -> Result<()>
where
    F: Fn(&'a [String]) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    for (i, chunk) in targets.chunks(config.batch_size.max(1)).enumerate() {
        if i > 0 {
            tokio::time::sleep(config.batch_delay).await;
        }
        tracing::debug!(cluster = %cluster.name, machines = chunk.len(), batch = i, "Applying power operation batch");
        op(chunk).await?;
    }
    Ok(())
}
