#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use vmsched::actuator::Actuator;
use vmsched::config::{Cluster, ConfigStore};
use vmsched::error::Result;
use vmsched::scheduler::{Scheduler, SchedulerHandle};
use vmsched::status::MachineState;
use vmsched::worker::WorkerConfig;

/// Actuator double: serves canned machine states, records every power
/// operation, and mirrors operations back into its state map the way a
/// real console eventually would.
pub struct MockActuator {
    pub states: Mutex<HashMap<String, MachineState>>,
    pub status_queries: AtomicUsize,
    pub started: Mutex<Vec<String>>,
    pub stopped: Mutex<Vec<String>>,
    pub killed: Mutex<Vec<String>>,
    /// Artificial latency on status queries, for tests that need a worker
    /// to still be in flight when the next command arrives.
    pub status_delay: Duration,
}

impl MockActuator {
    pub fn new(states: &[(&str, MachineState)]) -> Arc<Self> {
        Self::with_delay(states, Duration::ZERO)
    }

    pub fn with_delay(states: &[(&str, MachineState)], delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            states: Mutex::new(
                states
                    .iter()
                    .map(|(id, state)| (id.to_string(), *state))
                    .collect(),
            ),
            status_queries: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
            killed: Mutex::new(Vec::new()),
            status_delay: delay,
        })
    }

    pub fn query_count(&self) -> usize {
        self.status_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Actuator for MockActuator {
    async fn machine_states(&self, _: &Cluster) -> Result<HashMap<String, MachineState>> {
        if !self.status_delay.is_zero() {
            tokio::time::sleep(self.status_delay).await;
        }
        self.status_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.states.lock().unwrap().clone())
    }

    async fn start_machines(&self, _: &Cluster, ids: &[String]) -> Result<()> {
        let mut states = self.states.lock().unwrap();
        for id in ids {
            states.insert(id.clone(), MachineState::Running);
        }
        self.started.lock().unwrap().extend(ids.iter().cloned());
        Ok(())
    }

    async fn stop_machines(&self, _: &Cluster, ids: &[String]) -> Result<()> {
        let mut states = self.states.lock().unwrap();
        for id in ids {
            states.insert(id.clone(), MachineState::Stopped);
        }
        self.stopped.lock().unwrap().extend(ids.iter().cloned());
        Ok(())
    }

    async fn kill_machines(&self, _: &Cluster, ids: &[String]) -> Result<()> {
        let mut states = self.states.lock().unwrap();
        for id in ids {
            states.insert(id.clone(), MachineState::Stopped);
        }
        self.killed.lock().unwrap().extend(ids.iter().cloned());
        Ok(())
    }
}

/// Write a one-cluster configuration directory: cluster `alpha` with the
/// given machines and the given schedules document.
pub fn write_config(dir: &std::path::Path, machines: &[&str], schedules_json: &str) {
    let machine_docs: Vec<serde_json::Value> = machines
        .iter()
        .map(|id| serde_json::json!({ "id": id }))
        .collect();
    let clusters = serde_json::json!([{
        "name": "alpha",
        "url": "https://console.alpha.example",
        "machines": machine_docs,
        "login": { "type": "user", "userName": "ops", "password": "secret" },
    }]);

    std::fs::write(dir.join("clusters.json"), clusters.to_string()).unwrap();
    std::fs::write(dir.join("schedules.json"), schedules_json).unwrap();
    std::fs::write(dir.join("settings.json"), r#"{"login": {}}"#).unwrap();
}

pub struct TestScheduler {
    pub handle: SchedulerHandle,
    pub store: ConfigStore,
    pub shutdown: CancellationToken,
    _dir: tempfile::TempDir,
}

impl Drop for TestScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Spawn a scheduler over a fresh config directory and run the initial
/// reload.
pub async fn spawn_scheduler(
    machines: &[&str],
    schedules_json: &str,
    actuator: Arc<MockActuator>,
) -> TestScheduler {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), machines, schedules_json);

    let store = ConfigStore::new(dir.path());
    let shutdown = CancellationToken::new();
    let handle = Scheduler::spawn(
        store.clone(),
        actuator,
        WorkerConfig {
            batch_size: 10,
            batch_delay: Duration::from_millis(1),
        },
        shutdown.clone(),
    );
    handle.reload().await.unwrap();

    TestScheduler {
        handle,
        store,
        shutdown,
        _dir: dir,
    }
}

/// Poll an async condition until it holds or a two second budget runs out.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}
