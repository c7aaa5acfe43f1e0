//! Seam to the external actuation mechanism.
//!
//! The actuator logs into a cluster's web console and performs the real
//! start/stop/forced-off/status operations. Workers only ever see it as
//! `Arc<dyn Actuator>`; tests substitute a mock. The HTTP implementation
//! here is deliberately thin, retries and backoff are the console
//! service's own concern.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::Cluster;
use crate::error::{Result, SchedError};
use crate::status::MachineState;

#[async_trait]
pub trait Actuator: Send + Sync {
    /// Query the current power state of the given machines.
    async fn machine_states(&self, cluster: &Cluster) -> Result<HashMap<String, MachineState>>;

    async fn start_machines(&self, cluster: &Cluster, ids: &[String]) -> Result<()>;

    /// Graceful stop.
    async fn stop_machines(&self, cluster: &Cluster, ids: &[String]) -> Result<()>;

    /// Forced power-off, used by the kill safety net.
    async fn kill_machines(&self, cluster: &Cluster, ids: &[String]) -> Result<()>;

    /// Best-effort utilization metrics for clusters that expose an endpoint.
    async fn metrics(&self, _cluster: &Cluster) -> Result<Option<serde_json::Value>> {
        Ok(None)
    }
}

/// Actuator backed by a cluster console's JSON API.
#[derive(Debug, Clone)]
pub struct HttpActuator {
    client: reqwest::Client,
}

impl HttpActuator {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn power_command(&self, cluster: &Cluster, command: &str, ids: &[String]) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/api/machines/{}", cluster.url, command))
            .json(&serde_json::json!({ "login": cluster.login, "machines": ids }))
            .send()
            .await
            .map_err(actuation)?;
        response.error_for_status().map_err(actuation)?;
        Ok(())
    }
}

impl Default for HttpActuator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Actuator for HttpActuator {
    async fn machine_states(&self, cluster: &Cluster) -> Result<HashMap<String, MachineState>> {
        let response = self
            .client
            .post(format!("{}/api/machines/status", cluster.url))
            .json(&serde_json::json!({
                "login": cluster.login,
                "machines": cluster.machine_ids(),
            }))
            .send()
            .await
            .map_err(actuation)?;
        let states = response
            .error_for_status()
            .map_err(actuation)?
            .json::<HashMap<String, MachineState>>()
            .await
            .map_err(actuation)?;
        Ok(states)
    }

    async fn start_machines(&self, cluster: &Cluster, ids: &[String]) -> Result<()> {
        self.power_command(cluster, "start", ids).await
    }

    async fn stop_machines(&self, cluster: &Cluster, ids: &[String]) -> Result<()> {
        self.power_command(cluster, "stop", ids).await
    }

    async fn kill_machines(&self, cluster: &Cluster, ids: &[String]) -> Result<()> {
        self.power_command(cluster, "kill", ids).await
    }

    async fn metrics(&self, cluster: &Cluster) -> Result<Option<serde_json::Value>> {
        let Some(endpoint) = &cluster.metrics_api else {
            return Ok(None);
        };
        let value = self
            .client
            .get(endpoint)
            .send()
            .await
            .map_err(actuation)?
            .error_for_status()
            .map_err(actuation)?
            .json::<serde_json::Value>()
            .await
            .map_err(actuation)?;
        Ok(Some(value))
    }
}

fn actuation(e: reqwest::Error) -> SchedError {
    SchedError::Actuation(e.to_string())
}
