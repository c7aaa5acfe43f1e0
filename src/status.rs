use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Last known power state of one virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineState {
    Loading,
    Running,
    Stopped,
    Unknown,
}

impl std::fmt::Display for MachineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MachineState::Loading => write!(f, "loading"),
            MachineState::Running => write!(f, "running"),
            MachineState::Stopped => write!(f, "stopped"),
            MachineState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Last-known machine state per `(cluster, machine)`.
///
/// Mutated only from worker status messages consumed on the scheduler's
/// control task; a machine with no entry reads as [`MachineState::Loading`].
#[derive(Debug, Default)]
pub struct StatusCache {
    entries: HashMap<(String, String), MachineState>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, cluster: &str, machine: &str, state: MachineState) {
        self.entries
            .insert((cluster.to_string(), machine.to_string()), state);
    }

    pub fn get(&self, cluster: &str, machine: &str) -> MachineState {
        self.entries
            .get(&(cluster.to_string(), machine.to_string()))
            .copied()
            .unwrap_or(MachineState::Loading)
    }

    /// Wipe every entry. Invoked when refresh stops, so the next observer
    /// starts from `loading` rather than stale state.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
