//! Fan-out of state changes and log lines to connected observers.
//!
//! The broadcaster is owned by the scheduler's control task. Delivery is
//! best-effort over per-session unbounded channels: a slow or dead
//! observer never blocks the producer, it just gets dropped.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use uuid::Uuid;

use crate::scheduler::job::JobView;
use crate::status::MachineState;

/// Lines kept in the operator log ring buffer.
const LOG_CAPACITY: usize = 100;

/// Opaque identifier of one observer connection.
pub type SessionId = Uuid;

/// Events pushed to every connected observer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Log {
        line: String,
    },
    VmStatusUpdate {
        cluster: String,
        statuses: HashMap<String, MachineState>,
    },
    /// Registry snapshot, re-pushed whenever a worker is created or removed.
    Jobs {
        jobs: Vec<JobView>,
    },
}

#[derive(Debug, Default)]
pub struct EventBroadcaster {
    sessions: HashMap<SessionId, tokio::sync::mpsc::UnboundedSender<Event>>,
    log_ring: VecDeque<String>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, id: SessionId, tx: tokio::sync::mpsc::UnboundedSender<Event>) {
        self.sessions.insert(id, tx);
    }

    pub fn unsubscribe(&mut self, id: &SessionId) {
        self.sessions.remove(id);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Push an event to every session, pruning sessions whose receiver is
    /// gone. Never blocks.
    pub fn broadcast(&mut self, event: Event) {
        self.sessions.retain(|id, tx| {
            let alive = tx.send(event.clone()).is_ok();
            if !alive {
                tracing::debug!(session = %id, "Dropping dead observer session");
            }
            alive
        });
    }

    /// Record an operator-visible log line: bounded ring buffer plus
    /// fan-out to every observer.
    pub fn log(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!("{}", line);
        if self.log_ring.len() == LOG_CAPACITY {
            self.log_ring.pop_front();
        }
        self.log_ring.push_back(line.clone());
        self.broadcast(Event::Log { line });
    }

    pub fn recent_logs(&self) -> Vec<String> {
        self.log_ring.iter().cloned().collect()
    }
}
