//! Configuration Store: durable JSON documents describing clusters, their
//! power-on schedules and operator settings.
//!
//! Three documents live in one directory: `clusters.json`, `schedules.json`
//! and `settings.json`. Loads replace any in-memory copy wholesale; saves
//! replace the whole document on disk. There is no cross-process locking,
//! concurrent edits are last-write-wins per document.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedError};
use crate::interval::Schedule;

pub const CLUSTERS_DOC: &str = "clusters.json";
pub const SCHEDULES_DOC: &str = "schedules.json";
pub const SETTINGS_DOC: &str = "settings.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One managed cloud cluster. `name` is the join key used throughout the
/// scheduler; `url` and `login` only ever travel to the actuator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    pub url: String,
    pub machines: Vec<Machine>,
    /// Opaque credential object, never inspected by the core and stripped
    /// from everything emitted to observers.
    #[serde(default)]
    pub login: serde_json::Value,
    /// Optional metrics endpoint; refresh workers query it best-effort.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_api: Option<String>,
}

impl Cluster {
    /// Copy with credentials removed, safe to show an observer.
    pub fn without_credentials(&self) -> Cluster {
        Cluster {
            login: serde_json::Value::Null,
            ..self.clone()
        }
    }

    pub fn machine_ids(&self) -> Vec<String> {
        self.machines.iter().map(|m| m.id.clone()).collect()
    }
}

/// One cluster's entry in the schedule document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub name: String,
    pub schedule: Schedule,
}

/// Operator settings: the login table used to authenticate observers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub login: HashMap<String, String>,
}

impl Settings {
    /// Settings as emitted to observers: user names kept, passwords masked.
    pub fn redacted(&self) -> serde_json::Value {
        let login: HashMap<&str, &str> =
            self.login.keys().map(|user| (user.as_str(), "***")).collect();
        serde_json::json!({ "login": login })
    }

    pub fn check_login(&self, user: &str, password: &str) -> bool {
        self.login.get(user).map(String::as_str) == Some(password)
    }
}

/// Raw text of all three documents, as shipped over `get_jsons`/`set_jsons`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDocuments {
    pub clusters: String,
    pub schedules: String,
    pub settings: String,
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub async fn load_clusters(&self) -> Result<Vec<Cluster>> {
        self.load(CLUSTERS_DOC).await
    }

    pub async fn load_schedules(&self) -> Result<Vec<ScheduleEntry>> {
        self.load(SCHEDULES_DOC).await
    }

    pub async fn load_settings(&self) -> Result<Settings> {
        self.load(SETTINGS_DOC).await
    }

    pub async fn save_schedules(&self, entries: &[ScheduleEntry]) -> Result<()> {
        let text = serde_json::to_string_pretty(entries)
            .map_err(|e| SchedError::Internal(e.to_string()))?;
        tokio::fs::write(self.dir.join(SCHEDULES_DOC), text).await?;
        Ok(())
    }

    /// Read all three documents verbatim.
    pub async fn read_raw(&self) -> Result<RawDocuments> {
        Ok(RawDocuments {
            clusters: tokio::fs::read_to_string(self.dir.join(CLUSTERS_DOC)).await?,
            schedules: tokio::fs::read_to_string(self.dir.join(SCHEDULES_DOC)).await?,
            settings: tokio::fs::read_to_string(self.dir.join(SETTINGS_DOC)).await?,
        })
    }

    /// Replace all three documents verbatim. Every document is parsed
    /// before anything is written, so a malformed document leaves the
    /// store untouched.
    pub async fn write_raw(&self, docs: &RawDocuments) -> Result<()> {
        parse_doc::<Vec<Cluster>>(CLUSTERS_DOC, &docs.clusters)?;
        parse_doc::<Vec<ScheduleEntry>>(SCHEDULES_DOC, &docs.schedules)?;
        parse_doc::<Settings>(SETTINGS_DOC, &docs.settings)?;

        tokio::fs::write(self.dir.join(CLUSTERS_DOC), &docs.clusters).await?;
        tokio::fs::write(self.dir.join(SCHEDULES_DOC), &docs.schedules).await?;
        tokio::fs::write(self.dir.join(SETTINGS_DOC), &docs.settings).await?;
        Ok(())
    }

    async fn load<T: serde::de::DeserializeOwned>(&self, document: &str) -> Result<T> {
        let text = tokio::fs::read_to_string(self.dir.join(document)).await?;
        parse_doc(document, &text)
    }
}

fn parse_doc<T: serde::de::DeserializeOwned>(document: &str, text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| SchedError::ConfigParse {
        document: document.to_string(),
        message: e.to_string(),
    })
}
