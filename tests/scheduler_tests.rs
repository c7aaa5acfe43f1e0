mod common;

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};

use common::{eventually, spawn_scheduler, MockActuator};
use vmsched::config::RawDocuments;
use vmsched::error::SchedError;
use vmsched::status::MachineState;

/// Schedules document for cluster `alpha` with windows given as minute
/// offsets from now.
fn schedules_json(windows: &[(i64, i64)]) -> String {
    let now = Utc::now();
    let entries: Vec<serde_json::Value> = windows
        .iter()
        .map(|(from, to)| {
            serde_json::json!({
                "from": now + ChronoDuration::minutes(*from),
                "to": now + ChronoDuration::minutes(*to),
            })
        })
        .collect();
    serde_json::json!([{ "name": "alpha", "schedule": entries }]).to_string()
}

#[tokio::test]
async fn reload_registers_start_stop_kill_for_future_window() {
    let actuator = MockActuator::new(&[("vm-1", MachineState::Stopped)]);
    let sched = spawn_scheduler(&["vm-1"], &schedules_json(&[(60, 120)]), actuator).await;

    let jobs = sched.handle.list_jobs().await.unwrap();
    let names: Vec<&str> = jobs.iter().map(|j| j.name.as_str()).collect();

    assert_eq!(jobs.len(), 4);
    assert!(names.iter().any(|n| *n == "refresh-alpha"));
    assert!(names.iter().any(|n| n.starts_with("start-alpha-")));
    assert!(names.iter().any(|n| n.starts_with("stop-alpha-")));
    assert!(names.iter().any(|n| n.starts_with("kill-alpha-")));

    let refresh = jobs.iter().find(|j| j.name == "refresh-alpha").unwrap();
    assert_eq!(refresh.trigger, "every 60s");
    assert!(refresh.uptime_since.is_none());
}

#[tokio::test]
async fn fully_past_window_compiles_to_refresh_only() {
    let actuator = MockActuator::new(&[("vm-1", MachineState::Stopped)]);
    let sched = spawn_scheduler(&["vm-1"], &schedules_json(&[(-180, -120)]), actuator).await;

    let jobs = sched.handle.list_jobs().await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].name, "refresh-alpha");
}

#[tokio::test]
async fn recently_closed_window_still_gets_its_kill_job() {
    // Stop was 10 minutes ago, the kill safety net at stop+30m is ahead
    let actuator = MockActuator::new(&[("vm-1", MachineState::Stopped)]);
    let sched = spawn_scheduler(&["vm-1"], &schedules_json(&[(-70, -10)]), actuator).await;

    let jobs = sched.handle.list_jobs().await.unwrap();
    let names: Vec<&str> = jobs.iter().map(|j| j.name.as_str()).collect();

    assert_eq!(jobs.len(), 2);
    assert!(names.iter().any(|n| n.starts_with("kill-alpha-")));
}

#[tokio::test]
async fn scheduled_start_fires_at_its_due_time() {
    let actuator = MockActuator::new(&[("vm-1", MachineState::Stopped)]);
    let now = Utc::now();
    let schedules = serde_json::json!([{
        "name": "alpha",
        "schedule": [{
            "from": now + ChronoDuration::milliseconds(300),
            "to": now + ChronoDuration::hours(1),
        }],
    }])
    .to_string();
    let sched = spawn_scheduler(&["vm-1"], &schedules, actuator.clone()).await;

    // Registered but not yet due
    let jobs = sched.handle.list_jobs().await.unwrap();
    assert!(jobs.iter().any(|j| j.name.starts_with("start-alpha-")));
    assert!(actuator.started.lock().unwrap().is_empty());

    eventually("the start job to fire on its timer", || async {
        actuator.started.lock().unwrap().contains(&"vm-1".to_string())
    })
    .await;

    // One-shot: the fired entry is removed once its worker terminates
    eventually("the fired entry to be removed", || async {
        let jobs = sched.handle.list_jobs().await.unwrap();
        !jobs.iter().any(|j| j.name.starts_with("start-alpha-"))
    })
    .await;
}

#[tokio::test]
async fn manual_start_runs_immediately_and_completes() {
    let actuator = MockActuator::new(&[("vm-1", MachineState::Stopped)]);
    let sched = spawn_scheduler(&["vm-1"], "[]", actuator.clone()).await;

    sched.handle.start_cluster("alpha").await.unwrap();

    eventually("manual start to reach the actuator", || async {
        actuator.started.lock().unwrap().contains(&"vm-1".to_string())
    })
    .await;

    // One-shot: the entry is removed once the worker terminates
    eventually("manual job entry to be removed", || async {
        let jobs = sched.handle.list_jobs().await.unwrap();
        !jobs.iter().any(|j| j.name == "manual-start-alpha")
    })
    .await;
}

#[tokio::test]
async fn manual_stop_skips_machines_already_stopped() {
    let actuator = MockActuator::new(&[
        ("vm-1", MachineState::Running),
        ("vm-2", MachineState::Stopped),
    ]);
    let sched = spawn_scheduler(&["vm-1", "vm-2"], "[]", actuator.clone()).await;

    sched.handle.stop_cluster("alpha").await.unwrap();

    eventually("manual stop to reach the actuator", || async {
        !actuator.stopped.lock().unwrap().is_empty()
    })
    .await;

    assert_eq!(*actuator.stopped.lock().unwrap(), vec!["vm-1".to_string()]);
}

#[tokio::test]
async fn manual_command_for_unknown_cluster_is_rejected() {
    let actuator = MockActuator::new(&[]);
    let sched = spawn_scheduler(&["vm-1"], "[]", actuator).await;

    let err = sched.handle.start_cluster("ghost").await.unwrap_err();
    assert!(matches!(err, SchedError::UnknownCluster(name) if name == "ghost"));
}

#[tokio::test]
async fn reissued_manual_command_while_running_is_a_noop() {
    // Slow status query keeps the first worker in flight
    let actuator = MockActuator::with_delay(
        &[("vm-1", MachineState::Stopped)],
        Duration::from_millis(300),
    );
    let sched = spawn_scheduler(&["vm-1"], "[]", actuator.clone()).await;

    sched.handle.start_cluster("alpha").await.unwrap();
    sched.handle.start_cluster("alpha").await.unwrap();

    let jobs = sched.handle.list_jobs().await.unwrap();
    let manual: Vec<_> = jobs.iter().filter(|j| j.name == "manual-start-alpha").collect();
    assert_eq!(manual.len(), 1);
    assert!(manual[0].uptime_since.is_some());

    eventually("the single worker to finish", || async {
        sched.handle.list_jobs().await.unwrap().len() == 1
    })
    .await;
    assert_eq!(*actuator.started.lock().unwrap(), vec!["vm-1".to_string()]);
}

#[tokio::test]
async fn override_schedules_replaces_every_job() {
    let actuator = MockActuator::new(&[("vm-1", MachineState::Stopped)]);
    let sched = spawn_scheduler(&["vm-1"], &schedules_json(&[(60, 120)]), actuator).await;
    assert_eq!(sched.handle.list_jobs().await.unwrap().len(), 4);

    let views = sched.handle.override_schedules(Vec::new()).await.unwrap();
    assert_eq!(views.len(), 1);
    assert!(views[0].schedule.is_empty());

    // Stale timers from the old schedule are gone
    let jobs = sched.handle.list_jobs().await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].name, "refresh-alpha");

    // And the edit was persisted
    let raw = sched.handle.get_jsons().await.unwrap();
    let entries: Vec<serde_json::Value> = serde_json::from_str(&raw.schedules).unwrap();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn set_jsons_rejects_malformed_document_and_keeps_configuration() {
    let actuator = MockActuator::new(&[("vm-1", MachineState::Stopped)]);
    let sched = spawn_scheduler(&["vm-1"], "[]", actuator).await;

    let before = sched.handle.get_jsons().await.unwrap();

    let err = sched
        .handle
        .set_jsons(RawDocuments {
            clusters: "[]".to_string(),
            schedules: "[]".to_string(),
            settings: "{not valid".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SchedError::ConfigParse { ref document, .. } if document == "settings.json"));

    // Previous configuration still active, on disk and in memory
    let after = sched.handle.get_jsons().await.unwrap();
    assert_eq!(after.clusters, before.clusters);
    let clusters = sched.handle.get_clusters().await.unwrap();
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].name, "alpha");
}

#[tokio::test]
async fn set_jsons_rejects_overlapping_schedule_windows() {
    let actuator = MockActuator::new(&[("vm-1", MachineState::Stopped)]);
    let sched = spawn_scheduler(&["vm-1"], "[]", actuator).await;
    let before = sched.handle.get_jsons().await.unwrap();

    let schedules = serde_json::json!([{
        "name": "alpha",
        "schedule": [
            {"from": "2024-03-11T09:00:00Z", "to": "2024-03-11T12:00:00Z"},
            {"from": "2024-03-11T10:00:00Z", "to": "2024-03-11T11:00:00Z"}
        ],
    }])
    .to_string();

    let err = sched
        .handle
        .set_jsons(RawDocuments {
            clusters: before.clusters.clone(),
            schedules,
            settings: before.settings.clone(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SchedError::ConfigParse { ref document, .. } if document == "schedules.json"));

    let after = sched.handle.get_jsons().await.unwrap();
    assert_eq!(after.schedules, before.schedules);
}

#[tokio::test]
async fn set_jsons_applies_documents_and_reloads() {
    let actuator = MockActuator::new(&[]);
    let sched = spawn_scheduler(&["vm-1"], "[]", actuator).await;

    let clusters = serde_json::json!([{
        "name": "beta",
        "url": "https://console.beta.example",
        "machines": [{"id": "vm-9"}],
        "login": {},
    }])
    .to_string();

    let docs = sched
        .handle
        .set_jsons(RawDocuments {
            clusters,
            schedules: "[]".to_string(),
            settings: r#"{"login": {"admin": "hunter2"}}"#.to_string(),
        })
        .await
        .unwrap();
    assert!(docs.clusters.contains("beta"));

    let views = sched.handle.get_clusters().await.unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].name, "beta");

    let jobs = sched.handle.list_jobs().await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].name, "refresh-beta");
}

#[tokio::test]
async fn get_settings_strips_credentials() {
    let actuator = MockActuator::new(&[]);
    let sched = spawn_scheduler(&["vm-1"], "[]", actuator).await;

    sched
        .handle
        .set_jsons(RawDocuments {
            clusters: "[]".to_string(),
            schedules: "[]".to_string(),
            settings: r#"{"login": {"admin": "hunter2"}}"#.to_string(),
        })
        .await
        .unwrap();

    let settings = sched.handle.get_settings().await.unwrap();
    assert_eq!(settings["login"]["admin"], "***");
}

#[tokio::test]
async fn cluster_views_never_expose_credentials() {
    let actuator = MockActuator::new(&[]);
    let sched = spawn_scheduler(&["vm-1"], "[]", actuator).await;

    let views = sched.handle.get_clusters().await.unwrap();
    let json = serde_json::to_string(&views).unwrap();
    assert!(!json.contains("secret"));
    assert!(!json.contains("login"));
}
