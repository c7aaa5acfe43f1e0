//! Observer gateway: one WebSocket per observer, carrying the command and
//! event surface as tagged JSON messages.
//!
//! The gateway owns no scheduler state. Each connection registers itself
//! as a session with the scheduler, forwards pushed events outward and
//! translates inbound commands into [`SchedulerHandle`] calls; command
//! errors are reported back on that session only.

use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{ConfigStore, RawDocuments, ScheduleEntry};
use crate::error::Result;
use crate::events::Event;
use crate::scheduler::SchedulerHandle;

#[derive(Clone)]
pub struct GatewayState {
    pub scheduler: SchedulerHandle,
    pub store: ConfigStore,
}

/// Commands an observer may send, mirrored by the tagged wire format.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientCommand {
    GetClusters,
    StartCluster {
        cluster: String,
    },
    StopCluster {
        cluster: String,
    },
    OverrideSchedules {
        schedules: Vec<ScheduleEntry>,
    },
    GetJobs,
    GetLogs,
    GetJsons,
    SetJsons {
        clusters: String,
        schedules: String,
        settings: String,
    },
    ReloadJobs,
    GetSettings,
}

pub fn router(state: GatewayState) -> Router {
    let cors = tower_http::cors::CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    Router::new()
        .route("/ws", get(ws_upgrade))
        .layer(cors)
        .with_state(state)
}

/// Run the gateway until the shutdown token fires.
pub async fn serve(addr: SocketAddr, state: GatewayState, shutdown: CancellationToken) {
    let app = router(state);

    tracing::info!(addr = %addr, "Starting observer gateway");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind observer gateway");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
    {
        tracing::error!(error = %e, "Observer gateway failed");
    }
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<GatewayState>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers).await {
        return denied;
    }
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// HTTP basic auth against the operator login table in the settings
/// document. An empty table means no operators are configured and access
/// is open.
async fn authorize(state: &GatewayState, headers: &HeaderMap) -> std::result::Result<(), Response> {
    let settings = match state.store.load_settings().await {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, "Cannot load settings for authentication");
            return Err(StatusCode::INTERNAL_SERVER_ERROR.into_response());
        }
    };

    if settings.login.is_empty() {
        return Ok(());
    }

    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .and_then(|encoded| base64::engine::general_purpose::STANDARD.decode(encoded).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .and_then(|creds| {
            let (user, password) = creds.split_once(':')?;
            Some(settings.check_login(user, password))
        })
        .unwrap_or(false);

    if authorized {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"vmsched\"")],
            "unauthorized",
        )
            .into_response())
    }
}

async fn handle_ws(socket: WebSocket, state: GatewayState) {
    let session = Uuid::new_v4();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();

    if let Err(e) = state.scheduler.connect(session, event_tx).await {
        tracing::error!(session = %session, error = %e, "Session registration failed");
        return;
    }
    tracing::info!(session = %session, "Observer connected");

    let (mut sender, mut receiver) = socket.split();

    // Pushed events and command replies share one ordered outbound lane
    let pump_tx = out_tx.clone();
    let pump_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(text) => {
                    if pump_tx.send(text).is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!(error = %e, "Failed to serialize event"),
            }
        }
    });

    let send_task = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                if let Some(reply) = dispatch(&state, text.as_str()).await {
                    let _ = out_tx.send(reply);
                }
            }
            Message::Close(_) => break,
            // Pings are answered by axum itself
            _ => {}
        }
    }

    tracing::info!(session = %session, "Observer disconnected");
    let _ = state.scheduler.disconnect(session).await;
    pump_task.abort();
    send_task.abort();
}

/// Execute one inbound command, returning the reply to send on this
/// session, if any.
async fn dispatch(state: &GatewayState, text: &str) -> Option<String> {
    let command = match serde_json::from_str::<ClientCommand>(text) {
        Ok(command) => command,
        Err(e) => return Some(error_reply(&format!("unrecognized command: {}", e))),
    };

    let outcome: Result<Option<serde_json::Value>> = match command {
        ClientCommand::GetClusters => state
            .scheduler
            .get_clusters()
            .await
            .map(|clusters| Some(serde_json::json!({ "type": "clusters", "clusters": clusters }))),
        ClientCommand::StartCluster { cluster } => {
            state.scheduler.start_cluster(cluster).await.map(|()| None)
        }
        ClientCommand::StopCluster { cluster } => {
            state.scheduler.stop_cluster(cluster).await.map(|()| None)
        }
        ClientCommand::OverrideSchedules { schedules } => state
            .scheduler
            .override_schedules(schedules)
            .await
            .map(|clusters| Some(serde_json::json!({ "type": "clusters", "clusters": clusters }))),
        ClientCommand::GetJobs => state
            .scheduler
            .list_jobs()
            .await
            .map(|jobs| Some(serde_json::json!({ "type": "jobs", "jobs": jobs }))),
        ClientCommand::GetLogs => state
            .scheduler
            .get_logs()
            .await
            .map(|logs| Some(serde_json::json!({ "type": "logs", "logs": logs }))),
        ClientCommand::GetJsons => state
            .scheduler
            .get_jsons()
            .await
            .map(|docs| Some(jsons_reply(&docs))),
        ClientCommand::SetJsons {
            clusters,
            schedules,
            settings,
        } => state
            .scheduler
            .set_jsons(RawDocuments {
                clusters,
                schedules,
                settings,
            })
            .await
            .map(|docs| Some(jsons_reply(&docs))),
        ClientCommand::ReloadJobs => state.scheduler.reload().await.map(|()| None),
        ClientCommand::GetSettings => state
            .scheduler
            .get_settings()
            .await
            .map(|settings| Some(serde_json::json!({ "type": "settings", "settings": settings }))),
    };

    match outcome {
        Ok(Some(reply)) => Some(reply.to_string()),
        Ok(None) => None,
        Err(e) => Some(error_reply(&e.to_string())),
    }
}

fn jsons_reply(docs: &RawDocuments) -> serde_json::Value {
    serde_json::json!({
        "type": "jsons",
        "clusters": docs.clusters,
        "schedules": docs.schedules,
        "settings": docs.settings,
    })
}

fn error_reply(message: &str) -> String {
    serde_json::json!({ "type": "error", "message": message }).to_string()
}
