use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use veil_core::{ClientEvent, ConnectionStatus, ObserverId, PartyId, PartyState};
use veil_engine::SealEngine;
use veil_store::{RecordStore, StoreError};
use veil_telemetry::MetricsRecorder;

use crate::hub::{self, ObserverHub};
use crate::orchestrator::{PipelineDelays, RelayOrchestrator};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    /// Interval between WebSocket pings. Zero disables them.
    pub heartbeat_interval: Duration,
    /// Informational listen port reported for party A.
    pub sealing_port: u16,
    /// Informational listen port reported for party B.
    pub processing_port: u16,
    pub delays: PipelineDelays,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            max_send_queue: 256,
            heartbeat_interval: Duration::from_secs(30),
            sealing_port: 3000,
            processing_port: 5000,
            delays: PipelineDelays::default(),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RecordStore>,
    pub hub: Arc<ObserverHub>,
    pub engine: Arc<dyn SealEngine>,
    pub inbound_tx: mpsc::Sender<(ObserverId, String)>,
    pub heartbeat_interval: Duration,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/messages", get(list_messages))
        .route("/api/messages/{id}", get(get_message))
        .route("/api/server-status", get(server_status))
        .route("/api/engine-info", get(engine_info))
        .route("/api/health", get(health_handler))
        .route("/api/metrics", get(metrics_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle to shut it down.
pub async fn start(
    config: ServerConfig,
    engine: Arc<dyn SealEngine>,
    metrics: Arc<MetricsRecorder>,
) -> Result<ServerHandle, std::io::Error> {
    let store = Arc::new(RecordStore::new());
    let _ = store.upsert_status(ConnectionStatus::new(
        PartyId::A,
        PartyState::Online,
        config.sealing_port,
    ));
    let _ = store.upsert_status(ConnectionStatus::new(
        PartyId::B,
        PartyState::Online,
        config.processing_port,
    ));

    let hub = Arc::new(ObserverHub::new(
        Arc::clone(&store),
        Arc::clone(&metrics),
        config.max_send_queue,
    ));
    let orchestrator = Arc::new(RelayOrchestrator::new(
        Arc::clone(&store),
        Arc::clone(&hub),
        Arc::clone(&engine),
        config.delays.clone(),
    ));

    let (inbound_tx, inbound_rx) = mpsc::channel::<(ObserverId, String)>(1024);
    let inbound_handle = tokio::spawn(process_inbound(
        inbound_rx,
        Arc::clone(&hub),
        Arc::clone(&orchestrator),
    ));

    let app_state = AppState {
        store: Arc::clone(&store),
        hub: Arc::clone(&hub),
        engine,
        inbound_tx,
        heartbeat_interval: config.heartbeat_interval,
    };

    let router = build_router(app_state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(
        addr = %local_addr,
        sealing_port = config.sealing_port,
        processing_port = config.processing_port,
        "veil relay listening"
    );

    let shutdown = CancellationToken::new();
    let server_shutdown = shutdown.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        store,
        hub,
        orchestrator,
        shutdown,
        server: server_handle,
        _inbound: inbound_handle,
    })
}

/// Handle returned by `start()`. Keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    pub store: Arc<RecordStore>,
    pub hub: Arc<ObserverHub>,
    pub orchestrator: Arc<RelayOrchestrator>,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
    _inbound: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for the listener to close.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.server.await;
        tracing::info!("veil relay stopped");
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (observer_id, rx) = state.hub.connect();
    hub::serve_connection(
        socket,
        observer_id,
        rx,
        state.hub,
        state.inbound_tx,
        state.heartbeat_interval,
    )
    .await;
}

async fn list_messages(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.all())
}

async fn get_message(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    match state.store.get(id) {
        Ok(message) => Json(message).into_response(),
        Err(e @ StoreError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() }))).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn server_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.statuses())
}

async fn engine_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.key_material_info())
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut parties = serde_json::Map::new();
    for status in state.store.statuses() {
        let _ = parties.insert(
            status.party_id.to_string(),
            json!({ "port": status.listen_port, "state": status.state }),
        );
    }

    Json(json!({
        "status": "ok",
        "timestamp": Utc::now(),
        "observers": state.hub.observer_count(),
        "parties": parties,
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.hub.metrics().snapshot())
}

/// Turn validated observer requests into pipeline submissions.
async fn process_inbound(
    mut rx: mpsc::Receiver<(ObserverId, String)>,
    hub: Arc<ObserverHub>,
    orchestrator: Arc<RelayOrchestrator>,
) {
    while let Some((observer_id, raw)) = rx.recv().await {
        if let Some(ClientEvent::EncryptMessage(request)) = hub.handle_inbound(&observer_id, &raw) {
            let submission = orchestrator.submit_kind(request.kind);
            tracing::debug!(
                observer_id = %observer_id,
                run_id = %submission.run_id,
                kind = %request.kind,
                "submission accepted"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_engine::{EngineConfig, SimulatedEngine};

    fn test_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            delays: PipelineDelays::zero(),
            ..Default::default()
        }
    }

    async fn start_test_server() -> ServerHandle {
        start(
            test_config(),
            Arc::new(SimulatedEngine::new(EngineConfig::instant())),
            Arc::new(MetricsRecorder::new()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let handle = start_test_server().await;
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/api/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["observers"], 0);
        assert_eq!(body["parties"]["A"]["port"], 3000);
        assert_eq!(body["parties"]["B"]["state"], "online");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn missing_message_is_404() {
        let handle = start_test_server().await;
        let url = format!("http://127.0.0.1:{}/api/messages/42", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 404);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn engine_info_reports_key_sizes() {
        let handle = start_test_server().await;
        let url = format!("http://127.0.0.1:{}/api/engine-info", handle.port);
        let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
        assert_eq!(body["publicKeySize"], 2048);
        assert_eq!(body["evalKeySize"], 4096);
        assert_eq!(body["scheme"], "Simulated TFHE");
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn submitted_messages_are_listed_newest_first() {
        let handle = start_test_server().await;
        for kind in ["A1", "A2"] {
            let outcome = handle.orchestrator.submit(kind).unwrap().handle.await.unwrap();
            assert!(outcome.is_completed());
        }

        let url = format!("http://127.0.0.1:{}/api/messages", handle.port);
        let body: Vec<serde_json::Value> = reqwest::get(&url).await.unwrap().json().await.unwrap();
        assert_eq!(body.len(), 2);
        assert_eq!(body[0]["kind"], "A2");
        assert_eq!(body[1]["kind"], "A1");
        assert_eq!(body[0]["verdict"], false);

        let one = format!("http://127.0.0.1:{}/api/messages/{}", handle.port, body[1]["id"]);
        let single: serde_json::Value = reqwest::get(&one).await.unwrap().json().await.unwrap();
        assert_eq!(single["verdict"], true);

        let metrics = format!("http://127.0.0.1:{}/api/metrics", handle.port);
        let snapshot: serde_json::Value = reqwest::get(&metrics).await.unwrap().json().await.unwrap();
        assert!(snapshot["samples"]
            .as_array()
            .unwrap()
            .iter()
            .any(|s| s["name"] == "relay_completed_total" && s["value"] == 2.0));

        handle.shutdown().await;
    }
}
