use std::{collections::HashMap, net::SocketAddr};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use envnode_common::{CommandOutcome, ConnectionSnapshot, Intent, RuntimeConfig};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::link::{spawn_link, LinkHandle};

#[derive(Clone)]
struct AppState {
    link: LinkHandle,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct CommandResponse {
    outcome: CommandOutcome,
    link: ConnectionSnapshot,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = RuntimeConfig::default_path();
    let mut runtime = RuntimeConfig::load(&config_path).unwrap_or_else(|err| {
        warn!("failed to load {}: {err:#}", config_path.display());
        RuntimeConfig::default()
    });
    runtime.apply_env(|key| std::env::var(key).ok());
    runtime.sanitize();

    info!("switch peer at {}", runtime.link.peer_addr);
    let link = spawn_link(runtime.link.clone());
    link.connect()
        .await
        .context("failed to request initial connect")?;

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/toggle", post(handle_toggle))
        .route("/api/connect", post(handle_connect))
        .route("/api/disconnect", post(handle_disconnect))
        .route("/api/intent", post(handle_intent))
        .with_state(AppState { link });

    let addr = SocketAddr::from(([0, 0, 0, 0], runtime.network.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    match state.link.snapshot().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => link_unavailable(err),
    }
}

async fn handle_toggle(State(state): State<AppState>) -> impl IntoResponse {
    match state.link.toggle().await {
        Ok(outcome) => command_response(&state, outcome).await,
        Err(err) => link_unavailable(err),
    }
}

async fn handle_connect(State(state): State<AppState>) -> impl IntoResponse {
    if let Err(err) = state.link.connect().await {
        return link_unavailable(err);
    }
    handle_get_status(State(state)).await.into_response()
}

async fn handle_disconnect(State(state): State<AppState>) -> impl IntoResponse {
    if let Err(err) = state.link.disconnect().await {
        return link_unavailable(err);
    }
    handle_get_status(State(state)).await.into_response()
}

async fn handle_intent(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let intent = match value.parse::<Intent>() {
        Ok(intent) => intent,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    match state.link.dispatch(intent).await {
        Ok(outcome) => {
            info!("intent {intent:?} -> {outcome:?}");
            command_response(&state, outcome).await
        }
        Err(err) => link_unavailable(err),
    }
}

async fn command_response(state: &AppState, outcome: CommandOutcome) -> axum::response::Response {
    match state.link.snapshot().await {
        Ok(link) => Json(CommandResponse { outcome, link }).into_response(),
        Err(err) => link_unavailable(err),
    }
}

fn link_unavailable(err: anyhow::Error) -> axum::response::Response {
    warn!("link actor unavailable: {err:#}");
    error_response(StatusCode::SERVICE_UNAVAILABLE, "Link manager unavailable")
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
