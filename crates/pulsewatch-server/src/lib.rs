//! HTTP control API and WebSocket sample stream.
//!
//! Exposes a running [`Pipeline`]: port listing, connect/disconnect, status,
//! and a `/ws` endpoint pushing filtered samples. Control routes require a
//! session obtained from `/login`.

pub mod auth;
pub mod config;
mod stream;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Form, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json, Redirect, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use pulsewatch_core::{ControlResponse, Pipeline, StatusReport};

use auth::{CurrentUser, SessionStore, hash_password};
pub use config::{ServerConfig, UserAccount};

/// Shared server state.
pub struct AppState {
    pipeline: Arc<Pipeline>,
    sessions: SessionStore,
    config: ServerConfig,
}

#[derive(Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct ConnectRequest {
    port: Option<String>,
    baudrate: Option<u32>,
}

#[derive(Serialize)]
struct UserInfo {
    username: String,
    full_name: String,
}

fn detail(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "detail": message }))).into_response()
}

async fn handle_index() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "pulsewatch",
        "version": pulsewatch_core::VERSION,
        "endpoints": {
            "/": "This API index",
            "/login": "POST form username, password; sets the session cookie",
            "/logout": "End the current session",
            "/api/user": "Current user",
            "/api/ports": "Serial ports and debug ports",
            "/api/connect": "POST {port, baudrate?}",
            "/api/disconnect": "POST; revert to the fallback source",
            "/api/status": "Source state, buffer occupancy, viewer count",
            "/ws": "WebSocket sample stream; send any text as a heartbeat",
        }
    }))
}

async fn handle_login(State(state): State<Arc<AppState>>, Form(form): Form<LoginForm>) -> Response {
    let Some(user) = state.config.user(&form.username) else {
        log::info!("login rejected: unknown user {:?}", form.username);
        return detail(StatusCode::UNAUTHORIZED, "unknown user");
    };
    if hash_password(&form.password) != user.password_hash {
        log::info!("login rejected: wrong password for {:?}", form.username);
        return detail(StatusCode::UNAUTHORIZED, "wrong password");
    }

    let token = state.sessions.create(&user.username);
    log::info!("{} logged in", user.username);
    (
        [(header::SET_COOKIE, auth::session_cookie(&token, state.sessions.ttl()))],
        Redirect::to("/"),
    )
        .into_response()
}

async fn handle_logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(token) = auth::session_token(&headers) {
        state.sessions.revoke(&token);
    }
    ([(header::SET_COOKIE, auth::expired_cookie())], Redirect::to("/")).into_response()
}

async fn handle_user(State(state): State<Arc<AppState>>, user: CurrentUser) -> Response {
    match state.config.user(&user.username) {
        Some(account) => Json(UserInfo {
            username: account.username.clone(),
            full_name: account.full_name.clone(),
        })
        .into_response(),
        None => detail(StatusCode::NOT_FOUND, "user no longer exists"),
    }
}

async fn handle_ports(State(state): State<Arc<AppState>>, _user: CurrentUser) -> Json<Vec<String>> {
    let pipeline = Arc::clone(&state.pipeline);
    // Port enumeration touches the OS and may block briefly.
    let ports = tokio::task::spawn_blocking(move || pipeline.controller().list_sources())
        .await
        .unwrap_or_else(|e| {
            log::error!("port enumeration aborted: {e}");
            state.pipeline.config().debug_ports.clone()
        });
    Json(ports)
}

async fn handle_connect(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    body: Result<Json<ConnectRequest>, JsonRejection>,
) -> Json<ControlResponse> {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return Json(ControlResponse::error(rejection.body_text())),
    };
    let Some(port) = request.port else {
        return Json(ControlResponse::error("no port specified"));
    };
    log::info!("{} requested connect to {port}", user.username);
    Json(state.pipeline.controller().connect(&port, request.baudrate).await)
}

async fn handle_disconnect(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Json<ControlResponse> {
    log::info!("{} requested disconnect", user.username);
    Json(state.pipeline.controller().disconnect().await)
}

async fn handle_status(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
) -> Json<StatusReport> {
    Json(state.pipeline.status())
}

/// Build the axum router around a running pipeline.
pub fn build_router(pipeline: Arc<Pipeline>, config: ServerConfig) -> Router {
    let state = Arc::new(AppState {
        pipeline,
        sessions: SessionStore::new(Duration::from_secs(config.session_ttl_secs)),
        config,
    });

    Router::new()
        .route("/", get(handle_index))
        .route("/login", post(handle_login))
        .route("/logout", get(handle_logout))
        .route("/api/user", get(handle_user))
        .route("/api/ports", get(handle_ports))
        .route("/api/connect", post(handle_connect))
        .route("/api/disconnect", post(handle_disconnect))
        .route("/api/status", get(handle_status))
        .route("/ws", get(stream::handle_ws))
        .with_state(state)
}

/// Serve until Ctrl-C, then stop the pipeline.
pub async fn run_server(pipeline: Arc<Pipeline>, config: ServerConfig) -> std::io::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(Arc::clone(&pipeline), config);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("cannot listen for shutdown signal: {e}");
                std::future::pending::<()>().await;
            }
            log::info!("shutting down");
        })
        .await?;

    pipeline.shutdown().await;
    Ok(())
}
