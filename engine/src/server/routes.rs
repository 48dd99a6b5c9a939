//! REST API routes

use crate::db::{format_bytes, SearchItem, Statistic, Task, VpnProfile};
use crate::error::{ApiError, CacheError, SessionError, SyncError};
use crate::session::{SessionStatus, StationAddress};
use crate::sync::{SearchState, TaskState};
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Create API routes
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Session
        .route("/session", get(get_session))
        .route("/session/login", post(login))
        .route("/session/logout", post(logout))
        // Tasks
        .route("/tasks", get(list_tasks).post(add_task))
        .route("/tasks/torrent", post(add_torrent))
        .route("/tasks/refresh", post(refresh_tasks))
        .route("/tasks/delete", post(delete_tasks))
        .route("/tasks/{id}", delete(delete_task))
        .route("/tasks/{id}/pause", post(pause_task))
        .route("/tasks/{id}/resume", post(resume_task))
        // Station
        .route("/statistics", get(get_statistics))
        .route("/vpn", get(list_vpn_profiles))
        // Search
        .route("/search", get(get_search).post(start_search))
}

// ============ Session Endpoints ============

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub status: SessionStatus,
    pub account: Option<String>,
    pub station: Option<StationAddress>,
}

async fn get_session(State(state): State<Arc<AppState>>) -> Json<SessionResponse> {
    let session = state.engine.session();
    let credentials = session.credentials();
    Json(SessionResponse {
        status: session.status(),
        account: credentials.as_ref().map(|c| c.login.clone()),
        station: credentials.map(|c| c.station),
    })
}

/// Request to sign in to a station
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// `http(s)://host[:port]`
    pub url: String,
    pub login: String,
    pub password: String,
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    let station = StationAddress::parse(&req.url)
        .map_err(|e| AppError::BadRequest(format!("invalid station URL: {}", e)))?;

    state
        .engine
        .session()
        .login(station, &req.login, &req.password)
        .await?;

    Ok(get_session(State(state)).await)
}

async fn logout(State(state): State<Arc<AppState>>) -> Result<StatusCode, AppError> {
    state.engine.session().logout().await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ Task Endpoints ============

/// Task with its derived presentation fields
#[derive(Debug, Serialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    pub active: bool,
    pub progress: Option<f64>,
    pub remaining_seconds: Option<u64>,
    pub speed: Option<String>,
    pub size_label: String,
}

impl From<Task> for TaskView {
    fn from(task: Task) -> Self {
        Self {
            active: task.is_active(),
            progress: task.progress(),
            remaining_seconds: task.remaining_time().map(|d| d.as_secs()),
            speed: task.speed_label(),
            size_label: format_bytes(task.size),
            task,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TasksResponse {
    pub state: TaskState,
    pub tasks: Vec<TaskView>,
}

async fn list_tasks(State(state): State<Arc<AppState>>) -> Result<Json<TasksResponse>, AppError> {
    let manager = state.engine.tasks();
    let tasks = manager.tasks()?.into_iter().map(TaskView::from).collect();
    Ok(Json(TasksResponse {
        state: manager.state().get(),
        tasks,
    }))
}

/// Request to add a task from a magnet link
#[derive(Debug, Deserialize)]
pub struct AddTaskRequest {
    pub uri: String,
}

async fn add_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddTaskRequest>,
) -> Result<StatusCode, AppError> {
    state.engine.tasks().add(&req.uri).await?;
    info!("Task added");
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
pub struct TorrentQuery {
    pub filename: String,
}

async fn add_torrent(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TorrentQuery>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    state
        .engine
        .tasks()
        .add_torrent(&query.filename, body.to_vec())
        .await?;
    info!("Torrent {} uploaded", query.filename);
    Ok(StatusCode::ACCEPTED)
}

async fn refresh_tasks(State(state): State<Arc<AppState>>) -> Result<StatusCode, AppError> {
    if !state.engine.session().is_connected() {
        return Err(SyncError::NotConnected.into());
    }
    state.engine.tasks().refresh();
    Ok(StatusCode::ACCEPTED)
}

/// Request to delete several tasks at once
#[derive(Debug, Deserialize)]
pub struct DeleteTasksRequest {
    pub ids: Vec<String>,
}

async fn delete_tasks(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeleteTasksRequest>,
) -> Result<StatusCode, AppError> {
    state.engine.tasks().delete(&req.ids).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.engine.tasks().delete(&[id]).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn pause_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.engine.tasks().pause(&[id]).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn resume_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.engine.tasks().resume(&[id]).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ Station Endpoints ============

#[derive(Debug, Serialize)]
pub struct StatisticResponse {
    pub statistic: Option<Statistic>,
    pub download_label: Option<String>,
    pub upload_label: Option<String>,
}

async fn get_statistics(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatisticResponse>, AppError> {
    let statistic = state.engine.cache().statistic()?;
    Ok(Json(StatisticResponse {
        download_label: statistic
            .as_ref()
            .map(|s| format!("{}/s", format_bytes(s.speed_download))),
        upload_label: statistic
            .as_ref()
            .map(|s| format!("{}/s", format_bytes(s.speed_upload))),
        statistic,
    }))
}

async fn list_vpn_profiles(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<VpnProfile>>, AppError> {
    Ok(Json(state.engine.cache().vpn_profiles()?))
}

// ============ Search Endpoints ============

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub state: SearchState,
    pub results: Vec<SearchItem>,
}

async fn get_search(State(state): State<Arc<AppState>>) -> Result<Json<SearchResponse>, AppError> {
    let manager = state.engine.search();
    Ok(Json(SearchResponse {
        state: manager.state().get(),
        results: manager.results()?,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub keyword: String,
}

async fn start_search(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchRequest>,
) -> Result<StatusCode, AppError> {
    state.engine.search().search(&req.keyword).await?;
    Ok(StatusCode::ACCEPTED)
}

// ============ Error Handling ============

#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    Unauthorized(String),
    Conflict(String),
    BadGateway(String),
    Unavailable(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        let body = Json(serde_json::json!({ "error": message }));
        (status, body).into_response()
    }
}

impl From<ApiError> for AppError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::SessionMissing | ApiError::SessionExpired(_) => {
                AppError::Unauthorized(err.to_string())
            }
            _ => AppError::BadGateway(err.to_string()),
        }
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::NotConnected => AppError::Unavailable(err.to_string()),
            SyncError::InvalidInput(msg) => AppError::BadRequest(msg),
            SyncError::Cancelled => AppError::Conflict(err.to_string()),
            SyncError::Api(e) => e.into(),
            SyncError::Cache(e) => e.into(),
        }
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::LoginInProgress => AppError::Conflict(err.to_string()),
            SessionError::Auth(_) => AppError::Unauthorized(err.to_string()),
            SessionError::Api(e) => e.into(),
            SessionError::Store(_) | SessionError::Cache(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        AppError::Internal(err.to_string())
    }
}
