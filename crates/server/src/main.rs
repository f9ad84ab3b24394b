use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use shared::{
    domain::{NewTask, Task, TaskId, TaskPatch, TaskQuery, User},
    error::{ApiError, ErrorCode},
    protocol::{LoginRequest, LoginResponse, ServerEvent, TaskQueryParams},
};
use storage::Storage;
use tokio::sync::broadcast::error::RecvError;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod app_state;
mod auth;
mod config;

use api::ApiContext;
use app_state::AppState;
use auth::SessionAuthority;
use config::{load_settings, prepare_database_url, DEV_JWT_SECRET};

const MAX_BODY_BYTES: usize = 64 * 1024;

type Rejection = (StatusCode, Json<ApiError>);

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: String,
    assignee: Option<String>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = load_settings()?;
    if settings.jwt_secret == DEV_JWT_SECRET {
        warn!("using the built-in development JWT secret; set APP__JWT_SECRET in production");
    }
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; check the parent directory and its permissions"
        );
        error
    })?;
    let api = ApiContext {
        storage,
        roster: settings.roster,
        sessions: SessionAuthority {
            secret: settings.jwt_secret,
            ttl_seconds: settings.session_ttl_seconds,
        },
    };
    let app = build_router(Arc::new(AppState::new(api)));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "task service listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/login", post(http_login))
        .route("/tasks", get(http_list_tasks).post(http_create_task))
        .route(
            "/tasks/:task_id",
            get(http_get_task)
                .patch(http_update_task)
                .delete(http_delete_task),
        )
        .route("/ws", get(ws_handler))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

fn reject(err: ApiError) -> Rejection {
    let status = match err.code {
        ErrorCode::InvalidCredential => StatusCode::UNAUTHORIZED,
        ErrorCode::UnauthorizedUser | ErrorCode::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}

fn bearer_user(state: &AppState, headers: &HeaderMap) -> Result<User, Rejection> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| {
            reject(ApiError::new(
                ErrorCode::InvalidCredential,
                "missing bearer token",
            ))
        })?;
    api::authorize(&state.api, token.trim()).map_err(reject)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, StatusCode> {
    state.api.storage.health_check().await.map_err(|error| {
        error!(%error, "health check failed");
        StatusCode::SERVICE_UNAVAILABLE
    })?;
    Ok("ok")
}

async fn http_login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, Rejection> {
    let response = api::login(&state.api, &req).await.map_err(reject)?;
    Ok(Json(response))
}

async fn http_list_tasks(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<TaskQueryParams>,
) -> Result<Json<Vec<Task>>, Rejection> {
    bearer_user(&state, &headers)?;
    let query = params
        .into_query()
        .map_err(|message| reject(ApiError::new(ErrorCode::Validation, message)))?;
    let tasks = api::list_tasks(&state.api, &query).await.map_err(reject)?;
    Ok(Json(tasks))
}

async fn http_get_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, Rejection> {
    bearer_user(&state, &headers)?;
    let task = api::get_task(&state.api, &TaskId(task_id))
        .await
        .map_err(reject)?;
    Ok(Json(task))
}

async fn http_create_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(new_task): Json<NewTask>,
) -> Result<(StatusCode, Json<Task>), Rejection> {
    let actor = bearer_user(&state, &headers)?;
    let task = api::create_task(&state.api, &actor, new_task)
        .await
        .map_err(reject)?;
    state.notify_changed();
    Ok((StatusCode::CREATED, Json(task)))
}

async fn http_update_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
    Json(patch): Json<TaskPatch>,
) -> Result<Json<Task>, Rejection> {
    let actor = bearer_user(&state, &headers)?;
    let task = api::update_task(&state.api, &actor, &TaskId(task_id), &patch)
        .await
        .map_err(reject)?;
    state.notify_changed();
    Ok(Json(task))
}

async fn http_delete_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Result<StatusCode, Rejection> {
    let actor = bearer_user(&state, &headers)?;
    api::delete_task(&state.api, &actor, &TaskId(task_id))
        .await
        .map_err(reject)?;
    state.notify_changed();
    Ok(StatusCode::NO_CONTENT)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(q): Query<WsQuery>,
) -> Result<impl IntoResponse, Rejection> {
    let user = api::authorize(&state.api, &q.token).map_err(reject)?;
    let query = TaskQueryParams {
        assignee: q.assignee,
        from: q.from,
        to: q.to,
    }
    .into_query()
    .map_err(|message| reject(ApiError::new(ErrorCode::Validation, message)))?;
    Ok(ws.on_upgrade(move |socket| ws_connection(state, socket, user, query)))
}

async fn snapshot_event(state: &AppState, query: &TaskQuery) -> ServerEvent {
    match api::list_tasks(&state.api, query).await {
        Ok(tasks) => ServerEvent::TaskSnapshot { tasks },
        Err(err) => ServerEvent::Error(err),
    }
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket, user: User, query: TaskQuery) {
    use futures::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    // Subscribe before the first query so no change slips between the two.
    let mut changes = state.changes.subscribe();
    info!(name = %user.name, "task feed opened");

    let feed_state = Arc::clone(&state);
    let send_task = tokio::spawn(async move {
        loop {
            let event = snapshot_event(&feed_state, &query).await;
            if let Ok(text) = serde_json::to_string(&event) {
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            match changes.recv().await {
                Ok(()) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "feed lagged; sending fresh snapshot");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    while let Some(Ok(_msg)) = receiver.next().await {}

    send_task.abort();
    info!(name = %user.name, "task feed closed");
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
