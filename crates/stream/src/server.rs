//! HTTP server exposing rooms.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

pub use regex::Error as RoomPatternError;

use crate::{
    alias::{AliasError, AliasRegistry},
    record::StreamRecord,
    store::{StoreError, StreamStore},
    types::{Limits, ServerOptions},
};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<StreamStore>,
    pub aliases: Arc<AliasRegistry<String>>,
    pub options: ServerOptions,
    room_pattern: Regex,
    last_save_all: Arc<Mutex<Option<Instant>>>,
}

impl AppState {
    pub fn new(
        store: Arc<StreamStore>,
        aliases: Arc<AliasRegistry<String>>,
        options: ServerOptions,
    ) -> Result<Self, RoomPatternError> {
        let room_pattern = Regex::new(&options.acceptable_room)?;
        Ok(Self {
            store,
            aliases,
            options,
            room_pattern,
            last_save_all: Arc::new(Mutex::new(None)),
        })
    }

    fn check_room(&self, room: &str) -> Result<(), ApiError> {
        if self.room_pattern.is_match(room) {
            Ok(())
        } else {
            Err(ApiError::InvalidRoom)
        }
    }
}

/// Query parameters for reads.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StreamQuery {
    pub start: i64,
    pub count: i64,
    pub nonblocking: bool,
    /// `{room}` is a read-only alias key rather than a room name
    pub readonlyname: bool,
}

impl Default for StreamQuery {
    fn default() -> Self {
        Self {
            start: 0,
            count: -1,
            nonblocking: false,
            readonlyname: false,
        }
    }
}

/// JSON read response.
#[derive(Debug, Serialize, Deserialize)]
pub struct StreamResult {
    pub data: String,
    pub readonlykey: String,
    pub signalled: usize,
    pub used: usize,
    pub limit: usize,
}

/// Errors a handler can answer with.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Room name has invalid characters! Try something simpler!")]
    InvalidRoom,
    #[error("Cannot save that frequently!")]
    SaveThrottled,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Alias(#[from] AliasError),
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidRoom
            | ApiError::SaveThrottled
            | ApiError::Alias(_)
            | ApiError::Store(StoreError::InvalidArgument(_)) => StatusCode::BAD_REQUEST,
            ApiError::Store(StoreError::Storage { .. }) | ApiError::Task(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_client_error() {
            warn!(error = %self, "Handled client error");
        } else {
            error!(error = %self, "Request failed");
        }

        (status, self.to_string()).into_response()
    }
}

/// Create the router with all room endpoints.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/stream/constants", get(handle_constants))
        .route("/stream/saveall", get(handle_save_all))
        .route("/stream/{room}", get(handle_read).post(handle_append))
        .route("/stream/{room}/json", get(handle_read_json))
        .layer(cors)
        .with_state(state)
}

/// GET - Size limits
async fn handle_constants(State(state): State<AppState>) -> Json<Limits> {
    Json(state.store.limits())
}

/// GET - Persist every room, at most once per cooldown
async fn handle_save_all(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    {
        let mut last = state.last_save_all.lock();
        let cooldown = Duration::from_millis(state.options.save_all_cooldown_ms);
        if last.is_some_and(|at| at.elapsed() < cooldown) {
            return Err(ApiError::SaveThrottled);
        }
        *last = Some(Instant::now());
    }

    let store = Arc::clone(&state.store);
    tokio::task::spawn_blocking(move || store.force_save_all()).await??;
    Ok("Saved all streams")
}

/// GET - Read room data as plain text
async fn handle_read(
    State(state): State<AppState>,
    Path(room): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Result<String, ApiError> {
    Ok(stream_result(&state, room, &query).await?.data)
}

/// GET - Read room data with listener count and usage
async fn handle_read_json(
    State(state): State<AppState>,
    Path(room): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Result<Json<StreamResult>, ApiError> {
    Ok(Json(stream_result(&state, room, &query).await?))
}

async fn stream_result(
    state: &AppState,
    room: String,
    query: &StreamQuery,
) -> Result<StreamResult, ApiError> {
    let room = if query.readonlyname {
        state.aliases.resolve(&room)?
    } else {
        room
    };
    state.check_room(&room)?;

    let record = lookup(state, &room).await?;
    let readonlykey = state.aliases.link(&room);

    let ready = if query.nonblocking {
        state.store.read_data(&record, query.start, query.count)?
    } else {
        state
            .store
            .read_blocking(&record, query.start, query.count)
            .await?
    };

    Ok(StreamResult {
        signalled: ready.signalled(),
        data: ready.data,
        readonlykey,
        used: ready.used,
        limit: ready.limit,
    })
}

/// Resolve a room off the async workers; reviving it may read from disk.
async fn lookup(state: &AppState, room: &str) -> Result<Arc<StreamRecord>, ApiError> {
    let store = Arc::clone(&state.store);
    let room = room.to_string();
    Ok(tokio::task::spawn_blocking(move || store.get_or_create(&room)).await??)
}

/// POST - Append the request body to a room
async fn handle_append(
    State(state): State<AppState>,
    Path(room): Path<String>,
    body: String,
) -> Result<StatusCode, ApiError> {
    state.check_room(&room)?;
    let record = lookup(&state, &room).await?;
    state.store.append(&record, &body).await?;
    Ok(StatusCode::OK)
}

/// Serve until `shutdown` is cancelled.
pub async fn start_server(state: AppState, shutdown: CancellationToken) -> std::io::Result<()> {
    let addr = format!("{}:{}", state.options.host, state.options.port);
    let router = create_router(state);

    info!("Starting room stream server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
