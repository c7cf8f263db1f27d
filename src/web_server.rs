use std::collections::HashMap;
use std::time::Duration;
use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    serve, Json, Router,
};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::constants::{EXPORT_FILE_NAME, EXPORT_MIME_TYPE, PREVIEW_HEIGHT_PX, RECENT_HISTORY_LEN};
use crate::error::{DiagramError, GenerationError};
use crate::generation::GeminiClient;
use crate::image_input::ImageInput;
use crate::render::RendererKind;
use crate::session::DiagramSession;

const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

type SessionHandle = Arc<Mutex<DiagramSession>>;

struct SessionEntry {
    handle: SessionHandle,
    last_seen: Instant,
}

// Shared application state. Each browser session gets its own DiagramSession.
#[derive(Clone)]
struct AppState {
    settings: Arc<Settings>,
    http: reqwest::Client,
    templates: Arc<AutoReloader>,
    renderer: RendererKind,
    sessions: Arc<RwLock<HashMap<Uuid, SessionEntry>>>,
}

impl AppState {
    fn new(settings: Settings) -> Self {
        let renderer = RendererKind::select(settings.renderer, &settings.static_dir);
        let templates = create_minijinja_env(settings.templates_dir.clone());
        Self {
            settings: Arc::new(settings),
            http: reqwest::Client::new(),
            templates: Arc::new(templates),
            renderer,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Looks up a live session and marks it as used. Idle sessions are discarded on sight.
    async fn session(&self, id: Uuid) -> Result<SessionHandle, ApiError> {
        let mut sessions = self.sessions.write().await;
        let expired = match sessions.get(&id) {
            Some(entry) => entry.last_seen.elapsed() > self.settings.session_idle,
            None => return Err(ApiError::NotFound(id)),
        };
        if expired {
            sessions.remove(&id);
            info!(%id, "Idle session expired");
            return Err(ApiError::NotFound(id));
        }
        let entry = sessions.get_mut(&id).ok_or(ApiError::NotFound(id))?;
        entry.last_seen = Instant::now();
        Ok(entry.handle.clone())
    }

    async fn create_session(&self) -> Uuid {
        let id = Uuid::new_v4();
        let session = DiagramSession::new(self.settings.timeout);
        self.sessions.write().await.insert(
            id,
            SessionEntry {
                handle: Arc::new(Mutex::new(session)),
                last_seen: Instant::now(),
            },
        );
        info!(%id, "Session created");
        id
    }

    /// Drops every session idle for longer than the configured limit.
    /// Sessions with a request in flight are kept.
    async fn evict_idle(&self) -> usize {
        let idle = self.settings.session_idle;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| {
            entry.last_seen.elapsed() <= idle || entry.handle.try_lock().is_err()
        });
        before - sessions.len()
    }

    fn generator(&self, explicit_key: Option<&str>) -> Result<GeminiClient, DiagramError> {
        let api_key = self.settings.api_key_for(explicit_key)?;
        Ok(GeminiClient::new(
            self.http.clone(),
            self.settings.api_base.clone(),
            api_key,
            self.settings.model.clone(),
        ))
    }

    fn render(&self, name: &str, context: minijinja::Value) -> Result<Html<String>, ApiError> {
        self.templates
            .acquire_env()
            .and_then(|env| env.get_template(name).and_then(|tmpl| tmpl.render(context)))
            .map(Html)
            .map_err(|e| {
                error!("Failed to get or render template {}: {}", name, e);
                ApiError::Internal(e.to_string())
            })
    }
}

/// Session snapshot returned by every JSON endpoint.
#[derive(Debug, Serialize)]
struct SessionSnapshot {
    id: Uuid,
    generated: bool,
    current_code: String,
    original_code: String,
    history_len: usize,
    recent_requests: Vec<String>,
}

impl SessionSnapshot {
    fn of(id: Uuid, session: &DiagramSession) -> Self {
        let state = session.state();
        Self {
            id,
            generated: state.generated,
            current_code: state.current_code.clone(),
            original_code: state.original_code.clone(),
            history_len: state.history.len(),
            recent_requests: session
                .recent_history(RECENT_HISTORY_LEN)
                .map(|entry| entry.request.clone())
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EditRequest {
    instruction: String,
    #[serde(default)]
    api_key: Option<String>,
}

#[derive(Debug)]
enum ApiError {
    Diagram(DiagramError),
    /// A failed edit; the session is back on its original code.
    EditRolledBack { error: DiagramError, current_code: String },
    NotFound(Uuid),
    Busy,
    Internal(String),
}

impl From<DiagramError> for ApiError {
    fn from(err: DiagramError) -> Self {
        ApiError::Diagram(err)
    }
}

fn status_for(err: &DiagramError) -> StatusCode {
    match err {
        DiagramError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        DiagramError::Configuration(_) => StatusCode::UNAUTHORIZED,
        DiagramError::Generation(GenerationError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        DiagramError::Generation(_) => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Diagram(err) => (
                status_for(&err),
                serde_json::json!({ "error": err.to_string(), "kind": err.kind() }),
            ),
            ApiError::EditRolledBack { error, current_code } => (
                status_for(&error),
                serde_json::json!({
                    "error": error.to_string(),
                    "kind": error.kind(),
                    "restored_original": true,
                    "current_code": current_code,
                }),
            ),
            ApiError::NotFound(id) => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": format!("session {} not found", id), "kind": "not_found" }),
            ),
            ApiError::Busy => (
                StatusCode::CONFLICT,
                serde_json::json!({
                    "error": "another request for this session is still running",
                    "kind": "busy",
                }),
            ),
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": message, "kind": "internal" }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

// Minijinja environment, reloaded from disk when templates change
fn create_minijinja_env(templates_dir: std::path::PathBuf) -> AutoReloader {
    AutoReloader::new(move |notifier| {
        let mut env = Environment::new();
        env.set_loader(path_loader(&templates_dir));
        notifier.watch_path(&templates_dir, true);
        Ok(env)
    })
}

async fn index_handler(State(state): State<AppState>) -> Redirect {
    let id = state.create_session().await;
    Redirect::to(&format!("/sessions/{}", id))
}

async fn editor_page(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    // A closed or expired session sends the browser back for a fresh one.
    if let Err(ApiError::NotFound(_)) = state.session(id).await {
        return Ok(Redirect::to("/").into_response());
    }
    let page = state.render(
        "editor.html",
        minijinja::context! {
            title => "Inkflow diagram editor",
            session_id => id.to_string(),
            renderer => state.renderer,
            has_configured_key => state.settings.api_key.is_some(),
            preview_height => PREVIEW_HEIGHT_PX,
        },
    )?;
    Ok(page.into_response())
}

async fn preview_page(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Html<String>, ApiError> {
    let handle = state.session(id).await?;
    let code = handle.lock().await.current_code().to_string();
    state.render(
        state.renderer.template_name(),
        minijinja::context! {
            code => code,
            preview_height => PREVIEW_HEIGHT_PX,
        },
    )
}

async fn create_session(State(state): State<AppState>) -> impl IntoResponse {
    let id = state.create_session().await;
    (StatusCode::CREATED, Json(serde_json::json!({ "id": id })))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let handle = state.session(id).await?;
    let session = handle.lock().await;
    Ok(Json(SessionSnapshot::of(id, &session)))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    match state.sessions.write().await.remove(&id) {
        Some(_) => {
            info!(%id, "Session discarded");
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(ApiError::NotFound(id)),
    }
}

async fn upload_diagram(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let handle = state.session(id).await?;

    let mut image = None;
    let mut context = None;
    let mut api_key = None;
    while let Some(field) = multipart.next_field().await.map_err(invalid_upload)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => image = Some(field.bytes().await.map_err(invalid_upload)?),
            "context" => context = Some(field.text().await.map_err(invalid_upload)?),
            "api_key" => api_key = Some(field.text().await.map_err(invalid_upload)?),
            other => warn!(field = other, "Ignoring unknown upload field"),
        }
    }

    let generator = state.generator(api_key.as_deref())?;
    let image = image
        .ok_or_else(|| DiagramError::InvalidRequest("missing 'image' file field".to_string()))?;
    let image = ImageInput::from_bytes(image.to_vec())?;

    let mut session = handle.try_lock().map_err(|_| ApiError::Busy)?;
    session
        .start_new_diagram(&generator, &image, context.as_deref())
        .await?;
    Ok(Json(SessionSnapshot::of(id, &session)))
}

fn invalid_upload(err: axum::extract::multipart::MultipartError) -> ApiError {
    DiagramError::InvalidRequest(format!("malformed upload: {}", err)).into()
}

async fn apply_edit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<EditRequest>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let handle = state.session(id).await?;
    let generator = state.generator(request.api_key.as_deref())?;

    let mut session = handle.try_lock().map_err(|_| ApiError::Busy)?;
    let result = session.apply_edit(&generator, &request.instruction).await;
    match result {
        Ok(_) => Ok(Json(SessionSnapshot::of(id, &session))),
        Err(error @ DiagramError::Generation(_)) => Err(ApiError::EditRolledBack {
            error,
            current_code: session.current_code().to_string(),
        }),
        Err(error) => Err(error.into()),
    }
}

async fn restore_original(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let handle = state.session(id).await?;
    let mut session = handle.try_lock().map_err(|_| ApiError::Busy)?;
    session.restore_original();
    Ok(Json(SessionSnapshot::of(id, &session)))
}

async fn download_code(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let handle = state.session(id).await?;
    let code = handle.lock().await.export().to_string();
    Ok((
        [
            (header::CONTENT_TYPE, EXPORT_MIME_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", EXPORT_FILE_NAME),
            ),
        ],
        code,
    )
        .into_response())
}

/// Builds the application router. Renderer selection happens here, once.
pub fn build_router(settings: Settings) -> Router {
    router(AppState::new(settings))
}

fn router(state: AppState) -> Router {
    // Serve static files from the configured directory
    let static_files_service = ServeDir::new(&state.settings.static_dir).not_found_service(
        tower::service_fn(|_| async {
            Ok::<_, std::convert::Infallible>((StatusCode::NOT_FOUND, "Not Found").into_response())
        }),
    );

    Router::new()
        .route("/", get(index_handler))
        .route("/sessions/:id", get(editor_page))
        .route("/sessions/:id/preview", get(preview_page))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session).delete(delete_session))
        .route("/api/sessions/:id/diagram", post(upload_diagram))
        .route("/api/sessions/:id/edits", post(apply_edit))
        .route("/api/sessions/:id/restore", post(restore_original))
        .route("/api/sessions/:id/download", get(download_code))
        .nest_service("/static", static_files_service)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
        .layer(TraceLayer::new_for_http()) // Add request logging
}

// Periodically drops sessions whose browser went away without saying so.
async fn sweep_idle_sessions(state: AppState) {
    let period = (state.settings.session_idle / 4).max(Duration::from_secs(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let evicted = state.evict_idle().await;
        if evicted > 0 {
            info!(evicted, "Expired idle sessions");
        }
    }
}

pub async fn start_web_server(port: u16, settings: Settings) -> Result<()> {
    let state = AppState::new(settings);
    tokio::spawn(sweep_idle_sessions(state.clone()));
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Web server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service())
        .await
        .context("Web server failed")?;

    Ok(())
}
