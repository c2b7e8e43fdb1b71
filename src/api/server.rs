//! API Server module
//!
//! This module exposes a session over HTTP for the study plan UI. Every
//! response is wrapped in [`ApiResponse`]; `GET /api/events` streams an
//! `update` event whenever the session changes.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::gateway::{AgentGateway, FileBlob, UploadGateway};
use crate::chat::ChatController;
use crate::focus::FocusSessionTimer;
use crate::pipeline::{PipelineController, StageError};
use crate::prefs::{GamificationMode, Theme};
use crate::presets::{AgentIds, DEFAULT_FOCUS_MINUTES};
use crate::session::Session;

/// Request to summarize pasted text
#[derive(Serialize, Deserialize)]
pub struct SummaryRequest {
    pub text: String,
}

/// Query of the generate endpoints
#[derive(Serialize, Deserialize, Default)]
pub struct GenerateParams {
    #[serde(default)]
    pub regenerate: bool,
}

/// Request to send a chat message
#[derive(Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// Request to start a focus session
#[derive(Serialize, Deserialize)]
pub struct FocusRequest {
    #[serde(default = "default_focus_minutes")]
    pub minutes: u32,
    #[serde(default)]
    pub goal: String,
}

fn default_focus_minutes() -> u32 {
    DEFAULT_FOCUS_MINUTES
}

/// Request to change display preferences. Absent fields are left unchanged.
#[derive(Serialize, Deserialize, Default)]
pub struct PreferencesRequest {
    pub theme: Option<Theme>,
    pub gamification_mode: Option<GamificationMode>,
}

/// Reply of the new project endpoint
#[derive(Serialize, Deserialize)]
pub struct ProjectResponse {
    pub project: u64,
}

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub address: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ([127, 0, 0, 1], 3000).into(),
        }
    }
}

/// API responses
#[derive(Serialize, Deserialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(ApiResponse::<()>::error(message))).into_response()
}

/// Maps a stage result to a response. Agent failures surface as 502.
fn map_stage_result<T: Serialize>(result: Result<T, StageError>) -> Response {
    match result {
        Ok(data) => ok(data),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, e.to_string()),
    }
}

/// Everything the handlers share
#[derive(Clone)]
pub struct AppState {
    pub session: Session,
    pub pipeline: Arc<PipelineController>,
    pub chat: Arc<ChatController>,
    pub focus: Arc<FocusSessionTimer>,
}

impl AppState {
    /// Wires the controllers of one session to the given gateways
    pub fn new(
        session: Session,
        agents: Arc<dyn AgentGateway>,
        uploads: Arc<dyn UploadGateway>,
        agent_ids: AgentIds,
    ) -> Self {
        let chat = ChatController::new(session.clone(), agents.clone(), agent_ids.chat.clone());
        let pipeline = PipelineController::new(session.clone(), agents, uploads, agent_ids);
        Self {
            focus: Arc::new(FocusSessionTimer::new(session.clone())),
            pipeline: Arc::new(pipeline),
            chat: Arc::new(chat),
            session,
        }
    }
}

/// Builds the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/project", post(new_project))
        .route("/api/summary", post(submit_text))
        .route("/api/summary/files", post(submit_files))
        .route("/api/tasks", post(generate_tasks))
        .route("/api/tasks/:id/toggle", post(toggle_task))
        .route("/api/timeline", get(get_schedule).post(generate_timeline))
        .route("/api/chat", post(send_chat))
        .route(
            "/api/focus",
            get(get_focus).post(start_focus).delete(cancel_focus),
        )
        .route("/api/preferences", put(update_preferences))
        .route("/api/events", get(events_handler))
        .with_state(state)
}

/// Starts the API server
pub async fn serve(state: AppState, config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    tracing::info!("Starting server on {}", config.address);
    let listener = TcpListener::bind(config.address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn get_state(State(state): State<AppState>) -> impl IntoResponse {
    ok(state.session.snapshot())
}

async fn new_project(State(state): State<AppState>) -> impl IntoResponse {
    let project = state.session.new_project();
    ok(ProjectResponse { project })
}

async fn submit_text(
    State(state): State<AppState>,
    Json(payload): Json<SummaryRequest>,
) -> impl IntoResponse {
    ok(state.pipeline.submit_text(&payload.text).await)
}

async fn submit_files(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut files = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
        };
        let name = field
            .file_name()
            .or_else(|| field.name())
            .unwrap_or("upload")
            .to_string();
        match field.bytes().await {
            Ok(bytes) => files.push(FileBlob::new(name, bytes.to_vec())),
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
        }
    }

    ok(state.pipeline.submit_files(files).await)
}

async fn generate_tasks(
    State(state): State<AppState>,
    Query(params): Query<GenerateParams>,
) -> impl IntoResponse {
    let result = if params.regenerate {
        state.pipeline.regenerate_tasks().await
    } else {
        state.pipeline.generate_tasks().await
    };
    map_stage_result(result)
}

// Unknown ids are a no-op and answer with `data: null`
async fn toggle_task(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    ok(state.session.toggle_status(&id))
}

async fn get_schedule(State(state): State<AppState>) -> impl IntoResponse {
    ok(state.session.read(|session| session.plan().schedule()))
}

async fn generate_timeline(
    State(state): State<AppState>,
    Query(params): Query<GenerateParams>,
) -> impl IntoResponse {
    let result = if params.regenerate {
        state.pipeline.regenerate_timeline().await
    } else {
        state.pipeline.generate_timeline().await
    };
    map_stage_result(result)
}

async fn send_chat(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> impl IntoResponse {
    map_stage_result(state.chat.send(&payload.message).await)
}

async fn get_focus(State(state): State<AppState>) -> impl IntoResponse {
    ok(state.focus.state())
}

async fn start_focus(
    State(state): State<AppState>,
    Json(payload): Json<FocusRequest>,
) -> impl IntoResponse {
    ok(state.focus.start(payload.minutes, &payload.goal))
}

async fn cancel_focus(State(state): State<AppState>) -> impl IntoResponse {
    ok(state.focus.cancel())
}

async fn update_preferences(
    State(state): State<AppState>,
    Json(payload): Json<PreferencesRequest>,
) -> impl IntoResponse {
    if let Some(theme) = payload.theme {
        state.session.set_theme(theme);
    }
    if let Some(mode) = payload.gamification_mode {
        state.session.set_gamification_mode(mode);
    }
    ok(state.session.read(|session| session.preferences()))
}

const UPDATE_EVENT: &str = "event: update\ndata: change\n\n";

async fn events_handler(State(state): State<AppState>) -> impl IntoResponse {
    let receiver = state.session.subscribe();
    let stream = futures::stream::unfold(receiver, |mut receiver| async move {
        match receiver.recv().await {
            // Missed notifications still mean the state changed
            Ok(()) | Err(RecvError::Lagged(_)) => {
                Some((Ok::<_, Infallible>(UPDATE_EVENT.to_string()), receiver))
            }
            Err(RecvError::Closed) => None,
        }
    });

    // Set headers for event stream
    let headers = [
        (
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("text/event-stream"),
        ),
        (
            axum::http::header::CACHE_CONTROL,
            axum::http::HeaderValue::from_static("no-cache"),
        ),
    ];

    (headers, axum::body::Body::from_stream(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::gateway::{AgentRequest, AgentResponse, GatewayError, UploadResponse};
    use crate::models::Stage;
    use crate::session::SessionSnapshot;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt; // for `collect`
    use serde::de::DeserializeOwned;
    use serde_json::{json, Value};
    use tower::ServiceExt; // for `oneshot`

    /// Answers each agent with a fixed, well-formed result
    struct CannedAgents {
        ids: AgentIds,
    }

    #[async_trait::async_trait]
    impl AgentGateway for CannedAgents {
        async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, GatewayError> {
            let result = if request.agent_id == self.ids.summary {
                json!({"goals": ["Pass"], "requirements": [], "deadlines": [], "rawNotes": "n"})
            } else if request.agent_id == self.ids.task {
                json!({"tasks": [{
                    "id": "t1", "title": "Read", "description": "Ch. 1",
                    "priority": "high", "estimatedTime": "1h", "status": "todo"
                }]})
            } else if request.agent_id == self.ids.planning {
                json!({"timeline": [{"day": "Day 1", "date": "", "tasks": ["t1", "gone"], "focus": "Read"}]})
            } else {
                return Err(GatewayError::Unavailable("chat is down".to_string()));
            };
            Ok(AgentResponse::success(result))
        }
    }

    struct NoUploads;

    #[async_trait::async_trait]
    impl UploadGateway for NoUploads {
        async fn upload(&self, _files: Vec<FileBlob>) -> Result<UploadResponse, GatewayError> {
            Err(GatewayError::Unavailable("uploads disabled".to_string()))
        }
    }

    fn setup_test_app() -> (Session, Router) {
        let session = Session::in_memory();
        let ids = AgentIds::default();
        let state = AppState::new(
            session.clone(),
            Arc::new(CannedAgents { ids: ids.clone() }),
            Arc::new(NoUploads),
            ids,
        );
        (session, router(state))
    }

    // Helper to make requests and deserialize the JSON envelope
    async fn request_json<T: DeserializeOwned + Serialize>(
        app: &Router,
        method: &str,
        uri: &str,
        body: Value,
    ) -> (StatusCode, ApiResponse<T>) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("Content-Type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
        let parsed = serde_json::from_slice::<ApiResponse<T>>(&body_bytes).unwrap_or_else(|e| {
            panic!(
                "Failed to parse response: {}. Body: {}",
                e,
                String::from_utf8_lossy(&body_bytes)
            )
        });
        (status, parsed)
    }

    #[tokio::test]
    async fn test_full_pipeline_over_http() {
        let (_session, app) = setup_test_app();

        let (status, resp) =
            request_json::<Value>(&app, "POST", "/api/summary", json!({"text": "Algebra"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp.data, Some(json!({"outcome": "committed"})));

        let (status, _) = request_json::<Value>(&app, "POST", "/api/tasks", json!({})).await;
        assert_eq!(status, StatusCode::OK);

        // A second plain generate is a no-op
        let (_, resp) = request_json::<Value>(&app, "POST", "/api/tasks", json!({})).await;
        assert_eq!(
            resp.data,
            Some(json!({"outcome": "rejected", "reason": "already_generated"}))
        );

        let (status, _) = request_json::<Value>(&app, "POST", "/api/timeline", json!({})).await;
        assert_eq!(status, StatusCode::OK);

        let (_, resp) = request_json::<Value>(&app, "GET", "/api/timeline", json!({})).await;
        let schedule = resp.data.unwrap();
        assert_eq!(schedule[0]["tasks"].as_array().unwrap().len(), 1);

        let (_, resp) = request_json::<SessionSnapshot>(&app, "GET", "/api/state", json!({})).await;
        let snapshot = resp.data.unwrap();
        assert_eq!(snapshot.stage, Stage::TimelineReady);
        assert_eq!(snapshot.tasks.len(), 1);
    }

    #[tokio::test]
    async fn test_toggle_unknown_task_is_a_no_op() {
        let (session, app) = setup_test_app();
        let (status, resp) =
            request_json::<Value>(&app, "POST", "/api/tasks/nope/toggle", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert!(resp.success);
        assert_eq!(resp.data, None);
        assert_eq!(session.progress().value(), 0);
        assert_eq!(session.stage(), Stage::Idle);
    }

    #[tokio::test]
    async fn test_chat_failure_is_bad_gateway() {
        let (session, app) = setup_test_app();
        let (status, resp) =
            request_json::<Value>(&app, "POST", "/api/chat", json!({"message": "help"})).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(resp.error.unwrap().contains("chat is down"));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.chat.len(), 1);
        assert!(!snapshot.chatting);
        assert!(snapshot.last_failure.is_some());
    }

    #[tokio::test]
    async fn test_preferences_update() {
        let (_session, app) = setup_test_app();
        let (status, resp) = request_json::<Value>(
            &app,
            "PUT",
            "/api/preferences",
            json!({"theme": "forest", "gamification_mode": "companion"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            resp.data,
            Some(json!({"theme": "forest", "gamification_mode": "companion"}))
        );
    }

    #[tokio::test]
    async fn test_new_project_clears_plan() {
        let (session, app) = setup_test_app();
        request_json::<Value>(&app, "POST", "/api/summary", json!({"text": "Algebra"})).await;

        let (_, resp) =
            request_json::<ProjectResponse>(&app, "POST", "/api/project", json!({})).await;
        assert_eq!(resp.data.unwrap().project, 1);
        assert_eq!(session.stage(), Stage::Idle);
    }
}
