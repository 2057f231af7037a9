//! HTTP surface: thin adapters between the request/response endpoints, the
//! in-memory call state, and the two external providers.
//!
//! Every per-request error is handled here; degraded vision/chat responses
//! always carry a directly usable `analysis`/`response` field so clients
//! never need special-case parsing on the error path.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::classifier::is_vision_question;
use crate::config::AppConfig;
use crate::context::VisualContextStore;
use crate::openai::{is_quota_error, ChatModel};
use crate::persona::{compose_instructions, PERSONA_TEMPLATE};
use crate::sessions::{PushError, SessionError, SessionRegistry};
use crate::stream::CallProvider;

const DEFAULT_IMAGE_QUERY: &str = "What do you see in this image?";

const QUOTA_PLACEHOLDER_ANALYSIS: &str = "I can see you're testing the camera functionality! \
    This is a placeholder response because the vision provider's quota has been exceeded. \
    Your camera is working and the image reached the server correctly; real analysis will \
    resume once the provider account has available quota.";

const BLANK_FRAME_ANALYSIS: &str =
    "Camera is initializing, please wait a moment for a clear image.";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<SessionRegistry>,
    pub contexts: Arc<VisualContextStore>,
    pub calls: Arc<dyn CallProvider>,
    pub chat_model: Arc<dyn ChatModel>,
}

#[derive(Debug, Deserialize)]
struct UserIdQuery {
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddAgentRequest {
    call_id: Option<String>,
    #[allow(dead_code)]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateVisualContextRequest {
    call_id: Option<String>,
    visual_context: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    message: Option<String>,
    call_id: Option<String>,
    user_id: Option<String>,
    emotional_state: Option<String>,
    custom_prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndCallRequest {
    call_id: Option<String>,
}

pub async fn serve(state: AppState) -> Result<()> {
    let bind_addr = state
        .config
        .bind_addr
        .parse::<SocketAddr>()
        .with_context(|| format!("Invalid bind address '{}'", state.config.bind_addr))?;

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind server to {}", bind_addr))?;
    tracing::info!("Lexi backend listening on http://{}", bind_addr);
    axum::serve(listener, app).await.context("Server failed")?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/call", get(create_call))
        .route("/credentials", get(create_credentials))
        .route("/add-ai-agent", post(add_ai_agent))
        .route("/analyze-image", post(analyze_image))
        .route("/update-visual-context", post(update_visual_context))
        .route("/chat", post(chat))
        .route("/end-call", post(end_call))
        .route("/health", get(health))
        .route("/:call_type/:call_id/connect", post(connect_agent))
        .with_state(state)
}

/// Create the call, bind the agent, push the base persona, and register the
/// session. Shared by `/call` and `/credentials`.
async fn start_call(state: &AppState, user_id: &str) -> Result<Value> {
    let call_id = Uuid::new_v4().to_string();
    let call_type = state.config.call_type.as_str();
    let agent_user_id = state.config.agent_user_id.as_str();

    state.calls.create_call(call_type, &call_id).await?;

    // Register the session only once the agent is connected. A failed
    // connect must not leave an orphan entry: the caller never learns the
    // call id, so nothing could ever reclaim it.
    let agent = state
        .calls
        .connect_agent(call_type, &call_id, agent_user_id)
        .await?;

    state
        .registry
        .create(&call_id, agent_user_id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to register call {call_id}: {e}"))?;
    if let Err(error) = state
        .registry
        .attach_agent(&call_id, agent, agent_user_id)
        .await
    {
        let _ = state.registry.end(&call_id).await;
        return Err(anyhow::anyhow!(
            "Failed to attach agent to call {call_id}: {error}"
        ));
    }

    let instructions = compose_instructions(PERSONA_TEMPLATE, None, None, false);
    if let Err(error) = state.registry.push_instructions(&call_id, &instructions).await {
        tracing::warn!("Initial instruction push failed for call {}: {}", call_id, error);
    }

    let token = state.calls.create_user_token(user_id)?;
    tracing::info!("Created call {} for user {}", call_id, user_id);

    Ok(json!({
        "apiKey": state.calls.api_key(),
        "callId": call_id,
        "userId": user_id,
        "token": token,
        "agentUserId": agent_user_id,
    }))
}

async fn create_call(
    State(state): State<AppState>,
    Query(query): Query<UserIdQuery>,
) -> Response {
    let user_id = query.user_id.as_deref().unwrap_or("user");
    match start_call(&state, user_id).await {
        Ok(body) => Json(body).into_response(),
        Err(error) => {
            tracing::error!("Failed to create call: {:#}", error);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create call")
        }
    }
}

async fn create_credentials(
    State(state): State<AppState>,
    Query(query): Query<UserIdQuery>,
) -> Response {
    let user_id = query.user_id.as_deref().unwrap_or("lucy");
    match start_call(&state, user_id).await {
        Ok(mut body) => {
            body["callType"] = json!(state.config.call_type);
            Json(body).into_response()
        }
        Err(error) => {
            tracing::error!("Failed to create call: {:#}", error);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create call")
        }
    }
}

async fn add_ai_agent(
    State(state): State<AppState>,
    Json(body): Json<AddAgentRequest>,
) -> Response {
    let Some(call_id) = body.call_id.as_deref().filter(|id| !id.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "Call ID is required");
    };

    match state.registry.get(call_id).await {
        Some(session) => agent_ready_response(&session.agent_user_id),
        None => error_response(StatusCode::NOT_FOUND, "Call not found"),
    }
}

async fn connect_agent(
    State(state): State<AppState>,
    Path((_call_type, call_id)): Path<(String, String)>,
) -> Response {
    match state.registry.get(&call_id).await {
        Some(session) => agent_ready_response(&session.agent_user_id),
        None => error_response(StatusCode::NOT_FOUND, "Call not found"),
    }
}

fn agent_ready_response(agent_user_id: &str) -> Response {
    Json(json!({
        "success": true,
        "message": "AI agent is ready to assist",
        "agentUserId": agent_user_id,
    }))
    .into_response()
}

async fn analyze_image(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut image: Option<(Vec<u8>, String)> = None;
    let mut query = DEFAULT_IMAGE_QUERY.to_string();
    let mut call_id: Option<String> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(error) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    &format!("Invalid multipart payload: {error}"),
                );
            }
        };

        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let mime_type = field
                    .content_type()
                    .unwrap_or("image/jpeg")
                    .to_string();
                match field.bytes().await {
                    Ok(bytes) if !bytes.is_empty() => {
                        image = Some((bytes.to_vec(), mime_type));
                    }
                    Ok(_) => {}
                    Err(error) => {
                        return error_response(
                            StatusCode::BAD_REQUEST,
                            &format!("Failed reading image bytes: {error}"),
                        );
                    }
                }
            }
            "query" => {
                if let Ok(text) = field.text().await {
                    if !text.trim().is_empty() {
                        query = text;
                    }
                }
            }
            "callId" => {
                if let Ok(text) = field.text().await {
                    if !text.trim().is_empty() {
                        call_id = Some(text);
                    }
                }
            }
            _ => {}
        }
    }

    let Some((image_bytes, mime_type)) = image else {
        return error_response(StatusCode::BAD_REQUEST, "Image file is required");
    };

    tracing::debug!(
        "Analyzing image ({} bytes, {}) for call {:?}",
        image_bytes.len(),
        mime_type,
        call_id
    );

    let analysis = match state
        .chat_model
        .describe_image(&image_bytes, &mime_type, &query)
        .await
    {
        Ok(analysis) => analysis,
        Err(error) if is_quota_error(&error) => {
            tracing::warn!("Vision quota exceeded, returning placeholder analysis");
            return Json(json!({
                "analysis": QUOTA_PLACEHOLDER_ANALYSIS,
                "success": true,
                "mock": true,
            }))
            .into_response();
        }
        Err(error) => {
            tracing::error!("Image analysis failed: {:#}", error);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Failed to analyze image",
                    "analysis": "I encountered an error while analyzing this image. Please try again.",
                    "details": format!("{error:#}"),
                })),
            )
                .into_response();
        }
    };

    // Blank startup frames carry no usable scene; answer without storing.
    if is_blank_camera_frame(&analysis) {
        tracing::debug!("Skipping blank camera frame");
        return Json(json!({
            "analysis": BLANK_FRAME_ANALYSIS,
            "success": true,
            "skip": true,
        }))
        .into_response();
    }

    if let Some(call_id) = call_id.as_deref() {
        state
            .contexts
            .set(call_id, analysis.clone(), Utc::now())
            .await;

        let instructions =
            compose_instructions(PERSONA_TEMPLATE, None, Some(analysis.as_str()), true);
        log_push_outcome(
            state.registry.push_instructions(call_id, &instructions).await,
            call_id,
        );
    }

    Json(json!({ "analysis": analysis, "success": true })).into_response()
}

async fn update_visual_context(
    State(state): State<AppState>,
    Json(body): Json<UpdateVisualContextRequest>,
) -> Response {
    let (Some(call_id), Some(visual_context)) =
        (body.call_id.as_deref(), body.visual_context.as_deref())
    else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "CallId and visualContext are required",
        );
    };
    if call_id.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "CallId and visualContext are required",
        );
    }

    // An empty description clears the stored context and resets the agent to
    // the bare persona.
    let (instructions, message) = if visual_context.trim().is_empty() {
        state.contexts.remove(call_id).await;
        (
            compose_instructions(PERSONA_TEMPLATE, None, None, false),
            "Visual context cleared",
        )
    } else {
        state
            .contexts
            .set(call_id, visual_context.to_string(), Utc::now())
            .await;
        (
            compose_instructions(PERSONA_TEMPLATE, None, Some(visual_context), true),
            "Visual context updated successfully",
        )
    };

    log_push_outcome(
        state.registry.push_instructions(call_id, &instructions).await,
        call_id,
    );

    Json(json!({ "success": true, "message": message })).into_response()
}

async fn chat(State(state): State<AppState>, Json(body): Json<ChatRequest>) -> Response {
    let Some(message) = body.message.as_deref().filter(|m| !m.trim().is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "Message is required");
    };

    let visual_context = match body.call_id.as_deref() {
        Some(call_id) => state.contexts.get(call_id).await,
        None => None,
    };

    let vision_question = is_vision_question(message, &state.config.vision_keywords);
    tracing::debug!(
        "Chat message (vision question: {}, visual context: {})",
        vision_question,
        visual_context.is_some()
    );

    let persona = body
        .custom_prompt
        .as_deref()
        .map(str::trim)
        .filter(|prompt| !prompt.is_empty())
        .unwrap_or(PERSONA_TEMPLATE);
    let system_prompt = compose_instructions(
        persona,
        body.emotional_state.as_deref(),
        visual_context.as_ref().map(|ctx| ctx.description.as_str()),
        vision_question,
    );

    match state.chat_model.chat(&system_prompt, message).await {
        Ok(response) => Json(json!({
            "response": response,
            "callId": body.call_id,
            "userId": body.user_id,
        }))
        .into_response(),
        Err(error) => {
            tracing::error!("Chat completion failed: {:#}", error);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Failed to process message",
                    "response": "I'm sorry, I encountered an error. Please try again.",
                })),
            )
                .into_response()
        }
    }
}

async fn end_call(State(state): State<AppState>, Json(body): Json<EndCallRequest>) -> Response {
    let Some(call_id) = body.call_id.as_deref().filter(|id| !id.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "Call ID is required");
    };

    match state.registry.end(call_id).await {
        Ok(()) => {
            state.contexts.remove(call_id).await;
            tracing::info!("Ended call {}", call_id);
            Json(json!({ "success": true, "message": "Call ended" })).into_response()
        }
        Err(SessionError::NotFound) => error_response(StatusCode::NOT_FOUND, "Call not found"),
        Err(error) => {
            tracing::error!("Failed to end call {}: {}", call_id, error);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to end call")
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "activeCalls": state.registry.active_count().await,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Instruction pushes triggered by context updates are best-effort: the
/// store is the source of truth and a missing or agent-less session only
/// means there is no live agent to notify right now.
fn log_push_outcome(result: Result<(), PushError>, call_id: &str) {
    match result {
        Ok(()) => tracing::debug!("Pushed updated instructions for call {}", call_id),
        Err(PushError::NotFound) | Err(PushError::NoAgent) => {
            tracing::debug!("No live agent for call {}; context stored only", call_id)
        }
        Err(PushError::Provider(error)) => {
            tracing::warn!("Instruction push failed for call {}: {:#}", call_id, error)
        }
    }
}

fn is_blank_camera_frame(analysis: &str) -> bool {
    let lowered = analysis.to_lowercase();
    [
        "solid gray",
        "uniformly covered",
        "no discernible objects",
        "completely gray",
    ]
    .iter()
    .any(|marker| lowered.contains(marker))
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::test_support::RecordingAgent;
    use crate::sessions::AgentHandle;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    struct FakeCallProvider;

    #[async_trait]
    impl CallProvider for FakeCallProvider {
        fn api_key(&self) -> &str {
            "test-api-key"
        }

        async fn create_call(&self, _call_type: &str, _call_id: &str) -> Result<()> {
            Ok(())
        }

        async fn connect_agent(
            &self,
            _call_type: &str,
            _call_id: &str,
            _agent_user_id: &str,
        ) -> Result<Arc<dyn AgentHandle>> {
            Ok(Arc::new(RecordingAgent::default()))
        }

        fn create_user_token(&self, user_id: &str) -> Result<String> {
            Ok(format!("token-{user_id}"))
        }
    }

    #[derive(Default)]
    struct FakeChatModel {
        reply: String,
        analysis: Option<std::result::Result<String, String>>,
        system_prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatModel for FakeChatModel {
        async fn chat(&self, system_prompt: &str, _user_message: &str) -> Result<String> {
            self.system_prompts
                .lock()
                .await
                .push(system_prompt.to_string());
            Ok(self.reply.clone())
        }

        async fn describe_image(
            &self,
            _image: &[u8],
            _mime_type: &str,
            _query: &str,
        ) -> Result<String> {
            match self.analysis.as_ref().expect("analysis configured") {
                Ok(analysis) => Ok(analysis.clone()),
                Err(message) => Err(anyhow!("{message}")),
            }
        }
    }

    fn test_state(chat_model: Arc<FakeChatModel>) -> AppState {
        AppState {
            config: Arc::new(AppConfig::default()),
            registry: Arc::new(SessionRegistry::new()),
            contexts: Arc::new(VisualContextStore::new()),
            calls: Arc::new(FakeCallProvider),
            chat_model,
        }
    }

    async fn send_json(router: Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        send(router, request).await
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    const BOUNDARY: &str = "test-boundary-314159";

    fn multipart_request(uri: &str, parts: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
        let mut body = Vec::new();
        for (name, filename, bytes) in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match filename {
                Some(filename) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                             Content-Type: image/jpeg\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                }
                None => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n")
                            .as_bytes(),
                    );
                }
            }
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_active_call_count() {
        let state = test_state(Arc::new(FakeChatModel::default()));
        let registry = state.registry.clone();
        registry.create("call-1", "lexi_ai").await.unwrap();

        let (status, body) = send(
            build_router(state),
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["activeCalls"], 1);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn create_call_registers_session_and_returns_credentials() {
        let state = test_state(Arc::new(FakeChatModel::default()));
        let registry = state.registry.clone();

        let (status, body) = send(
            build_router(state),
            Request::builder()
                .method("GET")
                .uri("/call?user_id=sam")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["apiKey"], "test-api-key");
        assert_eq!(body["userId"], "sam");
        assert_eq!(body["token"], "token-sam");
        assert_eq!(body["agentUserId"], "lexi_ai");

        let call_id = body["callId"].as_str().unwrap();
        let session = registry.get(call_id).await.expect("session registered");
        assert!(session.agent.is_some());
        assert_eq!(registry.active_count().await, 1);
    }

    /// Fails when binding the agent, after the call itself was created.
    struct AgentConnectFailsProvider;

    #[async_trait]
    impl CallProvider for AgentConnectFailsProvider {
        fn api_key(&self) -> &str {
            "test-api-key"
        }

        async fn create_call(&self, _call_type: &str, _call_id: &str) -> Result<()> {
            Ok(())
        }

        async fn connect_agent(
            &self,
            _call_type: &str,
            _call_id: &str,
            _agent_user_id: &str,
        ) -> Result<Arc<dyn AgentHandle>> {
            Err(anyhow!("provider refused the realtime connection"))
        }

        fn create_user_token(&self, user_id: &str) -> Result<String> {
            Ok(format!("token-{user_id}"))
        }
    }

    #[tokio::test]
    async fn failed_agent_connect_returns_error_and_registers_nothing() {
        let mut state = test_state(Arc::new(FakeChatModel::default()));
        state.calls = Arc::new(AgentConnectFailsProvider);
        let registry = state.registry.clone();

        for uri in ["/call", "/credentials"] {
            let (status, body) = send(
                build_router(state.clone()),
                Request::builder()
                    .method("GET")
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;

            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert!(body["error"].is_string());
            assert_eq!(registry.active_count().await, 0);
        }

        // Health still reports zero active calls afterwards.
        let (status, body) = send(
            build_router(state),
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["activeCalls"], 0);
    }

    #[tokio::test]
    async fn credentials_defaults_to_lucy_and_includes_call_type() {
        let state = test_state(Arc::new(FakeChatModel::default()));

        let (status, body) = send(
            build_router(state),
            Request::builder()
                .method("GET")
                .uri("/credentials")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["userId"], "lucy");
        assert_eq!(body["callType"], "default");
        assert_eq!(body["token"], "token-lucy");
    }

    #[tokio::test]
    async fn add_ai_agent_unknown_call_is_not_found_and_leaves_registry_unchanged() {
        let state = test_state(Arc::new(FakeChatModel::default()));
        let registry = state.registry.clone();

        let (status, body) = send_json(
            build_router(state),
            "POST",
            "/add-ai-agent",
            json!({ "callId": "nope", "userId": "sam" }),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
        assert_eq!(registry.active_count().await, 0);
    }

    #[tokio::test]
    async fn add_ai_agent_requires_call_id() {
        let state = test_state(Arc::new(FakeChatModel::default()));
        let (status, body) =
            send_json(build_router(state), "POST", "/add-ai-agent", json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn connect_route_confirms_known_call() {
        let state = test_state(Arc::new(FakeChatModel::default()));
        state.registry.create("call-7", "lexi_ai").await.unwrap();

        let (status, body) = send_json(
            build_router(state.clone()),
            "POST",
            "/default/call-7/connect",
            json!({}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["agentUserId"], "lexi_ai");

        let (status, _) = send_json(
            build_router(state),
            "POST",
            "/default/unknown/connect",
            json!({}),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn analyze_image_without_image_is_rejected_and_stores_nothing() {
        let state = test_state(Arc::new(FakeChatModel {
            analysis: Some(Ok("unused".to_string())),
            ..FakeChatModel::default()
        }));
        let contexts = state.contexts.clone();

        let request = multipart_request(
            "/analyze-image",
            &[("query", None, b"what is this?"), ("callId", None, b"call-1")],
        );
        let (status, body) = send(build_router(state), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
        assert!(contexts.get("call-1").await.is_none());
    }

    #[tokio::test]
    async fn analyze_image_stores_context_and_pushes_instructions() {
        let state = test_state(Arc::new(FakeChatModel {
            analysis: Some(Ok("a red mug on a wooden table".to_string())),
            ..FakeChatModel::default()
        }));
        let contexts = state.contexts.clone();
        let registry = state.registry.clone();

        let agent = Arc::new(RecordingAgent::default());
        registry.create("call-1", "lexi_ai").await.unwrap();
        registry
            .attach_agent("call-1", agent.clone(), "lexi_ai")
            .await
            .unwrap();

        let request = multipart_request(
            "/analyze-image",
            &[
                ("image", Some("frame.jpg"), b"\xff\xd8\xff\xe0fakejpeg"),
                ("callId", None, b"call-1"),
            ],
        );
        let (status, body) = send(build_router(state), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["analysis"], "a red mug on a wooden table");

        let stored = contexts.get("call-1").await.expect("context stored");
        assert_eq!(stored.description, "a red mug on a wooden table");

        let pushed = agent.pushed.lock().await;
        assert_eq!(pushed.len(), 1);
        assert!(pushed[0].starts_with(PERSONA_TEMPLATE));
        assert!(pushed[0].contains("a red mug on a wooden table"));
    }

    #[tokio::test]
    async fn analyze_image_skips_blank_camera_frames() {
        let state = test_state(Arc::new(FakeChatModel {
            analysis: Some(Ok(
                "The image is a solid gray rectangle with no discernible objects.".to_string(),
            )),
            ..FakeChatModel::default()
        }));
        let contexts = state.contexts.clone();

        let request = multipart_request(
            "/analyze-image",
            &[
                ("image", Some("frame.jpg"), b"graybytes"),
                ("callId", None, b"call-1"),
            ],
        );
        let (status, body) = send(build_router(state), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["skip"], true);
        assert_eq!(body["analysis"], BLANK_FRAME_ANALYSIS);
        assert!(contexts.get("call-1").await.is_none());
    }

    #[tokio::test]
    async fn analyze_image_quota_failure_returns_placeholder() {
        let state = test_state(Arc::new(FakeChatModel {
            analysis: Some(Err("You exceeded your current quota".to_string())),
            ..FakeChatModel::default()
        }));

        let request =
            multipart_request("/analyze-image", &[("image", Some("frame.jpg"), b"bytes")]);
        let (status, body) = send(build_router(state), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["mock"], true);
        assert!(body["analysis"].as_str().unwrap().contains("quota"));
    }

    #[tokio::test]
    async fn analyze_image_provider_failure_degrades_with_usable_analysis() {
        let state = test_state(Arc::new(FakeChatModel {
            analysis: Some(Err("connection reset".to_string())),
            ..FakeChatModel::default()
        }));

        let request =
            multipart_request("/analyze-image", &[("image", Some("frame.jpg"), b"bytes")]);
        let (status, body) = send(build_router(state), request).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].is_string());
        assert!(body["analysis"].is_string());
    }

    #[tokio::test]
    async fn update_visual_context_requires_both_fields() {
        let state = test_state(Arc::new(FakeChatModel::default()));
        let (status, body) = send_json(
            build_router(state),
            "POST",
            "/update-visual-context",
            json!({ "callId": "call-1" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn update_visual_context_stores_and_pushes() {
        let state = test_state(Arc::new(FakeChatModel::default()));
        let contexts = state.contexts.clone();
        let registry = state.registry.clone();

        let agent = Arc::new(RecordingAgent::default());
        registry.create("call-1", "lexi_ai").await.unwrap();
        registry
            .attach_agent("call-1", agent.clone(), "lexi_ai")
            .await
            .unwrap();

        let (status, body) = send_json(
            build_router(state),
            "POST",
            "/update-visual-context",
            json!({ "callId": "call-1", "visualContext": "a crosswalk ahead" }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(
            contexts.get("call-1").await.unwrap().description,
            "a crosswalk ahead"
        );
        let pushed = agent.pushed.lock().await;
        assert!(pushed[0].contains("a crosswalk ahead"));
    }

    #[tokio::test]
    async fn update_visual_context_with_empty_description_clears() {
        let state = test_state(Arc::new(FakeChatModel::default()));
        let contexts = state.contexts.clone();
        contexts.set("call-1", "stale scene".to_string(), Utc::now()).await;

        let (status, body) = send_json(
            build_router(state),
            "POST",
            "/update-visual-context",
            json!({ "callId": "call-1", "visualContext": "" }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(contexts.get("call-1").await.is_none());
    }

    #[tokio::test]
    async fn update_visual_context_without_session_still_stores() {
        let state = test_state(Arc::new(FakeChatModel::default()));
        let contexts = state.contexts.clone();

        let (status, _) = send_json(
            build_router(state),
            "POST",
            "/update-visual-context",
            json!({ "callId": "orphan", "visualContext": "a bus stop" }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(contexts.get("orphan").await.unwrap().description, "a bus stop");
    }

    #[tokio::test]
    async fn chat_requires_a_message() {
        let state = test_state(Arc::new(FakeChatModel::default()));
        let (status, body) =
            send_json(build_router(state), "POST", "/chat", json!({ "callId": "x" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn chat_vision_question_uses_stored_context() {
        let chat_model = Arc::new(FakeChatModel {
            reply: "There is a red mug right in front of you.".to_string(),
            ..FakeChatModel::default()
        });
        let state = test_state(chat_model.clone());
        state
            .contexts
            .set("call-1", "a red mug on a wooden table".to_string(), Utc::now())
            .await;

        let (status, body) = send_json(
            build_router(state),
            "POST",
            "/chat",
            json!({ "message": "what's in front of me?", "callId": "call-1", "userId": "sam" }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"], "There is a red mug right in front of you.");
        assert_eq!(body["callId"], "call-1");
        assert_eq!(body["userId"], "sam");

        let prompts = chat_model.system_prompts.lock().await;
        assert!(prompts[0].contains("a red mug on a wooden table"));
    }

    #[tokio::test]
    async fn chat_vision_question_without_context_suggests_camera() {
        let chat_model = Arc::new(FakeChatModel {
            reply: "I can't see right now.".to_string(),
            ..FakeChatModel::default()
        });
        let state = test_state(chat_model.clone());

        let (status, _) = send_json(
            build_router(state),
            "POST",
            "/chat",
            json!({ "message": "what's around me?", "callId": "call-1" }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let prompts = chat_model.system_prompts.lock().await;
        assert!(prompts[0].contains("no visual input"));
        assert!(!prompts[0].contains("I can currently see:"));
    }

    #[tokio::test]
    async fn chat_non_vision_question_omits_visual_clause() {
        let chat_model = Arc::new(FakeChatModel {
            reply: "I'm doing well, thank you!".to_string(),
            ..FakeChatModel::default()
        });
        let state = test_state(chat_model.clone());
        state
            .contexts
            .set("call-1", "a red mug on a wooden table".to_string(), Utc::now())
            .await;

        let (status, _) = send_json(
            build_router(state),
            "POST",
            "/chat",
            json!({ "message": "how are you today?", "callId": "call-1" }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let prompts = chat_model.system_prompts.lock().await;
        assert!(!prompts[0].contains("a red mug on a wooden table"));
        assert!(!prompts[0].contains("no visual input"));
    }

    #[tokio::test]
    async fn chat_custom_prompt_replaces_persona_base() {
        let chat_model = Arc::new(FakeChatModel {
            reply: "ok".to_string(),
            ..FakeChatModel::default()
        });
        let state = test_state(chat_model.clone());

        let (status, _) = send_json(
            build_router(state),
            "POST",
            "/chat",
            json!({
                "message": "how are you today?",
                "customPrompt": "You are a terse assistant.",
                "emotionalState": "fatigue",
            }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let prompts = chat_model.system_prompts.lock().await;
        assert!(prompts[0].starts_with("You are a terse assistant."));
        assert!(prompts[0].contains("fatigue"));
        assert!(!prompts[0].contains("CORE PERSONALITY TRAITS"));
    }

    #[tokio::test]
    async fn end_call_removes_session_and_context() {
        let state = test_state(Arc::new(FakeChatModel::default()));
        let registry = state.registry.clone();
        let contexts = state.contexts.clone();
        registry.create("call-1", "lexi_ai").await.unwrap();
        contexts.set("call-1", "a scene".to_string(), Utc::now()).await;

        let (status, body) = send_json(
            build_router(state.clone()),
            "POST",
            "/end-call",
            json!({ "callId": "call-1" }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(registry.get("call-1").await.is_none());
        assert!(contexts.get("call-1").await.is_none());

        let (status, _) = send_json(
            build_router(state),
            "POST",
            "/end-call",
            json!({ "callId": "call-1" }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn blank_frame_detection_matches_known_markers() {
        assert!(is_blank_camera_frame("A completely gray image."));
        assert!(is_blank_camera_frame("The frame is Uniformly Covered in gray."));
        assert!(!is_blank_camera_frame("A busy street with pedestrians."));
    }
}
