//! Route handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use opsmith_core::{
    Channel, ExecutionPolicy, ExecutionRequest, ExecutionTask, Message, MessageCheck, Persona,
    Platform, Role, Script, TaskPriority, TaskState, ValidationReport,
};
use opsmith_monitor::{CancelOutcome, MonitorStatistics, TaskCallbacks};
use opsmith_registry::NewPersona;

use crate::envelope::{ApiError, ApiResult};
use crate::server::AppState;

// =============================================================================
// Health & system status
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub personas: ComponentCount,
    pub channels: ComponentCount,
    pub providers: Vec<opsmith_core::ProviderSnapshot>,
    pub scheduler: MonitorStatistics,
    pub memory: opsmith_core::MemoryStats,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentCount {
    pub count: usize,
    pub current: String,
}

pub async fn system_status(State(state): State<Arc<AppState>>) -> Json<SystemStatus> {
    Json(SystemStatus {
        personas: ComponentCount {
            count: state.personas.len(),
            current: state.personas.current().id,
        },
        channels: ComponentCount {
            count: state.channels.len(),
            current: state.channels.current().id,
        },
        providers: state.llm.snapshots(),
        scheduler: state.monitor.statistics(),
        memory: state.memory.summary(),
    })
}

// =============================================================================
// Personas
// =============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct PersonaListQuery {
    pub channel: Option<String>,
}

pub async fn list_personas(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PersonaListQuery>,
) -> Json<Vec<Persona>> {
    let personas = match query.channel {
        Some(channel) => state.personas.personas_for_channel(&channel),
        None => state.personas.list(),
    };
    Json(personas)
}

pub async fn current_persona(State(state): State<Arc<AppState>>) -> Json<Persona> {
    Json(state.personas.current())
}

pub async fn get_persona(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Persona>> {
    state
        .personas
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::persona_not_found(&id))
}

pub async fn switch_persona(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Persona>> {
    state
        .personas
        .switch(&id)
        .map(Json)
        .map_err(|_| ApiError::persona_not_found(&id))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePersonaRequest {
    pub id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub system_prompt: String,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub examples: Vec<String>,
}

pub async fn create_persona(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreatePersonaRequest>,
) -> ApiResult<(StatusCode, Json<Persona>)> {
    let persona = state.personas.add_custom(NewPersona {
        id: request.id,
        name: request.name,
        description: request.description,
        system_prompt: request.system_prompt,
        channels: request.channels,
        examples: request.examples,
    })?;
    Ok((StatusCode::CREATED, Json(persona)))
}

// =============================================================================
// Channels
// =============================================================================

pub async fn list_channels(State(state): State<Arc<AppState>>) -> Json<Vec<Channel>> {
    Json(state.channels.list())
}

pub async fn current_channel(State(state): State<Arc<AppState>>) -> Json<Channel> {
    Json(state.channels.current())
}

pub async fn get_channel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Channel>> {
    state
        .channels
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::channel_not_found(&id))
}

pub async fn switch_channel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Channel>> {
    state
        .channels
        .switch(&id)
        .map(Json)
        .map_err(|_| ApiError::channel_not_found(&id))
}

// =============================================================================
// Chat
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub conversation_id: Option<String>,
    /// Free-form context string appended to the prompt.
    pub context: Option<String>,
    pub persona: Option<String>,
    pub channel: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub response: String,
    pub conversation_id: String,
    pub persona_id: String,
    pub channel_id: String,
    pub timestamp: String,
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    if request.message.trim().is_empty() {
        return Err(ApiError::validation("message must not be empty"));
    }

    if let Some(persona_id) = &request.persona {
        state
            .personas
            .switch(persona_id)
            .map_err(|_| ApiError::persona_not_found(persona_id))?;
    }
    if let Some(channel_id) = &request.channel {
        state
            .channels
            .switch(channel_id)
            .map_err(|_| ApiError::channel_not_found(channel_id))?;
    }

    let persona = state.personas.current();
    let channel = state.channels.current();
    let conversation_id = request
        .conversation_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    state.memory.append(
        &conversation_id,
        Message::new(Role::User, request.message.clone())
            .with_tags(persona.id.clone(), channel.id.clone()),
    );

    let history = state.memory.context_for(
        &conversation_id,
        state.config.memory.context_window,
        8_000,
    );
    // drop the user turn just appended; the assembler adds it as the final
    // turn itself
    let history = &history[..history.len().saturating_sub(1)];

    let mut user_turn = request.message.clone();
    if let Some(context) = &request.context {
        user_turn.push_str("\n\nContext: ");
        user_turn.push_str(context);
    }

    let envelope = state.assembler.chat(
        &persona,
        &channel,
        history,
        &user_turn,
        opsmith_core::GenerationParams {
            temperature: state.config.llm.temperature.max(0.3),
            max_tokens: state.config.llm.max_tokens,
            stop: None,
            timeout_ms: Some(state.config.llm.timeout_ms),
        },
    );

    let mut response_text = match state.llm.generate(&envelope).await {
        Ok(completion) => completion.text,
        Err(error) => {
            tracing::warn!(%error, "Chat generation failed; serving offline reply");
            offline_chat_reply(&persona)
        }
    };

    if let MessageCheck::TooLong { limit } = channel.check_message(&response_text) {
        tracing::debug!(channel = %channel.id, limit, "Truncating reply to channel limit");
        response_text = response_text.chars().take(limit).collect();
    }

    state.memory.append(
        &conversation_id,
        Message::new(Role::Assistant, response_text.clone())
            .with_tags(persona.id.clone(), channel.id.clone()),
    );

    Ok(Json(ChatResponse {
        response: response_text,
        conversation_id,
        persona_id: persona.id,
        channel_id: channel.id,
        timestamp: Utc::now().to_rfc3339(),
    }))
}

/// Deterministic reply when no provider is reachable: the persona still
/// answers, and script generation still works via templates.
fn offline_chat_reply(persona: &Persona) -> String {
    format!(
        "{}\n\nI can't reach a language model right now, but I can still \
         generate automation scripts from my built-in templates. Try asking \
         for a script, e.g. \"backup my documents folder\".",
        persona.greeting
    )
}

// =============================================================================
// Generation
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateScriptRequest {
    pub prompt: String,
    pub platform: String,
    pub context: Option<String>,
}

pub async fn generate_script(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GenerateScriptRequest>,
) -> ApiResult<Json<Script>> {
    if request.prompt.trim().is_empty() {
        return Err(ApiError::validation("prompt must not be empty"));
    }
    let platform = parse_platform(&request.platform, &request.prompt)?;

    let mut description = request.prompt.clone();
    if let Some(context) = &request.context {
        description.push_str(" (");
        description.push_str(context);
        description.push(')');
    }

    let persona = state.personas.current();
    let channel = state.channels.current();
    let script = state
        .generator
        .generate(&description, platform, &persona, &channel, &[])
        .await;
    Ok(Json(script))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImproveScriptRequest {
    pub script: String,
    pub feedback: String,
    pub platform: String,
}

pub async fn improve_script(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ImproveScriptRequest>,
) -> ApiResult<Json<Script>> {
    if request.script.trim().is_empty() {
        return Err(ApiError::validation("script must not be empty"));
    }
    let platform = parse_platform(&request.platform, &request.script)?;
    let script = state
        .generator
        .improve(&request.script, &request.feedback, platform)
        .await?;
    Ok(Json(script))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateScriptRequest {
    pub script: String,
    pub platform: String,
}

pub async fn validate_script(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ValidateScriptRequest>,
) -> ApiResult<Json<ValidationReport>> {
    let platform = parse_platform(&request.platform, &request.script)?;
    let report = state.generator.validate(&request.script, platform).await;
    Ok(Json(report))
}

// =============================================================================
// Execution
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteScriptRequest {
    pub script: String,
    pub platform: String,
    pub policy: Option<String>,
    pub parameters: Option<serde_json::Value>,
    pub timeout_seconds: Option<u64>,
    pub priority: Option<String>,
    pub working_dir: Option<String>,
    pub env: Option<HashMap<String, String>>,
    pub confirm_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteScriptResponse {
    pub task_id: String,
    pub state: TaskState,
}

pub async fn execute_script(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExecuteScriptRequest>,
) -> ApiResult<(StatusCode, Json<ExecuteScriptResponse>)> {
    let platform = parse_platform(&request.platform, &request.script)?;
    let policy = match &request.policy {
        Some(policy) => ExecutionPolicy::from_str(policy).map_err(ApiError::validation)?,
        None => ExecutionPolicy::Standard,
    };
    let priority = match request.priority.as_deref() {
        None => TaskPriority::Normal,
        Some("low") => TaskPriority::Low,
        Some("normal") => TaskPriority::Normal,
        Some("high") => TaskPriority::High,
        Some(other) => {
            return Err(ApiError::validation(format!(
                "unrecognized priority: {}",
                other
            )))
        }
    };

    let execution = ExecutionRequest {
        platform,
        script: request.script,
        policy,
        working_dir: request.working_dir.map(Into::into),
        env: request.env,
        timeout_seconds: request.timeout_seconds.unwrap_or(300),
        parameters: request.parameters,
        confirm_token: request.confirm_token,
    };

    let task_id = state
        .monitor
        .submit(execution, priority, TaskCallbacks::default())?;
    let task_state = state
        .monitor
        .get(&task_id)
        .map(|task| task.state)
        .unwrap_or(TaskState::Queued);

    Ok((
        StatusCode::OK,
        Json(ExecuteScriptResponse {
            task_id,
            state: task_state,
        }),
    ))
}

pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ExecutionTask>> {
    state
        .monitor
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("task '{}' not found", id)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub result: CancelOutcome,
}

pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    match state.monitor.cancel(&id) {
        CancelOutcome::NotFound => Err(ApiError::not_found(format!("task '{}' not found", id))),
        outcome => Ok(Json(CancelResponse { result: outcome })),
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct HistoryQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub async fn execution_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<ExecutionTask>>> {
    let state_filter = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            serde_json::from_value::<TaskState>(serde_json::Value::String(raw.to_string()))
                .map_err(|_| ApiError::validation(format!("unrecognized status: {}", raw)))?,
        ),
    };
    Ok(Json(state.monitor.history(
        query.limit.unwrap_or(50),
        query.offset.unwrap_or(0),
        state_filter,
    )))
}

pub async fn execution_statistics(
    State(state): State<Arc<AppState>>,
) -> Json<MonitorStatistics> {
    Json(state.monitor.statistics())
}

pub async fn running_tasks(State(state): State<Arc<AppState>>) -> Json<Vec<ExecutionTask>> {
    Json(state.monitor.running())
}

// =============================================================================
// Helpers
// =============================================================================

/// Parse a platform string; `auto` detects from the accompanying text.
fn parse_platform(raw: &str, detection_text: &str) -> Result<Platform, ApiError> {
    if raw.eq_ignore_ascii_case("auto") {
        return Ok(Platform::detect(detection_text));
    }
    Platform::from_str(raw).map_err(|_| ApiError::platform_not_supported(raw))
}

/// Fallback 404 for unknown routes, in the uniform envelope.
pub async fn not_found_fallback() -> impl IntoResponse {
    ApiError::not_found("no such route")
}
