//! API surface tests: route contracts, error envelope, and the
//! generate/execute scenarios end to end against mock providers.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::util::ServiceExt;

use opsmith_codegen::{CodeGenerator, GenerationConfig, PromptAssembler, TemplateCatalog};
use opsmith_core::config::AppConfig;
use opsmith_core::LlmProvider;
use opsmith_executor::{ExecutorConfig, ScriptExecutor};
use opsmith_gateway::{AppState, OpsmithServer};
use opsmith_llm::{MockProvider, ProviderGateway};
use opsmith_memory::ConversationMemory;
use opsmith_monitor::{ExecutionMonitor, MonitorConfig};
use opsmith_registry::{ChannelRegistry, PersonaRegistry};
use opsmith_safety::SafetyValidator;

fn build_state(providers: Vec<Arc<dyn LlmProvider>>) -> Arc<AppState> {
    let config = AppConfig::default();
    let llm = Arc::new(ProviderGateway::new(providers, None, 3, 3));
    let safety = Arc::new(SafetyValidator::new());

    let generator = Arc::new(CodeGenerator::new(
        llm.clone(),
        PromptAssembler::new(config.memory.context_window),
        TemplateCatalog::new(config.llm.template_match_threshold),
        safety.clone(),
        GenerationConfig::default(),
    ));

    let executor = Arc::new(ScriptExecutor::new(ExecutorConfig {
        scripts_dir: std::env::temp_dir().join(format!("opsmith-api-test-{}", uuid_v4())),
        max_captured_bytes: 64 * 1024,
        resource_sample_interval_ms: 50,
        grace_period_ms: 500,
    }));
    let monitor = ExecutionMonitor::new(
        MonitorConfig {
            max_concurrent: 2,
            ..MonitorConfig::default()
        },
        safety,
        executor,
    );

    Arc::new(AppState {
        memory: Arc::new(ConversationMemory::new(
            config.memory.max_conversations,
            config.memory.max_messages_per_conversation,
        )),
        personas: Arc::new(PersonaRegistry::new()),
        channels: Arc::new(ChannelRegistry::new()),
        assembler: PromptAssembler::new(config.memory.context_window),
        llm,
        generator,
        monitor,
        started_at: Instant::now(),
        config,
    })
}

fn router(state: &Arc<AppState>) -> Router {
    OpsmithServer::new(state.clone()).build_router()
}

fn uuid_v4() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!(
        "{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

async fn request(router: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_health_shape() {
    let state = build_state(vec![]);
    let (status, body) = request(router(&state), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
    assert!(body["uptimeSeconds"].is_u64());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_chat_default_turn_appends_both_messages() {
    // all providers dead: the chat still answers deterministically
    let state = build_state(vec![Arc::new(MockProvider::unavailable("dead"))]);
    let (status, body) = request(
        router(&state),
        "POST",
        "/api/chat",
        Some(json!({"message": "hello", "conversationId": "c1"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(!body["response"].as_str().unwrap().is_empty());
    assert_eq!(body["conversationId"], "c1");
    assert_eq!(body["personaId"], state.personas.current().id);
    assert!(body["channelId"].is_string());

    let conversation = state.memory.get("c1").unwrap();
    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(
        serde_json::to_value(conversation.messages[0].role).unwrap(),
        "user"
    );
    assert_eq!(
        serde_json::to_value(conversation.messages[1].role).unwrap(),
        "assistant"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_generate_with_llm_down_serves_template() {
    let state = build_state(vec![Arc::new(MockProvider::unavailable("dead"))]);
    let (status, body) = request(
        router(&state),
        "POST",
        "/api/generate/script",
        Some(json!({"prompt": "backup my documents folder", "platform": "powershell"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["platform"], "powershell");
    assert_eq!(body["source"], "template");
    let content = body["content"].as_str().unwrap();
    assert!(content.contains("param("));
    assert!(content.contains("try {"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_generate_uses_llm_when_reachable() {
    let reply = "```bash\n#!/bin/bash\necho from-model\n```";
    let state = build_state(vec![Arc::new(MockProvider::new("up", reply))]);
    let (status, body) = request(
        router(&state),
        "POST",
        "/api/generate/script",
        Some(json!({"prompt": "say from-model", "platform": "bash"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "llm");
    assert!(body["content"].as_str().unwrap().contains("echo from-model"));
    assert!(body["safetyReport"]["decision"].is_string());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_execute_safe_script_completes() {
    let state = build_state(vec![]);
    let (status, body) = request(
        router(&state),
        "POST",
        "/api/execute/script",
        Some(json!({
            "script": "echo hello",
            "platform": "bash",
            "policy": "safe",
            "timeoutSeconds": 5
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let task_id = body["taskId"].as_str().unwrap().to_string();

    let deadline = Instant::now() + Duration::from_secs(10);
    let task = loop {
        let (status, task) = request(
            router(&state),
            "GET",
            &format!("/api/execute/task/{}", task_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let state_name = task["state"].as_str().unwrap().to_string();
        if ["completed", "failed", "cancelled", "timedOut"].contains(&state_name.as_str()) {
            break task;
        }
        assert!(Instant::now() < deadline, "task never finished");
        tokio::time::sleep(Duration::from_millis(50)).await;
    };

    assert_eq!(task["state"], "completed");
    assert_eq!(task["result"]["exitCode"], 0);
    assert!(task["result"]["stdout"].as_str().unwrap().starts_with("hello"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_execute_policy_denied() {
    let state = build_state(vec![]);
    let (status, body) = request(
        router(&state),
        "POST",
        "/api/execute/script",
        Some(json!({"script": "rm -rf /", "platform": "bash", "policy": "safe"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let task_id = body["taskId"].as_str().unwrap();
    assert_eq!(body["state"], "failed");

    let (_, task) = request(
        router(&state),
        "GET",
        &format!("/api/execute/task/{}", task_id),
        None,
    )
    .await;
    assert_eq!(task["state"], "failed");
    assert_eq!(task["result"]["errorKind"], "policyDenied");
    assert!(task["result"]["stderr"].as_str().unwrap().contains("rm -rf"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_error_envelope_for_missing_persona() {
    let state = build_state(vec![]);
    let (status, body) = request(
        router(&state),
        "POST",
        "/api/personas/no-such-persona/switch",
        None,
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "PERSONA_NOT_FOUND");
    assert!(body["timestamp"].is_string());
    assert!(body["requestId"].is_string());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unsupported_platform_rejected() {
    let state = build_state(vec![]);
    let (status, body) = request(
        router(&state),
        "POST",
        "/api/generate/script",
        Some(json!({"prompt": "do things", "platform": "cobol"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "PLATFORM_NOT_SUPPORTED");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_validate_offline_heuristics() {
    let state = build_state(vec![Arc::new(MockProvider::unavailable("dead"))]);
    let (status, body) = request(
        router(&state),
        "POST",
        "/api/scripts/validate",
        Some(json!({"script": "echo hi", "platform": "bash"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "heuristic");
    assert!(body["score"].is_u64());
    assert!(body["issues"].is_array());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_improve_unavailable_surfaces_error() {
    let state = build_state(vec![Arc::new(MockProvider::unavailable("dead"))]);
    let (status, body) = request(
        router(&state),
        "POST",
        "/api/scripts/improve",
        Some(json!({
            "script": "#!/bin/bash\necho hi",
            "feedback": "add logging",
            "platform": "bash"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "LLM_UNAVAILABLE");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_persona_create_and_switch_round_trip() {
    let state = build_state(vec![]);
    let (status, created) = request(
        router(&state),
        "POST",
        "/api/personas/create",
        Some(json!({
            "name": "Release Captain",
            "systemPrompt": "You run releases.",
            "channels": ["web"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["id"], "release-captain");
    assert_eq!(created["custom"], true);

    let (status, switched) = request(
        router(&state),
        "POST",
        "/api/personas/release-captain/switch",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(switched["id"], "release-captain");

    let (_, current) = request(router(&state), "GET", "/api/personas/current", None).await;
    assert_eq!(current["id"], "release-captain");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_statistics_and_running_routes() {
    let state = build_state(vec![]);
    let (status, stats) = request(router(&state), "GET", "/api/execute/statistics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["queueDepth"], 0);

    let (status, running) = request(router(&state), "GET", "/api/execute/running", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(running.as_array().unwrap().is_empty());
}
