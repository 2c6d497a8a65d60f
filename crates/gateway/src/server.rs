//! Axum-based HTTP server for the opsmith API.

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use opsmith_codegen::{CodeGenerator, PromptAssembler};
use opsmith_core::config::AppConfig;
use opsmith_core::{Error, Result};
use opsmith_llm::ProviderGateway;
use opsmith_memory::ConversationMemory;
use opsmith_monitor::ExecutionMonitor;
use opsmith_registry::{ChannelRegistry, PersonaRegistry};

use crate::handlers;

/// Shared application state: every long-lived component, wired through
/// constructors rather than globals.
pub struct AppState {
    pub config: AppConfig,
    pub personas: Arc<PersonaRegistry>,
    pub channels: Arc<ChannelRegistry>,
    pub memory: Arc<ConversationMemory>,
    pub llm: Arc<ProviderGateway>,
    pub assembler: PromptAssembler,
    pub generator: Arc<CodeGenerator>,
    pub monitor: ExecutionMonitor,
    pub started_at: Instant,
}

/// The opsmith API server.
pub struct OpsmithServer {
    state: Arc<AppState>,
}

impl OpsmithServer {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Build the full route table.
    pub fn build_router(&self) -> Router {
        Router::new()
            .route("/health", get(handlers::health))
            .route("/api/system/status", get(handlers::system_status))
            // personas
            .route("/api/personas", get(handlers::list_personas))
            .route("/api/personas/current", get(handlers::current_persona))
            .route("/api/personas/create", post(handlers::create_persona))
            .route("/api/personas/{id}", get(handlers::get_persona))
            .route("/api/personas/{id}/switch", post(handlers::switch_persona))
            // channels
            .route("/api/channels", get(handlers::list_channels))
            .route("/api/channels/current", get(handlers::current_channel))
            .route("/api/channels/{id}", get(handlers::get_channel))
            .route("/api/channels/{id}/switch", post(handlers::switch_channel))
            // chat & generation
            .route("/api/chat", post(handlers::chat))
            .route("/api/generate/script", post(handlers::generate_script))
            .route("/api/scripts/improve", post(handlers::improve_script))
            .route("/api/scripts/validate", post(handlers::validate_script))
            // execution
            .route("/api/execute/script", post(handlers::execute_script))
            .route("/api/execute/task/{id}", get(handlers::get_task))
            .route("/api/execute/task/{id}", delete(handlers::cancel_task))
            .route("/api/execute/history", get(handlers::execution_history))
            .route(
                "/api/execute/statistics",
                get(handlers::execution_statistics),
            )
            .route("/api/execute/running", get(handlers::running_tasks))
            .fallback(handlers::not_found_fallback)
            .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind and serve until shutdown.
    pub async fn run(self) -> Result<()> {
        let addr = format!(
            "{}:{}",
            self.state.config.server.host, self.state.config.server.port
        );
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::internal(format!("failed to bind {}: {}", addr, e)))?;

        tracing::info!(addr = %addr, "API server listening");

        axum::serve(listener, self.build_router())
            .await
            .map_err(|e| Error::internal(format!("server error: {}", e)))?;

        Ok(())
    }
}
