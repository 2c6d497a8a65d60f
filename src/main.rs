//! opsmith — conversational automation server.
//!
//! Natural-language requests become PowerShell/AppleScript/Bash scripts,
//! generated through a multi-provider LLM gateway with an offline template
//! fallback, screened by a policy validator, and executed under a priority
//! scheduler with live telemetry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use opsmith_codegen::{CodeGenerator, GenerationConfig, PromptAssembler, TemplateCatalog};
use opsmith_core::config::AppConfig;
use opsmith_executor::{ExecutorConfig, ScriptExecutor};
use opsmith_gateway::{AppState, OpsmithServer};
use opsmith_llm::{spawn_health_prober, ProviderGateway};
use opsmith_memory::ConversationMemory;
use opsmith_monitor::{ExecutionMonitor, MonitorConfig};
use opsmith_registry::{ChannelRegistry, PersonaRegistry};
use opsmith_safety::SafetyValidator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    opsmith_core::logging::configure_tracing(&config.logging)?;
    tracing::info!("Starting opsmith v{}", env!("CARGO_PKG_VERSION"));

    // =========================================================================
    // Registries
    // =========================================================================
    let personas = Arc::new(PersonaRegistry::new());
    let report = personas.load_all(&config.paths.personas).await;
    tracing::info!(
        loaded = report.loaded,
        rejected = report.rejected.len(),
        current = %personas.current().id,
        "Persona registry ready"
    );
    for rejected in &report.rejected {
        tracing::warn!(file = %rejected.file, reason = %rejected.reason, "Persona file rejected");
    }

    let channels = Arc::new(ChannelRegistry::new());
    let overlay_report = channels.load_overlays(&config.paths.channels).await;
    tracing::info!(
        builtin_plus_overlays = channels.len(),
        overlays = overlay_report.loaded,
        "Channel registry ready"
    );

    // =========================================================================
    // Memory
    // =========================================================================
    let memory = Arc::new(ConversationMemory::new(
        config.memory.max_conversations,
        config.memory.max_messages_per_conversation,
    ));

    // =========================================================================
    // LLM gateway & health prober
    // =========================================================================
    let llm = Arc::new(ProviderGateway::from_config(&config.llm));
    let _prober = spawn_health_prober(
        llm.clone(),
        Duration::from_secs(config.llm.health_interval_secs),
        Duration::from_millis(config.llm.health_timeout_ms),
    );
    tracing::info!(providers = llm.provider_count(), "LLM gateway initialized");

    // =========================================================================
    // Safety, generation, execution
    // =========================================================================
    let safety = Arc::new(SafetyValidator::new());

    let generator = Arc::new(CodeGenerator::new(
        llm.clone(),
        PromptAssembler::new(config.memory.context_window),
        TemplateCatalog::new(config.llm.template_match_threshold),
        safety.clone(),
        GenerationConfig {
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
            timeout_ms: config.llm.timeout_ms,
        },
    ));

    let executor = Arc::new(ScriptExecutor::new(ExecutorConfig {
        scripts_dir: config.paths.scripts.clone(),
        max_captured_bytes: config.scheduler.max_captured_bytes,
        resource_sample_interval_ms: config.scheduler.resource_sample_interval_ms,
        grace_period_ms: config.scheduler.grace_period_ms,
    }));

    let monitor = ExecutionMonitor::new(
        MonitorConfig {
            max_concurrent: config.scheduler.max_concurrent,
            history_max: config.scheduler.history_max,
            max_timeout_seconds: config.scheduler.max_timeout_seconds,
            aging_threshold_seconds: config.scheduler.aging_threshold_seconds,
            idle_tick_ms: config.scheduler.idle_tick_ms,
            require_confirm_token_for_elevated: config
                .scheduler
                .require_confirm_token_for_elevated,
        },
        safety,
        executor,
    );
    let _ticker = monitor.spawn_idle_ticker();
    tracing::info!(
        max_concurrent = config.scheduler.max_concurrent,
        "Execution monitor initialized"
    );

    // =========================================================================
    // HTTP surface
    // =========================================================================
    let state = Arc::new(AppState {
        personas,
        channels,
        memory,
        llm,
        assembler: PromptAssembler::new(config.memory.context_window),
        generator,
        monitor,
        started_at: Instant::now(),
        config,
    });

    println!();
    println!("  opsmith v{}", env!("CARGO_PKG_VERSION"));
    println!("  conversational automation server");
    println!(
        "  listening on http://{}:{}",
        state.config.server.host, state.config.server.port
    );
    println!();

    OpsmithServer::new(state).run().await?;
    Ok(())
}
