//! Cross-component scenarios: scheduler throughput under the concurrency
//! cap, and offline generation across every platform.

use std::sync::Arc;
use std::time::{Duration, Instant};

use opsmith_codegen::{CodeGenerator, GenerationConfig, PromptAssembler, TemplateCatalog};
use opsmith_core::{
    ExecutionPolicy, ExecutionRequest, Persona, Platform, ScriptSource, TaskPriority, TaskState,
};
use opsmith_executor::{ExecutorConfig, ScriptExecutor};
use opsmith_llm::{MockProvider, ProviderGateway};
use opsmith_monitor::{ExecutionMonitor, MonitorConfig, TaskCallbacks};
use opsmith_registry::ChannelRegistry;
use opsmith_safety::SafetyValidator;

fn scratch_dir(tag: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("opsmith-scenario-{}-{}", tag, std::process::id()))
}

fn bash_request(script: &str) -> ExecutionRequest {
    ExecutionRequest {
        platform: Platform::Bash,
        script: script.to_string(),
        policy: ExecutionPolicy::Standard,
        working_dir: None,
        env: None,
        timeout_seconds: 30,
        parameters: None,
        confirm_token: None,
    }
}

/// Five one-second tasks under a cap of two finish in roughly three waves,
/// and the cap holds at every sampled instant.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_cap_and_total_wall_time() {
    let executor = Arc::new(ScriptExecutor::new(ExecutorConfig {
        scripts_dir: scratch_dir("cap"),
        max_captured_bytes: 16 * 1024,
        resource_sample_interval_ms: 50,
        grace_period_ms: 500,
    }));
    let monitor = ExecutionMonitor::new(
        MonitorConfig {
            max_concurrent: 2,
            ..MonitorConfig::default()
        },
        Arc::new(SafetyValidator::new()),
        executor,
    );

    let started = Instant::now();
    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(
            monitor
                .submit(
                    bash_request("sleep 1"),
                    TaskPriority::Normal,
                    TaskCallbacks::default(),
                )
                .unwrap(),
        );
    }

    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        assert!(monitor.running().len() <= 2, "concurrency cap violated");
        let all_done = ids
            .iter()
            .all(|id| monitor.get(id).is_some_and(|t| t.state.is_terminal()));
        if all_done {
            break;
        }
        assert!(Instant::now() < deadline, "batch did not finish");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    for id in &ids {
        assert_eq!(monitor.get(id).unwrap().state, TaskState::Completed);
    }

    // ceil(5/2) waves of ~1s each, with generous scheduling slack
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(2500), "finished implausibly fast: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(15), "took too long: {:?}", elapsed);
}

/// With every provider unreachable, generation still yields a non-empty
/// script for each platform, sourced from the template catalog.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_generate_offline_for_every_platform() {
    let gateway = Arc::new(ProviderGateway::new(
        vec![Arc::new(MockProvider::unavailable("dead"))],
        None,
        3,
        3,
    ));
    let generator = CodeGenerator::new(
        gateway,
        PromptAssembler::new(10),
        TemplateCatalog::new(0.3),
        Arc::new(SafetyValidator::new()),
        GenerationConfig::default(),
    );

    let persona = Persona::fallback();
    let channel = ChannelRegistry::new().current();

    for platform in Platform::ALL {
        let script = generator
            .generate("backup my documents folder", platform, &persona, &channel, &[])
            .await;
        assert_eq!(script.source, ScriptSource::Template, "{}", platform);
        assert_eq!(script.platform, platform);
        assert!(!script.content.trim().is_empty(), "{}", platform);
        assert!(script.safety_report.is_some());
    }
}
