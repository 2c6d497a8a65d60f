use super::*;
use std::time::Duration;

fn bash_request(script: &str, timeout_seconds: u64) -> ExecutionRequest {
    ExecutionRequest {
        platform: Platform::Bash,
        script: script.to_string(),
        policy: ExecutionPolicy::Standard,
        working_dir: None,
        env: None,
        timeout_seconds,
        parameters: None,
        confirm_token: None,
    }
}

fn monitor_with(max_concurrent: usize) -> ExecutionMonitor {
    let executor = Arc::new(ScriptExecutor::new(opsmith_executor::ExecutorConfig {
        scripts_dir: std::env::temp_dir().join(format!(
            "opsmith-monitor-test-{}",
            uuid::Uuid::new_v4()
        )),
        max_captured_bytes: 64 * 1024,
        resource_sample_interval_ms: 50,
        grace_period_ms: 500,
    }));
    ExecutionMonitor::new(
        MonitorConfig {
            max_concurrent,
            history_max: 100,
            max_timeout_seconds: 3600,
            aging_threshold_seconds: 300,
            idle_tick_ms: 1_000,
            require_confirm_token_for_elevated: false,
        },
        Arc::new(SafetyValidator::new()),
        executor,
    )
}

async fn wait_terminal(monitor: &ExecutionMonitor, id: &str, budget: Duration) -> ExecutionTask {
    let deadline = std::time::Instant::now() + budget;
    loop {
        if let Some(task) = monitor.get(id) {
            if task.state.is_terminal() {
                return task;
            }
        }
        assert!(
            std::time::Instant::now() < deadline,
            "task {} did not reach a terminal state in time",
            id
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_safe_script_completes() {
    let monitor = monitor_with(2);
    let id = monitor
        .submit(
            bash_request("echo hello", 5),
            TaskPriority::Normal,
            TaskCallbacks::default(),
        )
        .unwrap();

    let task = wait_terminal(&monitor, &id, Duration::from_secs(10)).await;
    assert_eq!(task.state, TaskState::Completed);
    let result = task.result.unwrap();
    assert_eq!(result.exit_code, Some(0));
    assert!(result.stdout.starts_with("hello"));
    assert!(task.started_at.is_some());
    assert!(task.completed_at.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_policy_denied_never_runs() {
    let monitor = monitor_with(2);
    let mut request = bash_request("rm -rf /", 5);
    request.policy = ExecutionPolicy::Safe;

    let completed = Arc::new(AtomicBool::new(false));
    let flag = completed.clone();
    let id = monitor
        .submit(
            request,
            TaskPriority::Normal,
            TaskCallbacks {
                on_state_change: None,
                on_complete: Some(Arc::new(move |_| {
                    flag.store(true, Ordering::Relaxed);
                })),
            },
        )
        .unwrap();

    // denial is synchronous: the task is already terminal
    let task = monitor.get(&id).unwrap();
    assert_eq!(task.state, TaskState::Failed);
    let result = task.result.unwrap();
    assert_eq!(result.error_kind, Some(TaskErrorKind::PolicyDenied));
    assert!(result.stderr.contains("rm -rf"));
    assert!(task.started_at.is_none());
    assert!(completed.load(Ordering::Relaxed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timeout_reports_timed_out() {
    let monitor = monitor_with(2);
    let id = monitor
        .submit(
            bash_request("sleep 60", 1),
            TaskPriority::Normal,
            TaskCallbacks::default(),
        )
        .unwrap();

    let task = wait_terminal(&monitor, &id, Duration::from_secs(8)).await;
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(
        task.result.unwrap().error_kind,
        Some(TaskErrorKind::TimedOut)
    );
    assert!(task.metrics.wall_time_ms >= 1000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_cap_holds() {
    let monitor = monitor_with(2);
    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(
            monitor
                .submit(
                    bash_request("sleep 0.5", 10),
                    TaskPriority::Normal,
                    TaskCallbacks::default(),
                )
                .unwrap(),
        );
    }

    // sample while the batch drains
    let deadline = std::time::Instant::now() + Duration::from_secs(20);
    loop {
        let running = monitor.running().len();
        assert!(running <= 2, "concurrency cap violated: {} running", running);
        let all_terminal = ids
            .iter()
            .all(|id| monitor.get(id).is_some_and(|t| t.state.is_terminal()));
        if all_terminal {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "batch did not finish");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    for id in &ids {
        assert_eq!(monitor.get(id).unwrap().state, TaskState::Completed);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fifo_within_priority() {
    let monitor = monitor_with(1);
    let mut ids = Vec::new();
    for i in 0..3 {
        ids.push(
            monitor
                .submit(
                    bash_request(&format!("echo task-{}", i), 10),
                    TaskPriority::Normal,
                    TaskCallbacks::default(),
                )
                .unwrap(),
        );
        // distinct submit timestamps
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let mut started = Vec::new();
    for id in &ids {
        let task = wait_terminal(&monitor, id, Duration::from_secs(10)).await;
        started.push(task.started_at.unwrap());
    }
    assert!(started[0] <= started[1]);
    assert!(started[1] <= started[2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_high_priority_overtakes_queued_normal() {
    let monitor = monitor_with(1);
    // occupy the only slot
    let blocker = monitor
        .submit(
            bash_request("sleep 0.6", 10),
            TaskPriority::Normal,
            TaskCallbacks::default(),
        )
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let normal = monitor
        .submit(
            bash_request("echo normal", 10),
            TaskPriority::Normal,
            TaskCallbacks::default(),
        )
        .unwrap();
    let high = monitor
        .submit(
            bash_request("echo high", 10),
            TaskPriority::High,
            TaskCallbacks::default(),
        )
        .unwrap();

    let high_task = wait_terminal(&monitor, &high, Duration::from_secs(10)).await;
    let normal_task = wait_terminal(&monitor, &normal, Duration::from_secs(10)).await;
    wait_terminal(&monitor, &blocker, Duration::from_secs(10)).await;

    assert!(high_task.started_at.unwrap() <= normal_task.started_at.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_queued_then_idempotent() {
    let monitor = monitor_with(1);
    let blocker = monitor
        .submit(
            bash_request("sleep 1", 10),
            TaskPriority::Normal,
            TaskCallbacks::default(),
        )
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let queued = monitor
        .submit(
            bash_request("echo never", 10),
            TaskPriority::Normal,
            TaskCallbacks::default(),
        )
        .unwrap();

    assert_eq!(monitor.cancel(&queued), CancelOutcome::Cancelled);
    let task = monitor.get(&queued).unwrap();
    assert_eq!(task.state, TaskState::Cancelled);

    // second call: the task is already terminal
    assert_eq!(monitor.cancel(&queued), CancelOutcome::AlreadyTerminal);
    assert_eq!(monitor.cancel("no-such-task"), CancelOutcome::NotFound);

    wait_terminal(&monitor, &blocker, Duration::from_secs(10)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_running_converges() {
    let monitor = monitor_with(1);
    let id = monitor
        .submit(
            bash_request("sleep 60", 120),
            TaskPriority::Normal,
            TaskCallbacks::default(),
        )
        .unwrap();

    // let it reach running
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let state = monitor.get(&id).unwrap().state;
        if state == TaskState::Running {
            break;
        }
        assert!(std::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(monitor.cancel(&id), CancelOutcome::Cancelled);
    let task = wait_terminal(&monitor, &id, Duration::from_secs(8)).await;
    assert_eq!(task.state, TaskState::Cancelled);
    assert_eq!(
        task.result.unwrap().error_kind,
        Some(TaskErrorKind::Cancelled)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_observed_state_sequence_is_valid() {
    let monitor = monitor_with(2);
    let states: Arc<Mutex<Vec<TaskState>>> = Arc::new(Mutex::new(Vec::new()));
    let completions = Arc::new(std::sync::atomic::AtomicU32::new(0));

    let states_sink = states.clone();
    let completions_sink = completions.clone();
    let id = monitor
        .submit(
            bash_request("echo ok", 10),
            TaskPriority::Normal,
            TaskCallbacks {
                on_state_change: Some(Arc::new(move |task| {
                    states_sink.lock().unwrap().push(task.state);
                })),
                on_complete: Some(Arc::new(move |_| {
                    completions_sink.fetch_add(1, Ordering::Relaxed);
                })),
            },
        )
        .unwrap();

    wait_terminal(&monitor, &id, Duration::from_secs(10)).await;
    // callbacks fire after registry durability; give the last one a beat
    tokio::time::sleep(Duration::from_millis(100)).await;

    let observed = states.lock().unwrap().clone();
    assert_eq!(observed.first(), Some(&TaskState::Queued));
    assert!(observed.last().unwrap().is_terminal());
    for pair in observed.windows(2) {
        assert!(
            pair[0].can_transition_to(pair[1]),
            "illegal transition {:?} -> {:?}",
            pair[0],
            pair[1]
        );
    }
    assert_eq!(completions.load(Ordering::Relaxed), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_validation_rejections() {
    let monitor = monitor_with(1);

    let empty = monitor.submit(
        bash_request("   ", 5),
        TaskPriority::Normal,
        TaskCallbacks::default(),
    );
    assert!(matches!(empty, Err(Error::Validation(_))));

    let bad_timeout = monitor.submit(
        bash_request("echo hi", 0),
        TaskPriority::Normal,
        TaskCallbacks::default(),
    );
    assert!(matches!(bad_timeout, Err(Error::Validation(_))));

    let too_long = monitor.submit(
        bash_request("echo hi", 4000),
        TaskPriority::Normal,
        TaskCallbacks::default(),
    );
    assert!(matches!(too_long, Err(Error::Validation(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_elevated_requires_confirm_token_when_configured() {
    let executor = Arc::new(ScriptExecutor::new(opsmith_executor::ExecutorConfig::default()));
    let monitor = ExecutionMonitor::new(
        MonitorConfig {
            require_confirm_token_for_elevated: true,
            ..MonitorConfig::default()
        },
        Arc::new(SafetyValidator::new()),
        executor,
    );

    let mut request = bash_request("echo hi", 5);
    request.policy = ExecutionPolicy::Elevated;
    assert!(matches!(
        monitor.submit(request.clone(), TaskPriority::Normal, TaskCallbacks::default()),
        Err(Error::Validation(_))
    ));

    request.confirm_token = Some("approved".into());
    let id = monitor
        .submit(request, TaskPriority::Normal, TaskCallbacks::default())
        .unwrap();
    wait_terminal(&monitor, &id, Duration::from_secs(10)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_list_with_filters() {
    let monitor = monitor_with(2);
    let ok = monitor
        .submit(
            bash_request("echo one", 10),
            TaskPriority::Normal,
            TaskCallbacks::default(),
        )
        .unwrap();
    let bad = monitor
        .submit(
            bash_request("exit 1", 10),
            TaskPriority::Normal,
            TaskCallbacks::default(),
        )
        .unwrap();
    wait_terminal(&monitor, &ok, Duration::from_secs(10)).await;
    wait_terminal(&monitor, &bad, Duration::from_secs(10)).await;

    let all = monitor.list(&TaskFilter::default());
    assert_eq!(all.len(), 2);

    let failed = monitor.list(&TaskFilter {
        state: Some(TaskState::Failed),
        platform: None,
    });
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, bad);

    let powershell = monitor.list(&TaskFilter {
        state: None,
        platform: Some(Platform::PowerShell),
    });
    assert!(powershell.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_statistics_reflect_outcomes() {
    let monitor = monitor_with(2);

    let ok = monitor
        .submit(
            bash_request("echo fine", 10),
            TaskPriority::Normal,
            TaskCallbacks::default(),
        )
        .unwrap();
    let bad = monitor
        .submit(
            bash_request("exit 2", 10),
            TaskPriority::Normal,
            TaskCallbacks::default(),
        )
        .unwrap();

    wait_terminal(&monitor, &ok, Duration::from_secs(10)).await;
    wait_terminal(&monitor, &bad, Duration::from_secs(10)).await;

    let stats = monitor.statistics();
    assert_eq!(stats.submitted_total, 2);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.queue_depth, 0);
    assert_eq!(stats.running, 0);
    assert!((stats.success_rate_24h - 50.0).abs() < 1e-9);
    assert!(stats.average_wall_time_ms.contains_key("bash"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_history_paging_and_cap() {
    let executor = Arc::new(ScriptExecutor::new(opsmith_executor::ExecutorConfig {
        scripts_dir: std::env::temp_dir().join(format!(
            "opsmith-monitor-test-{}",
            uuid::Uuid::new_v4()
        )),
        ..opsmith_executor::ExecutorConfig::default()
    }));
    let monitor = ExecutionMonitor::new(
        MonitorConfig {
            max_concurrent: 2,
            history_max: 3,
            ..MonitorConfig::default()
        },
        Arc::new(SafetyValidator::new()),
        executor,
    );

    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(
            monitor
                .submit(
                    bash_request(&format!("echo h-{}", i), 10),
                    TaskPriority::Normal,
                    TaskCallbacks::default(),
                )
                .unwrap(),
        );
    }
    // wait on the aggregate counters: early ids may already be evicted
    // from the index by the history cap
    let deadline = std::time::Instant::now() + Duration::from_secs(20);
    loop {
        if monitor.statistics().completed == 5 {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "batch did not finish");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    let history = monitor.history(10, 0, None);
    assert_eq!(history.len(), 3, "history ring respects its cap");
    let page = monitor.history(2, 1, Some(TaskState::Completed));
    assert!(page.len() <= 2);

    // evicted tasks are gone from the index too
    let known: usize = ids.iter().filter(|id| monitor.get(id).is_some()).count();
    assert_eq!(known, 3);
}
