//! Host script execution.
//!
//! The executor materializes a script to a uniquely named file under its
//! own directory, launches the platform interpreter, captures bounded
//! output, samples resource usage while the child is alive, and enforces
//! timeout and cancellation with a terminate-then-kill sequence. Runtime
//! script failures are results, not errors; only infrastructure failures
//! (file write, spawn) raise [`ExecutorError`].

pub mod capture;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessesToUpdate, System};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use opsmith_core::{ExecutionRequest, Platform, TaskErrorKind, TaskMetrics};

use capture::Capture;

/// Infrastructure failure before or during launch.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to materialize script file: {0}")]
    Materialize(String),

    #[error("failed to spawn interpreter '{interpreter}': {source}")]
    Spawn {
        interpreter: String,
        source: std::io::Error,
    },
}

/// Executor tunables.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Executor-owned directory for materialized script files.
    pub scripts_dir: PathBuf,
    pub max_captured_bytes: usize,
    pub resource_sample_interval_ms: u64,
    pub grace_period_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            scripts_dir: std::env::temp_dir().join("opsmith-scripts"),
            max_captured_bytes: 1024 * 1024,
            resource_sample_interval_ms: 250,
            grace_period_ms: 2_000,
        }
    }
}

/// Outcome of one execution. Never an error: non-zero exits, timeouts, and
/// cancellations are all represented here.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub error_kind: Option<TaskErrorKind>,
    pub metrics: TaskMetrics,
}

/// Launches prepared scripts on the host.
pub struct ScriptExecutor {
    config: ExecutorConfig,
}

impl ScriptExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Materialize the script and spawn its interpreter. The returned
    /// handle owns the child and the script file; the file is removed on
    /// every exit path.
    pub async fn start(
        &self,
        request: &ExecutionRequest,
        cancel: Arc<AtomicBool>,
    ) -> Result<RunningScript, ExecutorError> {
        tokio::fs::create_dir_all(&self.config.scripts_dir)
            .await
            .map_err(|e| ExecutorError::Materialize(e.to_string()))?;

        let file_name = format!(
            "{}{}",
            uuid::Uuid::new_v4(),
            request.platform.file_extension()
        );
        let script_path = self.config.scripts_dir.join(file_name);
        tokio::fs::write(&script_path, &request.script)
            .await
            .map_err(|e| ExecutorError::Materialize(e.to_string()))?;
        let script_file = ScriptFile { path: script_path };

        let (interpreter, args) = interpreter_command(request.platform, &script_file.path);
        let mut command = Command::new(&interpreter);
        command.args(&args);

        let working_dir = request
            .working_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let _ = std::fs::create_dir_all(&working_dir);
        command.current_dir(&working_dir);

        if let Some(env) = &request.env {
            command.envs(env.clone());
        }
        command.env("OPSMITH_EXECUTION", "true");
        command.env(
            "OPSMITH_TIMESTAMP",
            format!("{}", now_epoch_seconds()),
        );

        command.kill_on_drop(true);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        tracing::info!(
            platform = %request.platform,
            interpreter = %interpreter,
            script = %script_file.path.display(),
            "Spawning script interpreter"
        );

        let mut child = command.spawn().map_err(|source| ExecutorError::Spawn {
            interpreter: interpreter.clone(),
            source,
        })?;

        let stdout_task = drain_stream(child.stdout.take(), self.config.max_captured_bytes);
        let stderr_task = drain_stream(child.stderr.take(), self.config.max_captured_bytes);

        Ok(RunningScript {
            pid: child.id(),
            child,
            _script_file: script_file,
            cancel,
            started: Instant::now(),
            timeout: Duration::from_secs(request.timeout_seconds.max(1)),
            grace: Duration::from_millis(self.config.grace_period_ms),
            sample_interval: Duration::from_millis(self.config.resource_sample_interval_ms.max(20)),
            stdout_task,
            stderr_task,
        })
    }

    /// Convenience wrapper: start and wait in one call.
    pub async fn run(
        &self,
        request: &ExecutionRequest,
        cancel: Arc<AtomicBool>,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        let running = self.start(request, cancel).await?;
        Ok(running.wait().await)
    }
}

/// A spawned script: child process, capture tasks, and the materialized
/// file (removed on drop, whatever the outcome).
pub struct RunningScript {
    child: Child,
    pid: Option<u32>,
    _script_file: ScriptFile,
    cancel: Arc<AtomicBool>,
    started: Instant,
    timeout: Duration,
    grace: Duration,
    sample_interval: Duration,
    stdout_task: JoinHandle<Capture>,
    stderr_task: JoinHandle<Capture>,
}

impl RunningScript {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Drive the child to completion: sample resources on an interval,
    /// observe the cancel flag at sampling boundaries, enforce the
    /// timeout, and follow terminate-then-kill on either. The first
    /// trigger to converge decides the outcome.
    pub async fn wait(mut self) -> ExecutionOutcome {
        let mut sampler = ResourceSampler::new(self.pid);
        let mut ticker = tokio::time::interval(self.sample_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut error_kind: Option<TaskErrorKind> = None;
        let exit_status = loop {
            tokio::select! {
                status = self.child.wait() => {
                    break status.ok();
                }
                _ = ticker.tick() => {
                    sampler.sample();
                    if self.cancel.load(Ordering::Relaxed) {
                        error_kind = Some(TaskErrorKind::Cancelled);
                        break self.terminate().await;
                    }
                    if self.started.elapsed() >= self.timeout {
                        error_kind = Some(TaskErrorKind::TimedOut);
                        break self.terminate().await;
                    }
                }
            }
        };

        let wall_time_ms = self.started.elapsed().as_millis() as u64;
        let stdout = self.stdout_task.await.map(|c| c.render()).unwrap_or_default();
        let stderr = self.stderr_task.await.map(|c| c.render()).unwrap_or_default();

        let exit_code = exit_status.and_then(|status| status.code());
        if error_kind.is_none() {
            error_kind = match exit_code {
                Some(0) => None,
                // non-zero exit or killed by a signal
                _ => Some(TaskErrorKind::NonZeroExit),
            };
        }

        let mut metrics = sampler.into_metrics();
        metrics.wall_time_ms = wall_time_ms;

        ExecutionOutcome {
            exit_code,
            stdout,
            stderr,
            error_kind,
            metrics,
        }
    }

    /// Graceful termination, then force-kill after the grace period.
    async fn terminate(&mut self) -> Option<std::process::ExitStatus> {
        send_sigterm(self.pid);
        match tokio::time::timeout(self.grace, self.child.wait()).await {
            Ok(status) => status.ok(),
            Err(_) => {
                tracing::warn!(pid = ?self.pid, "Grace period expired; force-killing");
                let _ = self.child.kill().await;
                self.child.wait().await.ok()
            }
        }
    }
}

/// Materialized script file, deleted on drop.
struct ScriptFile {
    path: PathBuf,
}

impl Drop for ScriptFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove script file");
            }
        }
    }
}

fn drain_stream<R>(stream: Option<R>, max_bytes: usize) -> JoinHandle<Capture>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut capture = Capture::new(max_bytes);
        if let Some(mut stream) = stream {
            let mut chunk = [0u8; 8192];
            loop {
                match stream.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => capture.push(&chunk[..n]),
                }
            }
        }
        capture
    })
}

/// Platform interpreter and arguments for a materialized script file.
fn interpreter_command(platform: Platform, script_path: &Path) -> (String, Vec<String>) {
    let path = script_path.to_string_lossy().into_owned();
    match platform {
        Platform::Bash => ("bash".to_string(), vec![path]),
        Platform::PowerShell => (
            powershell_binary(),
            vec![
                "-NoProfile".into(),
                "-ExecutionPolicy".into(),
                "Bypass".into(),
                "-File".into(),
                path,
            ],
        ),
        Platform::AppleScript => ("osascript".to_string(), vec![path]),
    }
}

/// Prefer PowerShell Core, fall back to Windows PowerShell.
fn powershell_binary() -> String {
    for candidate in ["pwsh", "powershell.exe", "powershell"] {
        if find_in_path(candidate) {
            return candidate.to_string();
        }
    }
    "pwsh".to_string()
}

fn find_in_path(binary: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| {
        let candidate = dir.join(binary);
        candidate.is_file()
    })
}

#[cfg(unix)]
fn send_sigterm(pid: Option<u32>) {
    if let Some(pid) = pid {
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: Option<u32>) {
    // no graceful signal available; the force-kill path follows
}

fn now_epoch_seconds() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Samples one process's resource usage via sysinfo.
struct ResourceSampler {
    system: System,
    pid: Option<Pid>,
    peak_memory_bytes: Option<u64>,
    cpu_percent_peak: Option<f32>,
    io_bytes_read: Option<u64>,
    io_bytes_written: Option<u64>,
}

impl ResourceSampler {
    fn new(pid: Option<u32>) -> Self {
        Self {
            system: System::new(),
            pid: pid.map(Pid::from_u32),
            peak_memory_bytes: None,
            cpu_percent_peak: None,
            io_bytes_read: None,
            io_bytes_written: None,
        }
    }

    fn sample(&mut self) {
        let Some(pid) = self.pid else { return };
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let Some(process) = self.system.process(pid) else {
            return;
        };

        let memory = process.memory();
        if memory > 0 {
            self.peak_memory_bytes = Some(self.peak_memory_bytes.unwrap_or(0).max(memory));
        }

        let cpu = process.cpu_usage();
        if cpu > 0.0 {
            let peak = self.cpu_percent_peak.unwrap_or(0.0);
            self.cpu_percent_peak = Some(if cpu > peak { cpu } else { peak });
        }

        let disk = process.disk_usage();
        if disk.total_read_bytes > 0 {
            self.io_bytes_read = Some(disk.total_read_bytes);
        }
        if disk.total_written_bytes > 0 {
            self.io_bytes_written = Some(disk.total_written_bytes);
        }
    }

    fn into_metrics(self) -> TaskMetrics {
        TaskMetrics {
            wall_time_ms: 0,
            peak_memory_bytes: self.peak_memory_bytes,
            cpu_percent_peak: self.cpu_percent_peak,
            io_bytes_read: self.io_bytes_read,
            io_bytes_written: self.io_bytes_written,
        }
    }
}
