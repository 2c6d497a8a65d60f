//! Execution task lifecycle records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use super::script::{ExecutionPolicy, Platform};

/// Task lifecycle state.
///
/// Valid paths: queued → preparing → running → (completed | failed |
/// timedOut); cancelled is reachable from queued, preparing, and running.
/// No transitions leave a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskState {
    Queued,
    Preparing,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled | TaskState::TimedOut
        )
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Queued, Preparing) | (Preparing, Running) => true,
            (Running, Completed) | (Running, Failed) | (Running, TimedOut) => true,
            (Queued, Cancelled) | (Preparing, Cancelled) | (Running, Cancelled) => true,
            // spawn failures surface before the task ever runs
            (Preparing, Failed) => true,
            _ => false,
        }
    }
}

/// Scheduling priority. Ordering is Low < Normal < High.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl TaskPriority {
    /// One level up, saturating at High.
    pub fn bumped(&self) -> TaskPriority {
        match self {
            TaskPriority::Low => TaskPriority::Normal,
            TaskPriority::Normal | TaskPriority::High => TaskPriority::High,
        }
    }
}

/// Why a task ended the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskErrorKind {
    PolicyDenied,
    SpawnFailed,
    TimedOut,
    Cancelled,
    NonZeroExit,
    Internal,
}

/// What to execute and under which constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub platform: Platform,
    pub script: String,
    pub policy: ExecutionPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    pub timeout_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    /// Opaque out-of-band confirmation for elevated-policy submissions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_token: Option<String>,
}

/// Captured outcome of a finished execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<TaskErrorKind>,
}

/// Telemetry sampled while the task ran. Metrics the OS did not expose are
/// `None`, never zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMetrics {
    pub wall_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak_memory_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_percent_peak: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io_bytes_read: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io_bytes_written: Option<u64>,
}

/// Full record of one scheduled execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionTask {
    pub id: String,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub request: ExecutionRequest,
    pub priority: TaskPriority,
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    pub metrics: TaskMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_have_no_successors() {
        for terminal in [
            TaskState::Completed,
            TaskState::Failed,
            TaskState::Cancelled,
            TaskState::TimedOut,
        ] {
            for next in [
                TaskState::Queued,
                TaskState::Preparing,
                TaskState::Running,
                TaskState::Completed,
                TaskState::Failed,
                TaskState::Cancelled,
                TaskState::TimedOut,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        assert!(TaskState::Queued.can_transition_to(TaskState::Preparing));
        assert!(TaskState::Preparing.can_transition_to(TaskState::Running));
        assert!(TaskState::Running.can_transition_to(TaskState::Completed));
        assert!(!TaskState::Queued.can_transition_to(TaskState::Running));
    }

    #[test]
    fn test_priority_ordering_and_bump() {
        assert!(TaskPriority::High > TaskPriority::Normal);
        assert!(TaskPriority::Normal > TaskPriority::Low);
        assert_eq!(TaskPriority::Low.bumped(), TaskPriority::Normal);
        assert_eq!(TaskPriority::High.bumped(), TaskPriority::High);
    }

    #[test]
    fn test_state_serializes_camel_case() {
        assert_eq!(
            serde_json::to_string(&TaskState::TimedOut).unwrap(),
            "\"timedOut\""
        );
    }
}
