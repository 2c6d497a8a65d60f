//! Aggregate scheduler statistics.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use opsmith_core::TaskState;

use crate::MonitorState;

/// Point-in-time scheduler counters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatistics {
    pub submitted_total: u64,
    pub queue_depth: usize,
    pub running: usize,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Share of terminal tasks in the last 24 hours that completed
    /// successfully, in percent. 0 when nothing terminated yet.
    pub success_rate_24h: f64,
    /// Average wall time of completed runs, per platform, in ms.
    pub average_wall_time_ms: HashMap<String, u64>,
}

pub(crate) fn build(state: &MonitorState, _now: DateTime<Utc>) -> MonitorStatistics {
    let window_total = state.completions.len() as u64;
    let window_success = state.completions.iter().filter(|(_, ok)| *ok).count() as u64;
    let success_rate_24h = if window_total == 0 {
        0.0
    } else {
        (window_success as f64 / window_total as f64) * 100.0
    };

    let average_wall_time_ms = state
        .wall_by_platform
        .iter()
        .map(|(platform, (count, total_ms))| {
            (platform.to_string(), total_ms / (*count).max(1))
        })
        .collect();

    MonitorStatistics {
        submitted_total: state.submitted_total,
        queue_depth: state.queue.len(),
        running: state.running.len(),
        completed: terminal_count(state, TaskState::Completed),
        failed: terminal_count(state, TaskState::Failed),
        cancelled: terminal_count(state, TaskState::Cancelled),
        success_rate_24h,
        average_wall_time_ms,
    }
}

fn terminal_count(state: &MonitorState, terminal: TaskState) -> u64 {
    state.terminal_counts.get(&terminal).copied().unwrap_or(0)
}
