//! Script platforms, policies, and generation artifacts.
//!
//! Script text is treated as opaque bytes plus a platform tag everywhere
//! except the prompt assembler, template catalog, safety validator, and
//! executor.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Target scripting platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    PowerShell,
    AppleScript,
    Bash,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::PowerShell, Platform::AppleScript, Platform::Bash];

    /// Markdown fence tag used when extracting generated code.
    pub fn fence_tag(&self) -> &'static str {
        match self {
            Platform::PowerShell => "powershell",
            Platform::AppleScript => "applescript",
            Platform::Bash => "bash",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            Platform::PowerShell => ".ps1",
            Platform::AppleScript => ".scpt",
            Platform::Bash => ".sh",
        }
    }

    /// Line-comment prefix for this platform.
    pub fn comment_prefix(&self) -> &'static str {
        match self {
            Platform::PowerShell | Platform::Bash => "#",
            Platform::AppleScript => "--",
        }
    }

    /// Best-effort platform detection from a task description, used when a
    /// request asks for `auto`.
    pub fn detect(description: &str) -> Platform {
        let lower = description.to_lowercase();
        const POWERSHELL_HINTS: [&str; 5] = [
            "windows",
            "powershell",
            "active directory",
            "exchange",
            "registry",
        ];
        const APPLESCRIPT_HINTS: [&str; 5] =
            ["mac", "macos", "finder", "safari", "system preferences"];
        const BASH_HINTS: [&str; 6] = ["linux", "unix", "bash", "systemctl", "apt", "cron"];

        if POWERSHELL_HINTS.iter().any(|hint| lower.contains(hint)) {
            Platform::PowerShell
        } else if APPLESCRIPT_HINTS.iter().any(|hint| lower.contains(hint)) {
            Platform::AppleScript
        } else if BASH_HINTS.iter().any(|hint| lower.contains(hint)) {
            Platform::Bash
        } else {
            // bash is the most portable default
            Platform::Bash
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.fence_tag())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "powershell" => Ok(Platform::PowerShell),
            "applescript" => Ok(Platform::AppleScript),
            "bash" => Ok(Platform::Bash),
            other => Err(format!("unsupported platform: {}", other)),
        }
    }
}

/// Named safety policy evaluated against candidate scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionPolicy {
    /// Read-only: no filesystem mutation, no network, no elevation.
    Safe,
    /// Adds benign writes to a scratch directory.
    Restricted,
    /// General automation; destructive patterns still denied.
    Standard,
    /// Everything not explicitly denied; flagged for audit.
    Elevated,
}

impl fmt::Display for ExecutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionPolicy::Safe => "safe",
            ExecutionPolicy::Restricted => "restricted",
            ExecutionPolicy::Standard => "standard",
            ExecutionPolicy::Elevated => "elevated",
        };
        f.write_str(s)
    }
}

impl FromStr for ExecutionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "safe" => Ok(ExecutionPolicy::Safe),
            "restricted" => Ok(ExecutionPolicy::Restricted),
            "standard" => Ok(ExecutionPolicy::Standard),
            "elevated" => Ok(ExecutionPolicy::Elevated),
            other => Err(format!("unrecognized policy: {}", other)),
        }
    }
}

/// How a script came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptSource {
    Llm,
    Template,
}

/// A generated script plus its metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    pub platform: Platform,
    pub filename: String,
    pub content: String,
    pub documentation: String,
    pub source: ScriptSource,
    /// One-line caution from the template catalog, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_report: Option<SafetyReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_runtime: Option<String>,
}

/// Finding severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// A single validation or safety finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl Issue {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            line: None,
        }
    }
}

/// Allow/deny outcome of the safety validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyDecision {
    Allow,
    Deny,
}

/// Citation of the rule that triggered a denial.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCitation {
    pub rule_id: String,
    pub pattern: String,
    pub message: String,
}

/// Full report from the safety validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyReport {
    pub decision: SafetyDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<RuleCitation>,
    pub issues: Vec<Issue>,
    /// 100 minus deductions per finding; independent of the decision.
    pub score: u8,
    /// Set when the evaluated policy records an audit flag.
    #[serde(default)]
    pub audit: bool,
}

/// Where a validation report came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportSource {
    Llm,
    Heuristic,
}

/// Structured verdict about a script.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// Overall quality score in `[0, 100]`.
    pub score: u8,
    pub issues: Vec<Issue>,
    pub recommendations: Vec<String>,
    pub source: ReportSource,
}
