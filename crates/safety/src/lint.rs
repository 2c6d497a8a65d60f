//! Platform-specific lint heuristics.
//!
//! These back the offline validation path: when no language model is
//! reachable, `validate` still returns a syntactic report built from these
//! checks plus the policy scan.

use opsmith_core::{Issue, Platform, Severity};

/// Structural checks for a script. Findings are advisory.
pub fn lint_script(script: &str, platform: Platform) -> Vec<Issue> {
    let mut issues = Vec::new();

    if script.trim().is_empty() {
        issues.push(Issue::new(Severity::Error, "script is empty"));
        return issues;
    }

    match platform {
        Platform::Bash => {
            if !script.contains("set -e") {
                issues.push(Issue::new(
                    Severity::Warn,
                    "no `set -e`; failures will not stop the script",
                ));
            }
            if !script.contains("trap ") {
                issues.push(Issue::new(Severity::Warn, "no error trap detected"));
            }
            if !script.starts_with("#!") {
                issues.push(Issue::new(Severity::Info, "missing shebang line"));
            }
        }
        Platform::PowerShell => {
            if !script.contains("try {") && !script.contains("try{") {
                issues.push(Issue::new(Severity::Warn, "no try/catch error handling"));
            }
            if !script.contains("param(") {
                issues.push(Issue::new(
                    Severity::Info,
                    "no param() block; script takes no arguments",
                ));
            }
            if !script.contains("Write-Host") && !script.contains("Write-Output") {
                issues.push(Issue::new(Severity::Info, "no user-facing progress output"));
            }
        }
        Platform::AppleScript => {
            if !script.contains("on error") {
                issues.push(Issue::new(Severity::Warn, "no on error handler"));
            }
            if !script.contains("display") {
                issues.push(Issue::new(Severity::Info, "no user feedback (display …)"));
            }
        }
    }

    issues
}

/// Turn lint findings into actionable recommendations.
pub fn recommendations_from(issues: &[Issue]) -> Vec<String> {
    issues
        .iter()
        .filter(|issue| issue.severity != Severity::Info)
        .map(|issue| format!("Address: {}", issue.message))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bash_missing_guards() {
        let issues = lint_script("echo hi", Platform::Bash);
        let messages: Vec<&str> = issues.iter().map(|i| i.message.as_str()).collect();
        assert!(messages.iter().any(|m| m.contains("set -e")));
        assert!(messages.iter().any(|m| m.contains("error trap")));
    }

    #[test]
    fn test_bash_well_formed_script_is_quiet() {
        let script = "#!/bin/bash\nset -euo pipefail\ntrap 'echo fail' ERR\necho ok\n";
        assert!(lint_script(script, Platform::Bash).is_empty());
    }

    #[test]
    fn test_powershell_try_detected() {
        let issues = lint_script("Get-Date", Platform::PowerShell);
        assert!(issues
            .iter()
            .any(|issue| issue.message.contains("try/catch")));
    }

    #[test]
    fn test_empty_script_short_circuits() {
        let issues = lint_script("   \n", Platform::AppleScript);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Error);
    }
}
