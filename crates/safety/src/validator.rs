//! Script classification against policy rule sets.

use std::collections::HashMap;

use opsmith_core::{
    ExecutionPolicy, Issue, Platform, RuleCitation, SafetyDecision, SafetyReport, Severity,
};

use crate::rules::{advisory_rules_for, deny_rules_for, SafetyRule};

/// Classifies scripts against allow/deny rule sets.
///
/// Evaluation never fails; the caller decides whether to enforce the
/// decision (the generator facade runs it in dry-run mode, the monitor
/// enforces it at submission).
pub struct SafetyValidator {
    deny: HashMap<ExecutionPolicy, Vec<SafetyRule>>,
    advisory: Vec<SafetyRule>,
}

impl SafetyValidator {
    pub fn new() -> Self {
        let mut deny = HashMap::new();
        for policy in [
            ExecutionPolicy::Safe,
            ExecutionPolicy::Restricted,
            ExecutionPolicy::Standard,
            ExecutionPolicy::Elevated,
        ] {
            deny.insert(policy, deny_rules_for(policy));
        }
        Self {
            deny,
            advisory: advisory_rules_for(),
        }
    }

    /// Evaluate a script under a policy.
    pub fn evaluate(
        &self,
        script: &str,
        platform: Platform,
        policy: ExecutionPolicy,
    ) -> SafetyReport {
        let mut issues: Vec<Issue> = Vec::new();
        let mut matched_rule = None;

        let deny_rules = self
            .deny
            .get(&policy)
            .map(|rules| rules.as_slice())
            .unwrap_or_default();

        // ordered scan; the first deny match is the cited rule
        for rule in deny_rules.iter().filter(|rule| rule.applies_to(platform)) {
            if rule.pattern.is_match(script) {
                issues.push(issue_for(rule, script));
                if matched_rule.is_none() {
                    tracing::debug!(rule = rule.id, %policy, "Deny rule matched");
                    matched_rule = Some(RuleCitation {
                        rule_id: rule.id.to_string(),
                        pattern: rule.pattern.as_str().to_string(),
                        message: rule.message.to_string(),
                    });
                }
            }
        }

        for rule in self
            .advisory
            .iter()
            .filter(|rule| rule.applies_to(platform))
        {
            if rule.pattern.is_match(script) {
                issues.push(issue_for(rule, script));
            }
        }

        let score = score_from(&issues);
        SafetyReport {
            decision: if matched_rule.is_some() {
                SafetyDecision::Deny
            } else {
                SafetyDecision::Allow
            },
            matched_rule,
            issues,
            score,
            audit: policy == ExecutionPolicy::Elevated,
        }
    }
}

impl Default for SafetyValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn issue_for(rule: &SafetyRule, script: &str) -> Issue {
    let line = rule
        .pattern
        .find(script)
        .map(|m| script[..m.start()].matches('\n').count() as u32 + 1);
    Issue {
        severity: rule.severity,
        message: format!("{}: {}", rule.id, rule.message),
        line,
    }
}

/// Score starts at 100; each warn deducts 5, each error 15, floored at 0.
pub fn score_from(issues: &[Issue]) -> u8 {
    let deduction: u32 = issues
        .iter()
        .map(|issue| match issue.severity {
            Severity::Info => 0,
            Severity::Warn => 5,
            Severity::Error => 15,
        })
        .sum();
    100u32.saturating_sub(deduction) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rm_rf_root_denied_under_safe() {
        let validator = SafetyValidator::new();
        let report = validator.evaluate("rm -rf /", Platform::Bash, ExecutionPolicy::Safe);
        assert_eq!(report.decision, SafetyDecision::Deny);
        let citation = report.matched_rule.unwrap();
        assert!(citation.message.contains("rm -rf"));
    }

    #[test]
    fn test_rm_rf_root_denied_under_every_policy() {
        let validator = SafetyValidator::new();
        for policy in [
            ExecutionPolicy::Safe,
            ExecutionPolicy::Restricted,
            ExecutionPolicy::Standard,
            ExecutionPolicy::Elevated,
        ] {
            let report = validator.evaluate("rm -rf /", Platform::Bash, policy);
            assert_eq!(report.decision, SafetyDecision::Deny, "policy {}", policy);
        }
    }

    #[test]
    fn test_echo_allowed_under_safe() {
        let validator = SafetyValidator::new();
        let report = validator.evaluate("echo hello", Platform::Bash, ExecutionPolicy::Safe);
        assert_eq!(report.decision, SafetyDecision::Allow);
        assert_eq!(report.score, 100);
    }

    #[test]
    fn test_network_denied_under_safe_allowed_under_standard() {
        let validator = SafetyValidator::new();
        let script = "curl https://example.com/data.json";
        let safe = validator.evaluate(script, Platform::Bash, ExecutionPolicy::Safe);
        assert_eq!(safe.decision, SafetyDecision::Deny);
        let standard = validator.evaluate(script, Platform::Bash, ExecutionPolicy::Standard);
        assert_eq!(standard.decision, SafetyDecision::Allow);
    }

    #[test]
    fn test_writes_allowed_under_restricted() {
        let validator = SafetyValidator::new();
        let script = "mkdir -p scratch && echo data > scratch/out.txt";
        let restricted =
            validator.evaluate(script, Platform::Bash, ExecutionPolicy::Restricted);
        assert_eq!(restricted.decision, SafetyDecision::Allow);
        let safe = validator.evaluate(script, Platform::Bash, ExecutionPolicy::Safe);
        assert_eq!(safe.decision, SafetyDecision::Deny);
    }

    #[test]
    fn test_fork_bomb_denied_even_elevated() {
        let validator = SafetyValidator::new();
        let report =
            validator.evaluate(":(){ :|:& };:", Platform::Bash, ExecutionPolicy::Elevated);
        assert_eq!(report.decision, SafetyDecision::Deny);
        assert!(report.audit);
    }

    #[test]
    fn test_powershell_format_volume() {
        let validator = SafetyValidator::new();
        let report = validator.evaluate(
            "Format-Volume -DriveLetter D",
            Platform::PowerShell,
            ExecutionPolicy::Standard,
        );
        assert_eq!(report.decision, SafetyDecision::Deny);
        assert_eq!(report.matched_rule.unwrap().rule_id, "ps-format-volume");
    }

    #[test]
    fn test_applescript_admin_privileges_policy_split() {
        let validator = SafetyValidator::new();
        let script = r#"do shell script "ls /" with administrator privileges"#;
        let restricted =
            validator.evaluate(script, Platform::AppleScript, ExecutionPolicy::Restricted);
        assert_eq!(restricted.decision, SafetyDecision::Deny);
        let standard =
            validator.evaluate(script, Platform::AppleScript, ExecutionPolicy::Standard);
        assert_eq!(standard.decision, SafetyDecision::Allow);
    }

    #[test]
    fn test_score_deductions() {
        let validator = SafetyValidator::new();
        // one warn-level advisory finding: eval
        let report = validator.evaluate(
            "eval \"$dynamic\"",
            Platform::Bash,
            ExecutionPolicy::Standard,
        );
        assert_eq!(report.decision, SafetyDecision::Allow);
        assert_eq!(report.score, 95);
    }

    #[test]
    fn test_score_floor() {
        let issues: Vec<Issue> = (0..30)
            .map(|_| Issue::new(Severity::Error, "x"))
            .collect();
        assert_eq!(score_from(&issues), 0);
    }

    #[test]
    fn test_deny_rule_reports_line_number() {
        let validator = SafetyValidator::new();
        let script = "echo start\nrm -rf /\necho done";
        let report = validator.evaluate(script, Platform::Bash, ExecutionPolicy::Standard);
        let denial = report
            .issues
            .iter()
            .find(|issue| issue.severity == Severity::Error)
            .unwrap();
        assert_eq!(denial.line, Some(2));
    }
}
