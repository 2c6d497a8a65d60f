//! Code generation facade.
//!
//! Orchestrates prompt assembly and the provider gateway; when the chain
//! comes back empty the offline template catalog supplies the script
//! instead. Callers of `generate` therefore always get a script.

use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

use opsmith_core::{
    Channel, Error, ExecutionPolicy, GenerationParams, Issue, Message, Persona, Platform,
    ReportSource, Result, Script, ScriptSource, Severity, ValidationReport,
};
use opsmith_llm::ProviderGateway;
use opsmith_safety::{lint_script, recommendations_from, score_from, SafetyValidator};

use crate::prompt::PromptAssembler;
use crate::template::TemplateCatalog;

/// Tunables for the facade.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 2048,
            timeout_ms: 30_000,
        }
    }
}

/// Facade over prompt assembly, the provider gateway, the template
/// fallback, and dry-run safety reporting.
pub struct CodeGenerator {
    gateway: Arc<ProviderGateway>,
    assembler: PromptAssembler,
    templates: TemplateCatalog,
    safety: Arc<SafetyValidator>,
    config: GenerationConfig,
}

impl CodeGenerator {
    pub fn new(
        gateway: Arc<ProviderGateway>,
        assembler: PromptAssembler,
        templates: TemplateCatalog,
        safety: Arc<SafetyValidator>,
        config: GenerationConfig,
    ) -> Self {
        Self {
            gateway,
            assembler,
            templates,
            safety,
            config,
        }
    }

    fn params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stop: None,
            timeout_ms: Some(self.config.timeout_ms),
        }
    }

    /// Generate a script. Never fails: an unreachable or unusable LLM
    /// result degrades to the offline template catalog.
    pub async fn generate(
        &self,
        description: &str,
        platform: Platform,
        persona: &Persona,
        channel: &Channel,
        history: &[Message],
    ) -> Script {
        let envelope = self.assembler.generate(
            persona,
            channel,
            platform,
            history,
            description,
            self.params(),
        );

        let mut script = match self.gateway.generate(&envelope).await {
            Ok(completion) => match extract_code_block(&completion.text, platform) {
                Some(content) => {
                    tracing::info!(provider = %completion.provider_name, %platform, "Generated script via LLM");
                    Script {
                        platform,
                        filename: derive_filename(&content, platform),
                        documentation: extract_documentation(&content, platform),
                        content,
                        source: ScriptSource::Llm,
                        safety_hint: None,
                        safety_report: None,
                        estimated_runtime: None,
                    }
                }
                None => {
                    tracing::warn!(%platform, "LLM reply had no usable code block; using template");
                    self.templates.generate(description, platform)
                }
            },
            Err(error) => {
                tracing::warn!(%error, %platform, "LLM generation failed; using template");
                self.templates.generate(description, platform)
            }
        };

        script.content = post_process(&script.content, platform);
        // dry-run report against the standard policy; enforcement happens
        // at execution submission, not here
        script.safety_report =
            Some(
                self.safety
                    .evaluate(&script.content, platform, ExecutionPolicy::Standard),
            );
        script
    }

    /// Improve an existing script from feedback. A template cannot apply
    /// someone's feedback, so provider exhaustion surfaces as an error.
    pub async fn improve(
        &self,
        script: &str,
        feedback: &str,
        platform: Platform,
    ) -> Result<Script> {
        let envelope = self
            .assembler
            .improve(platform, script, feedback, self.params());

        let completion = self
            .gateway
            .generate(&envelope)
            .await
            .map_err(|e| Error::llm_unavailable(e.to_string()))?;

        let content = extract_code_block(&completion.text, platform)
            .ok_or_else(|| Error::llm_unavailable("model returned no usable script"))?;
        let content = post_process(&content, platform);

        Ok(Script {
            platform,
            filename: derive_filename(&content, platform),
            documentation: extract_documentation(&content, platform),
            safety_report: Some(self.safety.evaluate(
                &content,
                platform,
                ExecutionPolicy::Standard,
            )),
            content,
            source: ScriptSource::Llm,
            safety_hint: None,
            estimated_runtime: None,
        })
    }

    /// Validate a script. Falls back to a syntactic report from the safety
    /// validator plus lint heuristics when no provider is reachable.
    pub async fn validate(&self, script: &str, platform: Platform) -> ValidationReport {
        let envelope = self.assembler.validate(platform, script, self.params());

        match self.gateway.generate(&envelope).await {
            Ok(completion) => match parse_validation_reply(&completion.text) {
                Some(report) => report,
                None => {
                    tracing::warn!("Unparseable validation verdict; using heuristics");
                    self.heuristic_report(script, platform)
                }
            },
            Err(error) => {
                tracing::warn!(%error, "LLM unavailable for validation; using heuristics");
                self.heuristic_report(script, platform)
            }
        }
    }

    fn heuristic_report(&self, script: &str, platform: Platform) -> ValidationReport {
        let mut issues = lint_script(script, platform);
        let safety = self
            .safety
            .evaluate(script, platform, ExecutionPolicy::Standard);
        issues.extend(safety.issues);
        let recommendations = recommendations_from(&issues);
        ValidationReport {
            score: score_from(&issues),
            issues,
            recommendations,
            source: ReportSource::Heuristic,
        }
    }
}

/// Extract the first fenced code block matching the platform tag, then any
/// fenced block, then fall back to the bare reply when it is non-empty.
pub fn extract_code_block(text: &str, platform: Platform) -> Option<String> {
    let tagged = Regex::new(&format!(
        r"(?is)```(?:{})\s*\n(.*?)```",
        platform.fence_tag()
    ))
    .expect("invalid fence regex");
    if let Some(captures) = tagged.captures(text) {
        let block = captures[1].trim();
        if !block.is_empty() {
            return Some(block.to_string());
        }
    }

    let any = Regex::new(r"(?is)```[a-z0-9]*\s*\n(.*?)```").expect("invalid fence regex");
    if let Some(captures) = any.captures(text) {
        let block = captures[1].trim();
        if !block.is_empty() {
            return Some(block.to_string());
        }
    }

    let bare = text.trim();
    if bare.is_empty() || bare.contains("```") {
        None
    } else {
        Some(bare.to_string())
    }
}

/// Normalize line endings, strip trailing whitespace, guarantee a trailing
/// newline, and prepend a single generated-by header.
pub fn post_process(content: &str, platform: Platform) -> String {
    let normalized = content.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<String> = normalized
        .lines()
        .map(|line| line.trim_end().to_string())
        .collect();

    let header = format!("{} generated by opsmith", platform.comment_prefix());
    let already_stamped = lines.iter().take(3).any(|line| line.contains("generated by opsmith"));
    if !already_stamped {
        // keep the shebang on line one
        let insert_at = usize::from(lines.first().is_some_and(|l| l.starts_with("#!")));
        lines.insert(insert_at, header);
    }

    let mut out = lines.join("\n");
    while out.ends_with('\n') {
        out.pop();
    }
    out.push('\n');
    out
}

/// Filename from a `Script Name:` comment in the first lines, else the
/// platform default.
pub fn derive_filename(content: &str, platform: Platform) -> String {
    let name_re =
        Regex::new(r"(?i)(?:script name|name|title):\s*([^#\n]+)").expect("invalid name regex");
    for line in content.lines().take(10) {
        if let Some(captures) = name_re.captures(line) {
            let raw = captures[1].trim();
            let cleaned: String = raw
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() {
                        c.to_ascii_lowercase()
                    } else {
                        '-'
                    }
                })
                .collect::<String>()
                .split('-')
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join("-");
            if !cleaned.is_empty() {
                return format!("{}{}", cleaned, platform.file_extension());
            }
        }
    }
    format!("{}-automation{}", platform, platform.file_extension())
}

/// Leading comment block of the script, used as its documentation.
pub fn extract_documentation(content: &str, platform: Platform) -> String {
    let prefix = platform.comment_prefix();
    let mut doc_lines = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("#!") {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            let rest = rest.trim();
            if !rest.is_empty() {
                doc_lines.push(rest.to_string());
            }
        } else if trimmed.is_empty() {
            if !doc_lines.is_empty() {
                break;
            }
        } else {
            break;
        }
    }
    doc_lines.join(" ")
}

/// Parse the model's JSON verdict, tolerating a fenced JSON block.
fn parse_validation_reply(text: &str) -> Option<ValidationReport> {
    let candidate = match Regex::new(r"(?is)```(?:json)?\s*\n(.*?)```")
        .expect("invalid json fence regex")
        .captures(text)
    {
        Some(captures) => captures[1].trim().to_string(),
        None => text.trim().to_string(),
    };

    let value: Value = serde_json::from_str(&candidate).ok()?;
    let score = value.get("score")?.as_u64()?.min(100) as u8;

    let issues = value
        .get("issues")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let severity = match entry.get("severity").and_then(Value::as_str)? {
                        "info" => Severity::Info,
                        "warn" | "warning" => Severity::Warn,
                        "error" => Severity::Error,
                        _ => return None,
                    };
                    Some(Issue {
                        severity,
                        message: entry.get("message")?.as_str()?.to_string(),
                        line: entry.get("line").and_then(Value::as_u64).map(|l| l as u32),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let recommendations = value
        .get("recommendations")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    Some(ValidationReport {
        score,
        issues,
        recommendations,
        source: ReportSource::Llm,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsmith_core::{ChannelConstraints, SafetyDecision};
    use opsmith_llm::MockProvider;
    use std::collections::BTreeSet;

    fn web_channel() -> Channel {
        Channel {
            id: "web".into(),
            name: "Web".into(),
            description: "web".into(),
            capabilities: BTreeSet::new(),
            artifact_types: BTreeSet::new(),
            constraints: ChannelConstraints::default(),
        }
    }

    fn generator_with(providers: Vec<Arc<dyn opsmith_core::LlmProvider>>) -> CodeGenerator {
        CodeGenerator::new(
            Arc::new(ProviderGateway::new(providers, None, 3, 3)),
            PromptAssembler::new(10),
            TemplateCatalog::new(0.3),
            Arc::new(SafetyValidator::new()),
            GenerationConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_generate_falls_back_to_template_when_llm_down() {
        let generator = generator_with(vec![Arc::new(MockProvider::unavailable("dead"))]);
        let script = generator
            .generate(
                "backup my documents folder",
                Platform::PowerShell,
                &Persona::fallback(),
                &web_channel(),
                &[],
            )
            .await;

        assert_eq!(script.source, ScriptSource::Template);
        assert_eq!(script.platform, Platform::PowerShell);
        assert!(script.content.contains("param("));
        assert!(script.content.contains("try {"));
        assert!(!script.content.trim().is_empty());
    }

    #[tokio::test]
    async fn test_generate_uses_llm_block_when_available() {
        let reply = "Here you go:\n```bash\n#!/bin/bash\necho generated\n```\nEnjoy.";
        let generator = generator_with(vec![Arc::new(MockProvider::new("up", reply))]);
        let script = generator
            .generate(
                "say generated",
                Platform::Bash,
                &Persona::fallback(),
                &web_channel(),
                &[],
            )
            .await;

        assert_eq!(script.source, ScriptSource::Llm);
        assert!(script.content.contains("echo generated"));
        assert!(script.content.contains("generated by opsmith"));
        // safety dry-run is attached and non-blocking
        let report = script.safety_report.unwrap();
        assert_eq!(report.decision, SafetyDecision::Allow);
    }

    #[tokio::test]
    async fn test_empty_llm_reply_treated_as_failure() {
        let generator = generator_with(vec![Arc::new(MockProvider::new("up", "   "))]);
        let script = generator
            .generate(
                "backup my documents folder",
                Platform::Bash,
                &Persona::fallback(),
                &web_channel(),
                &[],
            )
            .await;
        assert_eq!(script.source, ScriptSource::Template);
    }

    #[tokio::test]
    async fn test_improve_surfaces_unavailable() {
        let generator = generator_with(vec![Arc::new(MockProvider::unavailable("dead"))]);
        let result = generator
            .improve("#!/bin/bash\necho hi", "add logging", Platform::Bash)
            .await;
        assert!(matches!(result, Err(Error::LlmUnavailable(_))));
    }

    #[tokio::test]
    async fn test_validate_heuristic_fallback() {
        let generator = generator_with(vec![Arc::new(MockProvider::unavailable("dead"))]);
        let report = generator.validate("echo hi", Platform::Bash).await;
        assert_eq!(report.source, ReportSource::Heuristic);
        assert!(report
            .issues
            .iter()
            .any(|issue| issue.message.contains("error trap")));
        assert!(report.score < 100);
    }

    #[tokio::test]
    async fn test_validate_parses_llm_verdict() {
        let reply = r#"```json
{"score": 82, "issues": [{"severity": "warn", "message": "no logging", "line": 3}],
 "recommendations": ["add logging"]}
```"#;
        let generator = generator_with(vec![Arc::new(MockProvider::new("up", reply))]);
        let report = generator.validate("echo hi", Platform::Bash).await;
        assert_eq!(report.source, ReportSource::Llm);
        assert_eq!(report.score, 82);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].line, Some(3));
        assert_eq!(report.recommendations, vec!["add logging".to_string()]);
    }

    #[test]
    fn test_extract_prefers_platform_fence() {
        let text = "```powershell\nWrite-Host hi\n```\n```bash\necho hi\n```";
        assert_eq!(
            extract_code_block(text, Platform::Bash).unwrap(),
            "echo hi"
        );
        assert_eq!(
            extract_code_block(text, Platform::PowerShell).unwrap(),
            "Write-Host hi"
        );
    }

    #[test]
    fn test_extract_bare_reply() {
        assert_eq!(
            extract_code_block("echo plain", Platform::Bash).unwrap(),
            "echo plain"
        );
        assert!(extract_code_block("   ", Platform::Bash).is_none());
    }

    #[test]
    fn test_post_process_idempotent_header() {
        let once = post_process("#!/bin/bash\necho hi  \r\n", Platform::Bash);
        assert!(once.starts_with("#!/bin/bash\n# generated by opsmith\n"));
        assert!(once.ends_with("echo hi\n"));
        let twice = post_process(&once, Platform::Bash);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_derive_filename_from_comment() {
        let content = "# Script Name: Nightly Backup\necho hi";
        assert_eq!(derive_filename(content, Platform::Bash), "nightly-backup.sh");
        assert_eq!(
            derive_filename("echo hi", Platform::Bash),
            "bash-automation.sh"
        );
    }

    #[test]
    fn test_extract_documentation() {
        let content = "#!/bin/bash\n# generated by opsmith\n# Archives the documents folder.\n\necho hi";
        let doc = extract_documentation(content, Platform::Bash);
        assert!(doc.contains("Archives the documents folder."));
    }
}
