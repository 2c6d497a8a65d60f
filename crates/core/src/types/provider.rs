//! LLM provider descriptors, health, and the prompt envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::conversation::Role;

/// Recognized provider wire bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// Ollama-style local HTTP generate API.
    OllamaCompatible,
    /// OpenAI-style chat completions API.
    OpenAiCompatible,
    /// Anthropic-style messages API.
    AnthropicCompatible,
    /// Google Gemini generateContent API.
    GeminiCompatible,
    /// Bare `{prompt} -> {text}` HTTP endpoint.
    CustomHttp,
}

impl ProviderKind {
    pub fn is_local(&self) -> bool {
        matches!(self, ProviderKind::OllamaCompatible)
    }
}

/// Last observed health of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderHealth {
    Unknown,
    Healthy,
    Degraded,
    Unavailable,
}

/// Snapshot of one provider's runtime state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSnapshot {
    pub name: String,
    pub kind: ProviderKind,
    pub health: ProviderHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
}

/// One turn handed to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Sampling and bounding parameters for one generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 2048,
            stop: None,
            timeout_ms: None,
        }
    }
}

/// The assembled prompt package handed to the provider gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptEnvelope {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub params: GenerationParams,
    /// Provider name to try first, when healthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_provider: Option<String>,
}

impl PromptEnvelope {
    /// Flatten the envelope into a single prompt string for providers that
    /// take plain text rather than a message array.
    pub fn flattened(&self) -> String {
        let mut out = String::new();
        if !self.system_prompt.is_empty() {
            out.push_str("System: ");
            out.push_str(&self.system_prompt);
            out.push_str("\n\n");
        }
        for message in &self.messages {
            let label = match message.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::System => "System",
            };
            out.push_str(label);
            out.push_str(": ");
            out.push_str(&message.content);
            out.push_str("\n\n");
        }
        out.push_str("Assistant: ");
        out
    }
}

/// Token accounting for one completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Successful provider response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub text: String,
    pub usage: LlmUsage,
    pub provider_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flattened_prompt_shape() {
        let envelope = PromptEnvelope {
            system_prompt: "be terse".into(),
            messages: vec![
                ChatMessage::new(Role::User, "hello"),
                ChatMessage::new(Role::Assistant, "hi"),
                ChatMessage::new(Role::User, "generate a script"),
            ],
            params: GenerationParams::default(),
            preferred_provider: None,
        };
        let flat = envelope.flattened();
        assert!(flat.starts_with("System: be terse"));
        assert!(flat.contains("User: hello"));
        assert!(flat.contains("Assistant: hi"));
        assert!(flat.ends_with("Assistant: "));
    }

    #[test]
    fn test_provider_kind_wire_names() {
        let kind: ProviderKind = serde_json::from_str("\"anthropic-compatible\"").unwrap();
        assert_eq!(kind, ProviderKind::AnthropicCompatible);
        assert_eq!(
            serde_json::to_string(&ProviderKind::CustomHttp).unwrap(),
            "\"custom-http\""
        );
    }
}
