//! HTTP provider bindings.
//!
//! One `HttpProvider` per configured backend; the binding kind decides how
//! the prompt envelope maps to the provider's wire format and how the
//! response maps back to a [`Completion`]. Any mapping surprise is a
//! protocol error, not a crash.

use async_trait::async_trait;
use secrecy::{ExposeSecret, Secret};
use serde_json::{json, Value};
use std::time::Duration;

use opsmith_core::config::ProviderEntry;
use opsmith_core::{
    ChatMessage, Completion, LlmError, LlmProvider, LlmUsage, PromptEnvelope, ProviderKind, Role,
};

/// A single LLM backend reached over HTTP.
pub struct HttpProvider {
    name: String,
    kind: ProviderKind,
    endpoint: String,
    api_key: Option<Secret<String>>,
    model: String,
    client: reqwest::Client,
    default_timeout_ms: u64,
    max_timeout_ms: u64,
}

impl HttpProvider {
    pub fn from_entry(entry: &ProviderEntry, default_timeout_ms: u64, max_timeout_ms: u64) -> Self {
        Self {
            name: entry.name.clone(),
            kind: entry.kind,
            endpoint: entry.endpoint.trim_end_matches('/').to_string(),
            api_key: entry.api_key.clone(),
            model: entry.model.clone(),
            client: reqwest::Client::new(),
            default_timeout_ms,
            max_timeout_ms,
        }
    }

    fn request_timeout(&self, envelope: &PromptEnvelope) -> Duration {
        let ms = envelope
            .params
            .timeout_ms
            .unwrap_or(self.default_timeout_ms)
            .min(self.max_timeout_ms);
        Duration::from_millis(ms)
    }

    fn api_key(&self) -> Result<&str, LlmError> {
        self.api_key
            .as_ref()
            .map(|key| key.expose_secret().as_str())
            .ok_or_else(|| {
                LlmError::BadRequest(format!("provider '{}' has no API key configured", self.name))
            })
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<Value, LlmError> {
        let response = request
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_transport_error(&self.name, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(&self.name, status, &body));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| LlmError::Protocol(format!("{}: invalid JSON response: {}", self.name, e)))
    }

    // -------------------------------------------------------------------------
    // Per-binding request/response mapping
    // -------------------------------------------------------------------------

    async fn generate_ollama(&self, envelope: &PromptEnvelope) -> Result<Completion, LlmError> {
        let body = json!({
            "model": self.model,
            "prompt": envelope.flattened(),
            "stream": false,
            "options": {
                "temperature": envelope.params.temperature,
                "num_predict": envelope.params.max_tokens,
            },
        });
        let value = self
            .send(
                self.client
                    .post(format!("{}/api/generate", self.endpoint))
                    .json(&body),
                self.request_timeout(envelope),
            )
            .await?;

        let text = value
            .get("response")
            .and_then(Value::as_str)
            .ok_or_else(|| protocol(&self.name, "missing `response` field"))?
            .to_string();
        let usage = LlmUsage {
            prompt_tokens: value
                .get("prompt_eval_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            completion_tokens: value.get("eval_count").and_then(Value::as_u64).unwrap_or(0),
            total_tokens: 0,
        };
        Ok(self.completion(text, fill_total(usage)))
    }

    async fn generate_openai(&self, envelope: &PromptEnvelope) -> Result<Completion, LlmError> {
        let mut messages = vec![json!({"role": "system", "content": envelope.system_prompt})];
        messages.extend(envelope.messages.iter().map(|m| {
            json!({"role": role_name(m), "content": m.content})
        }));

        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": envelope.params.temperature,
            "max_tokens": envelope.params.max_tokens,
        });

        let value = self
            .send(
                self.client
                    .post(format!("{}/chat/completions", self.endpoint))
                    .bearer_auth(self.api_key()?)
                    .json(&body),
                self.request_timeout(envelope),
            )
            .await?;

        let text = value
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| protocol(&self.name, "missing choices[0].message.content"))?
            .to_string();
        let usage = LlmUsage {
            prompt_tokens: value
                .pointer("/usage/prompt_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            completion_tokens: value
                .pointer("/usage/completion_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            total_tokens: value
                .pointer("/usage/total_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        };
        Ok(self.completion(text, usage))
    }

    async fn generate_anthropic(&self, envelope: &PromptEnvelope) -> Result<Completion, LlmError> {
        // the messages API takes user/assistant turns only; fold system
        // turns into the system string
        let mut system = envelope.system_prompt.clone();
        let mut messages = Vec::new();
        for message in &envelope.messages {
            match message.role {
                Role::System => {
                    system.push_str("\n\n");
                    system.push_str(&message.content);
                }
                Role::User | Role::Assistant => {
                    messages.push(json!({"role": role_name(message), "content": message.content}))
                }
            }
        }

        let body = json!({
            "model": self.model,
            "system": system,
            "messages": messages,
            "temperature": envelope.params.temperature,
            "max_tokens": envelope.params.max_tokens,
        });

        let value = self
            .send(
                self.client
                    .post(format!("{}/v1/messages", self.endpoint))
                    .header("x-api-key", self.api_key()?)
                    .header("anthropic-version", "2023-06-01")
                    .json(&body),
                self.request_timeout(envelope),
            )
            .await?;

        let text = value
            .pointer("/content/0/text")
            .and_then(Value::as_str)
            .ok_or_else(|| protocol(&self.name, "missing content[0].text"))?
            .to_string();
        let usage = LlmUsage {
            prompt_tokens: value
                .pointer("/usage/input_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            completion_tokens: value
                .pointer("/usage/output_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            total_tokens: 0,
        };
        Ok(self.completion(text, fill_total(usage)))
    }

    async fn generate_gemini(&self, envelope: &PromptEnvelope) -> Result<Completion, LlmError> {
        let contents: Vec<Value> = envelope
            .messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::Assistant => "model",
                    _ => "user",
                };
                json!({"role": role, "parts": [{"text": m.content}]})
            })
            .collect();

        let body = json!({
            "systemInstruction": {"parts": [{"text": envelope.system_prompt}]},
            "contents": contents,
            "generationConfig": {
                "temperature": envelope.params.temperature,
                "maxOutputTokens": envelope.params.max_tokens,
            },
        });

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.endpoint,
            self.model,
            self.api_key()?
        );
        let value = self
            .send(self.client.post(url).json(&body), self.request_timeout(envelope))
            .await?;

        let text = value
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
            .ok_or_else(|| protocol(&self.name, "missing candidates[0].content.parts[0].text"))?
            .to_string();
        let usage = LlmUsage {
            prompt_tokens: value
                .pointer("/usageMetadata/promptTokenCount")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            completion_tokens: value
                .pointer("/usageMetadata/candidatesTokenCount")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            total_tokens: value
                .pointer("/usageMetadata/totalTokenCount")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        };
        Ok(self.completion(text, usage))
    }

    async fn generate_custom(&self, envelope: &PromptEnvelope) -> Result<Completion, LlmError> {
        let body = json!({
            "prompt": envelope.flattened(),
            "temperature": envelope.params.temperature,
            "maxTokens": envelope.params.max_tokens,
        });
        let value = self
            .send(
                self.client.post(&self.endpoint).json(&body),
                self.request_timeout(envelope),
            )
            .await?;

        let text = value
            .get("text")
            .or_else(|| value.get("response"))
            .and_then(Value::as_str)
            .ok_or_else(|| protocol(&self.name, "missing `text`/`response` field"))?
            .to_string();
        Ok(self.completion(text, LlmUsage::default()))
    }

    fn completion(&self, text: String, usage: LlmUsage) -> Completion {
        Completion {
            text,
            usage,
            provider_name: self.name.clone(),
        }
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn generate(&self, envelope: &PromptEnvelope) -> Result<Completion, LlmError> {
        tracing::debug!(
            provider = %self.name,
            kind = ?self.kind,
            model = %self.model,
            messages = envelope.messages.len(),
            "Calling provider"
        );
        match self.kind {
            ProviderKind::OllamaCompatible => self.generate_ollama(envelope).await,
            ProviderKind::OpenAiCompatible => self.generate_openai(envelope).await,
            ProviderKind::AnthropicCompatible => self.generate_anthropic(envelope).await,
            ProviderKind::GeminiCompatible => self.generate_gemini(envelope).await,
            ProviderKind::CustomHttp => self.generate_custom(envelope).await,
        }
    }

    async fn probe(&self) -> Result<(), LlmError> {
        let timeout = Duration::from_millis(self.default_timeout_ms.min(self.max_timeout_ms));
        match self.kind {
            ProviderKind::OllamaCompatible => {
                self.send(
                    self.client.get(format!("{}/api/tags", self.endpoint)),
                    timeout,
                )
                .await
                .map(|_| ())
            }
            ProviderKind::OpenAiCompatible => {
                self.send(
                    self.client
                        .get(format!("{}/models", self.endpoint))
                        .bearer_auth(self.api_key()?),
                    timeout,
                )
                .await
                .map(|_| ())
            }
            ProviderKind::AnthropicCompatible => {
                let body = json!({
                    "model": self.model,
                    "max_tokens": 1,
                    "messages": [{"role": "user", "content": "ping"}],
                });
                self.send(
                    self.client
                        .post(format!("{}/v1/messages", self.endpoint))
                        .header("x-api-key", self.api_key()?)
                        .header("anthropic-version", "2023-06-01")
                        .json(&body),
                    timeout,
                )
                .await
                .map(|_| ())
            }
            ProviderKind::GeminiCompatible => {
                self.send(
                    self.client.get(format!(
                        "{}/v1beta/models?key={}",
                        self.endpoint,
                        self.api_key()?
                    )),
                    timeout,
                )
                .await
                .map(|_| ())
            }
            ProviderKind::CustomHttp => self
                .send(self.client.get(&self.endpoint), timeout)
                .await
                .map(|_| ()),
        }
    }
}

fn role_name(message: &ChatMessage) -> &'static str {
    match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

fn fill_total(mut usage: LlmUsage) -> LlmUsage {
    usage.total_tokens = usage.prompt_tokens + usage.completion_tokens;
    usage
}

fn protocol(name: &str, detail: &str) -> LlmError {
    LlmError::Protocol(format!("{}: {}", name, detail))
}

fn classify_transport_error(name: &str, error: reqwest::Error) -> LlmError {
    if error.is_timeout() {
        LlmError::Timeout(format!("{}: {}", name, error))
    } else if error.is_connect() {
        LlmError::Unavailable(format!("{}: {}", name, error))
    } else {
        LlmError::Protocol(format!("{}: {}", name, error))
    }
}

fn classify_status(name: &str, status: reqwest::StatusCode, body: &str) -> LlmError {
    let detail = format!("{}: HTTP {} {}", name, status.as_u16(), truncate(body, 200));
    match status.as_u16() {
        408 => LlmError::Timeout(detail),
        429 => LlmError::RateLimited(detail),
        400..=499 => LlmError::BadRequest(detail),
        _ => LlmError::Unavailable(detail),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect::<String>() + "…"
    }
}

// =============================================================================
// Mock Provider for Testing
// =============================================================================

/// Scripted provider for tests: either returns a fixed response or fails
/// with a chosen error kind.
pub struct MockProvider {
    name: String,
    response: String,
    failure: Option<fn(String) -> LlmError>,
    pub calls: std::sync::atomic::AtomicU32,
}

impl MockProvider {
    pub fn new(name: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            response: response.into(),
            failure: None,
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    pub fn unavailable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            response: String::new(),
            failure: Some(LlmError::Unavailable),
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    pub fn bad_request(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            response: String::new(),
            failure: Some(LlmError::BadRequest),
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::CustomHttp
    }

    async fn generate(&self, _envelope: &PromptEnvelope) -> Result<Completion, LlmError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        match self.failure {
            Some(make_error) => Err(make_error(format!("mock failure from {}", self.name))),
            None => Ok(Completion {
                text: self.response.clone(),
                usage: LlmUsage::default(),
                provider_name: self.name.clone(),
            }),
        }
    }

    async fn probe(&self) -> Result<(), LlmError> {
        match self.failure {
            Some(make_error) => Err(make_error(format!("mock probe failure from {}", self.name))),
            None => Ok(()),
        }
    }
}
