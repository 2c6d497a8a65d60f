//! Provider selection and fallback.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use opsmith_core::config::LlmConfig;
use opsmith_core::{
    Completion, LlmError, LlmProvider, PromptEnvelope, ProviderHealth, ProviderSnapshot,
};

use crate::providers::HttpProvider;

/// Tracked runtime state for one provider.
#[derive(Debug, Clone)]
struct ProviderStatus {
    health: ProviderHealth,
    consecutive_failures: u32,
    last_check: Option<DateTime<Utc>>,
}

impl ProviderStatus {
    fn new() -> Self {
        Self {
            health: ProviderHealth::Unknown,
            consecutive_failures: 0,
            last_check: None,
        }
    }
}

/// Uniform request fan-out over the configured provider backends.
///
/// Selection order: the preferred provider when eligible, then the
/// configured order. A provider is eligible while its last health sample is
/// `healthy` or `unknown`. Availability-class failures mark the provider
/// degraded and advance the chain; repeated failures mark it unavailable
/// until a probe brings it back.
pub struct ProviderGateway {
    providers: Vec<Arc<dyn LlmProvider>>,
    status: DashMap<String, ProviderStatus>,
    preferred: Option<String>,
    max_fallbacks: u32,
    unavailable_after: u32,
}

impl ProviderGateway {
    pub fn new(
        providers: Vec<Arc<dyn LlmProvider>>,
        preferred: Option<String>,
        max_fallbacks: u32,
        unavailable_after: u32,
    ) -> Self {
        let status = DashMap::new();
        for provider in &providers {
            status.insert(provider.name().to_string(), ProviderStatus::new());
        }
        Self {
            providers,
            status,
            preferred,
            max_fallbacks: max_fallbacks.max(1),
            unavailable_after: unavailable_after.max(1),
        }
    }

    /// Build the gateway from the typed configuration.
    pub fn from_config(config: &LlmConfig) -> Self {
        let providers: Vec<Arc<dyn LlmProvider>> = config
            .ordered_providers
            .iter()
            .map(|entry| {
                Arc::new(HttpProvider::from_entry(
                    entry,
                    config.timeout_ms,
                    config.provider_max_timeout_ms,
                )) as Arc<dyn LlmProvider>
            })
            .collect();
        Self::new(
            providers,
            config.provider.clone(),
            config.max_fallbacks,
            config.unavailable_after,
        )
    }

    fn eligible(&self, name: &str) -> bool {
        self.status
            .get(name)
            .map(|status| {
                matches!(
                    status.health,
                    ProviderHealth::Healthy | ProviderHealth::Unknown
                )
            })
            .unwrap_or(false)
    }

    /// Candidate providers in selection order for one generation.
    fn candidates(&self, envelope: &PromptEnvelope) -> Vec<Arc<dyn LlmProvider>> {
        let preferred = envelope
            .preferred_provider
            .as_deref()
            .or(self.preferred.as_deref());

        let mut ordered: Vec<Arc<dyn LlmProvider>> = Vec::new();
        if let Some(name) = preferred {
            if self.eligible(name) {
                if let Some(provider) = self.providers.iter().find(|p| p.name() == name) {
                    ordered.push(provider.clone());
                }
            }
        }
        for provider in &self.providers {
            if ordered.iter().any(|p| p.name() == provider.name()) {
                continue;
            }
            if self.eligible(provider.name()) {
                ordered.push(provider.clone());
            }
        }
        ordered.truncate(self.max_fallbacks as usize);
        ordered
    }

    /// Run one generation through the fallback chain.
    pub async fn generate(&self, envelope: &PromptEnvelope) -> Result<Completion, LlmError> {
        let candidates = self.candidates(envelope);
        if candidates.is_empty() {
            return Err(LlmError::Unavailable(
                "no healthy provider configured".into(),
            ));
        }

        let mut last_error = None;
        for provider in candidates {
            match provider.generate(envelope).await {
                Ok(completion) => {
                    self.record_success(provider.name());
                    return Ok(completion);
                }
                Err(error) if error.is_retriable() => {
                    tracing::warn!(
                        provider = provider.name(),
                        error = %error,
                        "Provider failed; advancing fallback chain"
                    );
                    self.record_failure(provider.name());
                    last_error = Some(error);
                }
                // a malformed request fails the same way everywhere
                Err(error) => return Err(error),
            }
        }

        Err(LlmError::Unavailable(format!(
            "all providers exhausted (last error: {})",
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    pub fn record_success(&self, name: &str) {
        if let Some(mut status) = self.status.get_mut(name) {
            status.health = ProviderHealth::Healthy;
            status.consecutive_failures = 0;
            status.last_check = Some(Utc::now());
        }
    }

    pub fn record_failure(&self, name: &str) {
        if let Some(mut status) = self.status.get_mut(name) {
            status.consecutive_failures += 1;
            status.health = if status.consecutive_failures >= self.unavailable_after {
                ProviderHealth::Unavailable
            } else {
                ProviderHealth::Degraded
            };
            status.last_check = Some(Utc::now());
            if status.health == ProviderHealth::Unavailable {
                tracing::warn!(provider = name, "Provider marked unavailable");
            }
        }
    }

    /// Probe every provider once and fold the results into health state.
    pub async fn probe_all(&self, timeout: std::time::Duration) {
        for provider in &self.providers {
            let outcome = tokio::time::timeout(timeout, provider.probe()).await;
            match outcome {
                Ok(Ok(())) => self.record_success(provider.name()),
                Ok(Err(error)) => {
                    tracing::debug!(provider = provider.name(), %error, "Health probe failed");
                    self.record_failure(provider.name());
                }
                Err(_) => {
                    tracing::debug!(provider = provider.name(), "Health probe timed out");
                    self.record_failure(provider.name());
                }
            }
        }
    }

    /// Snapshot of every provider's health. Stale reads are acceptable;
    /// selection re-validates on failure.
    pub fn snapshots(&self) -> Vec<ProviderSnapshot> {
        self.providers
            .iter()
            .map(|provider| {
                let status = self
                    .status
                    .get(provider.name())
                    .map(|s| s.clone())
                    .unwrap_or_else(ProviderStatus::new);
                ProviderSnapshot {
                    name: provider.name().to_string(),
                    kind: provider.kind(),
                    health: status.health,
                    last_check: status.last_check,
                }
            })
            .collect()
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockProvider;
    use opsmith_core::{ChatMessage, Role};

    fn envelope() -> PromptEnvelope {
        PromptEnvelope {
            system_prompt: "s".into(),
            messages: vec![ChatMessage::new(Role::User, "hello")],
            params: Default::default(),
            preferred_provider: None,
        }
    }

    fn gateway_with(providers: Vec<Arc<dyn LlmProvider>>) -> ProviderGateway {
        ProviderGateway::new(providers, None, 3, 3)
    }

    #[tokio::test]
    async fn test_first_healthy_provider_wins() {
        let gateway = gateway_with(vec![
            Arc::new(MockProvider::new("a", "from a")),
            Arc::new(MockProvider::new("b", "from b")),
        ]);
        let completion = gateway.generate(&envelope()).await.unwrap();
        assert_eq!(completion.provider_name, "a");
    }

    #[tokio::test]
    async fn test_fallback_past_unavailable_provider() {
        let gateway = gateway_with(vec![
            Arc::new(MockProvider::unavailable("down")),
            Arc::new(MockProvider::new("up", "rescued")),
        ]);
        let completion = gateway.generate(&envelope()).await.unwrap();
        assert_eq!(completion.provider_name, "up");

        // the failing provider was marked degraded
        let snapshot = gateway
            .snapshots()
            .into_iter()
            .find(|s| s.name == "down")
            .unwrap();
        assert_eq!(snapshot.health, ProviderHealth::Degraded);
    }

    #[tokio::test]
    async fn test_all_providers_exhausted() {
        let gateway = gateway_with(vec![
            Arc::new(MockProvider::unavailable("x")),
            Arc::new(MockProvider::unavailable("y")),
        ]);
        let result = gateway.generate(&envelope()).await;
        assert!(matches!(result, Err(LlmError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_no_providers_configured() {
        let gateway = gateway_with(vec![]);
        assert!(matches!(
            gateway.generate(&envelope()).await,
            Err(LlmError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_bad_request_does_not_advance_chain() {
        let second = Arc::new(MockProvider::new("second", "never called"));
        let gateway = gateway_with(vec![
            Arc::new(MockProvider::bad_request("first")),
            second.clone(),
        ]);
        let result = gateway.generate(&envelope()).await;
        assert!(matches!(result, Err(LlmError::BadRequest(_))));
        assert_eq!(second.calls.load(std::sync::atomic::Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_preferred_provider_tried_first() {
        let gateway = ProviderGateway::new(
            vec![
                Arc::new(MockProvider::new("a", "from a")),
                Arc::new(MockProvider::new("b", "from b")),
            ],
            Some("b".into()),
            3,
            3,
        );
        let completion = gateway.generate(&envelope()).await.unwrap();
        assert_eq!(completion.provider_name, "b");
    }

    #[tokio::test]
    async fn test_repeated_failures_mark_unavailable() {
        let gateway = ProviderGateway::new(
            vec![Arc::new(MockProvider::unavailable("flaky"))],
            None,
            1,
            2,
        );
        let _ = gateway.generate(&envelope()).await;
        let _ = gateway.generate(&envelope()).await;

        let snapshot = gateway.snapshots().pop().unwrap();
        assert_eq!(snapshot.health, ProviderHealth::Unavailable);

        // an unavailable provider is no longer a candidate
        assert!(matches!(
            gateway.generate(&envelope()).await,
            Err(LlmError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_probe_restores_health() {
        let gateway = gateway_with(vec![Arc::new(MockProvider::new("p", "pong"))]);
        gateway.record_failure("p");
        gateway.record_failure("p");
        gateway.record_failure("p");
        assert_eq!(gateway.snapshots()[0].health, ProviderHealth::Unavailable);

        gateway.probe_all(std::time::Duration::from_millis(200)).await;
        assert_eq!(gateway.snapshots()[0].health, ProviderHealth::Healthy);
    }
}
