//! Completion Client
//!
//! One narrow capability, `complete(prompt) -> text`, with interchangeable
//! providers behind it. Nothing here retries; the orchestrator owns retry
//! policy and budget.

use crate::error::{AgentError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAi,
    AzureOpenAi,
    Gemini,
    /// In-process stand-in used by tests and dry runs
    Scripted,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::AzureOpenAi => write!(f, "azure_openai"),
            ProviderKind::Gemini => write!(f, "gemini"),
            ProviderKind::Scripted => write!(f, "scripted"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "azure_openai" | "azure" => Ok(ProviderKind::AzureOpenAi),
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            other => Err(AgentError::Config(format!("unknown LLM provider '{}'", other))),
        }
    }
}

/// Per-call model parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: 1500,
        }
    }
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn provider(&self) -> ProviderKind;

    /// Send one prompt and return the raw response text.
    ///
    /// Fails with `ProviderUnavailable` on transport or provider errors and
    /// with `Timeout` when the HTTP call times out.
    async fn complete(&self, prompt: &str, config: &CompletionConfig) -> Result<String>;
}

const SYSTEM_PROMPT: &str =
    "You are a precise JSON-only responder. Always return valid JSON, no other text.";

/// HTTP client for the supported hosted providers.
pub struct HttpCompletionClient {
    provider: ProviderKind,
    api_key: String,
    base_url: String,
    api_version: Option<String>,
    http: reqwest::Client,
}

impl HttpCompletionClient {
    pub fn new(
        provider: ProviderKind,
        api_key: String,
        base_url: String,
        api_version: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        if provider == ProviderKind::Scripted {
            return Err(AgentError::Config(
                "scripted provider has no HTTP client".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AgentError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            provider,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version,
            http,
        })
    }

    pub fn from_config(config: &crate::config::LlmConfig, request_timeout: Duration) -> Result<Self> {
        Self::new(
            config.provider,
            config.api_key.clone(),
            config.base_url.clone(),
            config.api_version.clone(),
            request_timeout,
        )
    }

    fn request(&self, prompt: &str, config: &CompletionConfig) -> Result<reqwest::RequestBuilder> {
        let messages = serde_json::json!([
            {"role": "system", "content": SYSTEM_PROMPT},
            {"role": "user", "content": prompt}
        ]);

        let builder = match self.provider {
            ProviderKind::OpenAi => self
                .http
                .post(format!("{}/chat/completions", self.base_url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&serde_json::json!({
                    "model": config.model,
                    "messages": messages,
                    "temperature": config.temperature,
                    "max_tokens": config.max_tokens
                })),
            ProviderKind::AzureOpenAi => {
                let api_version = self.api_version.as_deref().ok_or_else(|| {
                    AgentError::Config("Azure OpenAI requires an api version".to_string())
                })?;
                self.http
                    .post(format!(
                        "{}/openai/deployments/{}/chat/completions?api-version={}",
                        self.base_url, config.model, api_version
                    ))
                    .header("api-key", &self.api_key)
                    .json(&serde_json::json!({
                        "messages": messages,
                        "temperature": config.temperature,
                        "max_tokens": config.max_tokens
                    }))
            }
            ProviderKind::Gemini => self
                .http
                .post(format!(
                    "{}/models/{}:generateContent",
                    self.base_url, config.model
                ))
                .header("x-goog-api-key", &self.api_key)
                .json(&serde_json::json!({
                    "systemInstruction": {"parts": [{"text": SYSTEM_PROMPT}]},
                    "contents": [{"role": "user", "parts": [{"text": prompt}]}],
                    "generationConfig": {
                        "temperature": config.temperature,
                        "maxOutputTokens": config.max_tokens
                    }
                })),
            ProviderKind::Scripted => {
                return Err(AgentError::Config(
                    "scripted provider has no HTTP client".to_string(),
                ))
            }
        };

        Ok(builder.header("Content-Type", "application/json"))
    }

    fn extract_content(&self, body: &serde_json::Value) -> Option<String> {
        let content = match self.provider {
            ProviderKind::Gemini => body["candidates"][0]["content"]["parts"][0]["text"].as_str(),
            _ => body["choices"][0]["message"]["content"].as_str(),
        };
        content.map(str::to_string)
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    async fn complete(&self, prompt: &str, config: &CompletionConfig) -> Result<String> {
        debug!(provider = %self.provider, model = %config.model, "Sending completion request");

        let response = self
            .request(prompt, config)?
            .send()
            .await
            .map_err(|e| transport_error(self.provider, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(provider = %self.provider, %status, "Provider returned an error status");
            return Err(AgentError::ProviderUnavailable(format!(
                "{} returned {}: {}",
                self.provider,
                status,
                truncate(&body, 200)
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| transport_error(self.provider, e))?;

        let content = self.extract_content(&body).ok_or_else(|| {
            AgentError::ProviderUnavailable(format!("{} response had no content", self.provider))
        })?;

        debug!(provider = %self.provider, chars = content.len(), "Received completion");
        Ok(content)
    }
}

fn transport_error(provider: ProviderKind, e: reqwest::Error) -> AgentError {
    if e.is_timeout() {
        AgentError::Timeout(format!("{} completion", provider))
    } else {
        AgentError::ProviderUnavailable(format!("{} call failed: {}", provider, e))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

/// Caps in-flight provider calls across every session sharing this client.
pub struct BoundedCompletionClient {
    inner: Arc<dyn CompletionClient>,
    semaphore: Arc<Semaphore>,
}

impl BoundedCompletionClient {
    pub fn new(inner: Arc<dyn CompletionClient>, max_concurrent: usize) -> Self {
        Self {
            inner,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[async_trait]
impl CompletionClient for BoundedCompletionClient {
    fn provider(&self) -> ProviderKind {
        self.inner.provider()
    }

    async fn complete(&self, prompt: &str, config: &CompletionConfig) -> Result<String> {
        let _permit = self.semaphore.acquire().await.map_err(|_| {
            AgentError::ProviderUnavailable("completion limiter closed".to_string())
        })?;
        self.inner.complete(prompt, config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowClient {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl CompletionClient for SlowClient {
        fn provider(&self) -> ProviderKind {
            ProviderKind::Scripted
        }

        async fn complete(&self, _prompt: &str, _config: &CompletionConfig) -> Result<String> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok("{}".to_string())
        }
    }

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!("openai".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!("Azure_OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::AzureOpenAi);
        assert_eq!("gemini".parse::<ProviderKind>().unwrap(), ProviderKind::Gemini);
        assert!(matches!("ollama".parse::<ProviderKind>(), Err(AgentError::Config(_))));
    }

    #[tokio::test]
    async fn test_bounded_client_limits_concurrency() {
        let inner = Arc::new(SlowClient {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let bounded = Arc::new(BoundedCompletionClient::new(inner.clone(), 2));
        let config = CompletionConfig::default();

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let client = bounded.clone();
                let config = config.clone();
                tokio::spawn(async move { client.complete("prompt", &config).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(inner.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(bounded.available_permits(), 2);
    }

    #[test]
    fn test_scripted_provider_has_no_http_client() {
        let result = HttpCompletionClient::new(
            ProviderKind::Scripted,
            "key".to_string(),
            "http://localhost".to_string(),
            None,
            Duration::from_secs(1),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_extract_content_per_provider() {
        let gemini = HttpCompletionClient::new(
            ProviderKind::Gemini,
            "key".to_string(),
            "http://localhost/".to_string(),
            None,
            Duration::from_secs(1),
        )
        .unwrap();
        let body = serde_json::json!({"candidates": [{"content": {"parts": [{"text": "{\"a\":1}"}]}}]});
        assert_eq!(gemini.extract_content(&body).as_deref(), Some("{\"a\":1}"));

        let openai = HttpCompletionClient::new(
            ProviderKind::OpenAi,
            "key".to_string(),
            "http://localhost".to_string(),
            None,
            Duration::from_secs(1),
        )
        .unwrap();
        let body = serde_json::json!({"choices": [{"message": {"content": "SELECT 1"}}]});
        assert_eq!(openai.extract_content(&body).as_deref(), Some("SELECT 1"));
        assert!(openai.extract_content(&serde_json::json!({})).is_none());
    }
}
