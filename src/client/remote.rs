// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! OpenAI-compatible chat-completions backend spread over several models

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::transport::Transport;
use super::ClassificationRequest;
use crate::balancer::{BalancerSettings, EndpointBalancer};
use crate::config::AppConfig;
use crate::{Result, SortError};

const PROBE_MAX_TOKENS: u32 = 10;

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct RemoteBackend {
    transport: Arc<dyn Transport>,
    balancer: Arc<EndpointBalancer>,
    url: String,
    api_key: String,
    timeout: Duration,
    max_attempts: u32,
    retry_delay: Duration,
    max_tokens: u32,
    temperature: f32,
}

impl RemoteBackend {
    pub fn new(transport: Arc<dyn Transport>, config: &AppConfig) -> Result<Self> {
        let remote = &config.remote;
        if remote.models.is_empty() {
            return Err(SortError::Config("remote backend needs at least one model".to_string()));
        }
        let balancer = EndpointBalancer::new(remote.models.clone(), BalancerSettings::from_config(remote));

        Ok(Self {
            transport,
            balancer: Arc::new(balancer),
            url: remote.url.clone(),
            api_key: remote.api_key.trim().to_string(),
            timeout: remote.timeout(),
            max_attempts: remote.max_attempts(),
            retry_delay: Duration::from_secs(remote.retry.delay_secs),
            max_tokens: config.classify.max_tokens,
            temperature: config.classify.temperature,
        })
    }

    pub fn balancer(&self) -> &Arc<EndpointBalancer> {
        &self.balancer
    }

    fn bearer(&self) -> Result<&str> {
        if self.api_key.is_empty() {
            Err(SortError::AuthMissing)
        } else {
            Ok(&self.api_key)
        }
    }

    /// Classify on the least-loaded model, retrying transport and server errors
    ///
    /// The endpoint slot is held across all attempts and released once.
    pub async fn classify(&self, request: &ClassificationRequest) -> Result<String> {
        let token = self.bearer()?;
        let lease = self.balancer.acquire().await;
        let body = chat_body(lease.endpoint(), request, self.max_tokens, self.temperature);

        let mut attempt = 1;
        loop {
            debug!("Remote request to {} (attempt {}/{})", lease.endpoint(), attempt, self.max_attempts);
            match self.send(token, &body, self.timeout).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        "{} failed ({}), retrying in {:?} (attempt {}/{})",
                        lease.endpoint(),
                        e,
                        self.retry_delay,
                        attempt + 1,
                        self.max_attempts
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send(&self, token: &str, body: &Value, timeout: Duration) -> Result<String> {
        let text = self
            .transport
            .post_json(&self.url, Some(token), body, timeout)
            .await?
            .into_success()?;
        extract_content(&text)
    }

    /// Tiny text-only completion against the primary model
    pub async fn health_check(&self) -> Result<()> {
        let token = self.bearer()?;
        let primary = &self.balancer.endpoints()[0];
        let probe = ClassificationRequest {
            prompt: "ping".to_string(),
            image_base64: None,
        };
        let body = chat_body(primary, &probe, PROBE_MAX_TOKENS, self.temperature);

        self.send(token, &body, self.timeout.min(Duration::from_secs(30)))
            .await
            .map(|_| ())
            .map_err(|e| SortError::Unavailable(format!("{} did not answer: {}", primary, e)))
    }

    /// The configured model list, primary first
    pub fn list_models(&self) -> Vec<String> {
        self.balancer.endpoints().to_vec()
    }
}

fn chat_body(model: &str, request: &ClassificationRequest, max_tokens: u32, temperature: f32) -> Value {
    let content = match &request.image_base64 {
        Some(image) => json!([
            { "type": "text", "text": request.prompt },
            {
                "type": "image_url",
                "image_url": { "url": format!("data:image/jpeg;base64,{}", image) }
            }
        ]),
        None => json!(request.prompt),
    };

    json!({
        "model": model,
        "messages": [{ "role": "user", "content": content }],
        "max_tokens": max_tokens,
        "temperature": temperature,
        "stream": false,
    })
}

fn extract_content(text: &str) -> Result<String> {
    let reply: ChatResponse = serde_json::from_str(text)
        .map_err(|e| SortError::Parse(format!("unexpected chat reply: {}", e)))?;
    reply
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| SortError::Parse("chat reply has no content".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::fake::{reply, FakeTransport};

    const OK_BODY: &str = r#"{"choices": [{"message": {"role": "assistant", "content": "food"}}]}"#;

    fn config(models: &[&str], retry: bool) -> AppConfig {
        let mut config = AppConfig::default();
        config.remote.api_key = "sk-test".to_string();
        config.remote.models = models.iter().map(|m| m.to_string()).collect();
        config.remote.retry.enabled = retry;
        config.remote.retry.count = 2;
        config.remote.retry.delay_secs = 0;
        config
    }

    fn request() -> ClassificationRequest {
        ClassificationRequest {
            prompt: "classify".to_string(),
            image_base64: Some("AAAA".to_string()),
        }
    }

    #[tokio::test]
    async fn test_success_sends_image_and_bearer() {
        let fake = Arc::new(FakeTransport::always(200, OK_BODY));
        let backend = RemoteBackend::new(fake.clone(), &config(&["m1"], true)).unwrap();

        assert_eq!(backend.classify(&request()).await.unwrap(), "food");

        let sent = fake.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].bearer.as_deref(), Some("sk-test"));
        assert_eq!(sent[0].body["model"], "m1");
        assert_eq!(
            sent[0].body["messages"][0]["content"][1]["image_url"]["url"],
            "data:image/jpeg;base64,AAAA"
        );
        assert_eq!(backend.balancer().active("m1"), 0);
    }

    #[tokio::test]
    async fn test_missing_key_is_auth_missing() {
        let mut cfg = config(&["m1"], true);
        cfg.remote.api_key = "  ".to_string();
        let fake = Arc::new(FakeTransport::always(200, OK_BODY));
        let backend = RemoteBackend::new(fake.clone(), &cfg).unwrap();

        assert!(matches!(backend.classify(&request()).await, Err(SortError::AuthMissing)));
        assert!(fake.sent().is_empty());
        assert_eq!(backend.balancer().active("m1"), 0);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let fake = Arc::new(FakeTransport::scripted(vec![
            Err(SortError::Transport("timed out".to_string())),
            Ok(reply(502, "bad gateway")),
            Ok(reply(200, OK_BODY)),
        ]));
        let backend = RemoteBackend::new(fake.clone(), &config(&["m1"], true)).unwrap();

        assert_eq!(backend.classify(&request()).await.unwrap(), "food");
        assert_eq!(fake.sent().len(), 3);
        assert_eq!(backend.balancer().active("m1"), 0);
    }

    #[tokio::test]
    async fn test_retries_exhausted_reports_last_error() {
        let fake = Arc::new(FakeTransport::always(500, "overloaded"));
        let backend = RemoteBackend::new(fake.clone(), &config(&["m1", "m2"], true)).unwrap();

        let err = backend.classify(&request()).await.unwrap_err();
        assert!(matches!(err, SortError::Server { status: 500, .. }));
        assert_eq!(fake.sent().len(), 3);
        assert!(backend.balancer().snapshot().iter().all(|(_, c)| *c == 0));
    }

    #[tokio::test]
    async fn test_retry_disabled_makes_one_attempt() {
        let fake = Arc::new(FakeTransport::always(503, "busy"));
        let backend = RemoteBackend::new(fake.clone(), &config(&["m1"], false)).unwrap();

        assert!(backend.classify(&request()).await.is_err());
        assert_eq!(fake.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_parse_error_is_not_retried() {
        let fake = Arc::new(FakeTransport::always(200, r#"{"choices": []}"#));
        let backend = RemoteBackend::new(fake.clone(), &config(&["m1"], true)).unwrap();

        assert!(matches!(backend.classify(&request()).await, Err(SortError::Parse(_))));
        assert_eq!(fake.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_health_check_uses_primary_text_only() {
        let fake = Arc::new(FakeTransport::always(200, OK_BODY));
        let backend = RemoteBackend::new(fake.clone(), &config(&["primary", "backup"], true)).unwrap();

        backend.health_check().await.unwrap();
        let sent = fake.sent();
        assert_eq!(sent[0].body["model"], "primary");
        assert_eq!(sent[0].body["max_tokens"], 10);
        assert!(sent[0].body["messages"][0]["content"].is_string());
    }

    #[tokio::test]
    async fn test_health_check_failure_is_unavailable() {
        let fake = Arc::new(FakeTransport::always(401, "invalid key"));
        let backend = RemoteBackend::new(fake, &config(&["m1"], true)).unwrap();
        assert!(matches!(backend.health_check().await, Err(SortError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_concurrent_requests_spread_across_models() {
        let fake = Arc::new(FakeTransport::always(200, OK_BODY).with_delay(Duration::from_millis(20)));
        let mut cfg = config(&["a", "b"], true);
        cfg.remote.endpoint_cap = 1;
        let backend = Arc::new(RemoteBackend::new(fake.clone(), &cfg).unwrap());

        let mut tasks = Vec::new();
        for _ in 0..2 {
            let backend = backend.clone();
            tasks.push(tokio::spawn(async move { backend.classify(&request()).await }));
        }
        for task in tasks {
            tokio_test::assert_ok!(task.await.unwrap());
        }

        let mut models: Vec<String> = fake
            .sent()
            .iter()
            .map(|s| s.body["model"].as_str().unwrap_or_default().to_string())
            .collect();
        models.sort();
        assert_eq!(models, vec!["a", "b"]);
    }
}
