// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Ollama backend for local vision models

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::transport::Transport;
use super::ClassificationRequest;
use crate::config::AppConfig;
use crate::{Result, SortError};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    images: Vec<&'a str>,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct ModelInfo {
    name: String,
}

/// One fixed Ollama server; a single attempt per request
pub struct LocalBackend {
    transport: Arc<dyn Transport>,
    base_url: String,
    model: String,
    timeout: Duration,
    temperature: f32,
    max_tokens: u32,
}

impl LocalBackend {
    pub fn new(transport: Arc<dyn Transport>, config: &AppConfig) -> Self {
        // Accept either the server root or a full endpoint URL.
        let base_url = config
            .local
            .url
            .trim_end_matches('/')
            .replace("/api/generate", "")
            .replace("/api/chat", "");

        Self {
            transport,
            base_url,
            model: config.local.model.clone(),
            timeout: Duration::from_secs(config.local.timeout_secs),
            temperature: config.classify.temperature,
            max_tokens: config.classify.max_tokens,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn classify(&self, request: &ClassificationRequest) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &self.model,
            prompt: &request.prompt,
            stream: false,
            images: request.image_base64.iter().map(String::as_str).collect(),
            options: GenerateOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };
        let body = serde_json::to_value(&body)?;

        debug!("Sending vision request to Ollama: model={}", self.model);
        let text = self
            .transport
            .post_json(&url, None, &body, self.timeout)
            .await?
            .into_success()?;

        let reply: GenerateResponse = serde_json::from_str(&text)
            .map_err(|e| SortError::Parse(format!("unexpected Ollama reply: {}", e)))?;
        Ok(reply.response)
    }

    /// Probe `/api/tags`; any failure is reported as [`SortError::Unavailable`]
    pub async fn health_check(&self) -> Result<()> {
        self.fetch_tags().await.map(|_| ())
    }

    pub async fn list_models(&self) -> Result<Vec<String>> {
        let tags = self.fetch_tags().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn fetch_tags(&self) -> Result<TagsResponse> {
        let url = format!("{}/api/tags", self.base_url);
        let unavailable = |detail: String| {
            SortError::Unavailable(format!("Cannot reach Ollama at {}: {}", self.base_url, detail))
        };

        let text = self
            .transport
            .get(&url, HEALTH_TIMEOUT)
            .await
            .and_then(|reply| reply.into_success())
            .map_err(|e| unavailable(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::fake::{reply, FakeTransport};

    fn backend(fake: Arc<FakeTransport>) -> LocalBackend {
        let mut config = AppConfig::default();
        config.local.url = "http://localhost:11434/api/generate/".to_string();
        LocalBackend::new(fake, &config)
    }

    fn request() -> ClassificationRequest {
        ClassificationRequest {
            prompt: "what is it".to_string(),
            image_base64: Some("aGVsbG8=".to_string()),
        }
    }

    #[tokio::test]
    async fn test_classify_reads_response_field() {
        let fake = Arc::new(FakeTransport::always(200, r#"{"response": "pets", "done": true}"#));
        let backend = backend(fake.clone());

        assert_eq!(backend.classify(&request()).await.unwrap(), "pets");

        let sent = fake.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].url, "http://localhost:11434/api/generate");
        assert_eq!(sent[0].body["images"][0], "aGVsbG8=");
        assert_eq!(sent[0].body["stream"], false);
        assert!(sent[0].bearer.is_none());
    }

    #[tokio::test]
    async fn test_single_attempt_on_server_error() {
        let fake = Arc::new(FakeTransport::always(500, "model not loaded"));
        let backend = backend(fake.clone());

        let err = backend.classify(&request()).await.unwrap_err();
        assert!(matches!(err, SortError::Server { status: 500, .. }));
        assert_eq!(fake.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_health_check_maps_to_unavailable() {
        let fake = Arc::new(FakeTransport::scripted(vec![Err(SortError::Transport(
            "connection refused".to_string(),
        ))]));
        let err = backend(fake).health_check().await.unwrap_err();
        assert!(matches!(err, SortError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_list_models() {
        let fake = Arc::new(FakeTransport::scripted(vec![Ok(reply(
            200,
            r#"{"models": [{"name": "llava:7b"}, {"name": "moondream:latest"}]}"#,
        ))]));
        let models = backend(fake).list_models().await.unwrap();
        assert_eq!(models, vec!["llava:7b", "moondream:latest"]);
    }
}
