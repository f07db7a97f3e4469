// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! HTTP seam between the backends and the network

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use crate::{Result, SortError};

/// Status and body of a completed HTTP exchange
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx reply into [`SortError::Server`]
    pub fn into_success(self) -> Result<String> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(SortError::Server {
                status: self.status,
                body: self.body,
            })
        }
    }
}

/// Anything that can carry a JSON request to a backend
///
/// Network failures and timeouts map to [`SortError::Transport`]; any reply,
/// even a 500, comes back as `Ok`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &Value,
        timeout: Duration,
    ) -> Result<HttpReply>;

    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpReply>;
}

/// [`Transport`] over a shared `reqwest::Client`
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }

    async fn finish(response: reqwest::Response) -> Result<HttpReply> {
        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport_error)?;
        Ok(HttpReply { status, body })
    }
}

fn transport_error(e: reqwest::Error) -> SortError {
    if e.is_timeout() {
        SortError::Transport(format!("request timed out: {}", e))
    } else {
        SortError::Transport(e.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn post_json(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &Value,
        timeout: Duration,
    ) -> Result<HttpReply> {
        let mut request = self.client.post(url).timeout(timeout).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(transport_error)?;
        Self::finish(response).await
    }

    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpReply> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(transport_error)?;
        Self::finish(response).await
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted transport for backend and pipeline tests

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub struct SentRequest {
        pub url: String,
        pub bearer: Option<String>,
        pub body: Value,
    }

    /// Pops one scripted result per call; repeats `fallback` when the script runs dry
    pub struct FakeTransport {
        script: Mutex<VecDeque<Result<HttpReply>>>,
        fallback: Option<HttpReply>,
        pub sent: Mutex<Vec<SentRequest>>,
        pub delay: Duration,
    }

    impl FakeTransport {
        pub fn scripted(script: Vec<Result<HttpReply>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback: None,
                sent: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }

        pub fn always(status: u16, body: impl Into<String>) -> Self {
            let mut fake = Self::scripted(Vec::new());
            fake.fallback = Some(reply(status, body));
            fake
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn sent(&self) -> Vec<SentRequest> {
            self.sent.lock().unwrap().clone()
        }

        fn next(&self, url: &str, bearer: Option<&str>, body: Value) -> Result<HttpReply> {
            self.sent.lock().unwrap().push(SentRequest {
                url: url.to_string(),
                bearer: bearer.map(String::from),
                body,
            });
            match self.script.lock().unwrap().pop_front() {
                Some(result) => result,
                None => match &self.fallback {
                    Some(reply) => Ok(reply.clone()),
                    None => Err(SortError::Transport("script exhausted".to_string())),
                },
            }
        }
    }

    pub fn reply(status: u16, body: impl Into<String>) -> HttpReply {
        HttpReply {
            status,
            body: body.into(),
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn post_json(
            &self,
            url: &str,
            bearer: Option<&str>,
            body: &Value,
            _timeout: Duration,
        ) -> Result<HttpReply> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.next(url, bearer, body.clone())
        }

        async fn get(&self, url: &str, _timeout: Duration) -> Result<HttpReply> {
            self.next(url, None, Value::Null)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_success() {
        let ok = HttpReply { status: 200, body: "fine".to_string() };
        assert_eq!(ok.into_success().unwrap(), "fine");

        let bad = HttpReply { status: 503, body: "busy".to_string() };
        match bad.into_success() {
            Err(SortError::Server { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "busy");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
