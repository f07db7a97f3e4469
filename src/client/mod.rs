// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Classification backends
//!
//! [`ClassificationClient`] wraps either a local Ollama server or a remote
//! chat-completions API behind one `classify` call.

pub mod local;
pub mod prompt;
pub mod remote;
pub mod transport;

use std::sync::Arc;

use crate::config::{AppConfig, BackendKind};
use crate::Result;

pub use local::LocalBackend;
pub use remote::RemoteBackend;
pub use transport::{HttpReply, ReqwestTransport, Transport};

/// One prompt plus an optional base64 JPEG
#[derive(Debug, Clone)]
pub struct ClassificationRequest {
    pub prompt: String,
    pub image_base64: Option<String>,
}

impl ClassificationRequest {
    pub fn with_image(prompt: impl Into<String>, image_base64: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            image_base64: Some(image_base64.into()),
        }
    }
}

pub enum ClassificationClient {
    Local(LocalBackend),
    Remote(RemoteBackend),
}

impl ClassificationClient {
    /// Build the backend selected in `config` on top of `transport`
    pub fn from_config(config: &AppConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Ok(match config.backend {
            BackendKind::Local => Self::Local(LocalBackend::new(transport, config)),
            BackendKind::Remote => Self::Remote(RemoteBackend::new(transport, config)?),
        })
    }

    /// Raw model text for one request
    pub async fn classify(&self, request: &ClassificationRequest) -> Result<String> {
        match self {
            Self::Local(backend) => backend.classify(request).await,
            Self::Remote(backend) => backend.classify(request).await,
        }
    }

    pub async fn health_check(&self) -> Result<()> {
        match self {
            Self::Local(backend) => backend.health_check().await,
            Self::Remote(backend) => backend.health_check().await,
        }
    }

    pub async fn list_models(&self) -> Result<Vec<String>> {
        match self {
            Self::Local(backend) => backend.list_models().await,
            Self::Remote(backend) => Ok(backend.list_models()),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::Remote(_) => "remote",
        }
    }
}
