// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for mediasort

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::media::VideoFrameMode;
use crate::organizer::{DateToken, FolderStructure, Operation, TimeSource};

/// Environment variable that overrides `remote.api_key`
pub const API_KEY_ENV: &str = "MEDIASORT_API_KEY";

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Which backend answers classification calls
    #[serde(default)]
    pub backend: BackendKind,

    /// Local server (Ollama) settings
    #[serde(default)]
    pub local: LocalConfig,

    /// Remote OpenAI-compatible API settings
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Category list and prompt
    #[serde(default)]
    pub classify: ClassifyConfig,

    /// Media selection and preparation
    #[serde(default)]
    pub media: MediaConfig,

    /// Destination layout
    #[serde(default)]
    pub organize: OrganizeConfig,

    /// AI-description renaming
    #[serde(default)]
    pub rename: RenameConfig,

    /// Where failing files get copied for inspection
    #[serde(default)]
    pub error_export: ErrorExportConfig,

    /// Fingerprint ledger settings
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Local,
    Remote,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LocalConfig {
    #[serde(default = "default_local_url")]
    pub url: String,
    #[serde(default = "default_local_model")]
    pub model: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RemoteConfig {
    #[serde(default = "default_remote_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    /// Model identifiers; each one is a balancer endpoint. The first is primary.
    #[serde(default = "default_remote_models")]
    pub models: Vec<String>,
    #[serde(default = "default_true")]
    pub round_robin: bool,
    /// In-flight request cap per model
    #[serde(default = "default_endpoint_cap")]
    pub endpoint_cap: usize,
    /// Worker pool size when this backend is active
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_retries")]
    pub count: u32,
    #[serde(default = "default_retry_delay")]
    pub delay_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_base")]
    pub base_delay_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_attempts")]
    pub attempts: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClassifyConfig {
    /// The last entry is the fallback category
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
    /// Template; `{categories}` is replaced with the joined category list
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default = "default_true")]
    pub structured_output: bool,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MediaConfig {
    #[serde(default = "default_true")]
    pub process_images: bool,
    #[serde(default = "default_true")]
    pub process_videos: bool,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default = "default_max_image_size")]
    pub max_image_size: u32,
    #[serde(default = "default_frame_count")]
    pub video_frame_count: u32,
    #[serde(default)]
    pub video_frame_mode: VideoFrameMode,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OrganizeConfig {
    #[serde(default)]
    pub operation: Operation,
    #[serde(default)]
    pub time_source: TimeSource,
    #[serde(default)]
    pub folder_structure: FolderStructure,
    #[serde(default = "default_year_format")]
    pub year_format: String,
    #[serde(default = "default_month_format")]
    pub month_format: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RenameConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Used for the second-pass description call when structured output is off
    #[serde(default = "default_rename_prompt")]
    pub prompt: String,
    #[serde(default)]
    pub include_original: bool,
    #[serde(default)]
    pub date_token: DateToken,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    #[serde(default = "default_description_chars")]
    pub max_description_chars: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ErrorExportConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Relative folders are resolved next to the failing file
    #[serde(default = "default_error_folder")]
    pub folder: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

// Default value functions
fn default_local_url() -> String { "http://localhost:11434".to_string() }
fn default_local_model() -> String { "llava:7b".to_string() }
fn default_remote_url() -> String { "https://api.siliconflow.cn/v1/chat/completions".to_string() }
fn default_remote_models() -> Vec<String> { vec!["Qwen/Qwen3-VL-8B-Instruct".to_string()] }
fn default_timeout() -> u64 { 120 }
fn default_max_concurrent() -> usize { 2 }
fn default_endpoint_cap() -> usize { 2 }
fn default_retries() -> u32 { 3 }
fn default_retry_delay() -> u64 { 2 }
fn default_backoff_base() -> u64 { 500 }
fn default_backoff_max() -> u64 { 10_000 }
fn default_backoff_attempts() -> u32 { 5 }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.3 }
fn default_true() -> bool { true }
fn default_max_image_size() -> u32 { 1920 }
fn default_frame_count() -> u32 { 1 }
fn default_year_format() -> String { "%Y".to_string() }
fn default_month_format() -> String { "%m".to_string() }
fn default_date_format() -> String { "%Y%m%d".to_string() }
fn default_description_chars() -> usize { 30 }
fn default_error_folder() -> String { "error_files".to_string() }
fn default_db_path() -> String { "mediasort.db".to_string() }

fn default_categories() -> Vec<String> {
    [
        "people", "pets", "food", "landscape", "documents", "screenshots",
        "anime", "celebrities", "advertising", "memes", "other",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_prompt() -> String {
    "Classify this image into exactly one of these categories: {categories}. \
     Screenshots, chat bubbles or UI go to screenshots or memes; drawings and game art go to anime; \
     only real photos of people, animals, food or scenery go to those categories. \
     If unsure, answer with the last category. Reply with the category word only.".to_string()
}

fn default_rename_prompt() -> String {
    "Describe the main subject of this image in at most five words. \
     Reply with the description only, no punctuation.".to_string()
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            url: default_local_url(),
            model: default_local_model(),
            timeout_secs: default_timeout(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: default_remote_url(),
            api_key: String::new(),
            models: default_remote_models(),
            round_robin: true,
            endpoint_cap: default_endpoint_cap(),
            max_concurrent: default_max_concurrent(),
            timeout_secs: default_timeout(),
            retry: RetryConfig::default(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            count: default_retries(),
            delay_secs: default_retry_delay(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_backoff_base(),
            max_delay_ms: default_backoff_max(),
            attempts: default_backoff_attempts(),
        }
    }
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            categories: default_categories(),
            prompt: default_prompt(),
            structured_output: true,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            process_images: true,
            process_videos: true,
            recursive: true,
            max_image_size: default_max_image_size(),
            video_frame_count: default_frame_count(),
            video_frame_mode: VideoFrameMode::default(),
        }
    }
}

impl Default for OrganizeConfig {
    fn default() -> Self {
        Self {
            operation: Operation::default(),
            time_source: TimeSource::default(),
            folder_structure: FolderStructure::default(),
            year_format: default_year_format(),
            month_format: default_month_format(),
        }
    }
}

impl Default for RenameConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            prompt: default_rename_prompt(),
            include_original: false,
            date_token: DateToken::default(),
            date_format: default_date_format(),
            max_description_chars: default_description_chars(),
        }
    }
}

impl Default for ErrorExportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            folder: default_error_folder(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            local: LocalConfig::default(),
            remote: RemoteConfig::default(),
            classify: ClassifyConfig::default(),
            media: MediaConfig::default(),
            organize: OrganizeConfig::default(),
            rename: RenameConfig::default(),
            error_export: ErrorExportConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Total attempts per request; a disabled retry policy means exactly one
    pub fn max_attempts(&self) -> u32 {
        if self.retry.enabled {
            self.retry.count + 1
        } else {
            1
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str::<Self>(&content)
                .map_err(|e| crate::SortError::Config(format!("Failed to parse config: {}", e)))?
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                config.remote.api_key = key.trim().to_string();
            }
        }

        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Worker pool size for the active backend
    pub fn max_concurrent(&self) -> usize {
        match self.backend {
            BackendKind::Local => self.local.max_concurrent,
            BackendKind::Remote => self.remote.max_concurrent,
        }
    }

    /// Reject settings that would make a run meaningless
    pub fn validate(&self) -> crate::Result<()> {
        use crate::SortError::Config;

        if self.classify.categories.is_empty() {
            return Err(Config("category list is empty".to_string()));
        }
        if self.classify.categories.iter().any(|c| c.trim().is_empty()) {
            return Err(Config("category names must not be blank".to_string()));
        }
        if self.max_concurrent() == 0 {
            return Err(Config("max_concurrent must be at least 1".to_string()));
        }
        if self.backend == BackendKind::Remote {
            if self.remote.models.is_empty() {
                return Err(Config("remote backend needs at least one model".to_string()));
            }
            if self.remote.endpoint_cap == 0 {
                return Err(Config("remote.endpoint_cap must be at least 1".to_string()));
            }
        }
        let stray = self
            .classify
            .prompt
            .replace("{categories}", "")
            .contains(['{', '}']);
        if stray {
            return Err(Config(
                "prompt may only contain the {categories} placeholder".to_string(),
            ));
        }
        if self.organize.year_format.trim().is_empty() || self.organize.month_format.trim().is_empty() {
            return Err(Config("year/month folder formats must not be empty".to_string()));
        }
        Ok(())
    }
}
