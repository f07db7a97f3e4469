// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! mediasort: AI-assisted media classification and organization
//!
//! Images and video keyframes are classified by a vision model, reached
//! through a local Ollama server or a remote chat-completions API, and then
//! copied or moved into a `category/year/month` tree. A SQLite ledger keeps
//! reruns from touching the same file twice.

pub mod balancer;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod interpret;
pub mod media;
pub mod organizer;
pub mod pipeline;

pub use config::AppConfig;
pub use error::{Result, SortError};
