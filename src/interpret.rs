// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Turn free-form or JSON model replies into a category and an optional description

use serde::Deserialize;
use tracing::debug;

use crate::config::AppConfig;
use crate::{Result, SortError};

/// JSON keys that must never be mistaken for a description
const RESERVED_WORDS: &[&str] = &["category", "description", "json"];

/// Opening/closing quote pairs considered by the quoted-substring heuristic
const QUOTE_PAIRS: &[(char, char)] = &[('"', '"'), ('“', '”'), ('「', '」'), ('『', '』'), ('\'', '\'')];

/// What a reply means for the organizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpretation {
    /// Always a member of the configured category list
    pub category: String,
    /// Filesystem-safe, already truncated
    pub description: Option<String>,
}

#[derive(Deserialize)]
struct StructuredReply {
    category: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResponseInterpreter {
    categories: Vec<String>,
    structured_output: bool,
    rename_enabled: bool,
    max_description_chars: usize,
}

impl ResponseInterpreter {
    pub fn new(
        categories: Vec<String>,
        structured_output: bool,
        rename_enabled: bool,
        max_description_chars: usize,
    ) -> Self {
        Self {
            categories,
            structured_output,
            rename_enabled,
            max_description_chars,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.classify.categories.clone(),
            config.classify.structured_output,
            config.rename.enabled,
            config.rename.max_description_chars,
        )
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    /// Interpret one classification reply
    pub fn interpret(&self, raw: &str) -> Result<Interpretation> {
        if self.categories.is_empty() {
            return Err(SortError::Parse("no categories configured".to_string()));
        }

        if !self.structured_output {
            return Ok(Interpretation {
                category: resolve_category(raw, &self.categories).to_string(),
                description: None,
            });
        }

        let body = strip_fences(raw);
        match parse_structured(body) {
            Some(reply) => {
                let description = if self.rename_enabled {
                    reply
                        .description
                        .as_deref()
                        .and_then(|d| sanitize_description(d, self.max_description_chars))
                } else {
                    None
                };
                Ok(Interpretation {
                    category: resolve_category(&reply.category, &self.categories).to_string(),
                    description,
                })
            }
            None => {
                debug!("Reply is not valid JSON, falling back to heuristics: {:?}", raw);
                let description = if self.rename_enabled {
                    self.guess_description(body)
                } else {
                    None
                };
                Ok(Interpretation {
                    category: resolve_category(body, &self.categories).to_string(),
                    description,
                })
            }
        }
    }

    /// Description from a plain-text rename reply (second-pass call)
    pub fn description_from_text(&self, raw: &str) -> Option<String> {
        sanitize_description(strip_fences(raw), self.max_description_chars)
    }

    /// Quoted substring, else longest word-like run, else the first few characters
    fn guess_description(&self, text: &str) -> Option<String> {
        let budget = self.max_description_chars;

        if let Some(quoted) = quoted_substrings(text)
            .into_iter()
            .find(|q| !self.is_reserved(q) && q.chars().count() <= budget)
        {
            return sanitize_description(quoted, budget);
        }

        let longest = text
            .split(|c: char| c.is_whitespace() || !c.is_alphanumeric())
            .filter(|run| !run.is_empty() && !self.is_reserved(run))
            .fold(None::<&str>, |best, run| match best {
                Some(b) if b.chars().count() >= run.chars().count() => Some(b),
                _ => Some(run),
            });
        if let Some(run) = longest {
            return sanitize_description(run, budget);
        }

        let head: String = text.chars().filter(|c| !c.is_whitespace()).take(budget).collect();
        sanitize_description(&head, budget)
    }

    fn is_reserved(&self, candidate: &str) -> bool {
        let candidate = candidate.trim();
        self.categories.iter().any(|c| c == candidate)
            || RESERVED_WORDS.iter().any(|w| w.eq_ignore_ascii_case(candidate))
    }
}

fn parse_structured(body: &str) -> Option<StructuredReply> {
    if let Ok(reply) = serde_json::from_str::<StructuredReply>(body) {
        return Some(reply);
    }
    // Models like to wrap the object in prose; try the outermost braces.
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<StructuredReply>(&body[start..=end]).ok()
}

/// Exact substring match in list order, then case-insensitive, then the last entry
///
/// `categories` must not be empty.
pub fn resolve_category<'a>(text: &str, categories: &'a [String]) -> &'a str {
    if let Some(hit) = categories.iter().find(|c| text.contains(c.as_str())) {
        return hit;
    }

    let lowered = text.to_lowercase();
    if let Some(hit) = categories
        .iter()
        .find(|c| lowered.contains(&c.to_lowercase()))
    {
        return hit;
    }

    categories.last().map(String::as_str).unwrap_or_default()
}

/// Remove Markdown code fences and one layer of surrounding quotes
pub fn strip_fences(raw: &str) -> &str {
    let mut text = raw.trim();

    if let Some(rest) = text.strip_prefix("```") {
        // Drop the info string (`json`, `JSON`, ...) up to the first newline.
        text = match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
        };
        text = text.trim_end();
        text = text.strip_suffix("```").unwrap_or(text).trim();
    }

    for quote in ['"', '\'', '`'] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            let inner = &text[1..text.len() - 1];
            // Only unwrap when the quotes enclose the whole thing, not a JSON string value.
            if !inner.contains(quote) {
                text = inner.trim();
            }
            break;
        }
    }

    text
}

fn quoted_substrings(text: &str) -> Vec<&str> {
    let mut found = Vec::new();
    for &(open, close) in QUOTE_PAIRS {
        let mut rest = text;
        while let Some(start) = rest.find(open) {
            let after = &rest[start + open.len_utf8()..];
            match after.find(close) {
                Some(end) => {
                    let inner = after[..end].trim();
                    if !inner.is_empty() {
                        found.push(inner);
                    }
                    rest = &after[end + close.len_utf8()..];
                }
                None => break,
            }
        }
        if !found.is_empty() {
            break;
        }
    }
    found
}

/// Keep letters, digits, `_` and `-`; whitespace becomes `_`; cut to `max_chars`
pub fn sanitize_description(raw: &str, max_chars: usize) -> Option<String> {
    let mut clean: String = raw
        .trim()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect();

    while clean.contains("__") {
        clean = clean.replace("__", "_");
    }

    let clean: String = clean.trim_matches('_').chars().take(max_chars).collect();
    let clean = clean.trim_matches('_');
    if clean.is_empty() {
        None
    } else {
        Some(clean.to_string())
    }
}
