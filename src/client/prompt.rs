// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Prompt text sent with every image

use crate::config::AppConfig;

pub const CATEGORIES_PLACEHOLDER: &str = "{categories}";

/// Fill the template and, for structured output, append the JSON contract
pub fn build_prompt(
    template: &str,
    categories: &[String],
    structured: bool,
    with_description: bool,
) -> String {
    let joined = categories.join(", ");
    let mut prompt = template.replace(CATEGORIES_PLACEHOLDER, &joined);

    if structured {
        prompt.push_str("\n\nAnswer with a single JSON object and nothing else, no Markdown: ");
        prompt.push_str("{\"category\": \"<one of: ");
        prompt.push_str(&joined);
        prompt.push('"');
        if with_description {
            prompt.push_str(", \"description\": \"<a few words describing the main subject>\"");
        }
        prompt.push('}');
    }

    prompt
}

/// Classification prompt for the current settings
pub fn classification_prompt(config: &AppConfig) -> String {
    build_prompt(
        &config.classify.prompt,
        &config.classify.categories,
        config.classify.structured_output,
        config.rename.enabled,
    )
}
