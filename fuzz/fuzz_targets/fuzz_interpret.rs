// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use mediasort::interpret::{sanitize_description, ResponseInterpreter};

#[derive(Arbitrary, Debug)]
struct Input {
    reply: String,
    structured: bool,
    rename: bool,
    budget: u8,
}

fuzz_target!(|input: Input| {
    let categories = vec!["people".to_string(), "pets".to_string(), "other".to_string()];
    let interpreter = ResponseInterpreter::new(
        categories.clone(),
        input.structured,
        input.rename,
        input.budget as usize,
    );

    let out = interpreter.interpret(&input.reply).expect("categories are non-empty");
    assert!(categories.contains(&out.category));

    if let Some(description) = out.description {
        assert!(!description.is_empty());
        assert!(description.chars().count() <= input.budget as usize);
        assert!(description.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-'));
    }

    if let Some(clean) = sanitize_description(&input.reply, input.budget as usize) {
        assert!(!clean.contains('/') && !clean.contains('.'));
    }
});
