// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Log hygiene helpers.

use regex::Regex;
use std::sync::LazyLock;

/// Maximum length of a query preview in logs.
pub const QUERY_PREVIEW_LENGTH: usize = 50;

static REDACTION_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (Regex::new(r"sk-[a-zA-Z0-9_-]{20,}").expect("API key regex is valid"), "[REDACTED_API_KEY]"),
        (Regex::new(r"AKIA[0-9A-Z]{16}").expect("AWS key regex is valid"), "[REDACTED_AWS_KEY]"),
        (Regex::new(r"ghp_[a-zA-Z0-9]{36}").expect("GitHub token regex is valid"), "[REDACTED_GITHUB_TOKEN]"),
        (Regex::new(r"(?i)password[=:]\s*\S+").expect("Password regex is valid"), "password=[REDACTED]"),
        (Regex::new(r"Bearer [a-zA-Z0-9-._~+/]+=*").expect("Bearer token regex is valid"), "Bearer [REDACTED]"),
        (Regex::new(r"\b[A-Za-z0-9]{32,}\b").expect("Generic key regex is valid"), "[REDACTED_KEY]"),
    ]
});

/// Mask a sensitive string (API key, session token) for logging.
///
/// Shows only the first `visible_prefix` characters followed by "...".
///
/// ```
/// use datachat::utils::mask_sensitive;
///
/// assert_eq!(mask_sensitive("k3n9x0q2m4p7z1a8", 4), "k3n9...");
/// ```
pub fn mask_sensitive(input: &str, visible_prefix: usize) -> String {
    if input.chars().count() <= visible_prefix {
        return format!("{}...", input);
    }
    let prefix: String = input.chars().take(visible_prefix).collect();
    format!("{}...", prefix)
}

pub fn redact_secrets(text: &str) -> String {
    let mut result = text.to_string();
    for (pattern, replacement) in REDACTION_PATTERNS.iter() {
        result = pattern.replace_all(&result, *replacement).into_owned();
    }
    result
}

/// Single-line, secret-free, length-bounded rendering of a query for logs.
pub fn query_preview(query: &str) -> String {
    let cleaned = redact_secrets(query)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if cleaned.chars().count() <= QUERY_PREVIEW_LENGTH {
        cleaned
    } else {
        let truncated: String = cleaned.chars().take(QUERY_PREVIEW_LENGTH - 3).collect();
        format!("{}...", truncated)
    }
}
