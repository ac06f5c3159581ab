// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Response-side scanners.

use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use super::input::PII_PATTERNS;
use super::scanner::{OutputScanner, ScanVerdict};
use super::vault::Vault;

static REFUSAL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^\s*(?:i'?m|i\s+am)\s+(?:sorry|afraid)\b",
        r"(?i)\bi\s+(?:cannot|can'?t|won'?t|am\s+unable\s+to|am\s+not\s+able\s+to)\s+(?:help|assist|provide|answer|comply|do\s+that)",
        r"(?i)\bas\s+an\s+ai(?:\s+language\s+model)?\b",
        r"(?i)\bi(?:'m|\s+am)\s+not\s+(?:allowed|permitted)\s+to\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Refusal regex"))
    .collect()
});

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "have", "with", "this", "that", "from", "they", "what", "which",
    "there", "their", "about", "would", "these", "other", "into", "than", "then", "them", "how",
    "many", "much", "does", "did", "is", "of", "to", "in", "by",
];

/// Restores placeholders recorded by `Anonymize` on the way in.
#[derive(Debug, Default)]
pub struct Deanonymize;

impl OutputScanner for Deanonymize {
    fn name(&self) -> &'static str {
        "deanonymize"
    }

    fn scan(&self, _prompt: &str, output: &str, vault: &Vault) -> ScanVerdict {
        ScanVerdict::pass(vault.restore(output))
    }
}

/// Flags answers where the model declined instead of answering.
#[derive(Debug, Default)]
pub struct NoRefusal;

impl NoRefusal {
    pub fn is_refusal(text: &str) -> bool {
        REFUSAL_PATTERNS.iter().any(|p| p.is_match(text))
    }
}

impl OutputScanner for NoRefusal {
    fn name(&self) -> &'static str {
        "no_refusal"
    }

    fn scan(&self, _prompt: &str, output: &str, _vault: &Vault) -> ScanVerdict {
        if Self::is_refusal(output) {
            ScanVerdict::flag(output, 1.0)
        } else {
            ScanVerdict::pass(output)
        }
    }
}

/// Redacts PII the model produced on its own. Values the user supplied (and
/// that `Anonymize` recorded) are exempt.
#[derive(Debug, Default)]
pub struct Sensitive;

impl OutputScanner for Sensitive {
    fn name(&self) -> &'static str {
        "sensitive"
    }

    fn scan(&self, _prompt: &str, output: &str, vault: &Vault) -> ScanVerdict {
        let mut text = output.to_string();
        let mut found = 0usize;
        for (pattern, kind) in PII_PATTERNS.iter() {
            text = pattern
                .replace_all(&text, |caps: &Captures| {
                    let value = &caps[0];
                    if vault.contains_original(value) {
                        value.to_string()
                    } else {
                        found += 1;
                        format!("[REDACTED_{}]", kind)
                    }
                })
                .into_owned();
        }
        if found == 0 {
            ScanVerdict::pass(text)
        } else {
            ScanVerdict::flag(text, 1.0)
        }
    }
}

/// Lexical cosine similarity between prompt and answer.
#[derive(Debug)]
pub struct Relevance {
    pub threshold: f32,
}

impl Default for Relevance {
    fn default() -> Self {
        Self { threshold: 0.1 }
    }
}

fn bag_of_words(text: &str) -> HashMap<String, f32> {
    let mut bag = HashMap::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() > 1 && !STOPWORDS.contains(&w.as_str()))
        .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
    {
        *bag.entry(word).or_insert(0.0) += 1.0;
    }
    bag
}

impl Relevance {
    /// Cosine similarity over word counts, `None` when either side has no content words.
    pub fn similarity(a: &str, b: &str) -> Option<f32> {
        let (bag_a, bag_b) = (bag_of_words(a), bag_of_words(b));
        if bag_a.is_empty() || bag_b.is_empty() {
            return None;
        }
        let keys: HashSet<&String> = bag_a.keys().filter(|k| bag_b.contains_key(*k)).collect();
        let dot: f32 = keys.iter().map(|k| bag_a[*k] * bag_b[*k]).sum();
        let norm = |bag: &HashMap<String, f32>| bag.values().map(|v| v * v).sum::<f32>().sqrt();
        Some(dot / (norm(&bag_a) * norm(&bag_b)))
    }
}

impl OutputScanner for Relevance {
    fn name(&self) -> &'static str {
        "relevance"
    }

    fn scan(&self, prompt: &str, output: &str, _vault: &Vault) -> ScanVerdict {
        match Self::similarity(prompt, output) {
            Some(sim) if sim < self.threshold => ScanVerdict::flag(output, 1.0 - sim),
            Some(sim) => ScanVerdict {
                valid: true,
                risk_score: 1.0 - sim,
                sanitized: output.to_string(),
            },
            None => ScanVerdict::pass(output),
        }
    }
}
