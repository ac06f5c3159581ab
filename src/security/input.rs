// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Prompt-side scanners.

use regex::{Captures, Regex};
use std::sync::LazyLock;

use super::scanner::{InputScanner, ScanVerdict};
use super::vault::Vault;

/// PII patterns shared by `Anonymize` (input) and `Sensitive` (output).
/// Order matters: wider numeric shapes run before narrower ones.
pub(crate) static PII_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("Email regex"), "EMAIL"),
        (Regex::new(r"\b(?:\d{4}[-\s]?){3}\d{4}\b").expect("CC regex"), "CREDIT_CARD"),
        (Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("SSN regex"), "SSN"),
        (Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").expect("IPv4 regex"), "IP_ADDRESS"),
        (Regex::new(r"(?:\+?1[-.\s]?)?\(?\b[0-9]{3}\)?[-.\s]?[0-9]{3}[-.\s]?[0-9]{4}\b").expect("Phone regex"), "PHONE"),
    ]
});

static INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\bignore\s+(?:all\s+|any\s+)?(?:of\s+)?(?:the\s+|your\s+)?(?:previous|prior|above|earlier|preceding)\s+(?:instructions?|prompts?|directions|rules|context)",
        r"(?i)\bdisregard\s+(?:all\s+|any\s+)?(?:of\s+)?(?:the\s+|your\s+)?(?:previous|prior|above|earlier|preceding)\b",
        r"(?i)\bforget\s+(?:all\s+|everything\s+)?(?:you\s+were\s+told|(?:the\s+)?(?:previous|prior|above)\s+instructions)",
        r"(?i)\byou\s+are\s+now\s+(?:a|an|in|the)\b",
        r"(?i)\b(?:reveal|show|print|repeat|output|tell\s+me)\s+(?:me\s+)?(?:your|the)\s+(?:system\s+prompt|hidden\s+instructions|initial\s+instructions|original\s+instructions)",
        r"(?i)\bwhat\s+(?:was|is)\s+written\s+at\s+the\s+(?:beginning|start|top)\s+of\s+the\s+(?:document|prompt|conversation)",
        r"(?i)\b(?:jailbreak|dan\s+mode|developer\s+mode\s+enabled)\b",
        r"(?i)\bpretend\s+(?:you\s+are|to\s+be)\b.*\bwithout\s+(?:any\s+)?(?:restrictions|rules|limits|filters)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Injection regex"))
    .collect()
});

const TOXIC_WORDS: &[&str] = &[
    "stupid", "idiot", "idiots", "moron", "morons", "imbecile", "sucks", "loser", "losers",
    "pathetic", "worthless", "fuck", "fucking", "shit", "bitch", "bastard", "asshole", "dumbass",
    "retard", "scum",
];

/// Replaces PII spans with vault placeholders. Redaction is the remedy, so the
/// verdict stays valid; the risk score reflects how much was redacted.
#[derive(Debug, Default)]
pub struct Anonymize;

impl InputScanner for Anonymize {
    fn name(&self) -> &'static str {
        "anonymize"
    }

    fn scan(&self, prompt: &str, vault: &mut Vault) -> ScanVerdict {
        let mut text = prompt.to_string();
        let mut spans = 0usize;
        for (pattern, kind) in PII_PATTERNS.iter() {
            text = pattern
                .replace_all(&text, |caps: &Captures| {
                    spans += 1;
                    vault.insert(kind, &caps[0])
                })
                .into_owned();
        }
        ScanVerdict {
            valid: true,
            risk_score: (spans as f32 * 0.25).min(1.0),
            sanitized: text,
        }
    }
}

/// Lexicon-based abuse detector. Each hit halves the remaining headroom, so
/// one hit scores 0.5, two score 0.75.
#[derive(Debug)]
pub struct Toxicity {
    pub threshold: f32,
}

impl Default for Toxicity {
    fn default() -> Self {
        Self { threshold: 0.5 }
    }
}

impl Toxicity {
    pub fn score(text: &str) -> f32 {
        let hits = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .filter(|w| TOXIC_WORDS.contains(&w.as_str()))
            .count();
        1.0 - 0.5f32.powi(hits as i32)
    }
}

impl InputScanner for Toxicity {
    fn name(&self) -> &'static str {
        "toxicity"
    }

    fn scan(&self, prompt: &str, _vault: &mut Vault) -> ScanVerdict {
        let score = Self::score(prompt);
        if score > 0.0 && score >= self.threshold {
            ScanVerdict::flag(prompt, score)
        } else {
            ScanVerdict {
                valid: true,
                risk_score: score,
                sanitized: prompt.to_string(),
            }
        }
    }
}

/// Rejects prompts longer than `limit` whitespace-separated tokens.
#[derive(Debug)]
pub struct TokenLimit {
    pub limit: usize,
}

impl Default for TokenLimit {
    fn default() -> Self {
        Self { limit: 4096 }
    }
}

impl InputScanner for TokenLimit {
    fn name(&self) -> &'static str {
        "token_limit"
    }

    fn scan(&self, prompt: &str, _vault: &mut Vault) -> ScanVerdict {
        let tokens: Vec<&str> = prompt.split_whitespace().collect();
        if tokens.len() <= self.limit {
            return ScanVerdict::pass(prompt);
        }
        ScanVerdict::flag(tokens[..self.limit].join(" "), 1.0)
    }
}

#[derive(Debug, Default)]
pub struct PromptInjection;

impl PromptInjection {
    pub fn matches(text: &str) -> bool {
        INJECTION_PATTERNS.iter().any(|p| p.is_match(text))
    }
}

impl InputScanner for PromptInjection {
    fn name(&self) -> &'static str {
        "prompt_injection"
    }

    fn scan(&self, prompt: &str, _vault: &mut Vault) -> ScanVerdict {
        if Self::matches(prompt) {
            ScanVerdict::flag(prompt, 1.0)
        } else {
            ScanVerdict::pass(prompt)
        }
    }
}

/// Strips characters that render as nothing but still reach the model:
/// Unicode tags, zero-width and bidi controls, private-use code points.
#[derive(Debug, Default)]
pub struct InvisibleText;

impl InvisibleText {
    pub fn is_invisible(c: char) -> bool {
        matches!(
            c as u32,
            0xE0000..=0xE007F
                | 0x200B..=0x200F
                | 0x202A..=0x202E
                | 0x2060..=0x2064
                | 0xFEFF
                | 0xE000..=0xF8FF
                | 0xF0000..=0xFFFFD
                | 0x100000..=0x10FFFD
        )
    }
}

impl InputScanner for InvisibleText {
    fn name(&self) -> &'static str {
        "invisible_text"
    }

    fn scan(&self, prompt: &str, _vault: &mut Vault) -> ScanVerdict {
        let cleaned: String = prompt.chars().filter(|c| !Self::is_invisible(*c)).collect();
        if cleaned.len() == prompt.len() {
            ScanVerdict::pass(prompt)
        } else {
            ScanVerdict::flag(cleaned, 1.0)
        }
    }
}

/// Case-insensitive deny-list of substrings.
#[derive(Debug, Default)]
pub struct BanSubstrings {
    banned: Vec<String>,
}

impl BanSubstrings {
    pub fn new<I, S>(banned: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            banned: banned
                .into_iter()
                .map(|s| s.as_ref().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }
}

impl InputScanner for BanSubstrings {
    fn name(&self) -> &'static str {
        "ban_substrings"
    }

    fn scan(&self, prompt: &str, _vault: &mut Vault) -> ScanVerdict {
        let lower = prompt.to_lowercase();
        if self.banned.iter().any(|b| lower.contains(b.as_str())) {
            ScanVerdict::flag(prompt, 1.0)
        } else {
            ScanVerdict::pass(prompt)
        }
    }
}
