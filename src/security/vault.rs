// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-query store of anonymized spans.
//!
//! A vault is created by the input scan of one query and handed to the output
//! scan of the same query. It is never shared between queries or sessions.

/// Placeholder-to-original mapping, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vault {
    entries: Vec<(String, String)>,
}

impl Vault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `original` under a fresh placeholder for `kind` and return the placeholder.
    ///
    /// The same original value always maps back to the same placeholder.
    pub fn insert(&mut self, kind: &str, original: &str) -> String {
        if let Some((placeholder, _)) = self.entries.iter().find(|(_, o)| o == original) {
            return placeholder.clone();
        }
        let ordinal = self
            .entries
            .iter()
            .filter(|(p, _)| p.starts_with(&format!("[REDACTED_{}_", kind)))
            .count()
            + 1;
        let placeholder = format!("[REDACTED_{}_{}]", kind, ordinal);
        self.entries.push((placeholder.clone(), original.to_string()));
        placeholder
    }

    /// Replace every known placeholder in `text` with its original value.
    pub fn restore(&self, text: &str) -> String {
        let mut result = text.to_string();
        for (placeholder, original) in &self.entries {
            result = result.replace(placeholder.as_str(), original);
        }
        result
    }

    /// True if `value` was supplied by the user and anonymized on the way in.
    pub fn contains_original(&self, value: &str) -> bool {
        self.entries.iter().any(|(_, o)| o == value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
