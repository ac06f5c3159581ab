// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Scanner seams for the input and output directions.

use super::vault::Vault;

/// Verdict of one scanner over one piece of text.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanVerdict {
    pub valid: bool,
    /// 0.0 (no risk) .. 1.0 (certain).
    pub risk_score: f32,
    pub sanitized: String,
}

impl ScanVerdict {
    /// Passes the text through unchanged.
    pub fn pass(text: impl Into<String>) -> Self {
        Self {
            valid: true,
            risk_score: 0.0,
            sanitized: text.into(),
        }
    }

    pub fn flag(text: impl Into<String>, risk_score: f32) -> Self {
        Self {
            valid: false,
            risk_score: risk_score.clamp(0.0, 1.0),
            sanitized: text.into(),
        }
    }
}

/// Validates and transforms a prompt before it reaches the analysis engine.
///
/// Scanners that rewrite sensitive spans record the originals in `vault` so
/// the output direction can restore them.
pub trait InputScanner: Send + Sync {
    fn name(&self) -> &'static str;
    fn scan(&self, prompt: &str, vault: &mut Vault) -> ScanVerdict;
}

/// Validates and transforms a response, given the sanitized prompt it answers.
pub trait OutputScanner: Send + Sync {
    fn name(&self) -> &'static str;
    fn scan(&self, prompt: &str, output: &str, vault: &Vault) -> ScanVerdict;
}
