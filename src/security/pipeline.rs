// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Ordered scanner chains for prompts and responses.
//!
//! Each scanner sees the text as sanitized by the scanners before it. The
//! chain always runs to completion so every score is logged; the text is
//! rejected if any scanner reported it invalid.

use indexmap::IndexMap;
use tracing::{debug, warn};

use super::scanner::{InputScanner, OutputScanner};
use super::vault::Vault;
use crate::error::{ChatError, ChatResult, ScanStage};

/// Fixed reply substituted when a prompt or response is rejected.
pub const REFUSAL_MESSAGE: &str = "Sorry, I can't answer that.";

/// A prompt that passed the input chain, with the vault its anonymizer filled.
#[derive(Debug, Clone, Default)]
pub struct ScannedPrompt {
    pub text: String,
    pub vault: Vault,
    pub scores: IndexMap<&'static str, f32>,
}

pub struct SecurityPipeline {
    enabled: bool,
    input: Vec<Box<dyn InputScanner>>,
    output: Vec<Box<dyn OutputScanner>>,
}

impl std::fmt::Debug for SecurityPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityPipeline")
            .field("enabled", &self.enabled)
            .field("input", &self.input.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("output", &self.output.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl SecurityPipeline {
    pub fn new(input: Vec<Box<dyn InputScanner>>, output: Vec<Box<dyn OutputScanner>>) -> Self {
        Self {
            enabled: true,
            input,
            output,
        }
    }

    /// Pass-through pipeline: prompts and responses are returned unchanged.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            input: Vec::new(),
            output: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn input_names(&self) -> Vec<&'static str> {
        self.input.iter().map(|s| s.name()).collect()
    }

    pub fn output_names(&self) -> Vec<&'static str> {
        self.output.iter().map(|s| s.name()).collect()
    }

    pub fn scan_prompt(&self, prompt: &str) -> ChatResult<ScannedPrompt> {
        if !self.enabled {
            return Ok(ScannedPrompt {
                text: prompt.to_string(),
                ..Default::default()
            });
        }

        let mut vault = Vault::new();
        let mut text = prompt.to_string();
        let mut scores = IndexMap::new();
        let mut flagged = Vec::new();

        for scanner in &self.input {
            let verdict = scanner.scan(&text, &mut vault);
            scores.insert(scanner.name(), verdict.risk_score);
            if !verdict.valid {
                flagged.push(scanner.name().to_string());
            }
            text = verdict.sanitized;
        }

        debug!(stage = "prompt", scores = ?scores, redacted = vault.len(), "Input scan complete");

        if !flagged.is_empty() {
            warn!(stage = "prompt", flagged = ?flagged, scores = ?scores, "Prompt rejected");
            return Err(ChatError::UnsafeContent {
                stage: ScanStage::Input,
                flagged,
            });
        }

        Ok(ScannedPrompt { text, vault, scores })
    }

    /// Scan `response` against the sanitized prompt it answers.
    pub fn scan_output(&self, prompt: &ScannedPrompt, response: &str) -> ChatResult<String> {
        if !self.enabled {
            return Ok(response.to_string());
        }

        let mut text = response.to_string();
        let mut scores = IndexMap::new();
        let mut flagged = Vec::new();

        for scanner in &self.output {
            let verdict = scanner.scan(&prompt.text, &text, &prompt.vault);
            scores.insert(scanner.name(), verdict.risk_score);
            if !verdict.valid {
                flagged.push(scanner.name().to_string());
            }
            text = verdict.sanitized;
        }

        debug!(stage = "response", scores = ?scores, "Output scan complete");

        if !flagged.is_empty() {
            warn!(stage = "response", flagged = ?flagged, scores = ?scores, "Response rejected");
            return Err(ChatError::UnsafeContent {
                stage: ScanStage::Output,
                flagged,
            });
        }

        Ok(text)
    }
}

impl Default for SecurityPipeline {
    fn default() -> Self {
        Self::disabled()
    }
}
