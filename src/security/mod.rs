// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Content Security for Prompts and Responses
//!
//! Every query passes through an ordered chain of input scanners before it
//! reaches the analysis engine, and every textual answer passes through an
//! output chain before it reaches the client.
//!
//! ## Policy
//!
//! - Disabled (the default): both chains are pass-through.
//! - Enabled: scanners run in configured order, each receiving the text as
//!   sanitized by the ones before it. Any invalid verdict rejects the text.
//!
//! ## Usage
//!
//! ```no_run
//! use datachat::security::{SecurityConfig, SecurityPipeline};
//!
//! let config = SecurityConfig { enabled: true, ..Default::default() };
//! let pipeline = SecurityPipeline::from_config(&config);
//! match pipeline.scan_prompt("Which country sold the most?") {
//!     Ok(prompt) => println!("forwarding: {}", prompt.text),
//!     Err(e) => println!("rejected: {}", e),
//! }
//! ```

pub mod input;
pub mod locks;
pub mod output;
pub mod pipeline;
pub mod scanner;
pub mod vault;

pub use locks::{resilient_read, resilient_write};
pub use pipeline::{ScannedPrompt, SecurityPipeline, REFUSAL_MESSAGE};
pub use scanner::{InputScanner, OutputScanner, ScanVerdict};
pub use vault::Vault;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputScannerKind {
    Anonymize,
    Toxicity,
    TokenLimit,
    PromptInjection,
    InvisibleText,
    BanSubstrings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputScannerKind {
    Deanonymize,
    NoRefusal,
    Sensitive,
    Relevance,
}

/// Security section of the application config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub enabled: bool,
    pub input_scanners: Vec<InputScannerKind>,
    pub output_scanners: Vec<OutputScannerKind>,
    pub token_limit: usize,
    pub toxicity_threshold: f32,
    pub relevance_threshold: f32,
    pub banned_substrings: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            input_scanners: vec![
                InputScannerKind::Anonymize,
                InputScannerKind::Toxicity,
                InputScannerKind::TokenLimit,
                InputScannerKind::PromptInjection,
                InputScannerKind::InvisibleText,
            ],
            output_scanners: vec![
                OutputScannerKind::Deanonymize,
                OutputScannerKind::NoRefusal,
                OutputScannerKind::Sensitive,
            ],
            token_limit: 4096,
            toxicity_threshold: 0.5,
            relevance_threshold: 0.1,
            banned_substrings: Vec::new(),
        }
    }
}

impl SecurityPipeline {
    /// Build the scanner chains described by `config`.
    pub fn from_config(config: &SecurityConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }

        let input = config
            .input_scanners
            .iter()
            .map(|kind| -> Box<dyn InputScanner> {
                match kind {
                    InputScannerKind::Anonymize => Box::new(input::Anonymize),
                    InputScannerKind::Toxicity => Box::new(input::Toxicity {
                        threshold: config.toxicity_threshold,
                    }),
                    InputScannerKind::TokenLimit => Box::new(input::TokenLimit {
                        limit: config.token_limit,
                    }),
                    InputScannerKind::PromptInjection => Box::new(input::PromptInjection),
                    InputScannerKind::InvisibleText => Box::new(input::InvisibleText),
                    InputScannerKind::BanSubstrings => {
                        Box::new(input::BanSubstrings::new(&config.banned_substrings))
                    }
                }
            })
            .collect();

        let output = config
            .output_scanners
            .iter()
            .map(|kind| -> Box<dyn OutputScanner> {
                match kind {
                    OutputScannerKind::Deanonymize => Box::new(output::Deanonymize),
                    OutputScannerKind::NoRefusal => Box::new(output::NoRefusal),
                    OutputScannerKind::Sensitive => Box::new(output::Sensitive),
                    OutputScannerKind::Relevance => Box::new(output::Relevance {
                        threshold: config.relevance_threshold,
                    }),
                }
            })
            .collect();

        Self::new(input, output)
    }
}
