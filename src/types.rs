// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Canonical types used across datachat.
//!
//! This module provides unified type definitions to avoid duplication.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A chat message with role and content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }
}

/// Which of the two interchangeable analysis backends a session talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    /// OpenAI chat-completions backend
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    /// BambooLLM backend
    Bamboo,
}

impl BackendChoice {
    /// Wire name of the backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Bamboo => "bamboo",
        }
    }
}

impl std::fmt::Display for BackendChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "bamboo" | "bamboollm" => Ok(Self::Bamboo),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        assert_eq!(Message::user("hi").role, "user");
        assert_eq!(Message::assistant("hello").role, "assistant");
        assert_eq!(Message::system("rules").content, "rules");
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!("openai".parse::<BackendChoice>(), Ok(BackendChoice::OpenAi));
        assert_eq!("BambooLLM".parse::<BackendChoice>(), Ok(BackendChoice::Bamboo));
        assert!("gpt".parse::<BackendChoice>().is_err());
    }

    #[test]
    fn test_backend_serde_names() {
        let json = serde_json::to_string(&BackendChoice::OpenAi).unwrap();
        assert_eq!(json, "\"openai\"");
        let parsed: BackendChoice = serde_json::from_str("\"bamboo\"").unwrap();
        assert_eq!(parsed, BackendChoice::Bamboo);
    }
}
