// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core error taxonomy for session and query handling.
//!
//! Every variant except `Engine` is an ordinary, expected outcome of a client
//! action. The HTTP layer maps them to user-facing responses in
//! [`crate::errors`]; nothing here is allowed to crash the process.

use thiserror::Error;

/// Which side of the analysis engine a security rejection happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStage {
    Input,
    Output,
}

impl std::fmt::Display for ScanStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanStage::Input => write!(f, "prompt"),
            ScanStage::Output => write!(f, "response"),
        }
    }
}

/// Errors produced by the session registry, sessions and the orchestrator.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Token absent from the registry, or its session idled out.
    #[error("Invalid session")]
    InvalidSession,

    #[error("Setting empty data")]
    EmptyInput,

    #[error("Selecting data out of range: index {index}, {len} dataset(s) available")]
    OutOfRange { index: usize, len: usize },

    /// A query arrived before any dataset was selected.
    #[error("No engine initialized: select a dataset first")]
    NotInitialized,

    #[error("The {} is unsafe (flagged by: {})", .stage, .flagged.join(", "))]
    UnsafeContent { stage: ScanStage, flagged: Vec<String> },

    /// Copying an image artifact failed. Always recovered into a text answer.
    #[error("Rendering degraded to text: {0}")]
    RenderDegraded(String),

    #[error("Analysis timed out after {0} seconds")]
    Timeout(u64),

    /// `retry_after_secs` is when the stalest session expires, or `None`
    /// when sessions never expire.
    #[error("Session limit reached ({live} live sessions)")]
    CapacityExceeded { live: usize, retry_after_secs: Option<u64> },

    /// Opaque failure from the analysis engine or its backend.
    #[error("Analysis engine error: {0}")]
    Engine(String),
}

impl ChatError {
    /// True for conditions the client caused and can correct.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ChatError::InvalidSession
                | ChatError::EmptyInput
                | ChatError::OutOfRange { .. }
                | ChatError::NotInitialized
        )
    }
}

impl From<anyhow::Error> for ChatError {
    fn from(err: anyhow::Error) -> Self {
        ChatError::Engine(format!("{:#}", err))
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
