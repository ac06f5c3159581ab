// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Analysis engine seam
//!
//! The engine that turns a question about a dataset into an answer is an
//! external capability. This module defines the trait it must implement, the
//! closed set of answer shapes it can produce, and the [`EngineHandle`] a
//! session caches: one engine bound to one dataset view with its own
//! conversation memory.

pub mod llm;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::dataset::Dataset;
use crate::types::{BackendChoice, Message};

/// Default number of messages one handle remembers.
pub const DEFAULT_MEMORY_SIZE: usize = 10;

/// Result of one analysis call.
#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    Text(String),
    Table(Dataset),
    Image(PathBuf),
}

/// Everything an engine gets to see for one question.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisRequest<'a> {
    pub dataset: &'a Dataset,
    pub query: &'a str,
    pub history: &'a [Message],
    /// Client asked for incremental output. Engines may ignore it.
    pub streaming_mode: bool,
}

#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    async fn analyze(&self, request: AnalysisRequest<'_>) -> anyhow::Result<Answer>;
}

/// The engines selectable by [`BackendChoice`], built once at startup.
#[derive(Clone)]
pub struct Backends {
    pub openai: Arc<dyn AnalysisEngine>,
    pub bamboo: Arc<dyn AnalysisEngine>,
}

impl Backends {
    pub fn new(openai: Arc<dyn AnalysisEngine>, bamboo: Arc<dyn AnalysisEngine>) -> Self {
        Self { openai, bamboo }
    }

    /// Both choices served by the same engine (tests, single-provider deployments).
    pub fn uniform(engine: Arc<dyn AnalysisEngine>) -> Self {
        Self {
            openai: Arc::clone(&engine),
            bamboo: engine,
        }
    }

    pub fn get(&self, choice: BackendChoice) -> Arc<dyn AnalysisEngine> {
        match choice {
            BackendChoice::OpenAi => Arc::clone(&self.openai),
            BackendChoice::Bamboo => Arc::clone(&self.bamboo),
        }
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}

/// Sliding window over the most recent messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationMemory {
    capacity: usize,
    messages: Vec<Message>,
}

impl ConversationMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            messages: Vec::new(),
        }
    }

    pub fn push(&mut self, message: Message) {
        if self.capacity == 0 {
            return;
        }
        self.messages.push(message);
        if self.messages.len() > self.capacity {
            let overflow = self.messages.len() - self.capacity;
            self.messages.drain(..overflow);
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_SIZE)
    }
}

/// An engine bound to one (possibly truncated) dataset view.
///
/// Handles are never patched in place. Any change of backend or dataset
/// builds a new one, which also starts a fresh conversation.
pub struct EngineHandle {
    backend: BackendChoice,
    engine: Arc<dyn AnalysisEngine>,
    dataset: Arc<Dataset>,
    memory: ConversationMemory,
    streaming_mode: bool,
}

impl EngineHandle {
    pub fn build(
        backends: &Backends,
        backend: BackendChoice,
        dataset: Arc<Dataset>,
        memory_size: usize,
        streaming_mode: bool,
    ) -> Self {
        Self {
            backend,
            engine: backends.get(backend),
            dataset,
            memory: ConversationMemory::new(memory_size),
            streaming_mode,
        }
    }

    pub fn backend(&self) -> BackendChoice {
        self.backend
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub async fn analyze(&self, query: &str) -> anyhow::Result<Answer> {
        let request = AnalysisRequest {
            dataset: &self.dataset,
            query,
            history: self.memory.messages(),
            streaming_mode: self.streaming_mode,
        };
        self.engine.analyze(request).await
    }

    /// Record one delivered exchange.
    pub fn remember(&mut self, query: &str, answer: &str) {
        self.memory.push(Message::user(query));
        self.memory.push(Message::assistant(answer));
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("backend", &self.backend)
            .field("rows", &self.dataset.row_count())
            .field("memory", &self.memory.len())
            .finish()
    }
}
