// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Request-level facade over the registry, the security pipeline and the
//! renderer. Every operation resolves the token first, locks only that
//! session, and never holds the registry lock across an await.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::dataset::Dataset;
use crate::error::{ChatError, ChatResult};
use crate::render::{AnswerRenderer, RenderedAnswer};
use crate::security::{SecurityPipeline, REFUSAL_MESSAGE};
use crate::session::SessionRegistry;
use crate::types::BackendChoice;
use crate::utils::{mask_sensitive, query_preview};

pub struct QueryOrchestrator {
    registry: Arc<SessionRegistry>,
    pipeline: Arc<SecurityPipeline>,
    renderer: AnswerRenderer,
    query_timeout: Option<Duration>,
}

impl QueryOrchestrator {
    pub fn new(
        registry: Arc<SessionRegistry>,
        pipeline: Arc<SecurityPipeline>,
        renderer: AnswerRenderer,
    ) -> Self {
        Self {
            registry,
            pipeline,
            renderer,
            query_timeout: None,
        }
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn create_session(&self, streaming_mode: bool) -> ChatResult<String> {
        self.registry.create(streaming_mode)
    }

    pub async fn set_backend(&self, token: &str, backend: BackendChoice) -> ChatResult<BackendChoice> {
        let session = self.registry.lookup(token)?;
        let mut session = session.lock().await;
        session.set_backend(backend);
        Ok(session.backend())
    }

    pub async fn set_datasets(&self, token: &str, datasets: Vec<Dataset>) -> ChatResult<Vec<usize>> {
        let session = self.registry.lookup(token)?;
        let mut session = session.lock().await;
        session.set_datasets(datasets)
    }

    /// Returns the row count of the selected view.
    pub async fn select_dataset(
        &self,
        token: &str,
        index: usize,
        row_limit: Option<usize>,
    ) -> ChatResult<usize> {
        let session = self.registry.lookup(token)?;
        let mut session = session.lock().await;
        session.select_dataset(index, row_limit)
    }

    /// Answer one chat turn.
    ///
    /// Unsafe prompts and responses become the fixed refusal text, returned
    /// as an ordinary answer.
    pub async fn query(&self, token: &str, text: &str) -> ChatResult<RenderedAnswer> {
        let session = self.registry.lookup(token)?;
        let mut session = session.lock().await;
        let session_id = session.id();

        let outcome = session.query(text, &self.pipeline, self.query_timeout).await;
        drop(session);

        match outcome {
            Ok(answer) => Ok(self.renderer.render(answer).await),
            Err(ChatError::UnsafeContent { stage, flagged }) => {
                warn!(
                    session_id,
                    stage = %stage,
                    flagged = ?flagged,
                    query = %query_preview(text),
                    "Unsafe content replaced with refusal"
                );
                Ok(RenderedAnswer::text(REFUSAL_MESSAGE))
            }
            Err(e) => {
                if e.is_client_error() {
                    info!(session_id, error = %e, "Query refused");
                } else {
                    error!(
                        session_id,
                        token = %mask_sensitive(token, 4),
                        error = %e,
                        "Query failed"
                    );
                }
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for QueryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryOrchestrator")
            .field("registry", &self.registry)
            .field("pipeline", &self.pipeline)
            .field("query_timeout", &self.query_timeout)
            .finish()
    }
}
