// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! datachat - Security-gated chat over tabular datasets
//!
//! A client opens a session, uploads one or more already-parsed datasets,
//! picks a backend and asks questions. Every question and every answer passes
//! through an ordered chain of content scanners around the analysis engine.
//!
//! **Token** -> **Session** -> **Input scan** -> **Engine** -> **Output scan** -> **Render**
//!
//! # Core Modules
//!
//! - [`token`] - Session token and artifact name generation
//! - [`security`] - Input/output scanner pipeline
//! - [`session`] - Per-client state and the session registry
//! - [`engine`] - Analysis engine seam and the LLM backend
//! - [`render`] - Answer classification and artifact publishing
//! - [`orchestrator`] - Request-level facade tying the above together
//! - [`server`] - HTTP surface
//! - [`errors`] - Client-facing error responses

pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod errors;
pub mod orchestrator;
pub mod render;
pub mod security;
pub mod server;
pub mod session;
pub mod token;
pub mod types;
pub mod utils;

pub use config::AppConfig;
pub use dataset::Dataset;
pub use engine::{AnalysisEngine, AnalysisRequest, Answer, Backends};
pub use error::{ChatError, ChatResult};
pub use errors::{generate_reference_code, sanitize_error_details, ErrorResponse, UserError};
pub use orchestrator::QueryOrchestrator;
pub use render::{AnswerFormat, AnswerRenderer, RenderConfig, RenderedAnswer};
pub use security::{SecurityConfig, SecurityPipeline, REFUSAL_MESSAGE};
pub use server::Server;
pub use session::{RegistryConfig, Session, SessionRegistry, SessionSettings};
pub use types::{BackendChoice, Message};
pub use utils::mask_sensitive;
