// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Application configuration, stored as JSON in `~/.datachat/config.json`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::llm::LlmBackendConfig;
use crate::engine::DEFAULT_MEMORY_SIZE;
use crate::render::RenderConfig;
use crate::security::SecurityConfig;
use crate::session::registry::{DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_MAX_SESSIONS};
use crate::session::{RegistryConfig, SessionSettings};
use crate::types::BackendChoice;

pub const DEFAULT_PORT: u16 = 8000;
const REQUEST_TIMEOUT_SLACK_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub bind_address: String,
    pub public_dir: PathBuf,
    pub public_base_url: String,
    pub public_route: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let render = RenderConfig::default();
        Self {
            port: DEFAULT_PORT,
            bind_address: "127.0.0.1".to_string(),
            public_dir: render.public_dir,
            public_base_url: render.public_base_url,
            public_route: render.public_route,
        }
    }
}

impl ServerConfig {
    pub fn render_config(&self) -> RenderConfig {
        RenderConfig {
            public_dir: self.public_dir.clone(),
            public_base_url: self.public_base_url.clone(),
            public_route: self.public_route.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// 0 disables idle expiry.
    pub idle_timeout_secs: u64,
    pub max_sessions: usize,
    pub cleanup_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            max_sessions: DEFAULT_MAX_SESSIONS,
            cleanup_interval_secs: 300,
        }
    }
}

impl SessionsConfig {
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            idle_timeout: (self.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(self.idle_timeout_secs)),
            max_sessions: self.max_sessions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub default_backend: BackendChoice,
    /// 0 disables the bound.
    pub query_timeout_secs: u64,
    pub memory_size: usize,
    pub openai: LlmBackendConfig,
    pub bamboo: LlmBackendConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_backend: BackendChoice::default(),
            query_timeout_secs: 120,
            memory_size: DEFAULT_MEMORY_SIZE,
            openai: LlmBackendConfig::openai_default(),
            bamboo: LlmBackendConfig::bamboo_default(),
        }
    }
}

impl EngineConfig {
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            default_backend: self.default_backend,
            memory_size: self.memory_size,
        }
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        (self.query_timeout_secs > 0).then(|| Duration::from_secs(self.query_timeout_secs))
    }

    /// HTTP request bound: the engine bound plus slack for scanning and
    /// rendering, so the engine's own timeout answers first. Unbounded when
    /// the engine is.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.query_timeout()
            .map(|t| t + Duration::from_secs(REQUEST_TIMEOUT_SLACK_SECS))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub sessions: SessionsConfig,
    pub engine: EngineConfig,
}

fn get_config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not find home directory")?;
    Ok(home.join(".datachat"))
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("config.json"))
}

impl AppConfig {
    /// Read `path`, or defaults when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    /// Load from `path` (or the default location) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load_from(p)?,
            None => Self::load_from(&default_config_path()?)?,
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Apply `OPENAI_API_KEY`, `BAMBOO_API_KEY`, `DATACHAT_SECURITY` and
    /// `DATACHAT_PUBLIC_BASE_URL` as read through `get`.
    pub fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(key) = get("OPENAI_API_KEY").filter(|k| !k.is_empty()) {
            self.engine.openai.api_key = Some(key);
        }
        if let Some(key) = get("BAMBOO_API_KEY").filter(|k| !k.is_empty()) {
            self.engine.bamboo.api_key = Some(key);
        } else if self.engine.bamboo.api_key.is_none() {
            self.engine.bamboo.api_key = self.engine.openai.api_key.clone();
        }
        if let Some(flag) = get("DATACHAT_SECURITY") {
            match flag.trim().to_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => self.security.enabled = true,
                "0" | "false" | "off" | "no" => self.security.enabled = false,
                other => tracing::warn!(value = %other, "Ignoring unrecognised DATACHAT_SECURITY"),
            }
        }
        if let Some(url) = get("DATACHAT_PUBLIC_BASE_URL") {
            self.server.public_base_url = url;
        }
    }

    /// Copy safe for display: API keys masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.engine.openai.api_key = self.engine.openai.api_key_masked();
        copy.engine.bamboo.api_key = self.engine.bamboo.api_key_masked();
        copy
    }
}
