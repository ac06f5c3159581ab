// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Answer rendering
//!
//! Turns an [`Answer`] into the wire shape the chat client displays. Image
//! answers are copied into the public artifact directory under a fresh random
//! name and referenced by URL. Rendering never fails: an artifact that cannot
//! be copied degrades to the original text.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::engine::Answer;
use crate::error::ChatError;
use crate::token;

static IMAGE_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(png|jpe?g)$").expect("Image path regex"));

/// Length of generated artifact file stems.
pub const ARTIFACT_NAME_LENGTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Directory served at `public_route`.
    pub public_dir: PathBuf,
    /// Scheme and host prefixed to artifact URLs. Empty yields relative URLs.
    pub public_base_url: String,
    pub public_route: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            public_dir: PathBuf::from("public"),
            public_base_url: String::new(),
            public_route: "/public".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerFormat {
    Text,
    Html,
}

/// Client-facing rendering of one answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedAnswer {
    pub answer: String,
    #[serde(rename = "type")]
    pub format: AnswerFormat,
    pub html: bool,
}

impl RenderedAnswer {
    pub fn text(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            format: AnswerFormat::Text,
            html: false,
        }
    }

    pub fn html(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            format: AnswerFormat::Html,
            html: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnswerRenderer {
    config: RenderConfig,
}

impl AnswerRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    pub async fn render(&self, answer: Answer) -> RenderedAnswer {
        match answer {
            Answer::Text(text) if IMAGE_PATH.is_match(&text) => {
                let source = PathBuf::from(&text);
                self.render_image(&source, text).await
            }
            Answer::Text(text) => RenderedAnswer::text(text),
            Answer::Table(table) => RenderedAnswer::html(table.to_html()),
            Answer::Image(path) => {
                let fallback = path.display().to_string();
                self.render_image(&path, fallback).await
            }
        }
    }

    async fn render_image(&self, source: &Path, fallback: String) -> RenderedAnswer {
        if !tokio::fs::try_exists(source).await.unwrap_or(false) {
            return RenderedAnswer::text(fallback);
        }
        match self.publish(source).await {
            Ok(url) => RenderedAnswer::html(format!("<img src=\"{}\"/>", url)),
            Err(e) => {
                let degraded = ChatError::RenderDegraded(e.to_string());
                warn!(source = %source.display(), error = %degraded, "Serving image path as text");
                RenderedAnswer::text(fallback)
            }
        }
    }

    /// Copy `source` into the public directory and return its URL.
    async fn publish(&self, source: &Path) -> std::io::Result<String> {
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_else(|| "png".to_string());
        let name = format!("{}.{}", token::random_string(ARTIFACT_NAME_LENGTH), ext);

        tokio::fs::create_dir_all(&self.config.public_dir).await?;
        tokio::fs::copy(source, self.config.public_dir.join(&name)).await?;
        debug!(artifact = %name, "Artifact published");

        Ok(format!(
            "{}{}/{}",
            self.config.public_base_url.trim_end_matches('/'),
            self.config.public_route.trim_end_matches('/'),
            name
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use serde_json::json;
    use tempfile::TempDir;

    fn renderer(dir: &TempDir) -> AnswerRenderer {
        AnswerRenderer::new(RenderConfig {
            public_dir: dir.path().join("public"),
            public_base_url: "http://localhost:8000".into(),
            public_route: "/public".into(),
        })
    }

    fn artifact_name(html: &str) -> String {
        let start = html.find("/public/").unwrap() + "/public/".len();
        let end = html.rfind('"').unwrap();
        html[start..end].to_string()
    }

    #[tokio::test]
    async fn test_existing_png_gets_fresh_name_each_time() {
        let dir = TempDir::new().unwrap();
        let chart = dir.path().join("chart.PNG");
        std::fs::write(&chart, b"\x89PNG").unwrap();
        let r = renderer(&dir);

        let first = r.render(Answer::Text(chart.display().to_string())).await;
        let second = r.render(Answer::Text(chart.display().to_string())).await;

        assert_eq!(first.format, AnswerFormat::Html);
        assert!(first.html);
        assert!(first.answer.starts_with("<img src=\"http://localhost:8000/public/"));
        let (a, b) = (artifact_name(&first.answer), artifact_name(&second.answer));
        assert_ne!(a, b);
        assert!(a.ends_with(".png"));
        assert!(dir.path().join("public").join(&a).exists());
        assert!(dir.path().join("public").join(&b).exists());
    }

    #[tokio::test]
    async fn test_missing_png_degrades_to_text() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.png").display().to_string();
        let rendered = renderer(&dir).render(Answer::Text(missing.clone())).await;
        assert_eq!(rendered, RenderedAnswer::text(missing));
    }

    #[tokio::test]
    async fn test_copy_failure_degrades_to_text() {
        let dir = TempDir::new().unwrap();
        let chart = dir.path().join("plot.jpg");
        std::fs::write(&chart, b"jpeg").unwrap();
        // A regular file where the public directory should be.
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"").unwrap();
        let r = AnswerRenderer::new(RenderConfig {
            public_dir: blocker,
            ..RenderConfig::default()
        });
        let rendered = r.render(Answer::Image(chart.clone())).await;
        assert_eq!(rendered, RenderedAnswer::text(chart.display().to_string()));
    }

    #[tokio::test]
    async fn test_table_and_plain_text() {
        let dir = TempDir::new().unwrap();
        let r = renderer(&dir);
        let table = Dataset::new("t", vec!["n".into()], vec![vec![json!(1)]]);
        let rendered = r.render(Answer::Table(table)).await;
        assert_eq!(rendered.format, AnswerFormat::Html);
        assert!(rendered.answer.starts_with("<table"));

        let rendered = r.render(Answer::Text("China has the most sales".into())).await;
        assert_eq!(rendered, RenderedAnswer::text("China has the most sales"));
    }

    #[test]
    fn test_wire_shape() {
        let value = serde_json::to_value(RenderedAnswer::html("<b>x</b>")).unwrap();
        assert_eq!(value, json!({"answer": "<b>x</b>", "type": "html", "html": true}));
    }
}
