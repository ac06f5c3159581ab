// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Client-Facing Error Responses
//!
//! Errors that cross the HTTP boundary carry:
//! - a short actionable message
//! - a unique reference code for support tracking
//!
//! They never carry stack traces, file paths, addresses, keys or PII. Full
//! (sanitized) details are logged under the same reference code.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use rand::Rng;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use crate::error::ChatError;
use crate::security::input::PII_PATTERNS;
use crate::utils::redact_secrets;

// =============================================================================
// ERROR REFERENCE CODE GENERATION
// =============================================================================

/// Format: ERR-YYYYMMDD-XXXXXX (e.g., ERR-20240115-A3F8K2)
pub fn generate_reference_code() -> String {
    const CHARS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let date = Utc::now().format("%Y%m%d");
    let mut rng = rand::thread_rng();
    let random: String = (0..6)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect();
    format!("ERR-{}-{}", date, random)
}

// =============================================================================
// USER-FACING ERROR TYPES
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "error_type", rename_all = "snake_case")]
pub enum UserError {
    /// 400
    InvalidRequest {
        message: String,
        reference: String,
        field: Option<String>,
    },

    /// 403: missing, unknown or expired session token.
    AuthorizationDenied { message: String, reference: String },

    /// 503
    ServiceUnavailable {
        message: String,
        reference: String,
        retry_after_secs: Option<u64>,
    },

    /// 504
    GatewayTimeout { message: String, reference: String },

    /// 500. Never exposes internal details.
    InternalError { message: String, reference: String },
}

impl UserError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            UserError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            UserError::AuthorizationDenied { .. } => StatusCode::FORBIDDEN,
            UserError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            UserError::GatewayTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            UserError::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn reference(&self) -> &str {
        match self {
            UserError::InvalidRequest { reference, .. }
            | UserError::AuthorizationDenied { reference, .. }
            | UserError::ServiceUnavailable { reference, .. }
            | UserError::GatewayTimeout { reference, .. }
            | UserError::InternalError { reference, .. } => reference,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            UserError::InvalidRequest { message, .. }
            | UserError::AuthorizationDenied { message, .. }
            | UserError::ServiceUnavailable { message, .. }
            | UserError::GatewayTimeout { message, .. }
            | UserError::InternalError { message, .. } => message,
        }
    }
}

/// JSON body of every error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: UserError,
    pub status: u16,
}

impl IntoResponse for UserError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retry_after = match &self {
            UserError::ServiceUnavailable { retry_after_secs, .. } => *retry_after_secs,
            _ => None,
        };
        let response = ErrorResponse {
            status: status.as_u16(),
            error: self,
        };

        let body = serde_json::to_string(&response).unwrap_or_else(|_| {
            r#"{"error":{"error_type":"internal_error","message":"An unexpected error occurred","reference":"ERR-FALLBACK"},"status":500}"#.to_string()
        });

        let mut response = (status, [(header::CONTENT_TYPE, "application/json")], body).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

// =============================================================================
// ERROR CONSTRUCTORS (WITH LOGGING)
// =============================================================================

impl UserError {
    /// Bad client input: empty upload, bad index, unknown model, no data yet.
    pub fn invalid_request(user_message: &str, field: Option<&str>, internal_details: Option<&str>) -> Self {
        let reference = generate_reference_code();

        if let Some(details) = internal_details {
            tracing::info!(
                reference = %reference,
                field = ?field,
                details = %sanitize_error_details(details),
                "Request rejected"
            );
        }

        Self::InvalidRequest {
            message: user_message.to_string(),
            reference,
            field: field.map(|s| s.to_string()),
        }
    }

    /// Missing, unknown or expired session token. The reason is logged, never returned.
    pub fn authorization_denied(internal_reason: Option<&str>) -> Self {
        let reference = generate_reference_code();

        if let Some(reason) = internal_reason {
            tracing::warn!(
                reference = %reference,
                reason = %sanitize_error_details(reason),
                "Session token refused"
            );
        }

        Self::AuthorizationDenied {
            message: "Invalid session".to_string(),
            reference,
        }
    }

    /// The registry is full. `retry_after_secs` is when the next idle session
    /// becomes reclaimable, if sessions expire at all.
    pub fn session_limit(live: usize, retry_after_secs: Option<u64>) -> Self {
        let reference = generate_reference_code();

        tracing::warn!(
            reference = %reference,
            live,
            retry_after_secs = ?retry_after_secs,
            "No session slot available"
        );

        let message = match retry_after_secs {
            Some(secs) => format!(
                "Too many open chat sessions. Please retry in {} seconds.",
                secs
            ),
            None => "Too many open chat sessions. Please retry later.".to_string(),
        };
        Self::ServiceUnavailable {
            message,
            reference,
            retry_after_secs,
        }
    }

    /// The engine did not answer within the configured query timeout.
    pub fn analysis_timeout(limit_secs: u64) -> Self {
        let reference = generate_reference_code();

        tracing::error!(reference = %reference, limit_secs, "Analysis exceeded query timeout");

        Self::GatewayTimeout {
            message: format!(
                "The analysis took longer than {} seconds. Please try a simpler question.",
                limit_secs
            ),
            reference,
        }
    }

    /// Logs full details internally. The client only sees the reference.
    pub fn internal_error(internal_error: &str) -> Self {
        let reference = generate_reference_code();

        tracing::error!(
            reference = %reference,
            details = %sanitize_error_details(internal_error),
            "Query failed"
        );

        Self::InternalError {
            message: format!("Something went wrong answering that. Reference: {}", reference),
            reference,
        }
    }
}

impl From<ChatError> for UserError {
    fn from(err: ChatError) -> Self {
        let details = err.to_string();
        match err {
            ChatError::InvalidSession => UserError::authorization_denied(Some(&details)),
            ChatError::EmptyInput => {
                UserError::invalid_request("Setting empty data", Some("datasets"), Some(&details))
            }
            ChatError::OutOfRange { .. } => {
                UserError::invalid_request("Selecting data out of range", Some("index"), Some(&details))
            }
            ChatError::NotInitialized => UserError::invalid_request(
                "No data selected. Upload or select a dataset first.",
                None,
                Some(&details),
            ),
            ChatError::Timeout(secs) => UserError::analysis_timeout(secs),
            ChatError::CapacityExceeded { live, retry_after_secs } => {
                UserError::session_limit(live, retry_after_secs)
            }
            ChatError::UnsafeContent { .. } | ChatError::RenderDegraded(_) | ChatError::Engine(_) => {
                UserError::internal_error(&details)
            }
        }
    }
}

// =============================================================================
// ERROR SANITIZATION
// =============================================================================

/// What engine and filesystem errors leak beyond keys and PII: local paths
/// (dataset uploads, artifact copies), backend URLs and source locations.
static LOCATION_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (Regex::new(r"at [^\s]+\.rs:\d+:\d+").expect("Source location regex"), "[LOCATION_REDACTED]"),
        (Regex::new(r"thread '[^']+' panicked at").expect("Panic regex"), "[PANIC_REDACTED]"),
        (Regex::new(r"https?://[^\s]+").expect("URL regex"), "[URL_REDACTED]"),
        (Regex::new(r"[A-Za-z]:\\[^\s]+").expect("Windows path regex"), "[PATH_REDACTED]"),
        (Regex::new(r"(?:\.{0,2}/)?(?:[\w.-]+/)+[\w.-]+\.(?:png|jpe?g|csv|xlsx?|json)\b").expect("File path regex"), "[PATH_REDACTED]"),
        (Regex::new(r"/(?:home|usr|var|etc|opt|tmp|root|srv)/[^\s]+").expect("Unix path regex"), "[PATH_REDACTED]"),
    ]
});

/// Scrub an error message before it is logged: locations first, then the
/// secret patterns used for query previews, then the scanners' PII patterns.
pub fn sanitize_error_details(error: &str) -> String {
    let mut result = error.to_string();
    for (pattern, replacement) in LOCATION_PATTERNS.iter() {
        result = pattern.replace_all(&result, *replacement).into_owned();
    }
    result = redact_secrets(&result);
    for (pattern, kind) in PII_PATTERNS.iter() {
        result = pattern
            .replace_all(&result, format!("[REDACTED_{}]", kind).as_str())
            .into_owned();
    }
    result
}
