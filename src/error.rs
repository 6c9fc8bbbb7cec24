//! Error types for the Iris gateway.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Malformed or out-of-range client input.
///
/// Carries the offending field so the HTTP layer can build a structured
/// error body without string parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Failure of a single executor call. Never surfaced to request callers.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Executor rejected {kind} action for chat {chat_id}: {reason}")]
    Rejected {
        kind: &'static str,
        chat_id: i64,
        reason: String,
    },

    #[error("Image {index} is not valid base64: {reason}")]
    InvalidImage { index: usize, reason: String },
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Chat database errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Chat database is not configured")]
    NotConfigured,
}

/// Content decryption errors.
#[derive(Debug, thiserror::Error)]
pub enum DecryptError {
    #[error("Decryption failed: {0}")]
    Failed(String),

    #[error("Decryption is not available")]
    NotConfigured,
}

// ── HTTP mapping ────────────────────────────────────────────────────────

/// Error returned from HTTP handlers, rendered as `{"message": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    BadRequest(String),

    #[error("Query error: query={query}, err={source}")]
    Query {
        query: String,
        #[source]
        source: DatabaseError,
    },

    #[error(transparent)]
    Decrypt(#[from] DecryptError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Query { .. } | Self::Decrypt(_) | Self::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }
        (status, Json(serde_json::json!({ "message": self.to_string() }))).into_response()
    }
}
