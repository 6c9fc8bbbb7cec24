//! Request/response bodies for the HTTP surface.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dispatch::DispatchStats;
use crate::error::ValidationError;
use crate::store::Row;

/// `POST /reply` body.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReplyRequest {
    /// Chat room id; a JSON string or integer.
    pub room: serde_json::Value,
    #[serde(rename = "type")]
    pub kind: String,
    /// A string for `TEXT`/`IMAGE`, an array of strings for `IMAGE_MULTIPLE`.
    pub data: serde_json::Value,
}

/// Reply kinds accepted by `POST /reply`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyType {
    Text,
    Image,
    ImageMultiple,
}

impl FromStr for ReplyType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TEXT" => Ok(Self::Text),
            "IMAGE" => Ok(Self::Image),
            "IMAGE_MULTIPLE" => Ok(Self::ImageMultiple),
            other => Err(ValidationError::new(
                "type",
                format!("unknown reply type {other:?}, expected TEXT, IMAGE or IMAGE_MULTIPLE"),
            )),
        }
    }
}

/// `POST /config/{name}` body. Only the field matching `name` is read.
///
/// Numeric fields stay untyped so a wrong type is reported as a validation
/// error on that field rather than a body parse failure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigRequest {
    pub endpoint: Option<String>,
    pub botname: Option<String>,
    pub rate: Option<serde_json::Value>,
    pub port: Option<serde_json::Value>,
}

/// Generic acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

impl ApiResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: "success".to_string(),
        }
    }
}

/// `GET /dashboard/status` body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStatus {
    pub is_observing: bool,
    pub status_message: String,
    pub last_logs: Vec<serde_json::Value>,
    pub dispatch: DispatchStats,
    pub subscribers: usize,
}

/// `POST /query` body.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub bind: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub data: Vec<Row>,
}

/// `POST /decrypt` body.
#[derive(Debug, Clone, Deserialize)]
pub struct DecryptRequest {
    pub enc: i64,
    pub b64_ciphertext: String,
    #[serde(default)]
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecryptResponse {
    pub plain_text: String,
}
