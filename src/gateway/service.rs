//! Gateway service: validation and orchestration behind the HTTP routes.
//!
//! Every operation accepts or rejects immediately. A successful reply only
//! means the action was handed to the dispatcher, not that it was delivered.

use std::sync::Arc;

use tracing::{info, warn};

use super::model::{ConfigRequest, DashboardStatus, DecryptRequest, QueryRequest, ReplyRequest, ReplyType};
use crate::broadcast::{BroadcastHub, Subscription};
use crate::config::{BotSettings, ConfigStore, ConfigUpdate};
use crate::decrypt::{Decryptor, decrypt_row};
use crate::dispatch::{Action, Dispatcher};
use crate::error::{ApiError, DatabaseError, DecryptError, ValidationError};
use crate::observer::ObserverStatus;
use crate::store::{ChatDatabase, Row};

/// Collaborators the gateway is wired with.
pub struct GatewayDeps {
    pub dispatcher: Arc<Dispatcher>,
    pub hub: Arc<BroadcastHub>,
    pub config: Arc<dyn ConfigStore>,
    pub observer: Arc<ObserverStatus>,
    /// Backs `/query`; `None` when no chat database is configured.
    pub chat_db: Option<Arc<dyn ChatDatabase>>,
    /// Backs `/decrypt` and query row decryption.
    pub decryptor: Option<Arc<dyn Decryptor>>,
    /// Referer attached to text replies.
    pub referer: String,
}

/// The request gateway. Cheap to share via `Arc`.
pub struct Gateway {
    deps: GatewayDeps,
}

impl Gateway {
    pub fn new(deps: GatewayDeps) -> Arc<Self> {
        Arc::new(Self { deps })
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.deps.dispatcher
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.deps.hub
    }

    /// Validate a reply and hand it to the dispatcher.
    pub fn submit_reply(&self, req: &ReplyRequest) -> Result<(), ValidationError> {
        let action = build_action(req, &self.deps.referer)?;
        info!(kind = action.kind(), chat_id = action.chat_id(), "Reply accepted");
        self.deps.dispatcher.enqueue(action);
        Ok(())
    }

    /// Validate and persist one named setting.
    ///
    /// A new send rate hands a worker restart to the dispatcher and returns
    /// without waiting for an in-flight execute to finish.
    pub async fn update_config(
        &self,
        name: &str,
        req: &ConfigRequest,
    ) -> Result<BotSettings, ApiError> {
        let update = parse_config_update(name, req)?;
        let settings = self.deps.config.set(update.clone()).await?;
        info!(key = update.key(), "Setting updated");

        match update {
            ConfigUpdate::MessageSendRate(_) => {
                self.deps.dispatcher.request_restart();
            }
            ConfigUpdate::BotPort(port) => {
                info!(port, "New HTTP port takes effect on next start")
            }
            _ => {}
        }
        Ok(settings)
    }

    pub async fn config(&self) -> BotSettings {
        self.deps.config.get().await
    }

    pub async fn status(&self) -> DashboardStatus {
        let is_observing = self.deps.observer.is_observing();
        DashboardStatus {
            is_observing,
            status_message: if is_observing {
                "Observing database".to_string()
            } else {
                "Not observing database".to_string()
            },
            last_logs: self.deps.observer.last_logs(),
            dispatch: self.deps.dispatcher.stats(),
            subscribers: self.deps.hub.subscriber_count(),
        }
    }

    /// Open a live subscription; dropping it unsubscribes.
    pub fn subscribe_events(&self) -> Subscription {
        self.deps.hub.subscribe()
    }

    /// Run a query against the chat database, decrypting rows when possible.
    pub async fn query(&self, req: &QueryRequest) -> Result<Vec<Row>, ApiError> {
        let query_error = |source: DatabaseError| ApiError::Query {
            query: req.query.clone(),
            source,
        };
        let db = self
            .deps
            .chat_db
            .as_ref()
            .ok_or_else(|| query_error(DatabaseError::NotConfigured))?;
        let bind = req.bind.as_deref().unwrap_or_default();
        let rows = db.query(&req.query, bind).await.map_err(query_error)?;

        let Some(decryptor) = &self.deps.decryptor else {
            return Ok(rows);
        };
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(decrypt_row(decryptor.as_ref(), row).await);
        }
        Ok(out)
    }

    /// Decrypt one ciphertext. `user_id` defaults to the configured bot id.
    pub async fn decrypt(&self, req: &DecryptRequest) -> Result<String, ApiError> {
        let decryptor = self
            .deps
            .decryptor
            .as_ref()
            .ok_or(DecryptError::NotConfigured)?;
        let user_id = match req.user_id {
            Some(id) => id,
            None => self.deps.config.get().await.bot_id,
        };
        let plain = decryptor
            .decrypt(req.enc, &req.b64_ciphertext, user_id)
            .await
            .inspect_err(|e| warn!(enc = req.enc, error = %e, "Decrypt failed"))?;
        Ok(plain)
    }
}

// ── Validation ──────────────────────────────────────────────────────────

/// Turn a reply request into an [`Action`].
///
/// Only the request shape is checked here. Image payloads are carried as
/// received; decoding them is the executor's job.
pub fn build_action(req: &ReplyRequest, referer: &str) -> Result<Action, ValidationError> {
    let chat_id = parse_room(&req.room)?;
    let action = match req.kind.parse::<ReplyType>()? {
        ReplyType::Text => Action::SendText {
            referer: referer.to_string(),
            chat_id,
            text: expect_string(&req.data)?.to_string(),
        },
        ReplyType::Image => Action::SendPhoto {
            chat_id,
            image: expect_string(&req.data)?.to_string(),
        },
        ReplyType::ImageMultiple => {
            let items = req.data.as_array().ok_or_else(|| {
                ValidationError::new("data", "IMAGE_MULTIPLE expects an array of base64 strings")
            })?;
            if items.is_empty() {
                return Err(ValidationError::new("data", "image list is empty"));
            }
            let images = items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| ValidationError::new(format!("data[{i}]"), "expected a string"))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Action::SendPhotoSet { chat_id, images }
        }
    };
    Ok(action)
}

fn parse_room(room: &serde_json::Value) -> Result<i64, ValidationError> {
    let parsed = match room {
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        serde_json::Value::Number(n) => n.as_i64(),
        _ => None,
    };
    parsed.ok_or_else(|| ValidationError::new("room", format!("{room} is not an integer id")))
}

fn expect_string(data: &serde_json::Value) -> Result<&str, ValidationError> {
    data.as_str()
        .ok_or_else(|| ValidationError::new("data", "expected a string"))
}

/// Map a `/config/{name}` request onto a settings change.
pub fn parse_config_update(name: &str, req: &ConfigRequest) -> Result<ConfigUpdate, ValidationError> {
    match name {
        "endpoint" => non_blank("endpoint", req.endpoint.as_deref()).map(ConfigUpdate::Endpoint),
        "botname" => non_blank("botname", req.botname.as_deref()).map(ConfigUpdate::BotName),
        "dbrate" => rate("rate", req.rate.as_ref()).map(ConfigUpdate::DbPollingRate),
        "sendrate" => rate("rate", req.rate.as_ref()).map(ConfigUpdate::MessageSendRate),
        "botport" => {
            let port = req
                .port
                .as_ref()
                .and_then(|v| v.as_i64())
                .ok_or_else(|| ValidationError::new("port", "missing or invalid value"))?;
            if !(1..=65535).contains(&port) {
                return Err(ValidationError::new(
                    "port",
                    "Invalid port number. Port must be between 1 and 65535.",
                ));
            }
            Ok(ConfigUpdate::BotPort(port as u16))
        }
        other => Err(ValidationError::new("name", format!("Unknown config {other}"))),
    }
}

fn non_blank(field: &str, value: Option<&str>) -> Result<String, ValidationError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.to_string()),
        _ => Err(ValidationError::new(field, "missing or empty value")),
    }
}

fn rate(field: &str, value: Option<&serde_json::Value>) -> Result<u64, ValidationError> {
    value
        .and_then(|v| v.as_u64())
        .ok_or_else(|| ValidationError::new(field, "missing or invalid value"))
}
