//! Inbound chat activity: observer status and event sources.
//!
//! An [`EventSource`] watches the chat application for new activity, records
//! it in the shared [`ObserverStatus`] and publishes one event per message into
//! the [`BroadcastHub`]. [`ChatLogPoller`] is the SQLite-polling source.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::BroadcastHub;
use crate::config::ConfigStore;
use crate::decrypt::{Decryptor, decrypt_row};
use crate::error::DatabaseError;
use crate::store::{ChatDatabase, Row};

/// How many recent chat logs the dashboard keeps.
pub const LAST_LOGS_CAPACITY: usize = 50;

/// Observer liveness plus a ring of the most recent chat logs (oldest first).
#[derive(Debug)]
pub struct ObserverStatus {
    observing: AtomicBool,
    last_logs: Mutex<VecDeque<serde_json::Value>>,
    capacity: usize,
}

impl Default for ObserverStatus {
    fn default() -> Self {
        Self::with_capacity(LAST_LOGS_CAPACITY)
    }
}

impl ObserverStatus {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            observing: AtomicBool::new(false),
            last_logs: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub fn is_observing(&self) -> bool {
        self.observing.load(Ordering::Relaxed)
    }

    pub fn set_observing(&self, observing: bool) {
        self.observing.store(observing, Ordering::Relaxed);
    }

    pub fn record(&self, entry: serde_json::Value) {
        let mut logs = self
            .last_logs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if logs.len() == self.capacity {
            logs.pop_front();
        }
        logs.push_back(entry);
    }

    pub fn last_logs(&self) -> Vec<serde_json::Value> {
        self.last_logs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

/// A producer of inbound chat events.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Run until `cancel` fires, publishing each new event into `hub`.
    async fn run(
        &self,
        hub: Arc<BroadcastHub>,
        status: Arc<ObserverStatus>,
        cancel: CancellationToken,
    );
}

/// Table the chat application appends message rows to.
const CHAT_LOG_TABLE: &str = "chat_logs";

/// Polls the chat log table for rows newer than the last one seen.
pub struct ChatLogPoller {
    db: Arc<dyn ChatDatabase>,
    decryptor: Option<Arc<dyn Decryptor>>,
    config: Arc<dyn ConfigStore>,
}

impl ChatLogPoller {
    pub fn new(
        db: Arc<dyn ChatDatabase>,
        decryptor: Option<Arc<dyn Decryptor>>,
        config: Arc<dyn ConfigStore>,
    ) -> Self {
        Self {
            db,
            decryptor,
            config,
        }
    }

    async fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.get().await.db_polling_rate.max(1))
    }

    async fn latest_id(&self) -> Result<i64, DatabaseError> {
        let rows = self
            .db
            .query(
                &format!("SELECT COALESCE(MAX(_id), 0) AS last FROM {CHAT_LOG_TABLE}"),
                &[],
            )
            .await?;
        Ok(rows
            .first()
            .and_then(|r| r.get("last"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0))
    }

    async fn poll_once(&self, after: i64) -> Result<Vec<Row>, DatabaseError> {
        self.db
            .query(
                &format!("SELECT * FROM {CHAT_LOG_TABLE} WHERE _id > ?1 ORDER BY _id ASC"),
                &[json!(after)],
            )
            .await
    }

    /// Wire payload for one chat log row.
    fn to_event(row: &Row) -> serde_json::Value {
        json!({
            "msg": row.get("message").cloned().unwrap_or_default(),
            "room": row.get("chat_id").cloned().unwrap_or_default(),
            "sender": row.get("user_id").cloned().unwrap_or_default(),
            "json": row,
        })
    }
}

#[async_trait]
impl EventSource for ChatLogPoller {
    async fn run(
        &self,
        hub: Arc<BroadcastHub>,
        status: Arc<ObserverStatus>,
        cancel: CancellationToken,
    ) {
        // Start from the newest row so history is not replayed. The table may
        // not exist yet, so keep retrying until cancelled.
        let mut last_id = loop {
            match self.latest_id().await {
                Ok(id) => break id,
                Err(e) => {
                    warn!(error = %e, table = CHAT_LOG_TABLE, "Chat log poller not ready, retrying");
                }
            }
            let interval = self.poll_interval().await;
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
        };
        status.set_observing(true);
        info!(table = CHAT_LOG_TABLE, last_id, "Observing chat logs");

        loop {
            let interval = self.poll_interval().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let rows = match self.poll_once(last_id).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(error = %e, "Chat log poll failed");
                    continue;
                }
            };

            for row in rows {
                if let Some(id) = row.get("_id").and_then(|v| v.as_i64()) {
                    last_id = last_id.max(id);
                }
                let row = match &self.decryptor {
                    Some(d) => decrypt_row(d.as_ref(), row).await,
                    None => row,
                };
                let event = Self::to_event(&row);
                status.record(json!({
                    "receivedAt": Utc::now().to_rfc3339(),
                    "event": event,
                }));
                let delivered = hub.publish(event.to_string()).await;
                debug!(last_id, delivered, "Chat log published");
            }
        }

        status.set_observing(false);
        info!("Chat log observer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BotSettings, MemoryConfigStore};
    use crate::store::LibSqlChatDatabase;

    fn fast_polling() -> Arc<MemoryConfigStore> {
        Arc::new(MemoryConfigStore::new(BotSettings {
            db_polling_rate: 10,
            ..BotSettings::default()
        }))
    }

    async fn wait_until_observing(status: &ObserverStatus) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while !status.is_observing() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("poller never started observing");
    }

    #[tokio::test]
    async fn poller_waits_for_missing_table() {
        let db = Arc::new(LibSqlChatDatabase::new_memory().await.unwrap());
        let hub = BroadcastHub::new();
        let status = Arc::new(ObserverStatus::default());
        let cancel = CancellationToken::new();
        let mut sub = hub.subscribe();

        let poller = ChatLogPoller::new(db.clone(), None, fast_polling());
        let task = {
            let (hub, status, cancel) = (hub.clone(), status.clone(), cancel.clone());
            tokio::spawn(async move { poller.run(hub, status, cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!status.is_observing());
        assert!(!task.is_finished());

        db.execute_batch(
            "CREATE TABLE chat_logs (_id INTEGER PRIMARY KEY, chat_id INTEGER, user_id INTEGER, message TEXT);",
        )
        .await
        .unwrap();
        wait_until_observing(&status).await;

        db.execute_batch("INSERT INTO chat_logs VALUES (1, 42, 7, 'first');")
            .await
            .unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(event.as_str().contains("first"));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn poller_stops_when_cancelled_before_ready() {
        let db = Arc::new(LibSqlChatDatabase::new_memory().await.unwrap());
        let status = Arc::new(ObserverStatus::default());
        let cancel = CancellationToken::new();
        let poller = ChatLogPoller::new(db, None, fast_polling());
        let task = {
            let (status, cancel) = (status.clone(), cancel.clone());
            tokio::spawn(async move { poller.run(BroadcastHub::new(), status, cancel).await })
        };

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("poller ignored cancellation")
            .unwrap();
        assert!(!status.is_observing());
    }

    #[test]
    fn last_logs_ring_drops_oldest() {
        let status = ObserverStatus::with_capacity(2);
        status.record(json!(1));
        status.record(json!(2));
        status.record(json!(3));
        assert_eq!(status.last_logs(), vec![json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn poller_publishes_only_new_rows() {
        let db = Arc::new(LibSqlChatDatabase::new_memory().await.unwrap());
        db.execute_batch(
            "CREATE TABLE chat_logs (_id INTEGER PRIMARY KEY, chat_id INTEGER, user_id INTEGER, message TEXT);
             INSERT INTO chat_logs VALUES (1, 42, 7, 'old');",
        )
        .await
        .unwrap();

        let config = fast_polling();
        let hub = BroadcastHub::new();
        let status = Arc::new(ObserverStatus::default());
        let cancel = CancellationToken::new();
        let mut sub = hub.subscribe();

        let poller = ChatLogPoller::new(db.clone(), None, config);
        let task = {
            let (hub, status, cancel) = (hub.clone(), status.clone(), cancel.clone());
            tokio::spawn(async move { poller.run(hub, status, cancel).await })
        };

        // Wait until the poller has taken its starting point.
        wait_until_observing(&status).await;

        db.execute_batch("INSERT INTO chat_logs VALUES (2, 42, 7, 'new');")
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap();
        let payload: serde_json::Value = serde_json::from_str(event.as_str()).unwrap();
        assert_eq!(payload["msg"], json!("new"));
        assert_eq!(payload["room"], json!(42));
        let logs = status.last_logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0]["event"], payload);
        assert!(logs[0]["receivedAt"].is_string());

        cancel.cancel();
        task.await.unwrap();
        assert!(!status.is_observing());
    }
}
