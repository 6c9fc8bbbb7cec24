//! Broadcast hub: hot multicast of event payloads.
//!
//! Every subscriber owns a bounded queue. `publish` waits until each live
//! subscriber has room, so a slow client slows publishing down instead of
//! missing events. The wait is capped per subscriber; one that stays full past
//! the timeout is disconnected rather than skipped ahead.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Mutex, mpsc};
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default per-subscriber queue depth.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

/// Default time `publish` waits on a full subscriber.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// An opaque, ready-to-send payload. Cheap to clone across subscribers.
#[derive(Clone, PartialEq, Eq)]
pub struct Event(Arc<str>);

impl Event {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Event {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&str> for Event {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event({} bytes)", self.0.len())
    }
}

type Registry = StdMutex<HashMap<Uuid, mpsc::Sender<Event>>>;

/// Fan-out hub shared by the event source and every WebSocket connection.
pub struct BroadcastHub {
    subscribers: Arc<Registry>,
    /// Serializes publish passes so concurrent publishers keep a single order.
    publish_order: Mutex<()>,
    buffer: usize,
    send_timeout: Duration,
    published: AtomicU64,
}

impl BroadcastHub {
    pub fn new() -> Arc<Self> {
        Self::with_limits(DEFAULT_SUBSCRIBER_BUFFER, DEFAULT_SEND_TIMEOUT)
    }

    pub fn with_limits(buffer: usize, send_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            subscribers: Arc::new(StdMutex::new(HashMap::new())),
            publish_order: Mutex::new(()),
            buffer: buffer.max(1),
            send_timeout,
            published: AtomicU64::new(0),
        })
    }

    /// Open a subscription. Only events published after this call are delivered.
    pub fn subscribe(&self) -> Subscription {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.buffer);
        let count = {
            let mut subs = lock(&self.subscribers);
            subs.insert(id, tx);
            subs.len()
        };
        info!(subscriber = %id, active = count, "Subscriber added");
        Subscription {
            id,
            rx,
            registry: Arc::clone(&self.subscribers),
        }
    }

    /// Deliver `event` to every live subscriber, in call order.
    ///
    /// Returns the number of subscribers that accepted the event.
    pub async fn publish(&self, event: impl Into<Event>) -> usize {
        let event = event.into();
        let _order = self.publish_order.lock().await;

        // Snapshot so the registry lock is never held across an await.
        let targets: Vec<(Uuid, mpsc::Sender<Event>)> = lock(&self.subscribers)
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let outcomes = join_all(targets.iter().map(|(id, tx)| {
            let event = event.clone();
            async move { (*id, tx.send_timeout(event, self.send_timeout).await) }
        }))
        .await;

        let mut delivered = 0;
        let mut to_remove = Vec::new();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(()) => delivered += 1,
                Err(SendTimeoutError::Timeout(_)) => {
                    warn!(
                        subscriber = %id,
                        timeout_ms = self.send_timeout.as_millis() as u64,
                        "Disconnecting slow subscriber"
                    );
                    to_remove.push(id);
                }
                Err(SendTimeoutError::Closed(_)) => to_remove.push(id),
            }
        }

        if !to_remove.is_empty() {
            let mut subs = lock(&self.subscribers);
            for id in &to_remove {
                subs.remove(id);
            }
        }

        self.published.fetch_add(1, Ordering::Relaxed);
        debug!(recipients = targets.len(), delivered, "Event published");
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    /// Total publish calls since startup.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

fn lock(registry: &Registry) -> std::sync::MutexGuard<'_, HashMap<Uuid, mpsc::Sender<Event>>> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A live, ordered view of the hub. Dropping it unsubscribes.
pub struct Subscription {
    id: Uuid,
    rx: mpsc::Receiver<Event>,
    registry: Arc<Registry>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next event, or `None` once the hub has disconnected this subscriber.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if lock(&self.registry).remove(&self.id).is_some() {
            debug!(subscriber = %self.id, "Subscriber removed");
        }
    }
}
